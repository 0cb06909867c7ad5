//! Symbolic native function registry for the standard library.
//!
//! Registers every stdlib native function by symbolic name (e.g.
//! `"math.abs"`, `"logger.info"`) into an [`NativeFunctionRegistry`]. At
//! module load time the VM resolves these names to handlers for dispatch.

use ember_sdk::{NativeCallResult, NativeFunctionRegistry, NativeValue};

/// Extract f64 from a NativeValue, handling both int and float.
fn get_f64(val: &NativeValue) -> f64 {
    if let Some(f) = val.as_f64() {
        f
    } else if let Some(i) = val.as_i32() {
        i as f64
    } else {
        0.0
    }
}

/// Register all stdlib native functions into the given registry.
///
/// After calling this, the registry contains every symbolic name this
/// crate implements (`"math.abs"`, `"logger.info"`, `"time.sleep"`, ...)
/// mapped to its handler.
pub fn register_stdlib(registry: &mut NativeFunctionRegistry) {
    register_logger(registry);
    register_math(registry);
    register_time(registry);
    register_sync(registry);
    register_task(registry);
}

/// Register logger native functions.
fn register_logger(registry: &mut NativeFunctionRegistry) {
    registry.register("logger.debug", |ctx, args| {
        let parts: Vec<String> = args.iter().filter_map(|v| ctx.read_string(*v).ok()).collect();
        crate::logger::debug(&parts.join(" "));
        NativeCallResult::null()
    });

    registry.register("logger.info", |ctx, args| {
        let parts: Vec<String> = args.iter().filter_map(|v| ctx.read_string(*v).ok()).collect();
        crate::logger::info(&parts.join(" "));
        NativeCallResult::null()
    });

    registry.register("logger.warn", |ctx, args| {
        let parts: Vec<String> = args.iter().filter_map(|v| ctx.read_string(*v).ok()).collect();
        crate::logger::warn(&parts.join(" "));
        NativeCallResult::null()
    });

    registry.register("logger.error", |ctx, args| {
        let parts: Vec<String> = args.iter().filter_map(|v| ctx.read_string(*v).ok()).collect();
        crate::logger::error(&parts.join(" "));
        NativeCallResult::null()
    });
}

/// Register math native functions.
fn register_math(registry: &mut NativeFunctionRegistry) {
    registry.register("math.abs", |_ctx, args| {
        NativeCallResult::f64(crate::math::abs(args.first().map(get_f64).unwrap_or(0.0)))
    });
    registry.register("math.sign", |_ctx, args| {
        NativeCallResult::f64(crate::math::sign(args.first().map(get_f64).unwrap_or(0.0)))
    });
    registry.register("math.floor", |_ctx, args| {
        NativeCallResult::f64(crate::math::floor(args.first().map(get_f64).unwrap_or(0.0)))
    });
    registry.register("math.ceil", |_ctx, args| {
        NativeCallResult::f64(crate::math::ceil(args.first().map(get_f64).unwrap_or(0.0)))
    });
    registry.register("math.round", |_ctx, args| {
        NativeCallResult::f64(crate::math::round(args.first().map(get_f64).unwrap_or(0.0)))
    });
    registry.register("math.trunc", |_ctx, args| {
        NativeCallResult::f64(crate::math::trunc(args.first().map(get_f64).unwrap_or(0.0)))
    });
    registry.register("math.min", |_ctx, args| {
        let a = args.first().map(get_f64).unwrap_or(0.0);
        let b = args.get(1).map(get_f64).unwrap_or(0.0);
        NativeCallResult::f64(crate::math::min(a, b))
    });
    registry.register("math.max", |_ctx, args| {
        let a = args.first().map(get_f64).unwrap_or(0.0);
        let b = args.get(1).map(get_f64).unwrap_or(0.0);
        NativeCallResult::f64(crate::math::max(a, b))
    });
    registry.register("math.pow", |_ctx, args| {
        let base = args.first().map(get_f64).unwrap_or(0.0);
        let exp = args.get(1).map(get_f64).unwrap_or(0.0);
        NativeCallResult::f64(crate::math::pow(base, exp))
    });
    registry.register("math.sqrt", |_ctx, args| {
        NativeCallResult::f64(crate::math::sqrt(args.first().map(get_f64).unwrap_or(0.0)))
    });
    registry.register("math.sin", |_ctx, args| {
        NativeCallResult::f64(crate::math::sin(args.first().map(get_f64).unwrap_or(0.0)))
    });
    registry.register("math.cos", |_ctx, args| {
        NativeCallResult::f64(crate::math::cos(args.first().map(get_f64).unwrap_or(0.0)))
    });
    registry.register("math.tan", |_ctx, args| {
        NativeCallResult::f64(crate::math::tan(args.first().map(get_f64).unwrap_or(0.0)))
    });
    registry.register("math.asin", |_ctx, args| {
        NativeCallResult::f64(crate::math::asin(args.first().map(get_f64).unwrap_or(0.0)))
    });
    registry.register("math.acos", |_ctx, args| {
        NativeCallResult::f64(crate::math::acos(args.first().map(get_f64).unwrap_or(0.0)))
    });
    registry.register("math.atan", |_ctx, args| {
        NativeCallResult::f64(crate::math::atan(args.first().map(get_f64).unwrap_or(0.0)))
    });
    registry.register("math.atan2", |_ctx, args| {
        let y = args.first().map(get_f64).unwrap_or(0.0);
        let x = args.get(1).map(get_f64).unwrap_or(0.0);
        NativeCallResult::f64(crate::math::atan2(y, x))
    });
    registry.register("math.exp", |_ctx, args| {
        NativeCallResult::f64(crate::math::exp(args.first().map(get_f64).unwrap_or(0.0)))
    });
    registry.register("math.log", |_ctx, args| {
        NativeCallResult::f64(crate::math::log(args.first().map(get_f64).unwrap_or(0.0)))
    });
    registry.register("math.log10", |_ctx, args| {
        NativeCallResult::f64(crate::math::log10(args.first().map(get_f64).unwrap_or(0.0)))
    });
    registry.register("math.random", |_ctx, _args| {
        NativeCallResult::f64(crate::math::random())
    });
    registry.register("math.PI", |_ctx, _args| NativeCallResult::f64(crate::math::pi()));
    registry.register("math.E", |_ctx, _args| NativeCallResult::f64(crate::math::e()));
}

/// Register wall-clock/monotonic-clock/sleep native functions. `sleep` and
/// `sleepMicros` suspend the calling task via the scheduler's blocking-work
/// IO path rather than parking the OS thread directly, so other tasks keep
/// running while this one waits.
fn register_time(registry: &mut NativeFunctionRegistry) {
    use std::sync::LazyLock;
    use std::time::{Instant, SystemTime, UNIX_EPOCH};

    static EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);

    registry.register("time.now", |_ctx, _args| {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        NativeCallResult::f64(now.as_millis() as f64)
    });

    registry.register("time.monotonic", |_ctx, _args| {
        NativeCallResult::f64(EPOCH.elapsed().as_millis() as f64)
    });

    registry.register("time.hrtime", |_ctx, _args| {
        NativeCallResult::f64(EPOCH.elapsed().as_nanos() as f64)
    });

    registry.register("time.sleep", |_ctx, args| {
        let ms = args
            .first()
            .and_then(|v| v.as_f64().or_else(|| v.as_i32().map(|i| i as f64)))
            .unwrap_or(0.0) as u64;
        if ms == 0 {
            return NativeCallResult::null();
        }
        NativeCallResult::Suspend(ember_sdk::IoRequest::BlockingWork {
            work: Box::new(move || {
                std::thread::sleep(std::time::Duration::from_millis(ms));
                ember_sdk::IoCompletion::Primitive(ember_sdk::NativeValue::null())
            }),
        })
    });

    registry.register("time.sleepMicros", |_ctx, args| {
        let us = args
            .first()
            .and_then(|v| v.as_f64().or_else(|| v.as_i32().map(|i| i as f64)))
            .unwrap_or(0.0) as u64;
        if us == 0 {
            return NativeCallResult::null();
        }
        NativeCallResult::Suspend(ember_sdk::IoRequest::BlockingWork {
            work: Box::new(move || {
                std::thread::sleep(std::time::Duration::from_micros(us));
                ember_sdk::IoCompletion::Primitive(ember_sdk::NativeValue::null())
            }),
        })
    });
}

/// Register mutex and channel native functions (spec §4.6 "Shared
/// resources" / "Channel"). Thin wrappers over `NativeContext`'s mutex/
/// channel operations, the same way `register_time` wraps blocking work —
/// these exist to prove out the concurrency substrate's native-facing
/// contract, not to offer a full synchronization library.
fn register_sync(registry: &mut NativeFunctionRegistry) {
    registry.register("sync.mutex.new", |ctx, _args| NativeCallResult::Value(ctx.create_mutex()));

    registry.register("sync.mutex.lock", |ctx, args| match args.first() {
        Some(&m) => match ctx.mutex_lock(m) {
            Ok(()) => NativeCallResult::null(),
            Err(e) => NativeCallResult::Error(e.to_string()),
        },
        None => NativeCallResult::Error("sync.mutex.lock expects a mutex argument".to_string()),
    });

    registry.register("sync.mutex.tryLock", |ctx, args| match args.first() {
        Some(&m) => NativeCallResult::bool(ctx.mutex_try_lock(m)),
        None => NativeCallResult::Error("sync.mutex.tryLock expects a mutex argument".to_string()),
    });

    registry.register("sync.mutex.unlock", |ctx, args| match args.first() {
        Some(&m) => match ctx.mutex_unlock(m) {
            Ok(()) => NativeCallResult::null(),
            Err(e) => NativeCallResult::Error(e.to_string()),
        },
        None => NativeCallResult::Error("sync.mutex.unlock expects a mutex argument".to_string()),
    });

    registry.register("sync.mutex.isLocked", |ctx, args| match args.first() {
        Some(&m) => NativeCallResult::bool(ctx.mutex_is_locked(m)),
        None => NativeCallResult::bool(false),
    });

    registry.register("sync.channel.new", |ctx, args| {
        let capacity = args.first().and_then(|v| v.as_i32()).unwrap_or(16).max(1) as usize;
        NativeCallResult::Value(ctx.create_channel(capacity))
    });

    registry.register("sync.channel.send", |ctx, args| match (args.first(), args.get(1)) {
        (Some(&c), Some(&v)) => match ctx.channel_send(c, v) {
            Ok(sent) => NativeCallResult::bool(sent),
            Err(e) => NativeCallResult::Error(e.to_string()),
        },
        _ => NativeCallResult::Error("sync.channel.send expects (channel, value)".to_string()),
    });

    registry.register("sync.channel.receive", |ctx, args| match args.first() {
        Some(&c) => match ctx.channel_receive(c) {
            Ok(Some(v)) => NativeCallResult::Value(v),
            Ok(None) => NativeCallResult::null(),
            Err(e) => NativeCallResult::Error(e.to_string()),
        },
        None => NativeCallResult::Error("sync.channel.receive expects a channel argument".to_string()),
    });

    registry.register("sync.channel.tryReceive", |ctx, args| match args.first() {
        Some(&c) => match ctx.channel_try_receive(c) {
            Some(v) => NativeCallResult::Value(v),
            None => NativeCallResult::null(),
        },
        None => NativeCallResult::null(),
    });

    registry.register("sync.channel.trySend", |ctx, args| match (args.first(), args.get(1)) {
        (Some(&c), Some(&v)) => NativeCallResult::bool(ctx.channel_try_send(c, v)),
        _ => NativeCallResult::bool(false),
    });

    registry.register("sync.channel.close", |ctx, args| {
        if let Some(&c) = args.first() {
            ctx.channel_close(c);
        }
        NativeCallResult::null()
    });

    registry.register("sync.channel.isClosed", |ctx, args| match args.first() {
        Some(&c) => NativeCallResult::bool(ctx.channel_is_closed(c)),
        None => NativeCallResult::bool(true),
    });

    registry.register("sync.rwlock.new", |ctx, _args| NativeCallResult::Value(ctx.create_rwlock()));

    registry.register("sync.rwlock.read", |ctx, args| match args.first() {
        Some(&l) => match ctx.rwlock_read(l) {
            Ok(()) => NativeCallResult::null(),
            Err(e) => NativeCallResult::Error(e.to_string()),
        },
        None => NativeCallResult::Error("sync.rwlock.read expects a rwlock argument".to_string()),
    });

    registry.register("sync.rwlock.tryRead", |ctx, args| match args.first() {
        Some(&l) => NativeCallResult::bool(ctx.rwlock_try_read(l)),
        None => NativeCallResult::bool(false),
    });

    registry.register("sync.rwlock.unlockRead", |ctx, args| match args.first() {
        Some(&l) => match ctx.rwlock_unlock_read(l) {
            Ok(()) => NativeCallResult::null(),
            Err(e) => NativeCallResult::Error(e.to_string()),
        },
        None => NativeCallResult::Error("sync.rwlock.unlockRead expects a rwlock argument".to_string()),
    });

    registry.register("sync.rwlock.write", |ctx, args| match args.first() {
        Some(&l) => match ctx.rwlock_write(l) {
            Ok(()) => NativeCallResult::null(),
            Err(e) => NativeCallResult::Error(e.to_string()),
        },
        None => NativeCallResult::Error("sync.rwlock.write expects a rwlock argument".to_string()),
    });

    registry.register("sync.rwlock.tryWrite", |ctx, args| match args.first() {
        Some(&l) => NativeCallResult::bool(ctx.rwlock_try_write(l)),
        None => NativeCallResult::bool(false),
    });

    registry.register("sync.rwlock.unlockWrite", |ctx, args| match args.first() {
        Some(&l) => match ctx.rwlock_unlock_write(l) {
            Ok(()) => NativeCallResult::null(),
            Err(e) => NativeCallResult::Error(e.to_string()),
        },
        None => NativeCallResult::Error("sync.rwlock.unlockWrite expects a rwlock argument".to_string()),
    });

    registry.register("sync.rwlock.isWriteLocked", |ctx, args| match args.first() {
        Some(&l) => NativeCallResult::bool(ctx.rwlock_is_write_locked(l)),
        None => NativeCallResult::bool(false),
    });

    registry.register("sync.atomic.new", |ctx, args| {
        let initial = args.first().and_then(|v| v.as_i32()).unwrap_or(0) as i64;
        NativeCallResult::Value(ctx.create_atomic(initial))
    });

    registry.register("sync.atomic.load", |ctx, args| match args.first() {
        Some(&a) => match ctx.atomic_load(a) {
            Ok(v) => NativeCallResult::f64(v as f64),
            Err(e) => NativeCallResult::Error(e.to_string()),
        },
        None => NativeCallResult::Error("sync.atomic.load expects an atomic argument".to_string()),
    });

    registry.register("sync.atomic.store", |ctx, args| match (args.first(), args.get(1)) {
        (Some(&a), Some(v)) => match ctx.atomic_store(a, v.as_i32().unwrap_or(0) as i64) {
            Ok(()) => NativeCallResult::null(),
            Err(e) => NativeCallResult::Error(e.to_string()),
        },
        _ => NativeCallResult::Error("sync.atomic.store expects (atomic, value)".to_string()),
    });

    registry.register("sync.atomic.compareExchange", |ctx, args| {
        match (args.first(), args.get(1), args.get(2)) {
            (Some(&a), Some(expected), Some(new)) => {
                match ctx.atomic_compare_exchange(a, expected.as_i32().unwrap_or(0) as i64, new.as_i32().unwrap_or(0) as i64)
                {
                    Ok(swapped) => NativeCallResult::bool(swapped),
                    Err(e) => NativeCallResult::Error(e.to_string()),
                }
            }
            _ => NativeCallResult::Error("sync.atomic.compareExchange expects (atomic, expected, new)".to_string()),
        }
    });

    registry.register("sync.atomic.fetchAdd", |ctx, args| match (args.first(), args.get(1)) {
        (Some(&a), Some(delta)) => match ctx.atomic_fetch_add(a, delta.as_i32().unwrap_or(0) as i64) {
            Ok(prev) => NativeCallResult::f64(prev as f64),
            Err(e) => NativeCallResult::Error(e.to_string()),
        },
        _ => NativeCallResult::Error("sync.atomic.fetchAdd expects (atomic, delta)".to_string()),
    });

    registry.register("sync.sharedData.new", |ctx, args| {
        let initial = args.first().copied().unwrap_or_else(NativeValue::null);
        NativeCallResult::Value(ctx.create_shared_data(initial))
    });

    registry.register("sync.sharedData.get", |ctx, args| match args.first() {
        Some(&c) => match ctx.shared_data_get(c) {
            Ok(v) => NativeCallResult::Value(v),
            Err(e) => NativeCallResult::Error(e.to_string()),
        },
        None => NativeCallResult::Error("sync.sharedData.get expects a shared data argument".to_string()),
    });

    registry.register("sync.sharedData.set", |ctx, args| match (args.first(), args.get(1)) {
        (Some(&c), Some(&v)) => match ctx.shared_data_set(c, v) {
            Ok(()) => NativeCallResult::null(),
            Err(e) => NativeCallResult::Error(e.to_string()),
        },
        _ => NativeCallResult::Error("sync.sharedData.set expects (cell, value)".to_string()),
    });
}

/// Register task spawn/join native functions (spec §4.6 "Cooperative
/// concurrency substrate"). `task.spawn` takes the name of a top-level
/// function plus its arguments; the returned task id round-trips through
/// the other `task.*` functions as a plain number, same as any other
/// script-visible integer.
fn register_task(registry: &mut NativeFunctionRegistry) {
    registry.register("task.spawn", |ctx, args| {
        let Some(name) = args.first().and_then(|v| ctx.read_string(*v).ok()) else {
            return NativeCallResult::Error("task.spawn expects a function name as its first argument".to_string());
        };
        match ctx.spawn_function(&name, &args[1..]) {
            Ok(id) => NativeCallResult::f64(id as f64),
            Err(e) => NativeCallResult::Error(e.to_string()),
        }
    });

    registry.register("task.await", |ctx, args| {
        let Some(id) = args.first().and_then(get_task_id) else {
            return NativeCallResult::Error("task.await expects a task id".to_string());
        };
        match ctx.await_task(id) {
            Ok(v) => NativeCallResult::Value(v),
            Err(e) => NativeCallResult::Error(e.to_string()),
        }
    });

    registry.register("task.isDone", |ctx, args| match args.first().and_then(get_task_id) {
        Some(id) => NativeCallResult::bool(ctx.task_is_done(id)),
        None => NativeCallResult::bool(false),
    });

    registry.register("task.cancel", |ctx, args| {
        if let Some(id) = args.first().and_then(get_task_id) {
            ctx.task_cancel(id);
        }
        NativeCallResult::null()
    });

    registry.register("task.currentId", |ctx, _args| NativeCallResult::f64(ctx.current_task_id() as f64));
}

/// Task ids round-trip through script code as floats (spec §3 no separate
/// integer-handle type); convert back to the `u64` the scheduler expects.
fn get_task_id(val: &NativeValue) -> Option<u64> {
    val.as_f64().map(|f| f as u64).or_else(|| val.as_i32().map(|i| i as u64))
}
