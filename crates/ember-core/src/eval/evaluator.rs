//! The tree-walking evaluator (spec §4 "Evaluator", §4.4, §7).

use super::frame::{CallFrame, CallStack, Environment};
use crate::ast::{BinaryOp, CatchClause, KeyBody, Literal, Node, NodeIndex, Program, UnaryOp};
use crate::exception::{ErrorKind, ExceptionValue, PHPException, TraceFrame};
use crate::heap::array::{ArrayKey, EmberArray};
use crate::heap::string::EmberString;
use crate::object::{Closure, InlineCache, Object, StructInstance};
use crate::value::{HeapTag, Value};
use crate::vm::Vm;
use std::rc::Rc;

/// Non-local control transfer inside a function body: an ordinary
/// exception, or a structured jump (`return`/`break`/`continue`) that
/// unwinds to the nearest enclosing construct that handles it.
pub enum Signal {
    Exception(ExceptionValue),
    Return(Value),
    Break(u32),
    Continue(u32),
}

pub type EvalResult = Result<Value, Signal>;

impl From<ExceptionValue> for Signal {
    fn from(e: ExceptionValue) -> Self {
        Signal::Exception(e)
    }
}

fn runtime_err(kind: ErrorKind) -> Signal {
    Signal::Exception(ExceptionValue::Runtime(kind))
}

/// Walks a [`Program`]'s AST against a [`Vm`]'s registries and globals.
pub struct Evaluator<'vm> {
    vm: &'vm mut Vm,
    stack: CallStack,
    /// Shape-keyed property-offset cache shared by every property access
    /// this evaluator performs (spec §4.3 "Inline cache").
    property_cache: InlineCache,
    /// Stack trace accumulated so far for the exception currently
    /// propagating, most-recent-frame first (spec §4.5/§8 "Exception
    /// flow"). Populated one [`TraceFrame`] at a time as `run_function_body`
    /// unwinds each call frame; drained into the final [`PHPException`] once
    /// the exception escapes every `catch`, and cleared when a `catch`
    /// clause actually handles it.
    pending_trace: Vec<TraceFrame>,
}

impl<'vm> Evaluator<'vm> {
    pub fn new(vm: &'vm mut Vm) -> Self {
        let max_depth = vm.limits.max_call_depth;
        Self { vm, stack: CallStack::new(max_depth), property_cache: InlineCache::new(), pending_trace: Vec::new() }
    }

    /// Build a [`PHPException`] from a propagating exception value, taking
    /// whatever trace frames have accumulated on the way out.
    fn build_exception(&mut self, value: ExceptionValue) -> PHPException {
        PHPException { value, trace: std::mem::take(&mut self.pending_trace) }
    }

    /// Entry point for a whole program: any `return`/`break`/`continue`
    /// escaping the top level is a logic error in the source, reported as
    /// the program's result value being discarded in favor of null.
    pub fn eval_top_level(&mut self, program: &Program, entry: NodeIndex) -> Result<Value, PHPException> {
        match self.eval(program, entry) {
            Ok(v) => Ok(v),
            Err(Signal::Exception(e)) => Err(self.build_exception(e)),
            Err(Signal::Return(v)) => Ok(v),
            Err(Signal::Break(_)) | Err(Signal::Continue(_)) => Ok(Value::null()),
        }
    }

    /// Invoke a registered user or native function by name from outside the
    /// AST-walking path (spec §4.7: an HTTP handler invoked by the embedder,
    /// not by a `Node::NamedFunctionCall`). Exceptions are normalized to
    /// `PHPException` the same way `eval_top_level` does; a `return` reaching
    /// this boundary already unwinds to `Ok` inside `run_function_body`, so
    /// only `break`/`continue` escaping a function body (a logic error in
    /// the source) need a fallback.
    pub fn call_function(&mut self, name: &str, args: Vec<Value>) -> Result<Value, PHPException> {
        let result = self.call_named(name, args);
        self.finish_external(result)
    }

    /// Invoke a method on an already-constructed object from outside the
    /// AST-walking path. See [`Evaluator::call_function`].
    pub fn call_method_external(&mut self, recv: Value, method: &str, args: Vec<Value>) -> Result<Value, PHPException> {
        let result = self.call_method(recv, method, args);
        self.finish_external(result)
    }

    fn finish_external(&mut self, result: EvalResult) -> Result<Value, PHPException> {
        match result {
            Ok(v) => Ok(v),
            Err(Signal::Exception(e)) => Err(self.build_exception(e)),
            Err(Signal::Return(v)) => Ok(v),
            Err(Signal::Break(_)) | Err(Signal::Continue(_)) => Ok(Value::null()),
        }
    }

    fn current_env(&mut self) -> &mut Environment {
        if self.stack.depth() == 0 {
            &mut self.vm.globals
        } else {
            &mut self.stack.top_mut().expect("depth > 0").env
        }
    }

    fn current_receiver(&self) -> Option<Value> {
        self.stack.top().and_then(|f| f.receiver)
    }

    /// Allocate a string and register it with this VM's collector. Every
    /// heap allocation the evaluator performs goes through one of these
    /// `alloc_*` helpers rather than `crate::heap::alloc_*` directly, so
    /// nothing it creates is invisible to `collect_young`/`collect_full`
    /// (spec §4.2's nursery, §8's "every heap value is reachable from
    /// exactly one registration path").
    fn alloc_string(&mut self, s: EmberString) -> Value {
        let v = crate::heap::alloc_string(s);
        self.vm.memory.register(v);
        v
    }

    fn alloc_array(&mut self, a: EmberArray) -> Value {
        let v = crate::heap::alloc_array(a);
        self.vm.memory.register(v);
        v
    }

    fn alloc_object(&mut self, o: Object) -> Value {
        let v = crate::heap::alloc_object(o);
        self.vm.memory.register(v);
        v
    }

    fn alloc_struct(&mut self, s: StructInstance) -> Value {
        let v = crate::heap::alloc_struct(s);
        self.vm.memory.register(v);
        v
    }

    fn alloc_closure(&mut self, c: Closure) -> Value {
        let v = crate::heap::alloc_closure(c);
        self.vm.memory.register(v);
        v
    }

    fn alloc_resource(&mut self, r: crate::heap::resource::Resource) -> Value {
        let v = crate::heap::alloc_resource(r);
        self.vm.memory.register(v);
        v
    }

    /// `new Mutex()` (spec §4.6 "Shared resources"): allocate a mutex in
    /// `self.vm.mutexes` and hand the script a resource value wrapping its
    /// id, the same representation `ember_runtime::context::VmContext`'s
    /// `mutex_*` operations expect.
    fn instantiate_mutex(&mut self) -> Value {
        let id = self.vm.mutexes.create();
        self.alloc_resource(crate::heap::resource::Resource::new("Mutex", id, |_| {}))
    }

    /// `new Channel($capacity)` (spec §4.6 "Channel"): allocate a channel in
    /// `self.vm.channels` and hand the script a resource value wrapping its
    /// id. A missing or non-integer capacity argument defaults to 16.
    fn instantiate_channel(&mut self, args: &[Value]) -> Value {
        let capacity = args.first().and_then(|v| v.as_int()).unwrap_or(16).max(1) as usize;
        let id = self.vm.channels.create(capacity);
        self.alloc_resource(crate::heap::resource::Resource::new("Channel", id, |_| {}))
    }

    /// `new RwLock()` (spec §4.6 "Mutex / RwLock / Atomic / SharedData"):
    /// allocate a read/write lock in `self.vm.rwlocks` and hand the script
    /// a resource value wrapping its id.
    fn instantiate_rwlock(&mut self) -> Value {
        let id = self.vm.rwlocks.create();
        self.alloc_resource(crate::heap::resource::Resource::new("RwLock", id, |_| {}))
    }

    /// `new Atomic($initial)` (spec §4.6): allocate an atomic integer cell
    /// in `self.vm.atomics`, seeded from the first argument (default 0),
    /// and hand the script a resource value wrapping its id.
    fn instantiate_atomic(&mut self, args: &[Value]) -> Value {
        let initial = args.first().and_then(|v| v.as_int()).unwrap_or(0) as i64;
        let id = self.vm.atomics.create(initial);
        self.alloc_resource(crate::heap::resource::Resource::new("Atomic", id, |_| {}))
    }

    /// `new SharedData($initial)` (spec §4.6, §5 "SharedData explicitly
    /// uses atomic refcounts"): allocate a lock-guarded value slot in
    /// `self.vm.shared_data`, seeded from the first argument (default
    /// null), and hand the script a resource value wrapping its id. The
    /// seed value is retained since the registry now holds a long-lived
    /// reference to it.
    fn instantiate_shared_data(&mut self, args: &[Value]) -> Value {
        let initial = args.first().copied().unwrap_or_else(Value::null);
        crate::heap::retain(initial);
        let id = self.vm.shared_data.create(initial);
        self.alloc_resource(crate::heap::resource::Resource::new("SharedData", id, |_| {}))
    }

    /// Record the line the current frame is executing, if the parser
    /// annotated this node. Nodes the parser left unannotated (most
    /// synthetic/test fixtures) leave the frame's `line` unchanged, so
    /// `TraceFrame.line` reflects the last annotated node visited rather
    /// than a bogus `0`.
    fn track_line(&mut self, program: &Program, idx: NodeIndex) {
        if let Some((line, _col)) = program.source_map.position(idx) {
            if let Some(frame) = self.stack.top_mut() {
                frame.line = line;
            }
        }
    }

    fn eval(&mut self, program: &Program, idx: NodeIndex) -> EvalResult {
        self.track_line(program, idx);
        match program.get(idx).clone() {
            Node::Literal(lit) => Ok(self.eval_literal(&lit)),
            Node::Variable(name) => self
                .current_env()
                .get(&name)
                .ok_or_else(|| runtime_err(ErrorKind::UndefinedVariable(name))),
            Node::ArrayLiteral(entries) => self.eval_array_literal(program, &entries),

            Node::Binary { op, left, right } => self.eval_binary(program, op, left, right),
            Node::Unary { op, operand } => self.eval_unary(program, op, operand),
            Node::Ternary { cond, then_branch, else_branch } => {
                let c = self.eval(program, cond)?;
                if truthy(c) {
                    match then_branch {
                        Some(t) => self.eval(program, t),
                        None => Ok(c),
                    }
                } else {
                    self.eval(program, else_branch)
                }
            }
            Node::Assign { target, value } => self.eval_assign(program, target, value),
            Node::CompoundAssign { op, target, value } => {
                let rhs = self.eval(program, value)?;
                let cur = self.eval(program, target)?;
                let combined = self.apply_binary(op, cur, rhs)?;
                self.assign_to(program, target, combined)
            }
            Node::Pipe { input, stage } => {
                let v = self.eval(program, input)?;
                self.call_value_with(program, stage, vec![v])
            }

            Node::PropertyAccess { object, property, nullsafe } => {
                let obj = self.eval(program, object)?;
                if nullsafe && obj.is_null() {
                    return Ok(Value::null());
                }
                self.read_property(obj, &property)
            }
            Node::DynamicPropertyAccess { object, property, nullsafe } => {
                let obj = self.eval(program, object)?;
                if nullsafe && obj.is_null() {
                    return Ok(Value::null());
                }
                let name = self.eval(program, property)?;
                let name = self.to_display_string(name);
                self.read_property(obj, &name)
            }
            Node::ArrayAccess { array, index } => {
                let arr = self.eval(program, array)?;
                let idx = match index {
                    Some(i) => Some(self.eval(program, i)?),
                    None => None,
                };
                self.read_array_index(arr, idx)
            }
            Node::StaticPropertyAccess { class, property } => {
                let c = self.vm.class(&class).ok_or_else(|| runtime_err(ErrorKind::UndefinedClass(class.clone())))?;
                let v = c.get_static(&property).ok_or_else(|| {
                    runtime_err(ErrorKind::UndefinedProperty { class: class.clone(), property: property.clone() })
                })?;
                crate::heap::retain(v);
                Ok(v)
            }
            Node::ClassConstantAccess { class, constant } => {
                let c = self
                    .vm
                    .class(&class)
                    .ok_or_else(|| runtime_err(ErrorKind::UndefinedClass(class.clone())))?;
                c.resolve_constant(&constant)
                    .ok_or_else(|| runtime_err(ErrorKind::TypeError(format!("undefined constant {class}::{constant}"))))
            }

            Node::FunctionCall { callee, args } => {
                let callee_val = self.eval(program, callee)?;
                let arg_vals = self.eval_args(program, &args)?;
                self.call_value(callee_val, arg_vals)
            }
            Node::NamedFunctionCall { name, args } => {
                let arg_vals = self.eval_args(program, &args)?;
                self.call_named(&name, arg_vals)
            }
            Node::MethodCall { receiver, method, args, nullsafe } => {
                let recv = self.eval(program, receiver)?;
                if nullsafe && recv.is_null() {
                    return Ok(Value::null());
                }
                let arg_vals = self.eval_args(program, &args)?;
                self.call_method(recv, &method, arg_vals)
            }
            Node::StaticMethodCall { class, method, args } => {
                let arg_vals = self.eval_args(program, &args)?;
                self.call_static_method(&class, &method, arg_vals)
            }
            Node::New { class, args } => {
                let arg_vals = self.eval_args(program, &args)?;
                self.instantiate(&class, arg_vals)
            }
            Node::CloneWith { source, overrides } => self.eval_clone_with(program, source, &overrides),

            Node::Block(stmts) => {
                let mut last = Value::null();
                for s in stmts {
                    last = self.eval(program, s)?;
                }
                Ok(last)
            }
            Node::If { cond, then_branch, else_branch } => {
                if truthy(self.eval(program, cond)?) {
                    self.eval(program, then_branch)
                } else if let Some(e) = else_branch {
                    self.eval(program, e)
                } else {
                    Ok(Value::null())
                }
            }
            Node::While { cond, body } => self.eval_while(program, cond, body),
            Node::DoWhile { body, cond } => self.eval_do_while(program, body, cond),
            Node::For { init, cond, step, body } => self.eval_for(program, init, cond, step, body),
            Node::Foreach { iterable, key_binding, value_binding, by_ref, body } => {
                self.eval_foreach(program, iterable, key_binding.as_deref(), &value_binding, by_ref, body)
            }
            Node::Match { subject, arms, default } => self.eval_match(program, subject, &arms, default),
            Node::Return(expr) => {
                let v = match expr {
                    Some(e) => self.eval(program, e)?,
                    None => Value::null(),
                };
                Err(Signal::Return(v))
            }
            Node::Break(n) => Err(Signal::Break(n)),
            Node::Continue(n) => Err(Signal::Continue(n)),
            Node::ExprStatement(e) => self.eval(program, e),

            Node::Try { body, catches, finally } => self.eval_try(program, body, &catches, finally),
            Node::Throw(expr) => {
                let v = self.eval(program, expr)?;
                Err(Signal::Exception(ExceptionValue::Thrown(v)))
            }

            Node::FunctionDecl { name, params, body } => {
                let func = crate::heap::function::UserFunction {
                    name: name.clone(),
                    file: program.file.clone(),
                    params: params
                        .iter()
                        .map(|p| crate::heap::function::Param {
                            name: p.name.clone(),
                            default: p.default,
                            variadic: p.variadic,
                        })
                        .collect(),
                    body,
                };
                self.vm.register_function(Rc::new(func));
                Ok(Value::null())
            }
            Node::ClosureDecl { params, body, captures, is_arrow } => {
                self.eval_closure_decl(program, &params, body, &captures, is_arrow)
            }
            Node::ClassDecl { .. } | Node::InterfaceDecl { .. } | Node::TraitDecl { .. } | Node::StructDecl { .. } => {
                // Class-shaped declarations are registered ahead of
                // evaluation by the embedder (`Vm::register_class` et al.)
                // once the front end has resolved parent/interface/trait
                // names into `Rc` handles; walking them here would need
                // the same resolution pass. See DESIGN.md.
                Ok(Value::null())
            }
        }
    }

    fn eval_literal(&mut self, lit: &Literal) -> Value {
        match lit {
            Literal::Null => Value::null(),
            Literal::Bool(b) => Value::of_bool(*b),
            Literal::Int(i) => {
                if let Ok(i32v) = i32::try_from(*i) {
                    Value::of_int(i32v)
                } else {
                    Value::of_float(*i as f64)
                }
            }
            Literal::Float(f) => Value::of_float(*f),
            Literal::Str(s) => {
                let v = self.alloc_string(EmberString::from_str(s));
                v
            }
        }
    }

    fn eval_args(&mut self, program: &Program, args: &[NodeIndex]) -> Result<Vec<Value>, Signal> {
        args.iter().map(|a| self.eval(program, *a)).collect()
    }

    fn eval_array_literal(&mut self, program: &Program, entries: &[(Option<NodeIndex>, NodeIndex)]) -> EvalResult {
        let mut arr = EmberArray::new();
        for (key, value) in entries {
            let v = self.eval(program, *value)?;
            crate::heap::retain(v);
            match key {
                Some(k) => {
                    let kv = self.eval(program, *k)?;
                    let key = self.to_array_key(kv);
                    if let Some(old) = arr.set(key, v) {
                        crate::heap::release(old);
                    }
                }
                None => {
                    arr.push(v);
                }
            }
        }
        Ok(self.alloc_array(arr))
    }

    fn to_array_key(&mut self, v: Value) -> ArrayKey {
        if let Some(i) = v.as_int() {
            ArrayKey::Int(i as i64)
        } else {
            ArrayKey::Str(self.to_display_string(v))
        }
    }

    fn to_display_string(&mut self, v: Value) -> String {
        if let Some(addr) = v.as_addr_of(HeapTag::String) {
            let s = unsafe { crate::heap::deref::<EmberString>(addr) };
            s.to_string_lossy().into_owned()
        } else if let Some(i) = v.as_int() {
            i.to_string()
        } else if let Some(f) = v.as_float() {
            f.to_string()
        } else if let Some(b) = v.as_bool() {
            if b { "1".to_string() } else { String::new() }
        } else if let Some(addr) = v.as_addr_of(HeapTag::Object) {
            let object = unsafe { crate::heap::deref::<Object>(addr) };
            match object.class.resolve_method("__toString") {
                Some(m) => match self.invoke_user_function(&m.function, Some(v), Vec::new()) {
                    Ok(result) => self.to_display_string(result),
                    Err(_) => String::new(),
                },
                None => String::new(),
            }
        } else if let Some(addr) = v.as_addr_of(HeapTag::Struct) {
            let s = unsafe { crate::heap::deref::<StructInstance>(addr) };
            match s.class.resolve_method("__toString") {
                Some(m) => match self.invoke_user_function(&m.function, Some(v), Vec::new()) {
                    Ok(result) => self.to_display_string(result),
                    Err(_) => String::new(),
                },
                None => String::new(),
            }
        } else {
            String::new()
        }
    }

    fn eval_binary(&mut self, program: &Program, op: BinaryOp, left: NodeIndex, right: NodeIndex) -> EvalResult {
        match op {
            BinaryOp::And => {
                let l = self.eval(program, left)?;
                if !truthy(l) {
                    return Ok(Value::of_bool(false));
                }
                let r = self.eval(program, right)?;
                Ok(Value::of_bool(truthy(r)))
            }
            BinaryOp::Or => {
                let l = self.eval(program, left)?;
                if truthy(l) {
                    return Ok(Value::of_bool(true));
                }
                let r = self.eval(program, right)?;
                Ok(Value::of_bool(truthy(r)))
            }
            BinaryOp::Coalesce => {
                let l = self.eval(program, left)?;
                if !l.is_null() {
                    Ok(l)
                } else {
                    self.eval(program, right)
                }
            }
            _ => {
                let l = self.eval(program, left)?;
                let r = self.eval(program, right)?;
                self.apply_binary(op, l, r)
            }
        }
    }

    fn apply_binary(&mut self, op: BinaryOp, l: Value, r: Value) -> EvalResult {
        use BinaryOp::*;
        match op {
            Add | Sub | Mul | Div | Mod => self.arith(op, l, r),
            Concat => {
                let ls = self.to_display_string(l);
                let rs = self.to_display_string(r);
                Ok(self.alloc_string(EmberString::from_str(&(ls + &rs))))
            }
            Eq => Ok(Value::of_bool(self.loose_equals(l, r))),
            NotEq => Ok(Value::of_bool(!self.loose_equals(l, r))),
            Identical => Ok(Value::of_bool(l.raw_bits() == r.raw_bits())),
            NotIdentical => Ok(Value::of_bool(l.raw_bits() != r.raw_bits())),
            Lt | LtEq | Gt | GtEq | Spaceship => self.compare(op, l, r),
            BitAnd | BitOr | BitXor | Shl | Shr => self.bitwise(op, l, r),
            And | Or | Coalesce => unreachable!("short-circuit ops handled in eval_binary"),
        }
    }

    fn arith(&mut self, op: BinaryOp, l: Value, r: Value) -> EvalResult {
        if let (Some(a), Some(b)) = (l.as_int(), r.as_int()) {
            let (a, b) = (a as i64, b as i64);
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div => {
                    if b == 0 {
                        return Err(runtime_err(ErrorKind::DivisionByZero));
                    }
                    if a % b == 0 {
                        Some(a / b)
                    } else {
                        return Ok(Value::of_float(a as f64 / b as f64));
                    }
                }
                BinaryOp::Mod => {
                    if b == 0 {
                        return Err(runtime_err(ErrorKind::DivisionByZero));
                    }
                    Some(a % b)
                }
                _ => unreachable!(),
            };
            return Ok(match result {
                Some(v) => {
                    if let Ok(i32v) = i32::try_from(v) {
                        Value::of_int(i32v)
                    } else {
                        Value::of_float(v as f64)
                    }
                }
                None => Value::of_float(match op {
                    BinaryOp::Add => a as f64 + b as f64,
                    BinaryOp::Sub => a as f64 - b as f64,
                    BinaryOp::Mul => a as f64 * b as f64,
                    _ => unreachable!(),
                }),
            });
        }
        let a = self.as_numeric(l)?;
        let b = self.as_numeric(r)?;
        let result = match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => {
                if b == 0.0 {
                    return Err(runtime_err(ErrorKind::DivisionByZero));
                }
                a / b
            }
            BinaryOp::Mod => {
                if b == 0.0 {
                    return Err(runtime_err(ErrorKind::DivisionByZero));
                }
                a % b
            }
            _ => unreachable!(),
        };
        Ok(Value::of_float(result))
    }

    fn as_numeric(&mut self, v: Value) -> Result<f64, Signal> {
        if let Some(i) = v.as_int() {
            Ok(i as f64)
        } else if let Some(f) = v.as_float() {
            Ok(f)
        } else {
            Err(runtime_err(ErrorKind::TypeError(format!("value of type {} is not numeric", v.type_name()))))
        }
    }

    fn loose_equals(&mut self, l: Value, r: Value) -> bool {
        if l.raw_bits() == r.raw_bits() {
            return true;
        }
        if let (Some(a), Some(b)) = (l.as_int(), r.as_int()) {
            return a == b;
        }
        if l.is_heap_kind(HeapTag::String) && r.is_heap_kind(HeapTag::String) {
            let a = self.to_display_string(l);
            let b = self.to_display_string(r);
            return a == b;
        }
        false
    }

    fn compare(&mut self, op: BinaryOp, l: Value, r: Value) -> EvalResult {
        let ordering = if let (Some(a), Some(b)) = (l.as_int(), r.as_int()) {
            a.cmp(&b)
        } else {
            let a = self.as_numeric(l)?;
            let b = self.as_numeric(r)?;
            a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
        };
        use std::cmp::Ordering::*;
        Ok(match op {
            BinaryOp::Lt => Value::of_bool(ordering == Less),
            BinaryOp::LtEq => Value::of_bool(ordering != Greater),
            BinaryOp::Gt => Value::of_bool(ordering == Greater),
            BinaryOp::GtEq => Value::of_bool(ordering != Less),
            BinaryOp::Spaceship => Value::of_int(match ordering {
                Less => -1,
                Equal => 0,
                Greater => 1,
            }),
            _ => unreachable!(),
        })
    }

    fn bitwise(&mut self, op: BinaryOp, l: Value, r: Value) -> EvalResult {
        let a = l.as_int().ok_or_else(|| runtime_err(ErrorKind::TypeError("bitwise operand must be int".to_string())))?;
        let b = r.as_int().ok_or_else(|| runtime_err(ErrorKind::TypeError("bitwise operand must be int".to_string())))?;
        let result = match op {
            BinaryOp::BitAnd => a & b,
            BinaryOp::BitOr => a | b,
            BinaryOp::BitXor => a ^ b,
            BinaryOp::Shl => a << (b & 31),
            BinaryOp::Shr => a >> (b & 31),
            _ => unreachable!(),
        };
        Ok(Value::of_int(result))
    }

    fn eval_unary(&mut self, program: &Program, op: UnaryOp, operand: NodeIndex) -> EvalResult {
        match op {
            UnaryOp::Neg => {
                let v = self.eval(program, operand)?;
                if let Some(i) = v.as_int() {
                    Ok(Value::of_int(-i))
                } else {
                    Ok(Value::of_float(-self.as_numeric(v)?))
                }
            }
            UnaryOp::Not => {
                let v = self.eval(program, operand)?;
                Ok(Value::of_bool(!truthy(v)))
            }
            UnaryOp::BitNot => {
                let v = self.eval(program, operand)?;
                let i = v.as_int().ok_or_else(|| runtime_err(ErrorKind::TypeError("~ requires int".to_string())))?;
                Ok(Value::of_int(!i))
            }
            UnaryOp::PreIncrement | UnaryOp::PreDecrement | UnaryOp::PostIncrement | UnaryOp::PostDecrement => {
                let old = self.eval(program, operand)?;
                let delta = if matches!(op, UnaryOp::PreIncrement | UnaryOp::PostIncrement) { 1 } else { -1 };
                let old_i = old.as_int().unwrap_or(0);
                let new_v = Value::of_int(old_i + delta);
                self.assign_to(program, operand, new_v)?;
                Ok(if matches!(op, UnaryOp::PreIncrement | UnaryOp::PreDecrement) { new_v } else { old })
            }
        }
    }

    fn eval_assign(&mut self, program: &Program, target: NodeIndex, value: NodeIndex) -> EvalResult {
        let v = self.eval(program, value)?;
        self.assign_to(program, target, v)
    }

    fn assign_to(&mut self, program: &Program, target: NodeIndex, value: Value) -> EvalResult {
        match program.get(target).clone() {
            Node::Variable(name) => {
                self.current_env().set(&name, value);
                Ok(value)
            }
            Node::PropertyAccess { object, property, .. } => {
                let obj = self.eval(program, object)?;
                self.write_property(obj, &property, value)?;
                Ok(value)
            }
            Node::ArrayAccess { array, index } => {
                let arr = self.eval(program, array)?;
                let idx = match index {
                    Some(i) => Some(self.eval(program, i)?),
                    None => None,
                };
                self.write_array_index(arr, idx, value)?;
                Ok(value)
            }
            Node::StaticPropertyAccess { class, property } => {
                let c = self.vm.class(&class).ok_or_else(|| runtime_err(ErrorKind::UndefinedClass(class.clone())))?;
                crate::heap::retain(value);
                if let Some(old) = c.set_static(&property, value) {
                    crate::heap::release(old);
                }
                Ok(value)
            }
            _ => Err(runtime_err(ErrorKind::TypeError("invalid assignment target".to_string()))),
        }
    }

    fn read_property(&mut self, obj: Value, name: &str) -> EvalResult {
        if let Some(addr) = obj.as_addr_of(HeapTag::Struct) {
            let s = unsafe { crate::heap::deref::<StructInstance>(addr) };
            let class_name = s.class.name.clone();
            return match s.field_index(name) {
                Some(idx) => {
                    let v = s.fields[idx];
                    crate::heap::retain(v);
                    Ok(v)
                }
                None => Err(runtime_err(ErrorKind::UndefinedProperty { class: class_name, property: name.to_string() })),
            };
        }
        let addr = obj
            .as_addr_of(HeapTag::Object)
            .ok_or_else(|| runtime_err(ErrorKind::TypeError("property access on non-object".to_string())))?;
        let object = unsafe { crate::heap::deref::<Object>(addr) };
        let shape_id = object.shape().id();
        if let Some(offset) = self.property_cache.lookup(shape_id, name) {
            if let Some(v) = object.get_at(offset) {
                return Ok(v);
            }
        }
        if let Some(v) = object.get(name) {
            if let Some(offset) = object.shape().offset(name) {
                self.property_cache.insert(shape_id, name, offset);
            }
            return Ok(v);
        }
        let class_name = object.class.name.clone();
        if let Some(getter) = object.class.resolve_method("__get") {
            let name_val = self.alloc_string(EmberString::from_str(name));
            return self.invoke_user_function(&getter.function, Some(obj), vec![name_val]);
        }
        Err(runtime_err(ErrorKind::UndefinedProperty { class: class_name, property: name.to_string() }))
    }

    fn write_property(&mut self, obj: Value, name: &str, value: Value) -> Result<(), Signal> {
        if let Some(addr) = obj.as_addr_of(HeapTag::Struct) {
            let s = unsafe { crate::heap::deref_mut::<StructInstance>(addr) };
            let class_name = s.class.name.clone();
            let idx = s
                .field_index(name)
                .ok_or_else(|| runtime_err(ErrorKind::UndefinedProperty { class: class_name, property: name.to_string() }))?;
            crate::heap::retain(value);
            let old = std::mem::replace(&mut s.fields[idx], value);
            crate::heap::release(old);
            return Ok(());
        }
        let addr = obj
            .as_addr_of(HeapTag::Object)
            .ok_or_else(|| runtime_err(ErrorKind::TypeError("property write on non-object".to_string())))?;
        let object = unsafe { crate::heap::deref::<Object>(addr) };
        if let Some(prop) = object.class.properties.iter().find(|p| p.name == name) {
            if prop.readonly && object.has(name) {
                return Err(runtime_err(ErrorKind::ReadonlyPropertyModification {
                    class: object.class.name.clone(),
                    property: name.to_string(),
                }));
            }
        }
        if !object.has(name) {
            if let Some(setter) = object.class.resolve_method("__set") {
                let name_val = self.alloc_string(EmberString::from_str(name));
                self.invoke_user_function(&setter.function, Some(obj), vec![name_val, value])?;
                return Ok(());
            }
        }
        let shape_id = object.shape().id();
        crate::heap::retain(value);
        let old = match self.property_cache.lookup(shape_id, name) {
            Some(offset) => object.set_at(offset, value),
            None => {
                let old = object.set(name, value);
                if let Some(offset) = object.shape().offset(name) {
                    self.property_cache.insert(shape_id, name, offset);
                }
                old
            }
        };
        if let Some(old) = old {
            crate::heap::release(old);
        }
        Ok(())
    }

    fn read_array_index(&mut self, arr: Value, idx: Option<Value>) -> EvalResult {
        let addr = arr
            .as_addr_of(HeapTag::Array)
            .ok_or_else(|| runtime_err(ErrorKind::TypeError("subscript access on non-array".to_string())))?;
        let array = unsafe { crate::heap::deref::<EmberArray>(addr) };
        let idx = idx.ok_or_else(|| runtime_err(ErrorKind::TypeError("cannot read with []".to_string())))?;
        let key = self.to_array_key(idx);
        array.get(&key).map(|v| {
            crate::heap::retain(v);
            v
        }).ok_or_else(|| runtime_err(ErrorKind::TypeError("undefined array key".to_string())))
    }

    fn write_array_index(&mut self, arr: Value, idx: Option<Value>, value: Value) -> Result<(), Signal> {
        let addr = arr
            .as_addr_of(HeapTag::Array)
            .ok_or_else(|| runtime_err(ErrorKind::TypeError("subscript write on non-array".to_string())))?;
        let array = unsafe { crate::heap::deref_mut::<EmberArray>(addr) };
        crate::heap::retain(value);
        let old = match idx {
            Some(i) => {
                let key = self.to_array_key(i);
                array.set(key, value)
            }
            None => {
                array.push(value);
                None
            }
        };
        if let Some(old) = old {
            crate::heap::release(old);
        }
        Ok(())
    }

    fn eval_while(&mut self, program: &Program, cond: NodeIndex, body: NodeIndex) -> EvalResult {
        loop {
            if !truthy(self.eval(program, cond)?) {
                return Ok(Value::null());
            }
            match self.eval(program, body) {
                Ok(_) => {}
                Err(Signal::Break(0)) => return Ok(Value::null()),
                Err(Signal::Break(n)) => return Err(Signal::Break(n - 1)),
                Err(Signal::Continue(0)) => {}
                Err(Signal::Continue(n)) => return Err(Signal::Continue(n - 1)),
                Err(other) => return Err(other),
            }
        }
    }

    fn eval_do_while(&mut self, program: &Program, body: NodeIndex, cond: NodeIndex) -> EvalResult {
        loop {
            match self.eval(program, body) {
                Ok(_) => {}
                Err(Signal::Break(0)) => return Ok(Value::null()),
                Err(Signal::Break(n)) => return Err(Signal::Break(n - 1)),
                Err(Signal::Continue(0)) => {}
                Err(Signal::Continue(n)) => return Err(Signal::Continue(n - 1)),
                Err(other) => return Err(other),
            }
            if !truthy(self.eval(program, cond)?) {
                return Ok(Value::null());
            }
        }
    }

    fn eval_for(
        &mut self,
        program: &Program,
        init: Option<NodeIndex>,
        cond: Option<NodeIndex>,
        step: Option<NodeIndex>,
        body: NodeIndex,
    ) -> EvalResult {
        if let Some(i) = init {
            self.eval(program, i)?;
        }
        loop {
            if let Some(c) = cond {
                if !truthy(self.eval(program, c)?) {
                    return Ok(Value::null());
                }
            }
            match self.eval(program, body) {
                Ok(_) => {}
                Err(Signal::Break(0)) => return Ok(Value::null()),
                Err(Signal::Break(n)) => return Err(Signal::Break(n - 1)),
                Err(Signal::Continue(0)) => {}
                Err(Signal::Continue(n)) => return Err(Signal::Continue(n - 1)),
                Err(other) => return Err(other),
            }
            if let Some(s) = step {
                self.eval(program, s)?;
            }
        }
    }

    fn eval_foreach(
        &mut self,
        program: &Program,
        iterable: NodeIndex,
        key_binding: Option<&str>,
        value_binding: &str,
        by_ref: bool,
        body: NodeIndex,
    ) -> EvalResult {
        let _ = by_ref; // by-ref foreach requires cell aliasing; values are copied here.
        let arr_val = self.eval(program, iterable)?;
        let addr = arr_val
            .as_addr_of(HeapTag::Array)
            .ok_or_else(|| runtime_err(ErrorKind::TypeError("foreach requires an array".to_string())))?;
        let array = unsafe { crate::heap::deref::<EmberArray>(addr) };
        let entries: Vec<(ArrayKey, Value)> = array.iter().map(|(k, v)| (k.clone(), v)).collect();
        for (key, value) in entries {
            crate::heap::retain(value);
            self.current_env().set(value_binding, value);
            if let Some(kb) = key_binding {
                let key_val = match &key {
                    ArrayKey::Int(i) => Value::of_int(*i as i32),
                    ArrayKey::Str(s) => self.alloc_string(EmberString::from_str(s)),
                };
                self.current_env().set(kb, key_val);
            }
            match self.eval(program, body) {
                Ok(_) => {}
                Err(Signal::Break(0)) => return Ok(Value::null()),
                Err(Signal::Break(n)) => return Err(Signal::Break(n - 1)),
                Err(Signal::Continue(0)) => {}
                Err(Signal::Continue(n)) => return Err(Signal::Continue(n - 1)),
                Err(other) => return Err(other),
            }
        }
        Ok(Value::null())
    }

    fn eval_match(&mut self, program: &Program, subject: NodeIndex, arms: &[KeyBody], default: Option<NodeIndex>) -> EvalResult {
        let subj = self.eval(program, subject)?;
        for arm in arms {
            if let Some(key) = arm.key {
                let k = self.eval(program, key)?;
                if self.loose_equals(subj, k) {
                    return self.eval(program, arm.body);
                }
            }
        }
        match default {
            Some(d) => self.eval(program, d),
            None => Err(runtime_err(ErrorKind::TypeError("unhandled match case".to_string()))),
        }
    }

    fn eval_try(
        &mut self,
        program: &Program,
        body: NodeIndex,
        catches: &[CatchClause],
        finally: Option<NodeIndex>,
    ) -> EvalResult {
        let result = self.eval(program, body);
        let result = match result {
            Err(Signal::Exception(exc)) => {
                let mut handled = None;
                for catch in catches {
                    if self.exception_matches(&exc, catch) {
                        self.pending_trace.clear();
                        if let Some(binding) = &catch.binding {
                            let v = self.exception_as_value(&exc);
                            self.current_env().set(binding, v);
                        }
                        handled = Some(self.eval(program, catch.body));
                        break;
                    }
                }
                handled.unwrap_or(Err(Signal::Exception(exc)))
            }
            other => other,
        };
        if let Some(f) = finally {
            let finally_result = self.eval(program, f);
            if finally_result.is_err() {
                return finally_result;
            }
        }
        result
    }

    fn exception_matches(&self, exc: &ExceptionValue, catch: &CatchClause) -> bool {
        if catch.exception_types.is_empty() {
            return true;
        }
        match exc {
            ExceptionValue::Runtime(_) => catch.exception_types.iter().any(|t| t == "Throwable" || t == "Error"),
            ExceptionValue::Thrown(v) => {
                if let Some(addr) = v.as_addr_of(HeapTag::Object) {
                    let obj = unsafe { crate::heap::deref::<Object>(addr) };
                    catch
                        .exception_types
                        .iter()
                        .any(|t| t == "Throwable" || obj.class.name == *t || obj.class.implements(t))
                } else {
                    false
                }
            }
        }
    }

    fn exception_as_value(&mut self, exc: &ExceptionValue) -> Value {
        match exc {
            ExceptionValue::Thrown(v) => *v,
            ExceptionValue::Runtime(kind) => self.alloc_string(EmberString::from_str(&kind.message())),
        }
    }

    fn eval_clone_with(&mut self, program: &Program, source: NodeIndex, overrides: &[(String, NodeIndex)]) -> EvalResult {
        let src = self.eval(program, source)?;
        if let Some(addr) = src.as_addr_of(HeapTag::Struct) {
            let original = unsafe { crate::heap::deref::<crate::object::StructInstance>(addr) };
            let mut cloned = original.deep_clone();
            for (name, expr) in overrides {
                let v = self.eval(program, *expr)?;
                if let Some(idx) = cloned.field_index(name) {
                    crate::heap::retain(v);
                    let old = std::mem::replace(&mut cloned.fields[idx], v);
                    crate::heap::release(old);
                }
            }
            return Ok(self.alloc_struct(cloned));
        }
        if let Some(addr) = src.as_addr_of(HeapTag::Object) {
            let original = unsafe { crate::heap::deref::<Object>(addr) };
            let copy = Object::shallow_clone(original);
            let class = copy.class.clone();
            let copy_val = self.alloc_object(copy);
            if let Some(cloner) = class.resolve_method("__clone") {
                self.invoke_user_function(&cloner.function, Some(copy_val), Vec::new())?;
            }
            for (name, expr) in overrides {
                let v = self.eval(program, *expr)?;
                self.write_property(copy_val, name, v)?;
            }
            return Ok(copy_val);
        }
        Err(runtime_err(ErrorKind::TypeError("clone requires an object or struct value".to_string())))
    }

    fn eval_closure_decl(
        &mut self,
        _program: &Program,
        params: &[crate::ast::ParamNode],
        body: NodeIndex,
        captures: &[(String, bool)],
        is_arrow: bool,
    ) -> EvalResult {
        let func = Rc::new(crate::heap::function::UserFunction {
            name: String::new(),
            file: self.vm.program.file.clone(),
            params: params
                .iter()
                .map(|p| crate::heap::function::Param {
                    name: p.name.clone(),
                    default: p.default,
                    variadic: p.variadic,
                })
                .collect(),
            body,
        });
        let mut closure = Closure::new(func, is_arrow);
        for (name, by_ref) in captures {
            if *by_ref {
                if let Some(cell) = self.current_env().binding(name) {
                    closure.capture_by_ref(name.clone(), cell);
                }
            } else if let Some(v) = self.current_env().get(name) {
                crate::heap::retain(v);
                closure.capture_by_value(name.clone(), v);
            }
        }
        closure.bound_receiver = self.current_receiver();
        Ok(self.alloc_closure(closure))
    }

    fn call_value(&mut self, callee: Value, args: Vec<Value>) -> EvalResult {
        if let Some(addr) = callee.as_addr_of(HeapTag::Closure) {
            let closure = unsafe { crate::heap::deref::<Closure>(addr) }.clone();
            return self.invoke_closure(&closure, args);
        }
        if let Some(addr) = callee.as_addr_of(HeapTag::UserFunction) {
            let func = unsafe { crate::heap::deref::<crate::heap::function::UserFunction>(addr) }.clone();
            return self.invoke_user_function(&func, None, args);
        }
        if let Some(addr) = callee.as_addr_of(HeapTag::NativeFunction) {
            let native = unsafe { crate::heap::deref::<crate::heap::function::NativeFunction>(addr) }.clone();
            return (native.func)(self.vm, &args).map_err(Signal::Exception);
        }
        Err(runtime_err(ErrorKind::TypeError("value is not callable".to_string())))
    }

    fn call_value_with(&mut self, program: &Program, node: NodeIndex, args: Vec<Value>) -> EvalResult {
        let callee = self.eval(program, node)?;
        self.call_value(callee, args)
    }

    fn call_named(&mut self, name: &str, args: Vec<Value>) -> EvalResult {
        if let Some(func) = self.vm.function(name) {
            return self.invoke_user_function(&func, None, args);
        }
        if let Some(native) = self.vm.native(name) {
            return (native.func)(self.vm, &args).map_err(Signal::Exception);
        }
        Err(runtime_err(ErrorKind::UndefinedFunction(name.to_string())))
    }

    fn call_method(&mut self, recv: Value, method: &str, args: Vec<Value>) -> EvalResult {
        if let Some(addr) = recv.as_addr_of(HeapTag::Struct) {
            let s = unsafe { crate::heap::deref::<StructInstance>(addr) };
            let class_name = s.class.name.clone();
            return match s.class.resolve_method(method) {
                Some(m) => self.invoke_user_function(&m.function, Some(recv), args),
                None => Err(runtime_err(ErrorKind::UndefinedMethod { class: class_name, method: method.to_string() })),
            };
        }
        let addr = recv
            .as_addr_of(HeapTag::Object)
            .ok_or_else(|| runtime_err(ErrorKind::TypeError("method call on non-object".to_string())))?;
        let object = unsafe { crate::heap::deref::<Object>(addr) };
        let class_name = object.class.name.clone();
        match object.class.resolve_method(method) {
            Some(m) => self.invoke_user_function(&m.function, Some(recv), args),
            None => match object.class.resolve_method("__call") {
                Some(catch_all) => {
                    let name_val = self.alloc_string(EmberString::from_str(method));
                    let mut rest = EmberArray::new();
                    for a in args {
                        rest.push(a);
                    }
                    let args_val = self.alloc_array(rest);
                    self.invoke_user_function(&catch_all.function, Some(recv), vec![name_val, args_val])
                }
                None => Err(runtime_err(ErrorKind::UndefinedMethod { class: class_name, method: method.to_string() })),
            },
        }
    }

    fn call_static_method(&mut self, class: &str, method: &str, args: Vec<Value>) -> EvalResult {
        let c = self.vm.class(class).ok_or_else(|| runtime_err(ErrorKind::UndefinedClass(class.to_string())))?;
        match c.resolve_method(method) {
            Some(m) => self.invoke_user_function(&m.function, None, args),
            None => match c.resolve_method("__callStatic") {
                Some(catch_all) => {
                    let name_val = self.alloc_string(EmberString::from_str(method));
                    let mut rest = EmberArray::new();
                    for a in args {
                        rest.push(a);
                    }
                    let args_val = self.alloc_array(rest);
                    self.invoke_user_function(&catch_all.function, None, vec![name_val, args_val])
                }
                None => Err(runtime_err(ErrorKind::UndefinedMethod { class: class.to_string(), method: method.to_string() })),
            },
        }
    }

    fn instantiate(&mut self, class: &str, args: Vec<Value>) -> EvalResult {
        match class {
            "Mutex" => return Ok(self.instantiate_mutex()),
            "Channel" => return Ok(self.instantiate_channel(&args)),
            "RwLock" => return Ok(self.instantiate_rwlock()),
            "Atomic" => return Ok(self.instantiate_atomic(&args)),
            "SharedData" => return Ok(self.instantiate_shared_data(&args)),
            _ => {}
        }
        let c = self.vm.class(class).ok_or_else(|| runtime_err(ErrorKind::UndefinedClass(class.to_string())))?;
        if c.is_abstract {
            return Err(runtime_err(ErrorKind::AbstractInstantiation(class.to_string())));
        }
        let value = if c.is_value_type {
            self.alloc_struct(StructInstance::new(c.clone()))
        } else {
            self.alloc_object(Object::new(c.clone()))
        };
        if let Some(ctor) = c.resolve_method("__construct") {
            self.invoke_user_function(&ctor.function, Some(value), args)?;
        }
        Ok(value)
    }

    fn invoke_closure(&mut self, closure: &Closure, args: Vec<Value>) -> EvalResult {
        let mut frame = CallFrame::new(
            if closure.function.name.is_empty() { "{closure}".to_string() } else { closure.function.name.clone() },
            closure.function.file.clone(),
        );
        for (name, cap) in &closure.captures {
            match cap {
                crate::object::CapturedVar::ByValue(v) => frame.env.set(name, *v),
                crate::object::CapturedVar::ByRef(cell) => frame.env.bind_cell(name.clone(), cell.clone()),
            }
        }
        frame.receiver = closure.bound_receiver;
        self.run_function_body(&closure.function, frame, args)
    }

    fn invoke_user_function(
        &mut self,
        func: &crate::heap::function::UserFunction,
        receiver: Option<Value>,
        args: Vec<Value>,
    ) -> EvalResult {
        let mut frame = CallFrame::new(func.name.clone(), func.file.clone());
        frame.receiver = receiver;
        self.run_function_body(func, frame, args)
    }

    fn run_function_body(
        &mut self,
        func: &crate::heap::function::UserFunction,
        mut frame: CallFrame,
        args: Vec<Value>,
    ) -> EvalResult {
        if let Some(receiver) = frame.receiver {
            frame.env.set("this", receiver);
        }
        if args.len() < func.min_args() {
            return Err(runtime_err(ErrorKind::TypeError(format!(
                "{} expects at least {} argument(s), {} given",
                func.name,
                func.min_args(),
                args.len()
            ))));
        }
        if let Some(max) = func.max_args() {
            if args.len() > max {
                return Err(runtime_err(ErrorKind::TypeError(format!(
                    "{} expects at most {max} argument(s), {} given",
                    func.name,
                    args.len()
                ))));
            }
        }
        let mut arg_iter = args.into_iter();
        for (i, param) in func.params.iter().enumerate() {
            if param.variadic {
                let mut rest = EmberArray::new();
                for v in arg_iter.by_ref() {
                    crate::heap::retain(v);
                    rest.push(v);
                }
                frame.env.set(&param.name, self.alloc_array(rest));
                break;
            }
            match arg_iter.next() {
                Some(v) => frame.env.set(&param.name, v),
                None => {
                    if let Some(default_expr) = param.default {
                        let program = self.vm.program.clone();
                        let default_val = self.eval(&program, default_expr)?;
                        frame.env.set(&param.name, default_val);
                    } else {
                        return Err(runtime_err(ErrorKind::TypeError(format!(
                            "missing required argument #{} (${})",
                            i + 1,
                            param.name
                        ))));
                    }
                }
            }
        }

        self.stack.push(frame).map_err(|_| runtime_err(ErrorKind::TypeError("call stack overflow".to_string())))?;
        let program = self.vm.program.clone();
        let result = self.eval(&program, func.body);
        let mut frame = self.stack.pop().expect("frame pushed above");

        if let Err(Signal::Exception(_)) = &result {
            self.pending_trace.push(TraceFrame {
                function: frame.function_name.clone(),
                file: frame.file.clone(),
                line: frame.line,
            });
        }
        frame.env.release_all();

        match result {
            Ok(v) => Ok(v),
            Err(Signal::Return(v)) => Ok(v),
            Err(other) => Err(other),
        }
    }
}

fn truthy(v: Value) -> bool {
    if let Some(b) = v.is_truthy_scalar() {
        return b;
    }
    !v.is_null()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Literal, Node, Program};

    fn run_expr(node_builder: impl FnOnce(&mut Program) -> NodeIndex) -> Value {
        let mut program = Program::new("test.phpl");
        let entry = node_builder(&mut program);
        program.entry = Some(entry);
        let program = Rc::new(program);
        let mut vm = Vm::new(program.clone());
        let mut eval = Evaluator::new(&mut vm);
        eval.eval_top_level(&program, entry).unwrap()
    }

    #[test]
    fn arithmetic_add_two_ints() {
        let v = run_expr(|p| {
            let a = p.push(Node::Literal(Literal::Int(2)));
            let b = p.push(Node::Literal(Literal::Int(3)));
            p.push(Node::Binary { op: BinaryOp::Add, left: a, right: b })
        });
        assert_eq!(v.as_int(), Some(5));
    }

    #[test]
    fn division_by_zero_is_runtime_error() {
        let mut program = Program::new("test.phpl");
        let a = program.push(Node::Literal(Literal::Int(1)));
        let b = program.push(Node::Literal(Literal::Int(0)));
        let div = program.push(Node::Binary { op: BinaryOp::Div, left: a, right: b });
        program.entry = Some(div);
        let program = Rc::new(program);
        let mut vm = Vm::new(program.clone());
        let mut eval = Evaluator::new(&mut vm);
        let result = eval.eval_top_level(&program, div);
        assert!(result.is_err());
    }

    #[test]
    fn variable_assignment_then_read() {
        let v = run_expr(|p| {
            let lit = p.push(Node::Literal(Literal::Int(7)));
            let var = p.push(Node::Variable("x".to_string()));
            let assign = p.push(Node::Assign { target: var, value: lit });
            let read = p.push(Node::Variable("x".to_string()));
            p.push(Node::Block(vec![assign, read]))
        });
        assert_eq!(v.as_int(), Some(7));
    }

    #[test]
    fn while_loop_accumulates() {
        let v = run_expr(|p| {
            let zero = p.push(Node::Literal(Literal::Int(0)));
            let x_init = p.push(Node::Variable("x".to_string()));
            let init = p.push(Node::Assign { target: x_init, value: zero });

            let x_cond = p.push(Node::Variable("x".to_string()));
            let five = p.push(Node::Literal(Literal::Int(5)));
            let cond = p.push(Node::Binary { op: BinaryOp::Lt, left: x_cond, right: five });

            let x_read = p.push(Node::Variable("x".to_string()));
            let one = p.push(Node::Literal(Literal::Int(1)));
            let sum = p.push(Node::Binary { op: BinaryOp::Add, left: x_read, right: one });
            let x_write = p.push(Node::Variable("x".to_string()));
            let body = p.push(Node::Assign { target: x_write, value: sum });

            let loop_node = p.push(Node::While { cond, body });
            let x_final = p.push(Node::Variable("x".to_string()));
            p.push(Node::Block(vec![init, loop_node, x_final]))
        });
        assert_eq!(v.as_int(), Some(5));
    }

    fn method(func: Rc<crate::heap::function::UserFunction>) -> crate::object::Method {
        crate::object::Method {
            function: func,
            is_static: false,
            is_abstract: false,
            is_final: false,
            visibility: crate::object::class::Visibility::Public,
        }
    }

    #[test]
    fn undefined_property_dispatches_to_magic_get() {
        let mut program = Program::new("test.phpl");
        let lit = program.push(Node::Literal(Literal::Str("fallback".to_string())));
        let getter = Rc::new(crate::heap::function::UserFunction {
            name: "__get".to_string(),
            file: "test.phpl".to_string(),
            params: vec![crate::ast::ParamNode { name: "name".to_string(), default: None, variadic: false }],
            body: lit,
        });
        let class = Rc::new(
            crate::object::ClassBuilder::new("Magic")
                .method("__get", method(getter))
                .build()
                .unwrap(),
        );
        let new_node = program.push(Node::New { class: "Magic".to_string(), args: Vec::new() });
        let access = program.push(Node::PropertyAccess { object: new_node, property: "missing".to_string(), nullsafe: false });
        program.entry = Some(access);
        let program = Rc::new(program);
        let mut vm = Vm::new(program.clone());
        vm.register_class(class);
        let mut eval = Evaluator::new(&mut vm);
        let result = eval.eval_top_level(&program, access).unwrap();
        let addr = result.as_addr_of(HeapTag::String).unwrap();
        let s = unsafe { crate::heap::deref::<EmberString>(addr) };
        assert_eq!(s.to_string_lossy(), "fallback");
    }

    #[test]
    fn undefined_method_dispatches_to_magic_call() {
        let mut program = Program::new("test.phpl");
        let args_var = program.push(Node::Variable("args".to_string()));
        let len_call = program.push(Node::NamedFunctionCall { name: "count".to_string(), args: vec![args_var] });
        let catch_all = Rc::new(crate::heap::function::UserFunction {
            name: "__call".to_string(),
            file: "test.phpl".to_string(),
            params: vec![
                crate::ast::ParamNode { name: "name".to_string(), default: None, variadic: false },
                crate::ast::ParamNode { name: "args".to_string(), default: None, variadic: false },
            ],
            body: len_call,
        });
        let class = Rc::new(
            crate::object::ClassBuilder::new("Dynamic")
                .method("__call", method(catch_all))
                .build()
                .unwrap(),
        );
        let new_node = program.push(Node::New { class: "Dynamic".to_string(), args: Vec::new() });
        let one = program.push(Node::Literal(Literal::Int(1)));
        let two = program.push(Node::Literal(Literal::Int(2)));
        let call = program.push(Node::MethodCall {
            receiver: new_node,
            method: "whatever".to_string(),
            args: vec![one, two],
            nullsafe: false,
        });
        program.entry = Some(call);
        let program = Rc::new(program);
        let mut vm = Vm::new(program.clone());
        vm.register_class(class);
        vm.register_native(crate::heap::function::NativeFunction::new("count", 1, Some(1), |_vm, args| {
            let addr = args[0].as_addr_of(HeapTag::Array).unwrap();
            let arr = unsafe { crate::heap::deref::<EmberArray>(addr) };
            Ok(Value::of_int(arr.len() as i32))
        }));
        let mut eval = Evaluator::new(&mut vm);
        let result = eval.eval_top_level(&program, call).unwrap();
        assert_eq!(result.as_int(), Some(2));
    }

    #[test]
    fn static_property_write_is_visible_through_class() {
        let class = Rc::new(
            crate::object::ClassBuilder::new("Counter")
                .property(crate::object::class::PropertyDescriptor {
                    name: "total".to_string(),
                    default: Some(Value::of_int(0)),
                    readonly: false,
                    is_static: true,
                    visibility: crate::object::class::Visibility::Public,
                })
                .build()
                .unwrap(),
        );
        let mut program = Program::new("test.phpl");
        let five = program.push(Node::Literal(Literal::Int(5)));
        let target = program.push(Node::StaticPropertyAccess { class: "Counter".to_string(), property: "total".to_string() });
        let assign = program.push(Node::Assign { target, value: five });
        let read = program.push(Node::StaticPropertyAccess { class: "Counter".to_string(), property: "total".to_string() });
        let block = program.push(Node::Block(vec![assign, read]));
        program.entry = Some(block);
        let program = Rc::new(program);
        let mut vm = Vm::new(program.clone());
        vm.register_class(class);
        let mut eval = Evaluator::new(&mut vm);
        let result = eval.eval_top_level(&program, block).unwrap();
        assert_eq!(result.as_int(), Some(5));
    }

    #[test]
    fn clone_of_object_is_independent_and_runs_clone_hook() {
        let mut program = Program::new("test.phpl");
        let marker = program.push(Node::Literal(Literal::Int(99)));
        let this_var = program.push(Node::Variable("this".to_string()));
        let set_marker = program.push(Node::Assign {
            target: program.push(Node::PropertyAccess { object: this_var, property: "cloned".to_string(), nullsafe: false }),
            value: marker,
        });
        let cloner = Rc::new(crate::heap::function::UserFunction {
            name: "__clone".to_string(),
            file: "test.phpl".to_string(),
            params: Vec::new(),
            body: set_marker,
        });
        let class = Rc::new(
            crate::object::ClassBuilder::new("Widget")
                .property(crate::object::class::PropertyDescriptor {
                    name: "x".to_string(),
                    default: Some(Value::of_int(1)),
                    readonly: false,
                    is_static: false,
                    visibility: crate::object::class::Visibility::Public,
                })
                .method("__clone", method(cloner))
                .build()
                .unwrap(),
        );
        let new_node = program.push(Node::New { class: "Widget".to_string(), args: Vec::new() });
        let clone_node = program.push(Node::CloneWith { source: new_node, overrides: Vec::new() });
        program.entry = Some(clone_node);
        let program = Rc::new(program);
        let mut vm = Vm::new(program.clone());
        vm.register_class(class);
        let mut eval = Evaluator::new(&mut vm);
        let cloned = eval.eval_top_level(&program, clone_node).unwrap();
        let addr = cloned.as_addr_of(HeapTag::Object).unwrap();
        let obj = unsafe { crate::heap::deref::<Object>(addr) };
        assert_eq!(obj.get("x"), Some(Value::of_int(1)));
        assert_eq!(obj.get("cloned"), Some(Value::of_int(99)));
    }

    fn point_class() -> Rc<crate::object::Class> {
        Rc::new(
            crate::object::ClassBuilder::new("Point")
                .value_type(true)
                .property(crate::object::class::PropertyDescriptor {
                    name: "x".to_string(),
                    default: Some(Value::of_int(0)),
                    readonly: false,
                    is_static: false,
                    visibility: crate::object::class::Visibility::Public,
                })
                .property(crate::object::class::PropertyDescriptor {
                    name: "y".to_string(),
                    default: Some(Value::of_int(0)),
                    readonly: false,
                    is_static: false,
                    visibility: crate::object::class::Visibility::Public,
                })
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn struct_new_allocates_struct_not_object() {
        let class = point_class();
        let mut program = Program::new("test.phpl");
        let new_node = program.push(Node::New { class: "Point".to_string(), args: Vec::new() });
        program.entry = Some(new_node);
        let program = Rc::new(program);
        let mut vm = Vm::new(program.clone());
        vm.register_class(class);
        let mut eval = Evaluator::new(&mut vm);
        let value = eval.eval_top_level(&program, new_node).unwrap();
        assert!(value.as_addr_of(HeapTag::Struct).is_some());
        assert!(value.as_addr_of(HeapTag::Object).is_none());
    }

    #[test]
    fn struct_field_write_then_read_round_trips() {
        let class = point_class();
        let mut program = Program::new("test.phpl");
        let new_node = program.push(Node::New { class: "Point".to_string(), args: Vec::new() });
        let p = program.push(Node::Assign { target: program.push(Node::Variable("p".to_string())), value: new_node });
        let seven = program.push(Node::Literal(Literal::Int(7)));
        let p_var = program.push(Node::Variable("p".to_string()));
        let set_x = program.push(Node::Assign {
            target: program.push(Node::PropertyAccess { object: p_var, property: "x".to_string(), nullsafe: false }),
            value: seven,
        });
        let p_var2 = program.push(Node::Variable("p".to_string()));
        let read_x = program.push(Node::PropertyAccess { object: p_var2, property: "x".to_string(), nullsafe: false });
        let block = program.push(Node::Block(vec![p, set_x, read_x]));
        program.entry = Some(block);
        let program = Rc::new(program);
        let mut vm = Vm::new(program.clone());
        vm.register_class(class);
        let mut eval = Evaluator::new(&mut vm);
        let result = eval.eval_top_level(&program, block).unwrap();
        assert_eq!(result.as_int(), Some(7));
    }

    #[test]
    fn struct_method_call_dispatches_through_class() {
        let mut program = Program::new("test.phpl");
        let this_var = program.push(Node::Variable("this".to_string()));
        let read_x = program.push(Node::PropertyAccess { object: this_var, property: "x".to_string(), nullsafe: false });
        let double = program.push(Node::Binary { op: BinaryOp::Mul, left: read_x, right: program.push(Node::Literal(Literal::Int(2))) });
        let magnitude = Rc::new(crate::heap::function::UserFunction {
            name: "doubled".to_string(),
            file: "test.phpl".to_string(),
            params: Vec::new(),
            body: double,
        });
        let class = Rc::new(
            crate::object::ClassBuilder::new("Point")
                .value_type(true)
                .property(crate::object::class::PropertyDescriptor {
                    name: "x".to_string(),
                    default: Some(Value::of_int(4)),
                    readonly: false,
                    is_static: false,
                    visibility: crate::object::class::Visibility::Public,
                })
                .method("doubled", method(magnitude))
                .build()
                .unwrap(),
        );
        let new_node = program.push(Node::New { class: "Point".to_string(), args: Vec::new() });
        let call = program.push(Node::MethodCall { receiver: new_node, method: "doubled".to_string(), args: Vec::new(), nullsafe: false });
        program.entry = Some(call);
        let program = Rc::new(program);
        let mut vm = Vm::new(program.clone());
        vm.register_class(class);
        let mut eval = Evaluator::new(&mut vm);
        let result = eval.eval_top_level(&program, call).unwrap();
        assert_eq!(result.as_int(), Some(8));
    }

    #[test]
    fn new_mutex_allocates_a_resource_registered_with_the_vm() {
        let mut program = Program::new("test.phpl");
        let new_node = program.push(Node::New { class: "Mutex".to_string(), args: Vec::new() });
        program.entry = Some(new_node);
        let program = Rc::new(program);
        let mut vm = Vm::new(program.clone());
        let mutex_id = {
            let mut eval = Evaluator::new(&mut vm);
            let value = eval.eval_top_level(&program, new_node).unwrap();
            let addr = value.as_addr_of(HeapTag::Resource).expect("Mutex should allocate a resource value");
            let resource = unsafe { crate::heap::deref::<crate::heap::resource::Resource>(addr) };
            assert_eq!(resource.type_name(), "Mutex");
            *resource.downcast_ref::<crate::MutexId>().unwrap()
        };
        assert!(vm.mutexes.get(mutex_id).is_some());
    }

    #[test]
    fn new_channel_defaults_capacity_and_honors_explicit_argument() {
        let mut program = Program::new("test.phpl");
        let cap = program.push(Node::Literal(Literal::Int(3)));
        let new_node = program.push(Node::New { class: "Channel".to_string(), args: vec![cap] });
        program.entry = Some(new_node);
        let program = Rc::new(program);
        let mut vm = Vm::new(program.clone());
        let mut eval = Evaluator::new(&mut vm);
        let value = eval.eval_top_level(&program, new_node).unwrap();
        let addr = value.as_addr_of(HeapTag::Resource).expect("Channel should allocate a resource value");
        let resource = unsafe { crate::heap::deref::<crate::heap::resource::Resource>(addr) };
        assert_eq!(resource.type_name(), "Channel");
        let channel_id = *resource.downcast_ref::<crate::ChannelId>().unwrap();
        let channel = eval.vm.channels.get(channel_id).unwrap();
        assert_eq!(channel.capacity(), 3);
    }

    #[test]
    fn new_rwlock_allocates_a_resource_registered_with_the_vm() {
        let mut program = Program::new("test.phpl");
        let new_node = program.push(Node::New { class: "RwLock".to_string(), args: Vec::new() });
        program.entry = Some(new_node);
        let program = Rc::new(program);
        let mut vm = Vm::new(program.clone());
        let rwlock_id = {
            let mut eval = Evaluator::new(&mut vm);
            let value = eval.eval_top_level(&program, new_node).unwrap();
            let addr = value.as_addr_of(HeapTag::Resource).expect("RwLock should allocate a resource value");
            let resource = unsafe { crate::heap::deref::<crate::heap::resource::Resource>(addr) };
            assert_eq!(resource.type_name(), "RwLock");
            *resource.downcast_ref::<crate::RwLockId>().unwrap()
        };
        assert!(vm.rwlocks.get(rwlock_id).is_some());
    }

    #[test]
    fn new_atomic_defaults_to_zero_and_honors_explicit_initial() {
        let mut program = Program::new("test.phpl");
        let initial = program.push(Node::Literal(Literal::Int(9)));
        let new_node = program.push(Node::New { class: "Atomic".to_string(), args: vec![initial] });
        program.entry = Some(new_node);
        let program = Rc::new(program);
        let mut vm = Vm::new(program.clone());
        let mut eval = Evaluator::new(&mut vm);
        let value = eval.eval_top_level(&program, new_node).unwrap();
        let addr = value.as_addr_of(HeapTag::Resource).expect("Atomic should allocate a resource value");
        let resource = unsafe { crate::heap::deref::<crate::heap::resource::Resource>(addr) };
        assert_eq!(resource.type_name(), "Atomic");
        let atomic_id = *resource.downcast_ref::<crate::AtomicId>().unwrap();
        let cell = eval.vm.atomics.get(atomic_id).unwrap();
        assert_eq!(cell.load(), 9);
    }

    #[test]
    fn new_shared_data_seeds_from_the_constructor_argument() {
        let mut program = Program::new("test.phpl");
        let initial = program.push(Node::Literal(Literal::Int(5)));
        let new_node = program.push(Node::New { class: "SharedData".to_string(), args: vec![initial] });
        program.entry = Some(new_node);
        let program = Rc::new(program);
        let mut vm = Vm::new(program.clone());
        let mut eval = Evaluator::new(&mut vm);
        let value = eval.eval_top_level(&program, new_node).unwrap();
        let addr = value.as_addr_of(HeapTag::Resource).expect("SharedData should allocate a resource value");
        let resource = unsafe { crate::heap::deref::<crate::heap::resource::Resource>(addr) };
        assert_eq!(resource.type_name(), "SharedData");
        let shared_id = *resource.downcast_ref::<crate::SharedDataId>().unwrap();
        let cell = eval.vm.shared_data.get(shared_id).unwrap();
        assert_eq!(cell.get().as_int(), Some(5));
    }
}
