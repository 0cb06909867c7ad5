//! Per-request state and its pool (spec §4.7 steps 1-2, 6; §4.2 arena/pool
//! primitives).
//!
//! A `RequestContext` bundles the parsed request, the route's bound
//! `:param`s, and a per-request [`Arena`] a handler can use for scratch
//! allocation that dies with the request. Contexts themselves are recycled
//! through an [`ObjectPool`], bounded at 100 live contexts per spec §4.7.

use ember_core::heap::arena::Arena;
use ember_core::heap::pool::{ObjectPool, PoolIndex};
use rustc_hash::FxHashMap;

use crate::request::HttpRequest;

/// Upper bound on simultaneously-pooled request contexts (spec §4.7 step 6:
/// "return the context to the pool (bounded at 100)").
pub const MAX_POOLED_CONTEXTS: usize = 100;

/// Everything a route handler needs to read the request and write scratch
/// data during one request's lifetime.
pub struct RequestContext {
    /// The parsed request.
    pub request: HttpRequest,
    /// `:param` bindings from the matched route.
    pub params: FxHashMap<String, String>,
    /// Request-scoped bump allocator. Invalidated the moment the context is
    /// released back to its pool (spec §5 "Arena lifetime").
    pub arena: Arena,
}

impl RequestContext {
    fn empty() -> Self {
        Self { request: HttpRequest::default(), params: FxHashMap::default(), arena: Arena::new() }
    }

    /// A context not backed by any pool, for unit tests and one-off use.
    pub fn new_standalone() -> Self {
        Self::empty()
    }

    /// Look up a bound route parameter by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Reset to a clean slate for reuse: clears the request, params and
    /// rewinds (not frees) the arena.
    fn recycle(&mut self) {
        self.request.clear();
        self.params.clear();
        self.arena.reset();
    }
}

/// Bounded pool of [`RequestContext`]s, recycled once per request.
///
/// Backed by `ember_core::heap::pool::ObjectPool`, the same slab/free-list
/// allocator the memory manager uses for other hot, fixed-size, short-lived
/// allocations. A handle from [`ContextPool::acquire`] is valid until the
/// matching [`ContextPool::release`]; acquiring past [`MAX_POOLED_CONTEXTS`]
/// live handles allocates a fresh, unpooled context instead of growing the
/// pool further.
pub struct ContextPool {
    pool: ObjectPool<RequestContext>,
    live_count: usize,
}

/// A handle identifying a context acquired from a [`ContextPool`]: either a
/// real pool slot, or an overflow context that bypassed the pool because
/// [`MAX_POOLED_CONTEXTS`] was already reached.
pub enum PooledContext {
    /// Backed by a pool slot.
    Pooled(PoolIndex),
    /// Allocated outside the pool; released by simply being dropped.
    Overflow(Box<RequestContext>),
}

impl ContextPool {
    /// A pool with no contexts acquired yet.
    pub fn new() -> Self {
        Self { pool: ObjectPool::new(), live_count: 0 }
    }

    /// Acquire a context, recycled from the pool when possible.
    pub fn acquire(&mut self) -> PooledContext {
        if self.live_count >= MAX_POOLED_CONTEXTS {
            return PooledContext::Overflow(Box::new(RequestContext::empty()));
        }
        self.live_count += 1;
        PooledContext::Pooled(self.pool.acquire(RequestContext::empty()))
    }

    /// Borrow the context behind a handle.
    pub fn get_mut<'a>(&'a mut self, handle: &'a mut PooledContext) -> &'a mut RequestContext {
        match handle {
            PooledContext::Pooled(idx) => self.pool.get_mut(*idx),
            PooledContext::Overflow(context) => context,
        }
    }

    /// Return a context to the pool, recycling its arena and request
    /// buffers for the next acquire.
    pub fn release(&mut self, handle: PooledContext) {
        match handle {
            PooledContext::Pooled(idx) => {
                self.pool.get_mut(idx).recycle();
                self.pool.release(idx);
                self.live_count -= 1;
            }
            PooledContext::Overflow(_) => {}
        }
    }

    /// Number of contexts currently acquired and not yet released.
    pub fn live_count(&self) -> usize {
        self.live_count
    }
}

impl Default for ContextPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_release_recycles_the_slot() {
        let mut pool = ContextPool::new();
        let ctx = pool.acquire();
        assert_eq!(pool.live_count(), 1);
        pool.release(ctx);
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn context_is_clean_on_reacquire() {
        let mut pool = ContextPool::new();
        let mut ctx = pool.acquire();
        pool.get_mut(&mut ctx).request.method = "GET".to_string();
        pool.get_mut(&mut ctx).arena.alloc_value(1u64);
        pool.release(ctx);

        let mut ctx2 = pool.acquire();
        assert!(pool.get_mut(&mut ctx2).request.method.is_empty());
        assert_eq!(pool.get_mut(&mut ctx2).arena.bytes_allocated(), 0);
    }

    #[test]
    fn acquiring_past_the_bound_does_not_grow_the_pool() {
        let mut pool = ContextPool::new();
        let mut held = Vec::new();
        for _ in 0..MAX_POOLED_CONTEXTS {
            held.push(pool.acquire());
        }
        assert_eq!(pool.live_count(), MAX_POOLED_CONTEXTS);
        let overflow = pool.acquire();
        assert_eq!(pool.live_count(), MAX_POOLED_CONTEXTS);
        pool.release(overflow);
        for ctx in held {
            pool.release(ctx);
        }
        assert_eq!(pool.live_count(), 0);
    }
}
