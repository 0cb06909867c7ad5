//! Memory manager facade (spec §4.2): composes the arena allocator, the
//! string interner, and the generational collector with its policy engine
//! into the single object [`crate::vm::Vm`] drives allocation and
//! collection through. None of the four subsystems know about each other
//! directly — this module is the only thing that does.

use crate::gc::{GcDecision, GcPolicyEngine, GenerationalCollector, MemoryUsage};
use crate::heap::{self, arena::Arena, interner::StringInterner, string::{Encoding, EmberString}};
use crate::value::Value;

/// Object-count thresholds standing in for the byte-budgets
/// [`MemoryUsage`] is expressed in; the collector tracks live Values, not
/// raw bytes, so one "byte" here is one tracked object. See `DESIGN.md`.
#[derive(Debug, Clone, Copy)]
pub struct MemoryLimits {
    pub nursery_capacity: usize,
    pub old_capacity: usize,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self { nursery_capacity: 4096, old_capacity: 65536 }
    }
}

/// Composes the heap's four allocation/collection subsystems behind one
/// handle. Every `alloc_*` helper on `MemoryManager` registers the new
/// value with the collector, so callers never have to remember to do it
/// themselves (spec §8 "every heap value is reachable from exactly one
/// registration path").
pub struct MemoryManager {
    arena: Arena,
    interner: StringInterner,
    collector: GenerationalCollector,
    policy: GcPolicyEngine,
    limits: MemoryLimits,
}

impl MemoryManager {
    pub fn new() -> Self {
        Self::with_limits(MemoryLimits::default())
    }

    pub fn with_limits(limits: MemoryLimits) -> Self {
        Self {
            arena: Arena::new(),
            interner: StringInterner::new(),
            collector: GenerationalCollector::new(),
            policy: GcPolicyEngine::new(),
            limits,
        }
    }

    pub fn arena(&mut self) -> &mut Arena {
        &mut self.arena
    }

    pub fn interner(&mut self) -> &mut StringInterner {
        &mut self.interner
    }

    pub fn collector(&mut self) -> &mut GenerationalCollector {
        &mut self.collector
    }

    pub fn policy(&mut self) -> &mut GcPolicyEngine {
        &mut self.policy
    }

    /// Allocate a heap string and register it with the collector.
    pub fn alloc_string(&mut self, bytes: &[u8]) -> Value {
        let v = heap::alloc_string(EmberString::new(bytes.to_vec(), Encoding::Utf8));
        self.collector.register_young(v);
        v
    }

    /// Intern `bytes`, sharing storage with any prior interning of the
    /// same content. The returned value is still registered with the
    /// collector exactly once per distinct content (subsequent hits reuse
    /// the already-registered value).
    pub fn intern_string(&mut self, bytes: &[u8]) -> Value {
        let first_time = self.interner.len();
        let v = self.interner.intern(bytes);
        if self.interner.len() != first_time {
            self.collector.register_young(v);
        }
        v
    }

    /// Register any other already-allocated heap value (arrays, objects,
    /// closures, ...) with the collector. Callers that allocate through
    /// `crate::heap::alloc_*` directly are expected to call this once per
    /// allocation.
    pub fn register(&mut self, v: Value) {
        self.collector.register_young(v);
    }

    fn usage(&self) -> MemoryUsage {
        let nursery_bytes = self.collector.young_count();
        let old_bytes = self.collector.old_count();
        MemoryUsage {
            nursery_bytes,
            nursery_capacity: self.limits.nursery_capacity,
            old_bytes,
            old_capacity: self.limits.old_capacity,
            total_bytes: nursery_bytes + old_bytes,
            total_capacity: self.limits.nursery_capacity + self.limits.old_capacity,
            fragmentation: 0.0,
        }
    }

    /// Consult the policy engine with the current heap occupancy and,
    /// if it calls for a collection, run it against `roots`. Returns the
    /// decision that was acted on, if any.
    pub fn maybe_collect(&mut self, roots: impl IntoIterator<Item = Value> + Clone) -> Option<GcDecision> {
        let usage = self.usage();
        let decision = self.policy.decide(&usage)?;
        let start = std::time::Instant::now();
        match decision.kind {
            crate::gc::GcKind::Minor => self.collector.collect_young(roots),
            crate::gc::GcKind::Major | crate::gc::GcKind::Full | crate::gc::GcKind::Incremental | crate::gc::GcKind::Concurrent => {
                self.collector.collect_full(roots)
            }
        }
        let elapsed = start.elapsed();
        self.policy.record_collection_time(elapsed, elapsed);
        Some(decision)
    }

    /// Force a collection regardless of policy, e.g. in response to an
    /// allocation failure at `site`.
    pub fn collect_for_failure(
        &mut self,
        site: crate::gc::AllocationSite,
        roots: impl IntoIterator<Item = Value>,
    ) -> GcDecision {
        let decision = self.policy.on_allocation_failure(site);
        match decision.kind {
            crate::gc::GcKind::Minor => self.collector.collect_young(roots),
            _ => self.collector.collect_full(roots),
        }
        decision
    }

    pub fn gc_stats(&self) -> crate::gc::GcStats {
        self.collector.stats()
    }
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_string_registers_with_the_collector() {
        let mut mem = MemoryManager::new();
        let v = mem.alloc_string(b"hi");
        assert_eq!(mem.collector().young_count(), 1);
        heap::release(v);
    }

    #[test]
    fn repeated_interning_registers_only_once() {
        let mut mem = MemoryManager::new();
        let a = mem.intern_string(b"dup");
        let b = mem.intern_string(b"dup");
        assert_eq!(a.raw_bits(), b.raw_bits());
        assert_eq!(mem.collector().young_count(), 1);
        heap::release(a);
        heap::release(b);
        mem.interner().release(b"dup");
        mem.interner().release(b"dup");
    }

    #[test]
    fn maybe_collect_is_a_no_op_under_pressure_free_heap() {
        let mut mem = MemoryManager::with_limits(MemoryLimits { nursery_capacity: 100, old_capacity: 100 });
        let v = mem.alloc_string(b"small");
        assert!(mem.maybe_collect(std::iter::once(v)).is_none());
        heap::release(v);
    }

    #[test]
    fn maybe_collect_runs_a_minor_pass_once_nursery_fills_up() {
        let mut mem = MemoryManager::with_limits(MemoryLimits { nursery_capacity: 2, old_capacity: 100 });
        let a = mem.alloc_string(b"a");
        let b = mem.alloc_string(b"b");
        let decision = mem.maybe_collect(vec![a, b]);
        assert!(decision.is_some());
        assert_eq!(decision.unwrap().kind, crate::gc::GcKind::Minor);
        heap::release(a);
        heap::release(b);
    }
}
