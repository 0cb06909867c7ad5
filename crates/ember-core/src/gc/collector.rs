//! Generational tracing collector (spec §4.2 "Generational GC").
//!
//! Reference counting alone leaks cycles; this collector exists only to
//! find and reclaim them (spec §9's cyclic-object-graph design note).
//! Everything acyclic is already gone by the time a collection runs — the
//! collector's sweep just confirms that for objects it *does* trace and
//! force-frees the handful that remain with a stale positive refcount.

use crate::heap::header::{BoxHeader, Generation, MarkColor};
use crate::heap;
use crate::value::Value;
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub struct GcStats {
    pub collections: u64,
    pub young_collections: u64,
    pub full_collections: u64,
    pub objects_freed: u64,
    pub promotions: u64,
    pub write_barrier_triggers: u64,
    pub total_time: Duration,
}

/// Owns the set of every value the collector is responsible for tracing —
/// there is no global allocator registry, so the collector only ever sees
/// what has been explicitly registered with it (`crate::memory::MemoryManager`
/// does this at every `alloc_*` call it mediates).
pub struct GenerationalCollector {
    young: Vec<Value>,
    old: Vec<Value>,
    remembered_set: Vec<Value>,
    promotion_age: u8,
    stats: GcStats,
}

fn addr_of(v: Value) -> Option<usize> {
    v.as_addr()
}

fn header_of(v: Value) -> Option<&'static BoxHeader> {
    heap::header_of_value(v)
}

impl GenerationalCollector {
    pub fn new() -> Self {
        Self { young: Vec::new(), old: Vec::new(), remembered_set: Vec::new(), promotion_age: 3, stats: GcStats::default() }
    }

    pub fn with_promotion_age(mut self, age: u8) -> Self {
        self.promotion_age = age;
        self
    }

    /// Register a freshly allocated value with the nursery. Only
    /// pointer-tagged values are tracked; scalars are silently ignored.
    pub fn register_young(&mut self, v: Value) {
        if v.heap_tag().is_some() {
            self.young.push(v);
        }
    }

    pub fn young_count(&self) -> usize {
        self.young.len()
    }

    pub fn old_count(&self) -> usize {
        self.old.len()
    }

    pub fn remembered_set_len(&self) -> usize {
        self.remembered_set.len()
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }

    /// Write barrier: call whenever a pointer into `stored` is installed
    /// into a slot owned by `holder`. If `holder` is already in the old
    /// generation and `stored` is young, remember `holder` so the next
    /// minor collection treats it as a root without rescanning all of
    /// `old`.
    pub fn write_barrier(&mut self, holder: Value, stored: Value) {
        let (Some(h), Some(s)) = (header_of(holder), header_of(stored)) else { return };
        if h.generation() == Generation::Old && s.generation() == Generation::Young && !h.in_remembered_set() {
            h.set_in_remembered_set(true);
            self.remembered_set.push(holder);
            self.stats.write_barrier_triggers += 1;
        }
    }

    /// Trace-mark from `roots` (plus the remembered set) over the young
    /// generation and free everything left white. Survivors below
    /// `promotion_age` stay young with their age bumped; survivors at or
    /// above it are promoted to the old generation.
    pub fn collect_young(&mut self, roots: impl IntoIterator<Item = Value>) {
        let start = std::time::Instant::now();
        let roots: Vec<Value> = roots.into_iter().chain(self.remembered_set.iter().copied()).collect();
        self.mark_from(roots);

        let white: HashSet<usize> = self
            .young
            .iter()
            .copied()
            .filter(|v| header_of(*v).map(|h| h.mark() == MarkColor::White).unwrap_or(false))
            .filter_map(addr_of)
            .collect();

        for v in self.young.iter().copied() {
            let Some(addr) = addr_of(v) else { continue };
            if !white.contains(&addr) {
                continue;
            }
            let tag = v.heap_tag().expect("young list only holds pointer values");
            let children = heap::trace_children(v);
            unsafe { heap::force_dealloc_box_only(tag, addr) };
            for child in children {
                if let Some(caddr) = addr_of(child) {
                    if !white.contains(&caddr) {
                        heap::release(child);
                    }
                } else {
                    heap::release(child);
                }
            }
            self.stats.objects_freed += 1;
        }

        let mut survivors = Vec::new();
        for v in self.young.drain(..) {
            let Some(addr) = addr_of(v) else { continue };
            if white.contains(&addr) {
                continue;
            }
            let header = header_of(v).expect("survivor has a header");
            header.bump_age();
            header.set_mark(MarkColor::White);
            if header.age() >= self.promotion_age {
                header.promote();
                self.stats.promotions += 1;
                self.old.push(v);
            } else {
                survivors.push(v);
            }
        }
        self.young = survivors;

        self.remembered_set.retain(|v| header_of(*v).map(|h| h.in_remembered_set()).unwrap_or(false));

        self.stats.collections += 1;
        self.stats.young_collections += 1;
        self.stats.total_time += start.elapsed();
    }

    /// A full collection additionally traces and sweeps the old
    /// generation, ignoring the remembered-set shortcut.
    pub fn collect_full(&mut self, roots: impl IntoIterator<Item = Value>) {
        let start = std::time::Instant::now();
        let roots: Vec<Value> = roots.into_iter().collect();

        // An intervening `collect_young` can have left an old-generation
        // object Gray/Black (the remembered set put it in that pass's mark
        // roots) without ever resetting it back — only young survivors get
        // that reset, since a minor collection never sweeps `old`. Clear
        // every old object's mark before tracing so a stale Black from a
        // prior minor collection can't masquerade as "already proven
        // reachable this pass" and dodge the white sweep below.
        for v in self.old.iter() {
            if let Some(h) = header_of(*v) {
                h.set_mark(MarkColor::White);
            }
        }

        // Trace from the true roots only. `mark_from`'s traversal already
        // walks into `old` through any live pointer chain from those roots,
        // so chaining `self.old.iter()` in here would mark every old object
        // reachable or not, and the sweep below would never find any of
        // them white.
        self.mark_from(roots.iter().copied());

        let white: HashSet<usize> = self
            .young
            .iter()
            .chain(self.old.iter())
            .copied()
            .filter(|v| header_of(*v).map(|h| h.mark() == MarkColor::White).unwrap_or(false))
            .filter_map(addr_of)
            .collect();

        for v in self.young.iter().copied().chain(self.old.iter().copied()) {
            let Some(addr) = addr_of(v) else { continue };
            if !white.contains(&addr) {
                continue;
            }
            let tag = v.heap_tag().expect("tracked list only holds pointer values");
            let children = heap::trace_children(v);
            unsafe { heap::force_dealloc_box_only(tag, addr) };
            for child in children {
                if addr_of(child).map(|a| !white.contains(&a)).unwrap_or(true) {
                    heap::release(child);
                }
            }
            self.stats.objects_freed += 1;
        }

        self.young.retain(|v| addr_of(*v).map(|a| !white.contains(&a)).unwrap_or(false));
        self.old.retain(|v| addr_of(*v).map(|a| !white.contains(&a)).unwrap_or(false));
        for v in self.young.iter().chain(self.old.iter()) {
            if let Some(h) = header_of(*v) {
                h.set_mark(MarkColor::White);
            }
        }

        // A full collection is the only place an old-generation holder can
        // actually die, so it's the only place remembered_set entries go
        // stale. Drop them here, before the boxes behind them are gone,
        // rather than leaving dangling addresses for the next young
        // collection's `mark()` to dereference.
        self.remembered_set.retain(|v| addr_of(*v).map(|a| !white.contains(&a)).unwrap_or(true));

        self.stats.collections += 1;
        self.stats.full_collections += 1;
        self.stats.total_time += start.elapsed();
    }

    /// Trace-mark from exactly the given roots. Callers decide what counts
    /// as a root: `collect_young` folds the remembered set in (its whole
    /// purpose is standing in for an old-generation rescan), `collect_full`
    /// does not, since it traces every true root directly and the
    /// remembered-set shortcut would otherwise keep stale old objects
    /// artificially reachable.
    fn mark_from(&mut self, roots: impl IntoIterator<Item = Value>) {
        let mut gray: Vec<Value> = roots.into_iter().collect();
        for v in &gray {
            if let Some(h) = header_of(*v) {
                h.set_mark(MarkColor::Gray);
            }
        }
        while let Some(v) = gray.pop() {
            if let Some(h) = header_of(v) {
                if h.mark() == MarkColor::Black {
                    continue;
                }
                h.set_mark(MarkColor::Black);
            }
            for child in heap::trace_children(v) {
                if let Some(h) = header_of(child) {
                    if h.mark() == MarkColor::White {
                        h.set_mark(MarkColor::Gray);
                        gray.push(child);
                    }
                }
            }
        }
    }
}

impl Default for GenerationalCollector {
    fn default() -> Self {
        Self::new()
    }
}
