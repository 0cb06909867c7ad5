//! Per-callsite inline cache keyed on `(ShapeId, property name)` (spec §3
//! "Inline cache", §8 "shape transitions").

use super::shape::ShapeId;
use rustc_hash::FxHashMap;

/// Caches the last-seen slot offset for a property-access callsite. A
/// cache hit skips the `Shape::offset` parent-chain walk entirely; a miss
/// re-resolves the offset and updates the cache.
#[derive(Default)]
pub struct InlineCache {
    entries: FxHashMap<(ShapeId, String), usize>,
}

impl InlineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, shape: ShapeId, name: &str) -> Option<usize> {
        self.entries.get(&(shape, name.to_string())).copied()
    }

    pub fn insert(&mut self, shape: ShapeId, name: &str, offset: usize) {
        self.entries.insert((shape, name.to_string()), offset);
    }

    /// Drop every entry for `shape` (invoked when a shape's meaning would
    /// otherwise be stale, e.g. class redefinition during a dev reload).
    pub fn invalidate_shape(&mut self, shape: ShapeId) {
        self.entries.retain(|(s, _), _| *s != shape);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::shape::Shape;

    #[test]
    fn hit_after_insert_miss_before() {
        let root = Shape::root();
        let s1 = root.transition("x");
        let mut cache = InlineCache::new();
        assert_eq!(cache.lookup(s1.id(), "x"), None);
        cache.insert(s1.id(), "x", 0);
        assert_eq!(cache.lookup(s1.id(), "x"), Some(0));
    }

    #[test]
    fn invalidate_shape_clears_only_that_shape() {
        let root = Shape::root();
        let s1 = root.transition("x");
        let s2 = root.transition("y");
        let mut cache = InlineCache::new();
        cache.insert(s1.id(), "x", 0);
        cache.insert(s2.id(), "y", 0);
        cache.invalidate_shape(s1.id());
        assert_eq!(cache.lookup(s1.id(), "x"), None);
        assert_eq!(cache.lookup(s2.id(), "y"), Some(0));
    }
}
