//! Hidden shapes: a monotonic, prefix-sharing tree of property layouts
//! (spec §3 "Shape", §4.3, §8 "shape transitions").

use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Globally unique shape identity, used as half of the inline-cache key
/// (`crate::object::inline_cache::InlineCache`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeId(u64);

static NEXT_SHAPE_ID: AtomicU64 = AtomicU64::new(1);

impl ShapeId {
    fn next() -> Self {
        ShapeId(NEXT_SHAPE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// One node in a class's shape tree.
///
/// The root shape (no properties) is created once per class. Adding a
/// property transitions an instance to a child shape that appends one
/// slot; parent shapes are never mutated once a child exists, and a
/// repeated `transition(name)` from the same parent always returns the
/// same child (the tree is shared across every instance with the same
/// property-addition history, not per-instance).
pub struct Shape {
    id: ShapeId,
    parent: Option<Rc<Shape>>,
    added_property: Option<String>,
    slot_count: usize,
    children: RefCell<FxHashMap<String, Rc<Shape>>>,
}

impl Shape {
    /// A fresh, empty root shape (no properties, slot_count 0).
    pub fn root() -> Rc<Shape> {
        Rc::new(Shape {
            id: ShapeId::next(),
            parent: None,
            added_property: None,
            slot_count: 0,
            children: RefCell::new(FxHashMap::default()),
        })
    }

    /// This shape's identity.
    pub fn id(&self) -> ShapeId {
        self.id
    }

    /// Number of slots an instance with this shape occupies.
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Whether `name` is present anywhere in this shape's property chain.
    pub fn has(&self, name: &str) -> bool {
        self.offset(name).is_some()
    }

    /// The slot index for `name`, walking the parent chain. `O(depth)`;
    /// callers on a hot path should consult the inline cache first.
    pub fn offset(&self, name: &str) -> Option<usize> {
        let mut cur = self;
        loop {
            if cur.added_property.as_deref() == Some(name) {
                return Some(cur.slot_count - 1);
            }
            match &cur.parent {
                Some(p) => cur = p,
                None => return None,
            }
        }
    }

    /// Transition to the child shape that adds `name` as the next slot,
    /// reusing a previously-created child for the same name if one
    /// exists. Mints a new slot at `self.slot_count` otherwise. Does not
    /// mutate `self`.
    pub fn transition(self: &Rc<Self>, name: &str) -> Rc<Shape> {
        if let Some(existing) = self.children.borrow().get(name) {
            return existing.clone();
        }
        let child = Rc::new(Shape {
            id: ShapeId::next(),
            parent: Some(self.clone()),
            added_property: Some(name.to_string()),
            slot_count: self.slot_count + 1,
            children: RefCell::new(FxHashMap::default()),
        });
        self.children.borrow_mut().insert(name.to_string(), child.clone());
        child
    }
}
