//! Object and struct instances: slot vectors addressed through a shape
//! (spec §3 "Object", "Struct", §8 "shape transitions").

use super::class::Class;
use super::shape::Shape;
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// A heap object instance: a class pointer plus a shape-addressed slot
/// vector. Dynamic property addition transitions `shape` to a child and
/// appends a slot; declared properties are present from construction, so
/// in practice only dynamically-added properties trigger a transition.
pub struct Object {
    pub class: Rc<Class>,
    shape: RefCell<Rc<Shape>>,
    slots: RefCell<Vec<Value>>,
}

impl Object {
    /// Construct a fresh instance with `class`'s root shape and declared
    /// defaults (or `Value::null()` where no default is given) already in
    /// their slots.
    pub fn new(class: Rc<Class>) -> Self {
        let shape = class.root_shape();
        let props = class.all_instance_properties();
        let slots = props
            .iter()
            .map(|p| p.default.unwrap_or_else(Value::null))
            .collect();
        Self {
            class,
            shape: RefCell::new(shape),
            slots: RefCell::new(slots),
        }
    }

    pub fn shape(&self) -> Rc<Shape> {
        self.shape.borrow().clone()
    }

    /// Read a property by name. Retains the returned value; the caller
    /// owns that retain.
    pub fn get(&self, name: &str) -> Option<Value> {
        let offset = self.shape.borrow().offset(name)?;
        let v = self.slots.borrow()[offset];
        crate::heap::retain(v);
        Some(v)
    }

    /// Write a property, transitioning the shape if `name` is new.
    /// Returns the previous value (if overwriting), which the caller must
    /// release.
    pub fn set(&self, name: &str, value: Value) -> Option<Value> {
        let offset = self.shape.borrow().offset(name);
        match offset {
            Some(idx) => {
                let mut slots = self.slots.borrow_mut();
                Some(std::mem::replace(&mut slots[idx], value))
            }
            None => {
                let new_shape = self.shape.borrow().transition(name);
                *self.shape.borrow_mut() = new_shape;
                self.slots.borrow_mut().push(value);
                None
            }
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.shape.borrow().has(name)
    }

    /// All currently live slot values, for GC tracing and destructor runs.
    pub fn slot_values(&self) -> Vec<Value> {
        self.slots.borrow().clone()
    }

    /// Read a slot directly by offset, bypassing the shape walk — the
    /// inline-cache hit path (spec §4.3 "Inline cache"). Retains the
    /// returned value, same contract as `get`.
    pub fn get_at(&self, offset: usize) -> Option<Value> {
        let slots = self.slots.borrow();
        let v = *slots.get(offset)?;
        crate::heap::retain(v);
        Some(v)
    }

    /// Write a slot directly by offset, bypassing the shape walk. Returns
    /// the previous value for the caller to release. Only valid for an
    /// offset the cache already confirmed belongs to this object's shape.
    pub fn set_at(&self, offset: usize, value: Value) -> Option<Value> {
        let mut slots = self.slots.borrow_mut();
        let slot = slots.get_mut(offset)?;
        Some(std::mem::replace(slot, value))
    }

    /// `clone` semantics (spec §4.3 "Clone semantics"): a shallow copy of
    /// the slot vector sharing `other`'s current shape, retaining each
    /// slot value. Callers run `__clone` on the result themselves — this
    /// just performs the structural copy.
    pub fn shallow_clone(other: &Object) -> Object {
        let slots = other.slots.borrow().clone();
        for v in &slots {
            crate::heap::retain(*v);
        }
        Object {
            class: other.class.clone(),
            shape: RefCell::new(other.shape.borrow().clone()),
            slots: RefCell::new(slots),
        }
    }
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object").field("class", &self.class.name).finish()
    }
}

/// A struct instance: a value type with copy-on-assign semantics (spec §3
/// "Struct"). Unlike `Object`, struct fields are positional (declared
/// order, no dynamic properties) and cloning a struct deep-copies its
/// field vector, retaining any pointer-valued fields.
pub struct StructInstance {
    pub class: Rc<Class>,
    pub fields: Vec<Value>,
}

impl StructInstance {
    pub fn new(class: Rc<Class>) -> Self {
        let fields = class
            .all_instance_properties()
            .iter()
            .map(|p| p.default.unwrap_or_else(Value::null))
            .collect();
        Self { class, fields }
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.class
            .all_instance_properties()
            .iter()
            .position(|p| p.name == name)
    }

    /// Deep-copy semantics for `clone with { ... }` and pass-by-value
    /// struct assignment: every field value is retained so the copy owns
    /// an independent reference.
    pub fn deep_clone(&self) -> Self {
        for v in &self.fields {
            crate::heap::retain(*v);
        }
        Self {
            class: self.class.clone(),
            fields: self.fields.clone(),
        }
    }
}

impl std::fmt::Debug for StructInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructInstance").field("class", &self.class.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::class::ClassBuilder;

    fn empty_class(name: &str) -> Rc<Class> {
        Rc::new(ClassBuilder::new(name).build().unwrap())
    }

    #[test]
    fn dynamic_property_transitions_shape() {
        let obj = Object::new(empty_class("Dyn"));
        assert!(!obj.has("extra"));
        obj.set("extra", Value::of_int(5));
        assert!(obj.has("extra"));
        assert_eq!(obj.get("extra"), Some(Value::of_int(5)));
    }

    #[test]
    fn overwrite_keeps_shape_and_returns_old_value() {
        let obj = Object::new(empty_class("X"));
        obj.set("a", Value::of_int(1));
        let old = obj.set("a", Value::of_int(2));
        assert_eq!(old, Some(Value::of_int(1)));
        assert_eq!(obj.get("a"), Some(Value::of_int(2)));
    }

    #[test]
    fn struct_deep_clone_copies_fields() {
        let class = empty_class("Point");
        let mut s = StructInstance::new(class);
        s.fields.push(Value::of_int(1));
        let clone = s.deep_clone();
        assert_eq!(clone.fields, s.fields);
    }
}
