//! Classes, interfaces and traits (spec §3 "Class model", §4.3).

use crate::heap::function::UserFunction;
use crate::value::Value;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;

/// Visibility modifier on a method or property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Protected,
    Private,
}

/// A declared instance (or static) property.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    pub name: String,
    pub default: Option<Value>,
    pub readonly: bool,
    pub is_static: bool,
    pub visibility: Visibility,
}

/// A method bound to a class.
#[derive(Debug, Clone)]
pub struct Method {
    pub function: Rc<UserFunction>,
    pub is_static: bool,
    pub is_abstract: bool,
    pub is_final: bool,
    pub visibility: Visibility,
}

/// An interface: a set of method signatures with no bodies, implementors
/// must provide a concrete method for every name listed here (transitively,
/// through `extends`).
pub struct Interface {
    pub name: String,
    pub extends: Vec<Rc<Interface>>,
    pub method_names: Vec<String>,
    pub constants: FxHashMap<String, Value>,
}

impl Interface {
    /// All method names this interface requires, including inherited ones.
    pub fn required_methods(&self) -> Vec<String> {
        let mut out = self.method_names.clone();
        for parent in &self.extends {
            out.extend(parent.required_methods());
        }
        out.sort();
        out.dedup();
        out
    }
}

/// A trait: methods and properties copied verbatim into every class that
/// uses it (spec §3: "traits are copied into the class's method and
/// property tables at definition time", not inherited).
pub struct Trait {
    pub name: String,
    pub methods: FxHashMap<String, Rc<Method>>,
    pub properties: Vec<PropertyDescriptor>,
}

/// Error raised while assembling a class from its declaration.
#[derive(Debug, thiserror::Error)]
pub enum ClassDefError {
    #[error("class `{0}` must implement abstract method `{1}` inherited from `{2}`")]
    MissingAbstractOverride(String, String, String),
    #[error("class `{0}` does not implement method `{1}` required by interface `{2}`")]
    MissingInterfaceMethod(String, String, String),
    #[error("cannot override final method `{1}` in class `{0}`")]
    OverridesFinalMethod(String, String),
}

/// A class: properties, methods and constants, with single inheritance,
/// interface implementation, and trait composition.
pub struct Class {
    pub name: String,
    pub parent: Option<Rc<Class>>,
    pub interfaces: Vec<Rc<Interface>>,
    pub is_abstract: bool,
    pub is_final: bool,
    /// Whether this class describes a value-type (spec §3 "Struct":
    /// fields and methods, but positional fields and copy-on-assign
    /// instead of a hidden shape and reference identity). `instantiate`
    /// allocates a [`super::instance::StructInstance`] rather than an
    /// [`super::instance::Object`] for these.
    pub is_value_type: bool,
    /// Declared instance properties, in declaration order. This order
    /// determines the shape built by `root_shape()` the first time an
    /// instance of this exact class (no parent-specific overrides) is
    /// created, and the positional field order `StructInstance` indexes
    /// into when `is_value_type` is set.
    pub properties: Vec<PropertyDescriptor>,
    pub methods: FxHashMap<String, Rc<Method>>,
    pub constants: FxHashMap<String, Value>,
    /// Static property storage, keyed by name, shared by every instance
    /// (and reachable with no instance at all) of exactly this class —
    /// unlike instance properties a subclass does not inherit a slot in
    /// its parent's table, it resolves through `resolve_static` instead.
    statics: RefCell<FxHashMap<String, Value>>,
    root_shape: RefCell<Option<Rc<super::shape::Shape>>>,
}

impl Class {
    /// Read a static property, walking the parent chain (spec §4.4
    /// "static-property access").
    pub fn get_static(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.statics.borrow().get(name).copied() {
            return Some(v);
        }
        self.parent.as_ref().and_then(|p| p.get_static(name))
    }

    /// Write a static property declared on `self` or an ancestor,
    /// returning the previous value for the caller to release. Writes
    /// always land on the class that originally declared the slot, so
    /// `Child::$shared = 1` and `Parent::$shared` observe the same cell.
    pub fn set_static(&self, name: &str, value: Value) -> Option<Value> {
        if self.statics.borrow().contains_key(name) {
            return self.statics.borrow_mut().insert(name.to_string(), value);
        }
        if let Some(parent) = &self.parent {
            if parent.has_static(name) {
                return parent.set_static(name, value);
            }
        }
        self.statics.borrow_mut().insert(name.to_string(), value)
    }

    fn has_static(&self, name: &str) -> bool {
        self.statics.borrow().contains_key(name) || self.parent.as_ref().is_some_and(|p| p.has_static(name))
    }

    /// Resolve a method by name, walking own methods (already merged with
    /// trait methods at build time) then the parent chain.
    pub fn resolve_method(&self, name: &str) -> Option<Rc<Method>> {
        if let Some(m) = self.methods.get(name) {
            return Some(m.clone());
        }
        self.parent.as_ref().and_then(|p| p.resolve_method(name))
    }

    /// Resolve a class constant, walking own constants then the parent
    /// chain (spec §4.3 "class constant access").
    pub fn resolve_constant(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.constants.get(name) {
            return Some(*v);
        }
        self.parent.as_ref().and_then(|p| p.resolve_constant(name))
    }

    /// Whether `self` is, or descends from, `other`.
    pub fn is_subclass_of(&self, other: &Class) -> bool {
        if std::ptr::eq(self, other) || self.name == other.name {
            return true;
        }
        match &self.parent {
            Some(p) => p.is_subclass_of(other),
            None => false,
        }
    }

    /// Whether this class (or an ancestor) implements `iface`, by name.
    pub fn implements(&self, iface_name: &str) -> bool {
        if self.interfaces.iter().any(|i| i.name == iface_name) {
            return true;
        }
        match &self.parent {
            Some(p) => p.implements(iface_name),
            None => false,
        }
    }

    /// All instance property declarations visible on this class, parent
    /// properties first so child-declared slots come last — this fixes
    /// the shape's slot order across the inheritance chain.
    pub fn all_instance_properties(&self) -> Vec<PropertyDescriptor> {
        let mut out = match &self.parent {
            Some(p) => p.all_instance_properties(),
            None => Vec::new(),
        };
        out.extend(self.properties.iter().filter(|p| !p.is_static).cloned());
        out
    }

    /// The shared root shape for freshly-constructed instances of this
    /// class, built lazily from `all_instance_properties()` and cached.
    pub fn root_shape(self: &Rc<Self>) -> Rc<super::shape::Shape> {
        if let Some(s) = self.root_shape.borrow().as_ref() {
            return s.clone();
        }
        let mut shape = super::shape::Shape::root();
        for prop in self.all_instance_properties() {
            shape = shape.transition(&prop.name);
        }
        *self.root_shape.borrow_mut() = Some(shape.clone());
        shape
    }
}

/// Assembles a [`Class`] from its declared pieces, copying trait members
/// in and checking abstract/interface/final obligations (spec §4.3).
pub struct ClassBuilder {
    name: String,
    parent: Option<Rc<Class>>,
    interfaces: Vec<Rc<Interface>>,
    traits: Vec<Rc<Trait>>,
    is_abstract: bool,
    is_final: bool,
    is_value_type: bool,
    properties: Vec<PropertyDescriptor>,
    methods: FxHashMap<String, Rc<Method>>,
    constants: FxHashMap<String, Value>,
}

impl ClassBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            interfaces: Vec::new(),
            traits: Vec::new(),
            is_abstract: false,
            is_final: false,
            is_value_type: false,
            properties: Vec::new(),
            methods: FxHashMap::default(),
            constants: FxHashMap::default(),
        }
    }

    /// Mark this class as a struct declaration (spec §3 "Struct"):
    /// positional fields, copy-on-assign, no dynamic properties.
    pub fn value_type(mut self, v: bool) -> Self {
        self.is_value_type = v;
        self
    }

    pub fn parent(mut self, parent: Rc<Class>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn interface(mut self, iface: Rc<Interface>) -> Self {
        self.interfaces.push(iface);
        self
    }

    pub fn uses_trait(mut self, t: Rc<Trait>) -> Self {
        self.traits.push(t);
        self
    }

    pub fn abstract_class(mut self, v: bool) -> Self {
        self.is_abstract = v;
        self
    }

    pub fn final_class(mut self, v: bool) -> Self {
        self.is_final = v;
        self
    }

    pub fn property(mut self, prop: PropertyDescriptor) -> Self {
        self.properties.push(prop);
        self
    }

    pub fn method(mut self, name: impl Into<String>, method: Method) -> Self {
        self.methods.insert(name.into(), Rc::new(method));
        self
    }

    pub fn constant(mut self, name: impl Into<String>, value: Value) -> Self {
        self.constants.insert(name.into(), value);
        self
    }

    /// Finalize the class: copy in trait members (own methods shadow
    /// same-named trait methods), then verify every abstract method
    /// inherited from a parent, and every method required by an
    /// implemented interface, has a concrete override — unless this class
    /// is itself abstract.
    pub fn build(mut self) -> Result<Class, ClassDefError> {
        for t in &self.traits {
            for (name, method) in &t.methods {
                self.methods.entry(name.clone()).or_insert_with(|| method.clone());
            }
            for prop in &t.properties {
                if !self.properties.iter().any(|p| p.name == prop.name) {
                    self.properties.push(prop.clone());
                }
            }
        }

        for (name, method) in &self.methods {
            if method.is_final {
                if let Some(parent) = &self.parent {
                    if let Some(parent_method) = parent.resolve_method(name) {
                        if parent_method.is_final {
                            return Err(ClassDefError::OverridesFinalMethod(
                                self.name.clone(),
                                name.clone(),
                            ));
                        }
                    }
                }
            }
        }

        if !self.is_abstract {
            if let Some(parent) = &self.parent {
                for (name, method) in collect_abstract_methods(parent) {
                    let concrete = self
                        .methods
                        .get(&name)
                        .map(|m| !m.is_abstract)
                        .unwrap_or(false);
                    if !concrete {
                        return Err(ClassDefError::MissingAbstractOverride(
                            self.name.clone(),
                            name,
                            method.function.name.clone(),
                        ));
                    }
                }
            }
            for iface in &self.interfaces {
                for required in iface.required_methods() {
                    if !self.methods.contains_key(&required) {
                        return Err(ClassDefError::MissingInterfaceMethod(
                            self.name.clone(),
                            required,
                            iface.name.clone(),
                        ));
                    }
                }
            }
        }

        let mut statics = FxHashMap::default();
        for prop in self.properties.iter().filter(|p| p.is_static) {
            statics.insert(prop.name.clone(), prop.default.unwrap_or_else(Value::null));
        }

        Ok(Class {
            name: self.name,
            parent: self.parent,
            interfaces: self.interfaces,
            is_abstract: self.is_abstract,
            is_final: self.is_final,
            is_value_type: self.is_value_type,
            properties: self.properties,
            methods: self.methods,
            constants: self.constants,
            statics: RefCell::new(statics),
            root_shape: RefCell::new(None),
        })
    }
}

fn collect_abstract_methods(class: &Rc<Class>) -> Vec<(String, Rc<Method>)> {
    let mut out: Vec<(String, Rc<Method>)> = class
        .methods
        .iter()
        .filter(|(_, m)| m.is_abstract)
        .map(|(n, m)| (n.clone(), m.clone()))
        .collect();
    if let Some(parent) = &class.parent {
        for (name, method) in collect_abstract_methods(parent) {
            if !out.iter().any(|(n, _)| n == &name) && !class.methods.contains_key(&name) {
                out.push((name, method));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::NodeIndex;

    fn dummy_method(name: &str, is_abstract: bool, is_final: bool) -> Method {
        Method {
            function: Rc::new(UserFunction {
                name: name.to_string(),
                file: "test".to_string(),
                params: Vec::new(),
                body: NodeIndex::new(0),
            }),
            is_static: false,
            is_abstract,
            is_final,
            visibility: Visibility::Public,
        }
    }

    #[test]
    fn concrete_class_needs_abstract_override() {
        let base = ClassBuilder::new("Base")
            .abstract_class(true)
            .method("speak", dummy_method("speak", true, false))
            .build()
            .unwrap();
        let base = Rc::new(base);
        let err = ClassBuilder::new("Child").parent(base.clone()).build();
        assert!(matches!(err, Err(ClassDefError::MissingAbstractOverride(..))));

        let ok = ClassBuilder::new("Child2")
            .parent(base)
            .method("speak", dummy_method("speak", false, false))
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn interface_methods_must_be_implemented() {
        let iface = Rc::new(Interface {
            name: "Greets".to_string(),
            extends: Vec::new(),
            method_names: vec!["greet".to_string()],
            constants: FxHashMap::default(),
        });
        let missing = ClassBuilder::new("Rude").interface(iface.clone()).build();
        assert!(matches!(missing, Err(ClassDefError::MissingInterfaceMethod(..))));

        let ok = ClassBuilder::new("Polite")
            .interface(iface)
            .method("greet", dummy_method("greet", false, false))
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn trait_methods_are_copied_in_unless_shadowed() {
        let mut trait_methods = FxHashMap::default();
        trait_methods.insert("helper".to_string(), Rc::new(dummy_method("helper", false, false)));
        let t = Rc::new(Trait {
            name: "Helpful".to_string(),
            methods: trait_methods,
            properties: Vec::new(),
        });
        let class = ClassBuilder::new("Uses").uses_trait(t).build().unwrap();
        assert!(class.methods.contains_key("helper"));
    }

    #[test]
    fn root_shape_reflects_inherited_property_order() {
        let parent = Rc::new(
            ClassBuilder::new("P")
                .property(PropertyDescriptor {
                    name: "a".to_string(),
                    default: None,
                    readonly: false,
                    is_static: false,
                    visibility: Visibility::Public,
                })
                .build()
                .unwrap(),
        );
        let child = Rc::new(
            ClassBuilder::new("C")
                .parent(parent)
                .property(PropertyDescriptor {
                    name: "b".to_string(),
                    default: None,
                    readonly: false,
                    is_static: false,
                    visibility: Visibility::Public,
                })
                .build()
                .unwrap(),
        );
        let shape = child.root_shape();
        assert_eq!(shape.offset("a"), Some(0));
        assert_eq!(shape.offset("b"), Some(1));
    }
}
