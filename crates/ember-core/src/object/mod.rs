//! The object model: hidden shapes, classes/interfaces/traits, and the
//! object/struct/closure instance types built on top of them (spec §3,
//! §4.3).

pub mod class;
pub mod closure;
pub mod inline_cache;
pub mod instance;
pub mod shape;

pub use class::{Class, ClassBuilder, ClassDefError, Interface, Method, PropertyDescriptor, Trait, Visibility};
pub use closure::{CapturedVar, Closure};
pub use inline_cache::InlineCache;
pub use instance::{Object, StructInstance};
pub use shape::{Shape, ShapeId};
