//! Traits for converting between native objects and Rust structs.
//!
//! Implement `FromNativeObject` and `ToNativeObject` to define a mapping
//! between a registered class and a Rust struct. Manual implementation for
//! now; a derive macro can be added later.
//!
//! # Example
//!
//! ```ignore
//! use ember_sdk::{FromNativeObject, ToNativeObject, NativeObject, NativeClass, NativeValue, NativeContext, AbiResult};
//!
//! struct Point { x: f64, y: f64 }
//!
//! impl FromNativeObject for Point {
//!     fn from_native_object(obj: &NativeObject) -> AbiResult<Self> {
//!         Ok(Point {
//!             x: obj.get_f64("x")?,
//!             y: obj.get_f64("y")?,
//!         })
//!     }
//! }
//!
//! impl ToNativeObject for Point {
//!     fn class_name() -> &'static str { "Point" }
//!     fn to_native_object(&self, ctx: &dyn NativeContext) -> AbiResult<NativeValue> {
//!         let class = NativeClass::from_name(ctx, "Point")?;
//!         let val = class.instantiate(ctx)?;
//!         let obj = NativeObject::wrap(ctx, val)?;
//!         obj.set_f64("x", self.x)?;
//!         obj.set_f64("y", self.y)?;
//!         Ok(obj.into_value())
//!     }
//! }
//! ```

use crate::context::NativeContext;
use crate::error::AbiResult;
use crate::types::NativeObject;
use crate::value::NativeValue;

/// Convert a native object into a Rust struct.
///
/// Implement this trait to allow extracting a Rust struct from a
/// `NativeObject` with named field access.
pub trait FromNativeObject: Sized {
    /// Convert from a NativeObject wrapper (named field access).
    fn from_native_object(obj: &NativeObject) -> AbiResult<Self>;
}

/// Convert a Rust struct into a native object.
///
/// Implement this trait to allow creating an object from a Rust struct.
/// The implementation should create a class instance and set its fields.
pub trait ToNativeObject {
    /// The registered class name this type maps to.
    fn class_name() -> &'static str;

    /// Convert to a `NativeValue` (creates an object instance and sets
    /// its fields).
    fn to_native_object(&self, ctx: &dyn NativeContext) -> AbiResult<NativeValue>;
}
