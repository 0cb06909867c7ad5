//! Ember SDK — lightweight interface for writing native modules.
//!
//! A native module (the standard library, an embedder's own extensions)
//! implements functions against [`NativeContext`] instead of reaching into
//! `ember-core` directly. That indirection is the whole point: the engine
//! and its native modules can evolve independently of each other as long
//! as this trait's contract holds, and a handler can be unit-tested
//! against a fake context with no VM running at all.

#![warn(missing_docs)]

pub mod context;
pub mod convert;
pub mod error;
pub mod handler;
pub mod types;
pub mod value;

pub use context::NativeContext;
pub use convert::{FromNativeObject, ToNativeObject};
pub use error::{AbiResult, NativeError};
pub use handler::{
    IoCompletion, IoRequest, NativeCallResult, NativeFunctionRegistry, NativeHandler,
    NativeHandlerFn, NoopNativeHandler,
};
pub use types::{NativeArray, NativeClass, NativeFunction, NativeMethod, NativeObject, NativeTask};
pub use value::NativeValue;
