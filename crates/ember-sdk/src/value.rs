//! `NativeValue` — the ABI-stable value handle native modules exchange
//! with the engine.
//!
//! Wraps [`ember_core::Value`] directly rather than re-deriving its NaN-box
//! layout by hand: crossing the boundary is a move of the same 64-bit word,
//! not a re-encoding, and a native module never needs to know the bit
//! layout to use one.

use ember_core::{HeapTag, Value};

/// Opaque value handle passed across the native-function boundary.
///
/// # Thread Safety
///
/// `NativeValue` is `Send`/`Sync` — it is a plain 64-bit word, no different
/// from the engine's own `Value`.
///
/// # Memory Management
///
/// Scalars (null, bool, int, float) are stored inline. Heap values
/// (strings, arrays, objects, ...) are reference-counted by the engine;
/// a native function that stores a `NativeValue` past the end of its call
/// must retain it through [`crate::context::NativeContext`], same as any
/// other heap-owning code.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct NativeValue(Value);

unsafe impl Send for NativeValue {}
unsafe impl Sync for NativeValue {}

impl NativeValue {
    /// Wrap an engine [`Value`].
    #[inline]
    pub const fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// Unwrap to the engine [`Value`].
    #[inline]
    pub const fn to_value(self) -> Value {
        self.0
    }

    /// Create a null value.
    #[inline]
    pub const fn null() -> Self {
        Self(Value::null())
    }

    /// Create a boolean value.
    #[inline]
    pub const fn bool(b: bool) -> Self {
        Self(Value::of_bool(b))
    }

    /// Create a 32-bit integer value.
    #[inline]
    pub const fn i32(i: i32) -> Self {
        Self(Value::of_int(i))
    }

    /// Create a 64-bit float value.
    #[inline]
    pub fn f64(f: f64) -> Self {
        Self(Value::of_float(f))
    }

    /// Create from raw bits (same encoding as the engine's `Value`).
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(Value::from_raw_bits(bits))
    }

    /// Get raw bits (same encoding as the engine's `Value`).
    #[inline]
    pub const fn to_bits(self) -> u64 {
        self.0.raw_bits()
    }

    /// Check if this is a null value.
    #[inline]
    pub const fn is_null(&self) -> bool {
        self.0.is_null()
    }

    /// Check if this is a heap pointer (string, array, object, ...).
    #[inline]
    pub const fn is_ptr(&self) -> bool {
        self.0.is_ptr()
    }

    /// Get as boolean if this is a bool.
    #[inline]
    pub const fn as_bool(&self) -> Option<bool> {
        self.0.as_bool()
    }

    /// Get as i32 if this is an int.
    #[inline]
    pub const fn as_i32(&self) -> Option<i32> {
        self.0.as_int()
    }

    /// Get as f64 if this is a float.
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        self.0.as_float()
    }

    /// The heap-object kind this value refers to, if it is a pointer.
    #[inline]
    pub const fn heap_tag(&self) -> Option<HeapTag> {
        self.0.heap_tag()
    }

    /// Human-readable type name, for error messages.
    pub fn type_name(&self) -> &'static str {
        self.0.type_name()
    }
}

impl Default for NativeValue {
    fn default() -> Self {
        Self::null()
    }
}

impl std::fmt::Debug for NativeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0, f)
    }
}

impl From<Value> for NativeValue {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<NativeValue> for Value {
    fn from(value: NativeValue) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_round_trips() {
        let v = NativeValue::null();
        assert!(v.is_null());
        assert!(!v.is_ptr());
    }

    #[test]
    fn bool_round_trips() {
        assert_eq!(NativeValue::bool(true).as_bool(), Some(true));
        assert_eq!(NativeValue::bool(false).as_bool(), Some(false));
    }

    #[test]
    fn i32_round_trips() {
        let v = NativeValue::i32(-42);
        assert_eq!(v.as_i32(), Some(-42));
    }

    #[test]
    fn f64_round_trips() {
        let v = NativeValue::f64(3.5);
        assert_eq!(v.as_f64(), Some(3.5));
    }

    #[test]
    fn converts_to_and_from_engine_value() {
        let engine = Value::of_int(7);
        let native: NativeValue = engine.into();
        let back: Value = native.into();
        assert_eq!(back.as_int(), Some(7));
    }

    #[test]
    fn bits_round_trip_through_the_same_encoding_as_value() {
        let v = NativeValue::i32(9);
        let restored = NativeValue::from_bits(v.to_bits());
        assert_eq!(restored, v);
    }
}
