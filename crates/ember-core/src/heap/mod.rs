//! The managed heap: a uniform `BoxHeader` envelope around each of the 8
//! kinds a [`crate::value::Value`] pointer can tag, plus allocation and
//! retain/release dispatch (spec §3, §4.2, §8).

pub mod arena;
pub mod array;
pub mod function;
pub mod header;
pub mod interner;
pub mod pool;
pub mod resource;
pub mod string;

use crate::object::{Closure, Object, StructInstance};
use crate::value::{HeapTag, Value};
use array::EmberArray;
use function::{NativeFunction, UserFunction};
use header::BoxHeader;
use resource::Resource;
use string::EmberString;

/// The uniform envelope every heap allocation carries ahead of its
/// payload. `#[repr(C)]` guarantees `header` sits at offset 0 regardless
/// of `T`, so a raw address can be reinterpreted as `*const BoxHeader`
/// without knowing the payload type — this is what lets `retain`/
/// `release` work generically before dispatching on the tag.
#[repr(C)]
pub struct GcBox<T> {
    pub header: BoxHeader,
    pub payload: T,
}

impl<T> GcBox<T> {
    fn alloc(payload: T) -> *mut GcBox<T> {
        Box::into_raw(Box::new(GcBox { header: BoxHeader::new(), payload }))
    }
}

fn alloc_of(kind: HeapTag, ptr: usize) -> Value {
    Value::of_ptr(kind, ptr)
}

pub fn alloc_string(s: EmberString) -> Value {
    alloc_of(HeapTag::String, GcBox::alloc(s) as usize)
}

pub fn alloc_array(a: EmberArray) -> Value {
    alloc_of(HeapTag::Array, GcBox::alloc(a) as usize)
}

pub fn alloc_object(o: Object) -> Value {
    alloc_of(HeapTag::Object, GcBox::alloc(o) as usize)
}

pub fn alloc_struct(s: StructInstance) -> Value {
    alloc_of(HeapTag::Struct, GcBox::alloc(s) as usize)
}

pub fn alloc_closure(c: Closure) -> Value {
    alloc_of(HeapTag::Closure, GcBox::alloc(c) as usize)
}

pub fn alloc_resource(r: Resource) -> Value {
    alloc_of(HeapTag::Resource, GcBox::alloc(r) as usize)
}

pub fn alloc_user_function(f: UserFunction) -> Value {
    alloc_of(HeapTag::UserFunction, GcBox::alloc(f) as usize)
}

pub fn alloc_native_function(f: NativeFunction) -> Value {
    alloc_of(HeapTag::NativeFunction, GcBox::alloc(f) as usize)
}

/// Reinterpret a live heap address as a payload reference. Callers must
/// have already checked the value's `HeapTag` matches `T`
/// (`Value::as_addr_of`); this is the one place the heap's type erasure
/// is bridged back to a concrete type.
///
/// # Safety
/// `addr` must point at a live `GcBox<T>` produced by the matching
/// `alloc_*` function and not yet deallocated.
pub unsafe fn deref<T>(addr: usize) -> &'static T {
    &(*(addr as *const GcBox<T>)).payload
}

/// Mutable counterpart of [`deref`]. Same safety contract.
pub unsafe fn deref_mut<T>(addr: usize) -> &'static mut T {
    &mut (*(addr as *mut GcBox<T>)).payload
}

/// Expose the envelope behind a live heap address, for the collector
/// (`crate::gc::collector`) to read/flip mark colour, age and generation
/// without knowing the payload type.
pub fn header_of(addr: usize) -> &'static BoxHeader {
    // BoxHeader is GcBox<T>'s first field for every T, so this is valid
    // regardless of which concrete GcBox<T> actually lives at `addr`.
    unsafe { &*(addr as *const BoxHeader) }
}

/// The envelope behind `v`, or `None` for scalar (non-pointer) values.
pub fn header_of_value(v: Value) -> Option<&'static BoxHeader> {
    v.as_addr().map(header_of)
}

/// Increment a value's refcount if it is heap-allocated; a no-op for
/// scalars (null/bool/int/float).
pub fn retain(v: Value) {
    if let Some(addr) = v.as_addr() {
        header_of(addr).retain();
    }
}

/// Decrement a value's refcount if it is heap-allocated, freeing and
/// recursively releasing its children when the count reaches zero.
/// Structural only: does not invoke user-defined `__destruct` hooks — see
/// `crate::vm::Vm::release_value` for the destructor-aware top-level
/// release point used at scope exit.
pub fn release(v: Value) {
    let Some(tag) = v.heap_tag() else { return };
    let addr = v.as_addr().expect("heap_tag implies as_addr");
    if header_of(addr).release() != 0 {
        return;
    }
    unsafe { drop_and_dealloc(tag, addr) }
}

unsafe fn drop_and_dealloc(tag: HeapTag, addr: usize) {
    match tag {
        HeapTag::String => {
            drop(Box::from_raw(addr as *mut GcBox<EmberString>));
        }
        HeapTag::Array => {
            let children: Vec<Value> = (*(addr as *mut GcBox<EmberArray>)).payload.values().collect();
            drop(Box::from_raw(addr as *mut GcBox<EmberArray>));
            for child in children {
                release(child);
            }
        }
        HeapTag::Object => {
            let children = (*(addr as *mut GcBox<Object>)).payload.slot_values();
            drop(Box::from_raw(addr as *mut GcBox<Object>));
            for child in children {
                release(child);
            }
        }
        HeapTag::Struct => {
            let children = (*(addr as *mut GcBox<StructInstance>)).payload.fields.clone();
            drop(Box::from_raw(addr as *mut GcBox<StructInstance>));
            for child in children {
                release(child);
            }
        }
        HeapTag::Closure => {
            let children: Vec<Value> = (*(addr as *mut GcBox<Closure>))
                .payload
                .captures
                .values()
                .filter_map(|c| match c {
                    crate::object::CapturedVar::ByValue(v) => Some(*v),
                    crate::object::CapturedVar::ByRef(_) => None,
                })
                .collect();
            drop(Box::from_raw(addr as *mut GcBox<Closure>));
            for child in children {
                release(child);
            }
        }
        HeapTag::Resource => {
            drop(Box::from_raw(addr as *mut GcBox<Resource>));
        }
        HeapTag::UserFunction => {
            drop(Box::from_raw(addr as *mut GcBox<UserFunction>));
        }
        HeapTag::NativeFunction => {
            drop(Box::from_raw(addr as *mut GcBox<NativeFunction>));
        }
    }
}

/// Free the box shell at `addr` without touching its children's refcounts.
/// Used by the generational collector (`crate::gc::collector`) when
/// sweeping a whole confirmed-unreachable cycle: every member of the
/// cycle gets this treatment directly, and only edges pointing *out* of
/// the cycle are released normally, so no edge is double-released.
///
/// # Safety
/// Same contract as [`deref`]: `addr` must be a live, not-yet-freed
/// `GcBox<T>` for the kind `tag` claims.
pub unsafe fn force_dealloc_box_only(tag: HeapTag, addr: usize) {
    match tag {
        HeapTag::String => drop(Box::from_raw(addr as *mut GcBox<EmberString>)),
        HeapTag::Array => drop(Box::from_raw(addr as *mut GcBox<EmberArray>)),
        HeapTag::Object => drop(Box::from_raw(addr as *mut GcBox<Object>)),
        HeapTag::Struct => drop(Box::from_raw(addr as *mut GcBox<StructInstance>)),
        HeapTag::Closure => drop(Box::from_raw(addr as *mut GcBox<Closure>)),
        HeapTag::Resource => drop(Box::from_raw(addr as *mut GcBox<Resource>)),
        HeapTag::UserFunction => drop(Box::from_raw(addr as *mut GcBox<UserFunction>)),
        HeapTag::NativeFunction => drop(Box::from_raw(addr as *mut GcBox<NativeFunction>)),
    }
}

/// The direct children of a heap value, for the generational collector's
/// mark phase (`crate::gc::collector`) to trace without re-deriving this
/// per-kind knowledge.
pub fn trace_children(v: Value) -> Vec<Value> {
    let Some(tag) = v.heap_tag() else { return Vec::new() };
    let addr = v.as_addr().expect("heap_tag implies as_addr");
    unsafe {
        match tag {
            HeapTag::Array => deref::<EmberArray>(addr).values().collect(),
            HeapTag::Object => deref::<Object>(addr).slot_values(),
            HeapTag::Struct => deref::<StructInstance>(addr).fields.clone(),
            HeapTag::Closure => deref::<Closure>(addr)
                .captures
                .values()
                .filter_map(|c| match c {
                    crate::object::CapturedVar::ByValue(v) => Some(*v),
                    crate::object::CapturedVar::ByRef(_) => None,
                })
                .collect(),
            HeapTag::String | HeapTag::Resource | HeapTag::UserFunction | HeapTag::NativeFunction => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_round_trips_through_alloc_and_deref() {
        let v = alloc_string(EmberString::from_str("hi"));
        let addr = v.as_addr_of(HeapTag::String).unwrap();
        let s = unsafe { deref::<EmberString>(addr) };
        assert_eq!(s.as_bytes(), b"hi");
        release(v);
    }

    #[test]
    fn retain_then_double_release_frees_once() {
        let v = alloc_string(EmberString::from_str("x"));
        retain(v);
        release(v);
        release(v);
    }

    #[test]
    fn array_release_recursively_releases_children() {
        let inner = alloc_string(EmberString::from_str("child"));
        let mut arr = EmberArray::new();
        arr.push(inner);
        let outer = alloc_array(arr);
        release(outer);
        // if the child were double-freed or leaked this would be caught
        // by a sanitizer in a real test run; here we just exercise the path.
    }
}
