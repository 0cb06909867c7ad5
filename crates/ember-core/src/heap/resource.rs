//! Opaque external resources (spec §3): a type name plus a destructor
//! callback, for handles the runtime doesn't otherwise understand (file
//! descriptors, PDO connections, …).

/// A boxed external handle. `data` is type-erased; `type_name` is used for
/// diagnostics (`get_resource_type`-style introspection) and the
/// destructor is invoked exactly once, when the owning heap box's
/// refcount reaches zero.
pub struct Resource {
    type_name: &'static str,
    data: Option<Box<dyn std::any::Any + Send>>,
    destructor: Option<Box<dyn FnOnce(Box<dyn std::any::Any + Send>) + Send>>,
}

impl Resource {
    /// Wrap a value as a named resource with a destructor callback.
    pub fn new<T: std::any::Any + Send>(
        type_name: &'static str,
        data: T,
        destructor: impl FnOnce(Box<dyn std::any::Any + Send>) + Send + 'static,
    ) -> Self {
        Self {
            type_name,
            data: Some(Box::new(data)),
            destructor: Some(Box::new(destructor)),
        }
    }

    /// The resource's declared type name.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Downcast the underlying data.
    pub fn downcast_ref<T: std::any::Any>(&self) -> Option<&T> {
        self.data.as_ref()?.downcast_ref::<T>()
    }

    /// Downcast the underlying data mutably.
    pub fn downcast_mut<T: std::any::Any>(&mut self) -> Option<&mut T> {
        self.data.as_mut()?.downcast_mut::<T>()
    }
}

impl Drop for Resource {
    fn drop(&mut self) {
        if let (Some(data), Some(destructor)) = (self.data.take(), self.destructor.take()) {
            destructor(data);
        }
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource").field("type_name", &self.type_name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn destructor_runs_exactly_once_on_drop() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        {
            let _r = Resource::new("test::handle", 42i32, move |_| {
                ran2.store(true, Ordering::SeqCst);
            });
            assert!(!ran.load(Ordering::SeqCst));
        }
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn downcast_ref_reads_typed_data() {
        let r = Resource::new("test::int", 7i32, |_| {});
        assert_eq!(r.downcast_ref::<i32>(), Some(&7));
        assert_eq!(r.downcast_ref::<String>(), None);
    }
}
