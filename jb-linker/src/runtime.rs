//! The managed runtime as seen by the resolver: class and method introspection plus
//! thread attachment. Every buffer the runtime allocates comes back wrapped in a
//! [`Lease`] so it is released exactly once, whichever way the caller leaves.

use std::ops::Deref;

use tracing::warn;

use crate::logging::category_resolver;

/// Runtime-owned allocation backing a leased value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Allocation(pub usize);

/// Opaque class reference handed out by the runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClassRef(pub usize);

/// Opaque method identifier handed out by the runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MethodRef(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntrospectionError {
    pub operation: &'static str,
    pub message: String,
}

impl IntrospectionError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for IntrospectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: {}", self.operation, self.message)
    }
}

impl std::error::Error for IntrospectionError {}

pub trait RuntimeMemory {
    fn deallocate(&self, allocation: Allocation) -> Result<(), IntrospectionError>;
}

/// Name and descriptor of one method, each in its own runtime allocation.
pub struct MethodSignature<'r> {
    pub name: Lease<'r, String>,
    pub descriptor: Lease<'r, String>,
}

pub trait ManagedRuntime: RuntimeMemory + Send + Sync {
    /// Classes visible to the loader that owns the game's native methods.
    fn loaded_classes(&self) -> Result<Lease<'_, Vec<ClassRef>>, IntrospectionError>;

    /// Type descriptor of `class`, e.g. `Lzombie/core/Core;`.
    fn class_descriptor(&self, class: ClassRef) -> Result<Lease<'_, String>, IntrospectionError>;

    fn declared_methods(
        &self,
        class: ClassRef,
    ) -> Result<Lease<'_, Vec<MethodRef>>, IntrospectionError>;

    fn method_name_and_descriptor(
        &self,
        method: MethodRef,
    ) -> Result<MethodSignature<'_>, IntrospectionError>;

    /// Makes sure the calling thread has a runtime environment, attaching it if needed.
    fn attach_current_thread(&self) -> Result<(), IntrospectionError>;
}

/// A value copied out of a runtime allocation. Dropping the lease hands the allocation
/// back to the runtime.
pub struct Lease<'r, T> {
    memory: &'r dyn RuntimeMemory,
    allocation: Option<Allocation>,
    value: T,
}

impl<'r, T> Lease<'r, T> {
    pub fn new(memory: &'r dyn RuntimeMemory, allocation: Allocation, value: T) -> Self {
        Self {
            memory,
            allocation: Some(allocation),
            value,
        }
    }

    /// A value that owns no runtime memory, e.g. an empty list the runtime returned
    /// without allocating.
    pub fn unbacked(memory: &'r dyn RuntimeMemory, value: T) -> Self {
        Self {
            memory,
            allocation: None,
            value,
        }
    }

    pub fn allocation(&self) -> Option<Allocation> {
        self.allocation
    }
}

impl<T> Deref for Lease<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Lease<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("allocation", &self.allocation)
            .field("value", &self.value)
            .finish()
    }
}

impl<T> Drop for Lease<'_, T> {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take()
            && let Err(err) = self.memory.deallocate(allocation)
        {
            warn!(
                "{} failed to release runtime allocation {:#x}: {err}",
                category_resolver(),
                allocation.0
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        released: Mutex<Vec<usize>>,
    }

    impl RuntimeMemory for Recorder {
        fn deallocate(&self, allocation: Allocation) -> Result<(), IntrospectionError> {
            self.released.lock().expect("recorder lock").push(allocation.0);
            if allocation.0 == 0xBAD {
                return Err(IntrospectionError::new("Deallocate", "invalid pointer"));
            }
            Ok(())
        }
    }

    #[test]
    fn lease_releases_once_on_drop() {
        let recorder = Recorder::default();
        {
            let lease = Lease::new(&recorder, Allocation(0x10), "Lfoo/Bar;".to_string());
            assert_eq!(lease.as_str(), "Lfoo/Bar;");
            assert_eq!(lease.allocation(), Some(Allocation(0x10)));
        }
        assert_eq!(*recorder.released.lock().expect("recorder lock"), vec![0x10]);
    }

    #[test]
    fn unbacked_leases_release_nothing() {
        let recorder = Recorder::default();
        drop(Lease::unbacked(&recorder, Vec::<ClassRef>::new()));
        assert!(recorder.released.lock().expect("recorder lock").is_empty());
    }

    #[test]
    fn failed_release_does_not_panic() {
        let recorder = Recorder::default();
        drop(Lease::new(&recorder, Allocation(0xBAD), 1u8));
        assert_eq!(*recorder.released.lock().expect("recorder lock"), vec![0xBAD]);
    }
}
