//! The foreign-ISA emulator: library loading, global symbol lookup, and the formatted
//! call entry generated stubs branch into.

use std::any::Any;

use libc::{RTLD_GLOBAL, RTLD_NOW};
use tracing::debug;

use crate::logging::category_emulation;

/// Binding behavior for an emulated load, derived from `dlopen` flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadFlags {
    pub bind_now: bool,
    pub local: bool,
}

impl LoadFlags {
    pub fn from_dlopen_flags(flags: i32) -> Self {
        Self {
            bind_now: flags & RTLD_NOW != 0,
            local: flags & RTLD_GLOBAL == 0,
        }
    }
}

/// Emulator-specific snapshot of the deferred initializer queue.
pub type SavedDeferredInit = Box<dyn Any + Send>;

pub trait Emulator: Send + Sync {
    /// Loads `filename` and its dependencies, returning the library image handle. A failed
    /// load must leave no dependency registered.
    fn load_library(&self, filename: &str, flags: LoadFlags) -> Result<usize, String>;

    /// Foreign address of `symbol`, looked up in the global scope of the image behind
    /// `library` (a handle returned by [`Emulator::load_library`]).
    fn find_global_symbol(&self, library: usize, symbol: &str) -> Option<u64>;

    /// Host address of the variadic `(function, tags, args...)` call entry.
    fn formatted_call_entry(&self) -> u64;

    /// Environment pointer handed to foreign native methods in place of the host one.
    fn wrapped_env(&self) -> u64;

    /// Switches to an empty deferred-init queue and returns the previous one.
    fn suspend_deferred_init(&self) -> SavedDeferredInit;

    /// Runs every initializer queued since the last replay.
    fn replay_deferred_initializers(&self);

    fn restore_deferred_init(&self, saved: SavedDeferredInit);
}

/// Holds the emulator's previous deferred-init queue and puts it back on drop.
pub struct DeferredInitScope<'e> {
    emulator: &'e dyn Emulator,
    saved: Option<SavedDeferredInit>,
}

impl<'e> DeferredInitScope<'e> {
    pub fn enter(emulator: &'e dyn Emulator) -> Self {
        let saved = emulator.suspend_deferred_init();
        Self {
            emulator,
            saved: Some(saved),
        }
    }

    pub fn replay(&self) {
        debug!("{} replaying deferred initializers", category_emulation());
        self.emulator.replay_deferred_initializers();
    }
}

impl Drop for DeferredInitScope<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            self.emulator.restore_deferred_init(saved);
        }
    }
}
