mod cache;
mod config;
mod emulator;
mod error;
mod exports;
mod interposer;
mod logging;
mod platform;
mod process;
mod resolver;
mod runtime;

pub use cache::SignatureCache;
pub use config::{
    CONFIG_PATH_ENV, LinkerConfig, NATIVE_LIBRARY_DIR_ENV, SIGNATURE_CACHE_CAPACITY_ENV,
};
pub use emulator::{DeferredInitScope, Emulator, LoadFlags, SavedDeferredInit};
pub use error::{LinkerError, LinkerResult, ResolutionFailure};
pub use interposer::{
    Binding, BindingKind, LibrarySlot, LibrarySnapshot, LibraryState, LinkerContext,
    LinkerSnapshot, open_in_vendor_namespace,
};
pub use logging::{LOG_ENV, init as init_logging};
pub use platform::{
    ANDROID_DLEXT_USE_NAMESPACE, AndroidDlextinfo, LoaderDlopenExtFn, LoaderDlopenFn,
    LoaderDlsymFn, LoaderProcs, PlatformLoader,
};
pub use process::{
    arm, arm_from_env, armed, install_loader_procs, loader_procs, set_vulkan_driver_handle,
    set_vulkan_loader_handle,
};
pub use resolver::SignatureResolver;
pub use runtime::{
    Allocation, ClassRef, IntrospectionError, Lease, ManagedRuntime, MethodRef,
    MethodSignature, RuntimeMemory,
};
