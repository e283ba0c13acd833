//! The one [`LinkerContext`] the exported loader entry points route through, plus the
//! values the host bootstrap hands over before it exists.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::info;

use crate::config::LinkerConfig;
use crate::emulator::Emulator;
use crate::error::{LinkerError, LinkerResult};
use crate::interposer::LinkerContext;
use crate::logging::category_linker;
use crate::platform::{LoaderProcs, PlatformLoader};
use crate::runtime::ManagedRuntime;

static CONTEXT: OnceLock<LinkerContext> = OnceLock::new();
static LOADER_PROCS: OnceLock<Arc<LoaderProcs>> = OnceLock::new();
static VULKAN_LOADER: AtomicUsize = AtomicUsize::new(0);
static VULKAN_DRIVER: AtomicUsize = AtomicUsize::new(0);

/// Records the platform loader entry points. Only the first call takes effect.
pub fn install_loader_procs(procs: LoaderProcs) -> Arc<LoaderProcs> {
    LOADER_PROCS.get_or_init(|| Arc::new(procs)).clone()
}

pub fn loader_procs() -> Option<Arc<LoaderProcs>> {
    LOADER_PROCS.get().cloned()
}

/// Installs `context` as the process-wide linker. Vulkan handles set earlier are carried
/// over.
pub fn arm(context: LinkerContext) -> LinkerResult<&'static LinkerContext> {
    apply_vulkan_handles(&context);
    CONTEXT
        .set(context)
        .map_err(|_| LinkerError::Config("linker context is already installed".to_string()))?;
    let context = armed()?;
    // A setter may have run between the first copy and the install.
    apply_vulkan_handles(context);
    info!("{} linker armed", category_linker());
    Ok(context)
}

/// Builds the context from [`LinkerConfig::from_env`] and arms it. This is the bootstrap
/// path; [`arm`] takes a context built by hand.
pub fn arm_from_env(
    platform: Arc<dyn PlatformLoader>,
    emulator: Arc<dyn Emulator>,
    runtime: Arc<dyn ManagedRuntime>,
) -> LinkerResult<&'static LinkerContext> {
    let config = LinkerConfig::from_env()?;
    info!(
        "{} native builds from {}, {} cached signatures",
        category_linker(),
        config.native_library_dir,
        config.signature_cache_capacity
    );
    arm(LinkerContext::new(config, platform, emulator, runtime)?)
}

pub fn armed() -> LinkerResult<&'static LinkerContext> {
    CONTEXT.get().ok_or(LinkerError::NotArmed)
}

pub fn set_vulkan_loader_handle(handle: usize) {
    VULKAN_LOADER.store(handle, Ordering::Release);
    if let Ok(context) = armed() {
        context.set_vulkan_loader_handle(handle);
    }
}

pub fn set_vulkan_driver_handle(handle: usize) {
    VULKAN_DRIVER.store(handle, Ordering::Release);
    if let Ok(context) = armed() {
        context.set_vulkan_driver_handle(handle);
    }
}

fn apply_vulkan_handles(context: &LinkerContext) {
    let loader = VULKAN_LOADER.load(Ordering::Acquire);
    if loader != 0 {
        context.set_vulkan_loader_handle(loader);
    }
    let driver = VULKAN_DRIVER.load(Ordering::Acquire);
    if driver != 0 {
        context.set_vulkan_driver_handle(driver);
    }
}
