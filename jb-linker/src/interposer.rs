//! Decides, per known library, whether a load is served by a same-ISA build or by the
//! emulator, and turns emulated native-method symbols into callable stubs.

use std::ffi::{CStr, CString, c_void};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use bridge_abi::{
    AUDIO_DEVICES_SYMBOL_FRAGMENT, AUDIO_SYSTEM_CREATE_SYMBOL, KnownLibrary, LIBRARIES,
    LibraryRole, ResolutionPolicy, library_by_name, library_for_filename,
};
use codegen::{TagSignature, TrampolinePages, TrampolineTarget, TypeTag, decode_descriptor};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::LinkerConfig;
use crate::emulator::{DeferredInitScope, Emulator, LoadFlags};
use crate::error::{LinkerError, LinkerResult};
use crate::logging::{category_emulation, category_linker};
use crate::platform::{AndroidDlextinfo, PlatformLoader};
use crate::resolver::SignatureResolver;
use crate::runtime::ManagedRuntime;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingKind {
    Native,
    Emulated,
}

/// Where a known library ended up. Set once, on the first successful open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Binding {
    pub handle: usize,
    pub kind: BindingKind,
}

pub struct LibrarySlot {
    library: &'static KnownLibrary,
    binding: OnceLock<Binding>,
    resolve_lock: Mutex<()>,
    pages: Mutex<TrampolinePages>,
}

impl LibrarySlot {
    fn new(library: &'static KnownLibrary, page_size: usize) -> Self {
        Self {
            library,
            binding: OnceLock::new(),
            resolve_lock: Mutex::new(()),
            pages: Mutex::new(TrampolinePages::with_page_size(page_size)),
        }
    }

    pub fn library(&self) -> &'static KnownLibrary {
        self.library
    }

    pub fn binding(&self) -> Option<Binding> {
        self.binding.get().copied()
    }

    pub fn page_count(&self) -> usize {
        self.pages().page_count()
    }

    pub fn bytes_used(&self) -> usize {
        self.pages().bytes_used()
    }

    fn pages(&self) -> MutexGuard<'_, TrampolinePages> {
        // Installs are all-or-nothing, so a poisoned page list is still consistent.
        self.pages.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for LibrarySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibrarySlot")
            .field("library", &self.library.name)
            .field("binding", &self.binding.get())
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LibraryState {
    Unresolved,
    NativeBound,
    EmulatedBound,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibrarySnapshot {
    pub name: String,
    pub role: String,
    pub state: LibraryState,
    pub handle: Option<String>,
    pub trampoline_pages: usize,
    pub trampoline_bytes: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkerSnapshot {
    pub libraries: Vec<LibrarySnapshot>,
    pub cached_signatures: usize,
    pub signature_cache_capacity: usize,
    pub vulkan_loader_installed: bool,
    pub vulkan_driver_installed: bool,
}

/// Everything the interposing entry points need: collaborators, one slot per known
/// library, the signature resolver, and the host-installed vulkan handles.
pub struct LinkerContext {
    config: LinkerConfig,
    platform: Arc<dyn PlatformLoader>,
    emulator: Arc<dyn Emulator>,
    resolver: SignatureResolver,
    slots: Vec<LibrarySlot>,
    vulkan_loader: AtomicUsize,
    vulkan_driver: AtomicUsize,
}

impl LinkerContext {
    pub fn new(
        config: LinkerConfig,
        platform: Arc<dyn PlatformLoader>,
        emulator: Arc<dyn Emulator>,
        runtime: Arc<dyn ManagedRuntime>,
    ) -> LinkerResult<Self> {
        let page_size = TrampolinePages::new()?.page_size();
        Self::with_page_size(config, platform, emulator, runtime, page_size)
    }

    /// Like [`LinkerContext::new`] with an explicit stub page size.
    pub fn with_page_size(
        config: LinkerConfig,
        platform: Arc<dyn PlatformLoader>,
        emulator: Arc<dyn Emulator>,
        runtime: Arc<dyn ManagedRuntime>,
        page_size: usize,
    ) -> LinkerResult<Self> {
        config.validate()?;
        if page_size == 0 {
            return Err(LinkerError::Config("page size must be non-zero".to_string()));
        }
        let resolver = SignatureResolver::new(runtime, config.signature_cache_capacity);
        let slots = LIBRARIES
            .iter()
            .map(|library| LibrarySlot::new(library, page_size))
            .collect();
        Ok(Self {
            config,
            platform,
            emulator,
            resolver,
            slots,
            vulkan_loader: AtomicUsize::new(0),
            vulkan_driver: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &LinkerConfig {
        &self.config
    }

    pub fn resolver(&self) -> &SignatureResolver {
        &self.resolver
    }

    pub fn slots(&self) -> &[LibrarySlot] {
        &self.slots
    }

    pub fn slot(&self, name: &str) -> Option<&LibrarySlot> {
        library_by_name(name).and_then(|library| self.slot_for(library))
    }

    fn slot_for(&self, library: &KnownLibrary) -> Option<&LibrarySlot> {
        // slots are built in table order and the table is dense
        self.slots.get(library.index as usize)
    }

    pub fn set_vulkan_loader_handle(&self, handle: usize) {
        self.vulkan_loader.store(handle, Ordering::Release);
    }

    pub fn set_vulkan_driver_handle(&self, handle: usize) {
        self.vulkan_driver.store(handle, Ordering::Release);
    }

    /// `dlopen`: known libraries are bound once and then answered from the slot.
    pub fn open(&self, filename: Option<&CStr>, flags: i32, caller: usize) -> Option<usize> {
        let Some(filename) = filename else {
            return self.platform.open(None, flags, caller);
        };
        let name = filename.to_string_lossy();

        let known = library_for_filename(&name).and_then(|library| self.slot_for(library));
        if let Some(slot) = known {
            return self.open_known(slot, &name, flags, caller);
        }
        if let Some(handle) = self.vulkan_loader_redirect(&name) {
            return Some(handle);
        }
        self.platform.open(Some(filename), flags, caller)
    }

    /// `android_dlopen_ext`.
    pub fn open_ext(
        &self,
        filename: &CStr,
        flags: i32,
        extinfo: Option<&AndroidDlextinfo>,
        caller: usize,
    ) -> Option<usize> {
        if let Some(handle) = self.vulkan_driver_redirect(&filename.to_string_lossy()) {
            return Some(handle);
        }
        self.platform.open_ext(filename, flags, extinfo, caller)
    }

    /// `android_load_sphal_library`: opens inside the first vendor namespace the
    /// platform exports.
    pub fn open_vendor(&self, filename: &CStr, flags: i32, caller: usize) -> Option<usize> {
        if let Some(handle) = self.vulkan_driver_redirect(&filename.to_string_lossy()) {
            return Some(handle);
        }
        open_in_vendor_namespace(
            self.platform.as_ref(),
            &self.config.vendor_namespaces,
            filename,
            flags,
            caller,
        )
    }

    /// `dlsym`: emulated handles get a stub, everything else goes to the platform.
    pub fn symbol(&self, handle: usize, symbol: &CStr, caller: usize) -> Option<usize> {
        let emulated = self.slots.iter().find(|slot| {
            slot.binding().is_some_and(|binding| {
                handle != 0 && binding.handle == handle && binding.kind == BindingKind::Emulated
            })
        });
        let Some(slot) = emulated else {
            return self.platform.symbol(handle, symbol, caller);
        };

        match self.bridge_symbol(slot, handle, &symbol.to_string_lossy()) {
            Ok(stub) => stub,
            Err(err) => {
                error!("{} {}: {err}", category_linker(), slot.library.name);
                None
            }
        }
    }

    pub fn snapshot(&self) -> LinkerSnapshot {
        let libraries = self
            .slots
            .iter()
            .map(|slot| {
                let binding = slot.binding();
                let state = match binding.map(|binding| binding.kind) {
                    None => LibraryState::Unresolved,
                    Some(BindingKind::Native) => LibraryState::NativeBound,
                    Some(BindingKind::Emulated) => LibraryState::EmulatedBound,
                };
                let pages = slot.pages();
                LibrarySnapshot {
                    name: slot.library.name.to_string(),
                    role: slot.library.role.as_str().to_string(),
                    state,
                    handle: binding.map(|binding| format!("{:#x}", binding.handle)),
                    trampoline_pages: pages.page_count(),
                    trampoline_bytes: pages.bytes_used(),
                }
            })
            .collect();
        LinkerSnapshot {
            libraries,
            cached_signatures: self.resolver.cache().len(),
            signature_cache_capacity: self.resolver.cache().capacity(),
            vulkan_loader_installed: self.vulkan_loader.load(Ordering::Acquire) != 0,
            vulkan_driver_installed: self.vulkan_driver.load(Ordering::Acquire) != 0,
        }
    }

    pub fn dump_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.snapshot())
    }

    fn open_known(
        &self,
        slot: &LibrarySlot,
        name: &str,
        flags: i32,
        caller: usize,
    ) -> Option<usize> {
        if let Some(binding) = slot.binding() {
            return Some(binding.handle);
        }
        let _guard = slot
            .resolve_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Another thread may have finished the bind while we waited.
        if let Some(binding) = slot.binding() {
            return Some(binding.handle);
        }

        match self.bind(slot, name, flags, caller) {
            Ok(binding) => {
                let _ = slot.binding.set(binding);
                Some(binding.handle)
            }
            Err(err) => {
                error!("{} {err}", category_linker());
                None
            }
        }
    }

    fn bind(
        &self,
        slot: &LibrarySlot,
        name: &str,
        flags: i32,
        caller: usize,
    ) -> LinkerResult<Binding> {
        let library = slot.library;
        if library.policy() == ResolutionPolicy::PreferNative {
            let native = self.native_path(name);
            if self.platform.exists(&native) {
                let handle = self.open_native(&native, flags, caller).ok_or_else(|| {
                    let reason = format!("{} failed to open", native.display());
                    LinkerError::load(library.name, reason)
                })?;
                info!("{} {} bound to {}", category_linker(), library.name, native.display());
                return Ok(Binding {
                    handle,
                    kind: BindingKind::Native,
                });
            }
            warn!(
                "{} native build {} not found, loading {name} through the emulator",
                category_linker(),
                native.display()
            );
        }

        info!("{} loading {name}", category_emulation());
        let emulator = self.emulator.as_ref();
        let handle = emulator
            .load_library(name, LoadFlags::from_dlopen_flags(flags))
            .map_err(|reason| LinkerError::load(library.name, reason))?;
        if handle == 0 {
            return Err(LinkerError::load(library.name, "emulator returned a null handle"));
        }
        {
            let scope = DeferredInitScope::enter(emulator);
            scope.replay();
        }
        Ok(Binding {
            handle,
            kind: BindingKind::Emulated,
        })
    }

    fn native_path(&self, name: &str) -> PathBuf {
        let base = name.rsplit('/').next().unwrap_or(name);
        Path::new(&self.config.native_library_dir).join(base)
    }

    fn open_native(&self, path: &Path, flags: i32, caller: usize) -> Option<usize> {
        let path = CString::new(path.to_string_lossy().into_owned()).ok()?;
        self.platform.open(Some(&path), flags, caller)
    }

    fn bridge_symbol(
        &self,
        slot: &LibrarySlot,
        handle: usize,
        symbol: &str,
    ) -> LinkerResult<Option<usize>> {
        if slot.library.role == LibraryRole::AudioIntegration
            && symbol.contains(AUDIO_DEVICES_SYMBOL_FRAGMENT)
        {
            let signature = TagSignature::new(
                vec![TypeTag::Pointer, TypeTag::Pointer, TypeTag::Int],
                TypeTag::Pointer,
            )?;
            let stub = self.install(slot, &signature, audio_devices_stub as usize as u64)?;
            debug!("{} {symbol} served by the host stub", category_linker());
            return Ok(Some(stub));
        }

        let Some(function) = self.emulator.find_global_symbol(handle, symbol) else {
            debug!("{} {symbol} not found in emulated libraries", category_emulation());
            return Ok(None);
        };

        if symbol == AUDIO_SYSTEM_CREATE_SYMBOL
            && let Err(err) = self.resolver.runtime().attach_current_thread()
        {
            error!("{} failed to attach audio thread to the runtime: {err}", category_linker());
        }

        let descriptor = self.resolver.resolve(symbol)?;
        let signature = decode_descriptor(&descriptor)?.with_jni_prefix();
        let stub = self.install(slot, &signature, function)?;
        debug!(
            "{} bridged {symbol} {signature} at {stub:#x} (target {function:#x})",
            category_linker()
        );
        Ok(Some(stub))
    }

    fn install(
        &self,
        slot: &LibrarySlot,
        signature: &TagSignature,
        function: u64,
    ) -> LinkerResult<usize> {
        let target = TrampolineTarget {
            env: self.emulator.wrapped_env(),
            dispatcher: self.emulator.formatted_call_entry(),
            function,
        };
        let mut pages = slot.pages();
        let stub = codegen::generate(&mut pages, &signature.args, signature.ret, target)?;
        Ok(stub.addr())
    }

    /// Plain opens of the exact loader name get the host's vulkan loader.
    fn vulkan_loader_redirect(&self, name: &str) -> Option<usize> {
        if name != self.config.vulkan_loader_name {
            return None;
        }
        match self.vulkan_loader.load(Ordering::Acquire) {
            0 => None,
            handle => Some(handle),
        }
    }

    /// Extended and vendor opens of anything that looks like a driver get the host's
    /// vulkan driver.
    fn vulkan_driver_redirect(&self, name: &str) -> Option<usize> {
        if !name.contains(&self.config.vulkan_driver_fragment) {
            return None;
        }
        match self.vulkan_driver.load(Ordering::Acquire) {
            0 => None,
            handle => Some(handle),
        }
    }
}

/// Opens `filename` inside the first of `namespaces` the platform exports, or with a
/// null namespace when none is.
pub fn open_in_vendor_namespace(
    platform: &dyn PlatformLoader,
    namespaces: &[String],
    filename: &CStr,
    flags: i32,
    caller: usize,
) -> Option<usize> {
    let namespace = namespaces.iter().find_map(|name| {
        let name = CString::new(name.as_str()).ok()?;
        platform.exported_namespace(&name)
    });
    if namespace.is_none() {
        warn!(
            "{} no vendor namespace exported; opening {} without one",
            category_linker(),
            filename.to_string_lossy()
        );
    }
    let info = AndroidDlextinfo::with_namespace(namespace.unwrap_or(0));
    platform.open_ext(filename, flags, Some(&info), caller)
}

impl std::fmt::Debug for LinkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkerContext")
            .field("config", &self.config)
            .field("slots", &self.slots)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

/// Audio device enumeration is answered with no devices so the audio library falls back
/// to its default output.
extern "C" fn audio_devices_stub(
    _env: *mut c_void,
    _class: *mut c_void,
    kind: i32,
) -> *mut c_void {
    debug!("{} audio device query ({kind}) answered with none", category_linker());
    std::ptr::null_mut()
}
