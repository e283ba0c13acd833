#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::ffi::CStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use linker::{
    Allocation, AndroidDlextinfo, BindingKind, ClassRef, Emulator, IntrospectionError, Lease,
    LinkerConfig, LinkerContext, LinkerError, LoadFlags, ManagedRuntime, MethodRef,
    MethodSignature, PlatformLoader, ResolutionFailure, RuntimeMemory, SavedDeferredInit,
};

pub const PAGE_SIZE: usize = 4096;
pub const EMULATED_HANDLE: usize = 0xE000_0000;
pub const NATIVE_HANDLE_BASE: usize = 0x5000_0000;
pub const PASSTHROUGH_HANDLE: usize = 0x7000_0000;
pub const PASSTHROUGH_SYMBOL: usize = 0x7100_0000;

pub const CORE_CLASS: &str = "zombie/core/Core";
pub const CORE_SYMBOL: &str = "Java_zombie_core_Core_setFrame__IF";
pub const CORE_DESCRIPTOR: &str = "(IF)V";

/// Records every loader call and answers from fixed tables.
#[derive(Default)]
pub struct MockPlatform {
    pub existing: HashSet<PathBuf>,
    pub namespaces: HashMap<String, usize>,
    pub fail_native_open: bool,
    pub opened: Mutex<Vec<String>>,
    pub ext_opened: Mutex<Vec<(String, Option<usize>)>>,
    pub looked_up: Mutex<Vec<(usize, String)>>,
}

impl MockPlatform {
    pub fn with_native(paths: &[&str]) -> Self {
        Self {
            existing: paths.iter().map(PathBuf::from).collect(),
            ..Self::default()
        }
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().expect("platform lock").clone()
    }
}

impl PlatformLoader for MockPlatform {
    fn open(&self, filename: Option<&CStr>, _flags: i32, _caller: usize) -> Option<usize> {
        let name = filename.map_or_else(String::new, |name| name.to_string_lossy().into_owned());
        let mut opened = self.opened.lock().expect("platform lock");
        opened.push(name.clone());
        if self.existing.contains(Path::new(&name)) {
            if self.fail_native_open {
                return None;
            }
            return Some(NATIVE_HANDLE_BASE + opened.len());
        }
        Some(PASSTHROUGH_HANDLE)
    }

    fn symbol(&self, handle: usize, symbol: &CStr, _caller: usize) -> Option<usize> {
        self.looked_up
            .lock()
            .expect("platform lock")
            .push((handle, symbol.to_string_lossy().into_owned()));
        Some(PASSTHROUGH_SYMBOL)
    }

    fn open_ext(
        &self,
        filename: &CStr,
        _flags: i32,
        extinfo: Option<&AndroidDlextinfo>,
        _caller: usize,
    ) -> Option<usize> {
        let namespace = extinfo.map(|info| info.library_namespace as usize);
        self.ext_opened
            .lock()
            .expect("platform lock")
            .push((filename.to_string_lossy().into_owned(), namespace));
        Some(PASSTHROUGH_HANDLE)
    }

    fn exported_namespace(&self, name: &CStr) -> Option<usize> {
        self.namespaces.get(name.to_str().ok()?).copied()
    }

    fn exists(&self, path: &Path) -> bool {
        self.existing.contains(path)
    }
}

/// Emulator double: a symbol table, a load counter, and a log of deferred-init calls.
pub struct MockEmulator {
    pub symbols: HashMap<String, u64>,
    pub fail_load: AtomicBool,
    pub loads: Mutex<Vec<(String, LoadFlags)>>,
    pub loaded: AtomicUsize,
    /// Held inside `load_library` so concurrent opens overlap.
    pub load_delay: Duration,
    pub lookups: Mutex<Vec<(usize, String)>>,
    pub events: Mutex<Vec<&'static str>>,
    pub env: u64,
    pub dispatcher: u64,
}

impl Default for MockEmulator {
    fn default() -> Self {
        Self {
            symbols: HashMap::new(),
            fail_load: AtomicBool::new(false),
            loads: Mutex::new(Vec::new()),
            loaded: AtomicUsize::new(0),
            load_delay: Duration::ZERO,
            lookups: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            env: 0x0000_7f00_0000_1000,
            dispatcher: 0x0000_7f00_0000_2000,
        }
    }
}

impl MockEmulator {
    pub fn with_symbols(symbols: &[(&str, u64)]) -> Self {
        Self {
            symbols: symbols
                .iter()
                .map(|(name, addr)| (name.to_string(), *addr))
                .collect(),
            ..Self::default()
        }
    }

    pub fn lookups(&self) -> Vec<(usize, String)> {
        self.lookups.lock().expect("emulator lock").clone()
    }

    pub fn load_count(&self) -> usize {
        self.loads.lock().expect("emulator lock").len()
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().expect("emulator lock").clone()
    }

    fn record(&self, event: &'static str) {
        self.events.lock().expect("emulator lock").push(event);
    }
}

impl Emulator for MockEmulator {
    fn load_library(&self, filename: &str, flags: LoadFlags) -> Result<usize, String> {
        self.loads
            .lock()
            .expect("emulator lock")
            .push((filename.to_string(), flags));
        std::thread::sleep(self.load_delay);
        if self.fail_load.load(Ordering::SeqCst) {
            return Err("missing dependency libstdc++.so.6".to_string());
        }
        // each successful load gets its own image handle
        let position = self.loaded.fetch_add(1, Ordering::SeqCst);
        Ok(EMULATED_HANDLE + position * 0x1000)
    }

    fn find_global_symbol(&self, library: usize, symbol: &str) -> Option<u64> {
        self.lookups
            .lock()
            .expect("emulator lock")
            .push((library, symbol.to_string()));
        self.symbols.get(symbol).copied()
    }

    fn formatted_call_entry(&self) -> u64 {
        self.dispatcher
    }

    fn wrapped_env(&self) -> u64 {
        self.env
    }

    fn suspend_deferred_init(&self) -> SavedDeferredInit {
        self.record("suspend");
        Box::new("previous queue")
    }

    fn replay_deferred_initializers(&self) {
        self.record("replay");
    }

    fn restore_deferred_init(&self, saved: SavedDeferredInit) {
        assert_eq!(saved.downcast_ref::<&str>(), Some(&"previous queue"));
        self.record("restore");
    }
}

pub struct MockMethod {
    pub name: &'static str,
    pub descriptor: &'static str,
}

pub struct MockClass {
    pub descriptor: &'static str,
    pub methods: Vec<MockMethod>,
}

/// Managed runtime double. Every lease it hands out is tracked until released.
#[derive(Default)]
pub struct MockRuntime {
    pub classes: Vec<MockClass>,
    pub unreadable_classes: HashSet<usize>,
    pub unreadable_methods: HashSet<(usize, usize)>,
    pub fail_class_listing: bool,
    pub class_listings: AtomicUsize,
    pub attached: AtomicUsize,
    pub next_allocation: AtomicUsize,
    pub live: Mutex<HashSet<usize>>,
}

impl MockRuntime {
    pub fn with_classes(classes: Vec<MockClass>) -> Self {
        Self {
            classes,
            ..Self::default()
        }
    }

    pub fn live_allocations(&self) -> usize {
        self.live.lock().expect("runtime lock").len()
    }

    pub fn class_listings(&self) -> usize {
        self.class_listings.load(Ordering::SeqCst)
    }

    fn lease<T>(&self, value: T) -> Lease<'_, T> {
        let id = self.next_allocation.fetch_add(1, Ordering::SeqCst) + 1;
        self.live.lock().expect("runtime lock").insert(id);
        Lease::new(self, Allocation(id), value)
    }
}

impl RuntimeMemory for MockRuntime {
    fn deallocate(&self, allocation: Allocation) -> Result<(), IntrospectionError> {
        if self.live.lock().expect("runtime lock").remove(&allocation.0) {
            Ok(())
        } else {
            Err(IntrospectionError::new("Deallocate", "double release"))
        }
    }
}

impl ManagedRuntime for MockRuntime {
    fn loaded_classes(&self) -> Result<Lease<'_, Vec<ClassRef>>, IntrospectionError> {
        self.class_listings.fetch_add(1, Ordering::SeqCst);
        if self.fail_class_listing {
            return Err(IntrospectionError::new("GetClassLoaderClasses", "wrong phase"));
        }
        Ok(self.lease((0..self.classes.len()).map(ClassRef).collect()))
    }

    fn class_descriptor(&self, class: ClassRef) -> Result<Lease<'_, String>, IntrospectionError> {
        if self.unreadable_classes.contains(&class.0) {
            return Err(IntrospectionError::new("GetClassSignature", "invalid class"));
        }
        let class = self
            .classes
            .get(class.0)
            .ok_or_else(|| IntrospectionError::new("GetClassSignature", "unknown class"))?;
        Ok(self.lease(class.descriptor.to_string()))
    }

    fn declared_methods(
        &self,
        class: ClassRef,
    ) -> Result<Lease<'_, Vec<MethodRef>>, IntrospectionError> {
        let methods = &self
            .classes
            .get(class.0)
            .ok_or_else(|| IntrospectionError::new("GetClassMethods", "unknown class"))?
            .methods;
        let ids = (0..methods.len())
            .map(|index| MethodRef((class.0 << 16) | index))
            .collect();
        Ok(self.lease(ids))
    }

    fn method_name_and_descriptor(
        &self,
        method: MethodRef,
    ) -> Result<MethodSignature<'_>, IntrospectionError> {
        let (class, index) = (method.0 >> 16, method.0 & 0xFFFF);
        if self.unreadable_methods.contains(&(class, index)) {
            return Err(IntrospectionError::new("GetMethodName", "invalid method"));
        }
        let method = self
            .classes
            .get(class)
            .and_then(|class| class.methods.get(index))
            .ok_or_else(|| IntrospectionError::new("GetMethodName", "unknown method"))?;
        Ok(MethodSignature {
            name: self.lease(method.name.to_string()),
            descriptor: self.lease(method.descriptor.to_string()),
        })
    }

    fn attach_current_thread(&self) -> Result<(), IntrospectionError> {
        self.attached.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Classes shaped like the game's: a few unrelated ones around the class that owns the
/// native methods under test.
pub fn game_runtime() -> MockRuntime {
    MockRuntime::with_classes(vec![
        MockClass {
            descriptor: "Ljava/lang/Object;",
            methods: vec![MockMethod {
                name: "hashCode",
                descriptor: "()I",
            }],
        },
        MockClass {
            descriptor: "Lzombie/core/Core;",
            methods: vec![
                MockMethod {
                    name: "setFrame",
                    descriptor: "(J)V",
                },
                MockMethod {
                    name: "setFrame",
                    descriptor: "(IF)V",
                },
                MockMethod {
                    name: "getVersion",
                    descriptor: "()Ljava/lang/String;",
                },
            ],
        },
        MockClass {
            descriptor: "Lfmod/javafmodJNI;",
            methods: vec![MockMethod {
                name: "FMOD_System_Create",
                descriptor: "(J)I",
            }],
        },
    ])
}

pub struct Harness {
    pub platform: Arc<MockPlatform>,
    pub emulator: Arc<MockEmulator>,
    pub runtime: Arc<MockRuntime>,
    pub context: LinkerContext,
}

pub fn harness(platform: MockPlatform, emulator: MockEmulator, runtime: MockRuntime) -> Harness {
    let platform = Arc::new(platform);
    let emulator = Arc::new(emulator);
    let runtime = Arc::new(runtime);
    let context = LinkerContext::with_page_size(
        LinkerConfig::default(),
        platform.clone(),
        emulator.clone(),
        runtime.clone(),
        PAGE_SIZE,
    )
    .expect("context should build");
    Harness {
        platform,
        emulator,
        runtime,
        context,
    }
}
