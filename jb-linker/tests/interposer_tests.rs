mod common;

use std::collections::HashMap;
use std::ffi::CString;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;

use common::*;
use linker::{LibraryState, LinkerSnapshot};

const RTLD_NOW: i32 = 0x2;
const RTLD_GLOBAL: i32 = 0x100;

fn c(text: &str) -> CString {
    CString::new(text).expect("test strings have no NUL")
}

#[test]
fn repeated_opens_reuse_the_emulated_handle() {
    let h = harness(
        MockPlatform::default(),
        MockEmulator::default(),
        game_runtime(),
    );
    let name = c("/data/app/lib/libPZBullet64.so");

    let first = h.context.open(Some(&name), RTLD_NOW, 0);
    let second = h.context.open(Some(&name), RTLD_NOW | RTLD_GLOBAL, 0);

    assert_eq!(first, Some(EMULATED_HANDLE));
    assert_eq!(second, first);
    assert_eq!(h.emulator.load_count(), 1);
    assert_eq!(h.emulator.events(), vec!["suspend", "replay", "restore"]);

    let loads = h.emulator.loads.lock().expect("emulator lock").clone();
    assert_eq!(loads[0].0, "/data/app/lib/libPZBullet64.so");
    assert_eq!(
        loads[0].1,
        LoadFlags {
            bind_now: true,
            local: true
        }
    );

    let slot = h.context.slot("PZBullet64").expect("slot exists");
    assert_eq!(
        slot.binding().map(|binding| binding.kind),
        Some(BindingKind::Emulated)
    );
    // the check for a native build happened once, through `exists`, not `open`
    assert!(h.platform.opened().is_empty());
}

#[test]
fn native_builds_are_preferred_when_present() {
    let h = harness(
        MockPlatform::with_native(&["android/arm64-v8a/libPZClipper64.so"]),
        MockEmulator::default(),
        game_runtime(),
    );
    let name = c("/data/app/lib/x86_64/libPZClipper64.so");

    let handle = h.context.open(Some(&name), RTLD_NOW, 0);
    assert_eq!(handle, Some(NATIVE_HANDLE_BASE + 1));
    assert_eq!(h.context.open(Some(&name), RTLD_NOW, 0), handle);

    assert_eq!(h.platform.opened(), vec!["android/arm64-v8a/libPZClipper64.so"]);
    assert_eq!(h.emulator.load_count(), 0);
    let slot = h.context.slot("PZClipper64").expect("slot exists");
    assert_eq!(
        slot.binding().map(|binding| binding.kind),
        Some(BindingKind::Native)
    );
}

#[test]
fn audio_integration_is_always_emulated() {
    let h = harness(
        MockPlatform::with_native(&["android/arm64-v8a/libfmodintegration64.so"]),
        MockEmulator::default(),
        game_runtime(),
    );

    let handle = h.context.open(Some(&c("libfmodintegration64.so")), RTLD_NOW, 0);
    assert_eq!(handle, Some(EMULATED_HANDLE));
    assert_eq!(h.emulator.load_count(), 1);
    assert!(h.platform.opened().is_empty());
}

#[test]
fn failed_loads_leave_the_library_unresolved() {
    let emulator = MockEmulator::default();
    emulator
        .fail_load
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let h = harness(MockPlatform::default(), emulator, game_runtime());
    let name = c("libLighting64.so");

    assert_eq!(h.context.open(Some(&name), RTLD_NOW, 0), None);
    assert_eq!(h.context.slot("Lighting64").and_then(|slot| slot.binding()), None);
    // deferred initializers only run after a successful load
    assert!(h.emulator.events().is_empty());

    h.emulator
        .fail_load
        .store(false, std::sync::atomic::Ordering::SeqCst);
    assert_eq!(h.context.open(Some(&name), RTLD_NOW, 0), Some(EMULATED_HANDLE));
    assert_eq!(h.emulator.load_count(), 2);
}

#[test]
fn filenames_select_the_longest_matching_library() {
    let h = harness(
        MockPlatform::default(),
        MockEmulator::default(),
        game_runtime(),
    );

    let handle = h
        .context
        .open(Some(&c("/data/app/lib/libPZBulletNoOpenGL64.so")), RTLD_NOW, 0)
        .expect("emulated open");
    let bound = |name: &str| h.context.slot(name).and_then(|slot| slot.binding());
    assert_eq!(bound("PZBulletNoOpenGL64").map(|binding| binding.handle), Some(handle));
    assert_eq!(bound("PZBullet64"), None);
    assert!(h.context.slot("libPZBullet64.so").is_none());
}

#[test]
fn concurrent_first_opens_load_once() {
    const THREADS: usize = 8;
    let emulator = MockEmulator {
        load_delay: Duration::from_millis(20),
        ..MockEmulator::default()
    };
    let h = harness(MockPlatform::default(), emulator, game_runtime());
    let name = c("libLighting64.so");
    let start = Barrier::new(THREADS);

    let handles: Vec<Option<usize>> = thread::scope(|scope| {
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    start.wait();
                    h.context.open(Some(&name), RTLD_NOW, 0)
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().expect("opener panicked"))
            .collect()
    });

    assert!(handles.iter().all(|handle| *handle == Some(EMULATED_HANDLE)));
    assert_eq!(h.emulator.load_count(), 1);
    assert_eq!(h.emulator.events(), vec!["suspend", "replay", "restore"]);
}

#[test]
fn failed_native_opens_are_not_cached() {
    let platform = MockPlatform {
        fail_native_open: true,
        ..MockPlatform::with_native(&["android/arm64-v8a/libRakNet64.so"])
    };
    let h = harness(platform, MockEmulator::default(), game_runtime());

    assert_eq!(h.context.open(Some(&c("libRakNet64.so")), RTLD_NOW, 0), None);
    assert_eq!(h.context.slot("RakNet64").and_then(|slot| slot.binding()), None);
    assert_eq!(h.emulator.load_count(), 0);
}

#[test]
fn unknown_libraries_go_to_the_platform() {
    let h = harness(
        MockPlatform::default(),
        MockEmulator::default(),
        game_runtime(),
    );

    assert_eq!(h.context.open(Some(&c("libc.so")), RTLD_NOW, 0), Some(PASSTHROUGH_HANDLE));
    assert_eq!(h.context.open(None, RTLD_NOW, 0), Some(PASSTHROUGH_HANDLE));
    assert_eq!(h.platform.opened(), vec!["libc.so".to_string(), String::new()]);
    assert_eq!(h.emulator.load_count(), 0);
}

#[test]
fn vulkan_opens_are_redirected_once_handles_are_installed() {
    let h = harness(
        MockPlatform::default(),
        MockEmulator::default(),
        game_runtime(),
    );
    let loader = c("libvulkan.so");
    let driver = c("vulkan.adreno.so");

    assert_eq!(h.context.open(Some(&loader), RTLD_NOW, 0), Some(PASSTHROUGH_HANDLE));

    h.context.set_vulkan_loader_handle(0xAAAA);
    h.context.set_vulkan_driver_handle(0xBBBB);

    assert_eq!(h.context.open(Some(&loader), RTLD_NOW, 0), Some(0xAAAA));
    assert_eq!(h.context.open_ext(&driver, RTLD_NOW, None, 0), Some(0xBBBB));
    assert_eq!(h.context.open_vendor(&driver, RTLD_NOW, 0), Some(0xBBBB));
    // plain opens only redirect the exact loader name
    assert_eq!(
        h.context.open(Some(&c("/system/lib64/libvulkan.so")), RTLD_NOW, 0),
        Some(PASSTHROUGH_HANDLE)
    );
    assert_eq!(h.context.open(Some(&driver), RTLD_NOW, 0), Some(PASSTHROUGH_HANDLE));
    assert!(h.platform.ext_opened.lock().expect("platform lock").is_empty());

    let snapshot = h.context.snapshot();
    assert!(snapshot.vulkan_loader_installed);
    assert!(snapshot.vulkan_driver_installed);
}

#[test]
fn vendor_opens_use_the_first_exported_namespace() {
    let platform = MockPlatform {
        namespaces: HashMap::from([("vendor".to_string(), 0x44), ("default".to_string(), 0x55)]),
        ..MockPlatform::default()
    };
    let h = harness(platform, MockEmulator::default(), game_runtime());

    let handle = h.context.open_vendor(&c("libgralloc.so"), RTLD_NOW, 0);
    assert_eq!(handle, Some(PASSTHROUGH_HANDLE));
    let opened = h.platform.ext_opened.lock().expect("platform lock").clone();
    assert_eq!(opened, vec![("libgralloc.so".to_string(), Some(0x44))]);
}

#[test]
fn vendor_namespace_open_works_without_a_context() {
    let platform = MockPlatform {
        namespaces: HashMap::from([("sphal".to_string(), 0x33)]),
        ..MockPlatform::default()
    };
    let namespaces = LinkerConfig::default().vendor_namespaces;

    let handle = linker::open_in_vendor_namespace(
        &platform,
        &namespaces,
        &c("vulkan.mali.so"),
        RTLD_NOW,
        0,
    );
    assert_eq!(handle, Some(PASSTHROUGH_HANDLE));
    let opened = platform.ext_opened.lock().expect("platform lock").clone();
    assert_eq!(opened, vec![("vulkan.mali.so".to_string(), Some(0x33))]);
}

#[test]
fn vendor_opens_without_namespaces_still_reach_the_platform() {
    let h = harness(
        MockPlatform::default(),
        MockEmulator::default(),
        game_runtime(),
    );

    h.context.open_vendor(&c("libgralloc.so"), RTLD_NOW, 0);
    let opened = h.platform.ext_opened.lock().expect("platform lock").clone();
    assert_eq!(opened, vec![("libgralloc.so".to_string(), Some(0))]);
}

#[test]
fn symbols_of_other_handles_pass_through() {
    let h = harness(
        MockPlatform::with_native(&["android/arm64-v8a/libPZPopMan64.so"]),
        MockEmulator::default(),
        game_runtime(),
    );
    let native = h
        .context
        .open(Some(&c("libPZPopMan64.so")), RTLD_NOW, 0)
        .expect("native open");

    let symbol = c("Java_zombie_popman_ZombiePopulationManager_n_1init");
    assert_eq!(h.context.symbol(native, &symbol, 0), Some(PASSTHROUGH_SYMBOL));
    assert_eq!(h.context.symbol(0, &symbol, 0), Some(PASSTHROUGH_SYMBOL));
    assert_eq!(h.context.symbol(0x1234, &c("glClear"), 0), Some(PASSTHROUGH_SYMBOL));

    let looked_up = h.platform.looked_up.lock().expect("platform lock").clone();
    assert_eq!(looked_up.len(), 3);
    assert_eq!(looked_up[0].0, native);
}

#[test]
fn missing_emulated_symbols_resolve_to_nothing() {
    let h = harness(
        MockPlatform::default(),
        MockEmulator::default(),
        game_runtime(),
    );
    let handle = h
        .context
        .open(Some(&c("libPZPathFind64.so")), RTLD_NOW, 0)
        .expect("emulated open");

    assert_eq!(h.context.symbol(handle, &c("Java_a_B_c"), 0), None);
    assert!(h.platform.looked_up.lock().expect("platform lock").is_empty());
    assert_eq!(h.runtime.class_listings(), 0);
}

#[test]
fn snapshot_reports_library_states() {
    let h = harness(
        MockPlatform::with_native(&["android/arm64-v8a/libPZClipper64.so"]),
        MockEmulator::default(),
        game_runtime(),
    );
    h.context.open(Some(&c("libPZClipper64.so")), RTLD_NOW, 0);
    h.context.open(Some(&c("libPZBullet64.so")), RTLD_NOW, 0);

    let snapshot = h.context.snapshot();
    let state_of = |name: &str| {
        snapshot
            .libraries
            .iter()
            .find(|library| library.name == name)
            .map(|library| library.state)
    };
    assert_eq!(state_of("PZClipper64"), Some(LibraryState::NativeBound));
    assert_eq!(state_of("PZBullet64"), Some(LibraryState::EmulatedBound));
    assert_eq!(state_of("Lighting64"), Some(LibraryState::Unresolved));
    assert_eq!(snapshot.signature_cache_capacity, 32);
    assert!(!snapshot.vulkan_loader_installed);

    let json = h.context.dump_json().expect("snapshot should serialize");
    assert!(json.contains("\"emulated_bound\""));
    assert!(json.contains("\"0xe0000000\""));
    let parsed: LinkerSnapshot = serde_json::from_str(&json).expect("snapshot should parse");
    assert_eq!(parsed, snapshot);
}

#[cfg(any(target_os = "linux", target_os = "android"))]
mod bridging {
    use super::*;
    use bridge_abi::AUDIO_SYSTEM_CREATE_SYMBOL;

    // second successful load in `emulated_harness`
    const FMOD_HANDLE: usize = EMULATED_HANDLE + 0x1000;
    const CORE_FUNCTION: u64 = 0x0040_1000;
    const CREATE_FUNCTION: u64 = 0x0040_2000;

    fn emulated_harness() -> Harness {
        let h = harness(
            MockPlatform::default(),
            MockEmulator::with_symbols(&[
                (CORE_SYMBOL, CORE_FUNCTION),
                (AUDIO_SYSTEM_CREATE_SYMBOL, CREATE_FUNCTION),
                ("Java_zombie_core_Core_vanished", 0x0040_3000),
            ]),
            game_runtime(),
        );
        h.context.open(Some(&c("libPZBullet64.so")), RTLD_NOW, 0);
        h.context.open(Some(&c("libfmodintegration64.so")), RTLD_NOW, 0);
        h
    }

    #[test]
    fn emulated_symbols_get_stubs() {
        let h = emulated_harness();
        let slot = h.context.slot("PZBullet64").expect("slot exists");

        let stub = h
            .context
            .symbol(EMULATED_HANDLE, &c(CORE_SYMBOL), 0)
            .expect("symbol should bridge");
        assert_ne!(stub, 0);
        assert_eq!(slot.page_count(), 1);
        assert!(slot.bytes_used() > 0);
        assert_eq!(
            h.context.resolver().cache().get(CORE_SYMBOL).as_deref(),
            Some(CORE_DESCRIPTOR)
        );

        // a second lookup builds a fresh stub from the cached descriptor
        let again = h
            .context
            .symbol(EMULATED_HANDLE, &c(CORE_SYMBOL), 0)
            .expect("symbol should bridge again");
        assert_ne!(again, stub);
        assert_eq!(h.runtime.class_listings(), 1);
        assert_eq!(h.runtime.live_allocations(), 0);
        assert!(h.platform.looked_up.lock().expect("platform lock").is_empty());
        assert!(
            h.emulator
                .lookups()
                .iter()
                .all(|(library, symbol)| *library == EMULATED_HANDLE && symbol == CORE_SYMBOL)
        );
    }

    #[test]
    fn audio_system_creation_attaches_the_thread() {
        let h = emulated_harness();

        let stub = h
            .context
            .symbol(FMOD_HANDLE, &c(AUDIO_SYSTEM_CREATE_SYMBOL), 0);
        assert!(stub.is_some());
        assert_eq!(h.runtime.attached.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(
            h.emulator.lookups(),
            vec![(FMOD_HANDLE, AUDIO_SYSTEM_CREATE_SYMBOL.to_string())]
        );

        h.context.symbol(EMULATED_HANDLE, &c(CORE_SYMBOL), 0);
        assert_eq!(h.runtime.attached.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn audio_device_queries_are_served_by_the_host() {
        let h = emulated_harness();
        let symbol = c("Java_org_fmod_FMODAudioDevice_getAudioDevices");

        let stub = h.context.symbol(FMOD_HANDLE, &symbol, 0);
        assert!(stub.is_some());
        assert_eq!(h.runtime.class_listings(), 0);
        let slot = h.context.slot("fmodintegration64").expect("slot exists");
        assert_eq!(slot.page_count(), 1);

        // the same symbol name in a game library is looked up like any other
        assert_eq!(h.context.symbol(EMULATED_HANDLE, &symbol, 0), None);
        assert_eq!(h.context.resolver().cache().len(), 0);
    }

    #[test]
    fn concurrent_lookups_get_disjoint_stubs() {
        const SYMBOLS: [(&str, &str); 4] = [
            ("Java_zombie_core_Core_setFrame__J", "(J)V"),
            ("Java_zombie_core_Core_setFrame__IF", "(IF)V"),
            ("Java_zombie_core_Core_setFrame", "(J)V"),
            ("Java_zombie_core_Core_getVersion", "()Ljava/lang/String;"),
        ];
        const ROUNDS: usize = 2;
        let emulator = MockEmulator::with_symbols(
            &SYMBOLS
                .iter()
                .enumerate()
                .map(|(index, (symbol, _))| (*symbol, 0x0041_0000 + index as u64 * 0x100))
                .collect::<Vec<_>>(),
        );
        let h = harness(MockPlatform::default(), emulator, game_runtime());
        h.context.open(Some(&c("libPZBullet64.so")), RTLD_NOW, 0);
        let symbols = SYMBOLS;
        let start = Barrier::new(symbols.len() * ROUNDS);

        let mut stubs: Vec<(usize, usize)> = thread::scope(|scope| {
            let workers: Vec<_> = (0..ROUNDS)
                .flat_map(|_| symbols.iter())
                .map(|(symbol, descriptor)| {
                    let (h, start) = (&h, &start);
                    scope.spawn(move || {
                        let name = c(symbol);
                        start.wait();
                        let stub = h
                            .context
                            .symbol(EMULATED_HANDLE, &name, 0)
                            .expect("symbol should bridge");
                        (stub, stub_len(h, descriptor))
                    })
                })
                .collect();
            workers
                .into_iter()
                .map(|worker| worker.join().expect("resolver panicked"))
                .collect()
        });

        stubs.sort_unstable();
        for pair in stubs.windows(2) {
            let ((first, len), (next, _)) = (pair[0], pair[1]);
            assert!(first + len <= next, "stub at {first:#x} overlaps {next:#x}");
        }
        let slot = h.context.slot("PZBullet64").expect("slot exists");
        assert_eq!(slot.page_count(), 1);
        assert_eq!(
            slot.bytes_used(),
            stubs.iter().map(|(_, len)| len).sum::<usize>()
        );
        assert_eq!(h.runtime.live_allocations(), 0);
    }

    fn stub_len(h: &Harness, descriptor: &str) -> usize {
        let signature = codegen::decode_descriptor(descriptor)
            .expect("descriptor should decode")
            .with_jni_prefix();
        let target = codegen::TrampolineTarget {
            env: h.emulator.env,
            dispatcher: h.emulator.dispatcher,
            function: 0,
        };
        codegen::assemble(&signature, target)
            .expect("stub should assemble")
            .len()
    }

    #[test]
    fn unresolvable_methods_produce_no_stub() {
        let h = emulated_harness();
        let slot = h.context.slot("PZBullet64").expect("slot exists");

        let stub = h
            .context
            .symbol(EMULATED_HANDLE, &c("Java_zombie_core_Core_vanished"), 0);
        assert_eq!(stub, None);
        assert_eq!(slot.page_count(), 0);
        assert!(h.context.resolver().cache().is_empty());
        assert_eq!(h.runtime.live_allocations(), 0);
    }

    #[cfg(target_arch = "aarch64")]
    mod native {
        use super::*;
        use std::ffi::{CStr, c_char};
        use std::sync::Mutex;

        static SEEN: Mutex<Option<(u64, String, u64, i64, f64)>> = Mutex::new(None);

        extern "C" fn record_dispatch(
            function: u64,
            tags: *const c_char,
            env: u64,
            _receiver: u64,
            value: i64,
            scale: f64,
        ) -> u64 {
            let tags = unsafe { CStr::from_ptr(tags) }.to_string_lossy().into_owned();
            *SEEN.lock().expect("dispatch lock") = Some((function, tags, env, value, scale));
            0
        }

        #[test]
        fn bridged_stub_reaches_the_formatted_call_entry() {
            let emulator = MockEmulator {
                dispatcher: record_dispatch as usize as u64,
                ..MockEmulator::with_symbols(&[(CORE_SYMBOL, CORE_FUNCTION)])
            };
            let env = emulator.env;
            let h = harness(MockPlatform::default(), emulator, game_runtime());
            h.context.open(Some(&c("libPZBullet64.so")), RTLD_NOW, 0);

            let stub = h
                .context
                .symbol(EMULATED_HANDLE, &c(CORE_SYMBOL), 0)
                .expect("symbol should bridge");
            type SetFrame = unsafe extern "C" fn(u64, u64, i32, f32);
            let entry = unsafe { std::mem::transmute::<usize, SetFrame>(stub) };
            unsafe { entry(0x1111, 0x2222, 42, 0.5) };

            let seen = SEEN.lock().expect("dispatch lock").clone();
            assert_eq!(
                seen,
                Some((CORE_FUNCTION, "ppif".to_string(), env, 42, 0.5))
            );
        }
    }
}
