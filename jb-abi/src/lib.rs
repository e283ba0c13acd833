/// What a known library is used for. The role decides how the loader binds it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LibraryRole {
    Game,
    AudioIntegration,
    TestHarness,
}

/// How the first open of a known library is satisfied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResolutionPolicy {
    /// Use a same-ISA build when one exists on disk, otherwise emulate.
    PreferNative,
    /// Always load through the emulator.
    AlwaysEmulated,
}

impl LibraryRole {
    pub fn policy(self) -> ResolutionPolicy {
        match self {
            // The native audio build does not expose the classes the game expects.
            LibraryRole::AudioIntegration => ResolutionPolicy::AlwaysEmulated,
            LibraryRole::Game | LibraryRole::TestHarness => ResolutionPolicy::PreferNative,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LibraryRole::Game => "game",
            LibraryRole::AudioIntegration => "audio_integration",
            LibraryRole::TestHarness => "test_harness",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KnownLibrary {
    pub index: u16,
    pub name: &'static str,
    pub role: LibraryRole,
}

impl KnownLibrary {
    pub fn policy(&self) -> ResolutionPolicy {
        self.role.policy()
    }

    /// Requested filenames are matched by substring, so `libPZBullet64.so` and
    /// `/data/app/lib/libPZBullet64.so` both select `PZBullet64`.
    pub fn matches(&self, filename: &str) -> bool {
        filename.contains(self.name)
    }
}

/// Prefix every exported native-method symbol carries.
pub const JNI_EXPORT_PREFIX: &str = "Java_";

/// Symbol fragment for the audio-device enumeration entry point that is served by a
/// host-side stub instead of the emulated library.
pub const AUDIO_DEVICES_SYMBOL_FRAGMENT: &str = "getAudioDevices";

/// Audio system creation entry point. The emulated library calls back into managed code
/// from the thread that resolves it.
pub const AUDIO_SYSTEM_CREATE_SYMBOL: &str = "Java_fmod_javafmodJNI_FMOD_1System_1Create";

pub const LIB_PZ_CLIPPER: u16 = 0;
pub const LIB_PZ_BULLET: u16 = 1;
pub const LIB_PZ_BULLET_NO_GL: u16 = 2;
pub const LIB_LIGHTING: u16 = 3;
pub const LIB_PZ_PATH_FIND: u16 = 4;
pub const LIB_PZ_POP_MAN: u16 = 5;
pub const LIB_FMOD_INTEGRATION: u16 = 6;
pub const LIB_TEST_HARNESS: u16 = 7;
pub const LIB_RAKNET: u16 = 8;
pub const LIB_ZNET_NO_STEAM: u16 = 9;

pub const LIBRARIES: [KnownLibrary; 10] = [
    KnownLibrary {
        index: LIB_PZ_CLIPPER,
        name: "PZClipper64",
        role: LibraryRole::Game,
    },
    KnownLibrary {
        index: LIB_PZ_BULLET,
        name: "PZBullet64",
        role: LibraryRole::Game,
    },
    KnownLibrary {
        index: LIB_PZ_BULLET_NO_GL,
        name: "PZBulletNoOpenGL64",
        role: LibraryRole::Game,
    },
    KnownLibrary {
        index: LIB_LIGHTING,
        name: "Lighting64",
        role: LibraryRole::Game,
    },
    KnownLibrary {
        index: LIB_PZ_PATH_FIND,
        name: "PZPathFind64",
        role: LibraryRole::Game,
    },
    KnownLibrary {
        index: LIB_PZ_POP_MAN,
        name: "PZPopMan64",
        role: LibraryRole::Game,
    },
    KnownLibrary {
        index: LIB_FMOD_INTEGRATION,
        name: "fmodintegration64",
        role: LibraryRole::AudioIntegration,
    },
    KnownLibrary {
        index: LIB_TEST_HARNESS,
        name: "zomdroidtest",
        role: LibraryRole::TestHarness,
    },
    KnownLibrary {
        index: LIB_RAKNET,
        name: "RakNet64",
        role: LibraryRole::Game,
    },
    KnownLibrary {
        index: LIB_ZNET_NO_STEAM,
        name: "ZNetNoSteam",
        role: LibraryRole::Game,
    },
];

fn libraries_by_name() -> &'static std::collections::HashMap<&'static str, &'static KnownLibrary>
{
    static LOOKUP: std::sync::OnceLock<
        std::collections::HashMap<&'static str, &'static KnownLibrary>,
    > = std::sync::OnceLock::new();
    LOOKUP.get_or_init(|| {
        let mut map = std::collections::HashMap::with_capacity(LIBRARIES.len());
        for library in LIBRARIES.iter() {
            map.insert(library.name, library);
        }
        map
    })
}

/// Exact library name, without `lib` prefix or extension.
pub fn library_by_name(name: &str) -> Option<&'static KnownLibrary> {
    libraries_by_name().get(name).copied()
}

/// First known library whose name occurs in `filename`, in table order.
pub fn library_for_filename(filename: &str) -> Option<&'static KnownLibrary> {
    LIBRARIES.iter().find(|library| library.matches(filename))
}
