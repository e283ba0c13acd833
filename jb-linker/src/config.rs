use std::env;

use serde::{Deserialize, Serialize};

use crate::error::{LinkerError, LinkerResult};

/// JSON file with a full or partial [`LinkerConfig`].
pub const CONFIG_PATH_ENV: &str = "JB_LINKER_CONFIG";
pub const NATIVE_LIBRARY_DIR_ENV: &str = "JB_NATIVE_LIBRARY_DIR";
pub const SIGNATURE_CACHE_CAPACITY_ENV: &str = "JB_SIGNATURE_CACHE_CAPACITY";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkerConfig {
    /// Directory searched for same-ISA builds, relative to the working directory.
    pub native_library_dir: String,
    pub signature_cache_capacity: usize,
    /// Exact filename answered with the host-installed vulkan loader handle.
    pub vulkan_loader_name: String,
    /// Filename fragment answered with the host-installed vulkan driver handle.
    pub vulkan_driver_fragment: String,
    /// Namespaces tried in order for vendor-namespace opens.
    pub vendor_namespaces: Vec<String>,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            native_library_dir: "android/arm64-v8a".to_string(),
            signature_cache_capacity: 32,
            vulkan_loader_name: "libvulkan.so".to_string(),
            vulkan_driver_fragment: "vulkan.".to_string(),
            vendor_namespaces: vec![
                "sphal".to_string(),
                "vendor".to_string(),
                "default".to_string(),
            ],
        }
    }
}

impl LinkerConfig {
    pub fn from_env() -> LinkerResult<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Same as [`LinkerConfig::from_env`] with variables read through `lookup`.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> LinkerResult<Self> {
        let mut config = match lookup(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(path.trim())?,
            None => Self::default(),
        };

        if let Some(dir) = lookup(NATIVE_LIBRARY_DIR_ENV) {
            config.native_library_dir = dir.trim().to_string();
        }
        config.signature_cache_capacity = parse_usize(
            lookup(SIGNATURE_CACHE_CAPACITY_ENV),
            SIGNATURE_CACHE_CAPACITY_ENV,
            config.signature_cache_capacity,
        )?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &str) -> LinkerResult<Self> {
        let bytes = std::fs::read(path)
            .map_err(|err| LinkerError::Config(format!("failed to read {path}: {err}")))?;
        Self::from_json(&bytes).map_err(|err| LinkerError::Config(format!("{path}: {err}")))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn validate(&self) -> LinkerResult<()> {
        if self.signature_cache_capacity == 0 {
            return Err(LinkerError::Config(
                "signature_cache_capacity must be at least 1".to_string(),
            ));
        }
        if self.vulkan_loader_name.is_empty() || self.vulkan_driver_fragment.is_empty() {
            return Err(LinkerError::Config(
                "vulkan loader name and driver fragment must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_usize(value: Option<String>, key: &str, default: usize) -> LinkerResult<usize> {
    match value {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|err| LinkerError::Config(format!("{key}={value}: {err}"))),
        None => Ok(default),
    }
}
