//! Compiler configuration
//!
//! Loaded from TOML. Every section falls back to its `Default` when absent,
//! so an empty file is a valid configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cache::{CompressionLevel, CompressionType};
use crate::error::ForgeResult;

/// Top level configuration for a compile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    pub proxy: ProxyCacheConfig,
    pub optimiser: OptimiserConfig,
    pub linker: LinkerConfig,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            proxy: ProxyCacheConfig::default(),
            optimiser: OptimiserConfig::default(),
            linker: LinkerConfig::default(),
        }
    }
}

impl ForgeConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> ForgeResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> ForgeResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&text)?;
        log::debug!("Loaded compiler configuration from {}", path.as_ref().display());
        Ok(config)
    }

    /// Serialise to TOML text
    pub fn to_toml_string(&self) -> ForgeResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Settings of the constant-resource disk proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyCacheConfig {
    /// When false, constants always stay resident
    pub enabled: bool,
    /// Serialised payloads at or below this size are never spilled
    pub min_proxy_file_size: u64,
    pub max_file_create_attempts: u32,
    /// Directory for spilled payloads; the system temp dir when unset
    pub temp_dir: Option<PathBuf>,
    pub compression: CompressionType,
    pub compression_level: CompressionLevel,
}

impl Default for ProxyCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_proxy_file_size: 64 * 1024,
            max_file_create_attempts: 256,
            temp_dir: None,
            compression: CompressionType::Lz4,
            compression_level: CompressionLevel::Fast,
        }
    }
}

impl ProxyCacheConfig {
    /// Directory that receives spilled payloads
    pub fn resolved_temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Settings of the AST optimiser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimiserConfig {
    pub enabled: bool,
    /// Push mesh format operations towards the leaves
    pub sink_mesh_formats: bool,
    pub max_iterations: u32,
}

impl Default for OptimiserConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sink_mesh_formats: true,
            max_iterations: 8,
        }
    }
}

/// Settings of the program linker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkerConfig {
    /// Store every mip of an image constant as its own deduplicated entry
    pub separate_image_mips: bool,
    /// Share one constant slot between byte-identical mesh and image constants
    pub deduplicate_constants: bool,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            separate_image_mips: false,
            deduplicate_constants: true,
        }
    }
}
