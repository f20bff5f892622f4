//! Engine configuration for the Gram codec bindings
//!
//! The engine is the compilation unit shared by every instance the loader
//! creates.

use crate::error::{BindingError, BindingResult};
use crate::limits::DEFAULT_MEMORY_LIMIT;
use crate::marshal::DEFAULT_DECODE_CEILING;
use crate::module::GuestModule;
use crate::table::DEFAULT_TABLE_GROWTH;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use wasmtime::{Config, Engine, OptLevel};

/// Size of a wasm32 memory page
pub const WASM_PAGE_SIZE: usize = 64 * 1024;

/// Default location of the guest binary used by [`crate::global::init_default`]
pub const DEFAULT_MODULE_PATH: &str = "gram_codec_bg.wasm";

/// Cranelift optimization level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationLevel {
    None,
    #[default]
    Speed,
    SpeedAndSize,
}

impl From<OptimizationLevel> for OptLevel {
    fn from(level: OptimizationLevel) -> Self {
        match level {
            OptimizationLevel::None => OptLevel::None,
            OptimizationLevel::Speed => OptLevel::Speed,
            OptimizationLevel::SpeedAndSize => OptLevel::SpeedAndSize,
        }
    }
}

/// Configuration for loading and running the codec guest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingConfig {
    /// Optimization level
    pub opt_level: OptimizationLevel,
    /// Enable parallel compilation
    pub parallel_compilation: bool,
    /// Compile responses directly when they are served as `application/wasm`
    pub streaming_compilation: bool,
    /// Maximum guest linear memory in bytes
    pub memory_limit: usize,
    /// Decoded bytes after which the UTF-8 decoder is rebuilt
    pub decode_ceiling: usize,
    /// Slots added to the reference table when it runs full
    pub table_growth: u32,
    /// Guest binary loaded by `init_default`
    pub default_module: PathBuf,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            opt_level: OptimizationLevel::Speed,
            parallel_compilation: true,
            streaming_compilation: true,
            memory_limit: DEFAULT_MEMORY_LIMIT,
            decode_ceiling: DEFAULT_DECODE_CEILING,
            table_growth: DEFAULT_TABLE_GROWTH,
            default_module: PathBuf::from(DEFAULT_MODULE_PATH),
        }
    }
}

impl BindingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Development configuration (faster compilation, less optimization)
    pub fn development() -> Self {
        Self {
            opt_level: OptimizationLevel::None,
            ..Self::default()
        }
    }

    /// Production configuration
    pub fn production() -> Self {
        Self {
            opt_level: OptimizationLevel::SpeedAndSize,
            ..Self::default()
        }
    }

    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = bytes;
        self
    }

    pub fn with_decode_ceiling(mut self, bytes: usize) -> Self {
        self.decode_ceiling = bytes;
        self
    }

    pub fn with_table_growth(mut self, slots: u32) -> Self {
        self.table_growth = slots;
        self
    }

    pub fn with_default_module(mut self, path: impl Into<PathBuf>) -> Self {
        self.default_module = path.into();
        self
    }

    pub fn without_streaming(mut self) -> Self {
        self.streaming_compilation = false;
        self
    }

    /// Parse a configuration from TOML; missing keys keep their defaults
    pub fn from_toml_str(source: &str) -> BindingResult<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| BindingError::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file
    pub async fn load(path: impl AsRef<Path>) -> BindingResult<Self> {
        let source = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> BindingResult<()> {
        if self.memory_limit < WASM_PAGE_SIZE {
            return Err(BindingError::Config(format!(
                "memory_limit must be at least one page ({} bytes), got {}",
                WASM_PAGE_SIZE,
                self.memory_limit
            )));
        }
        if self.table_growth == 0 {
            return Err(BindingError::Config(
                "table_growth must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Build wasmtime Config from our config
    fn to_wasmtime_config(&self) -> Config {
        let mut config = Config::new();

        config.parallel_compilation(self.parallel_compilation);
        config.cranelift_opt_level(self.opt_level.into());

        config.memory_init_cow(true);

        config
    }
}

/// Wasmtime engine plus the configuration it was built from
#[derive(Clone)]
pub struct CodecEngine {
    engine: Engine,
    config: BindingConfig,
}

impl CodecEngine {
    pub fn new(config: BindingConfig) -> BindingResult<Self> {
        config.validate()?;
        let engine = Engine::new(&config.to_wasmtime_config()).map_err(|e| {
            BindingError::compilation(format!("Failed to create wasmtime engine: {}", e))
        })?;
        Ok(Self { engine, config })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &BindingConfig {
        &self.config
    }

    /// Compile guest bytes and check the export contract
    pub fn compile(&self, bytes: &[u8]) -> BindingResult<GuestModule> {
        GuestModule::from_bytes(self, bytes)
    }
}

impl std::fmt::Debug for CodecEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecEngine")
            .field("config", &self.config)
            .finish()
    }
}
