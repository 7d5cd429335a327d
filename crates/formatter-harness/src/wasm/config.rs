//! Configuration for the formatter sandbox.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// Size of one WebAssembly page in bytes.
pub const PAGE_SIZE: u64 = 64 * 1024;

/// How the formatter leaves its result in memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultEncoding {
    /// Bytes up to the first zero
    #[default]
    NullTerminated,
    /// Little-endian u32 length followed by the bytes
    LengthPrefixed,
}

/// Names of the imports and exports a formatter module is linked against.
///
/// The memory import is discovered from the module itself and is not named here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleAbi {
    /// Import module all host functions live in
    pub import_module: String,

    /// Memory-read callback: `(offset: i32, size: i32, dest: i32) -> ()`
    pub read_memory: String,

    /// Diagnostic hook: `(flag: i32, value: i32) -> ()`
    pub debug: String,

    /// Allocation primitive: `(increment: i32) -> i32`
    pub sbrk: String,

    /// Optional i32 global receiving the requested base offset
    pub memory_base: String,

    /// Exported global holding the scratch/result offset
    pub heap_base: String,

    /// Exported formatting entry point
    pub format: String,

    /// Result string layout
    pub result_encoding: ResultEncoding,
}

impl Default for ModuleAbi {
    fn default() -> Self {
        Self {
            import_module: "env".to_string(),
            read_memory: "__getMemory".to_string(),
            debug: "__debug".to_string(),
            sbrk: "sbrk".to_string(),
            memory_base: "__memory_base".to_string(),
            heap_base: "__heap_base".to_string(),
            format: "wasm_format".to_string(),
            result_encoding: ResultEncoding::NullTerminated,
        }
    }
}

impl ModuleAbi {
    /// Builder: set the format entry point name
    pub fn format_export(mut self, name: impl Into<String>) -> Self {
        self.format = name.into();
        self
    }

    /// Builder: set the result encoding
    pub fn result_encoding(mut self, encoding: ResultEncoding) -> Self {
        self.result_encoding = encoding;
        self
    }
}

/// Configuration for the sandbox host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Linkage contract with formatter modules
    pub abi: ModuleAbi,

    /// Pages supplied on the first instantiation attempt
    pub initial_pages: u32,

    /// Upper bound on pages any module may be given
    pub max_pages: u32,

    /// Size the first attempt from the module's declared memory minimum
    pub static_sizing: bool,

    /// Requested base offset, handed to modules importing a memory base global
    pub base_offset: u32,

    /// Enable fuel-based execution limiting (None = run to completion)
    pub fuel_limit: Option<u64>,

    /// Cranelift optimization level (0-3)
    pub optimization_level: u8,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            abi: ModuleAbi::default(),
            initial_pages: 1,
            max_pages: 256, // 16 MB
            static_sizing: true,
            base_offset: 1024,
            fuel_limit: None,
            optimization_level: 2,
        }
    }
}

impl SandboxConfig {
    /// Config that discovers the memory size only through the linkage
    /// failure, with a small page cap and fuel limit.
    pub fn strict() -> Self {
        Self {
            static_sizing: false,
            max_pages: 16,
            fuel_limit: Some(100_000_000),
            ..Default::default()
        }
    }

    /// Config for development/debugging
    pub fn development() -> Self {
        Self {
            optimization_level: 0, // Faster compilation
            ..Default::default()
        }
    }

    /// Load a config from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| HarnessError::Config(format!("bad config {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the page bounds are consistent.
    pub fn validate(&self) -> Result<()> {
        if self.initial_pages == 0 {
            return Err(HarnessError::Config("initial_pages must be at least 1".into()));
        }
        if self.initial_pages > self.max_pages {
            return Err(HarnessError::Config(format!(
                "initial_pages {} exceeds max_pages {}",
                self.initial_pages, self.max_pages
            )));
        }
        Ok(())
    }

    /// Builder: set the module ABI
    pub fn abi(mut self, abi: ModuleAbi) -> Self {
        self.abi = abi;
        self
    }

    /// Builder: set the first-attempt page count
    pub fn initial_pages(mut self, pages: u32) -> Self {
        self.initial_pages = pages;
        self
    }

    /// Builder: set the page cap
    pub fn max_pages(mut self, pages: u32) -> Self {
        self.max_pages = pages;
        self
    }

    /// Builder: enable or disable static sizing
    pub fn static_sizing(mut self, enable: bool) -> Self {
        self.static_sizing = enable;
        self
    }

    /// Builder: set the requested base offset
    pub fn base_offset(mut self, offset: u32) -> Self {
        self.base_offset = offset;
        self
    }

    /// Builder: set fuel limit
    pub fn fuel_limit(mut self, fuel: u64) -> Self {
        self.fuel_limit = Some(fuel);
        self
    }

    /// Builder: set optimization level
    pub fn optimize(mut self, level: u8) -> Self {
        self.optimization_level = level.min(3);
        self
    }

    /// Byte limit corresponding to `max_pages`.
    pub fn max_memory_bytes(&self) -> usize {
        (u64::from(self.max_pages) * PAGE_SIZE) as usize
    }
}
