//! WebAssembly sandbox for formatter modules.
//!
//! Each formatter module is compiled once and instantiated into its own store
//! with a freshly allocated, fixed-size linear memory. Nothing is shared between
//! instances: the memory, the host state and the record of serviced reads all
//! live and die with the [`SandboxInstance`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use formatter_harness::wasm::{FormatterSandbox, SandboxConfig};
//! use formatter_harness::inferior::FixtureMemory;
//!
//! let sandbox = FormatterSandbox::new(SandboxConfig::default())?;
//! let module = sandbox.load_module("formatter.wasm")?;
//! let mut instance = sandbox.instantiate(&module, Arc::new(FixtureMemory::zeroed()))?;
//! let output = instance.format()?.value;
//! println!("{}", output.text);
//! ```

mod config;
mod host_functions;
mod runtime;

pub use config::{ModuleAbi, ResultEncoding, SandboxConfig, PAGE_SIZE};
pub use runtime::{
    required_pages, CallResult, FormatConvention, FormatOutput, FormatterModule,
    FormatterSandbox, HostState, MemoryImport, SandboxInstance,
};

#[cfg(test)]
mod tests;
