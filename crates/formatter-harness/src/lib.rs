//! # Formatter Harness
//!
//! Test-execution harness for variable formatters compiled to WebAssembly.
//!
//! A debugger plugin answers "how do I print this variable?" with a small
//! WebAssembly module. This crate takes the plugin's framed responses, runs
//! every embedded module in an isolated sandbox against a canned inferior
//! address space, and prints what the module produced so it can be compared
//! against expected text.
//!
//! ## Pipeline
//!
//! ```text
//! framed input → MessageFramer → Message (base64 → ModuleImage)
//!              → FormatterSandbox::instantiate → SandboxInstance::format
//!              → result string read from sandbox memory
//! ```
//!
//! | Stage | Module | Responsibility |
//! |-------|--------|----------------|
//! | Framing | [`framing`] | `Content-Length` frames → JSON values |
//! | Payload | [`payload`], [`message`] | base64 module images, message classification |
//! | Sandbox | [`wasm`] | memory sizing, host callbacks, entry-point dispatch |
//! | Result | [`result`] | null-terminated / length-prefixed strings |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use formatter_harness::{FixtureMemory, Harness, SandboxConfig};
//! use std::sync::Arc;
//!
//! let inferior = Arc::new(FixtureMemory::repeating([0, 1, 0, 0]));
//! let harness = Harness::new(SandboxConfig::default(), inferior)?;
//! harness.run(&input, &mut std::io::stdout())?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod framing;
pub mod harness;
pub mod inferior;
pub mod message;
pub mod payload;
pub mod result;
pub mod wasm;

// Re-export main types
pub use error::{HarnessError, Result};
pub use framing::{encode_frame, MessageFramer};
pub use harness::{Harness, RunOptions, RunSummary};
pub use inferior::{FixtureMemory, InferiorMemory, MemoryReadRequest};
pub use message::Message;
pub use payload::ModuleImage;
pub use result::read_c_string;
pub use wasm::{
    FormatConvention, FormatOutput, FormatterModule, FormatterSandbox, ModuleAbi, ResultEncoding,
    SandboxConfig, SandboxInstance,
};
