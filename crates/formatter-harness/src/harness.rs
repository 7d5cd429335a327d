//! End-to-end driver: framed input in, comparable text out.
//!
//! For each module-bearing message the harness prints
//!
//! ```text
//! Heap base: <offset>
//! Result at: <offset>
//! Result: <formatted value>
//! ```
//!
//! Any other message is echoed as JSON. Messages are processed strictly one at
//! a time; every module gets its own instance, which is dropped before the next
//! message is looked at.

use std::io::Write;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::error::Result;
use crate::framing::MessageFramer;
use crate::inferior::InferiorMemory;
use crate::message::Message;
use crate::wasm::{FormatOutput, FormatterSandbox, SandboxConfig};

/// Output switches for a harness run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Print a `Reading <size> bytes from offset <offset>` line per serviced read
    pub trace_reads: bool,
    /// Print the number of framed messages before processing them
    pub count_messages: bool,
}

/// Totals for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Messages framed
    pub messages: usize,
    /// Modules executed
    pub modules: usize,
    /// Messages echoed unchanged
    pub diagnostics: usize,
    /// Unparsed bytes at the end of input
    pub trailing_bytes: Option<usize>,
}

/// Test-execution harness for formatter modules.
pub struct Harness {
    sandbox: FormatterSandbox,
    inferior: Arc<dyn InferiorMemory>,
    options: RunOptions,
}

impl Harness {
    /// Create a harness serving reads from `inferior`.
    pub fn new(config: SandboxConfig, inferior: Arc<dyn InferiorMemory>) -> Result<Self> {
        Ok(Self {
            sandbox: FormatterSandbox::new(config)?,
            inferior,
            options: RunOptions::default(),
        })
    }

    /// Builder: set output options
    pub fn options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Run one module image and return its formatted output.
    pub fn format_module(&self, name: &str, bytes: &[u8]) -> Result<FormatOutput> {
        let module = self.sandbox.load_module_bytes(name, bytes)?;
        let mut instance = self
            .sandbox
            .instantiate(&module, Arc::clone(&self.inferior))?;
        Ok(instance.format()?.value)
    }

    /// Process a complete framed input, writing results to `out`.
    ///
    /// Decode and instantiation failures abort the run. Unparsed trailing input
    /// is reported on `out` and in the summary, but is not an error.
    pub fn run(&self, input: &[u8], out: &mut impl Write) -> Result<RunSummary> {
        let mut framer = MessageFramer::new(input);
        let mut summary = RunSummary::default();

        let messages: Vec<Result<Value>> = if self.options.count_messages {
            let values = framer.by_ref().collect::<Result<Vec<_>>>()?;
            writeln!(out, "Got {} responses.", values.len())?;
            values.into_iter().map(Ok).collect()
        } else {
            Vec::new()
        };

        let stream = messages.into_iter().chain(framer.by_ref());
        for value in stream {
            let value = value?;
            summary.messages += 1;

            match Message::from_value(value)? {
                Message::Executable(image) => {
                    let name = format!("message-{}", summary.messages);
                    self.run_module(&name, image.as_bytes(), &mut *out)?;
                    summary.modules += 1;
                }
                Message::Diagnostic(value) => {
                    writeln!(out, "{}", value)?;
                    summary.diagnostics += 1;
                }
            }
        }

        if let Some(trailing) = framer.trailing_bytes() {
            writeln!(out, "Didn't consume {} bytes at the end of input", trailing)?;
            summary.trailing_bytes = Some(trailing);
        }

        info!(
            messages = summary.messages,
            modules = summary.modules,
            diagnostics = summary.diagnostics,
            "run complete"
        );
        Ok(summary)
    }

    fn run_module(&self, name: &str, bytes: &[u8], out: &mut impl Write) -> Result<()> {
        let module = self.sandbox.load_module_bytes(name, bytes)?;
        let mut instance = self
            .sandbox
            .instantiate(&module, Arc::clone(&self.inferior))?;
        writeln!(out, "Heap base: {}", instance.heap_base())?;

        let call = instance.format()?;
        debug!(
            module = name,
            us = call.execution_time_us,
            fuel = ?call.fuel_consumed,
            reads = instance.memory_reads().len(),
            "formatter finished"
        );

        if self.options.trace_reads {
            for read in instance.memory_reads() {
                writeln!(
                    out,
                    "Reading {} bytes from offset {}",
                    read.size, read.offset
                )?;
            }
        }
        writeln!(out, "Result at: {}", call.value.result_offset)?;
        writeln!(out, "Result: {}", call.value.text)?;
        Ok(())
    }
}
