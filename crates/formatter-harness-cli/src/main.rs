//! Formatter Harness Command-Line Interface
//!
//! This CLI provides tools for:
//! - Running the formatter modules embedded in a framed response stream
//! - Building framed input from JSON messages and compiled modules
//! - Inspecting the imports and exports of embedded modules
//!
//! Results go to stdout; logging goes to stderr.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use formatter_harness::{
    encode_frame, FixtureMemory, FormatterModule, FormatterSandbox, Harness, Message, MessageFramer,
    ModuleImage, RunOptions, SandboxConfig,
};
use serde_json::Value;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "fmt-harness")]
#[command(author, version, about = "WebAssembly formatter test harness", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every formatter module in a framed response stream
    Run {
        /// Framed input file (or - for stdin)
        #[arg(default_value = "-")]
        input: PathBuf,

        /// Inferior memory fixture (JSON); zero-filled when omitted
        #[arg(short, long)]
        memory: Option<PathBuf>,

        /// Sandbox configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Use the strict preset (no static sizing, 16 pages, fuel metering)
        #[arg(long, conflicts_with = "config")]
        strict: bool,

        /// First-attempt memory size in pages
        #[arg(long)]
        initial_pages: Option<u32>,

        /// Upper bound on memory size in pages
        #[arg(long)]
        max_pages: Option<u32>,

        /// Size memory only from linkage failures, not from the declared minimum
        #[arg(long)]
        no_static_sizing: bool,

        /// Value supplied for the memory base import
        #[arg(long)]
        base_offset: Option<u32>,

        /// Fuel budget per instance
        #[arg(long)]
        fuel: Option<u64>,

        /// Print each memory read a module performs
        #[arg(long)]
        trace_reads: bool,

        /// Print the number of framed messages first
        #[arg(long)]
        count: bool,
    },

    /// Wrap JSON messages and compiled modules into a framed stream
    Encode {
        /// Files to frame, in order: `.json` messages or `.wasm` modules
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output file (or - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,
    },

    /// List the imports and exports of embedded modules
    Inspect {
        /// Framed input file, or a single `.wasm` module
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            input,
            memory,
            config,
            strict,
            initial_pages,
            max_pages,
            no_static_sizing,
            base_offset,
            fuel,
            trace_reads,
            count,
        } => {
            let mut sandbox_config = match (config, strict) {
                (Some(path), _) => SandboxConfig::from_file(&path)
                    .with_context(|| format!("Failed to load config {:?}", path))?,
                (None, true) => SandboxConfig::strict(),
                (None, false) => SandboxConfig::default(),
            };
            if let Some(pages) = initial_pages {
                sandbox_config = sandbox_config.initial_pages(pages);
            }
            if let Some(pages) = max_pages {
                sandbox_config = sandbox_config.max_pages(pages);
            }
            if no_static_sizing {
                sandbox_config = sandbox_config.static_sizing(false);
            }
            if let Some(offset) = base_offset {
                sandbox_config = sandbox_config.base_offset(offset);
            }
            if let Some(fuel) = fuel {
                sandbox_config = sandbox_config.fuel_limit(fuel);
            }

            let options = RunOptions {
                trace_reads,
                count_messages: count,
            };
            cmd_run(input, memory, sandbox_config, options)
        }

        Commands::Encode { inputs, output } => cmd_encode(inputs, output),

        Commands::Inspect { input } => cmd_inspect(input),
    }
}

fn cmd_run(
    input: PathBuf,
    memory: Option<PathBuf>,
    config: SandboxConfig,
    options: RunOptions,
) -> Result<()> {
    let inferior = match memory {
        Some(path) => FixtureMemory::from_file(&path)
            .with_context(|| format!("Failed to load memory fixture {:?}", path))?,
        None => FixtureMemory::zeroed(),
    };

    let data = read_input(&input)?;
    info!("Read {} bytes of framed input", data.len());

    let harness = Harness::new(config, Arc::new(inferior))?.options(options);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let summary = harness.run(&data, &mut out)?;
    out.flush()?;

    info!(
        "Ran {} modules, echoed {} messages",
        summary.modules, summary.diagnostics
    );
    Ok(())
}

fn cmd_encode(inputs: Vec<PathBuf>, output: PathBuf) -> Result<()> {
    let mut framed = Vec::new();

    for path in &inputs {
        let message = if is_wasm(path) {
            let bytes = fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
            Message::Executable(ModuleImage::new(bytes)).to_value()
        } else {
            let text =
                fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
            serde_json::from_str::<Value>(&text)
                .with_context(|| format!("Invalid JSON in {:?}", path))?
        };
        framed.extend(encode_frame(&message));
    }
    info!("Framed {} messages ({} bytes)", inputs.len(), framed.len());

    if output.as_os_str() == "-" {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        out.write_all(&framed)?;
        out.flush()?;
    } else {
        fs::write(&output, &framed).with_context(|| format!("Failed to write {:?}", output))?;
        println!("Wrote {} bytes to {:?}", framed.len(), output);
    }
    Ok(())
}

fn cmd_inspect(input: PathBuf) -> Result<()> {
    let sandbox = FormatterSandbox::new(SandboxConfig::default())?;
    let data = read_input(&input)?;

    if is_wasm(&input) {
        let module = sandbox
            .load_module(&input)
            .with_context(|| format!("Failed to compile {:?}", input))?;
        print_module(&module, data.len());
        return Ok(());
    }

    let mut framer = MessageFramer::new(&data);
    let mut modules = 0;
    for (index, value) in framer.by_ref().enumerate() {
        let value = value.with_context(|| format!("Message {} could not be framed", index + 1))?;
        if let Message::Executable(image) = Message::from_value(value)? {
            modules += 1;
            let label = format!("message {}", index + 1);
            let module = sandbox
                .load_module_bytes(&label, image.as_bytes())
                .with_context(|| format!("Failed to compile {}", label))?;
            print_module(&module, image.len());
        }
    }

    if let Some(trailing) = framer.trailing_bytes() {
        warn!("Didn't consume {} bytes at the end of input", trailing);
    }
    if modules == 0 {
        bail!("No formatter modules found in {:?}", input);
    }
    Ok(())
}

fn print_module(module: &FormatterModule, size: usize) {
    println!("=== {} ({} bytes) ===", module.name(), size);
    match module.memory_import() {
        Some(memory) => println!(
            "Memory: {}::{} min {} pages, max {}",
            memory.module,
            memory.name,
            memory.minimum,
            memory
                .maximum
                .map_or_else(|| "none".to_string(), |m| format!("{} pages", m))
        ),
        None => println!("Memory: not imported"),
    }

    println!("Imports:");
    for (module_name, name, kind) in module.imports() {
        println!("  {:<8} {}::{}", kind, module_name, name);
    }
    println!("Exports:");
    for (name, kind) in module.export_kinds() {
        println!("  {:<8} {}", kind, name);
    }
    println!();
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut data = Vec::new();
        io::stdin()
            .read_to_end(&mut data)
            .context("Failed to read stdin")?;
        Ok(data)
    } else {
        fs::read(path).with_context(|| format!("Failed to read {:?}", path))
    }
}

fn is_wasm(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "wasm")
}
