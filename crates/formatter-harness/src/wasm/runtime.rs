//! Formatter sandbox implementation using wasmtime.
//!
//! Instantiation is a two-phase protocol. The first attempt is sized from
//! `initial_pages`, raised to the module's declared minimum when static sizing
//! is enabled. If linking still rejects the memory as too small, the required
//! page count is taken from the linkage failure and exactly one more attempt
//! is made at that size.

use super::config::{ModuleAbi, ResultEncoding, SandboxConfig, PAGE_SIZE};
use super::host_functions::FormatterHostFunctions;
use crate::error::{HarnessError, Result};
use crate::inferior::{InferiorMemory, MemoryReadRequest};
use crate::result::{read_c_string, read_prefixed_string};

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};
use wasmtime::*;

/// Host state for the store of one formatter instance.
pub struct HostState {
    pub(crate) inferior: Arc<dyn InferiorMemory>,
    pub(crate) memory: Option<Memory>,
    pub(crate) memory_bytes: u64,
    pub(crate) reads: Vec<MemoryReadRequest>,
    limits: StoreLimits,
}

impl HostState {
    fn new(inferior: Arc<dyn InferiorMemory>, pages: u32, max_memory: usize) -> Self {
        Self {
            inferior,
            memory: None,
            memory_bytes: u64::from(pages) * PAGE_SIZE,
            reads: Vec::new(),
            limits: StoreLimitsBuilder::new().memory_size(max_memory).build(),
        }
    }
}

/// The memory import a formatter module declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryImport {
    /// Import module name
    pub module: String,
    /// Import field name
    pub name: String,
    /// Declared minimum, in pages
    pub minimum: u64,
    /// Declared maximum, in pages
    pub maximum: Option<u64>,
}

/// A WebAssembly sandbox for running formatter modules.
pub struct FormatterSandbox {
    engine: Engine,
    config: SandboxConfig,
}

/// A compiled formatter module.
pub struct FormatterModule {
    module: Module,
    name: String,
    memory: Option<MemoryImport>,
}

/// Which calling convention the format export uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatConvention {
    /// `() -> i32`: writes at the heap base and returns the result offset
    ReturnsOffset,
    /// `(offset: i32, capacity: i32) -> ()`: writes in place at `offset`
    WritesInPlace,
}

/// The format export, resolved once at instantiation.
enum FormatEntry {
    ReturnsOffset(TypedFunc<(), i32>),
    WritesInPlace(TypedFunc<(i32, i32), ()>),
}

/// An instantiated formatter module bound to its own linear memory.
pub struct SandboxInstance {
    store: Store<HostState>,
    instance: Instance,
    memory: Memory,
    entry: FormatEntry,
    format_name: String,
    heap_base: u32,
    pages: u32,
    resized: bool,
    base_offset: u32,
    result_encoding: ResultEncoding,
}

/// Result of a sandboxed call with timing information.
#[derive(Debug, Clone)]
pub struct CallResult<T> {
    /// The return value
    pub value: T,
    /// Execution time in microseconds
    pub execution_time_us: u64,
    /// Fuel consumed (if fuel metering enabled)
    pub fuel_consumed: Option<u64>,
}

/// What one format invocation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatOutput {
    /// Scratch offset the result was read from
    pub heap_base: u32,
    /// Offset reported by (or passed to) the entry point
    pub result_offset: u32,
    /// Decoded result text
    pub text: String,
}

/// Outcome of a single instantiation attempt.
enum Linkage {
    Linked(Box<SandboxInstance>),
    MemoryTooSmall { required: u32 },
}

impl FormatterSandbox {
    /// Create a new sandbox with the given configuration.
    pub fn new(config: SandboxConfig) -> Result<Self> {
        config.validate()?;

        let mut engine_config = Config::new();
        engine_config.cranelift_opt_level(match config.optimization_level {
            0 => OptLevel::None,
            1 | 2 => OptLevel::Speed,
            _ => OptLevel::SpeedAndSize,
        });
        if config.fuel_limit.is_some() {
            engine_config.consume_fuel(true);
        }

        let engine = Engine::new(&engine_config)
            .map_err(|e| HarnessError::Config(format!("engine creation failed: {}", e)))?;

        Ok(Self { engine, config })
    }

    /// Load a formatter module from a file.
    pub fn load_module(&self, path: impl AsRef<Path>) -> Result<FormatterModule> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        let bytes = std::fs::read(path)?;
        self.load_module_bytes(&name, &bytes)
    }

    /// Load a formatter module from bytes.
    pub fn load_module_bytes(&self, name: &str, bytes: &[u8]) -> Result<FormatterModule> {
        let module = Module::new(&self.engine, bytes)
            .map_err(|e| HarnessError::Compile(format!("{:#}", e)))?;
        let memory = find_memory_import(&module);
        debug!(module = name, ?memory, "compiled formatter module");

        Ok(FormatterModule {
            module,
            name: name.to_string(),
            memory,
        })
    }

    /// Instantiate a module, servicing its memory reads from `inferior`.
    pub fn instantiate(
        &self,
        module: &FormatterModule,
        inferior: Arc<dyn InferiorMemory>,
    ) -> Result<SandboxInstance> {
        let import = module
            .memory
            .as_ref()
            .ok_or(HarnessError::MissingMemoryImport)?;

        let pages = self.first_attempt_pages(import)?;
        match self.try_link(module, import, pages, Arc::clone(&inferior), false)? {
            Linkage::Linked(instance) => Ok(*instance),
            Linkage::MemoryTooSmall { required } => {
                info!(
                    provided = pages,
                    required,
                    "Setting memory size to expected {}",
                    required
                );
                self.check_limit(required)?;
                match self.try_link(module, import, required, inferior, true)? {
                    Linkage::Linked(instance) => Ok(*instance),
                    Linkage::MemoryTooSmall { required: again } => {
                        Err(HarnessError::MemoryTooSmall {
                            provided: required,
                            required: again,
                        })
                    }
                }
            }
        }
    }

    fn first_attempt_pages(&self, import: &MemoryImport) -> Result<u32> {
        let mut pages = self.config.initial_pages;
        if self.config.static_sizing {
            let minimum = u32::try_from(import.minimum).map_err(|_| HarnessError::MemoryLimit {
                required: u32::MAX,
                limit: self.config.max_pages,
            })?;
            pages = pages.max(minimum);
        }
        self.check_limit(pages)?;
        Ok(pages)
    }

    fn check_limit(&self, pages: u32) -> Result<()> {
        if pages > self.config.max_pages {
            return Err(HarnessError::MemoryLimit {
                required: pages,
                limit: self.config.max_pages,
            });
        }
        Ok(())
    }

    fn try_link(
        &self,
        module: &FormatterModule,
        import: &MemoryImport,
        pages: u32,
        inferior: Arc<dyn InferiorMemory>,
        resized: bool,
    ) -> Result<Linkage> {
        debug!(module = %module.name, pages, "instantiating");
        let host_state = HostState::new(inferior, pages, self.config.max_memory_bytes());
        let mut store = Store::new(&self.engine, host_state);

        // Configure resource limits via the stored limiter
        store.limiter(|state| &mut state.limits);

        if let Some(fuel) = self.config.fuel_limit {
            store
                .set_fuel(fuel)
                .map_err(|e| HarnessError::Config(format!("fuel setup failed: {}", e)))?;
        }

        // Fixed-size region: the module cannot grow past what it is given.
        let memory = Memory::new(&mut store, MemoryType::new(pages, Some(pages)))
            .map_err(|e| HarnessError::Link(format!("memory allocation failed: {}", e)))?;
        store.data_mut().memory = Some(memory);

        let abi = &self.config.abi;
        let mut linker: Linker<HostState> = Linker::new(&self.engine);
        linker
            .define(&store, &import.module, &import.name, memory)
            .map_err(|e| HarnessError::Link(format!("failed to bind memory: {}", e)))?;
        FormatterHostFunctions::register(&mut linker, abi)?;
        FormatterHostFunctions::define_memory_base(
            &mut linker,
            &mut store,
            abi,
            self.config.base_offset,
        )?;

        let instance = match linker.instantiate(&mut store, &module.module) {
            Ok(instance) => instance,
            Err(e) => {
                let message = format!("{:#}", e);
                return match memory_shortfall(&message, pages, import) {
                    Some(required) => {
                        info!("{}", message);
                        Ok(Linkage::MemoryTooSmall { required })
                    }
                    None => Err(HarnessError::Link(message)),
                };
            }
        };

        let bound = SandboxInstance::bind(
            store,
            instance,
            memory,
            abi,
            pages,
            resized,
            self.config.base_offset,
        )?;
        Ok(Linkage::Linked(Box::new(bound)))
    }
}

fn find_memory_import(module: &Module) -> Option<MemoryImport> {
    module.imports().find_map(|import| match import.ty() {
        ExternType::Memory(ty) => Some(MemoryImport {
            module: import.module().to_string(),
            name: import.name().to_string(),
            minimum: ty.minimum(),
            maximum: ty.maximum(),
        }),
        _ => None,
    })
}

/// Decide whether a linkage failure means "memory too small", and if so how
/// many pages the module wants.
fn memory_shortfall(message: &str, provided: u32, import: &MemoryImport) -> Option<u32> {
    if let Some(required) = required_pages(message) {
        return (required > provided).then_some(required);
    }
    if message.contains("memory") && import.minimum > u64::from(provided) {
        return u32::try_from(import.minimum).ok();
    }
    None
}

/// Extract the required page count from a memory linkage failure message.
///
/// Understands wasmtime's `expected memory limits (min: N, ...)` and the
/// `smaller than initial N,` wording used by JavaScript engines.
pub fn required_pages(message: &str) -> Option<u32> {
    const MARKERS: [&str; 2] = ["expected memory limits (min: ", "smaller than initial "];
    MARKERS.iter().find_map(|marker| {
        let start = message.find(marker)? + marker.len();
        let digits: String = message[start..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        digits.parse().ok()
    })
}

impl FormatterModule {
    /// Get the module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared memory import, if any.
    pub fn memory_import(&self) -> Option<&MemoryImport> {
        self.memory.as_ref()
    }

    /// Get exported function names.
    pub fn exports(&self) -> impl Iterator<Item = &str> {
        self.module.exports().filter_map(|e| {
            if matches!(e.ty(), ExternType::Func(_)) {
                Some(e.name())
            } else {
                None
            }
        })
    }

    /// Get all exports as `(name, kind)` pairs.
    pub fn export_kinds(&self) -> Vec<(String, &'static str)> {
        self.module
            .exports()
            .map(|e| (e.name().to_string(), extern_kind(&e.ty())))
            .collect()
    }

    /// Get all imports as `(module, name, kind)` triples.
    pub fn imports(&self) -> Vec<(String, String, &'static str)> {
        self.module
            .imports()
            .map(|i| {
                let kind = extern_kind(&i.ty());
                (i.module().to_string(), i.name().to_string(), kind)
            })
            .collect()
    }
}

fn extern_kind(ty: &ExternType) -> &'static str {
    match ty {
        ExternType::Func(_) => "func",
        ExternType::Global(_) => "global",
        ExternType::Table(_) => "table",
        ExternType::Memory(_) => "memory",
    }
}

impl FormatEntry {
    fn resolve(instance: &Instance, store: &mut Store<HostState>, name: &str) -> Result<Self> {
        let func = instance
            .get_func(&mut *store, name)
            .ok_or_else(|| HarnessError::MissingExport(format!("function '{}'", name)))?;

        if let Ok(typed) = func.typed::<(), i32>(&*store) {
            return Ok(FormatEntry::ReturnsOffset(typed));
        }
        if let Ok(typed) = func.typed::<(i32, i32), ()>(&*store) {
            return Ok(FormatEntry::WritesInPlace(typed));
        }
        Err(HarnessError::MissingExport(format!(
            "function '{}' has unsupported signature {:?}",
            name,
            func.ty(&*store)
        )))
    }

    fn convention(&self) -> FormatConvention {
        match self {
            FormatEntry::ReturnsOffset(_) => FormatConvention::ReturnsOffset,
            FormatEntry::WritesInPlace(_) => FormatConvention::WritesInPlace,
        }
    }
}

impl SandboxInstance {
    fn bind(
        mut store: Store<HostState>,
        instance: Instance,
        memory: Memory,
        abi: &ModuleAbi,
        pages: u32,
        resized: bool,
        base_offset: u32,
    ) -> Result<Self> {
        let missing = || HarnessError::MissingExport(format!("i32 global '{}'", abi.heap_base));
        let heap_base = instance
            .get_global(&mut store, &abi.heap_base)
            .and_then(|g| g.get(&mut store).i32())
            .ok_or_else(missing)? as u32;
        let entry = FormatEntry::resolve(&instance, &mut store, &abi.format)?;
        debug!(heap_base, convention = ?entry.convention(), pages, "formatter bound");

        Ok(Self {
            store,
            instance,
            memory,
            entry,
            format_name: abi.format.clone(),
            heap_base,
            pages,
            resized,
            base_offset,
            result_encoding: abi.result_encoding,
        })
    }

    /// Run the format entry point and read its result.
    pub fn format(&mut self) -> Result<CallResult<FormatOutput>> {
        let start = Instant::now();
        let fuel_before = self.store.get_fuel().ok();

        let result_offset = match &self.entry {
            FormatEntry::ReturnsOffset(func) => func
                .call(&mut self.store, ())
                .map_err(|e| trap(&self.format_name, e))?
                as u32,
            FormatEntry::WritesInPlace(func) => {
                let capacity = self
                    .memory
                    .data_size(&self.store)
                    .saturating_sub(self.heap_base as usize);
                let capacity = i32::try_from(capacity).unwrap_or(i32::MAX);
                func.call(&mut self.store, (self.heap_base as i32, capacity))
                    .map_err(|e| trap(&self.format_name, e))?;
                self.heap_base
            }
        };

        let fuel_after = self.store.get_fuel().ok();
        let fuel_consumed = fuel_before.zip(fuel_after).map(|(b, a)| b - a);
        let execution_time_us = start.elapsed().as_micros() as u64;

        let text = self.read_result(self.heap_base as usize);
        Ok(CallResult {
            value: FormatOutput {
                heap_base: self.heap_base,
                result_offset,
                text,
            },
            execution_time_us,
            fuel_consumed,
        })
    }

    /// Decode the result string at `offset` using the configured encoding.
    pub fn read_result(&self, offset: usize) -> String {
        let data = self.memory.data(&self.store);
        match self.result_encoding {
            ResultEncoding::NullTerminated => read_c_string(data, offset),
            ResultEncoding::LengthPrefixed => read_prefixed_string(data, offset),
        }
    }

    /// Call an export that takes an i32 and returns an i32.
    pub fn call_i32_i32(&mut self, name: &str, arg: i32) -> Result<CallResult<i32>> {
        let func = self.get_typed_func::<i32, i32>(name)?;
        self.timed(name, |store| func.call(store, arg))
    }

    fn timed<R>(
        &mut self,
        name: &str,
        call: impl FnOnce(&mut Store<HostState>) -> wasmtime::Result<R>,
    ) -> Result<CallResult<R>> {
        let start = Instant::now();
        let fuel_before = self.store.get_fuel().ok();

        let value = call(&mut self.store).map_err(|e| trap(name, e))?;

        let fuel_after = self.store.get_fuel().ok();
        let fuel_consumed = fuel_before.zip(fuel_after).map(|(b, a)| b - a);

        Ok(CallResult {
            value,
            execution_time_us: start.elapsed().as_micros() as u64,
            fuel_consumed,
        })
    }

    /// Get a typed function from the instance.
    fn get_typed_func<P, R>(&mut self, name: &str) -> Result<TypedFunc<P, R>>
    where
        P: WasmParams,
        R: WasmResults,
    {
        self.instance
            .get_typed_func::<P, R>(&mut self.store, name)
            .map_err(|e| HarnessError::MissingExport(format!("function '{}': {}", name, e)))
    }

    /// Write bytes to sandbox memory at the given offset.
    pub fn write_memory(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let mem_data = self.memory.data_mut(&mut self.store);
        let end = offset
            .checked_add(data.len())
            .filter(|&end| end <= mem_data.len())
            .ok_or(HarnessError::OutOfBounds {
                offset,
                len: data.len(),
            })?;
        mem_data[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Read bytes from sandbox memory at the given offset.
    pub fn read_memory(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let mem_data = self.memory.data(&self.store);
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= mem_data.len())
            .ok_or(HarnessError::OutOfBounds { offset, len })?;
        Ok(mem_data[offset..end].to_vec())
    }

    /// Reads the module issued through the host callback, in order.
    pub fn memory_reads(&self) -> &[MemoryReadRequest] {
        &self.store.data().reads
    }

    /// Scratch offset exported by the module.
    pub fn heap_base(&self) -> u32 {
        self.heap_base
    }

    /// Requested base offset this instance was created with.
    pub fn base_offset(&self) -> u32 {
        self.base_offset
    }

    /// Size of the linear memory, in pages.
    pub fn memory_pages(&self) -> u32 {
        self.pages
    }

    /// Whether the memory was resized after a linkage failure.
    pub fn was_resized(&self) -> bool {
        self.resized
    }

    /// Calling convention of the format export.
    pub fn convention(&self) -> FormatConvention {
        self.entry.convention()
    }

    /// Get remaining fuel (if fuel metering enabled).
    pub fn remaining_fuel(&self) -> Option<u64> {
        self.store.get_fuel().ok()
    }
}

fn trap(name: &str, e: wasmtime::Error) -> HarnessError {
    HarnessError::Trap {
        name: name.to_string(),
        message: format!("{:#}", e),
    }
}
