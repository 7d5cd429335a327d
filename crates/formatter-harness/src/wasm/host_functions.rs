//! Host functions imported by formatter modules.
//!
//! Formatter modules are linked with `--import-memory` and call back into the
//! host for anything outside their own linear memory:
//!
//! ```wat
//! (import "env" "__getMemory" (func $read (param i32 i32 i32)))
//! (import "env" "__debug" (func $debug (param i32 i32)))
//! (import "env" "sbrk" (func $sbrk (param i32) (result i32)))
//! ```
//!
//! ## Memory Convention
//!
//! `__getMemory(offset, size, dest)` copies `size` bytes of the inferior
//! address space starting at `offset` into sandbox memory at `dest`. All three
//! arguments are unsigned 32-bit values carried in `i32`. A destination range
//! outside sandbox memory traps the calling module.
//!
//! The memory is sized once at instantiation and never grows, so `sbrk` only
//! answers size queries: `sbrk(0)` is the region size in bytes, anything else
//! is `-1`.

use tracing::{debug, trace};
use wasmtime::{Caller, Global, GlobalType, Linker, Mutability, Store, Val, ValType};

use super::config::ModuleAbi;
use super::runtime::HostState;
use crate::error::{HarnessError, Result};
use crate::inferior::MemoryReadRequest;

/// Host functions exposed to formatter modules.
pub struct FormatterHostFunctions;

impl FormatterHostFunctions {
    /// Register all host functions with the wasmtime linker.
    pub fn register(linker: &mut Linker<HostState>, abi: &ModuleAbi) -> Result<()> {
        Self::register_read_memory(linker, abi)?;
        Self::register_debug(linker, abi)?;
        Self::register_sbrk(linker, abi)?;
        Ok(())
    }

    fn register_read_memory(linker: &mut Linker<HostState>, abi: &ModuleAbi) -> Result<()> {
        linker
            .func_wrap(
                &abi.import_module,
                &abi.read_memory,
                |mut caller: Caller<'_, HostState>,
                 offset: i32,
                 size: i32,
                 dest: i32|
                 -> wasmtime::Result<()> {
                    let request = MemoryReadRequest {
                        offset: offset as u32,
                        size: size as u32,
                        destination: dest as u32,
                    };
                    debug!(
                        "Reading {} bytes from offset {} into {}",
                        request.size, request.offset, request.destination
                    );

                    let memory = caller
                        .data()
                        .memory
                        .ok_or_else(|| HarnessError::Link("sandbox memory not bound".into()))?;
                    let (data, state) = memory.data_and_store_mut(&mut caller);

                    let start = request.destination as usize;
                    let len = request.size as usize;
                    let end = start
                        .checked_add(len)
                        .filter(|&end| end <= data.len())
                        .ok_or(HarnessError::OutOfBounds { offset: start, len })?;

                    state.inferior.read(request.offset, &mut data[start..end]);
                    state.reads.push(request);
                    Ok(())
                },
            )
            .map_err(|e| {
                HarnessError::Link(format!("failed to register {}: {}", abi.read_memory, e))
            })?;
        Ok(())
    }

    fn register_debug(linker: &mut Linker<HostState>, abi: &ModuleAbi) -> Result<()> {
        linker
            .func_wrap(&abi.import_module, &abi.debug, |flag: i32, value: i32| {
                trace!(flag, value, "formatter debug hook");
            })
            .map_err(|e| HarnessError::Link(format!("failed to register {}: {}", abi.debug, e)))?;
        Ok(())
    }

    fn register_sbrk(linker: &mut Linker<HostState>, abi: &ModuleAbi) -> Result<()> {
        linker
            .func_wrap(
                &abi.import_module,
                &abi.sbrk,
                |caller: Caller<'_, HostState>, increment: i32| -> i32 {
                    if increment == 0 {
                        i32::try_from(caller.data().memory_bytes).unwrap_or(i32::MAX)
                    } else {
                        trace!(increment, "sbrk refused: memory is fixed-size");
                        -1
                    }
                },
            )
            .map_err(|e| HarnessError::Link(format!("failed to register {}: {}", abi.sbrk, e)))?;
        Ok(())
    }

    /// Define the constant memory base global for modules that import one.
    pub fn define_memory_base(
        linker: &mut Linker<HostState>,
        store: &mut Store<HostState>,
        abi: &ModuleAbi,
        base_offset: u32,
    ) -> Result<()> {
        let global = Global::new(
            &mut *store,
            GlobalType::new(ValType::I32, Mutability::Const),
            Val::I32(base_offset as i32),
        )
        .map_err(|e| HarnessError::Link(format!("failed to create memory base: {}", e)))?;

        linker
            .define(&*store, &abi.import_module, &abi.memory_base, global)
            .map_err(|e| {
                HarnessError::Link(format!("failed to define {}: {}", abi.memory_base, e))
            })?;
        Ok(())
    }
}
