//! Host functions imported by the guest
//!
//! Registers the `wbg` imports with the wasmtime linker. Every import reads
//! guest memory through the store's published [`Memory`] and stores results
//! in the reference table.

use crate::abi::{imports, HOST_MODULE_NAME};
use crate::engine::BindingConfig;
use crate::error::{BindingError, BindingResult};
use crate::limits::MemoryLimiter;
use crate::marshal::Utf8Decoder;
use crate::table::ExternRefTable;
use crate::value::HostValue;
use wasmtime::{Caller, Linker, Memory};

/// Store data passed to host functions
#[derive(Debug)]
pub struct StoreData {
    pub table: ExternRefTable,
    pub decoder: Utf8Decoder,
    pub memory: Option<Memory>,
    pub limiter: MemoryLimiter,
    /// Error raised by an import, surfaced by the call that trapped
    pub pending: Option<BindingError>,
}

impl StoreData {
    pub fn new(config: &BindingConfig) -> Self {
        Self {
            table: ExternRefTable::new(config.table_growth),
            decoder: Utf8Decoder::new(config.decode_ceiling),
            memory: None,
            limiter: MemoryLimiter::new(config.memory_limit),
            pending: None,
        }
    }
}

/// Register all host functions with the linker
pub fn register_host_functions(linker: &mut Linker<StoreData>) -> BindingResult<()> {
    linker
        .func_wrap(
            HOST_MODULE_NAME,
            imports::INIT_EXTERNREF_TABLE,
            |mut caller: Caller<'_, StoreData>| {
                let offset = caller.data_mut().table.seed();
                tracing::trace!("Reference table seeded at offset {}", offset);
            },
        )
        .map_err(|e| link_error(imports::INIT_EXTERNREF_TABLE, e))?;

    linker
        .func_wrap(
            HOST_MODULE_NAME,
            imports::STRING_NEW,
            |mut caller: Caller<'_, StoreData>, ptr: u32, len: u32| -> wasmtime::Result<u32> {
                let text = read_string_from_caller(&mut caller, ptr, len)
                    .map_err(|e| fail(&mut caller, e))?;
                Ok(caller.data_mut().table.insert(HostValue::String(text)))
            },
        )
        .map_err(|e| link_error(imports::STRING_NEW, e))?;

    linker
        .func_wrap(
            HOST_MODULE_NAME,
            imports::ERROR_NEW,
            |mut caller: Caller<'_, StoreData>, ptr: u32, len: u32| -> wasmtime::Result<u32> {
                let message = read_string_from_caller(&mut caller, ptr, len)
                    .map_err(|e| fail(&mut caller, e))?;
                Ok(caller.data_mut().table.insert(HostValue::error(message)))
            },
        )
        .map_err(|e| link_error(imports::ERROR_NEW, e))?;

    linker
        .func_wrap(
            HOST_MODULE_NAME,
            imports::THROW,
            |mut caller: Caller<'_, StoreData>, ptr: u32, len: u32| -> wasmtime::Result<()> {
                let message = read_string_from_caller(&mut caller, ptr, len)
                    .map_err(|e| fail(&mut caller, e))?;
                Err(fail(&mut caller, BindingError::guest(HostValue::error(message))))
            },
        )
        .map_err(|e| link_error(imports::THROW, e))?;

    linker
        .func_wrap(
            HOST_MODULE_NAME,
            imports::EXTERNREF_DEALLOC,
            |mut caller: Caller<'_, StoreData>, index: u32| -> wasmtime::Result<()> {
                let result = caller.data_mut().table.deallocate(index);
                result.map_err(|e| fail(&mut caller, e))
            },
        )
        .map_err(|e| link_error(imports::EXTERNREF_DEALLOC, e))?;

    Ok(())
}

fn link_error(name: &str, e: impl std::fmt::Display) -> BindingError {
    BindingError::instantiation(format!("Failed to register {}::{}: {}", HOST_MODULE_NAME, name, e))
}

/// Park `e` for the host and abort the guest
fn fail(caller: &mut Caller<'_, StoreData>, e: BindingError) -> wasmtime::Error {
    let trap = wasmtime::Error::msg(e.to_string());
    caller.data_mut().pending = Some(e);
    trap
}

/// Copy `len` bytes out of guest memory and decode them strictly
fn read_string_from_caller(
    caller: &mut Caller<'_, StoreData>,
    ptr: u32,
    len: u32,
) -> BindingResult<String> {
    let memory = caller
        .data()
        .memory
        .ok_or_else(|| BindingError::memory_access("Guest memory is not published yet"))?;
    let data = memory.data(&*caller);

    let start = ptr as usize;
    let end = start
        .checked_add(len as usize)
        .ok_or_else(|| BindingError::memory_access("Memory address overflow"))?;
    if end > data.len() {
        return Err(BindingError::memory_access(format!(
            "Memory access out of bounds: trying to read {} bytes at offset {}, but memory size is {}",
            len,
            ptr,
            data.len()
        )));
    }

    let bytes = data[start..end].to_vec();
    caller.data_mut().decoder.decode(bytes)
}
