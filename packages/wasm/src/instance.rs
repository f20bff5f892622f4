//! Guest instance management
//!
//! Owns the store and every typed export of one instantiated codec guest.

use crate::abi::{exports, PointerResult, ReleaseKind, StringResult};
use crate::engine::CodecEngine;
use crate::error::{BindingError, BindingResult};
use crate::host::{register_host_functions, StoreData};
use crate::marshal::{write_str, GuestAllocator, WriteMode};
use crate::memory::{ByteViewMut, MemoryViews};
use crate::module::GuestModule;
use crate::table::ExternRefTable;
use crate::value::HostValue;
use std::collections::HashSet;
use wasmtime::{Instance, Linker, Memory, Store, TypedFunc, Val, WasmParams, WasmResults};

/// An instantiated guest ready for calls
pub struct GuestInstance {
    store: Store<StoreData>,
    instance: Instance,
    memory: Memory,
    views: MemoryViews,
    module_hash: String,
    malloc_func: TypedFunc<(i32, i32), i32>,
    realloc_func: Option<TypedFunc<(i32, i32, i32, i32), i32>>,
    free_func: TypedFunc<(i32, i32, i32), ()>,
    parse_func: TypedFunc<(i32, i32), (i32, i32, i32)>,
    validate_func: TypedFunc<(i32, i32), i32>,
    round_trip_func: TypedFunc<(i32, i32), (i32, i32, i32, i32)>,
    version_func: TypedFunc<(), (i32, i32)>,
    pattern_count_func: TypedFunc<i32, i32>,
    identifiers_func: TypedFunc<i32, (i32, i32)>,
    resource_free_func: TypedFunc<(i32, i32), ()>,
    /// Parse results the guest has handed out and not yet freed
    live_resources: HashSet<u32>,
}

impl GuestInstance {
    /// Instantiate a compiled module and run its start export
    pub fn new(engine: &CodecEngine, module: &GuestModule) -> BindingResult<Self> {
        let mut linker = Linker::new(engine.engine());
        register_host_functions(&mut linker)?;

        let mut store = Store::new(engine.engine(), StoreData::new(engine.config()));
        store.limiter(|data| &mut data.limiter);

        let instance = linker
            .instantiate(&mut store, module.module())
            .map_err(|e| {
                BindingError::instantiation(format!("Failed to instantiate module: {}", e))
            })?;

        let memory = instance
            .get_memory(&mut store, exports::MEMORY)
            .ok_or_else(|| BindingError::MissingExport {
                export_name: exports::MEMORY.to_string(),
            })?;
        store.data_mut().memory = Some(memory);

        let malloc_func = typed_export(&instance, &mut store, exports::MALLOC)?;
        let realloc_func = instance
            .get_typed_func(&mut store, exports::REALLOC)
            .ok();
        let free_func = typed_export(&instance, &mut store, exports::FREE)?;
        let parse_func = typed_export(&instance, &mut store, exports::PARSE)?;
        let validate_func = typed_export(&instance, &mut store, exports::VALIDATE)?;
        let round_trip_func = typed_export(&instance, &mut store, exports::ROUND_TRIP)?;
        let version_func = typed_export(&instance, &mut store, exports::VERSION)?;
        let pattern_count_func =
            typed_export(&instance, &mut store, exports::PARSE_RESULT_PATTERN_COUNT)?;
        let identifiers_func =
            typed_export(&instance, &mut store, exports::PARSE_RESULT_IDENTIFIERS)?;
        let resource_free_func = typed_export(&instance, &mut store, exports::PARSE_RESULT_FREE)?;

        let mut views = MemoryViews::new();
        if let Ok(start) = instance.get_typed_func::<(), ()>(&mut store, exports::START) {
            invoke(&mut store, &start, exports::START, ()).map_err(|e| {
                BindingError::instantiation(format!("Failed to call {}: {}", exports::START, e))
            })?;
        }
        views.reset();

        tracing::info!(
            "Instantiated Gram codec guest {} ({} bytes of memory)",
            module.hash(),
            memory.data_size(&store)
        );

        Ok(Self {
            store,
            instance,
            memory,
            views,
            module_hash: module.hash().to_string(),
            malloc_func,
            realloc_func,
            free_func,
            parse_func,
            validate_func,
            round_trip_func,
            version_func,
            pattern_count_func,
            identifiers_func,
            resource_free_func,
            live_resources: HashSet::new(),
        })
    }

    /// Allocate `size` bytes in the guest
    pub fn malloc(&mut self, size: u32, align: u32) -> BindingResult<u32> {
        let ptr = invoke(
            &mut self.store,
            &self.malloc_func,
            exports::MALLOC,
            (size as i32, align as i32),
        )?;
        if ptr == 0 {
            return Err(BindingError::Allocation {
                requested: size as usize,
            });
        }
        Ok(ptr as u32)
    }

    /// Return a buffer the guest handed to us
    pub fn free(&mut self, ptr: u32, size: u32, align: u32) -> BindingResult<()> {
        invoke(
            &mut self.store,
            &self.free_func,
            exports::FREE,
            (ptr as i32, size as i32, align as i32),
        )
    }

    /// Write `text` into a fresh guest buffer owned by the callee
    pub fn pass_string(&mut self, text: &str, mode: WriteMode) -> BindingResult<(u32, u32)> {
        write_str(self, text, mode)
    }

    /// Copy `len` bytes at `ptr` and decode them
    pub fn read_string(&mut self, ptr: u32, len: u32) -> BindingResult<String> {
        let bytes = self
            .views
            .bytes(&self.memory, &self.store)
            .slice(ptr, len)?
            .to_vec();
        self.store.data_mut().decoder.decode(bytes)
    }

    /// Decode a guest-returned string and free its buffer on every path
    pub fn take_string(&mut self, ptr: u32, len: u32) -> BindingResult<String> {
        let text = self.read_string(ptr, len);
        let freed = self.free(ptr, len, 1);
        let text = text?;
        freed?;
        Ok(text)
    }

    /// Take an error value out of the reference table
    pub fn take_error(&mut self, index: u32) -> BindingError {
        match self.store.data_mut().table.take(index) {
            Ok(value) => BindingError::guest(value),
            Err(e) => e,
        }
    }

    /// Parse a string already written to guest memory; returns the resource pointer
    pub fn parse(&mut self, ptr: u32, len: u32) -> BindingResult<u32> {
        let raw = invoke(
            &mut self.store,
            &self.parse_func,
            exports::PARSE,
            (ptr as i32, len as i32),
        )?;
        match PointerResult::from(raw).into_result() {
            Ok(resource) => {
                self.live_resources.insert(resource);
                Ok(resource)
            }
            Err(index) => Err(self.take_error(index)),
        }
    }

    pub fn validate(&mut self, ptr: u32, len: u32) -> BindingResult<bool> {
        let valid = invoke(
            &mut self.store,
            &self.validate_func,
            exports::VALIDATE,
            (ptr as i32, len as i32),
        )?;
        Ok(valid != 0)
    }

    pub fn round_trip(&mut self, ptr: u32, len: u32) -> BindingResult<String> {
        let raw = invoke(
            &mut self.store,
            &self.round_trip_func,
            exports::ROUND_TRIP,
            (ptr as i32, len as i32),
        )?;
        match StringResult::from(raw).into_result() {
            Ok((out_ptr, out_len)) => self.take_string(out_ptr, out_len),
            Err(index) => Err(self.take_error(index)),
        }
    }

    pub fn version(&mut self) -> BindingResult<String> {
        let (ptr, len) = invoke(&mut self.store, &self.version_func, exports::VERSION, ())?;
        self.take_string(ptr as u32, len as u32)
    }

    pub fn pattern_count(&mut self, resource: u32) -> BindingResult<usize> {
        self.ensure_live(resource)?;
        let count = invoke(
            &mut self.store,
            &self.pattern_count_func,
            exports::PARSE_RESULT_PATTERN_COUNT,
            resource as i32,
        )?;
        Ok(count as u32 as usize)
    }

    /// Copy out the identifier values, releasing their slots and the index array
    pub fn identifiers(&mut self, resource: u32) -> BindingResult<Vec<HostValue>> {
        self.ensure_live(resource)?;
        let (arr, count) = invoke(
            &mut self.store,
            &self.identifiers_func,
            exports::PARSE_RESULT_IDENTIFIERS,
            resource as i32,
        )?;
        let (arr, count) = (arr as u32, count as u32);

        let values = self.collect_values(arr, count);
        let byte_len = count
            .checked_mul(4)
            .ok_or_else(|| BindingError::memory_access("Memory address overflow"));
        let freed = byte_len.and_then(|len| self.free(arr, len, 4));
        let values = values?;
        freed?;
        Ok(values)
    }

    fn collect_values(&mut self, arr: u32, count: u32) -> BindingResult<Vec<HostValue>> {
        let indices = self
            .views
            .words(&self.memory, &self.store)
            .read_array(arr, count)?;
        self.store.data_mut().table.collect(&indices)
    }

    /// Free a parse result if it is still live; returns whether the guest was called
    pub fn free_resource(&mut self, resource: u32, kind: ReleaseKind) -> BindingResult<bool> {
        if !self.live_resources.remove(&resource) {
            tracing::debug!("Parse result {} already freed, skipping", resource);
            return Ok(false);
        }
        invoke(
            &mut self.store,
            &self.resource_free_func,
            exports::PARSE_RESULT_FREE,
            (resource as i32, kind as i32),
        )?;
        tracing::debug!("Freed parse result {} ({:?})", resource, kind);
        Ok(true)
    }

    fn ensure_live(&self, resource: u32) -> BindingResult<()> {
        if self.live_resources.contains(&resource) {
            Ok(())
        } else {
            Err(BindingError::UseAfterRelease {
                resource: "ParseResult",
            })
        }
    }

    /// Number of parse results still owned by handles
    pub fn live_resources(&self) -> usize {
        self.live_resources.len()
    }

    /// Read an exported `i32` global (guest diagnostics)
    pub fn exported_i32(&mut self, name: &str) -> Option<i32> {
        let global = self.instance.get_global(&mut self.store, name)?;
        match global.get(&mut self.store) {
            Val::I32(value) => Some(value),
            _ => None,
        }
    }

    /// Revalidate the memory views and return their current generation
    pub fn memory_generation(&mut self) -> u64 {
        self.views.bytes(&self.memory, &self.store).generation()
    }

    /// Get memory size in bytes
    pub fn memory_size(&self) -> usize {
        self.memory.data_size(&self.store)
    }

    pub fn table(&self) -> &ExternRefTable {
        &self.store.data().table
    }

    pub fn decoder_resets(&self) -> u64 {
        self.store.data().decoder.resets()
    }

    pub fn module_hash(&self) -> &str {
        &self.module_hash
    }
}

impl GuestAllocator for GuestInstance {
    fn malloc(&mut self, size: u32, align: u32) -> BindingResult<u32> {
        GuestInstance::malloc(self, size, align)
    }

    fn realloc(
        &mut self,
        ptr: u32,
        old_size: u32,
        new_size: u32,
        align: u32,
    ) -> BindingResult<u32> {
        let func = self
            .realloc_func
            .as_ref()
            .ok_or_else(|| BindingError::MissingExport {
                export_name: exports::REALLOC.to_string(),
            })?;
        let ptr = invoke(
            &mut self.store,
            func,
            exports::REALLOC,
            (ptr as i32, old_size as i32, new_size as i32, align as i32),
        )?;
        if ptr == 0 {
            return Err(BindingError::Allocation {
                requested: new_size as usize,
            });
        }
        Ok(ptr as u32)
    }

    fn supports_realloc(&self) -> bool {
        self.realloc_func.is_some()
    }

    fn bytes_mut(&mut self) -> ByteViewMut<'_> {
        self.views.bytes_mut(&self.memory, &mut self.store)
    }
}

impl std::fmt::Debug for GuestInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestInstance")
            .field("module_hash", &self.module_hash)
            .field("memory_size", &self.memory_size())
            .field("live_resources", &self.live_resources.len())
            .field("table_live", &self.table().live())
            .finish()
    }
}

fn typed_export<P, R>(
    instance: &Instance,
    store: &mut Store<StoreData>,
    name: &str,
) -> BindingResult<TypedFunc<P, R>>
where
    P: WasmParams,
    R: WasmResults,
{
    let func = instance
        .get_func(&mut *store, name)
        .ok_or_else(|| BindingError::MissingExport {
            export_name: name.to_string(),
        })?;
    func.typed::<P, R>(&*store)
        .map_err(|e| BindingError::InvalidExportSignature {
            export_name: name.to_string(),
            expected: std::any::type_name::<(P, R)>().to_string(),
            actual: e.to_string(),
        })
}

/// Call a guest export, preferring an error parked by a host import
fn invoke<P, R>(
    store: &mut Store<StoreData>,
    func: &TypedFunc<P, R>,
    name: &str,
    params: P,
) -> BindingResult<R>
where
    P: WasmParams,
    R: WasmResults,
{
    store.data_mut().pending = None;
    func.call(&mut *store, params).map_err(|e| {
        store
            .data_mut()
            .pending
            .take()
            .unwrap_or_else(|| BindingError::execution(name, format!("Call failed: {}", e)))
    })
}
