//! Call façade over a guest instance
//!
//! `GramCodec` is cheap to clone. All clones share one guest; calls are
//! serialized by a mutex and run to completion.

use crate::abi::ReleaseKind;
use crate::engine::BindingConfig;
use crate::error::BindingResult;
use crate::instance::GuestInstance;
use crate::loader::{ModuleLoader, ModuleSource, PrecompiledSource};
use crate::marshal::WriteMode;
use crate::resource::ParseResult;
use parking_lot::Mutex;
use std::sync::Arc;

/// Guest plus the frees queued by handles dropped while it was busy
pub(crate) struct CodecInner {
    guest: Mutex<GuestInstance>,
    deferred: Mutex<Vec<u32>>,
}

impl CodecInner {
    /// Run `f` with exclusive access to the guest, after flushing deferred frees
    pub(crate) fn with_guest<R>(
        &self,
        f: impl FnOnce(&mut GuestInstance) -> BindingResult<R>,
    ) -> BindingResult<R> {
        let mut guest = self.guest.lock();
        self.drain_deferred(&mut guest);
        f(&mut guest)
    }

    fn drain_deferred(&self, guest: &mut GuestInstance) {
        let pending = std::mem::take(&mut *self.deferred.lock());
        for resource in pending {
            if let Err(e) = guest.free_resource(resource, ReleaseKind::Finalizer) {
                tracing::warn!("Failed to finalize parse result {}: {}", resource, e);
            }
        }
    }

    /// Free a resource from a destructor; never blocks on the guest
    pub(crate) fn finalize(&self, resource: u32) {
        match self.guest.try_lock() {
            Some(mut guest) => {
                self.drain_deferred(&mut guest);
                if let Err(e) = guest.free_resource(resource, ReleaseKind::Finalizer) {
                    tracing::warn!("Failed to finalize parse result {}: {}", resource, e);
                }
            }
            None => {
                tracing::debug!("Guest busy, deferring finalization of {}", resource);
                self.deferred.lock().push(resource);
            }
        }
    }
}

/// Handle to a loaded Gram codec guest
#[derive(Clone)]
pub struct GramCodec {
    inner: Arc<CodecInner>,
}

impl GramCodec {
    pub fn new(guest: GuestInstance) -> Self {
        Self {
            inner: Arc::new(CodecInner {
                guest: Mutex::new(guest),
                deferred: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Load a guest from any source
    pub async fn load(source: ModuleSource, config: BindingConfig) -> BindingResult<Self> {
        let loader = ModuleLoader::new(config)?;
        Ok(Self::new(loader.instantiate(source).await?))
    }

    /// Load a guest from bytes or a compiled module without awaiting
    pub fn load_sync(source: PrecompiledSource, config: BindingConfig) -> BindingResult<Self> {
        let loader = ModuleLoader::new(config)?;
        Ok(Self::new(loader.instantiate_sync(source)?))
    }

    /// Parse Gram notation; the summary lives in the guest until released
    pub fn parse(&self, text: &str) -> BindingResult<ParseResult> {
        let resource = self.inner.with_guest(|guest| {
            let (ptr, len) = guest.pass_string(text, WriteMode::Growable)?;
            guest.parse(ptr, len)
        })?;
        Ok(ParseResult::wrap(resource, self.inner.clone()))
    }

    /// Whether `text` is well-formed Gram notation
    pub fn validate(&self, text: &str) -> BindingResult<bool> {
        self.inner.with_guest(|guest| {
            let (ptr, len) = guest.pass_string(text, WriteMode::Growable)?;
            guest.validate(ptr, len)
        })
    }

    /// Parse and re-serialize `text`
    pub fn round_trip(&self, text: &str) -> BindingResult<String> {
        self.inner.with_guest(|guest| {
            let (ptr, len) = guest.pass_string(text, WriteMode::Growable)?;
            guest.round_trip(ptr, len)
        })
    }

    /// Version string reported by the guest
    pub fn version(&self) -> BindingResult<String> {
        self.inner.with_guest(|guest| guest.version())
    }

    /// Direct access to the guest for diagnostics and low-level calls.
    ///
    /// The guest lock is held for the whole closure and is not reentrant:
    /// calling any `GramCodec` operation, or `ParseResult::release` and the
    /// result accessors, from inside `f` deadlocks. Dropping a `ParseResult`
    /// inside `f` is fine; its release is deferred to the next call.
    pub fn with_guest<R>(
        &self,
        f: impl FnOnce(&mut GuestInstance) -> BindingResult<R>,
    ) -> BindingResult<R> {
        self.inner.with_guest(f)
    }

    /// Whether both handles share the same guest
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for GramCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.guest.try_lock() {
            Some(guest) => f.debug_tuple("GramCodec").field(&*guest).finish(),
            None => f.write_str("GramCodec(<busy>)"),
        }
    }
}
