//! Process-wide codec
//!
//! The first successful `init` wins; later calls return the same codec and
//! never instantiate again. A failed or cancelled `init` leaves nothing behind.

use crate::codec::GramCodec;
use crate::engine::BindingConfig;
use crate::error::{BindingError, BindingResult};
use crate::loader::{ModuleSource, PrecompiledSource};
use tokio::sync::{OnceCell, SetError};

static CODEC: OnceCell<GramCodec> = OnceCell::const_new();

/// Initialize the process-wide codec from any source
pub async fn init(source: ModuleSource, config: BindingConfig) -> BindingResult<GramCodec> {
    if let Some(codec) = CODEC.get() {
        tracing::debug!("Gram codec already initialized");
        return Ok(codec.clone());
    }
    CODEC
        .get_or_try_init(|| GramCodec::load(source, config))
        .await
        .cloned()
}

/// Initialize from bytes or a compiled module without awaiting
///
/// Fails if an asynchronous `init` is still in flight.
pub fn init_sync(source: PrecompiledSource, config: BindingConfig) -> BindingResult<GramCodec> {
    if let Some(codec) = CODEC.get() {
        tracing::debug!("Gram codec already initialized");
        return Ok(codec.clone());
    }
    let codec = GramCodec::load_sync(source, config)?;
    match CODEC.set(codec.clone()) {
        Ok(()) => Ok(codec),
        Err(SetError::AlreadyInitializedError(_)) => CODEC
            .get()
            .cloned()
            .ok_or(BindingError::NotInitialized),
        Err(SetError::InitializingError(_)) => Err(BindingError::instantiation(
            "Gram codec is being initialized asynchronously",
        )),
    }
}

/// Initialize from `config.default_module`
pub async fn init_default(config: BindingConfig) -> BindingResult<GramCodec> {
    let path = config.default_module.clone();
    init(ModuleSource::Path(path), config).await
}

/// The process-wide codec
pub fn codec() -> BindingResult<GramCodec> {
    CODEC.get().cloned().ok_or(BindingError::NotInitialized)
}

pub fn is_initialized() -> bool {
    CODEC.initialized()
}
