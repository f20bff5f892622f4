//! Guest-owned parse results
//!
//! A [`ParseResult`] owns a pointer into guest memory. `release()` frees it
//! explicitly; dropping a live handle frees it as a finalizer. The pointer
//! is zeroed exactly once, so any mix of the two frees the guest object once.

use crate::abi::{exports, ReleaseKind};
use crate::codec::CodecInner;
use crate::error::{BindingError, BindingResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

const RESOURCE_NAME: &str = "ParseResult";

/// Plain copy of a parse result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseSummary {
    pub pattern_count: usize,
    pub identifiers: Vec<String>,
}

/// Handle to a parse summary held by the guest
pub struct ParseResult {
    ptr: AtomicU32,
    codec: Arc<CodecInner>,
}

impl ParseResult {
    pub(crate) fn wrap(ptr: u32, codec: Arc<CodecInner>) -> Self {
        Self {
            ptr: AtomicU32::new(ptr),
            codec,
        }
    }

    fn live_ptr(&self) -> BindingResult<u32> {
        match self.ptr.load(Ordering::Acquire) {
            0 => Err(BindingError::UseAfterRelease {
                resource: RESOURCE_NAME,
            }),
            ptr => Ok(ptr),
        }
    }

    pub fn is_released(&self) -> bool {
        self.ptr.load(Ordering::Acquire) == 0
    }

    /// Free the guest object now; later calls are no-ops
    pub fn release(&self) -> BindingResult<()> {
        self.codec.with_guest(|guest| {
            let ptr = self.ptr.swap(0, Ordering::AcqRel);
            if ptr == 0 {
                return Ok(());
            }
            guest.free_resource(ptr, ReleaseKind::Explicit).map(|_| ())
        })
    }

    /// Number of top-level patterns
    pub fn pattern_count(&self) -> BindingResult<usize> {
        self.codec.with_guest(|guest| {
            let ptr = self.live_ptr()?;
            guest.pattern_count(ptr)
        })
    }

    /// Identifiers of the top-level patterns, in source order
    pub fn identifiers(&self) -> BindingResult<Vec<String>> {
        let values = self.codec.with_guest(|guest| {
            let ptr = self.live_ptr()?;
            guest.identifiers(ptr)
        })?;
        values
            .into_iter()
            .map(|value| match value.into_string() {
                Some(s) => Ok(s),
                None => Err(BindingError::Execution {
                    function: exports::PARSE_RESULT_IDENTIFIERS.to_string(),
                    message: "identifier is not a string".to_string(),
                }),
            })
            .collect()
    }

    /// Copy the whole result out of the guest
    pub fn summary(&self) -> BindingResult<ParseSummary> {
        Ok(ParseSummary {
            pattern_count: self.pattern_count()?,
            identifiers: self.identifiers()?,
        })
    }
}

impl Drop for ParseResult {
    fn drop(&mut self) {
        let ptr = std::mem::take(self.ptr.get_mut());
        if ptr != 0 {
            tracing::debug!("Finalizing unreleased parse result {}", ptr);
            self.codec.finalize(ptr);
        }
    }
}

impl std::fmt::Debug for ParseResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParseResult")
            .field("ptr", &self.ptr.load(Ordering::Relaxed))
            .finish()
    }
}
