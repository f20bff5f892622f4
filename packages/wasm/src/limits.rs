//! Resource limits for the guest store

use wasmtime::ResourceLimiter;

/// Default memory limit: 64MB
pub const DEFAULT_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

/// Denies guest memory growth beyond a hard limit
///
/// A denied `memory.grow` returns -1 to the guest, which its allocator turns
/// into a null pointer.
#[derive(Debug)]
pub struct MemoryLimiter {
    max_memory: usize,
    current: usize,
    denied: u64,
}

impl MemoryLimiter {
    pub fn new(max_memory: usize) -> Self {
        Self {
            max_memory,
            current: 0,
            denied: 0,
        }
    }

    /// Size of guest memory after the last permitted growth
    pub fn current(&self) -> usize {
        self.current
    }

    /// Number of growth requests refused so far
    pub fn denied(&self) -> u64 {
        self.denied
    }
}

impl ResourceLimiter for MemoryLimiter {
    fn memory_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        if desired > self.max_memory {
            tracing::debug!(
                "Denied guest memory growth to {} bytes (limit {})",
                desired,
                self.max_memory
            );
            self.denied += 1;
            return Ok(false);
        }
        self.current = desired;
        Ok(true)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        _desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        Ok(true)
    }
}
