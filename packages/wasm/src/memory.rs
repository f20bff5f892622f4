//! Memory view cache for guest linear memory
//!
//! Views are borrowed windows over the guest buffer. The cache remembers the
//! identity of the buffer the last view was built from; whenever the guest
//! grows its memory the base address or length changes, the generation is
//! bumped and the next view is rebuilt against the new buffer. Callers must
//! request a fresh view after anything that can allocate in the guest.

use crate::error::{BindingError, BindingResult};
use std::ops::Range;
use wasmtime::{AsContext, AsContextMut, Memory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BufferIdentity {
    base: usize,
    len: usize,
}

/// Lazily revalidated views over a guest memory
#[derive(Debug, Default)]
pub struct MemoryViews {
    identity: Option<BufferIdentity>,
    generation: u64,
}

impl MemoryViews {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the cached buffer; the next access starts a new generation
    pub fn reset(&mut self) {
        self.identity = None;
    }

    /// Generation of the most recently validated buffer
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn revalidate(&mut self, memory: &Memory, store: impl AsContext) -> u64 {
        let current = BufferIdentity {
            base: memory.data_ptr(&store) as usize,
            len: memory.data_size(&store),
        };
        if self.identity != Some(current) {
            if let Some(previous) = self.identity {
                tracing::trace!(
                    "Guest memory changed ({} -> {} bytes), rebuilding views",
                    previous.len,
                    current.len
                );
            }
            self.identity = Some(current);
            self.generation += 1;
        }
        self.generation
    }

    /// Byte-granular read view
    pub fn bytes<'a, S: AsContext>(&mut self, memory: &Memory, store: &'a S) -> ByteView<'a> {
        let generation = self.revalidate(memory, store);
        ByteView {
            data: memory.data(store),
            generation,
        }
    }

    /// Byte-granular write view
    pub fn bytes_mut<'a, S: AsContextMut>(
        &mut self,
        memory: &Memory,
        store: &'a mut S,
    ) -> ByteViewMut<'a> {
        let generation = self.revalidate(memory, &*store);
        ByteViewMut::new(memory.data_mut(store), generation)
    }

    /// 4-byte word view (little endian, aligned reads only)
    pub fn words<'a, S: AsContext>(&mut self, memory: &Memory, store: &'a S) -> WordView<'a> {
        let generation = self.revalidate(memory, store);
        WordView {
            data: memory.data(store),
            generation,
        }
    }
}

fn checked_range(ptr: u32, len: usize, size: usize, op: &str) -> BindingResult<Range<usize>> {
    let start = ptr as usize;
    let end = start
        .checked_add(len)
        .ok_or_else(|| BindingError::memory_access("Memory address overflow"))?;

    if end > size {
        return Err(BindingError::memory_access(format!(
            "Memory access out of bounds: trying to {} {} bytes at offset {}, but memory size is {}",
            op, len, ptr, size
        )));
    }
    Ok(start..end)
}

/// Read-only byte view
#[derive(Debug, Clone, Copy)]
pub struct ByteView<'a> {
    data: &'a [u8],
    generation: u64,
}

impl<'a> ByteView<'a> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn slice(&self, ptr: u32, len: u32) -> BindingResult<&'a [u8]> {
        let range = checked_range(ptr, len as usize, self.data.len(), "read")?;
        Ok(&self.data[range])
    }
}

/// Mutable byte view
#[derive(Debug)]
pub struct ByteViewMut<'a> {
    data: &'a mut [u8],
    generation: u64,
}

impl<'a> ByteViewMut<'a> {
    pub(crate) fn new(data: &'a mut [u8], generation: u64) -> Self {
        Self { data, generation }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn slice_mut(&mut self, ptr: u32, len: u32) -> BindingResult<&mut [u8]> {
        let range = checked_range(ptr, len as usize, self.data.len(), "write")?;
        Ok(&mut self.data[range])
    }

    pub fn write(&mut self, ptr: u32, bytes: &[u8]) -> BindingResult<()> {
        let range = checked_range(ptr, bytes.len(), self.data.len(), "write")?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }
}

/// Word view for arrays of `u32` (table indices, pointers)
#[derive(Debug, Clone, Copy)]
pub struct WordView<'a> {
    data: &'a [u8],
    generation: u64,
}

impl WordView<'_> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn read_u32(&self, addr: u32) -> BindingResult<u32> {
        if addr % 4 != 0 {
            return Err(BindingError::memory_access(format!(
                "Unaligned word access at offset {}",
                addr
            )));
        }
        let range = checked_range(addr, 4, self.data.len(), "read")?;
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.data[range]);
        Ok(u32::from_le_bytes(word))
    }

    /// Read `count` consecutive words starting at `ptr`
    pub fn read_array(&self, ptr: u32, count: u32) -> BindingResult<Vec<u32>> {
        let byte_len = (count as usize)
            .checked_mul(4)
            .ok_or_else(|| BindingError::memory_access("Memory address overflow"))?;
        checked_range(ptr, byte_len, self.data.len(), "read")?;
        (0..count).map(|i| self.read_u32(ptr + i * 4)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmtime::{Engine, MemoryType, Store};

    fn memory() -> (Store<()>, Memory) {
        let engine = Engine::default();
        let mut store = Store::new(&engine, ());
        let memory = Memory::new(&mut store, MemoryType::new(1, Some(4))).unwrap();
        (store, memory)
    }

    #[test]
    fn test_generation_stable_without_growth() {
        let (store, memory) = memory();
        let mut views = MemoryViews::new();
        let first = views.bytes(&memory, &store).generation();
        let second = views.words(&memory, &store).generation();
        assert_eq!(first, 1);
        assert_eq!(first, second);
    }

    #[test]
    fn test_growth_invalidates_views() {
        let (mut store, memory) = memory();
        let mut views = MemoryViews::new();
        let before = views.bytes(&memory, &store).generation();

        memory.grow(&mut store, 1).unwrap();

        let view = views.bytes(&memory, &store);
        assert!(view.generation() > before);
        assert_eq!(view.len(), 2 * 65536);
    }

    #[test]
    fn test_reset_starts_new_generation_on_next_access() {
        let (store, memory) = memory();
        let mut views = MemoryViews::new();
        views.bytes(&memory, &store);
        views.reset();
        assert_eq!(views.bytes(&memory, &store).generation(), 2);
    }

    #[test]
    fn test_write_then_read_words() {
        let (mut store, memory) = memory();
        let mut views = MemoryViews::new();
        {
            let mut view = views.bytes_mut(&memory, &mut store);
            view.write(16, &7u32.to_le_bytes()).unwrap();
            view.write(20, &9u32.to_le_bytes()).unwrap();
        }
        let words = views.words(&memory, &store);
        assert_eq!(words.read_array(16, 2).unwrap(), vec![7, 9]);
        assert!(words.read_u32(17).is_err());
    }

    #[test]
    fn test_out_of_bounds() {
        let (store, memory) = memory();
        let mut views = MemoryViews::new();
        let view = views.bytes(&memory, &store);
        assert!(view.slice(65530, 10).is_err());
        assert!(view.slice(u32::MAX, 2).is_err());
        assert_eq!(view.slice(65530, 6).unwrap().len(), 6);
    }
}
