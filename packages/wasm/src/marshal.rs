//! String marshalling between host `str` and guest linear memory
//!
//! Writes hand ownership of a freshly allocated guest buffer to the callee.
//! Reads decode strictly; invalid UTF-8 is an error, never replaced.

use crate::error::{BindingError, BindingResult};
use crate::memory::ByteViewMut;

/// Decoder ceiling after which the decoder state is rebuilt
pub const DEFAULT_DECODE_CEILING: usize = 2_146_435_072;

/// Upper bound of UTF-8 bytes produced per UTF-16 code unit
const MAX_BYTES_PER_UNIT: usize = 3;

/// Allocation primitives the marshaller needs from the guest
pub trait GuestAllocator {
    /// Allocate `size` bytes; the guest signals failure with a null pointer
    fn malloc(&mut self, size: u32, align: u32) -> BindingResult<u32>;

    /// Resize an allocation, possibly moving it
    fn realloc(&mut self, ptr: u32, old_size: u32, new_size: u32, align: u32)
        -> BindingResult<u32>;

    /// Whether `realloc` is exported by the guest
    fn supports_realloc(&self) -> bool;

    /// A fresh writable view over guest memory
    fn bytes_mut(&mut self) -> ByteViewMut<'_>;
}

/// How a string is written into the guest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Encode up front and allocate exactly the encoded length
    Exact,
    /// Copy ASCII directly, grow with `realloc` once a multi-byte code point shows up
    Growable,
}

fn guest_len(len: usize) -> BindingResult<u32> {
    u32::try_from(len).map_err(|_| BindingError::Allocation { requested: len })
}

/// Copy `text` into guest memory and return `(ptr, len)`
///
/// `Growable` falls back to `Exact` when the guest has no `realloc`.
pub fn write_str<A>(alloc: &mut A, text: &str, mode: WriteMode) -> BindingResult<(u32, u32)>
where
    A: GuestAllocator + ?Sized,
{
    match mode {
        WriteMode::Growable if alloc.supports_realloc() => write_growable(alloc, text),
        _ => write_exact(alloc, text),
    }
}

fn write_exact<A: GuestAllocator + ?Sized>(alloc: &mut A, text: &str) -> BindingResult<(u32, u32)> {
    let bytes = text.as_bytes();
    let len = guest_len(bytes.len())?;
    let ptr = alloc.malloc(len, 1)?;
    alloc.bytes_mut().write(ptr, bytes)?;
    Ok((ptr, len))
}

fn write_growable<A: GuestAllocator + ?Sized>(
    alloc: &mut A,
    text: &str,
) -> BindingResult<(u32, u32)> {
    let bytes = text.as_bytes();
    let mut len = guest_len(text.encode_utf16().count())?;
    let mut ptr = alloc.malloc(len, 1)?;

    let mut offset = 0usize;
    {
        let mut view = alloc.bytes_mut();
        let dst = view.slice_mut(ptr, len)?;
        // `len` UTF-16 units never exceed the UTF-8 byte length
        while offset < dst.len() {
            let byte = bytes[offset];
            if byte > 0x7F {
                break;
            }
            dst[offset] = byte;
            offset += 1;
        }
    }

    if offset != len as usize {
        let rest = &text[offset..];
        let worst_case = guest_len(offset + rest.encode_utf16().count() * MAX_BYTES_PER_UNIT)?;
        ptr = alloc.realloc(ptr, len, worst_case, 1)?;
        len = worst_case;

        alloc.bytes_mut().write(ptr + offset as u32, rest.as_bytes())?;
        offset += rest.len();

        ptr = alloc.realloc(ptr, len, offset as u32, 1)?;
    }

    Ok((ptr, offset as u32))
}

/// Strict UTF-8 decoder with cumulative byte accounting
#[derive(Debug)]
pub struct Utf8Decoder {
    decoded: usize,
    ceiling: usize,
    resets: u64,
}

impl Default for Utf8Decoder {
    fn default() -> Self {
        Self::new(DEFAULT_DECODE_CEILING)
    }
}

impl Utf8Decoder {
    pub fn new(ceiling: usize) -> Self {
        Self {
            decoded: 0,
            ceiling: ceiling.max(1),
            resets: 0,
        }
    }

    /// Decode bytes copied out of guest memory
    pub fn decode(&mut self, bytes: Vec<u8>) -> BindingResult<String> {
        let len = bytes.len();
        self.decoded = self.decoded.saturating_add(len);
        if self.decoded >= self.ceiling {
            self.reinstantiate(len);
        }
        Ok(String::from_utf8(bytes)?)
    }

    fn reinstantiate(&mut self, carried: usize) {
        tracing::debug!(
            "Decoder passed {} bytes, reinstantiating",
            self.decoded - carried
        );
        *self = Self {
            decoded: carried,
            ceiling: self.ceiling,
            resets: self.resets + 1,
        };
    }

    /// Bytes decoded since the last reinstantiation
    pub fn decoded(&self) -> usize {
        self.decoded
    }

    /// Number of times the decoder has been rebuilt
    pub fn resets(&self) -> u64 {
        self.resets
    }
}
