//! ABI definitions for the Gram codec guest
//!
//! Defines the interface contract between the host bindings and the guest module.

/// Module name for host function imports
pub const HOST_MODULE_NAME: &str = "wbg";

/// Exports the guest module must (or may) provide
pub mod exports {
    /// Linear memory
    pub const MEMORY: &str = "memory";

    /// Signature: (size: i32, align: i32) -> i32 (pointer, 0 on failure)
    pub const MALLOC: &str = "__wbindgen_malloc";

    /// Optional
    /// Signature: (ptr: i32, old_size: i32, new_size: i32, align: i32) -> i32
    pub const REALLOC: &str = "__wbindgen_realloc";

    /// Signature: (ptr: i32, size: i32, align: i32) -> ()
    pub const FREE: &str = "__wbindgen_free";

    /// Optional: run once right after instantiation
    /// Signature: () -> ()
    pub const START: &str = "__wbindgen_start";

    /// Signature: (ptr: i32, len: i32) -> (result_ptr: i32, error_ref: i32, flag: i32)
    pub const PARSE: &str = "parse_gram";

    /// Signature: (ptr: i32, len: i32) -> i32 (0 or 1)
    pub const VALIDATE: &str = "validate_gram";

    /// Signature: (ptr: i32, len: i32) -> (out_ptr: i32, out_len: i32, error_ref: i32, flag: i32)
    pub const ROUND_TRIP: &str = "round_trip";

    /// Signature: () -> (out_ptr: i32, out_len: i32)
    pub const VERSION: &str = "version";

    /// Signature: (resource: i32) -> i32
    pub const PARSE_RESULT_PATTERN_COUNT: &str = "parseresult_pattern_count";

    /// Signature: (resource: i32) -> (array_ptr: i32, count: i32), array of table indices
    pub const PARSE_RESULT_IDENTIFIERS: &str = "parseresult_identifiers";

    /// Signature: (resource: i32, is_finalizer: i32) -> ()
    pub const PARSE_RESULT_FREE: &str = "__wbg_parseresult_free";
}

/// Host functions the guest imports from [`HOST_MODULE_NAME`]
pub mod imports {
    /// Seed the reference table sentinels
    /// Signature: () -> ()
    pub const INIT_EXTERNREF_TABLE: &str = "__wbindgen_init_externref_table";

    /// Store guest text as a host string
    /// Signature: (ptr: i32, len: i32) -> i32 (table index)
    pub const STRING_NEW: &str = "__wbindgen_string_new";

    /// Store guest text as a host error value
    /// Signature: (ptr: i32, len: i32) -> i32 (table index)
    pub const ERROR_NEW: &str = "__wbindgen_error_new";

    /// Abort the current call with a message
    /// Signature: (ptr: i32, len: i32) -> ()
    pub const THROW: &str = "__wbindgen_throw";

    /// Release a table slot the guest owns
    /// Signature: (index: i32) -> ()
    pub const EXTERNREF_DEALLOC: &str = "__externref_table_dealloc";
}

/// Who asked the guest to free a resource
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseKind {
    /// `release()` was called by the owner
    Explicit = 0,
    /// The handle was dropped while still live
    Finalizer = 1,
}

/// Raw return of a fallible export yielding a pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerResult {
    pub value: u32,
    pub error_ref: u32,
    pub flag: u32,
}

impl From<(i32, i32, i32)> for PointerResult {
    fn from((value, error_ref, flag): (i32, i32, i32)) -> Self {
        Self {
            value: value as u32,
            error_ref: error_ref as u32,
            flag: flag as u32,
        }
    }
}

impl PointerResult {
    /// `Ok(pointer)` on success, `Err(table index)` when the guest threw
    pub fn into_result(self) -> Result<u32, u32> {
        if self.flag != 0 {
            Err(self.error_ref)
        } else {
            Ok(self.value)
        }
    }
}

/// Raw return of a fallible export yielding a `(ptr, len)` buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringResult {
    pub ptr: u32,
    pub len: u32,
    pub error_ref: u32,
    pub flag: u32,
}

impl From<(i32, i32, i32, i32)> for StringResult {
    fn from((ptr, len, error_ref, flag): (i32, i32, i32, i32)) -> Self {
        Self {
            ptr: ptr as u32,
            len: len as u32,
            error_ref: error_ref as u32,
            flag: flag as u32,
        }
    }
}

impl StringResult {
    /// `Ok((ptr, len))` on success, `Err(table index)` when the guest threw
    pub fn into_result(self) -> Result<(u32, u32), u32> {
        if self.flag != 0 {
            Err(self.error_ref)
        } else {
            Ok((self.ptr, self.len))
        }
    }
}
