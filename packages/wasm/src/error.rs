//! Error types for the Gram codec bindings

use crate::value::HostValue;
use std::fmt;
use thiserror::Error;

/// Result type for binding operations
pub type BindingResult<T> = Result<T, BindingError>;

/// Errors that can occur while loading or calling the guest module
#[derive(Error, Debug)]
pub enum BindingError {
    /// Failed to compile the guest module
    #[error("Compilation error: {message}")]
    Compilation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Failed to link or start the guest module
    #[error("Instantiation error: {message}")]
    Instantiation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Required export not found in the guest module
    #[error("Missing required export: {export_name}")]
    MissingExport { export_name: String },

    /// Export has wrong signature
    #[error("Invalid export signature for {export_name}: expected {expected}, got {actual}")]
    InvalidExportSignature {
        export_name: String,
        expected: String,
        actual: String,
    },

    /// Guest allocator returned the failure sentinel
    #[error("Allocation failed: guest could not provide {requested} bytes")]
    Allocation { requested: usize },

    /// Guest bytes are not valid UTF-8
    #[error("Decode error: {0}")]
    Decode(#[from] std::string::FromUtf8Error),

    /// The guest raised a domain error
    #[error("{message}")]
    Guest { message: String, value: HostValue },

    /// Resource accessed after it was released or finalized
    #[error("Use after release: {resource} has already been freed")]
    UseAfterRelease { resource: &'static str },

    /// Memory access violation
    #[error("Memory access error: {message}")]
    MemoryAccess { message: String },

    /// External reference index outside the table or not holding what was expected
    #[error("Invalid external reference {index}: {message}")]
    InvalidReference { index: u32, message: String },

    /// A guest export trapped
    #[error("Execution error in {function}: {message}")]
    Execution { function: String, message: String },

    /// The process-wide codec was used before `init`
    #[error("Gram codec has not been initialized")]
    NotInitialized,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failed to fetch the guest binary
    #[error("Fetch error: {0}")]
    Fetch(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BindingError {
    pub fn compilation(message: impl Into<String>) -> Self {
        BindingError::Compilation {
            message: message.into(),
            source: None,
        }
    }

    pub fn instantiation(message: impl Into<String>) -> Self {
        BindingError::Instantiation {
            message: message.into(),
            source: None,
        }
    }

    pub fn execution(function: impl Into<String>, message: impl Into<String>) -> Self {
        BindingError::Execution {
            function: function.into(),
            message: message.into(),
        }
    }

    pub fn memory_access(message: impl Into<String>) -> Self {
        BindingError::MemoryAccess {
            message: message.into(),
        }
    }

    pub fn invalid_reference(index: u32, message: impl Into<String>) -> Self {
        BindingError::InvalidReference {
            index,
            message: message.into(),
        }
    }

    /// Build a guest error from a value taken out of the reference table
    pub fn guest(value: HostValue) -> Self {
        BindingError::Guest {
            message: value.to_message(),
            value,
        }
    }

    /// Coarse classification used by callers that only care about the failure class
    pub fn kind(&self) -> ErrorKind {
        match self {
            BindingError::Compilation { .. }
            | BindingError::Instantiation { .. }
            | BindingError::MissingExport { .. }
            | BindingError::InvalidExportSignature { .. }
            | BindingError::Fetch(_)
            | BindingError::Io(_) => ErrorKind::Instantiation,
            BindingError::Allocation { .. } => ErrorKind::Allocation,
            BindingError::Decode(_) => ErrorKind::Decode,
            BindingError::Guest { .. } => ErrorKind::GuestRaised,
            BindingError::UseAfterRelease { .. } => ErrorKind::UseAfterRelease,
            BindingError::MemoryAccess { .. }
            | BindingError::InvalidReference { .. }
            | BindingError::Execution { .. }
            | BindingError::NotInitialized
            | BindingError::Config(_) => ErrorKind::Other,
        }
    }
}

/// Failure classes surfaced by the bindings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Instantiation,
    Allocation,
    Decode,
    GuestRaised,
    UseAfterRelease,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Instantiation => write!(f, "Instantiation failure"),
            ErrorKind::Allocation => write!(f, "Allocation failure"),
            ErrorKind::Decode => write!(f, "Decode failure"),
            ErrorKind::GuestRaised => write!(f, "Guest raised error"),
            ErrorKind::UseAfterRelease => write!(f, "Use after release"),
            ErrorKind::Other => write!(f, "Error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_error_keeps_message() {
        let err = BindingError::guest(HostValue::error("Parse error: bad input"));
        assert_eq!(err.kind(), ErrorKind::GuestRaised);
        assert_eq!(err.to_string(), "Parse error: bad input");
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            BindingError::Allocation { requested: 8 }.kind(),
            ErrorKind::Allocation
        );
        assert_eq!(
            BindingError::compilation("bad magic").kind(),
            ErrorKind::Instantiation
        );
        assert_eq!(
            BindingError::UseAfterRelease {
                resource: "ParseResult"
            }
            .kind(),
            ErrorKind::UseAfterRelease
        );
        let decode = String::from_utf8(vec![0xff]).unwrap_err();
        assert_eq!(BindingError::from(decode).kind(), ErrorKind::Decode);
    }
}
