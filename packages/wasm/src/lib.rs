//! Gram codec bindings
//!
//! Host-side bindings for the Gram codec WebAssembly guest. The guest parses,
//! validates and re-serializes Gram notation; this crate loads it with
//! wasmtime and bridges its linear memory to Rust values.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                      GramCodec (façade)                    │
//! │      parse · validate · round_trip · version               │
//! ├──────────────┬──────────────┬──────────────┬──────────────┤
//! │ marshal      │ memory       │ table        │ resource     │
//! │ str <-> UTF-8│ view cache   │ host values  │ ParseResult  │
//! ├──────────────┴──────────────┴──────────────┴──────────────┤
//! │            GuestInstance (wasmtime Store + exports)        │
//! ├───────────────────────────────────────────────────────────┤
//! │       ModuleLoader (bytes · file · URL · response)         │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use gram_codec_wasm::{global, BindingConfig, ModuleSource};
//!
//! let codec = global::init(ModuleSource::Path("gram_codec_bg.wasm".into()), BindingConfig::default()).await?;
//!
//! assert!(codec.validate("(hello)")?);
//!
//! let result = codec.parse("(alice) (bob) (charlie)")?;
//! assert_eq!(result.pattern_count()?, 3);
//! result.release()?;
//! ```

pub mod abi;
pub mod codec;
pub mod engine;
pub mod error;
pub mod global;
pub mod host;
pub mod instance;
pub mod limits;
pub mod loader;
pub mod marshal;
pub mod memory;
pub mod module;
pub mod resource;
pub mod table;
pub mod value;

pub use codec::GramCodec;
pub use engine::{BindingConfig, CodecEngine, OptimizationLevel};
pub use error::{BindingError, BindingResult, ErrorKind};
pub use instance::GuestInstance;
pub use loader::{ModuleLoader, ModuleResponse, ModuleSource, PrecompiledSource, ResponseKind};
pub use marshal::WriteMode;
pub use resource::{ParseResult, ParseSummary};
pub use value::HostValue;
