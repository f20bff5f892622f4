//! Compiled guest module
//!
//! Compilation checks the export contract up front so a guest built against a
//! different ABI fails at load time rather than on the first call.

use crate::abi::exports;
use crate::engine::CodecEngine;
use crate::error::{BindingError, BindingResult};
use wasmtime::{ExternType, FuncType, Module, ValType};

/// A compiled guest module together with its content hash
#[derive(Clone)]
pub struct GuestModule {
    module: Module,
    hash: String,
}

impl GuestModule {
    /// Compile a module from bytes
    pub fn from_bytes(engine: &CodecEngine, bytes: &[u8]) -> BindingResult<Self> {
        let hash = blake3::hash(bytes).to_hex().to_string();
        let module = Module::new(engine.engine(), bytes).map_err(|e| {
            BindingError::compilation(format!("Failed to compile guest module: {}", e))
        })?;
        Self::from_compiled(module, hash)
    }

    /// Wrap a module compiled elsewhere; the hash is only used for diagnostics
    pub fn from_compiled(module: Module, hash: impl Into<String>) -> BindingResult<Self> {
        Self::validate_exports(&module)?;
        Ok(Self {
            module,
            hash: hash.into(),
        })
    }

    fn validate_exports(module: &Module) -> BindingResult<()> {
        match module.get_export(exports::MEMORY) {
            Some(ExternType::Memory(_)) => {}
            Some(other) => {
                return Err(BindingError::InvalidExportSignature {
                    export_name: exports::MEMORY.to_string(),
                    expected: "memory".to_string(),
                    actual: format!("{:?}", other),
                })
            }
            None => {
                return Err(BindingError::MissingExport {
                    export_name: exports::MEMORY.to_string(),
                })
            }
        }

        use ValType::I32;
        let required: [(&str, &[ValType], &[ValType]); 9] = [
            (exports::MALLOC, &[I32, I32], &[I32]),
            (exports::FREE, &[I32, I32, I32], &[]),
            (exports::PARSE, &[I32, I32], &[I32, I32, I32]),
            (exports::VALIDATE, &[I32, I32], &[I32]),
            (exports::ROUND_TRIP, &[I32, I32], &[I32, I32, I32, I32]),
            (exports::VERSION, &[], &[I32, I32]),
            (exports::PARSE_RESULT_PATTERN_COUNT, &[I32], &[I32]),
            (exports::PARSE_RESULT_IDENTIFIERS, &[I32], &[I32, I32]),
            (exports::PARSE_RESULT_FREE, &[I32, I32], &[]),
        ];
        for (name, params, results) in required {
            Self::check_func(module, name, params, results, true)?;
        }

        Self::check_func(module, exports::REALLOC, &[I32, I32, I32, I32], &[I32], false)?;
        Self::check_func(module, exports::START, &[], &[], false)?;

        Ok(())
    }

    fn check_func(
        module: &Module,
        name: &str,
        params: &[ValType],
        results: &[ValType],
        required: bool,
    ) -> BindingResult<()> {
        let func = match module.get_export(name) {
            Some(ExternType::Func(func)) => func,
            Some(other) => {
                return Err(BindingError::InvalidExportSignature {
                    export_name: name.to_string(),
                    expected: "function".to_string(),
                    actual: format!("{:?}", other),
                })
            }
            None if required => {
                return Err(BindingError::MissingExport {
                    export_name: name.to_string(),
                })
            }
            None => return Ok(()),
        };

        if !signature_matches(&func, params, results) {
            return Err(BindingError::InvalidExportSignature {
                export_name: name.to_string(),
                expected: format!("{:?} -> {:?}", params, results),
                actual: format!(
                    "{:?} -> {:?}",
                    func.params().collect::<Vec<_>>(),
                    func.results().collect::<Vec<_>>()
                ),
            });
        }
        Ok(())
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    /// blake3 hash of the module bytes
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Whether the guest exports `__wbindgen_realloc`
    pub fn has_realloc(&self) -> bool {
        self.module.get_export(exports::REALLOC).is_some()
    }
}

fn signature_matches(func: &FuncType, params: &[ValType], results: &[ValType]) -> bool {
    types_match(func.params(), params) && types_match(func.results(), results)
}

fn types_match(actual: impl ExactSizeIterator<Item = ValType>, expected: &[ValType]) -> bool {
    actual.len() == expected.len() && actual.zip(expected).all(|(a, e)| ValType::eq(&a, e))
}

impl std::fmt::Debug for GuestModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestModule")
            .field("hash", &self.hash)
            .field("has_realloc", &self.has_realloc())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BindingConfig;

    fn engine() -> CodecEngine {
        CodecEngine::new(BindingConfig::development()).unwrap()
    }

    #[test]
    fn test_invalid_bytes_fail_compilation() {
        let err = GuestModule::from_bytes(&engine(), b"not wasm").unwrap_err();
        assert!(matches!(err, BindingError::Compilation { .. }));
    }

    #[test]
    fn test_missing_export_rejected() {
        let wasm = wat::parse_str(r#"(module (memory (export "memory") 1))"#).unwrap();
        let err = GuestModule::from_bytes(&engine(), &wasm).unwrap_err();
        match err {
            BindingError::MissingExport { export_name } => {
                assert_eq!(export_name, exports::MALLOC)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_wrong_signature_rejected() {
        let wasm = wat::parse_str(
            r#"(module
                (memory (export "memory") 1)
                (func (export "__wbindgen_malloc") (param i32) (result i32) i32.const 0))"#,
        )
        .unwrap();
        let err = GuestModule::from_bytes(&engine(), &wasm).unwrap_err();
        assert!(matches!(err, BindingError::InvalidExportSignature { .. }));
    }
}
