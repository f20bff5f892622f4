//! Guest module loading
//!
//! Turns bytes, files, URLs or fetched responses into a live
//! [`GuestInstance`]. A failed load never yields a partially initialized
//! instance.

use crate::engine::{BindingConfig, CodecEngine};
use crate::error::{BindingError, BindingResult};
use crate::instance::GuestInstance;
use crate::module::GuestModule;
use bytes::Bytes;
use std::path::PathBuf;
use wasmtime::Module;

/// MIME type required for direct compilation of a response body
pub const WASM_MIME_TYPE: &str = "application/wasm";

/// Where the guest binary comes from
pub enum ModuleSource {
    /// Raw module bytes
    Bytes(Bytes),
    /// A module compiled by the caller with the same engine configuration
    Compiled(Module),
    /// A response already fetched by the caller
    Response(ModuleResponse),
    /// A file on disk
    Path(PathBuf),
    /// A URL fetched with `reqwest`
    Url(String),
}

impl From<Vec<u8>> for ModuleSource {
    fn from(bytes: Vec<u8>) -> Self {
        ModuleSource::Bytes(Bytes::from(bytes))
    }
}

impl From<ModuleResponse> for ModuleSource {
    fn from(response: ModuleResponse) -> Self {
        ModuleSource::Response(response)
    }
}

/// Sources that can be instantiated without awaiting anything
pub enum PrecompiledSource {
    Bytes(Bytes),
    Compiled(Module),
}

impl From<Vec<u8>> for PrecompiledSource {
    fn from(bytes: Vec<u8>) -> Self {
        PrecompiledSource::Bytes(Bytes::from(bytes))
    }
}

/// Response classification, mirroring the fetch `Response.type` values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Basic,
    Cors,
    Default,
    Error,
    Opaque,
    OpaqueRedirect,
}

impl ResponseKind {
    /// Kinds whose body is readable and may be compiled after a failed streaming attempt
    pub fn allows_fallback(self) -> bool {
        matches!(
            self,
            ResponseKind::Basic | ResponseKind::Cors | ResponseKind::Default
        )
    }
}

/// A fetched guest binary with the metadata streaming compilation checks
#[derive(Debug, Clone)]
pub struct ModuleResponse {
    pub url: String,
    pub status: u16,
    pub kind: ResponseKind,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl ModuleResponse {
    pub fn new(
        url: impl Into<String>,
        status: u16,
        content_type: Option<&str>,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            url: url.into(),
            status,
            kind: ResponseKind::Basic,
            content_type: content_type.map(str::to_string),
            body: body.into(),
        }
    }

    pub fn with_kind(mut self, kind: ResponseKind) -> Self {
        self.kind = kind;
        self
    }

    /// Fetch `url` and buffer the body
    pub async fn fetch(url: &str) -> BindingResult<Self> {
        tracing::debug!("Fetching guest module from {}", url);
        let response = reqwest::get(url).await?;
        Self::from_reqwest(response).await
    }

    pub async fn from_reqwest(response: reqwest::Response) -> BindingResult<Self> {
        let url = response.url().to_string();
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;
        Ok(Self {
            url,
            status,
            kind: ResponseKind::Basic,
            content_type,
            body,
        })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the declared media type is `application/wasm` (parameters ignored)
    pub fn is_wasm(&self) -> bool {
        self.content_type
            .as_deref()
            .and_then(|value| value.split(';').next())
            .is_some_and(|essence| essence.trim().eq_ignore_ascii_case(WASM_MIME_TYPE))
    }

    /// A readable, successful response that was merely served with the wrong type
    fn can_fall_back(&self) -> bool {
        self.is_success() && self.kind.allows_fallback() && !self.is_wasm()
    }
}

/// Compiles guest binaries and instantiates them
#[derive(Debug, Clone)]
pub struct ModuleLoader {
    engine: CodecEngine,
}

impl ModuleLoader {
    pub fn new(config: BindingConfig) -> BindingResult<Self> {
        Ok(Self {
            engine: CodecEngine::new(config)?,
        })
    }

    pub fn from_engine(engine: CodecEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &CodecEngine {
        &self.engine
    }

    /// Load and instantiate a guest from any source
    pub async fn instantiate(&self, source: ModuleSource) -> BindingResult<GuestInstance> {
        let module = match source {
            ModuleSource::Bytes(bytes) => self.engine.compile(&bytes)?,
            ModuleSource::Compiled(module) => GuestModule::from_compiled(module, "precompiled")?,
            ModuleSource::Response(response) => self.compile_response(&response)?,
            ModuleSource::Path(path) => {
                let bytes = tokio::fs::read(&path).await.map_err(|e| {
                    BindingError::Compilation {
                        message: format!("Failed to read guest module {}", path.display()),
                        source: Some(Box::new(e)),
                    }
                })?;
                self.engine.compile(&bytes)?
            }
            ModuleSource::Url(url) => {
                let response = ModuleResponse::fetch(&url).await?;
                self.compile_response(&response)?
            }
        };
        GuestInstance::new(&self.engine, &module)
    }

    /// Instantiate without awaiting; only bytes and compiled modules qualify
    pub fn instantiate_sync(&self, source: PrecompiledSource) -> BindingResult<GuestInstance> {
        let module = match source {
            PrecompiledSource::Bytes(bytes) => self.engine.compile(&bytes)?,
            PrecompiledSource::Compiled(module) => {
                GuestModule::from_compiled(module, "precompiled")?
            }
        };
        GuestInstance::new(&self.engine, &module)
    }

    fn compile_response(&self, response: &ModuleResponse) -> BindingResult<GuestModule> {
        if !self.engine.config().streaming_compilation {
            return self.engine.compile(&response.body);
        }

        match self.compile_streaming(response) {
            Ok(module) => Ok(module),
            Err(e) if response.can_fall_back() => {
                tracing::warn!(
                    "Streaming compilation of {} failed because it is not served as `{}` ({}). \
                     Falling back to buffered compilation, which is slower. Original error: {}",
                    response.url,
                    WASM_MIME_TYPE,
                    response.content_type.as_deref().unwrap_or("no content type"),
                    e
                );
                self.engine.compile(&response.body)
            }
            Err(e) => Err(e),
        }
    }

    fn compile_streaming(&self, response: &ModuleResponse) -> BindingResult<GuestModule> {
        if !response.is_success() {
            return Err(BindingError::instantiation(format!(
                "Streaming compilation of {} failed: HTTP status {}",
                response.url, response.status
            )));
        }
        if !response.is_wasm() {
            return Err(BindingError::instantiation(format!(
                "Streaming compilation of {} failed: incorrect response MIME type {:?}, expected `{}`",
                response.url, response.content_type, WASM_MIME_TYPE
            )));
        }
        self.engine.compile(&response.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(content_type: Option<&str>) -> ModuleResponse {
        ModuleResponse::new("https://example.test/gram.wasm", 200, content_type, Vec::new())
    }

    #[test]
    fn test_mime_detection() {
        assert!(response(Some("application/wasm")).is_wasm());
        assert!(response(Some("Application/WASM; charset=binary")).is_wasm());
        assert!(!response(Some("application/octet-stream")).is_wasm());
        assert!(!response(None).is_wasm());
    }

    #[test]
    fn test_fallback_requires_readable_success() {
        assert!(response(Some("text/plain")).can_fall_back());
        assert!(!response(Some("application/wasm")).can_fall_back());

        let mut not_found = response(Some("text/html"));
        not_found.status = 404;
        assert!(!not_found.can_fall_back());

        let opaque = response(Some("text/plain")).with_kind(ResponseKind::Opaque);
        assert!(!opaque.can_fall_back());
        let cors = response(Some("text/plain")).with_kind(ResponseKind::Cors);
        assert!(cors.can_fall_back());
    }
}
