//! Host values that cross the boundary by reference
//!
//! The guest cannot hold these in linear memory; it only ever sees the
//! integer index of the table slot that stores them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error value created by the guest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestError {
    pub message: String,
}

/// A host value addressable from the guest through the reference table
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum HostValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Error(GuestError),
}

impl HostValue {
    pub fn string(s: impl Into<String>) -> Self {
        HostValue::String(s.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        HostValue::Error(GuestError {
            message: message.into(),
        })
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, HostValue::Undefined)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Message used when the value is surfaced as a host error
    pub fn to_message(&self) -> String {
        match self {
            HostValue::Error(e) => e.message.clone(),
            HostValue::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Undefined => write!(f, "undefined"),
            HostValue::Null => write!(f, "null"),
            HostValue::Bool(b) => write!(f, "{}", b),
            HostValue::Number(n) => write!(f, "{}", n),
            HostValue::String(s) => write!(f, "{}", s),
            HostValue::Error(e) => write!(f, "Error: {}", e.message),
        }
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::String(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::String(s)
    }
}

impl From<HostValue> for serde_json::Value {
    fn from(value: HostValue) -> Self {
        match value {
            HostValue::Undefined | HostValue::Null => serde_json::Value::Null,
            HostValue::Bool(b) => serde_json::Value::Bool(b),
            HostValue::Number(n) => serde_json::Number::from_f64(n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            HostValue::String(s) => serde_json::Value::String(s),
            HostValue::Error(e) => serde_json::json!({ "error": e.message }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message() {
        let value = HostValue::error("unexpected token");
        assert_eq!(value.to_message(), "unexpected token");
        assert_eq!(HostValue::Null.to_message(), "null");
    }

    #[test]
    fn test_json_conversion() {
        let json: serde_json::Value = HostValue::string("alice").into();
        assert_eq!(json, serde_json::json!("alice"));

        let json: serde_json::Value = HostValue::Undefined.into();
        assert!(json.is_null());
    }

    #[test]
    fn test_serde_tagging() {
        let encoded = serde_json::to_string(&HostValue::Bool(true)).unwrap();
        assert_eq!(encoded, r#"{"type":"bool","value":true}"#);
    }
}
