//! Value marshallers
//!
//! A marshaller turns a [`serde_json::Value`] into bytes for one mime type and
//! back. Typed values go through `serde_json::to_value` first, so any
//! `Serialize` type can be streamed through any marshaller.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

/// Error type for marshal/unmarshal failures
#[derive(Debug)]
pub enum MarshalError {
    /// JSON encoding or decoding failed
    Json(serde_json::Error),
    /// Text payload was not valid UTF-8
    InvalidUtf8,
}

impl std::fmt::Display for MarshalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarshalError::Json(e) => write!(f, "Marshal failed: {}", e),
            MarshalError::InvalidUtf8 => write!(f, "Marshal failed: payload is not valid UTF-8"),
        }
    }
}

impl std::error::Error for MarshalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MarshalError::Json(e) => Some(e),
            MarshalError::InvalidUtf8 => None,
        }
    }
}

impl From<serde_json::Error> for MarshalError {
    fn from(e: serde_json::Error) -> Self {
        MarshalError::Json(e)
    }
}

/// Serializer for one mime type
pub trait Marshaller: Send + Sync {
    /// Mime type this marshaller produces, e.g. `application/json`
    fn mime(&self) -> &str;

    /// Append the encoding of `value` to `out`
    fn marshal(&self, value: &Value, out: &mut Vec<u8>) -> Result<(), MarshalError>;

    /// Decode one value from `input`
    fn unmarshal(&self, input: &[u8]) -> Result<Value, MarshalError>;
}

/// `application/json`, compact encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMarshaller;

impl Marshaller for JsonMarshaller {
    fn mime(&self) -> &str {
        "application/json"
    }

    fn marshal(&self, value: &Value, out: &mut Vec<u8>) -> Result<(), MarshalError> {
        serde_json::to_writer(out, value)?;
        Ok(())
    }

    fn unmarshal(&self, input: &[u8]) -> Result<Value, MarshalError> {
        Ok(serde_json::from_slice(input)?)
    }
}

/// `text/plain`: strings are written as-is, anything else as JSON text
#[derive(Debug, Clone, Copy, Default)]
pub struct TextMarshaller;

impl Marshaller for TextMarshaller {
    fn mime(&self) -> &str {
        "text/plain"
    }

    fn marshal(&self, value: &Value, out: &mut Vec<u8>) -> Result<(), MarshalError> {
        match value {
            Value::String(s) => out.extend_from_slice(s.as_bytes()),
            other => serde_json::to_writer(out, other)?,
        }
        Ok(())
    }

    fn unmarshal(&self, input: &[u8]) -> Result<Value, MarshalError> {
        std::str::from_utf8(input)
            .map(|s| Value::String(s.to_string()))
            .map_err(|_| MarshalError::InvalidUtf8)
    }
}

/// Marshallers keyed by mime type, with a default
///
/// Owned by the server instance rather than kept in a global.
#[derive(Clone)]
pub struct Marshallers {
    by_mime: HashMap<String, Arc<dyn Marshaller>>,
    default: Arc<dyn Marshaller>,
}

impl Marshallers {
    /// JSON (default) and plain text
    pub fn new() -> Self {
        let default: Arc<dyn Marshaller> = Arc::new(JsonMarshaller);
        let mut registry = Self {
            by_mime: HashMap::new(),
            default: Arc::clone(&default),
        };
        registry.register(default);
        registry.register(Arc::new(TextMarshaller));
        registry
    }

    /// Add or replace the marshaller for its mime type
    pub fn register(&mut self, marshaller: Arc<dyn Marshaller>) {
        self.by_mime
            .insert(marshaller.mime().to_ascii_lowercase(), marshaller);
    }

    /// Make the registered marshaller for `mime` the fallback.
    ///
    /// Returns false if no marshaller is registered for `mime`.
    pub fn set_default(&mut self, mime: &str) -> bool {
        match self.get(mime) {
            Some(m) => {
                self.default = m;
                true
            }
            None => false,
        }
    }

    /// Look up a marshaller by mime type (parameters like `charset` ignored)
    pub fn get(&self, mime: &str) -> Option<Arc<dyn Marshaller>> {
        self.by_mime.get(&essence(mime)).cloned()
    }

    /// The fallback marshaller
    pub fn default_marshaller(&self) -> Arc<dyn Marshaller> {
        Arc::clone(&self.default)
    }

    /// Pick a marshaller from an `Accept` header.
    ///
    /// The first listed mime with a registered marshaller wins; `*/*`, an
    /// absent header, or no match at all give the default.
    pub fn negotiate(&self, accept: Option<&str>) -> Arc<dyn Marshaller> {
        let Some(accept) = accept else {
            return self.default_marshaller();
        };

        for candidate in accept.split(',') {
            let mime = essence(candidate);
            if mime == "*/*" {
                return self.default_marshaller();
            }
            if let Some(m) = self.by_mime.get(&mime) {
                return Arc::clone(m);
            }
        }
        self.default_marshaller()
    }
}

impl Default for Marshallers {
    fn default() -> Self {
        Self::new()
    }
}

/// `"Text/Plain; charset=utf-8"` -> `"text/plain"`
fn essence(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_json_roundtrip() {
        let value = json!({"to": "rest", "post": "rest is powerful", "n": [1, 2, 3]});
        let mut out = Vec::new();
        JsonMarshaller.marshal(&value, &mut out).unwrap();

        assert_eq!(JsonMarshaller.unmarshal(&out).unwrap(), value);
    }

    #[test]
    fn test_json_rejects_garbage() {
        assert!(matches!(
            JsonMarshaller.unmarshal(b"{not json"),
            Err(MarshalError::Json(_))
        ));
    }

    #[test]
    fn test_text_writes_strings_raw() {
        let mut out = Vec::new();
        TextMarshaller.marshal(&json!("hello"), &mut out).unwrap();
        assert_eq!(out, b"hello");

        out.clear();
        TextMarshaller.marshal(&json!({"a": 1}), &mut out).unwrap();
        assert_eq!(out, br#"{"a":1}"#);

        assert_eq!(TextMarshaller.unmarshal(b"hi").unwrap(), json!("hi"));
        assert!(matches!(
            TextMarshaller.unmarshal(&[0xff, 0xfe]),
            Err(MarshalError::InvalidUtf8)
        ));
    }

    #[test]
    fn test_negotiate() {
        let registry = Marshallers::new();

        assert_eq!(registry.negotiate(None).mime(), "application/json");
        assert_eq!(registry.negotiate(Some("text/plain")).mime(), "text/plain");
        assert_eq!(
            registry
                .negotiate(Some("text/html, Text/Plain;q=0.9, */*;q=0.1"))
                .mime(),
            "text/plain"
        );
        assert_eq!(registry.negotiate(Some("*/*")).mime(), "application/json");
        assert_eq!(registry.negotiate(Some("image/png")).mime(), "application/json");
    }

    #[test]
    fn test_set_default() {
        let mut registry = Marshallers::new();
        assert!(registry.set_default("text/plain; charset=utf-8"));
        assert_eq!(registry.negotiate(None).mime(), "text/plain");
        assert!(!registry.set_default("application/xml"));
        assert_eq!(registry.default_marshaller().mime(), "text/plain");
    }
}
