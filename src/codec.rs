//! Encoder/decoder registries (§4.D).
//!
//! Two independent registries key codecs by name: content-type codecs
//! (`application/json`) translate between [`Message`] and bytes;
//! content-encoding codecs (`gzip`) translate bytes to bytes. Both are pure
//! functions, per the spec's closing note that "the core only consumes the
//! function form".

use std::io::{Read, Write};
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::TransportError;
use crate::message::Message;

/// A content-type codec: JSON-RPC message ⇄ bytes, under a given charset.
pub trait ContentTypeCodec: Send + Sync {
    fn encode(&self, message: &Message, charset: &str) -> Result<Vec<u8>, TransportError>;
    fn decode(&self, bytes: &[u8], charset: &str) -> Result<Message, TransportError>;
}

/// A content-encoding codec: raw bytes ⇄ encoded bytes (e.g. gzip).
pub trait ContentEncodingCodec: Send + Sync {
    fn encode(&self, bytes: &[u8]) -> Result<Vec<u8>, TransportError>;
    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, TransportError>;
}

/// The default `application/json` / `application/vscode-jsonrpc` codec.
///
/// UTF-8 is the only charset with native support; any other charset fails,
/// per §4.D ("fails in environments without native conversion").
pub struct JsonContentTypeCodec;

impl ContentTypeCodec for JsonContentTypeCodec {
    fn encode(&self, message: &Message, charset: &str) -> Result<Vec<u8>, TransportError> {
        if !charset.eq_ignore_ascii_case("utf-8") && !charset.eq_ignore_ascii_case("utf8") {
            return Err(TransportError::Codec(format!(
                "unsupported charset for JSON content-type: {charset}"
            )));
        }
        let value = message.to_value()?;
        Ok(serde_json::to_vec(&value)?)
    }

    fn decode(&self, bytes: &[u8], charset: &str) -> Result<Message, TransportError> {
        if !charset.eq_ignore_ascii_case("utf-8") && !charset.eq_ignore_ascii_case("utf8") {
            return Err(TransportError::Codec(format!(
                "unsupported charset for JSON content-type: {charset}"
            )));
        }
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        Message::from_value(value).map_err(TransportError::from)
    }
}

/// Passthrough content-encoding — the default when no `Content-Encoding`
/// header is present.
pub struct IdentityContentEncodingCodec;

impl ContentEncodingCodec for IdentityContentEncodingCodec {
    fn encode(&self, bytes: &[u8]) -> Result<Vec<u8>, TransportError> {
        Ok(bytes.to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, TransportError> {
        Ok(bytes.to_vec())
    }
}

/// Reference gzip content-encoding codec (the external "gzip-style"
/// compression plug-in spec.md treats as out of scope but names as the
/// example encoding throughout §8).
pub struct GzipContentEncodingCodec;

impl ContentEncodingCodec for GzipContentEncodingCodec {
    fn encode(&self, bytes: &[u8]) -> Result<Vec<u8>, TransportError> {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(bytes)
            .map_err(|e| TransportError::Codec(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| TransportError::Codec(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, TransportError> {
        use flate2::read::GzDecoder;

        let mut decoder = GzDecoder::new(bytes);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| TransportError::Codec(e.to_string()))?;
        Ok(out)
    }
}

/// Named codec lookup for both registries, shared across reader and writer.
pub struct CodecRegistry {
    content_types: DashMap<String, Arc<dyn ContentTypeCodec>>,
    content_encodings: DashMap<String, Arc<dyn ContentEncodingCodec>>,
}

impl CodecRegistry {
    /// `application/json` and `application/vscode-jsonrpc` content types,
    /// plus `identity` and `gzip` content encodings.
    pub fn with_defaults() -> Self {
        let registry = Self {
            content_types: DashMap::new(),
            content_encodings: DashMap::new(),
        };
        let json = Arc::new(JsonContentTypeCodec);
        registry
            .content_types
            .insert("application/json".to_string(), json.clone());
        registry
            .content_types
            .insert("application/vscode-jsonrpc".to_string(), json);
        registry
            .content_encodings
            .insert("identity".to_string(), Arc::new(IdentityContentEncodingCodec));
        registry
            .content_encodings
            .insert("gzip".to_string(), Arc::new(GzipContentEncodingCodec));
        registry
    }

    pub fn register_content_type(&self, name: impl Into<String>, codec: Arc<dyn ContentTypeCodec>) {
        self.content_types.insert(name.into(), codec);
    }

    pub fn register_content_encoding(
        &self,
        name: impl Into<String>,
        codec: Arc<dyn ContentEncodingCodec>,
    ) {
        self.content_encodings.insert(name.into(), codec);
    }

    pub fn content_type(&self, name: &str) -> Option<Arc<dyn ContentTypeCodec>> {
        self.content_types.get(name).map(|e| e.value().clone())
    }

    pub fn content_encoding(&self, name: &str) -> Option<Arc<dyn ContentEncodingCodec>> {
        self.content_encodings.get(name).map(|e| e.value().clone())
    }

    pub fn has_content_encoding(&self, name: &str) -> bool {
        self.content_encodings.contains_key(name)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
