//! Serializes messages into framed bytes (§4.C `StreamWriter`).
//!
//! A single write permit (`tokio::sync::Semaphore` with one permit) is the
//! crate's only internal lock-like resource: it guarantees that two
//! concurrent `write()` calls never interleave their header/body bytes on
//! the wire, and it is where back-pressure from the underlying stream is
//! observed (§5).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Semaphore};

use crate::codec::CodecRegistry;
use crate::error::TransportError;
use crate::message::Message;

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub content_type: String,
    pub charset: String,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            content_type: "application/json".to_string(),
            charset: "utf-8".to_string(),
        }
    }
}

/// Headers to attach to an outbound message beyond the mandatory
/// `Content-Length`, chosen by the caller (typically via
/// [`crate::transfer::TransferContext`]).
#[derive(Debug, Clone, Default)]
pub struct OutgoingHeaders {
    pub content_encoding: Option<String>,
    pub accept_encoding: Option<String>,
}

pub struct StreamWriter<W> {
    inner: Arc<Mutex<W>>,
    permit: Arc<Semaphore>,
    config: WriterConfig,
    codecs: Arc<CodecRegistry>,
    error_count: AtomicU64,
}

impl<W: tokio::io::AsyncWrite + Unpin> StreamWriter<W> {
    pub fn new(inner: W, codecs: Arc<CodecRegistry>, config: WriterConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(inner)),
            permit: Arc::new(Semaphore::new(1)),
            config,
            codecs,
            error_count: AtomicU64::new(0),
        }
    }

    /// Encode and frame `message`, then write it atomically with respect to
    /// other concurrent writers on this instance.
    pub async fn write(&self, message: &Message, headers: OutgoingHeaders) -> Result<(), TransportError> {
        let _permit = self
            .permit
            .acquire()
            .await
            .expect("semaphore is never closed");

        let result = self.write_locked(message, &headers).await;

        match &result {
            Ok(()) => {
                self.error_count.store(0, Ordering::SeqCst);
            }
            Err(_) => {
                self.error_count.fetch_add(1, Ordering::SeqCst);
            }
        }
        result
    }

    async fn write_locked(&self, message: &Message, headers: &OutgoingHeaders) -> Result<(), TransportError> {
        let type_codec = self
            .codecs
            .content_type(&self.config.content_type)
            .ok_or_else(|| TransportError::UnknownContentType(self.config.content_type.clone()))?;
        let mut payload = type_codec.encode(message, &self.config.charset)?;

        if let Some(encoding) = &headers.content_encoding {
            let codec = self
                .codecs
                .content_encoding(encoding)
                .ok_or_else(|| TransportError::UnknownContentEncoding(encoding.clone()))?;
            payload = codec.encode(&payload)?;
        }

        let mut framed = Vec::with_capacity(payload.len() + 128);
        framed.extend_from_slice(format!("Content-Length: {}\r\n", payload.len()).as_bytes());
        if let Some(encoding) = &headers.content_encoding {
            framed.extend_from_slice(format!("Content-Encoding: {encoding}\r\n").as_bytes());
        }
        if let Some(accept) = &headers.accept_encoding {
            framed.extend_from_slice(format!("Accept-Encoding: {accept}\r\n").as_bytes());
        }
        framed.extend_from_slice(b"\r\n");
        framed.extend_from_slice(&payload);

        let mut guard = self.inner.lock().await;
        guard.write_all(&framed).await?;
        guard.flush().await?;
        Ok(())
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RequestId;

    #[tokio::test]
    async fn basic_framing_matches_spec_example() {
        let codecs = Arc::new(CodecRegistry::with_defaults());
        let buf = Vec::new();
        let writer = StreamWriter::new(buf, codecs, WriterConfig::default());

        let msg = Message::request("example", None, RequestId::new_number(1));
        writer.write(&msg, OutgoingHeaders::default()).await.unwrap();

        let written = writer.inner.lock().await.clone();
        let expected =
            b"Content-Length: 43\r\n\r\n{\"jsonrpc\":\"2.0\",\"method\":\"example\",\"id\":1}";
        assert_eq!(written, expected);
    }

    #[tokio::test]
    async fn concurrent_writes_do_not_interleave() {
        let codecs = Arc::new(CodecRegistry::with_defaults());
        let writer = Arc::new(StreamWriter::new(Vec::new(), codecs, WriterConfig::default()));

        let mut handles = Vec::new();
        for i in 0..20 {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                let msg = Message::notification("tick", Some(serde_json::json!({"i": i})));
                writer.write(&msg, OutgoingHeaders::default()).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let written = writer.inner.lock().await.clone();
        let text = String::from_utf8(written).unwrap();
        // Every frame must be well-formed: count of Content-Length headers
        // equals count of parseable JSON bodies implied by them.
        assert_eq!(text.matches("Content-Length:").count(), 20);
        let mut cursor = text.as_str();
        let mut parsed = 0;
        while let Some(idx) = cursor.find("Content-Length: ") {
            let rest = &cursor[idx + "Content-Length: ".len()..];
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            let len: usize = digits.parse().unwrap();
            let header_end = rest.find("\r\n\r\n").unwrap() + 4;
            let body = &rest[header_end..header_end + len];
            serde_json::from_str::<serde_json::Value>(body).unwrap();
            parsed += 1;
            cursor = &rest[header_end + len..];
        }
        assert_eq!(parsed, 20);
    }

    #[tokio::test]
    async fn write_error_increments_counter_and_resets_on_success() {
        struct FlakyWriter {
            fail_once: bool,
        }
        impl tokio::io::AsyncWrite for FlakyWriter {
            fn poll_write(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                buf: &[u8],
            ) -> std::task::Poll<std::io::Result<usize>> {
                let this = self.get_mut();
                if this.fail_once {
                    this.fail_once = false;
                    return std::task::Poll::Ready(Err(std::io::Error::other("boom")));
                }
                std::task::Poll::Ready(Ok(buf.len()))
            }
            fn poll_flush(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                std::task::Poll::Ready(Ok(()))
            }
            fn poll_shutdown(
                self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                std::task::Poll::Ready(Ok(()))
            }
        }

        let codecs = Arc::new(CodecRegistry::with_defaults());
        let writer = StreamWriter::new(FlakyWriter { fail_once: true }, codecs, WriterConfig::default());
        let msg = Message::notification("ping", None);

        assert!(writer.write(&msg, OutgoingHeaders::default()).await.is_err());
        assert_eq!(writer.error_count(), 1);

        writer.write(&msg, OutgoingHeaders::default()).await.unwrap();
        assert_eq!(writer.error_count(), 0);
    }
}
