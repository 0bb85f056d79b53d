//! Drives [`MessageBuffer`] from a readable byte source (§4.B `StreamReader`).
//!
//! Reads chunks from an `AsyncRead`, extracts as many complete messages as
//! the buffer currently holds, and emits them (plus partial-message timer
//! ticks, errors, and close) through an event channel. One [`StreamReader`]
//! owns exactly one byte source for the lifetime of a connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::buffer::{HeaderMap, MessageBuffer};
use crate::codec::CodecRegistry;
use crate::error::TransportError;
use crate::message::Message;

/// Default partial-message timeout (10s), per §4.B.
pub const DEFAULT_PARTIAL_MESSAGE_TIMEOUT: Duration = Duration::from_millis(10_000);

#[derive(Debug, Clone, Copy)]
pub struct ReaderConfig {
    /// `0` disables the partial-message timer.
    pub partial_message_timeout: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            partial_message_timeout: DEFAULT_PARTIAL_MESSAGE_TIMEOUT,
        }
    }
}

/// Events emitted by a running [`StreamReader`].
pub enum ReaderEvent {
    /// A fully decoded message, plus the headers it was framed with.
    Message(Message, HeaderMap),
    /// The partial-message timer fired while a message was still incomplete.
    PartialMessage { token: u64, waiting_time: Duration },
    /// A fatal parse/codec error; no further messages will be emitted.
    Error(TransportError),
    /// The underlying source reached end-of-stream.
    Closed,
}

pub struct StreamReader<R> {
    inner: R,
    buffer: MessageBuffer,
    next_content_length: Option<usize>,
    next_headers: Option<HeaderMap>,
    message_token: u64,
    config: ReaderConfig,
    codecs: Arc<CodecRegistry>,
}

impl<R: tokio::io::AsyncRead + Unpin> StreamReader<R> {
    pub fn new(inner: R, codecs: Arc<CodecRegistry>, config: ReaderConfig) -> Self {
        Self {
            inner,
            buffer: MessageBuffer::new(),
            next_content_length: None,
            next_headers: None,
            message_token: 0,
            config,
            codecs,
        }
    }

    /// Drive the reader to completion, sending one [`ReaderEvent`] per
    /// extracted message (or timer tick, error, close) to `tx`.
    pub async fn run(mut self, tx: mpsc::Sender<ReaderEvent>) {
        let mut scratch = [0u8; 8192];
        loop {
            let read_fut = self.inner.read(&mut scratch);
            let timeout = self.config.partial_message_timeout;

            let read_result = if timeout.is_zero() {
                Some(read_fut.await)
            } else {
                match tokio::time::timeout(timeout, read_fut).await {
                    Ok(result) => Some(result),
                    Err(_) => {
                        let _ = tx
                            .send(ReaderEvent::PartialMessage {
                                token: self.message_token,
                                waiting_time: timeout,
                            })
                            .await;
                        None
                    }
                }
            };

            let Some(read_result) = read_result else {
                continue;
            };

            let n = match read_result {
                Ok(0) => {
                    let _ = tx.send(ReaderEvent::Closed).await;
                    return;
                }
                Ok(n) => n,
                Err(e) => {
                    let _ = tx.send(ReaderEvent::Error(TransportError::Io(e))).await;
                    return;
                }
            };

            self.buffer.append(&scratch[..n]);

            if let Err(e) = self.drain_messages(&tx).await {
                let _ = tx.send(ReaderEvent::Error(e)).await;
                return;
            }
        }
    }

    /// Extract every complete message currently buffered.
    async fn drain_messages(&mut self, tx: &mpsc::Sender<ReaderEvent>) -> Result<(), TransportError> {
        loop {
            if self.next_content_length.is_none() {
                let headers = match self
                    .buffer
                    .try_read_headers()
                    .map_err(|e| TransportError::MalformedHeader(e.to_string()))?
                {
                    Some(h) => h,
                    None => return Ok(()),
                };

                let content_length = headers
                    .get("Content-Length")
                    .ok_or(TransportError::MissingContentLength)?
                    .parse::<usize>()
                    .map_err(|_| {
                        TransportError::InvalidContentLength(
                            headers.get("Content-Length").unwrap_or_default().to_string(),
                        )
                    })?;

                self.next_content_length = Some(content_length);
                self.next_headers = Some(headers);
            }

            let length = self.next_content_length.expect("checked above");
            let content = match self.buffer.try_read_content(length) {
                Some(c) => c,
                None => return Ok(()),
            };

            let headers = self.next_headers.take().unwrap_or_default();
            self.next_content_length = None;
            self.message_token += 1;

            let content_encoding = headers.get("Content-Encoding").map(str::to_string);
            let decoded = match &content_encoding {
                Some(name) => {
                    let codec = self
                        .codecs
                        .content_encoding(name)
                        .ok_or_else(|| TransportError::UnknownContentEncoding(name.clone()))?;
                    codec.decode(&content)?
                }
                None => content,
            };

            let content_type = headers
                .get("Content-Type")
                .and_then(|ct| ct.split(';').next())
                .map(str::trim)
                .unwrap_or("application/json")
                .to_string();
            let charset = headers
                .get("Content-Type")
                .and_then(|ct| ct.split("charset=").nth(1))
                .map(str::trim)
                .unwrap_or("utf-8")
                .to_string();

            let type_codec = self
                .codecs
                .content_type(&content_type)
                .ok_or_else(|| TransportError::UnknownContentType(content_type.clone()))?;
            let message = type_codec.decode(&decoded, &charset)?;

            if tx.send(ReaderEvent::Message(message, headers)).await.is_err() {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RequestId;

    async fn collect_messages(data: &[u8]) -> Vec<Message> {
        let codecs = Arc::new(CodecRegistry::with_defaults());
        let cursor = std::io::Cursor::new(data.to_vec());
        let reader = StreamReader::new(cursor, codecs, ReaderConfig::default());
        let (tx, mut rx) = mpsc::channel(8);
        tokio::spawn(reader.run(tx));

        let mut messages = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                ReaderEvent::Message(m, _) => messages.push(m),
                ReaderEvent::Closed | ReaderEvent::Error(_) => break,
                ReaderEvent::PartialMessage { .. } => {}
            }
        }
        messages
    }

    #[tokio::test]
    async fn decodes_single_framed_message() {
        let body = br#"{"jsonrpc":"2.0","id":1,"method":"example"}"#;
        let framed = format!("Content-Length: {}\r\n\r\n", body.len());
        let mut bytes = framed.into_bytes();
        bytes.extend_from_slice(body);

        let messages = collect_messages(&bytes).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0],
            Message::request("example", None, RequestId::new_number(1))
        );
    }

    #[tokio::test]
    async fn decodes_multiple_concatenated_messages_in_order() {
        let mk = |id: i64| {
            let body = format!(r#"{{"jsonrpc":"2.0","id":{id},"method":"m"}}"#);
            let mut out = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
            out.extend_from_slice(body.as_bytes());
            out
        };
        let mut bytes = mk(1);
        bytes.extend(mk(2));

        let messages = collect_messages(&bytes).await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].method(), Some("m"));
        if let Message::Request(r) = &messages[0] {
            assert_eq!(r.id, RequestId::new_number(1));
        }
        if let Message::Request(r) = &messages[1] {
            assert_eq!(r.id, RequestId::new_number(2));
        }
    }

    #[tokio::test]
    async fn partial_message_timer_fires_while_waiting() {
        let (client, mut server) = tokio::io::duplex(64);
        let codecs = Arc::new(CodecRegistry::with_defaults());
        let config = ReaderConfig {
            partial_message_timeout: Duration::from_millis(20),
        };
        let reader = StreamReader::new(client, codecs, config);
        let (tx, mut rx) = mpsc::channel(8);
        tokio::spawn(reader.run(tx));

        tokio::io::AsyncWriteExt::write_all(&mut server, b"Content-Length: 2\r\n\r\n")
            .await
            .unwrap();

        let mut saw_partial = false;
        for _ in 0..5 {
            if let Some(ReaderEvent::PartialMessage { .. }) =
                tokio::time::timeout(Duration::from_millis(200), rx.recv()).await.ok().flatten()
            {
                saw_partial = true;
                break;
            }
        }
        assert!(saw_partial);
    }

    #[tokio::test]
    async fn missing_content_length_is_fatal() {
        let body = br#"{"jsonrpc":"2.0","method":"m"}"#;
        let mut bytes = b"X-Something: y\r\n\r\n".to_vec();
        bytes.extend_from_slice(body);

        let codecs = Arc::new(CodecRegistry::with_defaults());
        let cursor = std::io::Cursor::new(bytes);
        let reader = StreamReader::new(cursor, codecs, ReaderConfig::default());
        let (tx, mut rx) = mpsc::channel(8);
        tokio::spawn(reader.run(tx));

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, ReaderEvent::Error(TransportError::MissingContentLength)));
    }
}
