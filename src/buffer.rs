//! Incremental header-plus-body framing parser (§4.A `MessageBuffer`).
//!
//! `MessageBuffer` accumulates arbitrary byte chunks and extracts exactly one
//! header block, then one content block, per message — tolerating chunk
//! boundaries that split a message anywhere, including inside a header line
//! or in the middle of the content bytes.

use std::collections::BTreeMap;

use thiserror::Error;

/// Headers parsed from a single framed message, keyed case-insensitively.
///
/// Stored lower-cased internally so lookups accept both `Content-Length` and
/// `Content-length` (§6 requires both be accepted); [`HeaderMap::get`] takes
/// the canonical mixed-case name for readability at call sites.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: BTreeMap<String, String>,
}

impl HeaderMap {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn insert(&mut self, name: &str, value: String) {
        self.entries.insert(name.to_ascii_lowercase(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Fatal framing failures: malformed headers or a non-numeric
/// `Content-Length`, per §4.A.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("header line missing ':': {0:?}")]
    MalformedHeaderLine(String),
}

/// Growable byte accumulator with a read cursor, per §3's `MessageBuffer`
/// state invariant `0 ≤ cursor ≤ bytes.len()`.
#[derive(Debug, Default)]
pub struct MessageBuffer {
    bytes: Vec<u8>,
    cursor: usize,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Bytes remaining to be consumed, i.e. not yet behind the cursor.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.cursor
    }

    /// Scan for the first blank-line-terminated header block and parse it.
    ///
    /// Returns `Ok(None)` if a complete `\r\n\r\n` sequence hasn't arrived
    /// yet. Duplicate header names: the last occurrence wins.
    pub fn try_read_headers(&mut self) -> Result<Option<HeaderMap>, FramingError> {
        let unread = &self.bytes[self.cursor..];
        let terminator = match find_subslice(unread, b"\r\n\r\n") {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let header_block = &unread[..terminator];
        let mut headers = HeaderMap::default();
        for line in header_block.split(|&b| b == b'\n') {
            let line = strip_trailing_cr(line);
            if line.is_empty() {
                continue;
            }
            let line_str = String::from_utf8_lossy(line).into_owned();
            let colon = line_str
                .find(':')
                .ok_or_else(|| FramingError::MalformedHeaderLine(line_str.clone()))?;
            let (key, value) = line_str.split_at(colon);
            let value = value[1..].trim();
            headers.insert(key.trim(), value.to_string());
        }

        self.cursor += terminator + 4;
        self.compact();
        Ok(Some(headers))
    }

    /// Consume exactly `length` content bytes, if that many have arrived.
    pub fn try_read_content(&mut self, length: usize) -> Option<Vec<u8>> {
        if self.remaining() < length {
            return None;
        }
        let start = self.cursor;
        let content = self.bytes[start..start + length].to_vec();
        self.cursor += length;
        self.compact();
        Some(content)
    }

    /// Drop already-consumed bytes from the front once nothing references
    /// them, keeping the buffer from growing unbounded across many messages.
    fn compact(&mut self) {
        if self.cursor == 0 {
            return;
        }
        self.bytes.drain(0..self.cursor);
        self.cursor = 0;
    }
}

fn strip_trailing_cr(line: &[u8]) -> &[u8] {
    match line.split_last() {
        Some((b'\r', rest)) => rest,
        _ => line,
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_headers_return_none() {
        let mut buf = MessageBuffer::new();
        buf.append(b"Content-Length: 10\r\n");
        assert_eq!(buf.try_read_headers().unwrap(), None);
    }

    #[test]
    fn header_parsing_trims_whitespace_and_handles_duplicates() {
        let mut buf = MessageBuffer::new();
        buf.append(b"Content-Length: 1\r\nContent-Length:  2 \r\n\r\n");
        let headers = buf.try_read_headers().unwrap().unwrap();
        assert_eq!(headers.get("Content-Length"), Some("2"));
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut buf = MessageBuffer::new();
        buf.append(b"content-length: 5\r\n\r\n");
        let headers = buf.try_read_headers().unwrap().unwrap();
        assert_eq!(headers.get("Content-Length"), Some("5"));
    }

    #[test]
    fn missing_colon_is_fatal() {
        let mut buf = MessageBuffer::new();
        buf.append(b"not-a-header-line\r\n\r\n");
        assert!(matches!(
            buf.try_read_headers(),
            Err(FramingError::MalformedHeaderLine(_))
        ));
    }

    #[test]
    fn content_split_across_chunks() {
        let mut buf = MessageBuffer::new();
        buf.append(b"Content-Length: 5\r\n\r\nhel");
        let _headers = buf.try_read_headers().unwrap().unwrap();
        assert_eq!(buf.try_read_content(5), None);
        buf.append(b"lo");
        assert_eq!(buf.try_read_content(5), Some(b"hello".to_vec()));
    }

    #[test]
    fn multiple_messages_in_one_chunk_extract_in_order() {
        let mut buf = MessageBuffer::new();
        buf.append(b"Content-Length: 2\r\n\r\nabContent-Length: 2\r\n\r\ncd");
        let _ = buf.try_read_headers().unwrap().unwrap();
        assert_eq!(buf.try_read_content(2), Some(b"ab".to_vec()));
        let _ = buf.try_read_headers().unwrap().unwrap();
        assert_eq!(buf.try_read_content(2), Some(b"cd".to_vec()));
    }

    #[test]
    fn cursor_invariant_holds_after_compaction() {
        let mut buf = MessageBuffer::new();
        buf.append(b"Content-Length: 2\r\n\r\nab");
        let _ = buf.try_read_headers().unwrap();
        let _ = buf.try_read_content(2);
        assert_eq!(buf.cursor, 0);
        assert!(buf.cursor <= buf.bytes.len());
    }

    proptest::proptest! {
        /// However a single framed message is split into chunks, it must
        /// still parse to the same headers and content (§8 round-trip
        /// property: arbitrary chunk boundaries never lose or corrupt data).
        #[test]
        fn arbitrary_chunking_reassembles_one_message(splits in proptest::collection::vec(1usize..7, 0..10)) {
            let body = b"0123456789".to_vec();
            let mut framed = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
            framed.extend_from_slice(&body);

            let mut buf = MessageBuffer::new();
            let mut offset = 0;
            for split in &splits {
                let end = (offset + split).min(framed.len());
                buf.append(&framed[offset..end]);
                offset = end;
                if offset >= framed.len() {
                    break;
                }
            }
            if offset < framed.len() {
                buf.append(&framed[offset..]);
            }

            let headers = buf.try_read_headers().unwrap();
            let headers = headers.expect("all bytes were appended before parsing");
            proptest::prop_assert_eq!(headers.get("Content-Length"), Some("10"));
            proptest::prop_assert_eq!(buf.try_read_content(10), Some(body));
        }
    }
}
