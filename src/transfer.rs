//! Per-connection content-negotiation memory (§4.E `TransferContext`).
//!
//! Captures the `Accept-Encoding` header a request arrived with so that,
//! when the matching response is emitted, the writer can pick a compatible
//! response encoding without the caller having to thread headers through
//! the handler call.

use dashmap::DashMap;

use crate::buffer::HeaderMap;
use crate::message::RequestId;

/// Parse an `Accept-Encoding` header into `(name, quality)` pairs.
///
/// Entries are comma-separated, each either `name` or `name;q=<float>`
/// (default quality 1.0). A `*;q=<float>` entry redefines the default
/// quality for names not otherwise listed; a bare `*` is ignored.
pub fn parse_accept_encoding(header: &str) -> (Vec<(String, f32)>, f32) {
    let mut entries = Vec::new();
    let mut default_quality = 1.0_f32;

    for part in header.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let mut segments = part.split(';').map(str::trim);
        let name = match segments.next() {
            Some(n) => n,
            None => continue,
        };
        let quality = segments
            .find_map(|seg| seg.strip_prefix("q="))
            .and_then(|q| q.parse::<f32>().ok())
            .unwrap_or(1.0);

        if name == "*" {
            if part.contains("q=") {
                default_quality = quality;
            }
            continue;
        }
        entries.push((name.to_string(), quality));
    }

    (entries, default_quality)
}

/// Picks the highest-quality supported encoding from a parsed
/// `Accept-Encoding` list, excluding `*`.
fn best_supported(entries: &[(String, f32)], default_quality: f32, supported: &[String]) -> Option<String> {
    supported
        .iter()
        .filter_map(|candidate| {
            entries
                .iter()
                .find(|(name, _)| name == candidate)
                .map(|(_, q)| (candidate.clone(), *q))
                .or(Some((candidate.clone(), default_quality)))
        })
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(name, _)| name)
}

/// Captured request headers plus the connection's default encoding
/// preferences, consulted by the writer when emitting each message kind.
pub struct TransferContext {
    captured: DashMap<RequestId, HeaderMap>,
    notification_encodings: Vec<String>,
    request_encodings: Vec<String>,
    response_encodings: Vec<String>,
}

impl TransferContext {
    pub fn new() -> Self {
        Self {
            captured: DashMap::new(),
            notification_encodings: Vec::new(),
            request_encodings: Vec::new(),
            response_encodings: Vec::new(),
        }
    }

    pub fn with_defaults(
        notification_encodings: Vec<String>,
        request_encodings: Vec<String>,
        response_encodings: Vec<String>,
    ) -> Self {
        Self {
            captured: DashMap::new(),
            notification_encodings,
            request_encodings,
            response_encodings,
        }
    }

    /// Record the headers an inbound request arrived with, keyed by id.
    pub fn capture(&self, id: RequestId, headers: HeaderMap) {
        self.captured.insert(id, headers);
    }

    /// Drop captured headers once the matching response has been sent.
    pub fn clear(&self, id: &RequestId) {
        self.captured.remove(id);
    }

    pub fn notification_content_encoding(&self, supported: &[String]) -> Option<String> {
        first_supported_default(&self.notification_encodings, supported)
    }

    pub fn request_content_encoding(&self, supported: &[String]) -> Option<String> {
        first_supported_default(&self.request_encodings, supported)
    }

    /// Resolve the encoding for a response to request `id`.
    ///
    /// Open Question (a): when no headers were captured for `id`, this
    /// returns `None` even if a connection-wide default list is configured —
    /// there is nothing to negotiate against.
    pub fn response_content_encoding(&self, id: &RequestId, supported: &[String]) -> Option<String> {
        if let Some(found) = first_supported_default(&self.response_encodings, supported) {
            return Some(found);
        }

        let headers = self.captured.get(id)?;
        let accept_encoding = headers.get("Accept-Encoding")?;
        let (entries, default_quality) = parse_accept_encoding(accept_encoding);
        best_supported(&entries, default_quality, supported)
    }

    /// Build a descending `q`-valued `Accept-Encoding` list: the first
    /// (most preferred) entry gets `q=1`, each subsequent entry steps down
    /// by `1/(n-1)`. Preserved as specified in Open Question (c): the last
    /// computed step can land exactly on `q=0`.
    pub fn response_accept_encodings(supported: &[String]) -> Vec<String> {
        let n = supported.len();
        if n == 0 {
            return Vec::new();
        }
        if n == 1 {
            return vec![format!("{};q=1", supported[0])];
        }

        let diff = 1.0_f32 / (n as f32 - 1.0);
        let mut q = 1.0_f32;
        let mut out = Vec::with_capacity(n);
        for name in supported {
            let rounded = format_quality(q);
            out.push(format!("{name};q={rounded}"));
            q -= diff;
        }
        out
    }
}

impl Default for TransferContext {
    fn default() -> Self {
        Self::new()
    }
}

fn first_supported_default(defaults: &[String], supported: &[String]) -> Option<String> {
    defaults.iter().find(|d| supported.contains(d)).cloned()
}

/// Render a quality value with the minimum digits needed, clamped to
/// `[0, 1]` and avoiding trailing-zero noise like `0.50000`.
fn format_quality(q: f32) -> String {
    let clamped = q.max(0.0).min(1.0);
    let rounded = (clamped * 1000.0).round() / 1000.0;
    let mut s = format!("{rounded}");
    if let Some(dot) = s.find('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.truncate(dot);
        }
    }
    s
}
