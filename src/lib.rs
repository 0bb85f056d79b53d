//! Bidirectional JSON-RPC 2.0 message connection core.
//!
//! This crate implements the transport-agnostic center of an LSP-style
//! connection: Content-Length-framed message parsing and serialization,
//! request/response correlation, handler dispatch, and cooperative
//! cancellation. It does not ship a particular RPC surface (no
//! `initialize`/`textDocument/...` methods) — callers register their own
//! request, notification and progress handlers on a [`connection::MessageConnection`].
//!
//! Start with [`connection::MessageConnection::new`] or
//! [`connection::MessageConnection::from_duplex`], given a byte source/sink
//! pair (see [`transport::DuplexBytes`] and [`transport::StdioDuplex`] for
//! the stdio case) and a [`codec::CodecRegistry`].

pub mod buffer;
pub mod cancellation;
pub mod codec;
pub mod connection;
pub mod error;
pub mod message;
pub mod pipe;
pub mod progress;
pub mod reader;
pub mod trace;
pub mod transfer;
pub mod transport;
pub mod writer;

pub use cancellation::{CancellationSource, CancellationToken};
pub use codec::CodecRegistry;
pub use connection::{ConnectionConfig, ConnectionState, MessageConnection};
pub use error::{ConnectionError, ResponseError, TransportError};
pub use message::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Message, RequestId};
pub use progress::{ProgressParams, ProgressToken};
pub use trace::{TraceLevel, Tracer};
pub use transport::{DuplexBytes, StdioDuplex};
