//! Transport abstraction (§6 "External Interfaces").
//!
//! The connection core consumes an abstract byte sink/source pair; concrete
//! adapters (stdio, TCP, named pipes/Unix sockets) are external
//! collaborators per spec.md §1. This module ships the one adapter the spec
//! keeps in scope as a worked example: standard input/output.

use tokio::io::{Stdin, Stdout};

/// A duplex byte stream split into an `AsyncRead` half and an `AsyncWrite`
/// half, the shape [`crate::reader::StreamReader`] and
/// [`crate::writer::StreamWriter`] are generic over.
pub trait DuplexBytes {
    type Read: tokio::io::AsyncRead + Unpin + Send + 'static;
    type Write: tokio::io::AsyncWrite + Unpin + Send + 'static;

    fn split(self) -> (Self::Read, Self::Write);
}

/// Standard input/output as a duplex byte stream — the primary transport
/// for editor/language-server child processes (§6).
pub struct StdioDuplex {
    stdin: Stdin,
    stdout: Stdout,
}

impl StdioDuplex {
    pub fn new() -> Self {
        Self {
            stdin: tokio::io::stdin(),
            stdout: tokio::io::stdout(),
        }
    }
}

impl Default for StdioDuplex {
    fn default() -> Self {
        Self::new()
    }
}

impl DuplexBytes for StdioDuplex {
    type Read = Stdin;
    type Write = Stdout;

    fn split(self) -> (Self::Read, Self::Write) {
        (self.stdin, self.stdout)
    }
}
