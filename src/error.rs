//! Error types for the FastCGI client.

use thiserror::Error;

use std::io;

#[derive(Debug, Error)]
pub enum Error {
    /// The socket could not be established: DNS failure, refused, or timed out.
    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A write or read failed after the connection was up.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Something that can't be put on, or taken off, the wire as a FastCGI record.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The exchange completed but produced no bytes.
    #[error("empty response")]
    EmptyResponse,
}

pub type Result<T> = std::result::Result<T, Error>;
