// SPDX-License-Identifier: MIT

use std::io;

/// Error taxonomy for the transport. Hot-path `enqueue_*` calls never
/// surface these — they return a plain admission boolean instead, per the
/// propagation policy below.
#[derive(Debug, thiserror::Error)]
pub enum LogSinkError {
    /// Control channel connect/read/write failure or timeout.
    #[error("control channel transport failure: {0}")]
    TransportFailure(#[from] io::Error),

    /// The shared region could not be opened under either the global or
    /// local name.
    #[error("shared-memory ring unavailable: {0}")]
    RingUnavailable(String),

    /// Signature or block `magic` mismatch.
    #[error("shared-memory ring corrupted: {0}")]
    RingCorrupted(&'static str),

    /// No free block available (only surfaced when the caller asked for
    /// strict semantics; normally swallowed into the admission policy).
    #[error("ring has no free block")]
    RingFull,

    /// Fatal for the current handshake attempt — promotes to `Degraded`.
    #[error("no free block available while replaying handshake metadata")]
    NoFreeBlockDuringHandshake,

    /// The service process handle indicates termination.
    #[error("log service process is no longer running")]
    ServiceUnreachable,

    /// Re-entrant initialize/shutdown, or an operation on an uninitialized
    /// adapter.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Cooperative abort of a long-running operation.
    #[error("operation cancelled")]
    CancellationRequested,
}

pub type Result<T> = std::result::Result<T, LogSinkError>;
