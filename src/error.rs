//! Crate-wide error taxonomy.
//!
//! Grounded on `sase-sdwan/src/lib.rs`'s `SdwanError`: one flat `thiserror`
//! enum at the crate root, `#[from]` for the transport layers we wrap, and a
//! `Result` alias used throughout instead of spelling out `std::result::Result`.

use thiserror::Error;

/// Errors produced anywhere in the broker or consumer pipeline.
///
/// Variant names mirror the taxonomy in the design spec so a log line or a
/// test assertion can match on `BgpviewError::Protocol(_)` etc. without
/// needing to consult prose documentation.
#[derive(Debug, Error)]
pub enum BgpviewError {
    /// Process-fatal: bad configuration, inability to bind a provider or
    /// transport, missing mandatory files.
    #[error("initialisation failed: {0}")]
    InitFailed(String),

    /// A peer (server, master, or sub publisher) sent something that
    /// violates the wire protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Recoverable or unrecoverable transport-layer failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The task was interrupted (signal, cancellation token) mid-operation.
    #[error("interrupted")]
    Interrupt,

    /// Reserved for parity with the original taxonomy. Rust's allocator
    /// aborts the process on OOM rather than returning a `Result`, so this
    /// crate never constructs it; it exists so callers matching on the full
    /// taxonomy don't need a catch-all arm.
    #[error("allocation failed")]
    Malloc,

    /// A consumer's documented precondition was not met (e.g. the
    /// geo-visibility consumer running before the visibility consumer).
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// A lookup (request by sequence number, consumer by id, country by
    /// code) found nothing, in a context where that is the caller's bug
    /// rather than a recoverable runtime event.
    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, BgpviewError>;
