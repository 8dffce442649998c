//! Error taxonomy for the service router.
//!
//! Local misuse (`AlreadyRegistered`, `NotFound`, `NoValidator`) is returned
//! to the caller and never crosses the wire. Authentication failures map to
//! 401, malformed bodies and invalid one-time codes to 400, and an unknown
//! sync subject to 500; the mapping lives in `handlers`.
//!
//! Transport failures escalate the per-peer retry counter. A non-success
//! response that is not authentication-related is `Declined`: visible in the
//! logs, clears the peer's reflections, but never escalates retries. No error
//! variant ever halts the heartbeat loop.

use thiserror::Error;

/// Error type shared by the router, the session bootstrap, the heartbeat
/// engine and the sync recovery path.
#[derive(Debug, Error)]
pub enum RouterError {
    /// A peer with the same UUID is already present in the table.
    #[error("peer already registered: {0}")]
    AlreadyRegistered(String),

    /// No peer with the given UUID exists in the table.
    #[error("peer not found: {0}")]
    NotFound(String),

    /// The router has no credential validator injected.
    #[error("no credential validator configured on this router")]
    NoValidator,

    /// Credential check or peer registration check failed (401 on the wire).
    #[error("unauthorized")]
    Unauthorized,

    /// A one-time code did not verify against the issued secret (400 on the wire).
    #[error("invalid one-time code")]
    InvalidTotp,

    /// A request or response body could not be parsed.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The remote answered with a non-success status that is not
    /// authentication-related.
    #[error("remote declined with status {status}: {body}")]
    Declined { status: u16, body: String },

    /// I/O error or timeout on an outbound request.
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// No recently-online peer was available to answer a sync request.
    #[error("no reachable peer to sync from; router is in orphan mode")]
    Orphan,

    /// The sync responder does not know the peer being asked about
    /// (500 on the wire).
    #[error("sync subject not registered on the remote: {0}")]
    UnknownSubject(String),

    /// A reflected or synced address literal failed to parse.
    #[error("invalid address literal: {0}")]
    InvalidAddress(String),

    /// The peer has no established outbound session.
    #[error("no session established with peer: {0}")]
    NoSession(String),

    /// Router configuration failed validation.
    #[error("invalid router configuration: {0}")]
    Config(String),

    /// JSON encode/decode failure in the persistence bridge.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Filesystem error while loading a persisted router.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RouterError>;
