//! Error taxonomy for the KDS engine.
//!
//! Nothing in this crate is allowed to be fatal: transport failures recycle
//! the connection loop, malformed feed frames are dropped at the boundary,
//! and rejected user actions surface as transient notices. The variants here
//! exist so call sites can tell those cases apart, not so anyone can bail.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KdsError {
    /// Push-feed connection error or close. Recovered by the reconnect loop.
    #[error("feed transport: {0}")]
    Transport(String),

    /// Inbound frame that did not parse as a snapshot. Dropped, never applied.
    #[error("malformed feed message: {0}")]
    MalformedMessage(#[from] serde_json::Error),

    /// User action refused before any message was sent (unknown ticket,
    /// nothing ready to toggle, and similar no-ops).
    #[error("{0}")]
    RejectedAction(String),

    /// Station settings file could not be read or written.
    #[error("settings: {0}")]
    Settings(String),
}
