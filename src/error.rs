//! Error types for conversation read-state handling
//!
//! Every validation failure is synchronous and carries a specific kind;
//! nothing here is retried and no failure leaves the store half-mutated.

use thiserror::Error;

/// Server URL canonicalization failures
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlError {
    #[error("invalid or missing protocol, expected http:// or https://")]
    MissingOrUnknownScheme,

    #[error("invalid hostname")]
    InvalidHost,

    #[error("invalid port")]
    InvalidPort,

    #[error("base URL is too long")]
    TooLong,

    #[error("unexpected trailing content after the base URL")]
    UnexpectedTrailingContent,
}

/// Room-token canonicalization failures
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomError {
    #[error("room token is empty")]
    Empty,

    #[error("room token is too long")]
    TooLong,

    #[error("room token contains invalid characters")]
    InvalidCharacters,
}

/// Top-level error for store and identity operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConvoError {
    #[error("invalid session-style id: expected 66 hex digits")]
    InvalidIdentity,

    #[error("invalid server pubkey: expected 32 bytes, got {0}")]
    InvalidPubkey(usize),

    #[error("server pubkey is not recognizable hex, base64, or base32z")]
    InvalidPubkeyEncoding,

    #[error("community URL carries no server pubkey")]
    MissingPubkey,

    #[error("invalid community URL: {0}")]
    Url(#[from] UrlError),

    #[error("invalid room token: {0}")]
    Room(#[from] RoomError),

    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("corrupt dump: {0}")]
    BadDump(String),
}
