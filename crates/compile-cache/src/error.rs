//! Error taxonomy for the compilation-request core.
//!
//! Shaped the same way `build::api::Error` and `doc::redact::Error` are:
//! a flat `thiserror::Error` enum with one variant per failure mode, and
//! `#[from]`/`#[source]` used to keep wrapped errors attached rather than
//! flattened into strings.

use crate::ids::CacheKey;

/// Top-level error exposed by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The wire-format version byte named a version this crate does not
    /// implement. A strictly higher version is a hard error — there is no
    /// forward-compatibility fallback.
    #[error("unsupported compilation-request wire version {found:#04x} (this build only reads {supported:#04x})")]
    UnsupportedVersion { found: u8, supported: u8 },

    /// The buffer was malformed: truncated, carried an unrecognized enum
    /// tag, or otherwise failed to parse as a version-1 record.
    #[error(transparent)]
    BinaryProtocol(#[from] BinaryProtocolError),

    /// An operation required a field that had not yet been set.
    #[error("`{field}` must be set before {operation}")]
    InvalidState {
        field: &'static str,
        operation: &'static str,
    },

    /// Propagated unchanged from the caller-supplied `ConfigSpace`.
    #[error("config space error: {0}")]
    ConfigSpace(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub(crate) fn invalid_state(field: &'static str, operation: &'static str) -> Self {
        Error::InvalidState { field, operation }
    }

    pub(crate) fn config_space(
        err: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::ConfigSpace(Box::new(err))
    }
}


/// Malformed-buffer failures, surfaced as [`Error::BinaryProtocol`].
#[derive(Debug, thiserror::Error)]
pub enum BinaryProtocolError {
    #[error("buffer truncated: expected {needed} more byte(s) at offset {offset} ({field}), found {available}")]
    Truncated {
        field: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("length prefix for {field} was negative ({found})")]
    NegativeLength { field: &'static str, found: i32 },

    #[error("unknown output_format tag byte {0:#04x}")]
    UnknownOutputFormat(u8),

    #[error("unknown input_language tag byte {0:#04x}")]
    UnknownInputLanguage(u8),

    #[error("invalid UTF-8 in {field}: {source}")]
    InvalidUtf8 {
        field: &'static str,
        #[source]
        source: std::str::Utf8Error,
    },

    #[error("unrecognized {field} presence tag {found:#04x} (expected 0 or 1)")]
    InvalidPresenceTag { field: &'static str, found: u8 },

    #[error(
        "trailing cache key mismatch: buffer carried {stored} but the stream hashed to {computed}"
    )]
    CacheKeyMismatch { stored: CacheKey, computed: CacheKey },
}
