//! Error types for FlashKV
//!
//! Provides a unified error type for all store operations, plus the
//! narrower [`DecodeError`] reported by the entry codec.

use thiserror::Error;

use crate::entry::EntryType;

/// Result type alias using FlashError
pub type Result<T> = std::result::Result<T, FlashError>;

/// Unified error type for FlashKV operations
#[derive(Debug, Error)]
pub enum FlashError {
    // -------------------------------------------------------------------------
    // Device Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Device error on page {page}: {reason}")]
    Device { page: u32, reason: String },

    // -------------------------------------------------------------------------
    // Entry Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt entry at page {page} offset {offset}: {source}")]
    CorruptEntry {
        page: u32,
        offset: u32,
        #[source]
        source: DecodeError,
    },

    #[error("Key not found")]
    KeyNotFound,

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: EntryType, found: EntryType },

    #[error("Value too large: {len} bytes (max {max})")]
    ValueTooLarge { len: usize, max: usize },

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Store full: no free or reclaimable page")]
    StoreFull,

    #[error("Format error: {0}")]
    Format(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl FlashError {
    /// Device-level failure (the in-flight operation is lost, the store is not)
    pub fn is_io(&self) -> bool {
        matches!(self, FlashError::Io(_) | FlashError::Device { .. })
    }

    /// Shorthand for device faults reported by adapters
    pub(crate) fn device(page: u32, reason: impl Into<String>) -> Self {
        FlashError::Device {
            page,
            reason: reason.into(),
        }
    }
}

/// Why a record failed to decode
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("unknown type tag {0:#04x}")]
    UnknownType(u8),

    #[error("declared length {declared} exceeds {available} available bytes")]
    LengthOverflow { declared: usize, available: usize },

    #[error("invalid span {0}")]
    InvalidSpan(usize),

    #[error("invalid name field")]
    InvalidName,

    #[error("slot is erased")]
    Erased,
}
