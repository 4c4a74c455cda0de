//! # FlashKV
//!
//! A compact key-value store for raw flash and other erase-before-write
//! block devices, with:
//! - Type-tagged entries (fixed-width integers, strings, blobs)
//! - CRC32-checked records and partial-failure tolerant recovery
//! - Append-only pages with compaction of sparsely occupied pages
//! - Value-typed, point-in-time iteration
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                               │
//! │           open / get / set / delete / stats / iter           │
//! └──────────────┬───────────────────────────────┬──────────────┘
//!                │                               │
//!                ▼                               ▼
//!   ┌────────────────────────┐        ┌────────────────────────┐
//!   │      Store Index       │◄───────│      Page Manager      │
//!   │ (ns,key) → location    │ rebuild│ scan / append / reclaim│
//!   └────────────────────────┘        └───────────┬────────────┘
//!                                                 │
//!                                     ┌───────────▼────────────┐
//!                                     │      Entry Codec       │
//!                                     │  slots + CRC32 records │
//!                                     └───────────┬────────────┘
//!                                                 │
//!                                     ┌───────────▼────────────┐
//!                                     │      Block Device      │
//!                                     │  read / write / erase  │
//!                                     └────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod device;
pub mod entry;
pub mod page;
pub mod index;
pub mod iterator;
pub mod store;
pub mod dump;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{DecodeError, FlashError, Result};
pub use config::Config;
pub use device::{BlockDevice, FileDevice, MemDevice};
pub use entry::{EntryInfo, EntryType, Value};
pub use iterator::EntryIter;
pub use store::{RecoveryReport, Stats, Store};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of FlashKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
