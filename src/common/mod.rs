//! Common types and utilities shared across pagedb.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration ([`Config`]) and format constants
//! - Error types
//! - Identifiers (PageId, FrameId, Lsn, RecordId)

pub mod config;
pub mod error;
mod frame_id;
mod lsn;
mod page_id;

pub use config::{Config, SyncPolicy};
pub use error::{Error, Result};
pub use frame_id::FrameId;
pub use lsn::Lsn;
pub use page_id::{PageId, RecordId};
