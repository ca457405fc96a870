//! Durability: write-ahead log, crash recovery and mini-transactions.
//!
//! # Components
//! - [`Wal`] - append-only log of full page images grouped by commit records
//! - [`recover`] - replays committed groups into the page file on open
//! - [`MiniTxn`] - latches, before-images and the commit protocol for one
//!   engine operation

mod mini_txn;
mod reader;
mod record;
mod replay;
mod wal;

pub use mini_txn::MiniTxn;
pub use reader::WalReader;
pub use record::{WalPayload, WalRecord};
pub use replay::{recover, RecoveryReport};
pub use wal::{Wal, WalHeader, WalStats, WalStatsSnapshot};
