//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::path::PathBuf;

use pagedb::{Config, SyncPolicy};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Route engine logs to the test output. Set `RUST_LOG=pagedb=debug` to
/// see splits, merges and recovery.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Keys that sort numerically.
pub fn key(i: u32) -> Vec<u8> {
    i.to_be_bytes().to_vec()
}

pub fn value(i: u32) -> Vec<u8> {
    format!("value-{:08}", i).into_bytes()
}

/// Fast settings for tests: no fsync.
pub fn test_config(page_size: usize) -> Config {
    Config::new()
        .with_page_size(page_size)
        .with_cache_pages(64)
        .with_sync_policy(SyncPolicy::Never)
}

pub fn temp_db() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");
    (dir, path)
}
