//! Utility functions and types

pub mod data_loader;

pub use data_loader::{clean_sentinels, drop_duplicate_rows, DataLoader, SENTINEL_REPLACEMENT, SENTINEL_TOKENS};
