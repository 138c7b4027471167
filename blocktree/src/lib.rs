#![cfg_attr(test, allow(clippy::disallowed_methods, clippy::expect_used))]
// Corrupt files must surface as errors, never as panics.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

//! A persistent set of `i64` keys stored as a B-tree in a single block file.

pub mod config;
pub mod storage;
