// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! TeamWallet Shared Types and Utilities
//!
//! Database pool management, migrations and small types shared by the
//! API server, the billing core and the background worker.

pub mod db;
pub mod types;

pub use db::*;
pub use types::*;
