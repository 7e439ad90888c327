//! Utility functions for the Curio indexer.
//!
//! - [`retry`] - Shared retry/timeout wrapper for all external calls
//! - [`conversion`] - Hex encoding and U256 parsing helpers

mod conversion;
mod retry;

pub use conversion::{hex_encode, parse_u256};
pub use retry::{retry_call, RetryPolicy};
