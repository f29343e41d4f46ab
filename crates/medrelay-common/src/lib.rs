//! Shared plumbing for the medrelay pipeline: error taxonomy, the
//! allowlist-capped HTTP client, and the retry policy applied to
//! per-page and per-batch requests.

pub mod error;
pub mod net;
pub mod retry;

pub use error::{RelayError, Result};
