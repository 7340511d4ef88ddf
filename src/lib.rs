//! Concurrency and pagination core for a multi-tenant ledger backend.
//!
//! - Keyset (cursor) pagination with Relay-style page info
//! - Claim-and-process scheduling of withdrawal webhook events
//! - Idempotency keys backed by a distributed lock and a result cache

pub mod api;
pub mod app;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
