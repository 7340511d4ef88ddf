//! Relational store: PostgreSQL client and keyset query rendering.

pub mod keyset;
pub mod postgres;

pub use keyset::KeysetQuery;
pub use postgres::{PostgresClient, PostgresConfig};
