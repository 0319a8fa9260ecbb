//! Postgres persistence for analysis results.
//!
//! Table shapes are owned by the hosting database; nothing here creates or migrates schema.

pub mod lock;
pub mod posts;
