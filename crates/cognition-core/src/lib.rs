//! cognition-core
//!
//! Pure domain types shared by the pg-cognition crates: client configuration,
//! credentials, tenants, users, claims, SQL values and the Lambda event shapes.
//! No AWS SDK or database dependency.

pub mod config;
pub mod error;
pub mod events;
pub mod models;
