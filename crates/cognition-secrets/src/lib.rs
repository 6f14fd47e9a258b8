//! cognition-secrets
//!
//! Credential resolution: Secrets Manager reads and writes, STS role
//! assumption, and mapping an AppSync caller to the secret it queries with.

pub mod caller;
pub mod client;
pub mod error;
pub mod resolver;
pub mod store;
pub mod sts;

pub use crate::error::CredentialError;
pub use crate::resolver::{CredentialResolver, ResolvedCredentials};
pub use crate::store::{BoxFuture, SecretStore};
pub use crate::sts::{AssumedSession, RoleAssumer, ScopedSecrets};
