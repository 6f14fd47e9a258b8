//! cognition-db
//!
//! Tenant database client. Resolves credentials lazily, executes statements
//! through a direct PostgreSQL connection or the RDS Data API, and provisions
//! tenants, roles, users and the `cognition` schema.

pub mod appsync;
pub mod backend;
pub mod client;
pub mod error;
pub mod instance;
pub mod params;
pub mod schema;
pub mod serverless;
pub mod tenants;
pub mod users;

pub use crate::backend::{AwsConnector, ConnectTarget, Connector, ExecOptions, QueryBackend};
pub use crate::client::{ClientStatus, DatabaseClient, QueryOptions};
pub use crate::error::DbError;
pub use crate::schema::SchemaBuilder;
pub use crate::tenants::RoleSpec;
pub use crate::users::NewUser;
