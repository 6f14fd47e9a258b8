pub mod claims;
pub mod credentials;
pub mod row;
pub mod tenant;
pub mod user;
