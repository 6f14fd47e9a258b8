use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// A customer boundary: schema `name`, roles `{name}_admins` / `{name}_users`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub displayname: String,
}

impl Tenant {
    pub fn new(name: impl Into<String>, displayname: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            displayname: displayname.into(),
        }
    }
}

/// Privilege level of a user inside one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantRole {
    Admin,
    User,
}

impl TenantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }

    /// Database group a member of `tenant` with this role belongs to.
    pub fn group_for(&self, tenant: &str) -> String {
        format!("{tenant}_{}s", self.as_str())
    }

    /// Global group every tenant's group of this role is a member of.
    pub fn global_group(&self) -> &'static str {
        match self {
            Self::Admin => "tenant_admins",
            Self::User => "tenant_users",
        }
    }
}

impl fmt::Display for TenantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenantRole {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" | "admins" => Ok(Self::Admin),
            "user" | "users" => Ok(Self::User),
            other => Err(ModelError::UnknownTenantRole(other.to_string())),
        }
    }
}

/// Tenant name a group role belongs to: `acme_admins` -> `acme`.
///
/// Names without a role suffix are returned unchanged.
pub fn tenant_of_group(group: &str) -> &str {
    for suffix in ["_admins", "_admin", "_users", "_user"] {
        if let Some(tenant) = group.strip_suffix(suffix)
            && !tenant.is_empty()
        {
            return tenant;
        }
    }
    group
}
