use serde::{Deserialize, Serialize};

/// Lifecycle state of an application user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Invited,
    Active,
    #[serde(other)]
    Other,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invited => "invited",
            Self::Active => "active",
            Self::Other => "other",
        }
    }
}

/// A row of `cognition.users` joined with its tenant and tenant role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub status: Option<UserStatus>,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl UserRecord {
    pub fn is_active(&self) -> bool {
        self.status == Some(UserStatus::Active)
    }

    pub fn is_invited(&self) -> bool {
        self.status == Some(UserStatus::Invited)
    }
}
