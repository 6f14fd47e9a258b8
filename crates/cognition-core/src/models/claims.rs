use std::collections::BTreeMap;

use crate::models::user::UserRecord;

/// Claims written into an identity token. Cognito only accepts string values.
pub type ClaimSet = BTreeMap<String, String>;

/// Claims every active user carries.
pub const TENANT_CLAIM: &str = "tenant";
pub const ROLE_CLAIM: &str = "role";

/// Claims derived from the user record alone.
///
/// Active users get `tenant` and `role` when known; anyone else gets none.
pub fn base_claims(user: &UserRecord) -> ClaimSet {
    let mut claims = ClaimSet::new();
    if user.is_active() {
        if let Some(tenant) = &user.tenant {
            claims.insert(TENANT_CLAIM.to_string(), tenant.clone());
        }
        if let Some(role) = &user.role {
            claims.insert(ROLE_CLAIM.to_string(), role.clone());
        }
    }
    claims
}

/// Merge `extra` over the base claims of `user`.
///
/// Extra claims add or override entries; no base claim is ever dropped.
pub fn add_claims(user: &UserRecord, extra: &ClaimSet) -> ClaimSet {
    let mut claims = base_claims(user);
    for (key, value) in extra {
        claims.insert(key.clone(), value.clone());
    }
    claims
}
