use cognition_core::config::ClientConfig;
use cognition_core::events::AppSyncIdentity;
use cognition_core::models::credentials::SecretRef;
use regex::Regex;

use crate::error::CredentialError;

/// Secret holding the database login of the caller behind `identity`.
///
/// First match wins:
/// 1. a Cognito caller maps to `{secretBase}/{email}`;
/// 2. an IAM caller listed in `roleOverrides` maps to `{secretBase}/{role}`;
/// 3. an assumed-role session of a role in `assumedRoleOverrides` maps to the
///    configured secret ARN.
pub fn resolve_caller_secret(
    config: &ClientConfig,
    identity: &AppSyncIdentity,
) -> Result<SecretRef, CredentialError> {
    let Some(user_arn) = identity.user_arn.as_deref() else {
        let email = identity.email().ok_or(CredentialError::CallerUnresolved)?;
        let base = config.secret_base()?;
        return Ok(SecretRef::new(format!("{base}/{email}")));
    };

    if let Some(role) = config
        .role_overrides
        .iter()
        .find_map(|(role, arn)| (arn == user_arn).then_some(role))
    {
        let base = config.secret_base()?;
        return Ok(SecretRef::new(format!("{base}/{role}")));
    }

    for (role, secret) in &config.assumed_role_overrides {
        let pattern = format!(
            r"^arn:aws:sts::[0-9]+:assumed-role/{}/[0-9]+$",
            regex::escape(role)
        );
        let matches = Regex::new(&pattern)
            .map(|re| re.is_match(user_arn))
            .unwrap_or(false);
        if matches {
            return Ok(SecretRef::new(secret.clone()));
        }
    }

    Err(CredentialError::CallerUnresolved)
}
