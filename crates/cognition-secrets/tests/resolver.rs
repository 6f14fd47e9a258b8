use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use cognition_core::models::credentials::{RoleOverride, SecretRef};
use cognition_secrets::store::BoxFuture;
use cognition_secrets::{
    AssumedSession, CredentialError, CredentialResolver, RoleAssumer, ScopedSecrets, SecretStore,
};

#[derive(Default)]
struct MemoryStore {
    secrets: Mutex<HashMap<String, String>>,
    denied: Vec<String>,
}

impl MemoryStore {
    fn with(secrets: &[(&str, &str)]) -> Self {
        Self {
            secrets: Mutex::new(
                secrets
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            denied: Vec::new(),
        }
    }
}

impl SecretStore for MemoryStore {
    fn get_secret_string<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<String, CredentialError>> {
        Box::pin(async move {
            if self.denied.iter().any(|d| d == id) {
                return Err(CredentialError::AccessDenied {
                    secret: id.to_string(),
                    message: "denied".to_string(),
                });
            }
            self.secrets
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| CredentialError::SecretNotFound(id.to_string()))
        })
    }

    fn create_secret<'a>(
        &'a self,
        name: &'a str,
        _description: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, Result<String, CredentialError>> {
        Box::pin(async move {
            self.secrets
                .lock()
                .unwrap()
                .insert(name.to_string(), value.to_string());
            Ok(format!("arn:test:{name}"))
        })
    }

    fn delete_secret<'a>(
        &'a self,
        id: &'a str,
        _force: bool,
    ) -> BoxFuture<'a, Result<(), CredentialError>> {
        Box::pin(async move {
            self.secrets
                .lock()
                .unwrap()
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| CredentialError::SecretNotFound(id.to_string()))
        })
    }

    fn secret_exists<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool, CredentialError>> {
        Box::pin(async move { Ok(self.secrets.lock().unwrap().contains_key(id)) })
    }
}

/// Assumes only `allowed`, handing out a store that sees `scoped` secrets.
struct FakeAssumer {
    allowed: String,
    scoped: Arc<MemoryStore>,
    expires_at: Option<jiff::Timestamp>,
}

impl RoleAssumer for FakeAssumer {
    fn assume_role<'a>(
        &'a self,
        role: &'a RoleOverride,
    ) -> BoxFuture<'a, Result<ScopedSecrets, CredentialError>> {
        Box::pin(async move {
            if role.role_arn != self.allowed {
                return Err(CredentialError::AssumeRole {
                    role_arn: role.role_arn.clone(),
                    message: "not authorized".to_string(),
                });
            }
            Ok(ScopedSecrets {
                session: AssumedSession {
                    role_arn: role.role_arn.clone(),
                    access_key_id: "AKIA".to_string(),
                    secret_access_key: "secret".to_string(),
                    session_token: "token".to_string(),
                    expires_at: self.expires_at,
                },
                store: self.scoped.clone(),
            })
        })
    }
}

const LOGIN: &str = r#"{"engine":"postgres","host":"db.internal","password":"pw","port":5432,"username":"app_user"}"#;
const ADMIN_ROLE: &str = "arn:aws:iam::123456789012:role/escalate";

fn resolver(ambient: MemoryStore, scoped: MemoryStore) -> CredentialResolver {
    CredentialResolver::new(
        Arc::new(ambient),
        Arc::new(FakeAssumer {
            allowed: ADMIN_ROLE.to_string(),
            scoped: Arc::new(scoped),
            expires_at: Some(jiff::Timestamp::now() + jiff::SignedDuration::from_secs(900)),
        }),
    )
}

#[tokio::test]
async fn resolves_complete_credentials() {
    let r = resolver(MemoryStore::with(&[("app", LOGIN)]), MemoryStore::default());
    let creds = r.get_credentials(&SecretRef::from("app"), None).await.unwrap();

    assert_eq!(creds.username, "app_user");
    assert_eq!(creds.password, "pw");
    assert_eq!(creds.host, "db.internal");
    assert_eq!(creds.port, 5432);
    assert!(creds.expires_at.is_none());
    assert!(!creds.is_expired());
}

#[tokio::test]
async fn missing_secret_is_a_credential_error() {
    let r = resolver(MemoryStore::default(), MemoryStore::default());
    let err = r
        .get_credentials(&SecretRef::from("nope"), None)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn access_denied_is_reported() {
    let mut store = MemoryStore::with(&[("app", LOGIN)]);
    store.denied.push("app".to_string());
    let r = resolver(store, MemoryStore::default());
    let err = r.get_credentials(&SecretRef::from("app"), None).await.unwrap_err();
    assert!(matches!(err, CredentialError::AccessDenied { .. }));
}

#[tokio::test]
async fn incomplete_secret_is_rejected() {
    let r = resolver(
        MemoryStore::with(&[("app", r#"{"username":"x","password":"","host":"h"}"#)]),
        MemoryStore::default(),
    );
    let err = r.get_credentials(&SecretRef::from("app"), None).await.unwrap_err();
    assert!(matches!(err, CredentialError::Incomplete(_)));
}

#[tokio::test]
async fn malformed_secret_is_rejected() {
    let r = resolver(MemoryStore::with(&[("app", "not json")]), MemoryStore::default());
    let err = r.get_credentials(&SecretRef::from("app"), None).await.unwrap_err();
    assert!(matches!(err, CredentialError::MalformedSecret { .. }));
}

#[tokio::test]
async fn role_override_reads_under_the_assumed_identity() {
    // Only the scoped store holds the secret.
    let r = resolver(MemoryStore::default(), MemoryStore::with(&[("admin", LOGIN)]));

    let resolved = r
        .resolve(&SecretRef::from("admin"), Some(&RoleOverride::new(ADMIN_ROLE)))
        .await
        .unwrap();
    assert!(resolved.session.is_some());
    assert!(resolved.credentials.expires_at.is_some());

    // Without the override the ambient store is used and the secret is invisible.
    let err = r
        .get_credentials(&SecretRef::from("admin"), None)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn failed_role_assumption_is_a_credential_error() {
    let r = resolver(MemoryStore::with(&[("app", LOGIN)]), MemoryStore::default());
    let err = r
        .get_credentials(
            &SecretRef::from("app"),
            Some(&RoleOverride::new("arn:aws:iam::1:role/other")),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CredentialError::AssumeRole { .. }));
}

#[test]
fn credentials_debug_redacts_password() {
    let bundle = cognition_secrets::resolver::parse_bundle(&SecretRef::from("app"), LOGIN).unwrap();
    let creds = cognition_core::models::credentials::Credentials::from_bundle(
        SecretRef::from("app"),
        bundle,
        None,
    );
    let rendered = format!("{creds:?}");
    assert!(!rendered.contains("\"pw\""));
    assert!(rendered.contains("<redacted>"));
}

#[test]
fn expired_credentials_are_detected() {
    let bundle = cognition_secrets::resolver::parse_bundle(&SecretRef::from("app"), LOGIN).unwrap();
    let past = jiff::Timestamp::now() - jiff::SignedDuration::from_secs(60);
    let creds = cognition_core::models::credentials::Credentials::from_bundle(
        SecretRef::from("app"),
        bundle,
        Some(past),
    );
    assert!(creds.is_expired());
}
