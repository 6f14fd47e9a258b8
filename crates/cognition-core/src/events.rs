//! Lambda event payloads: Cognito user pool triggers and AppSync resolver calls.
//!
//! Only the fields the library reads are typed; everything else is carried
//! through untouched so a handler can hand the event back to Cognito.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::claims::ClaimSet;
use crate::models::row::SqlValue;

/// A Cognito user pool trigger event (pre signup, pre authentication,
/// post confirmation, pre token generation).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CognitoTriggerEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_pool_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default)]
    pub request: TriggerRequest,
    #[serde(default)]
    pub response: Map<String, Value>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    #[serde(default)]
    pub user_attributes: BTreeMap<String, String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl CognitoTriggerEvent {
    pub fn email(&self) -> Option<&str> {
        self.request
            .user_attributes
            .get("email")
            .map(String::as_str)
            .filter(|e| !e.is_empty())
    }

    /// Write `claims` to `response.claimsOverrideDetails.claimsToAddOrOverride`,
    /// keeping any other override details already present.
    pub fn set_claims_override(&mut self, claims: &ClaimSet) {
        let details = self
            .response
            .entry("claimsOverrideDetails")
            .or_insert_with(|| Value::Object(Map::new()));
        if !details.is_object() {
            *details = Value::Object(Map::new());
        }
        if let Value::Object(details) = details {
            let map = claims
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            details.insert("claimsToAddOrOverride".to_string(), Value::Object(map));
        }
    }

    /// Claims currently set in the response, if any.
    pub fn claims_override(&self) -> ClaimSet {
        self.response
            .get("claimsOverrideDetails")
            .and_then(|d| d.get("claimsToAddOrOverride"))
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Caller identity attached to an AppSync resolver event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSyncIdentity {
    /// Present for IAM callers, absent for Cognito user pool callers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_arn: Option<String>,
    #[serde(default)]
    pub claims: Map<String, Value>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl AppSyncIdentity {
    pub fn email(&self) -> Option<&str> {
        self.claims.get("email").and_then(Value::as_str)
    }
}

/// A parameter in the RDS Data API wire shape:
/// `{"name": "EMAIL", "value": {"stringValue": "a@b.c"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataApiParameter {
    pub name: String,
    pub value: DataApiField,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataApiField {
    StringValue(String),
    LongValue(i64),
    DoubleValue(f64),
    BooleanValue(bool),
    IsNull(bool),
}

impl From<DataApiField> for SqlValue {
    fn from(field: DataApiField) -> Self {
        match field {
            DataApiField::StringValue(s) => SqlValue::Text(s),
            DataApiField::LongValue(i) => SqlValue::Int(i),
            DataApiField::DoubleValue(f) => SqlValue::Float(f),
            DataApiField::BooleanValue(b) => SqlValue::Bool(b),
            DataApiField::IsNull(_) => SqlValue::Null,
        }
    }
}

/// Resolver parameters: either a plain object or a Data API parameter list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParameters {
    Named(BTreeMap<String, SqlValue>),
    DataApi(Vec<DataApiParameter>),
}

impl Default for QueryParameters {
    fn default() -> Self {
        Self::Named(BTreeMap::new())
    }
}

impl QueryParameters {
    pub fn to_params(&self) -> Vec<(String, SqlValue)> {
        match self {
            Self::Named(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Self::DataApi(list) => list
                .iter()
                .map(|p| (p.name.clone(), SqlValue::from(p.value.clone())))
                .collect(),
        }
    }
}

/// One SQL request produced by an AppSync resolver mapping template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSyncQuery {
    pub query: String,
    #[serde(default)]
    pub parameters: QueryParameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<AppSyncIdentity>,
}

/// A single resolver invocation or a batch (`BatchInvoke`) of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AppSyncEvent {
    Batch(Vec<AppSyncQuery>),
    Single(AppSyncQuery),
}

impl AppSyncEvent {
    /// Identity of the caller; for a batch, that of the first item.
    pub fn identity(&self) -> Option<&AppSyncIdentity> {
        match self {
            Self::Single(q) => q.identity.as_ref(),
            Self::Batch(items) => items.first().and_then(|q| q.identity.as_ref()),
        }
    }

    pub fn queries(&self) -> &[AppSyncQuery] {
        match self {
            Self::Single(q) => std::slice::from_ref(q),
            Self::Batch(items) => items,
        }
    }
}
