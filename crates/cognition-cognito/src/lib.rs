//! cognition-cognito
//!
//! Helpers for Cognito user pool triggers: gate sign-up and sign-in on the
//! state of the application user, and add tenant claims to identity tokens.

pub mod error;
pub mod triggers;

pub use crate::error::TriggerError;
pub use crate::triggers::CognitoTriggers;
