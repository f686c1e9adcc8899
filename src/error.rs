//! Failures of a single login attempt.
//!
//! Every variant is terminal for the attempt. The only local recovery in the
//! whole flow is the bounded "authorization pending" retry while polling the
//! KeyHub token endpoint, and that never surfaces as an error until the
//! attempt ceiling is hit.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("Failed to decode SAML response: {0}")]
    Decode(String),
    #[error("Malformed SAML assertion: {0}")]
    MalformedAssertion(String),
    #[error("KeyHub device authorization failed: {0}")]
    Authorization(String),
    #[error("KeyHub login failed: {0}")]
    Poll(String),
    #[error("KeyHub login failed. Authorization request was not accepted within {attempts} attempts")]
    Timeout { attempts: u32 },
    #[error("KeyHub token exchange failed: {0}")]
    Exchange(String),
    #[error("Role selection failed: {0}")]
    Selection(String),
    #[error("AWS STS AssumeRoleWithSAML failed: {0}")]
    Assumption(String),
    #[error("Login failed, assumed identity {actual} does not match requested role {expected}")]
    Verification { expected: String, actual: String },
}

impl From<dialoguer::Error> for LoginError {
    fn from(error: dialoguer::Error) -> Self {
        Self::Selection(error.to_string())
    }
}
