use aws_sdk_sts::{Client, config::Credentials, types};
use aws_smithy_types::error::display::DisplayErrorContext;
use log::{debug, warn};

use crate::error::LoginError;
use crate::roles::RoleEntry;

/// Session duration bounds accepted by `AssumeRoleWithSAML`.
pub const MIN_DURATION: u32 = 900;
pub const MAX_DURATION: u32 = 43200;

/// An `AssumeRoleWithSAML` call for the selected role.
#[derive(Clone)]
pub struct SamlRoleRequest {
    pub role_arn: String,
    pub principal_arn: String,
    /// Base64 SAML response exactly as delivered, not the decoded XML.
    pub assertion: String,
    pub duration: u32,
}

impl SamlRoleRequest {
    pub fn new(role: &RoleEntry, assertion: String, duration: u32) -> Self {
        Self {
            role_arn: role.role.clone(),
            principal_arn: role.principal.clone(),
            assertion,
            duration: clamp_duration(duration),
        }
    }

    pub async fn assume(&self) -> Result<types::Credentials, LoginError> {
        let config = aws_config::from_env().load().await;

        let output = Client::new(&config)
            .assume_role_with_saml()
            .role_arn(&self.role_arn)
            .principal_arn(&self.principal_arn)
            .saml_assertion(&self.assertion)
            .duration_seconds(self.duration as i32)
            .send()
            .await
            .map_err(|e| LoginError::Assumption(DisplayErrorContext(e).to_string()))?;
        debug!("AWS STS AssumeRoleWithSAML result: {output:?}");

        output
            .credentials()
            .cloned()
            .ok_or_else(|| LoginError::Assumption("No credentials returned".to_string()))
    }

    /// Checks with `GetCallerIdentity` that the credentials belong to the requested role.
    pub async fn verify(&self, credentials: &types::Credentials) -> Result<(), LoginError> {
        let config = aws_config::from_env()
            .credentials_provider(Credentials::new(
                credentials.access_key_id(),
                credentials.secret_access_key(),
                Some(credentials.session_token().to_string()),
                None,
                "aws-keyhub",
            ))
            .load()
            .await;

        let identity = Client::new(&config)
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| LoginError::Assumption(DisplayErrorContext(e).to_string()))?;
        debug!("AWS STS GetCallerIdentity result: {identity:?}");

        verify_assumed_role(identity.arn().unwrap_or_default(), &self.role_arn)
    }
}

fn clamp_duration(duration: u32) -> u32 {
    let clamped = duration.clamp(MIN_DURATION, MAX_DURATION);
    if clamped != duration {
        warn!("Assume duration {duration}s is outside {MIN_DURATION}-{MAX_DURATION}s, using {clamped}s");
    }
    clamped
}

/// Compares an STS caller identity with the IAM role that was requested.
///
/// IAM: `arn:aws:iam::123456789000:role/example-role`
/// STS: `arn:aws:sts::123456789000:assumed-role/example-role/session-name`
///
/// The session suffix rules out an exact match, so the rewritten caller ARN
/// only has to contain the role ARN.
pub fn verify_assumed_role(caller_arn: &str, role_arn: &str) -> Result<(), LoginError> {
    let as_role = caller_arn.replacen("sts", "iam", 1).replacen("assumed-role", "role", 1);
    if role_arn.is_empty() || !as_role.contains(role_arn) {
        return Err(LoginError::Verification {
            expected: role_arn.to_string(),
            actual: caller_arn.to_string(),
        });
    }
    Ok(())
}
