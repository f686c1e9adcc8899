//! Login pipeline: SAML response in, verified credentials profile out.

use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use log::{debug, info};
use tokio::sync::oneshot;

use crate::config::Config;
use crate::credentials::SamlRoleRequest;
use crate::error::LoginError;
use crate::keyhub::KeyHubClient;
use crate::roles::{RolePrompt, select_role};
use crate::saml::SamlAssertion;
use crate::updater::CredentialsUpdater;

/// Everything one login invocation needs, read once at startup.
pub struct Login {
    pub config: Config,
    pub updater: CredentialsUpdater,
    pub role_arn: Option<String>,
    pub profile: String,
}

impl Login {
    /// Obtains the SAML response through the KeyHub device flow and logs in with it.
    pub async fn with_device_flow(&self, open_browser: bool, prompt: &dyn RolePrompt) -> Result<()> {
        let keyhub = KeyHubClient::new(&self.config.keyhub)?.with_browser(open_browser);
        let exchange = keyhub.fetch_saml_response().await?;
        self.complete(&exchange.access_token, prompt).await
    }

    /// Decodes the response, picks a role, assumes it and writes the profile.
    ///
    /// Credentials are verified before anything is written, so a failed
    /// login never leaves a half-updated profile behind.
    ///
    /// # Arguments
    ///
    /// * `saml_response` - `SAMLResponse=<percent-encoded base64>` or the bare encoded value
    /// * `prompt` - Asked only when no preferred role ARN matches the assertion
    ///
    /// # Errors
    ///
    /// * [`LoginError::Decode`] or [`LoginError::MalformedAssertion`] for an unreadable response
    /// * [`LoginError::Selection`] when the assertion grants no usable role
    /// * [`LoginError::Assumption`] or [`LoginError::Verification`] when STS refuses the role
    ///   or hands back credentials for another identity
    /// * Any I/O error while writing the credentials file
    pub async fn complete(&self, saml_response: &str, prompt: &dyn RolePrompt) -> Result<()> {
        let request = self.prepare(saml_response, prompt)?;
        info!("Assuming role {} for {}s", request.role_arn, request.duration);

        let credentials = request.assume().await?;
        request.verify(&credentials).await?;
        self.updater.update_profile(&self.profile, &credentials).await?;

        let profile = &self.profile;
        info!(
            "Successfully logged in, use the AWS profile `{profile}`. \
             (export AWS_PROFILE={profile} / set AWS_PROFILE={profile} / $env:AWS_PROFILE='{profile}')"
        );
        Ok(())
    }

    fn prepare(&self, saml_response: &str, prompt: &dyn RolePrompt) -> Result<SamlRoleRequest, LoginError> {
        let assertion = SamlAssertion::decode(saml_response)?;
        let registry = assertion.roles()?;
        let role = select_role(self.role_arn.as_deref(), &registry, prompt)?;
        Ok(SamlRoleRequest::new(
            &role,
            assertion.encoded,
            self.config.aws.assume_duration,
        ))
    }
}

/// One-shot slot for a SAML response delivered from outside the login flow,
/// such as a browser automation callback.
///
/// Only the first delivery reaches the pipeline; later ones are dropped.
pub struct AssertionHook {
    sender: Mutex<Option<oneshot::Sender<String>>>,
}

impl AssertionHook {
    pub fn channel() -> (Self, oneshot::Receiver<String>) {
        let (sender, receiver) = oneshot::channel();
        let hook = Self {
            sender: Mutex::new(Some(sender)),
        };
        (hook, receiver)
    }

    /// Returns whether this delivery was the one handed to the pipeline.
    pub fn deliver(&self, saml_response: String) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(sender) => sender.send(saml_response).is_ok(),
            None => {
                debug!("Ignoring repeated SAML response delivery");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use base64::{Engine, engine::general_purpose::STANDARD};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::{AwsSettings, KeyHubSettings};
    use crate::saml::{GROUPS_ATTRIBUTE, ROLE_ATTRIBUTE};

    struct NoPrompt;

    impl RolePrompt for NoPrompt {
        fn choose(&self, _options: &[String]) -> Result<usize, LoginError> {
            panic!("prompt must not be shown");
        }
    }

    struct FirstOption;

    impl RolePrompt for FirstOption {
        fn choose(&self, _options: &[String]) -> Result<usize, LoginError> {
            Ok(0)
        }
    }

    fn login(role_arn: Option<&str>) -> Login {
        Login {
            config: Config {
                keyhub: KeyHubSettings {
                    url: "https://keyhub.example.com".to_string(),
                    client_id: "client".to_string(),
                    aws_saml_client_id: "urn:aws".to_string(),
                    allow_insecure_tls: false,
                },
                aws: AwsSettings {
                    assume_duration: 3600,
                },
            },
            updater: CredentialsUpdater::new(Some(PathBuf::from("unused"))).unwrap(),
            role_arn: role_arn.map(str::to_string),
            profile: "keyhub".to_string(),
        }
    }

    fn form_encoded_response() -> (String, String) {
        let xml = format!(
            r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion">
  <saml:Assertion><saml:AttributeStatement>
    <saml:Attribute Name="{GROUPS_ATTRIBUTE}">
      <saml:AttributeValue>{{"description":"Team A","arn":"arn:aws:iam::1:role/A,arn:aws:iam::1:saml-provider/P"}}</saml:AttributeValue>
    </saml:Attribute>
    <saml:Attribute Name="{ROLE_ATTRIBUTE}">
      <saml:AttributeValue>arn:aws:iam::1:role/A,arn:aws:iam::1:saml-provider/P</saml:AttributeValue>
    </saml:Attribute>
  </saml:AttributeStatement></saml:Assertion>
</samlp:Response>"#
        );
        let encoded = STANDARD.encode(xml);
        let form = format!(
            "SAMLResponse={}",
            encoded.replace('+', "%2B").replace('/', "%2F").replace('=', "%3D")
        );
        (form, encoded)
    }

    #[test]
    fn prepares_request_for_preferred_role() {
        let (form, encoded) = form_encoded_response();
        let request = login(Some("arn:aws:iam::1:role/A"))
            .prepare(&form, &NoPrompt)
            .unwrap();

        assert_eq!(request.role_arn, "arn:aws:iam::1:role/A");
        assert_eq!(request.principal_arn, "arn:aws:iam::1:saml-provider/P");
        assert_eq!(request.assertion, encoded);
        assert_eq!(request.duration, 3600);
    }

    #[test]
    fn unknown_preferred_role_still_prepares_via_prompt() {
        let (form, _) = form_encoded_response();
        let request = login(Some("arn:aws:iam::1:role/Z"))
            .prepare(&form, &FirstOption)
            .unwrap();
        assert_eq!(request.role_arn, "arn:aws:iam::1:role/A");
    }

    #[test]
    fn undecodable_response_fails_before_prompting() {
        let result = login(None).prepare("SAMLResponse=%%%", &NoPrompt);
        assert!(matches!(result, Err(LoginError::Decode(_))));
    }

    #[tokio::test]
    async fn hook_delivers_only_once() {
        let (hook, delivered) = AssertionHook::channel();
        let hook = Arc::new(hook);

        let callbacks: Vec<_> = ["first", "second"]
            .into_iter()
            .map(|body| {
                let hook = Arc::clone(&hook);
                tokio::spawn(async move { hook.deliver(body.to_string()) })
            })
            .collect();

        let mut accepted = 0;
        for callback in callbacks {
            if callback.await.unwrap() {
                accepted += 1;
            }
        }

        assert_eq!(accepted, 1);
        let body = delivered.await.unwrap();
        assert!(body == "first" || body == "second");
    }

    #[tokio::test]
    async fn hook_delivers_after_a_panicking_holder() {
        let (hook, delivered) = AssertionHook::channel();
        let hook = Arc::new(hook);

        let poisoner = Arc::clone(&hook);
        let panicked = std::thread::spawn(move || {
            let _slot = poisoner.sender.lock().unwrap();
            panic!("poison the slot");
        })
        .join();
        assert!(panicked.is_err());
        assert!(hook.sender.is_poisoned());

        assert!(hook.deliver("SAMLResponse=abc".to_string()));
        assert_eq!(delivered.await.unwrap(), "SAMLResponse=abc");
    }

    #[tokio::test]
    async fn dropped_hook_closes_the_channel() {
        let (hook, delivered) = AssertionHook::channel();
        drop(hook);
        assert!(delivered.await.is_err());
    }
}
