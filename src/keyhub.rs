//! KeyHub OAuth2 device flow and SAML token exchange.
//!
//! A login runs `authorize -> poll -> exchange`. Device codes are single use
//! and short lived, so any failure aborts the attempt and the user starts
//! over. The only retry is the bounded wait for the user to approve the
//! device in KeyHub.

use std::time::Duration;

use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::KeyHubSettings;
use crate::error::LoginError;

const AUTHORIZE_DEVICE_PATH: &str = "/login/oauth2/authorizedevice";
const TOKEN_PATH: &str = "/login/oauth2/token";
const EXCHANGE_PATH: &str = "/login/oauth2/exchange";

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const TOKEN_EXCHANGE_GRANT: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";

/// Upper bound on token polls before giving up on the user's approval.
pub const MAX_POLL_ATTEMPTS: u32 = 24;

const HTTP_TIMEOUT: Duration = Duration::from_secs(20);

/// Poll interval when the authorization response carries none (RFC 8628 §3.2).
const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 5;

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECONDS
}

/// Device authorization response. Only the codes and the verification URI are required.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceAuthorization {
    pub user_code: String,
    pub device_code: String,
    #[serde(rename = "interval", default = "default_poll_interval")]
    pub interval_seconds: u64,
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    #[serde(default)]
    pub expires_in: u64,
}

impl DeviceAuthorization {
    fn browser_url(&self) -> &str {
        self.verification_uri_complete
            .as_deref()
            .unwrap_or(&self.verification_uri)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeResponse {
    /// The SAML response, base64 and possibly URL encoded.
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub issued_token_type: String,
    #[serde(default)]
    pub expires_in: u64,
}

enum PollOutcome {
    Granted(TokenResponse),
    Pending,
}

/// HTTP client for one KeyHub instance, built once per process.
pub struct KeyHubClient {
    http: Client,
    settings: KeyHubSettings,
    open_browser: bool,
}

impl KeyHubClient {
    /// Builds the HTTP client for the configured KeyHub instance.
    ///
    /// # Arguments
    ///
    /// * `settings` - KeyHub URL and client ids; `allow_insecure_tls` disables
    ///   certificate validation for development instances
    ///
    /// # Errors
    ///
    /// Returns [`LoginError::Authorization`] when the TLS backend cannot be initialized.
    pub fn new(settings: &KeyHubSettings) -> Result<Self, LoginError> {
        debug!("Initializing HTTP client for {}", settings.url);
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .danger_accept_invalid_certs(settings.allow_insecure_tls)
            .build()
            .map_err(|e| LoginError::Authorization(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            settings: settings.clone(),
            open_browser: true,
        })
    }

    /// Whether [`authorize_device`](Self::authorize_device) opens the verification page.
    pub fn with_browser(mut self, open_browser: bool) -> Self {
        self.open_browser = open_browser;
        self
    }

    /// Runs the whole device flow and returns the exchanged SAML response.
    ///
    /// # Returns
    ///
    /// The token exchange response; its `access_token` is the SAML response.
    ///
    /// # Errors
    ///
    /// The first error of [`authorize_device`](Self::authorize_device),
    /// [`poll_for_access_token`](Self::poll_for_access_token) or
    /// [`exchange_token`](Self::exchange_token). Nothing is retried.
    pub async fn fetch_saml_response(&self) -> Result<ExchangeResponse, LoginError> {
        let authorization = self.authorize_device().await?;
        let token = self.poll_for_access_token(&authorization).await?;
        self.exchange_token(&token).await
    }

    /// Starts a device authorization and shows the user where to approve it.
    ///
    /// The user code and verification URL are always logged; the browser is
    /// only a convenience and failing to open it is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`LoginError::Authorization`] when KeyHub is unreachable or the
    /// body is not a device authorization.
    pub async fn authorize_device(&self) -> Result<DeviceAuthorization, LoginError> {
        let form = [
            ("resource", self.settings.aws_saml_client_id.as_str()),
            ("scope", "profile"),
            ("client_id", self.settings.client_id.as_str()),
        ];
        let (status, body) = self
            .post_form(AUTHORIZE_DEVICE_PATH, &form)
            .await
            .map_err(LoginError::Authorization)?;
        debug!("KeyHub authorize device response ({status}): {body}");

        let authorization: DeviceAuthorization =
            parse_json(&body).map_err(LoginError::Authorization)?;
        info!(
            "KeyHub confirmation code: {} (valid for {}s)",
            authorization.user_code, authorization.expires_in
        );

        let url = authorization.browser_url();
        if self.open_browser {
            if let Err(e) = open::that(url) {
                warn!("Could not open browser: {e}");
            }
        }
        info!("If your browser did not open, please visit this url: {url}");

        Ok(authorization)
    }

    /// Polls until the device is approved, at most [`MAX_POLL_ATTEMPTS`] times.
    ///
    /// # Arguments
    ///
    /// * `authorization` - The pending device authorization; its interval paces the polls
    ///
    /// # Returns
    ///
    /// The access token issued once the user approved the device.
    ///
    /// # Errors
    ///
    /// Returns [`LoginError::Timeout`] when the user did not approve in time and
    /// [`LoginError::Poll`] for any other KeyHub answer.
    pub async fn poll_for_access_token(
        &self,
        authorization: &DeviceAuthorization,
    ) -> Result<TokenResponse, LoginError> {
        let interval = Duration::from_secs(authorization.interval_seconds);
        let token = poll_until_granted(interval, move || self.poll_once(authorization)).await?;
        info!("KeyHub login successful.");
        debug!(
            "Received {} token for scope '{}', expires in {}s",
            token.token_type, token.scope, token.expires_in
        );
        Ok(token)
    }

    async fn poll_once(&self, authorization: &DeviceAuthorization) -> Result<PollOutcome, LoginError> {
        let form = [
            ("grant_type", DEVICE_CODE_GRANT),
            ("device_code", authorization.device_code.as_str()),
            ("client_id", self.settings.client_id.as_str()),
        ];
        let (status, body) = self
            .post_form(TOKEN_PATH, &form)
            .await
            .map_err(LoginError::Poll)?;
        debug!("KeyHub token response ({status}): {body}");

        match status {
            StatusCode::OK => parse_json(&body).map(PollOutcome::Granted).map_err(LoginError::Poll),
            StatusCode::BAD_REQUEST if body.to_lowercase().contains("authorization pending") => {
                Ok(PollOutcome::Pending)
            }
            _ => Err(LoginError::Poll(format!("unexpected HTTP status {status}: {body}"))),
        }
    }

    /// Trades a refresh token for a new access token.
    ///
    /// # Arguments
    ///
    /// * `refresh_token` - The `refresh_token` of an earlier [`TokenResponse`]
    ///
    /// # Errors
    ///
    /// Returns [`LoginError::Poll`] for transport failures and any non-200 answer.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse, LoginError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.settings.client_id.as_str()),
        ];
        let (status, body) = self
            .post_form(TOKEN_PATH, &form)
            .await
            .map_err(LoginError::Poll)?;
        debug!("KeyHub refresh response ({status}): {body}");

        if status != StatusCode::OK {
            return Err(LoginError::Poll(format!("refresh failed with HTTP status {status}: {body}")));
        }
        parse_json(&body).map_err(LoginError::Poll)
    }

    /// Exchanges an access token for the SAML response of the AWS connection.
    ///
    /// # Arguments
    ///
    /// * `token` - The access token granted by the device flow
    ///
    /// # Errors
    ///
    /// Returns [`LoginError::Exchange`] for transport failures, non-200 answers
    /// and bodies without an `access_token`.
    pub async fn exchange_token(&self, token: &TokenResponse) -> Result<ExchangeResponse, LoginError> {
        let form = [
            ("grant_type", TOKEN_EXCHANGE_GRANT),
            ("subject_token", token.access_token.as_str()),
            ("subject_token_type", ACCESS_TOKEN_TYPE),
            ("resource", self.settings.aws_saml_client_id.as_str()),
            ("client_id", self.settings.client_id.as_str()),
        ];
        let (status, body) = self
            .post_form(EXCHANGE_PATH, &form)
            .await
            .map_err(LoginError::Exchange)?;
        debug!("KeyHub token exchange response ({status}): {body}");

        if status != StatusCode::OK {
            return Err(LoginError::Exchange(format!("unexpected HTTP status {status}: {body}")));
        }
        let exchange: ExchangeResponse = parse_json(&body).map_err(LoginError::Exchange)?;
        info!("KeyHub token exchange successful.");
        debug!(
            "Exchanged for {} ({}), expires in {}s",
            exchange.issued_token_type, exchange.token_type, exchange.expires_in
        );
        Ok(exchange)
    }

    async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<(StatusCode, String), String> {
        let url = format!("{}{path}", self.settings.url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| format!("request to {url} failed: {e}"))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| format!("cannot read response from {url}: {e}"))?;
        Ok((status, body))
    }
}

/// Sleeps `interval` between pending polls, never after the last one.
async fn poll_until_granted<F, Fut>(interval: Duration, mut poll: F) -> Result<TokenResponse, LoginError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollOutcome, LoginError>>,
{
    for attempt in 1..=MAX_POLL_ATTEMPTS {
        match poll().await? {
            PollOutcome::Granted(token) => return Ok(token),
            PollOutcome::Pending => {
                debug!("Authorization pending (attempt {attempt}/{MAX_POLL_ATTEMPTS})");
                if attempt < MAX_POLL_ATTEMPTS {
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }
    Err(LoginError::Timeout {
        attempts: MAX_POLL_ATTEMPTS,
    })
}

fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, String> {
    serde_json::from_str(body).map_err(|e| format!("cannot parse response: {e}"))
}
