//! aws-keyhub configuration file.
//!
//! ```json
//! {
//!   "keyhub": {
//!     "url": "https://keyhub.domain.tld",
//!     "clientId": "00000000-0000-0000-0000-000000000000",
//!     "awsSamlClientId": "urn:tkh-clientid:urn:amazon:webservices",
//!     "allowInsecureTLS": false
//!   },
//!   "aws": { "assumeDuration": 43200 }
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use dialoguer::Input;
use log::{debug, info};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ASSUME_DURATION: u32 = 43200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub keyhub: KeyHubSettings,
    #[serde(default)]
    pub aws: AwsSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyHubSettings {
    pub url: String,
    pub client_id: String,
    /// Resource identifier of the AWS SAML connection in KeyHub.
    pub aws_saml_client_id: String,
    /// Not asked by the wizard; only meant for development setups.
    #[serde(rename = "allowInsecureTLS", default)]
    pub allow_insecure_tls: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsSettings {
    pub assume_duration: u32,
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            assume_duration: DEFAULT_ASSUME_DURATION,
        }
    }
}

/// `~/.aws-keyhub/config-v2.json` unless a path was given.
pub fn resolve_path(path: Option<PathBuf>) -> Result<PathBuf> {
    path.or_else(|| dirs::home_dir().map(|d| d.join(".aws-keyhub").join("config-v2.json")))
        .context("Could not determine home directory")
}

/// `~/.aws/config` unless a path was given, e.g. through `AWS_CONFIG_FILE`.
pub fn aws_cli_config_path(path: Option<PathBuf>) -> Result<PathBuf> {
    path.or_else(|| dirs::home_dir().map(|d| d.join(".aws").join("config")))
        .context("Could not determine home directory")
}

/// Fails before any KeyHub interaction when the AWS CLI was never configured.
///
/// STS needs the region from that file; without this check a missing region
/// would only surface after the user approved the device.
///
/// # Errors
///
/// Returns an error asking to run `aws configure` when `path` does not exist.
pub fn ensure_aws_cli_configured(path: &Path) -> Result<()> {
    ensure!(
        path.exists(),
        "It looks like you have no AWS configuration file at {}. Please run `aws configure` first. \
         You can leave the access key fields empty.",
        path.display()
    );
    debug!("AWS configuration file exists at {}", path.display());
    Ok(())
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        ensure!(
            path.exists(),
            "No aws-keyhub configuration found at {}. Please run `aws-keyhub configure` first.",
            path.display()
        );
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        debug!("Read aws-keyhub configuration: {config:?}");
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            create_private_dir(dir)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        write_private_file(path, content.as_bytes())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Wrote aws-keyhub configuration to {}", path.display());
        Ok(())
    }

    /// Interactive configuration wizard.
    pub fn prompt() -> Result<Self> {
        info!("aws-keyhub configuration wizard, please provide the following information:");
        let url: String = Input::new()
            .with_prompt("KeyHub url (e.g. https://keyhub.domain.tld)")
            .interact_text()?;
        let client_id: String = Input::new()
            .with_prompt("KeyHub aws-keyhub client id (e.g. 00000000-0000-0000-0000-000000000000)")
            .interact_text()?;
        let aws_saml_client_id: String = Input::new()
            .with_prompt("KeyHub resource URN for the AWS SAML connection (e.g. urn:tkh-clientid:urn:amazon:webservices)")
            .interact_text()?;
        let assume_duration: u32 = Input::new()
            .with_prompt("AWS assume role duration (in seconds, maximum value is 43200)")
            .default(DEFAULT_ASSUME_DURATION)
            .interact_text()?;

        Ok(Self {
            keyhub: KeyHubSettings {
                url: url.trim_end_matches('/').to_string(),
                client_id,
                aws_saml_client_id,
                allow_insecure_tls: false,
            },
            aws: AwsSettings { assume_duration },
        })
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    if !dir.exists() {
        fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)?;
        debug!("Created config directory {}", dir.display());
    }
    Ok(())
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    Ok(())
}

#[cfg(unix)]
fn write_private_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?
        .write_all(content)
}

#[cfg(not(unix))]
fn write_private_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    fs::write(path, content)
}
