//! AWS shared credentials file writer.
//!
//! Temporary credentials go into one profile section, by default `[keyhub]`:
//!
//! ```ini
//! [keyhub]
//! aws_access_key_id=ASIA...
//! aws_secret_access_key=...
//! aws_session_token=...
//! expiration=2023-12-01T12:00:00Z
//! ```
//!
//! The section is created when absent and its credential keys overwritten.
//! Every other line of the file, comments included, is written back as it was.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use aws_sdk_sts::types;
use aws_smithy_types::date_time::Format;
use configparser::ini::Ini;
use log::{debug, info};
use tokio::fs;

/// Keys outside any section; configparser writes its default section headerless.
const TOP_LEVEL: &str = "__top_level__";

const COMMENT_SYMBOLS: [char; 2] = ['#', ';'];

pub struct CredentialsUpdater {
    /// Path to the AWS credentials file (typically ~/.aws/credentials)
    path: PathBuf,
}

impl CredentialsUpdater {
    /// Uses `~/.aws/credentials` when no path is given.
    pub fn new(path: Option<PathBuf>) -> Result<Self> {
        let path = path
            .or_else(|| dirs::home_dir().map(|d| d.join(".aws").join("credentials")))
            .context("Could not determine home directory")?;
        Ok(Self { path })
    }

    /// Writes temporary credentials into one profile of the credentials file.
    ///
    /// The file and its parent directory are created when missing. Within
    /// `profile` only the four credential keys change; other keys such as
    /// `region` stay, as does every other profile.
    ///
    /// # Arguments
    ///
    /// * `profile` - Section name to write, e.g. `keyhub`
    /// * `credentials` - Temporary credentials returned by `AssumeRoleWithSAML`
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The credentials' expiration as an RFC 3339 timestamp
    /// * `Err(anyhow::Error)` - The existing file is not valid INI, or it could
    ///   not be read or written
    pub async fn update_profile(&self, profile: &str, credentials: &types::Credentials) -> Result<String> {
        let expiration = credentials.expiration().fmt(Format::DateTime)?;
        let values = [
            ("aws_access_key_id", credentials.access_key_id()),
            ("aws_secret_access_key", credentials.secret_access_key()),
            ("aws_session_token", credentials.session_token()),
            ("expiration", expiration.as_str()),
        ];

        let existing = if fs::try_exists(&self.path).await? {
            fs::read_to_string(&self.path).await?
        } else {
            if let Some(dir) = self.path.parent() {
                fs::create_dir_all(dir).await?;
            }
            String::new()
        };
        let content = splice_profile(&existing, profile, &values)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;

        fs::write(&self.path, content)
            .await
            .with_context(|| format!("Credentials could not be saved to {}", self.path.display()))?;
        debug!("Credentials saved to {} under [{profile}]", self.path.display());
        info!("Credentials expire at: {expiration}");

        Ok(expiration)
    }
}

/// Sets `values` in `profile`, leaving every unrelated line untouched.
fn splice_profile(existing: &str, profile: &str, values: &[(&str, &str)]) -> Result<String> {
    let mut ini = Ini::new_cs();
    ini.set_default_section(TOP_LEVEL);
    // `;` and `#` inside a value belong to the value for the AWS CLI.
    ini.set_inline_comment_symbols(Some(&[]));
    ini.read(existing.to_string()).map_err(|e| anyhow!(e))?;

    if !ini.sections().iter().any(|section| section == profile) {
        return Ok(append_profile(existing, profile, values));
    }

    let mut lines: Vec<String> = Vec::new();
    let mut written: Vec<&str> = Vec::new();
    let mut in_profile = false;
    for line in existing.lines() {
        if let Some(section) = section_name(line) {
            if in_profile {
                insert_missing(&mut lines, values, &mut written);
            }
            in_profile = section == profile;
        } else if in_profile
            && let Some(&(key, value)) = values.iter().find(|(key, _)| line_key(line) == Some(*key))
        {
            if !written.contains(&key) {
                lines.push(format!("{key}={value}"));
                written.push(key);
            }
            continue;
        }
        lines.push(line.to_string());
    }
    if in_profile {
        insert_missing(&mut lines, values, &mut written);
    }

    let mut content = lines.join("\n");
    content.push('\n');
    Ok(content)
}

fn append_profile(existing: &str, profile: &str, values: &[(&str, &str)]) -> String {
    let mut section = Ini::new_cs();
    section.set_default_section(TOP_LEVEL);
    for (key, value) in values {
        section.set(profile, key, Some(value.to_string()));
    }

    let mut content = existing.trim_end().to_string();
    if !content.is_empty() {
        content.push_str("\n\n");
    }
    content.push_str(&section.writes());
    content
}

/// Adds the keys not yet written right after the section's last non-blank line.
fn insert_missing<'a>(lines: &mut Vec<String>, values: &[(&'a str, &str)], written: &mut Vec<&'a str>) {
    let at = lines
        .iter()
        .rposition(|line| !line.trim().is_empty())
        .map_or(lines.len(), |last| last + 1);
    let missing: Vec<String> = values
        .iter()
        .filter(|(key, _)| !written.contains(key))
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    lines.splice(at..at, missing);
    written.extend(values.iter().map(|(key, _)| *key));
}

/// Section headers as configparser reads them: `[name]`, anything after `]` ignored.
fn section_name(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix('[')?;
    rest.rfind(']').map(|end| rest[..end].trim())
}

fn line_key(line: &str) -> Option<&str> {
    let line = line.trim_start();
    if line.starts_with(COMMENT_SYMBOLS) {
        return None;
    }
    line.split_once(['=', ':']).map(|(key, _)| key.trim())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use aws_smithy_types::DateTime;
    use pretty_assertions::assert_eq;

    use super::*;

    fn session() -> types::Credentials {
        types::Credentials::builder()
            .access_key_id("ASIAEXAMPLE")
            .secret_access_key("secret")
            .session_token("token")
            .expiration(DateTime::from_secs(1_700_000_000))
            .build()
            .unwrap()
    }

    fn read(path: &Path) -> Ini {
        let mut ini = Ini::new_cs();
        ini.load(path).unwrap();
        ini
    }

    #[tokio::test]
    async fn creates_file_and_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".aws").join("credentials");
        let updater = CredentialsUpdater::new(Some(path.clone())).unwrap();

        let expiration = updater.update_profile("KeyHub", &session()).await.unwrap();

        assert_eq!(expiration, "2023-11-14T22:13:20Z");
        let ini = read(&path);
        assert_eq!(ini.get("KeyHub", "aws_access_key_id").as_deref(), Some("ASIAEXAMPLE"));
        assert_eq!(ini.get("KeyHub", "aws_secret_access_key").as_deref(), Some("secret"));
        assert_eq!(ini.get("KeyHub", "aws_session_token").as_deref(), Some("token"));
    }

    #[tokio::test]
    async fn overwrites_keys_and_keeps_other_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials");
        std::fs::write(
            &path,
            "[default]\naws_access_key_id=AKIADEFAULT\naws_secret_access_key=default-secret\n\n\
             [keyhub]\naws_access_key_id=OLD\naws_session_token=OLD\nregion=eu-west-1\n",
        )
        .unwrap();
        let updater = CredentialsUpdater::new(Some(path.clone())).unwrap();

        updater.update_profile("keyhub", &session()).await.unwrap();

        assert!(std::fs::read_to_string(&path).unwrap().contains("[default]"));
        let ini = read(&path);
        assert_eq!(ini.get("default", "aws_access_key_id").as_deref(), Some("AKIADEFAULT"));
        assert_eq!(ini.get("keyhub", "aws_access_key_id").as_deref(), Some("ASIAEXAMPLE"));
        assert_eq!(ini.get("keyhub", "aws_session_token").as_deref(), Some("token"));
        assert_eq!(ini.get("keyhub", "region").as_deref(), Some("eu-west-1"));
    }

    #[tokio::test]
    async fn keeps_comments_and_other_profiles_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials");
        std::fs::write(
            &path,
            "# my work account\n[work]\naws_access_key_id=AKIAWORK\naws_secret_access_key=s ; note\n\n\
             [keyhub]\n; managed by aws-keyhub\naws_access_key_id=OLD\n",
        )
        .unwrap();
        let updater = CredentialsUpdater::new(Some(path.clone())).unwrap();

        updater.update_profile("keyhub", &session()).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "# my work account\n[work]\naws_access_key_id=AKIAWORK\naws_secret_access_key=s ; note\n\n\
             [keyhub]\n; managed by aws-keyhub\naws_access_key_id=ASIAEXAMPLE\naws_secret_access_key=secret\n\
             aws_session_token=token\nexpiration=2023-11-14T22:13:20Z\n"
        );
    }

    #[tokio::test]
    async fn appends_missing_profile_after_existing_ones() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials");
        std::fs::write(&path, "[work] # team account\nregion=eu-west-1").unwrap();
        let updater = CredentialsUpdater::new(Some(path.clone())).unwrap();

        updater.update_profile("default", &session()).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("[work] # team account\nregion=eu-west-1\n\n[default]\n"));
        let ini = read(&path);
        assert_eq!(ini.get("default", "aws_session_token").as_deref(), Some("token"));
    }

    #[test]
    fn rejects_unparseable_file() {
        let result = splice_profile("[broken\nkey=value\n", "keyhub", &[("expiration", "x")]);
        assert!(result.is_err());
    }
}
