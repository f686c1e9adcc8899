//! Role registry assembled from the SAML attributes, and role selection.

use std::collections::BTreeMap;

use dialoguer::Select;
use log::{debug, info, warn};

use crate::error::LoginError;

/// One assumable role offered by the identity provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleEntry {
    pub role: String,
    pub principal: String,
    pub description: String,
}

impl RoleEntry {
    fn is_selectable(&self) -> bool {
        !self.role.is_empty() && !self.principal.is_empty()
    }

    fn display(&self) -> String {
        format!("{} / {}", self.role, self.description)
    }
}

/// Partially filled role entries keyed by role ARN.
///
/// The two attribute families each contribute part of an entry and may
/// arrive in any order; merging only ever overwrites the fields the current
/// attribute supplies.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RoleRegistry {
    entries: BTreeMap<String, RoleEntry>,
}

impl RoleRegistry {
    pub fn merge_description(&mut self, role_arn: &str, description: String) {
        self.entries.entry(role_arn.to_string()).or_default().description = description;
    }

    pub fn merge_role(&mut self, role: String, principal: String) {
        if role.is_empty() {
            warn!("Ignoring role attribute without role ARN (principal: {principal})");
            return;
        }
        let entry = self.entries.entry(role.clone()).or_default();
        entry.role = role;
        entry.principal = principal;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Complete entries in role ARN order.
    pub fn selectable(&self) -> Vec<&RoleEntry> {
        self.entries.values().filter(|e| e.is_selectable()).collect()
    }
}

/// Splits a `<role-arn>,<principal-arn>` value in either order.
///
/// Identity providers disagree on which ARN comes first, so each part is
/// classified by its resource type instead of its position.
pub fn split_role_and_principal(value: &str) -> (String, String) {
    let mut role = String::new();
    let mut principal = String::new();
    for part in value.split(',').map(str::trim) {
        if part.contains("saml-provider") {
            principal = part.to_string();
        } else if part.contains("role") {
            role = part.to_string();
        }
    }
    (role, principal)
}

/// Asks the user to pick one of the offered options, returning its index.
pub trait RolePrompt {
    fn choose(&self, options: &[String]) -> Result<usize, LoginError>;
}

pub struct TerminalPrompt;

impl RolePrompt for TerminalPrompt {
    fn choose(&self, options: &[String]) -> Result<usize, LoginError> {
        let index = Select::new()
            .with_prompt("Choose a role")
            .items(options)
            .default(0)
            .interact()?;
        Ok(index)
    }
}

/// Picks the role to assume.
///
/// A `preferred` role ARN present in the registry is returned without
/// prompting. Anything else falls back to the interactive prompt.
pub fn select_role(
    preferred: Option<&str>,
    registry: &RoleRegistry,
    prompt: &dyn RolePrompt,
) -> Result<RoleEntry, LoginError> {
    let entries = registry.selectable();
    if entries.is_empty() {
        return Err(LoginError::Selection(
            "the SAML assertion does not offer any AWS role".to_string(),
        ));
    }

    if let Some(preferred) = preferred.filter(|arn| !arn.is_empty()) {
        if let Some(entry) = entries.iter().find(|e| e.role == preferred) {
            info!("Selected role {} based on --role-arn", entry.role);
            return Ok((*entry).clone());
        }
        warn!("Role {preferred} is not available for this login, asking instead");
    }

    let options: Vec<String> = entries.iter().map(|e| e.display()).collect();
    let index = prompt.choose(&options)?;
    debug!("User selected option {index}");

    entries
        .get(index)
        .map(|entry| (*entry).clone())
        .ok_or_else(|| LoginError::Selection(format!("no role matches option {index}")))
}
