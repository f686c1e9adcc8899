//! SAML assertion decoding and role extraction.
//!
//! KeyHub delivers the assertion either as the `access_token` of a token
//! exchange or as the `SAMLResponse` form field a browser would POST to the
//! AWS sign-in page. Both are percent-encoded base64 of the response XML.

use base64::{
    Engine,
    engine::general_purpose::{STANDARD, URL_SAFE},
};
use log::{debug, warn};
use percent_encoding::percent_decode_str;
use serde::Deserialize;

use crate::error::LoginError;
use crate::roles::{RoleRegistry, split_role_and_principal};
use crate::xml::Element;

const SAML_RESPONSE_PREFIX: &str = "SAMLResponse=";

/// Attribute carrying KeyHub group metadata as JSON `{description, arn}` values.
pub const GROUPS_ATTRIBUTE: &str = "https://github.com/topicuskeyhub/aws-keyhub/groups";

/// Standard AWS attribute carrying `<role-arn>,<principal-arn>` values.
pub const ROLE_ATTRIBUTE: &str = "https://aws.amazon.com/SAML/Attributes/Role";

/// A delivered assertion in both of the forms the login needs.
#[derive(Debug, Clone)]
pub struct SamlAssertion {
    /// URL-decoded but still base64-encoded, as STS expects it.
    pub encoded: String,
    pub xml: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct GroupMetadata {
    #[serde(default)]
    description: String,
    #[serde(default)]
    arn: String,
}

impl SamlAssertion {
    /// Decodes `SAMLResponse=<percent-encoded base64>` or the bare encoded value.
    pub fn decode(raw: &str) -> Result<Self, LoginError> {
        let raw = raw.trim();
        let value = raw.strip_prefix(SAML_RESPONSE_PREFIX).unwrap_or(raw);

        // Line-wrapped base64 is valid in a form post; STS wants it unwrapped.
        let encoded: String = percent_decode_str(value)
            .decode_utf8()
            .map_err(|e| LoginError::Decode(format!("invalid URL encoding: {e}")))?
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();

        let xml = match STANDARD.decode(&encoded) {
            Ok(xml) => xml,
            Err(standard) => URL_SAFE
                .decode(&encoded)
                .map_err(|_| LoginError::Decode(format!("invalid base64: {standard}")))?,
        };

        debug!("Decoded SAML response: {}", String::from_utf8_lossy(&xml));
        Ok(Self { encoded, xml })
    }

    /// Walks the assertion and merges both attribute families into one registry.
    pub fn roles(&self) -> Result<RoleRegistry, LoginError> {
        let root = Element::parse(&self.xml)?;
        let mut registry = RoleRegistry::default();

        for attribute in root.descendants().filter(|e| e.name == "Attribute") {
            match attribute.attribute("Name") {
                Some(GROUPS_ATTRIBUTE) => {
                    for value in attribute.children_named("AttributeValue") {
                        merge_group_metadata(&mut registry, value.text.trim());
                    }
                }
                Some(ROLE_ATTRIBUTE) => {
                    for value in attribute.children_named("AttributeValue") {
                        let (role, principal) = split_role_and_principal(value.text.trim());
                        registry.merge_role(role, principal);
                    }
                }
                _ => {}
            }
        }

        debug!("Found {} role entries in SAML assertion: {registry:?}", registry.len());
        Ok(registry)
    }
}

fn merge_group_metadata(registry: &mut RoleRegistry, json: &str) {
    let metadata: GroupMetadata = match serde_json::from_str(json) {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!("Cannot parse group metadata nested in the SAML assertion: {e}");
            return;
        }
    };

    // The provider half of the composite ARN only arrives via the Role attribute.
    let role_arn = metadata.arn.split(',').next().unwrap_or_default().trim();
    if role_arn.is_empty() {
        warn!("Group metadata without role ARN: {json}");
        return;
    }
    registry.merge_description(role_arn, metadata.description);
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::roles::RoleEntry;

    const ROLE_A: &str = "arn:aws:iam::1:role/A";
    const PROVIDER: &str = "arn:aws:iam::1:saml-provider/P";

    fn response(attributes: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion">
  <saml:Issuer>https://keyhub.example.com</saml:Issuer>
  <saml:Assertion>
    <ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:SignedInfo/></ds:Signature>
    <saml:AttributeStatement>{attributes}</saml:AttributeStatement>
  </saml:Assertion>
</samlp:Response>"#
        )
    }

    fn assertion(xml: &str) -> SamlAssertion {
        SamlAssertion {
            encoded: STANDARD.encode(xml),
            xml: xml.as_bytes().to_vec(),
        }
    }

    fn groups_attribute(description: &str, arn: &str) -> String {
        format!(
            r#"<saml:Attribute Name="{GROUPS_ATTRIBUTE}"><saml:AttributeValue>{{"description":"{description}","arn":"{arn}"}}</saml:AttributeValue></saml:Attribute>"#
        )
    }

    fn role_attribute(value: &str) -> String {
        format!(
            r#"<saml:Attribute Name="{ROLE_ATTRIBUTE}"><saml:AttributeValue>{value}</saml:AttributeValue></saml:Attribute>"#
        )
    }

    #[test]
    fn decodes_form_encoded_response() {
        let xml = "<Response><Assertion/></Response>";
        let encoded = STANDARD.encode(xml);
        let escaped = encoded.replace('+', "%2B").replace('/', "%2F").replace('=', "%3D");

        let decoded = SamlAssertion::decode(&format!("SAMLResponse={escaped}")).unwrap();
        assert_eq!(decoded.xml, xml.as_bytes());
        assert_eq!(decoded.encoded, encoded);

        let bare = SamlAssertion::decode(&escaped).unwrap();
        assert_eq!(bare.xml, xml.as_bytes());
    }

    #[test]
    fn strips_line_breaks_from_wrapped_response() {
        let xml = "<Response><Assertion>wrapped over several lines of base64 output</Assertion></Response>";
        let encoded = STANDARD.encode(xml);
        let (head, tail) = encoded.split_at(40);
        let escaped = format!("{head}%0D%0A{tail}\n")
            .replace('+', "%2B")
            .replace('/', "%2F")
            .replace('=', "%3D");

        let decoded = SamlAssertion::decode(&format!("SAMLResponse={escaped}")).unwrap();
        assert_eq!(decoded.xml, xml.as_bytes());
        assert_eq!(decoded.encoded, encoded);
    }

    #[test]
    fn reports_standard_alphabet_error() {
        // '+' is invalid in the URL-safe alphabet and '*' in both.
        let err = SamlAssertion::decode("PFJl+*==").unwrap_err();
        match err {
            LoginError::Decode(message) => assert!(
                message.contains("offset 5"),
                "unexpected message: {message}"
            ),
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn decodes_url_safe_alphabet() {
        let xml = "<Response>??>>~~</Response>";
        let decoded = SamlAssertion::decode(&URL_SAFE.encode(xml)).unwrap();
        assert_eq!(decoded.xml, xml.as_bytes());
    }

    #[test]
    fn rejects_broken_transport_encoding() {
        assert!(matches!(
            SamlAssertion::decode("SAMLResponse=%FF%FE"),
            Err(LoginError::Decode(_))
        ));
        assert!(matches!(
            SamlAssertion::decode("SAMLResponse=not*base64"),
            Err(LoginError::Decode(_))
        ));
    }

    #[test]
    fn merges_both_attribute_families_into_one_entry() {
        let composite = format!("{ROLE_A},{PROVIDER}");
        let xml = response(&format!(
            "{}{}",
            groups_attribute("Team A", &composite),
            role_attribute(&composite)
        ));

        let registry = assertion(&xml).roles().unwrap();
        assert_eq!(
            registry.selectable(),
            vec![&RoleEntry {
                role: ROLE_A.to_string(),
                principal: PROVIDER.to_string(),
                description: "Team A".to_string(),
            }]
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn attribute_order_does_not_matter() {
        let composite = format!("{ROLE_A},{PROVIDER}");
        let metadata_first = response(&format!(
            "{}{}",
            groups_attribute("Team A", &composite),
            role_attribute(&composite)
        ));
        let role_first = response(&format!(
            "{}{}",
            role_attribute(&format!("{PROVIDER},{ROLE_A}")),
            groups_attribute("Team A", &composite)
        ));

        assert_eq!(
            assertion(&metadata_first).roles().unwrap(),
            assertion(&role_first).roles().unwrap()
        );
    }

    #[test]
    fn skips_unparseable_group_metadata() {
        let xml = response(&format!(
            r#"<saml:Attribute Name="{GROUPS_ATTRIBUTE}"><saml:AttributeValue>not json</saml:AttributeValue></saml:Attribute>{}"#,
            role_attribute(&format!("{ROLE_A},{PROVIDER}"))
        ));

        let registry = assertion(&xml).roles().unwrap();
        let entries = registry.selectable();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].description, "");
    }

    #[test]
    fn description_without_role_is_not_selectable() {
        let xml = response(&groups_attribute(
            "Orphan",
            "arn:aws:iam::1:role/Orphan,arn:aws:iam::1:saml-provider/P",
        ));

        let registry = assertion(&xml).roles().unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.selectable().is_empty());
    }
}
