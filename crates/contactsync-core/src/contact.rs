//! Logical contact record shared by both repositories.
//!
//! Neither side's native encoding leaks past its adapter: the remote
//! directory and the local store both convert to and from [`ContactRecord`].
//! No field is globally required.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// One value of a multi-valued field (email, phone).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactField {
    pub value: String,
    /// Type tags such as `home`, `work`, `mobile`, `faxOffice`.
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub preferred: bool,
}

impl ContactField {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            types: Vec::new(),
            preferred: false,
        }
    }

    pub fn typed(value: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            types: vec![kind.into()],
            preferred: false,
        }
    }

    /// Primary type tag, `other` when untyped.
    pub fn kind(&self) -> &str {
        self.types.first().map(String::as_str).unwrap_or("other")
    }
}

/// Instant-messaging handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImHandle {
    pub value: String,
    #[serde(default)]
    pub types: Vec<String>,
    /// Protocol name (`JABBER`, `SKYPE`, ...).
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub preferred: bool,
}

/// Structured postal address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostalAddress {
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub locality: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub preferred: bool,
}

impl PostalAddress {
    fn is_blank(&self) -> bool {
        [
            &self.street,
            &self.locality,
            &self.region,
            &self.postal_code,
            &self.country,
        ]
        .iter()
        .all(|part| part.as_deref().map_or(true, |s| s.trim().is_empty()))
    }
}

/// A logical contact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    /// Full display name.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub additional_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub honorific_prefix: Option<String>,
    #[serde(default)]
    pub honorific_suffix: Option<String>,
    #[serde(default)]
    pub emails: Vec<ContactField>,
    #[serde(default)]
    pub phones: Vec<ContactField>,
    #[serde(default)]
    pub addresses: Vec<PostalAddress>,
    #[serde(default)]
    pub ims: Vec<ImHandle>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub birthday: Option<NaiveDate>,
    #[serde(default)]
    pub anniversary: Option<NaiveDate>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

impl ContactRecord {
    /// Contact with only a display name set.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Human-readable label used in logs and listings.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }
        let composed = [self.given_name.as_deref(), self.family_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !composed.is_empty() {
            return composed;
        }
        self.emails
            .first()
            .map(|e| e.value.clone())
            .or_else(|| self.phones.first().map(|p| p.value.clone()))
            .unwrap_or_else(|| "(unnamed)".to_string())
    }

    /// Basic shape validation applied to every record crossing the engine.
    ///
    /// # Errors
    /// Returns the first empty multi-valued entry or blank address found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_values("emails", self.emails.iter().map(|f| f.value.as_str()))?;
        check_values("phones", self.phones.iter().map(|f| f.value.as_str()))?;
        check_values("ims", self.ims.iter().map(|f| f.value.as_str()))?;
        if let Some(index) = self.addresses.iter().position(PostalAddress::is_blank) {
            return Err(ValidationError::EmptyFieldValue {
                field: "addresses".to_string(),
                index,
            });
        }
        Ok(())
    }
}

fn check_values<'a>(
    field: &str,
    values: impl Iterator<Item = &'a str>,
) -> Result<(), ValidationError> {
    for (index, value) in values.enumerate() {
        if value.trim().is_empty() {
            return Err(ValidationError::EmptyFieldValue {
                field: field.to_string(),
                index,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_prefers_full_name() {
        let mut record = ContactRecord::named("Ada Lovelace");
        record.given_name = Some("Augusta".into());
        assert_eq!(record.display_name(), "Ada Lovelace");
    }

    #[test]
    fn display_name_falls_back_to_parts_then_email() {
        let record = ContactRecord {
            given_name: Some("Grace".into()),
            family_name: Some("Hopper".into()),
            ..Default::default()
        };
        assert_eq!(record.display_name(), "Grace Hopper");

        let record = ContactRecord {
            emails: vec![ContactField::typed("g@example.com", "work")],
            ..Default::default()
        };
        assert_eq!(record.display_name(), "g@example.com");
        assert_eq!(ContactRecord::default().display_name(), "(unnamed)");
    }

    #[test]
    fn validate_accepts_empty_record() {
        assert!(ContactRecord::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_blank_phone() {
        let record = ContactRecord {
            phones: vec![ContactField::new("+33 1 23"), ContactField::new("  ")],
            ..Default::default()
        };
        assert_eq!(
            record.validate(),
            Err(ValidationError::EmptyFieldValue {
                field: "phones".into(),
                index: 1
            })
        );
    }

    #[test]
    fn validate_rejects_blank_address() {
        let record = ContactRecord {
            addresses: vec![PostalAddress::default()],
            ..Default::default()
        };
        assert!(record.validate().is_err());
    }

    #[test]
    fn field_kind_defaults_to_other() {
        assert_eq!(ContactField::new("x").kind(), "other");
        assert_eq!(ContactField::typed("x", "home").kind(), "home");
    }

    #[test]
    fn record_deserializes_with_missing_fields() {
        let record: ContactRecord =
            serde_json::from_str(r#"{"name":"Bob","birthday":"1990-04-01"}"#).unwrap();
        assert_eq!(record.name.as_deref(), Some("Bob"));
        assert_eq!(record.birthday, NaiveDate::from_ymd_opt(1990, 4, 1));
        assert!(record.emails.is_empty());
    }
}
