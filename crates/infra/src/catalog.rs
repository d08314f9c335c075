use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use journey_domain::DomainResult;
use journey_domain::error::DomainError;
use journey_domain::forms::{FieldKey, FieldRule, FieldType};
use journey_domain::ports::BoxFuture;
use journey_domain::ports::config_source::{
    ConfigSource, FieldRuleRow, FormFieldRow, GroupFormRow, JourneyGroupRow, ParentChildFormRow,
};
use journey_domain::validation::normalize_code;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse catalog {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("invalid catalog: {0}")]
    Invalid(String),
}

impl From<CatalogError> for DomainError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Invalid(message) => DomainError::Config(message),
            other => DomainError::Storage(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CatalogDocument {
    #[serde(default)]
    pub journeys: Vec<CatalogJourney>,
    #[serde(default)]
    pub groups: Vec<CatalogGroup>,
    #[serde(default)]
    pub forms: Vec<CatalogForm>,
}

/// A journey and its groups in traversal order.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CatalogJourney {
    pub journey_code: String,
    #[serde(default)]
    pub journey_id: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    pub groups: Vec<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CatalogGroup {
    pub group_no: u32,
    #[serde(default)]
    pub forms: Vec<CatalogGroupForm>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CatalogGroupForm {
    pub form_code: String,
    pub sort_order: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CatalogForm {
    pub form_code: String,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub fields: Vec<CatalogField>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CatalogField {
    pub field_code: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    pub sort_order: i32,
    #[serde(default)]
    pub rules: Vec<FieldRule>,
}

fn default_active() -> bool {
    true
}

impl CatalogDocument {
    pub fn from_json_str(raw: &str, origin: &str) -> Result<Self, CatalogError> {
        serde_json::from_str(raw).map_err(|source| CatalogError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    /// Trims and uppercases form and field codes so they match submitted keys.
    pub fn normalize_codes(&mut self) {
        for group in &mut self.groups {
            for form in &mut group.forms {
                form.form_code = normalize_code(&form.form_code);
            }
        }
        for form in &mut self.forms {
            form.form_code = normalize_code(&form.form_code);
            for child in &mut form.children {
                *child = normalize_code(child);
            }
            for field in &mut form.fields {
                field.field_code = normalize_code(&field.field_code);
            }
        }
    }

    /// Rejects duplicate codes and dangling references.
    pub fn validate(&self) -> Result<(), CatalogError> {
        let mut journeys = HashSet::new();
        for journey in &self.journeys {
            if journey.journey_code.trim().is_empty() {
                return Err(CatalogError::Invalid("journey_code must not be blank".into()));
            }
            if !journeys.insert(journey.journey_code.as_str()) {
                return Err(CatalogError::Invalid(format!(
                    "journey {} is declared twice",
                    journey.journey_code
                )));
            }
        }

        let mut groups = HashSet::new();
        for group in &self.groups {
            if !groups.insert(group.group_no) {
                return Err(CatalogError::Invalid(format!(
                    "group {} is declared twice",
                    group.group_no
                )));
            }
        }
        for journey in &self.journeys {
            let mut seen = HashSet::new();
            for group_no in &journey.groups {
                if !groups.contains(group_no) {
                    return Err(CatalogError::Invalid(format!(
                        "journey {} references undeclared group {group_no}",
                        journey.journey_code
                    )));
                }
                if !seen.insert(*group_no) {
                    return Err(CatalogError::Invalid(format!(
                        "journey {} lists group {group_no} twice",
                        journey.journey_code
                    )));
                }
            }
        }

        let mut forms = HashSet::new();
        for form in &self.forms {
            if !forms.insert(form.form_code.as_str()) {
                return Err(CatalogError::Invalid(format!(
                    "form {} is declared twice",
                    form.form_code
                )));
            }
        }
        let referenced = self
            .groups
            .iter()
            .flat_map(|group| group.forms.iter().map(|form| form.form_code.as_str()))
            .chain(
                self.forms
                    .iter()
                    .flat_map(|form| form.children.iter().map(String::as_str)),
            );
        for form_code in referenced {
            if !forms.contains(form_code) {
                return Err(CatalogError::Invalid(format!(
                    "form {form_code} is referenced but not declared"
                )));
            }
        }
        Ok(())
    }

    fn journey(&self, journey_code: &str) -> Option<&CatalogJourney> {
        self.journeys
            .iter()
            .find(|journey| journey.active && journey.journey_code == journey_code)
    }

    fn form(&self, form_code: &str) -> Option<&CatalogForm> {
        self.forms.iter().find(|form| form.form_code == form_code)
    }
}

/// Serves journey configuration from a JSON catalog document.
#[derive(Clone, Default)]
pub struct CatalogConfigSource {
    document: Arc<RwLock<CatalogDocument>>,
}

impl CatalogConfigSource {
    pub fn from_document(mut document: CatalogDocument) -> Result<Self, CatalogError> {
        document.normalize_codes();
        document.validate()?;
        Ok(Self {
            document: Arc::new(RwLock::new(document)),
        })
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        Self::from_document(read_document(path.as_ref()).await?)
    }

    /// Swaps in the document at `path`. The current document stays in place
    /// when the new one cannot be read or is invalid.
    pub async fn reload_from_path(&self, path: impl AsRef<Path>) -> Result<(), CatalogError> {
        let path = path.as_ref();
        let document = read_document(path).await?;
        let journeys = document.journeys.len();
        self.replace(document)?;
        tracing::info!(path = %path.display(), journeys, "catalog reloaded");
        Ok(())
    }

    pub fn replace(&self, mut document: CatalogDocument) -> Result<(), CatalogError> {
        document.normalize_codes();
        document.validate()?;
        *self
            .document
            .write()
            .unwrap_or_else(PoisonError::into_inner) = document;
        Ok(())
    }

    pub fn document(&self) -> CatalogDocument {
        self.read(|document| document.clone())
    }

    fn read<T>(&self, f: impl FnOnce(&CatalogDocument) -> T) -> T {
        let document = self
            .document
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&document)
    }
}

async fn read_document(path: &Path) -> Result<CatalogDocument, CatalogError> {
    let origin = path.display().to_string();
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CatalogError::Io {
            path: origin.clone(),
            source,
        })?;
    CatalogDocument::from_json_str(&raw, &origin)
}

impl ConfigSource for CatalogConfigSource {
    fn list_active_journey_codes(&self) -> BoxFuture<'_, DomainResult<Vec<String>>> {
        let codes = self.read(|document| {
            document
                .journeys
                .iter()
                .filter(|journey| journey.active)
                .map(|journey| journey.journey_code.clone())
                .collect()
        });
        Box::pin(async move { Ok(codes) })
    }

    fn find_journey_id(&self, journey_code: &str) -> BoxFuture<'_, DomainResult<Option<String>>> {
        let journey_id = self.read(|document| {
            document.journey(journey_code).map(|journey| {
                journey
                    .journey_id
                    .clone()
                    .unwrap_or_else(|| journey.journey_code.clone())
            })
        });
        Box::pin(async move { Ok(journey_id) })
    }

    fn list_journey_groups(
        &self,
        journey_code: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<JourneyGroupRow>>> {
        let rows = self.read(|document| {
            document
                .journey(journey_code)
                .map(|journey| {
                    journey
                        .groups
                        .iter()
                        .enumerate()
                        .map(|(index, group_no)| JourneyGroupRow {
                            position: index as u32 + 1,
                            group_no: *group_no,
                        })
                        .collect()
                })
                .unwrap_or_default()
        });
        Box::pin(async move { Ok(rows) })
    }

    fn list_group_forms(&self, group_no: u32) -> BoxFuture<'_, DomainResult<Vec<GroupFormRow>>> {
        let rows = self.read(|document| {
            document
                .groups
                .iter()
                .filter(|group| group.group_no == group_no)
                .flat_map(|group| group.forms.iter())
                .map(|form| GroupFormRow {
                    form_code: form.form_code.clone(),
                    sort_order: form.sort_order,
                })
                .collect()
        });
        Box::pin(async move { Ok(rows) })
    }

    fn list_child_forms(
        &self,
        parent_form_codes: &[String],
    ) -> BoxFuture<'_, DomainResult<Vec<ParentChildFormRow>>> {
        let rows = self.read(|document| {
            parent_form_codes
                .iter()
                .filter_map(|parent| document.form(parent))
                .flat_map(|parent| {
                    parent.children.iter().map(|child| ParentChildFormRow {
                        parent_form_code: parent.form_code.clone(),
                        child_form_code: child.clone(),
                    })
                })
                .collect()
        });
        Box::pin(async move { Ok(rows) })
    }

    fn list_form_fields(
        &self,
        form_codes: &[String],
    ) -> BoxFuture<'_, DomainResult<Vec<FormFieldRow>>> {
        let rows = self.read(|document| {
            form_codes
                .iter()
                .filter_map(|form_code| document.form(form_code))
                .flat_map(|form| {
                    form.fields.iter().map(|field| FormFieldRow {
                        form_code: form.form_code.clone(),
                        field_code: field.field_code.clone(),
                        field_type: field.field_type,
                        required: field.required,
                        sort_order: field.sort_order,
                    })
                })
                .collect()
        });
        Box::pin(async move { Ok(rows) })
    }

    fn list_field_rules(
        &self,
        fields: &[FieldKey],
    ) -> BoxFuture<'_, DomainResult<Vec<FieldRuleRow>>> {
        let rows = self.read(|document| {
            fields
                .iter()
                .filter_map(|key| {
                    document
                        .form(&key.form_code)?
                        .fields
                        .iter()
                        .find(|field| field.field_code == key.field_code)
                        .map(|field| (key, field))
                })
                .flat_map(|(key, field)| {
                    field.rules.iter().map(|rule| FieldRuleRow {
                        form_code: key.form_code.clone(),
                        field_code: key.field_code.clone(),
                        kind: rule.kind,
                        min: rule.min,
                        max: rule.max,
                    })
                })
                .collect()
        });
        Box::pin(async move { Ok(rows) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use journey_domain::forms::RuleKind;
    use rust_decimal::Decimal;

    const CATALOG: &str = r#"{
        "journeys": [
            { "journey_code": "ONBOARD", "journey_id": "j-1", "groups": [2, 1] },
            { "journey_code": "LEGACY", "active": false, "groups": [1] }
        ],
        "groups": [
            { "group_no": 1, "forms": [{ "form_code": "PERSONAL", "sort_order": 1 }] },
            { "group_no": 2, "forms": [{ "form_code": "CONTACT", "sort_order": 1 }] }
        ],
        "forms": [
            {
                "form_code": "PERSONAL",
                "children": ["DEPENDANT"],
                "fields": [
                    { "field_code": "AGE", "field_type": "NOMINAL", "required": true, "sort_order": 1,
                      "rules": [{ "kind": "VALUE", "min": 18, "max": 65 }] }
                ]
            },
            { "form_code": "DEPENDANT" },
            { "form_code": "CONTACT" }
        ]
    }"#;

    fn source() -> CatalogConfigSource {
        CatalogConfigSource::from_document(CatalogDocument::from_json_str(CATALOG, "inline").unwrap())
            .unwrap()
    }

    #[tokio::test]
    async fn lists_only_active_journeys_in_configured_order() {
        let source = source();
        assert_eq!(source.list_active_journey_codes().await.unwrap(), ["ONBOARD"]);
        assert_eq!(
            source.find_journey_id("ONBOARD").await.unwrap().as_deref(),
            Some("j-1")
        );
        assert_eq!(source.find_journey_id("LEGACY").await.unwrap(), None);

        let rows = source.list_journey_groups("ONBOARD").await.unwrap();
        let pairs: Vec<(u32, u32)> = rows.iter().map(|r| (r.position, r.group_no)).collect();
        assert_eq!(pairs, [(1, 2), (2, 1)]);
        assert!(source.list_journey_groups("LEGACY").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn serves_children_fields_and_rules() {
        let source = source();
        let children = source
            .list_child_forms(&["PERSONAL".to_string()])
            .await
            .unwrap();
        assert_eq!(children[0].child_form_code, "DEPENDANT");

        let rules = source
            .list_field_rules(&[FieldKey::new("PERSONAL", "AGE")])
            .await
            .unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].kind, RuleKind::Value);
        assert_eq!(rules[0].min, Some(Decimal::from(18)));
    }

    #[test]
    fn dangling_references_are_rejected() {
        let mut document = CatalogDocument::from_json_str(CATALOG, "inline").unwrap();
        document.groups[0].forms.push(CatalogGroupForm {
            form_code: "GHOST".to_string(),
            sort_order: 2,
        });
        assert!(matches!(
            CatalogConfigSource::from_document(document),
            Err(CatalogError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn form_and_field_codes_are_normalized() {
        let mut document = CatalogDocument::from_json_str(CATALOG, "inline").unwrap();
        document.groups[1].forms[0].form_code = " contact ".to_string();
        document.forms[0].form_code = "personal".to_string();
        document.forms[0].children = vec!["dependant".to_string()];
        document.forms[0].fields[0].field_code = "age ".to_string();
        document.forms[2].form_code = "Contact".to_string();
        let source = CatalogConfigSource::from_document(document).unwrap();

        let forms = source.list_group_forms(2).await.unwrap();
        assert_eq!(forms[0].form_code, "CONTACT");
        let children = source
            .list_child_forms(&["PERSONAL".to_string()])
            .await
            .unwrap();
        assert_eq!(children[0].child_form_code, "DEPENDANT");
        let rules = source
            .list_field_rules(&[FieldKey::new("PERSONAL", "AGE")])
            .await
            .unwrap();
        assert_eq!(rules.len(), 1);
    }

    #[test]
    fn codes_that_collide_after_normalization_are_rejected() {
        let mut document = CatalogDocument::from_json_str(CATALOG, "inline").unwrap();
        document.forms[2].form_code = "dependant".to_string();
        assert!(matches!(
            CatalogConfigSource::from_document(document),
            Err(CatalogError::Invalid(_))
        ));
    }

    #[test]
    fn replace_keeps_current_document_when_invalid() {
        let source = source();
        let mut broken = source.document();
        broken.journeys[0].groups.push(99);
        assert!(source.replace(broken).is_err());
        assert_eq!(source.document().journeys[0].groups, [2, 1]);
    }
}
