use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub mod form;
pub mod group;
pub mod rules;

pub use form::FormValidationService;
pub use group::GroupPayloadValidationService;
pub use rules::{LengthRuleAction, RuleAction, RuleActionRegistry, ValueRuleAction};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    Required,
    Length,
    Value,
    Type,
    UnknownField,
    UnknownRule,
    UnknownForm,
    InvalidChildForm,
    UnknownGroup,
    Journey,
    Payload,
    Form,
    FormConfigMissing,
}

/// One finding. Findings are data, never errors.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ValidationError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_code: Option<String>,
    pub rule: ValidationCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

impl ValidationError {
    pub fn new(rule: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            form_code: None,
            field_code: None,
            rule,
            message: message.into(),
            meta: Map::new(),
        }
    }

    pub fn for_field(
        rule: ValidationCode,
        form_code: &str,
        field_code: &str,
        message: impl Into<String>,
    ) -> Self {
        Self::new(rule, message)
            .with_form(form_code)
            .with_field(field_code)
    }

    pub fn with_form(mut self, form_code: impl Into<String>) -> Self {
        self.form_code = Some(form_code.into());
        self
    }

    pub fn with_field(mut self, field_code: impl Into<String>) -> Self {
        self.field_code = Some(field_code.into());
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.meta.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationReport {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn fail(error: ValidationError) -> Self {
        Self::from_errors(vec![error])
    }

    pub fn codes(&self) -> Vec<ValidationCode> {
        self.errors.iter().map(|error| error.rule).collect()
    }
}

/// Submitted values for one form instance. Codes and field keys are
/// trimmed and upper-cased on decode.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormSubmission {
    #[serde(default, alias = "formCode", deserialize_with = "normalized_code")]
    pub form_code: String,
    #[serde(
        default,
        alias = "parentFormCode",
        deserialize_with = "normalized_optional_code"
    )]
    pub parent_form_code: Option<String>,
    #[serde(default, deserialize_with = "scalar_fields")]
    pub fields: BTreeMap<String, Option<String>>,
}

impl FormSubmission {
    pub fn new(form_code: &str) -> Self {
        Self {
            form_code: normalize_code(form_code),
            ..Self::default()
        }
    }

    pub fn child_of(mut self, parent_form_code: &str) -> Self {
        self.parent_form_code = Some(normalize_code(parent_form_code));
        self
    }

    pub fn with_value(mut self, field_code: &str, value: impl Into<String>) -> Self {
        self.fields
            .insert(normalize_code(field_code), Some(value.into()));
        self
    }

    pub fn with_null(mut self, field_code: &str) -> Self {
        self.fields.insert(normalize_code(field_code), None);
        self
    }

    pub fn value(&self, field_code: &str) -> Option<&str> {
        self.fields.get(field_code).and_then(|value| value.as_deref())
    }
}

/// Body of one group submit.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupSubmission {
    #[serde(default = "default_payload_version", alias = "payloadVersion")]
    pub payload_version: u32,
    #[serde(default)]
    pub submissions: Vec<FormSubmission>,
}

impl Default for GroupSubmission {
    fn default() -> Self {
        Self {
            payload_version: default_payload_version(),
            submissions: Vec::new(),
        }
    }
}

impl GroupSubmission {
    pub fn new(submissions: Vec<FormSubmission>) -> Self {
        Self {
            submissions,
            ..Self::default()
        }
    }

    /// Decodes a stored or submitted payload. A JSON null reads as an empty
    /// submission.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Self::deserialize(value)
    }
}

fn default_payload_version() -> u32 {
    1
}

pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

fn normalized_code<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().map(normalize_code).unwrap_or_default())
}

fn normalized_optional_code<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().map(normalize_code))
}

fn scalar_fields<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<String, Option<String>>, D::Error> {
    let raw = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?;
    let mut fields = BTreeMap::new();
    for (key, value) in raw.unwrap_or_default() {
        let value = match value {
            Value::Null => None,
            Value::String(text) => Some(text),
            Value::Number(number) => Some(number.to_string()),
            Value::Bool(flag) => Some(flag.to_string()),
            Value::Array(_) | Value::Object(_) => {
                return Err(serde::de::Error::custom(format!(
                    "field {key} must be a scalar value"
                )));
            }
        };
        fields.insert(normalize_code(&key), value);
    }
    Ok(fields)
}
