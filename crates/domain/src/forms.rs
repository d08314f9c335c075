use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    Text,
    Nominal,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Nominal => "NOMINAL",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "TEXT" => Some(Self::Text),
            "NOMINAL" => Some(Self::Nominal),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleKind {
    Length,
    Value,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Length => "LENGTH",
            Self::Value => "VALUE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "LENGTH" => Some(Self::Length),
            "VALUE" => Some(Self::Value),
            _ => None,
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A constraint on one field. Missing bounds are unbounded.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldRule {
    pub kind: RuleKind,
    #[serde(default)]
    pub min: Option<Decimal>,
    #[serde(default)]
    pub max: Option<Decimal>,
}

impl FieldRule {
    pub fn new(kind: RuleKind, min: Option<Decimal>, max: Option<Decimal>) -> Self {
        Self { kind, min, max }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldDefinition {
    pub field_code: String,
    pub field_type: FieldType,
    pub required: bool,
    pub sort_order: i32,
    pub rules: Vec<FieldRule>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormDefinition {
    pub form_code: String,
    pub sort_order: i32,
    pub fields: Vec<FieldDefinition>,
}

impl FormDefinition {
    pub fn field(&self, field_code: &str) -> Option<&FieldDefinition> {
        self.fields
            .iter()
            .find(|field| field.field_code == field_code)
    }
}

/// One group with its parent forms followed by their child forms.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupDefinition {
    pub group_no: u32,
    pub forms: Vec<FormDefinition>,
    pub child_forms: BTreeMap<String, Vec<String>>,
}

impl GroupDefinition {
    pub fn empty(group_no: u32) -> Self {
        Self {
            group_no,
            forms: Vec::new(),
            child_forms: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub journey_code: String,
    pub group_no: u32,
}

impl GroupKey {
    pub fn new(journey_code: impl Into<String>, group_no: u32) -> Self {
        Self {
            journey_code: journey_code.into(),
            group_no,
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.journey_code, self.group_no)
    }
}

impl Serialize for GroupKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldKey {
    pub form_code: String,
    pub field_code: String,
}

impl FieldKey {
    pub fn new(form_code: impl Into<String>, field_code: impl Into<String>) -> Self {
        Self {
            form_code: form_code.into(),
            field_code: field_code.into(),
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.form_code, self.field_code)
    }
}

impl Serialize for FieldKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
