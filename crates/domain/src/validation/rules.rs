use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;

use crate::DomainResult;
use crate::error::DomainError;
use crate::forms::{FieldDefinition, FieldRule, RuleKind};
use crate::validation::{ValidationCode, ValidationError};

/// Validator for one rule kind. Returns at most one finding per value.
pub trait RuleAction: Send + Sync {
    fn kind(&self) -> RuleKind;

    fn apply(
        &self,
        form_code: &str,
        field: &FieldDefinition,
        raw: Option<&str>,
        rule: &FieldRule,
    ) -> Option<ValidationError>;
}

/// Character count within integer bounds. Fractional bounds are truncated.
#[derive(Clone, Copy, Debug, Default)]
pub struct LengthRuleAction;

impl RuleAction for LengthRuleAction {
    fn kind(&self) -> RuleKind {
        RuleKind::Length
    }

    fn apply(
        &self,
        form_code: &str,
        field: &FieldDefinition,
        raw: Option<&str>,
        rule: &FieldRule,
    ) -> Option<ValidationError> {
        let raw = raw?;
        let min = rule.min.map(truncate_bound);
        let max = rule.max.map(truncate_bound);
        let actual = raw.chars().count() as i64;

        let too_short = min.is_some_and(|min| actual < min);
        let too_long = max.is_some_and(|max| actual > max);
        if !too_short && !too_long {
            return None;
        }
        Some(
            ValidationError::for_field(
                ValidationCode::Length,
                form_code,
                &field.field_code,
                "Length is out of range",
            )
            .with_meta("min", min)
            .with_meta("max", max)
            .with_meta("actual", actual),
        )
    }
}

fn truncate_bound(bound: Decimal) -> i64 {
    bound.trunc().to_i64().unwrap_or(if bound.is_sign_negative() {
        i64::MIN
    } else {
        i64::MAX
    })
}

/// Inclusive decimal range on the trimmed value.
#[derive(Clone, Copy, Debug, Default)]
pub struct ValueRuleAction;

impl RuleAction for ValueRuleAction {
    fn kind(&self) -> RuleKind {
        RuleKind::Value
    }

    fn apply(
        &self,
        form_code: &str,
        field: &FieldDefinition,
        raw: Option<&str>,
        rule: &FieldRule,
    ) -> Option<ValidationError> {
        let raw = raw?;
        let text = raw.trim();
        if !is_decimal_literal(text) {
            return Some(
                ValidationError::for_field(
                    ValidationCode::Type,
                    form_code,
                    &field.field_code,
                    "Invalid numeric value",
                )
                .with_meta("actual", raw),
            );
        }

        // A well-formed literal outside the decimal range is beyond any bound.
        let Some(value) = parse_decimal(text) else {
            return Some(
                out_of_range(form_code, field, rule).with_meta("actual", text),
            );
        };

        let below = rule.min.is_some_and(|min| value < min);
        let above = rule.max.is_some_and(|max| value > max);
        if !below && !above {
            return None;
        }
        Some(out_of_range(form_code, field, rule).with_meta("actual", decimal_json(value)))
    }
}

fn out_of_range(form_code: &str, field: &FieldDefinition, rule: &FieldRule) -> ValidationError {
    ValidationError::for_field(
        ValidationCode::Value,
        form_code,
        &field.field_code,
        "Value is out of range",
    )
    .with_meta("min", rule.min.map(decimal_json))
    .with_meta("max", rule.max.map(decimal_json))
}

/// `[+-]?digits[.digits]?([eE][+-]?digits)?`
fn is_decimal_literal(text: &str) -> bool {
    fn digits(bytes: &[u8], mut at: usize) -> usize {
        while at < bytes.len() && bytes[at].is_ascii_digit() {
            at += 1;
        }
        at
    }

    let bytes = text.as_bytes();
    let mut at = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        at += 1;
    }
    let end = digits(bytes, at);
    if end == at {
        return false;
    }
    at = end;
    if bytes.get(at) == Some(&b'.') {
        let end = digits(bytes, at + 1);
        if end == at + 1 {
            return false;
        }
        at = end;
    }
    if matches!(bytes.get(at), Some(b'e' | b'E')) {
        at += 1;
        if matches!(bytes.get(at), Some(b'+' | b'-')) {
            at += 1;
        }
        let end = digits(bytes, at);
        if end == at {
            return false;
        }
        at = end;
    }
    at == bytes.len()
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    if text.contains(['e', 'E']) {
        Decimal::from_scientific(text).ok()
    } else {
        Decimal::from_str(text).ok()
    }
}

fn decimal_json(value: Decimal) -> Value {
    let text = value.to_string();
    serde_json::Number::from_str(&text)
        .map(Value::Number)
        .unwrap_or(Value::String(text))
}

/// Rule actions by kind. Each kind has at most one action.
#[derive(Clone)]
pub struct RuleActionRegistry {
    actions: HashMap<RuleKind, Arc<dyn RuleAction>>,
}

impl RuleActionRegistry {
    pub fn new(actions: Vec<Arc<dyn RuleAction>>) -> DomainResult<Self> {
        let mut by_kind: HashMap<RuleKind, Arc<dyn RuleAction>> = HashMap::new();
        for action in actions {
            let kind = action.kind();
            if by_kind.insert(kind, action).is_some() {
                return Err(DomainError::Config(format!(
                    "duplicate rule action for kind {kind}"
                )));
            }
        }
        Ok(Self { actions: by_kind })
    }

    pub fn with_builtins() -> Self {
        let mut actions: HashMap<RuleKind, Arc<dyn RuleAction>> = HashMap::new();
        actions.insert(RuleKind::Length, Arc::new(LengthRuleAction));
        actions.insert(RuleKind::Value, Arc::new(ValueRuleAction));
        Self { actions }
    }

    pub fn get(&self, kind: RuleKind) -> Option<&dyn RuleAction> {
        self.actions.get(&kind).map(|action| action.as_ref())
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
