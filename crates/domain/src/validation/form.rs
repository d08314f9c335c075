use std::sync::Arc;

use crate::forms::{FieldDefinition, FormDefinition};
use crate::util::is_blank;
use crate::validation::{
    FormSubmission, RuleActionRegistry, ValidationCode, ValidationError, ValidationReport,
};

/// Validates one submitted form instance against its definition.
#[derive(Clone)]
pub struct FormValidationService {
    registry: Arc<RuleActionRegistry>,
}

impl FormValidationService {
    pub fn new(registry: Arc<RuleActionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &RuleActionRegistry {
        &self.registry
    }

    pub fn validate(
        &self,
        definition: &FormDefinition,
        submission: &FormSubmission,
    ) -> ValidationReport {
        let mut errors = Vec::new();

        for field_code in submission.fields.keys() {
            if definition.field(field_code).is_none() {
                errors.push(
                    ValidationError::for_field(
                        ValidationCode::UnknownField,
                        &submission.form_code,
                        field_code,
                        "Field is not allowed for this form",
                    )
                    .with_meta("formCode", definition.form_code.as_str()),
                );
            }
        }

        let mut fields: Vec<&FieldDefinition> = definition.fields.iter().collect();
        fields.sort_by_key(|field| field.sort_order);
        for field in fields {
            self.validate_field(definition, submission, field, &mut errors);
        }

        ValidationReport::from_errors(errors)
    }

    fn validate_field(
        &self,
        definition: &FormDefinition,
        submission: &FormSubmission,
        field: &FieldDefinition,
        errors: &mut Vec<ValidationError>,
    ) {
        let raw = submission.value(&field.field_code);
        if is_blank(raw) {
            if field.required {
                errors.push(
                    ValidationError::for_field(
                        ValidationCode::Required,
                        &submission.form_code,
                        &field.field_code,
                        "Field is required",
                    )
                    .with_meta("formCode", definition.form_code.as_str()),
                );
            }
            return;
        }

        for rule in &field.rules {
            let Some(action) = self.registry.get(rule.kind) else {
                errors.push(
                    ValidationError::for_field(
                        ValidationCode::UnknownRule,
                        &submission.form_code,
                        &field.field_code,
                        format!("Unsupported rule: {}", rule.kind),
                    )
                    .with_meta("ruleKind", rule.kind.as_str()),
                );
                continue;
            };
            if let Some(error) = action.apply(&submission.form_code, field, raw, rule) {
                errors.push(error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::{FieldRule, FieldType, RuleKind};
    use crate::validation::LengthRuleAction;
    use rust_decimal::Decimal;

    fn field(code: &str, required: bool, sort_order: i32, rules: Vec<FieldRule>) -> FieldDefinition {
        FieldDefinition {
            field_code: code.to_string(),
            field_type: FieldType::Text,
            required,
            sort_order,
            rules,
        }
    }

    fn applicant_form() -> FormDefinition {
        FormDefinition {
            form_code: "APPLICANT".to_string(),
            sort_order: 1,
            fields: vec![
                field(
                    "AGE",
                    false,
                    2,
                    vec![
                        FieldRule::new(RuleKind::Value, Some(Decimal::from(18)), None),
                        FieldRule::new(RuleKind::Length, None, Some(Decimal::from(1))),
                    ],
                ),
                field("NAME", true, 1, Vec::new()),
            ],
        }
    }

    fn service() -> FormValidationService {
        FormValidationService::new(Arc::new(RuleActionRegistry::with_builtins()))
    }

    #[test]
    fn optional_field_rules_run_only_when_present() {
        let submission = FormSubmission::new("APPLICANT")
            .with_value("NAME", "Ann")
            .with_value("AGE", "9");
        let report = service().validate(&applicant_form(), &submission);
        assert_eq!(report.codes(), [ValidationCode::Value]);

        let submission = FormSubmission::new("APPLICANT").with_value("NAME", "Ann");
        assert!(service().validate(&applicant_form(), &submission).valid);
    }

    #[test]
    fn unknown_fields_come_first_then_fields_by_sort_order() {
        let submission = FormSubmission::new("APPLICANT")
            .with_value("ZIP", "1")
            .with_value("AGE", "170")
            .with_value("EXTRA", "x");
        let report = service().validate(&applicant_form(), &submission);

        assert!(!report.valid);
        assert_eq!(
            report.codes(),
            [
                ValidationCode::UnknownField,
                ValidationCode::UnknownField,
                ValidationCode::Required,
                ValidationCode::Length,
            ]
        );
        assert_eq!(report.errors[0].field_code.as_deref(), Some("EXTRA"));
        assert_eq!(report.errors[1].field_code.as_deref(), Some("ZIP"));
        assert_eq!(report.errors[2].field_code.as_deref(), Some("NAME"));
    }

    #[test]
    fn blank_required_field_skips_its_rules() {
        let form = FormDefinition {
            form_code: "F".to_string(),
            sort_order: 1,
            fields: vec![field(
                "CODE",
                true,
                1,
                vec![FieldRule::new(RuleKind::Length, Some(Decimal::from(3)), None)],
            )],
        };
        let report = service().validate(&form, &FormSubmission::new("F").with_value("CODE", "   "));
        assert_eq!(report.codes(), [ValidationCode::Required]);

        let report = service().validate(&form, &FormSubmission::new("F").with_null("CODE"));
        assert_eq!(report.codes(), [ValidationCode::Required]);
    }

    #[test]
    fn unregistered_kind_is_reported_and_validation_continues() {
        let registry = RuleActionRegistry::new(vec![Arc::new(LengthRuleAction)]).unwrap();
        let service = FormValidationService::new(Arc::new(registry));
        let submission = FormSubmission::new("APPLICANT")
            .with_value("NAME", "Ann")
            .with_value("AGE", "42");

        let report = service.validate(&applicant_form(), &submission);

        assert_eq!(
            report.codes(),
            [ValidationCode::UnknownRule, ValidationCode::Length]
        );
        assert_eq!(report.errors[0].message, "Unsupported rule: VALUE");
    }
}
