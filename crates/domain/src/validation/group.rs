use std::collections::{BTreeMap, HashSet};

use serde_json::Value;

use crate::snapshot::{ConfigSnapshot, SnapshotStore};
use crate::validation::{
    FormSubmission, FormValidationService, GroupSubmission, ValidationCode, ValidationError,
    ValidationReport,
};

/// Validates a whole group submission against the current snapshot.
#[derive(Clone)]
pub struct GroupPayloadValidationService {
    snapshots: SnapshotStore,
    forms: FormValidationService,
}

impl GroupPayloadValidationService {
    pub fn new(snapshots: SnapshotStore, forms: FormValidationService) -> Self {
        Self { snapshots, forms }
    }

    pub fn validate(
        &self,
        journey_code: &str,
        group_no: u32,
        submission: &GroupSubmission,
    ) -> ValidationReport {
        let snapshot = self.snapshots.current();
        self.validate_against(&snapshot, journey_code, group_no, submission)
    }

    pub fn validate_against(
        &self,
        snapshot: &ConfigSnapshot,
        journey_code: &str,
        group_no: u32,
        submission: &GroupSubmission,
    ) -> ValidationReport {
        if journey_code.trim().is_empty() {
            return ValidationReport::fail(ValidationError::new(
                ValidationCode::Journey,
                "journeyCode is required",
            ));
        }
        if submission.submissions.is_empty() {
            return ValidationReport::fail(
                ValidationError::new(ValidationCode::Payload, "submissions must not be empty")
                    .with_meta("journeyCode", journey_code)
                    .with_meta("groupNo", group_no),
            );
        }
        let Some(allowed) = snapshot.forms_for_group(journey_code, group_no) else {
            return ValidationReport::fail(
                ValidationError::new(
                    ValidationCode::UnknownGroup,
                    "Group is not configured for this journey",
                )
                .with_meta("journeyCode", journey_code)
                .with_meta("groupNo", group_no),
            );
        };
        let allowed: HashSet<&str> = allowed.iter().map(String::as_str).collect();
        let children = snapshot.children_for_group(journey_code, group_no);

        let mut errors = Vec::new();
        for form in &submission.submissions {
            if let Some(error) =
                check_membership(form, &allowed, children, journey_code, group_no)
            {
                errors.push(error);
                continue;
            }
            let Some(definition) = snapshot.form_definition(&form.form_code) else {
                errors.push(
                    ValidationError::new(
                        ValidationCode::FormConfigMissing,
                        "Form fields/rules not found in configuration snapshot",
                    )
                    .with_form(form.form_code.as_str())
                    .with_meta("formCode", form.form_code.as_str()),
                );
                continue;
            };
            errors.extend(self.forms.validate(&definition, form).errors);
        }

        ValidationReport::from_errors(errors)
    }
}

fn check_membership(
    form: &FormSubmission,
    allowed: &HashSet<&str>,
    children: Option<&BTreeMap<String, Vec<String>>>,
    journey_code: &str,
    group_no: u32,
) -> Option<ValidationError> {
    if form.form_code.trim().is_empty() {
        return Some(ValidationError::new(ValidationCode::Form, "Missing formCode"));
    }
    if !allowed.contains(form.form_code.as_str()) {
        return Some(
            ValidationError::new(ValidationCode::UnknownForm, "Form is not allowed in this group")
                .with_form(form.form_code.as_str())
                .with_meta("journeyCode", journey_code)
                .with_meta("groupNo", group_no),
        );
    }
    let parent = form
        .parent_form_code
        .as_deref()
        .filter(|parent| !parent.trim().is_empty())?;
    let expected: &[String] = children
        .and_then(|children| children.get(parent))
        .map(Vec::as_slice)
        .unwrap_or_default();
    if expected.contains(&form.form_code) {
        return None;
    }
    Some(
        ValidationError::new(
            ValidationCode::InvalidChildForm,
            "Child form is not allowed for given parentFormCode",
        )
        .with_form(form.form_code.as_str())
        .with_meta("parentFormCode", parent)
        .with_meta("expectedChildren", Value::from(expected.to_vec())),
    )
}
