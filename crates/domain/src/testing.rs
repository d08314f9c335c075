use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use rust_decimal::Decimal;

use crate::DomainResult;
use crate::error::DomainError;
use crate::forms::{FieldKey, FieldType, RuleKind};
use crate::ports::BoxFuture;
use crate::ports::config_source::{
    ConfigSource, FieldRuleRow, FormFieldRow, GroupFormRow, JourneyGroupRow, ParentChildFormRow,
};

/// In-memory config source for unit tests.
#[derive(Default)]
pub struct StaticConfigSource {
    journeys: Vec<String>,
    journey_ids: HashMap<String, String>,
    journey_groups: HashMap<String, Vec<JourneyGroupRow>>,
    group_forms: HashMap<u32, Vec<GroupFormRow>>,
    children: Vec<ParentChildFormRow>,
    fields: Vec<FormFieldRow>,
    rules: Vec<FieldRuleRow>,
    delay: Option<Duration>,
    failing: AtomicBool,
    journey_list_calls: AtomicUsize,
    journey_group_calls: AtomicUsize,
}

impl StaticConfigSource {
    pub fn with_journey(mut self, journey_code: &str, groups: &[(u32, u32)]) -> Self {
        self.journeys.push(journey_code.to_string());
        self.journey_ids
            .insert(journey_code.to_string(), format!("journey-{journey_code}"));
        self.journey_groups.insert(
            journey_code.to_string(),
            groups
                .iter()
                .map(|(position, group_no)| JourneyGroupRow {
                    position: *position,
                    group_no: *group_no,
                })
                .collect(),
        );
        self
    }

    pub fn without_journey_id(mut self, journey_code: &str) -> Self {
        self.journey_ids.remove(journey_code);
        self
    }

    pub fn with_group_form(mut self, group_no: u32, form_code: &str, sort_order: i32) -> Self {
        self.group_forms
            .entry(group_no)
            .or_default()
            .push(GroupFormRow {
                form_code: form_code.to_string(),
                sort_order,
            });
        self
    }

    pub fn with_child(mut self, parent: &str, child: &str) -> Self {
        self.children.push(ParentChildFormRow {
            parent_form_code: parent.to_string(),
            child_form_code: child.to_string(),
        });
        self
    }

    pub fn with_field(
        mut self,
        form_code: &str,
        field_code: &str,
        field_type: FieldType,
        required: bool,
        sort_order: i32,
    ) -> Self {
        self.fields.push(FormFieldRow {
            form_code: form_code.to_string(),
            field_code: field_code.to_string(),
            field_type,
            required,
            sort_order,
        });
        self
    }

    pub fn with_rule(
        mut self,
        form_code: &str,
        field_code: &str,
        kind: RuleKind,
        min: Option<Decimal>,
        max: Option<Decimal>,
    ) -> Self {
        self.rules.push(FieldRuleRow {
            form_code: form_code.to_string(),
            field_code: field_code.to_string(),
            kind,
            min,
            max,
        });
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn journey_list_calls(&self) -> usize {
        self.journey_list_calls.load(Ordering::SeqCst)
    }

    pub fn journey_group_calls(&self) -> usize {
        self.journey_group_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> DomainResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DomainError::Storage("config source down".to_string()));
        }
        Ok(())
    }
}

impl ConfigSource for StaticConfigSource {
    fn list_active_journey_codes(&self) -> BoxFuture<'_, DomainResult<Vec<String>>> {
        Box::pin(async move {
            self.journey_list_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.check()?;
            Ok(self.journeys.clone())
        })
    }

    fn find_journey_id(&self, journey_code: &str) -> BoxFuture<'_, DomainResult<Option<String>>> {
        let journey_code = journey_code.to_string();
        Box::pin(async move {
            self.check()?;
            Ok(self.journey_ids.get(&journey_code).cloned())
        })
    }

    fn list_journey_groups(
        &self,
        journey_code: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<JourneyGroupRow>>> {
        let journey_code = journey_code.to_string();
        Box::pin(async move {
            self.journey_group_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.check()?;
            Ok(self
                .journey_groups
                .get(&journey_code)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn list_group_forms(&self, group_no: u32) -> BoxFuture<'_, DomainResult<Vec<GroupFormRow>>> {
        Box::pin(async move {
            self.check()?;
            Ok(self.group_forms.get(&group_no).cloned().unwrap_or_default())
        })
    }

    fn list_child_forms(
        &self,
        parent_form_codes: &[String],
    ) -> BoxFuture<'_, DomainResult<Vec<ParentChildFormRow>>> {
        let parents: HashSet<String> = parent_form_codes.iter().cloned().collect();
        Box::pin(async move {
            self.check()?;
            Ok(self
                .children
                .iter()
                .filter(|row| parents.contains(&row.parent_form_code))
                .cloned()
                .collect())
        })
    }

    fn list_form_fields(
        &self,
        form_codes: &[String],
    ) -> BoxFuture<'_, DomainResult<Vec<FormFieldRow>>> {
        let forms: HashSet<String> = form_codes.iter().cloned().collect();
        Box::pin(async move {
            self.check()?;
            Ok(self
                .fields
                .iter()
                .filter(|row| forms.contains(&row.form_code))
                .cloned()
                .collect())
        })
    }

    fn list_field_rules(
        &self,
        fields: &[FieldKey],
    ) -> BoxFuture<'_, DomainResult<Vec<FieldRuleRow>>> {
        let keys: HashSet<FieldKey> = fields.iter().cloned().collect();
        Box::pin(async move {
            self.check()?;
            Ok(self
                .rules
                .iter()
                .filter(|row| {
                    keys.contains(&FieldKey::new(
                        row.form_code.as_str(),
                        row.field_code.as_str(),
                    ))
                })
                .cloned()
                .collect())
        })
    }
}
