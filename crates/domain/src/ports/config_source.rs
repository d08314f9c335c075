use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::forms::{FieldKey, FieldType, RuleKind};
use crate::ports::BoxFuture;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct JourneyGroupRow {
    pub position: u32,
    pub group_no: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupFormRow {
    pub form_code: String,
    pub sort_order: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParentChildFormRow {
    pub parent_form_code: String,
    pub child_form_code: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormFieldRow {
    pub form_code: String,
    pub field_code: String,
    pub field_type: FieldType,
    pub required: bool,
    pub sort_order: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldRuleRow {
    pub form_code: String,
    pub field_code: String,
    pub kind: RuleKind,
    pub min: Option<Decimal>,
    pub max: Option<Decimal>,
}

/// Read side of the journey configuration store.
///
/// List operations return rows in configured order: journey groups by
/// position, parent forms by sort order, child pairs and fields and rules in
/// declaration order. Callers do not rely on anything beyond that.
pub trait ConfigSource: Send + Sync {
    fn list_active_journey_codes(&self) -> BoxFuture<'_, DomainResult<Vec<String>>>;
    fn find_journey_id(&self, journey_code: &str) -> BoxFuture<'_, DomainResult<Option<String>>>;
    fn list_journey_groups(
        &self,
        journey_code: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<JourneyGroupRow>>>;
    fn list_group_forms(&self, group_no: u32) -> BoxFuture<'_, DomainResult<Vec<GroupFormRow>>>;
    fn list_child_forms(
        &self,
        parent_form_codes: &[String],
    ) -> BoxFuture<'_, DomainResult<Vec<ParentChildFormRow>>>;
    fn list_form_fields(
        &self,
        form_codes: &[String],
    ) -> BoxFuture<'_, DomainResult<Vec<FormFieldRow>>>;
    fn list_field_rules(
        &self,
        fields: &[FieldKey],
    ) -> BoxFuture<'_, DomainResult<Vec<FieldRuleRow>>>;
}
