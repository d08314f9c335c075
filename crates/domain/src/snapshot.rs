use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use futures_util::future::{FutureExt, Shared};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use thiserror::Error;

use crate::DomainResult;
use crate::clock::Clock;
use crate::error::DomainError;
use crate::forms::{
    FieldDefinition, FieldKey, FieldRule, FieldType, FormDefinition, GroupDefinition, GroupKey,
};
use crate::ports::BoxFuture;
use crate::ports::config_source::ConfigSource;

const GROUP_LOAD_CONCURRENCY: usize = 4;

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct FieldMeta {
    pub field_type: FieldType,
    pub required: bool,
    pub sort_order: i32,
}

/// Point-in-time view of every active journey's configuration.
///
/// Built in one pass by [`build_snapshot`] and never mutated afterwards;
/// readers hold an `Arc` for as long as they need a consistent view.
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct ConfigSnapshot {
    pub loaded_at_ms: i64,
    pub journeys: Vec<String>,
    pub journey_groups: BTreeMap<String, Vec<u32>>,
    pub group_forms: BTreeMap<GroupKey, Vec<String>>,
    pub child_forms: BTreeMap<GroupKey, BTreeMap<String, Vec<String>>>,
    pub form_fields: BTreeMap<String, Vec<String>>,
    pub field_meta: BTreeMap<FieldKey, FieldMeta>,
    pub field_rules: BTreeMap<FieldKey, Vec<FieldRule>>,
}

impl ConfigSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded_at_ms > 0
    }

    pub fn group_count(&self) -> usize {
        self.group_forms.len()
    }

    pub fn has_group(&self, journey_code: &str, group_no: u32) -> bool {
        self.group_forms
            .contains_key(&GroupKey::new(journey_code, group_no))
    }

    pub fn forms_for_group(&self, journey_code: &str, group_no: u32) -> Option<&[String]> {
        self.group_forms
            .get(&GroupKey::new(journey_code, group_no))
            .map(Vec::as_slice)
    }

    pub fn children_for_group(
        &self,
        journey_code: &str,
        group_no: u32,
    ) -> Option<&BTreeMap<String, Vec<String>>> {
        self.child_forms.get(&GroupKey::new(journey_code, group_no))
    }

    /// A single form with its fields and rules. Standalone definitions carry
    /// no group ordering, so `sort_order` is zero.
    pub fn form_definition(&self, form_code: &str) -> Option<FormDefinition> {
        let field_codes = self.form_fields.get(form_code)?;
        let mut fields = Vec::with_capacity(field_codes.len());
        for field_code in field_codes {
            let key = FieldKey::new(form_code, field_code.as_str());
            let Some(meta) = self.field_meta.get(&key) else {
                continue;
            };
            fields.push(FieldDefinition {
                field_code: field_code.clone(),
                field_type: meta.field_type,
                required: meta.required,
                sort_order: meta.sort_order,
                rules: self.field_rules.get(&key).cloned().unwrap_or_default(),
            });
        }
        Some(FormDefinition {
            form_code: form_code.to_string(),
            sort_order: 0,
            fields,
        })
    }

    /// Reassembles a group from the flat maps. Forms keep their flattened
    /// order and are numbered from one.
    pub fn group_definition(&self, journey_code: &str, group_no: u32) -> Option<GroupDefinition> {
        let key = GroupKey::new(journey_code, group_no);
        let form_codes = self.group_forms.get(&key)?;
        let forms = form_codes
            .iter()
            .enumerate()
            .filter_map(|(index, form_code)| {
                self.form_definition(form_code).map(|mut form| {
                    form.sort_order = index as i32 + 1;
                    form
                })
            })
            .collect();
        Some(GroupDefinition {
            group_no,
            forms,
            child_forms: self.child_forms.get(&key).cloned().unwrap_or_default(),
        })
    }
}

/// Loads one group: parent forms by sort order, each followed by its
/// children, then fields and rules for every form involved.
pub async fn load_group_definition(
    source: &dyn ConfigSource,
    group_no: u32,
) -> DomainResult<GroupDefinition> {
    let mut parent_rows = source.list_group_forms(group_no).await?;
    parent_rows.sort_by_key(|row| row.sort_order);
    let mut seen_parents = HashSet::new();
    parent_rows.retain(|row| seen_parents.insert(row.form_code.clone()));
    if parent_rows.is_empty() {
        return Ok(GroupDefinition::empty(group_no));
    }

    let parent_codes: Vec<String> = parent_rows
        .iter()
        .map(|row| row.form_code.clone())
        .collect();
    let mut child_forms: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for pair in source.list_child_forms(&parent_codes).await? {
        if !seen_parents.contains(&pair.parent_form_code) {
            continue;
        }
        let children = child_forms.entry(pair.parent_form_code).or_default();
        if !children.contains(&pair.child_form_code) {
            children.push(pair.child_form_code);
        }
    }

    // Children sort after the last parent, in parent then declaration order.
    let mut ordered: Vec<(String, i32)> = Vec::new();
    let mut seen_forms = HashSet::new();
    let mut child_sort = parent_rows.last().map_or(0, |row| row.sort_order);
    let mut pending_children = Vec::new();
    for row in &parent_rows {
        if seen_forms.insert(row.form_code.clone()) {
            ordered.push((row.form_code.clone(), row.sort_order));
        }
        for child in child_forms.get(&row.form_code).into_iter().flatten() {
            if seen_forms.insert(child.clone()) {
                child_sort += 1;
                pending_children.push((row.form_code.clone(), child.clone(), child_sort));
            }
        }
    }
    let mut flattened = Vec::with_capacity(ordered.len() + pending_children.len());
    for (form_code, sort_order) in ordered {
        let children: Vec<(String, i32)> = pending_children
            .iter()
            .filter(|(parent, _, _)| *parent == form_code)
            .map(|(_, child, sort)| (child.clone(), *sort))
            .collect();
        flattened.push((form_code, sort_order));
        flattened.extend(children);
    }

    let form_codes: Vec<String> = flattened.iter().map(|(code, _)| code.clone()).collect();
    let mut field_rows = source.list_form_fields(&form_codes).await?;
    field_rows.sort_by_key(|row| row.sort_order);

    let field_keys: Vec<FieldKey> = field_rows
        .iter()
        .map(|row| FieldKey::new(row.form_code.as_str(), row.field_code.as_str()))
        .collect();
    let mut rules_by_field: HashMap<FieldKey, Vec<FieldRule>> = HashMap::new();
    if !field_keys.is_empty() {
        for row in source.list_field_rules(&field_keys).await? {
            rules_by_field
                .entry(FieldKey::new(row.form_code, row.field_code))
                .or_default()
                .push(FieldRule::new(row.kind, row.min, row.max));
        }
    }

    let mut fields_by_form: HashMap<String, Vec<FieldDefinition>> = HashMap::new();
    for row in field_rows {
        let key = FieldKey::new(row.form_code.as_str(), row.field_code.as_str());
        let fields = fields_by_form.entry(row.form_code).or_default();
        if fields.iter().any(|field| field.field_code == row.field_code) {
            continue;
        }
        fields.push(FieldDefinition {
            field_code: row.field_code,
            field_type: row.field_type,
            required: row.required,
            sort_order: row.sort_order,
            rules: rules_by_field.remove(&key).unwrap_or_default(),
        });
    }

    let forms = flattened
        .into_iter()
        .map(|(form_code, sort_order)| FormDefinition {
            fields: fields_by_form.remove(&form_code).unwrap_or_default(),
            form_code,
            sort_order,
        })
        .collect();

    Ok(GroupDefinition {
        group_no,
        forms,
        child_forms,
    })
}

/// Reads the whole configuration through `source`. Any source failure
/// aborts the build.
pub async fn build_snapshot(
    source: Arc<dyn ConfigSource>,
    loaded_at_ms: i64,
) -> DomainResult<ConfigSnapshot> {
    let mut journeys = source.list_active_journey_codes().await?;
    let mut seen = HashSet::new();
    journeys.retain(|code| seen.insert(code.clone()));
    if journeys.is_empty() {
        return Ok(ConfigSnapshot {
            loaded_at_ms,
            ..ConfigSnapshot::default()
        });
    }

    let mut journey_groups = BTreeMap::new();
    for journey_code in &journeys {
        let mut rows = source.list_journey_groups(journey_code).await?;
        rows.sort_by_key(|row| row.position);
        let mut seen_groups = HashSet::new();
        let group_nos: Vec<u32> = rows
            .into_iter()
            .map(|row| row.group_no)
            .filter(|group_no| seen_groups.insert(*group_no))
            .collect();
        journey_groups.insert(journey_code.clone(), group_nos);
    }

    let mut distinct_groups: Vec<u32> = journey_groups.values().flatten().copied().collect();
    distinct_groups.sort_unstable();
    distinct_groups.dedup();

    let definitions: HashMap<u32, GroupDefinition> = stream::iter(distinct_groups)
        .map(|group_no| {
            let source = Arc::clone(&source);
            async move {
                load_group_definition(source.as_ref(), group_no)
                    .await
                    .map(|definition| (group_no, definition))
            }
        })
        .buffer_unordered(GROUP_LOAD_CONCURRENCY)
        .try_collect()
        .await?;

    let mut snapshot = ConfigSnapshot {
        loaded_at_ms,
        journeys,
        ..ConfigSnapshot::default()
    };
    for (journey_code, group_nos) in &journey_groups {
        for group_no in group_nos {
            let Some(definition) = definitions.get(group_no) else {
                continue;
            };
            let key = GroupKey::new(journey_code.as_str(), *group_no);
            snapshot.group_forms.insert(
                key.clone(),
                definition
                    .forms
                    .iter()
                    .map(|form| form.form_code.clone())
                    .collect(),
            );
            snapshot
                .child_forms
                .insert(key, definition.child_forms.clone());
            for form in &definition.forms {
                snapshot
                    .form_fields
                    .entry(form.form_code.clone())
                    .or_insert_with(|| {
                        form.fields
                            .iter()
                            .map(|field| field.field_code.clone())
                            .collect()
                    });
                for field in &form.fields {
                    let key = FieldKey::new(form.form_code.as_str(), field.field_code.as_str());
                    snapshot.field_meta.entry(key.clone()).or_insert(FieldMeta {
                        field_type: field.field_type,
                        required: field.required,
                        sort_order: field.sort_order,
                    });
                    snapshot
                        .field_rules
                        .entry(key)
                        .or_insert_with(|| field.rules.clone());
                }
            }
        }
    }
    snapshot.journey_groups = journey_groups;
    Ok(snapshot)
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("configuration refresh failed: {message}")]
pub struct SnapshotError {
    pub message: String,
    pub config: bool,
}

impl SnapshotError {
    fn storage(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            config: false,
        }
    }
}

impl From<DomainError> for SnapshotError {
    fn from(err: DomainError) -> Self {
        Self {
            config: err.is_config(),
            message: err.to_string(),
        }
    }
}

impl From<SnapshotError> for DomainError {
    fn from(err: SnapshotError) -> Self {
        if err.config {
            DomainError::Config(err.message)
        } else {
            DomainError::Storage(err.message)
        }
    }
}

type RefreshResult = Result<Arc<ConfigSnapshot>, SnapshotError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshResult>>;

struct StoreInner {
    source: Arc<dyn ConfigSource>,
    clock: Arc<dyn Clock>,
    current: ArcSwap<ConfigSnapshot>,
    in_flight: Mutex<Option<SharedRefresh>>,
    builds: AtomicU64,
}

impl StoreInner {
    async fn rebuild(&self) -> RefreshResult {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let loaded_at_ms = self.clock.now_ms();
        match build_snapshot(Arc::clone(&self.source), loaded_at_ms).await {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                self.current.store(Arc::clone(&snapshot));
                tracing::info!(
                    journeys = snapshot.journeys.len(),
                    groups = snapshot.group_count(),
                    loaded_at_ms,
                    "configuration snapshot refreshed"
                );
                Ok(snapshot)
            }
            Err(err) => {
                tracing::warn!(error = %err, "configuration snapshot refresh failed, keeping previous snapshot");
                Err(SnapshotError::from(err))
            }
        }
    }
}

/// Clears the in-flight slot when the refresh task ends, panics included.
struct ClearInFlight(Arc<StoreInner>);

impl Drop for ClearInFlight {
    fn drop(&mut self) {
        let mut slot = self
            .0
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = None;
    }
}

/// Holds the current [`ConfigSnapshot`] and rebuilds it on request.
///
/// Reads never touch the source. Concurrent `refresh_all` calls share one
/// rebuild, which runs on its own task so a caller giving up does not cancel
/// it.
#[derive(Clone)]
pub struct SnapshotStore {
    inner: Arc<StoreInner>,
}

impl SnapshotStore {
    pub fn new(source: Arc<dyn ConfigSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                source,
                clock,
                current: ArcSwap::from_pointee(ConfigSnapshot::empty()),
                in_flight: Mutex::new(None),
                builds: AtomicU64::new(0),
            }),
        }
    }

    pub fn current(&self) -> Arc<ConfigSnapshot> {
        self.inner.current.load_full()
    }

    pub async fn refresh_all(&self) -> RefreshResult {
        let refresh = {
            let mut slot = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let refresh = self.spawn_refresh();
                    *slot = Some(refresh.clone());
                    refresh
                }
            }
        };
        refresh.await
    }

    /// Number of rebuilds started since construction.
    pub fn build_count(&self) -> u64 {
        self.inner.builds.load(Ordering::SeqCst)
    }

    fn spawn_refresh(&self) -> SharedRefresh {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _clear = ClearInFlight(Arc::clone(&inner));
            inner.rebuild().await
        });
        let joined: BoxFuture<'static, RefreshResult> = Box::pin(async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(err) => Err(SnapshotError::storage(format!(
                    "refresh task aborted: {err}"
                ))),
            }
        });
        joined.shared()
    }
}
