use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::DomainResult;
use crate::clock::{Clock, ttl_ms};
use crate::error::DomainError;
use crate::plan::{JourneyPlan, JourneyPlanCache};
use crate::ports::config_source::ConfigSource;
use crate::ports::runtime::{RuntimeStore, RuntimeTx};
use crate::snapshot::{ConfigSnapshot, SnapshotStore};
use crate::util::new_id;
use crate::validation::{
    FormValidationService, GroupPayloadValidationService, GroupSubmission, RuleActionRegistry,
    ValidationCode, ValidationError, ValidationReport,
};

pub mod model;

use model::{
    Application, ApplicationStatus, GroupProgress, GroupState, GroupStatus, GroupView,
    JourneyView, ProgressUpdate, RuntimeSettings, Session, SessionStatus, SubmitOutcome,
};

/// Units of work that lose the one-open-application race are retried once.
const START_ATTEMPTS: u32 = 2;

/// Journey workflow: sessions, ordered group submission and progress.
///
/// Every operation runs inside one [`RuntimeTx`]; an error anywhere drops
/// the unit of work, which discards its writes and releases its row locks.
pub struct JourneyRuntimeService {
    store: Arc<dyn RuntimeStore>,
    source: Arc<dyn ConfigSource>,
    plans: Arc<JourneyPlanCache>,
    snapshots: SnapshotStore,
    validator: GroupPayloadValidationService,
    clock: Arc<dyn Clock>,
    settings: RuntimeSettings,
}

impl JourneyRuntimeService {
    pub fn new(
        store: Arc<dyn RuntimeStore>,
        source: Arc<dyn ConfigSource>,
        clock: Arc<dyn Clock>,
        settings: RuntimeSettings,
    ) -> Self {
        let snapshots = SnapshotStore::new(Arc::clone(&source), Arc::clone(&clock));
        let plans = Arc::new(JourneyPlanCache::new(Arc::clone(&source)));
        let forms = FormValidationService::new(Arc::new(RuleActionRegistry::with_builtins()));
        let validator = GroupPayloadValidationService::new(snapshots.clone(), forms);
        Self {
            store,
            source,
            plans,
            snapshots,
            validator,
            clock,
            settings,
        }
    }

    /// Replaces the built-in rule actions.
    pub fn with_rule_registry(mut self, registry: RuleActionRegistry) -> Self {
        let forms = FormValidationService::new(Arc::new(registry));
        self.validator = GroupPayloadValidationService::new(self.snapshots.clone(), forms);
        self
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn plans(&self) -> &JourneyPlanCache {
        &self.plans
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub async fn start(&self, journey_code: &str, customer_ref: &str) -> DomainResult<JourneyView> {
        let journey_code = required(journey_code, "journey_code")?;
        let customer_ref = required(customer_ref, "customer_ref")?;
        let plan = self.plans.get_plan(journey_code).await?;
        let journey_id = self.journey_id(journey_code).await?;

        let mut attempt = 1;
        loop {
            match self.start_once(&plan, &journey_id, customer_ref).await {
                Err(DomainError::Conflict) if attempt < START_ATTEMPTS => {
                    tracing::debug!(journey_code, customer_ref, attempt, "start lost open-application race, retrying");
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    pub async fn restart(
        &self,
        journey_code: &str,
        customer_ref: &str,
    ) -> DomainResult<JourneyView> {
        let journey_code = required(journey_code, "journey_code")?;
        let customer_ref = required(customer_ref, "customer_ref")?;
        let plan = self.plans.get_plan(journey_code).await?;
        let journey_id = self.journey_id(journey_code).await?;

        let mut attempt = 1;
        loop {
            match self.restart_once(&plan, &journey_id, customer_ref).await {
                Err(DomainError::Conflict) if attempt < START_ATTEMPTS => {
                    tracing::debug!(journey_code, customer_ref, attempt, "restart lost open-application race, retrying");
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    pub async fn get_current(&self, session_id: &str) -> DomainResult<JourneyView> {
        let now = self.clock.now_ms();
        let mut tx = self.store.begin().await?;
        let session = tx
            .find_usable_session(session_id, now)
            .await?
            .ok_or(DomainError::SessionExpired)?;
        let application = tx
            .find_application(&session.application_id)
            .await?
            .ok_or_else(|| missing_application(&session.application_id))?;
        let expires_at_ms = self.session_expiry(now);
        tx.touch_session(&session.session_id, expires_at_ms, now)
            .await?;
        let states = tx.list_group_states(&application.application_id).await?;
        tx.commit().await?;

        let plan = self.plans.get_plan(&application.journey_code).await?;
        Ok(build_view(
            &plan,
            &application,
            &session.session_id,
            expires_at_ms,
            &states,
        ))
    }

    /// Records one group submission.
    ///
    /// Renews an unusable session, enforces plan order under the
    /// application's row lock, cascades invalidation on back-edits and
    /// advances progress unless the group ends up invalid.
    pub async fn submit(
        &self,
        session_id: &str,
        group_code: &str,
        payload: Value,
        force_invalid: bool,
    ) -> DomainResult<SubmitOutcome> {
        let group_no = parse_group_code(group_code)?;
        let now = self.clock.now_ms();
        let mut tx = self.store.begin().await?;

        let (session, session_renewed) = self.resolve_session(tx.as_mut(), session_id, now).await?;
        let application = tx
            .lock_application(&session.application_id)
            .await?
            .ok_or_else(|| missing_application(&session.application_id))?;
        if !application.status.is_open() {
            return Err(DomainError::ApplicationClosed {
                status: application.status.as_str().to_string(),
            });
        }

        let plan = self.plans.get_plan(&application.journey_code).await?;
        let submitted_position = plan.position_of(group_no).ok_or_else(|| {
            DomainError::Validation(format!("group {group_no} is not part of this journey"))
        })?;
        let current_position = plan.position_of(application.current_group_no).unwrap_or(0);
        if submitted_position > current_position + 1 {
            return Err(DomainError::OrderingConflict {
                group_no,
                submitted_position,
                current_position,
            });
        }
        let back_edit = submitted_position <= current_position;

        let errors = if force_invalid {
            Vec::new()
        } else {
            self.validate_on_submit(&application.journey_code, group_no, &payload)
        };
        let validated = !force_invalid && errors.is_empty();
        let status = if validated {
            GroupStatus::Validated
        } else {
            GroupStatus::Invalidated
        };
        tx.upsert_group_state(&application.application_id, group_no, status, &payload, now)
            .await?;

        if validated {
            if back_edit {
                let later = plan.groups_after(submitted_position);
                let flipped = tx
                    .invalidate_validated_groups(&application.application_id, &later, now)
                    .await?;
                tracing::debug!(
                    application_id = %application.application_id,
                    group_no,
                    invalidated = flipped,
                    "back-edit invalidated later groups"
                );
            }
            let update = progress_update(&plan, &application, group_no, submitted_position, now);
            if tx.update_progress(&update).await? == 0 {
                return Err(DomainError::Conflict);
            }
        }

        let session_expires_at_ms = self.session_expiry(now);
        tx.touch_session(&session.session_id, session_expires_at_ms, now)
            .await?;
        tx.commit().await?;

        Ok(SubmitOutcome {
            validate_result: validated,
            session_id: session.session_id,
            session_expires_at_ms,
            session_renewed,
            errors,
        })
    }

    /// Ends a session explicitly. Closed sessions are never renewed.
    pub async fn close_session(&self, session_id: &str) -> DomainResult<()> {
        let now = self.clock.now_ms();
        let mut tx = self.store.begin().await?;
        if tx.find_session(session_id).await?.is_none() {
            return Err(DomainError::NotFound(format!("session {session_id}")));
        }
        tx.close_session(session_id, now).await?;
        tx.commit().await
    }

    pub fn validate_payload(
        &self,
        journey_code: &str,
        group_no: u32,
        submission: &GroupSubmission,
    ) -> ValidationReport {
        self.validator.validate(journey_code, group_no, submission)
    }

    /// Rebuilds the snapshot, then drops every cached plan.
    pub async fn refresh_configuration(&self) -> DomainResult<Arc<ConfigSnapshot>> {
        let snapshot = self.snapshots.refresh_all().await?;
        self.plans.invalidate_all();
        Ok(snapshot)
    }

    pub async fn expire_lapsed_sessions(&self) -> DomainResult<u64> {
        let expired = self
            .store
            .expire_lapsed_sessions(self.clock.now_ms())
            .await?;
        if expired > 0 {
            tracing::debug!(expired, "expired lapsed sessions");
        }
        Ok(expired)
    }

    async fn start_once(
        &self,
        plan: &JourneyPlan,
        journey_id: &str,
        customer_ref: &str,
    ) -> DomainResult<JourneyView> {
        let now = self.clock.now_ms();
        let mut tx = self.store.begin().await?;
        let application = match tx
            .find_open_application(customer_ref, &plan.journey_code)
            .await?
        {
            Some(existing) => existing,
            None => {
                let application =
                    new_application(journey_id, &plan.journey_code, customer_ref, now);
                tx.insert_application(&application).await?;
                application
            }
        };
        let session = self.new_session(&application.application_id, now);
        tx.insert_session(&session).await?;
        let states = tx.list_group_states(&application.application_id).await?;
        tx.commit().await?;

        tracing::info!(
            application_id = %application.application_id,
            session_id = %session.session_id,
            journey_code = %plan.journey_code,
            "journey session started"
        );
        Ok(build_view(
            plan,
            &application,
            &session.session_id,
            session.expires_at_ms,
            &states,
        ))
    }

    async fn restart_once(
        &self,
        plan: &JourneyPlan,
        journey_id: &str,
        customer_ref: &str,
    ) -> DomainResult<JourneyView> {
        let now = self.clock.now_ms();
        let mut tx = self.store.begin().await?;
        if let Some(open) = tx
            .find_open_application(customer_ref, &plan.journey_code)
            .await?
        {
            let locked = tx.lock_application(&open.application_id).await?;
            if let Some(locked) = locked.filter(|app| app.status.is_open()) {
                tx.update_application_status(
                    &locked.application_id,
                    ApplicationStatus::Superseded,
                    now,
                )
                .await?;
                let expired = tx
                    .expire_active_sessions(&locked.application_id, now)
                    .await?;
                tracing::info!(
                    application_id = %locked.application_id,
                    expired_sessions = expired,
                    "application superseded by restart"
                );
            }
        }

        let application = new_application(journey_id, &plan.journey_code, customer_ref, now);
        tx.insert_application(&application).await?;
        let session = self.new_session(&application.application_id, now);
        tx.insert_session(&session).await?;
        tx.commit().await?;

        Ok(build_view(
            plan,
            &application,
            &session.session_id,
            session.expires_at_ms,
            &[],
        ))
    }

    /// Returns the session to submit under, renewing it when unusable.
    ///
    /// Renewal runs before the application row lock is taken, so concurrent
    /// submits on one lapsed session may each open a fresh session. Every
    /// renewed session belongs to the same application and lapses on its own.
    async fn resolve_session(
        &self,
        tx: &mut dyn RuntimeTx,
        session_id: &str,
        now: i64,
    ) -> DomainResult<(Session, bool)> {
        if let Some(session) = tx.find_usable_session(session_id, now).await? {
            return Ok((session, false));
        }
        let stale = match tx.find_session(session_id).await? {
            Some(stale) if stale.status != SessionStatus::Closed => stale,
            _ => return Err(DomainError::SessionExpired),
        };
        if stale.status == SessionStatus::Active {
            tx.mark_session_expired(&stale.session_id, now).await?;
        }
        let fresh = self.new_session(&stale.application_id, now);
        tx.insert_session(&fresh).await?;
        tracing::info!(
            previous_session_id = %stale.session_id,
            session_id = %fresh.session_id,
            application_id = %fresh.application_id,
            "session renewed"
        );
        Ok((fresh, true))
    }

    fn validate_on_submit(
        &self,
        journey_code: &str,
        group_no: u32,
        payload: &Value,
    ) -> Vec<ValidationError> {
        if !self.settings.validate_payload_on_submit {
            return Vec::new();
        }
        match GroupSubmission::from_value(payload) {
            Ok(submission) => {
                self.validator
                    .validate(journey_code, group_no, &submission)
                    .errors
            }
            Err(err) => vec![ValidationError::new(
                ValidationCode::Payload,
                format!("payload could not be decoded: {err}"),
            )],
        }
    }

    async fn journey_id(&self, journey_code: &str) -> DomainResult<String> {
        self.source
            .find_journey_id(journey_code)
            .await?
            .ok_or_else(|| DomainError::UnknownJourney(journey_code.to_string()))
    }

    fn new_session(&self, application_id: &str, now: i64) -> Session {
        Session {
            session_id: new_id(),
            application_id: application_id.to_string(),
            status: SessionStatus::Active,
            expires_at_ms: self.session_expiry(now),
            created_at_ms: now,
            updated_at_ms: now,
        }
    }

    fn session_expiry(&self, now: i64) -> i64 {
        now + ttl_ms(self.settings.session_ttl)
    }
}

fn required<'a>(value: &'a str, name: &str) -> DomainResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DomainError::Validation(format!("{name} is required")));
    }
    Ok(value)
}

fn parse_group_code(group_code: &str) -> DomainResult<u32> {
    group_code
        .trim()
        .parse()
        .map_err(|_| DomainError::Validation(format!("invalid group code: {group_code}")))
}

fn missing_application(application_id: &str) -> DomainError {
    DomainError::NotFound(format!("application {application_id}"))
}

fn new_application(
    journey_id: &str,
    journey_code: &str,
    customer_ref: &str,
    now: i64,
) -> Application {
    Application {
        application_id: new_id(),
        journey_id: journey_id.to_string(),
        journey_code: journey_code.to_string(),
        customer_ref: customer_ref.to_string(),
        status: ApplicationStatus::InProgress,
        current_group_no: 0,
        furthest_group_no: 0,
        version: 0,
        created_at_ms: now,
        updated_at_ms: now,
    }
}

fn progress_update(
    plan: &JourneyPlan,
    application: &Application,
    group_no: u32,
    submitted_position: u32,
    now: i64,
) -> ProgressUpdate {
    let furthest_position = plan.position_of(application.furthest_group_no).unwrap_or(0);
    let furthest_group_no = if submitted_position > furthest_position {
        group_no
    } else {
        application.furthest_group_no
    };
    let status = if submitted_position == plan.last_position {
        ApplicationStatus::ReadyForFinalisation
    } else {
        ApplicationStatus::InProgress
    };
    ProgressUpdate {
        application_id: application.application_id.clone(),
        expected_version: application.version,
        status,
        current_group_no: group_no,
        furthest_group_no,
        updated_at_ms: now,
    }
}

fn build_view(
    plan: &JourneyPlan,
    application: &Application,
    session_id: &str,
    session_expires_at_ms: i64,
    states: &[GroupState],
) -> JourneyView {
    let by_group: HashMap<u32, &GroupState> =
        states.iter().map(|state| (state.group_no, state)).collect();
    let groups = plan
        .group_nos
        .iter()
        .map(|group_no| match by_group.get(group_no) {
            Some(state) => {
                let status = GroupProgress::from(state.status);
                GroupView {
                    group_no: *group_no,
                    status,
                    validate_result: status.validate_result(),
                    payload: Some(state.payload.clone()),
                }
            }
            None => GroupView {
                group_no: *group_no,
                status: GroupProgress::Missing,
                validate_result: None,
                payload: None,
            },
        })
        .collect();

    JourneyView {
        session_id: session_id.to_string(),
        application_id: application.application_id.clone(),
        journey_code: application.journey_code.clone(),
        current_group_no: application.current_group_no,
        application_status: application.status,
        session_expires_at_ms,
        next_group_no: plan.next_group_after(application.current_group_no),
        groups,
    }
}
