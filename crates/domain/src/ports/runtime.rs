use serde_json::Value;

use crate::DomainResult;
use crate::ports::BoxFuture;
use crate::runtime::model::{
    Application, ApplicationStatus, GroupState, GroupStatus, ProgressUpdate, Session,
};

/// Runtime persistence. Every engine operation runs inside one unit of work
/// obtained from [`RuntimeStore::begin`].
pub trait RuntimeStore: Send + Sync {
    fn begin(&self) -> BoxFuture<'_, DomainResult<Box<dyn RuntimeTx>>>;

    /// Demotes every ACTIVE session whose expiry has passed. Returns the
    /// number of sessions expired.
    fn expire_lapsed_sessions(&self, now_ms: i64) -> BoxFuture<'_, DomainResult<u64>>;
}

/// One unit of work. Writes are visible to later reads on the same unit and
/// to nobody else until [`RuntimeTx::commit`]. Dropping an uncommitted unit
/// discards its writes and releases every row lock it holds.
pub trait RuntimeTx: Send {
    fn find_application(
        &mut self,
        application_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Application>>>;

    /// Latest open application (by creation time) for the customer and journey.
    fn find_open_application(
        &mut self,
        customer_ref: &str,
        journey_code: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Application>>>;

    /// Acquires the row lock and returns the row as seen under it. The lock
    /// is held until commit or drop.
    fn lock_application(
        &mut self,
        application_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Application>>>;

    fn insert_application(&mut self, application: &Application) -> BoxFuture<'_, DomainResult<()>>;

    fn update_application_status(
        &mut self,
        application_id: &str,
        status: ApplicationStatus,
        now_ms: i64,
    ) -> BoxFuture<'_, DomainResult<()>>;

    /// Applies the update when the row is still at `expected_version` and
    /// bumps the version. Returns the number of rows changed.
    fn update_progress(&mut self, update: &ProgressUpdate) -> BoxFuture<'_, DomainResult<u64>>;

    fn insert_session(&mut self, session: &Session) -> BoxFuture<'_, DomainResult<()>>;

    fn find_session(&mut self, session_id: &str) -> BoxFuture<'_, DomainResult<Option<Session>>>;

    fn find_usable_session(
        &mut self,
        session_id: &str,
        now_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Option<Session>>>;

    fn touch_session(
        &mut self,
        session_id: &str,
        expires_at_ms: i64,
        now_ms: i64,
    ) -> BoxFuture<'_, DomainResult<()>>;

    fn mark_session_expired(
        &mut self,
        session_id: &str,
        now_ms: i64,
    ) -> BoxFuture<'_, DomainResult<()>>;

    fn close_session(&mut self, session_id: &str, now_ms: i64)
    -> BoxFuture<'_, DomainResult<()>>;

    fn expire_active_sessions(
        &mut self,
        application_id: &str,
        now_ms: i64,
    ) -> BoxFuture<'_, DomainResult<u64>>;

    fn list_group_states(
        &mut self,
        application_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<GroupState>>>;

    /// Inserts with submission version 1 or overwrites and bumps the version.
    fn upsert_group_state(
        &mut self,
        application_id: &str,
        group_no: u32,
        status: GroupStatus,
        payload: &Value,
        now_ms: i64,
    ) -> BoxFuture<'_, DomainResult<GroupState>>;

    /// Flips VALIDATED states among `group_nos` to INVALIDATED, keeping their
    /// payloads. Returns the number of states flipped.
    fn invalidate_validated_groups(
        &mut self,
        application_id: &str,
        group_nos: &[u32],
        now_ms: i64,
    ) -> BoxFuture<'_, DomainResult<u64>>;

    fn commit(self: Box<Self>) -> BoxFuture<'static, DomainResult<()>>;
}
