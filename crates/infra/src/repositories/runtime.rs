use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use journey_domain::DomainResult;
use journey_domain::error::DomainError;
use journey_domain::ports::BoxFuture;
use journey_domain::ports::runtime::{RuntimeStore, RuntimeTx};
use journey_domain::runtime::model::{
    Application, ApplicationStatus, GroupState, GroupStatus, ProgressUpdate, Session,
    SessionStatus,
};
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

type GroupStateKey = (String, u32);
type RowLocks = Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>;

#[derive(Default)]
struct RuntimeTables {
    applications: HashMap<String, Application>,
    sessions: HashMap<String, Session>,
    group_states: HashMap<GroupStateKey, GroupState>,
}

/// Session writes are replayed in order, against committed rows at commit
/// time and against a private view for reads inside the unit of work.
#[derive(Clone, Debug)]
enum SessionWrite {
    Insert(Session),
    Touch {
        session_id: String,
        expires_at_ms: i64,
        now_ms: i64,
    },
    MarkExpired {
        session_id: String,
        now_ms: i64,
    },
    Close {
        session_id: String,
        now_ms: i64,
    },
    ExpireActive {
        application_id: String,
        now_ms: i64,
    },
}

impl SessionWrite {
    fn apply(&self, sessions: &mut HashMap<String, Session>) -> u64 {
        match self {
            Self::Insert(session) => {
                sessions.insert(session.session_id.clone(), session.clone());
                1
            }
            Self::Touch {
                session_id,
                expires_at_ms,
                now_ms,
            } => match sessions.get_mut(session_id) {
                Some(session) if session.status == SessionStatus::Active => {
                    session.expires_at_ms = *expires_at_ms;
                    session.updated_at_ms = *now_ms;
                    1
                }
                _ => 0,
            },
            Self::MarkExpired { session_id, now_ms } => {
                set_status(sessions.get_mut(session_id), SessionStatus::Expired, *now_ms)
            }
            Self::Close { session_id, now_ms } => {
                set_status(sessions.get_mut(session_id), SessionStatus::Closed, *now_ms)
            }
            Self::ExpireActive {
                application_id,
                now_ms,
            } => sessions
                .values_mut()
                .filter(|session| &session.application_id == application_id)
                .map(|session| set_status(Some(session), SessionStatus::Expired, *now_ms))
                .sum(),
        }
    }
}

fn set_status(session: Option<&mut Session>, status: SessionStatus, now_ms: i64) -> u64 {
    match session {
        Some(session) if session.status == SessionStatus::Active => {
            session.status = status;
            session.updated_at_ms = now_ms;
            1
        }
        _ => 0,
    }
}

/// Process-local runtime store. Row locks are per application and are held
/// by a unit of work until it commits or is dropped.
#[derive(Clone, Default)]
pub struct InMemoryRuntimeStore {
    tables: Arc<RwLock<RuntimeTables>>,
    row_locks: RowLocks,
}

impl InMemoryRuntimeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn application(&self, application_id: &str) -> Option<Application> {
        self.tables
            .read()
            .await
            .applications
            .get(application_id)
            .cloned()
    }

    pub async fn applications_for(&self, customer_ref: &str, journey_code: &str) -> Vec<Application> {
        let tables = self.tables.read().await;
        let mut applications: Vec<Application> = tables
            .applications
            .values()
            .filter(|app| app.customer_ref == customer_ref && app.journey_code == journey_code)
            .cloned()
            .collect();
        applications.sort_by(|a, b| {
            (a.created_at_ms, &a.application_id).cmp(&(b.created_at_ms, &b.application_id))
        });
        applications
    }

    pub async fn session(&self, session_id: &str) -> Option<Session> {
        self.tables.read().await.sessions.get(session_id).cloned()
    }

    pub async fn sessions_for(&self, application_id: &str) -> Vec<Session> {
        self.tables
            .read()
            .await
            .sessions
            .values()
            .filter(|session| session.application_id == application_id)
            .cloned()
            .collect()
    }

    pub async fn group_state(&self, application_id: &str, group_no: u32) -> Option<GroupState> {
        self.tables
            .read()
            .await
            .group_states
            .get(&(application_id.to_string(), group_no))
            .cloned()
    }
}

impl RuntimeStore for InMemoryRuntimeStore {
    fn begin(&self) -> BoxFuture<'_, DomainResult<Box<dyn RuntimeTx>>> {
        let tx = InMemoryRuntimeTx {
            tables: self.tables.clone(),
            row_locks: self.row_locks.clone(),
            held: HashMap::new(),
            applications: HashMap::new(),
            inserted: HashSet::new(),
            group_states: HashMap::new(),
            session_writes: Vec::new(),
        };
        Box::pin(async move { Ok(Box::new(tx) as Box<dyn RuntimeTx>) })
    }

    fn expire_lapsed_sessions(&self, now_ms: i64) -> BoxFuture<'_, DomainResult<u64>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut tables = tables.write().await;
            let mut expired = 0;
            for session in tables.sessions.values_mut() {
                if session.status == SessionStatus::Active && session.expires_at_ms <= now_ms {
                    session.status = SessionStatus::Expired;
                    session.updated_at_ms = now_ms;
                    expired += 1;
                }
            }
            Ok(expired)
        })
    }
}

struct InMemoryRuntimeTx {
    tables: Arc<RwLock<RuntimeTables>>,
    row_locks: RowLocks,
    held: HashMap<String, OwnedMutexGuard<()>>,
    applications: HashMap<String, Application>,
    inserted: HashSet<String>,
    group_states: HashMap<GroupStateKey, GroupState>,
    session_writes: Vec<SessionWrite>,
}

impl InMemoryRuntimeTx {
    async fn current_application(&self, application_id: &str) -> Option<Application> {
        if let Some(staged) = self.applications.get(application_id) {
            return Some(staged.clone());
        }
        self.tables
            .read()
            .await
            .applications
            .get(application_id)
            .cloned()
    }

    async fn current_group_state(&self, key: &GroupStateKey) -> Option<GroupState> {
        if let Some(staged) = self.group_states.get(key) {
            return Some(staged.clone());
        }
        self.tables.read().await.group_states.get(key).cloned()
    }

    /// Committed sessions matching `filter` with this unit's writes replayed.
    async fn session_view(&self, filter: impl Fn(&Session) -> bool) -> HashMap<String, Session> {
        let mut view: HashMap<String, Session> = self
            .tables
            .read()
            .await
            .sessions
            .values()
            .filter(|session| filter(session))
            .map(|session| (session.session_id.clone(), session.clone()))
            .collect();
        for write in &self.session_writes {
            write.apply(&mut view);
        }
        view.retain(|_, session| filter(session));
        view
    }

    async fn current_session(&self, session_id: &str) -> Option<Session> {
        self.session_view(|session| session.session_id == session_id)
            .await
            .remove(session_id)
    }

    fn require_lock(&self, application_id: &str) -> DomainResult<()> {
        if self.held.contains_key(application_id) || self.inserted.contains(application_id) {
            return Ok(());
        }
        Err(DomainError::Storage(format!(
            "application {application_id} written without its row lock"
        )))
    }

    fn row_lock(&self, application_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .row_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(application_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl Drop for InMemoryRuntimeTx {
    fn drop(&mut self) {
        if self.held.is_empty() {
            return;
        }
        let released: Vec<String> = self.held.drain().map(|(id, _guard)| id).collect();
        let mut locks = self
            .row_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for id in released {
            if locks
                .get(&id)
                .is_some_and(|lock| Arc::strong_count(lock) == 1)
            {
                locks.remove(&id);
            }
        }
    }
}

fn is_open_for(app: &Application, customer_ref: &str, journey_code: &str) -> bool {
    app.status.is_open() && app.customer_ref == customer_ref && app.journey_code == journey_code
}

impl RuntimeTx for InMemoryRuntimeTx {
    fn find_application(
        &mut self,
        application_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Application>>> {
        let application_id = application_id.to_string();
        Box::pin(async move { Ok(self.current_application(&application_id).await) })
    }

    fn find_open_application(
        &mut self,
        customer_ref: &str,
        journey_code: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Application>>> {
        let customer_ref = customer_ref.to_string();
        let journey_code = journey_code.to_string();
        Box::pin(async move {
            let mut merged: HashMap<String, Application> = self
                .tables
                .read()
                .await
                .applications
                .values()
                .filter(|app| app.customer_ref == customer_ref && app.journey_code == journey_code)
                .map(|app| (app.application_id.clone(), app.clone()))
                .collect();
            for (id, staged) in &self.applications {
                merged.insert(id.clone(), staged.clone());
            }
            Ok(merged
                .into_values()
                .filter(|app| is_open_for(app, &customer_ref, &journey_code))
                .max_by(|a, b| {
                    (a.created_at_ms, &a.application_id).cmp(&(b.created_at_ms, &b.application_id))
                }))
        })
    }

    fn lock_application(
        &mut self,
        application_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Application>>> {
        let application_id = application_id.to_string();
        Box::pin(async move {
            if !self.held.contains_key(&application_id) && !self.inserted.contains(&application_id)
            {
                let lock = self.row_lock(&application_id);
                let guard = lock.lock_owned().await;
                self.held.insert(application_id.clone(), guard);
            }
            Ok(self.current_application(&application_id).await)
        })
    }

    fn insert_application(&mut self, application: &Application) -> BoxFuture<'_, DomainResult<()>> {
        let application = application.clone();
        Box::pin(async move {
            let exists = self.applications.contains_key(&application.application_id)
                || self
                    .tables
                    .read()
                    .await
                    .applications
                    .contains_key(&application.application_id);
            if exists {
                return Err(DomainError::Conflict);
            }
            self.inserted.insert(application.application_id.clone());
            self.applications
                .insert(application.application_id.clone(), application);
            Ok(())
        })
    }

    fn update_application_status(
        &mut self,
        application_id: &str,
        status: ApplicationStatus,
        now_ms: i64,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let application_id = application_id.to_string();
        Box::pin(async move {
            self.require_lock(&application_id)?;
            let mut application = self
                .current_application(&application_id)
                .await
                .ok_or_else(|| DomainError::NotFound(format!("application {application_id}")))?;
            application.status = status;
            application.version += 1;
            application.updated_at_ms = now_ms;
            self.applications.insert(application_id, application);
            Ok(())
        })
    }

    fn update_progress(&mut self, update: &ProgressUpdate) -> BoxFuture<'_, DomainResult<u64>> {
        let update = update.clone();
        Box::pin(async move {
            self.require_lock(&update.application_id)?;
            let Some(mut application) = self.current_application(&update.application_id).await
            else {
                return Ok(0);
            };
            if application.version != update.expected_version {
                return Ok(0);
            }
            application.status = update.status;
            application.current_group_no = update.current_group_no;
            application.furthest_group_no = update.furthest_group_no;
            application.version += 1;
            application.updated_at_ms = update.updated_at_ms;
            self.applications
                .insert(update.application_id.clone(), application);
            Ok(1)
        })
    }

    fn insert_session(&mut self, session: &Session) -> BoxFuture<'_, DomainResult<()>> {
        let session = session.clone();
        Box::pin(async move {
            if self.current_session(&session.session_id).await.is_some() {
                return Err(DomainError::Conflict);
            }
            self.session_writes.push(SessionWrite::Insert(session));
            Ok(())
        })
    }

    fn find_session(&mut self, session_id: &str) -> BoxFuture<'_, DomainResult<Option<Session>>> {
        let session_id = session_id.to_string();
        Box::pin(async move { Ok(self.current_session(&session_id).await) })
    }

    fn find_usable_session(
        &mut self,
        session_id: &str,
        now_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Option<Session>>> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            Ok(self
                .current_session(&session_id)
                .await
                .filter(|session| session.is_usable(now_ms)))
        })
    }

    fn touch_session(
        &mut self,
        session_id: &str,
        expires_at_ms: i64,
        now_ms: i64,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            self.session_writes.push(SessionWrite::Touch {
                session_id,
                expires_at_ms,
                now_ms,
            });
            Ok(())
        })
    }

    fn mark_session_expired(
        &mut self,
        session_id: &str,
        now_ms: i64,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            self.session_writes
                .push(SessionWrite::MarkExpired { session_id, now_ms });
            Ok(())
        })
    }

    fn close_session(&mut self, session_id: &str, now_ms: i64) -> BoxFuture<'_, DomainResult<()>> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            self.session_writes
                .push(SessionWrite::Close { session_id, now_ms });
            Ok(())
        })
    }

    fn expire_active_sessions(
        &mut self,
        application_id: &str,
        now_ms: i64,
    ) -> BoxFuture<'_, DomainResult<u64>> {
        let application_id = application_id.to_string();
        Box::pin(async move {
            let mut view = self
                .session_view(|session| session.application_id == application_id)
                .await;
            let write = SessionWrite::ExpireActive {
                application_id: application_id.clone(),
                now_ms,
            };
            let expired = write.apply(&mut view);
            self.session_writes.push(write);
            Ok(expired)
        })
    }

    fn list_group_states(
        &mut self,
        application_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<GroupState>>> {
        let application_id = application_id.to_string();
        Box::pin(async move {
            let mut merged: HashMap<u32, GroupState> = self
                .tables
                .read()
                .await
                .group_states
                .values()
                .filter(|state| state.application_id == application_id)
                .map(|state| (state.group_no, state.clone()))
                .collect();
            for ((app_id, group_no), staged) in &self.group_states {
                if *app_id == application_id {
                    merged.insert(*group_no, staged.clone());
                }
            }
            let mut states: Vec<GroupState> = merged.into_values().collect();
            states.sort_by_key(|state| state.group_no);
            Ok(states)
        })
    }

    fn upsert_group_state(
        &mut self,
        application_id: &str,
        group_no: u32,
        status: GroupStatus,
        payload: &Value,
        now_ms: i64,
    ) -> BoxFuture<'_, DomainResult<GroupState>> {
        let key = (application_id.to_string(), group_no);
        let payload = payload.clone();
        Box::pin(async move {
            self.require_lock(&key.0)?;
            let state = match self.current_group_state(&key).await {
                Some(mut existing) => {
                    existing.status = status;
                    existing.payload = payload;
                    existing.submission_version += 1;
                    existing.updated_at_ms = now_ms;
                    existing
                }
                None => GroupState {
                    application_id: key.0.clone(),
                    group_no,
                    status,
                    payload,
                    submission_version: 1,
                    created_at_ms: now_ms,
                    updated_at_ms: now_ms,
                },
            };
            self.group_states.insert(key, state.clone());
            Ok(state)
        })
    }

    fn invalidate_validated_groups(
        &mut self,
        application_id: &str,
        group_nos: &[u32],
        now_ms: i64,
    ) -> BoxFuture<'_, DomainResult<u64>> {
        let application_id = application_id.to_string();
        let group_nos = group_nos.to_vec();
        Box::pin(async move {
            self.require_lock(&application_id)?;
            let mut flipped = 0;
            for group_no in group_nos {
                let key = (application_id.clone(), group_no);
                let Some(mut state) = self.current_group_state(&key).await else {
                    continue;
                };
                if state.status != GroupStatus::Validated {
                    continue;
                }
                state.status = GroupStatus::Invalidated;
                state.updated_at_ms = now_ms;
                self.group_states.insert(key, state);
                flipped += 1;
            }
            Ok(flipped)
        })
    }

    fn commit(mut self: Box<Self>) -> BoxFuture<'static, DomainResult<()>> {
        Box::pin(async move {
            let applications = std::mem::take(&mut self.applications);
            let group_states = std::mem::take(&mut self.group_states);
            let session_writes = std::mem::take(&mut self.session_writes);

            let tables_handle = Arc::clone(&self.tables);
            let mut tables = tables_handle.write().await;
            for (id, staged) in &applications {
                if self.inserted.contains(id) && tables.applications.contains_key(id) {
                    return Err(DomainError::Conflict);
                }
                if !staged.status.is_open() {
                    continue;
                }
                let clash = tables
                    .applications
                    .values()
                    .filter(|other| other.application_id != *id)
                    .map(|other| applications.get(&other.application_id).unwrap_or(other))
                    .chain(
                        applications
                            .values()
                            .filter(|other| other.application_id != *id),
                    )
                    .any(|other| is_open_for(other, &staged.customer_ref, &staged.journey_code));
                if clash {
                    return Err(DomainError::Conflict);
                }
            }

            tables.applications.extend(applications);
            tables.group_states.extend(group_states);
            for write in &session_writes {
                write.apply(&mut tables.sessions);
            }
            drop(tables);
            Ok(())
        })
    }
}
