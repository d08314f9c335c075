use std::collections::{BTreeMap, HashMap};
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::Notify;

use crate::DomainResult;
use crate::error::DomainError;
use crate::ports::config_source::{ConfigSource, JourneyGroupRow};

/// Ordered groups of one journey. Positions are 1-based ordinals in
/// configured order.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct JourneyPlan {
    pub journey_code: String,
    pub group_nos: Vec<u32>,
    positions: BTreeMap<u32, u32>,
    pub last_position: u32,
}

impl JourneyPlan {
    pub fn from_rows(journey_code: &str, mut rows: Vec<JourneyGroupRow>) -> DomainResult<Self> {
        if rows.is_empty() {
            return Err(DomainError::UnknownJourney(journey_code.to_string()));
        }
        rows.sort_by_key(|row| row.position);

        let mut group_nos = Vec::with_capacity(rows.len());
        let mut positions = BTreeMap::new();
        for (index, row) in rows.iter().enumerate() {
            let position = index as u32 + 1;
            if positions.insert(row.group_no, position).is_some() {
                return Err(DomainError::Config(format!(
                    "group {} appears more than once in journey {journey_code}",
                    row.group_no
                )));
            }
            group_nos.push(row.group_no);
        }

        Ok(Self {
            journey_code: journey_code.to_string(),
            last_position: group_nos.len() as u32,
            group_nos,
            positions,
        })
    }

    pub fn position_of(&self, group_no: u32) -> Option<u32> {
        self.positions.get(&group_no).copied()
    }

    pub fn group_at(&self, position: u32) -> Option<u32> {
        let index = position.checked_sub(1)? as usize;
        self.group_nos.get(index).copied()
    }

    pub fn contains(&self, group_no: u32) -> bool {
        self.positions.contains_key(&group_no)
    }

    /// Group numbers positioned after `position`, ascending by group number.
    pub fn groups_after(&self, position: u32) -> Vec<u32> {
        let mut later: Vec<u32> = self
            .positions
            .iter()
            .filter(|(_, pos)| **pos > position)
            .map(|(group_no, _)| *group_no)
            .collect();
        later.sort_unstable();
        later
    }

    /// The group to fill after `current_group_no`: the first group when
    /// nothing has been submitted (or the current group left the plan),
    /// `None` after the last one.
    pub fn next_group_after(&self, current_group_no: u32) -> Option<u32> {
        match self.position_of(current_group_no) {
            Some(position) if current_group_no != 0 => self.group_at(position + 1),
            _ => self.group_at(1),
        }
    }
}

enum Claim<'a> {
    Ready(Arc<JourneyPlan>),
    Leader(LoadGuard<'a>),
    Waiter(Arc<Notify>),
}

/// Removes the in-flight marker and wakes waiters however the load ends.
struct LoadGuard<'a> {
    cache: &'a JourneyPlanCache,
    journey_code: String,
    notify: Arc<Notify>,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        let mut inflight = self
            .cache
            .inflight_loads
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if inflight
            .get(&self.journey_code)
            .is_some_and(|current| Arc::ptr_eq(current, &self.notify))
        {
            inflight.remove(&self.journey_code);
        }
        drop(inflight);
        self.notify.notify_waiters();
    }
}

/// Memoized journey plans with one load per journey at a time.
pub struct JourneyPlanCache {
    source: Arc<dyn ConfigSource>,
    plans: RwLock<HashMap<String, Arc<JourneyPlan>>>,
    inflight_loads: Mutex<HashMap<String, Arc<Notify>>>,
    generation: AtomicU64,
    loads: AtomicU64,
}

impl JourneyPlanCache {
    pub fn new(source: Arc<dyn ConfigSource>) -> Self {
        Self {
            source,
            plans: RwLock::new(HashMap::new()),
            inflight_loads: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            loads: AtomicU64::new(0),
        }
    }

    pub async fn get_plan(&self, journey_code: &str) -> DomainResult<Arc<JourneyPlan>> {
        loop {
            match self.claim(journey_code) {
                Claim::Ready(plan) => return Ok(plan),
                Claim::Leader(guard) => {
                    let generation = self.generation.load(Ordering::SeqCst);
                    self.loads.fetch_add(1, Ordering::SeqCst);
                    let result = self.load(journey_code).await;
                    if let Ok(plan) = &result {
                        if self.generation.load(Ordering::SeqCst) == generation {
                            self.plans
                                .write()
                                .unwrap_or_else(PoisonError::into_inner)
                                .insert(journey_code.to_string(), Arc::clone(plan));
                        }
                    }
                    drop(guard);
                    return result;
                }
                Claim::Waiter(notify) => {
                    let mut notified = pin!(notify.notified());
                    notified.as_mut().enable();
                    if self.is_loading(journey_code, &notify) {
                        notified.await;
                    }
                }
            }
        }
    }

    pub async fn warm_up(&self, journey_code: &str) -> DomainResult<()> {
        self.get_plan(journey_code).await.map(|_| ())
    }

    pub fn invalidate(&self, journey_code: &str) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.plans
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(journey_code);
    }

    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.plans
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn cached_journeys(&self) -> usize {
        self.plans
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of source loads started since construction.
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::SeqCst)
    }

    fn cached(&self, journey_code: &str) -> Option<Arc<JourneyPlan>> {
        self.plans
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(journey_code)
            .cloned()
    }

    fn claim(&self, journey_code: &str) -> Claim<'_> {
        if let Some(plan) = self.cached(journey_code) {
            return Claim::Ready(plan);
        }
        let mut inflight = self
            .inflight_loads
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Leaders publish before clearing their marker, so a miss here is real.
        if let Some(plan) = self.cached(journey_code) {
            return Claim::Ready(plan);
        }
        if let Some(notify) = inflight.get(journey_code) {
            return Claim::Waiter(Arc::clone(notify));
        }
        let notify = Arc::new(Notify::new());
        inflight.insert(journey_code.to_string(), Arc::clone(&notify));
        Claim::Leader(LoadGuard {
            cache: self,
            journey_code: journey_code.to_string(),
            notify,
        })
    }

    fn is_loading(&self, journey_code: &str, notify: &Arc<Notify>) -> bool {
        self.inflight_loads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(journey_code)
            .is_some_and(|current| Arc::ptr_eq(current, notify))
    }

    async fn load(&self, journey_code: &str) -> DomainResult<Arc<JourneyPlan>> {
        let rows = self.source.list_journey_groups(journey_code).await?;
        JourneyPlan::from_rows(journey_code, rows).map(Arc::new)
    }
}
