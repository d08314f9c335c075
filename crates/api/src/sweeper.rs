use std::sync::Arc;
use std::time::Duration;

use journey_domain::runtime::JourneyRuntimeService;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

use crate::observability;

/// Expires lapsed sessions once; failures are logged and swallowed.
pub async fn sweep_once(runtime: &JourneyRuntimeService) -> u64 {
    match runtime.expire_lapsed_sessions().await {
        Ok(expired) => {
            if expired > 0 {
                observability::register_sessions_swept(expired);
            }
            expired
        }
        Err(err) => {
            tracing::warn!(error = %err, "session sweep failed");
            0
        }
    }
}

pub fn spawn_session_sweeper(
    runtime: Arc<JourneyRuntimeService>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep_once(&runtime).await;
        }
    })
}
