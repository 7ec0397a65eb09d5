use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::pool::PlaceholderPool;

/// Next firing time strictly after `now`
pub fn next_rebuild_after(schedule: &Schedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&now).next()
}

/// Rebuild the pool on a cron schedule until `cancel` fires
///
/// Uses six-field cron syntax with seconds, e.g. `0 0 0 * * *` for midnight UTC.
pub fn spawn_daily_rebuild(
    pool: Arc<PlaceholderPool>,
    expression: &str,
    cancel: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    let schedule = Schedule::from_str(expression)
        .with_context(|| format!("invalid rebuild schedule: {expression}"))?;

    let handle = tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let Some(next) = next_rebuild_after(&schedule, now) else {
                warn!("Rebuild schedule has no upcoming runs, stopping");
                break;
            };
            let delay = (next - now).to_std().unwrap_or_default();
            info!(next_run = %next, "Next placeholder pool rebuild scheduled");

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Pool rebuild scheduler stopped");
                    break;
                }
                _ = tokio::time::sleep(delay) => {
                    let added = pool.rebuild().await;
                    info!(added, size = pool.size(), "Scheduled pool rebuild complete");
                }
            }
        }
    });

    Ok(handle)
}
