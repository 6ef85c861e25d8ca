//! Background expiry of reservation leases.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::core::ProtocolScheduler;
use crate::util::now_utc;

/// Expire overdue leases every `interval` until the handle is aborted.
///
/// Schedules that lose a lease are dropped and their runs failed.
pub fn spawn_expiry_sweeper(
    scheduler: Arc<ProtocolScheduler>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match scheduler.expire_overdue_schedules(now_utc()).await {
                Ok(dropped) if dropped.is_empty() => debug!("no schedules lost their lease"),
                Ok(dropped) => info!(count = dropped.len(), "dropped schedules with expired leases"),
                Err(err) => warn!(error = %err, "reservation expiry sweep failed"),
            }
        }
    })
}

/// Spawn the sweeper if the configuration gives reservations a lease.
pub fn spawn_from_config(
    scheduler: Arc<ProtocolScheduler>,
    config: &SchedulerConfig,
) -> Option<JoinHandle<()>> {
    config.reservation.timeout_secs?;
    Some(spawn_expiry_sweeper(
        scheduler,
        Duration::from_secs(config.reservation.sweep_interval_secs),
    ))
}
