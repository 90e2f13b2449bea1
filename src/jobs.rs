//! Periodic background jobs: polling ingest, backup sync and actuator
//! reconciliation. Each runs on its own task until the shared
//! `CancellationToken` is cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actuators::{self, ActuatorCache};
use crate::backup::BackupService;
use crate::ingest;
use crate::store::PrimaryStore;
use crate::telemetry::{Latest, ThingSpeakClient};

// ---

/// Run `tick` every `period`, first after `initial_delay`. A slow tick delays
/// the next one instead of queueing bursts.
fn spawn_periodic<F, Fut>(
    name: &'static str,
    initial_delay: Duration,
    period: Duration,
    cancel: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        // ---
        info!(job = name, ?initial_delay, ?period, "Background job started");
        let start = tokio::time::Instant::now() + initial_delay;
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    debug!(job = name, "tick");
                    tick().await;
                }
            }
        }
        info!(job = name, "Background job stopped");
    })
}

/// Poll the provider and append what it reports. Substituted default
/// readings are never stored.
pub fn spawn_ingest_job(
    store: Arc<PrimaryStore>,
    client: Arc<ThingSpeakClient>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    // ---
    spawn_periodic("ingest", Duration::ZERO, period, cancel, move || {
        let store = Arc::clone(&store);
        let client = Arc::clone(&client);
        async move {
            match client.fetch_latest().await {
                Latest::Fresh(sample) => {
                    if let Err(e) = ingest::ingest(&store, &sample).await {
                        warn!(error = %e, "Scheduled ingest failed");
                    }
                }
                Latest::Default(_) => warn!("Provider unavailable; nothing ingested this tick"),
            }
        }
    })
}

pub fn spawn_backup_job(
    backup: Arc<BackupService>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    // ---
    spawn_periodic("backup", Duration::ZERO, period, cancel, move || {
        let backup = Arc::clone(&backup);
        async move {
            // Outcome and failures are already logged and recorded by the service.
            let _ = backup.sync().await;
        }
    })
}

pub fn spawn_reconcile_job(
    cache: Arc<ActuatorCache>,
    client: Arc<ThingSpeakClient>,
    initial_delay: Duration,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    // ---
    spawn_periodic("reconcile", initial_delay, period, cancel, move || {
        let cache = Arc::clone(&cache);
        let client = Arc::clone(&client);
        async move { actuators::reconcile_once(&cache, &client).await }
    })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn periodic_job_ticks_then_stops_on_cancel() {
        // ---
        let count = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let ticks = Arc::clone(&count);
        let handle = spawn_periodic(
            "test",
            Duration::from_secs(10),
            Duration::from_secs(60),
            cancel.clone(),
            move || {
                let ticks = Arc::clone(&ticks);
                async move {
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        cancel.cancel();
        handle.await.unwrap();
    }
}
