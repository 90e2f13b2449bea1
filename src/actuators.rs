//! Actuator state cache.
//!
//! One `ActuatorCache` lives for the whole process (created in `main` and shared
//! through `AppState`). It starts as `{pump: off, heater: off, now}`, is changed
//! only through its own methods, and is never persisted: after a restart the
//! last commanded states are gone until the next reconciliation.

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::models::ActuatorState;
use crate::telemetry::ThingSpeakClient;

// ---

#[derive(Debug)]
pub struct ActuatorCache {
    state: RwLock<ActuatorState>,
}

impl Default for ActuatorCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ActuatorCache {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ActuatorState {
                pump_status: false,
                heater_status: false,
                last_update: Utc::now(),
            }),
        }
    }

    /// Copy of the current state.
    pub async fn read(&self) -> ActuatorState {
        *self.state.read().await
    }

    /// Record a pump command. Unconditional; the remote write happens later
    /// and never rolls this back.
    pub async fn set_pump(&self, on: bool) -> ActuatorState {
        // ---
        let mut state = self.state.write().await;
        state.pump_status = on;
        state.last_update = Utc::now();
        *state
    }

    /// Record a heater command. Same contract as [`ActuatorCache::set_pump`].
    pub async fn set_heater(&self, on: bool) -> ActuatorState {
        // ---
        let mut state = self.state.write().await;
        state.heater_status = on;
        state.last_update = Utc::now();
        *state
    }

    /// Overwrite the cache with the remote flags if they differ (remote wins).
    /// Returns `true` when the cache changed.
    pub async fn apply_confirmed(&self, pump: bool, heater: bool) -> bool {
        // ---
        let mut state = self.state.write().await;
        if state.pump_status == pump && state.heater_status == heater {
            return false;
        }
        warn!(
            memory_pump = state.pump_status,
            memory_heater = state.heater_status,
            remote_pump = pump,
            remote_heater = heater,
            "Actuator state drift detected; adopting remote state"
        );
        state.pump_status = pump;
        state.heater_status = heater;
        state.last_update = Utc::now();
        true
    }
}

/// One reconciliation pass against the provider's latest confirmed sample.
///
/// Failures are logged and leave the cache untouched.
pub async fn reconcile_once(cache: &ActuatorCache, client: &ThingSpeakClient) {
    // ---
    match client.fetch_latest_confirmed().await {
        Ok(Some(remote)) => {
            if cache
                .apply_confirmed(remote.pump_status, remote.heater_status)
                .await
            {
                info!(
                    pump = remote.pump_status,
                    heater = remote.heater_status,
                    "Actuator cache updated from provider"
                );
            } else {
                info!("Actuator cache consistent with provider");
            }
        }
        Ok(None) => warn!("Reconciliation skipped: provider returned no entries"),
        Err(e) => warn!(error = %e, "Reconciliation failed; keeping cached state"),
    }
}
