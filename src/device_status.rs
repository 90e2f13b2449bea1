//! Device status reconciler.
//!
//! Two views of the actuators exist: the optimistic in-memory cache
//! (`memoryState`) and the last persisted sample (`databaseState`). The
//! headline flags always come from the database when it has a row; the memory
//! view is reported alongside so callers can show "change not yet confirmed".

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::actuators::ActuatorCache;
use crate::error::StoreError;
use crate::models::{ActuatorState, Reading};
use crate::store::PrimaryStore;

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusSource {
    Memory,
    Database,
}

/// Actuator flags as seen by one view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActuatorView {
    pub timestamp: DateTime<Utc>,
    pub pump_status: bool,
    pub heater_status: bool,
}

impl From<ActuatorState> for ActuatorView {
    fn from(s: ActuatorState) -> Self {
        Self {
            timestamp: s.last_update,
            pump_status: s.pump_status,
            heater_status: s.heater_status,
        }
    }
}

impl From<&Reading> for ActuatorView {
    fn from(r: &Reading) -> Self {
        Self {
            timestamp: r.timestamp,
            pump_status: r.pump_status,
            heater_status: r.heater_status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub timestamp: DateTime<Utc>,
    pub pump_status: bool,
    pub heater_status: bool,
    pub pending_sync: bool,
    pub source: StatusSource,
    pub memory_state: ActuatorView,
    pub database_state: Option<ActuatorView>,
}

/// Compose the two views. Pure; see the module docs for the rules.
pub fn reconcile(memory: ActuatorState, latest: Option<&Reading>) -> DeviceStatus {
    // ---
    let memory_view = ActuatorView::from(memory);
    match latest {
        None => DeviceStatus {
            timestamp: memory_view.timestamp,
            pump_status: memory_view.pump_status,
            heater_status: memory_view.heater_status,
            pending_sync: true,
            source: StatusSource::Memory,
            memory_state: memory_view,
            database_state: None,
        },
        Some(row) => {
            let db_view = ActuatorView::from(row);
            let pending_sync = memory_view.pump_status != db_view.pump_status
                || memory_view.heater_status != db_view.heater_status;
            DeviceStatus {
                timestamp: db_view.timestamp,
                pump_status: db_view.pump_status,
                heater_status: db_view.heater_status,
                pending_sync,
                source: StatusSource::Database,
                memory_state: memory_view,
                database_state: Some(db_view),
            }
        }
    }
}

/// Read both views and reconcile them.
pub async fn status(
    cache: &ActuatorCache,
    store: &PrimaryStore,
) -> Result<DeviceStatus, StoreError> {
    // ---
    let memory = cache.read().await;
    let latest = store.latest(1).await?;
    let status = reconcile(memory, latest.first());
    if status.pending_sync {
        tracing::debug!(?status, "Device state pending sync");
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::DataSource;
    use chrono::TimeZone;

    fn memory(pump: bool, heater: bool) -> ActuatorState {
        ActuatorState {
            pump_status: pump,
            heater_status: heater,
            last_update: Utc.with_ymd_and_hms(2025, 3, 26, 18, 46, 0).unwrap(),
        }
    }

    fn row(pump: bool, heater: bool) -> Reading {
        Reading {
            id: 42,
            temperature: 25.0,
            level: 70.0,
            pump_status: pump,
            heater_status: heater,
            timestamp: Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 0).unwrap(),
            source: DataSource::Remote,
        }
    }

    #[test]
    fn empty_store_reports_memory_pending() {
        // ---
        let status = reconcile(memory(true, false), None);
        assert_eq!(status.source, StatusSource::Memory);
        assert!(status.pending_sync);
        assert!(status.database_state.is_none());
        assert!(status.pump_status);
        assert_eq!(status.timestamp, status.memory_state.timestamp);
    }

    #[test]
    fn database_wins_headline_on_disagreement() {
        // ---
        let latest = row(false, false);
        let status = reconcile(memory(true, false), Some(&latest));
        assert_eq!(status.source, StatusSource::Database);
        assert!(!status.pump_status);
        assert!(status.pending_sync);
        assert!(status.memory_state.pump_status);
        assert!(!status.database_state.unwrap().pump_status);
        assert_eq!(status.timestamp, latest.timestamp);
    }

    #[test]
    fn agreement_clears_pending_sync() {
        // ---
        let latest = row(true, true);
        let status = reconcile(memory(true, true), Some(&latest));
        assert!(!status.pending_sync);
        assert!(status.pump_status && status.heater_status);
    }

    #[test]
    fn heater_disagreement_alone_is_pending() {
        // ---
        let latest = row(false, true);
        let status = reconcile(memory(false, false), Some(&latest));
        assert!(status.pending_sync);
        assert!(status.heater_status);
    }

    #[test]
    fn serializes_null_database_state() {
        // ---
        let json = serde_json::to_value(reconcile(memory(false, false), None)).unwrap();
        assert_eq!(json["source"], "memory");
        assert_eq!(json["pendingSync"], true);
        assert!(json["databaseState"].is_null());
        assert_eq!(json["memoryState"]["pumpStatus"], false);
    }
}
