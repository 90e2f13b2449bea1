//! Aquaponics telemetry backend.
//!
//! Polls a ThingSpeak-style channel for tank samples (water temperature,
//! water level, pump and heater flags), stores them without duplicates,
//! keeps an optimistic actuator cache reconciled against the provider, serves
//! bucketed history with summary statistics, and mirrors new readings into a
//! secondary store with trends, alerts and daily rollups.
//!
//! Every module is exposed from here so the binary and the integration tests
//! share one set of paths.

pub mod actuators;
pub mod aggregate;
pub mod backup;
pub mod config;
pub mod device_status;
pub mod error;
pub mod ingest;
pub mod jobs;
pub mod models;
pub mod routes;
pub mod schema;
pub mod state;
pub mod store;
pub mod telemetry;

pub use config::Config;
pub use error::{ApiError, ApiResult, StoreError, TelemetryError};
pub use models::{ActuatorState, DataSource, NewReading, Reading};
pub use state::AppState;
