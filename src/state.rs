//! Shared application state handed to every route handler.

use std::sync::Arc;

use crate::actuators::ActuatorCache;
use crate::backup::BackupService;
use crate::store::PrimaryStore;
use crate::telemetry::ThingSpeakClient;

// ---

#[derive(Clone, Debug)]
pub struct AppState {
    pub store: Arc<PrimaryStore>,
    pub backup: Arc<BackupService>,
    pub telemetry: Arc<ThingSpeakClient>,
    pub actuators: Arc<ActuatorCache>,
}
