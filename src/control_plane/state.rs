//! Shared axum state. The composition root builds one of these, handing
//! the same `Arc<EventBus>` it gave to `Orchestrator::new` so the SSE
//! gateway and the call engine publish/replay against a single bus.

use std::sync::Arc;

use crate::config::ControlPlaneConfig;
use crate::delivery::DeliveryEngine;
use crate::event_bus::EventBus;
use crate::orchestrator::Orchestrator;
use crate::persistence::Persistence;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub persistence: Persistence,
    pub event_bus: Arc<EventBus>,
    pub delivery: Arc<DeliveryEngine>,
    pub control_plane: ControlPlaneConfig,
}
