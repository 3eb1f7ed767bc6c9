pub mod handlers;
pub mod routes;

use crate::devices::DeviceRegistry;
use crate::overview::Overview;
use crate::snapshot::SharedSnapshot;
use std::sync::Arc;

pub use routes::create_router;

/// Read-only view handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub snapshot: SharedSnapshot,
    pub registry: Arc<DeviceRegistry>,
    pub overview: Arc<Overview>,
}

impl AppState {
    pub fn new(snapshot: SharedSnapshot, registry: Arc<DeviceRegistry>, overview: Overview) -> Self {
        Self {
            snapshot,
            registry,
            overview: Arc::new(overview),
        }
    }
}
