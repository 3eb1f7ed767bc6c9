pub mod api;
pub mod config;
pub mod derive;
pub mod devices;
pub mod error;
pub mod overview;
pub mod scheduler;
pub mod sink;
pub mod snapshot;

// Re-export commonly used items
pub use config::Settings;
pub use devices::{Category, Device, DeviceRegistry};
pub use error::{AppError, Result};
pub use scheduler::Scheduler;
pub use sink::{MetricSink, PrometheusSink};
pub use snapshot::{SharedSnapshot, Snapshot};
