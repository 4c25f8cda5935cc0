// src/pipeline/mod.rs

pub mod broadcaster;
pub mod event_bus;
pub mod metrics;
pub mod road_worker;

pub use broadcaster::{Snapshot, StatusBroadcaster};
pub use event_bus::{EventBus, JunctionEvent, TransitionWatcher};
pub use metrics::JunctionMetrics;
pub use road_worker::RoadWorker;
