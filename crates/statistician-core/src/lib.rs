pub mod collector;
pub mod config;
mod poller;
pub mod registry;
pub mod sim;
pub mod snapshot;

pub use collector::{CollectorError, StatisticsCollector};
pub use config::{CollectorConfig, ErrorTextPolicy, UnavailablePolicy};
pub use registry::{ControlPort, DeviceClass, NodeValue, ParameterRegistry, RegistryError, Scope};
pub use sim::SimulatedDevice;
pub use snapshot::{RawCounters, SessionEnd, SessionReport, Snapshot, NO_ERROR, UNSET_COUNT, UNSET_TEXT};

#[cfg(test)]
mod collector_tests;
