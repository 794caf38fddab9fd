//! GateCheck core
//!
//! Attendance verification for events: a server-side ledger and
//! verification endpoint, and the scanning-device runtime that captures
//! codes, dispatches them online and replays them after outages.

pub mod config;
pub mod core_device;
pub mod core_ledger;
pub mod core_verify;
pub mod logging;
pub mod metrics;
pub mod shutdown;
pub mod storage;

pub use config::{Config, ConfigError};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogLevel};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
