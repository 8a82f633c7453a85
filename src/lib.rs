//! # pvwallbox - PV surplus and grid charge controller
//!
//! Controls how much current a pool of Modbus wallboxes may draw, cycle by
//! cycle, either from an evenly split grid budget or from the photovoltaic
//! surplus measured by a SolarLog.
//!
//! ## Architecture
//!
//! - `clock`: Monotonic time source and hysteresis timers
//! - `wallbox`: Per-wallbox state record
//! - `port`: Device and register bus interfaces
//! - `modbus`: Modbus TCP transport with reconnection
//! - `heidelberg`: Heidelberg wallbox register map
//! - `solarlog`: SolarLog PV meter register map
//! - `allocator`: Grid and PV current allocation with hysteresis
//! - `units`: Power and current conversions
//! - `mode`: Grid/PV mode selection
//! - `telemetry`: Time-series persistence
//! - `driver`: Control cycle driver
//! - `config`: Configuration management and validation
//! - `logging`: Structured logging and tracing

pub mod allocator;
pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod heidelberg;
pub mod logging;
pub mod modbus;
pub mod mode;
pub mod port;
pub mod solarlog;
pub mod telemetry;
pub mod units;
pub mod wallbox;

// Re-export commonly used types
pub use allocator::{AllocationConfig, AllocationReport, ChargeAllocator};
pub use config::Config;
pub use driver::ChargeController;
pub use error::{PvWallboxError, Result};
pub use wallbox::{ChargeRequestState, WallboxState};
