use crate::allocator::AllocationReport;
use crate::mode::ChargeMode;
use crate::telemetry::PvSample;

/// Main driver state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Applying the failsafe current
    Initializing,
    /// Control loop running
    Running,
    /// Releasing wallboxes before exit
    ShuttingDown,
}

/// Outcome of one control cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSummary {
    /// Funding mode used for this cycle
    pub mode: ChargeMode,
    /// PV meter reading taken this cycle
    pub pv: PvSample,
    /// Summed charge power of all requesting wallboxes
    pub ev_power_watts: u32,
    /// Budget handed to the allocator: the system maximum in grid mode,
    /// the stabilised PV surplus in PV mode
    pub available_amps: f32,
    /// Wallboxes whose request state could not be read this cycle
    pub unreachable_devices: Vec<u8>,
    /// Combined report of the deactivate and activate calls
    pub report: AllocationReport,
}
