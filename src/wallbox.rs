//! Per-wallbox state record
//!
//! One [`WallboxState`] exists per configured device for the whole lifetime of
//! the service. The driver refreshes the observed fields every cycle and the
//! allocator owns the mode flags, commanded current and transition timestamps.

use crate::error::{PvWallboxError, Result};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Physical plug/request state of a wallbox
///
/// The hardware reports two variants per category (A1/A2, B1/B2, C1/C2)
/// which carry the same meaning for allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeRequestState {
    /// A1/A2: no vehicle plugged
    NoPlug,
    /// B1/B2: vehicle plugged, no charging request
    PlugNoRequest,
    /// C1/C2: vehicle plugged and requesting charge
    PlugWithRequest,
}

impl ChargeRequestState {
    /// Decode the Heidelberg charging state register
    pub fn from_register(value: u16) -> Result<Self> {
        match value {
            2 | 3 => Ok(Self::NoPlug),
            4 | 5 => Ok(Self::PlugNoRequest),
            6 | 7 => Ok(Self::PlugWithRequest),
            other => Err(PvWallboxError::rejected(format!(
                "Unsupported charging state register value {other}"
            ))),
        }
    }

    /// Whether the device is asking for current
    pub fn is_ready(self) -> bool {
        matches!(self, Self::PlugWithRequest)
    }

    /// Numeric code used in telemetry (A=0, B=1, C=2)
    pub fn code(self) -> u8 {
        match self {
            Self::NoPlug => 0,
            Self::PlugNoRequest => 1,
            Self::PlugWithRequest => 2,
        }
    }
}

impl std::fmt::Display for ChargeRequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NoPlug => "no_plug",
            Self::PlugNoRequest => "plug_no_request",
            Self::PlugWithRequest => "plug_with_request",
        };
        f.write_str(s)
    }
}

/// Standby function setting of a wallbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StandbyMode {
    /// Device may enter its low-power standby
    Enabled,
    /// Standby disabled; the device stays responsive
    Disabled,
}

impl StandbyMode {
    /// Value written to the standby control register
    pub fn register_value(self) -> u16 {
        match self {
            Self::Enabled => 0,
            Self::Disabled => 4,
        }
    }
}

/// Mutable record of one wallbox
#[derive(Debug, Clone)]
pub struct WallboxState {
    /// Modbus slave id; lower ids are serviced first
    pub id: u8,
    pub request_state: ChargeRequestState,
    pub standby_active: bool,
    pub pv_charge_active: bool,
    pub grid_charge_active: bool,
    /// Last value successfully written to the max current register
    pub commanded_current_amps: f32,
    /// Last read-back draw, informational only
    pub measured_current_amps: f32,
    pub last_activated_at: Option<Instant>,
    pub last_deactivated_at: Option<Instant>,
    pub grid_activated_at: Option<Instant>,
    pub grid_deactivated_at: Option<Instant>,
}

impl WallboxState {
    /// Fresh record as the device comes out of the box: unplugged,
    /// standby engaged, nothing commanded
    pub fn new(id: u8) -> Self {
        Self {
            id,
            request_state: ChargeRequestState::NoPlug,
            standby_active: true,
            pv_charge_active: false,
            grid_charge_active: false,
            commanded_current_amps: 0.0,
            measured_current_amps: 0.0,
            last_activated_at: None,
            last_deactivated_at: None,
            grid_activated_at: None,
            grid_deactivated_at: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.request_state.is_ready()
    }

    /// Snapshot of the persisted fields
    pub fn telemetry(&self) -> WallboxTelemetry {
        WallboxTelemetry {
            id: self.id,
            request_state: self.request_state,
            pv_charge_active: self.pv_charge_active,
            grid_charge_active: self.grid_charge_active,
            commanded_current_amps: self.commanded_current_amps,
            measured_current_amps: self.measured_current_amps,
        }
    }
}

/// Equality covers what is persisted; id, standby and timestamps are ignored
impl PartialEq for WallboxState {
    fn eq(&self, other: &Self) -> bool {
        self.request_state == other.request_state
            && self.pv_charge_active == other.pv_charge_active
            && self.grid_charge_active == other.grid_charge_active
            && self.commanded_current_amps == other.commanded_current_amps
            && self.measured_current_amps == other.measured_current_amps
    }
}

/// Persisted view of a wallbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WallboxTelemetry {
    pub id: u8,
    pub request_state: ChargeRequestState,
    pub pv_charge_active: bool,
    pub grid_charge_active: bool,
    pub commanded_current_amps: f32,
    pub measured_current_amps: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_state_variants_collapse() {
        assert_eq!(
            ChargeRequestState::from_register(2).unwrap(),
            ChargeRequestState::NoPlug
        );
        assert_eq!(
            ChargeRequestState::from_register(5).unwrap(),
            ChargeRequestState::PlugNoRequest
        );
        assert_eq!(
            ChargeRequestState::from_register(6).unwrap(),
            ChargeRequestState::PlugWithRequest
        );
        assert_eq!(
            ChargeRequestState::from_register(7).unwrap(),
            ChargeRequestState::PlugWithRequest
        );
    }

    #[test]
    fn unknown_charge_state_is_rejected() {
        for raw in [0, 1, 8, 9, 10, 11, 0xFFFF] {
            assert!(ChargeRequestState::from_register(raw).is_err());
        }
    }

    #[test]
    fn equality_ignores_id_standby_and_timestamps() {
        let mut a = WallboxState::new(1);
        let mut b = WallboxState::new(2);
        b.standby_active = false;
        b.last_activated_at = Some(Instant::now());
        assert_eq!(a, b);

        a.commanded_current_amps = 6.0;
        assert_ne!(a, b);
        b.commanded_current_amps = 6.0;
        b.pv_charge_active = true;
        assert_ne!(a, b);
    }

    #[test]
    fn standby_register_values() {
        assert_eq!(StandbyMode::Enabled.register_value(), 0);
        assert_eq!(StandbyMode::Disabled.register_value(), 4);
    }
}
