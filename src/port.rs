//! Narrow device interfaces used by the allocator and the driver
//!
//! Reads return `Result` so a failed transfer is never mistaken for a zero
//! reading. Implementations classify failures as
//! [`PvWallboxError::DeviceUnreachable`](crate::error::PvWallboxError) or
//! `Timeout` when the link is down, and `CommandRejected` when a single
//! request failed.

use crate::error::Result;
use crate::wallbox::ChargeRequestState;

/// Commands and reads addressed to one wallbox by slave id
#[async_trait::async_trait]
pub trait WallboxPort: Send {
    async fn get_charge_request_state(&mut self, id: u8) -> Result<ChargeRequestState>;

    /// Actual charge power summed over all phases
    async fn get_actual_charge_power_watts(&mut self, id: u8) -> Result<u32>;

    /// Command the maximum charge current; on error the device keeps its
    /// previous value
    async fn set_max_current(&mut self, id: u8, amps: f32) -> Result<()>;

    /// Enable or disable the low-power standby function
    async fn set_standby(&mut self, id: u8, enabled: bool) -> Result<()>;

    /// Current the device falls back to when bus communication stops
    async fn set_failsafe_max_current(&mut self, id: u8, amps: f32) -> Result<()>;
}

/// PV production and household consumption meter
#[async_trait::async_trait]
pub trait PvMeterPort: Send {
    async fn get_output_watts(&mut self) -> Result<u32>;

    async fn get_consumption_watts(&mut self) -> Result<u32>;
}

/// Raw register access on a Modbus bus
#[async_trait::async_trait]
pub trait RegisterBus: Send {
    async fn read_input_registers(
        &mut self,
        slave_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>>;

    async fn read_holding_registers(
        &mut self,
        slave_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>>;

    async fn write_single_register(&mut self, slave_id: u8, address: u16, value: u16)
    -> Result<()>;
}
