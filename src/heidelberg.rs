//! Heidelberg Energy Control wallbox driver
//!
//! Implements [`WallboxPort`] on top of any [`RegisterBus`]. Currents are
//! exchanged in 0.1 A register units.

use crate::config::WallboxRegistersConfig;
use crate::error::Result;
use crate::logging::{StructuredLogger, get_logger};
use crate::modbus::decode_u16;
use crate::port::{RegisterBus, WallboxPort};
use crate::units::amps_to_device_units;
use crate::wallbox::{ChargeRequestState, StandbyMode};

pub struct HeidelbergWallbox<B: RegisterBus> {
    bus: B,
    registers: WallboxRegistersConfig,
    logger: StructuredLogger,
}

impl<B: RegisterBus> HeidelbergWallbox<B> {
    pub fn new(bus: B, registers: WallboxRegistersConfig) -> Self {
        Self {
            bus,
            registers,
            logger: get_logger("heidelberg"),
        }
    }

    /// Access the underlying bus
    pub fn bus(&self) -> &B {
        &self.bus
    }

    async fn write_current(&mut self, id: u8, address: u16, amps: f32) -> Result<()> {
        let value = amps_to_device_units(amps);
        self.logger
            .for_device(id)
            .debug(&format!("Writing {value} (x0.1 A) to register {address}"));
        self.bus.write_single_register(id, address, value).await
    }
}

#[async_trait::async_trait]
impl<B: RegisterBus> WallboxPort for HeidelbergWallbox<B> {
    async fn get_charge_request_state(&mut self, id: u8) -> Result<ChargeRequestState> {
        let regs = self
            .bus
            .read_input_registers(id, self.registers.charging_state, 1)
            .await?;
        ChargeRequestState::from_register(decode_u16(&regs)?)
    }

    async fn get_actual_charge_power_watts(&mut self, id: u8) -> Result<u32> {
        let regs = self
            .bus
            .read_input_registers(id, self.registers.actual_charge_power, 1)
            .await?;
        Ok(u32::from(decode_u16(&regs)?))
    }

    async fn set_max_current(&mut self, id: u8, amps: f32) -> Result<()> {
        let address = self.registers.max_current;
        self.write_current(id, address, amps).await
    }

    async fn set_standby(&mut self, id: u8, enabled: bool) -> Result<()> {
        let mode = if enabled {
            StandbyMode::Enabled
        } else {
            StandbyMode::Disabled
        };
        self.logger
            .for_device(id)
            .debug(&format!("Setting standby function {mode:?}"));
        self.bus
            .write_single_register(id, self.registers.standby_control, mode.register_value())
            .await
    }

    async fn set_failsafe_max_current(&mut self, id: u8, amps: f32) -> Result<()> {
        let address = self.registers.failsafe_max_current;
        self.write_current(id, address, amps).await
    }
}
