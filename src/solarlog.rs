//! SolarLog PV meter over Modbus TCP

use crate::config::SolarLogConfig;
use crate::error::Result;
use crate::modbus::decode_u32_low_word_first;
use crate::port::{PvMeterPort, RegisterBus};

/// Reads total AC output and consumption, each a 32-bit value in watts
pub struct SolarLogMeter<B: RegisterBus> {
    bus: B,
    slave_id: u8,
    output_register: u16,
    consumption_register: u16,
}

impl<B: RegisterBus> SolarLogMeter<B> {
    pub fn new(bus: B, config: &SolarLogConfig) -> Self {
        Self {
            bus,
            slave_id: config.slave_id,
            output_register: config.output_register,
            consumption_register: config.consumption_register,
        }
    }

    async fn read_u32(&mut self, address: u16) -> Result<u32> {
        let regs = self
            .bus
            .read_input_registers(self.slave_id, address, 2)
            .await?;
        decode_u32_low_word_first(&regs)
    }
}

#[async_trait::async_trait]
impl<B: RegisterBus> PvMeterPort for SolarLogMeter<B> {
    async fn get_output_watts(&mut self) -> Result<u32> {
        self.read_u32(self.output_register).await
    }

    async fn get_consumption_watts(&mut self) -> Result<u32> {
        self.read_u32(self.consumption_register).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PvWallboxError;

    struct FixedBus {
        registers: Vec<(u16, [u16; 2])>,
    }

    #[async_trait::async_trait]
    impl RegisterBus for FixedBus {
        async fn read_input_registers(
            &mut self,
            _slave_id: u8,
            address: u16,
            _count: u16,
        ) -> Result<Vec<u16>> {
            self.registers
                .iter()
                .find(|(a, _)| *a == address)
                .map(|(_, words)| words.to_vec())
                .ok_or_else(|| PvWallboxError::unreachable("no response"))
        }

        async fn read_holding_registers(
            &mut self,
            slave_id: u8,
            address: u16,
            count: u16,
        ) -> Result<Vec<u16>> {
            self.read_input_registers(slave_id, address, count).await
        }

        async fn write_single_register(&mut self, _: u8, _: u16, _: u16) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn reads_low_word_first() {
        let bus = FixedBus {
            registers: vec![(3502, [0x86A0, 0x0001]), (3518, [1500, 0])],
        };
        let mut meter = SolarLogMeter::new(bus, &SolarLogConfig::default());
        assert_eq!(meter.get_output_watts().await.unwrap(), 100_000);
        assert_eq!(meter.get_consumption_watts().await.unwrap(), 1500);
    }

    #[tokio::test]
    async fn propagates_link_failures() {
        let bus = FixedBus { registers: vec![] };
        let mut meter = SolarLogMeter::new(bus, &SolarLogConfig::default());
        let err = meter.get_output_watts().await.unwrap_err();
        assert!(err.is_connection_error());
    }
}
