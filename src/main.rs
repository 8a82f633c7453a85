use anyhow::{Context, Result};
use pvwallbox::clock::MonotonicClock;
use pvwallbox::config::Config;
use pvwallbox::driver::ChargeController;
use pvwallbox::heidelberg::HeidelbergWallbox;
use pvwallbox::modbus::{ModbusClient, ModbusConnectionManager};
use pvwallbox::solarlog::SolarLogMeter;
use pvwallbox::telemetry::TelemetryRecorder;
use std::time::Duration;
use tracing::{error, info};

/// Reconnect attempts per request before the error reaches the control loop
const MODBUS_RETRY_ATTEMPTS: u32 = 2;
const MODBUS_RETRY_DELAY: Duration = Duration::from_millis(250);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config = Config::load().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        e
    })?;
    config.validate().context("Invalid configuration")?;

    pvwallbox::logging::init_logging(&config.logging)?;

    info!(
        "pvwallbox {} starting with {} wallbox(es)",
        env!("APP_VERSION"),
        config.wallbox.device_ids.len()
    );

    let wallbox_bus = ModbusConnectionManager::new(
        ModbusClient::new(&config.wallbox.ip, config.wallbox.port, &config.timing),
        MODBUS_RETRY_ATTEMPTS,
        MODBUS_RETRY_DELAY,
    );
    let meter_bus = ModbusConnectionManager::new(
        ModbusClient::new(&config.solarlog.ip, config.solarlog.port, &config.timing),
        MODBUS_RETRY_ATTEMPTS,
        MODBUS_RETRY_DELAY,
    );

    let wallboxes = HeidelbergWallbox::new(wallbox_bus, config.wallbox.registers.clone());
    let meter = SolarLogMeter::new(meter_bus, &config.solarlog);
    let recorder = TelemetryRecorder::from_config(&config.telemetry)?;

    let mut controller = ChargeController::new(
        config,
        MonotonicClock,
        Box::new(wallboxes),
        Box::new(meter),
        recorder,
    );

    match controller.run().await {
        Ok(()) => {
            info!("Shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Controller failed with error: {}", e);
            Err(anyhow::anyhow!("Controller error: {}", e))
        }
    }
}
