use super::*;
use crate::clock::ManualClock;
use crate::config::ModeSource;
use crate::error::PvWallboxError;
use crate::telemetry::TelemetrySink;
use crate::wallbox::{ChargeRequestState, WallboxTelemetry};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Current(u8, f32),
    Standby(u8, bool),
    Failsafe(u8, f32),
}

#[derive(Default)]
struct Bus {
    states: HashMap<u8, ChargeRequestState>,
    power: HashMap<u8, u32>,
    unreachable: HashSet<u8>,
    failsafe_failures: u32,
    commands: Vec<Command>,
}

#[derive(Clone, Default)]
struct SharedPort(Arc<Mutex<Bus>>);

impl SharedPort {
    fn currents(&self) -> Vec<(u8, f32)> {
        self.0
            .lock()
            .unwrap()
            .commands
            .iter()
            .filter_map(|c| match c {
                Command::Current(id, amps) => Some((*id, *amps)),
                _ => None,
            })
            .collect()
    }

    fn set_state(&self, id: u8, state: ChargeRequestState) {
        self.0.lock().unwrap().states.insert(id, state);
    }
}

#[async_trait::async_trait]
impl WallboxPort for SharedPort {
    async fn get_charge_request_state(&mut self, id: u8) -> Result<ChargeRequestState> {
        let bus = self.0.lock().unwrap();
        if bus.unreachable.contains(&id) {
            return Err(PvWallboxError::timeout("no response"));
        }
        bus.states
            .get(&id)
            .copied()
            .ok_or_else(|| PvWallboxError::rejected("unsupported charging state"))
    }

    async fn get_actual_charge_power_watts(&mut self, id: u8) -> Result<u32> {
        let bus = self.0.lock().unwrap();
        if bus.unreachable.contains(&id) {
            return Err(PvWallboxError::timeout("no response"));
        }
        Ok(bus.power.get(&id).copied().unwrap_or(0))
    }

    async fn set_max_current(&mut self, id: u8, amps: f32) -> Result<()> {
        let mut bus = self.0.lock().unwrap();
        if bus.unreachable.contains(&id) {
            return Err(PvWallboxError::timeout("no response"));
        }
        bus.commands.push(Command::Current(id, amps));
        Ok(())
    }

    async fn set_standby(&mut self, id: u8, enabled: bool) -> Result<()> {
        self.0
            .lock()
            .unwrap()
            .commands
            .push(Command::Standby(id, enabled));
        Ok(())
    }

    async fn set_failsafe_max_current(&mut self, id: u8, amps: f32) -> Result<()> {
        let mut bus = self.0.lock().unwrap();
        if bus.failsafe_failures > 0 {
            bus.failsafe_failures -= 1;
            return Err(PvWallboxError::unreachable("gateway booting"));
        }
        bus.commands.push(Command::Failsafe(id, amps));
        Ok(())
    }
}

#[derive(Clone, Default)]
struct SharedMeter(Arc<Mutex<Option<PvSample>>>);

impl SharedMeter {
    fn set(&self, output_watts: u32, consumption_watts: u32) {
        *self.0.lock().unwrap() = Some(PvSample {
            output_watts,
            consumption_watts,
        });
    }

    fn sample(&self) -> Result<PvSample> {
        self.0
            .lock()
            .unwrap()
            .ok_or_else(|| PvWallboxError::unreachable("SolarLog offline"))
    }
}

#[async_trait::async_trait]
impl PvMeterPort for SharedMeter {
    async fn get_output_watts(&mut self) -> Result<u32> {
        Ok(self.sample()?.output_watts)
    }

    async fn get_consumption_watts(&mut self) -> Result<u32> {
        Ok(self.sample()?.consumption_watts)
    }
}

#[derive(Default)]
struct Written {
    pv: Vec<PvSample>,
    wallboxes: Vec<Vec<WallboxTelemetry>>,
}

#[derive(Clone, Default)]
struct RecordingSink(Arc<Mutex<Written>>);

#[async_trait::async_trait]
impl TelemetrySink for RecordingSink {
    async fn write_pv(&mut self, sample: &PvSample) -> Result<()> {
        self.0.lock().unwrap().pv.push(*sample);
        Ok(())
    }

    async fn write_wallboxes(&mut self, wallboxes: &[WallboxTelemetry]) -> Result<()> {
        self.0.lock().unwrap().wallboxes.push(wallboxes.to_vec());
        Ok(())
    }
}

struct Harness {
    controller: ChargeController<ManualClock>,
    clock: ManualClock,
    port: SharedPort,
    meter: SharedMeter,
    sink: RecordingSink,
}

fn harness(mut config: Config) -> Harness {
    config.timing.retry_delay_ms = 1;
    config.timing.cycle_interval_ms = 10;
    let clock = ManualClock::new();
    let port = SharedPort::default();
    let meter = SharedMeter::default();
    let sink = RecordingSink::default();
    for id in &config.wallbox.device_ids {
        port.set_state(*id, ChargeRequestState::PlugWithRequest);
    }
    meter.set(0, 0);
    let recorder = TelemetryRecorder::new(
        Box::new(sink.clone()),
        Duration::from_secs(300),
        Duration::from_secs(300),
    );
    let controller = ChargeController::new(
        config,
        clock.clone(),
        Box::new(port.clone()),
        Box::new(meter.clone()),
        recorder,
    );
    Harness {
        controller,
        clock,
        port,
        meter,
        sink,
    }
}

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-3
}

#[tokio::test]
async fn failsafe_is_retried_until_applied() {
    let mut h = harness(Config::default());
    h.port.0.lock().unwrap().failsafe_failures = 2;

    h.controller.initialize_failsafe().await;

    let commands = h.port.0.lock().unwrap().commands.clone();
    assert_eq!(
        commands,
        vec![Command::Failsafe(1, 8.0), Command::Failsafe(2, 8.0)]
    );
}

#[tokio::test]
async fn pv_cycle_serves_lowest_id_first() {
    let mut h = harness(Config::default());
    h.port.0.lock().unwrap().power.insert(1, 2070);
    // 1000 W household plus the 2070 W the first wallbox already draws
    h.meter.set(8280, 3070);

    let summary = h.controller.run_cycle().await.unwrap();

    assert_eq!(summary.mode, ChargeMode::Pv);
    assert_eq!(summary.ev_power_watts, 2070);
    assert!(approx(summary.available_amps, 10.5));
    assert_eq!(h.port.currents(), vec![(1, 10.5)]);

    let devices = h.controller.devices();
    assert!(devices[0].pv_charge_active);
    assert!(!devices[1].pv_charge_active);
    assert!(approx(devices[0].measured_current_amps, 3.0));
    assert!(devices.iter().all(|d| !d.standby_active));

    let commands = h.port.0.lock().unwrap().commands.clone();
    assert!(commands.contains(&Command::Standby(1, false)));
    assert!(commands.contains(&Command::Standby(2, false)));
}

#[tokio::test]
async fn grid_cycle_splits_evenly() {
    let mut config = Config::default();
    config.mode.source = ModeSource::Grid;
    let mut h = harness(config);

    let summary = h.controller.run_cycle().await.unwrap();

    assert_eq!(summary.mode, ChargeMode::Grid);
    assert_eq!(h.port.currents(), vec![(1, 8.0), (2, 8.0)]);
    assert!(h.controller.devices().iter().all(|d| d.grid_charge_active));
}

#[tokio::test]
async fn pv_budget_follows_meter_only_after_window() {
    let mut h = harness(Config::default());
    h.meter.set(8280, 0);
    h.controller.run_cycle().await.unwrap();
    assert!(approx(h.controller.pv_budget_amps(), 12.0));

    h.meter.set(11040, 0);
    h.controller.run_cycle().await.unwrap();
    assert!(approx(h.controller.pv_budget_amps(), 12.0));

    h.clock.advance_secs(20);
    h.controller.run_cycle().await.unwrap();
    assert!(approx(h.controller.pv_budget_amps(), 16.0));
}

#[tokio::test]
async fn safety_margin_reduces_budget() {
    let mut config = Config::default();
    config.allocation.reduce_available_current_by = 2.0;
    let mut h = harness(config);
    h.meter.set(8280, 0);

    let summary = h.controller.run_cycle().await.unwrap();
    assert!(approx(summary.available_amps, 10.0));
}

#[tokio::test]
async fn unreachable_meter_abandons_cycle() {
    let mut h = harness(Config::default());
    *h.meter.0.lock().unwrap() = None;

    let err = h.controller.run_cycle().await.unwrap_err();
    assert!(err.is_connection_error());
    assert!(h.port.currents().is_empty());
}

#[tokio::test]
async fn all_wallboxes_unreachable_abandons_cycle() {
    let mut h = harness(Config::default());
    h.port.0.lock().unwrap().unreachable.extend([1, 2]);
    h.meter.set(11040, 0);

    let err = h.controller.run_cycle().await.unwrap_err();
    assert!(matches!(err, PvWallboxError::DeviceUnreachable { .. }));
    assert!(h.port.currents().is_empty());
}

#[tokio::test]
async fn unreadable_state_keeps_previous_state() {
    let mut h = harness(Config::default());
    h.meter.set(11040, 0);
    h.controller.run_cycle().await.unwrap();
    assert!(h.controller.devices()[0].pv_charge_active);

    // Register now reports an unsupported value
    h.port.0.lock().unwrap().states.remove(&1);
    let summary = h.controller.run_cycle().await.unwrap();
    assert!(summary.unreachable_devices.is_empty());
    assert_eq!(
        h.controller.devices()[0].request_state,
        ChargeRequestState::PlugWithRequest
    );
    assert!(h.controller.devices()[0].pv_charge_active);
}

#[tokio::test]
async fn switching_to_pv_releases_grid_charging() {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), "0").unwrap();
    let mut config = Config::default();
    config.mode.source = ModeSource::Gpio;
    config.mode.gpio_value_path = Some(file.path().to_string_lossy().into_owned());
    let mut h = harness(config);
    h.meter.set(8280, 0);

    h.controller.run_cycle().await.unwrap();
    assert!(h.controller.devices().iter().all(|d| d.grid_charge_active));

    std::fs::write(file.path(), "1").unwrap();
    let summary = h.controller.run_cycle().await.unwrap();
    assert_eq!(summary.mode, ChargeMode::Pv);
    let devices = h.controller.devices();
    assert!(devices.iter().all(|d| !d.grid_charge_active));
    assert!(devices[0].pv_charge_active);
    assert!(approx(devices[0].commanded_current_amps, 12.0));
    assert!(devices[1].grid_deactivated_at.is_some());
}

#[tokio::test]
async fn persist_writes_only_changes_or_after_cycle() {
    let mut h = harness(Config::default());
    h.meter.set(5000, 1000);
    h.controller.run_cycle().await.unwrap();

    h.controller.persist().await;
    h.controller.persist().await;
    {
        let written = h.sink.0.lock().unwrap();
        assert_eq!(written.pv.len(), 1);
        assert_eq!(written.wallboxes.len(), 1);
    }

    h.meter.set(5100, 1000);
    h.controller.run_cycle().await.unwrap();
    h.controller.persist().await;
    {
        let written = h.sink.0.lock().unwrap();
        assert_eq!(written.pv.len(), 2);
        assert_eq!(written.wallboxes.len(), 1);
    }

    h.clock.advance_secs(300);
    h.controller.persist().await;
    let written = h.sink.0.lock().unwrap();
    assert_eq!(written.pv.len(), 3);
    assert_eq!(written.wallboxes.len(), 2);
}

#[tokio::test]
async fn shutdown_releases_wallboxes() {
    let mut h = harness(Config::default());
    h.meter.set(11040, 0);
    h.controller.run_cycle().await.unwrap();
    assert!(h.controller.devices()[0].pv_charge_active);

    let state = h.controller.subscribe_state();
    h.controller.shutdown_handle().send(()).unwrap();
    h.controller.run().await.unwrap();

    assert_eq!(*state.borrow(), DriverState::ShuttingDown);
    assert!(h.controller.devices().iter().all(|d| !d.pv_charge_active));
    assert_eq!(h.port.currents().last(), Some(&(1, 0.0)));
}

#[tokio::test]
async fn grid_cycle_serves_reachable_wallboxes_when_one_is_offline() {
    let mut config = Config::default();
    config.mode.source = ModeSource::Grid;
    let mut h = harness(config);
    h.port.0.lock().unwrap().unreachable.insert(1);

    for _ in 0..3 {
        let summary = h.controller.run_cycle().await.unwrap();
        assert_eq!(summary.unreachable_devices, vec![1]);
    }

    // The whole system budget goes to the only reachable requester
    assert_eq!(h.port.currents(), vec![(2, 16.0); 3]);
    let devices = h.controller.devices();
    assert_eq!(devices[0].id, 1);
    assert!(!devices[0].grid_charge_active);
    assert!(devices[0].standby_active);
    assert!(devices[1].grid_charge_active);
}

#[tokio::test]
async fn pv_cycle_serves_reachable_wallboxes_when_one_is_offline() {
    let mut h = harness(Config::default());
    h.port.0.lock().unwrap().unreachable.insert(1);
    h.meter.set(11040, 0);

    let summary = h.controller.run_cycle().await.unwrap();

    assert_eq!(summary.unreachable_devices, vec![1]);
    assert_eq!(h.port.currents(), vec![(2, 16.0)]);
    let devices = h.controller.devices();
    assert!(!devices[0].pv_charge_active);
    assert!(devices[1].pv_charge_active);
}

#[tokio::test]
async fn offline_pv_wallbox_keeps_its_share_of_the_budget() {
    let mut h = harness(Config::default());
    h.meter.set(11040, 0);
    h.controller.run_cycle().await.unwrap();
    assert_eq!(h.port.currents(), vec![(1, 16.0)]);

    h.port.0.lock().unwrap().unreachable.insert(1);
    let summary = h.controller.run_cycle().await.unwrap();

    assert!(approx(summary.available_amps, 0.0));
    assert_eq!(h.port.currents(), vec![(1, 16.0)]);
    let devices = h.controller.devices();
    assert!(devices[0].pv_charge_active);
    assert!(approx(devices[0].commanded_current_amps, 16.0));
    assert!(!devices[1].pv_charge_active);
}

#[tokio::test]
async fn shutdown_is_not_delayed_by_cycle_retry() {
    let mut h = harness(Config::default());
    h.controller.config.timing.retry_delay_ms = 60_000;
    *h.meter.0.lock().unwrap() = None;

    let shutdown = h.controller.shutdown_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = shutdown.send(());
    });

    tokio::time::timeout(Duration::from_secs(5), h.controller.run())
        .await
        .expect("shutdown waited for the retry delay")
        .unwrap();
    assert!(h.port.currents().is_empty());
}
