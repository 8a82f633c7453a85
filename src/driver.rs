//! Control cycle driver
//!
//! The [`ChargeController`] owns the wallbox records and runs the control
//! loop: apply the failsafe current once, then every cycle poll the devices,
//! pick the funding mode, let the allocator apply currents and persist the
//! result. Cycles run strictly one after another.

use crate::allocator::ChargeAllocator;
use crate::clock::{Clock, CycleTimer};
use crate::config::Config;
use crate::error::Result;
use crate::logging::{StructuredLogger, get_logger};
use crate::mode::{ChargeMode, ModeSelector};
use crate::port::{PvMeterPort, WallboxPort};
use crate::telemetry::{PvSample, TelemetryRecorder};
use crate::units::amps_to_watts;
use crate::wallbox::WallboxState;
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, MissedTickBehavior, interval, sleep};

mod cycle;
mod types;

#[cfg(test)]
mod tests;

pub use types::{CycleSummary, DriverState};

/// Charge controller for a pool of wallboxes
pub struct ChargeController<C: Clock> {
    /// Configuration
    config: Config,

    /// One record per configured wallbox
    devices: Vec<WallboxState>,

    allocator: ChargeAllocator<C>,
    wallboxes: Box<dyn WallboxPort>,
    meter: Box<dyn PvMeterPort>,
    mode: ModeSelector,
    recorder: TelemetryRecorder,

    /// Limits how often the PV budget follows the meter
    budget_timer: CycleTimer,

    /// Stabilised PV budget in amps
    pv_budget_amps: f32,

    last_mode: Option<ChargeMode>,
    last_pv: Option<PvSample>,

    /// Current driver state
    state: watch::Sender<DriverState>,

    /// Shutdown signal
    shutdown_tx: mpsc::UnboundedSender<()>,

    /// Shutdown receiver
    shutdown_rx: mpsc::UnboundedReceiver<()>,

    /// Logger with context
    logger: StructuredLogger,
}

impl<C: Clock> ChargeController<C> {
    pub fn new(
        config: Config,
        clock: C,
        wallboxes: Box<dyn WallboxPort>,
        meter: Box<dyn PvMeterPort>,
        recorder: TelemetryRecorder,
    ) -> Self {
        let devices = config
            .wallbox
            .device_ids
            .iter()
            .map(|&id| WallboxState::new(id))
            .collect();
        let allocator = ChargeAllocator::new(config.allocation_config(), clock);
        let mode = ModeSelector::new(&config.mode);
        let budget_timer = CycleTimer::new(Duration::from_secs(
            config.timing.keep_charge_current_stable_for_seconds,
        ));
        let (state_tx, _) = watch::channel(DriverState::Initializing);
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();

        Self {
            config,
            devices,
            allocator,
            wallboxes,
            meter,
            mode,
            recorder,
            budget_timer,
            pv_budget_amps: 0.0,
            last_mode: None,
            last_pv: None,
            state: state_tx,
            shutdown_tx,
            shutdown_rx,
            logger: get_logger("driver"),
        }
    }

    /// Wallbox records in configuration order
    pub fn devices(&self) -> &[WallboxState] {
        &self.devices
    }

    /// Stabilised PV budget used in the last PV cycle
    pub fn pv_budget_amps(&self) -> f32 {
        self.pv_budget_amps
    }

    /// Watch the driver state
    pub fn subscribe_state(&self) -> watch::Receiver<DriverState> {
        self.state.subscribe()
    }

    /// Sender that stops [`run`](Self::run) after the current cycle
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<()> {
        self.shutdown_tx.clone()
    }

    /// Failsafe current per wallbox: an even split of the system maximum
    pub fn failsafe_current_amps(&self) -> f32 {
        let count = self.devices.len().max(1) as f32;
        (self.config.allocation.system_max_current_amps / count)
            .floor()
            .min(self.config.allocation.max_current_per_device_amps)
    }

    /// Write the failsafe current to every wallbox
    pub async fn apply_failsafe(&mut self) -> Result<()> {
        let amps = self.failsafe_current_amps();
        for device in &self.devices {
            self.wallboxes
                .set_failsafe_max_current(device.id, amps)
                .await?;
        }
        self.logger
            .info(&format!("Failsafe current of {amps} A applied to all wallboxes"));
        Ok(())
    }

    /// Apply the failsafe current, retrying until every wallbox accepted it
    pub async fn initialize_failsafe(&mut self) {
        let retry_delay = Duration::from_millis(self.config.timing.retry_delay_ms);
        loop {
            match self.apply_failsafe().await {
                Ok(()) => return,
                Err(e) => {
                    self.logger.warn(&format!(
                        "Failed to apply failsafe current, retrying in {retry_delay:?}: {e}"
                    ));
                    sleep(retry_delay).await;
                }
            }
        }
    }

    /// Persist PV and wallbox telemetry of the last cycle
    pub async fn persist(&mut self) {
        let clock = self.allocator.clock();
        if let Some(sample) = self.last_pv {
            self.recorder.record_pv(sample, clock).await;
        }
        let wallboxes = self.devices.iter().map(WallboxState::telemetry).collect();
        self.recorder.record_wallboxes(wallboxes, clock).await;
    }

    /// Release every charging wallbox
    pub async fn release_all(&mut self) -> Result<()> {
        let pv = self
            .allocator
            .deactivate_pv_charge(self.wallboxes.as_mut(), &mut self.devices)
            .await?;
        let grid = self
            .allocator
            .deactivate_grid_charge(self.wallboxes.as_mut(), &mut self.devices)
            .await?;
        let report = pv.merge(grid);
        if !report.rejected.is_empty() {
            self.logger.warn(&format!(
                "Wallboxes {:?} refused to be released",
                report.rejected
            ));
        }
        Ok(())
    }

    /// Run the driver main loop until Ctrl-C or a shutdown request
    pub async fn run(&mut self) -> Result<()> {
        self.logger.info("Starting charge controller");
        self.state.send_replace(DriverState::Initializing);

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        tokio::select! {
            () = self.initialize_failsafe() => {}
            _ = &mut ctrl_c => {
                self.logger.info("Interrupted during initialization");
                return Ok(());
            }
        }

        self.state.send_replace(DriverState::Running);

        let retry_delay = Duration::from_millis(self.config.timing.retry_delay_ms);
        let mut cycle_interval =
            interval(Duration::from_millis(self.config.timing.cycle_interval_ms));
        cycle_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cycle_interval.tick() => {
                    match self.run_cycle().await {
                        Ok(summary) => self.log_summary(&summary),
                        Err(e) if e.is_connection_error() => {
                            self.logger.error(&format!("Cycle abandoned, retrying in {retry_delay:?}: {e}"));
                            // Wait through the interval so shutdown stays responsive
                            cycle_interval.reset_after(retry_delay);
                        }
                        Err(e) => {
                            // Continue with the next cycle even on errors
                            self.logger.error(&format!("Cycle failed: {e}"));
                        }
                    }
                    self.persist().await;
                }
                _ = &mut ctrl_c => {
                    self.logger.info("Ctrl-C received");
                    break;
                }
                _ = self.shutdown_rx.recv() => {
                    self.logger.info("Shutdown signal received");
                    break;
                }
            }
        }

        self.state.send_replace(DriverState::ShuttingDown);
        if let Err(e) = self.release_all().await {
            self.logger
                .error(&format!("Failed to release wallboxes on shutdown: {e}"));
        }
        self.persist().await;
        self.logger.info("Charge controller stopped");
        Ok(())
    }

    fn log_summary(&self, summary: &CycleSummary) {
        for t in &summary.report.transitions {
            self.logger.for_device(t.device_id).info(&format!(
                "{:?} at {} A ({} mode)",
                t.kind, t.current_amps, summary.mode
            ));
        }
        self.logger.debug(&format!(
            "Cycle done: mode={}, pv_output={} W, consumption={} W, ev_power={} W, available={} A ({} W), remaining={} A",
            summary.mode,
            summary.pv.output_watts,
            summary.pv.consumption_watts,
            summary.ev_power_watts,
            summary.available_amps,
            amps_to_watts(summary.available_amps),
            summary.report.remaining_budget_amps
        ));
    }
}
