use super::{ChargeController, CycleSummary};
use crate::allocator::AllocationReport;
use crate::clock::{Clock, CycleTimer};
use crate::error::{PvWallboxError, Result};
use crate::mode::ChargeMode;
use crate::telemetry::PvSample;
use crate::units::{pv_surplus_watts, watts_to_amps, watts_to_amps_rounded};
use crate::wallbox::WallboxState;

impl<C: Clock> ChargeController<C> {
    /// One pass of poll, decide, allocate
    pub async fn run_cycle(&mut self) -> Result<CycleSummary> {
        let unreachable_devices = self.poll_request_states().await;
        if !self.devices.is_empty() && unreachable_devices.len() == self.devices.len() {
            return Err(PvWallboxError::unreachable("No wallbox reachable"));
        }

        let pv = self.read_pv().await?;
        self.last_pv = Some(pv);
        let ev_power_watts = self.poll_charge_power(&unreachable_devices).await;

        let mode = self.mode.current_mode().await;
        if self.last_mode != Some(mode) {
            self.logger.info(&format!("Charging mode is now {mode}"));
            // Start the PV budget from a fresh reading after a mode change
            self.budget_timer = CycleTimer::new(self.budget_timer.interval());
            self.last_mode = Some(mode);
        }
        if mode == ChargeMode::Pv && self.budget_timer.check_and_trigger(self.allocator.clock()) {
            self.pv_budget_amps = self.pv_budget(pv, ev_power_watts);
        }

        // Unreachable wallboxes sit this cycle out with their state untouched
        let (mut reachable, parked): (Vec<_>, Vec<_>) = std::mem::take(&mut self.devices)
            .into_iter()
            .partition(|d| !unreachable_devices.contains(&d.id));
        let outcome = self.allocate(mode, &parked, &mut reachable).await;
        self.devices = self.restore_order(reachable, parked);
        let (available_amps, report) = outcome?;

        Ok(CycleSummary {
            mode,
            pv,
            ev_power_watts,
            available_amps,
            unreachable_devices,
            report,
        })
    }

    /// Run the allocator for `mode` over the reachable wallboxes.
    /// Returns the budget handed out and the combined report.
    async fn allocate(
        &mut self,
        mode: ChargeMode,
        parked: &[WallboxState],
        devices: &mut [WallboxState],
    ) -> Result<(f32, AllocationReport)> {
        match mode {
            ChargeMode::Grid => {
                let released = self
                    .allocator
                    .deactivate_pv_charge(self.wallboxes.as_mut(), devices)
                    .await?;
                let applied = self
                    .allocator
                    .activate_grid_charge(self.wallboxes.as_mut(), devices)
                    .await?;
                Ok((
                    self.config.allocation.system_max_current_amps,
                    released.merge(applied),
                ))
            }
            ChargeMode::Pv => {
                let released = self
                    .allocator
                    .deactivate_grid_charge(self.wallboxes.as_mut(), devices)
                    .await?;
                // A parked wallbox keeps drawing what it was last given
                let reserved: f32 = parked
                    .iter()
                    .filter(|d| d.pv_charge_active)
                    .map(|d| d.commanded_current_amps)
                    .sum();
                let available = (self.pv_budget_amps - reserved).max(0.0);
                let applied = self
                    .allocator
                    .activate_pv_charge(self.wallboxes.as_mut(), devices, available)
                    .await?;
                Ok((available, released.merge(applied)))
            }
        }
    }

    /// Merge parked wallboxes back in configuration order
    fn restore_order(
        &self,
        reachable: Vec<WallboxState>,
        parked: Vec<WallboxState>,
    ) -> Vec<WallboxState> {
        let ids = &self.config.wallbox.device_ids;
        let mut devices: Vec<WallboxState> = reachable.into_iter().chain(parked).collect();
        devices.sort_by_key(|d| ids.iter().position(|&id| id == d.id));
        devices
    }

    /// Surplus current for the allocator, after the configured safety margin
    fn pv_budget(&self, pv: PvSample, ev_power_watts: u32) -> f32 {
        let surplus = pv_surplus_watts(pv.output_watts, pv.consumption_watts, ev_power_watts);
        let amps = watts_to_amps_rounded(surplus as f32)
            - self.config.allocation.reduce_available_current_by;
        amps.max(0.0)
    }

    /// Refresh request states and disable standby where engaged.
    /// Returns the ids whose link is down; their previous state is kept.
    async fn poll_request_states(&mut self) -> Vec<u8> {
        let mut unreachable = Vec::new();

        for device in &mut self.devices {
            let log = self.logger.for_device(device.id);
            match self.wallboxes.get_charge_request_state(device.id).await {
                Ok(state) => {
                    if state != device.request_state {
                        log.info(&format!(
                            "Request state {} -> {}",
                            device.request_state, state
                        ));
                    }
                    device.request_state = state;
                }
                Err(e) => {
                    if e.is_connection_error() {
                        unreachable.push(device.id);
                    }
                    log.warn(&format!("Keeping previous request state: {e}"));
                    continue;
                }
            }

            if device.standby_active {
                match self.wallboxes.set_standby(device.id, false).await {
                    Ok(()) => {
                        device.standby_active = false;
                        log.info("Standby function disabled");
                    }
                    Err(e) => log.warn(&format!("Failed to disable standby: {e}")),
                }
            }
        }

        unreachable
    }

    async fn read_pv(&mut self) -> Result<PvSample> {
        let output_watts = self.meter.get_output_watts().await?;
        let consumption_watts = self.meter.get_consumption_watts().await?;
        Ok(PvSample {
            output_watts,
            consumption_watts,
        })
    }

    /// Read the draw of requesting wallboxes; returns the summed power
    async fn poll_charge_power(&mut self, unreachable: &[u8]) -> u32 {
        let mut total = 0u32;

        for device in &mut self.devices {
            if unreachable.contains(&device.id) {
                continue;
            }
            if !device.is_ready() {
                device.measured_current_amps = 0.0;
                continue;
            }
            match self
                .wallboxes
                .get_actual_charge_power_watts(device.id)
                .await
            {
                Ok(watts) => {
                    device.measured_current_amps = watts_to_amps(watts as f32);
                    total = total.saturating_add(watts);
                }
                Err(e) => self
                    .logger
                    .for_device(device.id)
                    .warn(&format!("Failed to read charge power: {e}")),
            }
        }

        total
    }
}
