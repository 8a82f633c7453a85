//! Charge current allocation
//!
//! The allocator decides which wallbox gets how much current and writes the
//! result through a [`WallboxPort`]. Two funding modes exist:
//!
//! * **Grid**: the system maximum is split evenly across every wallbox that
//!   requests charge. No hysteresis applies.
//! * **PV**: a surplus budget is handed out greedily in ascending id order.
//!   Switching a wallbox on or off is gated by minimum on/off dwell times so
//!   contactors do not chatter when the surplus hovers around the minimum
//!   charge current.
//!
//! Device state is only changed after the corresponding command succeeded.
//! A refused command leaves the device untouched and is listed in the
//! [`AllocationReport`]; a lost link aborts the call with the error.

use crate::clock::Clock;
use crate::error::{PvWallboxError, Result};
use crate::logging::{StructuredLogger, get_logger};
use crate::port::WallboxPort;
use crate::units::floor_to_tenths;
use crate::wallbox::WallboxState;
use std::time::Instant;


/// Current limits and hysteresis windows
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocationConfig {
    pub min_current_amps: f32,
    pub max_current_per_device_amps: f32,
    pub system_max_current_amps: f32,
    pub tolerance_amps: f32,
    pub min_on_seconds: u64,
    pub min_off_seconds: u64,
    pub idle_hold_offset_amps: f32,
}

impl AllocationConfig {
    /// Smallest budget that still counts as enough to charge one wallbox
    pub fn activation_threshold_amps(&self) -> f32 {
        self.min_current_amps - self.tolerance_amps
    }

    /// Current written to a wallbox released from PV charging
    pub fn idle_hold_amps(&self) -> f32 {
        self.min_current_amps - self.idle_hold_offset_amps
    }
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            min_current_amps: 6.0,
            max_current_per_device_amps: 16.0,
            system_max_current_amps: 16.0,
            tolerance_amps: 2.0,
            min_on_seconds: 300,
            min_off_seconds: 300,
            idle_hold_offset_amps: 1.0,
        }
    }
}

/// Kind of mode flag change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    PvActivated,
    /// Released because the budget no longer covers the minimum
    PvDeactivated,
    /// Released immediately because the vehicle stopped requesting
    PvWithdrawn,
    GridActivated,
    GridDeactivated,
}

/// A mode flag change of one wallbox
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub device_id: u8,
    pub kind: TransitionKind,
    /// Current commanded together with the change
    pub current_amps: f32,
}

/// Outcome of one allocator call
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AllocationReport {
    pub transitions: Vec<Transition>,
    /// Wallboxes whose command was refused and which were left unchanged
    pub rejected: Vec<u8>,
    /// Budget left after the call; negative when wallboxes are held at the
    /// minimum during their on-window
    pub remaining_budget_amps: f32,
}

impl AllocationReport {
    fn with_budget(budget: f32) -> Self {
        Self {
            remaining_budget_amps: budget,
            ..Self::default()
        }
    }

    pub fn has_transitions(&self) -> bool {
        !self.transitions.is_empty()
    }

    /// Append the outcome of a later call; its budget becomes the remaining one
    pub fn merge(mut self, later: AllocationReport) -> Self {
        self.transitions.extend(later.transitions);
        self.rejected.extend(later.rejected);
        self.remaining_budget_amps = later.remaining_budget_amps;
        self
    }

    fn push(&mut self, device_id: u8, kind: TransitionKind, current_amps: f32) {
        self.transitions.push(Transition {
            device_id,
            kind,
            current_amps,
        });
    }
}

/// Priority- and hysteresis-aware current allocator
pub struct ChargeAllocator<C: Clock> {
    config: AllocationConfig,
    clock: C,
    logger: StructuredLogger,
}

impl<C: Clock> ChargeAllocator<C> {
    pub fn new(config: AllocationConfig, clock: C) -> Self {
        Self {
            config,
            clock,
            logger: get_logger("allocator"),
        }
    }

    pub fn config(&self) -> &AllocationConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Whether a wallbox released from PV charging may be switched on again
    pub fn is_pv_activation_allowed(&self, device: &WallboxState) -> bool {
        self.clock
            .has_elapsed(device.last_deactivated_at, self.config.min_off_seconds)
    }

    /// Whether a PV charging wallbox may be released for lack of budget
    pub fn is_pv_deactivation_allowed(&self, device: &WallboxState) -> bool {
        self.clock
            .has_elapsed(device.last_activated_at, self.config.min_on_seconds)
    }

    /// Split the system maximum evenly across all requesting wallboxes
    ///
    /// Wallboxes without a request are commanded 0. When no wallbox requests
    /// charge nothing is written at all.
    pub async fn activate_grid_charge(
        &self,
        port: &mut dyn WallboxPort,
        devices: &mut [WallboxState],
    ) -> Result<AllocationReport> {
        let ready = devices.iter().filter(|d| d.is_ready()).count();
        if ready == 0 {
            self.logger.debug("No wallbox requests charge, grid allocation skipped");
            return Ok(AllocationReport::with_budget(
                self.config.system_max_current_amps,
            ));
        }

        let share = (self.config.system_max_current_amps / ready as f32)
            .floor()
            .min(self.config.max_current_per_device_amps);
        let now = self.clock.now();
        let mut report = AllocationReport::with_budget(self.config.system_max_current_amps);

        for idx in priority_order(devices) {
            let device = &mut devices[idx];
            let log = self.logger.for_device(device.id);

            if device.pv_charge_active {
                log.warn("Still PV charging, skipped for grid allocation");
                continue;
            }

            let target = if device.is_ready() { share } else { 0.0 };
            if let Err(e) = port.set_max_current(device.id, target).await {
                self.record_failure(&mut report, device.id, e)?;
                if device.grid_charge_active {
                    report.remaining_budget_amps -= device.commanded_current_amps;
                }
                continue;
            }
            device.commanded_current_amps = target;
            report.remaining_budget_amps -= target;

            if device.is_ready() && !device.grid_charge_active {
                device.grid_charge_active = true;
                device.grid_activated_at = Some(now);
                log.info(&format!("Grid charging started at {target} A"));
                report.push(device.id, TransitionKind::GridActivated, target);
            } else if !device.is_ready() && device.grid_charge_active {
                device.grid_charge_active = false;
                device.grid_deactivated_at = Some(now);
                log.info("Grid charging stopped, no request");
                report.push(device.id, TransitionKind::GridDeactivated, target);
            }
        }

        Ok(report)
    }

    /// Hand out a PV surplus of `available_amps` in priority order
    ///
    /// Pass 1 serves wallboxes already charging from PV, pass 2 switches on
    /// further requesting wallboxes while the budget covers the activation
    /// threshold.
    pub async fn activate_pv_charge(
        &self,
        port: &mut dyn WallboxPort,
        devices: &mut [WallboxState],
        available_amps: f32,
    ) -> Result<AllocationReport> {
        let now = self.clock.now();
        let order = priority_order(devices);
        let mut report = AllocationReport::with_budget(available_amps);

        for &idx in &order {
            if devices[idx].pv_charge_active {
                self.serve_active_pv(port, &mut devices[idx], &mut report, now)
                    .await?;
            }
        }

        let threshold = self.config.activation_threshold_amps();
        for &idx in &order {
            let device = &mut devices[idx];
            if device.pv_charge_active || !device.is_ready() {
                continue;
            }
            if report.remaining_budget_amps < threshold {
                break;
            }
            let log = self.logger.for_device(device.id);
            if device.grid_charge_active {
                log.warn("Still grid charging, skipped for PV allocation");
                continue;
            }
            if !self.is_pv_activation_allowed(device) {
                log.debug("PV activation held back, minimum off time not elapsed");
                continue;
            }

            let target = floor_to_tenths(report.remaining_budget_amps)
                .min(self.config.max_current_per_device_amps)
                .max(self.config.min_current_amps);
            if let Err(e) = port.set_max_current(device.id, target).await {
                self.record_failure(&mut report, device.id, e)?;
                continue;
            }
            device.commanded_current_amps = target;
            device.pv_charge_active = true;
            device.last_activated_at = Some(now);
            report.remaining_budget_amps -= target;
            log.info(&format!("PV charging started at {target} A"));
            report.push(device.id, TransitionKind::PvActivated, target);
        }

        Ok(report)
    }

    /// Pass 1 step for one wallbox that is PV charging
    async fn serve_active_pv(
        &self,
        port: &mut dyn WallboxPort,
        device: &mut WallboxState,
        report: &mut AllocationReport,
        now: Instant,
    ) -> Result<()> {
        let log = self.logger.for_device(device.id);

        if !device.is_ready() {
            if let Err(e) = port.set_max_current(device.id, 0.0).await {
                return self.record_failure(report, device.id, e);
            }
            device.commanded_current_amps = 0.0;
            device.pv_charge_active = false;
            device.last_deactivated_at = Some(now);
            log.info("PV charging stopped, request withdrawn");
            report.push(device.id, TransitionKind::PvWithdrawn, 0.0);
            return Ok(());
        }

        let candidate =
            floor_to_tenths(report.remaining_budget_amps).min(self.config.max_current_per_device_amps);

        let (target, release) = if candidate >= self.config.activation_threshold_amps() {
            (candidate.max(self.config.min_current_amps), false)
        } else if self.is_pv_deactivation_allowed(device) {
            (self.config.idle_hold_amps(), true)
        } else {
            log.debug("PV budget too low, held at minimum until minimum on time elapsed");
            (self.config.min_current_amps, false)
        };

        if let Err(e) = port.set_max_current(device.id, target).await {
            self.record_failure(report, device.id, e)?;
            // Still drawing what it was last given
            report.remaining_budget_amps -= device.commanded_current_amps;
            return Ok(());
        }
        device.commanded_current_amps = target;

        if release {
            device.pv_charge_active = false;
            device.last_deactivated_at = Some(now);
            log.info(&format!("PV charging stopped, held at {target} A"));
            report.push(device.id, TransitionKind::PvDeactivated, target);
        } else {
            report.remaining_budget_amps -= target;
            log.debug(&format!("PV charging continues at {target} A"));
        }
        Ok(())
    }

    /// Release every grid charging wallbox
    pub async fn deactivate_grid_charge(
        &self,
        port: &mut dyn WallboxPort,
        devices: &mut [WallboxState],
    ) -> Result<AllocationReport> {
        let now = self.clock.now();
        let mut report = AllocationReport::default();

        for idx in priority_order(devices) {
            let device = &mut devices[idx];
            if !device.grid_charge_active {
                continue;
            }
            if let Err(e) = port.set_max_current(device.id, 0.0).await {
                self.record_failure(&mut report, device.id, e)?;
                continue;
            }
            device.commanded_current_amps = 0.0;
            device.grid_charge_active = false;
            device.grid_deactivated_at = Some(now);
            self.logger
                .for_device(device.id)
                .info("Grid charging stopped");
            report.push(device.id, TransitionKind::GridDeactivated, 0.0);
        }

        Ok(report)
    }

    /// Release every PV charging wallbox regardless of the minimum on time
    pub async fn deactivate_pv_charge(
        &self,
        port: &mut dyn WallboxPort,
        devices: &mut [WallboxState],
    ) -> Result<AllocationReport> {
        let now = self.clock.now();
        let mut report = AllocationReport::default();

        for idx in priority_order(devices) {
            let device = &mut devices[idx];
            if !device.pv_charge_active {
                continue;
            }
            if let Err(e) = port.set_max_current(device.id, 0.0).await {
                self.record_failure(&mut report, device.id, e)?;
                continue;
            }
            device.commanded_current_amps = 0.0;
            device.pv_charge_active = false;
            device.last_deactivated_at = Some(now);
            self.logger.for_device(device.id).info("PV charging stopped");
            report.push(device.id, TransitionKind::PvDeactivated, 0.0);
        }

        Ok(report)
    }

    /// Note a refused command, or propagate a link failure
    fn record_failure(
        &self,
        report: &mut AllocationReport,
        device_id: u8,
        error: PvWallboxError,
    ) -> Result<()> {
        if error.is_connection_error() {
            return Err(error);
        }
        self.logger
            .for_device(device_id)
            .warn(&format!("Command failed, state left unchanged: {error}"));
        report.rejected.push(device_id);
        Ok(())
    }
}

/// Device indices sorted by ascending id
fn priority_order(devices: &[WallboxState]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..devices.len()).collect();
    order.sort_by_key(|&i| devices[i].id);
    order
}
