//! Configuration management for pvwallbox
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files. Every section has defaults so a partial file
//! only needs to override what differs from the installation defaults.

use crate::allocator::AllocationConfig;
use crate::error::{PvWallboxError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

mod defaults;

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "PVWALLBOX_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Wallbox bus connection and device list
    pub wallbox: WallboxBusConfig,

    /// SolarLog PV meter connection
    pub solarlog: SolarLogConfig,

    /// Current limits and hysteresis for the allocator
    pub allocation: AllocationSettings,

    /// Loop cadence, retry and timeout settings
    pub timing: TimingConfig,

    /// Grid/PV mode selection
    pub mode: ModeConfig,

    /// Time-series persistence
    pub telemetry: TelemetryConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Wallbox bus parameters (Modbus RTU bus behind a TCP gateway)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WallboxBusConfig {
    /// IP address of the Modbus gateway
    pub ip: String,

    /// TCP port (typically 502)
    pub port: u16,

    /// Slave ids of the wallboxes; the id is also the priority (lower first)
    pub device_ids: Vec<u8>,

    /// Register address mappings
    pub registers: WallboxRegistersConfig,
}

/// Heidelberg wallbox register addresses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WallboxRegistersConfig {
    /// Input register: charging state (A1..C2)
    pub charging_state: u16,

    /// Input register: actual charge power L1+L2+L3 in VA
    pub actual_charge_power: u16,

    /// Holding register: standby function control
    pub standby_control: u16,

    /// Holding register: maximal current command in 0.1 A
    pub max_current: u16,

    /// Holding register: failsafe current in 0.1 A
    pub failsafe_max_current: u16,
}

/// SolarLog Modbus TCP parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolarLogConfig {
    /// IP address of the SolarLog
    pub ip: String,

    /// TCP port
    pub port: u16,

    /// Modbus unit id
    pub slave_id: u8,

    /// Input register pair: total AC output (W)
    pub output_register: u16,

    /// Input register pair: total AC consumption (W)
    pub consumption_register: u16,
}

/// Current limits and hysteresis
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationSettings {
    /// Lowest current a wallbox accepts while charging
    pub min_current_amps: f32,

    /// Highest current a single wallbox may be commanded
    pub max_current_per_device_amps: f32,

    /// Aggregate limit of the installation, split evenly in grid mode
    pub system_max_current_amps: f32,

    /// Shortfall below the minimum still accepted as "enough" PV power
    pub tolerance_amps: f32,

    /// Minimum PV charge duration before switching off
    pub min_on_seconds: u64,

    /// Minimum pause after a PV switch-off before switching on again
    pub min_off_seconds: u64,

    /// Released wallboxes are held at `min_current_amps - idle_hold_offset_amps`
    pub idle_hold_offset_amps: f32,

    /// Safety margin subtracted from the PV budget every cycle
    pub reduce_available_current_by: f32,
}

/// Loop cadence, retries and timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Pause between two control cycles
    pub cycle_interval_ms: u64,

    /// Pause before retrying after a communication failure
    pub retry_delay_ms: u64,

    /// PV budget is recomputed at most this often
    pub keep_charge_current_stable_for_seconds: u64,

    /// Modbus connect timeout
    pub connect_timeout_ms: u64,

    /// Modbus per-request timeout
    pub operation_timeout_ms: u64,
}

/// Where the grid/PV decision comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeSource {
    /// Always charge from PV surplus only
    Pv,
    /// Always charge from the grid
    Grid,
    /// Read a hardware switch through sysfs GPIO
    Gpio,
}

/// Grid/PV mode selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeConfig {
    /// Mode source
    pub source: ModeSource,

    /// sysfs value file of the switch GPIO, e.g. `/sys/class/gpio/gpio17/value`
    pub gpio_value_path: Option<String>,
}

/// Telemetry backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryBackend {
    /// Telemetry disabled
    None,
    /// InfluxDB 1.x HTTP line protocol
    Influx,
    /// JSON lines appended to a local file
    Jsonl,
}

/// Time-series persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Backend
    pub backend: TelemetryBackend,

    /// InfluxDB host
    pub influx_host: String,

    /// InfluxDB HTTP port
    pub influx_port: u16,

    /// InfluxDB user (empty for none)
    pub influx_user: String,

    /// InfluxDB password
    pub influx_password: String,

    /// InfluxDB database name
    pub influx_database: String,

    /// Output file for the jsonl backend
    pub jsonl_path: String,

    /// Wallbox records are written at least this often even if unchanged
    pub wallbox_min_write_cycle_seconds: u64,

    /// PV records are written at least this often even if unchanged
    pub solarlog_min_write_cycle_seconds: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Path to log file (its directory receives the rotated files)
    pub file: String,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,

    /// Number of rotated files to keep
    pub backup_count: u32,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from `PVWALLBOX_CONFIG` or the default locations
    pub fn load() -> Result<Self> {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return Self::from_file(path);
        }

        let default_paths = [
            "pvwallbox_config.yaml",
            "/data/pvwallbox_config.yaml",
            "/etc/pvwallbox/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Allocation parameters handed to the charge allocator
    pub fn allocation_config(&self) -> AllocationConfig {
        AllocationConfig {
            min_current_amps: self.allocation.min_current_amps,
            max_current_per_device_amps: self.allocation.max_current_per_device_amps,
            system_max_current_amps: self.allocation.system_max_current_amps,
            tolerance_amps: self.allocation.tolerance_amps,
            min_on_seconds: self.allocation.min_on_seconds,
            min_off_seconds: self.allocation.min_off_seconds,
            idle_hold_offset_amps: self.allocation.idle_hold_offset_amps,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.wallbox.ip.is_empty() {
            return Err(PvWallboxError::validation(
                "wallbox.ip",
                "IP address cannot be empty",
            ));
        }
        if self.wallbox.port == 0 {
            return Err(PvWallboxError::validation(
                "wallbox.port",
                "Port must be greater than 0",
            ));
        }
        if self.wallbox.device_ids.is_empty() {
            return Err(PvWallboxError::validation(
                "wallbox.device_ids",
                "At least one wallbox is required",
            ));
        }
        let mut seen = HashSet::new();
        for id in &self.wallbox.device_ids {
            if *id == 0 {
                return Err(PvWallboxError::validation(
                    "wallbox.device_ids",
                    "Slave id 0 is the broadcast address",
                ));
            }
            if !seen.insert(*id) {
                return Err(PvWallboxError::validation(
                    "wallbox.device_ids",
                    format!("Duplicate slave id {id}"),
                ));
            }
        }

        if self.solarlog.ip.is_empty() {
            return Err(PvWallboxError::validation(
                "solarlog.ip",
                "IP address cannot be empty",
            ));
        }
        if self.solarlog.port == 0 {
            return Err(PvWallboxError::validation(
                "solarlog.port",
                "Port must be greater than 0",
            ));
        }

        let c = &self.allocation;
        let currents = [
            ("allocation.min_current_amps", c.min_current_amps),
            ("allocation.max_current_per_device_amps", c.max_current_per_device_amps),
            ("allocation.system_max_current_amps", c.system_max_current_amps),
            ("allocation.tolerance_amps", c.tolerance_amps),
            ("allocation.idle_hold_offset_amps", c.idle_hold_offset_amps),
            ("allocation.reduce_available_current_by", c.reduce_available_current_by),
        ];
        if let Some((field, _)) = currents.iter().find(|(_, v)| !v.is_finite()) {
            return Err(PvWallboxError::validation(*field, "Must be a finite number"));
        }
        if c.min_current_amps <= 0.0 {
            return Err(PvWallboxError::validation(
                "allocation.min_current_amps",
                "Must be positive",
            ));
        }
        if c.max_current_per_device_amps < c.min_current_amps {
            return Err(PvWallboxError::validation(
                "allocation.max_current_per_device_amps",
                "Must not be below min_current_amps",
            ));
        }
        if c.system_max_current_amps < c.min_current_amps {
            return Err(PvWallboxError::validation(
                "allocation.system_max_current_amps",
                "Must not be below min_current_amps",
            ));
        }
        if c.tolerance_amps < 0.0 || c.tolerance_amps >= c.min_current_amps {
            return Err(PvWallboxError::validation(
                "allocation.tolerance_amps",
                "Must be within [0, min_current_amps)",
            ));
        }
        if c.idle_hold_offset_amps <= 0.0 || c.idle_hold_offset_amps >= c.min_current_amps {
            return Err(PvWallboxError::validation(
                "allocation.idle_hold_offset_amps",
                "Must be within (0, min_current_amps)",
            ));
        }
        if c.reduce_available_current_by < 0.0 {
            return Err(PvWallboxError::validation(
                "allocation.reduce_available_current_by",
                "Must not be negative",
            ));
        }

        if self.timing.cycle_interval_ms == 0 {
            return Err(PvWallboxError::validation(
                "timing.cycle_interval_ms",
                "Must be greater than 0",
            ));
        }
        if self.timing.retry_delay_ms == 0 {
            return Err(PvWallboxError::validation(
                "timing.retry_delay_ms",
                "Must be greater than 0",
            ));
        }

        if self.mode.source == ModeSource::Gpio
            && self
                .mode
                .gpio_value_path
                .as_deref()
                .is_none_or(str::is_empty)
        {
            return Err(PvWallboxError::validation(
                "mode.gpio_value_path",
                "Required when mode.source is gpio",
            ));
        }

        match self.telemetry.backend {
            TelemetryBackend::Influx if self.telemetry.influx_host.is_empty() => {
                return Err(PvWallboxError::validation(
                    "telemetry.influx_host",
                    "Required for the influx backend",
                ));
            }
            TelemetryBackend::Jsonl if self.telemetry.jsonl_path.is_empty() => {
                return Err(PvWallboxError::validation(
                    "telemetry.jsonl_path",
                    "Required for the jsonl backend",
                ));
            }
            _ => {}
        }

        Ok(())
    }
}
