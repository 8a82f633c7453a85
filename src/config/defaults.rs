use super::*;

impl Default for Config {
    fn default() -> Self {
        Self {
            wallbox: WallboxBusConfig::default(),
            solarlog: SolarLogConfig::default(),
            allocation: AllocationSettings::default(),
            timing: TimingConfig::default(),
            mode: ModeConfig::default(),
            telemetry: TelemetryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WallboxBusConfig {
    fn default() -> Self {
        Self {
            ip: "192.168.1.110".to_string(),
            port: 502,
            device_ids: vec![1, 2],
            registers: WallboxRegistersConfig::default(),
        }
    }
}

impl Default for WallboxRegistersConfig {
    fn default() -> Self {
        Self {
            charging_state: 5,
            actual_charge_power: 14,
            standby_control: 258,
            max_current: 261,
            failsafe_max_current: 262,
        }
    }
}

impl Default for SolarLogConfig {
    fn default() -> Self {
        Self {
            ip: "192.168.1.120".to_string(),
            port: 502,
            slave_id: 1,
            output_register: 3502,
            consumption_register: 3518,
        }
    }
}

impl Default for AllocationSettings {
    fn default() -> Self {
        Self {
            min_current_amps: 6.0,
            max_current_per_device_amps: 16.0,
            system_max_current_amps: 16.0,
            tolerance_amps: 2.0,
            min_on_seconds: 300,
            min_off_seconds: 300,
            idle_hold_offset_amps: 1.0,
            reduce_available_current_by: 0.0,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            cycle_interval_ms: 5000,
            retry_delay_ms: 5000,
            keep_charge_current_stable_for_seconds: 20,
            connect_timeout_ms: 5000,
            operation_timeout_ms: 2000,
        }
    }
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            source: ModeSource::Pv,
            gpio_value_path: None,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            backend: TelemetryBackend::None,
            influx_host: "localhost".to_string(),
            influx_port: 8086,
            influx_user: String::new(),
            influx_password: String::new(),
            influx_database: "pv".to_string(),
            jsonl_path: "/tmp/pvwallbox_telemetry.jsonl".to_string(),
            wallbox_min_write_cycle_seconds: 300,
            solarlog_min_write_cycle_seconds: 300,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "/tmp/pvwallbox.log".to_string(),
            console_output: true,
            json_format: false,
            backup_count: 5,
        }
    }
}
