//! Grid/PV mode selection
//!
//! The mode comes either from configuration or from a hardware switch read
//! through its sysfs GPIO value file. Anything unreadable selects PV mode so
//! the installation never draws from the grid unintentionally.

use crate::config::{ModeConfig, ModeSource};
use crate::logging::{StructuredLogger, get_logger};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How charging is funded in the current cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargeMode {
    Pv,
    Grid,
}

impl std::fmt::Display for ChargeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pv => f.write_str("pv"),
            Self::Grid => f.write_str("grid"),
        }
    }
}

pub struct ModeSelector {
    source: ModeSource,
    gpio_value_path: Option<PathBuf>,
    logger: StructuredLogger,
}

impl ModeSelector {
    pub fn new(config: &ModeConfig) -> Self {
        Self {
            source: config.source,
            gpio_value_path: config.gpio_value_path.as_ref().map(PathBuf::from),
            logger: get_logger("mode"),
        }
    }

    /// Mode for the next cycle
    pub async fn current_mode(&self) -> ChargeMode {
        match self.source {
            ModeSource::Pv => ChargeMode::Pv,
            ModeSource::Grid => ChargeMode::Grid,
            ModeSource::Gpio => self.read_switch().await,
        }
    }

    async fn read_switch(&self) -> ChargeMode {
        let Some(path) = &self.gpio_value_path else {
            self.logger
                .warn("No GPIO value path configured, using PV mode");
            return ChargeMode::Pv;
        };
        match tokio::fs::read_to_string(path).await {
            Ok(value) => match value.trim() {
                "1" => ChargeMode::Pv,
                "0" => ChargeMode::Grid,
                other => {
                    self.logger.warn(&format!(
                        "Unexpected GPIO value '{other}', using PV mode"
                    ));
                    ChargeMode::Pv
                }
            },
            Err(e) => {
                self.logger.warn(&format!(
                    "Failed to read mode switch {}: {e}, using PV mode",
                    path.display()
                ));
                ChargeMode::Pv
            }
        }
    }
}
