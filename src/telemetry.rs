//! Time-series persistence of PV and wallbox readings
//!
//! A [`TelemetryRecorder`] sits in front of a [`TelemetrySink`] and only
//! forwards records that changed since the last successful write, plus a
//! periodic keep-alive write so dashboards do not show gaps while nothing
//! changes. PV and wallbox records are tracked independently.

use crate::clock::{Clock, CycleTimer};
use crate::config::{TelemetryBackend, TelemetryConfig};
use crate::error::{PvWallboxError, Result};
use crate::logging::{StructuredLogger, get_logger};
use crate::wallbox::WallboxTelemetry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// One PV meter reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PvSample {
    pub output_watts: u32,
    pub consumption_watts: u32,
}

/// Destination of telemetry records
#[async_trait::async_trait]
pub trait TelemetrySink: Send {
    async fn write_pv(&mut self, sample: &PvSample) -> Result<()>;

    async fn write_wallboxes(&mut self, wallboxes: &[WallboxTelemetry]) -> Result<()>;
}

/// Influx line for a PV sample
pub fn pv_line(sample: &PvSample) -> String {
    format!(
        "solarlog,sensor=solarlog1 pv_output={}i,consumption={}i",
        sample.output_watts, sample.consumption_watts
    )
}

/// Influx line for one wallbox
pub fn wallbox_line(wallbox: &WallboxTelemetry) -> String {
    format!(
        "wallbox,sensor=wallbox{} charge_state={}i,pv_charge_active={},grid_charge_active={},max_current_active={},actual_current_active={}",
        wallbox.id,
        wallbox.request_state.code(),
        wallbox.pv_charge_active,
        wallbox.grid_charge_active,
        wallbox.commanded_current_amps,
        wallbox.measured_current_amps
    )
}

/// Discards everything
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait::async_trait]
impl TelemetrySink for NullSink {
    async fn write_pv(&mut self, _sample: &PvSample) -> Result<()> {
        Ok(())
    }

    async fn write_wallboxes(&mut self, _wallboxes: &[WallboxTelemetry]) -> Result<()> {
        Ok(())
    }
}

#[derive(Serialize)]
struct JsonRecord<'a, T: Serialize> {
    timestamp: DateTime<Utc>,
    measurement: &'a str,
    #[serde(flatten)]
    fields: &'a T,
}

/// Appends one JSON object per record to a file
pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    async fn append(&self, lines: String) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                PvWallboxError::persistence(format!(
                    "Failed to open {}: {e}",
                    self.path.display()
                ))
            })?;
        file.write_all(lines.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    fn line<T: Serialize>(measurement: &str, fields: &T) -> Result<String> {
        let record = JsonRecord {
            timestamp: Utc::now(),
            measurement,
            fields,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        Ok(line)
    }
}

#[async_trait::async_trait]
impl TelemetrySink for JsonLinesSink {
    async fn write_pv(&mut self, sample: &PvSample) -> Result<()> {
        let line = Self::line("solarlog", sample)?;
        self.append(line).await
    }

    async fn write_wallboxes(&mut self, wallboxes: &[WallboxTelemetry]) -> Result<()> {
        let mut lines = String::new();
        for wallbox in wallboxes {
            lines.push_str(&Self::line("wallbox", wallbox)?);
        }
        self.append(lines).await
    }
}

/// InfluxDB 1.x HTTP writer
#[cfg(feature = "influx")]
pub struct InfluxSink {
    client: reqwest::Client,
    write_url: String,
    credentials: Option<(String, String)>,
}

#[cfg(feature = "influx")]
impl InfluxSink {
    pub fn new(config: &TelemetryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PvWallboxError::network(format!("Failed to build HTTP client: {e}")))?;
        let credentials = if config.influx_user.is_empty() {
            None
        } else {
            Some((config.influx_user.clone(), config.influx_password.clone()))
        };
        Ok(Self {
            client,
            write_url: format!(
                "http://{}:{}/write?db={}",
                config.influx_host, config.influx_port, config.influx_database
            ),
            credentials,
        })
    }

    async fn post(&self, body: String) -> Result<()> {
        let mut request = self
            .client
            .post(&self.write_url)
            .body(body);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, Some(password));
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(PvWallboxError::persistence(format!(
                "InfluxDB write failed with status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(feature = "influx")]
#[async_trait::async_trait]
impl TelemetrySink for InfluxSink {
    async fn write_pv(&mut self, sample: &PvSample) -> Result<()> {
        self.post(pv_line(sample)).await
    }

    async fn write_wallboxes(&mut self, wallboxes: &[WallboxTelemetry]) -> Result<()> {
        if wallboxes.is_empty() {
            return Ok(());
        }
        let body = wallboxes
            .iter()
            .map(wallbox_line)
            .collect::<Vec<_>>()
            .join("\n");
        self.post(body).await
    }
}

/// Create the sink selected in the configuration
pub fn build_sink(config: &TelemetryConfig) -> Result<Box<dyn TelemetrySink>> {
    match config.backend {
        TelemetryBackend::None => Ok(Box::new(NullSink)),
        TelemetryBackend::Jsonl => Ok(Box::new(JsonLinesSink::new(&config.jsonl_path))),
        #[cfg(feature = "influx")]
        TelemetryBackend::Influx => Ok(Box::new(InfluxSink::new(config)?)),
        #[cfg(not(feature = "influx"))]
        TelemetryBackend::Influx => Err(PvWallboxError::config(
            "telemetry.backend is influx but the influx feature is disabled",
        )),
    }
}

/// Write-if-changed front end of a sink
pub struct TelemetryRecorder {
    sink: Box<dyn TelemetrySink>,
    pv_timer: CycleTimer,
    wallbox_timer: CycleTimer,
    last_pv: Option<PvSample>,
    last_wallboxes: Option<Vec<WallboxTelemetry>>,
    logger: StructuredLogger,
}

impl TelemetryRecorder {
    pub fn new(
        sink: Box<dyn TelemetrySink>,
        pv_min_write_cycle: Duration,
        wallbox_min_write_cycle: Duration,
    ) -> Self {
        Self {
            sink,
            pv_timer: CycleTimer::new(pv_min_write_cycle),
            wallbox_timer: CycleTimer::new(wallbox_min_write_cycle),
            last_pv: None,
            last_wallboxes: None,
            logger: get_logger("telemetry"),
        }
    }

    pub fn from_config(config: &TelemetryConfig) -> Result<Self> {
        Ok(Self::new(
            build_sink(config)?,
            Duration::from_secs(config.solarlog_min_write_cycle_seconds),
            Duration::from_secs(config.wallbox_min_write_cycle_seconds),
        ))
    }

    /// Persist a PV sample if it changed or the write cycle elapsed.
    /// Returns whether a record was written.
    pub async fn record_pv(&mut self, sample: PvSample, clock: &dyn Clock) -> bool {
        if self.last_pv == Some(sample) && !self.pv_timer.is_due(clock) {
            return false;
        }
        match self.sink.write_pv(&sample).await {
            Ok(()) => {
                self.last_pv = Some(sample);
                self.pv_timer.trigger(clock);
                true
            }
            Err(e) => {
                self.logger
                    .warn(&format!("Failed to persist PV sample: {e}"));
                false
            }
        }
    }

    /// Persist wallbox records if any changed or the write cycle elapsed.
    /// Returns whether records were written.
    pub async fn record_wallboxes(
        &mut self,
        wallboxes: Vec<WallboxTelemetry>,
        clock: &dyn Clock,
    ) -> bool {
        if self.last_wallboxes.as_ref() == Some(&wallboxes) && !self.wallbox_timer.is_due(clock) {
            return false;
        }
        match self.sink.write_wallboxes(&wallboxes).await {
            Ok(()) => {
                self.last_wallboxes = Some(wallboxes);
                self.wallbox_timer.trigger(clock);
                true
            }
            Err(e) => {
                self.logger
                    .warn(&format!("Failed to persist wallbox telemetry: {e}"));
                false
            }
        }
    }
}
