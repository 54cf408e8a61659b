//! GPU inventory via `nvidia-smi`.
//!
//! [`GpuInventory`] runs the device-telemetry tool and parses its CSV
//! output into per-device [`GpuTelemetry`] rows.
//!
//! Querying **fails soft**: if the tool is missing, exits non-zero, times
//! out, or prints something unparsable, [`GpuInventory::query`] logs a
//! warning and returns an empty [`Inventory`] instead of an error. The
//! engine treats that as zero capacity.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};

/// Upper bound on a single telemetry query.
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Fields requested from `nvidia-smi`. `name` goes last because it is
/// the only one that could contain a comma.
const QUERY_FIELDS: &str = "index,utilization.gpu,temperature.gpu,power.draw,name";

/// Point-in-time metrics for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuTelemetry {
    pub index: u32,
    pub name: Option<String>,
    /// Percent.
    pub utilization: Option<u32>,
    /// Degrees Celsius.
    pub temperature: Option<u32>,
    /// Watts. Not all devices report power draw.
    pub power: Option<f64>,
}

/// Result of one inventory query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    pub devices: Vec<GpuTelemetry>,
    /// Number of attached devices; sizes the GPU pool at startup.
    pub attached: usize,
}

impl Inventory {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse `--format=csv,noheader,nounits` output for [`QUERY_FIELDS`].
    pub fn parse_csv(output: &str) -> Result<Self> {
        let mut devices = Vec::new();
        for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
            devices.push(parse_row(line)?);
        }
        Ok(Self {
            attached: devices.len(),
            devices,
        })
    }
}

fn parse_row(line: &str) -> Result<GpuTelemetry> {
    let fields: Vec<&str> = line.splitn(5, ',').map(str::trim).collect();
    if fields.len() < 4 {
        return Err(Error::Telemetry(format!("malformed row: {:?}", line)));
    }
    let index = fields[0]
        .parse()
        .map_err(|_| Error::Telemetry(format!("bad device index in row: {:?}", line)))?;

    Ok(GpuTelemetry {
        index,
        utilization: metric(fields[1]),
        temperature: metric(fields[2]),
        power: metric(fields[3]),
        name: fields
            .get(4)
            .filter(|n| !n.is_empty())
            .map(|n| n.to_string()),
    })
}

/// `[N/A]`, `[Not Supported]` and friends become `None`.
fn metric<T: std::str::FromStr>(raw: &str) -> Option<T> {
    raw.parse().ok()
}

/// Runs the telemetry tool.
#[derive(Debug, Clone)]
pub struct GpuInventory {
    command: String,
    timeout: Duration,
}

impl GpuInventory {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: QUERY_TIMEOUT,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.effective_telemetry_command()).with_timeout(config.telemetry_timeout())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Query the devices, returning an empty inventory on any failure.
    pub async fn query(&self) -> Inventory {
        match self.try_query().await {
            Ok(inventory) => {
                debug!(attached = inventory.attached, "GPU inventory queried");
                inventory
            }
            Err(e) => {
                warn!(command = %self.command, error = %e, "GPU inventory unavailable");
                Inventory::empty()
            }
        }
    }

    /// Query the devices, surfacing the failure.
    pub async fn try_query(&self) -> Result<Inventory> {
        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.command)
                .arg(format!("--query-gpu={}", QUERY_FIELDS))
                .arg("--format=csv,noheader,nounits")
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| Error::Timeout(self.timeout))?
        .map_err(|e| Error::Spawn {
            binary: self.command.clone(),
            source: e,
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Telemetry(format!(
                "exit {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        Inventory::parse_csv(&String::from_utf8_lossy(&output.stdout))
    }
}
