//! Sources backed by kernel pseudo-files.
//!
//! The environmental sensor is read through the Linux IIO subsystem (the
//! `bme280`/`bme680` kernel drivers expose their channels under
//! `/sys/bus/iio/devices/iio:deviceN`), and the CPU temperature through the
//! thermal zone or the Raspberry Pi firmware's `vcgencmd`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::ports::{AuxiliaryError, AuxiliarySource, SensorError, SensorSample, SensorSource};

pub const DEFAULT_THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

const TEMPERATURE_CHANNEL: &str = "in_temp_input";
const PRESSURE_CHANNEL: &str = "in_pressure_input";
const HUMIDITY_CHANNEL: &str = "in_humidityrelative_input";

/// Environmental sensor exposed by an IIO kernel driver.
///
/// Temperature is mandatory. Pressure and humidity are reported only when
/// the device has those channels.
#[derive(Debug, Clone)]
pub struct IioSensor {
    device_dir: PathBuf,
}

impl IioSensor {
    pub fn new(device_dir: impl Into<PathBuf>) -> Self {
        IioSensor {
            device_dir: device_dir.into(),
        }
    }

    async fn channel(&self, name: &str) -> Result<Option<f64>, SensorError> {
        let raw = match tokio::fs::read_to_string(self.device_dir.join(name)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SensorError::Io {
                    channel: name.to_string(),
                    source,
                })
            }
        };

        // `parse` accepts "nan" and "inf", which would serialize as null
        match raw.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(Some(value)),
            _ => Err(SensorError::InvalidData {
                channel: name.to_string(),
                value: raw.trim().to_string(),
            }),
        }
    }
}

impl SensorSource for IioSensor {
    #[tracing::instrument(skip(self), fields(device = %self.device_dir.display()))]
    async fn read(&mut self) -> Result<SensorSample, SensorError> {
        // millidegrees Celsius
        let temperature = self.channel(TEMPERATURE_CHANNEL).await?.ok_or_else(|| {
            SensorError::Unavailable(format!(
                "{} has no {TEMPERATURE_CHANNEL}",
                self.device_dir.display()
            ))
        })? / 1000.0;
        // kilopascal to hectopascal
        let pressure = self.channel(PRESSURE_CHANNEL).await?.map(|kpa| kpa * 10.0);
        // milli-percent
        let humidity = self.channel(HUMIDITY_CHANNEL).await?.map(|m| m / 1000.0);

        Ok(SensorSample {
            temperature,
            pressure,
            humidity,
        })
    }
}

/// CPU temperature from a thermal zone file, in millidegrees.
#[derive(Debug, Clone)]
pub struct ThermalZone {
    path: PathBuf,
}

impl ThermalZone {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ThermalZone { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for ThermalZone {
    fn default() -> Self {
        ThermalZone::new(DEFAULT_THERMAL_ZONE)
    }
}

impl AuxiliarySource for ThermalZone {
    async fn read_reference_temperature(&mut self) -> Result<f64, AuxiliaryError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let millidegrees = parse_finite(raw.trim())?;

        Ok(millidegrees / 1000.0)
    }
}

/// CPU temperature from `vcgencmd measure_temp`.
#[derive(Debug, Clone)]
pub struct Vcgencmd {
    program: String,
}

impl Vcgencmd {
    pub fn new() -> Self {
        Vcgencmd {
            program: "vcgencmd".to_string(),
        }
    }
}

impl Default for Vcgencmd {
    fn default() -> Self {
        Vcgencmd::new()
    }
}

impl AuxiliarySource for Vcgencmd {
    async fn read_reference_temperature(&mut self) -> Result<f64, AuxiliaryError> {
        let output = tokio::process::Command::new(&self.program)
            .arg("measure_temp")
            .output()
            .await?;
        if !output.status.success() {
            return Err(AuxiliaryError::CommandFailed(output.status));
        }

        parse_measure_temp(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Whichever CPU temperature source the device offers.
#[derive(Debug, Clone)]
pub enum CpuTemperature {
    ThermalZone(ThermalZone),
    Vcgencmd(Vcgencmd),
}

impl AuxiliarySource for CpuTemperature {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn read_reference_temperature(&mut self) -> Result<f64, AuxiliaryError> {
        match self {
            CpuTemperature::ThermalZone(zone) => zone.read_reference_temperature().await,
            CpuTemperature::Vcgencmd(cmd) => cmd.read_reference_temperature().await,
        }
    }
}

/// Parses `temp=48.3'C`.
pub fn parse_measure_temp(output: &str) -> Result<f64, AuxiliaryError> {
    let output = output.trim();
    let value = output
        .split_once('=')
        .and_then(|(_, rest)| rest.rsplit_once('\''))
        .map(|(value, _)| value)
        .ok_or_else(|| AuxiliaryError::Parse(output.to_string()))?;

    parse_finite(value).map_err(|_| AuxiliaryError::Parse(output.to_string()))
}

fn parse_finite(value: &str) -> Result<f64, AuxiliaryError> {
    match value.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(AuxiliaryError::Parse(value.to_string())),
    }
}
