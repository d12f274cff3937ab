//! JSON wire formats.
//!
//! Numeric fields of a failed read are serialized as `null`, never omitted,
//! so that consumers see an explicit failure marker in the stream.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::reading::{Reading, Status};

/// Shape of the published document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadFormat {
    /// `{"sequence", "value", "timestamp_utc", "status"}`
    #[default]
    Telemetry,
    /// `{"sequence", "temperature", "pressure", "humidity", "status", "timestamp_utc"}`
    Environment,
    /// `{"state": {"reported": {...}}}`, a device-shadow update document.
    Shadow,
}

impl fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadFormat::Telemetry => write!(f, "telemetry"),
            PayloadFormat::Environment => write!(f, "environment"),
            PayloadFormat::Shadow => write!(f, "shadow"),
        }
    }
}

impl FromStr for PayloadFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "telemetry" => Ok(PayloadFormat::Telemetry),
            "environment" => Ok(PayloadFormat::Environment),
            "shadow" => Ok(PayloadFormat::Shadow),
            _ => Err(format!("unknown payload format: {s}")),
        }
    }
}

/// Flat single-value record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub sequence: u64,
    pub value: Option<f64>,
    #[serde(with = "timestamp_utc")]
    pub timestamp_utc: chrono::DateTime<chrono::Utc>,
    pub status: Status,
}

impl From<&Reading> for TelemetryRecord {
    fn from(reading: &Reading) -> Self {
        TelemetryRecord {
            sequence: reading.sequence,
            value: reading.temperature,
            timestamp_utc: reading.timestamp,
            status: reading.status,
        }
    }
}

impl From<TelemetryRecord> for Reading {
    fn from(record: TelemetryRecord) -> Self {
        Reading {
            sequence: record.sequence,
            temperature: record.value,
            pressure: None,
            humidity: None,
            status: record.status,
            timestamp: record.timestamp_utc,
        }
    }
}

/// Every channel of the sensor in one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    pub sequence: u64,
    pub temperature: Option<f64>,
    pub pressure: Option<f64>,
    pub humidity: Option<f64>,
    pub status: Status,
    #[serde(with = "timestamp_utc")]
    pub timestamp_utc: chrono::DateTime<chrono::Utc>,
}

impl From<&Reading> for EnvironmentRecord {
    fn from(reading: &Reading) -> Self {
        EnvironmentRecord {
            sequence: reading.sequence,
            temperature: reading.temperature,
            pressure: reading.pressure,
            humidity: reading.humidity,
            status: reading.status,
            timestamp_utc: reading.timestamp,
        }
    }
}

impl From<EnvironmentRecord> for Reading {
    fn from(record: EnvironmentRecord) -> Self {
        Reading {
            sequence: record.sequence,
            temperature: record.temperature,
            pressure: record.pressure,
            humidity: record.humidity,
            status: record.status,
            timestamp: record.timestamp_utc,
        }
    }
}

/// Device-shadow update document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowDocument<R> {
    pub state: ShadowState<R>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowState<R> {
    pub reported: R,
}

impl<R> ShadowDocument<R> {
    pub fn reported(reported: R) -> Self {
        ShadowDocument {
            state: ShadowState { reported },
        }
    }
}

/// What the device reports into its shadow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedEnvironment {
    pub temperature: Option<f64>,
    pub pressure: Option<f64>,
    pub humidity: Option<f64>,
    pub status: Status,
}

impl From<&Reading> for ReportedEnvironment {
    fn from(reading: &Reading) -> Self {
        ReportedEnvironment {
            temperature: reading.temperature,
            pressure: reading.pressure,
            humidity: reading.humidity,
            status: reading.status,
        }
    }
}

/// Serializes `reading` in the given format.
pub fn encode(format: PayloadFormat, reading: &Reading) -> Result<Vec<u8>, Error> {
    let encoded = match format {
        PayloadFormat::Telemetry => serde_json::to_vec(&TelemetryRecord::from(reading)),
        PayloadFormat::Environment => serde_json::to_vec(&EnvironmentRecord::from(reading)),
        PayloadFormat::Shadow => {
            serde_json::to_vec(&ShadowDocument::reported(ReportedEnvironment::from(reading)))
        }
    };

    encoded.map_err(|source| Error::Serialize { format, source })
}

/// `%Y-%m-%dT%H:%M:%S.ffffffZ`, always six fractional digits.
pub mod timestamp_utc {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

    pub fn format(at: &DateTime<Utc>) -> String {
        at.format(FORMAT).to_string()
    }

    pub fn parse(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ").map(|naive| naive.and_utc())
    }

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(at))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("serialize {format} payload: {source}")]
    Serialize {
        format: PayloadFormat,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Timelike, Utc};
    use serde_json::json;

    use super::*;
    use crate::ports::SensorSample;

    fn sample_time() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 2, 12, 7, 30, 5)
            .unwrap()
            .with_nanosecond(123_456_000)
            .unwrap()
    }

    fn reading() -> Reading {
        let sample = SensorSample {
            temperature: 23.9,
            pressure: Some(1013.2),
            humidity: Some(40.1),
        };
        Reading::success(4, 21.37, &sample, sample_time())
    }

    #[test]
    fn telemetry_wire_shape() {
        let encoded = encode(PayloadFormat::Telemetry, &reading()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&encoded).unwrap();

        assert_eq!(
            value,
            json!({
                "sequence": 4,
                "value": 21.37,
                "timestamp_utc": "2020-02-12T07:30:05.123456Z",
                "status": "success",
            })
        );
    }

    #[test]
    fn failed_reading_serializes_nulls() {
        let encoded = encode(PayloadFormat::Telemetry, &Reading::failure(9, sample_time())).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&encoded).unwrap();

        assert_eq!(value["status"], "fail");
        assert!(value["value"].is_null());
        assert_eq!(value["sequence"], 9);
    }

    #[test]
    fn shadow_wire_shape() {
        let encoded = encode(PayloadFormat::Shadow, &reading()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&encoded).unwrap();

        assert_eq!(
            value,
            json!({
                "state": {
                    "reported": {
                        "temperature": 21.37,
                        "pressure": 1013.2,
                        "humidity": 40.1,
                        "status": "success",
                    }
                }
            })
        );
    }

    #[test]
    fn environment_record_parses_back() {
        let original = reading();
        let encoded = encode(PayloadFormat::Environment, &original).unwrap();

        let parsed: Reading = serde_json::from_slice::<EnvironmentRecord>(&encoded)
            .unwrap()
            .into();

        assert_eq!(parsed.sequence, original.sequence);
        assert_eq!(parsed.status, original.status);
        assert_eq!(parsed.timestamp, original.timestamp);
        for (a, b) in [
            (parsed.temperature, original.temperature),
            (parsed.pressure, original.pressure),
            (parsed.humidity, original.humidity),
        ] {
            assert!((a.unwrap() - b.unwrap()).abs() < 1e-9);
        }
    }

    #[test]
    fn telemetry_record_parses_back_a_failure() {
        let original = Reading::failure(12, sample_time());
        let encoded = encode(PayloadFormat::Telemetry, &original).unwrap();

        let parsed: Reading = serde_json::from_slice::<TelemetryRecord>(&encoded)
            .unwrap()
            .into();

        assert_eq!(parsed, original);
    }

    #[test]
    fn timestamps_always_carry_six_fraction_digits() {
        let whole_second = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();

        assert_eq!(timestamp_utc::format(&whole_second), "2021-01-01T00:00:00.000000Z");
        assert_eq!(timestamp_utc::parse("2021-01-01T00:00:00.000000Z").unwrap(), whole_second);
    }

    #[test]
    fn format_names_round_trip() {
        for format in [PayloadFormat::Telemetry, PayloadFormat::Environment, PayloadFormat::Shadow] {
            assert_eq!(format.to_string().parse::<PayloadFormat>(), Ok(format));
        }
    }
}
