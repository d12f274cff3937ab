//! The record produced once per loop iteration.

use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::ports::SensorSample;

/// Whether the sensor produced a usable value for this iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Fail,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Success => write!(f, "success"),
            Status::Fail => write!(f, "fail"),
        }
    }
}

/// One published sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub sequence: u64,
    pub temperature: Option<f64>,
    pub pressure: Option<f64>,
    pub humidity: Option<f64>,
    pub status: Status,
    /// Always truncated to microseconds, the precision of the wire format.
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    /// A successful reading whose temperature has already been compensated.
    pub fn success(
        sequence: u64,
        temperature: f64,
        sample: &SensorSample,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Reading {
            sequence,
            temperature: Some(temperature),
            pressure: sample.pressure,
            humidity: sample.humidity,
            status: Status::Success,
            timestamp: timestamp.trunc_subsecs(6),
        }
    }

    /// A failure marker. Every numeric field is null.
    pub fn failure(sequence: u64, timestamp: DateTime<Utc>) -> Self {
        Reading {
            sequence,
            temperature: None,
            pressure: None,
            humidity: None,
            status: Status::Fail,
            timestamp: timestamp.trunc_subsecs(6),
        }
    }

    /// The sensor answered but the temperature could not be compensated.
    /// Pressure and humidity are still reported.
    pub fn uncompensated(sequence: u64, sample: &SensorSample, timestamp: DateTime<Utc>) -> Self {
        Reading {
            sequence,
            temperature: None,
            pressure: sample.pressure,
            humidity: sample.humidity,
            status: Status::Fail,
            timestamp: timestamp.trunc_subsecs(6),
        }
    }
}
