//! Capabilities the publisher loop is built from.
//!
//! The loop never touches hardware or the network directly. It is handed a
//! [`SensorSource`], an [`AuxiliarySource`] and a [`Publisher`], and every
//! failure they report is turned into data (a `fail` record) or a log line.

use std::fmt;
use std::future::Future;
use std::str::FromStr;

/// One raw sample from the environmental sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSample {
    /// Degrees Celsius.
    pub temperature: f64,
    /// Hectopascal, when the sensor has a pressure channel.
    pub pressure: Option<f64>,
    /// Relative humidity in percent, when the sensor has a humidity channel.
    pub humidity: Option<f64>,
}

/// Reads the primary environmental sensor.
pub trait SensorSource {
    fn read(&mut self) -> impl Future<Output = Result<SensorSample, SensorError>>;
}

/// Reads a temperature correlated with the sensor's drift, usually the CPU
/// sitting next to it.
pub trait AuxiliarySource {
    fn read_reference_temperature(&mut self) -> impl Future<Output = Result<f64, AuxiliaryError>>;
}

/// Hands a serialized payload to the transport.
///
/// Implementations own their reconnect and timeout policy; callers do not
/// retry.
pub trait Publisher {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: Qos,
    ) -> impl Future<Output = Result<(), PublishError>>;
}

/// MQTT delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Qos {
    AtMostOnce,
    #[default]
    AtLeastOnce,
}

impl Qos {
    pub fn as_i32(&self) -> i32 {
        match self {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
        }
    }
}

impl fmt::Display for Qos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i32())
    }
}

impl FromStr for Qos {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" => Ok(Qos::AtMostOnce),
            "1" => Ok(Qos::AtLeastOnce),
            _ => Err(format!("unsupported QoS level: {s} (expected 0 or 1)")),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SensorError {
    #[error("read sensor channel {channel}: {source}")]
    Io {
        channel: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sensor channel {channel} returned {value:?}")]
    InvalidData { channel: String, value: String },

    #[error("sensor unavailable: {0}")]
    Unavailable(String),
}

#[derive(thiserror::Error, Debug)]
pub enum AuxiliaryError {
    #[error("read reference temperature: {0}")]
    Io(#[from] std::io::Error),

    #[error("unparsable reference temperature: {0:?}")]
    Parse(String),

    #[error("reference command exited with {0}")]
    CommandFailed(std::process::ExitStatus),
}

#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    #[error("transport: {0}")]
    Transport(String),

    #[error("publish timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("not connected")]
    NotConnected,
}
