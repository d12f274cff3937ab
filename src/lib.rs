//! # Sensor Telemetry
//!
//! Sensor Telemetry is an edge component running on a Raspberry Pi that
//! reads the environment sensor, compensates the temperature for the heat of
//! the board it sits on, and publishes each [`reading::Reading`] over MQTT to
//! a cloud IoT broker or a device shadow.
//!
//! The [`publisher::ReadingPublisher`] loop is assembled from the
//! capabilities in [`ports`]; [`sysfs`] and [`mq`] provide the production
//! implementations, and [`relay`] runs the same compensation on a gateway
//! for readings received from other devices.

pub mod cli;
pub mod clock;
pub mod compensation;
pub mod mq;
pub mod payload;
pub mod ports;
pub mod publisher;
pub mod reading;
pub mod relay;
pub mod sysfs;

#[cfg(test)]
mod testing;
