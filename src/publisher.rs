//! The reading publisher loop.
//!
//! Each iteration reads the sensor, optionally compensates the temperature,
//! serializes one record and publishes it once. Collaborator failures never
//! stop the loop: a failed read is published as a `fail` record and a failed
//! publish is logged and dropped.

use std::convert::Infallible;
use std::time::Duration;

use crate::clock::Clock;
use crate::compensation::Compensator;
use crate::payload::{self, PayloadFormat};
use crate::ports::{AuxiliarySource, Publisher, Qos, SensorSource};
use crate::reading::Reading;

/// Where and how often readings go out.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishSettings {
    pub topic: String,
    pub qos: Qos,
    pub interval: Duration,
    pub format: PayloadFormat,
}

/// What happened in one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct Iteration {
    pub reading: Reading,
    pub published: bool,
}

pub struct ReadingPublisher<S, A, P, C> {
    sensor: S,
    auxiliary: A,
    publisher: P,
    clock: C,
    compensator: Compensator,
    settings: PublishSettings,
    sequence: u64,
}

impl<S, A, P, C> ReadingPublisher<S, A, P, C>
where
    S: SensorSource,
    A: AuxiliarySource,
    P: Publisher,
    C: Clock,
{
    pub fn new(
        sensor: S,
        auxiliary: A,
        publisher: P,
        clock: C,
        compensator: Compensator,
        settings: PublishSettings,
    ) -> Self {
        ReadingPublisher {
            sensor,
            auxiliary,
            publisher,
            clock,
            compensator,
            settings,
            sequence: 0,
        }
    }

    /// Sequence number the next reading will carry.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Runs until the process is stopped. Only a serialization failure,
    /// which means the record itself is broken, ends the loop.
    pub async fn run(&mut self) -> Result<Infallible, payload::Error> {
        tracing::info!(
            topic = %self.settings.topic,
            interval = ?self.settings.interval,
            format = %self.settings.format,
            compensated = self.compensator.is_enabled(),
            "starting publisher loop"
        );

        loop {
            self.tick().await?;
        }
    }

    /// One iteration followed by the configured sleep.
    pub async fn tick(&mut self) -> Result<Iteration, payload::Error> {
        let iteration = self.step().await?;
        self.clock.sleep(self.settings.interval).await;
        Ok(iteration)
    }

    /// One iteration without the trailing sleep. The sequence number is
    /// consumed whether or not the publish succeeds.
    #[tracing::instrument(skip(self), fields(sequence = self.sequence))]
    pub async fn step(&mut self) -> Result<Iteration, payload::Error> {
        let sequence = self.sequence;
        let reading = self.read(sequence).await;

        let payload = payload::encode(self.settings.format, &reading)?;
        self.sequence += 1;

        let published = match self
            .publisher
            .publish(&self.settings.topic, payload, self.settings.qos)
            .await
        {
            Ok(()) => {
                tracing::info!(topic = %self.settings.topic, status = %reading.status, "reading published");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, topic = %self.settings.topic, "failed to publish reading");
                false
            }
        };

        Ok(Iteration { reading, published })
    }

    async fn read(&mut self, sequence: u64) -> Reading {
        let sample = match self.sensor.read().await {
            Ok(sample) => sample,
            Err(e) => {
                tracing::error!(error = %e, "failed to read sensor");
                return Reading::failure(sequence, self.clock.now());
            }
        };

        let mean = self.compensator.sample(&mut self.auxiliary, &self.clock).await;
        match self.compensator.resolve(sample.temperature, mean) {
            Some(temperature) => {
                tracing::debug!(raw = sample.temperature, compensated = temperature, ?mean, "temperature");
                Reading::success(sequence, temperature, &sample, self.clock.now())
            }
            None => {
                tracing::warn!(raw = sample.temperature, "no auxiliary reference, marking reading as failed");
                Reading::uncompensated(sequence, &sample, self.clock.now())
            }
        }
    }
}
