//! Temperature compensation against a correlated auxiliary signal.
//!
//! A sensor mounted next to a Raspberry Pi reads warm. The CPU temperature is
//! sampled into a [`SampleWindow`], averaged, and used to pull the raw
//! reading back with one of the linear [`Policy`] variants.

use std::collections::VecDeque;
use std::time::Duration;

use crate::clock::Clock;
use crate::ports::AuxiliarySource;

/// Default capacity of the rolling window.
pub const DEFAULT_WINDOW: usize = 10;

/// Default number of samples in a burst.
pub const DEFAULT_BURST_SAMPLES: usize = 8;

/// Linear correction applied to the raw temperature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Policy {
    /// `2 * raw - mean`. Used when the raw value is a reading received from
    /// elsewhere and the local proxy is the only correction signal.
    SubtractiveProxy,
    /// `raw - (mean - raw) / factor`. A factor of 1.0 applies the full
    /// correction, larger factors damp it.
    DampedOffset { factor: f64 },
}

impl Policy {
    pub fn apply(&self, raw: f64, mean_auxiliary: f64) -> f64 {
        match *self {
            Policy::SubtractiveProxy => 2.0 * raw - mean_auxiliary,
            Policy::DampedOffset { factor } => raw - (mean_auxiliary - raw) / factor,
        }
    }
}

/// How the auxiliary source is sampled each iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sampling {
    /// One sample per iteration into a window of `window` samples.
    Rolling { window: usize },
    /// `samples` back-to-back samples separated by `spacing`. The burst
    /// replaces the previous window when at least one sample succeeds.
    Burst { samples: usize, spacing: Duration },
}

impl Sampling {
    fn capacity(&self) -> usize {
        match *self {
            Sampling::Rolling { window } => window,
            Sampling::Burst { samples, .. } => samples,
        }
    }
}

impl Default for Sampling {
    fn default() -> Self {
        Sampling::Rolling {
            window: DEFAULT_WINDOW,
        }
    }
}

/// What to do when no fresh auxiliary sample was obtained this iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuxiliaryFailure {
    /// Publish the raw, uncompensated value.
    #[default]
    FallBackToRaw,
    /// Compensate with the mean of whatever the window still holds; raw if
    /// it is empty.
    LastKnown,
    /// Publish a `fail` record with a null temperature.
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompensationConfig {
    pub policy: Policy,
    pub sampling: Sampling,
    pub on_auxiliary_failure: AuxiliaryFailure,
}

/// Bounded FIFO of auxiliary samples; the oldest is evicted first.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Result<Self, Error> {
        if capacity == 0 {
            return Err(Error::EmptyWindow);
        }

        Ok(SampleWindow {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    pub fn push(&mut self, sample: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Arithmetic mean, `None` while empty.
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }

        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Result of sampling the auxiliary source for one iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AuxiliaryMean {
    /// At least one sample was taken this iteration.
    Fresh(f64),
    /// Nothing new; the mean of the samples still held from earlier.
    Stale(f64),
    Unavailable,
}

/// Owns the window and applies the configured policies.
#[derive(Debug, Clone)]
pub struct Compensator {
    config: Option<CompensationConfig>,
    window: Option<SampleWindow>,
}

impl Compensator {
    pub fn new(config: CompensationConfig) -> Result<Self, Error> {
        if let Policy::DampedOffset { factor } = config.policy {
            if factor == 0.0 || !factor.is_finite() {
                return Err(Error::InvalidFactor(factor));
            }
        }
        let window = SampleWindow::new(config.sampling.capacity())?;

        Ok(Compensator {
            config: Some(config),
            window: Some(window),
        })
    }

    /// Publishes raw temperatures and never touches the auxiliary source.
    pub fn disabled() -> Self {
        Compensator {
            config: None,
            window: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_some()
    }

    pub fn window(&self) -> Option<&SampleWindow> {
        self.window.as_ref()
    }

    /// Samples the auxiliary source according to the sampling policy.
    ///
    /// Burst sampling sleeps through `clock` between samples.
    pub async fn sample<A, C>(&mut self, auxiliary: &mut A, clock: &C) -> AuxiliaryMean
    where
        A: AuxiliarySource,
        C: Clock,
    {
        let (Some(config), Some(window)) = (self.config.as_ref(), self.window.as_mut()) else {
            return AuxiliaryMean::Unavailable;
        };

        let fresh = match config.sampling {
            Sampling::Rolling { .. } => match auxiliary.read_reference_temperature().await {
                Ok(value) => {
                    window.push(value);
                    true
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to sample auxiliary temperature");
                    false
                }
            },
            Sampling::Burst { samples, spacing } => {
                let mut burst = SampleWindow {
                    samples: VecDeque::with_capacity(samples),
                    capacity: samples,
                };
                for n in 0..samples {
                    match auxiliary.read_reference_temperature().await {
                        Ok(value) => burst.push(value),
                        Err(e) => {
                            tracing::warn!(error = %e, sample = n, "failed to sample auxiliary temperature")
                        }
                    }
                    if n + 1 < samples {
                        clock.sleep(spacing).await;
                    }
                }

                if burst.is_empty() {
                    false
                } else {
                    *window = burst;
                    true
                }
            }
        };

        match (fresh, window.mean()) {
            (true, Some(mean)) => AuxiliaryMean::Fresh(mean),
            (false, Some(mean)) => AuxiliaryMean::Stale(mean),
            (_, None) => AuxiliaryMean::Unavailable,
        }
    }

    /// Compensated temperature, or `None` when the record must be marked as
    /// failed.
    pub fn resolve(&self, raw: f64, mean: AuxiliaryMean) -> Option<f64> {
        let Some(config) = self.config.as_ref() else {
            return Some(raw);
        };

        let mean = match (mean, config.on_auxiliary_failure) {
            (AuxiliaryMean::Fresh(mean), _) => Some(mean),
            (AuxiliaryMean::Stale(mean), AuxiliaryFailure::LastKnown) => Some(mean),
            (_, AuxiliaryFailure::Fail) => return None,
            _ => None,
        };

        match mean {
            Some(mean) => Some(config.policy.apply(raw, mean)),
            None => Some(raw),
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("damping factor must be finite and non-zero, got {0}")]
    InvalidFactor(f64),

    #[error("auxiliary window must hold at least one sample")]
    EmptyWindow,
}
