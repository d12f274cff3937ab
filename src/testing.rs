//! In-memory collaborators for unit tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use crate::clock::Clock;
use crate::ports::{
    AuxiliaryError, AuxiliarySource, PublishError, Publisher, Qos, SensorError, SensorSample,
    SensorSource,
};

/// Replays scripted sensor results, then repeats the fallback forever.
pub struct ScriptedSensor {
    script: VecDeque<Result<SensorSample, SensorError>>,
    fallback: SensorSample,
}

impl ScriptedSensor {
    pub fn constant(temperature: f64) -> Self {
        ScriptedSensor {
            script: VecDeque::new(),
            fallback: SensorSample {
                temperature,
                pressure: Some(1013.25),
                humidity: Some(40.0),
            },
        }
    }

    pub fn then(mut self, result: Result<SensorSample, SensorError>) -> Self {
        self.script.push_back(result);
        self
    }
}

impl SensorSource for ScriptedSensor {
    async fn read(&mut self) -> Result<SensorSample, SensorError> {
        self.script.pop_front().unwrap_or(Ok(self.fallback))
    }
}

pub fn sensor_failure() -> SensorError {
    SensorError::Unavailable("bus timeout".to_string())
}

/// Replays scripted auxiliary readings; `None` entries fail.
pub struct ScriptedAuxiliary {
    script: VecDeque<Option<f64>>,
    fallback: Option<f64>,
    pub reads: usize,
}

impl ScriptedAuxiliary {
    pub fn constant(value: f64) -> Self {
        ScriptedAuxiliary {
            script: VecDeque::new(),
            fallback: Some(value),
            reads: 0,
        }
    }

    pub fn failing() -> Self {
        ScriptedAuxiliary {
            script: VecDeque::new(),
            fallback: None,
            reads: 0,
        }
    }

    pub fn sequence(values: &[Option<f64>], fallback: Option<f64>) -> Self {
        ScriptedAuxiliary {
            script: values.iter().copied().collect(),
            fallback,
            reads: 0,
        }
    }
}

impl AuxiliarySource for ScriptedAuxiliary {
    async fn read_reference_temperature(&mut self) -> Result<f64, AuxiliaryError> {
        self.reads += 1;
        self.script
            .pop_front()
            .unwrap_or(self.fallback)
            .ok_or_else(|| AuxiliaryError::Parse("thermal zone offline".to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: Qos,
}

impl Published {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).expect("payload is JSON")
    }
}

/// Records every publish attempt; the first `failures` attempts fail.
#[derive(Default)]
pub struct RecordingPublisher {
    pub attempts: RefCell<Vec<Published>>,
    failures: Cell<usize>,
}

impl RecordingPublisher {
    pub fn failing_first(failures: usize) -> Self {
        RecordingPublisher {
            attempts: RefCell::new(Vec::new()),
            failures: Cell::new(failures),
        }
    }

    pub fn attempts(&self) -> Vec<Published> {
        self.attempts.borrow().clone()
    }
}

impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: Qos) -> Result<(), PublishError> {
        self.attempts.borrow_mut().push(Published {
            topic: topic.to_string(),
            payload,
            qos,
        });

        let remaining = self.failures.get();
        if remaining > 0 {
            self.failures.set(remaining - 1);
            return Err(PublishError::NotConnected);
        }
        Ok(())
    }
}

/// Advances instantly and remembers every requested sleep.
pub struct ManualClock {
    now: Cell<DateTime<Utc>>,
    pub sleeps: RefCell<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock {
            now: Cell::new(Utc.with_ymd_and_hms(2020, 2, 12, 7, 30, 5).unwrap()),
            sleeps: RefCell::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        let delta = TimeDelta::from_std(duration).unwrap_or(TimeDelta::zero());
        self.now.set(self.now.get() + delta);
    }
}
