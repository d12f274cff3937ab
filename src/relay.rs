//! Gateway-side relay for readings published by other devices.
//!
//! A device without a reference source publishes raw readings; the gateway
//! receives each one, corrects its temperature against the gateway's own
//! CPU temperature and either republishes the event (tagged with the topic it
//! arrived on) or reports it into the device shadow.

use serde_json::{Map, Value};

use crate::clock::Clock;
use crate::compensation::Compensator;
use crate::mq::shadow_update_topic;
use crate::payload::ShadowDocument;
use crate::ports::{AuxiliarySource, Publisher, Qos};

/// Where a relayed reading goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayTarget {
    /// Publish the whole event, plus `input_topic`, to `topic`.
    Republish { topic: String },
    /// Report temperature, pressure, humidity and status into the shadow of
    /// `thing_name`.
    Shadow { thing_name: String },
}

impl RelayTarget {
    pub fn topic(&self) -> String {
        match self {
            RelayTarget::Republish { topic } => topic.clone(),
            RelayTarget::Shadow { thing_name } => shadow_update_topic(thing_name),
        }
    }
}

/// Outcome of relaying one event.
#[derive(Debug, Clone, PartialEq)]
pub struct Relayed {
    pub topic: String,
    pub temperature: Option<f64>,
    pub published: bool,
}

pub struct ShadowRelay<A, P, C> {
    auxiliary: A,
    publisher: P,
    clock: C,
    compensator: Compensator,
    target: RelayTarget,
    qos: Qos,
}

impl<A, P, C> ShadowRelay<A, P, C>
where
    A: AuxiliarySource,
    P: Publisher,
    C: Clock,
{
    pub fn new(
        auxiliary: A,
        publisher: P,
        clock: C,
        compensator: Compensator,
        target: RelayTarget,
        qos: Qos,
    ) -> Self {
        ShadowRelay {
            auxiliary,
            publisher,
            clock,
            compensator,
            target,
            qos,
        }
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Compensates and forwards one inbound event.
    ///
    /// Only an event that is not a JSON object is rejected. With compensation
    /// enabled, a missing or non-numeric temperature is forwarded as `null`
    /// with a `fail` status; without it the event only gains `input_topic`.
    #[tracing::instrument(skip(self, payload), fields(payload_len = payload.len()))]
    pub async fn handle(&mut self, input_topic: &str, payload: &[u8]) -> Result<Relayed, Error> {
        let mut event: Map<String, Value> = serde_json::from_slice(payload).map_err(Error::MalformedEvent)?;

        let raw = event.get("temperature").and_then(Value::as_f64);
        // A disabled compensator forwards the event as it arrived.
        let corrected = if self.compensator.is_enabled() {
            let temperature = match raw {
                Some(raw) => {
                    let mean = self.compensator.sample(&mut self.auxiliary, &self.clock).await;
                    let compensated = self.compensator.resolve(raw, mean);
                    tracing::info!(raw, ?compensated, ?mean, "compensated inbound temperature");
                    compensated
                }
                None => {
                    tracing::warn!("inbound event has no numeric temperature");
                    None
                }
            };
            let status = match (temperature, event_status(&event)) {
                (None, _) => "fail".to_string(),
                (Some(_), status) => status.unwrap_or_else(|| "success".to_string()),
            };
            Some((temperature, status))
        } else {
            None
        };
        let temperature = corrected.as_ref().map_or(raw, |(temperature, _)| *temperature);

        let topic = self.target.topic();
        let document = match &self.target {
            RelayTarget::Republish { .. } => {
                event.insert("input_topic".to_string(), Value::from(input_topic));
                if let Some((temperature, status)) = corrected {
                    event.insert("temperature".to_string(), Value::from(temperature));
                    event.insert("status".to_string(), Value::from(status));
                }
                serde_json::to_vec(&event)
            }
            RelayTarget::Shadow { .. } => {
                let (temperature, status) = match corrected {
                    Some((temperature, status)) => (Value::from(temperature), status),
                    None => (
                        event.get("temperature").cloned().unwrap_or(Value::Null),
                        event_status(&event).unwrap_or_else(|| "success".to_string()),
                    ),
                };
                let mut reported = Map::new();
                reported.insert("temperature".to_string(), temperature);
                for key in ["pressure", "humidity"] {
                    reported.insert(key.to_string(), event.get(key).cloned().unwrap_or(Value::Null));
                }
                reported.insert("status".to_string(), Value::from(status));
                serde_json::to_vec(&ShadowDocument::reported(reported))
            }
        }
        .map_err(Error::Serialize)?;

        let published = match self.publisher.publish(&topic, document, self.qos).await {
            Ok(()) => {
                tracing::info!(%topic, "relayed reading");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, %topic, "failed to relay reading");
                false
            }
        };

        Ok(Relayed {
            topic,
            temperature,
            published,
        })
    }
}

/// Status carried by the event, under `status` or the older `message` key.
fn event_status(event: &Map<String, Value>) -> Option<String> {
    ["status", "message"]
        .iter()
        .find_map(|key| event.get(*key).and_then(Value::as_str))
        .map(|s| s.to_ascii_lowercase())
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("inbound event is not a JSON object: {0}")]
    MalformedEvent(#[source] serde_json::Error),

    #[error("serialize relayed reading: {0}")]
    Serialize(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::compensation::{AuxiliaryFailure, CompensationConfig, Policy, Sampling};
    use crate::testing::{ManualClock, RecordingPublisher, ScriptedAuxiliary};

    fn burst() -> Compensator {
        Compensator::new(CompensationConfig {
            policy: Policy::SubtractiveProxy,
            sampling: Sampling::Burst {
                samples: 8,
                spacing: Duration::from_secs(1),
            },
            on_auxiliary_failure: AuxiliaryFailure::Fail,
        })
        .unwrap()
    }

    fn relay(
        auxiliary: ScriptedAuxiliary,
        target: RelayTarget,
    ) -> ShadowRelay<ScriptedAuxiliary, RecordingPublisher, ManualClock> {
        ShadowRelay::new(
            auxiliary,
            RecordingPublisher::default(),
            ManualClock::new(),
            burst(),
            target,
            Qos::AtMostOnce,
        )
    }

    #[tokio::test]
    async fn reports_compensated_reading_to_the_shadow() {
        let mut relay = relay(
            ScriptedAuxiliary::constant(30.0),
            RelayTarget::Shadow {
                thing_name: "pi-livingroom".to_string(),
            },
        );
        let event = json!({"sequence": 3, "temperature": 25.0, "pressure": 1009.5, "humidity": 51.0, "message": "Success"});

        let relayed = relay
            .handle("sensors/livingroom", event.to_string().as_bytes())
            .await
            .unwrap();

        assert_eq!(relayed.temperature, Some(20.0));
        let attempts = relay.publisher().attempts();
        assert_eq!(attempts[0].topic, "$aws/things/pi-livingroom/shadow/update");
        assert_eq!(
            attempts[0].json(),
            json!({"state": {"reported": {
                "temperature": 20.0,
                "pressure": 1009.5,
                "humidity": 51.0,
                "status": "success",
            }}})
        );
        assert_eq!(relay.clock.sleeps().len(), 7);
    }

    #[tokio::test]
    async fn republishes_with_input_topic() {
        let mut relay = relay(
            ScriptedAuxiliary::constant(30.0),
            RelayTarget::Republish {
                topic: "republish/reading".to_string(),
            },
        );
        let event = json!({"sequence": 3, "temperature": 25.0, "status": "success"});

        relay
            .handle("sensors/livingroom", event.to_string().as_bytes())
            .await
            .unwrap();

        let published = relay.publisher().attempts()[0].json();
        assert_eq!(published["input_topic"], "sensors/livingroom");
        assert_eq!(published["temperature"], 20.0);
        assert_eq!(published["sequence"], 3);
        assert_eq!(published["status"], "success");
    }

    #[tokio::test]
    async fn missing_temperature_is_forwarded_as_failure() {
        let mut relay = relay(
            ScriptedAuxiliary::constant(30.0),
            RelayTarget::Republish {
                topic: "republish/reading".to_string(),
            },
        );

        let relayed = relay
            .handle("sensors/livingroom", br#"{"sequence": 4, "temperature": null}"#)
            .await
            .unwrap();

        assert_eq!(relayed.temperature, None);
        let published = relay.publisher().attempts()[0].json();
        assert!(published["temperature"].is_null());
        assert_eq!(published["status"], "fail");
        assert_eq!(relay.auxiliary.reads, 0);
    }

    #[tokio::test]
    async fn auxiliary_outage_fails_the_reading() {
        let mut relay = relay(
            ScriptedAuxiliary::failing(),
            RelayTarget::Shadow {
                thing_name: "pi".to_string(),
            },
        );

        let relayed = relay
            .handle("sensors/pi", br#"{"temperature": 25.0}"#)
            .await
            .unwrap();

        assert_eq!(relayed.temperature, None);
        assert_eq!(relay.publisher().attempts()[0].json()["state"]["reported"]["status"], "fail");
    }

    #[tokio::test]
    async fn non_object_events_are_rejected() {
        let mut relay = relay(
            ScriptedAuxiliary::constant(30.0),
            RelayTarget::Republish {
                topic: "republish/reading".to_string(),
            },
        );

        let err = relay.handle("sensors/pi", b"21.5").await.unwrap_err();

        assert!(matches!(err, Error::MalformedEvent(_)));
        assert!(relay.publisher().attempts().is_empty());
    }

    #[tokio::test]
    async fn publish_failure_is_reported_not_raised() {
        let mut relay = ShadowRelay::new(
            ScriptedAuxiliary::constant(30.0),
            RecordingPublisher::failing_first(1),
            ManualClock::new(),
            burst(),
            RelayTarget::Shadow {
                thing_name: "pi".to_string(),
            },
            Qos::AtLeastOnce,
        );

        let relayed = relay
            .handle("sensors/pi", br#"{"temperature": 25.0}"#)
            .await
            .unwrap();

        assert!(!relayed.published);
    }

    #[tokio::test]
    async fn disabled_compensation_only_adds_input_topic() {
        let mut relay = ShadowRelay::new(
            ScriptedAuxiliary::constant(30.0),
            RecordingPublisher::default(),
            ManualClock::new(),
            Compensator::disabled(),
            RelayTarget::Republish {
                topic: "republish/reading".to_string(),
            },
            Qos::AtMostOnce,
        );
        let event = json!({"sequence": 5, "message": "Sensor offline"});

        let relayed = relay
            .handle("sensors/livingroom", event.to_string().as_bytes())
            .await
            .unwrap();

        assert_eq!(relayed.temperature, None);
        assert_eq!(
            relay.publisher().attempts()[0].json(),
            json!({"sequence": 5, "message": "Sensor offline", "input_topic": "sensors/livingroom"})
        );
        assert_eq!(relay.auxiliary.reads, 0);
    }
}
