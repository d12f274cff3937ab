//! Message queue.

use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use opentelemetry::global::get_text_map_propagator;
use paho_mqtt::async_client::AsyncClient as MqttClient;
use paho_mqtt::{
    AsyncReceiver, ConnectOptionsBuilder, CreateOptionsBuilder, Message as MqttMessage,
    MessageBuilder as MqttMessageBuilder, Properties as MqttProps, Property, PropertyCode,
    SslOptionsBuilder,
};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::ports::{PublishError, Publisher, Qos};

/// Paths to the PEM files used for mutual TLS.
#[derive(Debug, Clone, PartialEq)]
pub struct TlsFiles {
    pub root_ca: PathBuf,
    pub certificate: PathBuf,
    pub private_key: PathBuf,
}

/// Everything needed to build and connect the client.
#[derive(Debug, Clone, PartialEq)]
pub struct MqttSettings {
    pub server_uri: String,
    pub client_id: String,
    pub tls: Option<TlsFiles>,
    pub mqtt_v5: bool,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
    pub min_reconnect_backoff: Duration,
    pub max_reconnect_backoff: Duration,
    /// Messages kept while the connection is down. Oldest are dropped first.
    pub offline_buffer: i32,
}

impl MqttSettings {
    pub fn new(server_uri: impl Into<String>, client_id: impl Into<String>) -> Self {
        MqttSettings {
            server_uri: server_uri.into(),
            client_id: client_id.into(),
            tls: None,
            mqtt_v5: false,
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(5),
            min_reconnect_backoff: Duration::from_secs(1),
            max_reconnect_backoff: Duration::from_secs(32),
            offline_buffer: 1000,
        }
    }
}

/// Topic a device publishes its shadow updates to.
pub fn shadow_update_topic(thing_name: &str) -> String {
    format!("$aws/things/{thing_name}/shadow/update")
}

/// Topics the shadow service answers an update on.
pub fn shadow_response_topics(thing_name: &str) -> [String; 2] {
    let update = shadow_update_topic(thing_name);
    [format!("{update}/accepted"), format!("{update}/rejected")]
}

/// The MQTT connection readings are published through.
pub struct MqttPublisher {
    client: MqttClient,
    settings: MqttSettings,
}

impl MqttPublisher {
    pub fn new(settings: MqttSettings) -> Result<MqttPublisher, Error> {
        let mqtt_version = if settings.mqtt_v5 {
            paho_mqtt::MQTT_VERSION_5
        } else {
            paho_mqtt::MQTT_VERSION_3_1_1
        };

        let client = MqttClient::new(
            CreateOptionsBuilder::new()
                .server_uri(&settings.server_uri)
                .client_id(&settings.client_id)
                .mqtt_version(mqtt_version)
                .max_buffered_messages(settings.offline_buffer)
                .send_while_disconnected(true)
                .finalize(),
        )?;

        Ok(MqttPublisher { client, settings })
    }

    pub fn client_id(&self) -> &str {
        &self.settings.client_id
    }

    /// Stream of inbound messages. `None` items mark a lost connection.
    ///
    /// You must call this method before calling `connect`, or messages
    /// arriving in between are lost.
    pub fn messages(&mut self, buffer: usize) -> AsyncReceiver<Option<MqttMessage>> {
        self.client.get_stream(buffer)
    }

    /// Connect to the MQTT broker.
    ///
    /// You must call this method before calling `publish`. Later connection
    /// losses are handled by the client's automatic reconnect.
    #[tracing::instrument(err)]
    pub async fn connect(&self) -> Result<(), Error> {
        tracing::info!("connect to the MQTT broker");

        let mut builder = if self.settings.mqtt_v5 {
            ConnectOptionsBuilder::new_v5()
        } else {
            ConnectOptionsBuilder::new()
        };
        builder
            .keep_alive_interval(self.settings.keep_alive)
            .connect_timeout(self.settings.connect_timeout)
            .automatic_reconnect(
                self.settings.min_reconnect_backoff,
                self.settings.max_reconnect_backoff,
            );
        if let Some(tls) = &self.settings.tls {
            builder.ssl_options(ssl_options(tls)?);
        }

        let connection_info = self.client.connect(builder.finalize()).await;
        if let Err(e) = connection_info {
            tracing::error!(error = ?e, "failed to connect to the MQTT broker");
            return Err(e.into());
        }

        tracing::info!(info = ?connection_info, "connected to the MQTT broker");
        Ok(())
    }

    /// Subscribe to `topics` every time the connection comes up, so the
    /// subscriptions survive automatic reconnects.
    ///
    /// You must call this method before calling `connect`, from within the
    /// tokio runtime that reports rejected subscriptions.
    pub fn subscribe_on_connect(&mut self, topics: Vec<String>, qos: Qos) {
        let qos = vec![qos.as_i32(); topics.len()];
        let runtime = tokio::runtime::Handle::try_current().ok();
        if runtime.is_none() {
            tracing::warn!(?topics, "no tokio runtime, subscription failures will not be logged");
        }

        self.client.set_connected_callback(move |client| {
            tracing::info!(?topics, "connected, subscribing");
            let token = client.subscribe_many(&topics, &qos);
            if let Some(runtime) = &runtime {
                runtime.spawn(await_subscription(topics.clone(), token));
            }
        });
    }

    /// Disconnect from the broker, flushing in-flight messages.
    #[tracing::instrument(err)]
    pub async fn disconnect(&self) -> Result<(), Error> {
        if self.client.is_connected() {
            self.client.disconnect(None).await?;
        }

        tracing::info!("disconnected from the MQTT broker");
        Ok(())
    }

    /// Publish the payload to the specified topic.
    #[tracing::instrument(skip(payload), fields(payload_len = payload.len()), err)]
    pub async fn publish_json(&self, topic: &str, payload: Vec<u8>, qos: Qos) -> Result<(), Error> {
        let mut builder = MqttMessageBuilder::new()
            .topic(topic)
            .payload(payload)
            .qos(qos.as_i32());

        // Properties only exist on MQTT v5 connections.
        if self.settings.mqtt_v5 {
            builder = builder.properties(self.message_properties()?);
        }
        let message = builder.finalize();

        tracing::debug!(?message, "publishing the payload to the MQTT broker");
        match tokio::time::timeout(self.settings.operation_timeout, self.client.publish(message)).await {
            Ok(delivered) => delivered?,
            Err(_) => return Err(Error::Timeout(self.settings.operation_timeout)),
        }

        tracing::debug!("payload published successfully");
        Ok(())
    }

    fn message_properties(&self) -> Result<MqttProps, Error> {
        let message_id = uuid::Uuid::now_v7().to_string();
        let emitted_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true);

        let mut message_properties = MqttProps::new();
        message_properties.push(Property::new_string(PropertyCode::ContentType, "application/json")?)?;
        message_properties.push(Property::new_string_pair(PropertyCode::UserProperty, "message_id", &message_id)?)?;
        message_properties.push(Property::new_string_pair(PropertyCode::UserProperty, "device_id", &self.settings.client_id)?)?;
        message_properties.push(Property::new_string_pair(PropertyCode::UserProperty, "emitted_at", &emitted_at)?)?;

        // tracing information
        let ctx = tracing::Span::current().context();
        get_text_map_propagator(|propagator| {
            propagator.inject_context(&ctx, &mut MqttCarrierInjector(&mut message_properties))
        });

        Ok(message_properties)
    }
}

/// Waits for the broker's answer to a subscribe request, logging a rejection.
async fn await_subscription<T>(
    topics: Vec<String>,
    token: impl Future<Output = Result<T, paho_mqtt::Error>>,
) -> bool {
    match token.await {
        Ok(_) => {
            tracing::info!(?topics, "subscribed");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, ?topics, "subscription rejected");
            false
        }
    }
}

impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: Qos) -> Result<(), PublishError> {
        self.publish_json(topic, payload, qos).await.map_err(|e| match e {
            Error::Timeout(after) => PublishError::Timeout(after),
            _ if !self.client.is_connected() => PublishError::NotConnected,
            other => PublishError::Transport(other.to_string()),
        })
    }
}

impl Debug for MqttPublisher {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttPublisher")
            .field("server_uri", &self.settings.server_uri)
            .field("client_id", &self.settings.client_id)
            .field("mqtt_v5", &self.settings.mqtt_v5)
            .finish()
    }
}

fn ssl_options(tls: &TlsFiles) -> Result<paho_mqtt::SslOptions, Error> {
    Ok(SslOptionsBuilder::new()
        .trust_store(&tls.root_ca)?
        .key_store(&tls.certificate)?
        .private_key(&tls.private_key)?
        .finalize())
}

pub struct MqttCarrierInjector<'a>(pub &'a mut MqttProps);

impl<'a> opentelemetry::propagation::Injector for MqttCarrierInjector<'a> {
    fn set(&mut self, key: &str, value: String) {
        if let Err(e) = self.0.push_string_pair(PropertyCode::UserProperty, key, &value) {
            tracing::warn!(error = %e, key, "cannot attach trace context to the message");
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("mqtt: {0}")]
    Mqtt(#[from] paho_mqtt::Error),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_topics() {
        assert_eq!(shadow_update_topic("pi-livingroom"), "$aws/things/pi-livingroom/shadow/update");
        assert_eq!(
            shadow_response_topics("pi-livingroom"),
            [
                "$aws/things/pi-livingroom/shadow/update/accepted".to_string(),
                "$aws/things/pi-livingroom/shadow/update/rejected".to_string(),
            ]
        );
    }

    #[test]
    fn default_settings_match_the_device_sdk_profile() {
        let settings = MqttSettings::new("ssl://example.iot.eu-west-1.amazonaws.com:8883", "pi");

        assert_eq!(settings.connect_timeout, Duration::from_secs(10));
        assert_eq!(settings.operation_timeout, Duration::from_secs(5));
        assert_eq!(settings.min_reconnect_backoff, Duration::from_secs(1));
        assert_eq!(settings.max_reconnect_backoff, Duration::from_secs(32));
        assert!(settings.tls.is_none());
    }

    #[test]
    fn client_builds_without_a_broker() {
        let publisher = MqttPublisher::new(MqttSettings::new("tcp://localhost:1883", "unit-test")).unwrap();

        assert_eq!(publisher.client_id(), "unit-test");
        assert!(format!("{publisher:?}").contains("unit-test"));
    }

    #[tokio::test]
    async fn rejected_subscription_is_reported() {
        let topics = vec!["sensors/#".to_string()];

        let denied = std::future::ready(Err::<(), _>(paho_mqtt::Error::General("not authorized")));
        assert!(!await_subscription(topics.clone(), denied).await);

        assert!(await_subscription(topics, std::future::ready(Ok::<(), paho_mqtt::Error>(()))).await);
    }
}
