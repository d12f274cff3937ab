mod args;

use std::process::ExitCode;

use anyhow::{anyhow, Context as _, Result};
use args::Args;
use clap::Parser as _;
use paho_mqtt::{AsyncReceiver, Message};
use sensor_telemetry::cli::{PolicyArg, SamplingArg};
use sensor_telemetry::clock::SystemClock;
use sensor_telemetry::mq::{shadow_response_topics, MqttPublisher};
use sensor_telemetry::ports::Qos;
use sensor_telemetry::publisher::{PublishSettings, ReadingPublisher};
use sensor_telemetry::sysfs::IioSensor;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    if let Err(e) = run().await {
        tracing::error!("{e:#}");
        return ExitCode::from(1);
    }

    ExitCode::from(0)
}

async fn run() -> Result<()> {
    let args = Args::parse();

    let topic = args
        .topic()
        .ok_or_else(|| anyhow!("--topic is required unless --format shadow is used"))?;
    let compensator = args
        .compensation
        .compensator(PolicyArg::None, SamplingArg::Rolling)
        .context("invalid compensation settings")?;

    let mut mqtt = MqttPublisher::new(args.connection.settings()).context("failed to create MQTT client")?;

    if args.watch_shadow {
        let responses = mqtt.messages(64);
        mqtt.subscribe_on_connect(shadow_response_topics(args.thing_name()).to_vec(), Qos::AtLeastOnce);
        tokio::spawn(log_shadow_responses(responses));
    }

    mqtt.connect()
        .await
        .context("failed to connect to the MQTT broker")?;

    let mut publisher = ReadingPublisher::new(
        IioSensor::new(&args.iio_device),
        args.compensation.auxiliary_source(),
        mqtt,
        SystemClock,
        compensator,
        PublishSettings {
            topic,
            qos: args.qos,
            interval: args.interval(),
            format: args.format,
        },
    );

    let outcome = tokio::select! {
        result = publisher.run() => match result {
            Ok(never) => match never {},
            Err(e) => Err(e),
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
            Ok(())
        }
    };

    publisher
        .publisher()
        .disconnect()
        .await
        .context("failed to disconnect from the MQTT broker")?;

    outcome.context("publisher loop stopped")
}

async fn log_shadow_responses(responses: AsyncReceiver<Option<Message>>) {
    while let Ok(message) = responses.recv().await {
        let Some(message) = message else {
            tracing::warn!("connection lost, waiting for reconnect");
            continue;
        };

        let payload = message.payload_str();
        if message.topic().ends_with("/rejected") {
            tracing::warn!(topic = message.topic(), %payload, "shadow update rejected");
        } else {
            tracing::info!(topic = message.topic(), %payload, "shadow update accepted");
        }
    }
}
