mod args;

use std::process::ExitCode;

use anyhow::{Context as _, Result};
use args::Args;
use clap::Parser as _;
use sensor_telemetry::cli::{PolicyArg, SamplingArg};
use sensor_telemetry::clock::SystemClock;
use sensor_telemetry::mq::MqttPublisher;
use sensor_telemetry::relay::ShadowRelay;
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

    let compensator = args
        .compensation
        .compensator(PolicyArg::SubtractiveProxy, SamplingArg::Burst)
        .context("invalid compensation settings")?;
    let target = args.target();
    let output_topic = target.topic();

    let mut mqtt = MqttPublisher::new(args.connection.settings()).context("failed to create MQTT client")?;
    let inbound = mqtt.messages(64);
    mqtt.subscribe_on_connect(args.input_topics.clone(), args.qos);
    mqtt.connect()
        .await
        .context("failed to connect to the MQTT broker")?;

    let mut relay = ShadowRelay::new(
        args.compensation.auxiliary_source(),
        mqtt,
        SystemClock,
        compensator,
        target,
        args.qos,
    );

    tracing::info!(input_topics = ?args.input_topics, %output_topic, "relaying readings");
    loop {
        let message = tokio::select! {
            received = inbound.recv() => match received {
                Ok(message) => message,
                Err(_) => {
                    tracing::warn!("inbound stream closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, shutting down");
                break;
            }
        };

        let Some(message) = message else {
            tracing::warn!("connection lost, waiting for reconnect");
            continue;
        };
        if message.topic() == output_topic {
            // Our own output matched an input filter.
            continue;
        }

        if let Err(e) = relay.handle(message.topic(), message.payload()).await {
            tracing::error!(error = %e, topic = message.topic(), "dropping inbound event");
        }
    }

    relay
        .publisher()
        .disconnect()
        .await
        .context("failed to disconnect from the MQTT broker")
}
