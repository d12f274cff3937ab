use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use sensor_telemetry::cli::{CompensationArgs, ConnectionArgs};
use sensor_telemetry::mq::shadow_update_topic;
use sensor_telemetry::payload::PayloadFormat;
use sensor_telemetry::ports::Qos;

/// Publish compensated sensor readings over MQTT.
#[derive(Debug, Parser)]
pub struct Args {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub compensation: CompensationArgs,

    /// Targeted topic [default: the shadow update topic with --format shadow]
    #[arg(short = 't', long, env = "MQTT_TOPIC")]
    pub topic: Option<String>,

    /// Thing whose shadow is updated [default: the client id]
    #[arg(long, env = "THING_NAME")]
    pub thing_name: Option<String>,

    #[arg(long, default_value_t = PayloadFormat::Telemetry)]
    pub format: PayloadFormat,

    /// Seconds between readings
    #[arg(long, default_value_t = 3)]
    pub interval: u64,

    #[arg(long, default_value_t = Qos::AtLeastOnce)]
    pub qos: Qos,

    /// IIO device directory of the environment sensor
    #[arg(long, env = "IIO_DEVICE", default_value = "/sys/bus/iio/devices/iio:device0")]
    pub iio_device: PathBuf,

    /// Log the shadow service's accepted/rejected responses
    #[arg(long)]
    pub watch_shadow: bool,
}

impl Args {
    pub fn thing_name(&self) -> &str {
        self.thing_name
            .as_deref()
            .unwrap_or(&self.connection.client_id)
    }

    pub fn topic(&self) -> Option<String> {
        match (&self.topic, self.format) {
            (Some(topic), _) => Some(topic.clone()),
            (None, PayloadFormat::Shadow) => Some(shadow_update_topic(self.thing_name())),
            (None, _) => None,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }
}
