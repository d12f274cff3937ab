use clap::Parser;
use sensor_telemetry::cli::{CompensationArgs, ConnectionArgs};
use sensor_telemetry::ports::Qos;
use sensor_telemetry::relay::RelayTarget;

/// Compensate readings published by other devices and forward them to a
/// device shadow or a republish topic.
#[derive(Debug, Parser)]
pub struct Args {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub compensation: CompensationArgs,

    /// Topic filter readings arrive on; repeat for several
    #[arg(long = "input-topic", required = true)]
    pub input_topics: Vec<String>,

    /// Republish to this topic instead of updating the shadow
    #[arg(long)]
    pub republish_topic: Option<String>,

    /// Thing whose shadow is updated [default: the client id]
    #[arg(long, env = "THING_NAME")]
    pub thing_name: Option<String>,

    #[arg(long, default_value_t = Qos::AtMostOnce)]
    pub qos: Qos,
}

impl Args {
    pub fn target(&self) -> RelayTarget {
        match &self.republish_topic {
            Some(topic) => RelayTarget::Republish {
                topic: topic.clone(),
            },
            None => RelayTarget::Shadow {
                thing_name: self
                    .thing_name
                    .clone()
                    .unwrap_or_else(|| self.connection.client_id.clone()),
            },
        }
    }
}
