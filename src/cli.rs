//! Command-line argument groups shared by the binaries.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};

use crate::compensation::{
    self, AuxiliaryFailure, CompensationConfig, Compensator, Policy, Sampling,
    DEFAULT_BURST_SAMPLES, DEFAULT_WINDOW,
};
use crate::mq::{MqttSettings, TlsFiles};
use crate::sysfs::{CpuTemperature, ThermalZone, Vcgencmd, DEFAULT_THERMAL_ZONE};

/// Broker connection.
#[derive(Debug, Clone, Args)]
pub struct ConnectionArgs {
    /// Broker URI, e.g. ssl://<prefix>-ats.iot.<region>.amazonaws.com:8883
    #[arg(short = 'e', long, env = "MQTT_SERVER_URI")]
    pub endpoint: String,

    #[arg(long, env = "MQTT_CLIENT_ID", default_value = "basicPubSub")]
    pub client_id: String,

    /// Root CA file path
    #[arg(short = 'r', long, env = "MQTT_ROOT_CA", requires_all = ["cert", "key"])]
    pub root_ca: Option<PathBuf>,

    /// Certificate file path
    #[arg(short = 'c', long, env = "MQTT_CERT", requires = "root_ca")]
    pub cert: Option<PathBuf>,

    /// Private key file path
    #[arg(short = 'k', long, env = "MQTT_KEY", requires = "root_ca")]
    pub key: Option<PathBuf>,

    /// Connect with MQTT v5 and attach message properties
    #[arg(long)]
    pub mqtt_v5: bool,

    /// Messages buffered while the connection is down
    #[arg(long, default_value_t = 1000)]
    pub offline_buffer: i32,
}

impl ConnectionArgs {
    pub fn settings(&self) -> MqttSettings {
        let tls = match (&self.root_ca, &self.cert, &self.key) {
            (Some(root_ca), Some(certificate), Some(private_key)) => Some(TlsFiles {
                root_ca: root_ca.clone(),
                certificate: certificate.clone(),
                private_key: private_key.clone(),
            }),
            _ => None,
        };

        MqttSettings {
            tls,
            mqtt_v5: self.mqtt_v5,
            offline_buffer: self.offline_buffer,
            ..MqttSettings::new(&self.endpoint, &self.client_id)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    None,
    SubtractiveProxy,
    DampedOffset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SamplingArg {
    Rolling,
    Burst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuxiliaryFailureArg {
    FallBackToRaw,
    LastKnown,
    Fail,
}

impl From<AuxiliaryFailureArg> for AuxiliaryFailure {
    fn from(arg: AuxiliaryFailureArg) -> Self {
        match arg {
            AuxiliaryFailureArg::FallBackToRaw => AuxiliaryFailure::FallBackToRaw,
            AuxiliaryFailureArg::LastKnown => AuxiliaryFailure::LastKnown,
            AuxiliaryFailureArg::Fail => AuxiliaryFailure::Fail,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuxiliarySourceArg {
    ThermalZone,
    Vcgencmd,
}

/// Temperature compensation.
#[derive(Debug, Clone, Args)]
pub struct CompensationArgs {
    /// Compensation policy [default: depends on the binary]
    #[arg(long, value_enum)]
    pub compensation: Option<PolicyArg>,

    /// Damping factor of the damped-offset policy; smaller numbers adjust
    /// the temperature down harder
    #[arg(long, default_value_t = 1.0)]
    pub factor: f64,

    /// How the CPU temperature is sampled [default: depends on the binary]
    #[arg(long, value_enum)]
    pub sampling: Option<SamplingArg>,

    /// Rolling window size
    #[arg(long, default_value_t = DEFAULT_WINDOW)]
    pub window: usize,

    /// Samples per burst
    #[arg(long, default_value_t = DEFAULT_BURST_SAMPLES)]
    pub burst_samples: usize,

    /// Milliseconds between samples of a burst
    #[arg(long, default_value_t = 1000)]
    pub burst_spacing_ms: u64,

    /// What to publish when the CPU temperature cannot be read
    #[arg(long, value_enum, default_value_t = AuxiliaryFailureArg::FallBackToRaw)]
    pub on_auxiliary_failure: AuxiliaryFailureArg,

    /// Where the CPU temperature comes from
    #[arg(long, value_enum, default_value_t = AuxiliarySourceArg::ThermalZone)]
    pub auxiliary: AuxiliarySourceArg,

    #[arg(long, env = "THERMAL_ZONE", default_value = DEFAULT_THERMAL_ZONE)]
    pub thermal_zone: PathBuf,
}

impl CompensationArgs {
    pub fn compensator(
        &self,
        default_policy: PolicyArg,
        default_sampling: SamplingArg,
    ) -> Result<Compensator, compensation::Error> {
        let policy = match self.compensation.unwrap_or(default_policy) {
            PolicyArg::None => return Ok(Compensator::disabled()),
            PolicyArg::SubtractiveProxy => Policy::SubtractiveProxy,
            PolicyArg::DampedOffset => Policy::DampedOffset {
                factor: self.factor,
            },
        };
        let sampling = match self.sampling.unwrap_or(default_sampling) {
            SamplingArg::Rolling => Sampling::Rolling {
                window: self.window,
            },
            SamplingArg::Burst => Sampling::Burst {
                samples: self.burst_samples,
                spacing: Duration::from_millis(self.burst_spacing_ms),
            },
        };

        Compensator::new(CompensationConfig {
            policy,
            sampling,
            on_auxiliary_failure: self.on_auxiliary_failure.into(),
        })
    }

    pub fn auxiliary_source(&self) -> CpuTemperature {
        match self.auxiliary {
            AuxiliarySourceArg::ThermalZone => {
                CpuTemperature::ThermalZone(ThermalZone::new(&self.thermal_zone))
            }
            AuxiliarySourceArg::Vcgencmd => CpuTemperature::Vcgencmd(Vcgencmd::new()),
        }
    }
}
