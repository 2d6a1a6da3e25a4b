//! Sensor configuration.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::{HostAddress, IioAnalog, IioClimate, TcpBridgeSession};
use crate::scheduler::SensorFactory;
use crate::sensor::{
    ClimateSensor, CurrentSensor, HostAddressSensor, MoistureSensor, OutlierConfig, PushOptions,
    PushSensor, SensorKind, current, moisture, push,
};

use super::validation::ConfigError;

fn default_required() -> bool {
    true
}

fn default_probe() -> SocketAddr {
    HostAddress::default().probe()
}

fn default_reference_channel() -> u8 {
    current::DEFAULT_REFERENCE_CHANNEL
}

fn default_samples() -> usize {
    moisture::DEFAULT_SAMPLES
}

fn default_sample_delay() -> Duration {
    moisture::DEFAULT_SAMPLE_DELAY
}

fn default_poll_interval() -> Duration {
    push::DEFAULT_POLL_INTERVAL
}

fn default_reconnect_delay() -> Duration {
    push::DEFAULT_RECONNECT_DELAY
}

/// Device-specific settings, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceConfig {
    /// Outbound IP address of the host.
    HostAddress {
        #[serde(default = "default_probe")]
        probe: SocketAddr,
    },

    /// IIO temperature / humidity sensor.
    Climate {
        /// IIO device directory, e.g. `/sys/bus/iio/devices/iio:device0`.
        device: PathBuf,
        /// Per-sensor outlier gate, overriding the global one.
        #[serde(default)]
        outlier: Option<OutlierConfig>,
    },

    /// Current sensor on an IIO ADC channel.
    Current {
        device: PathBuf,
        channel: u8,
        #[serde(default = "default_reference_channel")]
        reference_channel: u8,
    },

    /// Averaged moisture probe on an IIO ADC channel.
    Moisture {
        device: PathBuf,
        channel: u8,
        #[serde(default = "default_samples")]
        samples: usize,
        #[serde(default = "default_sample_delay", with = "humantime_serde")]
        sample_delay: Duration,
    },

    /// Push device behind a TCP bridge.
    PushBridge {
        /// Bridge address, `host:port`.
        address: String,
        /// Fields to record (default: charge controller telemetry).
        #[serde(default)]
        fields: Option<Vec<String>>,
        #[serde(default = "default_poll_interval", with = "humantime_serde")]
        poll_interval: Duration,
        #[serde(default = "default_reconnect_delay", with = "humantime_serde")]
        reconnect_delay: Duration,
    },
}

impl DeviceConfig {
    pub fn kind(&self) -> SensorKind {
        match self {
            Self::HostAddress { .. } => SensorKind::HostAddress,
            Self::Climate { .. } => SensorKind::Climate,
            Self::Current { .. } => SensorKind::Current,
            Self::Moisture { .. } => SensorKind::Moisture,
            Self::PushBridge { .. } => SensorKind::PushBridge,
        }
    }
}

/// One configured sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Unique name within the group (the record's `name` tag).
    pub name: String,

    /// Group override; defaults to the top-level `group`.
    #[serde(default)]
    pub group: Option<String>,

    /// Whether startup fails if the sensor cannot be built (default: true).
    #[serde(default = "default_required")]
    pub required: bool,

    #[serde(flatten)]
    pub device: DeviceConfig,
}

impl SensorConfig {
    /// Validate device-specific settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| ConfigError::invalid(format!("sensor '{}': {msg}", self.name));

        match &self.device {
            DeviceConfig::HostAddress { .. } => {}
            DeviceConfig::Climate { outlier, .. } => {
                if let Some(outlier) = outlier {
                    outlier.validate().map_err(|e| invalid(e.to_string()))?;
                }
            }
            DeviceConfig::Current {
                channel,
                reference_channel,
                ..
            } => {
                if channel == reference_channel {
                    return Err(invalid(format!(
                        "channel {channel} is also the reference channel"
                    )));
                }
            }
            DeviceConfig::Moisture { samples, .. } => {
                if *samples == 0 {
                    return Err(invalid("samples must be at least 1".to_string()));
                }
            }
            DeviceConfig::PushBridge {
                address,
                fields,
                poll_interval,
                reconnect_delay,
            } => {
                if address.trim().is_empty() {
                    return Err(invalid("bridge address cannot be empty".to_string()));
                }
                if poll_interval.is_zero() {
                    return Err(invalid("poll_interval must be non-zero".to_string()));
                }
                if reconnect_delay.is_zero() {
                    return Err(invalid("reconnect_delay must be non-zero".to_string()));
                }
                if fields.as_ref().is_some_and(|f| f.is_empty()) {
                    return Err(invalid("fields cannot be an empty list".to_string()));
                }
            }
        }
        Ok(())
    }

    /// Deferred constructor for this sensor.
    ///
    /// Devices are only opened when the factory runs, so a missing device
    /// surfaces as a startup failure of this sensor.
    pub fn factory(&self, default_group: &str, outlier: OutlierConfig) -> SensorFactory {
        let group = self.group.clone().unwrap_or_else(|| default_group.to_string());
        let name = self.name.clone();

        let factory = match self.device.clone() {
            DeviceConfig::HostAddress { probe } => SensorFactory::new(&self.name, move || {
                Ok(HostAddressSensor::new(group, name, HostAddress::new(probe)))
            }),

            DeviceConfig::Climate {
                device,
                outlier: own,
            } => SensorFactory::new(&self.name, move || {
                let source = IioClimate::open(device)?;
                Ok(ClimateSensor::new(group, name, source, own.unwrap_or(outlier)))
            }),

            DeviceConfig::Current {
                device,
                channel,
                reference_channel,
            } => SensorFactory::new(&self.name, move || {
                let adc = IioAnalog::open(device)?;
                adc.check_channel(channel)?;
                adc.check_channel(reference_channel)?;
                CurrentSensor::new(group, name, adc, channel, reference_channel)
            }),

            DeviceConfig::Moisture {
                device,
                channel,
                samples,
                sample_delay,
            } => SensorFactory::new(&self.name, move || {
                let adc = IioAnalog::open(device)?;
                adc.check_channel(channel)?;
                Ok(MoistureSensor::new(group, name, adc, channel)
                    .with_samples(samples)
                    .with_sample_delay(sample_delay))
            }),

            DeviceConfig::PushBridge {
                address,
                fields,
                poll_interval,
                reconnect_delay,
            } => SensorFactory::new(&self.name, move || {
                let options = PushOptions {
                    poll_interval,
                    reconnect_delay,
                };
                let sensor =
                    PushSensor::spawn(group, name, TcpBridgeSession::new(address), options);
                Ok(match fields {
                    Some(fields) => sensor.with_fields(fields),
                    None => sensor,
                })
            }),
        };
        factory.with_required(self.required)
    }
}

/// Validate every sensor and the uniqueness of `(group, name)`.
pub fn validate_sensors(sensors: &[SensorConfig], default_group: &str) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for sensor in sensors {
        if sensor.name.trim().is_empty() {
            return Err(ConfigError::invalid("sensor name cannot be empty"));
        }
        let group = sensor.group.as_deref().unwrap_or(default_group);
        if group.trim().is_empty() {
            return Err(ConfigError::invalid(format!(
                "sensor '{}': group cannot be empty",
                sensor.name
            )));
        }
        if !seen.insert((group, sensor.name.as_str())) {
            return Err(ConfigError::invalid(format!(
                "duplicate sensor name '{}' in group '{group}'",
                sensor.name
            )));
        }
        sensor.validate()?;
    }
    Ok(())
}
