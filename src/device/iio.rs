//! Linux Industrial I/O (IIO) adapters.
//!
//! Humidity sensors such as the DHT22 (kernel `dht11` driver) and ADC boards
//! are exposed under `/sys/bus/iio/devices/iio:deviceN/`. Reading an attribute
//! triggers a conversion; transient driver failures surface as `EIO` or
//! `ETIMEDOUT` and are reported as [`DeviceError`]s.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::device::{AnalogSample, AnalogSource, ClimateReading, ClimateSource, DeviceError};

const TEMP_INPUT: &str = "in_temp_input";
const HUMIDITY_INPUT: &str = "in_humidityrelative_input";

fn read_attr<T: FromStr>(path: &Path) -> Result<T, DeviceError> {
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        ErrorKind::TimedOut => DeviceError::Timeout,
        _ => DeviceError::Io(e),
    })?;
    content.trim().parse().map_err(|_| {
        DeviceError::InvalidReading(format!(
            "'{}' in {}",
            content.trim(),
            path.display()
        ))
    })
}

fn require_dir(dir: &Path) -> Result<(), DeviceError> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(DeviceError::Unavailable(format!(
            "IIO device directory '{}' not found",
            dir.display()
        )))
    }
}

/// Temperature / humidity sensor read through IIO.
#[derive(Debug, Clone)]
pub struct IioClimate {
    dir: PathBuf,
}

impl IioClimate {
    /// Bind to the IIO device directory.
    ///
    /// # Errors
    /// Returns `DeviceError::Unavailable` if the directory or its
    /// temperature/humidity attributes are missing.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, DeviceError> {
        let dir = dir.into();
        require_dir(&dir)?;
        for attr in [TEMP_INPUT, HUMIDITY_INPUT] {
            if !dir.join(attr).exists() {
                return Err(DeviceError::Unavailable(format!(
                    "'{}' has no {attr} attribute",
                    dir.display()
                )));
            }
        }
        Ok(Self { dir })
    }
}

impl ClimateSource for IioClimate {
    fn read(&mut self) -> Result<ClimateReading, DeviceError> {
        // Both attributes are in thousandths.
        let milli_c: f64 = read_attr(&self.dir.join(TEMP_INPUT))?;
        let milli_rh: f64 = read_attr(&self.dir.join(HUMIDITY_INPUT))?;
        Ok(ClimateReading {
            temperature: milli_c / 1000.0,
            humidity: milli_rh / 1000.0,
        })
    }
}

/// Multi-channel ADC read through IIO.
///
/// Cloning is cheap; every sensor on the same board gets its own handle.
#[derive(Debug, Clone)]
pub struct IioAnalog {
    dir: PathBuf,
}

impl IioAnalog {
    /// Bind to the IIO device directory.
    ///
    /// # Errors
    /// Returns `DeviceError::Unavailable` if the directory does not exist.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, DeviceError> {
        let dir = dir.into();
        require_dir(&dir)?;
        Ok(Self { dir })
    }

    /// Check that `channel` exists on this device.
    pub fn check_channel(&self, channel: u8) -> Result<(), DeviceError> {
        let raw = self.dir.join(format!("in_voltage{channel}_raw"));
        if raw.exists() {
            Ok(())
        } else {
            Err(DeviceError::Unavailable(format!(
                "'{}' has no voltage channel {channel}",
                self.dir.display()
            )))
        }
    }

    /// Millivolts per count, per-channel scale first, then the shared one.
    fn scale(&self, channel: u8) -> Result<f64, DeviceError> {
        let per_channel = self.dir.join(format!("in_voltage{channel}_scale"));
        if per_channel.exists() {
            return read_attr(&per_channel);
        }
        read_attr(&self.dir.join("in_voltage_scale"))
    }
}

impl AnalogSource for IioAnalog {
    fn sample(&mut self, channel: u8) -> Result<AnalogSample, DeviceError> {
        let raw: i64 = read_attr(&self.dir.join(format!("in_voltage{channel}_raw")))?;
        let scale = self.scale(channel)?;
        Ok(AnalogSample {
            raw,
            volts: raw as f64 * scale / 1000.0,
        })
    }
}
