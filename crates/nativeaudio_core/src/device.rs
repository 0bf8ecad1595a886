//! Audio Device Enumeration
//!
//! Diagnostic listing of the host's devices, printed by the CLI's `devices`
//! command. The engine itself only ever opens the defaults through
//! `CpalBackend`.

use std::fmt;

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Rates checked against each device's supported ranges
const PROBE_RATES: [u32; 8] = [8000, 16000, 22050, 32000, 44100, 48000, 96000, 192000];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Input,
    Output,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDevice {
    pub name: String,

    pub device_type: DeviceType,

    /// Whether this is the system default device
    pub is_default: bool,

    /// Rate the device prefers, if it reports one
    pub default_sample_rate: Option<u32>,

    /// Supported rates among the common ones (may be empty if querying failed)
    pub sample_rates: Vec<u32>,

    pub max_channels: u16,
}

impl fmt::Display for AudioDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.device_type {
            DeviceType::Input => "in ",
            DeviceType::Output => "out",
        };
        let marker = if self.is_default { "*" } else { " " };
        write!(
            f,
            "{} {} {} ({} ch, {:?} Hz)",
            marker, kind, self.name, self.max_channels, self.sample_rates
        )
    }
}

impl AudioDevice {
    /// Every input and output device of the default host
    pub fn enumerate_all() -> EngineResult<Vec<AudioDevice>> {
        let host = cpal::default_host();
        let default_input = host.default_input_device().and_then(|d| d.name().ok());
        let default_output = host.default_output_device().and_then(|d| d.name().ok());

        let mut devices = Vec::new();
        if let Ok(inputs) = host.input_devices() {
            devices.extend(inputs.filter_map(|d| {
                Self::from_cpal_device(&d, DeviceType::Input, default_input.as_deref()).ok()
            }));
        }
        if let Ok(outputs) = host.output_devices() {
            devices.extend(outputs.filter_map(|d| {
                Self::from_cpal_device(&d, DeviceType::Output, default_output.as_deref()).ok()
            }));
        }

        if devices.is_empty() {
            return Err(EngineError::NoDevicesFound);
        }
        Ok(devices)
    }

    fn from_cpal_device(
        device: &cpal::Device,
        device_type: DeviceType,
        default_name: Option<&str>,
    ) -> EngineResult<Self> {
        let name = device
            .name()
            .map_err(|e| EngineError::DeviceNotFound(e.to_string()))?;
        let is_default = default_name == Some(name.as_str());

        let (default_sample_rate, ranges) = match device_type {
            DeviceType::Input => (
                device.default_input_config().ok().map(|c| c.sample_rate().0),
                device
                    .supported_input_configs()
                    .map(|c| c.collect::<Vec<_>>())
                    .unwrap_or_default(),
            ),
            DeviceType::Output => (
                device.default_output_config().ok().map(|c| c.sample_rate().0),
                device
                    .supported_output_configs()
                    .map(|c| c.collect::<Vec<_>>())
                    .unwrap_or_default(),
            ),
        };
        let (sample_rates, max_channels) = summarize_ranges(&ranges);

        Ok(AudioDevice {
            name,
            device_type,
            is_default,
            default_sample_rate,
            sample_rates,
            max_channels,
        })
    }
}

fn summarize_ranges(ranges: &[cpal::SupportedStreamConfigRange]) -> (Vec<u32>, u16) {
    let mut sample_rates: Vec<u32> = PROBE_RATES
        .iter()
        .copied()
        .filter(|rate| {
            ranges
                .iter()
                .any(|r| (r.min_sample_rate().0..=r.max_sample_rate().0).contains(rate))
        })
        .collect();
    sample_rates.dedup();
    let max_channels = ranges.iter().map(|r| r.channels()).max().unwrap_or(0);
    (sample_rates, max_channels)
}
