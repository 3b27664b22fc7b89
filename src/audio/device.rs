//! Audio device enumeration and stream configuration

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleRate, StreamConfig, SupportedStreamConfigRange};
use serde::Serialize;

use crate::error::AudioError;

/// Device description reported by the control API and `--list-devices`
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// Wrapper around cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
}

impl AudioDevice {
    pub fn from_cpal(device: cpal::Device, is_input: bool, is_output: bool) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
            is_input,
            is_output,
        }
    }

    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    /// Pick a stream configuration at `sample_rate`, preferring mono.
    ///
    /// Falls back to any channel count that supports the rate; callers
    /// capture the first channel or duplicate mono samples across channels.
    pub fn stream_config(&self, sample_rate: u32) -> Result<StreamConfig, AudioError> {
        let ranges: Vec<SupportedStreamConfigRange> = if self.is_input {
            self.inner
                .supported_input_configs()
                .map_err(|e| AudioError::CpalError(e.to_string()))?
                .collect()
        } else {
            self.inner
                .supported_output_configs()
                .map_err(|e| AudioError::CpalError(e.to_string()))?
                .collect()
        };

        let rate = SampleRate(sample_rate);
        let supports_rate =
            |c: &&SupportedStreamConfigRange| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate;

        let chosen = ranges
            .iter()
            .filter(supports_rate)
            .find(|c| c.channels() == 1)
            .or_else(|| {
                ranges
                    .iter()
                    .filter(supports_rate)
                    .min_by_key(|c| c.channels())
            })
            .ok_or_else(|| {
                AudioError::UnsupportedFormat(format!(
                    "{} does not support {} Hz",
                    self.name, sample_rate
                ))
            })?;

        let config = chosen.clone().with_sample_rate(rate).config();

        tracing::debug!(
            "Selected {} Hz, {} channel(s) on {}",
            sample_rate,
            config.channels,
            self.name
        );

        Ok(config)
    }
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                let is_default = default_input_name.as_ref() == Some(&name);
                let (sample_rates, channels) = get_device_capabilities(&device, true);

                devices.push(AudioDeviceInfo {
                    id: format!("input:{}", name),
                    name,
                    is_input: true,
                    is_output: false,
                    is_default,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let is_default = default_output_name.as_ref() == Some(&name);
                let (sample_rates, channels) = get_device_capabilities(&device, false);

                devices.push(AudioDeviceInfo {
                    id: format!("output:{}", name),
                    name,
                    is_input: false,
                    is_output: true,
                    is_default,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    devices
}

/// Get device capabilities
fn get_device_capabilities(device: &cpal::Device, is_input: bool) -> (Vec<u32>, Vec<u16>) {
    let configs: Vec<SupportedStreamConfigRange> = if is_input {
        device
            .supported_input_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default()
    } else {
        device
            .supported_output_configs()
            .map(|iter| iter.collect())
            .unwrap_or_default()
    };

    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();
    for config in &configs {
        // Rates the session actually uses come first in the list
        for rate_val in [16000u32, 24000, 44100, 48000] {
            let rate = SampleRate(rate_val);
            if rate >= config.min_sample_rate()
                && rate <= config.max_sample_rate()
                && !sample_rates.contains(&rate_val)
            {
                sample_rates.push(rate_val);
            }
        }

        if !channels.contains(&config.channels()) {
            channels.push(config.channels());
        }
    }

    sample_rates.sort_unstable();
    channels.sort_unstable();

    (sample_rates, channels)
}

/// Get a device by its ID (`input:<name>` or `output:<name>`)
pub fn get_device_by_id(id: &str) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();

    let (is_input, name) = if let Some(name) = id.strip_prefix("input:") {
        (true, name)
    } else if let Some(name) = id.strip_prefix("output:") {
        (false, name)
    } else {
        (true, id)
    };

    let devices = if is_input {
        host.input_devices()
    } else {
        host.output_devices()
    }
    .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(AudioDevice::from_cpal(device, is_input, !is_input));
        }
    }

    Err(AudioError::DeviceNotFound(id.to_string()))
}

/// Get default input device
pub fn get_default_input_device() -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    host.default_input_device()
        .map(|d| AudioDevice::from_cpal(d, true, false))
        .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string()))
}

/// Get default output device
pub fn get_default_output_device() -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    host.default_output_device()
        .map(|d| AudioDevice::from_cpal(d, false, true))
        .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))
}

/// Resolve a configured device id, or the default device when unset
pub fn resolve_device(id: Option<&str>, is_input: bool) -> Result<AudioDevice, AudioError> {
    match id {
        Some(id) => get_device_by_id(id),
        None if is_input => get_default_input_device(),
        None => get_default_output_device(),
    }
}
