//! Output device lookup and stream configuration for the cpal backend

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleFormat, StreamConfig};

use super::config::OutputConfig;
use super::error::{AudioError, AudioResult};

/// Names of all output devices on the default host
pub fn list_output_devices() -> Vec<String> {
    let host = cpal::default_host();
    match host.output_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            log::debug!("[CPAL] Could not enumerate output devices: {}", e);
            Vec::new()
        }
    }
}

/// Find the configured output device, or the host default
pub fn find_output_device(name: Option<&str>) -> AudioResult<cpal::Device> {
    let host = cpal::default_host();

    let Some(name) = name else {
        return host.default_output_device().ok_or(AudioError::NoDevices);
    };

    let devices = host
        .output_devices()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?;
    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }
    Err(AudioError::DeviceNotFound(name.to_string()))
}

/// Pick an f32 stream configuration, preferring `preferred_rate`
///
/// Falls back to the device's maximum rate when it can't run at the
/// preferred one; sinks then resample their buffers on write.
pub fn choose_stream_config(
    device: &cpal::Device,
    preferred_rate: u32,
    config: &OutputConfig,
) -> AudioResult<StreamConfig> {
    let supported: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .collect();

    let in_range = |c: &&cpal::SupportedStreamConfigRange| {
        preferred_rate >= c.min_sample_rate().0 && preferred_rate <= c.max_sample_rate().0
    };

    let best = supported
        .iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .find(in_range)
        .or_else(|| {
            supported
                .iter()
                .find(|c| c.sample_format() == SampleFormat::F32)
        })
        .ok_or_else(|| AudioError::ConfigError("No f32 output configuration found".to_string()))?;

    let sample_rate = if in_range(&best) {
        cpal::SampleRate(preferred_rate)
    } else {
        best.max_sample_rate()
    };

    let buffer_size = match config.buffer_frames {
        Some(frames) => cpal::BufferSize::Fixed(frames),
        None => cpal::BufferSize::Default,
    };

    Ok(StreamConfig {
        channels: best.channels(),
        sample_rate,
        buffer_size,
    })
}
