//! Audio device enumeration.

use serde::{Deserialize, Serialize};

/// Which side of the duplex a device serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDirection {
    Output,
    Input,
}

/// Metadata about an audio device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    pub direction: DeviceDirection,
    /// Whether this is the system default for its direction.
    pub is_default: bool,
    /// Default sample rate, when the device reports one.
    pub default_sample_rate: Option<u32>,
}

/// Default device first, then alphabetical.
pub fn sort_devices(list: &mut [DeviceInfo]) {
    list.sort_by_key(|d| (!d.is_default, d.name.to_ascii_lowercase()));
}

/// List all available audio output devices on the system.
///
/// Returns an empty `Vec` if no devices exist or enumeration fails.
#[cfg(feature = "audio-cpal")]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    match host.output_devices() {
        Ok(devices) => {
            let mut list = devices
                .enumerate()
                .map(|(idx, device)| {
                    let name = device
                        .name()
                        .unwrap_or_else(|_| format!("Output Device {}", idx + 1));
                    DeviceInfo {
                        is_default: default_name.as_deref() == Some(name.as_str()),
                        default_sample_rate: device
                            .default_output_config()
                            .ok()
                            .map(|c| c.sample_rate().0),
                        name,
                        direction: DeviceDirection::Output,
                    }
                })
                .collect::<Vec<_>>();
            sort_devices(&mut list);
            list
        }
        Err(e) => {
            tracing::warn!("failed to enumerate output devices: {e}");
            vec![]
        }
    }
}

/// List all available audio input devices on the system.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    match host.input_devices() {
        Ok(devices) => {
            let mut list = devices
                .enumerate()
                .map(|(idx, device)| {
                    let name = device
                        .name()
                        .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
                    DeviceInfo {
                        is_default: default_name.as_deref() == Some(name.as_str()),
                        default_sample_rate: device
                            .default_input_config()
                            .ok()
                            .map(|c| c.sample_rate().0),
                        name,
                        direction: DeviceDirection::Input,
                    }
                })
                .collect::<Vec<_>>();
            sort_devices(&mut list);
            list
        }
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            vec![]
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str, is_default: bool) -> DeviceInfo {
        DeviceInfo {
            name: name.into(),
            direction: DeviceDirection::Output,
            is_default,
            default_sample_rate: Some(48_000),
        }
    }

    #[test]
    fn default_device_sorts_first() {
        let mut list = vec![
            device("b speakers", false),
            device("Z headphones", true),
            device("A monitor", false),
        ];
        sort_devices(&mut list);
        let names: Vec<_> = list.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["Z headphones", "A monitor", "b speakers"]);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(device("out", true)).unwrap();
        assert_eq!(json["isDefault"], true);
        assert_eq!(json["direction"], "output");
        assert_eq!(json["defaultSampleRate"], 48_000);
    }
}
