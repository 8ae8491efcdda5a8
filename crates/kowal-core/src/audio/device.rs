//! Audio device enumeration
//!
//! Lists output and capture devices from every available cpal host, so a
//! device behind JACK and one behind ALSA can both be selected by name.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Host, HostId};

use super::config::DeviceId;
use super::error::{AudioError, AudioResult};

/// Stream direction a device is enumerated for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Output,
    Input,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Output => "output",
            Direction::Input => "input",
        }
    }
}

/// Get a human-readable name for a host ID
fn host_name(host_id: HostId) -> String {
    let name = format!("{:?}", host_id);
    match name.as_str() {
        "Alsa" => "ALSA".to_string(),
        "Jack" => "JACK".to_string(),
        "Wasapi" => "WASAPI".to_string(),
        _ => name,
    }
}

fn get_host_by_name(name: &str) -> Option<Host> {
    cpal::available_hosts()
        .into_iter()
        .find(|id| host_name(*id) == name)
        .and_then(|id| cpal::host_from_id(id).ok())
}

fn devices_of(host: &Host, direction: Direction) -> Option<Vec<cpal::Device>> {
    let devices = match direction {
        Direction::Output => host.output_devices().map(|d| d.collect::<Vec<_>>()),
        Direction::Input => host.input_devices().map(|d| d.collect::<Vec<_>>()),
    };
    devices.ok()
}

/// Information about an audio device
#[derive(Debug, Clone)]
pub struct AudioDevice {
    /// Device identifier for configuration (includes host info)
    pub id: DeviceId,
    pub name: String,
    /// Host backend name (e.g., "ALSA", "JACK")
    pub host: String,
    /// Whether this is the default device of its host
    pub is_default: bool,
    /// Common sample rates within the supported ranges
    pub sample_rates: Vec<u32>,
    pub max_channels: u16,
}

impl std::fmt::Display for AudioDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.host, self.name)
    }
}

/// Enumerate devices of one direction from all hosts
///
/// Default devices come first, then devices are ordered by host and name.
pub fn get_devices(direction: Direction) -> AudioResult<Vec<AudioDevice>> {
    let mut all_devices: Vec<AudioDevice> = Vec::new();

    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(h) => h,
            Err(e) => {
                log::debug!("Could not initialize host {:?}: {}", host_id, e);
                continue;
            }
        };
        let host_label = host_name(host_id);

        let default_name = match direction {
            Direction::Output => host.default_output_device(),
            Direction::Input => host.default_input_device(),
        }
        .and_then(|d| d.name().ok());

        let Some(devices) = devices_of(&host, direction) else {
            log::debug!("Could not enumerate devices for {:?}", host_id);
            continue;
        };

        for device in devices {
            let Ok(name) = device.name() else { continue };

            let ranges: Vec<(u32, u32, u16)> = match direction {
                Direction::Output => device.supported_output_configs().map(|c| {
                    c.map(|c| (c.min_sample_rate().0, c.max_sample_rate().0, c.channels()))
                        .collect::<Vec<_>>()
                }),
                Direction::Input => device.supported_input_configs().map(|c| {
                    c.map(|c| (c.min_sample_rate().0, c.max_sample_rate().0, c.channels()))
                        .collect::<Vec<_>>()
                }),
            }
            .unwrap_or_default();
            if ranges.is_empty() {
                continue;
            }

            let mut sample_rates: Vec<u32> = Vec::new();
            let mut max_channels: u16 = 0;
            for (min, max, channels) in &ranges {
                max_channels = max_channels.max(*channels);
                for rate in [22050, 44100, 48000, 88200, 96000] {
                    if rate >= *min && rate <= *max && !sample_rates.contains(&rate) {
                        sample_rates.push(rate);
                    }
                }
            }
            sample_rates.sort_unstable();

            all_devices.push(AudioDevice {
                id: DeviceId::with_host(&name, &host_label),
                is_default: default_name.as_ref() == Some(&name),
                name,
                host: host_label.clone(),
                sample_rates,
                max_channels,
            });
        }
    }

    if all_devices.is_empty() {
        return Err(AudioError::NoDevices(direction.label()));
    }

    all_devices.sort_by(|a, b| {
        b.is_default
            .cmp(&a.is_default)
            .then_with(|| a.host.cmp(&b.host))
            .then_with(|| a.name.cmp(&b.name))
    });

    log::info!(
        "Enumerated {} audio {} devices",
        all_devices.len(),
        direction.label()
    );
    Ok(all_devices)
}

/// Get available output devices, logging instead of failing
pub fn get_available_output_devices() -> Vec<AudioDevice> {
    get_devices(Direction::Output).unwrap_or_else(|e| {
        log::warn!("Failed to enumerate audio devices: {}", e);
        Vec::new()
    })
}

/// Find a device by its ID
///
/// Uses the host named in the ID if there is one, otherwise searches every
/// available host.
pub fn find_device_by_id(id: &DeviceId, direction: Direction) -> AudioResult<cpal::Device> {
    let matches = |d: &cpal::Device| d.name().ok().as_ref() == Some(&id.name);

    if let Some(host) = id.host.as_deref().and_then(get_host_by_name) {
        return devices_of(&host, direction)
            .ok_or_else(|| AudioError::ConfigError(format!("cannot list devices of {}", id.display_label())))?
            .into_iter()
            .find(matches)
            .ok_or_else(|| AudioError::DeviceNotFound(id.display_label()));
    }

    cpal::available_hosts()
        .into_iter()
        .filter_map(|host_id| cpal::host_from_id(host_id).ok())
        .filter_map(|host| devices_of(&host, direction))
        .flatten()
        .find(matches)
        .ok_or_else(|| AudioError::DeviceNotFound(id.name.clone()))
}

/// Get the default device of the default host
pub fn get_cpal_default_device(direction: Direction) -> AudioResult<cpal::Device> {
    let host = cpal::default_host();
    let device = match direction {
        Direction::Output => host.default_output_device(),
        Direction::Input => host.default_input_device(),
    };
    device.ok_or_else(|| AudioError::NoDefaultDevice(format!("no default {} device", direction.label())))
}

/// Resolve a configured device, falling back to the default one
pub fn resolve_device(id: Option<&DeviceId>, direction: Direction) -> AudioResult<cpal::Device> {
    match id {
        Some(id) => find_device_by_id(id, direction),
        None => get_cpal_default_device(direction),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_enumeration() {
        // Depends on the machine; CI usually has no devices
        match get_devices(Direction::Output) {
            Ok(devices) => {
                for device in &devices {
                    println!(
                        "  - {} (default: {}, channels: {}, rates: {:?})",
                        device, device.is_default, device.max_channels, device.sample_rates
                    );
                }
            }
            Err(AudioError::NoDevices(_)) => println!("No audio devices available"),
            Err(e) => println!("Error enumerating devices: {}", e),
        }
    }

    #[test]
    fn test_host_names() {
        for host_id in cpal::available_hosts() {
            assert!(!host_name(host_id).is_empty());
        }
    }
}
