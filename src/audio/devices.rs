//! Capture-device catalog: enumeration, default-monitor resolution, selection.

use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait};
use tracing::{debug, warn};

use crate::audio::SpectrumSource;
use crate::error::AudioError;

/// What kind of endpoint a capture device is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Loopback of an output sink ("what you hear").
    SinkMonitor,
    /// A real capture source (microphone, line-in).
    Source,
}

/// One capture-capable endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub name: String,
    pub kind: DeviceKind,
}

impl DeviceDescriptor {
    /// Classify by name: PulseAudio/PipeWire expose sink loopbacks as
    /// `<sink>.monitor` sources.
    pub fn from_name(name: impl Into<String>) -> Self {
        let name = name.into();
        let kind = if name.contains(".monitor") {
            DeviceKind::SinkMonitor
        } else {
            DeviceKind::Source
        };
        Self { name, kind }
    }
}

/// Enumerates capture endpoints and tracks the active selection.
pub struct SourceCatalog {
    host: cpal::Host,
    devices: Vec<DeviceDescriptor>,
    active: Option<DeviceDescriptor>,
}

impl Default for SourceCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceCatalog {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
            devices: Vec::new(),
            active: None,
        }
    }

    /// Query the platform for currently available capture endpoints.
    /// Ordering is whatever the platform returns.
    pub fn refresh(&mut self) -> Result<&[DeviceDescriptor], AudioError> {
        let devices = self
            .host
            .input_devices()
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;

        self.devices.clear();
        for device in devices {
            match device.name() {
                Ok(name) => self.devices.push(DeviceDescriptor::from_name(name)),
                Err(e) => warn!("skipping unnameable capture device: {e}"),
            }
        }
        debug!(count = self.devices.len(), "refreshed capture catalog");
        Ok(&self.devices)
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    pub fn active(&self) -> Option<&DeviceDescriptor> {
        self.active.as_ref()
    }

    /// Resolve the system default output's monitor endpoint.
    ///
    /// Fails with `NoDefaultDevice` when no default output is configured or
    /// its monitor has not appeared yet; callers retry rather than treating
    /// this as fatal.
    pub fn current_default(&self) -> Result<DeviceDescriptor, AudioError> {
        let output = self
            .host
            .default_output_device()
            .ok_or(AudioError::NoDefaultDevice)?;
        let sink_name = output
            .name()
            .map_err(|_| AudioError::NoDefaultDevice)?;
        let monitor_name = format!("{sink_name}.monitor");

        let mut inputs = self
            .host
            .input_devices()
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;

        if inputs.any(|d| d.name().map(|n| n == monitor_name).unwrap_or(false)) {
            return Ok(DeviceDescriptor::from_name(monitor_name));
        }

        // default sink has no monitor entry yet; any monitor beats failing
        let inputs = self
            .host
            .input_devices()
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;
        for device in inputs {
            if let Ok(name) = device.name() {
                if name.contains(".monitor") {
                    return Ok(DeviceDescriptor::from_name(name));
                }
            }
        }

        Err(AudioError::NoDefaultDevice)
    }

    /// Poll `current_default` until it resolves or `attempts` run out.
    pub fn default_with_retry(
        &self,
        attempts: u32,
        delay: Duration,
    ) -> Result<DeviceDescriptor, AudioError> {
        let mut last = AudioError::NoDefaultDevice;
        for attempt in 0..attempts.max(1) {
            match self.current_default() {
                Ok(device) => return Ok(device),
                Err(e @ AudioError::NoDefaultDevice) => {
                    debug!(attempt, "default monitor not available yet");
                    last = e;
                    thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last)
    }

    /// Record the selection and hot-swap the running source onto it.
    pub fn select(
        &mut self,
        device: &DeviceDescriptor,
        source: &mut SpectrumSource,
    ) -> Result<(), AudioError> {
        source.set_device(device)?;
        self.active = Some(device.clone());
        Ok(())
    }
}

/// Look up a cpal device by catalog name.
pub fn open_device(name: &str) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;
    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }
    Err(AudioError::DeviceUnavailable(format!("no such device: {name}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitor_suffix_classifies_as_sink_monitor() {
        let d = DeviceDescriptor::from_name("alsa_output.pci-0000_00_1b.0.analog-stereo.monitor");
        assert_eq!(d.kind, DeviceKind::SinkMonitor);

        let d = DeviceDescriptor::from_name("alsa_input.usb-mic.mono-fallback");
        assert_eq!(d.kind, DeviceKind::Source);
    }

    #[test]
    fn catalog_starts_with_no_selection() {
        let catalog = SourceCatalog::new();
        assert!(catalog.active().is_none());
        assert!(catalog.devices().is_empty());
    }
}
