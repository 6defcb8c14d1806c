//! Compute devices and the device → execution-provider lookup.
//!
//! [`DeviceResolver`] is built once at startup from [`DevicesConfig`] and then
//! shared read-only (`Arc<DeviceResolver>`) by every coordinator.  Resolving a
//! [`Device`] never touches hardware; it only validates the selection and
//! returns the [`ExecutionProvider`] a pipeline should be built against.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::DevicesConfig;

// ---------------------------------------------------------------------------
// DeviceError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeviceError {
    /// The selection does not match any device known to the resolver.
    #[error("Unknown device: {0}")]
    UnknownDevice(Device),
}

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

/// Broad class of a compute device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Cpu,
    Gpu,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cpu => f.write_str("CPU"),
            DeviceKind::Gpu => f.write_str("GPU"),
        }
    }
}

/// A selectable compute device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    /// Adapter index for GPUs; always `0` for the CPU.
    pub id: u32,
    pub kind: DeviceKind,
    /// Display name, e.g. `"CPU"` or the adapter description.
    pub name: String,
}

impl Device {
    pub fn cpu() -> Self {
        Self {
            id: 0,
            kind: DeviceKind::Cpu,
            name: "CPU".into(),
        }
    }

    pub fn gpu(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            kind: DeviceKind::Gpu,
            name: name.into(),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.kind, self.id, self.name)
    }
}

// ---------------------------------------------------------------------------
// ExecutionProvider
// ---------------------------------------------------------------------------

/// The concrete backend a pipeline is constructed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionProvider {
    pub device_id: u32,
    pub kind: DeviceKind,
    /// CPU worker threads handed to the inference kernels.
    pub threads: i32,
}

impl ExecutionProvider {
    pub fn use_gpu(&self) -> bool {
        self.kind == DeviceKind::Gpu
    }
}

/// Returns the number of CPU threads to use for inference, capped at 8.
pub fn optimal_threads() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get().min(8) as i32)
        .unwrap_or(4)
}

// ---------------------------------------------------------------------------
// DeviceResolver
// ---------------------------------------------------------------------------

/// Read-only registry of available devices.
#[derive(Debug, Clone)]
pub struct DeviceResolver {
    devices: Vec<Device>,
    prefer_gpu: bool,
    threads: i32,
}

impl DeviceResolver {
    /// A resolver over the CPU plus `gpus`.
    pub fn new(gpus: Vec<Device>, prefer_gpu: bool, threads: i32) -> Self {
        let mut devices = vec![Device::cpu()];
        devices.extend(gpus.into_iter().filter(|d| d.kind == DeviceKind::Gpu));
        Self {
            devices,
            prefer_gpu,
            threads: threads.max(1),
        }
    }

    pub fn from_config(config: &DevicesConfig) -> Self {
        let gpus = config
            .gpus
            .iter()
            .map(|g| Device::gpu(g.id, g.name.clone()))
            .collect();
        let threads = config.threads.unwrap_or_else(optimal_threads);
        Self::new(gpus, config.prefer_gpu, threads)
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// First GPU when GPUs are preferred and present, otherwise the CPU.
    pub fn default_device(&self) -> &Device {
        if self.prefer_gpu {
            if let Some(gpu) = self.devices.iter().find(|d| d.kind == DeviceKind::Gpu) {
                return gpu;
            }
        }
        &self.devices[0]
    }

    /// Look a device up by kind and id.
    pub fn find(&self, kind: DeviceKind, id: u32) -> Option<&Device> {
        self.devices.iter().find(|d| d.kind == kind && d.id == id)
    }

    /// Map a device selection to its execution provider.
    pub fn resolve(&self, device: &Device) -> Result<ExecutionProvider, DeviceError> {
        let known = self
            .find(device.kind, device.id)
            .ok_or_else(|| DeviceError::UnknownDevice(device.clone()))?;
        Ok(ExecutionProvider {
            device_id: known.id,
            kind: known.kind,
            threads: self.threads,
        })
    }
}

impl Default for DeviceResolver {
    fn default() -> Self {
        Self::new(Vec::new(), false, optimal_threads())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GpuConfig;

    #[test]
    fn cpu_is_always_present() {
        let resolver = DeviceResolver::default();
        assert_eq!(resolver.devices(), &[Device::cpu()]);
        assert_eq!(resolver.default_device(), &Device::cpu());
    }

    #[test]
    fn resolve_known_gpu() {
        let resolver = DeviceResolver::new(vec![Device::gpu(1, "RTX")], false, 4);
        let provider = resolver.resolve(&Device::gpu(1, "RTX")).unwrap();
        assert!(provider.use_gpu());
        assert_eq!(provider.device_id, 1);
        assert_eq!(provider.threads, 4);
    }

    #[test]
    fn resolve_unknown_device_errors() {
        let resolver = DeviceResolver::default();
        let err = resolver.resolve(&Device::gpu(3, "ghost")).unwrap_err();
        assert!(matches!(err, DeviceError::UnknownDevice(d) if d.id == 3));
    }

    #[test]
    fn default_device_prefers_gpu_when_configured() {
        let config = DevicesConfig {
            prefer_gpu: true,
            gpus: vec![GpuConfig {
                id: 0,
                name: "Adapter".into(),
            }],
            threads: Some(2),
        };
        let resolver = DeviceResolver::from_config(&config);
        assert_eq!(resolver.default_device().kind, DeviceKind::Gpu);
        assert_eq!(resolver.resolve(&Device::cpu()).unwrap().threads, 2);
    }

    #[test]
    fn cpu_passed_as_gpu_is_ignored() {
        let resolver = DeviceResolver::new(vec![Device::cpu()], true, 1);
        assert_eq!(resolver.devices().len(), 1);
        assert_eq!(resolver.default_device().kind, DeviceKind::Cpu);
    }

    #[test]
    fn optimal_threads_is_positive_and_at_most_8() {
        let t = optimal_threads();
        assert!((1..=8).contains(&t));
    }
}
