//! What should be loaded: device, model and optional auxiliary model.

use crate::catalog::ModelDescriptor;
use crate::device::Device;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSelection {
    pub device: Device,
    pub model: ModelDescriptor,
    /// Secondary model attached at load time, e.g. a ControlNet.
    pub auxiliary: Option<ModelDescriptor>,
}

impl PipelineSelection {
    pub fn new(device: Device, model: ModelDescriptor) -> Self {
        Self {
            device,
            model,
            auxiliary: None,
        }
    }

    pub fn with_auxiliary(mut self, model: ModelDescriptor) -> Self {
        self.auxiliary = Some(model);
        self
    }

    /// `true` when loading `self` would change what `current` has loaded.
    ///
    /// Callers use this to skip a redundant `load`; the coordinator itself
    /// always reloads when asked.
    pub fn requires_reload(&self, current: Option<&PipelineSelection>) -> bool {
        let Some(current) = current else {
            return true;
        };
        current.device != self.device
            || current.model.id != self.model.id
            || current.auxiliary.as_ref().map(|m| &m.id) != self.auxiliary.as_ref().map(|m| &m.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PipelineFamily;

    fn model(id: &str) -> ModelDescriptor {
        ModelDescriptor::new(id, id, PipelineFamily::StableDiffusion)
    }

    #[test]
    fn nothing_loaded_requires_reload() {
        let s = PipelineSelection::new(Device::cpu(), model("a"));
        assert!(s.requires_reload(None));
    }

    #[test]
    fn same_selection_skips_reload() {
        let s = PipelineSelection::new(Device::cpu(), model("a"));
        assert!(!s.requires_reload(Some(&s.clone())));
    }

    #[test]
    fn device_model_or_auxiliary_change_requires_reload() {
        let base = PipelineSelection::new(Device::cpu(), model("a"));
        assert!(PipelineSelection::new(Device::gpu(0, "gpu"), model("a")).requires_reload(Some(&base)));
        assert!(PipelineSelection::new(Device::cpu(), model("b")).requires_reload(Some(&base)));
        let with_aux = base.clone().with_auxiliary(ModelDescriptor::new(
            "canny",
            "canny",
            PipelineFamily::ControlNet,
        ));
        assert!(with_aux.requires_reload(Some(&base)));
        assert!(base.requires_reload(Some(&with_aux)));
    }
}
