//! Image generation: request/option types and per-family baselines.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::{FeatureKind, PipelineFamily};
use crate::device::ExecutionProvider;
use crate::pipeline::{PipelineError, Resource};
use crate::tensor::ImageTensor;

use super::{unsupported, Feature};

// ---------------------------------------------------------------------------
// SchedulerType
// ---------------------------------------------------------------------------

/// Noise scheduler used by the denoising loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerType {
    Euler,
    EulerAncestral,
    Ddim,
    Ddpm,
    Lcm,
    FlowMatch,
}

// ---------------------------------------------------------------------------
// ControlNet
// ---------------------------------------------------------------------------

/// A loaded ControlNet adapter, attached to every generation while the
/// diffusion pipeline it was loaded with stays resident.
#[derive(Debug)]
pub struct ControlNet {
    pub id: String,
    pub path: PathBuf,
    pub provider: ExecutionProvider,
    loaded: bool,
}

impl ControlNet {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>, provider: ExecutionProvider) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            provider,
            loaded: true,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}

impl Resource for ControlNet {
    fn unload(&mut self) -> Result<(), PipelineError> {
        log::debug!("diffusion: releasing controlnet {}", self.id);
        self.loaded = false;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Request / options
// ---------------------------------------------------------------------------

/// What the caller asks for.  Unset fields fall back to the loaded
/// pipeline's baseline.
#[derive(Debug, Clone, Default)]
pub struct ImageGenerateRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub steps: Option<u32>,
    pub guidance_scale: Option<f32>,
    pub seed: Option<u64>,
    pub scheduler: Option<SchedulerType>,
    /// Source image for image-to-image.
    pub input_image: Option<ImageTensor>,
    /// Denoising strength for image-to-image, `0.0..=1.0`.
    pub strength: Option<f32>,
    /// Conditioning image; requires a ControlNet loaded with the pipeline.
    pub control_image: Option<ImageTensor>,
    /// How strongly the control image steers denoising, `0.0..=1.0`.
    pub control_net_strength: Option<f32>,
}

impl ImageGenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

/// Native option set consumed by diffusion pipelines.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance_scale: f32,
    /// `None` lets the pipeline draw a random seed.
    pub seed: Option<u64>,
    pub scheduler: SchedulerType,
    pub strength: f32,
    pub input_image: Option<ImageTensor>,
    pub control_image: Option<ImageTensor>,
    pub control_net_strength: f32,
    pub control_net: Option<Arc<ControlNet>>,
}

impl GenerateOptions {
    fn baseline(size: u32, steps: u32, guidance_scale: f32, scheduler: SchedulerType) -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: String::new(),
            width: size,
            height: size,
            steps,
            guidance_scale,
            seed: None,
            scheduler,
            strength: 0.75,
            input_image: None,
            control_image: None,
            control_net_strength: 1.0,
            control_net: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Feature impl
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Diffusion;

impl Feature for Diffusion {
    const NAME: &'static str = "diffusion";
    const KIND: FeatureKind = FeatureKind::Diffusion;
    const AUXILIARY: Option<FeatureKind> = Some(FeatureKind::Control);

    type Request = ImageGenerateRequest;
    type Options = GenerateOptions;
    type Output = ImageTensor;
    type Auxiliary = ControlNet;

    fn family_defaults(family: PipelineFamily) -> Result<GenerateOptions, PipelineError> {
        use SchedulerType::*;
        let options = match family {
            PipelineFamily::StableDiffusion => GenerateOptions::baseline(512, 30, 7.5, EulerAncestral),
            PipelineFamily::StableDiffusion2 => GenerateOptions::baseline(768, 30, 7.5, EulerAncestral),
            PipelineFamily::StableDiffusionXl => GenerateOptions::baseline(1024, 30, 5.0, EulerAncestral),
            PipelineFamily::StableDiffusion3 => GenerateOptions::baseline(1024, 28, 4.0, FlowMatch),
            PipelineFamily::Flux => GenerateOptions::baseline(1024, 28, 3.5, FlowMatch),
            PipelineFamily::LatentConsistency => GenerateOptions::baseline(512, 4, 1.0, Lcm),
            PipelineFamily::StableCascade => GenerateOptions::baseline(1024, 20, 4.0, Ddpm),
            PipelineFamily::Nitro => GenerateOptions::baseline(512, 20, 4.5, FlowMatch),
            PipelineFamily::ControlNet | PipelineFamily::Supertonic | PipelineFamily::Whisper => {
                return Err(unsupported::<Self>(family))
            }
        };
        Ok(options)
    }

    fn prepare(
        request: ImageGenerateRequest,
        defaults: &GenerateOptions,
        auxiliary: Option<&Arc<ControlNet>>,
    ) -> Result<GenerateOptions, PipelineError> {
        if request.prompt.trim().is_empty() {
            return Err(PipelineError::InvalidInput("prompt is empty".into()));
        }

        let width = request.width.unwrap_or(defaults.width);
        let height = request.height.unwrap_or(defaults.height);
        if width == 0 || height == 0 || width % 8 != 0 || height % 8 != 0 {
            return Err(PipelineError::InvalidInput(format!(
                "image size {width}x{height} must be a non-zero multiple of 8"
            )));
        }

        let steps = request.steps.unwrap_or(defaults.steps);
        if steps == 0 {
            return Err(PipelineError::InvalidInput("steps must be at least 1".into()));
        }

        let guidance_scale = request.guidance_scale.unwrap_or(defaults.guidance_scale);
        if !guidance_scale.is_finite() || guidance_scale < 0.0 {
            return Err(PipelineError::InvalidInput(format!(
                "guidance scale {guidance_scale} must be a non-negative number"
            )));
        }

        let strength = unit_range("strength", request.strength.unwrap_or(defaults.strength))?;
        let control_net_strength = unit_range(
            "controlnet strength",
            request.control_net_strength.unwrap_or(defaults.control_net_strength),
        )?;

        if request.control_image.is_some() && auxiliary.is_none() {
            return Err(PipelineError::InvalidInput(
                "control image supplied but no ControlNet is loaded".into(),
            ));
        }

        Ok(GenerateOptions {
            prompt: request.prompt,
            negative_prompt: request
                .negative_prompt
                .unwrap_or_else(|| defaults.negative_prompt.clone()),
            width,
            height,
            steps,
            guidance_scale,
            seed: request.seed.or(defaults.seed),
            scheduler: request.scheduler.unwrap_or(defaults.scheduler),
            strength,
            input_image: request.input_image,
            control_image: request.control_image,
            control_net_strength,
            control_net: auxiliary.cloned(),
        })
    }
}

/// `value` if it lies in `0.0..=1.0` (NaN never does).
fn unit_range(name: &str, value: f32) -> Result<f32, PipelineError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(PipelineError::InvalidInput(format!("{name} {value} outside 0.0..=1.0")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceKind;

    fn defaults(family: PipelineFamily) -> GenerateOptions {
        Diffusion::family_defaults(family).unwrap()
    }

    fn control_net() -> Arc<ControlNet> {
        let provider = ExecutionProvider {
            device_id: 0,
            kind: DeviceKind::Cpu,
            threads: 1,
        };
        Arc::new(ControlNet::new("canny", "/models/Control/canny", provider))
    }

    // ---- family_defaults ---------------------------------------------------

    #[test]
    fn every_diffusion_family_has_defaults() {
        for family in PipelineFamily::ALL {
            let result = Diffusion::family_defaults(family);
            assert_eq!(
                result.is_ok(),
                family.feature() == FeatureKind::Diffusion,
                "{family}"
            );
        }
    }

    #[test]
    fn family_baselines() {
        assert_eq!(defaults(PipelineFamily::StableDiffusion).width, 512);
        assert_eq!(defaults(PipelineFamily::StableDiffusion2).width, 768);
        assert_eq!(defaults(PipelineFamily::StableDiffusionXl).height, 1024);
        assert_eq!(defaults(PipelineFamily::LatentConsistency).steps, 4);
        assert_eq!(defaults(PipelineFamily::Nitro).width, 512);
        assert_eq!(defaults(PipelineFamily::Flux).scheduler, SchedulerType::FlowMatch);
    }

    #[test]
    fn foreign_family_is_unsupported() {
        let err = Diffusion::family_defaults(PipelineFamily::Whisper).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UnsupportedFamily { feature: "diffusion", .. }
        ));
    }

    // ---- prepare -----------------------------------------------------------

    #[test]
    fn prepare_merges_request_over_defaults() {
        let base = defaults(PipelineFamily::StableDiffusion);
        let request = ImageGenerateRequest {
            steps: Some(12),
            seed: Some(42),
            ..ImageGenerateRequest::new("a lighthouse")
        };
        let options = Diffusion::prepare(request, &base, None).unwrap();
        assert_eq!(options.prompt, "a lighthouse");
        assert_eq!(options.steps, 12);
        assert_eq!(options.seed, Some(42));
        assert_eq!(options.width, 512);
        assert_eq!(options.guidance_scale, 7.5);
        assert!(options.control_net.is_none());
    }

    #[test]
    fn prepare_attaches_loaded_control_net() {
        let base = defaults(PipelineFamily::StableDiffusionXl);
        let request = ImageGenerateRequest {
            control_image: Some(ImageTensor::zeros(1024, 1024, 3)),
            ..ImageGenerateRequest::new("edges")
        };
        let options = Diffusion::prepare(request, &base, Some(&control_net())).unwrap();
        assert_eq!(options.control_net.unwrap().id, "canny");
    }

    #[test]
    fn prepare_rejects_control_image_without_control_net() {
        let base = defaults(PipelineFamily::StableDiffusion);
        let request = ImageGenerateRequest {
            control_image: Some(ImageTensor::zeros(8, 8, 3)),
            ..ImageGenerateRequest::new("edges")
        };
        let err = Diffusion::prepare(request, &base, None).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn prepare_rejects_bad_sizes_and_steps() {
        let base = defaults(PipelineFamily::StableDiffusion);
        let odd = ImageGenerateRequest {
            width: Some(500),
            ..ImageGenerateRequest::new("x")
        };
        assert!(Diffusion::prepare(odd, &base, None).is_err());

        let zero_steps = ImageGenerateRequest {
            steps: Some(0),
            ..ImageGenerateRequest::new("x")
        };
        assert!(Diffusion::prepare(zero_steps, &base, None).is_err());

        let strength = ImageGenerateRequest {
            strength: Some(1.5),
            ..ImageGenerateRequest::new("x")
        };
        assert!(Diffusion::prepare(strength, &base, None).is_err());
    }

    #[test]
    fn prepare_validates_control_net_strength() {
        let base = defaults(PipelineFamily::StableDiffusion);
        assert_eq!(base.control_net_strength, 1.0);

        let request = ImageGenerateRequest {
            control_image: Some(ImageTensor::zeros(512, 512, 3)),
            control_net_strength: Some(0.4),
            ..ImageGenerateRequest::new("edges")
        };
        let options = Diffusion::prepare(request, &base, Some(&control_net())).unwrap();
        assert_eq!(options.control_net_strength, 0.4);

        for bad in [1.2, -0.1, f32::NAN] {
            let request = ImageGenerateRequest {
                control_net_strength: Some(bad),
                ..ImageGenerateRequest::new("edges")
            };
            assert!(Diffusion::prepare(request, &base, None).is_err(), "{bad}");
        }
    }

    #[test]
    fn prepare_rejects_bad_guidance_scale() {
        let base = defaults(PipelineFamily::StableDiffusion);
        for bad in [f32::NAN, f32::INFINITY, -1.0] {
            let request = ImageGenerateRequest {
                guidance_scale: Some(bad),
                ..ImageGenerateRequest::new("x")
            };
            let err = Diffusion::prepare(request, &base, None).unwrap_err();
            assert!(matches!(err, PipelineError::InvalidInput(_)), "{bad}");
        }
        let request = ImageGenerateRequest {
            guidance_scale: Some(0.0),
            ..ImageGenerateRequest::new("x")
        };
        assert!(Diffusion::prepare(request, &base, None).is_ok());
    }

    #[test]
    fn prepare_rejects_empty_prompt() {
        let base = defaults(PipelineFamily::Flux);
        let err = Diffusion::prepare(ImageGenerateRequest::new("  "), &base, None).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn control_net_unload_marks_unloaded() {
        let mut cn = ControlNet::new("c", "/c", ExecutionProvider {
            device_id: 0,
            kind: DeviceKind::Cpu,
            threads: 1,
        });
        cn.unload().unwrap();
        assert!(!cn.is_loaded());
    }
}
