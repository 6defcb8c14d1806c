//! Plain tensor containers returned by the generation pipelines.

use std::time::Duration;

// ---------------------------------------------------------------------------
// ImageTensor
// ---------------------------------------------------------------------------

/// A decoded image in channel-interleaved (HWC) layout with values in
/// `[-1.0, 1.0]`, as produced by a diffusion VAE decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub data: Vec<f32>,
}

impl ImageTensor {
    /// A zero-filled (mid-grey) tensor of the given size.
    pub fn zeros(width: u32, height: u32, channels: u8) -> Self {
        let len = width as usize * height as usize * channels as usize;
        Self {
            width,
            height,
            channels,
            data: vec![0.0; len],
        }
    }

    /// `true` when `data` holds exactly `width * height * channels` values.
    pub fn is_consistent(&self) -> bool {
        self.data.len() == self.width as usize * self.height as usize * self.channels as usize
    }

    /// Convert to 8-bit pixels, mapping `[-1, 1]` onto `[0, 255]`.
    pub fn to_u8(&self) -> Vec<u8> {
        self.data
            .iter()
            .map(|v| (((v.clamp(-1.0, 1.0) + 1.0) * 0.5) * 255.0).round() as u8)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// AudioTensor
// ---------------------------------------------------------------------------

/// Interleaved PCM audio in `f32`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTensor {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioTensor {
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            channels,
            samples,
        }
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Playback length.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_zeros_is_consistent() {
        let img = ImageTensor::zeros(8, 4, 3);
        assert_eq!(img.data.len(), 96);
        assert!(img.is_consistent());
    }

    #[test]
    fn image_to_u8_maps_range() {
        let img = ImageTensor {
            width: 3,
            height: 1,
            channels: 1,
            data: vec![-1.0, 0.0, 2.0],
        };
        assert_eq!(img.to_u8(), vec![0, 128, 255]);
    }

    #[test]
    fn audio_duration_accounts_for_channels() {
        let audio = AudioTensor::new(16_000, 2, vec![0.0; 32_000]);
        assert_eq!(audio.frames(), 16_000);
        assert_eq!(audio.duration(), Duration::from_secs(1));
    }

    #[test]
    fn audio_zero_rate_has_zero_duration() {
        let audio = AudioTensor::new(0, 1, vec![0.0; 10]);
        assert_eq!(audio.duration(), Duration::ZERO);
    }
}
