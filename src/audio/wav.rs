//! WAV file I/O via `hound`.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use thiserror::Error;

use crate::tensor::AudioTensor;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Unsupported WAV format: {0}")]
    Unsupported(String),
}

/// Read a WAV file into interleaved `f32` samples in `[-1.0, 1.0]`.
///
/// Integer PCM of any bit depth up to 32 and 32-bit float are accepted.
pub fn read_wav(path: impl AsRef<Path>) -> Result<AudioTensor, AudioError> {
    let mut reader = WavReader::open(path.as_ref())?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                return Err(AudioError::Unsupported(format!(
                    "{}-bit integer PCM",
                    spec.bits_per_sample
                )));
            }
            let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    log::debug!(
        "audio: read {} samples @ {} Hz × {} from {}",
        samples.len(),
        spec.sample_rate,
        spec.channels,
        path.as_ref().display()
    );

    Ok(AudioTensor::new(spec.sample_rate, spec.channels, samples))
}

/// Write `audio` as 32-bit float WAV, creating parent directories.
pub fn write_wav(path: impl AsRef<Path>, audio: &AudioTensor) -> Result<(), AudioError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(hound::Error::IoError)?;
    }

    let spec = WavSpec {
        channels: audio.channels.max(1),
        sample_rate: audio.sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &s in &audio.samples {
        writer.write_sample(s)?;
    }
    writer.finalize()?;
    Ok(())
}
