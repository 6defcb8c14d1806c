//! Audio helpers: WAV I/O and conversion to Whisper's input format.
//!
//! ```text
//! .wav ──read_wav──▶ AudioTensor ──downmix──▶ mono ──resample──▶ 16 kHz
//! ```

pub mod resample;
pub mod wav;

pub use resample::{downmix, resample, to_mono_16k, WHISPER_SAMPLE_RATE};
pub use wav::{read_wav, write_wav, AudioError};
