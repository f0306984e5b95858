//! Audio utilities.
//!
//! - [`mel`]: spectrogram-image codec (mel STFT + Griffin-Lim inversion)
//! - [`beats`]: onset-envelope beat tracking
//! - WAV read/write, mono downmix, linear resampling

pub mod beats;
pub mod mel;
mod resample;
mod stft;
mod wav;

pub use resample::resample_linear;
pub use wav::{
    WavEncoding, downmix_to_mono, peak_normalize, read_wav, read_wav_mono, write_wav, write_wav_as,
};
