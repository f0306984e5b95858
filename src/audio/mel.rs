//! Spectrogram-image codec.
//!
//! Maps fixed-length audio slices to square 8-bit mel spectrogram images and
//! back. Defaults follow the `audio-diffusion-256` checkpoints:
//! - Sample rate: 22050 Hz
//! - FFT size: 2048 (1025 frequency bins), periodic Hann window
//! - Hop length: 512, centered frames with zero padding
//! - Image: 256 frames (width) x 256 mel bands (height), Slaney mel scale
//! - Intensity: power in dB relative to the slice maximum, 80 dB range
//!
//! ```text
//! pixel = trunc(clip((dB + top_db) * 255 / top_db, 0, 255) + 0.5)
//! dB    = pixel * top_db / 255 - top_db
//! ```
//!
//! Decoding approximately inverts the mel filterbank and recovers phase
//! with Griffin-Lim, so it is lossy: magnitudes are preserved up to the
//! mel resolution, absolute level and phase are not.

use std::path::PathBuf;

use image::GrayImage;
use serde::Deserialize;

use super::stft::Stft;
use super::{read_wav_mono, resample_linear};
use crate::{Error, Result};

/// Power floor for dB conversion.
const AMIN: f64 = 1e-10;

/// Griffin-Lim momentum.
const GRIFFIN_LIM_MOMENTUM: f64 = 0.99;

/// Configuration for the spectrogram codec.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MelConfig {
    /// Image width in frames.
    pub x_res: usize,
    /// Image height in mel bands.
    pub y_res: usize,
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    /// Dynamic range mapped onto 0..=255.
    pub top_db: f64,
    /// Griffin-Lim iterations when decoding.
    pub n_iter: usize,
    /// Seed for the Griffin-Lim initial phase.
    pub griffin_lim_seed: u64,
}

impl Default for MelConfig {
    fn default() -> Self {
        Self {
            x_res: 256,
            y_res: 256,
            sample_rate: 22050,
            n_fft: 2048,
            hop_length: 512,
            top_db: 80.0,
            n_iter: 32,
            griffin_lim_seed: 0,
        }
    }
}

/// Where conditioning audio comes from.
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// WAV file; mixed to mono and resampled to the codec rate.
    File(PathBuf),
    /// Mono samples already at the codec sample rate.
    Raw(Vec<f32>),
}

/// Audio prepared for slicing.
#[derive(Debug, Clone)]
pub struct LoadedAudio {
    samples: Vec<f32>,
    slice_size: usize,
}

impl LoadedAudio {
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of whole slices available.
    pub fn number_of_slices(&self) -> usize {
        self.samples.len() / self.slice_size
    }

    /// Samples of slice `index`, if it exists.
    pub fn slice(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(self.slice_size)?;
        let end = start.checked_add(self.slice_size)?;
        self.samples.get(start..end)
    }
}

/// Spectrogram-image codec.
///
/// Pre-computes the STFT plan and mel filterbank on construction.
pub struct Mel {
    config: MelConfig,
    stft: Stft,
    filterbank: Vec<Vec<f64>>,
    band_areas: Vec<f64>,
    bin_coverage: Vec<f64>,
}

impl Mel {
    pub fn new(config: MelConfig) -> Result<Self> {
        if config.x_res == 0 || config.y_res == 0 {
            return Err(Error::Config("image resolution must be non-zero".into()));
        }
        if config.hop_length == 0 || config.n_fft < 2 || config.sample_rate == 0 {
            return Err(Error::Config(format!(
                "invalid STFT setup: n_fft={}, hop_length={}, sample_rate={}",
                config.n_fft, config.hop_length, config.sample_rate
            )));
        }
        if config.top_db <= 0.0 {
            return Err(Error::Config(format!("top_db must be positive, got {}", config.top_db)));
        }

        let stft = Stft::new(config.n_fft, config.hop_length);
        let filterbank = mel_filterbank(
            config.n_fft,
            config.y_res,
            config.sample_rate,
            0.0,
            config.sample_rate as f64 / 2.0,
        );
        let band_areas = filterbank.iter().map(|f| f.iter().sum()).collect();
        let bin_coverage = (0..stft.num_bins())
            .map(|bin| filterbank.iter().map(|f| f[bin]).sum())
            .collect();

        Ok(Self {
            config,
            stft,
            filterbank,
            band_areas,
            bin_coverage,
        })
    }

    pub fn config(&self) -> &MelConfig {
        &self.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub fn hop_length(&self) -> usize {
        self.config.hop_length
    }

    pub fn x_res(&self) -> usize {
        self.config.x_res
    }

    pub fn y_res(&self) -> usize {
        self.config.y_res
    }

    /// Samples per slice; yields exactly `x_res` centered frames.
    pub fn slice_size(&self) -> usize {
        self.config.x_res * self.config.hop_length - 1
    }

    /// Samples produced by [`Mel::image_to_audio`].
    pub fn output_len(&self) -> usize {
        self.stft.signal_len(self.config.x_res)
    }

    /// Load audio and pad it to at least one slice.
    pub fn load_audio(&self, source: &AudioSource) -> Result<LoadedAudio> {
        let mut samples = match source {
            AudioSource::File(path) => {
                let (samples, sample_rate) = read_wav_mono(path)?;
                tracing::debug!(
                    path = %path.display(),
                    sample_rate,
                    samples = samples.len(),
                    "loaded audio"
                );
                resample_linear(&samples, sample_rate, self.config.sample_rate)
            }
            AudioSource::Raw(samples) => samples.clone(),
        };
        if samples.is_empty() {
            return Err(Error::Audio("audio source contains no samples".into()));
        }

        let min_len = self.config.x_res * self.config.hop_length;
        if samples.len() < min_len {
            samples.resize(min_len, 0.0);
        }

        Ok(LoadedAudio {
            samples,
            slice_size: self.slice_size(),
        })
    }

    /// Encode slice `slice` of `audio` as a spectrogram image.
    pub fn slice_to_image(&self, audio: &LoadedAudio, slice: usize) -> Result<GrayImage> {
        let samples = audio.slice(slice).ok_or_else(|| {
            Error::Config(format!(
                "slice {slice} out of range, audio has {} slices",
                audio.number_of_slices()
            ))
        })?;
        Ok(self.audio_slice_to_image(samples))
    }

    /// Encode raw samples; a slice of [`Mel::slice_size`] samples gives an
    /// `x_res` x `y_res` image.
    pub fn audio_slice_to_image(&self, samples: &[f32]) -> GrayImage {
        let signal: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
        let spectrum = self.stft.forward(&signal);
        let num_frames = spectrum.len();

        // mel_power[band][frame]
        let mut mel_power = vec![vec![0.0; num_frames]; self.config.y_res];
        for (frame_idx, frame) in spectrum.iter().enumerate() {
            for (band, filter) in self.filterbank.iter().enumerate() {
                let mut sum = 0.0;
                for (bin, &weight) in filter.iter().enumerate() {
                    if weight > 0.0 {
                        sum += weight * frame[bin].norm_sqr();
                    }
                }
                mel_power[band][frame_idx] = sum;
            }
        }

        let db = power_to_db(&mel_power, self.config.top_db);
        let top_db = self.config.top_db;
        GrayImage::from_fn(num_frames as u32, self.config.y_res as u32, |x, y| {
            let value = db[y as usize][x as usize];
            let scaled = ((value + top_db) * 255.0 / top_db).clamp(0.0, 255.0) + 0.5;
            image::Luma([scaled as u8])
        })
    }

    /// Decode a spectrogram image to `hop_length * (x_res - 1)` samples.
    pub fn image_to_audio(&self, image: &GrayImage) -> Result<Vec<f32>> {
        let (width, height) = image.dimensions();
        if width as usize != self.config.x_res || height as usize != self.config.y_res {
            return Err(Error::Config(format!(
                "image is {width}x{height}, codec expects {}x{}",
                self.config.x_res, self.config.y_res
            )));
        }
        let top_db = self.config.top_db;
        let num_frames = width as usize;

        // Linear power per frame via filterbank-weighted interpolation of
        // the per-band power density.
        let mut magnitude = vec![vec![0.0; self.stft.num_bins()]; num_frames];
        for (frame_idx, frame) in magnitude.iter_mut().enumerate() {
            let density: Vec<f64> = (0..self.config.y_res)
                .map(|band| {
                    let pixel = image.get_pixel(frame_idx as u32, band as u32)[0] as f64;
                    let db = pixel * top_db / 255.0 - top_db;
                    let power = 10f64.powf(db / 10.0);
                    if self.band_areas[band] > 0.0 {
                        power / self.band_areas[band]
                    } else {
                        0.0
                    }
                })
                .collect();

            for (bin, value) in frame.iter_mut().enumerate() {
                let coverage = self.bin_coverage[bin];
                if coverage <= 0.0 {
                    continue;
                }
                let power: f64 = self
                    .filterbank
                    .iter()
                    .zip(&density)
                    .map(|(filter, &d)| filter[bin] * d)
                    .sum::<f64>()
                    / coverage;
                *value = power.sqrt();
            }
        }

        let audio = self.stft.griffin_lim(
            &magnitude,
            self.config.n_iter,
            GRIFFIN_LIM_MOMENTUM,
            self.config.griffin_lim_seed,
        );
        Ok(audio.into_iter().map(|s| s as f32).collect())
    }

    /// Center frequency of each mel band in Hz.
    pub fn band_centers(&self) -> Vec<f64> {
        let nyquist = self.config.sample_rate as f64 / 2.0;
        mel_edges(self.config.y_res, 0.0, nyquist)[1..=self.config.y_res].to_vec()
    }
}

/// `10 * log10(S / max(S))`, floored at `max - top_db`.
fn power_to_db(power: &[Vec<f64>], top_db: f64) -> Vec<Vec<f64>> {
    let reference = power
        .iter()
        .flat_map(|row| row.iter())
        .copied()
        .fold(0.0, f64::max)
        .max(AMIN);
    let ref_db = 10.0 * reference.log10();

    let db: Vec<Vec<f64>> = power
        .iter()
        .map(|row| row.iter().map(|&p| 10.0 * p.max(AMIN).log10() - ref_db).collect())
        .collect();
    let max_db = db
        .iter()
        .flat_map(|row| row.iter())
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    let floor = max_db - top_db;
    db.into_iter()
        .map(|row| row.into_iter().map(|v| v.max(floor)).collect())
        .collect()
}

/// `n_mels + 2` band edges in Hz, evenly spaced on the Slaney mel scale.
fn mel_edges(n_mels: usize, f_min: f64, f_max: f64) -> Vec<f64> {
    let mel_min = hz_to_mel_slaney(f_min);
    let mel_max = hz_to_mel_slaney(f_max);
    (0..=(n_mels + 1))
        .map(|i| mel_min + (mel_max - mel_min) * i as f64 / (n_mels + 1) as f64)
        .map(mel_to_hz_slaney)
        .collect()
}

/// Build a Slaney-normalized mel filterbank.
///
/// Returns `n_mels` filters, each with `n_fft/2 + 1` weights.
pub(crate) fn mel_filterbank(
    n_fft: usize,
    n_mels: usize,
    sample_rate: u32,
    f_min: f64,
    f_max: f64,
) -> Vec<Vec<f64>> {
    let num_bins = n_fft / 2 + 1;
    let sr = sample_rate as f64;
    let hz_points = mel_edges(n_mels, f_min, f_max);

    let bin_freqs: Vec<f64> = (0..num_bins)
        .map(|i| sr * i as f64 / n_fft as f64)
        .collect();

    (0..n_mels)
        .map(|i| {
            let f_left = hz_points[i];
            let f_center = hz_points[i + 1];
            let f_right = hz_points[i + 2];

            // Slaney normalization: 2 / (f_right - f_left)
            let norm = 2.0 / (f_right - f_left);

            bin_freqs
                .iter()
                .map(|&f| {
                    let lower = (f - f_left) / (f_center - f_left);
                    let upper = (f_right - f) / (f_right - f_center);
                    norm * lower.min(upper).max(0.0)
                })
                .collect()
        })
        .collect()
}

/// Convert frequency in Hz to Slaney mel scale.
///
/// Below 1000 Hz: linear mapping (mel = 3 * f / 200).
/// Above 1000 Hz: logarithmic (mel = 15 + 27 * ln(f / 1000) / ln(6.4)).
fn hz_to_mel_slaney(hz: f64) -> f64 {
    if hz < 1000.0 {
        3.0 * hz / 200.0
    } else {
        15.0 + 27.0 * (hz / 1000.0).ln() / (6.4_f64).ln()
    }
}

/// Convert Slaney mel scale to frequency in Hz.
fn mel_to_hz_slaney(mel: f64) -> f64 {
    if mel < 15.0 {
        200.0 * mel / 3.0
    } else {
        1000.0 * ((mel - 15.0) * (6.4_f64).ln() / 27.0).exp()
    }
}
