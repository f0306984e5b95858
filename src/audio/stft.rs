//! Centered short-time Fourier transform and Griffin-Lim phase recovery.
//!
//! Framing matches `librosa.stft(center=True, pad_mode="constant")`:
//! the signal is zero-padded by `n_fft / 2` on both sides, giving
//! `1 + len / hop` frames. The inverse trims the same padding, so a
//! spectrogram of `F` frames inverts to `hop * (F - 1)` samples.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::generator::Generator;

/// Frame-major complex spectrum: `[num_frames][n_fft / 2 + 1]`.
pub(crate) type Spectrum = Vec<Vec<Complex<f64>>>;

/// STFT/ISTFT pair with a periodic Hann window.
pub(crate) struct Stft {
    n_fft: usize,
    hop_length: usize,
    window: Vec<f64>,
    fft: Arc<dyn Fft<f64>>,
    ifft: Arc<dyn Fft<f64>>,
}

impl Stft {
    pub fn new(n_fft: usize, hop_length: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            n_fft,
            hop_length,
            window: hann_window(n_fft),
            fft: planner.plan_fft_forward(n_fft),
            ifft: planner.plan_fft_inverse(n_fft),
        }
    }

    pub fn num_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Number of frames produced for a signal of `len` samples.
    pub fn num_frames(&self, len: usize) -> usize {
        1 + len / self.hop_length
    }

    /// Signal length produced by inverting `num_frames` frames.
    pub fn signal_len(&self, num_frames: usize) -> usize {
        self.hop_length * num_frames.saturating_sub(1)
    }

    pub fn forward(&self, signal: &[f64]) -> Spectrum {
        let pad = self.n_fft / 2;
        let mut padded = vec![0.0; pad];
        padded.extend_from_slice(signal);
        padded.resize(padded.len() + pad, 0.0);

        let num_bins = self.num_bins();
        let num_frames = self.num_frames(signal.len());
        let mut buffer = vec![Complex::new(0.0, 0.0); self.n_fft];
        let mut frames = Vec::with_capacity(num_frames);

        for frame_idx in 0..num_frames {
            let start = frame_idx * self.hop_length;
            for (i, slot) in buffer.iter_mut().enumerate() {
                let x = padded.get(start + i).copied().unwrap_or(0.0);
                *slot = Complex::new(x * self.window[i], 0.0);
            }
            self.fft.process(&mut buffer);
            frames.push(buffer[..num_bins].to_vec());
        }

        frames
    }

    /// Overlap-add inverse, normalized by the squared-window sum.
    pub fn inverse(&self, spectrum: &[Vec<Complex<f64>>]) -> Vec<f64> {
        let n_fft = self.n_fft;
        let num_frames = spectrum.len();
        if num_frames == 0 {
            return Vec::new();
        }
        let full_len = n_fft + self.hop_length * (num_frames - 1);
        let mut audio = vec![0.0; full_len];
        let mut window_sum = vec![0.0; full_len];
        let mut buffer = vec![Complex::new(0.0, 0.0); n_fft];
        let scale = 1.0 / n_fft as f64;

        for (frame_idx, bins) in spectrum.iter().enumerate() {
            // Rebuild the Hermitian-symmetric full spectrum.
            buffer[0] = bins[0];
            for bin in 1..bins.len() {
                buffer[bin] = bins[bin];
                if bin < n_fft - bin {
                    buffer[n_fft - bin] = bins[bin].conj();
                }
            }
            self.ifft.process(&mut buffer);

            let start = frame_idx * self.hop_length;
            for i in 0..n_fft {
                audio[start + i] += buffer[i].re * scale * self.window[i];
                window_sum[start + i] += self.window[i] * self.window[i];
            }
        }

        for (sample, &ws) in audio.iter_mut().zip(&window_sum) {
            if ws > 1e-10 {
                *sample /= ws;
            }
        }

        let pad = n_fft / 2;
        let len = self.signal_len(num_frames);
        audio.into_iter().skip(pad).take(len).collect()
    }

    /// Fast Griffin-Lim: recover a signal whose STFT magnitude is `magnitude`.
    ///
    /// Random initial phase from `seed`; `momentum` as in Perraudin et al. (0.99).
    pub fn griffin_lim(&self, magnitude: &[Vec<f64>], n_iter: usize, momentum: f64, seed: u64) -> Vec<f64> {
        let mut generator = Generator::from_seed(seed);
        let mut angles: Spectrum = magnitude
            .iter()
            .map(|frame| {
                frame
                    .iter()
                    .map(|_| Complex::from_polar(1.0, 2.0 * std::f64::consts::PI * generator.uniform()))
                    .collect()
            })
            .collect();

        let apply = |angles: &Spectrum| -> Spectrum {
            magnitude
                .iter()
                .zip(angles)
                .map(|(mags, phases)| mags.iter().zip(phases).map(|(&m, &p)| p * m).collect())
                .collect()
        };

        let blend = momentum / (1.0 + momentum);
        let mut rebuilt: Option<Spectrum> = None;
        for iter in 0..n_iter {
            let signal = self.inverse(&apply(&angles));
            let next = self.forward(&signal);

            for (frame_idx, frame) in angles.iter_mut().enumerate() {
                for (bin, angle) in frame.iter_mut().enumerate() {
                    let mut z = next[frame_idx][bin];
                    if let Some(prev) = &rebuilt {
                        z -= prev[frame_idx][bin] * blend;
                    }
                    *angle = z / (z.norm() + 1e-16);
                }
            }
            rebuilt = Some(next);

            if iter % 8 == 0 {
                tracing::trace!(iter, n_iter, "griffin-lim");
            }
        }

        self.inverse(&apply(&angles))
    }
}

/// Periodic Hann window of the given length.
pub(crate) fn hann_window(length: usize) -> Vec<f64> {
    (0..length)
        .map(|i| {
            let phase = 2.0 * std::f64::consts::PI * i as f64 / length as f64;
            0.5 * (1.0 - phase.cos())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, sample_rate: f64, len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn hann_window_properties() {
        let w = hann_window(2048);
        assert_eq!(w.len(), 2048);
        assert!(w[0].abs() < 1e-10);
        assert!((w[1024] - 1.0).abs() < 1e-10);
        assert!((w[100] - w[2048 - 100]).abs() < 1e-10);
    }

    #[test]
    fn centered_frame_count() {
        let stft = Stft::new(2048, 512);
        assert_eq!(stft.forward(&vec![0.0; 256 * 512 - 1]).len(), 256);
        assert_eq!(stft.num_bins(), 1025);
        assert_eq!(stft.signal_len(256), 255 * 512);
    }

    #[test]
    fn inverse_reconstructs_signal() {
        let stft = Stft::new(256, 64);
        let signal = sine(440.0, 8000.0, 64 * 40);
        let spectrum = stft.forward(&signal);
        let back = stft.inverse(&spectrum);
        assert_eq!(back.len(), 64 * 40);
        for (a, b) in back.iter().zip(&signal) {
            assert!((a - b).abs() < 1e-8, "{a} vs {b}");
        }
    }

    #[test]
    fn griffin_lim_matches_magnitude() {
        let stft = Stft::new(256, 64);
        let signal = sine(500.0, 8000.0, 64 * 40);
        let magnitude: Vec<Vec<f64>> = stft
            .forward(&signal)
            .iter()
            .map(|frame| frame.iter().map(|c| c.norm()).collect())
            .collect();

        let recovered = stft.griffin_lim(&magnitude, 32, 0.99, 0);
        assert_eq!(recovered.len(), signal.len());

        // Peak bin of a middle frame is preserved.
        let spectrum = stft.forward(&recovered);
        let frame = &spectrum[20];
        let peak = (0..frame.len())
            .max_by(|&a, &b| frame[a].norm().partial_cmp(&frame[b].norm()).unwrap())
            .unwrap();
        assert_eq!(peak, 16); // 500 Hz * 256 / 8000
    }

    #[test]
    fn griffin_lim_is_deterministic_per_seed() {
        let stft = Stft::new(64, 16);
        let magnitude = vec![vec![1.0; 33]; 8];
        assert_eq!(
            stft.griffin_lim(&magnitude, 4, 0.99, 3),
            stft.griffin_lim(&magnitude, 4, 0.99, 3)
        );
    }
}
