//! Beat tracking.
//!
//! [`BeatTracker`] follows the Ellis (2007) dynamic-programming tracker:
//!
//! 1. Onset envelope: mean positive first difference of a 128-band mel
//!    spectrogram in dB, shifted to line up with centered frames.
//! 2. Tempo: autocorrelation of the envelope over up to 8 s of lag,
//!    weighted by a log-normal prior around 120 BPM (one octave deviation).
//! 3. Beats: dynamic programming over the Gaussian-smoothed envelope with a
//!    log-squared penalty on deviations from the tempo period, backtracked
//!    from the last strong peak of the cumulative score.
//! 4. Weak leading and trailing beats are trimmed.
//!
//! # Reference
//!
//! Ellis, D. P. W. (2007). Beat Tracking by Dynamic Programming.
//! *Journal of New Music Research*, 36(1), 51-60.

use super::stft::Stft;
use super::mel::mel_filterbank;
use crate::Result;

/// Detects beat positions in mono audio.
pub trait BeatDetector {
    /// Beat positions as sample offsets into `audio`, ascending.
    fn detect_beats(&self, audio: &[f32], sample_rate: u32) -> Result<Vec<usize>>;
}

/// Dynamic-programming beat tracker.
#[derive(Debug, Clone)]
pub struct BeatTracker {
    /// Penalty weight for deviating from the tempo period.
    pub tightness: f64,
    /// Center of the tempo prior in BPM.
    pub start_bpm: f64,
    /// Tempo prior deviation in octaves.
    pub std_bpm: f64,
    /// Fastest tempo considered.
    pub max_tempo: f64,
    /// Longest autocorrelation lag in seconds.
    pub ac_size: f64,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    /// Drop weak leading and trailing beats.
    pub trim: bool,
}

impl Default for BeatTracker {
    fn default() -> Self {
        Self {
            tightness: 100.0,
            start_bpm: 120.0,
            std_bpm: 1.0,
            max_tempo: 320.0,
            ac_size: 8.0,
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
            trim: true,
        }
    }
}

impl BeatDetector for BeatTracker {
    fn detect_beats(&self, audio: &[f32], sample_rate: u32) -> Result<Vec<usize>> {
        let envelope = self.onset_envelope(audio, sample_rate);
        if envelope.len() < 3 || envelope.iter().all(|&v| v == 0.0) {
            tracing::debug!(frames = envelope.len(), "no onsets, no beats");
            return Ok(Vec::new());
        }

        let period = self.estimate_period(&envelope, sample_rate);
        let frames_per_sec = sample_rate as f64 / self.hop_length as f64;
        tracing::debug!(
            period,
            bpm = 60.0 * frames_per_sec / period as f64,
            "tempo estimate"
        );

        let beats = self.track(&envelope, period);
        Ok(beats.into_iter().map(|frame| frame * self.hop_length).collect())
    }
}

impl BeatTracker {
    /// Spectral-flux onset strength, one value per centered frame.
    pub fn onset_envelope(&self, audio: &[f32], sample_rate: u32) -> Vec<f64> {
        if audio.is_empty() {
            return Vec::new();
        }
        let stft = Stft::new(self.n_fft, self.hop_length);
        let signal: Vec<f64> = audio.iter().map(|&s| s as f64).collect();
        let spectrum = stft.forward(&signal);

        // Sparse filters: (first non-zero bin, weights).
        let filters: Vec<(usize, Vec<f64>)> = mel_filterbank(
            self.n_fft,
            self.n_mels,
            sample_rate,
            0.0,
            sample_rate as f64 / 2.0,
        )
        .into_iter()
        .map(|filter| {
            let first = filter.iter().position(|&w| w > 0.0).unwrap_or(0);
            let last = filter.iter().rposition(|&w| w > 0.0).map_or(first, |l| l + 1);
            (first, filter[first..last].to_vec())
        })
        .collect();

        let mut db: Vec<Vec<f64>> = spectrum
            .iter()
            .map(|frame| {
                filters
                    .iter()
                    .map(|(first, weights)| {
                        let power: f64 = weights
                            .iter()
                            .zip(&frame[*first..])
                            .map(|(w, c)| w * c.norm_sqr())
                            .sum();
                        10.0 * power.max(1e-10).log10()
                    })
                    .collect()
            })
            .collect();

        let max_db = db.iter().flatten().copied().fold(f64::NEG_INFINITY, f64::max);
        let floor = max_db - 80.0;
        for v in db.iter_mut().flatten() {
            *v = v.max(floor);
        }

        let num_frames = db.len();
        let shift = 1 + self.n_fft / (2 * self.hop_length);
        let mut envelope = vec![0.0; num_frames];
        for t in 1..num_frames {
            let target = t - 1 + shift;
            if target >= num_frames {
                break;
            }
            let flux: f64 = db[t]
                .iter()
                .zip(&db[t - 1])
                .map(|(cur, prev)| (cur - prev).max(0.0))
                .sum();
            envelope[target] = flux / self.n_mels as f64;
        }
        envelope
    }

    /// Beat period in frames from the prior-weighted autocorrelation.
    fn estimate_period(&self, envelope: &[f64], sample_rate: u32) -> usize {
        let frames_per_sec = sample_rate as f64 / self.hop_length as f64;
        let max_lag = ((self.ac_size * frames_per_sec) as usize).min(envelope.len() - 1);

        let ac: Vec<f64> = (0..=max_lag)
            .map(|lag| {
                envelope[..envelope.len() - lag]
                    .iter()
                    .zip(&envelope[lag..])
                    .map(|(a, b)| a * b)
                    .sum()
            })
            .collect();
        let norm = ac[0].max(f64::MIN_POSITIVE);

        let mut best = (1, f64::NEG_INFINITY);
        for (lag, &value) in ac.iter().enumerate().skip(1) {
            let bpm = 60.0 * frames_per_sec / lag as f64;
            if bpm > self.max_tempo {
                continue;
            }
            let prior = -0.5 * ((bpm.log2() - self.start_bpm.log2()) / self.std_bpm).powi(2);
            let score = (1e6 * value / norm).ln_1p() + prior;
            if score > best.1 {
                best = (lag, score);
            }
        }
        best.0
    }

    /// Beat frames for a fixed `period`.
    fn track(&self, envelope: &[f64], period: usize) -> Vec<usize> {
        let local = local_score(envelope, period);
        let (backlink, cumulative) = self.dynamic_program(&local, period);

        let Some(tail) = last_beat(&cumulative) else {
            return Vec::new();
        };
        let mut beats = vec![tail];
        let mut current = tail;
        while let Ok(prev) = usize::try_from(backlink[current]) {
            beats.push(prev);
            current = prev;
        }
        beats.reverse();

        if self.trim {
            trim_beats(&local, &beats).to_vec()
        } else {
            beats
        }
    }

    fn dynamic_program(&self, local: &[f64], period: usize) -> (Vec<i64>, Vec<f64>) {
        let p = period as i64;
        let half = ((period as f64 / 2.0).round_ties_even() as i64).max(1);
        let offsets: Vec<i64> = (-2 * p..=-half).collect();
        let weights: Vec<f64> = offsets
            .iter()
            .map(|&o| -self.tightness * (-o as f64 / period as f64).ln().powi(2))
            .collect();

        let max_local = local.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mut backlink = vec![-1i64; local.len()];
        let mut cumulative = vec![0.0; local.len()];
        let mut first_beat = true;

        for (i, &score) in local.iter().enumerate() {
            let mut best = (offsets[0], f64::NEG_INFINITY);
            for (&offset, &weight) in offsets.iter().zip(&weights) {
                let prev = i as i64 + offset;
                let candidate = if prev >= 0 {
                    weight + cumulative[prev as usize]
                } else {
                    weight
                };
                if candidate > best.1 {
                    best = (offset, candidate);
                }
            }
            cumulative[i] = score + best.1;

            if first_beat && score < 0.01 * max_local {
                backlink[i] = -1;
            } else {
                backlink[i] = i as i64 + best.0;
                first_beat = false;
            }
        }

        (backlink, cumulative)
    }
}

/// Envelope normalized by its standard deviation, smoothed with a Gaussian
/// spanning one period either side.
fn local_score(envelope: &[f64], period: usize) -> Vec<f64> {
    let n = envelope.len() as f64;
    let mean = envelope.iter().sum::<f64>() / n;
    let std = (envelope.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt();
    let normalized: Vec<f64> = envelope.iter().map(|v| v / (std + f64::MIN_POSITIVE)).collect();

    let p = period as i64;
    let window: Vec<f64> = (-p..=p)
        .map(|k| (-0.5 * (k as f64 * 32.0 / period as f64).powi(2)).exp())
        .collect();

    (0..normalized.len() as i64)
        .map(|i| {
            window
                .iter()
                .zip(-p..=p)
                .filter_map(|(w, k)| {
                    usize::try_from(i + k)
                        .ok()
                        .and_then(|j| normalized.get(j))
                        .map(|v| v * w)
                })
                .sum()
        })
        .collect()
}

/// Last local maximum of the cumulative score stronger than half the median peak.
fn last_beat(cumulative: &[f64]) -> Option<usize> {
    let n = cumulative.len();
    let is_max = |i: usize| {
        let left = if i == 0 { cumulative[0] } else { cumulative[i - 1] };
        let right = if i + 1 == n { cumulative[i] } else { cumulative[i + 1] };
        cumulative[i] > left && cumulative[i] >= right
    };

    let mut peaks: Vec<f64> = (0..n).filter(|&i| is_max(i)).map(|i| cumulative[i]).collect();
    if peaks.is_empty() {
        return n.checked_sub(1);
    }
    peaks.sort_by(|a, b| a.total_cmp(b));
    let mid = peaks.len() / 2;
    let median = if peaks.len() % 2 == 0 {
        (peaks[mid - 1] + peaks[mid]) / 2.0
    } else {
        peaks[mid]
    };

    (0..n)
        .rev()
        .find(|&i| {
            let peak = if is_max(i) { cumulative[i] } else { 0.0 };
            peak * 2.0 > median
        })
}

/// Keep beats between the first and last whose smoothed onset strength
/// exceeds half the RMS.
fn trim_beats<'a>(local: &[f64], beats: &'a [usize]) -> &'a [usize] {
    const HANN5: [f64; 5] = [0.0, 0.5, 1.0, 0.5, 0.0];
    let strength: Vec<f64> = beats.iter().map(|&b| local[b]).collect();
    let smooth: Vec<f64> = (0..strength.len() as i64)
        .map(|i| {
            HANN5
                .iter()
                .zip(-2i64..=2)
                .filter_map(|(w, k)| {
                    usize::try_from(i - k)
                        .ok()
                        .and_then(|j| strength.get(j))
                        .map(|s| s * w)
                })
                .sum()
        })
        .collect();

    let rms = (smooth.iter().map(|v| v * v).sum::<f64>() / smooth.len().max(1) as f64).sqrt();
    let threshold = 0.5 * rms;
    let first = smooth.iter().position(|&v| v > threshold);
    let last = smooth.iter().rposition(|&v| v > threshold);
    match (first, last) {
        (Some(first), Some(last)) => &beats[first..last],
        _ => &[],
    }
}

/// Decaying 1 kHz clicks every `spacing` samples, starting at `spacing`.
#[cfg(test)]
pub(crate) fn click_track(clicks: usize, spacing: usize, sample_rate: u32) -> Vec<f32> {
    let mut audio = vec![0.0f32; spacing * (clicks + 1)];
    for c in 0..clicks {
        let start = spacing * (c + 1);
        for j in 0..441 {
            let t = j as f32 / sample_rate as f32;
            audio[start + j] += (2.0 * std::f32::consts::PI * 1000.0 * t).sin() * (-(j as f32) / 80.0).exp() * 0.9;
        }
    }
    audio
}
