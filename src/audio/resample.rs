//! Linear-interpolation resampling.

/// Resample mono audio from `src_rate` to `dst_rate`.
///
/// Output length is `round(len * dst_rate / src_rate)`.
pub fn resample_linear(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if samples.is_empty() || src_rate == 0 || dst_rate == 0 {
        return Vec::new();
    }
    if src_rate == dst_rate {
        return samples.to_vec();
    }

    let ratio = dst_rate as f64 / src_rate as f64;
    let out_len = ((samples.len() as f64) * ratio).round().max(1.0) as usize;

    (0..out_len)
        .map(|i| {
            let src_pos = i as f64 / ratio;
            let left = (src_pos.floor() as usize).min(samples.len() - 1);
            let right = (left + 1).min(samples.len() - 1);
            let frac = (src_pos - left as f64) as f32;
            samples[left] * (1.0 - frac) + samples[right] * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_when_same_rate() {
        let x = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_linear(&x, 22050, 22050), x);
    }

    #[test]
    fn length_follows_ratio() {
        let x = vec![0.0; 44100];
        assert_eq!(resample_linear(&x, 44100, 22050).len(), 22050);
        assert_eq!(resample_linear(&x, 44100, 48000).len(), 48000);
    }

    #[test]
    fn upsampling_interpolates() {
        let y = resample_linear(&[0.0, 1.0], 1, 2);
        assert_eq!(y.len(), 4);
        assert!((y[1] - 0.5).abs() < 1e-6);
    }
}
