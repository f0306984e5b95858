//! WAV file I/O through `hound`.
//!
//! Integer PCM of any bit depth is scaled to `[-1, 1)`; float files are
//! read unchanged. Writing defaults to 32-bit float, with 16-bit PCM for
//! players that expect it.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::{Error, Result};

/// Sample encoding for written files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WavEncoding {
    #[default]
    Float32,
    /// Clipped to `[-1, 1]` and quantized.
    Pcm16,
}

/// Read a WAV file, return (samples, sample_rate, num_channels).
///
/// Samples are interleaved f32.
pub fn read_wav(path: impl AsRef<Path>) -> Result<(Vec<f32>, u32, u16)> {
    let path = path.as_ref();
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(Error::Audio(format!("{} declares zero channels", path.display())));
    }

    let samples = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            let scale = 1.0 / (1u64 << spec.bits_per_sample.saturating_sub(1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };

    tracing::debug!(
        path = %path.display(),
        sample_rate = spec.sample_rate,
        channels = spec.channels,
        bits = spec.bits_per_sample,
        "read wav"
    );
    Ok((samples, spec.sample_rate, spec.channels))
}

/// Read a WAV file mixed down to mono. Returns (samples, sample_rate).
pub fn read_wav_mono(path: impl AsRef<Path>) -> Result<(Vec<f32>, u32)> {
    let (samples, sample_rate, channels) = read_wav(path)?;
    Ok((downmix_to_mono(&samples, channels), sample_rate))
}

/// Average interleaved channels into one.
pub fn downmix_to_mono(samples: &[f32], num_channels: u16) -> Vec<f32> {
    let channels = num_channels.max(1) as usize;
    if channels == 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Write interleaved samples as 32-bit float WAV.
pub fn write_wav(
    path: impl AsRef<Path>,
    samples: &[f32],
    sample_rate: u32,
    num_channels: u16,
) -> Result<()> {
    write_wav_as(path, samples, sample_rate, num_channels, WavEncoding::Float32)
}

/// Write interleaved samples with the given encoding.
pub fn write_wav_as(
    path: impl AsRef<Path>,
    samples: &[f32],
    sample_rate: u32,
    num_channels: u16,
    encoding: WavEncoding,
) -> Result<()> {
    let (bits_per_sample, sample_format) = match encoding {
        WavEncoding::Float32 => (32, SampleFormat::Float),
        WavEncoding::Pcm16 => (16, SampleFormat::Int),
    };
    let spec = WavSpec {
        channels: num_channels,
        sample_rate,
        bits_per_sample,
        sample_format,
    };

    let mut writer = WavWriter::create(path, spec)?;
    match encoding {
        WavEncoding::Float32 => {
            for &s in samples {
                writer.write_sample(s)?;
            }
        }
        WavEncoding::Pcm16 => {
            let mut pcm = writer.get_i16_writer(samples.len() as u32);
            for &s in samples {
                pcm.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16);
            }
            pcm.flush()?;
        }
    }
    writer.finalize()?;
    Ok(())
}

/// Scale so the loudest sample sits at ±1. Silence is left alone.
pub fn peak_normalize(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak > 1e-8 {
        samples.iter_mut().for_each(|s| *s /= peak);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_normalize() {
        let mut samples = vec![0.5, -0.25, 0.1];
        peak_normalize(&mut samples);
        assert!((samples[0] - 1.0).abs() < 1e-6);
        assert!((samples[1] + 0.5).abs() < 1e-6);

        let mut silence = vec![0.0; 4];
        peak_normalize(&mut silence);
        assert_eq!(silence, vec![0.0; 4]);
    }

    #[test]
    fn test_downmix() {
        let stereo = vec![1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        assert_eq!(downmix_to_mono(&stereo, 2), vec![0.5, 0.5, 0.0]);
        assert_eq!(downmix_to_mono(&stereo, 1), stereo);
    }

    #[test]
    fn test_float_wav_keeps_samples_and_channels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let original = vec![0.0f32, 0.5, -0.5, 1.0, -1.0, 0.25];
        write_wav(&path, &original, 22050, 2).unwrap();

        let (loaded, sr, ch) = read_wav(&path).unwrap();
        assert_eq!((sr, ch), (22050, 2));
        assert_eq!(loaded, original);

        let (mono, sr) = read_wav_mono(&path).unwrap();
        assert_eq!(sr, 22050);
        assert_eq!(mono.len(), 3);
        assert!((mono[1] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_pcm16_is_scaled_back_to_unit_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pcm.wav");
        write_wav_as(&path, &[0.0, 0.5, -1.0, 2.0], 8000, 1, WavEncoding::Pcm16).unwrap();

        let (loaded, sr, ch) = read_wav(&path).unwrap();
        assert_eq!((sr, ch), (8000, 1));
        let expected = [0.0, 0.5, -1.0, 1.0];
        for (a, b) in loaded.iter().zip(expected) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn test_missing_file_is_audio_error() {
        assert!(matches!(read_wav("/nonexistent/in.wav"), Err(Error::Audio(_)) | Err(Error::Io(_))));
    }
}
