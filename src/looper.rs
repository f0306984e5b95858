//! Loop extraction: cut a whole number of beats and tile it.

use crate::Result;
use crate::audio::beats::{BeatDetector, BeatTracker};

/// Bar lengths tried in order of preference.
const BEATS_IN_BAR: [usize; 4] = [16, 12, 8, 4];

/// Extract a beat-aligned loop from `audio` and repeat it `loops` times.
///
/// Returns `Ok(None)` when fewer than five beats are found.
pub fn loop_it(audio: &[f32], sample_rate: u32, loops: usize) -> Result<Option<Vec<f32>>> {
    loop_with(&BeatTracker::default(), audio, sample_rate, loops)
}

/// [`loop_it`] with a caller-supplied beat detector.
pub fn loop_with<B: BeatDetector + ?Sized>(
    detector: &B,
    audio: &[f32],
    sample_rate: u32,
    loops: usize,
) -> Result<Option<Vec<f32>>> {
    let beats = detector.detect_beats(audio, sample_rate)?;
    let Some(&beats_in_bar) = BEATS_IN_BAR.iter().find(|&&n| beats.len() > n) else {
        tracing::debug!(beats = beats.len(), "not enough beats for a loop");
        return Ok(None);
    };

    let (start, end) = (beats[0], beats[beats_in_bar]);
    let segment = audio.get(start..end).ok_or_else(|| {
        crate::Error::Audio(format!(
            "beat range {start}..{end} outside audio of {} samples",
            audio.len()
        ))
    })?;
    tracing::debug!(beats_in_bar, start, end, loops, "extracted loop");
    Ok(Some(segment.repeat(loops)))
}
