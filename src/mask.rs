//! Edge anchoring for conditioned generation.
//!
//! A [`MaskRegion`] names the leading and trailing frame columns that are
//! taken from the re-noised source trajectory instead of the model output.
//! [`MaskRegion::blend`] is the single place where that selection happens:
//!
//! ```text
//!   columns  [0, start)          -> anchor
//!   columns  [start, W - end)    -> generated
//!   columns  [W - end, W)        -> anchor
//! ```

use candle_core::{D, Tensor};

use crate::{Error, Result};

/// Leading/trailing frame columns anchored to the source audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaskRegion {
    start: usize,
    end: usize,
}

impl MaskRegion {
    /// Build a region over an image `width` columns wide.
    ///
    /// Regions wider than the image are rejected rather than truncated.
    pub fn new(start: usize, end: usize, width: usize) -> Result<Self> {
        if start.checked_add(end).is_none_or(|covered| covered > width) {
            return Err(Error::Config(format!(
                "mask covers {start} + {end} frames but the image is only {width} wide"
            )));
        }
        Ok(Self { start, end })
    }

    /// Convert durations to frame counts: `floor(secs * sample_rate / hop_length)`.
    pub fn from_secs(
        start_secs: f64,
        end_secs: f64,
        sample_rate: u32,
        hop_length: usize,
        width: usize,
    ) -> Result<Self> {
        let frames = |secs: f64, edge: &str| -> Result<usize> {
            if !secs.is_finite() || secs < 0.0 {
                return Err(Error::Config(format!(
                    "mask {edge} must be a non-negative duration, got {secs}"
                )));
            }
            let frames = (secs * sample_rate as f64 / hop_length as f64).floor();
            if frames > width as f64 {
                return Err(Error::Config(format!(
                    "mask {edge} of {secs}s spans more than the {width} frames of the image"
                )));
            }
            Ok(frames as usize)
        };
        Self::new(frames(start_secs, "start")?, frames(end_secs, "end")?, width)
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    /// True when no column is anchored.
    pub fn is_empty(&self) -> bool {
        self.start == 0 && self.end == 0
    }

    /// Take the edge columns from `anchor` and the interior from `generated`.
    ///
    /// Both tensors share the same `[.., W]` shape; the last axis is time.
    pub fn blend(&self, generated: &Tensor, anchor: &Tensor) -> Result<Tensor> {
        if generated.dims() != anchor.dims() {
            return Err(Error::Config(format!(
                "mask blend shape mismatch: {:?} vs {:?}",
                generated.dims(),
                anchor.dims()
            )));
        }
        if self.is_empty() {
            return Ok(generated.clone());
        }
        let width = generated.dim(D::Minus1)?;
        if self.start + self.end > width {
            return Err(Error::Config(format!(
                "mask {} + {} exceeds width {width}",
                self.start, self.end
            )));
        }
        let interior = width - self.start - self.end;

        let mut parts = Vec::with_capacity(3);
        if self.start > 0 {
            parts.push(anchor.narrow(D::Minus1, 0, self.start)?);
        }
        if interior > 0 {
            parts.push(generated.narrow(D::Minus1, self.start, interior)?);
        }
        if self.end > 0 {
            parts.push(anchor.narrow(D::Minus1, width - self.end, self.end)?);
        }
        if parts.len() == 1 {
            return Ok(parts.remove(0));
        }
        Ok(Tensor::cat(&parts, D::Minus1)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn columns(t: &Tensor) -> Vec<f32> {
        // Row 0 of a [1, 1, H, W] tensor.
        t.narrow(2, 0, 1).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap()
    }

    fn pair(width: usize) -> (Tensor, Tensor) {
        let device = Device::Cpu;
        let generated = Tensor::zeros((1, 1, 2, width), DType::F32, &device).unwrap();
        let anchor = Tensor::ones((1, 1, 2, width), DType::F32, &device).unwrap();
        (generated, anchor)
    }

    #[test]
    fn frames_from_seconds_floor() {
        // 1 s at 22050 Hz / 512 hop = 43.07 frames
        let mask = MaskRegion::from_secs(1.0, 0.5, 22050, 512, 256).unwrap();
        assert_eq!(mask.start(), 43);
        assert_eq!(mask.end(), 21);
    }

    #[test]
    fn zero_seconds_is_empty() {
        let mask = MaskRegion::from_secs(0.0, 0.0, 22050, 512, 256).unwrap();
        assert!(mask.is_empty());
    }

    #[test]
    fn rejects_oversized_and_negative() {
        assert!(matches!(MaskRegion::new(200, 57, 256), Err(Error::Config(_))));
        assert!(matches!(
            MaskRegion::from_secs(-1.0, 0.0, 22050, 512, 256),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            MaskRegion::from_secs(f64::NAN, 0.0, 22050, 512, 256),
            Err(Error::Config(_))
        ));
        assert!(MaskRegion::new(200, 56, 256).is_ok());
    }

    #[test]
    fn huge_durations_are_rejected_not_wrapped() {
        assert!(matches!(
            MaskRegion::from_secs(1e30, 1.0, 22050, 512, 256),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            MaskRegion::from_secs(0.0, f64::MAX, 22050, 512, 256),
            Err(Error::Config(_))
        ));
        assert!(matches!(MaskRegion::new(usize::MAX, 1, 256), Err(Error::Config(_))));
    }

    #[test]
    fn blend_selects_edges() {
        let (generated, anchor) = pair(6);
        let mask = MaskRegion::new(2, 1, 6).unwrap();
        let out = mask.blend(&generated, &anchor).unwrap();
        assert_eq!(out.dims(), &[1, 1, 2, 6]);
        assert_eq!(columns(&out), vec![1.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn blend_start_only_and_end_only() {
        let (generated, anchor) = pair(4);
        let start = MaskRegion::new(1, 0, 4).unwrap().blend(&generated, &anchor).unwrap();
        assert_eq!(columns(&start), vec![1.0, 0.0, 0.0, 0.0]);
        let end = MaskRegion::new(0, 3, 4).unwrap().blend(&generated, &anchor).unwrap();
        assert_eq!(columns(&end), vec![0.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn full_cover_is_the_anchor() {
        let (generated, anchor) = pair(5);
        let out = MaskRegion::new(3, 2, 5).unwrap().blend(&generated, &anchor).unwrap();
        assert_eq!(columns(&out), vec![1.0; 5]);
    }

    #[test]
    fn empty_mask_is_identity() {
        let (generated, anchor) = pair(5);
        let out = MaskRegion::default().blend(&generated, &anchor).unwrap();
        assert_eq!(columns(&out), vec![0.0; 5]);
    }
}
