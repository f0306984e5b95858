//! Denoiser interface.
//!
//! The generative network is an external, pretrained component. The
//! sampling pipeline only needs `(noisy image, timestep) -> predicted noise`
//! plus the input geometry and the length of the training schedule, so any
//! backend (a candle UNet, an ONNX session, a test fake) plugs in by
//! implementing [`Denoiser`].

use std::sync::Arc;

use candle_core::Tensor;

use crate::Result;

/// Image denoiser used by the reverse-diffusion loop.
pub trait Denoiser {
    /// Predict the noise present in `sample` (`[1, C, H, W]`) at `timestep`.
    ///
    /// Must return a tensor of the same shape. Implementations are pure
    /// functions of their inputs and fixed weights.
    fn predict(&self, sample: &Tensor, timestep: usize) -> Result<Tensor>;

    /// Number of image channels the model expects.
    fn in_channels(&self) -> usize {
        1
    }

    /// Side length of the square input image.
    fn sample_size(&self) -> usize;

    /// Length of the schedule the model was trained with.
    fn num_train_timesteps(&self) -> usize {
        1000
    }
}

impl<D: Denoiser + ?Sized> Denoiser for Arc<D> {
    fn predict(&self, sample: &Tensor, timestep: usize) -> Result<Tensor> {
        (**self).predict(sample, timestep)
    }

    fn in_channels(&self) -> usize {
        (**self).in_channels()
    }

    fn sample_size(&self) -> usize {
        (**self).sample_size()
    }

    fn num_train_timesteps(&self) -> usize {
        (**self).num_train_timesteps()
    }
}

impl<D: Denoiser + ?Sized> Denoiser for Box<D> {
    fn predict(&self, sample: &Tensor, timestep: usize) -> Result<Tensor> {
        (**self).predict(sample, timestep)
    }

    fn in_channels(&self) -> usize {
        (**self).in_channels()
    }

    fn sample_size(&self) -> usize {
        (**self).sample_size()
    }

    fn num_train_timesteps(&self) -> usize {
        (**self).num_train_timesteps()
    }
}

/// Adapter turning a closure into a [`Denoiser`].
///
/// ```
/// use audio_diffusion_rs::model::{Denoiser, FnDenoiser};
///
/// // Predicts no noise at all: the sampler then just follows the posterior mean.
/// let denoiser = FnDenoiser::new(64, |sample, _t| Ok(sample.zeros_like()?));
/// assert_eq!(denoiser.sample_size(), 64);
/// ```
pub struct FnDenoiser<F> {
    predict: F,
    sample_size: usize,
    in_channels: usize,
    num_train_timesteps: usize,
}

impl<F> FnDenoiser<F> {
    pub fn new(sample_size: usize, predict: F) -> Self
    where
        F: Fn(&Tensor, usize) -> Result<Tensor>,
    {
        Self {
            predict,
            sample_size,
            in_channels: 1,
            num_train_timesteps: 1000,
        }
    }

    pub fn with_in_channels(mut self, in_channels: usize) -> Self {
        self.in_channels = in_channels;
        self
    }

    pub fn with_train_timesteps(mut self, num_train_timesteps: usize) -> Self {
        self.num_train_timesteps = num_train_timesteps;
        self
    }
}

impl<F> Denoiser for FnDenoiser<F>
where
    F: Fn(&Tensor, usize) -> Result<Tensor>,
{
    fn predict(&self, sample: &Tensor, timestep: usize) -> Result<Tensor> {
        (self.predict)(sample, timestep)
    }

    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn sample_size(&self) -> usize {
        self.sample_size
    }

    fn num_train_timesteps(&self) -> usize {
        self.num_train_timesteps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn closure_denoiser_forwards_calls() {
        let denoiser = FnDenoiser::new(4, |sample, t| Ok((sample * t as f64)?)).with_train_timesteps(10);
        let x = Tensor::ones((1, 1, 4, 4), DType::F32, &Device::Cpu).unwrap();
        let y = denoiser.predict(&x, 3).unwrap();
        let sum = y.sum_all().unwrap().to_scalar::<f32>().unwrap();
        assert_eq!(sum, 48.0);
        assert_eq!(denoiser.num_train_timesteps(), 10);
        assert_eq!(denoiser.in_channels(), 1);
    }

    #[test]
    fn shared_denoiser_delegates() {
        let denoiser = Arc::new(FnDenoiser::new(8, |sample, _| Ok(sample.clone())));
        assert_eq!(denoiser.sample_size(), 8);
    }
}
