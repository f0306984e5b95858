//! DDIM deterministic sampler (η = 0).
//!
//! ```text
//! x̂_0  = (x_t - sqrt(1 - ᾱ_t) * ε̂) / sqrt(ᾱ_t)
//! x_t' = sqrt(ᾱ_t') * x̂_0 + sqrt(1 - ᾱ_t') * ε̂
//! ```
//!
//! No noise is drawn, so the generator passed to [`Scheduler::step`] is
//! left untouched and the whole reverse trajectory is a pure function of
//! the initial state.

use candle_core::Tensor;

use super::{Scheduler, SchedulerConfig, add_noise_with, spaced_timesteps};
use crate::generator::Generator;
use crate::{Error, Result};

/// DDIM scheduler.
pub struct DdimScheduler {
    config: SchedulerConfig,
    alphas_cumprod: Vec<f64>,
    timesteps: Vec<usize>,
    step_ratio: usize,
}

impl DdimScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let alphas_cumprod = config.alphas_cumprod();
        Self {
            config,
            alphas_cumprod,
            timesteps: Vec::new(),
            step_ratio: 1,
        }
    }
}

impl Scheduler for DdimScheduler {
    fn set_timesteps(&mut self, num_inference_steps: usize) -> Result<()> {
        let (timesteps, step_ratio) =
            spaced_timesteps(self.config.num_train_timesteps, num_inference_steps)?;
        self.timesteps = timesteps;
        self.step_ratio = step_ratio;
        Ok(())
    }

    fn timesteps(&self) -> &[usize] {
        &self.timesteps
    }

    fn previous_timestep(&self, timestep: usize) -> Option<usize> {
        timestep.checked_sub(self.step_ratio)
    }

    fn add_noise(&self, original: &Tensor, noise: &Tensor, timesteps: &[usize]) -> Result<Tensor> {
        add_noise_with(&self.alphas_cumprod, original, noise, timesteps)
    }

    fn step(
        &mut self,
        model_output: &Tensor,
        timestep: usize,
        sample: &Tensor,
        _generator: &mut Generator,
    ) -> Result<Tensor> {
        let alpha_prod_t = *self
            .alphas_cumprod
            .get(timestep)
            .ok_or_else(|| Error::Config(format!("timestep {timestep} outside schedule")))?;
        let alpha_prod_prev = match self.previous_timestep(timestep) {
            Some(prev) => self.alphas_cumprod[prev],
            None => 1.0,
        };

        let pred_original = ((sample - model_output.affine((1.0 - alpha_prod_t).sqrt(), 0.0)?)?
            .affine(1.0 / alpha_prod_t.sqrt(), 0.0))?;
        let pred_original = if self.config.clip_sample {
            pred_original.clamp(-1f32, 1f32)?
        } else {
            pred_original
        };

        let direction = model_output.affine((1.0 - alpha_prod_prev).sqrt(), 0.0)?;
        let next = (pred_original.affine(alpha_prod_prev.sqrt(), 0.0)? + direction)?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn spacing_follows_step_ratio() {
        let mut scheduler = DdimScheduler::new(SchedulerConfig::default());
        scheduler.set_timesteps(10).unwrap();
        assert_eq!(
            scheduler.timesteps(),
            &[900, 800, 700, 600, 500, 400, 300, 200, 100, 0]
        );
        assert_eq!(scheduler.previous_timestep(100), Some(0));
    }

    #[test]
    fn step_does_not_consume_generator() {
        let device = Device::Cpu;
        let mut scheduler = DdimScheduler::new(SchedulerConfig::default());
        scheduler.set_timesteps(10).unwrap();
        let sample = Tensor::ones((1, 1, 2, 2), DType::F32, &device).unwrap();
        let output = Tensor::zeros((1, 1, 2, 2), DType::F32, &device).unwrap();

        let mut generator = Generator::from_seed(5);
        let mut untouched = Generator::from_seed(5);
        scheduler.step(&output, 500, &sample, &mut generator).unwrap();
        assert_eq!(generator.standard_normal(4), untouched.standard_normal(4));
    }

    #[test]
    fn last_step_returns_predicted_original() {
        let device = Device::Cpu;
        let mut scheduler = DdimScheduler::new(SchedulerConfig::default().with_train_timesteps(5));
        scheduler.set_timesteps(5).unwrap();
        let mut generator = Generator::from_seed(9);
        let clean = Tensor::zeros((1, 1, 3, 3), DType::F32, &device).unwrap();
        let noise = generator.randn((1, 1, 3, 3), &device).unwrap();
        let noisy = scheduler.add_noise(&clean, &noise, &[0]).unwrap();

        let next = scheduler.step(&noise, 0, &noisy, &mut generator).unwrap();
        let max = next.abs().unwrap().flatten_all().unwrap().max(0).unwrap();
        assert!(max.to_scalar::<f32>().unwrap() < 1e-5);
    }
}
