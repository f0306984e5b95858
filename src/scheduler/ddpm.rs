//! DDPM ancestral sampler.
//!
//! Update rule for `t -> t' = t - step_ratio`:
//! ```text
//! x̂_0    = (x_t - sqrt(1 - ᾱ_t) * ε̂) / sqrt(ᾱ_t)          // clipped to [-1, 1]
//! α_t    = ᾱ_t / ᾱ_t'            β_t = 1 - α_t
//! μ      = sqrt(ᾱ_t') β_t / (1 - ᾱ_t) * x̂_0
//!        + sqrt(α_t) (1 - ᾱ_t') / (1 - ᾱ_t) * x_t
//! σ²     = (1 - ᾱ_t') / (1 - ᾱ_t) * β_t                     // "fixed small"
//! x_t'   = μ + σ z        (z ~ N(0, I), omitted at t = 0)
//! ```
//! with `ᾱ_t' = 1` once the sample is clean.

use candle_core::Tensor;

use super::{Scheduler, SchedulerConfig, add_noise_with, spaced_timesteps, step_noise};
use crate::generator::Generator;
use crate::{Error, Result};

/// DDPM scheduler.
pub struct DdpmScheduler {
    config: SchedulerConfig,
    alphas_cumprod: Vec<f64>,
    timesteps: Vec<usize>,
    step_ratio: usize,
}

impl DdpmScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let alphas_cumprod = config.alphas_cumprod();
        Self {
            config,
            alphas_cumprod,
            timesteps: Vec::new(),
            step_ratio: 1,
        }
    }

    fn alpha_prod(&self, timestep: usize) -> Result<f64> {
        self.alphas_cumprod.get(timestep).copied().ok_or_else(|| {
            Error::Config(format!(
                "timestep {timestep} outside schedule of {} steps",
                self.alphas_cumprod.len()
            ))
        })
    }
}

impl Scheduler for DdpmScheduler {
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
        generator: &mut Generator,
    ) -> Result<Tensor> {
        let alpha_prod_t = self.alpha_prod(timestep)?;
        let alpha_prod_prev = match self.previous_timestep(timestep) {
            Some(prev) => self.alpha_prod(prev)?,
            None => 1.0,
        };
        let beta_prod_t = 1.0 - alpha_prod_t;
        let beta_prod_prev = 1.0 - alpha_prod_prev;
        let current_alpha_t = alpha_prod_t / alpha_prod_prev;
        let current_beta_t = 1.0 - current_alpha_t;

        // x̂_0 from the noise prediction.
        let pred_original = ((sample - model_output.affine(beta_prod_t.sqrt(), 0.0)?)?
            .affine(1.0 / alpha_prod_t.sqrt(), 0.0))?;
        let pred_original = if self.config.clip_sample {
            pred_original.clamp(-1f32, 1f32)?
        } else {
            pred_original
        };

        // Posterior mean.
        let original_coeff = alpha_prod_prev.sqrt() * current_beta_t / beta_prod_t;
        let current_coeff = current_alpha_t.sqrt() * beta_prod_prev / beta_prod_t;
        let mean = (pred_original.affine(original_coeff, 0.0)? + sample.affine(current_coeff, 0.0)?)?;

        if timestep == 0 {
            return Ok(mean);
        }

        let variance = (beta_prod_prev / beta_prod_t * current_beta_t).max(1e-20);
        let noise = step_noise(generator, model_output)?;
        let next = (mean + noise.affine(variance.sqrt(), 0.0)?)?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
        (a - b)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap()
    }

    #[test]
    fn timesteps_setup() {
        let mut scheduler = DdpmScheduler::new(SchedulerConfig::default());
        scheduler.set_timesteps(50).unwrap();
        assert_eq!(scheduler.timesteps().len(), 50);
        assert_eq!(scheduler.timesteps()[0], 980);
        assert_eq!(scheduler.previous_timestep(980), Some(960));
        assert_eq!(scheduler.previous_timestep(0), None);
        for w in scheduler.timesteps().windows(2) {
            assert!(w[0] > w[1]);
        }
    }

    #[test]
    fn full_schedule_when_train_equals_inference() {
        let mut scheduler = DdpmScheduler::new(SchedulerConfig::default().with_train_timesteps(8));
        scheduler.set_timesteps(8).unwrap();
        assert_eq!(scheduler.timesteps(), &[7, 6, 5, 4, 3, 2, 1, 0]);
    }

    #[test]
    fn final_step_recovers_clean_sample_from_exact_noise() {
        // With a perfect noise prediction the t = 0 step returns x_0 exactly.
        let mut scheduler = DdpmScheduler::new(SchedulerConfig::default().with_train_timesteps(4));
        scheduler.set_timesteps(4).unwrap();
        let device = Device::Cpu;
        let mut generator = Generator::from_seed(0);
        let clean = (Tensor::ones((1, 1, 4, 4), DType::F32, &device).unwrap() * 0.5).unwrap();
        let noise = generator.randn((1, 1, 4, 4), &device).unwrap();
        let noisy = scheduler.add_noise(&clean, &noise, &[0]).unwrap();

        let next = scheduler.step(&noise, 0, &noisy, &mut generator).unwrap();
        assert!(max_abs_diff(&next, &clean) < 1e-5);
    }

    #[test]
    fn step_is_reproducible_for_same_seed() {
        let device = Device::Cpu;
        let run = || {
            let mut scheduler = DdpmScheduler::new(SchedulerConfig::default().with_train_timesteps(10));
            scheduler.set_timesteps(10).unwrap();
            let mut generator = Generator::from_seed(11);
            let sample = generator.randn((1, 1, 3, 3), &device).unwrap();
            let output = Tensor::zeros((1, 1, 3, 3), DType::F32, &device).unwrap();
            scheduler.step(&output, 9, &sample, &mut generator).unwrap()
        };
        assert_eq!(max_abs_diff(&run(), &run()), 0.0);
    }

    #[test]
    fn intermediate_step_injects_noise() {
        let device = Device::Cpu;
        let mut scheduler = DdpmScheduler::new(SchedulerConfig::default().with_train_timesteps(10));
        scheduler.set_timesteps(10).unwrap();
        let sample = Tensor::zeros((1, 1, 8, 8), DType::F32, &device).unwrap();
        let output = Tensor::zeros((1, 1, 8, 8), DType::F32, &device).unwrap();

        let mut a = Generator::from_seed(1);
        let mut b = Generator::from_seed(2);
        let next_a = scheduler.step(&output, 5, &sample, &mut a).unwrap();
        let next_b = scheduler.step(&output, 5, &sample, &mut b).unwrap();
        assert!(max_abs_diff(&next_a, &next_b) > 1e-4);
    }
}
