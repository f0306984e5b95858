//! Discrete-time diffusion noise schedules.
//!
//! Two schedulers share one β schedule and one forward (noising) process:
//!
//! - [`ddpm`]: ancestral DDPM sampler, injects generator noise every step
//! - [`ddim`]: deterministic DDIM sampler (η = 0)
//!
//! ## Forward process
//!
//! ```text
//! ᾱ_t = Π_{s ≤ t} (1 - β_s)
//! x_t = sqrt(ᾱ_t) * x_0 + sqrt(1 - ᾱ_t) * ε
//! ```
//!
//! The model predicts `ε`. Timestep `t` is an index into the training
//! schedule; larger means noisier. Inference timesteps are evenly spaced
//! (`step_ratio = num_train_timesteps / num_inference_steps`) and consumed
//! in descending order.

pub mod ddim;
pub mod ddpm;

use candle_core::{DType, Tensor};
use serde::Deserialize;

use crate::generator::Generator;
use crate::{Error, Result};

pub use ddim::DdimScheduler;
pub use ddpm::DdpmScheduler;

/// Common interface for all schedulers.
pub trait Scheduler {
    /// Set up the timestep schedule for a given number of inference steps.
    fn set_timesteps(&mut self, num_inference_steps: usize) -> Result<()>;

    /// Inference timesteps, strictly descending.
    fn timesteps(&self) -> &[usize];

    /// The timestep following `timestep` in the reverse process, or `None`
    /// once the sample is clean.
    fn previous_timestep(&self, timestep: usize) -> Option<usize>;

    /// Noise `original` (`[1, C, H, W]`) to every level in `timesteps`,
    /// reusing the same `noise`. Returns `[timesteps.len(), C, H, W]`.
    fn add_noise(&self, original: &Tensor, noise: &Tensor, timesteps: &[usize]) -> Result<Tensor>;

    /// Perform one reverse step from `timestep` to its previous timestep.
    ///
    /// - `model_output`: predicted noise from the denoiser
    /// - `sample`: current noisy image
    /// - `generator`: source for any stochastic term
    fn step(
        &mut self,
        model_output: &Tensor,
        timestep: usize,
        sample: &Tensor,
        generator: &mut Generator,
    ) -> Result<Tensor>;
}

/// β schedule shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetaSchedule {
    Linear,
    ScaledLinear,
    SquaredcosCapV2,
}

/// Which sampler to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    Ddpm,
    Ddim,
}

/// Configuration shared across all schedulers.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Number of training timesteps (default: 1000).
    #[serde(default = "default_num_train_timesteps")]
    pub num_train_timesteps: usize,

    /// First β of the schedule (default: 1e-4).
    #[serde(default = "default_beta_start")]
    pub beta_start: f64,

    /// Last β of the schedule (default: 0.02).
    #[serde(default = "default_beta_end")]
    pub beta_end: f64,

    /// Shape of the β schedule (default: linear).
    #[serde(default = "default_beta_schedule")]
    pub beta_schedule: BetaSchedule,

    /// Clip the predicted clean sample to [-1, 1] (default: true).
    #[serde(default = "default_clip_sample")]
    pub clip_sample: bool,

    /// Sampler used by the pipeline (default: ddpm).
    #[serde(default = "default_kind")]
    pub kind: SchedulerKind,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_train_timesteps: default_num_train_timesteps(),
            beta_start: default_beta_start(),
            beta_end: default_beta_end(),
            beta_schedule: default_beta_schedule(),
            clip_sample: default_clip_sample(),
            kind: default_kind(),
        }
    }
}

impl SchedulerConfig {
    /// Same schedule shape stretched over `num_train_timesteps` steps.
    pub fn with_train_timesteps(&self, num_train_timesteps: usize) -> Self {
        Self {
            num_train_timesteps,
            ..self.clone()
        }
    }

    /// β values for every training timestep.
    pub fn betas(&self) -> Vec<f64> {
        let n = self.num_train_timesteps;
        match self.beta_schedule {
            BetaSchedule::Linear => linspace(self.beta_start, self.beta_end, n),
            BetaSchedule::ScaledLinear => {
                linspace(self.beta_start.sqrt(), self.beta_end.sqrt(), n)
                    .into_iter()
                    .map(|b| b * b)
                    .collect()
            }
            BetaSchedule::SquaredcosCapV2 => {
                let alpha_bar = |t: f64| ((t + 0.008) / 1.008 * std::f64::consts::FRAC_PI_2).cos().powi(2);
                (0..n)
                    .map(|i| {
                        let t1 = i as f64 / n as f64;
                        let t2 = (i + 1) as f64 / n as f64;
                        (1.0 - alpha_bar(t2) / alpha_bar(t1)).min(0.999)
                    })
                    .collect()
            }
        }
    }

    /// Cumulative products `ᾱ_t` of `1 - β_t`.
    pub fn alphas_cumprod(&self) -> Vec<f64> {
        let mut acc = 1.0;
        self.betas()
            .into_iter()
            .map(|beta| {
                acc *= 1.0 - beta;
                acc
            })
            .collect()
    }

    /// Build the configured sampler.
    pub fn build(&self) -> Box<dyn Scheduler + Send> {
        match self.kind {
            SchedulerKind::Ddpm => Box::new(DdpmScheduler::new(self.clone())),
            SchedulerKind::Ddim => Box::new(DdimScheduler::new(self.clone())),
        }
    }
}

fn default_num_train_timesteps() -> usize {
    1000
}

fn default_beta_start() -> f64 {
    1e-4
}

fn default_beta_end() -> f64 {
    0.02
}

fn default_beta_schedule() -> BetaSchedule {
    BetaSchedule::Linear
}

fn default_clip_sample() -> bool {
    true
}

fn default_kind() -> SchedulerKind {
    SchedulerKind::Ddpm
}

fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![start];
    }
    (0..n)
        .map(|i| start + (end - start) * i as f64 / (n - 1) as f64)
        .collect()
}

/// Evenly spaced inference timesteps, descending, plus the step ratio.
pub(crate) fn spaced_timesteps(
    num_train_timesteps: usize,
    num_inference_steps: usize,
) -> Result<(Vec<usize>, usize)> {
    if num_inference_steps == 0 || num_inference_steps > num_train_timesteps {
        return Err(Error::Config(format!(
            "inference steps must be in 1..={num_train_timesteps}, got {num_inference_steps}"
        )));
    }
    let step_ratio = num_train_timesteps / num_inference_steps;
    let timesteps = (0..num_inference_steps)
        .rev()
        .map(|i| i * step_ratio)
        .collect();
    Ok((timesteps, step_ratio))
}

/// Forward process shared by all schedulers.
///
/// Broadcasts `[N, 1, 1, 1]` coefficient columns against `[1, C, H, W]`
/// inputs so a whole trajectory is noised in one pass.
pub(crate) fn add_noise_with(
    alphas_cumprod: &[f64],
    original: &Tensor,
    noise: &Tensor,
    timesteps: &[usize],
) -> Result<Tensor> {
    if timesteps.is_empty() {
        return Err(Error::Config("add_noise needs at least one timestep".into()));
    }
    let mut signal = Vec::with_capacity(timesteps.len());
    let mut spread = Vec::with_capacity(timesteps.len());
    for &t in timesteps {
        let alpha_prod = *alphas_cumprod.get(t).ok_or_else(|| {
            Error::Config(format!(
                "timestep {t} outside schedule of {} steps",
                alphas_cumprod.len()
            ))
        })?;
        signal.push(alpha_prod.sqrt() as f32);
        spread.push((1.0 - alpha_prod).sqrt() as f32);
    }

    let n = timesteps.len();
    let device = original.device();
    let dtype = original.dtype();
    let signal = Tensor::from_vec(signal, (n, 1, 1, 1), device)?.to_dtype(dtype)?;
    let spread = Tensor::from_vec(spread, (n, 1, 1, 1), device)?.to_dtype(dtype)?;
    let noisy = (signal.broadcast_mul(original)? + spread.broadcast_mul(noise)?)?;
    Ok(noisy)
}

/// Draw step noise shaped like `like`, in its dtype.
pub(crate) fn step_noise(generator: &mut Generator, like: &Tensor) -> Result<Tensor> {
    let noise = generator.randn_like(like)?;
    if like.dtype() == DType::F32 {
        Ok(noise)
    } else {
        Ok(noise.to_dtype(like.dtype())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn linear_betas_endpoints() {
        let config = SchedulerConfig::default();
        let betas = config.betas();
        assert_eq!(betas.len(), 1000);
        assert!((betas[0] - 1e-4).abs() < 1e-12);
        assert!((betas[999] - 0.02).abs() < 1e-12);
    }

    #[test]
    fn alphas_cumprod_decreasing() {
        for schedule in [
            BetaSchedule::Linear,
            BetaSchedule::ScaledLinear,
            BetaSchedule::SquaredcosCapV2,
        ] {
            let config = SchedulerConfig {
                beta_schedule: schedule,
                ..Default::default()
            };
            let acp = config.alphas_cumprod();
            assert!(acp[0] < 1.0 && acp[0] > 0.9, "{schedule:?}: acp[0] = {}", acp[0]);
            for w in acp.windows(2) {
                assert!(w[1] < w[0], "{schedule:?}: not decreasing");
            }
        }
    }

    #[test]
    fn single_train_step_schedule() {
        let config = SchedulerConfig::default().with_train_timesteps(1);
        assert_eq!(config.betas(), vec![1e-4]);
    }

    #[test]
    fn spaced_timesteps_descend_to_zero() {
        let (ts, ratio) = spaced_timesteps(1000, 50).unwrap();
        assert_eq!(ratio, 20);
        assert_eq!(ts.len(), 50);
        assert_eq!(ts[0], 980);
        assert_eq!(*ts.last().unwrap(), 0);
    }

    #[test]
    fn spaced_timesteps_rejects_bad_counts() {
        assert!(matches!(spaced_timesteps(10, 0), Err(Error::Config(_))));
        assert!(matches!(spaced_timesteps(10, 11), Err(Error::Config(_))));
    }

    #[test]
    fn add_noise_stacks_one_entry_per_timestep() {
        let config = SchedulerConfig::default().with_train_timesteps(10);
        let acp = config.alphas_cumprod();
        let device = Device::Cpu;
        let original = Tensor::ones((1, 1, 2, 3), DType::F32, &device).unwrap();
        let noise = Tensor::zeros((1, 1, 2, 3), DType::F32, &device).unwrap();

        let noisy = add_noise_with(&acp, &original, &noise, &[9, 4, 0]).unwrap();
        assert_eq!(noisy.dims(), &[3, 1, 2, 3]);

        // Zero noise: each entry is sqrt(ᾱ_t) * 1.
        let values = noisy.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        for (entry, &t) in [9usize, 4, 0].iter().enumerate() {
            let expected = acp[t].sqrt() as f32;
            for v in &values[entry * 6..(entry + 1) * 6] {
                assert!((v - expected).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn add_noise_rejects_out_of_range_timestep() {
        let acp = SchedulerConfig::default().with_train_timesteps(4).alphas_cumprod();
        let x = Tensor::zeros((1, 1, 2, 2), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            add_noise_with(&acp, &x, &x, &[4]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn deserialize_with_defaults() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{"kind": "ddim", "beta_schedule": "scaled_linear"}"#).unwrap();
        assert_eq!(config.kind, SchedulerKind::Ddim);
        assert_eq!(config.beta_schedule, BetaSchedule::ScaledLinear);
        assert_eq!(config.num_train_timesteps, 1000);
        assert!(config.clip_sample);
    }
}
