//! Spectrogram diffusion pipeline.
//!
//! Orchestrates generation end to end:
//! 1. Draw seeded Gaussian noise `[1, C, R, R]`
//! 2. Optionally condition on a slice of source audio: encode it to a
//!    spectrogram image, re-noise it to the starting timestep, and anchor
//!    its leading/trailing columns at every step
//! 3. Run the reverse-diffusion loop (denoiser + scheduler)
//! 4. Denormalize to an 8-bit image and decode to audio with Griffin-Lim
//!
//! ## Noise levels during conditioning
//!
//! With `T = [steps-1, ..., 0]` and the loop consuming `T[start_step..]`,
//! the state handed to the denoiser at `t` must sit at noise level `t`,
//! and `step(t)` lands on `previous_timestep(t)`. So the initial state is
//! the source re-noised to `T[start_step]`, and mask anchor `i` is the
//! source re-noised to `previous_timestep(T[start_step + i])`, the last
//! anchor being the clean source itself. One noise tensor feeds every
//! re-noising call of a request.

use candle_core::{Device, Tensor};
use image::GrayImage;

use crate::audio::mel::{AudioSource, Mel};
use crate::config::AudioDiffusionConfig;
use crate::generator::Generator;
use crate::mask::MaskRegion;
use crate::model::Denoiser;
use crate::progress::{CancelFlag, Progress};
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::spectrogram::{image_to_tensor, tensor_to_image};
use crate::{Error, Result};

/// Options for unconditional generation.
#[derive(Debug, Clone, Default)]
pub struct GenerationParams {
    /// Seed for the noise generator; `None` draws from OS entropy.
    pub seed: Option<u64>,
    /// Inference steps; defaults to the denoiser's training length.
    pub steps: Option<usize>,
}

/// Options for generation conditioned on source audio.
#[derive(Debug, Clone)]
pub struct AudioToAudioParams {
    /// WAV file (resampled to the codec rate) or a raw buffer already at it.
    pub source: AudioSource,
    /// Which slice of the source to condition on.
    pub slice: usize,
    /// Number of leading steps to skip; `0` starts from pure noise.
    pub start_step: usize,
    /// Inference steps; defaults to the denoiser's training length.
    pub steps: Option<usize>,
    /// Seed for the noise generator; `None` draws from OS entropy.
    pub seed: Option<u64>,
    /// Seconds at the start of the slice kept from the source.
    pub mask_start_secs: f64,
    /// Seconds at the end of the slice kept from the source.
    pub mask_end_secs: f64,
}

impl AudioToAudioParams {
    pub fn new(source: AudioSource) -> Self {
        Self {
            source,
            slice: 0,
            start_step: 0,
            steps: None,
            seed: None,
            mask_start_secs: 0.0,
            mask_end_secs: 0.0,
        }
    }
}

/// Result of one generation call.
#[derive(Debug, Clone)]
pub struct GeneratedAudio {
    pub image: GrayImage,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Diffusion pipeline over a [`Denoiser`] and a spectrogram codec.
pub struct AudioDiffusion<D> {
    denoiser: D,
    mel: Mel,
    scheduler: SchedulerConfig,
    device: Device,
}

impl<D: Denoiser> AudioDiffusion<D> {
    /// Build a pipeline; the denoiser must accept square `x_res` images.
    pub fn new(denoiser: D, config: AudioDiffusionConfig) -> Result<Self> {
        let mel = Mel::new(config.mel)?;
        let size = denoiser.sample_size();
        if size != mel.x_res() || size != mel.y_res() {
            return Err(Error::Config(format!(
                "denoiser expects {size}x{size} images, codec produces {}x{}",
                mel.x_res(),
                mel.y_res()
            )));
        }
        if denoiser.in_channels() == 0 {
            return Err(Error::Config("denoiser reports zero input channels".into()));
        }

        let train_steps = denoiser.num_train_timesteps();
        if config.scheduler.num_train_timesteps != train_steps {
            tracing::debug!(
                configured = config.scheduler.num_train_timesteps,
                model = train_steps,
                "using the denoiser's training schedule length"
            );
        }
        let scheduler = config.scheduler.with_train_timesteps(train_steps);

        Ok(Self {
            denoiser,
            mel,
            scheduler,
            device: Device::Cpu,
        })
    }

    /// Run tensors on `device` instead of the CPU.
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn mel(&self) -> &Mel {
        &self.mel
    }

    pub fn denoiser(&self) -> &D {
        &self.denoiser
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    fn noise_shape(&self) -> (usize, usize, usize, usize) {
        let size = self.denoiser.sample_size();
        (1, self.denoiser.in_channels(), size, size)
    }

    /// Generate a spectrogram from pure noise and decode it to audio.
    pub fn generate_spectrogram_and_audio(
        &self,
        params: &GenerationParams,
        progress: &mut dyn Progress,
        cancel: &CancelFlag,
    ) -> Result<GeneratedAudio> {
        let steps = params.steps.unwrap_or(self.scheduler.num_train_timesteps);
        let mut scheduler = self.scheduler.build();
        scheduler.set_timesteps(steps)?;

        tracing::info!(steps, seed = ?params.seed, "generating spectrogram");
        let mut generator = Generator::new(params.seed);
        let noise = generator.randn(self.noise_shape(), &self.device)?;

        let timesteps = scheduler.timesteps().to_vec();
        let image = self.denoise(
            &mut *scheduler,
            noise,
            &timesteps,
            None,
            &mut generator,
            progress,
            cancel,
        )?;
        self.decode(&image)
    }

    /// Generate a spectrogram seeded from a slice of source audio.
    ///
    /// Skips `start_step` steps of the schedule and keeps the masked edge
    /// columns pinned to the source at every step.
    pub fn generate_spectrogram_and_audio_from_audio(
        &self,
        params: &AudioToAudioParams,
        progress: &mut dyn Progress,
        cancel: &CancelFlag,
    ) -> Result<GeneratedAudio> {
        let mask = MaskRegion::from_secs(
            params.mask_start_secs,
            params.mask_end_secs,
            self.mel.sample_rate(),
            self.mel.hop_length(),
            self.mel.x_res(),
        )?;
        self.conditioned(params, (!mask.is_empty()).then_some(mask), progress, cancel)
    }

    fn conditioned(
        &self,
        params: &AudioToAudioParams,
        mask: Option<MaskRegion>,
        progress: &mut dyn Progress,
        cancel: &CancelFlag,
    ) -> Result<GeneratedAudio> {
        let steps = params.steps.unwrap_or(self.denoiser.num_train_timesteps());
        if steps == 0 {
            return Err(Error::Config("steps must be at least 1".into()));
        }
        if params.start_step > steps {
            return Err(Error::Config(format!(
                "start_step {} exceeds steps {steps}",
                params.start_step
            )));
        }

        // The conditioned schedule spans exactly `steps` training timesteps.
        let mut scheduler = self.scheduler.with_train_timesteps(steps).build();
        scheduler.set_timesteps(steps)?;

        let mut generator = Generator::new(params.seed);
        let noise = generator.randn(self.noise_shape(), &self.device)?;

        let audio = self.mel.load_audio(&params.source)?;
        let source_image = self.mel.slice_to_image(&audio, params.slice)?;
        let x0 = image_to_tensor(&source_image, self.denoiser.in_channels(), &self.device)?;

        let timesteps = scheduler.timesteps()[params.start_step..].to_vec();
        tracing::info!(
            steps,
            start_step = params.start_step,
            slice = params.slice,
            mask_start = mask.map_or(0, |m| m.start()),
            mask_end = mask.map_or(0, |m| m.end()),
            "generating from audio"
        );

        let initial = if params.start_step == 0 {
            noise.clone()
        } else if let Some(&first) = timesteps.first() {
            scheduler.add_noise(&x0, &noise, &[first])?
        } else {
            x0.clone()
        };

        let anchors = match mask {
            Some(mask) if !timesteps.is_empty() => Some((
                mask,
                mask_trajectory(&*scheduler, &x0, &noise, &timesteps)?,
            )),
            _ => None,
        };

        let image = self.denoise(
            &mut *scheduler,
            initial,
            &timesteps,
            anchors.as_ref().map(|(mask, trajectory)| (mask, trajectory.as_slice())),
            &mut generator,
            progress,
            cancel,
        )?;
        self.decode(&image)
    }

    /// The reverse loop. Checks `cancel` before every denoiser call.
    #[allow(clippy::too_many_arguments)]
    fn denoise(
        &self,
        scheduler: &mut (dyn Scheduler + Send),
        mut state: Tensor,
        timesteps: &[usize],
        anchors: Option<(&MaskRegion, &[Tensor])>,
        generator: &mut Generator,
        progress: &mut dyn Progress,
        cancel: &CancelFlag,
    ) -> Result<Tensor> {
        let total = timesteps.len();
        let started = std::time::Instant::now();
        progress.on_start(total);

        for (i, &t) in timesteps.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(step = i, total, "generation cancelled");
                return Err(Error::Cancelled);
            }
            progress.on_step(i, total, t);

            let prediction = self.denoiser.predict(&state, t)?;
            state = scheduler.step(&prediction, t, &state, generator)?;
            if let Some((mask, trajectory)) = anchors {
                state = mask.blend(&state, &trajectory[i])?;
            }
            tracing::debug!(step = i, timestep = t, "denoise step");
        }

        progress.on_finish();
        tracing::info!(
            steps = total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "denoising complete"
        );
        Ok(state)
    }

    fn decode(&self, state: &Tensor) -> Result<GeneratedAudio> {
        let image = tensor_to_image(state)?;
        let samples = self.mel.image_to_audio(&image)?;
        Ok(GeneratedAudio {
            image,
            samples,
            sample_rate: self.mel.sample_rate(),
        })
    }
}

/// Source re-noised to the level each loop iteration lands on.
fn mask_trajectory(
    scheduler: &(dyn Scheduler + Send),
    x0: &Tensor,
    noise: &Tensor,
    timesteps: &[usize],
) -> Result<Vec<Tensor>> {
    let levels: Vec<Option<usize>> = timesteps
        .iter()
        .map(|&t| scheduler.previous_timestep(t))
        .collect();
    let noisy: Vec<usize> = levels.iter().flatten().copied().collect();
    let batch = if noisy.is_empty() {
        None
    } else {
        Some(scheduler.add_noise(x0, noise, &noisy)?)
    };

    let mut next = 0;
    levels
        .iter()
        .map(|level| match (level, &batch) {
            (Some(_), Some(batch)) => {
                let entry = batch.narrow(0, next, 1)?;
                next += 1;
                Ok(entry)
            }
            _ => Ok(x0.clone()),
        })
        .collect()
}
