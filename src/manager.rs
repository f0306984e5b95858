//! Generation manager: keeps the pipeline resident and queues requests.
//!
//! The manager owns one [`AudioDiffusion`] pipeline on a dedicated blocking
//! thread. Callers submit [`GenerationRequest`]s which are processed
//! sequentially; each carries its own [`CancelFlag`].
//!
//! # Example
//!
//! ```no_run
//! use audio_diffusion_rs::config::AudioDiffusionConfig;
//! use audio_diffusion_rs::manager::{GenerationManager, GenerationRequest};
//! use audio_diffusion_rs::model::FnDenoiser;
//! use audio_diffusion_rs::pipeline::{AudioDiffusion, GenerationParams};
//!
//! #[tokio::main]
//! async fn main() {
//!     let denoiser = FnDenoiser::new(256, |sample, _t| Ok(sample.zeros_like()?));
//!     let pipeline = AudioDiffusion::new(denoiser, AudioDiffusionConfig::default()).unwrap();
//!     let manager = GenerationManager::start(pipeline);
//!     let request = GenerationRequest::unconditional(GenerationParams::default());
//!     let audio = manager.generate(request).await.unwrap();
//! }
//! ```

use tokio::sync::{mpsc, oneshot};

use crate::model::Denoiser;
use crate::pipeline::{AudioDiffusion, AudioToAudioParams, GeneratedAudio, GenerationParams};
use crate::progress::{CancelFlag, LogProgress};
use crate::{Error, Result};

/// Configuration for the generation manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Requests that may wait in the queue before `generate` blocks.
    pub queue_capacity: usize,

    /// Log progress every this many denoising steps.
    pub log_every: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            log_every: 10,
        }
    }
}

/// What to generate.
#[derive(Debug, Clone)]
pub enum RequestKind {
    Unconditional(GenerationParams),
    FromAudio(AudioToAudioParams),
}

/// A generation request plus its cancellation handle.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub kind: RequestKind,
    pub cancel: CancelFlag,
}

impl GenerationRequest {
    pub fn unconditional(params: GenerationParams) -> Self {
        Self {
            kind: RequestKind::Unconditional(params),
            cancel: CancelFlag::new(),
        }
    }

    pub fn from_audio(params: AudioToAudioParams) -> Self {
        Self {
            kind: RequestKind::FromAudio(params),
            cancel: CancelFlag::new(),
        }
    }

    /// Handle that cancels this request once it is queued or running.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }
}

/// A submitted generation request.
struct PendingRequest {
    request: GenerationRequest,
    reply: oneshot::Sender<Result<GeneratedAudio>>,
}

/// Handle for submitting generation requests to a running manager.
#[derive(Clone)]
pub struct GenerationManager {
    tx: mpsc::Sender<PendingRequest>,
}

impl GenerationManager {
    /// Move `pipeline` onto a worker thread with default settings.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<D>(pipeline: AudioDiffusion<D>) -> Self
    where
        D: Denoiser + Send + 'static,
    {
        Self::start_with(pipeline, ManagerConfig::default())
    }

    pub fn start_with<D>(pipeline: AudioDiffusion<D>, config: ManagerConfig) -> Self
    where
        D: Denoiser + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<PendingRequest>(config.queue_capacity.max(1));
        tracing::info!(queue_capacity = config.queue_capacity, "starting generation manager");
        tokio::task::spawn_blocking(move || run_manager(pipeline, config, rx));
        Self { tx }
    }

    /// Submit a generation request and wait for the result.
    pub async fn generate(&self, request: GenerationRequest) -> Result<GeneratedAudio> {
        let (reply_tx, reply_rx) = oneshot::channel::<Result<GeneratedAudio>>();
        self.tx
            .send(PendingRequest {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::Manager("manager has shut down".into()))?;

        reply_rx
            .await
            .map_err(|_| Error::Manager("manager dropped reply channel".into()))?
    }
}

/// The manager loop; runs in a dedicated blocking thread.
fn run_manager<D: Denoiser>(
    pipeline: AudioDiffusion<D>,
    config: ManagerConfig,
    mut rx: mpsc::Receiver<PendingRequest>,
) {
    while let Some(PendingRequest { request, reply }) = rx.blocking_recv() {
        let result = if request.cancel.is_cancelled() {
            tracing::info!("skipping request cancelled while queued");
            Err(Error::Cancelled)
        } else {
            let mut progress = LogProgress::new(config.log_every);
            match &request.kind {
                RequestKind::Unconditional(params) => {
                    pipeline.generate_spectrogram_and_audio(params, &mut progress, &request.cancel)
                }
                RequestKind::FromAudio(params) => pipeline
                    .generate_spectrogram_and_audio_from_audio(params, &mut progress, &request.cancel),
            }
        };
        if let Err(error) = &result {
            tracing::warn!(%error, "generation request failed");
        }
        // Ignore send errors: the caller may have gone away.
        let _ = reply.send(result);
    }
    tracing::info!("generation manager shut down");
}
