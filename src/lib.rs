//! Spectrogram-image audio diffusion in pure Rust.
//!
//! Generates audio by running a denoising diffusion model over mel
//! spectrogram images and inverting the result back to a waveform. The
//! denoiser itself is a pluggable [`model::Denoiser`]; this crate owns the
//! sampling loop, the noise schedules, the spectrogram codec, and the
//! conditioning logic that starts mid-trajectory from real audio.
//!
//! ## Architecture
//!
//! ```text
//! source audio ─→ mel codec ─→ image ─→ tensor x0 ──┐ (re-noise, mask)
//!                                                   ↓
//! seeded noise ─→ reverse loop (denoiser + DDPM/DDIM step)
//!                                                   ↓
//!              tensor ─→ 8-bit image ─→ Griffin-Lim ─→ audio
//! ```
//!
//! ## Modules
//!
//! - [`audio`]: spectrogram codec, beat tracking, WAV I/O, resampling
//! - [`pipeline`]: unconditional and audio-conditioned generation
//! - [`scheduler`]: DDPM and DDIM noise schedules
//! - [`mask`]: edge anchoring for conditioned generation
//! - [`model`]: denoiser interface
//! - [`looper`]: beat-aligned loop extraction
//! - [`manager`]: sequential request queue on a worker thread

pub mod audio;
pub mod config;
pub mod generator;
pub mod looper;
pub mod manager;
pub mod mask;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod scheduler;
pub mod spectrogram;

mod error;

pub use error::{Error, Result};
