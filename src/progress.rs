//! Progress reporting and cooperative cancellation for the sampling loop.
//!
//! The loop calls [`Progress::on_step`] once per step boundary, right after
//! checking its [`CancelFlag`]. Reporters must not block.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Receives per-step progress from the reverse-diffusion loop.
pub trait Progress {
    /// Called once before the first step with the number of steps to run.
    fn on_start(&mut self, _total: usize) {}

    /// Called before step `step` (0-based) of `total`, at `timestep`.
    fn on_step(&mut self, step: usize, total: usize, timestep: usize);

    /// Called after the last step.
    fn on_finish(&mut self) {}
}

/// Disabled reporter.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn on_step(&mut self, _step: usize, _total: usize, _timestep: usize) {}
}

/// Closures receive `(step, total)`.
impl<F: FnMut(usize, usize)> Progress for F {
    fn on_step(&mut self, step: usize, total: usize, _timestep: usize) {
        self(step, total)
    }
}

/// Emits a `tracing` event every `every` steps and on the last step.
#[derive(Debug, Clone)]
pub struct LogProgress {
    every: usize,
    started: Option<std::time::Instant>,
}

impl LogProgress {
    pub fn new(every: usize) -> Self {
        Self {
            every: every.max(1),
            started: None,
        }
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new(10)
    }
}

impl Progress for LogProgress {
    fn on_start(&mut self, total: usize) {
        self.started = Some(std::time::Instant::now());
        tracing::info!(total, "denoising");
    }

    fn on_step(&mut self, step: usize, total: usize, timestep: usize) {
        if step % self.every == 0 || step + 1 == total {
            tracing::info!(step = step + 1, total, timestep, "denoising step");
        }
    }

    fn on_finish(&mut self) {
        if let Some(started) = self.started.take() {
            tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "denoising done");
        }
    }
}

/// Shared cancellation flag, checked once per loop iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; every clone observes it.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
