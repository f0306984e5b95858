//! Crate-wide error and result types.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Tensor op failed inside candle or the denoiser.
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),

    /// Undecodable WAV, bad sample data, or a beat index outside the signal.
    #[error("audio: {0}")]
    Audio(String),

    /// Spectrogram PNG could not be read or written.
    #[error("image: {0}")]
    Image(String),

    /// Rejected codec settings or generation parameters.
    #[error("config: {0}")]
    Config(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// A [`CancelFlag`](crate::progress::CancelFlag) was raised before the run finished.
    #[error("generation cancelled")]
    Cancelled,

    /// The manager worker is gone or dropped the reply.
    #[error("manager: {0}")]
    Manager(String),
}

impl From<hound::Error> for Error {
    fn from(error: hound::Error) -> Self {
        Self::Audio(format!("wav: {error}"))
    }
}

impl From<image::ImageError> for Error {
    fn from(error: image::ImageError) -> Self {
        Self::Image(error.to_string())
    }
}
