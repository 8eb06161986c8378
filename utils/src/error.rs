use thiserror::Error;

/// Failures of microphone, speaker or camera handling. Reported to the
/// caller, never fatal to the realtime connection.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("device unavailable: {0}")]
    Unavailable(String),

    #[error("{0} is held by another channel")]
    Busy(&'static str),

    #[error("device is not open")]
    NotOpen,

    #[error("audio stream error: {0}")]
    Stream(String),

    #[error("resampler error: {0}")]
    Resampler(String),
}

impl From<cpal::DevicesError> for DeviceError {
    fn from(err: cpal::DevicesError) -> Self {
        DeviceError::Unavailable(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for DeviceError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        DeviceError::Unavailable(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for DeviceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        DeviceError::Stream(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for DeviceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        DeviceError::Stream(err.to_string())
    }
}
