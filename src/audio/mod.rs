pub mod buffer;
pub mod capture;
pub mod wav;

pub use buffer::AudioBuffer;
pub use capture::{list_input_devices, MicrophoneSource};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("input device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error("capture stream failed: {0}")]
    Stream(String),
}

/// One exclusive audio input. Implementations release the device on `stop`.
pub trait AudioSource: Send {
    fn start(&mut self) -> Result<(), SourceError>;

    fn stop(&mut self) -> Result<AudioBuffer, SourceError>;

    fn is_active(&self) -> bool;

    fn name(&self) -> &str;
}
