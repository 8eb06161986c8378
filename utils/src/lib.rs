pub mod audio;
pub mod capture;
pub mod device;
pub mod error;
pub mod playback;
pub mod slot;
pub mod wav;

pub use capture::{CaptureChannel, CaptureStatus, FrameSink, InputDevice, SampleSink};
pub use error::DeviceError;
pub use playback::{OutputDevice, PlaybackChannel, RenderSource, TrackOffset, TrackQueue};
pub use slot::{DeviceGuard, DeviceSlot};
