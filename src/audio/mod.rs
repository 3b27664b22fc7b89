//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod pipeline;
pub mod playback;

pub use buffer::{AudioFrame, SampleRing};
pub use capture::AudioCapture;
pub use device::{get_device_by_id, list_devices, AudioDevice, AudioDeviceInfo};
pub use pipeline::AudioPipeline;
pub use playback::AudioPlayback;
