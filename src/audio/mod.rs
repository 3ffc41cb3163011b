//! audio - capture, decode and scheduled playback for the support call
//!
//! Devices sit behind the `Microphone` / `AudioOutput` traits. Two backends
//! exist: a clock-driven virtual one (always available) and ALSA (feature
//! `alsa-backend`), which runs capture and playback on dedicated OS threads.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::event::{BufferId, EventSink};

pub mod capture;
pub mod scheduler;
pub mod stream_decoder;
pub mod timeline;
pub mod virtual_device;

#[cfg(feature = "alsa-backend")]
mod alsa_device;
#[cfg(feature = "alsa-backend")]
mod audio_system;
#[cfg(feature = "alsa-backend")]
mod play;
#[cfg(feature = "alsa-backend")]
mod record;

#[cfg(feature = "alsa-backend")]
pub use audio_system::{AlsaMicrophone, AlsaOutput};
pub use capture::{OutboundGate, VolumeMeter};
pub use scheduler::{PlaybackScheduler, ScheduledBuffer};
pub use stream_decoder::{Pcm16Decoder, StreamDecoder};
pub use timeline::Timeline;
pub use virtual_device::{VirtualMicrophone, VirtualOutput};

/// A permissioned capture device.
#[async_trait]
pub trait Microphone: Send + Sync {
    /// Starts capturing mono blocks of `block_size` samples at `sample_rate`.
    /// Every block is posted to `sink` as `CallEvent::Captured`.
    async fn open(
        &self,
        sample_rate: u32,
        block_size: usize,
        sink: EventSink,
    ) -> Result<Box<dyn CaptureStream>>;
}

/// A running capture. Capture never has an audible output edge.
pub trait CaptureStream: Send {
    /// Stops the device and releases the capture context. Calling it again is harmless.
    fn stop(&mut self) -> Result<()>;
}

/// Factory for playback contexts.
pub trait AudioOutput: Send + Sync {
    /// Opens a context whose clock starts at zero. Finished buffers are
    /// reported to `sink` as `CallEvent::PlaybackEnded`.
    fn open(&self, sample_rate: u32, sink: EventSink) -> Result<Box<dyn PlaybackContext>>;
}

/// One output clock plus the buffers scheduled on it.
pub trait PlaybackContext: Send {
    fn sample_rate(&self) -> u32;

    /// Seconds elapsed on the output clock.
    fn current_time(&self) -> f64;

    /// Schedules `samples` to begin exactly at `at` seconds.
    fn start(&mut self, id: BufferId, samples: Arc<[f32]>, at: f64) -> Result<()>;

    /// Cuts a buffer short. No `PlaybackEnded` is reported for it.
    fn stop(&mut self, id: BufferId) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;
}
