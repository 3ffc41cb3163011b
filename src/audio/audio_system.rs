//! ALSA-backed microphone and playback context.
//!
//! Uses std::thread (NOT tokio tasks) for real-time audio I/O so device
//! reads and writes never stall the controller's event loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::oneshot;

use super::alsa_device::PcmRequest;
use super::play::play_thread;
use super::record::record_thread;
use super::timeline::Timeline;
use super::{AudioOutput, CaptureStream, Microphone, PlaybackContext};
use crate::event::{BufferId, CallEvent, EventSink};

// ======================== Capture ========================

#[derive(Debug, Clone)]
pub struct AlsaMicrophone {
    device: String,
}

impl AlsaMicrophone {
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
        }
    }
}

#[async_trait]
impl Microphone for AlsaMicrophone {
    async fn open(
        &self,
        sample_rate: u32,
        block_size: usize,
        sink: EventSink,
    ) -> Result<Box<dyn CaptureStream>> {
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();
        let device = self.device.clone();

        let handle = {
            let running = running.clone();
            thread::Builder::new()
                .name("audio-record".into())
                .spawn(move || {
                    let (pcm, params) = match PcmRequest::capture(&device, sample_rate).open() {
                        Ok(opened) => {
                            let _ = ready_tx.send(Ok(()));
                            opened
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(format!("{:#}", e)));
                            return;
                        }
                    };
                    if let Err(e) = record_thread(pcm, params, block_size, sink.clone(), &running) {
                        log::error!("Recording thread error: {}", e);
                        sink.send(CallEvent::DeviceLost(format!("capture: {}", e)));
                    }
                })?
        };

        match ready_rx.await {
            Ok(Ok(())) => Ok(Box::new(AlsaCapture {
                running,
                handle: Some(handle),
            })),
            Ok(Err(msg)) => anyhow::bail!(msg),
            Err(_) => anyhow::bail!("Recording thread exited before the device opened"),
        }
    }
}

struct AlsaCapture {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureStream for AlsaCapture {
    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            if h.join().is_err() {
                anyhow::bail!("Recording thread panicked");
            }
        }
        Ok(())
    }
}

impl Drop for AlsaCapture {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

// ======================== Playback ========================

#[derive(Debug, Clone)]
pub struct AlsaOutput {
    device: String,
    period_size: usize,
}

impl AlsaOutput {
    pub fn new(device: &str, period_size: usize) -> Self {
        Self {
            device: device.to_string(),
            period_size,
        }
    }
}

impl AudioOutput for AlsaOutput {
    fn open(&self, sample_rate: u32, sink: EventSink) -> Result<Box<dyn PlaybackContext>> {
        let running = Arc::new(AtomicBool::new(true));
        let timeline = Arc::new(Mutex::new(Timeline::new(sample_rate)));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), String>>();
        let device = self.device.clone();
        let period_size = self.period_size;

        let handle = {
            let running = running.clone();
            let timeline = timeline.clone();
            thread::Builder::new()
                .name("audio-play".into())
                .spawn(move || {
                    let request = PcmRequest::playback(&device, sample_rate, period_size);
                    let (pcm, params) = match request.open() {
                        Ok(opened) => {
                            let _ = ready_tx.send(Ok(()));
                            opened
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(format!("{:#}", e)));
                            return;
                        }
                    };
                    if let Err(e) = play_thread(pcm, params, timeline, sink.clone(), &running) {
                        log::error!("Playback thread error: {}", e);
                        sink.send(CallEvent::DeviceLost(format!("playback: {}", e)));
                    }
                })?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(AlsaPlayback {
                timeline,
                running,
                handle: Some(handle),
                sample_rate,
                closed: false,
            })),
            Ok(Err(msg)) => anyhow::bail!(msg),
            Err(_) => anyhow::bail!("Playback thread exited before the device opened"),
        }
    }
}

struct AlsaPlayback {
    timeline: Arc<Mutex<Timeline>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    sample_rate: u32,
    closed: bool,
}

impl AlsaPlayback {
    fn timeline(&self) -> Result<std::sync::MutexGuard<'_, Timeline>> {
        if self.closed {
            anyhow::bail!("Playback context is closed");
        }
        Ok(self.timeline.lock().unwrap_or_else(|p| p.into_inner()))
    }
}

impl PlaybackContext for AlsaPlayback {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.timeline().map(|t| t.now()).unwrap_or(0.0)
    }

    fn start(&mut self, id: BufferId, samples: Arc<[f32]>, at: f64) -> Result<()> {
        self.timeline()?.schedule(id, samples, at);
        Ok(())
    }

    fn stop(&mut self, id: BufferId) -> Result<()> {
        self.timeline()?.cancel(id);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.running.store(false, Ordering::SeqCst);
        self.timeline.lock().unwrap_or_else(|p| p.into_inner()).clear();
        if let Some(h) = self.handle.take() {
            if h.join().is_err() {
                anyhow::bail!("Playback thread panicked");
            }
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for AlsaPlayback {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
