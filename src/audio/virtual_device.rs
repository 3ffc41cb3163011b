//! Hardware-free devices.
//!
//! `VirtualMicrophone` emits blocks on demand (or a quiet test tone in
//! realtime mode) and `VirtualOutput` plays into a `Timeline` whose clock is
//! advanced either by hand or by a wall-clock ticker thread. The simulator
//! binary uses the realtime variants; the tests drive the clocks directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;

use super::timeline::Timeline;
use super::{AudioOutput, CaptureStream, Microphone, PlaybackContext};
use crate::event::{BufferId, CallEvent, EventSink};

const TICK: Duration = Duration::from_millis(20);
const TONE_HZ: f32 = 440.0;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ======================== Microphone ========================

#[derive(Debug, Default)]
struct MicState {
    sink: Option<EventSink>,
    generation: u64,
    opens: usize,
}

#[derive(Debug, Clone, Default)]
pub struct VirtualMicrophone {
    state: Arc<Mutex<MicState>>,
    deny: bool,
    tone: Option<f32>,
}

impl VirtualMicrophone {
    /// Silent until blocks are pushed with [`VirtualMicrophone::push`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Every open attempt fails, like a denied permission prompt.
    pub fn denied() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    /// Produces a sine tone of the given amplitude at the capture rate.
    pub fn realtime(amplitude: f32) -> Self {
        Self {
            tone: Some(amplitude),
            ..Self::default()
        }
    }

    /// Delivers one block as if the device had captured it.
    /// Returns false when no capture is running.
    pub fn push(&self, block: Vec<f32>) -> bool {
        let sink = lock(&self.state).sink.clone();
        match sink {
            Some(sink) => sink.send(CallEvent::Captured(block)),
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).sink.is_some()
    }

    /// Reports the running capture as failed, like an unplugged device.
    pub fn lose(&self, reason: &str) -> bool {
        let sink = lock(&self.state).sink.take();
        match sink {
            Some(sink) => sink.send(CallEvent::DeviceLost(reason.to_string())),
            None => false,
        }
    }

    /// How many times the device was opened (permission prompts shown).
    pub fn open_count(&self) -> usize {
        lock(&self.state).opens
    }
}

#[async_trait]
impl Microphone for VirtualMicrophone {
    async fn open(
        &self,
        sample_rate: u32,
        block_size: usize,
        sink: EventSink,
    ) -> Result<Box<dyn CaptureStream>> {
        let generation = {
            let mut state = lock(&self.state);
            state.opens += 1;
            if self.deny {
                anyhow::bail!("Permission denied by virtual microphone");
            }
            state.generation += 1;
            state.sink = Some(sink.clone());
            state.generation
        };

        let running = Arc::new(AtomicBool::new(true));
        if let Some(amplitude) = self.tone {
            let running = running.clone();
            thread::Builder::new()
                .name("virtual-mic".into())
                .spawn(move || tone_thread(sample_rate, block_size, amplitude, sink, &running))?;
        }

        log::info!(
            "Virtual microphone opened: rate={}, block={}",
            sample_rate,
            block_size
        );

        Ok(Box::new(VirtualCapture {
            state: self.state.clone(),
            generation,
            running,
        }))
    }
}

fn tone_thread(
    sample_rate: u32,
    block_size: usize,
    amplitude: f32,
    sink: EventSink,
    running: &AtomicBool,
) {
    let rate = sample_rate.max(1) as f32;
    let block_size = block_size.max(1);
    let period = Duration::from_secs_f64(block_size as f64 / rate as f64);
    let mut phase = 0u64;

    while running.load(Ordering::Relaxed) {
        thread::sleep(period);
        if !running.load(Ordering::Relaxed) {
            break;
        }
        let block: Vec<f32> = (0..block_size as u64)
            .map(|i| {
                let t = (phase + i) as f32 / rate;
                amplitude * (2.0 * std::f32::consts::PI * TONE_HZ * t).sin()
            })
            .collect();
        phase += block_size as u64;
        if !sink.send(CallEvent::Captured(block)) {
            break;
        }
    }
}

struct VirtualCapture {
    state: Arc<Mutex<MicState>>,
    generation: u64,
    running: Arc<AtomicBool>,
}

impl CaptureStream for VirtualCapture {
    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        let mut state = lock(&self.state);
        if state.generation == self.generation {
            state.sink = None;
        }
        Ok(())
    }
}

// ======================== Output ========================

#[derive(Debug, Default)]
struct OutputState {
    timeline: Option<Timeline>,
    sink: Option<EventSink>,
    generation: u64,
    opens: usize,
}

impl OutputState {
    /// Advances the live timeline and hands back the finished buffers
    /// together with the sink they must be reported to.
    fn advance_frames(&mut self, frames: u64) -> Option<(Vec<BufferId>, EventSink)> {
        let timeline = self.timeline.as_mut()?;
        let finished = timeline.advance(frames);
        let sink = self.sink.clone()?;
        Some((finished, sink))
    }
}

#[derive(Debug, Clone, Default)]
pub struct VirtualOutput {
    state: Arc<Mutex<OutputState>>,
    realtime: bool,
    fail: bool,
}

impl VirtualOutput {
    /// Clock only moves through [`VirtualOutput::advance`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock follows wall time on a ticker thread.
    pub fn realtime() -> Self {
        Self {
            realtime: true,
            ..Self::default()
        }
    }

    /// Opening a context always fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Moves the open context's clock forward and reports finished buffers.
    /// Returns how many buffers finished.
    pub fn advance(&self, seconds: f64) -> usize {
        let outcome = {
            let mut state = lock(&self.state);
            let frames = match state.timeline.as_ref() {
                Some(t) => t.seconds_to_frames(seconds),
                None => return 0,
            };
            state.advance_frames(frames)
        };
        match outcome {
            Some((finished, sink)) => {
                for id in &finished {
                    sink.send(CallEvent::PlaybackEnded(*id));
                }
                finished.len()
            }
            None => 0,
        }
    }

    /// Clock of the open context, if any.
    pub fn now(&self) -> Option<f64> {
        lock(&self.state).timeline.as_ref().map(|t| t.now())
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).timeline.is_some()
    }

    /// Buffers currently placed on the open timeline.
    pub fn scheduled(&self) -> usize {
        lock(&self.state)
            .timeline
            .as_ref()
            .map(|t| t.len())
            .unwrap_or(0)
    }

    pub fn open_count(&self) -> usize {
        lock(&self.state).opens
    }
}

impl AudioOutput for VirtualOutput {
    fn open(&self, sample_rate: u32, sink: EventSink) -> Result<Box<dyn PlaybackContext>> {
        let generation = {
            let mut state = lock(&self.state);
            state.opens += 1;
            if self.fail {
                anyhow::bail!("Virtual output device unavailable");
            }
            state.generation += 1;
            state.timeline = Some(Timeline::new(sample_rate));
            state.sink = Some(sink);
            state.generation
        };

        if self.realtime {
            let state = self.state.clone();
            thread::Builder::new()
                .name("virtual-play".into())
                .spawn(move || ticker_thread(state, generation, sample_rate))?;
        }

        Ok(Box::new(VirtualPlayback {
            state: self.state.clone(),
            generation,
            sample_rate,
            closed: false,
        }))
    }
}

fn ticker_thread(state: Arc<Mutex<OutputState>>, generation: u64, sample_rate: u32) {
    let started = Instant::now();
    let mut rendered = 0u64;
    loop {
        thread::sleep(TICK);
        let due = (started.elapsed().as_secs_f64() * sample_rate as f64) as u64;
        let outcome = {
            let mut state = lock(&state);
            if state.generation != generation || state.timeline.is_none() {
                break;
            }
            let frames = due.saturating_sub(rendered);
            rendered = due;
            state.advance_frames(frames)
        };
        if let Some((finished, sink)) = outcome {
            for id in finished {
                if !sink.send(CallEvent::PlaybackEnded(id)) {
                    return;
                }
            }
        }
    }
}

struct VirtualPlayback {
    state: Arc<Mutex<OutputState>>,
    generation: u64,
    sample_rate: u32,
    closed: bool,
}

impl VirtualPlayback {
    fn with_timeline<R>(&self, f: impl FnOnce(&mut Timeline) -> R) -> Result<R> {
        if self.closed {
            anyhow::bail!("Playback context is closed");
        }
        let mut state = lock(&self.state);
        if state.generation != self.generation {
            anyhow::bail!("Playback context was replaced");
        }
        match state.timeline.as_mut() {
            Some(timeline) => Ok(f(timeline)),
            None => anyhow::bail!("Playback context is closed"),
        }
    }
}

impl PlaybackContext for VirtualPlayback {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.with_timeline(|t| t.now()).unwrap_or(0.0)
    }

    fn start(&mut self, id: BufferId, samples: Arc<[f32]>, at: f64) -> Result<()> {
        self.with_timeline(|t| t.schedule(id, samples, at))
    }

    fn stop(&mut self, id: BufferId) -> Result<()> {
        self.with_timeline(|t| {
            t.cancel(id);
        })
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut state = lock(&self.state);
        if state.generation == self.generation {
            state.timeline = None;
            state.sink = None;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
