//! Call lifecycle: idle → connecting → active (listening/talking) → closed | error.
//!
//! The controller owns every resource of the current call and is the only
//! place session state changes. Devices and the link talk to it through one
//! event channel; user commands arrive through [`CallHandle`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::audio::{
    AudioOutput, CaptureStream, Microphone, OutboundGate, Pcm16Decoder, PlaybackContext,
    PlaybackScheduler, StreamDecoder, VolumeMeter,
};
use crate::audio::capture::encode_block;
use crate::config::Config;
use crate::error::CallError;
use crate::event::{BufferId, CallEvent, CallId, Envelope, EventSink};
use crate::net_link::{Connector, LinkEvent, LinkHandle};
use crate::profile::NetworkProfile;
use crate::protocol::SetupMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Activity {
    Listening,
    Talking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallState {
    Idle,
    Connecting,
    Active(Activity),
    Closed,
    Error,
}

impl CallState {
    pub fn is_in_progress(&self) -> bool {
        matches!(self, CallState::Connecting | CallState::Active(_))
    }
}

/// Read state for the call widget.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallStatus {
    pub state: CallState,
    pub talking: bool,
    pub volume: f32,
    pub error: Option<String>,
}

impl Default for CallStatus {
    fn default() -> Self {
        Self {
            state: CallState::Idle,
            talking: false,
            volume: 0.0,
            error: None,
        }
    }
}

#[derive(Debug)]
pub enum ControlCommand {
    Start,
    Stop,
    SelectProfile(Option<NetworkProfile>),
    Shutdown,
}

/// Cloneable front end of a running controller.
#[derive(Debug, Clone)]
pub struct CallHandle {
    tx: mpsc::Sender<ControlCommand>,
    status: watch::Receiver<CallStatus>,
}

impl CallHandle {
    pub async fn start(&self) -> anyhow::Result<()> {
        self.send(ControlCommand::Start).await
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(ControlCommand::Stop).await
    }

    pub async fn select_profile(&self, profile: Option<NetworkProfile>) -> anyhow::Result<()> {
        self.send(ControlCommand::SelectProfile(profile)).await
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.send(ControlCommand::Shutdown).await
    }

    pub fn status(&self) -> CallStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallStatus> {
        self.status.clone()
    }

    async fn send(&self, cmd: ControlCommand) -> anyhow::Result<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| anyhow::anyhow!("Call controller has stopped"))
    }
}

/// Everything one call attempt holds. Dropped only through `teardown`.
struct ActiveCall {
    id: CallId,
    tag: Uuid,
    link: Option<LinkHandle>,
    capture: Option<Box<dyn CaptureStream>>,
    playback: Option<Box<dyn PlaybackContext>>,
    scheduler: PlaybackScheduler,
    decoder: Pcm16Decoder,
    meter: VolumeMeter,
    gate: OutboundGate,
    connect_task: Option<JoinHandle<()>>,
    timeout_task: Option<JoinHandle<()>>,
}

pub struct CallController {
    config: Config,
    profile: Option<NetworkProfile>,
    microphone: Arc<dyn Microphone>,
    output: Arc<dyn AudioOutput>,
    connector: Arc<dyn Connector>,
    status: watch::Sender<CallStatus>,
    events_tx: mpsc::UnboundedSender<Envelope>,
    events_rx: mpsc::UnboundedReceiver<Envelope>,
    next_call: u64,
    call: Option<ActiveCall>,
}

impl CallController {
    pub fn new(
        config: Config,
        microphone: Arc<dyn Microphone>,
        output: Arc<dyn AudioOutput>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (status, _) = watch::channel(CallStatus::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            profile: None,
            microphone,
            output,
            connector,
            status,
            events_tx,
            events_rx,
            next_call: 0,
            call: None,
        }
    }

    pub fn status(&self) -> CallStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> CallState {
        self.status.borrow().state
    }

    pub fn subscribe(&self) -> watch::Receiver<CallStatus> {
        self.status.subscribe()
    }

    pub fn profile(&self) -> Option<&NetworkProfile> {
        self.profile.as_ref()
    }

    /// Id of the call currently holding resources.
    pub fn current_call(&self) -> Option<CallId> {
        self.call.as_ref().map(|c| c.id)
    }

    /// Clock cursor of the current call's scheduler.
    pub fn playback_cursor(&self) -> Option<f64> {
        self.call.as_ref().map(|c| c.scheduler.cursor())
    }

    /// Buffers scheduled and not yet finished.
    pub fn scheduled_buffers(&self) -> usize {
        self.call.as_ref().map(|c| c.scheduler.len()).unwrap_or(0)
    }

    /// Runs the controller on its own task.
    pub fn spawn(self) -> (CallHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(32);
        let handle = CallHandle {
            tx,
            status: self.subscribe(),
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    pub async fn run(mut self, mut commands: mpsc::Receiver<ControlCommand>) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(ControlCommand::Start) => self.start().await,
                    Some(ControlCommand::Stop) => self.stop(),
                    Some(ControlCommand::SelectProfile(profile)) => self.select_profile(profile),
                    Some(ControlCommand::Shutdown) | None => break,
                },
                Some(envelope) = self.events_rx.recv() => self.handle_event(envelope),
            }
        }
        self.stop();
        log::info!("Call controller stopped");
    }

    /// Waits for the next device/link event and applies it.
    pub async fn next_event(&mut self) -> bool {
        match self.events_rx.recv().await {
            Some(envelope) => {
                self.handle_event(envelope);
                true
            }
            None => false,
        }
    }

    /// Applies every event already queued. Returns how many were handled.
    pub fn drain_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(envelope) = self.events_rx.try_recv() {
            self.handle_event(envelope);
            handled += 1;
        }
        handled
    }

    // ======================== Commands ========================

    /// Changing the profile ends any call in progress; the widget goes back to idle.
    pub fn select_profile(&mut self, profile: Option<NetworkProfile>) {
        let changed = self.profile.as_ref().map(|p| &p.id) != profile.as_ref().map(|p| &p.id);
        if changed && self.call.is_some() {
            log::info!("Network profile changed, ending current call");
            self.teardown();
            self.publish(|s| {
                s.state = CallState::Idle;
                s.error = None;
            });
        }
        if let Some(p) = &profile {
            log::info!("Selected profile {} ({}, {})", p.id, p.provider, p.location);
        }
        self.profile = profile;
    }

    pub async fn start(&mut self) {
        if self.state().is_in_progress() {
            log::debug!("start() ignored, call already {:?}", self.state());
            return;
        }

        let Some(profile) = self.profile.clone() else {
            self.fail(CallError::NoProfile);
            return;
        };
        let Some(api_key) = self.config.api_key.clone() else {
            self.fail(CallError::MissingCredential);
            return;
        };

        self.next_call += 1;
        let id = CallId(self.next_call);
        let tag = Uuid::new_v4();
        let sink = EventSink::new(id, self.events_tx.clone());
        log::info!(
            "[{}] Starting support call via {} ({})",
            tag,
            profile.provider,
            profile.ip
        );

        self.call = Some(ActiveCall {
            id,
            tag,
            link: None,
            capture: None,
            playback: None,
            scheduler: PlaybackScheduler::new(),
            decoder: Pcm16Decoder::default(),
            meter: VolumeMeter::new(self.config.volume_scale, self.config.volume_decay),
            gate: OutboundGate::new(self.config.pre_open_policy, self.config.pre_open_queue_limit),
            connect_task: None,
            timeout_task: None,
        });
        self.publish(|s| {
            s.state = CallState::Connecting;
            s.error = None;
            s.talking = false;
            s.volume = 0.0;
        });

        // 播放上下文
        match self.output.open(self.config.output_sample_rate, sink.clone()) {
            Ok(ctx) => {
                if let Some(call) = self.call.as_mut() {
                    call.playback = Some(ctx);
                }
            }
            Err(e) => {
                log::error!("[{}] Failed to open audio output: {:#}", tag, e);
                self.fail(CallError::Microphone);
                return;
            }
        }

        // 麦克风
        let capture = self
            .microphone
            .open(
                self.config.input_sample_rate,
                self.config.capture_block_size,
                sink.clone(),
            )
            .await;
        match capture {
            Ok(stream) => {
                if let Some(call) = self.call.as_mut() {
                    call.capture = Some(stream);
                }
            }
            Err(e) => {
                log::error!("[{}] Microphone access failed: {:#}", tag, e);
                self.fail(CallError::Microphone);
                return;
            }
        }

        // 远端会话
        let setup = SetupMessage::new(
            self.config.model,
            self.config.voice,
            profile.system_instruction(),
        );
        let connector = self.connector.clone();
        let link_sink = sink.clone();
        let connect_task = tokio::spawn(async move {
            let event = match connector.open(&api_key, setup, link_sink.clone()).await {
                Ok(handle) => LinkEvent::Opened(handle),
                Err(e) => {
                    log::error!("[{}] Failed to open live session: {:#}", tag, e);
                    LinkEvent::Failed(e.to_string())
                }
            };
            link_sink.send(CallEvent::Link(event));
        });

        let timeout_task = (self.config.connect_timeout_ms > 0).then(|| {
            let timeout = Duration::from_millis(self.config.connect_timeout_ms);
            let timeout_sink = sink;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                timeout_sink.send(CallEvent::ConnectTimeout);
            })
        });

        if let Some(call) = self.call.as_mut() {
            call.connect_task = Some(connect_task);
            call.timeout_task = timeout_task;
        }
    }

    /// Hang up. A no-op unless a call holds resources.
    pub fn stop(&mut self) {
        if self.call.is_none() {
            return;
        }
        self.teardown();
        self.publish(|s| s.state = CallState::Closed);
    }

    // ======================== Events ========================

    pub fn handle_event(&mut self, envelope: Envelope) {
        if self.current_call() != Some(envelope.call) {
            // 过期事件：会话已经拆除
            if let CallEvent::Link(LinkEvent::Opened(handle)) = envelope.event {
                log::info!("Closing live session opened after its call ended");
                handle.close();
            } else {
                log::trace!("Dropping stale event for {:?}", envelope.call);
            }
            return;
        }

        match envelope.event {
            CallEvent::Captured(block) => self.on_captured(&block),
            CallEvent::Link(event) => self.on_link_event(event),
            CallEvent::PlaybackEnded(id) => self.on_playback_ended(id),
            CallEvent::DeviceLost(reason) => {
                log::error!("Audio device lost: {}", reason);
                self.fail(CallError::Microphone);
            }
            CallEvent::ConnectTimeout => {
                if self.state() == CallState::Connecting {
                    log::error!("Live session did not open in {} ms", self.config.connect_timeout_ms);
                    self.fail(CallError::Timeout);
                }
            }
        }
    }

    fn on_captured(&mut self, block: &[f32]) {
        let active = matches!(self.state(), CallState::Active(_));
        let mime_type = self.config.input_mime_type();
        let Some(call) = self.call.as_mut() else {
            return;
        };

        let level = call.meter.update(block);
        let frame = encode_block(block, &mime_type);
        match (&call.link, active) {
            (Some(link), true) => {
                link.send_audio(frame);
            }
            _ => call.gate.hold(frame),
        }
        self.publish(|s| s.volume = level);
    }

    fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened(handle) => self.on_opened(handle),
            LinkEvent::Failed(message) => {
                log::error!("Live session failed to open: {}", message);
                self.fail(CallError::Connect);
            }
            LinkEvent::Audio(data) => self.on_audio(&data),
            LinkEvent::Interrupted => self.on_interrupted(),
            LinkEvent::Closed => {
                log::info!("Session closed from server");
                self.stop();
            }
            LinkEvent::Error(message) => {
                log::error!("Session error: {}", message);
                self.fail(CallError::Transport);
            }
        }
    }

    fn on_opened(&mut self, handle: LinkHandle) {
        if self.state() != CallState::Connecting {
            handle.close();
            return;
        }
        let Some(call) = self.call.as_mut() else {
            handle.close();
            return;
        };

        if let Some(task) = call.timeout_task.take() {
            task.abort();
        }
        call.connect_task = None;

        let queued = call.gate.release();
        if !queued.is_empty() {
            log::debug!("[{}] Flushing {} frames captured before open", call.tag, queued.len());
        }
        for frame in queued {
            handle.send_audio(frame);
        }
        log::info!(
            "[{}] Live session opened ({} pre-open frames dropped)",
            call.tag,
            call.gate.dropped()
        );
        call.link = Some(handle);
        self.publish(|s| s.state = CallState::Active(Activity::Listening));
    }

    fn on_audio(&mut self, data: &[u8]) {
        if !matches!(self.state(), CallState::Active(_)) {
            return;
        }
        let Some(call) = self.call.as_mut() else {
            return;
        };
        let Some(ctx) = call.playback.as_deref_mut() else {
            return;
        };

        let samples = match call.decoder.decode(data) {
            Ok(samples) => samples,
            Err(e) => {
                log::warn!("[{}] Dropping undecodable audio chunk: {}", call.tag, e);
                return;
            }
        };
        match call.scheduler.schedule(ctx, samples) {
            Ok(buffer) => {
                log::trace!(
                    "[{}] Buffer {} scheduled at {:.3}s for {:.3}s",
                    call.tag,
                    buffer.id,
                    buffer.start,
                    buffer.duration
                );
                self.publish(|s| {
                    s.state = CallState::Active(Activity::Talking);
                    s.talking = true;
                });
            }
            Err(e) => log::warn!("[{}] Failed to schedule playback: {}", call.tag, e),
        }
    }

    fn on_interrupted(&mut self) {
        let Some(call) = self.call.as_mut() else {
            return;
        };
        let stopped = call.scheduler.interrupt(context(&mut call.playback));
        if stopped > 0 {
            log::info!("[{}] Interrupted, stopped {} buffers", call.tag, stopped);
        }
        if matches!(self.state(), CallState::Active(_)) {
            self.publish(|s| {
                s.state = CallState::Active(Activity::Listening);
                s.talking = false;
            });
        }
    }

    fn on_playback_ended(&mut self, id: BufferId) {
        let Some(call) = self.call.as_mut() else {
            return;
        };
        if call.scheduler.finish(id) && self.state() == CallState::Active(Activity::Talking) {
            self.publish(|s| {
                s.state = CallState::Active(Activity::Listening);
                s.talking = false;
            });
        }
    }

    // ======================== Teardown ========================

    fn fail(&mut self, error: CallError) {
        if !error.is_precondition() {
            self.teardown();
        }
        let message = error.to_string();
        self.publish(|s| {
            s.state = CallState::Error;
            s.talking = false;
            s.volume = 0.0;
            s.error = Some(message);
        });
    }

    /// Releases everything the current call holds. Safe on partially
    /// acquired calls and when there is no call at all; never fails.
    fn teardown(&mut self) {
        let Some(mut call) = self.call.take() else {
            return;
        };
        log::info!("[{}] Tearing down call", call.tag);

        if let Some(task) = call.connect_task.take() {
            task.abort();
        }
        if let Some(task) = call.timeout_task.take() {
            task.abort();
        }

        if let Some(link) = call.link.take() {
            link.close();
        }

        if let Some(mut capture) = call.capture.take() {
            if let Err(e) = capture.stop() {
                log::warn!("[{}] Error stopping microphone: {}", call.tag, e);
            }
        }

        call.scheduler.interrupt(context(&mut call.playback));

        if let Some(mut playback) = call.playback.take() {
            if !playback.is_closed() {
                if let Err(e) = playback.close() {
                    log::warn!("[{}] Error closing playback context: {}", call.tag, e);
                }
            }
        }

        call.meter.reset();
        self.publish(|s| {
            s.talking = false;
            s.volume = 0.0;
        });
    }

    fn publish(&self, update: impl FnOnce(&mut CallStatus)) {
        self.status.send_if_modified(|status| {
            let before = status.clone();
            update(status);
            *status != before
        });
    }
}

/// Borrows the playback context with a call-scoped object lifetime.
fn context(playback: &mut Option<Box<dyn PlaybackContext>>) -> Option<&mut dyn PlaybackContext> {
    match playback {
        Some(ctx) => {
            let ctx: &mut dyn PlaybackContext = ctx.as_mut();
            Some(ctx)
        }
        None => None,
    }
}

impl Drop for CallController {
    fn drop(&mut self) {
        self.teardown();
    }
}
