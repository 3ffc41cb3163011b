//! Shared fixtures for driving a call without a network or sound card.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use geonet_voice::audio::{VirtualMicrophone, VirtualOutput};
use geonet_voice::config::{Config, PreOpenPolicy};
use geonet_voice::controller::CallController;
use geonet_voice::event::{CallEvent, EventSink};
use geonet_voice::net_link::{Connector, LinkCommand, LinkEvent, LinkHandle};
use geonet_voice::profile::{self, NetworkProfile};
use geonet_voice::protocol::SetupMessage;
use tokio::sync::{Notify, mpsc};

pub const OUTPUT_RATE: u32 = 24000;

#[derive(Clone)]
pub enum Mode {
    /// Opens immediately.
    Open,
    /// Opening fails with a transport error.
    Refuse,
    /// Never resolves.
    Hang,
    /// Opens once the notify fires.
    Gated(Arc<Notify>),
}

/// The far end of one opened session.
pub struct Session {
    pub api_key: String,
    pub setup: SetupMessage,
    pub events: EventSink,
    pub outbound: mpsc::Receiver<LinkCommand>,
}

impl Session {
    pub fn emit(&self, event: LinkEvent) -> bool {
        self.events.send(CallEvent::Link(event))
    }

    /// Everything the call has sent so far.
    pub fn sent(&mut self) -> Vec<LinkCommand> {
        let mut sent = Vec::new();
        while let Ok(cmd) = self.outbound.try_recv() {
            sent.push(cmd);
        }
        sent
    }
}

pub struct ScriptedConnector {
    mode: Mode,
    sessions: Mutex<Vec<Session>>,
    attempts: Mutex<usize>,
}

impl ScriptedConnector {
    pub fn new(mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            sessions: Mutex::new(Vec::new()),
            attempts: Mutex::new(0),
        })
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }

    /// Removes the oldest opened session.
    pub fn take_session(&self) -> Session {
        self.sessions.lock().unwrap().remove(0)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(
        &self,
        api_key: &str,
        setup: SetupMessage,
        events: EventSink,
    ) -> anyhow::Result<LinkHandle> {
        *self.attempts.lock().unwrap() += 1;
        match &self.mode {
            Mode::Open => {}
            Mode::Refuse => anyhow::bail!("connection refused"),
            Mode::Hang => std::future::pending::<()>().await,
            Mode::Gated(gate) => gate.notified().await,
        }

        let (tx, outbound) = mpsc::channel(64);
        self.sessions.lock().unwrap().push(Session {
            api_key: api_key.to_string(),
            setup,
            events,
            outbound,
        });
        Ok(LinkHandle::new(tx))
    }
}

pub fn test_config() -> Config {
    let mut config = Config::new().unwrap();
    config.api_key = Some("test-key".to_string());
    config.output_sample_rate = OUTPUT_RATE;
    config.input_sample_rate = 16000;
    config.capture_block_size = 4;
    config.connect_timeout_ms = 15000;
    config.pre_open_policy = PreOpenPolicy::Drop;
    config.pre_open_queue_limit = 4;
    config
}

pub fn delhi() -> NetworkProfile {
    profile::find("1").unwrap()
}

pub struct Harness {
    pub controller: CallController,
    pub mic: VirtualMicrophone,
    pub output: VirtualOutput,
    pub connector: Arc<ScriptedConnector>,
}

impl Harness {
    pub fn new(config: Config, mode: Mode) -> Self {
        Self::with_devices(config, mode, VirtualMicrophone::new(), VirtualOutput::new())
    }

    pub fn with_devices(
        config: Config,
        mode: Mode,
        mic: VirtualMicrophone,
        output: VirtualOutput,
    ) -> Self {
        let connector = ScriptedConnector::new(mode);
        let mut controller = CallController::new(
            config,
            Arc::new(mic.clone()),
            Arc::new(output.clone()),
            connector.clone(),
        );
        controller.select_profile(Some(delhi()));
        Self {
            controller,
            mic,
            output,
            connector,
        }
    }
}

/// PCM16 silence lasting `seconds` at the output rate.
pub fn pcm_chunk(seconds: f64) -> Vec<u8> {
    let frames = (seconds * OUTPUT_RATE as f64).round() as usize;
    vec![0u8; frames * 2]
}
