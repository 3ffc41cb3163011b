use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use url::Url;

use crate::event::{CallEvent, EventSink};
use crate::protocol::{self, MediaBlob, ServerEvent, SetupMessage};

const OUTBOUND_QUEUE: usize = 256;

/// What the remote voice session reports to the call.
#[derive(Debug)]
pub enum LinkEvent {
    /// Setup handshake finished; the handle is now usable.
    Opened(LinkHandle),
    /// Opening the session failed.
    Failed(String),
    /// One chunk of remote speech, PCM16 LE.
    Audio(Vec<u8>),
    Interrupted,
    Closed,
    Error(String),
}

#[derive(Debug)]
pub enum LinkCommand {
    Audio(MediaBlob),
    Close,
}

/// Sending side of an open session.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    tx: mpsc::Sender<LinkCommand>,
}

impl LinkHandle {
    pub fn new(tx: mpsc::Sender<LinkCommand>) -> Self {
        Self { tx }
    }

    /// Fire-and-forget. A full queue drops the frame.
    pub fn send_audio(&self, blob: MediaBlob) -> bool {
        match self.tx.try_send(LinkCommand::Audio(blob)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::debug!("Outbound audio queue full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn close(&self) {
        // 队列已满或已关闭时，丢弃 handle 同样会让发送循环退出
        let _ = self.tx.try_send(LinkCommand::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Opens remote voice sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Resolves once the session is ready for audio. Everything the session
    /// reports afterwards goes to `events`.
    async fn open(
        &self,
        api_key: &str,
        setup: SetupMessage,
        events: EventSink,
    ) -> anyhow::Result<LinkHandle>;
}

/// Live API over WebSocket.
pub struct LiveConnector {
    ws_url: String,
}

impl LiveConnector {
    pub fn new(ws_url: &str) -> Self {
        Self {
            ws_url: ws_url.to_string(),
        }
    }

    fn endpoint(&self, api_key: &str) -> anyhow::Result<Url> {
        let mut url = Url::parse(&self.ws_url)?;
        url.query_pairs_mut().append_pair("key", api_key);
        Ok(url)
    }
}

type LiveStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[async_trait]
impl Connector for LiveConnector {
    async fn open(
        &self,
        api_key: &str,
        setup: SetupMessage,
        events: EventSink,
    ) -> anyhow::Result<LinkHandle> {
        let url = self.endpoint(api_key)?;

        log::info!("Connecting to {}...", self.ws_url);
        let (mut ws, _) = connect_async(url.as_str()).await?;

        let setup_json = serde_json::to_string(&setup)?;
        log::debug!("Sending setup: {}", setup_json);
        ws.send(Message::Text(setup_json.into())).await?;

        wait_for_setup(&mut ws).await?;
        log::info!("Live session ready");

        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        tokio::spawn(async move {
            if let Err(e) = pump(ws, rx, &events).await {
                log::warn!("Live session ended with error: {}", e);
                events.send(CallEvent::Link(LinkEvent::Error(e.to_string())));
            }
        });

        Ok(LinkHandle::new(tx))
    }
}

/// JSON payload of a frame. The endpoint may send JSON in binary frames.
fn frame_text(msg: &Message) -> Option<String> {
    match msg {
        Message::Text(text) => Some(text.to_string()),
        Message::Binary(data) if data.first() == Some(&b'{') => {
            String::from_utf8(data.to_vec()).ok()
        }
        _ => None,
    }
}

async fn wait_for_setup(ws: &mut LiveStream) -> anyhow::Result<()> {
    while let Some(msg) = ws.next().await {
        let msg = msg?;
        if let Message::Close(frame) = &msg {
            anyhow::bail!("Server closed connection during setup: {:?}", frame);
        }
        let Some(text) = frame_text(&msg) else {
            continue;
        };
        for event in protocol::parse_server_message(&text)? {
            match event {
                ServerEvent::SetupComplete => return Ok(()),
                ServerEvent::Error(message) => anyhow::bail!("Setup rejected: {}", message),
                other => log::debug!("Ignoring {:?} before setup completed", other),
            }
        }
    }
    anyhow::bail!("Connection closed before setup completed")
}

// 主循环，处理读取和写入
async fn pump(
    ws: LiveStream,
    mut rx_cmd: mpsc::Receiver<LinkCommand>,
    events: &EventSink,
) -> anyhow::Result<()> {
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Close(frame))) => {
                        log::info!("Server closed connection: {:?}", frame);
                        events.send(CallEvent::Link(LinkEvent::Closed));
                        return Ok(());
                    }
                    Some(Ok(msg)) => {
                        let Some(text) = frame_text(&msg) else {
                            continue;
                        };
                        let parsed = match protocol::parse_server_message(&text) {
                            Ok(parsed) => parsed,
                            Err(e) => {
                                log::warn!("Unparseable server frame: {}", e);
                                continue;
                            }
                        };
                        for event in parsed {
                            let forwarded = match event {
                                ServerEvent::Audio(data) => LinkEvent::Audio(data),
                                ServerEvent::Interrupted => LinkEvent::Interrupted,
                                ServerEvent::Error(message) => LinkEvent::Error(message),
                                ServerEvent::TurnComplete => {
                                    log::debug!("Server turn complete");
                                    continue;
                                }
                                ServerEvent::SetupComplete => continue,
                            };
                            if !events.send(CallEvent::Link(forwarded)) {
                                // 控制器已退出
                                let _ = write.send(Message::Close(None)).await;
                                return Ok(());
                            }
                        }
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        events.send(CallEvent::Link(LinkEvent::Closed));
                        return Ok(());
                    }
                }
            }
            cmd = rx_cmd.recv() => {
                match cmd {
                    Some(LinkCommand::Audio(blob)) => {
                        let json = protocol::realtime_input_json(&blob)?;
                        write.send(Message::Text(json.into())).await?;
                    }
                    Some(LinkCommand::Close) | None => {
                        log::info!("Closing live session");
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }
            }
        }
    }
}
