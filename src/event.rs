//! The single event channel every device and the link report into.
//!
//! Each event is stamped with the `CallId` of the session that produced it so
//! the controller can drop anything arriving after that session was torn down.

use tokio::sync::mpsc;

use crate::net_link::LinkEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u64);

/// Identifies one scheduled playback buffer within a call.
pub type BufferId = u64;

#[derive(Debug)]
pub enum CallEvent {
    /// One raw microphone block, mono f32 at the input sample rate.
    Captured(Vec<f32>),
    Link(LinkEvent),
    PlaybackEnded(BufferId),
    /// A device thread stopped on an unrecoverable error.
    DeviceLost(String),
    ConnectTimeout,
}

#[derive(Debug)]
pub struct Envelope {
    pub call: CallId,
    pub event: CallEvent,
}

/// Cloneable sender bound to one call. Safe to use from any thread.
#[derive(Debug, Clone)]
pub struct EventSink {
    call: CallId,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl EventSink {
    pub fn new(call: CallId, tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { call, tx }
    }

    pub fn call(&self) -> CallId {
        self.call
    }

    /// Returns false once the controller is gone.
    pub fn send(&self, event: CallEvent) -> bool {
        self.tx
            .send(Envelope {
                call: self.call,
                event,
            })
            .is_ok()
    }
}
