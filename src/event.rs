//! Operator-facing notifications emitted by the listener and sessions.
//!
//! Emitting never blocks the transfer: sinks must return promptly.

use std::sync::mpsc::Sender;

use smoltcp::wire::IpEndpoint;

use crate::packet::{ErrorCode, Type};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A read or write request arrived at the listener.
    Request {
        peer: IpEndpoint,
        kind: Type,
        filename: String,
        mode: String,
    },
    BlockSent { peer: IpEndpoint, block: u16, len: usize },
    BlockReceived { peer: IpEndpoint, block: u16, len: usize },
    AckReceived { peer: IpEndpoint, block: u16 },
    /// A packet was resent after the receive timeout expired.
    Retransmit { peer: IpEndpoint, attempt: u8 },
    /// A well-formed packet that does not fit the transfer's state.
    Violation { peer: IpEndpoint, kind: Type, block: Option<u16> },
    /// A datagram reached a session from an address other than its peer.
    Stray { peer: IpEndpoint, from: IpEndpoint },
    ErrorSent { peer: IpEndpoint, code: ErrorCode, msg: String },
    Completed { peer: IpEndpoint, blocks: u32, bytes: u64 },
    Aborted { peer: IpEndpoint, reason: String },
}

/// A consumer of [`Event`]s, shared by every session.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Renders events as `tracing` records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: Event) {
        match event {
            Event::Request {
                peer,
                kind,
                filename,
                mode,
            } => tracing::info!(%peer, ?kind, %filename, %mode, "request"),
            Event::BlockSent { peer, block, len } => {
                tracing::debug!(%peer, block, len, "sent DATA")
            }
            Event::BlockReceived { peer, block, len } => {
                tracing::debug!(%peer, block, len, "received DATA")
            }
            Event::AckReceived { peer, block } => tracing::trace!(%peer, block, "received ACK"),
            Event::Retransmit { peer, attempt } => {
                tracing::debug!(%peer, attempt, "timed out, retransmitting")
            }
            Event::Violation { peer, kind, block } => {
                tracing::warn!(%peer, ?kind, ?block, "unexpected packet")
            }
            Event::Stray { peer, from } => {
                tracing::warn!(%peer, %from, "datagram from unknown TID")
            }
            Event::ErrorSent { peer, code, msg } => {
                tracing::warn!(%peer, ?code, %msg, "sent ERROR")
            }
            Event::Completed { peer, blocks, bytes } => {
                tracing::info!(%peer, blocks, bytes, "transfer complete")
            }
            Event::Aborted { peer, reason } => tracing::warn!(%peer, %reason, "transfer aborted"),
        }
    }
}

/// Forwards events over a channel. A disconnected receiver drops them.
impl EventSink for Sender<Event> {
    fn emit(&self, event: Event) {
        let _ = self.send(event);
    }
}
