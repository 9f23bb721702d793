//! Lockstep file transfers, one per request.
//!
//! A [`Session`] owns its socket and its file handle; both are released on
//! every exit path when the session is dropped.

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use smoltcp::wire::IpEndpoint;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::{Event, EventSink};
use crate::packet::{ErrorCode, Packet, Repr, Type, DATA_SIZE};
use crate::report;
use crate::socket::{Socket, RECV_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The server sends the file (RRQ).
    Read,
    /// The server receives the file (WRQ).
    Write,
}

/// What a completed transfer moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub blocks: u32,
    pub bytes: u64,
}

pub struct Session {
    socket: Socket,
    direction: Direction,
    path: PathBuf,
    /// Retransmission is on exactly when the socket has a read timeout.
    retransmit: bool,
    retries: u8,
    events: Arc<dyn EventSink>,
}

impl Session {
    /// `path` must already be resolved inside the served root.
    pub fn new(
        socket: Socket,
        direction: Direction,
        path: PathBuf,
        config: &Config,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            socket,
            direction,
            path,
            retransmit: config.timeout.is_some(),
            retries: config.retries,
            events,
        }
    }

    pub fn peer(&self) -> IpEndpoint {
        self.socket.peer()
    }

    /// Drive the transfer to completion. A failure that has a protocol error
    /// code is reported to the peer before returning.
    pub fn run(mut self) -> Result<Summary> {
        let result = match self.direction {
            Direction::Read => self.send_file(),
            Direction::Write => self.receive_file(),
        };
        let peer = self.peer();
        match &result {
            Ok(summary) => self.events.emit(Event::Completed {
                peer,
                blocks: summary.blocks,
                bytes: summary.bytes,
            }),
            Err(err) => {
                if let Some((code, msg)) = report::reply_for(err) {
                    self.socket.send_error(code, msg, &*self.events);
                }
                self.events.emit(Event::Aborted {
                    peer,
                    reason: err.to_string(),
                });
            }
        }
        result
    }

    fn send_file(&mut self) -> Result<Summary> {
        let mut file = File::open(&self.path).map_err(Error::FileNotFound)?;
        if file.metadata()?.is_dir() {
            return Err(Error::FileNotFound(io::Error::new(
                ErrorKind::Other,
                "is a directory",
            )));
        }
        tracing::info!(path = %self.path.display(), peer = %self.peer(), "sending file");

        let peer = self.peer();
        let mut summary = Summary { blocks: 0, bytes: 0 };
        let mut block: u16 = 1;
        let mut data = [0u8; DATA_SIZE];
        loop {
            // A file whose size is a multiple of the block size ends with an
            // empty block, which this produces naturally.
            let len = match read_block(&mut file, &mut data) {
                Ok(len) => len,
                Err(err) => {
                    self.socket
                        .send_error(ErrorCode::NotDefined, "Read error", &*self.events);
                    return Err(err.into());
                }
            };
            let datagram = Repr::Data {
                block,
                data: &data[..len],
            }
            .to_datagram()?;
            self.socket.send(&datagram)?;
            self.events.emit(Event::BlockSent { peer, block, len });

            self.await_ack(block, &datagram)?;
            summary.blocks += 1;
            summary.bytes += len as u64;
            if len < DATA_SIZE {
                return Ok(summary);
            }
            block = next_block(block);
        }
    }

    /// Wait for the ACK of `block`, resending `last` on timeouts.
    fn await_ack(&mut self, block: u16, last: &[u8]) -> Result<()> {
        let peer = self.peer();
        let mut buf = [0u8; RECV_SIZE];
        let mut attempts = 0;
        loop {
            let Some(len) = self.socket.recv(&mut buf, &*self.events)? else {
                self.retransmit(last, &mut attempts)?;
                continue;
            };
            let packet = Packet::new_checked(&buf[..len])?;
            match Repr::parse(&packet)? {
                Repr::Ack { block: acked } if acked == block => {
                    self.events.emit(Event::AckReceived { peer, block });
                    return Ok(());
                }
                // Our retransmission crossed the peer's ACK of the previous
                // block.
                Repr::Ack { block: acked } if self.retransmit && acked == block.wrapping_sub(1) => {
                    continue;
                }
                Repr::Ack { block: acked } => {
                    self.events.emit(Event::Violation {
                        peer,
                        kind: Type::Ack,
                        block: Some(acked),
                    });
                    return Err(Error::UnexpectedBlock {
                        expected: block,
                        received: acked,
                    });
                }
                // Deliberately unanswered: an error packet is never met with
                // another error packet.
                Repr::Error { code, msg } => {
                    tracing::debug!(%peer, ?code, msg, "peer aborted the transfer");
                    return Err(Error::Remote(code));
                }
                other => {
                    self.events.emit(Event::Violation {
                        peer,
                        kind: other.type_(),
                        block: None,
                    });
                    return Err(Error::UnexpectedPacket(other.type_()));
                }
            }
        }
    }

    fn receive_file(&mut self) -> Result<Summary> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|err| {
                tracing::debug!(path = %self.path.display(), %err, "cannot create file");
                Error::AccessViolation
            })?;
        tracing::info!(path = %self.path.display(), peer = %self.peer(), "receiving file");

        let peer = self.peer();
        let mut summary = Summary { blocks: 0, bytes: 0 };
        let mut last = Repr::Ack { block: 0 }.to_datagram()?;
        self.socket.send(&last)?;

        let mut expected: u16 = 1;
        let mut buf = [0u8; RECV_SIZE];
        let mut attempts = 0;
        loop {
            let Some(len) = self.socket.recv(&mut buf, &*self.events)? else {
                self.retransmit(&last, &mut attempts)?;
                continue;
            };
            let packet = Packet::new_checked(&buf[..len])?;
            match Repr::parse(&packet)? {
                Repr::Data { block, data } if block == expected => {
                    self.events.emit(Event::BlockReceived {
                        peer,
                        block,
                        len: data.len(),
                    });
                    if let Err(err) = file.write_all(data) {
                        self.socket.send_error(
                            ErrorCode::DiskFull,
                            "Disk full or allocation exceeded",
                            &*self.events,
                        );
                        return Err(err.into());
                    }
                    last = Repr::Ack { block }.to_datagram()?;
                    self.socket.send(&last)?;
                    attempts = 0;
                    summary.blocks += 1;
                    summary.bytes += data.len() as u64;
                    if data.len() < DATA_SIZE {
                        return Ok(summary);
                    }
                    expected = next_block(expected);
                }
                // The peer missed our last ACK and resent its block.
                Repr::Data { block, .. } if self.retransmit && block == expected.wrapping_sub(1) => {
                    self.socket.send(&last)?;
                }
                // Out of sequence: not written, not acknowledged, keep waiting.
                Repr::Data { block, .. } => {
                    self.events.emit(Event::Violation {
                        peer,
                        kind: Type::Data,
                        block: Some(block),
                    });
                }
                // Deliberately unanswered: an error packet is never met with
                // another error packet.
                Repr::Error { code, msg } => {
                    tracing::debug!(%peer, ?code, msg, "peer aborted the transfer");
                    return Err(Error::Remote(code));
                }
                other => {
                    self.events.emit(Event::Violation {
                        peer,
                        kind: other.type_(),
                        block: None,
                    });
                    return Err(Error::UnexpectedPacket(other.type_()));
                }
            }
        }
    }

    fn retransmit(&self, last: &[u8], attempts: &mut u8) -> Result<()> {
        if *attempts >= self.retries {
            return Err(Error::TimedOut);
        }
        *attempts += 1;
        self.events.emit(Event::Retransmit {
            peer: self.peer(),
            attempt: *attempts,
        });
        self.socket.send(last)
    }
}

/// The block after `block`. Block numbers wrap to 0 after 65535, so a
/// transfer longer than 65535 blocks keeps going.
fn next_block(block: u16) -> u16 {
    block.wrapping_add(1)
}

/// Fill `buf` from `reader`, stopping early only at end of file.
fn read_block<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}
