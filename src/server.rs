use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread;

use smoltcp::wire::IpEndpoint;

use crate::config::Config;
use crate::error::Result;
use crate::event::{Event, EventSink, TracingSink};
use crate::packet::{ErrorCode, Packet, Repr, Type};
use crate::report;
use crate::sandbox::Sandbox;
use crate::session::{Direction, Session};
use crate::socket::{Socket, RECV_SIZE};

/// The listener: receives requests on the well-known port and hands each one
/// to a session running on its own thread.
pub struct Server {
    socket: UdpSocket,
    sandbox: Sandbox,
    config: Config,
    events: Arc<dyn EventSink>,
}

impl Server {
    /// Bind the listening socket, logging events through `tracing`.
    pub fn bind(config: Config) -> Result<Self> {
        Self::with_events(config, Arc::new(TracingSink))
    }

    pub fn with_events(config: Config, events: Arc<dyn EventSink>) -> Result<Self> {
        let sandbox = Sandbox::new(&config.root)?;
        let socket = UdpSocket::bind(config.listen_addr())?;
        tracing::info!(
            "TFTP server listening on {}, using directory: '{}'",
            socket.local_addr()?,
            sandbox.root().display()
        );
        Ok(Self {
            socket,
            sandbox,
            config,
            events,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Serve forever. A failed receive is logged and the loop continues.
    pub fn run(&self) -> Result<()> {
        let mut buf = [0u8; RECV_SIZE];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => self.handle(&buf[..len], from),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => tracing::error!(%err, "recvfrom failed"),
            }
        }
    }

    /// Classify one datagram that arrived on the listening port.
    fn handle(&self, datagram: &[u8], from: SocketAddr) {
        let peer = IpEndpoint::from(from);
        let repr = Packet::new_checked(datagram).and_then(|packet| {
            Repr::parse(&packet).map(|repr| match repr {
                Repr::Rrq { filename, mode } => {
                    Some((Direction::Read, filename.to_string(), mode.to_string()))
                }
                Repr::Wrq { filename, mode } => {
                    Some((Direction::Write, filename.to_string(), mode.to_string()))
                }
                other => {
                    self.events.emit(Event::Violation {
                        peer,
                        kind: other.type_(),
                        block: None,
                    });
                    self.illegal(from);
                    None
                }
            })
        });

        match repr {
            Ok(Some((direction, filename, mode))) => self.dispatch(direction, filename, mode, from),
            Ok(None) => {}
            Err(err) => {
                tracing::debug!(%peer, %err, "dropping datagram");
                self.illegal(from);
            }
        }
    }

    fn illegal(&self, to: SocketAddr) {
        report::send_error(
            &self.socket,
            to,
            ErrorCode::IllegalOperation,
            "Illegal TFTP operation",
            &*self.events,
        );
    }

    /// Resolve the requested path and start a session for it.
    fn dispatch(&self, direction: Direction, filename: String, mode: String, from: SocketAddr) {
        let peer = IpEndpoint::from(from);
        let kind = match direction {
            Direction::Read => Type::Rrq,
            Direction::Write => Type::Wrq,
        };
        self.events.emit(Event::Request {
            peer,
            kind,
            filename: filename.clone(),
            mode,
        });

        let path = match self.sandbox.resolve(&filename) {
            Ok(path) => path,
            Err(err) => {
                tracing::warn!(%peer, %filename, "access violation: path outside the root");
                if let Some((code, msg)) = report::reply_for(&err) {
                    report::send_error(&self.socket, from, code, msg, &*self.events);
                }
                return;
            }
        };

        let socket = match Socket::bind(
            self.config.bind,
            from,
            self.config.timeout,
            self.config.max_strays,
        ) {
            Ok(socket) => socket,
            Err(err) => {
                tracing::error!(%peer, %err, "could not open a transfer socket");
                return;
            }
        };

        let session = Session::new(socket, direction, path, &self.config, self.events.clone());
        let spawned = thread::Builder::new()
            .name(format!("tftp-{peer}"))
            .spawn(move || {
                let peer = session.peer();
                if let Err(err) = session.run() {
                    tracing::debug!(%peer, %err, "session ended");
                }
            });
        if let Err(err) = spawned {
            tracing::error!(%peer, %err, "could not spawn a session");
        }
    }
}
