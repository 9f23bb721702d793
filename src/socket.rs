use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use smoltcp::wire::IpEndpoint;

use crate::error::{Error, Result};
use crate::event::{Event, EventSink};
use crate::packet::ErrorCode;
use crate::report;

/// Receive buffer size. Larger than any valid packet so oversized datagrams
/// are seen whole and rejected instead of being silently truncated.
pub const RECV_SIZE: usize = 1500;

/// A session's own endpoint: an ephemeral port (the server's TID) talking to
/// exactly one peer.
#[derive(Debug)]
pub struct Socket {
    inner: UdpSocket,
    peer: SocketAddr,
    strays: usize,
    max_strays: usize,
}

impl Socket {
    /// Bind an ephemeral port on `local`, or on the unspecified address of
    /// the peer's family when `local` is unspecified.
    pub fn bind(
        local: IpAddr,
        peer: SocketAddr,
        timeout: Option<Duration>,
        max_strays: usize,
    ) -> Result<Self> {
        let local = match (local.is_unspecified(), peer) {
            (false, _) => local,
            (true, SocketAddr::V4(_)) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            (true, SocketAddr::V6(_)) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let inner = UdpSocket::bind(SocketAddr::new(local, 0))?;
        // `None` blocks until a datagram arrives.
        inner.set_read_timeout(timeout)?;
        tracing::debug!(local = %inner.local_addr()?, %peer, "transfer socket bound");
        Ok(Self {
            inner,
            peer,
            strays: 0,
            max_strays,
        })
    }

    pub fn peer(&self) -> IpEndpoint {
        IpEndpoint::from(self.peer)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    /// Send an encoded packet to the peer.
    pub fn send(&self, datagram: &[u8]) -> Result<()> {
        self.inner.send_to(datagram, self.peer)?;
        Ok(())
    }

    pub fn send_error(&self, code: ErrorCode, msg: &str, events: &dyn EventSink) {
        report::send_error(&self.inner, self.peer, code, msg, events);
    }

    /// Wait for the next datagram from the peer and return its length, or
    /// `None` if the read timeout expired first.
    ///
    /// Datagrams from any other address are answered with an unknown-TID
    /// error and skipped; past `max_strays` of them the session is
    /// abandoned.
    pub fn recv(&mut self, buf: &mut [u8], events: &dyn EventSink) -> Result<Option<usize>> {
        loop {
            let (len, from) = match self.inner.recv_from(buf) {
                Ok(received) => received,
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            if from == self.peer {
                return Ok(Some(len));
            }

            let stray = IpEndpoint::from(from);
            events.emit(Event::Stray {
                peer: self.peer(),
                from: stray,
            });
            report::send_error(
                &self.inner,
                from,
                ErrorCode::UnknownTransferId,
                "Unknown transfer ID",
                events,
            );
            self.strays += 1;
            if self.strays > self.max_strays {
                return Err(Error::Abandoned(stray));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::event::TracingSink;

    fn loopback() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    #[test]
    fn receives_only_from_the_peer() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let stranger = UdpSocket::bind("127.0.0.1:0").unwrap();
        stranger
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut socket = Socket::bind(
            loopback(),
            peer.local_addr().unwrap(),
            Some(Duration::from_secs(5)),
            4,
        )
        .unwrap();
        let addr = socket.local_addr().unwrap();
        let (tx, rx) = mpsc::channel();

        stranger.send_to(b"\x00\x04\x00\x01", addr).unwrap();
        peer.send_to(b"\x00\x04\x00\x02", addr).unwrap();

        let mut buf = [0u8; RECV_SIZE];
        let len = socket.recv(&mut buf, &tx).unwrap().unwrap();
        assert_eq!(&buf[..len], b"\x00\x04\x00\x02");
        assert!(matches!(rx.try_recv().unwrap(), Event::Stray { .. }));

        // The stranger is told it has the wrong TID.
        let mut reply = [0u8; 64];
        let (len, _) = stranger.recv_from(&mut reply).unwrap();
        assert_eq!(&reply[..4], b"\x00\x05\x00\x05");
        assert!(len > 4);
    }

    #[test]
    fn abandons_after_too_many_strays() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let stranger = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut socket = Socket::bind(
            loopback(),
            peer.local_addr().unwrap(),
            Some(Duration::from_secs(5)),
            1,
        )
        .unwrap();
        let addr = socket.local_addr().unwrap();

        stranger.send_to(b"\x00\x04\x00\x01", addr).unwrap();
        stranger.send_to(b"\x00\x04\x00\x01", addr).unwrap();

        let mut buf = [0u8; RECV_SIZE];
        match socket.recv(&mut buf, &TracingSink) {
            Err(Error::Abandoned(last)) => {
                assert_eq!(last, IpEndpoint::from(stranger.local_addr().unwrap()));
            }
            other => panic!("expected abandonment, got {other:?}"),
        }
    }

    #[test]
    fn times_out_when_configured() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut socket = Socket::bind(
            loopback(),
            peer.local_addr().unwrap(),
            Some(Duration::from_millis(50)),
            1,
        )
        .unwrap();

        let mut buf = [0u8; RECV_SIZE];
        assert!(socket.recv(&mut buf, &TracingSink).unwrap().is_none());
    }
}
