//! Best-effort ERROR packets.

use std::net::{SocketAddr, UdpSocket};

use smoltcp::wire::IpEndpoint;

use crate::error::Error;
use crate::event::{Event, EventSink};
use crate::packet::{ErrorCode, Repr};

/// The ERROR packet a failure is answered with, if any. Transport failures,
/// peer-initiated aborts and abandoned sessions get no reply.
pub fn reply_for(err: &Error) -> Option<(ErrorCode, &'static str)> {
    match err {
        Error::Malformed | Error::UnexpectedPacket(_) | Error::UnexpectedBlock { .. } => {
            Some((ErrorCode::IllegalOperation, "Illegal TFTP operation"))
        }
        Error::AccessViolation => Some((ErrorCode::AccessViolation, "Access violation")),
        Error::FileNotFound(_) => Some((ErrorCode::FileNotFound, "File not found")),
        Error::TimedOut => Some((ErrorCode::UnknownTransferId, "Transfer timed out")),
        _ => None,
    }
}

/// Send `code` and `msg` to `to`. Nothing is retried and nothing is expected
/// back; a failed send is only logged.
pub fn send_error(
    socket: &UdpSocket,
    to: SocketAddr,
    code: ErrorCode,
    msg: &str,
    events: &dyn EventSink,
) {
    let repr = Repr::Error { code, msg };
    let sent = repr
        .to_datagram()
        .and_then(|datagram| Ok(socket.send_to(&datagram, to)?));
    if let Err(err) = sent {
        tracing::debug!(%to, %err, "could not send ERROR");
        return;
    }
    events.emit(Event::ErrorSent {
        peer: IpEndpoint::from(to),
        code,
        msg: msg.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::packet::Packet;

    #[test]
    fn maps_failures_to_codes() {
        assert_eq!(
            reply_for(&Error::Malformed).map(|(code, _)| code),
            Some(ErrorCode::IllegalOperation)
        );
        assert_eq!(
            reply_for(&Error::UnexpectedBlock {
                expected: 2,
                received: 1
            })
            .map(|(code, _)| code),
            Some(ErrorCode::IllegalOperation)
        );
        assert_eq!(
            reply_for(&Error::AccessViolation).map(|(code, _)| code),
            Some(ErrorCode::AccessViolation)
        );
        assert_eq!(
            reply_for(&Error::FileNotFound(ErrorKind::NotFound.into())).map(|(code, _)| code),
            Some(ErrorCode::FileNotFound)
        );
        assert!(reply_for(&Error::Remote(ErrorCode::DiskFull)).is_none());
        assert!(reply_for(&Error::Io(ErrorKind::BrokenPipe.into())).is_none());
    }

    #[test]
    fn sends_one_error_packet() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let (tx, rx) = mpsc::channel();

        send_error(
            &server,
            client.local_addr().unwrap(),
            ErrorCode::AccessViolation,
            "Access violation",
            &tx,
        );

        let mut buf = [0u8; 64];
        let (len, from) = client.recv_from(&mut buf).unwrap();
        assert_eq!(from, server.local_addr().unwrap());
        let packet = Packet::new_checked(&buf[..len]).unwrap();
        assert_eq!(
            Repr::parse(&packet).unwrap(),
            Repr::Error {
                code: ErrorCode::AccessViolation,
                msg: "Access violation"
            }
        );
        assert!(matches!(
            rx.try_recv().unwrap(),
            Event::ErrorSent {
                code: ErrorCode::AccessViolation,
                ..
            }
        ));
    }
}
