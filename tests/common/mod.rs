//! A loopback server and a minimal lockstep client for integration tests.
#![allow(dead_code)]

use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use smol_tftpd::event::Event;
use smol_tftpd::packet::{ErrorCode, Packet, Repr, DATA_SIZE};
use smol_tftpd::{Config, Server};
use tempfile::TempDir;

/// How long a client waits before deciding the server stayed silent.
pub const QUIET: Duration = Duration::from_millis(300);

pub struct Harness {
    pub addr: SocketAddr,
    /// Parent of the served root, so tests can place files outside it.
    pub outer: TempDir,
    pub events: Receiver<Event>,
}

impl Harness {
    pub fn root(&self) -> std::path::PathBuf {
        self.outer.path().join("root")
    }

    pub fn client(&self) -> Client {
        Client::new(self.addr)
    }

    pub fn write(&self, name: &str, content: &[u8]) {
        std::fs::write(self.root().join(name), content).unwrap();
    }
}

/// Start a server on an ephemeral loopback port serving `<tmp>/root`.
pub fn serve() -> Harness {
    serve_with(|config| config)
}

pub fn serve_with(tweak: impl FnOnce(Config) -> Config) -> Harness {
    let outer = tempfile::tempdir().unwrap();
    let root = outer.path().join("root");
    std::fs::create_dir(&root).unwrap();
    let config = tweak(Config {
        bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        root,
        ..Config::default()
    });

    let (tx, events) = mpsc::channel();
    let server = Server::with_events(config, Arc::new(tx)).unwrap();
    let addr = server.local_addr().unwrap();
    thread::spawn(move || server.run());
    Harness {
        addr,
        outer,
        events,
    }
}

pub struct Client {
    pub socket: UdpSocket,
    pub server: SocketAddr,
}

impl Client {
    pub fn new(server: SocketAddr) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Self { socket, server }
    }

    pub fn send_to(&self, repr: Repr<'_>, to: SocketAddr) {
        let datagram = repr.to_datagram().unwrap();
        self.socket.send_to(&datagram, to).unwrap();
    }

    /// Send a packet to the listening port.
    pub fn request(&self, repr: Repr<'_>) {
        self.send_to(repr, self.server);
    }

    pub fn recv(&self) -> (Vec<u8>, SocketAddr) {
        let mut buf = [0u8; 1500];
        let (len, from) = self.socket.recv_from(&mut buf).unwrap();
        (buf[..len].to_vec(), from)
    }

    /// Receive a datagram unless the server stays quiet for [`QUIET`].
    pub fn recv_quiet(&self) -> Option<(Vec<u8>, SocketAddr)> {
        self.socket.set_read_timeout(Some(QUIET)).unwrap();
        let mut buf = [0u8; 1500];
        let received = match self.socket.recv_from(&mut buf) {
            Ok((len, from)) => Some((buf[..len].to_vec(), from)),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => None,
            Err(err) => panic!("{err}"),
        };
        self.socket
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        received
    }

    /// Read `filename`, acknowledging every block. Returns the payloads in
    /// order, the transfer's TID, and asserts block numbers run 1..=N.
    pub fn read(&self, filename: &str) -> (Vec<Vec<u8>>, SocketAddr) {
        self.request(Repr::Rrq {
            filename,
            mode: "octet",
        });
        let mut blocks = Vec::new();
        let mut transfer = None;
        loop {
            let (datagram, from) = self.recv();
            let tid = *transfer.get_or_insert(from);
            assert_eq!(from, tid, "DATA from a different TID");
            let (block, data) = expect_data(&datagram);
            assert_eq!(block as usize, blocks.len() + 1, "block numbers must not gap");
            let last = data.len() < DATA_SIZE;
            blocks.push(data);
            self.send_to(Repr::Ack { block }, tid);
            if last {
                return (blocks, tid);
            }
        }
    }

    /// Write `content` as `filename`, returning the transfer's TID.
    pub fn write(&self, filename: &str, content: &[u8]) -> SocketAddr {
        self.request(Repr::Wrq {
            filename,
            mode: "octet",
        });
        let (datagram, tid) = self.recv();
        assert_eq!(expect_ack(&datagram), 0);

        let mut chunks: Vec<&[u8]> = content.chunks(DATA_SIZE).collect();
        if content.len() % DATA_SIZE == 0 {
            chunks.push(&[]);
        }
        for (i, chunk) in chunks.into_iter().enumerate() {
            let block = (i + 1) as u16;
            self.send_to(Repr::Data { block, data: chunk }, tid);
            let (datagram, from) = self.recv();
            assert_eq!(from, tid);
            assert_eq!(expect_ack(&datagram), block);
        }
        tid
    }
}

pub fn expect_data(datagram: &[u8]) -> (u16, Vec<u8>) {
    let packet = Packet::new_checked(datagram).unwrap();
    match Repr::parse(&packet).unwrap() {
        Repr::Data { block, data } => (block, data.to_vec()),
        other => panic!("expected DATA, got {other:?}"),
    }
}

pub fn expect_ack(datagram: &[u8]) -> u16 {
    let packet = Packet::new_checked(datagram).unwrap();
    match Repr::parse(&packet).unwrap() {
        Repr::Ack { block } => block,
        other => panic!("expected ACK, got {other:?}"),
    }
}

pub fn expect_error(datagram: &[u8]) -> ErrorCode {
    let packet = Packet::new_checked(datagram).unwrap();
    match Repr::parse(&packet).unwrap() {
        Repr::Error { code, .. } => code,
        other => panic!("expected ERROR, got {other:?}"),
    }
}
