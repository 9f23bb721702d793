use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default TFTP port.
pub const DEFAULT_PORT: u16 = 69;

/// Seconds to wait per block when retransmission is turned on and no timeout
/// is given explicitly.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

pub const DEFAULT_RETRIES: u8 = 5;

pub const DEFAULT_MAX_STRAYS: usize = 32;

/// Process-wide settings, read-only once the server starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Local address the listener and every session socket bind to.
    pub bind: IpAddr,
    pub port: u16,
    /// Directory all requests are resolved against.
    pub root: PathBuf,
    /// How long a session waits for its peer before retransmitting. `None`
    /// waits forever and never retransmits.
    pub timeout: Option<Duration>,
    /// Retransmissions per packet before the session gives up.
    pub retries: u8,
    /// Datagrams from foreign addresses a session tolerates.
    pub max_strays: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            root: PathBuf::from("."),
            timeout: None,
            retries: DEFAULT_RETRIES,
            max_strays: DEFAULT_MAX_STRAYS,
        }
    }
}

impl Config {
    /// Read `TFTPD_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Build a config from `(name, value)` pairs, ignoring names that are
    /// not ours.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in vars {
            let value = value.as_ref().trim();
            match key.as_ref() {
                "TFTPD_BIND" => config.bind = parse("TFTPD_BIND", value)?,
                "TFTPD_PORT" => config.set_port(value),
                "TFTPD_ROOT" => config.root = PathBuf::from(value),
                "TFTPD_TIMEOUT" => {
                    let secs: u64 = parse("TFTPD_TIMEOUT", value)?;
                    config.timeout = (secs > 0).then(|| Duration::from_secs(secs));
                }
                "TFTPD_RETRIES" => config.retries = parse("TFTPD_RETRIES", value)?,
                "TFTPD_MAX_STRAYS" => config.max_strays = parse("TFTPD_MAX_STRAYS", value)?,
                _ => {}
            }
        }
        Ok(config)
    }

    /// Apply the positional `<port> [directory]` arguments.
    pub fn apply_args<I>(&mut self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        if let Some(port) = args.next() {
            self.set_port(&port);
        }
        if let Some(root) = args.next() {
            self.root = PathBuf::from(root);
        }
        if let Some(extra) = args.next() {
            return Err(Error::Config(format!(
                "unexpected argument '{extra}'; usage: smol_tftpd <port> [directory]"
            )));
        }
        Ok(())
    }

    /// Turn on retransmission with the default timeout if none is set.
    pub fn with_retransmission(mut self) -> Self {
        self.timeout.get_or_insert(Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        self
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// An out-of-range or unparsable port falls back to the default.
    fn set_port(&mut self, value: &str) {
        self.port = match value.parse::<u16>() {
            Ok(port) if port > 0 => port,
            _ => {
                tracing::warn!("invalid port number: {value}. using default port {DEFAULT_PORT}");
                DEFAULT_PORT
            }
        };
    }
}

fn parse<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{name}: cannot parse '{value}'")))
}
