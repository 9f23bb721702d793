// The server binary: `smol_tftpd [port] [directory]`, with the rest of the
// settings taken from `TFTPD_*` variables or a `.env` file.

#[cfg(feature = "std")]
use smol_tftpd::{error::Result, Config, Server};
#[cfg(feature = "std")]
use std::env;
#[cfg(feature = "std")]
use tracing_subscriber::EnvFilter;

#[cfg(feature = "std")]
fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = Config::from_env()?;
    config.apply_args(env::args().skip(1))?;

    let server = Server::bind(config)?;
    server.run()
}

#[cfg(not(feature = "std"))]
fn main() {}
