//! A TFTP (RFC 1350) server confined to one root directory.
//!
//! The packet codec builds without `std`; everything that touches sockets or
//! files needs the `std` feature.
#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[macro_use]
mod macros;

pub mod error;
pub mod packet;

#[cfg(feature = "std")]
pub mod config;
#[cfg(feature = "std")]
pub mod event;
#[cfg(feature = "std")]
pub mod report;
#[cfg(feature = "std")]
pub mod sandbox;
#[cfg(feature = "std")]
pub mod session;
#[cfg(feature = "std")]
pub mod server;
#[cfg(feature = "std")]
pub mod socket;

#[cfg(feature = "std")]
pub use config::Config;
#[cfg(feature = "std")]
pub use server::Server;
