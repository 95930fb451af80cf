//! Routing registry mirror daemon
//!
//! [`Daemon`] ties settings, storage and the mirror runners together; the
//! `irr-daemon` binary exposes it through [`cli::Cli`].

pub mod cli;
pub mod daemon;

pub use daemon::Daemon;
