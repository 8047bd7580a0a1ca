//! Host-side driver for the Qualcomm Sahara and Streaming DLOAD boot and
//! recovery protocols.
//!
//! The crate is layered leaf-first: [`transport`] is the only component
//! that touches the OS serial API; [`hdlc`] is a pure, fuzzable framing
//! codec used only by Streaming DLOAD; [`sahara`] and [`dload`] are the two
//! protocol engines, each generic over [`transport::Transport`] so they can
//! be driven from the in-memory [`transport::ChannelTransport`] in tests;
//! [`adapter`] is the contract a front end (the `sahara-rs` CLI, or a future
//! GUI) implements for logging, progress, and confirmation prompts. Library
//! code never initializes a logger itself — only the `sahara-rs` binary
//! does, via `env_logger`, so this crate stays embeddable.

pub mod adapter;
pub mod cli;
pub mod config;
pub mod dload;
pub mod error;
pub mod hdlc;
pub mod hexdump;
pub mod sahara;
pub mod transport;

#[cfg(test)]
pub mod test_helpers;

pub use adapter::{FrontendAdapter, LogLevel, PathKind, WorkerEvent};
pub use dload::DloadEngine;
pub use error::{Error, ErrorKind, Result};
pub use sahara::SaharaEngine;
pub use transport::{SerialTransport, Transport};
