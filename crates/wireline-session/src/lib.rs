//! Wireline sessions — authenticated, multiplexed RPC over a byte stream.
//!
//! A [`Connection`] carries an unbounded number of concurrent logical
//! exchanges over one duplex stream: fire-and-forget messages, questions
//! awaiting exactly one answer, and peer-produced observable sequences.
//! Authentication happens in a handshake before any application data flows.
//!
//! ## Architecture
//!
//! - **Connection**: per-peer handle; all multiplexing state lives in one
//!   tokio task, mutated one envelope or one command at a time
//! - **SessionHandler**: the callback surface an application implements
//! - **Authorizer**: listening-side accept/deny decision for a presented token
//! - **Server** / [`connect`]: TCP front ends; TLS stacks plug in through
//!   the [`Transport`] seam

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod fingerprint;
pub mod handler;
pub mod observable;
pub mod server;

pub use client::{connect, connect_with, Connected, TcpTransport, Transport};
pub use config::{ClientConfig, ServerConfig};
pub use connection::{Connection, ConnectionStats, DEFAULT_ASK_TIMEOUT};
pub use error::{AskError, SessionError, SubscribeError};
pub use handler::{Authorizer, SessionHandler};
pub use observable::{ObservableRequest, ObservableStream};
pub use server::Server;
