//! # pollrelay
//!
//! **pollrelay** is a single-threaded TCP relay: every byte a client sends
//! is forwarded, unchanged, to every other connected client.
//!
//! The whole server is one event loop. A [`Registry`] holds the listening
//! socket and every client socket; one blocking `poll` over that registry
//! wakes the loop, and [`dispatch()`] walks the registry once per wake-up,
//! accepting new connections and relaying or dropping clients.
//!
//! There is no framing, no flow control and no delivery guarantee. A
//! receiver sees each chunk exactly as one `recv` on the sender's socket
//! produced it, capped at the configured chunk size.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pollrelay::RelayBuilder;
//!
//! fn main() -> Result<(), pollrelay::RelayError> {
//!     let mut relay = RelayBuilder::new().port(3490).bind()?;
//!     relay.run()
//! }
//! ```
//!
//! ## Modules
//!
//! - [`registry`] — The growable set of watched sockets
//! - [`dispatch`] — One pass over ready sockets: accept and relay paths
//! - [`sockets`] — The socket-operation seam used by the dispatcher
//! - [`listener`] — Listening socket setup
//! - [`relay`] — Wait-then-dispatch driver

mod config;
mod error;
mod poller;

pub mod dispatch;
pub mod listener;
pub mod registry;
pub mod relay;
pub mod sockets;

pub use config::{
    DEFAULT_BACKLOG, DEFAULT_CHUNK_SIZE, DEFAULT_HOST, DEFAULT_INITIAL_CAPACITY, DEFAULT_PORT,
    RelayBuilder, RelayConfig,
};
pub use dispatch::{Pass, dispatch};
pub use error::RelayError;
pub use poller::Socket;
pub use registry::{LISTENER_INDEX, Registry, WatchedSocket};
pub use relay::Relay;
pub use sockets::{SocketOps, SystemSockets};
