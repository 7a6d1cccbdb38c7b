//! Fatal relay errors.
//!
//! Per-connection failures (accept, receive, send) never surface here;
//! the dispatcher logs and absorbs them.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to resolve {host}:{port}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("no addresses found for {host}:{port}")]
    NoAddress { host: String, port: u16 },

    #[error("could not bind to {host}:{port}")]
    Bind {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("listen failed")]
    Listen(#[source] io::Error),

    #[error("readiness wait failed")]
    Wait(#[source] io::Error),
}
