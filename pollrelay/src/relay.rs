use crate::config::RelayConfig;
use crate::dispatch::{Pass, dispatch};
use crate::error::RelayError;
use crate::listener::Listener;
use crate::poller::platform::sys_poll;
use crate::registry::Registry;
use crate::sockets::{SocketOps, SystemSockets};

use std::io;
use std::net::SocketAddr;

use tracing::trace;

/// A bound relay: the listener, the registry of watched sockets and the
/// receive buffer shared by every pass.
///
/// The relay is driven by [`turn`](Self::turn), which blocks on the
/// readiness wait and dispatches once, or by [`run`](Self::run), which
/// turns forever.
#[derive(Debug)]
pub struct Relay {
    listener: Listener,
    registry: Registry,
    sockets: SystemSockets,
    buffer: Vec<u8>,
}

impl Relay {
    /// Binds the listener and creates a registry holding only it.
    pub fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        let listener = Listener::bind(&config.host, config.port, config.backlog)?;
        let registry = Registry::new(listener.socket(), config.initial_capacity);

        Ok(Self {
            listener,
            registry,
            sockets: SystemSockets,
            buffer: vec![0; config.chunk_size],
        })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The registry of watched sockets, listener included.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.registry.len() - 1
    }

    /// Waits for readiness with no timeout, then dispatches once.
    ///
    /// An interrupted wait returns an empty [`Pass`] without dispatching.
    /// Any other wait failure is fatal.
    pub fn turn(&mut self) -> Result<Pass, RelayError> {
        match sys_poll(self.registry.as_poll_slice_mut()) {
            Ok(ready) => trace!(ready = ready, "readiness wait returned"),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Pass::default()),
            Err(e) => return Err(RelayError::Wait(e)),
        }

        Ok(dispatch(
            &mut self.registry,
            &mut self.sockets,
            &mut self.buffer,
        ))
    }

    /// Turns forever. Returns only when the readiness wait fails.
    pub fn run(&mut self) -> Result<(), RelayError> {
        loop {
            self.turn()?;
        }
    }
}

impl Drop for Relay {
    /// Closes every client socket. The listener closes itself.
    fn drop(&mut self) {
        for socket in self.registry.clients() {
            self.sockets.close(socket);
        }
    }
}
