use crate::error::RelayError;
use crate::poller::Socket;
use crate::poller::platform::{
    sys_bind, sys_close, sys_listen, sys_set_reuseaddr, sys_socket, sys_sockname,
};

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use tracing::debug;

/// The relay's listening socket.
///
/// Owns the descriptor and closes it on drop.
#[derive(Debug)]
pub struct Listener {
    /// File descriptor of the listening socket.
    socket: Socket,
}

impl Listener {
    /// Resolves `host:port` and listens on the first address that binds.
    ///
    /// For each resolved candidate this:
    /// - creates a non-blocking stream socket,
    /// - enables `SO_REUSEADDR`,
    /// - binds.
    ///
    /// The winning socket then starts listening with `backlog`.
    pub fn bind(host: &str, port: u16, backlog: u32) -> Result<Self, RelayError> {
        let candidates: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|source| RelayError::Resolve {
                host: host.to_string(),
                port,
                source,
            })?
            .collect();

        if candidates.is_empty() {
            return Err(RelayError::NoAddress {
                host: host.to_string(),
                port,
            });
        }

        let mut last_error = None;
        let mut bound = None;

        for addr in &candidates {
            match bind_candidate(addr) {
                Ok(socket) => {
                    bound = Some(socket);
                    break;
                }
                Err(e) => {
                    debug!(%addr, error = %e, "bind candidate failed");
                    last_error = Some(e);
                }
            }
        }

        let Some(socket) = bound else {
            return Err(RelayError::Bind {
                host: host.to_string(),
                port,
                source: last_error
                    .unwrap_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable)),
            });
        };

        if let Err(e) = sys_listen(socket, backlog) {
            sys_close(socket);
            return Err(RelayError::Listen(e));
        }

        Ok(Self { socket })
    }

    /// Returns the raw listening socket.
    pub fn socket(&self) -> Socket {
        self.socket
    }

    /// Returns the local socket address of this listener.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        sys_sockname(self.socket)
    }
}

fn bind_candidate(addr: &SocketAddr) -> io::Result<Socket> {
    let socket = sys_socket(addr)?;

    if let Err(e) = sys_set_reuseaddr(socket).and_then(|()| sys_bind(socket, addr)) {
        sys_close(socket);
        return Err(e);
    }

    Ok(socket)
}

impl Drop for Listener {
    /// Closes the listening socket.
    fn drop(&mut self) {
        sys_close(self.socket);
    }
}
