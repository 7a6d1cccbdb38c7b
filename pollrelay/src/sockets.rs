//! Socket operations used by the dispatcher.
//!
//! [`SocketOps`] is the seam between the event dispatcher and the OS.
//! [`SystemSockets`] forwards to the platform layer; tests substitute an
//! in-memory implementation.

use crate::poller::Socket;
use crate::poller::platform::{sys_accept, sys_close, sys_recv, sys_send};

use std::io;
use std::net::SocketAddr;

/// The socket calls the dispatcher makes during a pass.
pub trait SocketOps {
    /// Accepts one pending connection on `listener`.
    ///
    /// The peer address is `None` if its family is not IPv4 or IPv6.
    fn accept(&mut self, listener: Socket) -> io::Result<(Socket, Option<SocketAddr>)>;

    /// Reads at most `buffer.len()` bytes. `Ok(0)` is an orderly close.
    fn recv(&mut self, socket: Socket, buffer: &mut [u8]) -> io::Result<usize>;

    /// Sends `buffer` once and returns how many bytes were written.
    fn send(&mut self, socket: Socket, buffer: &[u8]) -> io::Result<usize>;

    /// Closes `socket`. Errors are ignored.
    fn close(&mut self, socket: Socket);
}

/// [`SocketOps`] backed by real OS sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSockets;

impl SocketOps for SystemSockets {
    fn accept(&mut self, listener: Socket) -> io::Result<(Socket, Option<SocketAddr>)> {
        sys_accept(listener)
    }

    fn recv(&mut self, socket: Socket, buffer: &mut [u8]) -> io::Result<usize> {
        sys_recv(socket, buffer)
    }

    fn send(&mut self, socket: Socket, buffer: &[u8]) -> io::Result<usize> {
        sys_send(socket, buffer)
    }

    fn close(&mut self, socket: Socket) {
        sys_close(socket);
    }
}
