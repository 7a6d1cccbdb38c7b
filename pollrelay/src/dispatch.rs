//! Event dispatch for one readiness pass.
//!
//! After the readiness wait returns, [`dispatch`] walks the registry once
//! in ascending slot order. A ready listener goes through the accept path;
//! a ready client goes through the relay path, which either forwards one
//! chunk to every other client or drops the client.
//!
//! Dropping a client swap-removes it, pulling the tail entry into the
//! current slot. The walk then stays on that slot so the moved entry is
//! still examined exactly once.

use crate::poller::Socket;
use crate::registry::{LISTENER_INDEX, Registry};
use crate::sockets::SocketOps;

use std::io;

use tracing::{debug, info, warn};

/// What happened during one dispatch pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Pass {
    /// Connections accepted and registered.
    pub accepted: usize,
    /// Chunks received and broadcast.
    pub relayed: usize,
    /// Clients closed and deregistered.
    pub closed: usize,
}

/// Outcome of the relay path for one client.
enum Relayed {
    Forwarded,
    Dropped,
    Spurious,
}

/// Handles every ready entry of `registry` once.
///
/// `buffer` bounds how many bytes are read from a client per pass.
/// Observed readiness is cleared on every entry examined.
pub fn dispatch<S: SocketOps>(
    registry: &mut Registry,
    sockets: &mut S,
    buffer: &mut [u8],
) -> Pass {
    let mut pass = Pass::default();
    let mut index = 0;

    while index < registry.len() {
        if !registry.take_ready(index) {
            index += 1;
            continue;
        }

        if index == LISTENER_INDEX {
            if accept_connection(registry, sockets) {
                pass.accepted += 1;
            }
            index += 1;
            continue;
        }

        match relay_chunk(registry, sockets, index, buffer) {
            Relayed::Forwarded => {
                pass.relayed += 1;
                index += 1;
            }
            Relayed::Spurious => index += 1,
            // The former tail now sits at `index`; look at it next.
            Relayed::Dropped => pass.closed += 1,
        }
    }

    pass
}

fn accept_connection<S: SocketOps>(registry: &mut Registry, sockets: &mut S) -> bool {
    match sockets.accept(registry.listener()) {
        Ok((socket, peer)) => {
            registry.add(socket);

            match peer {
                Some(addr) => info!(
                    socket = socket,
                    peer = %addr.ip(),
                    port = addr.port(),
                    "new connection"
                ),
                None => info!(socket = socket, peer = "unknown address", "new connection"),
            }
            true
        }
        Err(e) => {
            warn!(error = %e, "accept failed");
            false
        }
    }
}

fn relay_chunk<S: SocketOps>(
    registry: &mut Registry,
    sockets: &mut S,
    index: usize,
    buffer: &mut [u8],
) -> Relayed {
    let sender = registry.socket_at(index);

    match sockets.recv(sender, buffer) {
        Ok(0) => {
            info!(socket = sender, "socket hung up");
            drop_client(registry, sockets, index);
            Relayed::Dropped
        }
        Ok(n) => {
            let recipients = broadcast(registry, sockets, sender, &buffer[..n]);
            debug!(socket = sender, bytes = n, recipients = recipients, "relayed chunk");
            Relayed::Forwarded
        }
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
            debug!(socket = sender, error = %e, "spurious readiness");
            Relayed::Spurious
        }
        Err(e) => {
            warn!(socket = sender, error = %e, "receive failed");
            drop_client(registry, sockets, index);
            Relayed::Dropped
        }
    }
}

fn drop_client<S: SocketOps>(registry: &mut Registry, sockets: &mut S, index: usize) {
    let socket = registry.remove_at(index);
    sockets.close(socket);
}

/// Sends `chunk` once to every client except `sender`.
///
/// Failures and short writes are logged and otherwise ignored. Returns the
/// number of send attempts.
fn broadcast<S: SocketOps>(
    registry: &Registry,
    sockets: &mut S,
    sender: Socket,
    chunk: &[u8],
) -> usize {
    let mut attempts = 0;

    for target in registry.clients().filter(|&s| s != sender) {
        attempts += 1;

        match sockets.send(target, chunk) {
            Ok(sent) if sent < chunk.len() => {
                debug!(socket = target, sent = sent, bytes = chunk.len(), "short send")
            }
            Ok(_) => {}
            Err(e) => warn!(socket = target, error = %e, "send failed"),
        }
    }

    attempts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::platform::{ERROR, HANGUP};

    use std::collections::{HashMap, HashSet, VecDeque};
    use std::net::SocketAddr;

    const LISTENER: Socket = 3;

    /// In-memory sockets that record every call.
    #[derive(Default)]
    struct FakeSockets {
        accepts: VecDeque<io::Result<(Socket, Option<SocketAddr>)>>,
        inbox: HashMap<Socket, VecDeque<io::Result<Vec<u8>>>>,
        failing: HashSet<Socket>,
        visited: Vec<Socket>,
        sent: Vec<(Socket, Vec<u8>)>,
        closed: Vec<Socket>,
    }

    impl FakeSockets {
        fn queue(&mut self, socket: Socket, result: io::Result<&[u8]>) {
            self.inbox
                .entry(socket)
                .or_default()
                .push_back(result.map(<[u8]>::to_vec));
        }

        fn sent_to(&self, socket: Socket) -> Vec<&[u8]> {
            self.sent
                .iter()
                .filter(|(s, _)| *s == socket)
                .map(|(_, data)| data.as_slice())
                .collect()
        }
    }

    impl SocketOps for FakeSockets {
        fn accept(&mut self, listener: Socket) -> io::Result<(Socket, Option<SocketAddr>)> {
            assert_eq!(listener, LISTENER);
            self.accepts
                .pop_front()
                .unwrap_or_else(|| Err(io::ErrorKind::WouldBlock.into()))
        }

        fn recv(&mut self, socket: Socket, buffer: &mut [u8]) -> io::Result<usize> {
            self.visited.push(socket);

            let data = self
                .inbox
                .get_mut(&socket)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Err(io::ErrorKind::WouldBlock.into()))?;

            let n = data.len().min(buffer.len());
            buffer[..n].copy_from_slice(&data[..n]);
            Ok(n)
        }

        fn send(&mut self, socket: Socket, buffer: &[u8]) -> io::Result<usize> {
            self.sent.push((socket, buffer.to_vec()));
            if self.failing.contains(&socket) {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            Ok(buffer.len())
        }

        fn close(&mut self, socket: Socket) {
            self.closed.push(socket);
        }
    }

    fn registry_with(clients: &[Socket]) -> Registry {
        let mut registry = Registry::new(LISTENER, 5);
        for &socket in clients {
            registry.add(socket);
        }
        registry
    }

    fn sockets(registry: &Registry) -> Vec<Socket> {
        registry.iter().map(|e| e.socket()).collect()
    }

    fn run(registry: &mut Registry, fake: &mut FakeSockets) -> Pass {
        let mut buffer = [0u8; 256];
        dispatch(registry, fake, &mut buffer)
    }

    #[test]
    fn test_two_clients_one_message() {
        let (a, b) = (4, 5);
        let mut registry = registry_with(&[a, b]);
        let mut fake = FakeSockets::default();

        fake.queue(a, Ok(b"hi"));
        registry.mark_ready(a);

        let pass = run(&mut registry, &mut fake);

        assert_eq!(pass, Pass { accepted: 0, relayed: 1, closed: 0 });
        assert_eq!(fake.sent, vec![(b, b"hi".to_vec())]);
        assert!(fake.sent_to(a).is_empty(), "Sender must not receive its own bytes");
        assert!(fake.sent_to(LISTENER).is_empty());
        assert_eq!(sockets(&registry), vec![LISTENER, a, b]);
    }

    #[test]
    fn test_broadcast_skips_sender_and_listener() {
        let clients = [4, 5, 6, 7];
        let sender = 5;
        let mut registry = registry_with(&clients);
        let mut fake = FakeSockets::default();

        fake.queue(sender, Ok(b"abc"));
        registry.mark_ready(sender);

        run(&mut registry, &mut fake);

        let mut targets: Vec<Socket> = fake.sent.iter().map(|(s, _)| *s).collect();
        targets.sort();
        assert_eq!(targets, vec![4, 6, 7]);
        assert!(fake.sent.iter().all(|(_, data)| data == b"abc"));
    }

    #[test]
    fn test_zero_byte_read_deregisters() {
        let mut registry = registry_with(&[4, 5, 6]);
        let mut fake = FakeSockets::default();

        fake.queue(5, Ok(b""));
        registry.mark_ready(5);

        let pass = run(&mut registry, &mut fake);

        assert_eq!(pass.closed, 1);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.position(5), None);
        assert_eq!(sockets(&registry), vec![LISTENER, 4, 6]);
        assert_eq!(fake.closed, vec![5]);
        assert!(fake.sent.is_empty(), "A hangup must not broadcast");
    }

    #[test]
    fn test_receive_error_deregisters() {
        let mut registry = registry_with(&[4, 5]);
        let mut fake = FakeSockets::default();

        fake.queue(4, Err(io::ErrorKind::ConnectionReset.into()));
        registry.mark_ready(4);

        let pass = run(&mut registry, &mut fake);

        assert_eq!(pass.closed, 1);
        assert_eq!(sockets(&registry), vec![LISTENER, 5]);
        assert_eq!(fake.closed, vec![4]);
        assert!(fake.sent.is_empty());
    }

    #[test]
    fn test_hangup_or_error_without_readable_deregisters() {
        let (hung, failed, idle) = (4, 5, 6);
        let mut registry = registry_with(&[hung, failed, idle]);
        let mut fake = FakeSockets::default();

        fake.queue(hung, Ok(b""));
        fake.queue(failed, Err(io::ErrorKind::ConnectionReset.into()));
        registry.mark_observed(hung, HANGUP);
        registry.mark_observed(failed, ERROR);

        let pass = run(&mut registry, &mut fake);

        assert_eq!(pass, Pass { accepted: 0, relayed: 0, closed: 2 });
        assert_eq!(sockets(&registry), vec![LISTENER, idle]);
        assert_eq!(fake.closed, vec![hung, failed]);
        assert!(fake.sent.is_empty());
    }

    #[test]
    fn test_error_only_clients_are_all_dropped_in_one_pass() {
        let clients = [4, 5, 6, 7, 8, 9];
        let mut registry = registry_with(&clients);
        let mut fake = FakeSockets::default();

        for socket in clients {
            fake.queue(socket, Err(io::ErrorKind::ConnectionReset.into()));
            registry.mark_observed(socket, ERROR);
        }
        assert_eq!(registry.capacity(), 10);

        let pass = run(&mut registry, &mut fake);

        // Each drop pulls the tail into slot 1, which is examined next.
        assert_eq!(fake.visited, vec![4, 9, 8, 7, 6, 5]);
        assert_eq!(pass.closed, 6);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.listener(), LISTENER);
        assert_eq!(registry.capacity(), 10, "Capacity never shrinks");
    }

    #[test]
    fn test_would_block_keeps_client() {
        let mut registry = registry_with(&[4, 5]);
        let mut fake = FakeSockets::default();

        registry.mark_ready(4);

        let pass = run(&mut registry, &mut fake);

        assert_eq!(pass, Pass::default());
        assert_eq!(sockets(&registry), vec![LISTENER, 4, 5]);
        assert!(fake.closed.is_empty());
    }

    #[test]
    fn test_mid_scan_removal_revisits_slot() {
        let (a, b, c) = (4, 5, 6);
        let mut registry = registry_with(&[a, b, c]);
        let mut fake = FakeSockets::default();

        fake.queue(a, Ok(b""));
        fake.queue(b, Ok(b"from b"));
        fake.queue(c, Ok(b"from c"));
        for socket in [a, b, c] {
            registry.mark_ready(socket);
        }

        let pass = run(&mut registry, &mut fake);

        // C was swapped into A's slot and examined before moving on to B.
        assert_eq!(fake.visited, vec![a, c, b]);
        assert_eq!(pass, Pass { accepted: 0, relayed: 2, closed: 1 });
        assert_eq!(sockets(&registry), vec![LISTENER, c, b]);
        assert_eq!(fake.sent_to(b), vec![b"from c".as_slice()]);
        assert_eq!(fake.sent_to(c), vec![b"from b".as_slice()]);
        assert!(fake.sent_to(a).is_empty());
    }

    #[test]
    fn test_removing_tail_ends_scan() {
        let mut registry = registry_with(&[4, 5]);
        let mut fake = FakeSockets::default();

        fake.queue(5, Ok(b""));
        registry.mark_ready(5);

        run(&mut registry, &mut fake);

        assert_eq!(fake.visited, vec![5]);
        assert_eq!(sockets(&registry), vec![LISTENER, 4]);
    }

    #[test]
    fn test_unready_entries_are_not_touched() {
        let mut registry = registry_with(&[4, 5, 6]);
        let mut fake = FakeSockets::default();

        fake.queue(6, Ok(b"x"));
        registry.mark_ready(6);

        run(&mut registry, &mut fake);

        assert_eq!(fake.visited, vec![6]);
        assert!(registry.iter().all(|e| !e.is_ready()), "Observed masks are cleared");
    }

    #[test]
    fn test_send_failure_does_not_stop_broadcast() {
        let mut registry = registry_with(&[4, 5, 6]);
        let mut fake = FakeSockets::default();

        fake.failing.insert(5);
        fake.queue(4, Ok(b"msg"));
        registry.mark_ready(4);

        let pass = run(&mut registry, &mut fake);

        assert_eq!(pass.relayed, 1);
        assert_eq!(fake.sent_to(5), vec![b"msg".as_slice()]);
        assert_eq!(fake.sent_to(6), vec![b"msg".as_slice()]);
        assert_eq!(registry.position(5), Some(2), "Failed recipient stays registered");
        assert!(fake.closed.is_empty());
    }

    #[test]
    fn test_chunk_is_capped_by_buffer() {
        let mut registry = registry_with(&[4, 5]);
        let mut fake = FakeSockets::default();

        fake.queue(4, Ok(b"abcdefgh"));
        registry.mark_ready(4);

        let mut buffer = [0u8; 4];
        dispatch(&mut registry, &mut fake, &mut buffer);

        assert_eq!(fake.sent_to(5), vec![b"abcd".as_slice()]);
    }

    #[test]
    fn test_accept_registers_connection_and_grows() {
        let mut registry = Registry::new(LISTENER, 1);
        let mut fake = FakeSockets::default();

        let peer: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        fake.accepts.push_back(Ok((9, Some(peer))));
        registry.mark_ready(LISTENER);

        let pass = run(&mut registry, &mut fake);

        assert_eq!(pass.accepted, 1);
        assert_eq!(registry.capacity(), 2);
        assert_eq!(registry.len(), 2);

        let entry = registry.get(1).unwrap();
        assert_eq!(entry.socket(), 9);
        assert!(entry.wants_read());
        assert!(!entry.is_ready(), "New entries are not dispatched in the same pass");
        assert!(fake.visited.is_empty());
    }

    #[test]
    fn test_accept_with_unknown_address_still_registers() {
        let mut registry = registry_with(&[]);
        let mut fake = FakeSockets::default();

        fake.accepts.push_back(Ok((9, None)));
        registry.mark_ready(LISTENER);

        run(&mut registry, &mut fake);

        assert_eq!(registry.position(9), Some(1));
    }

    #[test]
    fn test_accept_failure_is_not_fatal() {
        let mut registry = registry_with(&[4, 5]);
        let mut fake = FakeSockets::default();

        fake.accepts
            .push_back(Err(io::ErrorKind::ConnectionAborted.into()));
        fake.queue(4, Ok(b"still here"));
        registry.mark_ready(LISTENER);
        registry.mark_ready(4);

        let pass = run(&mut registry, &mut fake);

        assert_eq!(pass, Pass { accepted: 0, relayed: 1, closed: 0 });
        assert_eq!(sockets(&registry), vec![LISTENER, 4, 5]);
        assert_eq!(fake.sent_to(5), vec![b"still here".as_slice()]);
    }
}
