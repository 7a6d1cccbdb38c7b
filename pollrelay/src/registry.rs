use crate::poller::Socket;
use crate::poller::platform::{self, PollFd, READ_INTEREST, READY_MASK};

use std::fmt;
use std::slice;

/// Index of the listening socket inside every [`Registry`].
pub const LISTENER_INDEX: usize = 0;

/// A socket watched by the relay, together with its readiness masks.
///
/// The entry is layout-identical to the platform poll record so the
/// registry storage can be handed straight to the readiness wait.
#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct WatchedSocket(PollFd);

impl WatchedSocket {
    fn new(socket: Socket) -> Self {
        Self(platform::poll_fd(socket, READ_INTEREST))
    }

    /// Returns the raw socket handle.
    pub fn socket(&self) -> Socket {
        self.0.fd
    }

    /// Returns `true` if this entry asks to be woken on readable or hangup.
    pub fn wants_read(&self) -> bool {
        self.0.events & READ_INTEREST == READ_INTEREST
    }

    /// Returns `true` if the last wait reported this entry as readable,
    /// hung up or in error.
    pub fn is_ready(&self) -> bool {
        self.0.revents & READY_MASK != 0
    }

    fn take_ready(&mut self) -> bool {
        let ready = self.is_ready();
        self.0.revents = 0;
        ready
    }

    #[cfg(test)]
    pub(crate) fn set_observed(&mut self, mask: i16) {
        self.0.revents = mask;
    }
}

impl fmt::Debug for WatchedSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchedSocket")
            .field("socket", &self.0.fd)
            .field("events", &self.0.events)
            .field("revents", &self.0.revents)
            .finish()
    }
}

/// The set of sockets the relay waits on.
///
/// Entry [`LISTENER_INDEX`] always holds the listening socket; every other
/// entry is a connected client. Client order carries no meaning: removal
/// moves the tail entry into the freed slot.
///
/// The logical `capacity` starts at a positive constant and doubles each
/// time an insert would exceed it. It never shrinks.
#[derive(Debug)]
pub struct Registry {
    /// Watched entries; `entries.len()` is the logical length.
    entries: Vec<WatchedSocket>,
    /// Logical capacity, grown only by doubling.
    capacity: usize,
}

impl Registry {
    /// Creates a registry whose only member is `listener`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(listener: Socket, capacity: usize) -> Self {
        assert!(capacity > 0, "registry capacity must be > 0");

        let mut entries = Vec::with_capacity(capacity);
        entries.push(WatchedSocket::new(listener));

        Self { entries, capacity }
    }

    /// Registers `socket` at the first free slot and returns its index.
    ///
    /// The entry requests readable-or-hangup readiness and starts with an
    /// empty observed mask. If the registry is full, capacity doubles first.
    pub fn add(&mut self, socket: Socket) -> usize {
        debug_assert!(
            self.position(socket).is_none(),
            "socket {socket:?} is already registered"
        );

        if self.entries.len() == self.capacity {
            self.capacity *= 2;
            self.entries
                .reserve_exact(self.capacity - self.entries.len());
        }

        self.entries.push(WatchedSocket::new(socket));
        self.entries.len() - 1
    }

    /// Removes the entry at `index` and returns its socket.
    ///
    /// The entry previously at the tail takes its slot and the length drops
    /// by one. A scan walking upward must look at `index` again afterwards.
    ///
    /// # Panics
    ///
    /// Panics if `index` is the listener slot or out of range.
    pub fn remove_at(&mut self, index: usize) -> Socket {
        assert!(index != LISTENER_INDEX, "the listener entry is never removed");
        assert!(index < self.entries.len(), "index out of range");

        self.entries.swap_remove(index).socket()
    }

    /// Number of registered entries, listener included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false`: the listener is a permanent member.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Logical capacity; doubles when an insert finds the registry full.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the entry at `index`, if occupied.
    pub fn get(&self, index: usize) -> Option<&WatchedSocket> {
        self.entries.get(index)
    }

    /// Iterates over every entry, listener first.
    pub fn iter(&self) -> slice::Iter<'_, WatchedSocket> {
        self.entries.iter()
    }

    /// Returns the index currently holding `socket`.
    pub fn position(&self, socket: Socket) -> Option<usize> {
        self.entries.iter().position(|e| e.socket() == socket)
    }

    /// The listening socket.
    pub fn listener(&self) -> Socket {
        self.entries[LISTENER_INDEX].socket()
    }

    /// Client sockets, in slot order.
    pub fn clients(&self) -> impl Iterator<Item = Socket> + '_ {
        self.entries[LISTENER_INDEX + 1..]
            .iter()
            .map(WatchedSocket::socket)
    }

    pub(crate) fn socket_at(&self, index: usize) -> Socket {
        self.entries[index].socket()
    }

    /// Reports whether the entry at `index` was observed ready, clearing
    /// its observed mask.
    pub(crate) fn take_ready(&mut self, index: usize) -> bool {
        self.entries[index].take_ready()
    }

    /// Raw poll records for the readiness wait.
    pub(crate) fn as_poll_slice_mut(&mut self) -> &mut [PollFd] {
        let len = self.entries.len();

        // `WatchedSocket` is `repr(transparent)` over `PollFd`.
        unsafe { slice::from_raw_parts_mut(self.entries.as_mut_ptr() as *mut PollFd, len) }
    }

    #[cfg(test)]
    pub(crate) fn mark_ready(&mut self, socket: Socket) {
        self.mark_observed(socket, READ_INTEREST);
    }

    #[cfg(test)]
    pub(crate) fn mark_observed(&mut self, socket: Socket, mask: i16) {
        let index = self.position(socket).expect("socket is not registered");
        self.entries[index].set_observed(mask);
    }
}
