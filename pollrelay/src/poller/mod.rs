//! Platform-specific socket and readiness-wait layer.
//!
//! This module provides a unified interface over the OS primitives the
//! relay needs:
//! - creating, binding and listening on a TCP socket,
//! - accepting, receiving, sending and closing,
//! - blocking on a single `poll`-style wait over a slice of poll records.
//!
//! The concrete implementation is selected at compile time depending on
//! the target operating system. Both backends expose the same function
//! names and semantics so the registry and dispatcher stay portable.

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(unix)]
pub(crate) use unix as platform;

#[cfg(windows)]
pub(crate) mod windows;

#[cfg(windows)]
pub(crate) use windows as platform;

/// Raw OS handle of a socket watched by the relay.
pub type Socket = platform::Socket;
