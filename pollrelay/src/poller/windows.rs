//! Windows platform layer.
//!
//! Mirrors the Unix layer on top of WinSock. Readiness is waited for
//! with `WSAPoll`, whose `WSAPOLLFD` record has the same shape as a
//! Unix `pollfd`.

use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::sync::Once;

use windows_sys::Win32::Networking::WinSock::{
    AF_INET, AF_INET6, FIONBIO, INVALID_SOCKET, POLLERR, POLLHUP, POLLIN, SO_REUSEADDR,
    SOCK_STREAM, SOCKADDR, SOCKADDR_IN, SOCKADDR_IN6, SOCKADDR_STORAGE, SOCKET, SOCKET_ERROR,
    SOL_SOCKET, WSADATA, WSAPOLLFD, WSAPoll, WSAStartup, accept, bind, closesocket, getsockname,
    ioctlsocket, listen, recv, send, setsockopt, socket,
};

/// Raw socket handle on Windows.
pub type Socket = SOCKET;

/// Poll record handed to `WSAPoll`.
pub(crate) type PollFd = WSAPOLLFD;

/// Readiness requested for every watched socket.
///
/// `WSAPoll` rejects `POLLHUP` in the requested mask but always reports it.
pub(crate) const READ_INTEREST: i16 = POLLIN as i16;

/// Observed readiness bits that make an entry worth dispatching.
pub(crate) const READY_MASK: i16 = (POLLIN | POLLHUP | POLLERR) as i16;

#[cfg(test)]
pub(crate) const HANGUP: i16 = POLLHUP as i16;

#[cfg(test)]
pub(crate) const ERROR: i16 = POLLERR as i16;

/// Creates a MAKEWORD value for the Winsock version.
#[inline]
const fn makeword(low: u8, high: u8) -> u16 {
    ((high as u16) << 8) | (low as u16)
}

/// Winsock initialization guard.
static WINSOCK_INIT: Once = Once::new();

/// Initialize Winsock if not already initialized.
pub(crate) fn ensure_winsock() {
    WINSOCK_INIT.call_once(|| unsafe {
        let mut data: WSADATA = mem::zeroed();
        let rc = WSAStartup(makeword(2, 2), &mut data as *mut _);
        assert_eq!(rc, 0, "WSAStartup failed: {}", rc);
    });
}

/// Builds a poll record for `socket` with the given requested mask.
pub(crate) fn poll_fd(socket: Socket, events: i16) -> PollFd {
    WSAPOLLFD {
        fd: socket,
        events,
        revents: 0,
    }
}

/// Blocks until at least one record in `fds` is ready.
///
/// The timeout is infinite. Returns the number of ready records.
pub(crate) fn sys_poll(fds: &mut [PollFd]) -> io::Result<usize> {
    let rc = unsafe { WSAPoll(fds.as_mut_ptr(), fds.len() as u32, -1) };

    if rc == SOCKET_ERROR {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

/// Receives up to `buffer.len()` bytes. `Ok(0)` means orderly shutdown.
pub(crate) fn sys_recv(fd: Socket, buffer: &mut [u8]) -> io::Result<usize> {
    let len = buffer.len().min(i32::MAX as usize) as i32;
    let rc = unsafe { recv(fd, buffer.as_mut_ptr(), len, 0) };

    if rc == SOCKET_ERROR {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

/// Sends `buffer` once, without retrying short writes.
pub(crate) fn sys_send(fd: Socket, buffer: &[u8]) -> io::Result<usize> {
    let len = buffer.len().min(i32::MAX as usize) as i32;
    let rc = unsafe { send(fd, buffer.as_ptr(), len, 0) };

    if rc == SOCKET_ERROR {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

/// Closes a socket.
pub(crate) fn sys_close(fd: Socket) {
    unsafe {
        let _ = closesocket(fd);
    }
}

/// Sets a socket to non-blocking mode.
pub(crate) fn sys_set_nonblocking(fd: Socket) -> io::Result<()> {
    let mut nonblocking: u32 = 1;
    if unsafe { ioctlsocket(fd, FIONBIO, &mut nonblocking) } != 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Creates a non-blocking stream socket for the family of `addr`.
pub(crate) fn sys_socket(addr: &SocketAddr) -> io::Result<Socket> {
    ensure_winsock();

    let domain = match addr {
        SocketAddr::V4(_) => AF_INET,
        SocketAddr::V6(_) => AF_INET6,
    };

    let fd = unsafe { socket(domain as i32, SOCK_STREAM, 0) };
    if fd == INVALID_SOCKET {
        return Err(io::Error::last_os_error());
    }

    if let Err(e) = sys_set_nonblocking(fd) {
        sys_close(fd);
        return Err(e);
    }

    Ok(fd)
}

/// Enables `SO_REUSEADDR` on a socket.
pub(crate) fn sys_set_reuseaddr(fd: Socket) -> io::Result<()> {
    let yes: u32 = 1;
    let rc = unsafe {
        setsockopt(
            fd,
            SOL_SOCKET,
            SO_REUSEADDR,
            &yes as *const _ as *const u8,
            mem::size_of::<u32>() as i32,
        )
    };

    if rc != 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Binds a socket to an address.
pub(crate) fn sys_bind(fd: Socket, addr: &SocketAddr) -> io::Result<()> {
    let rc = match addr {
        SocketAddr::V4(v4) => {
            let mut raw: SOCKADDR_IN = unsafe { mem::zeroed() };
            raw.sin_family = AF_INET;
            raw.sin_port = v4.port().to_be();
            raw.sin_addr.S_un.S_addr = u32::from_ne_bytes(v4.ip().octets());

            let len = mem::size_of::<SOCKADDR_IN>() as i32;
            unsafe { bind(fd, &raw as *const _ as *const SOCKADDR, len) }
        }

        SocketAddr::V6(v6) => {
            let mut raw: SOCKADDR_IN6 = unsafe { mem::zeroed() };
            raw.sin6_family = AF_INET6;
            raw.sin6_port = v6.port().to_be();
            raw.sin6_addr.u.Byte = v6.ip().octets();
            raw.sin6_flowinfo = v6.flowinfo();
            raw.Anonymous.sin6_scope_id = v6.scope_id();

            let len = mem::size_of::<SOCKADDR_IN6>() as i32;
            unsafe { bind(fd, &raw as *const _ as *const SOCKADDR, len) }
        }
    };

    if rc != 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Puts a socket into listening mode.
pub(crate) fn sys_listen(fd: Socket, backlog: u32) -> io::Result<()> {
    let backlog = backlog.min(i32::MAX as u32) as i32;

    if unsafe { listen(fd, backlog) } != 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Accepts a pending connection.
///
/// The client socket is switched to non-blocking mode. The peer address
/// is `None` when its family is neither IPv4 nor IPv6.
pub(crate) fn sys_accept(fd: Socket) -> io::Result<(Socket, Option<SocketAddr>)> {
    let mut storage: SOCKADDR_STORAGE = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<SOCKADDR_STORAGE>() as i32;

    let client = unsafe { accept(fd, &mut storage as *mut _ as *mut SOCKADDR, &mut len) };
    if client == INVALID_SOCKET {
        return Err(io::Error::last_os_error());
    }

    if let Err(e) = sys_set_nonblocking(client) {
        sys_close(client);
        return Err(e);
    }

    Ok((client, sockaddr_to_socket_addr(&storage)))
}

/// Returns the local address of a socket.
pub(crate) fn sys_sockname(fd: Socket) -> io::Result<SocketAddr> {
    let mut storage: SOCKADDR_STORAGE = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<SOCKADDR_STORAGE>() as i32;

    if unsafe { getsockname(fd, &mut storage as *mut _ as *mut SOCKADDR, &mut len) } != 0 {
        return Err(io::Error::last_os_error());
    }

    sockaddr_to_socket_addr(&storage).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "unsupported address family")
    })
}

/// Converts a raw peer address to a `SocketAddr`.
///
/// Returns `None` for anything other than `AF_INET` and `AF_INET6`.
pub(crate) fn sockaddr_to_socket_addr(storage: &SOCKADDR_STORAGE) -> Option<SocketAddr> {
    unsafe {
        match storage.ss_family {
            AF_INET => {
                let sin = &*(storage as *const _ as *const SOCKADDR_IN);
                let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.S_un.S_addr));

                Some(SocketAddr::V4(SocketAddrV4::new(
                    ip,
                    u16::from_be(sin.sin_port),
                )))
            }

            AF_INET6 => {
                let sin6 = &*(storage as *const _ as *const SOCKADDR_IN6);
                let ip = Ipv6Addr::from(sin6.sin6_addr.u.Byte);

                Some(SocketAddr::V6(SocketAddrV6::new(
                    ip,
                    u16::from_be(sin6.sin6_port),
                    sin6.sin6_flowinfo,
                    sin6.Anonymous.sin6_scope_id,
                )))
            }

            _ => None,
        }
    }
}
