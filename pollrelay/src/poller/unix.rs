use libc::{
    AF_INET, AF_INET6, F_GETFL, F_SETFL, O_NONBLOCK, POLLERR, POLLHUP, POLLIN, SO_REUSEADDR,
    SOCK_STREAM, SOL_SOCKET, accept, bind, c_int, c_short, close, fcntl, getsockname, listen,
    nfds_t, poll, pollfd, recv, send, setsockopt, sockaddr, sockaddr_in, sockaddr_in6,
    sockaddr_storage, socket, socklen_t,
};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::RawFd;
use std::{io, mem};

/// Raw socket handle on Unix.
pub type Socket = RawFd;

/// Poll record handed to `poll(2)`.
pub(crate) type PollFd = pollfd;

/// Readiness requested for every watched socket: readable or peer hung up.
pub(crate) const READ_INTEREST: c_short = POLLIN | POLLHUP;

/// Observed readiness bits that make an entry worth dispatching.
pub(crate) const READY_MASK: c_short = POLLIN | POLLHUP | POLLERR;

#[cfg(test)]
pub(crate) const HANGUP: c_short = POLLHUP;

#[cfg(test)]
pub(crate) const ERROR: c_short = POLLERR;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: c_int = libc::MSG_NOSIGNAL;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: c_int = 0;

/// Builds a poll record for `socket` with the given requested mask.
pub(crate) fn poll_fd(socket: Socket, events: c_short) -> PollFd {
    pollfd {
        fd: socket,
        events,
        revents: 0,
    }
}

/// Blocks until at least one record in `fds` is ready.
///
/// The timeout is infinite. Returns the number of ready records.
pub(crate) fn sys_poll(fds: &mut [PollFd]) -> io::Result<usize> {
    let rc = unsafe { poll(fds.as_mut_ptr(), fds.len() as nfds_t, -1) };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

/// Receives up to `buffer.len()` bytes. `Ok(0)` means orderly shutdown.
pub(crate) fn sys_recv(fd: Socket, buffer: &mut [u8]) -> io::Result<usize> {
    let rc = unsafe { recv(fd, buffer.as_mut_ptr() as *mut _, buffer.len(), 0) };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

/// Sends `buffer` once, without retrying short writes.
pub(crate) fn sys_send(fd: Socket, buffer: &[u8]) -> io::Result<usize> {
    let rc = unsafe { send(fd, buffer.as_ptr() as *const _, buffer.len(), SEND_FLAGS) };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

/// Closes a socket.
pub(crate) fn sys_close(fd: Socket) {
    unsafe { close(fd) };
}

/// Sets a socket to non-blocking mode.
pub(crate) fn sys_set_nonblocking(fd: Socket) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let rc = unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Creates a non-blocking stream socket for the family of `addr`.
pub(crate) fn sys_socket(addr: &SocketAddr) -> io::Result<Socket> {
    let domain = match addr {
        SocketAddr::V4(_) => AF_INET,
        SocketAddr::V6(_) => AF_INET6,
    };

    let fd = unsafe { socket(domain, SOCK_STREAM, 0) };
    if fd < 0 {
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
    set_flag(fd, SOL_SOCKET, SO_REUSEADDR)
}

/// Binds a socket to an address.
pub(crate) fn sys_bind(fd: Socket, addr: &SocketAddr) -> io::Result<()> {
    let rc = match addr {
        SocketAddr::V4(v4) => {
            let mut raw: sockaddr_in = unsafe { mem::zeroed() };
            raw.sin_family = AF_INET as _;
            raw.sin_port = v4.port().to_be();
            raw.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());

            unsafe { bind(fd, &raw as *const _ as *const sockaddr, raw_len::<sockaddr_in>()) }
        }

        SocketAddr::V6(v6) => {
            let mut raw: sockaddr_in6 = unsafe { mem::zeroed() };
            raw.sin6_family = AF_INET6 as _;
            raw.sin6_port = v6.port().to_be();
            raw.sin6_addr.s6_addr = v6.ip().octets();
            raw.sin6_flowinfo = v6.flowinfo();
            raw.sin6_scope_id = v6.scope_id();

            unsafe { bind(fd, &raw as *const _ as *const sockaddr, raw_len::<sockaddr_in6>()) }
        }
    };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Marks a socket as a listening socket.
pub(crate) fn sys_listen(fd: Socket, backlog: u32) -> io::Result<()> {
    let rc = unsafe { listen(fd, backlog.min(c_int::MAX as u32) as c_int) };
    if rc < 0 {
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
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let client = unsafe { accept(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) };
    if client < 0 {
        return Err(io::Error::last_os_error());
    }

    if let Err(e) = prepare_client(client) {
        sys_close(client);
        return Err(e);
    }

    Ok((client, sockaddr_to_socket_addr(&storage)))
}

#[cfg(target_vendor = "apple")]
fn prepare_client(fd: Socket) -> io::Result<()> {
    sys_set_nonblocking(fd)?;
    set_flag(fd, SOL_SOCKET, libc::SO_NOSIGPIPE)
}

#[cfg(not(target_vendor = "apple"))]
fn prepare_client(fd: Socket) -> io::Result<()> {
    sys_set_nonblocking(fd)
}

/// Returns the local address of a socket.
pub(crate) fn sys_sockname(fd: Socket) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

    let rc = unsafe { getsockname(fd, &mut storage as *mut _ as *mut sockaddr, &mut len) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    sockaddr_to_socket_addr(&storage).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "unsupported address family")
    })
}

/// Converts a raw peer address to a `SocketAddr`.
///
/// Returns `None` for anything other than `AF_INET` and `AF_INET6`.
pub(crate) fn sockaddr_to_socket_addr(storage: &sockaddr_storage) -> Option<SocketAddr> {
    match storage.ss_family as c_int {
        AF_INET => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
            let port = u16::from_be(addr.sin_port);

            Some(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }

        AF_INET6 => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in6) };
            let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
            let port = u16::from_be(addr.sin6_port);

            Some(SocketAddr::V6(SocketAddrV6::new(
                ip,
                port,
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }

        _ => None,
    }
}

fn raw_len<T>() -> socklen_t {
    mem::size_of::<T>() as socklen_t
}

fn set_flag(fd: Socket, level: c_int, name: c_int) -> io::Result<()> {
    let yes: c_int = 1;
    let rc = unsafe {
        setsockopt(
            fd,
            level,
            name,
            &yes as *const _ as *const _,
            mem::size_of::<c_int>() as socklen_t,
        )
    };

    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
