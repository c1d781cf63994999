//! Thin libc wrappers shared by every descriptor variant.
//!
//! All sockets are created non-blocking; blocking semantics are built on top
//! with 10 ms sleep ticks so per-call timeouts and cooperative stop flags
//! stay responsive.

use std::io;
use std::mem;
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::raw::{c_int, c_void};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use libc::socklen_t;

use crate::error::{Error, Result};
use crate::MAX_HANDLE_SZ;

pub const TICK: Duration = Duration::from_millis(10);

pub fn set_non_blocking(fd: c_int) -> Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(Error::last_os_error());
        }
    }
    Ok(())
}

pub fn set_blocking(fd: c_int) -> Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) < 0 {
            return Err(Error::last_os_error());
        }
    }
    Ok(())
}

pub fn is_fd_alive(fd: c_int) -> bool {
    fd >= 0 && unsafe { libc::fcntl(fd, libc::F_GETFD) } != -1
}

pub fn close(fd: c_int) {
    unsafe {
        libc::close(fd);
    }
}

/// `true` once `timeout` (seconds, negative = infinite) has elapsed.
fn timed_out(start: Instant, timeout: i32) -> bool {
    timeout > 0 && start.elapsed() >= Duration::from_secs(timeout as u64)
}

/// `true` when a server's stop flag asks in-flight I/O to abort.
fn stopped(stop: Option<&AtomicBool>) -> bool {
    stop.map(|f| !f.load(Ordering::Acquire)).unwrap_or(false)
}

fn resolve(host: &str) -> Result<Vec<SocketAddr>> {
    let (domain, port) = crate::url::split_host_port(host);
    let port = port.unwrap_or(0);
    let addrs: Vec<SocketAddr> = (domain, port)
        .to_socket_addrs()
        .map_err(|_| Error::usage(format!("Unable to resolve hostname: {host}")))?
        .collect();
    if addrs.is_empty() {
        return Err(Error::usage(format!("Unable to resolve hostname: {host}")));
    }
    Ok(addrs)
}

fn sockaddr_of(addr: &SocketAddr) -> (libc::sockaddr_storage, socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(a) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: a.port().to_be(),
                sin_addr: libc::in_addr { s_addr: u32::from_ne_bytes(a.ip().octets()) },
                sin_zero: [0; 8],
            };
            unsafe {
                ptr::copy_nonoverlapping(
                    &sin as *const _ as *const u8,
                    &mut storage as *mut _ as *mut u8,
                    mem::size_of::<libc::sockaddr_in>(),
                );
            }
            mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(a) => {
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: a.port().to_be(),
                sin6_flowinfo: a.flowinfo(),
                sin6_addr: libc::in6_addr { s6_addr: a.ip().octets() },
                sin6_scope_id: a.scope_id(),
            };
            unsafe {
                ptr::copy_nonoverlapping(
                    &sin6 as *const _ as *const u8,
                    &mut storage as *mut _ as *mut u8,
                    mem::size_of::<libc::sockaddr_in6>(),
                );
            }
            mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as socklen_t)
}

pub fn sockaddr_to_string(storage: &libc::sockaddr_storage) -> String {
    match storage.ss_family as c_int {
        libc::AF_INET => {
            let sin: &libc::sockaddr_in = unsafe { &*(storage as *const _ as *const _) };
            let ip = std::net::Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
            format!("{}:{}", ip, u16::from_be(sin.sin_port))
        }
        libc::AF_INET6 => {
            let sin6: &libc::sockaddr_in6 = unsafe { &*(storage as *const _ as *const _) };
            let ip = std::net::Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            format!("[{}]:{}", ip, u16::from_be(sin6.sin6_port))
        }
        family => format!("af{family}"),
    }
}

fn socket(domain: c_int, ty: c_int) -> Result<c_int> {
    unsafe {
        #[cfg(target_os = "linux")]
        let fd = libc::socket(domain, ty | libc::SOCK_NONBLOCK, 0);
        #[cfg(not(target_os = "linux"))]
        let fd = libc::socket(domain, ty, 0);

        if fd < 0 {
            return Err(Error::last_os_error());
        }
        #[cfg(not(target_os = "linux"))]
        set_non_blocking(fd)?;
        Ok(fd)
    }
}

fn domain_of(addr: &SocketAddr) -> c_int {
    if addr.is_ipv6() { libc::AF_INET6 } else { libc::AF_INET }
}

/// Create a non-blocking TCP listener, walking every resolved address until
/// one binds.
pub fn create_listen_socket(host: &str, backlog: c_int) -> Result<c_int> {
    let mut err = Error::usage(format!("Unable to resolve hostname: {host}"));
    for addr in resolve(host)? {
        let fd = match socket(domain_of(&addr), libc::SOCK_STREAM) {
            Ok(fd) => fd,
            Err(e) => {
                err = e;
                continue;
            }
        };

        let one: c_int = 1;
        unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &one as *const _ as *const c_void,
                mem::size_of_val(&one) as socklen_t,
            );
        }

        let (storage, len) = sockaddr_of(&addr);
        let bound = unsafe { libc::bind(fd, &storage as *const _ as *const libc::sockaddr, len) };
        if bound < 0 {
            err = Error::last_os_error();
            close(fd);
            continue;
        }

        if unsafe { libc::listen(fd, backlog) } < 0 {
            err = Error::last_os_error();
            close(fd);
            continue;
        }

        tracing::debug!(fd, %addr, "created listening socket");
        return Ok(fd);
    }
    Err(err)
}

/// Accept one pending connection. `Ok(None)` when none is queued.
pub fn accept_connection(listen_fd: c_int) -> Result<Option<(c_int, String)>> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as socklen_t;

    unsafe {
        #[cfg(target_os = "linux")]
        let fd = libc::accept4(
            listen_fd,
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut len,
            libc::SOCK_NONBLOCK,
        );
        #[cfg(not(target_os = "linux"))]
        let fd = libc::accept(
            listen_fd,
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut len,
        );

        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(None);
            }
            return Err(err.into());
        }

        #[cfg(not(target_os = "linux"))]
        set_non_blocking(fd)?;

        Ok(Some((fd, sockaddr_to_string(&storage))))
    }
}

/// Connect a non-blocking TCP socket, waiting up to `connection_timeout`
/// seconds for the handshake.
pub fn connect_socket(addr: &SocketAddr, connection_timeout: i32) -> Result<c_int> {
    let fd = socket(domain_of(addr), libc::SOCK_STREAM)?;
    let (storage, len) = sockaddr_of(addr);

    let rc = unsafe { libc::connect(fd, &storage as *const _ as *const libc::sockaddr, len) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINPROGRESS) {
            close(fd);
            return Err(err.into());
        }

        let mut pfd = libc::pollfd { fd, events: libc::POLLOUT, revents: 0 };
        let timeout_ms = if connection_timeout < 0 { -1 } else { connection_timeout * 1000 };
        let ready = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if ready <= 0 {
            close(fd);
            return Err(if ready == 0 {
                Error::transfer_timeout()
            } else {
                Error::last_os_error()
            });
        }

        let mut so_err: c_int = 0;
        let mut so_len = mem::size_of::<c_int>() as socklen_t;
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                &mut so_err as *mut _ as *mut c_void,
                &mut so_len,
            )
        };
        if rc != 0 || so_err != 0 {
            close(fd);
            return Err(Error::new(so_err, io::Error::from_raw_os_error(so_err).to_string()));
        }
    }

    tracing::debug!(fd, %addr, "connected socket");
    Ok(fd)
}

/// Resolve `host[:port]` and connect to the first address that accepts.
pub fn connect_first(host: &str, connection_timeout: i32) -> Result<c_int> {
    let mut err = Error::usage(format!("Unable to resolve hostname: {host}"));
    for addr in resolve(host)? {
        match connect_socket(&addr, connection_timeout) {
            Ok(fd) => return Ok(fd),
            Err(e) => err = e,
        }
    }
    Err(err)
}

pub fn local_port(fd: c_int) -> Result<u16> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as socklen_t;
    let rc = unsafe { libc::getsockname(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len) };
    if rc != 0 {
        return Err(Error::last_os_error());
    }
    match storage.ss_family as c_int {
        libc::AF_INET => {
            let sin: &libc::sockaddr_in = unsafe { &*(&storage as *const _ as *const _) };
            Ok(u16::from_be(sin.sin_port))
        }
        libc::AF_INET6 => {
            let sin6: &libc::sockaddr_in6 = unsafe { &*(&storage as *const _ as *const _) };
            Ok(u16::from_be(sin6.sin6_port))
        }
        family => Err(Error::usage(format!("Unexpected address family: {family}"))),
    }
}

/// One logical receive: block until at least one byte arrives, then return
/// everything currently queued. Bursts larger than `MAX_HANDLE_SZ` keep
/// draining until the kernel has no more.
pub fn recv_available(fd: c_int, timeout: i32, stop: Option<&AtomicBool>) -> Result<Vec<u8>> {
    let start = Instant::now();
    let mut res: Vec<u8> = Vec::new();
    let mut retried = false;

    while is_fd_alive(fd) && !stopped(stop) {
        let mut buffer = [0u8; MAX_HANDLE_SZ];
        let size = unsafe { libc::recv(fd, buffer.as_mut_ptr() as *mut c_void, MAX_HANDLE_SZ, 0) };

        if size < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(err.into());
            }
            if !retried {
                // the burst may exceed one buffer; give the kernel one tick
                retried = true;
            } else {
                if !res.is_empty() {
                    return Ok(res);
                }
                if timed_out(start, timeout) {
                    return Err(Error::transfer_timeout());
                }
            }
            std::thread::sleep(TICK);
            continue;
        }
        if size == 0 {
            return Err(Error::connection_closed());
        }

        res.extend_from_slice(&buffer[..size as usize]);
        if size as usize == MAX_HANDLE_SZ {
            retried = false;
        } else {
            return Ok(res);
        }
    }

    Err(Error::connection_closed())
}

/// Receive exactly `n` bytes, looping reads until the buffer is full.
pub fn recv_exact(fd: c_int, n: usize, timeout: i32, stop: Option<&AtomicBool>) -> Result<Vec<u8>> {
    let start = Instant::now();
    let mut res: Vec<u8> = Vec::with_capacity(n);

    while is_fd_alive(fd) && !stopped(stop) {
        let remaining = n - res.len();
        if remaining == 0 {
            return Ok(res);
        }

        let mut buffer = vec![0u8; remaining];
        let size = unsafe { libc::recv(fd, buffer.as_mut_ptr() as *mut c_void, remaining, 0) };

        if size < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(err.into());
            }
            if timed_out(start, timeout) {
                return Err(Error::transfer_timeout());
            }
            std::thread::sleep(TICK);
            continue;
        }
        if size == 0 {
            return Err(Error::connection_closed());
        }

        res.extend_from_slice(&buffer[..size as usize]);
    }

    Err(Error::connection_closed())
}

/// Send the whole buffer, retrying partial progress.
pub fn send_all(fd: c_int, data: &[u8]) -> Result<()> {
    #[cfg(target_os = "linux")]
    const FLAGS: c_int = libc::MSG_NOSIGNAL;
    #[cfg(not(target_os = "linux"))]
    const FLAGS: c_int = 0;

    let mut i = 0;
    while i < data.len() {
        let n = MAX_HANDLE_SZ.min(data.len() - i);
        let sent = unsafe { libc::send(fd, data[i..].as_ptr() as *const c_void, n, FLAGS) };
        if sent == 0 {
            return Err(Error::connection_closed());
        }
        if sent < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                std::thread::sleep(TICK);
                continue;
            }
            return Err(err.into());
        }
        i += sent as usize;
    }
    Ok(())
}

/// `read(2)` whatever is available on a plain fd (file, tty), sized by
/// `FIONREAD` when the driver supports it.
pub fn fd_read_available(fd: c_int, timeout: i32, stop: Option<&AtomicBool>) -> Result<Vec<u8>> {
    let start = Instant::now();

    while is_fd_alive(fd) && !stopped(stop) {
        let mut available: c_int = 0;
        unsafe {
            libc::ioctl(fd, libc::FIONREAD, &mut available);
        }
        let cap = if available > 0 { available as usize } else { MAX_HANDLE_SZ };

        let mut buffer = vec![0u8; cap];
        let size = unsafe { libc::read(fd, buffer.as_mut_ptr() as *mut c_void, cap) };
        if size > 0 {
            buffer.truncate(size as usize);
            return Ok(buffer);
        }
        if size == 0 {
            return Err(Error::connection_closed());
        }

        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::WouldBlock {
            return Err(err.into());
        }
        if timed_out(start, timeout) {
            return Err(Error::transfer_timeout());
        }
        std::thread::sleep(TICK);
    }

    Err(Error::connection_closed())
}

/// `read(2)` exactly `n` bytes from a plain fd.
pub fn fd_read_exact(fd: c_int, n: usize, timeout: i32, stop: Option<&AtomicBool>) -> Result<Vec<u8>> {
    let start = Instant::now();
    let mut res: Vec<u8> = Vec::with_capacity(n);

    while is_fd_alive(fd) && !stopped(stop) {
        let remaining = n - res.len();
        if remaining == 0 {
            return Ok(res);
        }

        let mut buffer = vec![0u8; remaining];
        let size = unsafe { libc::read(fd, buffer.as_mut_ptr() as *mut c_void, remaining) };
        if size > 0 {
            res.extend_from_slice(&buffer[..size as usize]);
            continue;
        }
        if size == 0 {
            return Err(Error::connection_closed());
        }

        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::WouldBlock {
            return Err(err.into());
        }
        if timed_out(start, timeout) {
            return Err(Error::transfer_timeout());
        }
        std::thread::sleep(TICK);
    }

    Err(Error::connection_closed())
}

/// `write(2)` the whole buffer to a plain fd.
pub fn fd_write_all(fd: c_int, data: &[u8]) -> Result<()> {
    let mut i = 0;
    while i < data.len() {
        if !is_fd_alive(fd) {
            return Err(Error::connection_closed());
        }
        let n = MAX_HANDLE_SZ.min(data.len() - i);
        let sent = unsafe { libc::write(fd, data[i..].as_ptr() as *const c_void, n) };
        if sent == 0 {
            return Err(Error::connection_closed());
        }
        if sent < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                std::thread::sleep(TICK);
                continue;
            }
            return Err(err.into());
        }
        i += sent as usize;
    }
    Ok(())
}

/// Create a UDP socket. When `for_binding` the address is bound (server),
/// otherwise it is kept as the peer for `sendto`/`recvfrom`.
pub fn create_udp_socket(host: &str, for_binding: bool) -> Result<(c_int, SocketAddr)> {
    let mut err = Error::usage(format!("Unable to resolve hostname: {host}"));
    for addr in resolve(host)? {
        let fd = match socket(domain_of(&addr), libc::SOCK_DGRAM) {
            Ok(fd) => fd,
            Err(e) => {
                err = e;
                continue;
            }
        };
        if for_binding {
            let (storage, len) = sockaddr_of(&addr);
            let rc = unsafe { libc::bind(fd, &storage as *const _ as *const libc::sockaddr, len) };
            if rc < 0 {
                err = Error::last_os_error();
                close(fd);
                continue;
            }
        }
        return Ok((fd, addr));
    }
    Err(err)
}

/// One datagram from anyone; returns the payload and the sender address.
pub fn recvfrom_any(
    fd: c_int,
    timeout: i32,
    stop: Option<&AtomicBool>,
) -> Result<(Vec<u8>, SocketAddr)> {
    let start = Instant::now();

    while is_fd_alive(fd) && !stopped(stop) {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as socklen_t;
        let mut buffer = [0u8; MAX_HANDLE_SZ];

        let size = unsafe {
            libc::recvfrom(
                fd,
                buffer.as_mut_ptr() as *mut c_void,
                MAX_HANDLE_SZ,
                0,
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut len,
            )
        };
        if size >= 0 {
            let peer = parse_storage(&storage)?;
            return Ok((buffer[..size as usize].to_vec(), peer));
        }

        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::WouldBlock {
            return Err(err.into());
        }
        if timed_out(start, timeout) {
            return Err(Error::transfer_timeout());
        }
        std::thread::sleep(TICK);
    }

    Err(Error::connection_closed())
}

fn parse_storage(storage: &libc::sockaddr_storage) -> Result<SocketAddr> {
    sockaddr_to_string(storage)
        .parse()
        .map_err(|_| Error::usage("Unexpected sender address"))
}

/// One datagram from the expected peer.
pub fn recvfrom_peer(fd: c_int, peer: &SocketAddr, timeout: i32) -> Result<Vec<u8>> {
    let start = Instant::now();
    loop {
        match recvfrom_any(fd, timeout, None) {
            Ok((data, from)) => {
                if from == *peer {
                    return Ok(data);
                }
                // a stray datagram from someone else; keep waiting
                if timed_out(start, timeout) {
                    return Err(Error::transfer_timeout());
                }
            }
            Err(e) => return Err(e),
        }
    }
}

pub fn sendto_all(fd: c_int, peer: &SocketAddr, data: &[u8]) -> Result<()> {
    let (storage, len) = sockaddr_of(peer);
    let mut i = 0;
    while i < data.len() {
        let n = MAX_HANDLE_SZ.min(data.len() - i);
        let sent = unsafe {
            libc::sendto(
                fd,
                data[i..].as_ptr() as *const c_void,
                n,
                0,
                &storage as *const _ as *const libc::sockaddr,
                len,
            )
        };
        if sent < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                std::thread::sleep(TICK);
                continue;
            }
            return Err(err.into());
        }
        i += sent as usize;
    }
    Ok(())
}
