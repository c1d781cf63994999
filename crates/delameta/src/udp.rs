use std::net::SocketAddr;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::descriptor::{Descriptor, SharedDescriptor};
use crate::error::Result;
use crate::session::{SessionClient, SessionHandler, SessionHost};
use crate::syscalls;

#[derive(Debug, Clone)]
pub struct Args {
    pub host: String,
    /// Seconds per receive; negative = wait forever.
    pub timeout: i32,
}

impl Default for Args {
    fn default() -> Self {
        Self { host: String::new(), timeout: 5 }
    }
}

/// A UDP socket bound to one peer address: `write` is `sendto`, `read` is
/// `recvfrom` filtered on that peer.
#[derive(Debug)]
pub struct Udp {
    pub fd: c_int,
    pub peer: SocketAddr,
    pub timeout: i32,
    /// Server-side session descriptors share the server socket and must not
    /// close it.
    owns_fd: bool,
}

impl Udp {
    pub fn open(args: Args) -> Result<Udp> {
        let (fd, peer) = syscalls::create_udp_socket(&args.host, false)?;
        tracing::debug!(fd, %peer, "created UDP socket");
        Ok(Udp { fd, peer, timeout: args.timeout, owns_fd: true })
    }

    fn session(fd: c_int, peer: SocketAddr, timeout: i32) -> Udp {
        Udp { fd, peer, timeout, owns_fd: false }
    }

    pub fn read(&mut self) -> Result<Vec<u8>> {
        syscalls::recvfrom_peer(self.fd, &self.peer, self.timeout)
    }

    pub fn read_until(&mut self, n: usize) -> Result<Vec<u8>> {
        // datagrams arrive whole; accumulate until n bytes are gathered
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            let data = self.read()?;
            out.extend_from_slice(&data);
        }
        out.truncate(n);
        Ok(out)
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        syscalls::sendto_all(self.fd, &self.peer, data)
    }
}

impl Drop for Udp {
    fn drop(&mut self) {
        if self.owns_fd && self.fd >= 0 {
            tracing::debug!(fd = self.fd, "closed UDP socket");
            syscalls::close(self.fd);
        }
        self.fd = -1;
    }
}

/// Thin constructor for a request/reply client over UDP: one `sendto`
/// followed by one `recvfrom`.
pub struct Client;

impl Client {
    pub fn new(args: Args) -> Result<SessionClient> {
        let udp = Udp::open(args)?;
        Ok(SessionClient::from(Descriptor::Udp(udp)))
    }
}

/// Datagram session server: each inbound datagram is one frame, served on
/// its own thread with a non-owning descriptor aimed back at the sender.
pub struct Server {
    pub handler: Option<SessionHandler>,
    args: Args,
    running: Arc<AtomicBool>,
}

impl Server {
    pub fn new(args: Args) -> Self {
        Self { handler: None, args, running: Arc::new(AtomicBool::new(false)) }
    }

    pub fn start(&self) -> Result<()> {
        let (fd, addr) = syscalls::create_udp_socket(&self.args.host, true)?;
        tracing::debug!(fd, %addr, "created UDP server socket");
        let timeout = self.args.timeout;

        self.running.store(true, Ordering::Release);
        thread::scope(|scope| {
            while self.running.load(Ordering::Acquire) {
                let (data, peer) = match syscalls::recvfrom_any(fd, -1, Some(&self.running)) {
                    Ok(received) => received,
                    Err(e) => {
                        if !e.is_connection_closed() {
                            tracing::warn!(error = %e, "UDP receive failed");
                        }
                        break;
                    }
                };

                let Some(handler) = self.handler.clone() else { continue };
                scope.spawn(move || {
                    let session = Udp::session(fd, peer, timeout);
                    let desc = SharedDescriptor::new(Descriptor::Udp(session));
                    let peer_name = peer.to_string();
                    let mut reply = handler(&desc, &peer_name, &data);
                    if let Err(e) = reply.write_to(&desc) {
                        tracing::warn!(peer = %peer_name, error = %e, "UDP reply failed");
                    }
                });
            }
        });

        self.running.store(false, Ordering::Release);
        syscalls::close(fd);
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

impl SessionHost for Server {
    fn set_session_handler(&mut self, handler: SessionHandler) {
        self.handler = Some(handler);
    }
}
