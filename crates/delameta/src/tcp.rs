use std::os::raw::c_int;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::descriptor::{Descriptor, SharedDescriptor};
use crate::error::{Error, Result};
use crate::session::{serve_connection, SessionClient, SessionHandler, SessionHost};
use crate::syscalls;

/// Compiled-in ceiling for `max_socket`.
pub const MAX_SOCKET_CEILING: usize = 128;

#[derive(Debug, Clone)]
pub struct ClientArgs {
    pub host: String,
    /// Seconds per read; negative = wait forever.
    pub timeout: i32,
    /// Seconds to wait for the TCP handshake.
    pub connection_timeout: i32,
}

impl Default for ClientArgs {
    fn default() -> Self {
        Self { host: String::new(), timeout: 5, connection_timeout: 5 }
    }
}

#[derive(Debug, Clone)]
pub struct ServerArgs {
    pub host: String,
    /// Worker pool size; also the listen backlog.
    pub max_socket: usize,
}

impl Default for ServerArgs {
    fn default() -> Self {
        Self { host: String::new(), max_socket: num_cpus::get() }
    }
}

/// A connected TCP socket.
#[derive(Debug)]
pub struct Tcp {
    pub fd: c_int,
    /// Serve another exchange on this connection after the current one.
    pub keep_alive: bool,
    /// Seconds per read; negative = wait forever.
    pub timeout: i32,
    /// Exchanges before the server forces a close; negative = unlimited.
    pub max: i32,
    pub(crate) stop: Option<Arc<AtomicBool>>,
}

impl Tcp {
    /// Connect to `host[:port]`, walking every resolved address until one
    /// accepts.
    pub fn open(args: ClientArgs) -> Result<Tcp> {
        let fd = syscalls::connect_first(&args.host, args.connection_timeout)?;
        Ok(Tcp { fd, keep_alive: true, timeout: args.timeout, max: -1, stop: None })
    }

    pub(crate) fn from_accepted(fd: c_int, stop: Arc<AtomicBool>) -> Tcp {
        Tcp { fd, keep_alive: true, timeout: -1, max: -1, stop: Some(stop) }
    }

    fn stop_flag(&self) -> Option<&AtomicBool> {
        self.stop.as_deref()
    }

    pub fn read(&mut self) -> Result<Vec<u8>> {
        syscalls::recv_available(self.fd, self.timeout, self.stop_flag())
    }

    pub fn read_until(&mut self, n: usize) -> Result<Vec<u8>> {
        syscalls::recv_exact(self.fd, n, self.timeout, self.stop_flag())
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        syscalls::send_all(self.fd, data)
    }
}

impl Drop for Tcp {
    fn drop(&mut self) {
        if self.fd >= 0 {
            tracing::debug!(fd = self.fd, "closed socket");
            syscalls::close(self.fd);
            self.fd = -1;
        }
    }
}

/// Thin constructor for a request/reply client over TCP.
pub struct Client;

impl Client {
    pub fn new(args: ClientArgs) -> Result<SessionClient> {
        let tcp = Tcp::open(args)?;
        Ok(SessionClient::from(Descriptor::Tcp(tcp)))
    }
}

/// Multi-threaded accept/dispatch server: `max_socket` workers each block
/// on accept (non-blocking accept polled at 10 ms) and serve one child to
/// completion before returning to the pool.
pub struct Server {
    pub handler: Option<SessionHandler>,
    listen_fd: c_int,
    max_socket: usize,
    running: Arc<AtomicBool>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("listen_fd", &self.listen_fd)
            .field("max_socket", &self.max_socket)
            .field("running", &self.running)
            .finish()
    }
}

impl Server {
    pub fn new(args: ServerArgs) -> Result<Server> {
        if args.max_socket == 0 || args.max_socket > MAX_SOCKET_CEILING {
            return Err(Error::usage(format!(
                "max_socket must be between 1 and {MAX_SOCKET_CEILING}, given {}",
                args.max_socket
            )));
        }
        let listen_fd = syscalls::create_listen_socket(&args.host, args.max_socket as c_int)?;
        Ok(Server {
            handler: None,
            listen_fd,
            max_socket: args.max_socket,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The port actually bound (useful with `host:0`).
    pub fn local_port(&self) -> Result<u16> {
        syscalls::local_port(self.listen_fd)
    }

    /// Run the accept loop until [`stop`](Self::stop). Blocks the calling
    /// thread; workers run under a scope so `start` returns only after every
    /// in-flight connection has finished its current exchange.
    pub fn start(&self) -> Result<()> {
        let handler = self
            .handler
            .clone()
            .ok_or_else(|| Error::usage("No session handler installed"))?;

        self.running.store(true, Ordering::Release);
        thread::scope(|scope| {
            for id in 0..self.max_socket {
                let handler = handler.clone();
                let running = self.running.clone();
                let listen_fd = self.listen_fd;
                scope.spawn(move || worker_loop(id, listen_fd, handler, running));
            }
        });
        Ok(())
    }

    /// Idempotent; a no-op when the server is not running. In-flight reads
    /// observe the flag within one 10 ms tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub(crate) fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub(crate) fn listen_fd(&self) -> c_int {
        self.listen_fd
    }

    pub(crate) fn max_socket(&self) -> usize {
        self.max_socket
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
        if self.listen_fd >= 0 {
            syscalls::close(self.listen_fd);
            self.listen_fd = -1;
        }
    }
}

impl SessionHost for Server {
    fn set_session_handler(&mut self, handler: SessionHandler) {
        self.handler = Some(handler);
    }
}

fn worker_loop(id: usize, listen_fd: c_int, handler: SessionHandler, running: Arc<AtomicBool>) {
    tracing::debug!(worker = id, "worker started");
    while running.load(Ordering::Acquire) {
        let (fd, peer) = match syscalls::accept_connection(listen_fd) {
            Ok(Some(accepted)) => accepted,
            Ok(None) => {
                thread::sleep(syscalls::TICK);
                continue;
            }
            Err(e) => {
                tracing::warn!(worker = id, error = %e, "accept failed");
                thread::sleep(syscalls::TICK);
                continue;
            }
        };

        tracing::debug!(worker = id, peer = %peer, "accepted connection");
        let child = Tcp::from_accepted(fd, running.clone());
        let desc = SharedDescriptor::new(Descriptor::Tcp(child));
        serve_connection(desc, &peer, &handler, &running);
    }
    tracing::debug!(worker = id, "worker exited");
}
