use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::Result;
use crate::file::File;
use crate::serial::Serial;
use crate::stdio::Stdio;
use crate::stream::Stream;
use crate::tcp::Tcp;
use crate::tls::Tls;
use crate::udp::Udp;

/// A byte-duplex endpoint over a blocking OS handle.
///
/// Every variant exposes the same capability set: `read`, `read_until(n)`,
/// `read_as_stream(n)` (via [`SharedDescriptor`]) and `write(bytes)`. The
/// owned handle is closed on drop.
#[derive(Debug)]
pub enum Descriptor {
    File(File),
    Serial(Serial),
    Tcp(Tcp),
    Tls(Tls),
    Udp(Udp),
    Stdio(Stdio),
}

impl Descriptor {
    /// Block until at least one byte is available (or timeout), then return
    /// the currently available bytes.
    pub fn read(&mut self) -> Result<Vec<u8>> {
        match self {
            Descriptor::File(d) => d.read(),
            Descriptor::Serial(d) => d.read(),
            Descriptor::Tcp(d) => d.read(),
            Descriptor::Tls(d) => d.read(),
            Descriptor::Udp(d) => d.read(),
            Descriptor::Stdio(d) => d.read(),
        }
    }

    /// Loop reads until exactly `n` bytes have arrived.
    pub fn read_until(&mut self, n: usize) -> Result<Vec<u8>> {
        match self {
            Descriptor::File(d) => d.read_until(n),
            Descriptor::Serial(d) => d.read_until(n),
            Descriptor::Tcp(d) => d.read_until(n),
            Descriptor::Tls(d) => d.read_until(n),
            Descriptor::Udp(d) => d.read_until(n),
            Descriptor::Stdio(d) => d.read_until(n),
        }
    }

    /// Write the whole buffer, retrying partial progress.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Descriptor::File(d) => d.write(data),
            Descriptor::Serial(d) => d.write(data),
            Descriptor::Tcp(d) => d.write(data),
            Descriptor::Tls(d) => d.write(data),
            Descriptor::Udp(d) => d.write(data),
            Descriptor::Stdio(d) => d.write(data),
        }
    }

    /// Whether the peer should be served another exchange (TCP/TLS only;
    /// other transports have no connection to keep).
    pub fn keep_alive(&self) -> bool {
        match self {
            Descriptor::Tcp(d) => d.keep_alive,
            Descriptor::Tls(d) => d.tcp.keep_alive,
            _ => false,
        }
    }

    pub fn set_keep_alive(&mut self, keep_alive: bool) {
        match self {
            Descriptor::Tcp(d) => d.keep_alive = keep_alive,
            Descriptor::Tls(d) => d.tcp.keep_alive = keep_alive,
            _ => {}
        }
    }

    pub fn set_timeout(&mut self, timeout: i32) {
        match self {
            Descriptor::File(_) | Descriptor::Stdio(_) => {}
            Descriptor::Serial(d) => d.timeout = timeout,
            Descriptor::Tcp(d) => d.timeout = timeout,
            Descriptor::Tls(d) => d.tcp.timeout = timeout,
            Descriptor::Udp(d) => d.timeout = timeout,
        }
    }

    /// Maximum number of exchanges before the server forces a close
    /// (negative = unlimited).
    pub fn set_max(&mut self, max: i32) {
        match self {
            Descriptor::Tcp(d) => d.max = max,
            Descriptor::Tls(d) => d.tcp.max = max,
            _ => {}
        }
    }

    pub fn max(&self) -> i32 {
        match self {
            Descriptor::Tcp(d) => d.max,
            Descriptor::Tls(d) => d.tcp.max,
            _ => -1,
        }
    }

    /// Consume the descriptor into a shared handle.
    pub fn into_shared(self) -> SharedDescriptor {
        SharedDescriptor::new(self)
    }
}

/// Cloneable handle to a [`Descriptor`], shared between a session loop and
/// the lazy streams that demand-read from it.
///
/// The lock is held only for the duration of a single operation; pulls and
/// writes within one session are sequential, so the mutex is uncontended.
#[derive(Clone, Debug)]
pub struct SharedDescriptor(Arc<Mutex<Descriptor>>);

impl SharedDescriptor {
    pub fn new(desc: Descriptor) -> Self {
        Self(Arc::new(Mutex::new(desc)))
    }

    pub fn lock(&self) -> MutexGuard<'_, Descriptor> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn read(&self) -> Result<Vec<u8>> {
        self.lock().read()
    }

    pub fn read_until(&self, n: usize) -> Result<Vec<u8>> {
        self.lock().read_until(n)
    }

    /// A stream that lazily yields up to `n` bytes from this descriptor in
    /// `MAX_HANDLE_SZ`-capped chunks.
    pub fn read_as_stream(&self, n: usize) -> Stream {
        let mut s = Stream::new();
        s.push_reader(self.clone(), n);
        s
    }

    pub fn write(&self, data: &[u8]) -> Result<()> {
        self.lock().write(data)
    }
}
