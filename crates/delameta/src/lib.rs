//! Portable blocking I/O descriptors (file, serial, TCP/TLS, UDP, stdio), an
//! HTTP/1.1 request/response engine with declarative handler routing, and a
//! Modbus RTU/TCP codec with a register-accessor server and a typed client,
//! all speaking through one lazy byte-stream abstraction and a shared
//! multi-threaded session server.

pub mod descriptor;
pub mod endpoint;
pub mod error;
pub mod file;
pub mod http;
pub mod logging;
pub mod modbus;
pub mod serial;
pub mod session;
pub mod stdio;
pub mod stream;
mod syscalls;
pub mod tcp;
pub mod tls;
pub mod udp;
pub mod url;

pub use descriptor::{Descriptor, SharedDescriptor};
pub use error::{Error, Result};
pub use file::File;
pub use serial::Serial;
pub use session::{SessionClient, SessionHandler, SessionHost};
pub use stream::Stream;
pub use tcp::Tcp;
pub use udp::Udp;
pub use url::URL;

/// Largest chunk moved per kernel call and per stream pull.
pub const MAX_HANDLE_SZ: usize = 2048;

/// Wire identifier used for default `Server` and `User-Agent` headers.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
