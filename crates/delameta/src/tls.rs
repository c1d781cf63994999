use std::io::{self, Read, Write};
use std::os::raw::c_int;
use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock};
use std::thread;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, ClientConnection, RootCertStore, ServerConfig, ServerConnection};

use crate::descriptor::{Descriptor, SharedDescriptor};
use crate::error::{Error, Result};
use crate::session::{serve_connection, SessionClient, SessionHandler, SessionHost};
use crate::syscalls;
use crate::tcp::{self, Tcp};
use crate::MAX_HANDLE_SZ;

#[derive(Debug, Clone, Default)]
pub struct ClientArgs {
    pub tcp: tcp::ClientArgs,
    /// Server name presented for SNI/verification; the host when empty.
    pub server_name: String,
    /// Extra trust roots (PEM). The webpki root set is always loaded.
    pub ca_file: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ServerArgs {
    pub tcp: tcp::ServerArgs,
    pub cert_file: String,
    pub key_file: String,
}

enum Session {
    Client(Box<ClientConnection>),
    Server(Box<ServerConnection>),
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Session::Client(_) => f.write_str("Session::Client"),
            Session::Server(_) => f.write_str("Session::Server"),
        }
    }
}

/// TLS endpoint: an established TCP stream with the record layer replacing
/// plain reads and writes. The handshake runs synchronously in blocking
/// mode; afterwards the fd returns to non-blocking and the usual
/// timeout/tick loop applies underneath the record layer.
#[derive(Debug)]
pub struct Tls {
    pub tcp: Tcp,
    session: Session,
}

/// Raw-fd transport for the record layer: non-blocking syscalls retried on
/// a 10 ms tick so descriptor timeouts stay in force.
struct FdTransport {
    fd: c_int,
    timeout: i32,
}

impl Read for FdTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = syscalls::recv_exact(self.fd, buf.len().min(1), self.timeout, None)
            .map_err(to_io_error)?;
        // one byte guaranteed; drain whatever else is queued without blocking
        buf[..data.len()].copy_from_slice(&data);
        let mut n = data.len();
        while n < buf.len() {
            let got = unsafe {
                libc::recv(
                    self.fd,
                    buf[n..].as_mut_ptr() as *mut std::os::raw::c_void,
                    buf.len() - n,
                    0,
                )
            };
            if got <= 0 {
                break;
            }
            n += got as usize;
        }
        Ok(n)
    }
}

impl Write for FdTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        syscalls::send_all(self.fd, buf).map_err(to_io_error)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn to_io_error(e: Error) -> io::Error {
    if e.is_transfer_timeout() {
        io::Error::new(io::ErrorKind::TimedOut, e.message)
    } else if e.is_connection_closed() {
        io::Error::new(io::ErrorKind::UnexpectedEof, e.message)
    } else {
        io::Error::other(e.message)
    }
}

fn from_io_error(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::TimedOut => Error::transfer_timeout(),
        io::ErrorKind::UnexpectedEof => Error::connection_closed(),
        _ => Error::from(e),
    }
}

fn default_roots() -> &'static RootCertStore {
    static ROOTS: OnceLock<RootCertStore> = OnceLock::new();
    ROOTS.get_or_init(|| {
        let mut roots = RootCertStore::empty();
        roots.add_parsable_certificates(webpki_root_certs::TLS_SERVER_ROOT_CERTS.iter().cloned());
        roots
    })
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::usage(format!("Cannot open certificate {path}: {e}")))?;
    rustls_pemfile::certs(&mut io::BufReader::new(file))
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| Error::usage(format!("Invalid certificate {path}: {e}")))
}

fn load_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::usage(format!("Cannot open private key {path}: {e}")))?;
    rustls_pemfile::private_key(&mut io::BufReader::new(file))
        .map_err(|e| Error::usage(format!("Invalid private key {path}: {e}")))?
        .ok_or_else(|| Error::usage(format!("No private key found in {path}")))
}

impl Tls {
    /// Connect TCP, then run the synchronous handshake.
    pub fn open(args: ClientArgs) -> Result<Tls> {
        let server_name = if args.server_name.is_empty() {
            crate::url::split_host_port(&args.tcp.host).0.to_string()
        } else {
            args.server_name.clone()
        };

        let mut roots = default_roots().clone();
        if let Some(ca) = &args.ca_file {
            for cert in load_certs(ca)? {
                roots
                    .add(cert)
                    .map_err(|e| Error::usage(format!("Invalid CA certificate: {e}")))?;
            }
        }
        let config = Arc::new(
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        );

        let name = ServerName::try_from(server_name.clone())
            .map_err(|_| Error::usage(format!("Invalid server name: {server_name}")))?;
        let conn = ClientConnection::new(config, name)
            .map_err(|e| Error::usage(format!("TLS setup failed: {e}")))?;

        let tcp = Tcp::open(args.tcp)?;
        Self::handshake(tcp, Session::Client(Box::new(conn)))
    }

    fn handshake(tcp: Tcp, mut session: Session) -> Result<Tls> {
        syscalls::set_blocking(tcp.fd)?;
        let mut io = FdTransport { fd: tcp.fd, timeout: tcp.timeout };
        let result = match &mut session {
            Session::Client(conn) => complete_handshake(conn.as_mut(), &mut io),
            Session::Server(conn) => complete_handshake(conn.as_mut(), &mut io),
        };
        syscalls::set_non_blocking(tcp.fd)?;
        result?;
        tracing::debug!(fd = tcp.fd, "TLS handshake complete");
        Ok(Tls { tcp, session })
    }

    pub fn read(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; MAX_HANDLE_SZ];
        let n = self.io_read(&mut buf)?;
        if n == 0 {
            return Err(Error::connection_closed());
        }
        buf.truncate(n);
        Ok(buf)
    }

    pub fn read_until(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            let got = self.io_read(&mut buf[filled..])?;
            if got == 0 {
                return Err(Error::connection_closed());
            }
            filled += got;
        }
        Ok(buf)
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut io = FdTransport { fd: self.tcp.fd, timeout: self.tcp.timeout };
        let result = match &mut self.session {
            Session::Client(conn) => {
                rustls::Stream::new(conn.as_mut(), &mut io).write_all(data)
            }
            Session::Server(conn) => {
                rustls::Stream::new(conn.as_mut(), &mut io).write_all(data)
            }
        };
        result.map_err(from_io_error)
    }

    fn io_read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut io = FdTransport { fd: self.tcp.fd, timeout: self.tcp.timeout };
        let result = match &mut self.session {
            Session::Client(conn) => rustls::Stream::new(conn.as_mut(), &mut io).read(buf),
            Session::Server(conn) => rustls::Stream::new(conn.as_mut(), &mut io).read(buf),
        };
        match result {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(0),
            Err(e) => Err(from_io_error(e)),
        }
    }
}

fn complete_handshake<C, S>(conn: &mut C, io: &mut FdTransport) -> Result<()>
where
    C: std::ops::DerefMut + std::ops::Deref<Target = rustls::ConnectionCommon<S>>,
    S: rustls::SideData,
{
    while conn.is_handshaking() {
        conn.complete_io(io)
            .map_err(|e| Error::usage(format!("TLS handshake failed: {e}")))?;
    }
    Ok(())
}

/// Thin constructor for a request/reply client over TLS.
pub struct Client;

impl Client {
    pub fn new(args: ClientArgs) -> Result<SessionClient> {
        let tls = Tls::open(args)?;
        Ok(SessionClient::from(Descriptor::Tls(tls)))
    }
}

/// The TCP session server with a rustls handshake on accept. Missing or
/// invalid cert/key is a constructor error.
pub struct Server {
    pub handler: Option<SessionHandler>,
    inner: tcp::Server,
    config: Arc<ServerConfig>,
}

impl Server {
    pub fn new(args: ServerArgs) -> Result<Server> {
        if args.cert_file.is_empty() || args.key_file.is_empty() {
            return Err(Error::usage("TLS server requires cert_file and key_file"));
        }
        let certs = load_certs(&args.cert_file)?;
        let key = load_key(&args.key_file)?;
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| Error::usage(format!("Invalid certificate/key pair: {e}")))?;

        Ok(Server {
            handler: None,
            inner: tcp::Server::new(args.tcp)?,
            config: Arc::new(config),
        })
    }

    pub fn local_port(&self) -> Result<u16> {
        self.inner.local_port()
    }

    pub fn start(&self) -> Result<()> {
        let handler = self
            .handler
            .clone()
            .ok_or_else(|| Error::usage("No session handler installed"))?;
        let running = self.inner.running_flag();
        let listen_fd = self.inner.listen_fd();
        let config = self.config.clone();

        running.store(true, Ordering::Release);
        thread::scope(|scope| {
            for id in 0..self.inner.max_socket() {
                let handler = handler.clone();
                let running = running.clone();
                let config = config.clone();
                scope.spawn(move || {
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

                        let tcp = Tcp::from_accepted(fd, running.clone());
                        let conn = match ServerConnection::new(config.clone()) {
                            Ok(conn) => conn,
                            Err(e) => {
                                tracing::warn!(peer = %peer, error = %e, "TLS session failed");
                                continue;
                            }
                        };
                        let tls = match Tls::handshake(tcp, Session::Server(Box::new(conn))) {
                            Ok(tls) => tls,
                            Err(e) => {
                                tracing::warn!(peer = %peer, error = %e, "TLS handshake failed");
                                continue;
                            }
                        };

                        let desc = SharedDescriptor::new(Descriptor::Tls(tls));
                        serve_connection(desc, &peer, &handler, &running);
                    }
                });
            }
        });
        Ok(())
    }

    pub fn stop(&self) {
        self.inner.stop();
    }
}

impl SessionHost for Server {
    fn set_session_handler(&mut self, handler: SessionHandler) {
        self.handler = Some(handler);
    }
}
