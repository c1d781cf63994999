//! HTTP/1.1 codec and request/response engine.
//!
//! The engine is usable two ways: [`Http::execute`] is a pure function from
//! a raw frame to a request/response pair (testable without any I/O), and
//! [`Http::bind`] wraps it as a framing handler for a session server.

pub mod arg;
pub mod chunked;
mod files;
mod request;
mod response;
mod routing;

use std::sync::Arc;
use std::time::Instant;

use crate::descriptor::SharedDescriptor;
use crate::session::{SessionClient, SessionHost};
use crate::stream::Stream;

pub use files::register_file_routes;
pub use request::{RequestReader, RequestWriter};
pub use response::{ResponseReader, ResponseWriter};
pub use routing::{IntoResponse, Json, RouteFn, RouteHandler};

/// HTTP-layer error: a status code (100 to 599) and a message used as the
/// response body by the default error handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct Error {
    pub status: u16,
    pub message: String,
}

impl Error {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

impl From<crate::error::Error> for Error {
    fn from(e: crate::error::Error) -> Self {
        Self::new(500, format!("{}: {}", e.message, e.code))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Header map preserving insertion order and case on write, with
/// case-insensitive lookup.
#[derive(Debug, Clone, Default)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Insert or replace (matching case-insensitively).
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(key, _)| key.eq_ignore_ascii_case(&name)) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.0.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::default();
        for (key, value) in iter {
            headers.insert(key, value);
        }
        headers
    }
}

pub fn status_text(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Request Entity Too Large",
        414 => "Request URI Too Long",
        415 => "Unsupported Media Type",
        417 => "Expectation Failed",
        418 => "Teapot",
        422 => "Unprocessable Entity",
        426 => "Upgrade Required",
        428 => "Precondition Required",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => "Unknown",
    }
}

pub type HeaderFn = Arc<dyn Fn(&RequestReader, &ResponseWriter) -> String + Send + Sync>;
pub type PreconditionFn =
    Arc<dyn Fn(&mut RequestReader, &mut ResponseWriter) -> Result<()> + Send + Sync>;
pub type ErrorHandlerFn = Arc<dyn Fn(Error, &mut RequestReader, &mut ResponseWriter) + Send + Sync>;
pub type LoggerFn = Arc<dyn Fn(&str, &RequestReader, &ResponseWriter) + Send + Sync>;

pub struct Route {
    pub path: String,
    pub methods: Vec<String>,
    pub function: RouteFn,
}

/// Route table plus engine policy. Build it mutably, then share it behind an
/// `Arc` to bind; the table is read-only for the life of the server.
pub struct Http {
    pub routes: Vec<Route>,
    pub global_headers: Vec<(String, HeaderFn)>,
    pub preconditions: Vec<PreconditionFn>,
    pub error_handler: ErrorHandlerFn,
    pub logger: Option<LoggerFn>,
    pub show_response_time: bool,
}

impl Default for Http {
    fn default() -> Self {
        Self::new()
    }
}

impl Http {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            global_headers: Vec::new(),
            preconditions: Vec::new(),
            error_handler: Arc::new(|err, _req, res| {
                res.status = err.status;
                res.body = err.message;
            }),
            logger: None,
            show_response_time: false,
        }
    }

    /// Register a route from an extractor tuple and a matching handler.
    pub fn route<X, F>(&mut self, path: impl Into<String>, methods: &[&str], extractors: X, handler: F)
    where
        F: RouteHandler<X>,
    {
        self.routes.push(Route {
            path: path.into(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
            function: handler.into_route_fn(extractors),
        });
    }

    /// Register a raw `(request, response)` handler.
    pub fn route_fn(
        &mut self,
        path: impl Into<String>,
        methods: &[&str],
        function: impl Fn(&mut RequestReader, &mut ResponseWriter) -> Result<()> + Send + Sync + 'static,
    ) {
        self.routes.push(Route {
            path: path.into(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
            function: Arc::new(function),
        });
    }

    pub fn get<X, F: RouteHandler<X>>(&mut self, path: impl Into<String>, extractors: X, handler: F) {
        self.route(path, &["GET"], extractors, handler);
    }

    pub fn post<X, F: RouteHandler<X>>(&mut self, path: impl Into<String>, extractors: X, handler: F) {
        self.route(path, &["POST"], extractors, handler);
    }

    pub fn put<X, F: RouteHandler<X>>(&mut self, path: impl Into<String>, extractors: X, handler: F) {
        self.route(path, &["PUT"], extractors, handler);
    }

    pub fn patch<X, F: RouteHandler<X>>(&mut self, path: impl Into<String>, extractors: X, handler: F) {
        self.route(path, &["PATCH"], extractors, handler);
    }

    pub fn delete<X, F: RouteHandler<X>>(&mut self, path: impl Into<String>, extractors: X, handler: F) {
        self.route(path, &["DELETE"], extractors, handler);
    }

    pub fn head<X, F: RouteHandler<X>>(&mut self, path: impl Into<String>, extractors: X, handler: F) {
        self.route(path, &["HEAD"], extractors, handler);
    }

    pub fn options<X, F: RouteHandler<X>>(&mut self, path: impl Into<String>, extractors: X, handler: F) {
        self.route(path, &["OPTIONS"], extractors, handler);
    }

    pub fn trace<X, F: RouteHandler<X>>(&mut self, path: impl Into<String>, extractors: X, handler: F) {
        self.route(path, &["TRACE"], extractors, handler);
    }

    /// Run before every matched route; an `Err` short-circuits through the
    /// error handler.
    pub fn precondition(
        &mut self,
        f: impl Fn(&mut RequestReader, &mut ResponseWriter) -> Result<()> + Send + Sync + 'static,
    ) {
        self.preconditions.push(Arc::new(f));
    }

    /// Generate a header after every handler; empty results are skipped.
    pub fn global_header(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&RequestReader, &ResponseWriter) -> String + Send + Sync + 'static,
    ) {
        self.global_headers.push((name.into(), Arc::new(f)));
    }

    /// Dispatch another registered path with the current request/response.
    pub fn reroute(&self, path: &str, req: &mut RequestReader, res: &mut ResponseWriter) -> Result<()> {
        let route = self
            .routes
            .iter()
            .find(|r| r.path == path)
            .ok_or_else(|| Error::new(404, format!("path {path} is not found")))?;
        (route.function)(req, res)
    }

    /// Register one GET route per file under `root` (recursively) at bind
    /// time. `index.html` additionally aliases the prefix itself. With
    /// `chunked`, bodies go out chunk-encoded instead of length-prefixed.
    pub fn serve_static(&mut self, prefix: &str, root: &str, chunked: bool) {
        let prefix = prefix.trim_end_matches('/');
        for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(root) else { continue };
            let route_path = format!("{prefix}/{}", rel.to_string_lossy());
            let full = entry.path().to_path_buf();

            if entry.file_name() == "index.html" && rel.components().count() == 1 {
                let alias = if prefix.is_empty() { "/".to_string() } else { prefix.to_string() };
                self.route_fn(alias, &["GET"], static_file_route(full.clone(), chunked));
            }
            self.route_fn(route_path, &["GET"], static_file_route(full, chunked));
        }
    }

    /// The pure engine: parse the frame, route it, fill in derived response
    /// fields. No I/O beyond what the request's lazy body performs.
    pub fn execute(&self, desc: &SharedDescriptor, data: &[u8]) -> (RequestReader, ResponseWriter) {
        let start = Instant::now();
        let mut req = RequestReader::parse(desc, data);
        let mut res = ResponseWriter::default();
        if !req.version.is_empty() {
            res.version = req.version.clone();
        }

        match self.routes.iter().find(|r| r.path == req.url.path) {
            None => res.status = 404,
            Some(route) => {
                if !route.methods.iter().any(|m| m == &req.method) {
                    res.status = 405;
                } else {
                    res.status = 200;
                    let precondition_err = self
                        .preconditions
                        .iter()
                        .find_map(|pre| pre(&mut req, &mut res).err());
                    let outcome = match precondition_err {
                        Some(e) => Err(e),
                        None => (route.function)(&mut req, &mut res),
                    };
                    if let Err(e) = outcome {
                        (self.error_handler)(e, &mut req, &mut res);
                    }
                }
            }
        }

        if res.status_string.is_empty() {
            res.status_string = status_text(res.status).to_string();
        }
        if res.headers.get("Server").is_none() {
            res.headers.insert("Server", format!("delameta/{}", crate::VERSION));
        }
        if !res.body.is_empty() && res.body_stream.is_empty() && res.headers.get("Content-Length").is_none()
        {
            res.headers.insert("Content-Length", res.body.len().to_string());
        }
        if res.body.is_empty() && res.body_stream.is_empty() {
            res.headers.insert("Content-Length", "0");
        }

        let extra: Vec<(String, String)> = self
            .global_headers
            .iter()
            .map(|(name, f)| (name.clone(), f(&req, &res)))
            .filter(|(_, value)| !value.is_empty())
            .collect();
        for (name, value) in extra {
            res.headers.insert(name, value);
        }

        if self.show_response_time {
            let elapsed_ms = start.elapsed().as_millis();
            res.headers.insert("X-Response-Time", format!("{elapsed_ms}ms"));
        }

        (req, res)
    }

    /// Install this engine as the framing handler of a session server. The
    /// engine is shared immutably from here on; routes cannot change at
    /// runtime.
    pub fn bind(self: &Arc<Self>, host: &mut impl SessionHost) {
        let app = self.clone();
        host.set_session_handler(Arc::new(move |desc, name, data| {
            let (req, res) = app.execute(desc, data);
            if let Some(logger) = &app.logger {
                logger(name, &req, &res);
            }
            res.dump()
        }));
    }

    /// One-call server entry: TLS when a cert/key pair is configured, plain
    /// TCP otherwise. Blocks until the returned server is stopped.
    pub fn listen(self: &Arc<Self>, args: ListenArgs) -> crate::error::Result<()> {
        if !args.cert_file.is_empty() || !args.key_file.is_empty() {
            let mut server = crate::tls::Server::new(crate::tls::ServerArgs {
                tcp: crate::tcp::ServerArgs { host: args.host, max_socket: args.max_socket },
                cert_file: args.cert_file,
                key_file: args.key_file,
            })?;
            self.bind(&mut server);
            server.start()
        } else {
            let mut server = crate::tcp::Server::new(crate::tcp::ServerArgs {
                host: args.host,
                max_socket: args.max_socket,
            })?;
            self.bind(&mut server);
            server.start()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListenArgs {
    pub host: String,
    pub cert_file: String,
    pub key_file: String,
    pub max_socket: usize,
}

impl Default for ListenArgs {
    fn default() -> Self {
        Self {
            host: "localhost:5000".to_string(),
            cert_file: String::new(),
            key_file: String::new(),
            max_socket: 4,
        }
    }
}

fn static_file_route(
    path: std::path::PathBuf,
    chunked: bool,
) -> impl Fn(&mut RequestReader, &mut ResponseWriter) -> Result<()> + Send + Sync + 'static {
    move |_req, res| {
        let content_type = mime_guess::from_path(&path)
            .first_raw()
            .unwrap_or("application/octet-stream");
        let file = crate::file::File::open(crate::file::Args {
            path: path.to_string_lossy().into_owned(),
            mode: "r".to_string(),
        })?;

        res.headers.insert("Content-Type", content_type);
        if chunked {
            res.headers.insert("Transfer-Encoding", "chunked");
            res.body_stream = chunked::encode(file.into_stream()?);
        } else {
            res.headers.insert("Content-Length", file.file_size()?.to_string());
            res.body_stream = file.into_stream()?;
        }
        Ok(())
    }
}

/// Issue one request over a session client and parse the reply. Fills in
/// the default `User-Agent` and `Content-Length` headers when absent.
pub fn request(session: &SessionClient, mut req: RequestWriter) -> crate::error::Result<ResponseReader> {
    if req.headers.get("User-Agent").is_none() {
        req.headers.insert("User-Agent", format!("delameta/{}", crate::VERSION));
    }
    if !req.body.is_empty() && req.body_stream.is_empty() && req.headers.get("Content-Length").is_none()
    {
        req.headers.insert("Content-Length", req.body.len().to_string());
    }
    if req.body.is_empty() && req.body_stream.is_empty() {
        req.headers.insert("Content-Length", "0");
    }

    let out: Stream = req.dump();
    let data = session.request(out)?;
    Ok(ResponseReader::parse(&session.desc, &data))
}
