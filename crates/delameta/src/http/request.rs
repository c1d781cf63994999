use bytes::Bytes;

use crate::descriptor::SharedDescriptor;
use crate::http::chunked;
use crate::http::Headers;
use crate::stream::Stream;
use crate::url::URL;

/// A parsed inbound request. The body either sits materialized in `body`
/// (after [`materialize_body`](Self::materialize_body)) or is yielded
/// exactly once by `body_stream`: the bytes already buffered with the
/// headers first, then demand-reads from the descriptor until
/// `Content-Length` is satisfied (or the chunked terminator is seen).
#[derive(Debug, Default)]
pub struct RequestReader {
    pub method: String,
    pub url: URL,
    pub version: String,
    pub headers: Headers,
    pub body: String,
    pub body_stream: Stream,
}

impl RequestReader {
    /// Parse one request frame. Tolerates `\n` line endings. `Host`
    /// overrides the URL host; `Connection` and `Keep-Alive` mutate the
    /// descriptor's keep-alive, timeout and max settings.
    pub fn parse(desc: &SharedDescriptor, data: &[u8]) -> RequestReader {
        let mut req = RequestReader::default();

        let Some((line, rest)) = split_line(data) else {
            return req;
        };
        let mut parts = line.splitn(3, ' ');
        let (Some(method), Some(target), Some(version)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return req;
        };
        req.method = method.to_string();
        req.url = URL::parse(target);
        req.version = version.to_string();

        let (headers, remainder) = parse_header_block(rest);
        req.headers = headers;

        if let Some(host) = req.headers.get("Host") {
            req.url.host = host.to_string();
        }
        apply_connection_headers(&req.headers, desc);
        req.body_stream = body_stream_of(&req.headers, desc, remainder);

        req
    }

    /// Drain `body_stream` into `body`. A no-op when already materialized.
    pub fn materialize_body(&mut self) {
        if !self.body.is_empty() {
            return;
        }
        let mut out = Vec::new();
        self.body_stream.drain(|chunk| out.extend_from_slice(chunk));
        self.body = String::from_utf8_lossy(&out).into_owned();
    }

    /// The owned, writable form of this request (the body stream, being
    /// single-consumer, stays behind).
    pub fn to_writer(&self) -> RequestWriter {
        RequestWriter {
            method: self.method.clone(),
            url: self.url.clone(),
            version: self.version.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            body_stream: Stream::new(),
        }
    }
}

/// An outbound request under construction.
#[derive(Debug)]
pub struct RequestWriter {
    pub method: String,
    pub url: URL,
    pub version: String,
    pub headers: Headers,
    pub body: String,
    pub body_stream: Stream,
}

impl Default for RequestWriter {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            url: URL::default(),
            version: "HTTP/1.1".to_string(),
            headers: Headers::default(),
            body: String::new(),
            body_stream: Stream::new(),
        }
    }
}

impl RequestWriter {
    /// Serialize into a stream: start line, headers, empty line, body bytes,
    /// then the body stream's rules (large bodies stay unmaterialized).
    pub fn dump(self) -> Stream {
        let mut head = String::new();
        head.push_str(&self.method);
        head.push(' ');
        head.push_str(if self.url.full_path.is_empty() { "/" } else { &self.url.full_path });
        head.push(' ');
        head.push_str(&self.version);
        head.push_str("\r\n");
        for (key, value) in self.headers.iter() {
            head.push_str(key);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");

        let mut s = Stream::new();
        s.push(head);
        if !self.body.is_empty() {
            s.push(self.body);
        }
        s.append(self.body_stream);
        s
    }
}

/// Split off the first line, accepting `\r\n` or bare `\n`.
pub(crate) fn split_line(data: &[u8]) -> Option<(&str, &[u8])> {
    let nl = memchr::memchr(b'\n', data)?;
    let mut line = &data[..nl];
    if line.last() == Some(&b'\r') {
        line = &line[..line.len() - 1];
    }
    std::str::from_utf8(line).ok().map(|line| (line, &data[nl + 1..]))
}

/// Parse the header block after the start line; returns the headers and the
/// already-buffered start of the body.
pub(crate) fn parse_header_block(data: &[u8]) -> (Headers, Bytes) {
    let (head, body) = match memchr::memmem::find(data, b"\r\n\r\n") {
        Some(at) => (&data[..at], &data[at + 4..]),
        None => match memchr::memmem::find(data, b"\n\n") {
            Some(at) => (&data[..at], &data[at + 2..]),
            None => (data, &[][..]),
        },
    };

    let mut headers = Headers::default();
    for line in head.split(|&b| b == b'\n') {
        let mut line = line;
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        if line.is_empty() {
            continue;
        }
        let Ok(line) = std::str::from_utf8(line) else { continue };
        let Some((key, value)) = line.split_once(':') else { continue };
        headers.insert(key.trim_end(), value.trim_start().trim_end_matches('\r'));
    }

    (headers, Bytes::copy_from_slice(body))
}

/// Apply `Connection: close|keep-alive` and `Keep-Alive: timeout=N, max=M`
/// to the owning descriptor.
pub(crate) fn apply_connection_headers(headers: &Headers, desc: &SharedDescriptor) {
    if let Some(connection) = headers.get("Connection") {
        if connection.eq_ignore_ascii_case("keep-alive") {
            desc.lock().set_keep_alive(true);
        } else if connection.eq_ignore_ascii_case("close") {
            desc.lock().set_keep_alive(false);
        }
    }

    if let Some(keep_alive) = headers.get("Keep-Alive") {
        for part in keep_alive.split(',') {
            let part = part.trim();
            if let Some(timeout) = part.strip_prefix("timeout=") {
                if let Ok(timeout) = timeout.parse() {
                    desc.lock().set_timeout(timeout);
                }
            } else if let Some(max) = part.strip_prefix("max=") {
                if let Ok(max) = max.parse() {
                    desc.lock().set_max(max);
                }
            }
        }
    }
}

/// Build the lazy body stream: buffered remainder first, then either
/// `Content-Length`-bounded demand reads or chunked decoding.
pub(crate) fn body_stream_of(headers: &Headers, desc: &SharedDescriptor, buffered: Bytes) -> Stream {
    let mut stream = Stream::new();

    if headers
        .get("Transfer-Encoding")
        .map(|te| te.eq_ignore_ascii_case("chunked"))
        .unwrap_or(false)
    {
        return chunked::decode(desc.clone(), buffered);
    }

    let buffered_len = buffered.len();
    if buffered_len > 0 {
        stream.push(buffered);
    }

    if let Some(length) = headers.get("Content-Length").and_then(|cl| cl.parse::<usize>().ok()) {
        if length > buffered_len {
            stream.push_reader(desc.clone(), length - buffered_len);
        }
    }

    stream
}
