use crate::descriptor::SharedDescriptor;
use crate::http::request::{apply_connection_headers, body_stream_of, parse_header_block, split_line};
use crate::http::Headers;
use crate::stream::Stream;

/// A response under construction. `status_string` is derived from `status`
/// when left empty; `Content-Length` is auto-filled by the engine when
/// `body` is non-empty and no stream is present.
#[derive(Debug)]
pub struct ResponseWriter {
    pub version: String,
    pub status: u16,
    pub status_string: String,
    pub headers: Headers,
    pub body: String,
    pub body_stream: Stream,
}

impl Default for ResponseWriter {
    fn default() -> Self {
        Self {
            version: "HTTP/1.1".to_string(),
            status: 200,
            status_string: String::new(),
            headers: Headers::default(),
            body: String::new(),
            body_stream: Stream::new(),
        }
    }
}

impl ResponseWriter {
    /// Serialize into a stream: status line, headers, empty line, body,
    /// spliced body stream.
    pub fn dump(self) -> Stream {
        let mut head = String::new();
        head.push_str(&self.version);
        head.push(' ');
        head.push_str(&self.status.to_string());
        head.push(' ');
        if self.status_string.is_empty() {
            head.push_str(super::status_text(self.status));
        } else {
            head.push_str(&self.status_string);
        }
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

/// A parsed inbound response; body semantics as in
/// [`RequestReader`](crate::http::RequestReader).
#[derive(Debug, Default)]
pub struct ResponseReader {
    pub version: String,
    pub status: u16,
    pub status_string: String,
    pub headers: Headers,
    pub body: String,
    pub body_stream: Stream,
}

impl ResponseReader {
    pub fn parse(desc: &SharedDescriptor, data: &[u8]) -> ResponseReader {
        let mut res = ResponseReader::default();

        let Some((line, rest)) = split_line(data) else {
            return res;
        };
        let mut parts = line.splitn(3, ' ');
        let (Some(version), Some(status), status_string) =
            (parts.next(), parts.next(), parts.next().unwrap_or(""))
        else {
            return res;
        };
        res.version = version.to_string();
        res.status = status.parse().unwrap_or(0);
        res.status_string = status_string.to_string();

        let (headers, remainder) = parse_header_block(rest);
        res.headers = headers;

        apply_connection_headers(&res.headers, desc);
        res.body_stream = body_stream_of(&res.headers, desc, remainder);

        res
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

    pub fn to_writer(&self) -> ResponseWriter {
        ResponseWriter {
            version: self.version.clone(),
            status: self.status,
            status_string: self.status_string.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            body_stream: Stream::new(),
        }
    }
}
