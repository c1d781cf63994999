use crate::descriptor::Descriptor;
use crate::error::{Error, Result};
use crate::file::{self, File};
use crate::serial::{self, Serial};
use crate::stdio::Stdio;
use crate::tcp::{self, Tcp};
use crate::udp::{self, Udp};
use crate::url::URL;

fn query_int(url: &URL, key: &str) -> Result<Option<i32>> {
    match url.queries.get(key) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| Error::usage(format!("Invalid {key}: {value}"))),
    }
}

/// Open a descriptor from a URI:
/// `stdio://`, `file://<path>?mode=...`, `serial://<port>?baud=...&timeout=...`,
/// `tcp://<host>[:port]?timeout=...&connection-timeout=...`,
/// `udp://<host>[:port]?timeout=...`.
pub fn open(uri: &str) -> Result<Descriptor> {
    let url = URL::parse(uri);
    match url.protocol.as_str() {
        "stdio" => Ok(Descriptor::Stdio(Stdio::new())),
        "file" => {
            let mut args = file::Args::default();
            if let Some(mode) = url.queries.get("mode") {
                args.mode = mode.clone();
            }
            args.path = if url.host.is_empty() { url.path.clone() } else { url.host.clone() };
            Ok(Descriptor::File(File::open(args)?))
        }
        "serial" => {
            let mut args = serial::Args::default();
            if let Some(baud) = query_int(&url, "baud")? {
                args.baud = baud as u32;
            }
            if let Some(timeout) = query_int(&url, "timeout")? {
                args.timeout = timeout;
            }
            args.port = if url.host.is_empty() { url.path.clone() } else { url.host.clone() };
            Ok(Descriptor::Serial(Serial::open(args)?))
        }
        "tcp" => {
            let mut args = tcp::ClientArgs { host: url.host.clone(), ..Default::default() };
            if let Some(timeout) = query_int(&url, "timeout")? {
                args.timeout = timeout;
            }
            if let Some(conn) = query_int(&url, "connection-timeout")? {
                args.connection_timeout = conn;
            }
            Ok(Descriptor::Tcp(Tcp::open(args)?))
        }
        "udp" => {
            let mut args = udp::Args { host: url.host.clone(), ..Default::default() };
            if let Some(timeout) = query_int(&url, "timeout")? {
                args.timeout = timeout;
            }
            Ok(Descriptor::Udp(Udp::open(args)?))
        }
        _ => Err(Error::usage(format!("Unknown endpoint: {uri}"))),
    }
}
