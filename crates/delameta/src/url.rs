use std::collections::HashMap;
use std::net::ToSocketAddrs;

/// A parsed `[scheme://]host[:port][/path][?query][#fragment]`.
///
/// `path` defaults to `/`; `full_path` keeps the raw query and fragment as
/// they appeared; `queries` holds percent-decoded key/value pairs. `ip` is a
/// best-effort resolution of the host (passthrough when DNS is unavailable
/// or the host is already an address).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct URL {
    pub url: String,
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub full_path: String,
    pub queries: HashMap<String, String>,
    pub fragment: String,
    pub ip: String,
}

fn default_port(protocol: &str) -> u16 {
    match protocol {
        "http" => 80,
        "https" => 443,
        "ftp" => 21,
        "smtp" => 25,
        "pop3" => 110,
        "imap" => 143,
        _ => 0,
    }
}

impl URL {
    pub fn parse(input: &str) -> Self {
        let mut out = URL { url: input.to_string(), ..Default::default() };
        if input.is_empty() {
            return out;
        }

        let mut rest = input;
        if let Some(at) = rest.find("://") {
            out.protocol = rest[..at].to_string();
            rest = &rest[at + 3..];
        }

        // Single left-to-right scan recording the first '/', '?' and '#'.
        // A '#' seen before any '?' means there is a fragment and no query.
        let bytes = rest.as_bytes();
        let mut path_start = None;
        let mut query_start = None;
        let mut frag_start = None;
        let mut in_brackets = false;
        for (i, &b) in bytes.iter().enumerate() {
            match b {
                b'[' if path_start.is_none() => in_brackets = true,
                b']' => in_brackets = false,
                b'/' if !in_brackets && path_start.is_none() && query_start.is_none() && frag_start.is_none() => {
                    path_start = Some(i);
                }
                b'?' if query_start.is_none() && frag_start.is_none() => {
                    query_start = Some(i);
                }
                b'#' if frag_start.is_none() => {
                    frag_start = Some(i);
                }
                _ => {}
            }
        }

        let host_end = path_start
            .or(query_start)
            .or(frag_start)
            .unwrap_or(rest.len());
        out.host = rest[..host_end].to_string();

        let tail_end = rest.len();
        let query_end = frag_start.unwrap_or(tail_end);
        let path_end = query_start.or(frag_start).unwrap_or(tail_end);

        match path_start {
            Some(p) => {
                out.path = rest[p..path_end].to_string();
                out.full_path = rest[p..].to_string();
            }
            None => {
                out.path = "/".to_string();
                out.full_path = match (query_start, frag_start) {
                    (Some(q), _) => format!("/{}", &rest[q..]),
                    (None, Some(f)) => format!("/{}", &rest[f..]),
                    (None, None) => "/".to_string(),
                };
            }
        }
        if out.path.is_empty() {
            out.path = "/".to_string();
        }

        if let Some(q) = query_start {
            out.queries = parse_query(&rest[q + 1..query_end]);
        }
        if let Some(f) = frag_start {
            out.fragment = rest[f + 1..].to_string();
        }

        if !out.host.is_empty() {
            let (domain, port) = split_host_port(&out.host);
            out.port = port.unwrap_or_else(|| default_port(&out.protocol));
            out.ip = resolve(domain).unwrap_or_else(|| domain.to_string());
        }

        out
    }
}

/// Split `host[:port]`, honoring bracketed IPv6 (`[::1]:8080`).
pub(crate) fn split_host_port(host: &str) -> (&str, Option<u16>) {
    if let Some(stripped) = host.strip_prefix('[') {
        if let Some(close) = stripped.find(']') {
            let domain = &stripped[..close];
            let port = stripped[close + 1..]
                .strip_prefix(':')
                .and_then(|p| p.parse().ok());
            return (domain, port);
        }
    }
    match host.rsplit_once(':') {
        Some((domain, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            (domain, port.parse().ok())
        }
        _ => (host, None),
    }
}

fn resolve(domain: &str) -> Option<String> {
    if domain.parse::<std::net::IpAddr>().is_ok() {
        return Some(domain.to_string());
    }
    (domain, 0u16)
        .to_socket_addrs()
        .ok()?
        .next()
        .map(|addr| addr.ip().to_string())
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

/// Decode `%HH` escapes once. Malformed escapes pass through the `%`
/// unchanged, matching lenient query parsing.
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(a), Some(b)) = (
                bytes.get(i + 1).copied().and_then(hex_val),
                bytes.get(i + 2).copied().and_then(hex_val),
            ) {
                out.push(a << 4 | b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Percent-encode everything but unreserved characters.
pub fn percent_encode(input: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(input.len());
    for &b in input.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => {
                out.push('%');
                out.push(HEX[(b >> 4) as usize] as char);
                out.push(HEX[(b & 0xf) as usize] as char);
            }
        }
    }
    out
}

fn parse_query(input: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for pair in input.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        out.insert(percent_decode(key), percent_decode(value));
    }
    out
}

/// Decode an `application/x-www-form-urlencoded` body into a map.
pub fn decode_form(input: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for pair in input.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        out.insert(
            percent_decode(&key.replace('+', " ")),
            percent_decode(&value.replace('+', " ")),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain() {
        let u = URL::parse("https://example.com");
        assert_eq!(u.protocol, "https");
        assert_eq!(u.host, "example.com");
        assert_eq!(u.port, 443);
        assert_eq!(u.path, "/");
    }

    #[test]
    fn with_port() {
        let u = URL::parse("https://example.com:8080");
        assert_eq!(u.host, "example.com:8080");
        assert_eq!(u.port, 8080);
    }

    #[test]
    fn with_query_and_fragment() {
        let u = URL::parse("https://example.com/search?q=openai#top");
        assert_eq!(u.protocol, "https");
        assert_eq!(u.host, "example.com");
        assert_eq!(u.path, "/search");
        assert_eq!(u.queries.get("q").map(String::as_str), Some("openai"));
        assert_eq!(u.fragment, "top");
    }

    #[test]
    fn fragment_before_query_wins() {
        let u = URL::parse("http://h/p#frag?notquery");
        assert_eq!(u.path, "/p");
        assert_eq!(u.fragment, "frag?notquery");
        assert!(u.queries.is_empty());
    }

    #[test]
    fn ipv6_host() {
        let u = URL::parse("http://[2001:db8::1]:8080/admin");
        assert_eq!(u.host, "[2001:db8::1]:8080");
        assert_eq!(u.port, 8080);
        assert_eq!(u.path, "/admin");
    }

    #[test]
    fn path_only() {
        let u = URL::parse("/test?id=7");
        assert_eq!(u.host, "");
        assert_eq!(u.path, "/test");
        assert_eq!(u.full_path, "/test?id=7");
        assert_eq!(u.queries.get("id").map(String::as_str), Some("7"));
    }

    #[test]
    fn percent_round_trip() {
        let s = "a b/c?d&e=f%";
        assert_eq!(percent_decode(&percent_encode(s)), s);
    }

    #[test]
    fn decode_is_idempotent_on_decoded() {
        let once = percent_decode("a%20b%2Fc");
        assert_eq!(once, "a b/c");
        assert_eq!(percent_decode(&once), once);
    }

    #[test]
    fn form_decoding() {
        let form = decode_form("name=John+Doe&age=30&city=New%20York");
        assert_eq!(form.get("name").map(String::as_str), Some("John Doe"));
        assert_eq!(form.get("age").map(String::as_str), Some("30"));
        assert_eq!(form.get("city").map(String::as_str), Some("New York"));
    }

    #[test]
    fn full_path_round_trip() {
        let u = URL::parse("http://h:1/p/q?a=1&b=x%20y#frag");
        let again = URL::parse(&u.full_path);
        assert_eq!(again.path, u.path);
        assert_eq!(again.queries, u.queries);
        assert_eq!(again.fragment, u.fragment);
    }
}
