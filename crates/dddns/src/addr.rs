//! Address classification and literal cleanup.
//!
//! Pure helpers shared by the session bootstrap, the heartbeat engine and the
//! sync recovery path. Addresses are treated as opaque strings with an IPv4
//! private-range classifier; IPv6 literals are out of scope and classify as
//! non-private.

use std::net::Ipv4Addr;

/// Returns `true` iff `addr` parses as IPv4 and falls inside RFC 1918
/// space (`10.0.0.0/8`, `172.16.0.0/12`, `192.168.0.0/16`) or the
/// loopback block (`127.0.0.0/8`).
///
/// Anything that does not parse as IPv4 returns `false`.
pub fn is_private_addr(addr: &str) -> bool {
    let ip: Ipv4Addr = match addr.parse() {
        Ok(ip) => ip,
        Err(_) => return false,
    };
    let o = ip.octets();
    o[0] == 10
        || (o[0] == 172 && (16..=31).contains(&o[1]))
        || (o[0] == 192 && o[1] == 168)
        || o[0] == 127
}

/// Strips a trailing `:port` from a `host:port` literal.
///
/// Deliberately naive: everything after the first `:` is discarded, so
/// bracketed IPv6 literals are not handled. Strings without a `:` are
/// returned unchanged.
pub fn trim_port(s: &str) -> &str {
    match s.find(':') {
        Some(idx) => &s[..idx],
        None => s,
    }
}

/// Normalizes a REST path prefix: leading `/`, no trailing `/`, empty and
/// `.` segments collapsed, `..` segments resolved against their parent.
///
/// Only the path component is ever passed through here. The scheme and
/// authority of a request URL are assembled separately so the cleanup can
/// never collapse the `//` inside `http://`.
pub fn normalize_rest_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut out = String::new();
    for seg in &segments {
        out.push('/');
        out.push_str(seg);
    }
    out
}
