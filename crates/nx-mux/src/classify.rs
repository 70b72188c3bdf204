//! First-bytes protocol classification
//!
//! Predicates run in a fixed order: SSH identification string, then an
//! HTTP/1.x request line, then the shell catch-all.

use std::fmt;

/// SSH identification string prefix (RFC 4253 section 4.2)
pub const SSH_PREFIX: &[u8] = b"SSH-";

/// Request methods accepted as HTTP, WebDAV extensions included
pub const HTTP_METHODS: &[&str] = &[
    "GET", "HEAD", "POST", "PUT", "DELETE", "CONNECT", "OPTIONS", "TRACE", "PATCH", "PROPFIND",
    "PROPPATCH", "MKCOL", "COPY", "MOVE", "LOCK", "UNLOCK",
];

/// Protocol a connection is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolClass {
    /// SSH client
    Ssh,
    /// HTTP/1.x or WebDAV client
    Http,
    /// Anything else, typically a reverse shell
    Shell,
}

impl fmt::Display for ProtocolClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ssh => write!(f, "ssh"),
            Self::Http => write!(f, "http"),
            Self::Shell => write!(f, "shell"),
        }
    }
}

/// Outcome of looking at a possibly incomplete prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The prefix already determines the class
    Decided(ProtocolClass),
    /// More bytes could change the answer
    NeedMore,
}

/// Classify `prefix`, asking for more bytes while the answer is still open
///
/// A prefix of `max` bytes or more is always decided.
#[must_use]
pub fn inspect(prefix: &[u8], max: usize) -> Verdict {
    if prefix.starts_with(SSH_PREFIX) {
        return Verdict::Decided(ProtocolClass::Ssh);
    }

    let verdict = match http_state(prefix) {
        HttpState::RequestLine => Verdict::Decided(ProtocolClass::Http),
        HttpState::No if SSH_PREFIX.starts_with(prefix) => Verdict::NeedMore,
        HttpState::No => Verdict::Decided(ProtocolClass::Shell),
        HttpState::PartialMethod | HttpState::OpenLine => Verdict::NeedMore,
    };

    match verdict {
        Verdict::NeedMore if prefix.len() >= max => Verdict::Decided(classify(prefix)),
        other => other,
    }
}

/// Final classification once no more bytes will arrive
///
/// A known method followed by a space is HTTP even without a complete
/// request line; everything undecided falls back to shell.
#[must_use]
pub fn classify(prefix: &[u8]) -> ProtocolClass {
    if prefix.starts_with(SSH_PREFIX) {
        return ProtocolClass::Ssh;
    }
    match http_state(prefix) {
        HttpState::RequestLine | HttpState::OpenLine => ProtocolClass::Http,
        HttpState::No | HttpState::PartialMethod => ProtocolClass::Shell,
    }
}

enum HttpState {
    /// Cannot be an HTTP request
    No,
    /// Could still grow into a known method
    PartialMethod,
    /// Known method and a space, line not finished
    OpenLine,
    /// Complete, well-formed request line
    RequestLine,
}

fn http_state(prefix: &[u8]) -> HttpState {
    let Some(space) = prefix.iter().position(|&b| b == b' ') else {
        let could_be_method = HTTP_METHODS.iter().any(|m| m.as_bytes().starts_with(prefix));
        return if could_be_method {
            HttpState::PartialMethod
        } else {
            HttpState::No
        };
    };

    if !is_method(&prefix[..space]) {
        return HttpState::No;
    }

    match prefix.iter().position(|&b| b == b'\n') {
        None => HttpState::OpenLine,
        Some(end) if is_request_line(&prefix[..end]) => HttpState::RequestLine,
        Some(_) => HttpState::No,
    }
}

fn is_method(token: &[u8]) -> bool {
    HTTP_METHODS.iter().any(|m| m.as_bytes() == token)
}

fn is_request_line(line: &[u8]) -> bool {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let mut parts = line.split(|&b| b == b' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    is_method(method) && !target.is_empty() && matches!(version, b"HTTP/1.0" | b"HTTP/1.1")
}
