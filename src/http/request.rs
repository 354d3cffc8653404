use std::fmt;

/// Request methods recognised on the request line.
///
/// Only `GET` and `POST` get special treatment; the others are served as
/// plain static lookups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Method {
    #[default]
    Get,
    Post,
    Head,
    Put,
    Delete,
    Trace,
    Options,
    Connect,
    Patch,
}

impl Method {
    /// Parses a method token, ignoring ASCII case.
    pub fn parse(token: &str) -> Option<Method> {
        const ALL: [Method; 9] = [
            Method::Get,
            Method::Post,
            Method::Head,
            Method::Put,
            Method::Delete,
            Method::Trace,
            Method::Options,
            Method::Connect,
            Method::Patch,
        ];

        ALL.into_iter()
            .find(|method| method.as_str().eq_ignore_ascii_case(token))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Trace => "TRACE",
            Method::Options => "OPTIONS",
            Method::Connect => "CONNECT",
            Method::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Version {
    Http10,
    #[default]
    Http11,
}

impl Version {
    pub fn parse(token: &str) -> Option<Version> {
        if token.eq_ignore_ascii_case("HTTP/1.1") {
            Some(Version::Http11)
        } else if token.eq_ignore_ascii_case("HTTP/1.0") {
            Some(Version::Http10)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

/// The fields extracted from one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub method: Method,

    /// Path part of the target, always starting with `/`.
    pub url: String,

    pub version: Version,

    pub host: Option<String>,

    /// Declared `Content-Length`, zero when absent.
    pub content_length: usize,

    /// The client sent `Connection: keep-alive`.
    pub keep_alive: bool,

    pub body: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn methods_are_case_insensitive() {
        assert_eq!(Method::parse("get"), Some(Method::Get));
        assert_eq!(Method::parse("Post"), Some(Method::Post));
        assert_eq!(Method::parse("PATCH"), Some(Method::Patch));
        assert_eq!(Method::parse("BREW"), None);
    }

    #[test]
    fn versions() {
        assert_eq!(Version::parse("http/1.0"), Some(Version::Http10));
        assert_eq!(Version::parse("HTTP/1.1"), Some(Version::Http11));
        assert_eq!(Version::parse("HTTP/2"), None);
    }
}
