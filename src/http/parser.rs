//! Incremental HTTP/1.x request parser.
//!
//! Bytes are appended to a fixed-size buffer as they arrive. Each call to
//! [`RequestParser::parse`] resumes from the first unchecked byte, so a
//! request split across any number of reads is scanned exactly once and
//! produces the same result as if it had arrived in one piece.

use super::request::{Method, Request, Version};

use std::ops::Range;

/// Outcome of a request-processing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpCode {
    /// More input is needed.
    NoRequest,

    /// A complete request has been parsed.
    GetRequest,

    /// The request is malformed; answer 400 and close.
    BadRequest,

    /// The target does not exist (404).
    NoResource,

    /// The target may not be read (403).
    Forbidden,

    /// A static file is mapped and ready to send.
    FileRequest,

    /// The server failed while resolving the request (500).
    InternalError,

    /// The peer closed the connection.
    ClosedConnection,
}

/// Result of scanning for the next line terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    /// A full `\r\n`-terminated line is available.
    Ok,

    /// The input is malformed.
    Bad,

    /// No terminator yet.
    Open,
}

/// Which part of the request is expected next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    RequestLine,
    Headers,
    Content,
    Done,
}

/// Streaming parser over a fixed-capacity read buffer.
pub struct RequestParser {
    buf: Box<[u8]>,

    /// One past the last byte received.
    read_idx: usize,

    /// One past the last byte scanned.
    checked_idx: usize,

    /// Start of the line being assembled.
    start_line: usize,

    state: CheckState,

    request: Request,
}

impl RequestParser {
    /// Creates a parser whose buffer holds `capacity` bytes.
    ///
    /// The capacity bounds the request head and body together.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity].into_boxed_slice(),
            read_idx: 0,
            checked_idx: 0,
            start_line: 0,
            state: CheckState::RequestLine,
            request: Request::default(),
        }
    }

    /// Free space at the end of the buffer, to read into.
    pub fn spare(&mut self) -> &mut [u8] {
        &mut self.buf[self.read_idx..]
    }

    /// Marks `n` bytes of [`spare`](Self::spare) as received.
    pub fn advance(&mut self, n: usize) {
        self.read_idx = (self.read_idx + n).min(self.buf.len());
    }

    /// Copies as much of `bytes` as fits and returns how much was taken.
    pub fn feed(&mut self, bytes: &[u8]) -> usize {
        let spare = self.spare();
        let n = spare.len().min(bytes.len());
        spare[..n].copy_from_slice(&bytes[..n]);
        self.advance(n);
        n
    }

    pub fn is_full(&self) -> bool {
        self.read_idx == self.buf.len()
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of buffered bytes.
    pub fn buffered(&self) -> usize {
        self.read_idx
    }

    pub fn state(&self) -> CheckState {
        self.state
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Parses everything buffered since the last call.
    ///
    /// Returns [`HttpCode::NoRequest`] while the request is incomplete,
    /// [`HttpCode::GetRequest`] once it is complete and
    /// [`HttpCode::BadRequest`] as soon as it is known to be malformed.
    pub fn parse(&mut self) -> HttpCode {
        loop {
            match self.state {
                CheckState::Done => return HttpCode::GetRequest,
                CheckState::Content => return self.parse_content(),
                CheckState::RequestLine | CheckState::Headers => {}
            }

            let line = match self.parse_line() {
                (LineStatus::Ok, line) => line,
                (LineStatus::Open, _) if self.is_full() => return HttpCode::BadRequest,
                (LineStatus::Open, _) => return HttpCode::NoRequest,
                (LineStatus::Bad, _) => return HttpCode::BadRequest,
            };
            self.start_line = self.checked_idx;

            let code = match self.state {
                CheckState::RequestLine => self.parse_request_line(line),
                _ => self.parse_header(line),
            };

            if code != HttpCode::NoRequest {
                return code;
            }
        }
    }

    /// Scans for the next `\r\n`.
    ///
    /// On success the returned range is the line without its terminator and
    /// `checked_idx` points past the terminator. A trailing `\r` leaves
    /// `checked_idx` on it so that the next call sees the `\n`.
    fn parse_line(&mut self) -> (LineStatus, Range<usize>) {
        while self.checked_idx < self.read_idx {
            let i = self.checked_idx;

            match self.buf[i] {
                b'\r' => {
                    if i + 1 == self.read_idx {
                        return (LineStatus::Open, 0..0);
                    }
                    if self.buf[i + 1] == b'\n' {
                        self.checked_idx = i + 2;
                        return (LineStatus::Ok, self.start_line..i);
                    }
                    return (LineStatus::Bad, 0..0);
                }
                b'\n' => return (LineStatus::Bad, 0..0),
                _ => self.checked_idx += 1,
            }
        }

        (LineStatus::Open, 0..0)
    }

    /// `METHOD SP URL SP VERSION`, separators being runs of spaces or tabs.
    fn parse_request_line(&mut self, line: Range<usize>) -> HttpCode {
        let Ok(text) = std::str::from_utf8(&self.buf[line]) else {
            return HttpCode::BadRequest;
        };

        let is_sep = |c: char| c == ' ' || c == '\t';

        let Some((method, rest)) = text.split_once(is_sep) else {
            return HttpCode::BadRequest;
        };
        let Some((url, version)) = rest.trim_start_matches(is_sep).split_once(is_sep) else {
            return HttpCode::BadRequest;
        };
        let version = version.trim_start_matches(is_sep);

        let Some(method) = Method::parse(method) else {
            return HttpCode::BadRequest;
        };
        let Some(version) = Version::parse(version) else {
            return HttpCode::BadRequest;
        };
        let Some(url) = strip_scheme(url) else {
            return HttpCode::BadRequest;
        };

        self.request.method = method;
        self.request.version = version;
        self.request.url = url.to_string();
        self.state = CheckState::Headers;

        HttpCode::NoRequest
    }

    fn parse_header(&mut self, line: Range<usize>) -> HttpCode {
        if line.is_empty() {
            return self.end_of_headers();
        }

        let Ok(text) = std::str::from_utf8(&self.buf[line]) else {
            return HttpCode::BadRequest;
        };
        let Some((name, value)) = text.split_once(':') else {
            return HttpCode::BadRequest;
        };
        let value = value.trim_start_matches([' ', '\t']);

        if name.eq_ignore_ascii_case("connection") {
            if value.eq_ignore_ascii_case("keep-alive") {
                self.request.keep_alive = true;
            }
        } else if name.eq_ignore_ascii_case("content-length") {
            match value.trim_end().parse::<usize>() {
                Ok(length) if length <= self.buf.len() => self.request.content_length = length,
                _ => return HttpCode::BadRequest,
            }
        } else if name.eq_ignore_ascii_case("host") {
            self.request.host = Some(value.to_string());
        } else {
            tracing::debug!(header = name, "unknown header");
        }

        HttpCode::NoRequest
    }

    fn end_of_headers(&mut self) -> HttpCode {
        let length = self.request.content_length;

        if length == 0 {
            self.state = CheckState::Done;
            return HttpCode::GetRequest;
        }

        // The body has to fit behind the head in the same buffer.
        if length > self.buf.len() - self.checked_idx {
            return HttpCode::BadRequest;
        }

        self.state = CheckState::Content;
        self.parse_content()
    }

    fn parse_content(&mut self) -> HttpCode {
        let end = self.checked_idx + self.request.content_length;
        if self.read_idx < end {
            return HttpCode::NoRequest;
        }

        self.request.body = self.buf[self.checked_idx..end].to_vec();
        self.checked_idx = end;
        self.start_line = end;
        self.state = CheckState::Done;

        HttpCode::GetRequest
    }

    /// Prepares for the next request on the same connection.
    ///
    /// Bytes received after the end of the current request are kept and
    /// moved to the front of the buffer.
    pub fn reset(&mut self) {
        let leftover = self.checked_idx..self.read_idx;
        let kept = leftover.len();

        self.buf.copy_within(leftover, 0);
        self.read_idx = kept;
        self.checked_idx = 0;
        self.start_line = 0;
        self.state = CheckState::RequestLine;
        self.request = Request::default();
    }

    /// Drops everything, including buffered bytes.
    pub fn clear(&mut self) {
        self.read_idx = 0;
        self.checked_idx = 0;
        self.start_line = 0;
        self.state = CheckState::RequestLine;
        self.request = Request::default();
    }
}

/// Strips an absolute-form `http://host` or `https://host` prefix.
///
/// Returns `None` unless what remains starts with `/`.
fn strip_scheme(url: &str) -> Option<&str> {
    let lower = url.get(..8).map(str::to_ascii_lowercase).unwrap_or_default();

    let path = if lower.starts_with("http://") {
        &url[7..]
    } else if lower.starts_with("https://") {
        &url[8..]
    } else {
        url
    };

    let path = if path.starts_with('/') {
        path
    } else if path.len() != url.len() {
        &path[path.find('/')?..]
    } else {
        return None;
    };

    Some(path)
}
