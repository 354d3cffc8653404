use std::fmt::{self, Write};
use std::path::Path;

/// Response statuses the server produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    BadRequest,
    Forbidden,
    NotFound,
    InternalError,
}

impl StatusCode {
    pub fn code(self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::InternalError => 500,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::InternalError => "Internal Error",
        }
    }

    /// Short HTML body sent with error statuses.
    pub fn error_page(self) -> Option<&'static str> {
        match self {
            StatusCode::Ok => None,
            StatusCode::BadRequest => Some(
                "Your request has bad syntax or is inherently impossible to satisfy.\n",
            ),
            StatusCode::Forbidden => {
                Some("You do not have permission to get file from this server.\n")
            }
            StatusCode::NotFound => Some("The requested file was not found on this server.\n"),
            StatusCode::InternalError => {
                Some("There was an unusual problem serving the request file.\n")
            }
        }
    }

    pub fn is_error(self) -> bool {
        self != StatusCode::Ok
    }
}

/// Body sent for an empty static file.
pub const EMPTY_BODY: &str = "<html><body></body></html>";

/// Fixed-capacity buffer the response head is formatted into.
///
/// Writes that would not fit are refused and leave the buffer unchanged.
pub struct ResponseBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl ResponseBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Appends formatted text. Returns `false` if it does not fit.
    pub fn add(&mut self, args: fmt::Arguments<'_>) -> bool {
        let mark = self.data.len();

        if self.write_fmt(args).is_err() {
            self.data.truncate(mark);
            return false;
        }
        true
    }

    pub fn add_status_line(&mut self, status: StatusCode) -> bool {
        self.add(format_args!("HTTP/1.1 {} {}\r\n", status.code(), status.reason()))
    }

    pub fn add_headers(&mut self, content_length: usize, content_type: &str, keep_alive: bool) -> bool {
        let connection = if keep_alive { "keep-alive" } else { "close" };

        self.add(format_args!(
            "Content-Length: {content_length}\r\nContent-Type: {content_type}\r\nConnection: {connection}\r\n\r\n"
        ))
    }

    pub fn add_content(&mut self, content: &str) -> bool {
        self.add(format_args!("{content}"))
    }
}

impl Write for ResponseBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.data.len() + s.len() > self.capacity {
            return Err(fmt::Error);
        }
        self.data.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

/// Guesses a `Content-Type` from a file extension.
pub fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_is_formatted() {
        let mut buffer = ResponseBuffer::new(1024);
        assert!(buffer.add_status_line(StatusCode::NotFound));
        assert!(buffer.add_headers(12, "text/html", false));

        assert_eq!(
            std::str::from_utf8(buffer.as_bytes()).unwrap(),
            "HTTP/1.1 404 Not Found\r\nContent-Length: 12\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n"
        );
    }

    #[test]
    fn overflow_is_refused_and_rolled_back() {
        let mut buffer = ResponseBuffer::new(20);
        assert!(buffer.add_status_line(StatusCode::Ok));
        let len = buffer.len();

        assert!(!buffer.add_content("this will never fit in twenty bytes"));
        assert_eq!(buffer.len(), len);
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type(Path::new("/judge.html")), "text/html");
        assert_eq!(content_type(Path::new("/a/B.PNG")), "image/png");
        assert_eq!(content_type(Path::new("/video")), "application/octet-stream");
    }
}
