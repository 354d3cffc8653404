//! Per-connection HTTP state machine.
//!
//! A [`ConnectionSession`] owns everything a connection needs: the socket,
//! the read buffer and parser, the response head buffer and the mapped
//! file of the response being sent. It is only ever driven by one handler
//! at a time, and every handler tells its caller what to wait for next
//! through an [`Action`].

use super::file::{FileError, MappedFile};
use super::parser::{HttpCode, RequestParser};
use super::request::Request;
use super::response::{EMPTY_BODY, ResponseBuffer, StatusCode, content_type};
use super::route::{self, Credentials, Route};
use crate::net::TcpStream;
use crate::reactor::poller::TriggerMode;
use crate::store::StorePool;

use std::io::{self, IoSlice};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// What the connection waits for after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Re-arm for read readiness.
    Read,

    /// Re-arm for write readiness; a response is pending.
    Write,

    /// Close the connection.
    Close,

    /// A pipelined request is already buffered; hand the session to
    /// [`ConnectionSession::resume`] without waiting for readiness.
    Process,
}

/// Settings and collaborators shared by every session of a server.
pub struct SessionContext {
    /// Directory static files are served from.
    pub doc_root: PathBuf,

    pub store: Arc<StorePool>,

    /// How long a request waits for a store handle.
    pub store_timeout: Duration,

    pub read_buffer_size: usize,

    pub write_buffer_size: usize,
}

/// Outcome of a read handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadStatus {
    /// Bytes may have been buffered.
    Open,

    /// The peer closed or the socket failed.
    Closed,
}

pub struct ConnectionSession {
    stream: TcpStream,
    peer: SocketAddr,
    trigger: TriggerMode,
    context: Arc<SessionContext>,

    parser: RequestParser,

    /// Status line, headers and, for generated pages, the body.
    head: ResponseBuffer,

    /// Mapped body of a file response.
    file: Option<MappedFile>,

    /// `Content-Type` of `file`.
    body_type: &'static str,

    bytes_to_send: usize,
    bytes_sent: usize,

    /// Keep the connection open once the pending response is sent.
    keep_alive: bool,

    requests: u64,
}

impl ConnectionSession {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        trigger: TriggerMode,
        context: Arc<SessionContext>,
    ) -> Self {
        Self {
            stream,
            peer,
            trigger,
            parser: RequestParser::new(context.read_buffer_size),
            head: ResponseBuffer::new(context.write_buffer_size),
            context,
            file: None,
            body_type: "text/html",
            bytes_to_send: 0,
            bytes_sent: 0,
            keep_alive: false,
            requests: 0,
        }
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn trigger(&self) -> TriggerMode {
        self.trigger
    }

    pub fn request(&self) -> &Request {
        self.parser.request()
    }

    /// Number of responses fully sent on this connection.
    pub fn requests_served(&self) -> u64 {
        self.requests
    }

    /// Whether part of a response is still waiting to be sent.
    pub fn has_pending_response(&self) -> bool {
        self.bytes_to_send > 0
    }

    /// Handles read readiness: reads, parses and prepares a response.
    pub fn on_readable(&mut self) -> Action {
        if self.read_once() == ReadStatus::Closed {
            return Action::Close;
        }
        self.process()
    }

    /// Handles write readiness: resumes the pending response.
    ///
    /// Only sends. Once a keep-alive response is out, bytes of a pipelined
    /// request still in the buffer yield [`Action::Process`], since the
    /// socket will not report them again.
    pub fn on_writable(&mut self) -> Action {
        match self.write() {
            WriteStatus::Pending => return Action::Write,
            WriteStatus::Failed => return Action::Close,
            WriteStatus::Done => {}
        }

        self.unmap();
        self.requests += 1;

        if !self.keep_alive {
            return Action::Close;
        }

        self.parser.reset();

        if self.parser.buffered() == 0 {
            Action::Read
        } else {
            Action::Process
        }
    }

    /// Parses what is already buffered, without reading the socket.
    pub fn resume(&mut self) -> Action {
        self.process()
    }

    /// Reads what is available into the parser buffer.
    ///
    /// Level-triggered connections read once per wake-up; edge-triggered
    /// ones read until the socket would block. A full buffer is left for
    /// the parser to reject.
    fn read_once(&mut self) -> ReadStatus {
        loop {
            if self.parser.is_full() {
                return ReadStatus::Open;
            }

            match self.stream.recv(self.parser.spare()) {
                Ok(0) => return ReadStatus::Closed,
                Ok(n) => {
                    self.parser.advance(n);
                    if self.trigger == TriggerMode::Level {
                        return ReadStatus::Open;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return ReadStatus::Open,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::debug!(peer = %self.peer, error = %e, "read failed");
                    return ReadStatus::Closed;
                }
            }
        }
    }

    /// Parses buffered input and, once a request is complete, builds the
    /// response.
    fn process(&mut self) -> Action {
        let code = self.process_read();
        if code == HttpCode::NoRequest {
            return Action::Read;
        }

        if !self.process_write(code) {
            return Action::Close;
        }
        Action::Write
    }

    fn process_read(&mut self) -> HttpCode {
        match self.parser.parse() {
            HttpCode::GetRequest => {
                let request = self.parser.request();
                tracing::debug!(
                    peer = %self.peer,
                    method = %request.method,
                    url = %request.url,
                    "request"
                );
                self.do_request()
            }
            code => code,
        }
    }

    /// Resolves a parsed request to a file or a form handler.
    fn do_request(&mut self) -> HttpCode {
        let request = self.parser.request();

        let path = match route::route(request.method, &request.url) {
            Route::Page(page) => page.to_string(),
            Route::Static(path) => path,
            Route::Login => match self.submit_form(false) {
                Ok(page) => page.to_string(),
                Err(code) => return code,
            },
            Route::Register => match self.submit_form(true) {
                Ok(page) => page.to_string(),
                Err(code) => return code,
            },
        };

        if route::escapes_root(&path) {
            return HttpCode::Forbidden;
        }

        let target = self.context.doc_root.join(path.trim_start_matches('/'));

        match MappedFile::open(&target) {
            Ok(file) => {
                self.file = Some(file);
                self.body_type = content_type(&target);
                HttpCode::FileRequest
            }
            Err(FileError::Missing) => HttpCode::NoResource,
            Err(FileError::Forbidden) => HttpCode::Forbidden,
            Err(FileError::Directory) => HttpCode::BadRequest,
            Err(FileError::Io(kind)) => {
                tracing::warn!(path = %target.display(), ?kind, "failed to map file");
                HttpCode::InternalError
            }
        }
    }

    /// Runs the login or registration round-trip against the store.
    ///
    /// Exactly one handle is borrowed and it is released on every path when
    /// the guard goes out of scope.
    fn submit_form(&self, register: bool) -> Result<&'static str, HttpCode> {
        let Some(credentials) = Credentials::parse(&self.parser.request().body) else {
            return Ok(if register {
                route::register_page(false)
            } else {
                route::login_page(false)
            });
        };

        let handle = match self.context.store.acquire(self.context.store_timeout) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(error = %e, "store unavailable");
                return Err(HttpCode::InternalError);
            }
        };

        if register {
            let inserted = handle.insert_user(&credentials.user, &credentials.password);
            Ok(route::register_page(inserted))
        } else {
            let accepted = handle.password_of(&credentials.user).as_deref()
                == Some(credentials.password.as_str());
            Ok(route::login_page(accepted))
        }
    }

    /// Formats the response head for `code`.
    ///
    /// Returns `false` when the head does not fit the write buffer.
    fn process_write(&mut self, code: HttpCode) -> bool {
        self.head.clear();
        self.bytes_sent = 0;

        let status = match code {
            HttpCode::FileRequest => StatusCode::Ok,
            HttpCode::BadRequest => StatusCode::BadRequest,
            HttpCode::Forbidden => StatusCode::Forbidden,
            HttpCode::NoResource => StatusCode::NotFound,
            HttpCode::InternalError => StatusCode::InternalError,
            HttpCode::NoRequest | HttpCode::GetRequest | HttpCode::ClosedConnection => {
                return false;
            }
        };

        self.keep_alive = !status.is_error() && self.parser.request().keep_alive;

        let file_len = self.file.as_ref().map_or(0, MappedFile::len);

        let written = if let Some(page) = status.error_page() {
            self.unmap();
            self.head.add_status_line(status)
                && self.head.add_headers(page.len(), "text/html", false)
                && self.head.add_content(page)
        } else if file_len > 0 {
            self.head.add_status_line(status)
                && self.head.add_headers(file_len, self.body_type, self.keep_alive)
        } else {
            self.unmap();
            self.head.add_status_line(status)
                && self.head.add_headers(EMPTY_BODY.len(), "text/html", self.keep_alive)
                && self.head.add_content(EMPTY_BODY)
        };

        if !written {
            tracing::warn!(peer = %self.peer, "response head does not fit the write buffer");
            self.unmap();
            return false;
        }

        self.bytes_to_send = self.head.len() + self.file.as_ref().map_or(0, MappedFile::len);
        true
    }

    /// Sends as much of the pending response as the socket takes.
    fn write(&mut self) -> WriteStatus {
        while self.bytes_sent < self.bytes_to_send {
            let head = self.head.as_bytes();
            let body = self.file.as_ref().map_or(&[][..], MappedFile::as_bytes);

            let result = if self.bytes_sent < head.len() {
                self.stream.send_vectored(&[
                    IoSlice::new(&head[self.bytes_sent..]),
                    IoSlice::new(body),
                ])
            } else {
                self.stream.send(&body[self.bytes_sent - head.len()..])
            };

            match result {
                Ok(n) => self.bytes_sent += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return WriteStatus::Pending,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::debug!(peer = %self.peer, error = %e, "write failed");
                    self.unmap();
                    return WriteStatus::Failed;
                }
            }
        }

        self.bytes_to_send = 0;
        self.bytes_sent = 0;
        WriteStatus::Done
    }

    fn unmap(&mut self) {
        self.file = None;
    }
}

enum WriteStatus {
    Done,
    Pending,
    Failed,
}
