//! Buffered response interception
//!
//! An [`InterceptingResponse`] collects status, header and body writes from
//! every rule in a chain so that later rules observe what earlier rules did.
//! The evaluator commits it onto the real response exactly once with
//! [`InterceptingResponse::flush`]; afterwards every write is rejected.

use bytes::{Bytes, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use httpwall_core::RawResponse;
use std::collections::HashSet;
use thiserror::Error;

/// Contract violations on a response buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResponseError {
    #[error("response already flushed, write rejected")]
    Flushed,

    #[error("response flushed twice")]
    AlreadyFlushed,
}

/// Write surface shared by the interceptor and the raw response
///
/// Rules write through this trait so that the same code path works whether or
/// not an interceptor is available.
pub trait ResponseWriter {
    fn status(&self) -> StatusCode;

    fn set_status(&mut self, status: StatusCode) -> Result<(), ResponseError>;

    fn headers(&self) -> &HeaderMap;

    /// Replace every value of a header
    fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), ResponseError>;

    /// Add a value, keeping the existing ones
    fn append_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), ResponseError>;

    fn remove_header(&mut self, name: &HeaderName) -> Result<(), ResponseError>;

    fn body(&self) -> &[u8];

    fn set_body(&mut self, body: Bytes) -> Result<(), ResponseError>;
}

/// Pick the single response a rule writes to: the interceptor when the chain
/// provides one, the raw response otherwise.
pub fn response_target<'a>(
    intercepted: Option<&'a mut InterceptingResponse>,
    raw: &'a mut RawResponse,
) -> &'a mut dyn ResponseWriter {
    match intercepted {
        Some(intercepted) => intercepted as &mut dyn ResponseWriter,
        None => raw as &mut dyn ResponseWriter,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Flushed,
}

/// State committed to the raw response by a flush
#[derive(Debug, Clone, Default)]
pub struct FlushedResponse {
    /// Status written, if any rule or capture set one
    pub status: Option<StatusCode>,

    /// Headers written; each name replaced every raw value of that name
    pub headers: HeaderMap,

    /// Headers removed from the raw response
    pub removed: Vec<HeaderName>,

    /// Body written, if the buffer was touched
    pub body: Option<Bytes>,
}

/// Per-request response buffer
#[derive(Debug)]
pub struct InterceptingResponse {
    state: State,
    status: Option<StatusCode>,
    headers: HeaderMap,
    removed: HashSet<HeaderName>,
    body: Option<BytesMut>,
}

impl Default for InterceptingResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl InterceptingResponse {
    /// Empty, open buffer
    pub fn new() -> Self {
        Self {
            state: State::Open,
            status: None,
            headers: HeaderMap::new(),
            removed: HashSet::new(),
            body: None,
        }
    }

    /// Buffer everything an application produced, as if it had written its
    /// response through the interceptor.
    pub fn capture(response: RawResponse) -> Self {
        let (parts, body) = response.into_parts();
        Self {
            state: State::Open,
            status: Some(parts.status),
            headers: parts.headers,
            removed: HashSet::new(),
            body: Some(BytesMut::from(&body[..])),
        }
    }

    pub fn is_flushed(&self) -> bool {
        self.state == State::Flushed
    }

    /// First value of a buffered header
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    /// Append to the buffered body
    pub fn write_body(&mut self, chunk: &[u8]) -> Result<(), ResponseError> {
        self.ensure_open()?;
        self.body.get_or_insert_with(BytesMut::new).extend_from_slice(chunk);
        Ok(())
    }

    /// Commit buffered state onto the raw response.
    ///
    /// Headers removed from the buffer are removed from the raw response, then
    /// headers present in the buffer replace all raw values of the same name.
    /// Raw headers the buffer never touched are left alone. The body and status
    /// are only written when the buffer holds them.
    pub fn flush(&mut self, raw: &mut RawResponse) -> Result<FlushedResponse, ResponseError> {
        if self.state == State::Flushed {
            return Err(ResponseError::AlreadyFlushed);
        }
        self.state = State::Flushed;

        if let Some(status) = self.status {
            *raw.status_mut() = status;
        }

        let raw_headers = raw.headers_mut();
        for name in &self.removed {
            raw_headers.remove(name);
        }
        for name in self.headers.keys() {
            raw_headers.remove(name);
            for value in self.headers.get_all(name) {
                raw_headers.append(name.clone(), value.clone());
            }
        }

        let body = self.body.as_ref().map(|buf| Bytes::copy_from_slice(buf));
        if let Some(body) = &body {
            *raw.body_mut() = body.clone();
        }

        Ok(FlushedResponse {
            status: self.status,
            headers: self.headers.clone(),
            removed: self.removed.iter().cloned().collect(),
            body,
        })
    }

    fn ensure_open(&self) -> Result<(), ResponseError> {
        match self.state {
            State::Open => Ok(()),
            State::Flushed => Err(ResponseError::Flushed),
        }
    }
}

impl ResponseWriter for InterceptingResponse {
    fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    fn set_status(&mut self, status: StatusCode) -> Result<(), ResponseError> {
        self.ensure_open()?;
        self.status = Some(status);
        Ok(())
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), ResponseError> {
        self.ensure_open()?;
        self.headers.insert(name, value);
        Ok(())
    }

    fn append_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), ResponseError> {
        self.ensure_open()?;
        self.headers.append(name, value);
        Ok(())
    }

    fn remove_header(&mut self, name: &HeaderName) -> Result<(), ResponseError> {
        self.ensure_open()?;
        self.headers.remove(name);
        self.removed.insert(name.clone());
        Ok(())
    }

    fn body(&self) -> &[u8] {
        self.body.as_deref().unwrap_or_default()
    }

    fn set_body(&mut self, body: Bytes) -> Result<(), ResponseError> {
        self.ensure_open()?;
        self.body = Some(BytesMut::from(&body[..]));
        Ok(())
    }
}

impl ResponseWriter for RawResponse {
    fn status(&self) -> StatusCode {
        http::Response::status(self)
    }

    fn set_status(&mut self, status: StatusCode) -> Result<(), ResponseError> {
        *http::Response::status_mut(self) = status;
        Ok(())
    }

    fn headers(&self) -> &HeaderMap {
        http::Response::headers(self)
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), ResponseError> {
        http::Response::headers_mut(self).insert(name, value);
        Ok(())
    }

    fn append_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), ResponseError> {
        http::Response::headers_mut(self).append(name, value);
        Ok(())
    }

    fn remove_header(&mut self, name: &HeaderName) -> Result<(), ResponseError> {
        http::Response::headers_mut(self).remove(name);
        Ok(())
    }

    fn body(&self) -> &[u8] {
        http::Response::body(self).as_ref()
    }

    fn set_body(&mut self, body: Bytes) -> Result<(), ResponseError> {
        *http::Response::body_mut(self) = body;
        Ok(())
    }
}
