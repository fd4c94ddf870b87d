//! Response sink used by the dispatcher.

use std::io;

use axum::body::Body;
use http::{HeaderMap, Response, StatusCode};

/// Where the dispatcher writes a response.
///
/// Headers must be set before [`write_status`](Self::write_status); the
/// status must be written before any body bytes.
pub trait ResponseWriter {
    fn headers_mut(&mut self) -> &mut HeaderMap;

    fn write_status(&mut self, status: StatusCode);

    /// Writes some prefix of `buf`, returning how many bytes were accepted.
    ///
    /// # Errors
    ///
    /// Returns the sink's I/O error.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// Writes all of `body`, looping over short writes.
///
/// A write that accepts zero bytes is reported as [`io::ErrorKind::WriteZero`]
/// so a stalled sink cannot spin forever.
pub(crate) fn write_body<W: ResponseWriter + ?Sized>(w: &mut W, mut body: &[u8]) -> io::Result<()> {
    while !body.is_empty() {
        match w.write(body) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => body = &body[n.min(body.len())..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// In-memory [`ResponseWriter`] that converts into an HTTP response.
#[derive(Debug, Default)]
pub struct BufferedResponse {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl BufferedResponse {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Status written so far, or 200 when none was written.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    #[must_use]
    pub fn into_response(self) -> Response<Body> {
        let status = self.status();
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = status;
        *response.headers_mut() = self.headers;
        response
    }
}

impl ResponseWriter for BufferedResponse {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_status(&mut self, status: StatusCode) {
        // First status wins, matching a real socket.
        self.status.get_or_insert(status);
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }
}
