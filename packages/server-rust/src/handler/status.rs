//! Mapping handler failures to HTTP status codes.

use std::fmt;

use http::StatusCode;
use protowire_core::Message;

// ---------------------------------------------------------------------------
// HandlerError
// ---------------------------------------------------------------------------

/// Error type a fallible handler may return.
///
/// Implementors opt into choosing the response status by overriding
/// [`status_code`](HandlerError::status_code); errors without it map to
/// `500 Internal Server Error`.
pub trait HandlerError: fmt::Display + fmt::Debug + Send + Sync + 'static {
    /// Status code to respond with, if this error carries one.
    fn status_code(&self) -> Option<StatusCode> {
        None
    }
}

/// Boxed handler error as stored by the dispatcher.
pub type BoxHandlerError = Box<dyn HandlerError>;

/// Returns the status a handler error maps to.
#[must_use]
pub fn status_for(err: &dyn HandlerError) -> StatusCode {
    err.status_code()
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

impl HandlerError for anyhow::Error {}

impl HandlerError for std::io::Error {}

impl HandlerError for BoxHandlerError {
    fn status_code(&self) -> Option<StatusCode> {
        (**self).status_code()
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Handler error with an explicit response status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    #[must_use]
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl HandlerError for Status {
    fn status_code(&self) -> Option<StatusCode> {
        Some(self.code)
    }
}

// ---------------------------------------------------------------------------
// IntoReply
// ---------------------------------------------------------------------------

/// Conversion from a handler's return value into a reply.
///
/// Implemented for a bare message (infallible handlers) and for
/// `Result<M, E>` with `E: HandlerError` (fallible handlers).
pub trait IntoReply<M> {
    /// Whether this return shape carries an error.
    const FALLIBLE: bool;

    /// Splits the return value into the response message or the error.
    ///
    /// # Errors
    ///
    /// Returns the handler's error, boxed.
    fn into_reply(self) -> Result<M, BoxHandlerError>;
}

impl<M: Message> IntoReply<M> for M {
    const FALLIBLE: bool = false;

    fn into_reply(self) -> Result<M, BoxHandlerError> {
        Ok(self)
    }
}

impl<M: Message, E: HandlerError> IntoReply<M> for Result<M, E> {
    const FALLIBLE: bool = true;

    fn into_reply(self) -> Result<M, BoxHandlerError> {
        self.map_err(|err| Box::new(err) as BoxHandlerError)
    }
}
