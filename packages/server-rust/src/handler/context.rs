//! Per-request context handed to hooks and context-taking handlers.

use std::sync::atomic::{AtomicU64, Ordering};

use http::{Method, Uri};

/// Monotonic request-id source used purely for log correlation.
///
/// Shared through `Arc` by every endpoint built from the same
/// [`EndpointConfig`](crate::dispatch::EndpointConfig).
#[derive(Debug, Default)]
pub struct RequestIds {
    next: AtomicU64,
}

impl RequestIds {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next id. The first id handed out is 1.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Identity of the request currently being dispatched.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id, unique per [`RequestIds`] source.
    pub request_id: u64,
    /// HTTP method of the inbound request.
    pub method: Method,
    /// Request target as received.
    pub uri: Uri,
}

impl RequestContext {
    #[must_use]
    pub fn new(request_id: u64, method: Method, uri: Uri) -> Self {
        Self {
            request_id,
            method,
            uri,
        }
    }
}
