//! Lifecycle hooks fired by the dispatcher.
//!
//! Every hook is optional; an unset hook costs one `Option` check. The
//! default set ([`Hooks::tracing`]) logs through `tracing` and counts
//! finished requests through the `metrics` facade.

use std::backtrace::Backtrace;
use std::fmt;
use std::sync::Arc;

use http::{Method, StatusCode, Uri};
use tracing::{debug, error, info, trace, warn};

use crate::handler::RequestContext;

type StartFn = dyn Fn(&RequestContext, &Method, &Uri) + Send + Sync;
type EndFn = dyn Fn(&RequestContext, &Method, &Uri, StatusCode) + Send + Sync;
type MessageFn = dyn Fn(&RequestContext, &dyn fmt::Debug) + Send + Sync;
type BytesFn = dyn Fn(&RequestContext, &[u8]) + Send + Sync;
type JsonFn = dyn Fn(&RequestContext, &str) + Send + Sync;
type ErrorFn = dyn Fn(&RequestContext, &str, &dyn fmt::Display) + Send + Sync;
type PanicFn = dyn Fn(&RequestContext, &str, &Backtrace) + Send + Sync;
type ErrorBodyFn = dyn Fn(&RequestContext, StatusCode) -> String + Send + Sync;

/// Name of the counter incremented by the default end-of-request hook.
pub const REQUESTS_TOTAL: &str = "protowire_requests_total";

/// Observability callbacks for one endpoint.
///
/// Cheap to clone; callbacks are shared through `Arc`.
#[derive(Clone, Default)]
pub struct Hooks {
    start_request: Option<Arc<StartFn>>,
    end_request: Option<Arc<EndFn>>,
    request_message: Option<Arc<MessageFn>>,
    response_message: Option<Arc<MessageFn>>,
    request_bytes: Option<Arc<BytesFn>>,
    response_bytes: Option<Arc<BytesFn>>,
    request_json: Option<Arc<JsonFn>>,
    response_json: Option<Arc<JsonFn>>,
    error: Option<Arc<ErrorFn>>,
    panic: Option<Arc<PanicFn>>,
    error_body: Option<Arc<ErrorBodyFn>>,
}

impl Hooks {
    /// No hooks at all. Equivalent to `Hooks::default()`.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Logs every lifecycle event with `tracing` and increments
    /// [`REQUESTS_TOTAL`] labelled by status when a request finishes.
    ///
    /// Raw bytes are logged hex-encoded at `TRACE`. Error bodies stay empty.
    #[must_use]
    pub fn tracing() -> Self {
        Self::none()
            .on_start_request(|ctx, method, uri| {
                debug!(request_id = ctx.request_id, %method, %uri, "request started");
            })
            .on_end_request(|ctx, method, uri, status| {
                info!(
                    request_id = ctx.request_id,
                    %method,
                    %uri,
                    status = status.as_u16(),
                    "request finished"
                );
                metrics::counter!(REQUESTS_TOTAL, "status" => status.as_u16().to_string())
                    .increment(1);
            })
            .on_request_message(|ctx, msg| {
                debug!(request_id = ctx.request_id, message = ?msg, "request message");
            })
            .on_response_message(|ctx, msg| {
                debug!(request_id = ctx.request_id, message = ?msg, "response message");
            })
            .on_request_bytes(|ctx, bytes| {
                trace!(request_id = ctx.request_id, bytes = %hex::encode(bytes), "request bytes");
            })
            .on_response_bytes(|ctx, bytes| {
                trace!(request_id = ctx.request_id, bytes = %hex::encode(bytes), "response bytes");
            })
            .on_request_json(|ctx, json| {
                trace!(request_id = ctx.request_id, json, "request json");
            })
            .on_response_json(|ctx, json| {
                trace!(request_id = ctx.request_id, json, "response json");
            })
            .on_error(|ctx, tag, err| {
                warn!(request_id = ctx.request_id, tag, error = %err, "request failed");
            })
            .on_panic(|ctx, payload, backtrace| {
                error!(
                    request_id = ctx.request_id,
                    panic = payload,
                    backtrace = %backtrace,
                    "handler panicked"
                );
            })
    }

    // -----------------------------------------------------------------------
    // Builder setters
    // -----------------------------------------------------------------------

    /// Fired first for every request, before the method check.
    #[must_use]
    pub fn on_start_request(
        mut self,
        f: impl Fn(&RequestContext, &Method, &Uri) + Send + Sync + 'static,
    ) -> Self {
        self.start_request = Some(Arc::new(f));
        self
    }

    /// Fired last for every request with the final status, including after
    /// a contained panic.
    #[must_use]
    pub fn on_end_request(
        mut self,
        f: impl Fn(&RequestContext, &Method, &Uri, StatusCode) + Send + Sync + 'static,
    ) -> Self {
        self.end_request = Some(Arc::new(f));
        self
    }

    /// Fired with the decoded request message.
    #[must_use]
    pub fn on_request_message(
        mut self,
        f: impl Fn(&RequestContext, &dyn fmt::Debug) + Send + Sync + 'static,
    ) -> Self {
        self.request_message = Some(Arc::new(f));
        self
    }

    /// Fired with the handler's response before it is encoded.
    #[must_use]
    pub fn on_response_message(
        mut self,
        f: impl Fn(&RequestContext, &dyn fmt::Debug) + Send + Sync + 'static,
    ) -> Self {
        self.response_message = Some(Arc::new(f));
        self
    }

    /// Fired with a protobuf request body before it is decoded.
    #[must_use]
    pub fn on_request_bytes(
        mut self,
        f: impl Fn(&RequestContext, &[u8]) + Send + Sync + 'static,
    ) -> Self {
        self.request_bytes = Some(Arc::new(f));
        self
    }

    /// Fired with an encoded protobuf response body.
    #[must_use]
    pub fn on_response_bytes(
        mut self,
        f: impl Fn(&RequestContext, &[u8]) + Send + Sync + 'static,
    ) -> Self {
        self.response_bytes = Some(Arc::new(f));
        self
    }

    /// Fired with a JSON request body before it is decoded. Invalid UTF-8 is
    /// replaced lossily.
    #[must_use]
    pub fn on_request_json(
        mut self,
        f: impl Fn(&RequestContext, &str) + Send + Sync + 'static,
    ) -> Self {
        self.request_json = Some(Arc::new(f));
        self
    }

    /// Fired with an encoded JSON response body.
    #[must_use]
    pub fn on_response_json(
        mut self,
        f: impl Fn(&RequestContext, &str) + Send + Sync + 'static,
    ) -> Self {
        self.response_json = Some(Arc::new(f));
        self
    }

    /// Fired for every non-panic failure. `tag` names the stage:
    /// `content-type`, `body.read`, `protobuf.decode`, `json.decode`,
    /// `handler`, `protobuf.encode`, `json.encode` or `response.write`.
    #[must_use]
    pub fn on_error(
        mut self,
        f: impl Fn(&RequestContext, &str, &dyn fmt::Display) + Send + Sync + 'static,
    ) -> Self {
        self.error = Some(Arc::new(f));
        self
    }

    /// Fired when the handler (or any stage) panics, with the panic payload
    /// rendered as text and a backtrace captured at the containment point.
    ///
    /// The backtrace is taken after the stack has unwound, so it shows the
    /// dispatcher frames that caught the panic and not the panic site. It is
    /// captured regardless of `RUST_BACKTRACE`. For the originating frames,
    /// install a process-wide hook with [`std::panic::set_hook`].
    #[must_use]
    pub fn on_panic(
        mut self,
        f: impl Fn(&RequestContext, &str, &Backtrace) + Send + Sync + 'static,
    ) -> Self {
        self.panic = Some(Arc::new(f));
        self
    }

    /// Produces the body sent with a failure status. An empty string sends no
    /// body.
    #[must_use]
    pub fn error_body(
        mut self,
        f: impl Fn(&RequestContext, StatusCode) -> String + Send + Sync + 'static,
    ) -> Self {
        self.error_body = Some(Arc::new(f));
        self
    }

    // -----------------------------------------------------------------------
    // Firing
    // -----------------------------------------------------------------------

    pub(crate) fn start_request(&self, ctx: &RequestContext) {
        if let Some(f) = &self.start_request {
            f(ctx, &ctx.method, &ctx.uri);
        }
    }

    pub(crate) fn end_request(&self, ctx: &RequestContext, status: StatusCode) {
        if let Some(f) = &self.end_request {
            f(ctx, &ctx.method, &ctx.uri, status);
        }
    }

    pub(crate) fn request_message(&self, ctx: &RequestContext, msg: &dyn fmt::Debug) {
        if let Some(f) = &self.request_message {
            f(ctx, msg);
        }
    }

    pub(crate) fn response_message(&self, ctx: &RequestContext, msg: &dyn fmt::Debug) {
        if let Some(f) = &self.response_message {
            f(ctx, msg);
        }
    }

    pub(crate) fn request_bytes(&self, ctx: &RequestContext, bytes: &[u8]) {
        if let Some(f) = &self.request_bytes {
            f(ctx, bytes);
        }
    }

    pub(crate) fn response_bytes(&self, ctx: &RequestContext, bytes: &[u8]) {
        if let Some(f) = &self.response_bytes {
            f(ctx, bytes);
        }
    }

    pub(crate) fn request_json(&self, ctx: &RequestContext, body: &[u8]) {
        if let Some(f) = &self.request_json {
            f(ctx, &String::from_utf8_lossy(body));
        }
    }

    pub(crate) fn response_json(&self, ctx: &RequestContext, body: &[u8]) {
        if let Some(f) = &self.response_json {
            f(ctx, &String::from_utf8_lossy(body));
        }
    }

    pub(crate) fn error(&self, ctx: &RequestContext, tag: &str, err: &dyn fmt::Display) {
        if let Some(f) = &self.error {
            f(ctx, tag, err);
        }
    }

    pub(crate) fn panic(&self, ctx: &RequestContext, payload: &str, backtrace: &Backtrace) {
        if let Some(f) = &self.panic {
            f(ctx, payload, backtrace);
        }
    }

    pub(crate) fn render_error_body(&self, ctx: &RequestContext, status: StatusCode) -> String {
        self.error_body
            .as_ref()
            .map(|f| f(ctx, status))
            .unwrap_or_default()
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("start_request", &self.start_request.is_some())
            .field("end_request", &self.end_request.is_some())
            .field("request_message", &self.request_message.is_some())
            .field("response_message", &self.response_message.is_some())
            .field("request_bytes", &self.request_bytes.is_some())
            .field("response_bytes", &self.response_bytes.is_some())
            .field("request_json", &self.request_json.is_some())
            .field("response_json", &self.response_json.is_some())
            .field("error", &self.error.is_some())
            .field("panic", &self.panic.is_some())
            .field("error_body", &self.error_body.is_some())
            .finish()
    }
}
