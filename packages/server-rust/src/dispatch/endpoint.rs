//! The dispatcher: one bound handler served as an HTTP endpoint.
//!
//! Every request runs the same state machine:
//!
//! 1. assign a request id and fire the start hook
//! 2. reject anything but `POST` with 405, before touching the body
//! 3. negotiate the wire format from `Content-Type`, 415 on failure
//! 4. read the body, decode it into a pooled message, 500 on failure
//! 5. invoke the handler; a returned error goes through [`status_for`]
//! 6. encode the response, 500 on failure
//! 7. write the response and fire the end hook
//!
//! Steps 1 through 6 run inside a single panic boundary. A panic anywhere in
//! them, start hook included, becomes a 500; the pooled message is still
//! released and the end hook still fires.
//!
//! The [`RequestContext`] is also inserted into the request extensions, so
//! handlers bound with the transport request can read the request id.

use std::any::Any;
use std::backtrace::Backtrace;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use futures_util::FutureExt;
use http::header::{CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use http::request::Parts;
use http::{HeaderValue, Method, Request, Response, StatusCode};
use protowire_core::{Codec, CodecError, Message, MessagePool, ProtobufCodec, WireFormat};
use tower::Service;

use super::config::EndpointConfig;
use super::negotiate::negotiate;
use super::writer::{write_body, BufferedResponse, ResponseWriter};
use crate::handler::{status_for, CallArgs, HandlerDescriptor, RequestContext};

const ERROR_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of dispatching one request, decided before anything is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Encoded response ready to be sent with status 200.
    Success { format: WireFormat, body: Vec<u8> },
    /// Terminal failure with the status to send.
    Failure(StatusCode),
}

impl Outcome {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Success { .. } => StatusCode::OK,
            Self::Failure(status) => *status,
        }
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

struct EndpointInner<Req, Resp> {
    descriptor: HandlerDescriptor<Req, Resp>,
    pool: MessagePool<Req>,
    config: EndpointConfig,
}

/// A bound handler plus everything needed to serve it over HTTP.
///
/// Cloning is cheap and shares the descriptor, pool and configuration.
/// Serves any number of requests concurrently.
pub struct Endpoint<Req, Resp> {
    inner: Arc<EndpointInner<Req, Resp>>,
}

impl<Req, Resp> Clone for Endpoint<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Req, Resp> fmt::Debug for Endpoint<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("descriptor", &self.inner.descriptor)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl<Req: Message, Resp: Message> Endpoint<Req, Resp> {
    /// Serves `descriptor` with [`EndpointConfig::default`].
    #[must_use]
    pub fn new(descriptor: HandlerDescriptor<Req, Resp>) -> Self {
        Self::with_config(descriptor, EndpointConfig::default())
    }

    #[must_use]
    pub fn with_config(descriptor: HandlerDescriptor<Req, Resp>, config: EndpointConfig) -> Self {
        let pool = MessagePool::with_factory(Req::default, config.pool_max_idle);
        Self {
            inner: Arc::new(EndpointInner {
                descriptor,
                pool,
                config,
            }),
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &HandlerDescriptor<Req, Resp> {
        &self.inner.descriptor
    }

    #[must_use]
    pub fn config(&self) -> &EndpointConfig {
        &self.inner.config
    }

    /// Pool of request messages. Exposed for inspection.
    #[must_use]
    pub fn pool(&self) -> &MessagePool<Req> {
        &self.inner.pool
    }

    /// Serves one request into `writer` and returns the status sent.
    pub async fn serve<W>(&self, request: Request<Body>, writer: &mut W) -> StatusCode
    where
        W: ResponseWriter + ?Sized,
    {
        let hooks = &self.inner.config.hooks;
        let (mut parts, body) = request.into_parts();
        let ctx = RequestContext::new(
            self.inner.config.request_ids.next_id(),
            parts.method.clone(),
            parts.uri.clone(),
        );
        parts.extensions.insert(ctx.clone());

        let outcome = match AssertUnwindSafe(self.dispatch(&ctx, &parts, body))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(payload) => {
                let backtrace = Backtrace::force_capture();
                hooks.panic(&ctx, panic_message(payload.as_ref()), &backtrace);
                Outcome::Failure(StatusCode::INTERNAL_SERVER_ERROR)
            }
        };

        let status = self.respond(&ctx, outcome, writer);
        hooks.end_request(&ctx, status);
        status
    }

    async fn dispatch(&self, ctx: &RequestContext, parts: &Parts, body: Body) -> Outcome {
        let config = &self.inner.config;
        let hooks = &config.hooks;
        hooks.start_request(ctx);

        if parts.method != Method::POST {
            return Outcome::Failure(StatusCode::METHOD_NOT_ALLOWED);
        }

        let format = match negotiate(parts.headers.get(CONTENT_TYPE), config.json.is_some()) {
            Ok(format) => format,
            Err(err) => {
                hooks.error(ctx, "content-type", &err);
                return Outcome::Failure(StatusCode::UNSUPPORTED_MEDIA_TYPE);
            }
        };

        let bytes = match axum::body::to_bytes(body, config.body_limit).await {
            Ok(bytes) => bytes,
            Err(err) => {
                hooks.error(ctx, "body.read", &err);
                return Outcome::Failure(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        let reply = {
            let mut message = self.inner.pool.acquire();
            if let Err(err) = self.decode(ctx, format, &bytes, &mut message) {
                hooks.error(ctx, decode_tag(format), &err);
                return Outcome::Failure(StatusCode::INTERNAL_SERVER_ERROR);
            }
            hooks.request_message(ctx, &*message);
            self.inner.descriptor.invoke(CallArgs {
                ctx,
                parts,
                message: &message,
            })
        };

        let response = match reply {
            Ok(response) => response,
            Err(err) => {
                hooks.error(ctx, "handler", &err);
                return Outcome::Failure(status_for(err.as_ref()));
            }
        };

        hooks.response_message(ctx, &response);
        match self.encode(ctx, format, &response) {
            Ok(body) => Outcome::Success { format, body },
            Err(err) => {
                hooks.error(ctx, encode_tag(format), &err);
                Outcome::Failure(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// Fires the raw-body hook, then decodes.
    fn decode(
        &self,
        ctx: &RequestContext,
        format: WireFormat,
        bytes: &[u8],
        msg: &mut Req,
    ) -> Result<(), CodecError> {
        let config = &self.inner.config;
        match format {
            WireFormat::Binary => {
                config.hooks.request_bytes(ctx, bytes);
                ProtobufCodec.decode_into(bytes, msg)
            }
            WireFormat::Json => {
                config.hooks.request_json(ctx, bytes);
                config.json.unwrap_or_default().decode_into(bytes, msg)
            }
        }
    }

    /// Encodes, then fires the raw-body hook.
    fn encode(
        &self,
        ctx: &RequestContext,
        format: WireFormat,
        msg: &Resp,
    ) -> Result<Vec<u8>, CodecError> {
        let config = &self.inner.config;
        match format {
            WireFormat::Binary => {
                let body = ProtobufCodec.encode(msg)?;
                config.hooks.response_bytes(ctx, &body);
                Ok(body)
            }
            WireFormat::Json => {
                let body = config.json.unwrap_or_default().encode(msg)?;
                config.hooks.response_json(ctx, &body);
                Ok(body)
            }
        }
    }

    fn respond<W>(&self, ctx: &RequestContext, outcome: Outcome, writer: &mut W) -> StatusCode
    where
        W: ResponseWriter + ?Sized,
    {
        let hooks = &self.inner.config.hooks;
        let (status, body) = match outcome {
            Outcome::Success { format, body } => {
                writer
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(format.content_type()));
                (StatusCode::OK, body)
            }
            Outcome::Failure(status) => {
                let text = hooks.render_error_body(ctx, status);
                if !text.is_empty() {
                    let headers = writer.headers_mut();
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static(ERROR_CONTENT_TYPE));
                    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
                }
                (status, text.into_bytes())
            }
        };

        writer.write_status(status);
        if let Err(err) = write_body(writer, &body) {
            hooks.error(ctx, "response.write", &err);
        }
        status
    }
}

impl<Req: Message, Resp: Message> Service<Request<Body>> for Endpoint<Req, Resp> {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let endpoint = self.clone();
        Box::pin(async move {
            let mut response = BufferedResponse::new();
            endpoint.serve(request, &mut response).await;
            Ok(response.into_response())
        })
    }
}

fn decode_tag(format: WireFormat) -> &'static str {
    match format {
        WireFormat::Binary => "protobuf.decode",
        WireFormat::Json => "json.decode",
    }
}

fn encode_tag(format: WireFormat) -> &'static str {
    match format {
        WireFormat::Binary => "protobuf.encode",
        WireFormat::Json => "json.encode",
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io;

    use bytes::Bytes;
    use http::HeaderMap;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use protowire_core::hello::{HelloRequest, HelloResponse};
    use tower::ServiceExt;

    use super::*;
    use crate::dispatch::Hooks;
    use crate::handler::Status;

    type Hello = Endpoint<HelloRequest, HelloResponse>;
    type Descriptor = HandlerDescriptor<HelloRequest, HelloResponse>;

    fn greet(req: &HelloRequest) -> HelloResponse {
        if req.name == "panic" {
            panic!("boom");
        }
        HelloResponse {
            text: format!("Hello, {}!", req.name),
        }
    }

    fn hello() -> Hello {
        Hello::with_config(Descriptor::message(greet), quiet())
    }

    /// Like [`hello`] but never panics, whatever the name.
    fn echo() -> Hello {
        Hello::with_config(
            Descriptor::message(|m: &HelloRequest| HelloResponse {
                text: format!("Hello, {}!", m.name),
            }),
            quiet(),
        )
    }

    fn quiet() -> EndpointConfig {
        EndpointConfig::default().with_hooks(Hooks::none())
    }

    fn post(content_type: &str, body: impl Into<Body>) -> Request<Body> {
        Request::post("/hello")
            .header(CONTENT_TYPE, content_type)
            .body(body.into())
            .unwrap()
    }

    fn proto(name: &str) -> Vec<u8> {
        prost::Message::encode_to_vec(&HelloRequest {
            name: name.to_string(),
        })
    }

    async fn send(endpoint: &Hello, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let response = endpoint.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body.to_vec())
    }

    /// Records every hook invocation as a short line.
    fn recorder() -> (Hooks, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = || Arc::clone(&log);
        let (a, b, c, d, e, f, g, h, i, j) = (l(), l(), l(), l(), l(), l(), l(), l(), l(), l());
        let hooks = Hooks::none()
            .on_start_request(move |ctx, method, _| {
                a.lock().push(format!("start {} {method}", ctx.request_id));
            })
            .on_end_request(move |_, _, _, status| b.lock().push(format!("end {}", status.as_u16())))
            .on_request_message(move |_, msg| c.lock().push(format!("request {msg:?}")))
            .on_response_message(move |_, msg| d.lock().push(format!("response {msg:?}")))
            .on_request_bytes(move |_, bytes| e.lock().push(format!("request_bytes {}", bytes.len())))
            .on_response_bytes(move |_, bytes| {
                f.lock().push(format!("response_bytes {}", bytes.len()));
            })
            .on_request_json(move |_, json| g.lock().push(format!("request_json {json}")))
            .on_response_json(move |_, json| h.lock().push(format!("response_json {json}")))
            .on_error(move |_, tag, _| i.lock().push(format!("error {tag}")))
            .on_panic(move |_, payload, _| j.lock().push(format!("panic {payload}")));
        (hooks, log)
    }

    fn recorded(descriptor: Descriptor) -> (Hello, Arc<Mutex<Vec<String>>>) {
        let (hooks, log) = recorder();
        (
            Hello::with_config(descriptor, quiet().with_hooks(hooks)),
            log,
        )
    }

    // -- happy paths ---------------------------------------------------------

    #[tokio::test]
    async fn json_hello() {
        let endpoint = hello();
        let (status, headers, body) =
            send(&endpoint, post("application/json", r#"{"name":"World"}"#)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(body, br#"{"text":"Hello, World!"}"#);
        assert_eq!(endpoint.pool().outstanding(), 0);
    }

    #[tokio::test]
    async fn protobuf_hello() {
        let endpoint = hello();
        for content_type in ["application/octet-stream", "application/x-protobuf"] {
            let (status, headers, body) = send(&endpoint, post(content_type, proto("World"))).await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(headers[CONTENT_TYPE], "application/octet-stream");
            let reply = <HelloResponse as prost::Message>::decode(body.as_slice()).unwrap();
            assert_eq!(reply.text, "Hello, World!");
        }
        assert_eq!(endpoint.pool().outstanding(), 0);
    }

    #[tokio::test]
    async fn pooled_messages_are_reused_clean() {
        let endpoint = hello();
        send(&endpoint, post("application/json", r#"{"name":"first"}"#)).await;
        assert_eq!(endpoint.pool().idle(), 1);

        // An empty protobuf body merges into the reused instance, so a stale
        // name would leak into the reply.
        let (status, _, body) = send(&endpoint, post("application/x-protobuf", Vec::new())).await;
        assert_eq!(status, StatusCode::OK);
        let reply = <HelloResponse as prost::Message>::decode(body.as_slice()).unwrap();
        assert_eq!(reply.text, "Hello, !");
        assert_eq!(endpoint.pool().idle(), 1);
    }

    #[tokio::test]
    async fn pretty_json_output() {
        let endpoint = Hello::with_config(
            Descriptor::message(greet),
            quiet().with_json(Some(protowire_core::JsonCodec::pretty())),
        );
        let (_, _, body) = send(&endpoint, post("application/json", r#"{"name":"P"}"#)).await;
        assert_eq!(
            String::from_utf8(body).unwrap(),
            "{\n  \"text\": \"Hello, P!\"\n}"
        );
    }

    // -- rejections ----------------------------------------------------------

    #[tokio::test]
    async fn non_post_is_405_without_reading_the_body() {
        let (endpoint, log) = recorded(Descriptor::message(greet));
        for method in [Method::GET, Method::PUT, Method::DELETE] {
            let request = Request::builder()
                .method(method)
                .uri("/hello")
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"name":"World"}"#))
                .unwrap();
            let (status, headers, body) = send(&endpoint, request).await;
            assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
            assert!(headers.get(CONTENT_TYPE).is_none());
            assert!(body.is_empty());
        }

        assert!(log.lock().iter().all(|line| !line.starts_with("request")));
        assert_eq!(endpoint.pool().idle(), 0);
        assert_eq!(endpoint.pool().outstanding(), 0);
    }

    #[tokio::test]
    async fn unsupported_media_type_is_415() {
        let (endpoint, log) = recorded(Descriptor::message(greet));
        let (status, _, _) = send(&endpoint, post("text/plain", "World")).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let missing = Request::post("/hello").body(Body::from("x")).unwrap();
        let (status, _, _) = send(&endpoint, missing).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let log = log.lock();
        assert_eq!(
            log.iter().filter(|l| *l == "error content-type").count(),
            2
        );
        assert_eq!(endpoint.pool().idle(), 0);
    }

    #[tokio::test]
    async fn json_is_415_without_a_json_codec() {
        let endpoint = Hello::with_config(
            Descriptor::message(greet),
            EndpointConfig::binary_only().with_hooks(Hooks::none()),
        );

        let (status, _, _) = send(&endpoint, post("application/json", r#"{"name":"W"}"#)).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let (status, _, _) = send(&endpoint, post("application/octet-stream", proto("W"))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_json_is_500() {
        let (endpoint, log) = recorded(Descriptor::message(greet));
        for body in [r#"{"name":"#, r#"{"name":5}"#, "null"] {
            let (status, _, _) = send(&endpoint, post("application/json", body)).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "{body}");
        }
        assert_eq!(
            log.lock().iter().filter(|l| *l == "error json.decode").count(),
            3
        );
        assert!(log.lock().iter().all(|l| !l.starts_with("request ")));
        assert_eq!(endpoint.pool().outstanding(), 0);
        assert_eq!(endpoint.pool().idle(), 1);
    }

    #[tokio::test]
    async fn malformed_protobuf_is_500() {
        let (endpoint, log) = recorded(Descriptor::message(greet));
        let (status, _, _) =
            send(&endpoint, post("application/octet-stream", vec![0xff, 0xff, 0xff])).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(log.lock().contains(&"error protobuf.decode".to_string()));
        assert_eq!(endpoint.pool().outstanding(), 0);
    }

    #[tokio::test]
    async fn body_read_failure_is_500() {
        let (endpoint, log) = recorded(Descriptor::message(greet));
        let chunks: Vec<Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(b"{\"name\":")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ];
        let body = Body::from_stream(futures_util::stream::iter(chunks));

        let (status, _, _) = send(&endpoint, post("application/json", body)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(log.lock().contains(&"error body.read".to_string()));
        assert_eq!(endpoint.pool().idle(), 0);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let endpoint = Hello::with_config(Descriptor::message(greet), quiet().with_body_limit(4));
        let (status, _, _) = send(&endpoint, post("application/json", r#"{"name":"World"}"#)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    // -- handler failures ----------------------------------------------------

    #[tokio::test]
    async fn panic_is_contained() {
        let (endpoint, log) = recorded(Descriptor::message(greet));

        let (status, _, body) = send(&endpoint, post("application/json", r#"{"name":"panic"}"#)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.is_empty());
        assert_eq!(endpoint.pool().outstanding(), 0);
        assert_eq!(endpoint.pool().idle(), 1);

        let (status, _, _) = send(&endpoint, post("application/json", r#"{"name":"after"}"#)).await;
        assert_eq!(status, StatusCode::OK);

        let log = log.lock();
        assert!(log.contains(&"panic boom".to_string()));
        assert!(log.contains(&"end 500".to_string()));
        assert!(log.contains(&"end 200".to_string()));
    }

    #[tokio::test]
    async fn panic_hook_always_receives_a_backtrace() {
        use std::backtrace::BacktraceStatus;

        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let hooks = Hooks::none().on_panic(move |_, _, backtrace| {
            *sink.lock() = Some(backtrace.status());
        });
        let endpoint = Hello::with_config(Descriptor::message(greet), quiet().with_hooks(hooks));

        let (status, _, _) = send(&endpoint, post("application/json", r#"{"name":"panic"}"#)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let status = seen.lock().take();
        assert!(status.is_some());
        assert_ne!(status, Some(BacktraceStatus::Disabled));
    }

    #[tokio::test]
    async fn start_hook_panic_is_contained() {
        let (hooks, log) = recorder();
        let hooks = hooks.on_start_request(|_, _, _| panic!("start"));
        let endpoint = Hello::with_config(Descriptor::message(greet), quiet().with_hooks(hooks));

        let (status, _, body) = send(&endpoint, post("application/json", "{}")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.is_empty());
        assert_eq!(endpoint.pool().outstanding(), 0);

        let log = log.lock();
        assert_eq!(*log, vec!["panic start".to_string(), "end 500".to_string()]);
    }

    #[tokio::test]
    async fn request_handlers_see_the_request_context() {
        let endpoint = Hello::with_config(
            Descriptor::with_request(|parts: &Parts, m: &HelloRequest| {
                let id = parts
                    .extensions
                    .get::<RequestContext>()
                    .map_or(0, |ctx| ctx.request_id);
                HelloResponse {
                    text: format!("{} #{id}", m.name),
                }
            }),
            quiet(),
        );

        for expected in 1..=2 {
            let (status, _, body) =
                send(&endpoint, post("application/json", r#"{"name":"Bob"}"#)).await;
            assert_eq!(status, StatusCode::OK);
            let reply: HelloResponse = serde_json::from_slice(&body).unwrap();
            assert_eq!(reply.text, format!("Bob #{expected}"));
        }
    }

    #[tokio::test]
    async fn handler_status_is_used_verbatim() {
        let endpoint = Hello::with_config(
            Descriptor::message(|_: &HelloRequest| -> Result<HelloResponse, Status> {
                Err(Status::new(StatusCode::IM_A_TEAPOT, "short and stout"))
            }),
            quiet(),
        );
        let (status, headers, body) = send(&endpoint, post("application/json", "{}")).await;
        assert_eq!(status, StatusCode::IM_A_TEAPOT);
        assert!(headers.get(CONTENT_TYPE).is_none());
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn untyped_error_is_500() {
        let endpoint = Hello::with_config(
            HandlerDescriptor::<HelloRequest, HelloResponse>::message(
                |_: &HelloRequest| -> anyhow::Result<HelloResponse> { Err(anyhow::anyhow!("nope")) },
            ),
            quiet(),
        );
        let (status, _, _) = send(&endpoint, post("application/json", "{}")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(endpoint.pool().outstanding(), 0);
    }

    // -- calling conventions -------------------------------------------------

    async fn text_of(descriptor: Descriptor) -> String {
        let endpoint = Hello::with_config(descriptor, quiet());
        let request = Request::post("/hello")
            .header(CONTENT_TYPE, "application/json")
            .header("x-user", "alice")
            .body(Body::from(r#"{"name":"Bob"}"#))
            .unwrap();
        let (status, _, body) = send(&endpoint, request).await;
        assert_eq!(status, StatusCode::OK);
        let reply: HelloResponse = serde_json::from_slice(&body).unwrap();
        reply.text
    }

    #[tokio::test]
    async fn every_calling_convention_dispatches() {
        let user = |parts: &Parts| {
            parts
                .headers
                .get("x-user")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        let reply = |text: String| HelloResponse { text };

        assert_eq!(
            text_of(Descriptor::message(move |m: &HelloRequest| reply(m.name.clone()))).await,
            "Bob"
        );
        assert_eq!(
            text_of(Descriptor::with_context(move |ctx: &RequestContext, m: &HelloRequest| {
                reply(format!("{} {} {}", ctx.method, ctx.uri, m.name))
            }))
            .await,
            "POST /hello Bob"
        );
        assert_eq!(
            text_of(Descriptor::with_request(move |p: &Parts, m: &HelloRequest| {
                reply(format!("{} {}", user(p), m.name))
            }))
            .await,
            "alice Bob"
        );
        assert_eq!(
            text_of(Descriptor::with_param(
                "Howdy".to_string(),
                move |greeting: &String, m: &HelloRequest| reply(format!("{greeting}, {}", m.name)),
            ))
            .await,
            "Howdy, Bob"
        );
        assert_eq!(
            text_of(Descriptor::with_context_param(
                7_u32,
                move |ctx: &RequestContext, n: &u32, m: &HelloRequest| {
                    reply(format!("{} {n} {}", ctx.method, m.name))
                },
            ))
            .await,
            "POST 7 Bob"
        );
        assert_eq!(
            text_of(Descriptor::with_request_param(
                '!',
                move |p: &Parts, c: &char, m: &HelloRequest| {
                    reply(format!("{} {}{c}", user(p), m.name))
                },
            ))
            .await,
            "alice Bob!"
        );
    }

    // -- hooks ---------------------------------------------------------------

    #[tokio::test]
    async fn json_hooks_fire_in_order() {
        let (endpoint, log) = recorded(Descriptor::message(greet));
        send(&endpoint, post("application/json", r#"{"name":"W"}"#)).await;

        assert_eq!(
            *log.lock(),
            vec![
                "start 1 POST".to_string(),
                r#"request_json {"name":"W"}"#.to_string(),
                r#"request HelloRequest { name: "W" }"#.to_string(),
                r#"response HelloResponse { text: "Hello, W!" }"#.to_string(),
                r#"response_json {"text":"Hello, W!"}"#.to_string(),
                "end 200".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn protobuf_hooks_see_raw_bytes_before_decode() {
        let (endpoint, log) = recorded(Descriptor::message(greet));
        let body = vec![0xff, 0x01];
        send(&endpoint, post("application/octet-stream", body)).await;

        assert_eq!(
            *log.lock(),
            vec![
                "start 1 POST".to_string(),
                "request_bytes 2".to_string(),
                "error protobuf.decode".to_string(),
                "end 500".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn request_ids_increase_per_request() {
        let (endpoint, log) = recorded(Descriptor::message(greet));
        for _ in 0..3 {
            send(&endpoint, post("application/json", "{}")).await;
        }
        let starts: Vec<_> = log
            .lock()
            .iter()
            .filter(|l| l.starts_with("start"))
            .cloned()
            .collect();
        assert_eq!(starts, ["start 1 POST", "start 2 POST", "start 3 POST"]);
    }

    #[tokio::test]
    async fn error_body_is_plain_text() {
        let hooks = Hooks::none().error_body(|ctx, status| {
            format!("request {} failed with {}", ctx.request_id, status.as_u16())
        });
        let endpoint = Hello::with_config(Descriptor::message(greet), quiet().with_hooks(hooks));

        let (status, headers, body) = send(&endpoint, post("text/xml", "<x/>")).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(headers[CONTENT_TYPE], ERROR_CONTENT_TYPE);
        assert_eq!(headers[X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(body, b"request 1 failed with 415");
    }

    // -- writer --------------------------------------------------------------

    struct FailingWriter {
        headers: HeaderMap,
        status: Option<StatusCode>,
    }

    impl ResponseWriter for FailingWriter {
        fn headers_mut(&mut self) -> &mut HeaderMap {
            &mut self.headers
        }

        fn write_status(&mut self, status: StatusCode) {
            self.status = Some(status);
        }

        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[tokio::test]
    async fn write_failure_is_reported_not_retried() {
        let (endpoint, log) = recorded(Descriptor::message(greet));
        let mut writer = FailingWriter {
            headers: HeaderMap::new(),
            status: None,
        };

        let status = endpoint
            .serve(post("application/json", r#"{"name":"W"}"#), &mut writer)
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(writer.status, Some(StatusCode::OK));
        assert_eq!(writer.headers[CONTENT_TYPE], "application/json");
        let log = log.lock();
        assert_eq!(log.iter().filter(|l| *l == "error response.write").count(), 1);
        assert_eq!(log.last().map(String::as_str), Some("end 200"));
    }

    // -- concurrency ---------------------------------------------------------

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_balance_the_pool() {
        let endpoint = hello();
        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let endpoint = endpoint.clone();
                tokio::spawn(async move {
                    let name = if i % 8 == 0 { "panic".to_string() } else { format!("n{i}") };
                    let body = serde_json::json!({ "name": name }).to_string();
                    endpoint
                        .oneshot(post("application/json", body))
                        .await
                        .unwrap()
                        .status()
                })
            })
            .collect();

        let mut ok = 0;
        for task in tasks {
            if task.await.unwrap() == StatusCode::OK {
                ok += 1;
            }
        }
        assert_eq!(ok, 56);
        assert_eq!(endpoint.pool().outstanding(), 0);
    }

    #[test]
    fn outcome_status() {
        let success = Outcome::Success {
            format: WireFormat::Json,
            body: Vec::new(),
        };
        assert_eq!(success.status(), StatusCode::OK);
        assert_eq!(
            Outcome::Failure(StatusCode::NOT_FOUND).status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn panic_payloads_render() {
        let s: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(s.as_ref()), "static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let other: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }

    proptest! {
        #[test]
        fn names_survive_both_formats(name in "\\PC{0,32}") {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let endpoint = echo();
            let expected = format!("Hello, {name}!");

            let (status, _, body) = runtime.block_on(send(&endpoint, post("application/x-protobuf", proto(&name))));
            prop_assert_eq!(status, StatusCode::OK);
            let reply = <HelloResponse as prost::Message>::decode(body.as_slice()).unwrap();
            prop_assert_eq!(&reply.text, &expected);

            let json = serde_json::json!({ "name": name }).to_string();
            let (status, _, body) = runtime.block_on(send(&endpoint, post("application/json", json)));
            prop_assert_eq!(status, StatusCode::OK);
            let reply: HelloResponse = serde_json::from_slice(&body).unwrap();
            prop_assert_eq!(reply.text, expected);
        }

        #[test]
        fn arbitrary_bytes_never_escape_the_boundary(body in proptest::collection::vec(any::<u8>(), 0..64)) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let endpoint = echo();
            let (status, _, _) = runtime.block_on(send(&endpoint, post("application/octet-stream", body)));
            prop_assert!(status == StatusCode::OK || status == StatusCode::INTERNAL_SERVER_ERROR);
            prop_assert_eq!(endpoint.pool().outstanding(), 0);
        }
    }
}
