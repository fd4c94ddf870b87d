//! Bound handlers: the immutable per-endpoint invocation plan.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use http::request::Parts;
use protowire_core::Message;

use super::context::RequestContext;
use super::signature::{Binding, ParamKind, ReturnKind, Signature, TypeTag, Variant};
use super::status::{BoxHandlerError, IntoReply, Status};

type Reply<Resp> = Result<Resp, BoxHandlerError>;

/// Type-erased bound parameter.
pub type BoundParam = dyn Any + Send + Sync;

type MessageFn<Req, Resp> = dyn Fn(&Req) -> Reply<Resp> + Send + Sync;
type ContextFn<Req, Resp> = dyn Fn(&RequestContext, &Req) -> Reply<Resp> + Send + Sync;
type RequestFn<Req, Resp> = dyn Fn(&Parts, &Req) -> Reply<Resp> + Send + Sync;
type BoundFn<Req, Resp> = dyn Fn(&BoundParam, &Req) -> Reply<Resp> + Send + Sync;
type ContextBoundFn<Req, Resp> =
    dyn Fn(&RequestContext, &BoundParam, &Req) -> Reply<Resp> + Send + Sync;
type RequestBoundFn<Req, Resp> = dyn Fn(&Parts, &BoundParam, &Req) -> Reply<Resp> + Send + Sync;

/// Erased handler, one arm per calling convention.
enum Invoke<Req, Resp> {
    Message(Box<MessageFn<Req, Resp>>),
    ContextMessage(Box<ContextFn<Req, Resp>>),
    RequestMessage(Box<RequestFn<Req, Resp>>),
    BoundMessage(Box<BoundFn<Req, Resp>>),
    ContextBoundMessage(Box<ContextBoundFn<Req, Resp>>),
    RequestBoundMessage(Box<RequestBoundFn<Req, Resp>>),
}

impl<Req, Resp> Invoke<Req, Resp> {
    fn variant(&self) -> Variant {
        match self {
            Self::Message(_) => Variant::Message,
            Self::ContextMessage(_) => Variant::ContextMessage,
            Self::RequestMessage(_) => Variant::RequestMessage,
            Self::BoundMessage(_) => Variant::BoundMessage,
            Self::ContextBoundMessage(_) => Variant::ContextBoundMessage,
            Self::RequestBoundMessage(_) => Variant::RequestBoundMessage,
        }
    }
}

/// Per-request arguments available to a handler.
#[derive(Debug, Clone, Copy)]
pub struct CallArgs<'a, Req> {
    pub ctx: &'a RequestContext,
    pub parts: &'a Parts,
    pub message: &'a Req,
}

/// A handler bound to one of the six calling conventions.
///
/// Built once when an endpoint is wired and shared read-only by every
/// request. Each constructor describes its handler's shape as a
/// [`Signature`] and runs it through [`Signature::bind`].
///
/// # Panics
///
/// All constructors panic when binding fails. Binding happens at wiring
/// time, so a rejected shape is a programming error that should stop
/// startup, never a per-request condition.
pub struct HandlerDescriptor<Req, Resp> {
    binding: Binding,
    bound: Option<Arc<BoundParam>>,
    invoke: Invoke<Req, Resp>,
}

impl<Req: Message, Resp: Message> HandlerDescriptor<Req, Resp> {
    /// Binds `fn(&Req) -> R`.
    #[must_use]
    pub fn message<F, R>(handler: F) -> Self
    where
        F: Fn(&Req) -> R + Send + Sync + 'static,
        R: IntoReply<Resp>,
    {
        Self::bind(
            [request_param::<Req>()],
            returns::<R, Resp>(),
            None,
            Invoke::Message(Box::new(move |msg: &Req| handler(msg).into_reply())),
        )
    }

    /// Binds `fn(&RequestContext, &Req) -> R`.
    #[must_use]
    pub fn with_context<F, R>(handler: F) -> Self
    where
        F: Fn(&RequestContext, &Req) -> R + Send + Sync + 'static,
        R: IntoReply<Resp>,
    {
        Self::bind(
            [ParamKind::Context, request_param::<Req>()],
            returns::<R, Resp>(),
            None,
            Invoke::ContextMessage(Box::new(move |ctx: &RequestContext, msg: &Req| {
                handler(ctx, msg).into_reply()
            })),
        )
    }

    /// Binds `fn(&Parts, &Req) -> R`, giving the handler the transport
    /// request head (method, URI, headers, extensions).
    ///
    /// The dispatcher inserts the call's [`RequestContext`] into
    /// `parts.extensions`, so the request id stays reachable here.
    #[must_use]
    pub fn with_request<F, R>(handler: F) -> Self
    where
        F: Fn(&Parts, &Req) -> R + Send + Sync + 'static,
        R: IntoReply<Resp>,
    {
        Self::bind(
            [ParamKind::Request, request_param::<Req>()],
            returns::<R, Resp>(),
            None,
            Invoke::RequestMessage(Box::new(move |parts: &Parts, msg: &Req| {
                handler(parts, msg).into_reply()
            })),
        )
    }

    /// Binds `fn(&P, &Req) -> R` with `param` passed to every call.
    #[must_use]
    pub fn with_param<P, F, R>(param: P, handler: F) -> Self
    where
        P: Send + Sync + 'static,
        F: Fn(&P, &Req) -> R + Send + Sync + 'static,
        R: IntoReply<Resp>,
    {
        Self::bind(
            [ParamKind::Value(TypeTag::of::<P>()), request_param::<Req>()],
            returns::<R, Resp>(),
            supplied(param),
            Invoke::BoundMessage(Box::new(move |bound: &BoundParam, msg: &Req| {
                handler(downcast::<P>(bound)?, msg).into_reply()
            })),
        )
    }

    /// Binds `fn(&RequestContext, &P, &Req) -> R` with `param` passed to
    /// every call.
    #[must_use]
    pub fn with_context_param<P, F, R>(param: P, handler: F) -> Self
    where
        P: Send + Sync + 'static,
        F: Fn(&RequestContext, &P, &Req) -> R + Send + Sync + 'static,
        R: IntoReply<Resp>,
    {
        Self::bind(
            [
                ParamKind::Context,
                ParamKind::Value(TypeTag::of::<P>()),
                request_param::<Req>(),
            ],
            returns::<R, Resp>(),
            supplied(param),
            Invoke::ContextBoundMessage(Box::new(
                move |ctx: &RequestContext, bound: &BoundParam, msg: &Req| {
                    handler(ctx, downcast::<P>(bound)?, msg).into_reply()
                },
            )),
        )
    }

    /// Binds `fn(&Parts, &P, &Req) -> R` with `param` passed to every call.
    ///
    /// As with [`with_request`](Self::with_request), the [`RequestContext`]
    /// is available from `parts.extensions`.
    #[must_use]
    pub fn with_request_param<P, F, R>(param: P, handler: F) -> Self
    where
        P: Send + Sync + 'static,
        F: Fn(&Parts, &P, &Req) -> R + Send + Sync + 'static,
        R: IntoReply<Resp>,
    {
        Self::bind(
            [
                ParamKind::Request,
                ParamKind::Value(TypeTag::of::<P>()),
                request_param::<Req>(),
            ],
            returns::<R, Resp>(),
            supplied(param),
            Invoke::RequestBoundMessage(Box::new(
                move |parts: &Parts, bound: &BoundParam, msg: &Req| {
                    handler(parts, downcast::<P>(bound)?, msg).into_reply()
                },
            )),
        )
    }

    fn bind<const N: usize>(
        params: [ParamKind; N],
        returns: Vec<ReturnKind>,
        bound: Option<(TypeTag, Arc<BoundParam>)>,
        invoke: Invoke<Req, Resp>,
    ) -> Self {
        let (supplied, bound) = bound.unzip();
        let binding = match Signature::new(params, returns).bind(supplied) {
            Ok(binding) => binding,
            Err(err) => panic!("invalid handler: {err}"),
        };
        assert_eq!(
            binding.variant,
            invoke.variant(),
            "invalid handler: shape does not match its constructor"
        );
        Self {
            binding,
            bound,
            invoke,
        }
    }
}

impl<Req, Resp> HandlerDescriptor<Req, Resp> {
    /// Result of binding the handler's shape.
    #[must_use]
    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    /// Calling convention the handler was bound with.
    #[must_use]
    pub fn variant(&self) -> Variant {
        self.binding.variant
    }

    /// The bound parameter, if the handler takes one of type `P`.
    #[must_use]
    pub fn bound_param<P: 'static>(&self) -> Option<&P> {
        self.bound.as_deref().and_then(|b| b.downcast_ref::<P>())
    }

    /// Calls the handler, assembling arguments in the order its variant
    /// declares: context or transport request first, then the bound
    /// parameter, then the message.
    ///
    /// # Errors
    ///
    /// Returns the handler's own error, boxed.
    pub fn invoke(&self, args: CallArgs<'_, Req>) -> Result<Resp, BoxHandlerError> {
        let CallArgs {
            ctx,
            parts,
            message,
        } = args;
        match &self.invoke {
            Invoke::Message(f) => f(message),
            Invoke::ContextMessage(f) => f(ctx, message),
            Invoke::RequestMessage(f) => f(parts, message),
            Invoke::BoundMessage(f) => f(self.bound()?, message),
            Invoke::ContextBoundMessage(f) => f(ctx, self.bound()?, message),
            Invoke::RequestBoundMessage(f) => f(parts, self.bound()?, message),
        }
    }

    fn bound(&self) -> Result<&BoundParam, BoxHandlerError> {
        self.bound
            .as_deref()
            .ok_or_else(|| Box::new(Status::internal("bound parameter missing")) as BoxHandlerError)
    }
}

impl<Req, Resp> fmt::Debug for HandlerDescriptor<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("binding", &self.binding)
            .finish_non_exhaustive()
    }
}

fn request_param<Req: 'static>() -> ParamKind {
    ParamKind::Message(TypeTag::of::<Req>())
}

fn returns<R: IntoReply<Resp>, Resp>() -> Vec<ReturnKind> {
    if R::FALLIBLE {
        vec![ReturnKind::Message, ReturnKind::Error]
    } else {
        vec![ReturnKind::Message]
    }
}

fn supplied<P: Send + Sync + 'static>(param: P) -> Option<(TypeTag, Arc<BoundParam>)> {
    let param: Arc<BoundParam> = Arc::new(param);
    Some((TypeTag::of::<P>(), param))
}

fn downcast<P: 'static>(bound: &BoundParam) -> Result<&P, BoxHandlerError> {
    bound.downcast_ref::<P>().ok_or_else(|| {
        Box::new(Status::internal(format!(
            "bound parameter is not a {}",
            std::any::type_name::<P>()
        ))) as BoxHandlerError
    })
}
