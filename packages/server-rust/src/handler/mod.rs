//! Handler binding: shape validation, invocation plans, and error mapping.
//!
//! - [`signature`]: explicit handler shapes and the one-time binder
//! - [`descriptor`]: typed constructors for the six calling conventions
//! - [`status`]: the status-code capability on handler errors
//! - [`context`]: per-request context and request-id source

pub mod context;
pub mod descriptor;
pub mod signature;
pub mod status;

pub use context::{RequestContext, RequestIds};
pub use descriptor::{BoundParam, CallArgs, HandlerDescriptor};
pub use signature::{BindError, Binding, ParamKind, ReturnKind, Signature, TypeTag, Variant};
pub use status::{status_for, BoxHandlerError, HandlerError, IntoReply, Status};
