//! protowire server: turns typed message handlers into HTTP endpoints.
//!
//! A handler is bound once into a [`HandlerDescriptor`] (validating its
//! calling convention), wrapped in an [`Endpoint`] that negotiates protobuf
//! or JSON per request, and optionally hosted by a [`NetworkModule`].

pub mod dispatch;
pub mod handler;
pub mod network;

pub use dispatch::{Endpoint, EndpointConfig, Hooks, Outcome, ResponseWriter};
pub use handler::{HandlerDescriptor, HandlerError, RequestContext, Status};
pub use network::{NetworkConfig, NetworkModule};
