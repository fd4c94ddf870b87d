//! Hosting: listener configuration, HTTP middleware, and the server lifecycle.

pub mod config;
pub mod middleware;
pub mod module;

pub use config::NetworkConfig;
pub use middleware::{endpoint_layers, request_span, REQUEST_ID_HEADER};
pub use module::NetworkModule;
