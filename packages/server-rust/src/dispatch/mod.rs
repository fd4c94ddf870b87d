//! Request dispatch: negotiation, hooks, configuration and the endpoint.

pub mod config;
pub mod endpoint;
pub mod hooks;
pub mod negotiate;
pub mod writer;

pub use config::EndpointConfig;
pub use endpoint::{Endpoint, Outcome};
pub use hooks::{Hooks, REQUESTS_TOTAL};
pub use negotiate::{negotiate, NegotiateError};
pub use writer::{BufferedResponse, ResponseWriter};
