//! Per-endpoint configuration.

use std::sync::Arc;

use protowire_core::{JsonCodec, DEFAULT_MAX_IDLE};

use super::hooks::Hooks;
use crate::handler::RequestIds;

/// Settings shared by every request an endpoint serves.
///
/// Cloning shares the request-id counter, so endpoints built from clones of
/// one config hand out ids from a single sequence.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// JSON codec. `None` makes `application/json` an unsupported media type.
    pub json: Option<JsonCodec>,
    /// Lifecycle hooks.
    pub hooks: Hooks,
    /// Maximum accepted request body size in bytes.
    pub body_limit: usize,
    /// Upper bound on idle request messages kept for reuse.
    pub pool_max_idle: usize,
    /// Request-id source.
    pub request_ids: Arc<RequestIds>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            json: Some(JsonCodec::new()),
            hooks: Hooks::tracing(),
            body_limit: usize::MAX,
            pool_max_idle: DEFAULT_MAX_IDLE,
            request_ids: Arc::new(RequestIds::new()),
        }
    }
}

impl EndpointConfig {
    /// Protobuf only: no JSON codec, default hooks.
    #[must_use]
    pub fn binary_only() -> Self {
        Self {
            json: None,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_json(mut self, json: Option<JsonCodec>) -> Self {
        self.json = json;
        self
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    #[must_use]
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }
}
