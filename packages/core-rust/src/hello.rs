//! Greeting messages used by the demo binary and the test suites.
//!
//! Equivalent to:
//!
//! ```proto
//! message HelloRequest  { string name = 1; }
//! message HelloResponse { string text = 1; }
//! ```

use serde::{Deserialize, Serialize};

/// Request carrying the name to greet.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct HelloRequest {
    #[prost(string, tag = "1")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
}

/// Response carrying the rendered greeting.
#[derive(Clone, PartialEq, Eq, prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct HelloResponse {
    #[prost(string, tag = "1")]
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
}
