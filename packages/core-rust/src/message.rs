//! The structured-message contract shared by codecs, the pool, and handlers.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A schema-defined record with a protobuf binary encoding and a JSON text
/// encoding.
///
/// Blanket-implemented for every `prost` message that also derives serde's
/// `Serialize`/`Deserialize`, so generated types need no extra glue:
///
/// ```
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
/// struct Ping {
///     #[prost(string, tag = "1")]
///     #[serde(default)]
///     pub nonce: String,
/// }
///
/// fn assert_message<M: protowire_core::Message>() {}
/// assert_message::<Ping>();
/// ```
///
/// `prost::Message` itself only requires `Send + Sync`; `Debug` is required
/// here so hooks can log decoded messages. The `prost` derive provides both
/// `Debug` and `Default`, the latter doubling as the zero value installed
/// into the message pool.
pub trait Message:
    prost::Message + fmt::Debug + Default + Serialize + DeserializeOwned + 'static
{
    /// Resets every field to its default so the instance can be reused.
    fn reset(&mut self) {
        self.clear();
    }
}

impl<T> Message for T where
    T: prost::Message + fmt::Debug + Default + Serialize + DeserializeOwned + 'static
{
}
