//! `protowire` Core: structured-message contract, protobuf/JSON codecs, and
//! the request message pool.

pub mod codec;
pub mod hello;
pub mod message;
pub mod pool;

pub use codec::{Codec, CodecError, JsonCodec, ProtobufCodec, WireFormat};
pub use message::Message;
pub use pool::{MessagePool, Pooled, DEFAULT_MAX_IDLE};
