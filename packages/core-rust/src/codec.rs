//! Wire codecs for structured messages.
//!
//! Two formats are supported:
//!
//! - [`WireFormat::Binary`] -- protobuf encoding via `prost`
//! - [`WireFormat::Json`] -- JSON via `serde_json`, using the proto
//!   field names
//!
//! Both implement [`Codec`], the only surface the dispatcher depends on:
//! decode bytes into an existing message, encode a message into bytes.

use crate::message::Message;

// ---------------------------------------------------------------------------
// WireFormat
// ---------------------------------------------------------------------------

/// Wire representation negotiated for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireFormat {
    /// Protobuf binary encoding.
    Binary,
    /// JSON text encoding.
    Json,
}

impl WireFormat {
    /// Media type written to the response `Content-Type` header.
    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Binary => "application/octet-stream",
            Self::Json => "application/json",
        }
    }

    /// Short name used in log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Binary => "protobuf",
            Self::Json => "json",
        }
    }
}

// ---------------------------------------------------------------------------
// CodecError
// ---------------------------------------------------------------------------

/// Errors produced while encoding or decoding a message.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("protobuf decode error: {0}")]
    ProtobufDecode(#[from] prost::DecodeError),
    #[error("protobuf encode error: {0}")]
    ProtobufEncode(#[from] prost::EncodeError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Encode/decode contract between the dispatcher and a wire format.
pub trait Codec: Send + Sync {
    /// The format this codec reads and writes.
    fn format(&self) -> WireFormat;

    /// Decodes `bytes` into `msg`, overwriting its contents.
    ///
    /// `msg` is expected to be freshly reset; on error its contents are
    /// unspecified and the caller must not hand it to a handler.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] when `bytes` is not a valid encoding of `M`.
    fn decode_into<M: Message>(&self, bytes: &[u8], msg: &mut M) -> Result<(), CodecError>;

    /// Encodes `msg` into a new buffer.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] when the message cannot be represented.
    fn encode<M: Message>(&self, msg: &M) -> Result<Vec<u8>, CodecError>;
}

/// Protobuf binary codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtobufCodec;

impl Codec for ProtobufCodec {
    fn format(&self) -> WireFormat {
        WireFormat::Binary
    }

    fn decode_into<M: Message>(&self, bytes: &[u8], msg: &mut M) -> Result<(), CodecError> {
        msg.merge(bytes)?;
        Ok(())
    }

    fn encode<M: Message>(&self, msg: &M) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(msg.encoded_len());
        msg.encode(&mut buf)?;
        Ok(buf)
    }
}

/// JSON codec.
///
/// Field names are whatever the message's serde derive produces; generated
/// messages keep their proto field names (`snake_case`).
///
/// Decoding deserializes in place, so string and repeated fields of a pooled
/// message keep their buffers across requests when the message type derives
/// `Deserialize` with `serde_derive`'s `deserialize_in_place` feature.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    /// Emit indented output instead of the compact form.
    pub pretty: bool,
}

impl JsonCodec {
    /// Creates a codec producing compact output.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a codec producing indented output.
    #[must_use]
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl Codec for JsonCodec {
    fn format(&self) -> WireFormat {
        WireFormat::Json
    }

    fn decode_into<M: Message>(&self, bytes: &[u8], msg: &mut M) -> Result<(), CodecError> {
        msg.reset();
        let mut de = serde_json::Deserializer::from_slice(bytes);
        M::deserialize_in_place(&mut de, msg)?;
        de.end()?;
        Ok(())
    }

    fn encode<M: Message>(&self, msg: &M) -> Result<Vec<u8>, CodecError> {
        let buf = if self.pretty {
            serde_json::to_vec_pretty(msg)?
        } else {
            serde_json::to_vec(msg)?
        };
        Ok(buf)
    }
}
