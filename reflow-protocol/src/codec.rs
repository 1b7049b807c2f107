//! Message codec for RPC framing

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::{ClientMessage, ServerMessage};

/// Maximum message size (16 MB)
const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Protocol codec error
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Codec for ClientMessage (encoding) and ServerMessage (decoding)
/// Used by the client side
#[derive(Debug, Default)]
pub struct ClientCodec;

impl ClientCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for ClientCodec {
    type Item = ServerMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_message(src)
    }
}

impl Encoder<ClientMessage> for ClientCodec {
    type Error = CodecError;

    fn encode(&mut self, item: ClientMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_message(&item, dst)
    }
}

/// Codec for ServerMessage (encoding) and ClientMessage (decoding)
/// Used by the server side
#[derive(Debug, Default)]
pub struct ServerCodec;

impl ServerCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for ServerCodec {
    type Item = ClientMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_message(src)
    }
}

impl Encoder<ServerMessage> for ServerCodec {
    type Error = CodecError;

    fn encode(&mut self, item: ServerMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_message(&item, dst)
    }
}

/// Decode a length-prefixed message
fn decode_message<T: serde::de::DeserializeOwned>(
    src: &mut BytesMut,
) -> Result<Option<T>, CodecError> {
    if src.len() < 4 {
        return Ok(None);
    }

    // Peek at length without consuming
    let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    if src.len() < 4 + len {
        src.reserve(4 + len - src.len());
        return Ok(None);
    }

    src.advance(4);
    let data = src.split_to(len);

    let msg: T = bincode::deserialize(&data)?;
    Ok(Some(msg))
}

/// Encode a length-prefixed message
fn encode_message<T: serde::Serialize>(item: &T, dst: &mut BytesMut) -> Result<(), CodecError> {
    let data = bincode::serialize(item)?;

    if data.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    dst.reserve(4 + data.len());
    dst.put_u32(data.len() as u32);
    dst.put_slice(&data);
    Ok(())
}
