//! Frame codec — 4-byte big-endian length prefix + MessagePack payload.
//!
//! Wraps [`LengthDelimitedCodec`] for framing and `rmp-serde` (named
//! fields) for the payload. Oversized frames are rejected before the
//! payload is buffered.

use std::marker::PhantomData;

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use super::protocol::{Request, ServerMessage};

/// Largest accepted frame payload (1 MiB).
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Frame encoding or decoding failure.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Socket I/O or framing failure (including oversized frames).
    #[error("frame I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("undecodable message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("unencodable message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

/// Codec reading `D` frames and writing `E` frames.
pub struct MsgpackCodec<D, E> {
    frames: LengthDelimitedCodec,
    _types: PhantomData<fn(E) -> D>,
}

/// Server side of a bus connection.
pub type ServerCodec = MsgpackCodec<Request, ServerMessage>;

/// Client side of a bus connection.
pub type ClientCodec = MsgpackCodec<ServerMessage, Request>;

impl<D, E> Default for MsgpackCodec<D, E> {
    fn default() -> Self {
        Self {
            frames: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_LEN)
                .new_codec(),
            _types: PhantomData,
        }
    }
}

impl<D: DeserializeOwned, E> Decoder for MsgpackCodec<D, E> {
    type Item = D;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<D>, CodecError> {
        match self.frames.decode(src)? {
            Some(frame) => Ok(Some(rmp_serde::from_slice(&frame)?)),
            None => Ok(None),
        }
    }
}

impl<D, E: Serialize> Encoder<E> for MsgpackCodec<D, E> {
    type Error = CodecError;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> Result<(), CodecError> {
        let payload = rmp_serde::to_vec_named(&item)?;
        self.frames.encode(Bytes::from(payload), dst)?;
        Ok(())
    }
}
