//! Binary frame layout for streamed audio.
//!
//! ```text
//! offset  size  field
//! 0       1     frame type (0x01 = audio chunk)
//! 1       36    message id, UTF-8, right-padded with 0x00
//! 37      4     chunk index, u32 big-endian
//! 41      4     total chunks, u32 big-endian
//! 45      ..    audio bytes
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const AUDIO_CHUNK_FRAME: u8 = 0x01;
pub const MESSAGE_ID_LEN: usize = 36;
pub const HEADER_LEN: usize = 1 + MESSAGE_ID_LEN + 4 + 4;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Empty binary frame")]
    Empty,
    #[error("Unknown binary frame type 0x{0:02x}")]
    UnknownType(u8),
    #[error("Binary frame is {0} bytes, shorter than the {len}-byte header", len = HEADER_LEN)]
    Truncated(usize),
    #[error("Message id is not valid UTF-8")]
    InvalidMessageId,
    #[error("Message id is {0} bytes, at most {max} fit in a frame", max = MESSAGE_ID_LEN)]
    MessageIdTooLong(usize),
}

/// One chunk of an audio message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunkFrame {
    pub message_id: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub payload: Bytes,
}

impl AudioChunkFrame {
    /// Parse a binary frame. The payload shares memory with `frame`.
    pub fn decode(frame: &Bytes) -> Result<Self, FrameError> {
        let Some(&frame_type) = frame.first() else {
            return Err(FrameError::Empty);
        };
        if frame_type != AUDIO_CHUNK_FRAME {
            return Err(FrameError::UnknownType(frame_type));
        }
        if frame.len() < HEADER_LEN {
            return Err(FrameError::Truncated(frame.len()));
        }

        let mut buf = frame.slice(1..);
        let id_field = buf.split_to(MESSAGE_ID_LEN);
        let id_len = id_field
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |last| last + 1);
        let message_id = std::str::from_utf8(&id_field[..id_len])
            .map_err(|_| FrameError::InvalidMessageId)?
            .to_string();
        let chunk_index = buf.get_u32();
        let total_chunks = buf.get_u32();

        Ok(Self {
            message_id,
            chunk_index,
            total_chunks,
            payload: buf,
        })
    }

    pub fn encode(&self) -> Result<Bytes, FrameError> {
        let id = self.message_id.as_bytes();
        if id.len() > MESSAGE_ID_LEN {
            return Err(FrameError::MessageIdTooLong(id.len()));
        }
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u8(AUDIO_CHUNK_FRAME);
        buf.put_slice(id);
        buf.put_bytes(0, MESSAGE_ID_LEN - id.len());
        buf.put_u32(self.chunk_index);
        buf.put_u32(self.total_chunks);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }
}
