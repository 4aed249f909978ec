use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;

/// Size of the big-endian length prefix.
pub const HEADER_LEN: usize = 4;

/// `[u32 big-endian length][payload]` framing.
#[derive(Debug, Clone, Copy)]
pub struct LengthDelimited {
    max_frame_len: usize,
}

impl LengthDelimited {
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    /// Removes one complete frame from the front of `buf`.
    ///
    /// `Ok(None)` means the frame is not complete yet; `buf` is left as it
    /// was so the next read can extend it.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if len > self.max_frame_len {
            return Err(FrameError::TooLarge {
                len: len as u64,
                max: self.max_frame_len,
            });
        }

        // The buffer grows with the bytes that actually arrive
        if buf.len() < HEADER_LEN + len {
            return Ok(None);
        }

        buf.advance(HEADER_LEN);
        Ok(Some(buf.split_to(len).freeze()))
    }

    pub fn encode(&self, payload: &[u8], dst: &mut BytesMut) -> Result<(), FrameError> {
        if payload.len() > self.max_frame_len || payload.len() > u32::MAX as usize {
            return Err(FrameError::TooLarge {
                len: payload.len() as u64,
                max: self.max_frame_len,
            });
        }

        dst.reserve(HEADER_LEN + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(payload);
        Ok(())
    }
}
