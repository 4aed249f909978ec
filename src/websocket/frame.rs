use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    pub fn is_control(&self) -> bool {
        (*self as u8) & 0x8 != 0
    }
}

/// One decoded WebSocket frame, payload already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode,
            payload: payload.into(),
        }
    }

    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Text, payload)
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Binary, payload)
    }

    /// Close frame carrying a status code and no reason.
    pub fn close(code: u16) -> Self {
        Self::new(Opcode::Close, Bytes::copy_from_slice(&code.to_be_bytes()))
    }
}

/// Decodes one frame from the front of `buf`.
///
/// Returns `Ok(None)` until the whole frame, payload included, is buffered;
/// nothing is consumed in that case.
pub fn decode(buf: &mut BytesMut, max_len: usize) -> Result<Option<Frame>, FrameError> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let fin = buf[0] & 0x80 != 0;
    let opcode = Opcode::from_u8(buf[0] & 0x0F)
        .ok_or_else(|| FrameError::Protocol(format!("unknown opcode {:#x}", buf[0] & 0x0F)))?;
    let masked = buf[1] & 0x80 != 0;

    let (len, mut offset) = match buf[1] & 0x7F {
        126 => {
            if buf.len() < 4 {
                return Ok(None);
            }
            (u16::from_be_bytes([buf[2], buf[3]]) as u64, 4)
        }
        127 => {
            if buf.len() < 10 {
                return Ok(None);
            }
            let high = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]) as u64;
            let low = u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]) as u64;
            ((high << 32) | low, 10)
        }
        n => (n as u64, 2),
    };

    if len > max_len as u64 {
        return Err(FrameError::TooLarge { len, max: max_len });
    }
    if opcode.is_control() && (len > 125 || !fin) {
        return Err(FrameError::Protocol("invalid control frame".to_string()));
    }

    let mask = if masked {
        if buf.len() < offset + 4 {
            return Ok(None);
        }
        let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
        offset += 4;
        Some(key)
    } else {
        None
    };

    let len = len as usize;
    if buf.len() < offset + len {
        buf.reserve(offset + len - buf.len());
        return Ok(None);
    }

    buf.advance(offset);
    let mut payload = buf.split_to(len);
    if let Some(key) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
    }

    Ok(Some(Frame {
        fin,
        opcode,
        payload: payload.freeze(),
    }))
}

/// Appends `frame` to `dst`, unmasked.
pub fn encode(frame: &Frame, dst: &mut BytesMut) {
    let len = frame.payload.len();
    dst.reserve(10 + len);

    let fin = if frame.fin { 0x80 } else { 0 };
    dst.put_u8(fin | frame.opcode as u8);

    if len < 126 {
        dst.put_u8(len as u8);
    } else if len <= u16::MAX as usize {
        dst.put_u8(126);
        dst.put_u16(len as u16);
    } else {
        dst.put_u8(127);
        dst.put_u64(len as u64);
    }

    dst.extend_from_slice(&frame.payload);
}
