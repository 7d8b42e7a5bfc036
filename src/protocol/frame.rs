//! Mux framing inside the reliable-UDP application stream
//!
//! Every message the client exchanges with the upstream over the engine is a
//! length-prefixed frame, little-endian throughout:
//!
//! ```text
//! Data frame:     | len u16 | conn_idx u16 (!= 0) | payload (len - 4 bytes) |
//! Control frame:  | len u16 | 0x0000 u16          | type u8 | body          |
//! ```
//!
//! `len` counts the whole frame including the length field itself, so a data
//! payload is capped at [`MAX_CHUNK_LEN`] bytes and larger TCP reads are cut
//! into multiple frames. Connection index 0 marks a control frame; defined
//! control types are CLOSE_CONN (0x01, body `conn_idx u16`) and KEEPALIVE
//! (0x02, empty body).

use crate::error::FrameError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Bytes of the `len` + `conn_idx` prefix
pub const HEADER_LEN: usize = 4;

/// Largest encodable frame; `len` is a u16 and counts itself
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Largest data payload fitting in one frame
pub const MAX_CHUNK_LEN: usize = MAX_FRAME_LEN - HEADER_LEN;

/// Connection index reserved for control frames
pub const CONTROL_CONN_IDX: u16 = 0;

/// Control type: upstream/downstream request to drop one connection
const CTRL_CLOSE_CONN: u8 = 0x01;

/// Control type: liveness probe, no body, no reply expected
const CTRL_KEEPALIVE: u8 = 0x02;

/// One parsed frame from the application stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Payload bytes for one tunneled connection
    Data {
        /// Multiplexing tag of the connection
        conn_idx: u16,
        /// Raw payload, header stripped
        payload: Bytes,
    },
    /// Request to tear down one tunneled connection
    CloseConn {
        /// Multiplexing tag of the connection to drop
        conn_idx: u16,
    },
    /// Liveness probe
    Keepalive,
    /// Control frame with a type this client does not know; logged and skipped
    UnknownControl {
        /// The unrecognized type byte
        control_type: u8,
    },
}

/// Encode one data frame for `conn_idx`
///
/// `payload` must not exceed [`MAX_CHUNK_LEN`]; callers chunk larger reads
/// with [`chunks`](slice::chunks) before encoding.
pub fn encode_data(conn_idx: u16, payload: &[u8]) -> Bytes {
    debug_assert!(payload.len() <= MAX_CHUNK_LEN);
    debug_assert_ne!(conn_idx, CONTROL_CONN_IDX);

    let len = (HEADER_LEN + payload.len()) as u16;
    let mut buf = BytesMut::with_capacity(len as usize);
    buf.put_u16_le(len);
    buf.put_u16_le(conn_idx);
    buf.put_slice(payload);
    buf.freeze()
}

/// Encode a CLOSE_CONN control frame for `conn_idx`
pub fn encode_close_conn(conn_idx: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(7);
    buf.put_u16_le(7);
    buf.put_u16_le(CONTROL_CONN_IDX);
    buf.put_u8(CTRL_CLOSE_CONN);
    buf.put_u16_le(conn_idx);
    buf.freeze()
}

/// Encode a KEEPALIVE control frame
pub fn encode_keepalive() -> Bytes {
    let mut buf = BytesMut::with_capacity(5);
    buf.put_u16_le(5);
    buf.put_u16_le(CONTROL_CONN_IDX);
    buf.put_u8(CTRL_KEEPALIVE);
    buf.freeze()
}

/// Try to pop one complete frame off the front of the assembly buffer
///
/// Returns `Ok(None)` when the buffer holds less than a full frame; nothing
/// is consumed in that case. On `Ok(Some(_))` exactly `len` bytes have been
/// consumed. `Err` means the peer emitted a structurally impossible frame
/// and the stream cannot be re-synchronized.
pub fn next_frame(buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let len = u16::from_le_bytes([buf[0], buf[1]]);
    if (len as usize) < HEADER_LEN {
        return Err(FrameError::LengthTooShort(len));
    }
    if buf.len() < len as usize {
        return Ok(None);
    }

    let mut frame = buf.split_to(len as usize);
    frame.advance(2); // len, already decoded
    let conn_idx = frame.get_u16_le();

    if conn_idx != CONTROL_CONN_IDX {
        return Ok(Some(Frame::Data {
            conn_idx,
            payload: frame.freeze(),
        }));
    }

    if !frame.has_remaining() {
        return Err(FrameError::ControlTooShort(len));
    }

    match frame.get_u8() {
        CTRL_CLOSE_CONN => {
            if frame.remaining() < 2 {
                return Err(FrameError::CloseBodyTooShort(len));
            }
            Ok(Some(Frame::CloseConn {
                conn_idx: frame.get_u16_le(),
            }))
        }
        CTRL_KEEPALIVE => Ok(Some(Frame::Keepalive)),
        control_type => Ok(Some(Frame::UnknownControl { control_type })),
    }
}
