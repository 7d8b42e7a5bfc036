//! Wire protocol for Muxtun
//!
//! Two layers live here: the raw-UDP [`handshake`] packet that negotiates
//! the conversation id, and the [`frame`] format multiplexing many TCP
//! connections inside the reliable application stream.

pub mod frame;
pub mod handshake;

pub use frame::{
    encode_close_conn, encode_data, encode_keepalive, next_frame, Frame, CONTROL_CONN_IDX,
    HEADER_LEN, MAX_CHUNK_LEN, MAX_FRAME_LEN,
};
pub use handshake::HANDSHAKE_LEN;
