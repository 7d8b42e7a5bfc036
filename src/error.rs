//! Error types for Muxtun
//!
//! This module defines the custom error types used throughout the application.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Main error type for Muxtun operations
#[derive(Error, Debug)]
pub enum MuxtunError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Upstream host resolution error
    #[error("Resolve error: {0}")]
    Resolve(String),

    /// The upstream never echoed the conversation handshake
    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Reliable-UDP engine error
    #[error("Engine error: {0}")]
    Engine(String),

    /// Mux framing error
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
}

/// Errors arising while parsing a framed message out of the assembly buffer
///
/// These can only occur if the peer emits a structurally impossible frame;
/// the reliable transport rules out truncation and reordering.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Frame length field below the 4-byte header size
    #[error("frame length {0} is below the minimum of 4")]
    LengthTooShort(u16),

    /// Control frame without a type byte
    #[error("control frame of length {0} has no type byte")]
    ControlTooShort(u16),

    /// CLOSE_CONN control frame without a connection index body
    #[error("close-conn control frame of length {0} is missing its index")]
    CloseBodyTooShort(u16),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_muxtun_error_display() {
        let err = MuxtunError::Config("missing listen_port".to_string());
        assert_eq!(
            format!("{}", err),
            "Configuration error: missing listen_port"
        );

        let err = MuxtunError::Resolve("no IPv4 address".to_string());
        assert_eq!(format!("{}", err), "Resolve error: no IPv4 address");

        let err = MuxtunError::HandshakeTimeout(Duration::from_secs(10));
        assert_eq!(format!("{}", err), "Handshake timed out after 10s");

        let err = MuxtunError::Engine("conv mismatch".to_string());
        assert_eq!(format!("{}", err), "Engine error: conv mismatch");
    }

    #[test]
    fn test_muxtun_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::AddrInUse, "in use");
        let err: MuxtunError = io_err.into();
        assert!(matches!(err, MuxtunError::Io(_)));
    }

    #[test]
    fn test_frame_error_display() {
        assert_eq!(
            format!("{}", FrameError::LengthTooShort(2)),
            "frame length 2 is below the minimum of 4"
        );
        assert_eq!(
            format!("{}", FrameError::ControlTooShort(4)),
            "control frame of length 4 has no type byte"
        );
        assert_eq!(
            format!("{}", FrameError::CloseBodyTooShort(5)),
            "close-conn control frame of length 5 is missing its index"
        );
    }

    #[test]
    fn test_frame_error_into_muxtun_error() {
        let err: MuxtunError = FrameError::LengthTooShort(0).into();
        assert!(matches!(err, MuxtunError::Frame(_)));
    }
}
