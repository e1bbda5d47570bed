//! Protocol errors

use thiserror::Error;

/// Errors that can occur on the ECU or GPS serial link
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("failed to open port {path}: {reason}")]
    PortOpenFailed { path: String, reason: String },

    #[error("no valid handshake reply from device")]
    HandshakeFailed,

    #[error("not connected")]
    NotConnected,

    #[error("incomplete read: got {got} of {want} bytes before deadline")]
    ReadIncomplete { got: usize, want: usize },

    #[error("unexpected response header: got {got:#04x}, want {want:#04x}")]
    HeaderMismatch { got: u8, want: u8 },

    #[error("unexpected payload size: {0} bytes")]
    PayloadSizeUnexpected(usize),

    #[error("CRC mismatch: got {got:#010x}, want {want:#010x}")]
    CrcMismatch { got: u32, want: u32 },

    #[error("serial port error: {0}")]
    Serial(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serialport::Error> for ProtocolError {
    fn from(e: serialport::Error) -> Self {
        ProtocolError::Serial(e.to_string())
    }
}
