//! Serial transport
//!
//! Byte-level port access for the ECU and GPS links. The [`Transport`]
//! trait is the seam the drivers talk through, so tests and the
//! simulator can substitute a scripted byte source for a real tty.

mod scripted;
mod tty;

pub use scripted::ScriptedTransport;
pub use tty::TtyTransport;

use std::time::Duration;

use crate::protocol::ProtocolError;

/// A bidirectional byte stream with deadline-bounded reads.
///
/// Implementations may buffer internally; callers use
/// [`Transport::reset_input_buffer`] to discard pending bytes before
/// sending a new command. Dropping a transport releases the underlying
/// port.
pub trait Transport: Send {
    /// Fill `buf` completely, failing with
    /// [`ProtocolError::ReadIncomplete`] if the deadline elapses first.
    fn read_exact(&mut self, buf: &mut [u8], deadline: Duration) -> Result<(), ProtocolError>;

    /// Read whatever is available into `buf`, waiting up to `deadline`
    /// for the first byte. Returns the number of bytes read; zero means
    /// the deadline passed in silence.
    fn read_up_to(&mut self, buf: &mut [u8], deadline: Duration) -> Result<usize, ProtocolError>;

    /// Write all bytes to the device.
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), ProtocolError>;

    /// Discard any bytes already received but not yet read.
    fn reset_input_buffer(&mut self) -> Result<(), ProtocolError>;

    /// Set the per-call timeout used by the underlying port.
    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), ProtocolError>;
}
