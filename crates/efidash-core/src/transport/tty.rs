//! Serial port transport
//!
//! Wraps the `serialport` crate with the polling read discipline the
//! Speeduino link needs: non-blocking `bytes_to_read` checks with short
//! sleeps, tolerant of `TimedOut`/`WouldBlock` from the OS layer.

use serialport::SerialPort;
use std::io::Read;
use std::time::{Duration, Instant};

use super::Transport;
use crate::protocol::ProtocolError;

/// Poll interval while waiting for serial data
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// A tty serial port configured 8N1 with no flow control
pub struct TtyTransport {
    port: Box<dyn SerialPort>,
}

impl TtyTransport {
    /// Open the named port at the given baud rate.
    ///
    /// DTR and RTS are asserted after opening: most Speeduino boards are
    /// Arduino-derived and reset when DTR toggles, so holding it high
    /// keeps the firmware running across reconnects.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, ProtocolError> {
        let mut port = serialport::new(path, baud_rate)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| ProtocolError::PortOpenFailed {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        port.set_data_bits(serialport::DataBits::Eight)?;
        port.set_parity(serialport::Parity::None)?;
        port.set_stop_bits(serialport::StopBits::One)?;
        port.set_flow_control(serialport::FlowControl::None)?;

        if let Err(e) = port.write_data_terminal_ready(true) {
            log::warn!("{}: failed to assert DTR: {}", path, e);
        }
        if let Err(e) = port.write_request_to_send(true) {
            log::warn!("{}: failed to assert RTS: {}", path, e);
        }

        Ok(Self { port })
    }

    /// Bytes currently waiting in the OS input buffer
    fn available(&mut self) -> Result<usize, ProtocolError> {
        Ok(self.port.bytes_to_read()? as usize)
    }
}

impl Transport for TtyTransport {
    fn read_exact(&mut self, buf: &mut [u8], deadline: Duration) -> Result<(), ProtocolError> {
        let start = Instant::now();
        let mut offset = 0;

        while offset < buf.len() {
            if start.elapsed() > deadline {
                return Err(ProtocolError::ReadIncomplete {
                    got: offset,
                    want: buf.len(),
                });
            }

            let available = self.available()?;
            if available == 0 {
                std::thread::sleep(POLL_INTERVAL);
                continue;
            }

            let to_read = available.min(buf.len() - offset);
            match self.port.read(&mut buf[offset..offset + to_read]) {
                Ok(0) => {
                    return Err(ProtocolError::ReadIncomplete {
                        got: offset,
                        want: buf.len(),
                    })
                }
                Ok(n) => offset += n,
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn read_up_to(&mut self, buf: &mut [u8], deadline: Duration) -> Result<usize, ProtocolError> {
        let start = Instant::now();

        loop {
            let available = self.available()?;
            if available > 0 {
                let to_read = available.min(buf.len());
                match self.port.read(&mut buf[..to_read]) {
                    Ok(n) => return Ok(n),
                    Err(ref e)
                        if e.kind() == std::io::ErrorKind::TimedOut
                            || e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e.into()),
                }
            }
            if start.elapsed() > deadline {
                return Ok(0);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        use std::io::Write;
        self.port.write_all(bytes)?;
        Ok(())
    }

    fn reset_input_buffer(&mut self) -> Result<(), ProtocolError> {
        self.port.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), ProtocolError> {
        self.port.set_timeout(timeout)?;
        Ok(())
    }
}
