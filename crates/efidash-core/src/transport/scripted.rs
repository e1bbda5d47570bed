//! Scripted transport
//!
//! An in-memory [`Transport`] fed from canned byte sequences. Used by the
//! test suite and available to embedders for protocol experiments without
//! hardware. Each queued reply becomes readable after the next write, so
//! command/response exchanges play out in order; replies loaded with
//! [`ScriptedTransport::with_reply`] are readable immediately.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::Transport;
use crate::protocol::ProtocolError;

/// Transport backed by scripted replies instead of a device
#[derive(Default)]
pub struct ScriptedTransport {
    /// Bytes currently readable
    rx: VecDeque<u8>,
    /// Replies released one per write
    pending: VecDeque<Vec<u8>>,
    /// Everything the caller wrote, in order; shared so tests can keep a
    /// handle after moving the transport into a driver
    written: Arc<Mutex<Vec<u8>>>,
    /// When set, the next write fails
    fail_next_write: bool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose bytes are readable immediately (no write needed)
    pub fn with_reply(reply: Vec<u8>) -> Self {
        Self {
            rx: reply.into(),
            ..Self::default()
        }
    }

    /// Queue a reply to be released by the next write
    pub fn push_reply(&mut self, reply: Vec<u8>) {
        self.pending.push_back(reply);
    }

    /// Make bytes readable right now
    pub fn push_immediate(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied());
    }

    /// Fail the next `write_all` call
    pub fn fail_next_write(&mut self) {
        self.fail_next_write = true;
    }

    /// Everything written so far
    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    /// Shared handle to the write log, valid after the transport is
    /// moved into a driver
    pub fn written_log(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.written)
    }
}

impl Transport for ScriptedTransport {
    fn read_exact(&mut self, buf: &mut [u8], _deadline: Duration) -> Result<(), ProtocolError> {
        if self.rx.len() < buf.len() {
            // Simulate the deadline elapsing with the script exhausted.
            let got = self.rx.len();
            self.rx.clear();
            return Err(ProtocolError::ReadIncomplete {
                got,
                want: buf.len(),
            });
        }
        for slot in buf.iter_mut() {
            *slot = self.rx.pop_front().unwrap();
        }
        Ok(())
    }

    fn read_up_to(&mut self, buf: &mut [u8], _deadline: Duration) -> Result<usize, ProtocolError> {
        let n = self.rx.len().min(buf.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.rx.pop_front().unwrap();
        }
        Ok(n)
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        if self.fail_next_write {
            self.fail_next_write = false;
            return Err(ProtocolError::Serial("scripted write failure".to_string()));
        }
        self.written.lock().unwrap().extend_from_slice(bytes);
        if let Some(reply) = self.pending.pop_front() {
            self.rx.extend(reply);
        }
        Ok(())
    }

    fn reset_input_buffer(&mut self) -> Result<(), ProtocolError> {
        self.rx.clear();
        Ok(())
    }

    fn set_read_timeout(&mut self, _timeout: Duration) -> Result<(), ProtocolError> {
        Ok(())
    }
}
