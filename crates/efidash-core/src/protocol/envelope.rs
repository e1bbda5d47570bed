//! Envelope encoding/decoding
//!
//! Implements the CRC32 envelope used by the framed protocol variant
//! (msEnvelope_1.0 as spoken by Speeduino/TunerStudio):
//! - 2 bytes: payload length (big-endian)
//! - N bytes: payload
//! - 4 bytes: CRC32 of the payload only, big-endian
//!
//! Multi-byte fields *inside* the payload are little-endian; the envelope
//! itself is big-endian.

use byteorder::{BigEndian, ByteOrder};
use crc32fast::Hasher;
use std::time::Duration;

use super::{ProtocolError, MAX_PAYLOAD_SIZE};
use crate::transport::Transport;

/// CRC32 (IEEE 802.3) over the payload only
fn payload_crc(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Wrap a payload in a size + CRC32 envelope
pub fn wrap(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(2 + payload.len() + 4);

    let mut len_bytes = [0u8; 2];
    BigEndian::write_u16(&mut len_bytes, payload.len() as u16);
    frame.extend_from_slice(&len_bytes);

    frame.extend_from_slice(payload);

    let mut crc_bytes = [0u8; 4];
    BigEndian::write_u32(&mut crc_bytes, payload_crc(payload));
    frame.extend_from_slice(&crc_bytes);

    frame
}

/// Read one envelope from the transport and return the verified payload.
///
/// Sizes of zero or above [`MAX_PAYLOAD_SIZE`] are rejected before any
/// payload bytes are consumed.
pub fn read_frame(
    transport: &mut dyn Transport,
    deadline: Duration,
) -> Result<Vec<u8>, ProtocolError> {
    let mut header = [0u8; 2];
    transport.read_exact(&mut header, deadline)?;

    let length = BigEndian::read_u16(&header) as usize;
    if length == 0 || length > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadSizeUnexpected(length));
    }

    let mut payload = vec![0u8; length];
    transport.read_exact(&mut payload, deadline)?;

    let mut crc_bytes = [0u8; 4];
    transport.read_exact(&mut crc_bytes, deadline)?;

    let got = BigEndian::read_u32(&crc_bytes);
    let want = payload_crc(&payload);
    if got != want {
        return Err(ProtocolError::CrcMismatch { got, want });
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScriptedTransport;

    const DEADLINE: Duration = Duration::from_millis(100);

    #[test]
    fn test_wrap_q_command() {
        let frame = wrap(&[b'Q']);
        // 0x0001 size, payload, 4 CRC bytes
        assert_eq!(frame.len(), 7);
        assert_eq!(&frame[..3], &[0x00, 0x01, b'Q']);
    }

    #[test]
    fn test_roundtrip() {
        let payload = b"speeduino 202501".to_vec();
        let mut transport = ScriptedTransport::with_reply(wrap(&payload));
        let decoded = read_frame(&mut transport, DEADLINE).expect("should decode");
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_roundtrip_max_payload() {
        let payload: Vec<u8> = (0..MAX_PAYLOAD_SIZE).map(|i| (i & 0xFF) as u8).collect();
        let mut transport = ScriptedTransport::with_reply(wrap(&payload));
        let decoded = read_frame(&mut transport, DEADLINE).expect("should decode");
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_zero_size_rejected() {
        let mut transport = ScriptedTransport::with_reply(vec![0x00, 0x00, 0xDE, 0xAD]);
        match read_frame(&mut transport, DEADLINE) {
            Err(ProtocolError::PayloadSizeUnexpected(0)) => {}
            other => panic!("expected size rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_oversize_rejected() {
        // 0x0500 = 1280 > 1024
        let mut transport = ScriptedTransport::with_reply(vec![0x05, 0x00]);
        match read_frame(&mut transport, DEADLINE) {
            Err(ProtocolError::PayloadSizeUnexpected(1280)) => {}
            other => panic!("expected size rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_corrupted_payload_fails_crc() {
        let mut frame = wrap(&[1, 2, 3, 4, 5]);
        frame[3] ^= 0xFF;
        let mut transport = ScriptedTransport::with_reply(frame);
        assert!(matches!(
            read_frame(&mut transport, DEADLINE),
            Err(ProtocolError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_envelope() {
        let frame = wrap(&[1, 2, 3]);
        let mut transport = ScriptedTransport::with_reply(frame[..4].to_vec());
        assert!(matches!(
            read_frame(&mut transport, DEADLINE),
            Err(ProtocolError::ReadIncomplete { .. })
        ));
    }
}
