//! Speeduino ECU driver
//!
//! Speaks the Speeduino realtime protocol in one of two wire variants,
//! selected at construction:
//!
//! - **Plain**: unframed single-letter commands. The enhanced `'n'`
//!   command returns `0x6E 0x32 <len> <payload>`; older firmware only
//!   answers the legacy `'A'` command with an echo byte and a 75-byte
//!   payload. Which sub-mode applies is decided once, during connect.
//! - **Framed**: every command and response wrapped in the CRC32
//!   envelope (msEnvelope_1.0). Handshake is a `'Q'` payload; data reads
//!   use the TunerStudio `'r'` command against the OutputChannels page.
//!
//! The driver is strictly read-only: `'Q'`, `'r'`, `'n'` and `'A'` are
//! the only bytes it ever puts on the wire.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{DataFrame, EcuProvider, RawResponse, ResponseTag};
use crate::config::{EcuConfig, ProtocolKind};
use crate::protocol::{self, read_frame, wrap, ProtocolError, OCH_BLOCK_SIZE};
use crate::transport::{Transport, TtyTransport};

/// Firmware settling delay after opening the tty
const SETTLE_DELAY: Duration = Duration::from_millis(1000);

/// Silence window that ends the pre-handshake drain
const DRAIN_SILENCE: Duration = Duration::from_millis(100);

/// Hard cap on total drain time
const DRAIN_TOTAL: Duration = Duration::from_millis(1500);

/// Response deadline (firmware constant)
const READ_TIMEOUT: Duration = Duration::from_millis(protocol::DEFAULT_TIMEOUT_MS);

/// Payload length of the enhanced `'n'` response in current firmware
const ENHANCED_LEN: usize = 119;

/// Payload length of the legacy `'A'` response
const LEGACY_LEN: usize = 75;

/// Type byte of the framed `'r'` command (OutputChannels page)
const R_COMMAND_TYPE: u8 = 0x30;

/// Link mode settled during connect, never re-negotiated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkMode {
    PlainEnhanced,
    PlainLegacy,
    Framed,
}

struct Inner {
    transport: Option<Box<dyn Transport>>,
    mode: Option<LinkMode>,
    signature: Option<String>,
}

/// Speeduino serial driver
pub struct SpeeduinoEcu {
    port_path: String,
    baud_rate: u32,
    can_id: u8,
    stoich: f64,
    protocol: ProtocolKind,
    inner: Mutex<Inner>,
}

impl SpeeduinoEcu {
    pub fn new(cfg: &EcuConfig) -> Self {
        Self {
            port_path: cfg.port_path.clone(),
            baud_rate: cfg.baud_rate,
            can_id: cfg.can_id,
            stoich: cfg.stoich,
            protocol: cfg.protocol,
            inner: Mutex::new(Inner {
                transport: None,
                mode: None,
                signature: None,
            }),
        }
    }

    /// ECU signature captured during the framed handshake, if any
    pub fn signature(&self) -> Option<String> {
        self.inner.lock().unwrap().signature.clone()
    }

    /// Handshake over an already-open transport.
    ///
    /// Used by tests and simulators; the tty settling delay only applies
    /// to [`EcuProvider::connect`], which opens a real port.
    pub fn connect_over(&self, transport: Box<dyn Transport>) -> Result<(), ProtocolError> {
        self.establish(transport)
    }

    fn establish(&self, mut transport: Box<dyn Transport>) -> Result<(), ProtocolError> {
        let mut inner = self.inner.lock().unwrap();

        // On any failure below the transport is dropped, closing the port.
        drain(transport.as_mut())?;

        let mode = match self.protocol {
            ProtocolKind::Plain => handshake_plain(transport.as_mut())?,
            ProtocolKind::Framed => {
                let signature = handshake_framed(transport.as_mut())?;
                log::info!("speeduino: signature {:?}", signature);
                inner.signature = Some(signature);
                LinkMode::Framed
            }
        };

        log::info!(
            "speeduino: connected on {} at {} baud ({:?})",
            self.port_path,
            self.baud_rate,
            mode
        );
        inner.transport = Some(transport);
        inner.mode = Some(mode);
        Ok(())
    }

    fn parse_plain(&self, d: &[u8]) -> DataFrame {
        let mut f = DataFrame {
            secl: u8_at(d, 0),

            // Status1 bitfield (offset 1)
            dfco_on: bit(d, 1, 4),

            // Engine status (offset 2)
            running: bit(d, 2, 0),
            cranking: bit(d, 2, 1),
            ase: bit(d, 2, 2),
            warmup: bit(d, 2, 3),

            dwell: f64::from(u8_at(d, 3)) * 0.1,
            map: u16_at(d, 4),

            // Temperatures (raw - 40)
            iat: f64::from(u8_at(d, 6)) - 40.0,
            coolant: f64::from(u8_at(d, 7)) - 40.0,

            bat_correction: u8_at(d, 8),
            battery_voltage: f64::from(u8_at(d, 9)) * 0.1,

            afr: f64::from(u8_at(d, 10)) * 0.1,
            ego_correction: u8_at(d, 11),
            air_correction: u8_at(d, 12),
            warmup_enrich: u8_at(d, 13),

            rpm: u16_at(d, 14),
            accel_enrich: u8_at(d, 16),
            gamma_enrich: u16::from(u8_at(d, 17)),

            // Offset 18 is both the live VE and table-1 VE in this layout
            ve_curr: u8_at(d, 18),
            ve1: u8_at(d, 18),

            afr_target: f64::from(u8_at(d, 19)) * 0.1,
            pulse_width1: f64::from(u16_at(d, 20)) * 0.1,

            advance: i8_at(d, 23),
            tps: f64::from(u8_at(d, 24)),
            loops_per_second: u16_at(d, 25),
            free_ram: u16_at(d, 27),

            boost_target: u8_at(d, 29),
            boost_duty: u8_at(d, 30),

            // Spark bitfield (offset 31)
            sync: bit(d, 31, 7),

            rpm_dot: i16_at(d, 32),

            flex_pct: u8_at(d, 34),
            flex_fuel_cor: u8_at(d, 35),
            flex_ign_cor: i8_at(d, 36),

            idle_load: u8_at(d, 37),
            afr2: f64::from(u8_at(d, 39)) * 0.1,
            baro: u8_at(d, 40),

            // 41..=73 are CAN input channels, not carried in the frame
            errors: u8_at(d, 74),

            // Everything below only exists in the enhanced payload;
            // legacy 75-byte responses zero-fill from here on.
            pulse_width2: f64::from(u16_at(d, 76)) * 0.1,
            pulse_width3: f64::from(u16_at(d, 78)) * 0.1,
            pulse_width4: f64::from(u16_at(d, 80)) * 0.1,

            fuel_load: f64::from(i16_at(d, 84)),
            ign_load: f64::from(i16_at(d, 86)),
            dwell_actual: f64::from(u16_at(d, 88)) * 0.1,
            cl_idle_target: u16::from(u8_at(d, 90)) * 10,
            map_dot: i16_at(d, 91),

            vvt1_angle: f64::from(i16_at(d, 93)) * 0.5,
            vvt1_target: f64::from(u8_at(d, 95)) * 0.5,
            vvt1_duty: f64::from(u8_at(d, 96)) * 0.5,

            baro_correction: u8_at(d, 98),
            ase_curr: u8_at(d, 99),

            vss: u16_at(d, 100),
            gear: u8_at(d, 102),
            fuel_pressure: u8_at(d, 103),
            oil_pressure: u8_at(d, 104),

            // Status4 (offset 106)
            fan_status: bit(d, 106, 3),

            vvt2_angle: f64::from(i16_at(d, 107)) * 0.5,
            vvt2_target: f64::from(u8_at(d, 109)) * 0.5,
            vvt2_duty: f64::from(u8_at(d, 110)) * 0.5,

            advance1: i8_at(d, 113),
            advance2: i8_at(d, 114),
            sd_status: u8_at(d, 115),
            emap: u16_at(d, 116),
            fan_duty: f64::from(u8_at(d, 118)) * 0.5,

            ..Default::default()
        };

        self.apply_derived(&mut f);
        f
    }

    fn parse_framed(&self, d: &[u8]) -> DataFrame {
        let mut f = DataFrame {
            secl: u8_at(d, 0),

            // Status1 bitfield (offset 1)
            dfco_on: bit(d, 1, 4),

            // Engine status (offset 2)
            running: bit(d, 2, 0),
            cranking: bit(d, 2, 1),
            ase: bit(d, 2, 2),
            warmup: bit(d, 2, 3),

            sync_loss: u8_at(d, 3),
            map: u16_at(d, 4),

            iat: f64::from(u8_at(d, 6)) - 40.0,
            coolant: f64::from(u8_at(d, 7)) - 40.0,

            bat_correction: u8_at(d, 8),
            battery_voltage: f64::from(u8_at(d, 9)) * 0.1,

            afr: f64::from(u8_at(d, 10)) * 0.1,
            ego_correction: u8_at(d, 11),
            air_correction: u8_at(d, 12),
            warmup_enrich: u8_at(d, 13),

            rpm: u16_at(d, 14),
            accel_enrich: u8_at(d, 16),
            gamma_enrich: u16_at(d, 17),

            ve1: u8_at(d, 19),
            ve2: u8_at(d, 20),
            afr_target: f64::from(u8_at(d, 21)) * 0.1,

            advance: i8_at(d, 24),
            tps: f64::from(u8_at(d, 25)) * 0.5,
            loops_per_second: u16_at(d, 26),
            free_ram: u16_at(d, 28),

            boost_target: u8_at(d, 30),
            boost_duty: u8_at(d, 31),

            // Status2 bitfield (offset 32)
            sync: bit(d, 32, 7),

            rpm_dot: i16_at(d, 33),

            flex_pct: u8_at(d, 35),
            flex_fuel_cor: u8_at(d, 36),
            flex_ign_cor: i8_at(d, 37),

            idle_load: u8_at(d, 38),
            afr2: f64::from(u8_at(d, 40)) * 0.1,
            baro: u8_at(d, 41),

            errors: u8_at(d, 75),

            pulse_width1: f64::from(u16_at(d, 76)) * 0.001,
            pulse_width2: f64::from(u16_at(d, 78)) * 0.001,
            pulse_width3: f64::from(u16_at(d, 80)) * 0.001,
            pulse_width4: f64::from(u16_at(d, 82)) * 0.001,

            fuel_load: f64::from(i16_at(d, 86)),
            ign_load: f64::from(i16_at(d, 88)),
            dwell: f64::from(u16_at(d, 90)) * 0.001,
            cl_idle_target: u16::from(u8_at(d, 92)) * 10,
            map_dot: i16_at(d, 93),

            vvt1_angle: f64::from(i16_at(d, 95)) * 0.5,
            vvt1_target: f64::from(u8_at(d, 97)) * 0.5,
            vvt1_duty: f64::from(u8_at(d, 98)) * 0.5,

            baro_correction: u8_at(d, 101),
            ve_curr: u8_at(d, 102),
            ase_curr: u8_at(d, 103),

            vss: u16_at(d, 104),
            gear: u8_at(d, 106),
            fuel_pressure: u8_at(d, 107),
            oil_pressure: u8_at(d, 108),

            // Status4 (offset 110)
            fan_status: bit(d, 110, 3),

            vvt2_angle: f64::from(i16_at(d, 111)) * 0.5,
            vvt2_target: f64::from(u8_at(d, 113)) * 0.5,
            vvt2_duty: f64::from(u8_at(d, 114)) * 0.5,

            advance1: i8_at(d, 118),
            advance2: i8_at(d, 119),
            sd_status: u8_at(d, 120),
            emap: u16_at(d, 121),
            fan_duty: f64::from(u8_at(d, 123)) * 0.5,
            dwell_actual: f64::from(u16_at(d, 125)) * 0.001,

            knock_count: u8_at(d, 128),
            knock_cor: u8_at(d, 129),

            ..Default::default()
        };

        self.apply_derived(&mut f);
        f
    }

    fn apply_derived(&self, f: &mut DataFrame) {
        if self.stoich > 0.0 {
            f.lambda = f.afr / self.stoich;
        }
        if f.rpm > 0 {
            // Four-stroke cycle time in ms
            let cycle_ms = 60_000.0 / f64::from(f.rpm) * 2.0;
            f.duty_cycle = f.pulse_width1 / cycle_ms * 100.0;
        }
    }

    /// One request/response cycle with no parsing. Serializes on the
    /// driver lock; any failure drops the link.
    pub fn poll_raw(&self) -> Result<RawResponse, ProtocolError> {
        let mut inner = self.inner.lock().unwrap();
        let mode = inner.mode.ok_or(ProtocolError::NotConnected)?;
        let transport = inner
            .transport
            .as_mut()
            .ok_or(ProtocolError::NotConnected)?;

        let result = match mode {
            LinkMode::PlainEnhanced => poll_plain_n(transport.as_mut()),
            LinkMode::PlainLegacy => poll_plain_a(transport.as_mut()),
            LinkMode::Framed => poll_framed(transport.as_mut(), self.can_id),
        };

        if result.is_err() {
            // Transient or not, the link state is unknown now; drop the
            // port and let the embedder decide about reconnecting.
            inner.transport = None;
            inner.mode = None;
        }
        result
    }

    /// Decode a raw response. Never fails: channels beyond the end of a
    /// short payload stay at their zero values. CPU-only, safe from any
    /// thread.
    pub fn parse(&self, raw: &RawResponse) -> DataFrame {
        match raw.tag {
            ResponseTag::PlainN | ResponseTag::PlainA => self.parse_plain(&raw.bytes),
            ResponseTag::Framed => self.parse_framed(&raw.bytes),
        }
    }
}

impl EcuProvider for SpeeduinoEcu {
    fn name(&self) -> &'static str {
        "Speeduino"
    }

    fn connect(&self) -> Result<(), ProtocolError> {
        let transport = TtyTransport::open(&self.port_path, self.baud_rate)?;
        // Arduino-style boards reboot on port open; give the firmware
        // time to come back before talking to it.
        std::thread::sleep(SETTLE_DELAY);
        self.establish(Box::new(transport))
    }

    fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.transport = None;
        inner.mode = None;
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().transport.is_some()
    }

    fn poll(&self) -> Result<DataFrame, ProtocolError> {
        let raw = self.poll_raw()?;
        Ok(self.parse(&raw))
    }
}

/// Read and discard until the line goes quiet (or the total cap trips)
fn drain(transport: &mut dyn Transport) -> Result<(), ProtocolError> {
    transport.set_read_timeout(DRAIN_SILENCE)?;
    let start = Instant::now();
    let mut scratch = [0u8; 256];
    while start.elapsed() < DRAIN_TOTAL {
        let n = transport.read_up_to(&mut scratch, DRAIN_SILENCE)?;
        if n == 0 {
            break;
        }
    }
    Ok(())
}

/// Accumulate up to `want` bytes, stopping at the deadline or when the
/// line goes silent
fn collect(
    transport: &mut dyn Transport,
    want: usize,
    deadline: Duration,
) -> Result<Vec<u8>, ProtocolError> {
    let start = Instant::now();
    let mut out = Vec::with_capacity(want);
    let mut buf = vec![0u8; want];

    while out.len() < want {
        let remaining = deadline.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            break;
        }
        let n = transport.read_up_to(&mut buf[..want - out.len()], remaining)?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    Ok(out)
}

fn handshake_plain(transport: &mut dyn Transport) -> Result<LinkMode, ProtocolError> {
    // Enhanced attempt: 'n' should answer 0x6E 0x32 <len> <payload>
    transport.reset_input_buffer()?;
    transport.write_all(&[b'n'])?;
    let reply = collect(transport, 3 + ENHANCED_LEN, READ_TIMEOUT)?;
    if reply.windows(2).any(|w| w == [0x6E, 0x32]) {
        return Ok(LinkMode::PlainEnhanced);
    }
    log::debug!(
        "speeduino: 'n' handshake got {} bytes without signature, trying 'A'",
        reply.len()
    );

    // Legacy fallback: 'A' echoes itself followed by 75 data bytes
    drain(transport)?;
    transport.reset_input_buffer()?;
    transport.write_all(&[b'A'])?;
    let reply = collect(transport, 1 + LEGACY_LEN + 8, READ_TIMEOUT)?;
    if reply.contains(&b'A') {
        return Ok(LinkMode::PlainLegacy);
    }

    Err(ProtocolError::HandshakeFailed)
}

fn handshake_framed(transport: &mut dyn Transport) -> Result<String, ProtocolError> {
    transport.reset_input_buffer()?;
    transport.write_all(&wrap(&[b'Q']))?;
    let payload = read_frame(transport, READ_TIMEOUT).map_err(|e| match e {
        ProtocolError::ReadIncomplete { .. } => ProtocolError::HandshakeFailed,
        other => other,
    })?;

    // Some firmware prefixes the reply with a 0x00 status byte
    let sig = if payload.first() == Some(&0) {
        &payload[1..]
    } else {
        &payload[..]
    };
    Ok(String::from_utf8_lossy(sig).trim().to_string())
}

fn poll_plain_n(transport: &mut dyn Transport) -> Result<RawResponse, ProtocolError> {
    transport.reset_input_buffer()?;
    transport.write_all(&[b'n'])?;

    let mut header = [0u8; 3];
    transport.read_exact(&mut header, READ_TIMEOUT)?;
    if header[0] != 0x6E {
        return Err(ProtocolError::HeaderMismatch {
            got: header[0],
            want: 0x6E,
        });
    }
    if header[1] != 0x32 {
        return Err(ProtocolError::HeaderMismatch {
            got: header[1],
            want: 0x32,
        });
    }
    let len = header[2] as usize;
    if len == 0 {
        return Err(ProtocolError::PayloadSizeUnexpected(0));
    }

    let mut payload = vec![0u8; len];
    transport.read_exact(&mut payload, READ_TIMEOUT)?;
    Ok(RawResponse {
        tag: ResponseTag::PlainN,
        bytes: payload,
    })
}

fn poll_plain_a(transport: &mut dyn Transport) -> Result<RawResponse, ProtocolError> {
    transport.reset_input_buffer()?;
    transport.write_all(&[b'A'])?;

    let mut buf = vec![0u8; 1 + LEGACY_LEN];
    transport.read_exact(&mut buf, READ_TIMEOUT)?;
    if buf[0] != b'A' {
        return Err(ProtocolError::HeaderMismatch {
            got: buf[0],
            want: b'A',
        });
    }
    Ok(RawResponse {
        tag: ResponseTag::PlainA,
        bytes: buf[1..].to_vec(),
    })
}

fn poll_framed(transport: &mut dyn Transport, can_id: u8) -> Result<RawResponse, ProtocolError> {
    let length = OCH_BLOCK_SIZE as u16;
    let command = [
        b'r',
        can_id,
        R_COMMAND_TYPE,
        0x00, // offset lo
        0x00, // offset hi
        (length & 0xFF) as u8,
        (length >> 8) as u8,
    ];

    transport.reset_input_buffer()?;
    transport.write_all(&wrap(&command))?;
    let payload = read_frame(transport, READ_TIMEOUT)?;

    // Firmware variants differ: pure block, block with a leading status
    // byte, or block preceded by unrelated bytes.
    let data = match payload.len() {
        n if n == OCH_BLOCK_SIZE => payload,
        n if n == OCH_BLOCK_SIZE + 1 => payload[1..].to_vec(),
        n if n > OCH_BLOCK_SIZE => payload[n - OCH_BLOCK_SIZE..].to_vec(),
        n => return Err(ProtocolError::PayloadSizeUnexpected(n)),
    };

    Ok(RawResponse {
        tag: ResponseTag::Framed,
        bytes: data,
    })
}

fn u8_at(d: &[u8], off: usize) -> u8 {
    d.get(off).copied().unwrap_or(0)
}

fn i8_at(d: &[u8], off: usize) -> i8 {
    u8_at(d, off) as i8
}

fn u16_at(d: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([u8_at(d, off), u8_at(d, off + 1)])
}

fn i16_at(d: &[u8], off: usize) -> i16 {
    u16_at(d, off) as i16
}

fn bit(d: &[u8], off: usize, bit: u8) -> bool {
    u8_at(d, off) & (1 << bit) != 0
}
