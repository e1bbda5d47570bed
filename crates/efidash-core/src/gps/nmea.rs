//! NMEA 0183 decoder
//!
//! Line-oriented parser for standard `$`-prefixed sentences with the
//! two-hex-digit XOR checksum suffix. Accepts GP and GN talker prefixes,
//! so plain GPS and combined GNSS receivers both work. Compatible with
//! u-blox NEO-M8N and any other standard NMEA module.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{GpsFix, GpsProvider};
use crate::protocol::ProtocolError;
use crate::transport::{Transport, TtyTransport};

/// Per-read timeout on the GPS port
const READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Sentences examined per poll before giving up on a full update
const MAX_LINES_PER_POLL: usize = 20;

/// Knots to km/h
const KNOTS_TO_KMH: f64 = 1.852;

struct NmeaInner {
    transport: Option<Box<dyn Transport>>,
    /// Carry-over bytes of a sentence split across reads
    line_buf: Vec<u8>,
    fix: GpsFix,
}

/// NMEA GPS provider reading from a serial port
pub struct NmeaGps {
    port_path: String,
    baud_rate: u32,
    inner: Mutex<NmeaInner>,
}

impl NmeaGps {
    pub fn new(port_path: &str, baud_rate: u32) -> Self {
        Self {
            port_path: port_path.to_string(),
            baud_rate,
            inner: Mutex::new(NmeaInner {
                transport: None,
                line_buf: Vec::new(),
                fix: GpsFix::default(),
            }),
        }
    }

    /// Attach an already-open transport (tests, simulators)
    pub fn connect_over(&self, mut transport: Box<dyn Transport>) -> Result<(), ProtocolError> {
        transport.set_read_timeout(READ_TIMEOUT)?;
        self.inner.lock().unwrap().transport = Some(transport);
        Ok(())
    }
}

impl GpsProvider for NmeaGps {
    fn name(&self) -> &'static str {
        "NMEA GPS"
    }

    fn connect(&self) -> Result<(), ProtocolError> {
        let transport = TtyTransport::open(&self.port_path, self.baud_rate)?;
        log::info!(
            "gps: connected to {} at {} baud",
            self.port_path,
            self.baud_rate
        );
        self.connect_over(Box::new(transport))
    }

    fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.transport = None;
        inner.line_buf.clear();
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().transport.is_some()
    }

    fn poll(&self, deadline: Duration) -> Result<GpsFix, ProtocolError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let transport = inner
            .transport
            .as_mut()
            .ok_or(ProtocolError::NotConnected)?;

        let start = Instant::now();
        let mut got_rmc = false;
        let mut got_gga = false;
        let mut lines_seen = 0;
        let mut chunk = [0u8; 512];

        while !(got_rmc && got_gga) && lines_seen < MAX_LINES_PER_POLL {
            let remaining = deadline.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                break;
            }
            let n = transport.read_up_to(&mut chunk, remaining.min(READ_TIMEOUT))?;
            if n == 0 {
                break;
            }
            inner.line_buf.extend_from_slice(&chunk[..n]);

            // Process every complete line in the buffer
            while let Some(pos) = inner.line_buf.iter().position(|&b| b == b'\n') {
                let line_bytes: Vec<u8> = inner.line_buf.drain(..=pos).collect();
                lines_seen += 1;

                let line = String::from_utf8_lossy(&line_bytes);
                let line = line.trim();
                if !line.starts_with('$') {
                    continue;
                }
                if !checksum_valid(line) {
                    // Corrupt sentence, drop silently
                    continue;
                }

                if line.starts_with("$GPRMC") || line.starts_with("$GNRMC") {
                    parse_rmc(&mut inner.fix, line);
                    got_rmc = true;
                } else if line.starts_with("$GPGGA") || line.starts_with("$GNGGA") {
                    parse_gga(&mut inner.fix, line);
                    got_gga = true;
                }

                if (got_rmc && got_gga) || lines_seen >= MAX_LINES_PER_POLL {
                    break;
                }
            }
        }

        Ok(inner.fix.clone())
    }
}

/// Check the `*HH` XOR checksum over the bytes between `$` and `*`
pub(crate) fn checksum_valid(line: &str) -> bool {
    let bytes = line.as_bytes();
    let star = match line.find('*') {
        Some(i) if i + 3 <= line.len() => i,
        _ => return false,
    };
    let mut calc = 0u8;
    for &b in &bytes[1..star] {
        calc ^= b;
    }
    match u8::from_str_radix(&line[star + 1..star + 3], 16) {
        Ok(expected) => expected == calc,
        Err(_) => false,
    }
}

/// Split a sentence into fields, dropping the `$` prefix and checksum
fn fields(line: &str) -> Vec<&str> {
    let body = line.split('*').next().unwrap_or(line);
    let body = body.strip_prefix('$').unwrap_or(body);
    body.split(',').collect()
}

/// Convert NMEA ddmm.mmmm / dddmm.mmmm to signed decimal degrees
fn parse_coord(raw: &str, dir: &str) -> f64 {
    if raw.is_empty() || dir.is_empty() {
        return 0.0;
    }
    let value: f64 = match raw.parse() {
        Ok(v) => v,
        Err(_) => return 0.0,
    };
    let degrees = (value / 100.0).floor();
    let minutes = value - degrees * 100.0;
    let result = degrees + minutes / 60.0;

    if dir == "S" || dir == "W" {
        -result
    } else {
        result
    }
}

/// $xxRMC,hhmmss.ss,A,llll.ll,a,yyyyy.yy,a,speed,course,ddmmyy,...
fn parse_rmc(fix: &mut GpsFix, line: &str) {
    let parts = fields(line);
    if parts.len() < 10 {
        return;
    }

    fix.timestamp = parts[1].to_string();
    fix.valid = parts[2] == "A";

    if fix.valid {
        fix.latitude = parse_coord(parts[3], parts[4]);
        fix.longitude = parse_coord(parts[5], parts[6]);

        if let Ok(knots) = parts[7].parse::<f64>() {
            fix.speed = knots * KNOTS_TO_KMH;
        }
        if let Ok(course) = parts[8].parse::<f64>() {
            fix.heading = course;
        }
    }
}

/// $xxGGA,hhmmss.ss,llll.ll,a,yyyyy.yy,a,quality,sats,hdop,alt,M,...
fn parse_gga(fix: &mut GpsFix, line: &str) {
    let parts = fields(line);
    if parts.len() < 11 {
        return;
    }

    if let Ok(quality) = parts[6].parse::<u8>() {
        fix.fix_quality = quality;
    }
    if let Ok(sats) = parts[7].parse::<u32>() {
        fix.satellites = sats;
    }
    if let Ok(hdop) = parts[8].parse::<f64>() {
        fix.hdop = hdop;
    }
    if let Ok(alt) = parts[9].parse::<f64>() {
        fix.altitude = alt;
    }
}
