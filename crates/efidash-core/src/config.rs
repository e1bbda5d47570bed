//! Core configuration
//!
//! A frozen view of everything the acquisition core needs. File parsing
//! and environment overlays happen in the embedding application; the core
//! only ever sees the fully resolved record.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default ECU baud rate (Speeduino USB-serial)
pub const DEFAULT_ECU_BAUD: u32 = 115_200;

/// Default NMEA GPS baud rate
pub const DEFAULT_GPS_BAUD: u32 = 9_600;

/// Default ECU polling rate in Hz
pub const DEFAULT_POLL_HZ: u32 = 20;

/// Default stoichiometric AFR (gasoline)
pub const DEFAULT_STOICH: f64 = 14.7;

/// Which ECU backend to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EcuKind {
    /// Real Speeduino over a serial port
    Speeduino,
    /// Simulated data, no hardware required
    Demo,
}

/// Serial protocol variant, fixed at construction (no auto-detection)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    /// Unframed single-letter commands (`'n'` with `'A'` fallback)
    Plain,
    /// CRC32 envelope framing with `'Q'`/`'r'` payloads
    Framed,
}

/// GPS backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpsMode {
    /// NMEA 0183 receiver on a serial port
    Nmea,
    /// No GPS attached
    Disabled,
    /// Simulated circular drive
    Simulator,
}

/// ECU connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcuConfig {
    pub kind: EcuKind,
    /// tty device path, e.g. `/dev/ttySpeeduino`
    pub port_path: String,
    pub baud_rate: u32,
    /// CAN id for the framed `'r'` command; ignored in plain mode
    pub can_id: u8,
    /// Stoichiometric ratio for the derived lambda channel
    pub stoich: f64,
    pub poll_hz: u32,
    pub protocol: ProtocolKind,
}

impl Default for EcuConfig {
    fn default() -> Self {
        Self {
            kind: EcuKind::Demo,
            port_path: "/dev/ttySpeeduino".to_string(),
            baud_rate: DEFAULT_ECU_BAUD,
            can_id: 0,
            stoich: DEFAULT_STOICH,
            poll_hz: DEFAULT_POLL_HZ,
            protocol: ProtocolKind::Framed,
        }
    }
}

/// GPS connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpsConfig {
    pub mode: GpsMode,
    /// tty device path, e.g. `/dev/ttyGPS`
    pub port_path: String,
    pub baud_rate: u32,
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            mode: GpsMode::Simulator,
            port_path: "/dev/ttyGPS".to_string(),
            baud_rate: DEFAULT_GPS_BAUD,
        }
    }
}

/// Resolved core configuration, read-only during operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub ecu: EcuConfig,
    pub gps: GpsConfig,
    /// Persistence target for the odometer counters
    pub odometer_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ecu: EcuConfig::default(),
            gps: GpsConfig::default(),
            odometer_path: PathBuf::from("/var/lib/efidash/odometer.dat"),
        }
    }
}

impl Config {
    /// Effective ECU poll rate, guarding against a zero from the embedder
    pub fn poll_hz(&self) -> u32 {
        if self.ecu.poll_hz == 0 {
            DEFAULT_POLL_HZ
        } else {
            self.ecu.poll_hz
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.ecu.baud_rate, DEFAULT_ECU_BAUD);
        assert_eq!(cfg.gps.baud_rate, DEFAULT_GPS_BAUD);
        assert_eq!(cfg.ecu.stoich, DEFAULT_STOICH);
        assert_eq!(cfg.poll_hz(), 20);
    }

    #[test]
    fn test_poll_hz_zero_guard() {
        let mut cfg = Config::default();
        cfg.ecu.poll_hz = 0;
        assert_eq!(cfg.poll_hz(), DEFAULT_POLL_HZ);
    }

    #[test]
    fn test_protocol_kind_serde() {
        let json = serde_json::to_string(&ProtocolKind::Framed).unwrap();
        assert_eq!(json, "\"framed\"");
        let back: ProtocolKind = serde_json::from_str("\"plain\"").unwrap();
        assert_eq!(back, ProtocolKind::Plain);
    }
}
