//! GPS acquisition
//!
//! NMEA 0183 decoding over a serial port, plus a simulated provider for
//! development. A complete position update needs two sentences: RMC
//! (validity, position, speed, heading) and GGA (fix quality,
//! satellites, HDOP, altitude).

mod nmea;
mod sim;

pub use nmea::NmeaGps;
pub use sim::SimGps;

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{GpsConfig, GpsMode};
use crate::protocol::ProtocolError;

/// Build the provider selected by the configuration; `None` when GPS is
/// disabled
pub fn provider_for(cfg: &GpsConfig) -> Option<Arc<dyn GpsProvider>> {
    match cfg.mode {
        GpsMode::Nmea => Some(Arc::new(NmeaGps::new(&cfg.port_path, cfg.baud_rate))),
        GpsMode::Simulator => Some(Arc::new(SimGps::new())),
        GpsMode::Disabled => None,
    }
}

/// One GPS position snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpsFix {
    /// Receiver reports an active fix
    pub valid: bool,
    /// Decimal degrees, negative south
    pub latitude: f64,
    /// Decimal degrees, negative west
    pub longitude: f64,
    /// Ground speed, km/h
    pub speed: f64,
    /// Course over ground, degrees true
    pub heading: f64,
    /// Meters above mean sea level
    pub altitude: f64,
    pub satellites: u32,
    /// 0 = none, 1 = GPS, 2 = DGPS
    pub fix_quality: u8,
    pub hdop: f64,
    /// UTC time as reported by the receiver (hhmmss.ss)
    pub timestamp: String,
}

/// A GPS data source
pub trait GpsProvider: Send + Sync {
    /// Human-readable provider name for logs
    fn name(&self) -> &'static str;

    /// Open the link
    fn connect(&self) -> Result<(), ProtocolError>;

    /// Shut the link down; safe to call when already closed
    fn close(&self);

    fn is_connected(&self) -> bool;

    /// Read sentences until the current fix has absorbed one RMC and
    /// one GGA, the deadline expires, or the per-call line limit is
    /// reached. Returns a copy of the latest fix either way.
    fn poll(&self, deadline: Duration) -> Result<GpsFix, ProtocolError>;
}
