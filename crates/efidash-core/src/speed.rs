//! Speed source fusion
//!
//! Picks the best available vehicle speed: the ECU's wheel sensor when
//! it reads non-zero, otherwise GPS ground speed, otherwise nothing.

use serde::Serialize;

use crate::ecu::DataFrame;
use crate::gps::GpsFix;

/// Where the published speed value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedSource {
    EcuVss,
    Gps,
    None,
}

/// Unified speed value for display
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedReading {
    pub value_kmh: f64,
    pub source: SpeedSource,
}

impl SpeedReading {
    pub fn none() -> Self {
        Self {
            value_kmh: 0.0,
            source: SpeedSource::None,
        }
    }
}

/// Choose between ECU VSS and GPS speed
pub fn fuse(ecu: Option<&DataFrame>, gps: Option<&GpsFix>) -> SpeedReading {
    if let Some(frame) = ecu {
        if frame.vss > 0 {
            return SpeedReading {
                value_kmh: f64::from(frame.vss),
                source: SpeedSource::EcuVss,
            };
        }
    }
    if let Some(fix) = gps {
        if fix.valid {
            return SpeedReading {
                value_kmh: fix.speed,
                source: SpeedSource::Gps,
            };
        }
    }
    SpeedReading::none()
}
