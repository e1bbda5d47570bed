//! Simulated GPS provider
//!
//! Drives a circle of roughly 500 m radius around a fixed point at
//! 20-80 km/h. Enough motion for the odometer and speed displays to do
//! something interesting on a desk.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use std::time::Duration;

use super::{GpsFix, GpsProvider};
use crate::protocol::ProtocolError;

/// Circle center (Toronto)
const CENTER_LAT: f64 = 43.6532;
const CENTER_LON: f64 = -79.3832;

/// Circle radius in degrees, ~500 m
const RADIUS_DEG: f64 = 0.005;

struct SimState {
    t: f64,
    rng: StdRng,
}

/// Simulated GPS behind the same provider interface as the NMEA decoder
pub struct SimGps {
    state: Mutex<SimState>,
}

impl SimGps {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                t: 0.0,
                rng: StdRng::from_entropy(),
            }),
        }
    }
}

impl Default for SimGps {
    fn default() -> Self {
        Self::new()
    }
}

impl GpsProvider for SimGps {
    fn name(&self) -> &'static str {
        "Simulated GPS"
    }

    fn connect(&self) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn close(&self) {}

    fn is_connected(&self) -> bool {
        true
    }

    fn poll(&self, _deadline: Duration) -> Result<GpsFix, ProtocolError> {
        let mut state = self.state.lock().unwrap();
        state.t += 0.1;
        let t = state.t;
        let jitter = state.rng.gen_range(0.0..5.0);

        Ok(GpsFix {
            valid: true,
            latitude: CENTER_LAT + RADIUS_DEG * (t * 0.1).sin(),
            longitude: CENTER_LON + RADIUS_DEG * (t * 0.1).cos(),
            speed: 50.0 + 30.0 * (t * 0.3).sin() + jitter,
            heading: (t * 10.0) % 360.0,
            altitude: 76.0,
            satellites: 12,
            fix_quality: 1,
            hdop: 0.8,
            timestamp: Utc::now().format("%H%M%S%.2f").to_string(),
        })
    }
}
