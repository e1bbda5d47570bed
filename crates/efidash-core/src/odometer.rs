//! GPS odometer
//!
//! Accumulates great-circle distance between successive valid fixes into
//! a total and a resettable trip counter, both persisted as two lines of
//! decimal text. Stationary GPS wander is suppressed by a ~2 m minimum
//! step and a 1 km/h speed gate; position jumps beyond 500 m are treated
//! as receiver glitches and only reseed the reference point.

use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::gps::GpsFix;

/// Mean Earth radius, km (WGS-84)
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Steps below this are stationary noise
const MIN_STEP_KM: f64 = 0.002;

/// Steps above this are glitches
const MAX_STEP_KM: f64 = 0.5;

/// Fixes slower than this do not move the odometer
const MIN_SPEED_KMH: f64 = 1.0;

/// Great-circle distance between two lat/lon points in km (haversine)
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Odometer values published to subscribers, km rounded to one decimal
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OdoSnapshot {
    pub total_km: f64,
    pub trip_km: f64,
}

struct OdoState {
    total_km: f64,
    trip_km: f64,
    last_lat: f64,
    last_lon: f64,
    last_valid: bool,
}

/// Persistent distance accumulator fed from GPS fixes
pub struct Odometer {
    path: PathBuf,
    state: Mutex<OdoState>,
}

impl Odometer {
    /// Load persisted counters from `path`; a missing or unreadable file
    /// seeds both to zero.
    pub fn load(path: &Path) -> Self {
        let (total_km, trip_km) = match fs::read_to_string(path) {
            Ok(data) => {
                let mut lines = data.lines();
                let total = lines.next().and_then(|l| l.trim().parse().ok()).unwrap_or(0.0);
                let trip = lines.next().and_then(|l| l.trim().parse().ok()).unwrap_or(0.0);
                log::info!("odometer: loaded total={:.1} km, trip={:.1} km", total, trip);
                (total, trip)
            }
            Err(_) => {
                log::info!("odometer: no saved data at {}, starting at 0", path.display());
                (0.0, 0.0)
            }
        };

        Self {
            path: path.to_path_buf(),
            state: Mutex::new(OdoState {
                total_km,
                trip_km,
                last_lat: 0.0,
                last_lon: 0.0,
                last_valid: false,
            }),
        }
    }

    /// Feed one GPS fix. Invalid fixes and fixes below the speed gate
    /// are ignored entirely.
    pub fn apply(&self, fix: &GpsFix) {
        if !fix.valid || fix.speed <= MIN_SPEED_KMH {
            return;
        }

        let mut state = self.state.lock().unwrap();

        if !state.last_valid {
            // First valid fix seeds the reference point only
            state.last_lat = fix.latitude;
            state.last_lon = fix.longitude;
            state.last_valid = true;
            return;
        }

        let dist = haversine_km(state.last_lat, state.last_lon, fix.latitude, fix.longitude);

        if dist > MAX_STEP_KM {
            // Glitch: reseed, never accumulate
            state.last_lat = fix.latitude;
            state.last_lon = fix.longitude;
            return;
        }

        if dist > MIN_STEP_KM {
            state.total_km += dist;
            state.trip_km += dist;
            state.last_lat = fix.latitude;
            state.last_lon = fix.longitude;
        }
        // Sub-threshold movement: hold the reference so creep at a stop
        // light never adds up.
    }

    /// Current values rounded to one decimal for display
    pub fn snapshot(&self) -> OdoSnapshot {
        let state = self.state.lock().unwrap();
        OdoSnapshot {
            total_km: (state.total_km * 10.0).round() / 10.0,
            trip_km: (state.trip_km * 10.0).round() / 10.0,
        }
    }

    /// Exact counter values (not rounded)
    pub fn totals(&self) -> (f64, f64) {
        let state = self.state.lock().unwrap();
        (state.total_km, state.trip_km)
    }

    /// Zero the trip counter and persist immediately. The total is
    /// untouched.
    pub fn reset_trip(&self) -> io::Result<()> {
        self.state.lock().unwrap().trip_km = 0.0;
        self.persist()
    }

    /// Write both counters to disk atomically (temp file + rename)
    pub fn persist(&self) -> io::Result<()> {
        let (total, trip) = self.totals();

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, format!("{:.6}\n{:.6}\n", total, trip))?;
        fs::rename(&tmp, &self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fix(lat: f64, lon: f64, speed: f64) -> GpsFix {
        GpsFix {
            valid: true,
            latitude: lat,
            longitude: lon,
            speed,
            ..Default::default()
        }
    }

    fn odo() -> (Odometer, TempDir) {
        let dir = TempDir::new().unwrap();
        let odo = Odometer::load(&dir.path().join("odometer.dat"));
        (odo, dir)
    }

    #[test]
    fn test_haversine_known_distance() {
        // Toronto to Ottawa, roughly 352 km
        let d = haversine_km(43.6532, -79.3832, 45.4215, -75.6972);
        assert!((d - 352.0).abs() < 5.0);
        assert_eq!(haversine_km(43.0, -79.0, 43.0, -79.0), 0.0);
    }

    #[test]
    fn test_first_fix_seeds_without_accumulating() {
        let (odo, _dir) = odo();
        odo.apply(&fix(43.6532, -79.3832, 30.0));
        assert_eq!(odo.totals(), (0.0, 0.0));
    }

    #[test]
    fn test_accumulates_ten_meters() {
        let (odo, _dir) = odo();
        odo.apply(&fix(43.6532, -79.3832, 30.0));
        odo.apply(&fix(43.65329, -79.3832, 30.0)); // ~10 m north

        let (total, trip) = odo.totals();
        assert!((total - 0.010).abs() < 0.001, "total = {}", total);
        assert!((trip - 0.010).abs() < 0.001);
    }

    #[test]
    fn test_jump_reseeds_without_accumulating() {
        let (odo, _dir) = odo();
        odo.apply(&fix(43.6532, -79.3832, 30.0));
        odo.apply(&fix(43.65329, -79.3832, 30.0));
        let (before, _) = odo.totals();

        // ~11 km jump: glitch, reseed only
        odo.apply(&fix(43.75, -79.38, 30.0));
        let (after, _) = odo.totals();
        assert_eq!(before, after);

        // Distance resumes from the reseeded point
        odo.apply(&fix(43.75009, -79.38, 30.0)); // ~10 m from the new seed
        let (resumed, _) = odo.totals();
        assert!((resumed - before - 0.010).abs() < 0.001);
    }

    #[test]
    fn test_sub_two_meter_steps_hold_position() {
        let (odo, _dir) = odo();
        let base_lat = 43.6532;
        odo.apply(&fix(base_lat, -79.3832, 30.0));

        // ~1.1 m: below threshold, reference must not move
        odo.apply(&fix(base_lat + 0.00001, -79.3832, 30.0));
        assert_eq!(odo.totals().0, 0.0);

        // ~3.3 m from the original seed; if the reference had crept
        // along, this step would measure under 2 m and be lost
        odo.apply(&fix(base_lat + 0.00003, -79.3832, 30.0));
        let (total, _) = odo.totals();
        assert!(total > 0.002, "total = {}", total);
    }

    #[test]
    fn test_invalid_or_slow_fixes_ignored() {
        let (odo, _dir) = odo();
        odo.apply(&fix(43.6532, -79.3832, 30.0));

        let mut invalid = fix(43.66, -79.3832, 30.0);
        invalid.valid = false;
        odo.apply(&invalid);

        odo.apply(&fix(43.66, -79.3832, 0.5)); // below the speed gate
        assert_eq!(odo.totals(), (0.0, 0.0));
    }

    #[test]
    fn test_totals_monotonic() {
        let (odo, _dir) = odo();
        let mut lat = 43.6532;
        let mut last_total = 0.0;
        odo.apply(&fix(lat, -79.3832, 40.0));
        for _ in 0..50 {
            lat += 0.00005; // ~5.5 m per step
            odo.apply(&fix(lat, -79.3832, 40.0));
            let (total, trip) = odo.totals();
            assert!(total >= last_total);
            assert!(trip >= 0.0);
            last_total = total;
        }
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("odometer.dat");

        let odo = Odometer::load(&path);
        odo.apply(&fix(43.6532, -79.3832, 30.0));
        let mut lat = 43.6532;
        for _ in 0..10 {
            lat += 0.0001; // ~11 m
            odo.apply(&fix(lat, -79.3832, 30.0));
        }
        odo.persist().unwrap();

        let reloaded = Odometer::load(&path);
        let (total, trip) = reloaded.totals();
        assert!((total - odo.totals().0).abs() < 1e-6);
        assert!((trip - odo.totals().1).abs() < 1e-6);
        assert!(total > 0.1);
    }

    #[test]
    fn test_corrupt_file_seeds_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("odometer.dat");
        fs::write(&path, "not a number\ngarbage\n").unwrap();

        let odo = Odometer::load(&path);
        assert_eq!(odo.totals(), (0.0, 0.0));
    }

    #[test]
    fn test_reset_trip_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("odometer.dat");
        fs::write(&path, "1234.500000\n56.700000\n").unwrap();

        let odo = Odometer::load(&path);
        odo.reset_trip().unwrap();
        assert_eq!(odo.totals(), (1234.5, 0.0));
        odo.reset_trip().unwrap();
        assert_eq!(odo.totals(), (1234.5, 0.0));

        // The reset was persisted immediately
        let reloaded = Odometer::load(&path);
        assert_eq!(reloaded.totals(), (1234.5, 0.0));
    }

    #[test]
    fn test_snapshot_rounds_to_one_decimal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("odometer.dat");
        fs::write(&path, "123.456789\n7.891234\n").unwrap();

        let odo = Odometer::load(&path);
        let snap = odo.snapshot();
        assert_eq!(snap.total_km, 123.5);
        assert_eq!(snap.trip_km, 7.9);
    }
}
