//! Demo ECU provider
//!
//! Generates realistic engine data for development and UI work without a
//! serial connection: RPM cycling between idle and revs, load-following
//! sensors, warm-up and afterstart windows, occasional knock under load.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

use super::{DataFrame, EcuProvider};
use crate::protocol::ProtocolError;

struct DemoState {
    connected: bool,
    /// Virtual time accumulator, advanced per poll
    t: f64,
    rng: StdRng,
}

/// Simulated ECU behind the same provider interface as the real driver
pub struct DemoEcu {
    stoich: f64,
    state: Mutex<DemoState>,
}

impl DemoEcu {
    pub fn new(stoich: f64) -> Self {
        Self {
            stoich,
            state: Mutex::new(DemoState {
                connected: false,
                t: 0.0,
                rng: StdRng::from_entropy(),
            }),
        }
    }
}

impl Default for DemoEcu {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_STOICH)
    }
}

impl EcuProvider for DemoEcu {
    fn name(&self) -> &'static str {
        "Demo (Simulated)"
    }

    fn connect(&self) -> Result<(), ProtocolError> {
        self.state.lock().unwrap().connected = true;
        Ok(())
    }

    fn close(&self) {
        self.state.lock().unwrap().connected = false;
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    fn poll(&self) -> Result<DataFrame, ProtocolError> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(ProtocolError::NotConnected);
        }

        state.t += 0.05; // ~20 Hz tick
        let t = state.t;
        let rng = &mut state.rng;

        // RPM cycles between idle and revving
        let rpm_base = 850.0 + 4000.0 * (t * 0.3).sin() * (t * 0.3).sin();
        let rpm = (rpm_base + rng.gen_range(0.0..50.0)) as u16;

        let map = (30.0 + (f64::from(rpm) - 850.0) / (8000.0 - 850.0) * 170.0) as u16;
        let tps = ((f64::from(rpm) - 850.0) / (8000.0 - 850.0) * 100.0).clamp(0.0, 100.0);

        let advance = (10.0 + tps / 100.0 * 28.0) as i8;
        let coolant = 85.0 + rng.gen_range(0.0..5.0);
        let iat = 30.0 + rng.gen_range(0.0..8.0);

        let afr = (14.7 - tps / 100.0 * 1.5 + rng.gen_range(0.0..0.4)).clamp(10.0, 18.0);
        let battery = 13.8 + rng.gen_range(0.0..0.4);

        let pw1 = 2.0 + tps / 100.0 * 10.0;
        let ve = (40.0 + tps / 100.0 * 55.0) as u8;

        let duty_cycle = if rpm > 0 {
            let cycle_ms = 60_000.0 / f64::from(rpm) * 2.0;
            (pw1 / cycle_ms * 100.0).min(100.0)
        } else {
            0.0
        };

        let vss = (tps / 100.0 * 220.0) as u16;
        let gear = match vss {
            v if v > 180 => 6,
            v if v > 140 => 5,
            v if v > 100 => 4,
            v if v > 60 => 3,
            v if v > 30 => 2,
            v if v > 5 => 1,
            _ => 0,
        };

        let oil_pressure = if rpm < 500 {
            (f64::from(rpm) / 500.0 * 15.0) as u8
        } else {
            (15.0 + tps / 100.0 * 45.0) as u8
        };

        let mut f = DataFrame {
            secl: (t * 20.0) as u8,
            rpm,
            map,
            tps,
            afr,
            lambda: afr / self.stoich,
            advance,
            advance1: advance,
            advance2: advance.saturating_sub(2),

            coolant,
            iat,

            pulse_width1: pw1,
            pulse_width2: pw1,
            pulse_width3: pw1 * 0.95,
            pulse_width4: pw1 * 0.95,
            ve1: ve,
            ve2: ve.saturating_sub(5),
            ve_curr: ve,
            afr_target: 14.7,
            duty_cycle,

            gamma_enrich: 95 + rng.gen_range(0..10),
            ego_correction: 95 + rng.gen_range(0..10),
            air_correction: 98 + rng.gen_range(0..4),
            warmup_enrich: 100,
            bat_correction: 100 + rng.gen_range(0..5),
            baro_correction: 100,
            accel_enrich: rng.gen_range(0..5),

            battery_voltage: battery,
            dwell: 3.5,
            dwell_actual: 3.4,

            boost_target: (map / 2) as u8,
            boost_duty: (tps / 100.0 * 80.0) as u8,

            vss,
            gear,

            fuel_pressure: 43,
            oil_pressure,
            baro: 101,

            vvt1_angle: f64::from((tps / 100.0 * 40.0) as i16) * 0.5,
            vvt1_target: tps / 100.0 * 20.0,
            vvt1_duty: tps / 100.0 * 80.0,
            vvt2_angle: f64::from((tps / 100.0 * 30.0) as i16) * 0.5,
            vvt2_target: tps / 100.0 * 15.0,
            vvt2_duty: tps / 100.0 * 60.0,

            flex_fuel_cor: 100,

            afr2: afr + 0.2,
            emap: (100.0 + tps / 100.0 * 50.0) as u16,

            idle_load: 25 + rng.gen_range(0..5),
            cl_idle_target: 850,

            running: true,
            sync: true,
            dfco_on: tps < 1.0 && rpm > 2000,

            fuel_load: f64::from(map),
            ign_load: f64::from(map),
            map_dot: rng.gen_range(-10..10),
            rpm_dot: ((f64::from(rpm) - rpm_base) * 2.0) as i16,

            loops_per_second: 5000 + rng.gen_range(0..200),
            free_ram: 4096 + rng.gen_range(0..512),

            ..Default::default()
        };

        // Fan kicks in with coolant temperature
        if coolant > 90.0 {
            f.fan_status = true;
            f.fan_duty = ((coolant - 85.0) / 20.0 * 100.0).min(100.0);
        }

        // Warm-up enrichment when cold
        if coolant < 60.0 {
            f.warmup = true;
            f.warmup_enrich = (100.0 + (60.0 - coolant) * 1.5) as u8;
        }

        // Afterstart enrichment window
        if t < 30.0 {
            f.ase = true;
            f.ase_curr = (120.0 - t * 2.0) as u8;
        }

        // Occasional knock at high load
        if tps > 85.0 && rpm > 5000 && rng.gen_bool(0.08) {
            f.knock_count = rng.gen_range(1..4);
            f.knock_cor = rng.gen_range(2..6);
        }

        Ok(f)
    }
}
