//! Realtime data frame
//!
//! Normalized snapshot of the engine channels published to subscribers.
//! Field names and JSON casing follow the Speeduino OutputChannels
//! naming so downstream gauges can bind directly.

use serde::Serialize;

/// One decoded snapshot of all realtime engine channels.
///
/// Every field is either populated by the parser or left at its zero
/// value; consumers never see partially written frames.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFrame {
    // Core engine
    pub rpm: u16,
    /// Manifold absolute pressure, kPa
    pub map: u16,
    /// Throttle position, 0-100 %
    pub tps: f64,
    pub afr: f64,
    /// AFR normalized by the stoichiometric ratio
    pub lambda: f64,
    /// Ignition advance, degrees BTDC
    pub advance: i8,
    pub advance1: i8,
    pub advance2: i8,

    // Temperatures, °C (sensor offset of -40 already applied)
    pub coolant: f64,
    pub iat: f64,

    // Fuel
    pub pulse_width1: f64,
    pub pulse_width2: f64,
    pub pulse_width3: f64,
    pub pulse_width4: f64,
    pub ve1: u8,
    pub ve2: u8,
    pub ve_curr: u8,
    pub afr_target: f64,
    /// Injector duty, derived from pulse width and RPM
    pub duty_cycle: f64,

    // Corrections, %
    pub gamma_enrich: u16,
    pub ego_correction: u8,
    pub air_correction: u8,
    pub warmup_enrich: u8,
    pub bat_correction: u8,
    pub ase_curr: u8,
    pub baro_correction: u8,
    pub accel_enrich: u8,

    // Electrical
    pub battery_voltage: f64,
    /// Commanded dwell, ms
    pub dwell: f64,
    /// Measured dwell, ms
    pub dwell_actual: f64,

    // Boost
    pub boost_target: u8,
    pub boost_duty: u8,

    // Speed / transmission
    /// Vehicle speed sensor, km/h
    pub vss: u16,
    pub gear: u8,

    // Pressures, PSI
    pub fuel_pressure: u8,
    pub oil_pressure: u8,

    // VVT
    pub vvt1_angle: f64,
    pub vvt1_target: f64,
    pub vvt1_duty: f64,
    pub vvt2_angle: f64,
    pub vvt2_target: f64,
    pub vvt2_duty: f64,

    // Flex fuel
    pub flex_pct: u8,
    pub flex_fuel_cor: u8,
    pub flex_ign_cor: i8,

    // Exhaust
    pub afr2: f64,
    /// Exhaust manifold pressure, kPa
    pub emap: u16,
    /// Barometric pressure, kPa
    pub baro: u8,

    // Idle
    pub idle_load: u8,
    /// Closed-loop idle target, RPM
    pub cl_idle_target: u16,

    // Knock
    pub knock_count: u8,
    pub knock_cor: u8,

    // Status bits
    pub running: bool,
    pub cranking: bool,
    /// Afterstart enrichment active
    pub ase: bool,
    pub warmup: bool,
    /// Deceleration fuel cut active
    pub dfco_on: bool,
    /// Trigger sync achieved
    pub sync: bool,
    pub fan_status: bool,

    // Load
    pub fuel_load: f64,
    pub ign_load: f64,
    /// kPa/s
    pub map_dot: i16,
    /// rpm/s
    pub rpm_dot: i16,

    // Errors
    pub errors: u8,
    pub sync_loss: u8,

    // Misc
    pub loops_per_second: u16,
    pub free_ram: u16,
    pub fan_duty: f64,
    pub sd_status: u8,
    /// Firmware seconds counter; wraps at 256, not monotonic
    pub secl: u8,
}
