//! # efidash Core Library
//!
//! Realtime acquisition and fan-out core for the efidash engine dashboard.
//!
//! This library provides:
//! - Serial protocol communication with Speeduino ECUs (raw and
//!   CRC32-enveloped TunerStudio variants)
//! - NMEA 0183 GPS decoding with RMC/GGA fusion
//! - A GPS-driven persistent odometer
//! - Concurrent ECU/GPS polling with merged-frame broadcast to
//!   bounded subscriber channels
//!
//! The presentation layer (HTTP, WebSocket, rendering) is a separate
//! concern: it registers with [`hub::Hub`] and consumes
//! [`hub::MergedFrame`] values.
//!
//! ## Example
//!
//! ```rust,ignore
//! use efidash_core::prelude::*;
//! use std::sync::Arc;
//!
//! let config = Config::default();
//! let ecu: Arc<dyn EcuProvider> = Arc::new(DemoEcu::new(config.ecu.stoich));
//! let gps: Arc<dyn GpsProvider> = Arc::new(SimGps::new());
//!
//! let scheduler = Scheduler::new(config, ecu, Some(gps));
//! let mut sub = scheduler.hub().subscribe();
//! let handle = scheduler.start();
//!
//! let frame = sub.rx.recv()?; // first frame carries the config snapshot
//! handle.shutdown();
//! ```

pub mod config;
pub mod ecu;
pub mod gps;
pub mod hub;
pub mod odometer;
pub mod protocol;
pub mod scheduler;
pub mod speed;
pub mod supervisor;
pub mod transport;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, EcuConfig, EcuKind, GpsConfig, GpsMode, ProtocolKind};
    pub use crate::ecu::{DataFrame, DemoEcu, EcuProvider, RawResponse, SpeeduinoEcu};
    pub use crate::gps::{GpsFix, GpsProvider, NmeaGps, SimGps};
    pub use crate::hub::{Hub, MergedFrame, Subscription};
    pub use crate::odometer::{OdoSnapshot, Odometer};
    pub use crate::protocol::ProtocolError;
    pub use crate::scheduler::{CancelToken, Scheduler, SchedulerHandle};
    pub use crate::speed::{fuse, SpeedReading, SpeedSource};
    pub use crate::supervisor::connect_with_retry;
    pub use crate::transport::{ScriptedTransport, Transport, TtyTransport};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
