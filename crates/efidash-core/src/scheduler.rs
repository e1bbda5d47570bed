//! Scheduler / fan-out
//!
//! Runs the acquisition loops as independent threads sharing one
//! cancellation token: an ECU poller at the configured rate, a GPS
//! poller at 10 Hz, a broadcast ticker merging the latest snapshots,
//! and a 30-second odometer persistence ticker. Each device's
//! *poll → parse → store* sequence is ordered within its own thread;
//! across devices a broadcast may pair any ECU frame with any GPS fix.

use chrono::Utc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::Config;
use crate::ecu::{DataFrame, EcuProvider};
use crate::gps::{GpsFix, GpsProvider};
use crate::hub::{Hub, MergedFrame};
use crate::odometer::Odometer;
use crate::speed;
use crate::supervisor;

/// GPS poll loop period (10 Hz)
const GPS_TICK: Duration = Duration::from_millis(100);

/// Deadline handed to each GPS poll
const GPS_READ_DEADLINE: Duration = Duration::from_millis(200);

/// How often the odometer hits disk
const ODO_PERSIST_INTERVAL: Duration = Duration::from_secs(30);

/// Cooperative shutdown signal shared by all loops.
///
/// Timed waits double as tick timers: they return early when the token
/// fires, so shutdown never waits out a full tick.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal every waiter to exit
    pub fn cancel(&self) {
        let (flag, condvar) = &*self.inner;
        *flag.lock().unwrap() = true;
        condvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap()
    }

    /// Sleep for `timeout` or until cancelled, whichever comes first.
    /// Returns true when cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, condvar) = &*self.inner;
        let guard = flag.lock().unwrap();
        let (guard, _) = condvar
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap();
        *guard
    }
}

/// Running scheduler; joins all loops on shutdown
pub struct SchedulerHandle {
    cancel: CancelToken,
    threads: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Cancel every loop and wait for them to flush and exit
    pub fn shutdown(self) {
        self.cancel.cancel();
        for thread in self.threads {
            let _ = thread.join();
        }
    }
}

/// Wires providers, odometer and hub together and runs the poll loops
pub struct Scheduler {
    config: Config,
    ecu: Arc<dyn EcuProvider>,
    gps: Option<Arc<dyn GpsProvider>>,
    odometer: Arc<Odometer>,
    hub: Arc<Hub>,
    cancel: CancelToken,
}

impl Scheduler {
    pub fn new(
        config: Config,
        ecu: Arc<dyn EcuProvider>,
        gps: Option<Arc<dyn GpsProvider>>,
    ) -> Self {
        let odometer = Arc::new(Odometer::load(&config.odometer_path));
        let hub = Hub::new(config.clone(), Arc::clone(&odometer));
        Self {
            config,
            ecu,
            gps,
            odometer,
            hub,
            cancel: CancelToken::new(),
        }
    }

    pub fn hub(&self) -> Arc<Hub> {
        Arc::clone(&self.hub)
    }

    pub fn odometer(&self) -> Arc<Odometer> {
        Arc::clone(&self.odometer)
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Spawn the poll, broadcast and persistence loops
    pub fn start(self) -> SchedulerHandle {
        let ecu_tick = Duration::from_secs(1) / self.config.poll_hz();
        let latest_ecu: Arc<Mutex<Option<DataFrame>>> = Arc::new(Mutex::new(None));
        let latest_gps: Arc<Mutex<Option<GpsFix>>> = Arc::new(Mutex::new(None));

        let mut threads = Vec::new();

        // Initial-connect supervisors for devices not already linked up.
        // The pollers skip disconnected devices, so acquisition begins
        // whenever each connect lands.
        if !self.ecu.is_connected() {
            let ecu = Arc::clone(&self.ecu);
            let cancel = self.cancel.clone();
            threads.push(std::thread::spawn(move || {
                supervisor::connect_with_retry(ecu.name(), || ecu.connect(), &cancel);
            }));
        }
        if let Some(gps) = self.gps.clone() {
            if !gps.is_connected() {
                let cancel = self.cancel.clone();
                threads.push(std::thread::spawn(move || {
                    supervisor::connect_with_retry(gps.name(), || gps.connect(), &cancel);
                }));
            }
        }

        // ECU poller
        {
            let ecu = Arc::clone(&self.ecu);
            let cell = Arc::clone(&latest_ecu);
            let cancel = self.cancel.clone();
            threads.push(std::thread::spawn(move || {
                while !cancel.wait_timeout(ecu_tick) {
                    if !ecu.is_connected() {
                        continue;
                    }
                    match ecu.poll() {
                        Ok(frame) => *cell.lock().unwrap() = Some(frame),
                        Err(e) => log::warn!("ecu poll failed: {}", e),
                    }
                }
                ecu.close();
            }));
        }

        // GPS poller
        if let Some(gps) = self.gps.clone() {
            let cell = Arc::clone(&latest_gps);
            let odometer = Arc::clone(&self.odometer);
            let cancel = self.cancel.clone();
            threads.push(std::thread::spawn(move || {
                while !cancel.wait_timeout(GPS_TICK) {
                    match gps.poll(GPS_READ_DEADLINE) {
                        Ok(fix) => {
                            odometer.apply(&fix);
                            *cell.lock().unwrap() = Some(fix);
                        }
                        Err(e) => log::debug!("gps poll failed: {}", e),
                    }
                }
                gps.close();
            }));
        }

        // Broadcast ticker, at the ECU rate
        {
            let hub = Arc::clone(&self.hub);
            let odometer = Arc::clone(&self.odometer);
            let ecu_cell = Arc::clone(&latest_ecu);
            let gps_cell = Arc::clone(&latest_gps);
            let cancel = self.cancel.clone();
            threads.push(std::thread::spawn(move || {
                while !cancel.wait_timeout(ecu_tick) {
                    let ecu_snap = ecu_cell.lock().unwrap().clone();
                    let gps_snap = gps_cell.lock().unwrap().clone();

                    // Nothing acquired yet, nothing to say
                    if ecu_snap.is_none() && gps_snap.is_none() {
                        continue;
                    }

                    let speed = speed::fuse(ecu_snap.as_ref(), gps_snap.as_ref());
                    hub.publish(MergedFrame {
                        ecu: ecu_snap,
                        gps: gps_snap,
                        config: None,
                        odometer: odometer.snapshot(),
                        speed,
                        stamp_ms: Utc::now().timestamp_millis(),
                    });
                }
            }));
        }

        // Odometer persistence
        {
            let odometer = Arc::clone(&self.odometer);
            let cancel = self.cancel.clone();
            threads.push(std::thread::spawn(move || {
                loop {
                    let cancelled = cancel.wait_timeout(ODO_PERSIST_INTERVAL);
                    if let Err(e) = odometer.persist() {
                        log::warn!("odometer persist failed: {}", e);
                    }
                    if cancelled {
                        break;
                    }
                }
            }));
        }

        SchedulerHandle {
            cancel: self.cancel,
            threads,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_signals_waiters() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(!token.wait_timeout(Duration::from_millis(1)));

        let waiter = token.clone();
        let handle = std::thread::spawn(move || waiter.wait_timeout(Duration::from_secs(30)));
        std::thread::sleep(Duration::from_millis(20));
        token.cancel();
        // Returns promptly rather than after 30 s
        assert!(handle.join().unwrap());
        assert!(token.is_cancelled());
        assert!(token.wait_timeout(Duration::from_millis(1)));
    }
}
