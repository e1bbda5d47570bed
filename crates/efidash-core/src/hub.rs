//! Subscriber fan-out
//!
//! Delivers merged frames to any number of subscribers over bounded
//! channels. Publication never blocks: a subscriber that stops draining
//! its channel loses frames, everyone else keeps receiving. A new
//! subscriber gets a one-shot configuration snapshot before any data.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, RwLock, Weak};

use crate::config::Config;
use crate::ecu::DataFrame;
use crate::gps::GpsFix;
use crate::odometer::{OdoSnapshot, Odometer};
use crate::speed::SpeedReading;

/// Per-subscriber channel depth. Absorbs a ~3 s consumer stall at the
/// default 20 Hz broadcast rate before frames start dropping.
pub const SUBSCRIBER_CAPACITY: usize = 64;

/// One broadcast to subscribers: latest snapshots of everything.
///
/// Either of `ecu`/`gps` may be absent; `config` only appears in the
/// greeting frame sent on registration.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ecu: Option<DataFrame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps: Option<GpsFix>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Config>,
    pub odometer: OdoSnapshot,
    pub speed: SpeedReading,
    /// Unix milliseconds at merge time
    pub stamp_ms: i64,
}

/// A registered subscriber's receiving end. Dropping it unregisters.
pub struct Subscription {
    id: u64,
    pub rx: Receiver<Arc<MergedFrame>>,
    hub: Weak<Hub>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.subscribers.write().unwrap().remove(&self.id);
        }
    }
}

/// Frame distribution point shared by the scheduler and the embedder
pub struct Hub {
    config: Config,
    odometer: Arc<Odometer>,
    subscribers: RwLock<HashMap<u64, SyncSender<Arc<MergedFrame>>>>,
    next_id: AtomicU64,
}

impl Hub {
    pub fn new(config: Config, odometer: Arc<Odometer>) -> Arc<Self> {
        Arc::new(Self {
            config,
            odometer,
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        })
    }

    /// Register a subscriber. Its channel already contains the
    /// configuration snapshot when this returns.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = sync_channel(SUBSCRIBER_CAPACITY);

        let greeting = MergedFrame {
            ecu: None,
            gps: None,
            config: Some(self.config.clone()),
            odometer: self.odometer.snapshot(),
            speed: SpeedReading::none(),
            stamp_ms: Utc::now().timestamp_millis(),
        };
        // Capacity is 64 and the channel is empty; this cannot fail.
        let _ = tx.try_send(Arc::new(greeting));

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().unwrap().insert(id, tx);
        log::info!("hub: subscriber {} registered ({} total)", id, self.subscriber_count());

        Subscription {
            id,
            rx,
            hub: Arc::downgrade(self),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap().len()
    }

    /// Fan a frame out to every subscriber without blocking. Full
    /// channels drop the frame for that subscriber only.
    pub fn publish(&self, frame: MergedFrame) {
        let frame = Arc::new(frame);
        let subscribers = self.subscribers.read().unwrap();
        for tx in subscribers.values() {
            match tx.try_send(Arc::clone(&frame)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    // Subscriber too slow, skip
                }
                Err(TrySendError::Disconnected(_)) => {
                    // Receiver gone; its Drop removes the entry
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn hub() -> (Arc<Hub>, TempDir) {
        let dir = TempDir::new().unwrap();
        let odometer = Arc::new(Odometer::load(&dir.path().join("odo.dat")));
        (Hub::new(Config::default(), odometer), dir)
    }

    fn data_frame(rpm: u16) -> MergedFrame {
        MergedFrame {
            ecu: Some(DataFrame {
                rpm,
                ..Default::default()
            }),
            gps: None,
            config: None,
            odometer: OdoSnapshot {
                total_km: 0.0,
                trip_km: 0.0,
            },
            speed: SpeedReading::none(),
            stamp_ms: 0,
        }
    }

    #[test]
    fn test_greeting_precedes_data() {
        let (hub, _dir) = hub();
        let sub = hub.subscribe();
        hub.publish(data_frame(3000));

        let first = sub.rx.try_recv().unwrap();
        assert!(first.config.is_some());
        assert!(first.ecu.is_none());

        let second = sub.rx.try_recv().unwrap();
        assert!(second.config.is_none());
        assert_eq!(second.ecu.as_ref().unwrap().rpm, 3000);
    }

    #[test]
    fn test_fanout_to_multiple_subscribers() {
        let (hub, _dir) = hub();
        let a = hub.subscribe();
        let b = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        hub.publish(data_frame(1500));
        let _ = a.rx.try_recv().unwrap(); // greeting
        let _ = b.rx.try_recv().unwrap();
        assert_eq!(a.rx.try_recv().unwrap().ecu.as_ref().unwrap().rpm, 1500);
        assert_eq!(b.rx.try_recv().unwrap().ecu.as_ref().unwrap().rpm, 1500);
    }

    #[test]
    fn test_slow_subscriber_drops_frames_without_blocking() {
        let (hub, _dir) = hub();
        let stalled = hub.subscribe(); // never drained
        let healthy = hub.subscribe();

        // Overfill: greeting + capacity + extra
        for i in 0..(SUBSCRIBER_CAPACITY + 10) {
            hub.publish(data_frame(i as u16));
        }

        // The healthy subscriber drains everything published to it
        let mut healthy_frames = 0;
        let _ = healthy.rx.try_recv().unwrap(); // greeting
        while healthy.rx.try_recv().is_ok() {
            healthy_frames += 1;
        }
        // Greeting consumed one slot, so the last 10+1 publishes dropped
        assert_eq!(healthy_frames, SUBSCRIBER_CAPACITY - 1);

        // The stalled subscriber holds exactly its capacity
        let mut stalled_frames = 0;
        while stalled.rx.try_recv().is_ok() {
            stalled_frames += 1;
        }
        assert_eq!(stalled_frames, SUBSCRIBER_CAPACITY);
    }

    #[test]
    fn test_drop_unregisters() {
        let (hub, _dir) = hub();
        let sub = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
        // Publishing into an empty set is a no-op
        hub.publish(data_frame(900));
    }

    #[test]
    fn test_merged_frame_json_shape() {
        let json = serde_json::to_value(&data_frame(4000)).unwrap();
        assert_eq!(json["ecu"]["rpm"], 4000);
        assert!(json.get("gps").is_none());
        assert!(json.get("config").is_none());
        assert_eq!(json["speed"]["source"], "none");
        assert_eq!(json["odometer"]["totalKm"], 0.0);
        assert!(json.get("stampMs").is_some());
    }
}
