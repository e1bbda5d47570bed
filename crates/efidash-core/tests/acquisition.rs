//! End-to-end acquisition tests: scripted and simulated providers wired
//! through the scheduler, frames observed at a subscriber.

use std::sync::Arc;
use std::time::{Duration, Instant};

use efidash_core::config::{Config, EcuConfig, ProtocolKind};
use efidash_core::ecu::{DemoEcu, EcuProvider, SpeeduinoEcu};
use efidash_core::gps::{GpsProvider, NmeaGps, SimGps};
use efidash_core::hub::MergedFrame;
use efidash_core::odometer::Odometer;
use efidash_core::protocol::wrap;
use efidash_core::scheduler::Scheduler;
use efidash_core::speed::SpeedSource;
use efidash_core::transport::ScriptedTransport;
use tempfile::TempDir;

const OCH_BLOCK_SIZE: usize = 130;

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.odometer_path = dir.path().join("odometer.dat");
    config
}

/// Collect frames from a subscription for roughly `window`
fn collect_frames(
    sub: &efidash_core::hub::Subscription,
    window: Duration,
) -> Vec<Arc<MergedFrame>> {
    let deadline = Instant::now() + window;
    let mut frames = Vec::new();
    while Instant::now() < deadline {
        if let Ok(frame) = sub.rx.recv_timeout(Duration::from_millis(50)) {
            frames.push(frame);
        }
    }
    frames
}

#[test]
fn test_demo_pipeline_publishes_merged_frames() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let ecu: Arc<dyn EcuProvider> = Arc::new(DemoEcu::new(config.ecu.stoich));
    let gps: Arc<dyn GpsProvider> = Arc::new(SimGps::new());
    ecu.connect().unwrap();
    gps.connect().unwrap();

    let scheduler = Scheduler::new(config, Arc::clone(&ecu), Some(gps));
    let sub = scheduler.hub().subscribe();
    let handle = scheduler.start();

    // Registration delivers the config snapshot before any data
    let greeting = sub.rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(greeting.config.is_some());
    assert!(greeting.ecu.is_none() && greeting.gps.is_none());

    let frames = collect_frames(&sub, Duration::from_millis(600));
    handle.shutdown();

    assert!(frames.len() >= 5, "got only {} frames", frames.len());
    // Every published frame carries at least one of the two snapshots
    for frame in &frames {
        assert!(frame.ecu.is_some() || frame.gps.is_some());
        assert!(frame.config.is_none());
    }
    // Both sources show up once the pollers have run
    let last = frames.last().unwrap();
    assert!(last.ecu.is_some());
    assert!(last.gps.is_some());
    assert!(last.ecu.as_ref().unwrap().rpm > 0);
    assert!(last.gps.as_ref().unwrap().valid);
    assert_ne!(last.speed.source, SpeedSource::None);
}

#[test]
fn test_sim_gps_drives_odometer_and_persists_on_shutdown() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let odo_path = config.odometer_path.clone();

    let ecu: Arc<dyn EcuProvider> = Arc::new(DemoEcu::default());
    ecu.connect().unwrap();
    let gps: Arc<dyn GpsProvider> = Arc::new(SimGps::new());

    let scheduler = Scheduler::new(config, ecu, Some(gps));
    let odometer = scheduler.odometer();
    let handle = scheduler.start();

    std::thread::sleep(Duration::from_millis(800));
    let (total, trip) = odometer.totals();
    handle.shutdown();

    // The simulator covers a few meters per fix at 10 Hz
    assert!(total > 0.0, "odometer never accumulated");
    assert_eq!(total, trip);

    // Shutdown flushed the counters to disk
    let reloaded = Odometer::load(&odo_path);
    let (saved_total, _) = reloaded.totals();
    assert!(saved_total > 0.0);
}

/// Build a framed OutputChannels block with the given rpm and vss
fn och_block(rpm: u16, vss: u16) -> Vec<u8> {
    let mut block = vec![0u8; OCH_BLOCK_SIZE];
    block[14..16].copy_from_slice(&rpm.to_le_bytes());
    block[104..106].copy_from_slice(&vss.to_le_bytes());
    block
}

#[test]
fn test_scripted_speeduino_connect_then_poll() {
    let driver = SpeeduinoEcu::new(&EcuConfig {
        protocol: ProtocolKind::Framed,
        ..EcuConfig::default()
    });

    let mut transport = ScriptedTransport::new();
    transport.push_reply(wrap(b"speeduino 202501"));
    transport.push_reply(wrap(&och_block(3600, 0)));
    driver.connect_over(Box::new(transport)).unwrap();

    assert!(driver.is_connected());
    let frame = driver.poll().unwrap();
    assert_eq!(frame.rpm, 3600);
}

#[test]
fn test_speed_source_switches_from_gps_to_vss() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    // ECU: framed driver over a script that reports vss = 0 for a while,
    // then vss = 55.
    let driver = Arc::new(SpeeduinoEcu::new(&EcuConfig {
        protocol: ProtocolKind::Framed,
        ..EcuConfig::default()
    }));
    let mut ecu_transport = ScriptedTransport::new();
    ecu_transport.push_reply(wrap(b"speeduino 202501"));
    for _ in 0..8 {
        ecu_transport.push_reply(wrap(&och_block(2000, 0)));
    }
    for _ in 0..8 {
        ecu_transport.push_reply(wrap(&och_block(2500, 55)));
    }
    driver.connect_over(Box::new(ecu_transport)).unwrap();

    // GPS: one valid RMC/GGA pair; the decoder keeps returning the last
    // fix afterwards.
    let rmc = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
    let gga = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
    let gps = Arc::new(NmeaGps::new("/dev/null", 9600));
    gps.connect_over(Box::new(ScriptedTransport::with_reply(
        format!("{}\r\n{}\r\n", rmc, gga).into_bytes(),
    )))
    .unwrap();

    let ecu: Arc<dyn EcuProvider> = driver;
    let gps: Arc<dyn GpsProvider> = gps;
    let scheduler = Scheduler::new(config, ecu, Some(gps));
    let sub = scheduler.hub().subscribe();
    let handle = scheduler.start();

    let _greeting = sub.rx.recv_timeout(Duration::from_secs(1)).unwrap();
    let frames = collect_frames(&sub, Duration::from_millis(1200));
    handle.shutdown();

    let first_gps = frames
        .iter()
        .position(|f| f.speed.source == SpeedSource::Gps);
    let first_vss = frames
        .iter()
        .position(|f| f.speed.source == SpeedSource::EcuVss);

    let gps_idx = first_gps.expect("no frame used GPS speed");
    let vss_idx = first_vss.expect("no frame used the wheel sensor");
    assert!(gps_idx < vss_idx, "VSS should take over only once non-zero");

    // 22.4 knots converted to km/h
    assert!((frames[gps_idx].speed.value_kmh - 22.4 * 1.852).abs() < 1e-6);
    assert_eq!(frames[vss_idx].speed.value_kmh, 55.0);
}

#[test]
fn test_transient_ecu_failure_keeps_last_frame_published() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let driver = Arc::new(SpeeduinoEcu::new(&EcuConfig {
        protocol: ProtocolKind::Framed,
        ..EcuConfig::default()
    }));
    let mut transport = ScriptedTransport::new();
    transport.push_reply(wrap(b"speeduino 202501"));
    transport.push_reply(wrap(&och_block(4000, 0)));
    // Script ends here: the next poll times out and drops the link
    driver.connect_over(Box::new(transport)).unwrap();

    let ecu: Arc<dyn EcuProvider> = driver;
    let scheduler = Scheduler::new(config, ecu, None);
    let sub = scheduler.hub().subscribe();
    let handle = scheduler.start();

    let _greeting = sub.rx.recv_timeout(Duration::from_secs(1)).unwrap();
    let frames = collect_frames(&sub, Duration::from_millis(500));
    handle.shutdown();

    // The one good poll keeps being rebroadcast from the latest cell
    assert!(!frames.is_empty());
    for frame in &frames {
        assert_eq!(frame.ecu.as_ref().unwrap().rpm, 4000);
    }
}

#[test]
fn test_provider_factories_follow_config() {
    let config = Config::default();
    let ecu = efidash_core::ecu::provider_for(&config.ecu);
    assert_eq!(ecu.name(), "Demo (Simulated)");

    let gps = efidash_core::gps::provider_for(&config.gps);
    assert_eq!(gps.unwrap().name(), "Simulated GPS");

    let mut disabled = config.gps.clone();
    disabled.mode = efidash_core::config::GpsMode::Disabled;
    assert!(efidash_core::gps::provider_for(&disabled).is_none());
}

#[test]
fn test_shutdown_is_prompt() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let ecu: Arc<dyn EcuProvider> = Arc::new(DemoEcu::default());
    ecu.connect().unwrap();
    let scheduler = Scheduler::new(config, ecu, Some(Arc::new(SimGps::new())));
    let handle = scheduler.start();

    std::thread::sleep(Duration::from_millis(150));
    let start = Instant::now();
    handle.shutdown();
    // All loops observe the token at their next tick; nobody sleeps out
    // the 30 s persistence interval.
    assert!(start.elapsed() < Duration::from_secs(2));
}
