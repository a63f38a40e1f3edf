use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tempfile::TempDir;

use navicap::config::DistributionSettings;
use navicap::{
    AlertConfig, BoundingBox, Category, ConfigChannel, ConfigStore, Detection, DistributionLoop, Frame,
    FusionEngine, FusionTunables, MemoryTransport, ObstacleChannel, ObstacleProducer,
    SubscriberHandle, Topic, TrafficColor, TransportEvent,
};

fn open_loop(dir: &Path) -> DistributionLoop<MemoryTransport> {
    let obstacle = ObstacleChannel::new(dir.join("obstacle.json"));
    let config = ConfigChannel::open(dir.join("config.json")).expect("open config");
    DistributionLoop::new(
        MemoryTransport::new(),
        obstacle,
        config,
        &DistributionSettings::default(),
    )
}

fn subscribe(dist: &mut DistributionLoop<MemoryTransport>, topic: Topic) {
    dist.handle(TransportEvent::Subscribe {
        topic,
        handle: SubscriberHandle::new("phone"),
    })
    .expect("subscribe");
}

#[test]
fn producer_document_reaches_subscriber_within_one_poll() {
    let dir = TempDir::new().unwrap();
    let mut dist = open_loop(dir.path());
    subscribe(&mut dist, Topic::Obstacle);

    fs::write(
        dir.path().join("obstacle.json"),
        r#"{"obstacle":"person","distance":1.20,"traffic":"unknown"}"#,
    )
    .unwrap();
    dist.tick(Instant::now() + Duration::from_millis(500));

    let sent = dist
        .transport()
        .last_notified_json(Topic::Obstacle)
        .expect("obstacle notification");
    assert_eq!(sent["obstacle"], "person");
    assert_eq!(sent["distance"], 1.2);
    assert_eq!(sent["traffic"], "unknown");
    assert!(sent["ts"].as_str().is_some_and(|ts| ts.ends_with('Z')));
}

#[test]
fn remote_write_is_merged_persisted_and_echoed() {
    let dir = TempDir::new().unwrap();
    let mut dist = open_loop(dir.path());
    subscribe(&mut dist, Topic::ConfigState);

    dist.handle(TransportEvent::Write {
        topic: Topic::ConfigWrite,
        payload: br#"{"sound": false, "alerts_enabled": ["person"]}"#.to_vec(),
    })
    .unwrap();

    let echo = dist
        .transport()
        .last_notified_json(Topic::ConfigState)
        .expect("config echo");
    assert_eq!(echo["sound"], false);
    assert_eq!(echo["vibration"], true);
    assert_eq!(echo["alerts_enabled"], json!(["person"]));

    let on_disk: Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("config.json")).unwrap())
            .unwrap();
    assert_eq!(on_disk["sound"], false);
    assert_eq!(on_disk["alerts_enabled"], json!(["person"]));
    assert_eq!(on_disk["timestamp"], echo["timestamp"]);

    // The loop's own write is not reported back as an external change.
    let before = dist.transport().notifications().len();
    assert!(!dist.poll_config().unwrap());
    assert_eq!(dist.transport().notifications().len(), before);
}

#[test]
fn legacy_obstacles_toggle_disables_every_category() {
    const PAYLOAD: &[u8] = br#"{"vibration_intensity":75,"obstacles_enabled":false}"#;

    let dir = TempDir::new().unwrap();
    let mut dist = open_loop(dir.path());
    subscribe(&mut dist, Topic::ConfigState);
    dist.handle(TransportEvent::Write {
        topic: Topic::ConfigWrite,
        payload: PAYLOAD.to_vec(),
    })
    .unwrap();

    let echo = dist
        .transport()
        .last_notified_json(Topic::ConfigState)
        .expect("config echo");
    assert_eq!(echo["vibration_intensity"], 75.0);
    assert_eq!(echo["alerts_enabled"], json!([]));
    assert_eq!(echo["vibration"], true);

    let other = TempDir::new().unwrap();
    let mut channel = ConfigChannel::open(other.path().join("config.json")).unwrap();
    let mut transport = MemoryTransport::new();
    channel
        .subscribe(SubscriberHandle::new("phone"), &mut transport)
        .unwrap();
    let outcome = channel
        .write(PAYLOAD, &mut transport)
        .unwrap()
        .expect("merged");
    assert!(outcome.enabled_now.is_empty());
    assert_eq!(outcome.disabled_now, Category::ALL.to_vec());
    assert!(outcome.config.alerts_enabled.is_empty());
    assert_eq!(
        transport.last_notified_json(Topic::ConfigState).unwrap()["alerts_enabled"],
        json!([])
    );
}

#[test]
fn read_delivers_external_config_edit_to_subscriber() {
    let dir = TempDir::new().unwrap();
    let mut dist = open_loop(dir.path());
    subscribe(&mut dist, Topic::ConfigState);

    fs::write(dir.path().join("config.json"), r#"{"sound": false}"#).unwrap();
    dist.handle(TransportEvent::Read {
        topic: Topic::ConfigState,
    })
    .unwrap();
    assert!(!dist.poll_config().unwrap());

    let pushed = dist.transport().notifications_for(Topic::ConfigState);
    assert_eq!(pushed.len(), 2);
    let last: Value = serde_json::from_slice(&pushed[1].payload).unwrap();
    assert_eq!(last["sound"], false);
}

#[test]
fn torn_obstacle_write_is_retried_not_skipped() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("obstacle.json");
    let mut dist = open_loop(dir.path());
    subscribe(&mut dist, Topic::Obstacle);

    fs::write(&path, "").unwrap();
    assert!(!dist.poll_obstacle().unwrap());
    fs::write(&path, r#"{"obstacle":"do"#).unwrap();
    assert!(!dist.poll_obstacle().unwrap());
    assert!(dist.transport().notifications().is_empty());
    assert_eq!(dist.obstacle().current().obstacle, "ready");

    fs::write(&path, r#"{"obstacle":"door","distance":0.7,"traffic":"green"}"#).unwrap();
    assert!(dist.poll_obstacle().unwrap());
    let sent = dist.transport().last_notified_json(Topic::Obstacle).unwrap();
    assert_eq!(sent["obstacle"], "door");
    assert_eq!(dist.transport().notifications().len(), 1);
}

#[test]
fn external_config_edit_is_pushed_and_matches_remote_write() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("config.json");
    let mut dist = open_loop(dir.path());
    subscribe(&mut dist, Topic::ConfigState);

    fs::write(
        &config_path,
        r#"{"vibration": "false", "volume_intensity": "20", "alerts_enabled": ["stairs"]}"#,
    )
    .unwrap();
    assert!(dist.poll_config().unwrap());
    let external = dist.config().store().current().clone();

    let other = TempDir::new().unwrap();
    let mut remote = open_loop(other.path());
    remote
        .handle(TransportEvent::Write {
            topic: Topic::ConfigWrite,
            payload: br#"{"vibration": "false", "volume_intensity": "20", "alerts_enabled": ["stairs"]}"#
                .to_vec(),
        })
        .unwrap();
    let mut written = remote.config().store().current().clone();
    written.timestamp = external.timestamp;
    assert_eq!(written, external);

    let pushed = dist.transport().last_notified_json(Topic::ConfigState).unwrap();
    assert_eq!(pushed["vibration"], false);
    assert_eq!(pushed["volume_intensity"], 20.0);
}

#[test]
fn saved_config_reloads_to_the_same_cache() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    let mut store = ConfigStore::open(&path).unwrap();
    let config = AlertConfig {
        vibration: false,
        vibration_intensity: 10.0,
        sound: true,
        volume_intensity: 99.5,
        alerts_enabled: Default::default(),
        min_distance: 0.5,
        max_distance: 2.5,
        timestamp: 0,
    };
    store.save(config).unwrap();

    let reloaded = ConfigStore::open(&path).unwrap();
    assert_eq!(reloaded.current(), store.current());
}

#[test]
fn subscription_pushes_baseline_and_heartbeats() {
    let dir = TempDir::new().unwrap();
    let mut dist = open_loop(dir.path());
    assert!(!dist.heartbeat().unwrap());

    subscribe(&mut dist, Topic::ConfigState);
    assert_eq!(
        dist.transport().notifications_for(Topic::ConfigState).len(),
        1
    );

    dist.tick(Instant::now() + Duration::from_secs(11));
    assert_eq!(
        dist.transport().notifications_for(Topic::ConfigState).len(),
        2
    );

    dist.handle(TransportEvent::Unsubscribe {
        topic: Topic::ConfigState,
    })
    .unwrap();
    assert!(!dist.heartbeat().unwrap());
}

#[test]
fn invalid_remote_write_leaves_everything_unchanged() {
    let dir = TempDir::new().unwrap();
    let mut dist = open_loop(dir.path());
    subscribe(&mut dist, Topic::ConfigState);
    let before_disk = fs::read_to_string(dir.path().join("config.json")).unwrap();
    let before = dist.config().store().current().clone();

    dist.handle(TransportEvent::Write {
        topic: Topic::ConfigWrite,
        payload: b"vibration=false".to_vec(),
    })
    .unwrap();

    assert_eq!(dist.config().store().current(), &before);
    assert_eq!(
        fs::read_to_string(dir.path().join("config.json")).unwrap(),
        before_disk
    );
    assert_eq!(
        dist.transport().notifications_for(Topic::ConfigState).len(),
        1
    );
}

#[test]
fn detection_side_events_flow_to_the_subscriber() {
    let dir = TempDir::new().unwrap();
    let mut dist = open_loop(dir.path());
    subscribe(&mut dist, Topic::Obstacle);

    let mut engine = FusionEngine::new(FusionTunables::default());
    let mut producer = ObstacleProducer::new(dir.path().join("obstacle.json"));
    let mut frame = Frame::blank(640, 480);
    frame.fill_rect(300, 40, 20, 40, [230, 20, 20]);
    let detections = vec![
        Detection::new("stairs", 0.8, BoundingBox::new(100, 200, 200, 200)),
        Detection::new("traffic_light", 0.3, BoundingBox::new(300, 40, 20, 40)),
    ];

    let t0 = Instant::now();
    let outcome = engine.process(&frame, &detections, &[Some(1.234), Some(1.24), None], t0);
    assert!(outcome.publish.is_some());
    producer
        .push(
            &outcome.event.obstacle,
            outcome.event.distance_m,
            outcome.event.traffic,
        )
        .unwrap();
    assert!(dist.poll_obstacle().unwrap());

    let sent = dist.transport().last_notified_json(Topic::Obstacle).unwrap();
    assert_eq!(sent["obstacle"], "stairs");
    assert_eq!(sent["traffic"], TrafficColor::Red.as_str());
    assert_eq!(sent["distance"], 1.24);
}
