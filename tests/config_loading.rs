use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use cvd_tracker::config::{ImageFormat, TrackerConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CVD_CONFIG",
        "CVD_SOURCE_URL",
        "CVD_API_ADDR",
        "CVD_API_TOKEN_PATH",
        "CVD_ALERT_DELAY_SECS",
        "CVD_SESSION_TIMEOUT_MINUTES",
        "CVD_SENSITIVITY",
        "CVD_MQTT_BROKER",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, contents.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"
        [camera]
        source_url = "stub://bench"
        index = 2
        width = 640
        height = 480
        fps = 15

        [motion]
        sensitivity = 0.2
        background_learning_rate = 0.05
        min_contour_area = 800
        warmup_frames = 10
        mask_close_radius = 3

        [motion.roi]
        enabled = true
        x = 100
        y = 50
        width = 320
        height = 240

        [measurement]
        auto_start = true
        alert_delay_seconds = 120
        session_timeout_minutes = 0
        save_alert_images = true
        image_save_path = "/var/lib/cvd/alerts"
        image_format = "png"
        max_saved_images = 20

        [alert]
        website_url = "http://lab.local:8080"
        cooldown_seconds = 600

        [alert.template]
        subject = "silent since {last_motion_time}"

        [alert.mqtt]
        broker_addr = "127.0.0.1:1883"
        topic_prefix = "lab/cvd"

        [api]
        addr = "127.0.0.1:9100"
        "#,
    );

    std::env::set_var("CVD_CONFIG", file.path());
    std::env::set_var("CVD_ALERT_DELAY_SECS", "900");
    std::env::set_var("CVD_SENSITIVITY", "0.75");

    let cfg = TrackerConfig::load().expect("load config");

    assert_eq!(cfg.camera.source_url, "stub://bench");
    assert_eq!(cfg.camera.index, 2);
    assert_eq!((cfg.camera.width, cfg.camera.height, cfg.camera.fps), (640, 480, 15));
    assert_eq!(cfg.motion.sensitivity, 0.75);
    assert_eq!(cfg.motion.min_contour_area, 800);
    assert_eq!(cfg.motion.warmup_frames, 10);
    assert_eq!(cfg.motion.mask_open_radius, 1);
    assert_eq!(cfg.motion.mask_close_radius, 3);
    assert!(cfg.motion.roi.enabled);
    assert_eq!((cfg.motion.roi.x, cfg.motion.roi.width), (100, 320));
    assert!(cfg.measurement.auto_start);
    assert_eq!(cfg.measurement.alert_delay_seconds, 900);
    assert_eq!(cfg.measurement.image_format, ImageFormat::Png);
    assert_eq!(cfg.measurement.max_saved_images, 20);
    assert_eq!(cfg.alert.cooldown, Duration::from_secs(600));
    assert_eq!(cfg.alert.template.subject, "silent since {last_motion_time}");
    assert!(cfg.alert.template.body.contains("{session_id}"));
    let mqtt = cfg.alert.mqtt.as_ref().expect("mqtt settings");
    assert_eq!(mqtt.topic_prefix, "lab/cvd");
    assert_eq!(mqtt.client_id, "cvd_trackerd");
    assert_eq!(cfg.api_addr, "127.0.0.1:9100");

    let session = cfg.session_config();
    assert_eq!(session.camera_index, 2);
    assert_eq!(session.frame_size, Some((640, 480)));
    assert_eq!(session.alert_delay_seconds, 900);
    assert_eq!(session.session_timeout(), None);
    assert!(session.attach_snapshot);

    clear_env();
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = TrackerConfig::load().expect("load defaults");
    assert_eq!(cfg.camera.source_url, "stub://camera0");
    assert_eq!((cfg.camera.width, cfg.camera.height), (1920, 1080));
    assert!(!cfg.motion.roi.enabled);
    assert_eq!(cfg.motion.sensitivity, 0.01);
    assert_eq!(cfg.measurement.alert_delay_seconds, 300);
    assert_eq!(cfg.measurement.session_timeout_minutes, 60);
    assert!(!cfg.measurement.auto_start);
    assert_eq!(cfg.api_addr, "127.0.0.1:8080");
    assert!(cfg.alert.mqtt.is_none());

    clear_env();
}

#[test]
fn mqtt_broker_env_enables_mqtt() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CVD_MQTT_BROKER", "mqtts://broker.lab:8883");
    let cfg = TrackerConfig::load().expect("load config");
    let mqtt = cfg.alert.mqtt.expect("mqtt enabled by env");
    assert_eq!(mqtt.broker_addr, "mqtts://broker.lab:8883");
    assert_eq!(mqtt.topic_prefix, "cvd_tracker");

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let roi_outside = write_config(
        r#"
        [camera]
        width = 640
        height = 480

        [motion.roi]
        enabled = true
        x = 600
        y = 0
        width = 100
        height = 100
        "#,
    );
    assert!(TrackerConfig::load_from(roi_outside.path()).is_err());

    let unknown_section = write_config("[vault]\npath = \"x\"\n");
    assert!(TrackerConfig::load_from(unknown_section.path()).is_err());

    let misspelled_key = write_config("[motion]\nsensitivty = 0.5\n");
    assert!(TrackerConfig::load_from(misspelled_key.path()).is_err());
    let misspelled_nested = write_config("[alert.mqtt]\nbroker = \"127.0.0.1\"\n");
    assert!(TrackerConfig::load_from(misspelled_nested.path()).is_err());

    std::env::set_var("CVD_SENSITIVITY", "1.5");
    assert!(TrackerConfig::load().is_err());
    std::env::set_var("CVD_SENSITIVITY", "very");
    assert!(TrackerConfig::load().is_err());

    clear_env();
}
