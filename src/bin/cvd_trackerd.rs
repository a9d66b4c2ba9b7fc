//! cvd_trackerd - silence monitoring daemon
//!
//! This daemon:
//! 1. Loads configuration (TOML file + environment overrides)
//! 2. Pulls frames from the configured source
//! 3. Feeds them to the running monitoring session, if any
//! 4. Dispatches silence alerts (log, snapshots, MQTT) off the frame loop
//! 5. Serves the loopback control API for starting/stopping sessions

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cvd_tracker::alert::{
    AlertDispatcher, DispatchQueue, LogDispatcher, MqttDispatcher, SnapshotWriter,
};
use cvd_tracker::api::{ApiConfig, ApiServer};
use cvd_tracker::ingest::open_source;
use cvd_tracker::{Monitor, MonitorError, TrackerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, env = "CVD_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => TrackerConfig::load_from(path)?,
        None => TrackerConfig::load()?,
    };
    let session_config = config.session_config();

    let queue = DispatchQueue::spawn(build_sinks(&config)?, config.alert.cooldown);
    let monitor = Monitor::new().with_dispatch(queue.handle());

    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
        token_path: config.api_token_path.clone(),
        session: session_config.clone(),
    };
    let api_handle = ApiServer::new(api_config, monitor.clone()).spawn()?;
    log::info!("control api listening on {}", api_handle.addr);
    if let Some(path) = &api_handle.token_path {
        log::info!("control api capability token written to {}", path.display());
    } else {
        log::warn!(
            "control api capability token (handle securely): {}",
            api_handle.token
        );
    }

    let mut source = open_source(
        &config.camera.source_url,
        config.camera.width,
        config.camera.height,
        config.camera.fps,
    )?;
    source.connect().context("failed to connect frame source")?;

    if config.measurement.auto_start {
        let id = monitor.start_session(session_config.clone())?;
        log::info!("auto-started session {}", id);
    }

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = running.clone();
    ctrlc::set_handler(move || {
        running_handler.store(false, Ordering::SeqCst);
    })
    .expect("error setting Ctrl-C handler");

    log::info!(
        "cvd_trackerd running. source={} camera={} roi={} alert_delay={}s",
        config.camera.source_url,
        config.camera.index,
        config.motion.roi,
        config.measurement.alert_delay_seconds
    );

    let frame_interval = Duration::from_secs_f64(1.0 / config.camera.fps as f64);
    let mut last_health_log = Instant::now();
    while running.load(Ordering::SeqCst) {
        let started = Instant::now();
        let frame = source.next_frame()?;

        if let Some(id) = monitor.active_session()? {
            match monitor.process_frame(&id, &frame) {
                Ok(decision) if decision.detected => {
                    log::debug!("session {}: motion (score {})", id, decision.score);
                }
                Ok(_) => {}
                Err(err @ MonitorError::InvalidState { .. }) => {
                    // Stopped between the lookup and the frame.
                    log::debug!("frame skipped: {}", err);
                }
                Err(err) if err.is_fatal() => {
                    log::error!("session {} terminated: {}", id, err);
                }
                Err(err) => log::warn!("frame rejected: {}", err),
            }
        }

        if last_health_log.elapsed() >= Duration::from_secs(30) {
            let stats = source.stats();
            log::info!(
                "source health={} frames={} url={}",
                source.is_healthy(),
                stats.frames_captured,
                stats.url
            );
            last_health_log = Instant::now();
        }

        if let Some(remaining) = frame_interval.checked_sub(started.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    log::info!("shutdown signal received, stopping...");
    if let Some(id) = monitor.active_session()? {
        monitor.stop_session(&id)?;
    }
    api_handle.stop()?;
    queue.shutdown();
    Ok(())
}

fn build_sinks(config: &TrackerConfig) -> Result<Vec<Box<dyn AlertDispatcher>>> {
    let mut sinks: Vec<Box<dyn AlertDispatcher>> = vec![Box::new(LogDispatcher::new(
        config.alert.template.clone(),
        config.alert.website_url.clone(),
    ))];
    if config.measurement.save_alert_images {
        sinks.push(Box::new(SnapshotWriter::new(
            config.measurement.image_save_path.clone(),
            config.measurement.image_format,
            config.measurement.image_quality,
            config.measurement.max_saved_images,
        )));
    }
    if let Some(mqtt) = &config.alert.mqtt {
        sinks.push(Box::new(MqttDispatcher::connect(mqtt)?));
    }
    Ok(sinks)
}
