//! demo - end-to-end synthetic run of the silence monitor
//!
//! Feeds a `stub://` scene through a session on a simulated clock: an object
//! moves for the first `--motion-seconds`, then the scene goes still and the
//! silence alert fires once `--alert-delay` seconds have passed.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use cvd_tracker::alert::{AlertDispatcher, DispatchQueue, LogDispatcher, SnapshotWriter};
use cvd_tracker::config::{ImageFormat, MotionSettings, Roi};
use cvd_tracker::ingest::{FrameSource, SyntheticConfig, SyntheticSource};
use cvd_tracker::{AlertTemplate, Monitor, SessionConfig, SessionState};

const WIDTH: u32 = 160;
const HEIGHT: u32 = 120;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Simulated run length in seconds.
    #[arg(long, default_value_t = 600)]
    seconds: u64,
    /// Frames per simulated second.
    #[arg(long, default_value_t = 2)]
    fps: u32,
    /// Silence (seconds) before the alert fires.
    #[arg(long, default_value_t = 300)]
    alert_delay: u64,
    /// Seconds of motion at the start of the run.
    #[arg(long, default_value_t = 30)]
    motion_seconds: u64,
    /// Sensitivity in [0, 1].
    #[arg(long, default_value_t = 0.5)]
    sensitivity: f64,
    /// Restrict analysis to the centre of the frame.
    #[arg(long)]
    roi: bool,
    /// Write alert snapshots to this directory.
    #[arg(long)]
    snapshots: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }

    let start = SystemTime::now();
    let motion_frames = args.motion_seconds * args.fps as u64;
    let url = format!("stub://demo?motion_frames={}", motion_frames);
    let mut source = SyntheticSource::new(
        SyntheticConfig::from_url(&url, WIDTH, HEIGHT, args.fps)?.with_simulated_clock(start),
    );
    source.connect()?;

    let mut sinks: Vec<Box<dyn AlertDispatcher>> = vec![Box::new(LogDispatcher::new(
        AlertTemplate::default(),
        "http://127.0.0.1:8080",
    ))];
    if let Some(dir) = &args.snapshots {
        sinks.push(Box::new(SnapshotWriter::new(
            dir.clone(),
            ImageFormat::Jpeg,
            85,
            10,
        )));
    }
    let queue = DispatchQueue::spawn(sinks, Duration::ZERO);
    let monitor = Monitor::new().with_dispatch(queue.handle());

    let roi = if args.roi {
        Roi::new(WIDTH / 4, HEIGHT / 4, WIDTH / 2, HEIGHT / 2)
    } else {
        Roi::disabled()
    };
    let config = SessionConfig {
        frame_size: Some((WIDTH, HEIGHT)),
        motion: MotionSettings {
            roi,
            sensitivity: args.sensitivity,
            min_contour_area: 200,
            ..MotionSettings::default()
        },
        alert_delay_seconds: args.alert_delay,
        session_timeout_minutes: 0,
        attach_snapshot: args.snapshots.is_some(),
        ..SessionConfig::default()
    };
    let id = monitor.start_session_at(config, start)?;

    let total_frames = args.seconds * args.fps as u64;
    let mut motion_decisions = 0u64;
    for _ in 0..total_frames {
        let frame = source.next_frame()?;
        let decision = monitor.process_frame(&id, &frame)?;
        if decision.detected {
            motion_decisions += 1;
        }
    }

    let end = start + Duration::from_secs(args.seconds);
    let status = monitor.get_session_status_at(&id, end)?;
    if status.state == SessionState::Running {
        monitor.stop_session_at(&id, end)?;
    }
    queue.shutdown();

    let status = monitor.get_session_status_at(&id, end)?;
    println!("frames processed: {}", status.frames_processed);
    println!("frames with motion: {}", motion_decisions);
    println!("alerts emitted: {}", status.alerts_emitted);
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
