use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::alert::AlertTemplate;
use crate::error::MonitorError;

const DEFAULT_SOURCE_URL: &str = "stub://camera0";
const DEFAULT_CAMERA_INDEX: u32 = 0;
const DEFAULT_WIDTH: u32 = 1920;
const DEFAULT_HEIGHT: u32 = 1080;
const DEFAULT_FPS: u32 = 30;
const DEFAULT_API_ADDR: &str = "127.0.0.1:8080";

pub const DEFAULT_SENSITIVITY: f64 = 0.01;
pub const DEFAULT_LEARNING_RATE: f32 = 0.01;
pub const DEFAULT_NOISE_THRESHOLD: f32 = 10.0;
pub const DEFAULT_MIN_CONTOUR_AREA: u32 = 500;
/// Sigma of a 5x5 Gaussian kernel.
pub const DEFAULT_BLUR_SIGMA: f32 = 1.1;
pub const DEFAULT_MASK_OPEN_RADIUS: u8 = 1;
pub const DEFAULT_MASK_CLOSE_RADIUS: u8 = 2;
pub const DEFAULT_ALERT_DELAY_SECS: u64 = 300;
pub const DEFAULT_SESSION_TIMEOUT_MINUTES: u64 = 60;

const DEFAULT_COOLDOWN_SECS: u64 = 300;
const DEFAULT_IMAGE_DIR: &str = "alerts";
const DEFAULT_IMAGE_QUALITY: u8 = 85;
const DEFAULT_MAX_SAVED_IMAGES: usize = 100;
const DEFAULT_MQTT_TOPIC_PREFIX: &str = "cvd_tracker";
const DEFAULT_MQTT_CLIENT_ID: &str = "cvd_trackerd";

// ----------------------------------------------------------------------------
// Region of interest
// ----------------------------------------------------------------------------

/// Analysis rectangle in frame coordinates. Disabled means "whole frame".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub enabled: bool,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    /// Enabled rectangle.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            enabled: true,
            x,
            y,
            width,
            height,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// True when the rectangle lies inside a `frame_width` x `frame_height`
    /// frame. A disabled ROI always fits.
    pub fn fits(&self, frame_width: u32, frame_height: u32) -> bool {
        if !self.enabled {
            return true;
        }
        if self.width == 0 || self.height == 0 {
            return false;
        }
        let right = self.x as u64 + self.width as u64;
        let bottom = self.y as u64 + self.height as u64;
        right <= frame_width as u64 && bottom <= frame_height as u64
    }
}

impl Default for Roi {
    fn default() -> Self {
        Self {
            enabled: false,
            x: 100,
            y: 100,
            width: 300,
            height: 200,
        }
    }
}

impl fmt::Display for Roi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.enabled {
            write!(f, "({}, {}, {}x{})", self.x, self.y, self.width, self.height)
        } else {
            f.write_str("(disabled)")
        }
    }
}

// ----------------------------------------------------------------------------
// Per-session snapshot
// ----------------------------------------------------------------------------

/// Motion pipeline parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionSettings {
    pub roi: Roi,
    /// 0..=1, higher means less foreground area is needed to trigger.
    pub sensitivity: f64,
    /// Background EMA weight of the newest frame, 0..=1. Zero freezes the model.
    pub background_learning_rate: f32,
    /// Absolute intensity difference above which a pixel is foreground.
    pub noise_threshold: f32,
    /// Blob area (pixels) required at sensitivity 0.
    pub min_contour_area: u32,
    /// Gaussian sigma; zero disables smoothing.
    pub blur_sigma: f32,
    /// Frames at session start during which decisions are forced to "no motion".
    pub warmup_frames: u32,
    /// Mask opening radius; removes isolated foreground speckle.
    #[serde(default = "default_mask_open_radius")]
    pub mask_open_radius: u8,
    /// Mask closing radius; joins fragments of one object.
    #[serde(default = "default_mask_close_radius")]
    pub mask_close_radius: u8,
}

fn default_mask_open_radius() -> u8 {
    DEFAULT_MASK_OPEN_RADIUS
}

fn default_mask_close_radius() -> u8 {
    DEFAULT_MASK_CLOSE_RADIUS
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            roi: Roi::default(),
            sensitivity: DEFAULT_SENSITIVITY,
            background_learning_rate: DEFAULT_LEARNING_RATE,
            noise_threshold: DEFAULT_NOISE_THRESHOLD,
            min_contour_area: DEFAULT_MIN_CONTOUR_AREA,
            blur_sigma: DEFAULT_BLUR_SIGMA,
            warmup_frames: 0,
            mask_open_radius: DEFAULT_MASK_OPEN_RADIUS,
            mask_close_radius: DEFAULT_MASK_CLOSE_RADIUS,
        }
    }
}

impl MotionSettings {
    pub fn validate(&self) -> Result<(), MonitorError> {
        if !(0.0..=1.0).contains(&self.sensitivity) {
            return Err(MonitorError::InvalidConfig(format!(
                "sensitivity {} outside [0, 1]",
                self.sensitivity
            )));
        }
        if !(0.0..=1.0).contains(&self.background_learning_rate) {
            return Err(MonitorError::InvalidConfig(format!(
                "background_learning_rate {} outside [0, 1]",
                self.background_learning_rate
            )));
        }
        if !self.noise_threshold.is_finite() || self.noise_threshold < 0.0 {
            return Err(MonitorError::InvalidConfig(format!(
                "noise_threshold {} must be a non-negative number",
                self.noise_threshold
            )));
        }
        if !self.blur_sigma.is_finite() || self.blur_sigma < 0.0 {
            return Err(MonitorError::InvalidConfig(format!(
                "blur_sigma {} must be a non-negative number",
                self.blur_sigma
            )));
        }
        if self.roi.enabled && (self.roi.width == 0 || self.roi.height == 0) {
            return Err(MonitorError::InvalidConfig(format!(
                "region of interest {} must have a positive size",
                self.roi
            )));
        }
        Ok(())
    }
}

/// Immutable configuration snapshot taken when a session starts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub camera_index: u32,
    /// Expected frame resolution, when known up front. Lets the ROI be
    /// checked at session start instead of on the first frame.
    pub frame_size: Option<(u32, u32)>,
    pub motion: MotionSettings,
    pub alert_delay_seconds: u64,
    /// Zero disables the timeout.
    pub session_timeout_minutes: u64,
    /// Hand the triggering frame to the alert dispatcher.
    pub attach_snapshot: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            camera_index: DEFAULT_CAMERA_INDEX,
            frame_size: None,
            motion: MotionSettings::default(),
            alert_delay_seconds: DEFAULT_ALERT_DELAY_SECS,
            session_timeout_minutes: DEFAULT_SESSION_TIMEOUT_MINUTES,
            attach_snapshot: false,
        }
    }
}

impl SessionConfig {
    pub fn alert_delay(&self) -> Duration {
        Duration::from_secs(self.alert_delay_seconds)
    }

    pub fn session_timeout(&self) -> Option<Duration> {
        (self.session_timeout_minutes > 0)
            .then(|| Duration::from_secs(self.session_timeout_minutes.saturating_mul(60)))
    }

    pub fn validate(&self) -> Result<(), MonitorError> {
        self.motion.validate()?;
        if self.alert_delay_seconds == 0 {
            return Err(MonitorError::InvalidConfig(
                "alert_delay_seconds must be greater than zero".to_string(),
            ));
        }
        if let Some((width, height)) = self.frame_size {
            if !self.motion.roi.fits(width, height) {
                return Err(MonitorError::InvalidRegion {
                    roi: self.motion.roi,
                    width,
                    height,
                });
            }
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Daemon configuration (file + env)
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TrackerConfigFile {
    camera: Option<CameraConfigFile>,
    motion: Option<MotionConfigFile>,
    measurement: Option<MeasurementConfigFile>,
    alert: Option<AlertConfigFile>,
    api: Option<ApiConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    source_url: Option<String>,
    index: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MotionConfigFile {
    roi: Option<RoiConfigFile>,
    sensitivity: Option<f64>,
    background_learning_rate: Option<f32>,
    noise_threshold: Option<f32>,
    min_contour_area: Option<u32>,
    blur_sigma: Option<f32>,
    warmup_frames: Option<u32>,
    mask_open_radius: Option<u8>,
    mask_close_radius: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RoiConfigFile {
    enabled: Option<bool>,
    x: Option<u32>,
    y: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MeasurementConfigFile {
    auto_start: Option<bool>,
    alert_delay_seconds: Option<u64>,
    session_timeout_minutes: Option<u64>,
    save_alert_images: Option<bool>,
    image_save_path: Option<PathBuf>,
    image_format: Option<String>,
    image_quality: Option<u8>,
    max_saved_images: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AlertConfigFile {
    website_url: Option<String>,
    cooldown_seconds: Option<u64>,
    template: Option<TemplateConfigFile>,
    mqtt: Option<MqttConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TemplateConfigFile {
    subject: Option<String>,
    body: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MqttConfigFile {
    broker_addr: Option<String>,
    topic_prefix: Option<String>,
    client_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ApiConfigFile {
    addr: Option<String>,
    token_path: Option<PathBuf>,
}

/// Fully resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub camera: CameraSettings,
    pub motion: MotionSettings,
    pub measurement: MeasurementSettings,
    pub alert: AlertSettings,
    pub api_addr: String,
    pub api_token_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub source_url: String,
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

#[derive(Debug, Clone)]
pub struct MeasurementSettings {
    pub auto_start: bool,
    pub alert_delay_seconds: u64,
    pub session_timeout_minutes: u64,
    pub save_alert_images: bool,
    pub image_save_path: PathBuf,
    pub image_format: ImageFormat,
    pub image_quality: u8,
    pub max_saved_images: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(ImageFormat::Jpeg),
            "png" => Ok(ImageFormat::Png),
            other => Err(anyhow!("unsupported image format '{}'", other)),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub website_url: String,
    pub cooldown: Duration,
    pub template: AlertTemplate,
    pub mqtt: Option<MqttSettings>,
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub broker_addr: String,
    pub topic_prefix: String,
    pub client_id: String,
}

impl TrackerConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CVD_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from an explicit path, still honouring env overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TrackerConfigFile) -> Result<Self> {
        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraSettings {
            source_url: camera_file
                .source_url
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            index: camera_file.index.unwrap_or(DEFAULT_CAMERA_INDEX),
            width: camera_file.width.unwrap_or(DEFAULT_WIDTH),
            height: camera_file.height.unwrap_or(DEFAULT_HEIGHT),
            fps: camera_file.fps.unwrap_or(DEFAULT_FPS),
        };

        let motion_file = file.motion.unwrap_or_default();
        let defaults = MotionSettings::default();
        let roi_file = motion_file.roi.unwrap_or_default();
        let motion = MotionSettings {
            roi: Roi {
                enabled: roi_file.enabled.unwrap_or(defaults.roi.enabled),
                x: roi_file.x.unwrap_or(defaults.roi.x),
                y: roi_file.y.unwrap_or(defaults.roi.y),
                width: roi_file.width.unwrap_or(defaults.roi.width),
                height: roi_file.height.unwrap_or(defaults.roi.height),
            },
            sensitivity: motion_file.sensitivity.unwrap_or(defaults.sensitivity),
            background_learning_rate: motion_file
                .background_learning_rate
                .unwrap_or(defaults.background_learning_rate),
            noise_threshold: motion_file
                .noise_threshold
                .unwrap_or(defaults.noise_threshold),
            min_contour_area: motion_file
                .min_contour_area
                .unwrap_or(defaults.min_contour_area),
            blur_sigma: motion_file.blur_sigma.unwrap_or(defaults.blur_sigma),
            warmup_frames: motion_file.warmup_frames.unwrap_or(defaults.warmup_frames),
            mask_open_radius: motion_file
                .mask_open_radius
                .unwrap_or(defaults.mask_open_radius),
            mask_close_radius: motion_file
                .mask_close_radius
                .unwrap_or(defaults.mask_close_radius),
        };

        let measurement_file = file.measurement.unwrap_or_default();
        let measurement = MeasurementSettings {
            auto_start: measurement_file.auto_start.unwrap_or(false),
            alert_delay_seconds: measurement_file
                .alert_delay_seconds
                .unwrap_or(DEFAULT_ALERT_DELAY_SECS),
            session_timeout_minutes: measurement_file
                .session_timeout_minutes
                .unwrap_or(DEFAULT_SESSION_TIMEOUT_MINUTES),
            save_alert_images: measurement_file.save_alert_images.unwrap_or(false),
            image_save_path: measurement_file
                .image_save_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGE_DIR)),
            image_format: match measurement_file.image_format.as_deref() {
                Some(format) => ImageFormat::parse(format)?,
                None => ImageFormat::Jpeg,
            },
            image_quality: measurement_file
                .image_quality
                .unwrap_or(DEFAULT_IMAGE_QUALITY),
            max_saved_images: measurement_file
                .max_saved_images
                .unwrap_or(DEFAULT_MAX_SAVED_IMAGES),
        };

        let alert_file = file.alert.unwrap_or_default();
        let default_template = AlertTemplate::default();
        let template = match alert_file.template {
            Some(t) => AlertTemplate {
                subject: t.subject.unwrap_or(default_template.subject),
                body: t.body.unwrap_or(default_template.body),
            },
            None => default_template,
        };
        let alert = AlertSettings {
            website_url: alert_file.website_url.unwrap_or_default(),
            cooldown: Duration::from_secs(
                alert_file.cooldown_seconds.unwrap_or(DEFAULT_COOLDOWN_SECS),
            ),
            template,
            mqtt: alert_file.mqtt.and_then(|mqtt| {
                let broker_addr = mqtt.broker_addr?;
                Some(MqttSettings {
                    broker_addr,
                    topic_prefix: mqtt
                        .topic_prefix
                        .unwrap_or_else(|| DEFAULT_MQTT_TOPIC_PREFIX.to_string()),
                    client_id: mqtt
                        .client_id
                        .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
                })
            }),
        };

        let api_file = file.api.unwrap_or_default();
        Ok(Self {
            camera,
            motion,
            measurement,
            alert,
            api_addr: api_file
                .addr
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            api_token_path: api_file.token_path,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("CVD_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.camera.source_url = url;
            }
        }
        if let Ok(addr) = std::env::var("CVD_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(path) = std::env::var("CVD_API_TOKEN_PATH") {
            if !path.trim().is_empty() {
                self.api_token_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(delay) = std::env::var("CVD_ALERT_DELAY_SECS") {
            self.measurement.alert_delay_seconds = delay.trim().parse().map_err(|_| {
                anyhow!("CVD_ALERT_DELAY_SECS must be an integer number of seconds")
            })?;
        }
        if let Ok(timeout) = std::env::var("CVD_SESSION_TIMEOUT_MINUTES") {
            self.measurement.session_timeout_minutes = timeout.trim().parse().map_err(|_| {
                anyhow!("CVD_SESSION_TIMEOUT_MINUTES must be an integer number of minutes")
            })?;
        }
        if let Ok(sensitivity) = std::env::var("CVD_SENSITIVITY") {
            self.motion.sensitivity = sensitivity
                .trim()
                .parse()
                .map_err(|_| anyhow!("CVD_SENSITIVITY must be a number between 0 and 1"))?;
        }
        if let Ok(broker) = std::env::var("CVD_MQTT_BROKER") {
            if !broker.trim().is_empty() {
                match self.alert.mqtt.as_mut() {
                    Some(mqtt) => mqtt.broker_addr = broker,
                    None => {
                        self.alert.mqtt = Some(MqttSettings {
                            broker_addr: broker,
                            topic_prefix: DEFAULT_MQTT_TOPIC_PREFIX.to_string(),
                            client_id: DEFAULT_MQTT_CLIENT_ID.to_string(),
                        })
                    }
                }
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera resolution must be non-zero"));
        }
        if self.camera.fps == 0 {
            return Err(anyhow!("camera fps must be >= 1"));
        }
        if !(1..=100).contains(&self.measurement.image_quality) {
            return Err(anyhow!(
                "image_quality {} outside [1, 100]",
                self.measurement.image_quality
            ));
        }
        self.session_config()
            .validate()
            .context("invalid motion/measurement settings")?;
        Ok(())
    }

    /// Snapshot handed to `Monitor::start_session`.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            camera_index: self.camera.index,
            frame_size: Some((self.camera.width, self.camera.height)),
            motion: self.motion.clone(),
            alert_delay_seconds: self.measurement.alert_delay_seconds,
            session_timeout_minutes: self.measurement.session_timeout_minutes,
            attach_snapshot: self.measurement.save_alert_images,
        }
    }
}

fn read_config_file(path: &Path) -> Result<TrackerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roi_fit_checks_bounds() {
        assert!(Roi::new(0, 0, 10, 10).fits(20, 20));
        assert!(Roi::new(10, 10, 10, 10).fits(20, 20));
        assert!(!Roi::new(11, 0, 10, 10).fits(20, 20));
        assert!(!Roi::new(0, 0, 0, 10).fits(20, 20));
        assert!(Roi::disabled().fits(1, 1));
    }

    #[test]
    fn session_config_rejects_roi_outside_known_frame() {
        let cfg = SessionConfig {
            frame_size: Some((640, 480)),
            motion: MotionSettings {
                roi: Roi::new(600, 0, 100, 100),
                ..MotionSettings::default()
            },
            ..SessionConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(MonitorError::InvalidRegion { width: 640, .. })
        ));
    }

    #[test]
    fn session_config_rejects_out_of_range_values() {
        let mut cfg = SessionConfig::default();
        cfg.motion.sensitivity = 1.5;
        assert!(matches!(cfg.validate(), Err(MonitorError::InvalidConfig(_))));

        let mut cfg = SessionConfig::default();
        cfg.alert_delay_seconds = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = SessionConfig::default();
        cfg.motion.background_learning_rate = 0.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn timeout_zero_disables() {
        let cfg = SessionConfig {
            session_timeout_minutes: 0,
            ..SessionConfig::default()
        };
        assert_eq!(cfg.session_timeout(), None);
        assert_eq!(
            SessionConfig::default().session_timeout(),
            Some(Duration::from_secs(3600))
        );
    }

    #[test]
    fn image_format_parsing() {
        assert_eq!(ImageFormat::parse("JPEG").unwrap(), ImageFormat::Jpeg);
        assert_eq!(ImageFormat::parse("png").unwrap().extension(), "png");
        assert!(ImageFormat::parse("gif").is_err());
    }

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = TrackerConfig::from_file(TrackerConfigFile::default()).unwrap();
        assert_eq!(cfg.camera.source_url, DEFAULT_SOURCE_URL);
        assert_eq!(cfg.measurement.alert_delay_seconds, 300);
        assert_eq!(cfg.motion.min_contour_area, 500);
        assert!(cfg.alert.mqtt.is_none());
        assert!(cfg.validate().is_ok());
    }
}
