use chrono::{DateTime, Local};
use regex::{Captures, Regex};
use std::sync::OnceLock;
use std::time::SystemTime;

use super::AlertEvent;

const DEFAULT_SUBJECT: &str = "CVD-Tracker: No Motion Detected - {timestamp}";
const DEFAULT_BODY: &str = "No Motion detected since {timestamp}!\n\
Please check the website at: {website_url}\n\n\
Details:\n\
Session-ID: {session_id}\n\
Last motion at {last_motion_time}\n\
Camera: Index {camera_index}\n\
Sensitivity: {sensitivity}\n\
ROI enabled: {roi_enabled}\n\n\
Attached is the current webcam image.";

/// Subject and body of an alert notification with `{placeholder}` fields.
///
/// Known placeholders: `timestamp`, `session_id`, `last_motion_time`,
/// `camera_index`, `sensitivity`, `roi_enabled`, `silence_seconds`,
/// `website_url`. Anything else is left as written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlertTemplate {
    pub subject: String,
    pub body: String,
}

impl Default for AlertTemplate {
    fn default() -> Self {
        Self {
            subject: DEFAULT_SUBJECT.to_string(),
            body: DEFAULT_BODY.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedAlert {
    pub subject: String,
    pub body: String,
}

impl AlertTemplate {
    pub fn render(&self, event: &AlertEvent, website_url: &str) -> RenderedAlert {
        RenderedAlert {
            subject: render_text(&self.subject, event, website_url),
            body: render_text(&self.body, event, website_url),
        }
    }
}

fn placeholder() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{(\w+)\}").unwrap())
}

fn local_time(ts: SystemTime) -> String {
    DateTime::<Local>::from(ts)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn render_text(text: &str, event: &AlertEvent, website_url: &str) -> String {
    placeholder()
        .replace_all(text, |caps: &Captures<'_>| match &caps[1] {
            "timestamp" => local_time(event.timestamp),
            "session_id" => event.session_id.to_string(),
            "last_motion_time" => local_time(event.last_motion_time),
            "camera_index" => event.camera_index.to_string(),
            "sensitivity" => event.sensitivity.to_string(),
            "roi_enabled" => event.roi_enabled.to_string(),
            "silence_seconds" => event.silence_seconds.to_string(),
            "website_url" => website_url.to_string(),
            _ => caps[0].to_string(),
        })
        .into_owned()
}
