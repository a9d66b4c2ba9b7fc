use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::config::ImageFormat;
use crate::frame::Frame;

use super::{AlertDispatcher, AlertEvent, AlertTemplate};

const SNAPSHOT_PREFIX: &str = "alert_";

/// Writes the rendered notification to the log.
///
/// Stands in for mail delivery, which lives outside this crate.
pub struct LogDispatcher {
    template: AlertTemplate,
    website_url: String,
}

impl LogDispatcher {
    pub fn new(template: AlertTemplate, website_url: impl Into<String>) -> Self {
        Self {
            template,
            website_url: website_url.into(),
        }
    }
}

impl AlertDispatcher for LogDispatcher {
    fn name(&self) -> &str {
        "log"
    }

    fn dispatch(&mut self, event: &AlertEvent, _snapshot: Option<&Frame>) -> Result<()> {
        let rendered = self.template.render(event, &self.website_url);
        log::warn!("ALERT {}\n{}", rendered.subject, rendered.body);
        Ok(())
    }
}

/// Persists the frame that raised an alert and keeps only the newest
/// `max_files` snapshots in the directory.
pub struct SnapshotWriter {
    dir: PathBuf,
    format: ImageFormat,
    quality: u8,
    max_files: usize,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>, format: ImageFormat, quality: u8, max_files: usize) -> Self {
        Self {
            dir: dir.into(),
            format,
            quality: quality.clamp(1, 100),
            max_files,
        }
    }

    fn file_name(&self, event: &AlertEvent) -> String {
        let stamp = DateTime::<Utc>::from(event.timestamp).format("%Y%m%dT%H%M%S%3f");
        format!(
            "{}{}_{}.{}",
            SNAPSHOT_PREFIX,
            stamp,
            event.session_id,
            self.format.extension()
        )
    }

    fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        let rgb = frame.to_rgb();
        let mut buffer = Vec::new();
        match self.format {
            ImageFormat::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(&mut buffer, self.quality);
                rgb.write_with_encoder(encoder)
                    .map_err(|e| anyhow!("failed to encode JPEG snapshot: {}", e))?;
            }
            ImageFormat::Png => {
                rgb.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
                    .map_err(|e| anyhow!("failed to encode PNG snapshot: {}", e))?;
            }
        }
        Ok(buffer)
    }

    /// Save `frame` for `event`; returns the written path.
    pub fn save(&self, event: &AlertEvent, frame: &Frame) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create snapshot dir {}", self.dir.display()))?;
        let path = self.dir.join(self.file_name(event));
        let bytes = self.encode(frame)?;
        std::fs::write(&path, bytes)
            .with_context(|| format!("failed to write snapshot {}", path.display()))?;
        prune_snapshots(&self.dir, self.max_files)?;
        Ok(path)
    }
}

impl AlertDispatcher for SnapshotWriter {
    fn name(&self) -> &str {
        "snapshot"
    }

    fn dispatch(&mut self, event: &AlertEvent, snapshot: Option<&Frame>) -> Result<()> {
        let Some(frame) = snapshot else {
            log::debug!("session {}: no snapshot attached", event.session_id);
            return Ok(());
        };
        let path = self.save(event, frame)?;
        log::info!("session {}: snapshot saved to {}", event.session_id, path.display());
        Ok(())
    }
}

/// Delete the oldest snapshots until at most `keep` remain. File names sort
/// chronologically.
fn prune_snapshots(dir: &Path, keep: usize) -> Result<()> {
    let mut snapshots: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to list snapshot dir {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(SNAPSHOT_PREFIX))
        })
        .collect();
    if snapshots.len() <= keep {
        return Ok(());
    }
    snapshots.sort();
    let excess = snapshots.len() - keep;
    for path in snapshots.into_iter().take(excess) {
        std::fs::remove_file(&path)
            .with_context(|| format!("failed to remove old snapshot {}", path.display()))?;
    }
    Ok(())
}
