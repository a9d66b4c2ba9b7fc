//! Frame ingestion sources.
//!
//! Camera acquisition is an outside concern; this module defines the seam
//! (`FrameSource`) the daemon pulls frames through, plus a synthetic
//! `stub://` source used by the demo, tests and camera-less deployments.
//!
//! Sources hand out frames in capture order. The session core rejects frames
//! that go back in time, so a source must never reorder.

mod synthetic;

use anyhow::{anyhow, Result};

use crate::frame::Frame;

pub use synthetic::{SyntheticConfig, SyntheticSource};

/// Counters reported by a source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub url: String,
}

pub trait FrameSource: Send {
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame; blocks until one is available.
    fn next_frame(&mut self) -> Result<Frame>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Open the source named by `url`.
///
/// Only `stub://` is built in; device and network capture are provided by
/// the embedding application through `FrameSource`.
pub fn open_source(url: &str, width: u32, height: u32, fps: u32) -> Result<Box<dyn FrameSource>> {
    if url.starts_with("stub://") {
        let config = SyntheticConfig::from_url(url, width, height, fps)?;
        return Ok(Box::new(SyntheticSource::new(config)));
    }
    let scheme = url.split_once("://").map(|(s, _)| s).unwrap_or(url);
    Err(anyhow!(
        "unsupported frame source '{}': no built-in capture for scheme '{}'",
        url,
        scheme
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_stub_sources_only() {
        let mut source = open_source("stub://camera0", 32, 24, 5).unwrap();
        source.connect().unwrap();
        let frame = source.next_frame().unwrap();
        assert_eq!((frame.width(), frame.height()), (32, 24));
        assert_eq!(source.stats().frames_captured, 1);

        let err = open_source("rtsp://10.0.0.2/stream", 32, 24, 5)
            .err()
            .unwrap();
        assert!(err.to_string().contains("rtsp"));
    }
}
