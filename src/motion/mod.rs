//! Motion pipeline: frame -> region image -> foreground mask -> decision.

mod background;
mod classifier;
mod detector;
mod preprocess;

pub use background::{clean_mask, BackgroundModel, BackgroundUpdate};
pub use classifier::{area_threshold, classify, MotionDecision};
pub use detector::{MotionAnalyzer, MotionDetector};
pub use preprocess::prepare;
