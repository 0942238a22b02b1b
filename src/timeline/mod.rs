//! Keyframe timeline produced by a simulation run.
//!
//! Every token gets one track. The renderer plays the tracks side by side,
//! looping after `Timeline::total_duration`.

pub mod recorder;
pub mod types;

pub use recorder::KeyframeRecorder;
pub use types::{
    Anchor, FillState, Keyframe, KeyframeProps, RunSummary, Side, StageInfo, Timeline, Track,
    TrackKind,
};
