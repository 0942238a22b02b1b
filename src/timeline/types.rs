//! Timeline data types
//!
//! These are the records handed to the renderer. Positions are abstract
//! anchors (a stage edge or a queue slot); turning them into pixels is the
//! renderer's job.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ResultExt};
use crate::pipeline::id::{StageId, TokenId};

/// Which side of a stage box a token sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Facing stage 0. Requests leave from here, futures arrive here.
    Downstream,
    /// Facing the consumer. Futures leave from here, requests arrive here.
    Upstream,
}

/// Abstract placement of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "at", rename_all = "snake_case")]
pub enum Anchor {
    Edge { stage: StageId, side: Side },
    Slot { stage: StageId, slot: usize },
}

impl Anchor {
    pub fn edge(stage: StageId, side: Side) -> Self {
        Anchor::Edge { stage, side }
    }

    pub fn slot(stage: StageId, slot: usize) -> Self {
        Anchor::Slot { stage, slot }
    }

    pub fn stage(&self) -> StageId {
        match self {
            Anchor::Edge { stage, .. } | Anchor::Slot { stage, .. } => *stage,
        }
    }
}

/// Visual fill of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillState {
    Empty,
    /// Raw data arrived, transform pending.
    Partial,
    Filled,
}

/// Property changes carried by a keyframe. `None` means "unchanged".
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct KeyframeProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Anchor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<FillState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f32>,
    /// Rotation in full turns, used for the "working" spin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f32>,
}

impl KeyframeProps {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn position(anchor: Anchor) -> Self {
        Self {
            position: Some(anchor),
            ..Self::default()
        }
    }

    pub fn fill(fill: FillState) -> Self {
        Self {
            fill: Some(fill),
            ..Self::default()
        }
    }

    pub fn opacity(opacity: f32) -> Self {
        Self {
            opacity: Some(opacity),
            ..Self::default()
        }
    }

    pub fn rotation(turns: f32) -> Self {
        Self {
            rotation: Some(turns),
            ..Self::default()
        }
    }

    /// Whether this keyframe changes nothing (a gap filler).
    pub fn is_empty(&self) -> bool {
        self.position.is_none()
            && self.fill.is_none()
            && self.opacity.is_none()
            && self.rotation.is_none()
    }
}

/// One timed property change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    /// Offset from the start of the timeline in milliseconds.
    pub start: u64,
    pub duration: u64,
    #[serde(flatten)]
    pub props: KeyframeProps,
}

impl Keyframe {
    pub fn end(&self) -> u64 {
        self.start + self.duration
    }

    pub fn is_filler(&self) -> bool {
        self.props.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Request,
    Future,
    WorkItem,
}

/// Keyframes of a single token, laid end to end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub token: TokenId,
    pub kind: TrackKind,
    /// Where the token's element is created.
    pub origin: Anchor,
    pub keyframes: Vec<Keyframe>,
}

/// Stage descriptor exported for drawing operator boxes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageInfo {
    pub index: StageId,
    pub kind: String,
    pub labels: Vec<String>,
}

/// Complete keyframe stream of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub tick_ms: u64,
    /// Loop length for playback: final simulated time plus one tick.
    pub total_duration: u64,
    pub stages: Vec<StageInfo>,
    pub tracks: Vec<Track>,
}

impl Timeline {
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn track(&self, token: TokenId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.token == token)
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(move |t| t.kind == kind)
    }

    /// Save timeline to a file (JSON format)
    pub fn save_to_file(&self, path: &std::path::Path, pretty: bool) -> Result<()> {
        let json = if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load timeline from a file
    pub fn load_from_file(path: &std::path::Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).context(format!("Malformed timeline in {:?}", path))
    }
}

/// Result of `Simulation::run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_duration: u64,
    pub tick_ms: u64,
    pub requests_issued: u64,
    pub round_trips: u64,
    /// Deferred tasks still parked in the scheduler when the run ended.
    pub pending_tasks: usize,
    pub tokens: usize,
    /// Longest wait, in ms, between a continuation becoming ready (its
    /// future filled, or registered on an already-filled one) and running.
    #[serde(default)]
    pub max_continuation_lag: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kf(start: u64, duration: u64, props: KeyframeProps) -> Keyframe {
        Keyframe {
            start,
            duration,
            props,
        }
    }

    #[test]
    fn test_filler_detection() {
        assert!(kf(0, 10, KeyframeProps::none()).is_filler());
        assert!(!kf(0, 10, KeyframeProps::opacity(1.0)).is_filler());
    }

    #[test]
    fn test_props_serialize_sparse() {
        let json = serde_json::to_string(&kf(0, 10, KeyframeProps::fill(FillState::Partial))).unwrap();
        assert_eq!(json, r#"{"start":0,"duration":10,"fill":"partial"}"#);
    }
}
