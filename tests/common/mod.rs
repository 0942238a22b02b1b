//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use flowvis_rs::pipeline::StageId;
use flowvis_rs::timeline::{Anchor, Side, Timeline, Track, TrackKind};

/// Assert every track is laid end to end starting at zero.
pub fn assert_tracks_contiguous(timeline: &Timeline) {
    for track in &timeline.tracks {
        let mut cursor = 0;
        for kf in &track.keyframes {
            assert_eq!(
                kf.start, cursor,
                "track {} has a hole or overlap at {}",
                track.token, cursor
            );
            cursor = kf.end();
        }
    }
}

/// Stages a token visits: its origin followed by every position change.
pub fn stage_path(track: &Track) -> Vec<(StageId, Side)> {
    std::iter::once(track.origin)
        .chain(track.keyframes.iter().filter_map(|k| k.props.position))
        .filter_map(|anchor| match anchor {
            Anchor::Edge { stage, side } => Some((stage, side)),
            Anchor::Slot { .. } => None,
        })
        .collect()
}

/// Assert requests only move toward stage 0 and futures only toward the
/// consumer, one stage per move.
pub fn assert_single_stage_moves(timeline: &Timeline) {
    for track in &timeline.tracks {
        let expected_step: i64 = match track.kind {
            TrackKind::Request => -1,
            TrackKind::Future => 1,
            TrackKind::WorkItem => continue,
        };
        let path = stage_path(track);
        for pair in path.windows(2) {
            let step = pair[1].0 .0 as i64 - pair[0].0 .0 as i64;
            assert_eq!(
                step, expected_step,
                "{} moved from {:?} to {:?}",
                track.token, pair[0], pair[1]
            );
        }
    }
}

/// Time at which the first keyframe setting `rotation` starts, and its length.
pub fn spin_of(track: &Track) -> Option<(u64, u64)> {
    track
        .keyframes
        .iter()
        .find(|k| k.props.rotation.is_some())
        .map(|k| (k.start, k.duration))
}
