//! Keyframe recorder for token animations
//!
//! Every token gets a track the moment it is created. Keyframes are appended
//! at the current simulated time; when a token sat idle since its last
//! keyframe ended, a zero-effect filler covering the gap is inserted first so
//! a renderer interpolating between keyframes never sees a spurious change.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::{StageId, TokenId};

use super::types::{Anchor, Keyframe, KeyframeProps, Track, TrackKind};

#[derive(Debug)]
struct TrackState {
    track: Track,
    /// Simulated time the last keyframe was requested at.
    last_time: u64,
    last_duration: u64,
    /// Playback position where the next keyframe starts.
    cursor: u64,
}

impl TrackState {
    fn append(&mut self, now: u64, duration: u64, props: KeyframeProps) {
        let gap = now.saturating_sub(self.last_time + self.last_duration);
        if gap > 0 {
            self.place(gap, KeyframeProps::none());
        }
        self.place(duration, props);
        self.last_time = now;
        self.last_duration = duration;
    }

    fn place(&mut self, duration: u64, props: KeyframeProps) {
        self.track.keyframes.push(Keyframe {
            start: self.cursor,
            duration,
            props,
        });
        self.cursor += duration;
    }
}

/// Builds one keyframe track per token.
#[derive(Debug, Default)]
pub struct KeyframeRecorder {
    tracks: Vec<TrackState>,
    tick_ms: u64,
}

impl KeyframeRecorder {
    pub fn new(tick_ms: u64) -> Self {
        Self {
            tracks: Vec::new(),
            tick_ms,
        }
    }

    pub fn tick_ms(&self) -> u64 {
        self.tick_ms
    }

    /// Start the track of a freshly created token.
    ///
    /// The element holds `initial` (invisible) until `now`, then fades in
    /// over one tick. Tokens are registered in id order.
    pub fn create(
        &mut self,
        token: TokenId,
        kind: TrackKind,
        origin: Anchor,
        now: u64,
        initial: KeyframeProps,
    ) -> PipelineResult<()> {
        if token.index() != self.tracks.len() {
            return Err(PipelineError::invariant(
                origin.stage(),
                format!("track for {token} created out of order"),
            ));
        }
        let mut state = TrackState {
            track: Track {
                token,
                kind,
                origin,
                keyframes: Vec::new(),
            },
            last_time: now,
            last_duration: 0,
            cursor: 0,
        };
        if now > 0 || !initial.is_empty() {
            state.place(now, initial);
            state.last_duration = now;
        }
        state.append(now, self.tick_ms, KeyframeProps::opacity(1.0));
        self.tracks.push(state);
        Ok(())
    }

    /// Append a keyframe lasting `duration` ms, requested at time `now`.
    pub fn push(
        &mut self,
        token: TokenId,
        now: u64,
        duration: u64,
        props: KeyframeProps,
    ) -> PipelineResult<()> {
        let state = self.tracks.get_mut(token.index()).ok_or_else(|| {
            PipelineError::invariant(StageId::INVALID, format!("no track for {token}"))
        })?;
        state.append(now, duration, props);
        Ok(())
    }

    /// Append a one-tick keyframe.
    pub fn push_tick(&mut self, token: TokenId, now: u64, props: KeyframeProps) -> PipelineResult<()> {
        self.push(token, now, self.tick_ms, props)
    }

    pub fn track(&self, token: TokenId) -> Option<&Track> {
        self.tracks.get(token.index()).map(|s| &s.track)
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter().map(|s| &s.track)
    }

    /// Take the recorded tracks (consumes the recorder)
    pub fn into_tracks(self) -> Vec<Track> {
        self.tracks.into_iter().map(|s| s.track).collect()
    }
}
