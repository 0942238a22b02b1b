//! Simulation context passed to every operator call.
//!
//! Bundles the clock, the deferred-task scheduler, the token arena, the
//! keyframe recorder and the continuation agenda. Operators never touch these
//! directly; every token transition goes through a method here so the arena
//! and the keyframe stream stay in lockstep.

use std::collections::VecDeque;

use crate::pipeline::clock::SimClock;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::{StageId, TokenId};
use crate::pipeline::scheduler::{ScheduledTask, Scheduler};
use crate::pipeline::token::{Continuation, Token, TokenArena, TokenKind, WorkItem, WorkProgress};
use crate::timeline::recorder::KeyframeRecorder;
use crate::timeline::types::{Anchor, FillState, KeyframeProps, Side, Track, TrackKind};

/// Turns a work item spins while busy.
const WORK_TURNS: f32 = 2.0;

pub struct SimContext {
    clock: SimClock,
    scheduler: Scheduler,
    tokens: TokenArena,
    recorder: KeyframeRecorder,
    /// Continuations whose source token is filled, in the order they became
    /// ready, each with the time it became ready.
    agenda: VecDeque<(Continuation, u64)>,
    /// Longest wait between a continuation becoming ready and running.
    max_lag: u64,
    stage_count: usize,
    /// Simulated time after which no new downstream demand is created.
    horizon: u64,
}

impl SimContext {
    pub fn new(stage_count: usize, tick_ms: u64, horizon: u64) -> Self {
        let clock = SimClock::new(tick_ms);
        Self {
            recorder: KeyframeRecorder::new(clock.tick_ms()),
            clock,
            scheduler: Scheduler::new(),
            tokens: TokenArena::new(),
            agenda: VecDeque::new(),
            max_lag: 0,
            stage_count,
            horizon,
        }
    }

    // ── Clock ──

    #[inline]
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    #[inline]
    pub fn tick_ms(&self) -> u64 {
        self.clock.tick_ms()
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    #[inline]
    pub fn tick(&mut self) {
        self.clock.tick();
    }

    pub fn tick_n(&mut self, n: u64) {
        self.clock.tick_n(n);
    }

    pub fn horizon(&self) -> u64 {
        self.horizon
    }

    /// Whether new demand may still be created.
    #[inline]
    pub fn before_horizon(&self) -> bool {
        self.clock.now() < self.horizon
    }

    pub fn stage_count(&self) -> usize {
        self.stage_count
    }

    // ── Scheduler ──

    /// Park a completion for `work` owned by `stage`, due at `run_at`.
    pub fn schedule_at(&mut self, run_at: u64, stage: StageId, work: TokenId) -> PipelineResult<()> {
        if run_at < self.now() {
            return Err(PipelineError::invariant(
                stage,
                format!("task for {work} scheduled in the past ({run_at} < {})", self.now()),
            ));
        }
        tracing::trace!(?stage, %work, run_at, "schedule");
        self.scheduler.schedule_at(run_at, stage, work);
        Ok(())
    }

    /// Park a completion `ticks` ticks from now.
    pub fn schedule_after(&mut self, ticks: u64, stage: StageId, work: TokenId) -> PipelineResult<()> {
        let run_at = self.now().saturating_add(self.clock.ticks_to_ms(ticks));
        self.schedule_at(run_at, stage, work)
    }

    pub fn pending_tasks(&self) -> usize {
        self.scheduler.len()
    }

    /// Pop the earliest deferred task and move the clock to it.
    pub(crate) fn pop_task(&mut self) -> Option<ScheduledTask> {
        let task = self.scheduler.pop_next()?;
        self.clock.jump_to(task.run_at);
        Some(task)
    }

    // ── Agenda ──

    pub(crate) fn pop_continuation(&mut self) -> Option<Continuation> {
        let (cont, ready_at) = self.agenda.pop_front()?;
        Some(self.dispatched(cont, ready_at))
    }

    /// Take the oldest ready continuation owned by a stage below `limit`.
    pub(crate) fn take_continuation_below(&mut self, limit: StageId) -> Option<Continuation> {
        let idx = self
            .agenda
            .iter()
            .position(|(cont, _)| cont.stage.index() < limit.index())?;
        let (cont, ready_at) = self.agenda.remove(idx)?;
        Some(self.dispatched(cont, ready_at))
    }

    fn dispatched(&mut self, cont: Continuation, ready_at: u64) -> Continuation {
        let lag = self.now().saturating_sub(ready_at);
        self.max_lag = self.max_lag.max(lag);
        tracing::trace!(stage = ?cont.stage, source = %cont.source, lag, "continuation");
        cont
    }

    pub fn agenda_len(&self) -> usize {
        self.agenda.len()
    }

    /// Longest time, in ms, any continuation waited after becoming ready.
    pub fn max_continuation_lag(&self) -> u64 {
        self.max_lag
    }

    /// Hand `stage` the fill of `source` once it happens.
    pub fn register(&mut self, source: TokenId, stage: StageId) -> PipelineResult<()> {
        let continuation = Continuation { stage, source };
        if let Some(ready) = self.tokens.register(source, continuation)? {
            let now = self.now();
            self.agenda.push_back((ready, now));
        }
        Ok(())
    }

    // ── Tokens ──

    pub fn token(&self, id: TokenId) -> PipelineResult<&Token> {
        self.tokens.get(id)
    }

    pub fn tokens(&self) -> &TokenArena {
        &self.tokens
    }

    pub fn is_filled(&self, id: TokenId) -> PipelineResult<bool> {
        Ok(self.tokens.get(id)?.filled)
    }

    /// Future a work item is bound to.
    pub fn work_future(&self, item: TokenId) -> PipelineResult<Option<TokenId>> {
        let token = self.tokens.get(item)?;
        token.work_item().map(|w| w.future).ok_or_else(|| {
            PipelineError::invariant(token.position, format!("{item} is not a work item"))
        })
    }

    pub fn work_slot(&self, item: TokenId) -> PipelineResult<usize> {
        let token = self.tokens.get(item)?;
        token.work_item().map(|w| w.slot).ok_or_else(|| {
            PipelineError::invariant(token.position, format!("{item} is not a work item"))
        })
    }

    /// Bind a caller's future to a work item that had none.
    pub fn attach_future(&mut self, item: TokenId, future: TokenId) -> PipelineResult<()> {
        let stage = self.tokens.get(item)?.position;
        let work = self.tokens.work_item_mut(item)?;
        if work.future.is_some() {
            return Err(PipelineError::invariant(
                stage,
                format!("{item} already serves a caller"),
            ));
        }
        work.future = Some(future);
        Ok(())
    }

    pub fn create_request(&mut self, stage: StageId) -> PipelineResult<TokenId> {
        let now = self.now();
        let id = self.tokens.insert(TokenKind::Request, stage, now, false);
        self.recorder.create(
            id,
            TrackKind::Request,
            Anchor::edge(stage, Side::Downstream),
            now,
            KeyframeProps::none(),
        )?;
        tracing::debug!(?stage, %id, now, "request created");
        Ok(id)
    }

    pub fn create_future(&mut self, stage: StageId, filled: bool) -> PipelineResult<TokenId> {
        let now = self.now();
        let id = self.tokens.insert(TokenKind::Future, stage, now, filled);
        let initial = if filled {
            KeyframeProps::fill(FillState::Filled)
        } else {
            KeyframeProps::none()
        };
        self.recorder.create(
            id,
            TrackKind::Future,
            Anchor::edge(stage, Side::Upstream),
            now,
            initial,
        )?;
        tracing::debug!(?stage, %id, now, filled, "future created");
        Ok(id)
    }

    pub fn create_work_item(
        &mut self,
        stage: StageId,
        future: Option<TokenId>,
        slot: usize,
    ) -> PipelineResult<TokenId> {
        let now = self.now();
        let kind = TokenKind::WorkItem(WorkItem {
            future,
            slot,
            progress: WorkProgress::Idle,
        });
        let id = self.tokens.insert(kind, stage, now, false);
        self.recorder.create(
            id,
            TrackKind::WorkItem,
            Anchor::slot(stage, slot),
            now,
            KeyframeProps::none(),
        )?;
        tracing::debug!(?stage, %id, slot, "work item created");
        Ok(id)
    }

    /// Start a request's one-tick trip to the downstream neighbour.
    pub fn send_request(&mut self, req: TokenId) -> PipelineResult<()> {
        let (from, to) = self.tokens.step(req, self.stage_count)?;
        let now = self.now();
        self.recorder
            .push_tick(req, now, KeyframeProps::position(Anchor::edge(to, Side::Upstream)))?;
        tracing::debug!(%req, ?from, ?to, now, "request sent");
        Ok(())
    }

    /// Start a future's one-tick trip to the upstream neighbour. The reference
    /// travels whether or not the value is there yet.
    pub fn send_future(&mut self, fut: TokenId) -> PipelineResult<()> {
        let (from, to) = self.tokens.step(fut, self.stage_count)?;
        let now = self.now();
        self.recorder
            .push_tick(fut, now, KeyframeProps::position(Anchor::edge(to, Side::Downstream)))?;
        tracing::debug!(%fut, ?from, ?to, now, "future sent");
        Ok(())
    }

    pub fn remove(&mut self, id: TokenId) -> PipelineResult<()> {
        self.tokens.remove(id)?;
        let now = self.now();
        self.recorder.push_tick(id, now, KeyframeProps::opacity(0.0))?;
        tracing::trace!(%id, now, "removed");
        Ok(())
    }

    /// Raw data arrived for a work item; its transform is still pending.
    pub fn partial_fill(&mut self, item: TokenId) -> PipelineResult<()> {
        self.tokens.work_item_mut(item)?.progress = WorkProgress::Partial;
        let now = self.now();
        self.recorder
            .push_tick(item, now, KeyframeProps::fill(FillState::Partial))
    }

    /// Spin a work item for `ticks` ticks. Does not move the clock.
    pub fn work(&mut self, item: TokenId, ticks: u64) -> PipelineResult<()> {
        self.tokens.work_item_mut(item)?.progress = WorkProgress::Working;
        let now = self.now();
        let duration = self.clock.ticks_to_ms(ticks);
        self.recorder
            .push(item, now, duration, KeyframeProps::rotation(WORK_TURNS))
    }

    /// Move a work item to another queue slot.
    pub fn shift(&mut self, item: TokenId, slot: usize) -> PipelineResult<()> {
        let stage = self.tokens.get(item)?.position;
        self.tokens.work_item_mut(item)?.slot = slot;
        let now = self.now();
        self.recorder
            .push_tick(item, now, KeyframeProps::position(Anchor::slot(stage, slot)))
    }

    pub fn fill_work(&mut self, item: TokenId) -> PipelineResult<()> {
        if self.tokens.fill(item, self.now())?.is_some() {
            let stage = self.tokens.get(item)?.position;
            return Err(PipelineError::invariant(
                stage,
                format!("work item {item} carried a continuation"),
            ));
        }
        let now = self.now();
        self.recorder
            .push_tick(item, now, KeyframeProps::fill(FillState::Filled))
    }

    /// Fill a future; its continuation, if any, becomes ready.
    pub fn fill_future(&mut self, fut: TokenId) -> PipelineResult<()> {
        let now = self.now();
        if let Some(ready) = self.tokens.fill(fut, now)? {
            self.agenda.push_back((ready, now));
        }
        self.recorder
            .push_tick(fut, now, KeyframeProps::fill(FillState::Filled))?;
        tracing::debug!(%fut, now, "future filled");
        Ok(())
    }

    // ── Recording ──

    pub fn recorder(&self) -> &KeyframeRecorder {
        &self.recorder
    }

    pub(crate) fn into_tracks(self) -> Vec<Track> {
        self.recorder.into_tracks()
    }
}
