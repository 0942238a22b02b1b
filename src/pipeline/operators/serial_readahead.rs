//! SerialReadahead: prefetching stage.
//!
//! Keeps up to `window` downstream requests in flight ahead of demand. Work
//! items live in two FIFO queues laid out back to back:
//!
//! - `queued`: items a caller is waiting on, each bound to the caller's future.
//! - `buffered`: items fetched ahead of demand, in flight or complete, with
//!   no caller yet.
//!
//! A new request first takes from `buffered`: a complete head is handed out
//! as an already-filled future, an in-flight head is adopted into `queued`.
//! Only when `buffered` is empty does the request go downstream. A prefetch is
//! issued whenever downstream data arrives and fewer than `window` items are
//! buffered, counting the item that just arrived. A prefetch whose downstream
//! future comes back already filled lands on the spot and may be followed by
//! the next one.
//!
//! With a single consumer `queued` never holds more than one item, so
//! `queued + buffered <= window + 1` holds after every transition.

use std::collections::VecDeque;

use crate::pipeline::context::SimContext;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::{StageId, TokenId};
use crate::pipeline::operator::{deliver, Operator, Stage};

pub const DEFAULT_WINDOW: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pending {
    item: TokenId,
    /// Downstream future fetching this item's data.
    awaiting: TokenId,
}

#[derive(Debug, Clone)]
pub struct SerialReadahead {
    window: usize,
    queued: VecDeque<Pending>,
    buffered: VecDeque<Pending>,
    prefetches: u64,
    hits: u64,
}

impl Default for SerialReadahead {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl SerialReadahead {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            queued: VecDeque::new(),
            buffered: VecDeque::new(),
            prefetches: 0,
            hits: 0,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Items with a waiting caller.
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// Items fetched ahead of demand.
    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    /// Downstream requests issued ahead of demand.
    pub fn prefetches(&self) -> u64 {
        self.prefetches
    }

    /// Requests answered straight from a completed prefetch.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    fn check_window(&self, stage: StageId) -> PipelineResult<()> {
        let held = self.queued.len() + self.buffered.len();
        if held > self.window + 1 {
            return Err(PipelineError::invariant(
                stage,
                format!(
                    "{held} items held ({} queued, {} buffered), window is {}",
                    self.queued.len(),
                    self.buffered.len(),
                    self.window
                ),
            ));
        }
        Ok(())
    }

    /// Move every item to the slot matching its place in `queued ++ buffered`.
    fn relayout(&self, ctx: &mut SimContext) -> PipelineResult<()> {
        for (slot, pending) in self.queued.iter().chain(self.buffered.iter()).enumerate() {
            if ctx.work_slot(pending.item)? != slot {
                ctx.shift(pending.item, slot)?;
            }
        }
        Ok(())
    }

    fn first_unfilled(&self, ctx: &SimContext) -> PipelineResult<Option<(bool, usize)>> {
        for (idx, pending) in self.queued.iter().enumerate() {
            if !ctx.is_filled(pending.item)? {
                return Ok(Some((true, idx)));
            }
        }
        for (idx, pending) in self.buffered.iter().enumerate() {
            if !ctx.is_filled(pending.item)? {
                return Ok(Some((false, idx)));
            }
        }
        Ok(None)
    }

    /// Issue one request ahead of demand. Returns whether its data is
    /// already there.
    fn prefetch(
        &mut self,
        ctx: &mut SimContext,
        stage: StageId,
        downstream: &mut [Operator],
    ) -> PipelineResult<bool> {
        let slot = self.queued.len() + self.buffered.len();
        let req = ctx.create_request(stage)?;
        let item = ctx.create_work_item(stage, None, slot)?;
        ctx.tick();
        ctx.send_request(req)?;
        ctx.tick();
        let down_fut = deliver(ctx, downstream, req)?;
        self.buffered.push_back(Pending {
            item,
            awaiting: down_fut,
        });
        self.prefetches += 1;
        tracing::debug!(?stage, %item, buffered = self.buffered.len(), "prefetch issued");

        if !ctx.is_filled(down_fut)? {
            ctx.register(down_fut, stage)?;
            return Ok(false);
        }
        ctx.remove(down_fut)?;
        ctx.tick();
        ctx.partial_fill(item)?;
        ctx.fill_work(item)?;
        tracing::debug!(?stage, %item, "prefetch landed at once");
        Ok(true)
    }

    /// Keep prefetching while the window has room and each answer is immediate.
    fn top_up(
        &mut self,
        ctx: &mut SimContext,
        stage: StageId,
        downstream: &mut [Operator],
    ) -> PipelineResult<()> {
        while self.buffered.len() < self.window && ctx.before_horizon() {
            if !self.prefetch(ctx, stage, downstream)? {
                break;
            }
            self.check_window(stage)?;
        }
        Ok(())
    }
}

impl Stage for SerialReadahead {
    fn name(&self) -> &str {
        "SerialReadahead"
    }

    fn labels(&self) -> Vec<String> {
        vec!["Serial".to_string(), "Readahead".to_string()]
    }

    fn receive_request(
        &mut self,
        ctx: &mut SimContext,
        stage: StageId,
        req: TokenId,
        downstream: &mut [Operator],
    ) -> PipelineResult<TokenId> {
        ctx.remove(req)?;

        if let Some(head) = self.buffered.front().copied() {
            if ctx.is_filled(head.item)? {
                self.buffered.pop_front();
                let fut = ctx.create_future(stage, true)?;
                ctx.tick();
                ctx.remove(head.item)?;
                self.relayout(ctx)?;
                ctx.tick();
                ctx.send_future(fut)?;
                self.hits += 1;
                tracing::debug!(?stage, %fut, "served from readahead buffer");
                self.check_window(stage)?;
                return Ok(fut);
            }

            self.buffered.pop_front();
            let fut = ctx.create_future(stage, false)?;
            ctx.attach_future(head.item, fut)?;
            self.queued.push_back(head);
            ctx.tick();
            ctx.send_future(fut)?;
            tracing::debug!(?stage, %fut, item = %head.item, "adopted in-flight prefetch");
            self.check_window(stage)?;
            return Ok(fut);
        }

        let slot = self.queued.len();
        let fut = ctx.create_future(stage, false)?;
        let item = ctx.create_work_item(stage, Some(fut), slot)?;
        let down_req = ctx.create_request(stage)?;
        ctx.tick();
        ctx.send_future(fut)?;
        ctx.send_request(down_req)?;
        let down_fut = deliver(ctx, downstream, down_req)?;
        self.queued.push_back(Pending {
            item,
            awaiting: down_fut,
        });
        ctx.tick();
        ctx.register(down_fut, stage)?;
        self.check_window(stage)?;
        Ok(fut)
    }

    fn on_fill(
        &mut self,
        ctx: &mut SimContext,
        stage: StageId,
        source: TokenId,
        downstream: &mut [Operator],
    ) -> PipelineResult<()> {
        ctx.remove(source)?;
        ctx.tick();

        let (has_caller, idx) = self.first_unfilled(ctx)?.ok_or_else(|| {
            PipelineError::invariant(stage, format!("{source} filled but no work item is waiting"))
        })?;
        let target = if has_caller {
            self.queued[idx]
        } else {
            self.buffered[idx]
        };
        if target.awaiting != source {
            return Err(PipelineError::invariant(
                stage,
                format!(
                    "downstream completed out of order: expected {}, got {source}",
                    target.awaiting
                ),
            ));
        }
        ctx.partial_fill(target.item)?;
        self.top_up(ctx, stage, downstream)?;

        if has_caller {
            let fut = ctx.work_future(target.item)?.ok_or_else(|| {
                PipelineError::invariant(stage, format!("{} has no caller future", target.item))
            })?;
            ctx.fill_work(target.item)?;
            ctx.tick();
            self.queued.remove(idx);
            self.relayout(ctx)?;
            ctx.remove(target.item)?;
            ctx.fill_future(fut)?;
        } else {
            ctx.fill_work(target.item)?;
        }
        self.check_window(stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::operators::test_support::{drain, drive_one};
    use crate::pipeline::operators::{Count, FileSystem, MapOp, UserApp};
    use proptest::prelude::*;

    fn start(ctx: &mut SimContext, stages: &mut [Operator]) {
        let top = stages.len() - 1;
        let (below, rest) = stages.split_at_mut(top);
        match &mut rest[0] {
            Operator::UserApp(app) => {
                app.start(ctx, StageId(top as u32), below).unwrap();
            }
            _ => unreachable!(),
        }
    }

    fn pipeline(latency: u64, window: usize) -> Vec<Operator> {
        vec![
            Operator::from(FileSystem::new(latency)),
            Operator::from(SerialReadahead::new(window)),
            Operator::from(UserApp::new()),
        ]
    }

    fn over_count(window: usize) -> Vec<Operator> {
        vec![
            Operator::from(Count::new()),
            Operator::from(SerialReadahead::new(window)),
            Operator::from(UserApp::new()),
        ]
    }

    /// Run continuations and tasks until the first downstream fill reached
    /// the readahead stage.
    fn run_until_first_fill(ctx: &mut SimContext, stages: &mut [Operator]) {
        let task = ctx.pop_task().unwrap();
        stages[0].on_deadline(ctx, task.stage, task.work).unwrap();
        let cont = ctx.pop_continuation().unwrap();
        assert_eq!(cont.stage, StageId(1));
        let (below, rest) = stages.split_at_mut(1);
        rest[0].on_fill(ctx, cont.stage, cont.source, below).unwrap();
    }

    #[test]
    fn test_prefetch_after_first_fill() {
        let mut ctx = SimContext::new(3, 1000, 100_000);
        let mut stages = pipeline(6, 1);
        start(&mut ctx, &mut stages);
        assert_eq!(stages[1].as_readahead().unwrap().queued_len(), 1);

        run_until_first_fill(&mut ctx, &mut stages);
        let ra = stages[1].as_readahead().unwrap();
        assert_eq!(ra.queued_len(), 0);
        assert_eq!(ra.buffered_len(), 1);
        assert_eq!(ra.prefetches(), 1);
        assert_eq!(stages[0].as_file_system().unwrap().in_flight().len(), 1);
    }

    #[test]
    fn test_no_prefetch_past_horizon() {
        let mut ctx = SimContext::new(3, 1000, 3_000);
        let mut stages = pipeline(6, 1);
        start(&mut ctx, &mut stages);
        drain(&mut ctx, &mut stages);

        let ra = stages[1].as_readahead().unwrap();
        assert_eq!(ra.prefetches(), 0);
        assert_eq!(ra.buffered_len(), 0);
        assert_eq!(stages[2].as_user_app().unwrap().completed(), 1);
    }

    #[test]
    fn test_completed_prefetch_served_immediately() {
        let mut ctx = SimContext::new(3, 1000, 100_000);
        let mut stages = vec![
            Operator::from(FileSystem::new(2)),
            Operator::from(SerialReadahead::new(1)),
        ];
        let first = drive_one(&mut ctx, &mut stages);
        assert!(ctx.is_filled(first).unwrap());
        let ra = stages[1].as_readahead().unwrap();
        assert_eq!(ra.buffered_len(), 1);
        assert_eq!(ra.prefetches(), 1);

        let second = drive_one(&mut ctx, &mut stages);
        let token = ctx.token(second).unwrap();
        assert!(token.filled);
        assert_eq!(token.filled_at, Some(token.created_at));
        let ra = stages[1].as_readahead().unwrap();
        assert_eq!(ra.hits(), 1);
        assert_eq!(ra.buffered_len(), 0);
        // answered from the buffer, nothing new went downstream
        assert_eq!(ra.prefetches(), 1);
        assert_eq!(stages[0].as_file_system().unwrap().served(), 2);
    }

    #[test]
    fn test_wide_window_keeps_more_in_flight() {
        let mut ctx = SimContext::new(3, 1000, 100_000);
        let mut stages = pipeline(10, 3);
        start(&mut ctx, &mut stages);
        run_until_first_fill(&mut ctx, &mut stages);
        // one prefetch per downstream arrival
        assert_eq!(stages[1].as_readahead().unwrap().buffered_len(), 1);
    }

    #[test]
    fn test_immediate_prefetches_fill_the_window() {
        let mut ctx = SimContext::new(3, 1000, 100_000);
        let mut stages = vec![
            Operator::from(Count::new()),
            Operator::from(SerialReadahead::new(2)),
        ];
        let first = drive_one(&mut ctx, &mut stages);
        assert!(ctx.is_filled(first).unwrap());
        let ra = stages[1].as_readahead().unwrap();
        assert_eq!(ra.prefetches(), 2);
        assert_eq!(ra.buffered_len(), 2);
        assert_eq!(ra.queued_len(), 0);

        let second = drive_one(&mut ctx, &mut stages);
        assert!(ctx.is_filled(second).unwrap());
        let ra = stages[1].as_readahead().unwrap();
        assert_eq!(ra.hits(), 1);
        assert_eq!(ra.buffered_len(), 1);
        assert_eq!(ctx.max_continuation_lag(), 0);
    }

    #[test]
    fn test_consumer_runs_on_the_tick_of_its_fill() {
        let mut ctx = SimContext::new(3, 1000, 30_000);
        let mut stages = over_count(2);
        start(&mut ctx, &mut stages);
        drain(&mut ctx, &mut stages);

        let app = stages[2].as_user_app().unwrap();
        assert!(app.completed() > 1);
        assert_eq!(app.issued(), app.completed());
        assert!(stages[1].as_readahead().unwrap().hits() > 0);
        assert_eq!(ctx.max_continuation_lag(), 0);
    }

    #[test]
    fn test_prefetch_through_map_settles_before_caller_fill() {
        let mut ctx = SimContext::new(4, 1000, 40_000);
        let mut stages = vec![
            Operator::from(Count::new()),
            Operator::from(MapOp::new("parse", 2)),
            Operator::from(SerialReadahead::new(2)),
            Operator::from(UserApp::new()),
        ];
        start(&mut ctx, &mut stages);
        drain(&mut ctx, &mut stages);

        let app = stages[3].as_user_app().unwrap();
        assert_eq!(app.issued(), app.completed());
        assert_eq!(stages[1].as_map().unwrap().queue_len(), 0);
        assert_eq!(ctx.max_continuation_lag(), 0);
    }

    #[test]
    fn test_excess_demand_breaks_window() {
        let mut ctx = SimContext::new(3, 1000, 100_000);
        let mut stages = vec![
            Operator::from(FileSystem::new(6)),
            Operator::from(SerialReadahead::new(1)),
        ];
        fn inject(ctx: &mut SimContext, stages: &mut [Operator]) -> PipelineResult<TokenId> {
            let req = ctx.create_request(StageId(2))?;
            ctx.tick();
            ctx.send_request(req)?;
            deliver(ctx, stages, req)
        }
        inject(&mut ctx, &mut stages).unwrap();
        inject(&mut ctx, &mut stages).unwrap();
        assert_eq!(stages[1].as_readahead().unwrap().queued_len(), 2);

        let err = inject(&mut ctx, &mut stages).unwrap_err();
        assert!(err.is_invariant_violation());
        assert!(err.to_string().contains("window is 1"), "{err}");
    }

    proptest! {
        #[test]
        fn prop_window_respected(
            latency in 0u64..8,
            window in 1usize..4,
            horizon_ticks in 0u64..40,
            over_counter in any::<bool>(),
        ) {
            let mut ctx = SimContext::new(3, 100, horizon_ticks * 100);
            let mut stages = if over_counter {
                over_count(window)
            } else {
                pipeline(latency, window)
            };
            start(&mut ctx, &mut stages);
            loop {
                let ra = stages[1].as_readahead().unwrap();
                prop_assert!(ra.queued_len() + ra.buffered_len() <= ra.window() + 1);
                if let Some(cont) = ctx.pop_continuation() {
                    let (below, rest) = stages.split_at_mut(cont.stage.index());
                    rest[0].on_fill(&mut ctx, cont.stage, cont.source, below).unwrap();
                } else if let Some(task) = ctx.pop_task() {
                    stages[task.stage.index()].on_deadline(&mut ctx, task.stage, task.work).unwrap();
                } else {
                    break;
                }
            }
            let app = stages[2].as_user_app().unwrap();
            prop_assert_eq!(app.issued(), app.completed());
            prop_assert_eq!(ctx.max_continuation_lag(), 0);
        }
    }
}
