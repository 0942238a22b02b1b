//! MapOp: order-preserving transform stage.
//!
//! Every incoming request is forwarded downstream at once and a work item is
//! queued for it. Downstream completions must arrive in queue order; each one
//! runs the transform for `ticks_of_work` ticks and fills the caller's future.

use crate::pipeline::context::SimContext;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::{StageId, TokenId};
use crate::pipeline::operator::{deliver, Operator, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueuedWork {
    item: TokenId,
    /// Downstream future this item is waiting on.
    awaiting: TokenId,
}

#[derive(Debug, Clone)]
pub struct MapOp {
    fn_name: String,
    ticks_of_work: u64,
    queue: Vec<QueuedWork>,
    completed: u64,
    max_depth: usize,
}

impl MapOp {
    pub fn new(fn_name: impl Into<String>, ticks_of_work: u64) -> Self {
        Self {
            fn_name: fn_name.into(),
            ticks_of_work,
            queue: Vec::new(),
            completed: 0,
            max_depth: 0,
        }
    }

    pub fn fn_name(&self) -> &str {
        &self.fn_name
    }

    pub fn ticks_of_work(&self) -> u64 {
        self.ticks_of_work
    }

    /// Work items currently queued.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Deepest the queue has been.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    fn first_unfilled(&self, ctx: &SimContext) -> PipelineResult<Option<usize>> {
        for (idx, entry) in self.queue.iter().enumerate() {
            if !ctx.is_filled(entry.item)? {
                return Ok(Some(idx));
            }
        }
        Ok(None)
    }
}

impl Stage for MapOp {
    fn name(&self) -> &str {
        "Map"
    }

    fn labels(&self) -> Vec<String> {
        vec!["Map".to_string(), format!("({})", self.fn_name)]
    }

    fn receive_request(
        &mut self,
        ctx: &mut SimContext,
        stage: StageId,
        req: TokenId,
        downstream: &mut [Operator],
    ) -> PipelineResult<TokenId> {
        ctx.remove(req)?;
        let slot = self.queue.len();
        let fut = ctx.create_future(stage, false)?;
        let item = ctx.create_work_item(stage, Some(fut), slot)?;
        let down_req = ctx.create_request(stage)?;
        ctx.tick();
        ctx.send_future(fut)?;
        ctx.send_request(down_req)?;

        let down_fut = deliver(ctx, downstream, down_req)?;
        self.queue.push(QueuedWork {
            item,
            awaiting: down_fut,
        });
        self.max_depth = self.max_depth.max(self.queue.len());
        ctx.tick();
        ctx.register(down_fut, stage)?;
        Ok(fut)
    }

    fn on_fill(
        &mut self,
        ctx: &mut SimContext,
        stage: StageId,
        source: TokenId,
        _downstream: &mut [Operator],
    ) -> PipelineResult<()> {
        ctx.remove(source)?;
        ctx.tick();

        let idx = self.first_unfilled(ctx)?.ok_or_else(|| {
            PipelineError::invariant(stage, format!("{source} filled but no work item is waiting"))
        })?;
        let entry = self.queue[idx];
        if entry.awaiting != source {
            return Err(PipelineError::invariant(
                stage,
                format!(
                    "downstream completed out of order: expected {}, got {source}",
                    entry.awaiting
                ),
            ));
        }
        let fut = ctx.work_future(entry.item)?.ok_or_else(|| {
            PipelineError::invariant(stage, format!("{} has no future to fill", entry.item))
        })?;

        ctx.partial_fill(entry.item)?;
        ctx.tick();
        ctx.work(entry.item, self.ticks_of_work)?;
        ctx.tick_n(self.ticks_of_work);
        ctx.fill_work(entry.item)?;
        ctx.tick();

        self.queue.remove(idx);
        for (slot, queued) in self.queue.iter().enumerate().skip(idx) {
            ctx.shift(queued.item, slot)?;
        }
        ctx.remove(entry.item)?;
        ctx.fill_future(fut)?;
        self.completed += 1;
        tracing::debug!(?stage, func = %self.fn_name, %fut, now = ctx.now(), "mapped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::operators::test_support::{drain, drive_one};
    use crate::pipeline::operators::{Count, FileSystem};

    #[test]
    fn test_single_value_through_count() {
        let mut ctx = SimContext::new(3, 100, 100_000);
        let mut stages = vec![
            Operator::from(Count::new()),
            Operator::from(MapOp::new("parse", 2)),
        ];
        let fut = drive_one(&mut ctx, &mut stages);

        let token = ctx.token(fut).unwrap();
        assert!(token.filled);
        assert_eq!(token.position, StageId(2));
        let map = stages[1].as_map().unwrap();
        assert_eq!(map.queue_len(), 0);
        assert_eq!(map.completed(), 1);
        assert_eq!(map.labels(), vec!["Map", "(parse)"]);
    }

    #[test]
    fn test_work_takes_ticks_of_work() {
        let mut ctx = SimContext::new(3, 100, 100_000);
        let mut stages = vec![
            Operator::from(Count::new()),
            Operator::from(MapOp::new("parse", 4)),
        ];
        drive_one(&mut ctx, &mut stages);
        let item = ctx
            .tokens()
            .iter()
            .find(|t| t.work_item().is_some() && t.position == StageId(1))
            .unwrap();
        let spin = ctx
            .recorder()
            .track(item.id)
            .unwrap()
            .keyframes
            .iter()
            .find(|k| k.props.rotation.is_some())
            .copied()
            .unwrap();
        assert_eq!(spin.duration, 400);
    }

    #[test]
    fn test_queue_preserves_order() {
        let mut ctx = SimContext::new(3, 100, 100_000);
        let mut stages = vec![
            Operator::from(FileSystem::new(3)),
            Operator::from(MapOp::new("decompress", 1)),
        ];
        let mut futures = Vec::new();
        for _ in 0..3 {
            let req = ctx.create_request(StageId(2)).unwrap();
            ctx.tick();
            ctx.send_request(req).unwrap();
            futures.push(deliver(&mut ctx, &mut stages, req).unwrap());
        }
        assert_eq!(stages[1].as_map().unwrap().queue_len(), 3);
        drain(&mut ctx, &mut stages);

        let filled: Vec<u64> = futures
            .iter()
            .map(|f| ctx.token(*f).unwrap().filled_at.unwrap())
            .collect();
        assert!(filled.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(stages[1].as_map().unwrap().max_depth(), 3);
    }

    #[test]
    fn test_out_of_order_completion_is_violation() {
        let mut ctx = SimContext::new(3, 100, 100_000);
        let mut stages = vec![
            Operator::from(FileSystem::new(0).with_latency_pattern(vec![20, 1])),
            Operator::from(MapOp::new("decompress", 1)),
        ];
        for _ in 0..2 {
            let req = ctx.create_request(StageId(2)).unwrap();
            ctx.tick();
            ctx.send_request(req).unwrap();
            deliver(&mut ctx, &mut stages, req).unwrap();
        }

        let task = ctx.pop_task().unwrap();
        stages[0].on_deadline(&mut ctx, task.stage, task.work).unwrap();
        let cont = ctx.pop_continuation().unwrap();
        let (below, rest) = stages.split_at_mut(1);
        let err = rest[0]
            .on_fill(&mut ctx, cont.stage, cont.source, below)
            .unwrap_err();
        assert!(err.is_invariant_violation());
        assert!(err.to_string().contains("out of order"));
    }
}
