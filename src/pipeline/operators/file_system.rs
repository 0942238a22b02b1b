//! FileSystem: asynchronous leaf stage with fixed latency.
//!
//! Each request gets an unfilled future and a work item that spins for the
//! configured number of ticks. Completion is parked in the scheduler; when it
//! comes due the future and the work item are filled together. Outstanding
//! requests are served independently, so a latency pattern can make them
//! finish out of order.

use crate::pipeline::context::SimContext;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::{StageId, TokenId};
use crate::pipeline::operator::{Operator, Stage};

#[derive(Debug, Clone)]
pub struct FileSystem {
    latency_ticks: u64,
    /// Per-request latencies, cycled. Overrides `latency_ticks` when non-empty.
    latency_pattern: Vec<u64>,
    /// Work items in flight, in slot order.
    in_flight: Vec<TokenId>,
    served: u64,
    completed: u64,
}

impl FileSystem {
    pub fn new(latency_ticks: u64) -> Self {
        Self {
            latency_ticks,
            latency_pattern: Vec::new(),
            in_flight: Vec::new(),
            served: 0,
            completed: 0,
        }
    }

    pub fn with_latency_pattern(mut self, pattern: Vec<u64>) -> Self {
        self.latency_pattern = pattern;
        self
    }

    pub fn latency_ticks(&self) -> u64 {
        self.latency_ticks
    }

    pub fn latency_pattern(&self) -> &[u64] {
        &self.latency_pattern
    }

    pub fn in_flight(&self) -> &[TokenId] {
        &self.in_flight
    }

    pub fn served(&self) -> u64 {
        self.served
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    fn next_latency(&self) -> u64 {
        if self.latency_pattern.is_empty() {
            self.latency_ticks
        } else {
            self.latency_pattern[(self.served as usize) % self.latency_pattern.len()]
        }
    }
}

impl Stage for FileSystem {
    fn name(&self) -> &str {
        "FileSystem"
    }

    fn labels(&self) -> Vec<String> {
        vec!["File".to_string(), "System".to_string()]
    }

    fn receive_request(
        &mut self,
        ctx: &mut SimContext,
        stage: StageId,
        req: TokenId,
        _downstream: &mut [Operator],
    ) -> PipelineResult<TokenId> {
        ctx.remove(req)?;
        let fut = ctx.create_future(stage, false)?;
        let item = ctx.create_work_item(stage, Some(fut), self.in_flight.len())?;
        self.in_flight.push(item);
        ctx.tick();
        ctx.send_future(fut)?;

        let latency = self.next_latency();
        ctx.work(item, latency)?;
        ctx.schedule_after(latency, stage, item)?;
        self.served += 1;
        tracing::debug!(?stage, %req, %fut, latency, "read issued");
        Ok(fut)
    }

    fn on_deadline(
        &mut self,
        ctx: &mut SimContext,
        stage: StageId,
        work: TokenId,
    ) -> PipelineResult<()> {
        let pos = self
            .in_flight
            .iter()
            .position(|&item| item == work)
            .ok_or_else(|| PipelineError::invariant(stage, format!("{work} is not in flight")))?;
        let fut = ctx.work_future(work)?.ok_or_else(|| {
            PipelineError::invariant(stage, format!("{work} has no future to fill"))
        })?;

        ctx.fill_future(fut)?;
        ctx.fill_work(work)?;
        ctx.remove(work)?;
        self.in_flight.remove(pos);
        for (slot, &item) in self.in_flight.iter().enumerate().skip(pos) {
            ctx.shift(item, slot)?;
        }
        self.completed += 1;
        tracing::debug!(?stage, %fut, now = ctx.now(), "read complete");
        Ok(())
    }
}
