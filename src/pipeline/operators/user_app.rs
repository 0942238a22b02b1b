//! UserApp: the consumer at the top of the pipeline.
//!
//! Issues one request at a time and waits for its future before issuing the
//! next, until the simulated time reaches the horizon.

use crate::pipeline::context::SimContext;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::{StageId, TokenId};
use crate::pipeline::operator::{deliver, Operator, Stage};

#[derive(Debug, Clone, Default)]
pub struct UserApp {
    issued: u64,
    completed: u64,
}

impl UserApp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests sent downstream so far.
    pub fn issued(&self) -> u64 {
        self.issued
    }

    /// Futures received back filled.
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Issue the next request if the horizon has not been reached.
    /// Returns whether a request went out.
    pub fn start(
        &mut self,
        ctx: &mut SimContext,
        stage: StageId,
        downstream: &mut [Operator],
    ) -> PipelineResult<bool> {
        if !ctx.before_horizon() {
            tracing::debug!(?stage, now = ctx.now(), "horizon reached, consumer idle");
            return Ok(false);
        }
        let req = ctx.create_request(stage)?;
        ctx.tick();
        ctx.send_request(req)?;
        ctx.tick();
        let fut = deliver(ctx, downstream, req)?;
        ctx.register(fut, stage)?;
        self.issued += 1;
        Ok(true)
    }
}

impl Stage for UserApp {
    fn name(&self) -> &str {
        "UserApp"
    }

    fn labels(&self) -> Vec<String> {
        vec!["User".to_string(), "App".to_string()]
    }

    fn receive_request(
        &mut self,
        _ctx: &mut SimContext,
        stage: StageId,
        req: TokenId,
        _downstream: &mut [Operator],
    ) -> PipelineResult<TokenId> {
        Err(PipelineError::invariant(
            stage,
            format!("consumer has no upstream, got {req}"),
        ))
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
        self.completed += 1;
        tracing::info!(?stage, round_trip = self.completed, now = ctx.now(), "value consumed");
        self.start(ctx, stage, downstream)?;
        Ok(())
    }
}
