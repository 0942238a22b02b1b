//! Count: synchronous leaf stage.
//!
//! Answers every request with an already-filled future. Cannot have a
//! downstream neighbour.

use crate::pipeline::context::SimContext;
use crate::pipeline::error::PipelineResult;
use crate::pipeline::id::{StageId, TokenId};
use crate::pipeline::operator::{Operator, Stage};

#[derive(Debug, Clone, Default)]
pub struct Count {
    served: u64,
}

impl Count {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requests answered so far.
    pub fn served(&self) -> u64 {
        self.served
    }
}

impl Stage for Count {
    fn name(&self) -> &str {
        "Count"
    }

    fn labels(&self) -> Vec<String> {
        vec!["Count".to_string()]
    }

    fn receive_request(
        &mut self,
        ctx: &mut SimContext,
        stage: StageId,
        req: TokenId,
        _downstream: &mut [Operator],
    ) -> PipelineResult<TokenId> {
        ctx.remove(req)?;
        let fut = ctx.create_future(stage, true)?;
        ctx.tick();
        ctx.send_future(fut)?;
        ctx.tick();
        self.served += 1;
        Ok(fut)
    }
}
