//! Operator abstraction for the pipeline.
//!
//! Two layers, mirroring how stages are used:
//! - **`Stage` trait**: the three entry points every operator implements.
//! - **`Operator` enum**: the closed set of built-in operators, dispatched by
//!   match so the simulation loop never goes through a vtable.
//!
//! Stages only ever talk to their downstream neighbour. A handler that needs
//! to forward a request receives the slice of stages below it (the neighbour
//! is the last element) and calls [`deliver`]. Continuations that became ready
//! below the caller during the call run before `deliver` returns, so the
//! caller only ever registers on a future whose producer has settled.

use crate::pipeline::context::SimContext;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::{StageId, TokenId};
use crate::pipeline::operators::{Count, FileSystem, MapOp, SerialReadahead, UserApp};

/// Entry points of a pipeline stage.
pub trait Stage {
    /// Short kind name, used in logs and exported stage info.
    fn name(&self) -> &str;

    /// Box label lines for drawing the stage.
    fn labels(&self) -> Vec<String>;

    /// Accept a request that just arrived from upstream and return the future
    /// that will carry the answer. `downstream` holds every stage below this
    /// one, nearest last.
    fn receive_request(
        &mut self,
        ctx: &mut SimContext,
        stage: StageId,
        req: TokenId,
        downstream: &mut [Operator],
    ) -> PipelineResult<TokenId>;

    /// A downstream future this stage registered on has been filled.
    fn on_fill(
        &mut self,
        _ctx: &mut SimContext,
        stage: StageId,
        source: TokenId,
        _downstream: &mut [Operator],
    ) -> PipelineResult<()> {
        Err(PipelineError::invariant(
            stage,
            format!("{} does not wait on downstream futures (got {source})", self.name()),
        ))
    }

    /// A task this stage scheduled for `work` is due.
    fn on_deadline(
        &mut self,
        _ctx: &mut SimContext,
        stage: StageId,
        work: TokenId,
    ) -> PipelineResult<()> {
        Err(PipelineError::invariant(
            stage,
            format!("{} does not schedule tasks (got {work})", self.name()),
        ))
    }
}

/// Hand `req` to the nearest stage in `downstream` and return its future.
pub fn deliver(
    ctx: &mut SimContext,
    downstream: &mut [Operator],
    req: TokenId,
) -> PipelineResult<TokenId> {
    let stage = StageId(downstream.len().saturating_sub(1) as u32);
    let (neighbour, below) = downstream.split_last_mut().ok_or_else(|| {
        PipelineError::invariant(StageId(0), format!("{req} sent past the first stage"))
    })?;
    let token = ctx.token(req)?;
    if token.position != stage {
        return Err(PipelineError::invariant(
            stage,
            format!("{req} delivered while at {:?}", token.position),
        ));
    }
    tracing::trace!(?stage, %req, kind = neighbour.name(), "deliver");
    let fut = neighbour.receive_request(ctx, stage, req, below)?;
    run_ready(ctx, downstream)?;
    Ok(fut)
}

/// Run every ready continuation owned by one of `stages`, oldest first.
pub fn run_ready(ctx: &mut SimContext, stages: &mut [Operator]) -> PipelineResult<()> {
    let limit = StageId(stages.len() as u32);
    while let Some(cont) = ctx.take_continuation_below(limit) {
        let (below, rest) = stages.split_at_mut(cont.stage.index());
        let op = rest.first_mut().ok_or_else(|| {
            PipelineError::invariant(cont.stage, "continuation for unknown stage")
        })?;
        op.on_fill(ctx, cont.stage, cont.source, below)?;
    }
    Ok(())
}

/// Built-in operators.
#[derive(Debug, Clone)]
pub enum Operator {
    Count(Count),
    FileSystem(FileSystem),
    UserApp(UserApp),
    Map(MapOp),
    SerialReadahead(SerialReadahead),
}

impl Operator {
    pub fn name(&self) -> &str {
        match self {
            Operator::Count(op) => op.name(),
            Operator::FileSystem(op) => op.name(),
            Operator::UserApp(op) => op.name(),
            Operator::Map(op) => op.name(),
            Operator::SerialReadahead(op) => op.name(),
        }
    }

    pub fn labels(&self) -> Vec<String> {
        match self {
            Operator::Count(op) => op.labels(),
            Operator::FileSystem(op) => op.labels(),
            Operator::UserApp(op) => op.labels(),
            Operator::Map(op) => op.labels(),
            Operator::SerialReadahead(op) => op.labels(),
        }
    }

    pub fn receive_request(
        &mut self,
        ctx: &mut SimContext,
        stage: StageId,
        req: TokenId,
        downstream: &mut [Operator],
    ) -> PipelineResult<TokenId> {
        match self {
            Operator::Count(op) => op.receive_request(ctx, stage, req, downstream),
            Operator::FileSystem(op) => op.receive_request(ctx, stage, req, downstream),
            Operator::UserApp(op) => op.receive_request(ctx, stage, req, downstream),
            Operator::Map(op) => op.receive_request(ctx, stage, req, downstream),
            Operator::SerialReadahead(op) => op.receive_request(ctx, stage, req, downstream),
        }
    }

    pub fn on_fill(
        &mut self,
        ctx: &mut SimContext,
        stage: StageId,
        source: TokenId,
        downstream: &mut [Operator],
    ) -> PipelineResult<()> {
        match self {
            Operator::Count(op) => op.on_fill(ctx, stage, source, downstream),
            Operator::FileSystem(op) => op.on_fill(ctx, stage, source, downstream),
            Operator::UserApp(op) => op.on_fill(ctx, stage, source, downstream),
            Operator::Map(op) => op.on_fill(ctx, stage, source, downstream),
            Operator::SerialReadahead(op) => op.on_fill(ctx, stage, source, downstream),
        }
    }

    pub fn on_deadline(
        &mut self,
        ctx: &mut SimContext,
        stage: StageId,
        work: TokenId,
    ) -> PipelineResult<()> {
        match self {
            Operator::Count(op) => op.on_deadline(ctx, stage, work),
            Operator::FileSystem(op) => op.on_deadline(ctx, stage, work),
            Operator::UserApp(op) => op.on_deadline(ctx, stage, work),
            Operator::Map(op) => op.on_deadline(ctx, stage, work),
            Operator::SerialReadahead(op) => op.on_deadline(ctx, stage, work),
        }
    }

    /// Whether this operator can sit at stage 0.
    pub fn is_leaf(&self) -> bool {
        matches!(self, Operator::Count(_) | Operator::FileSystem(_))
    }

    /// Whether this operator forwards requests to a downstream neighbour.
    pub fn is_intermediate(&self) -> bool {
        matches!(self, Operator::Map(_) | Operator::SerialReadahead(_))
    }

    pub fn as_user_app(&self) -> Option<&UserApp> {
        match self {
            Operator::UserApp(op) => Some(op),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MapOp> {
        match self {
            Operator::Map(op) => Some(op),
            _ => None,
        }
    }

    pub fn as_readahead(&self) -> Option<&SerialReadahead> {
        match self {
            Operator::SerialReadahead(op) => Some(op),
            _ => None,
        }
    }

    pub fn as_file_system(&self) -> Option<&FileSystem> {
        match self {
            Operator::FileSystem(op) => Some(op),
            _ => None,
        }
    }
}

impl From<Count> for Operator {
    fn from(op: Count) -> Self {
        Operator::Count(op)
    }
}

impl From<FileSystem> for Operator {
    fn from(op: FileSystem) -> Self {
        Operator::FileSystem(op)
    }
}

impl From<UserApp> for Operator {
    fn from(op: UserApp) -> Self {
        Operator::UserApp(op)
    }
}

impl From<MapOp> for Operator {
    fn from(op: MapOp) -> Self {
        Operator::Map(op)
    }
}

impl From<SerialReadahead> for Operator {
    fn from(op: SerialReadahead) -> Self {
        Operator::SerialReadahead(op)
    }
}
