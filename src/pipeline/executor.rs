//! Pipeline assembly and the simulation loop.
//!
//! `PipelineBuilder` collects stages and the links between neighbours and
//! validates the shape once. `Simulation` owns the built pipeline plus the
//! shared `SimContext` and drives it: start the consumer, then alternately
//! run every ready continuation and pop the next deferred task, until both
//! are empty.

use crate::pipeline::context::SimContext;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::{StageId, TokenId};
use crate::pipeline::operator::{deliver, Operator};
use crate::pipeline::token::Continuation;
use crate::timeline::types::{RunSummary, StageInfo, Timeline};

/// Default upper bound on dispatched events per run.
pub const DEFAULT_MAX_STEPS: u64 = 1_000_000;

/// A validated chain of stages. Stage 0 is the innermost producer, the last
/// stage is the consumer.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Operator>,
}

impl Pipeline {
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage(&self, id: StageId) -> Option<&Operator> {
        self.stages.get(id.index())
    }

    pub fn stages(&self) -> &[Operator] {
        &self.stages
    }

    /// The consumer stage.
    pub fn top(&self) -> StageId {
        StageId(self.stages.len().saturating_sub(1) as u32)
    }

    pub fn stage_infos(&self) -> Vec<StageInfo> {
        self.stages
            .iter()
            .enumerate()
            .map(|(idx, op)| StageInfo {
                index: StageId(idx as u32),
                kind: op.name().to_string(),
                labels: op.labels(),
            })
            .collect()
    }
}

/// Builder for a pipeline.
///
/// ```text
/// stage 0 (Count | FileSystem) ◄── stage 1 .. n-2 (Map | SerialReadahead) ◄── stage n-1 (UserApp)
/// ```
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    stages: Vec<Operator>,
    /// `links[i]` is set once stage `i + 1` is wired to stage `i`.
    links: Vec<bool>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage above the current top. Returns its StageId.
    pub fn add_stage(&mut self, op: impl Into<Operator>) -> StageId {
        let id = StageId(self.stages.len() as u32);
        self.stages.push(op.into());
        if id.index() > 0 {
            self.links.push(false);
        }
        id
    }

    /// Link `upstream` to its downstream neighbour.
    pub fn wire(&mut self, upstream: StageId, downstream: StageId) -> PipelineResult<()> {
        for id in [upstream, downstream] {
            if id.index() >= self.stages.len() {
                return Err(PipelineError::config(format!("unknown stage {id:?}")));
            }
        }
        if upstream.index() != downstream.index() + 1 {
            return Err(PipelineError::config(format!(
                "{upstream:?} can only be wired to its direct downstream neighbour, not {downstream:?}"
            )));
        }
        let link = &mut self.links[downstream.index()];
        if *link {
            return Err(PipelineError::config(format!(
                "{upstream:?} is already wired to {downstream:?}"
            )));
        }
        *link = true;
        tracing::debug!(?upstream, ?downstream, "wired");
        Ok(())
    }

    /// Add every stage in order and wire each to the one before it.
    pub fn chain(ops: impl IntoIterator<Item = Operator>) -> PipelineResult<Pipeline> {
        let mut builder = Self::new();
        for op in ops {
            let id = builder.add_stage(op);
            if let Some(below) = id.downstream() {
                builder.wire(id, below)?;
            }
        }
        builder.build()
    }

    pub fn build(self) -> PipelineResult<Pipeline> {
        let n = self.stages.len();
        if n < 2 {
            return Err(PipelineError::config(format!(
                "a pipeline needs a producer and a consumer, got {n} stage(s)"
            )));
        }
        if let Some(missing) = self.links.iter().position(|wired| !wired) {
            return Err(PipelineError::config(format!(
                "{:?} is not wired to {:?}",
                StageId(missing as u32 + 1),
                StageId(missing as u32)
            )));
        }
        for (idx, op) in self.stages.iter().enumerate() {
            let stage = StageId(idx as u32);
            let fits = if idx == 0 {
                op.is_leaf()
            } else if idx == n - 1 {
                matches!(op, Operator::UserApp(_))
            } else {
                op.is_intermediate()
            };
            if !fits {
                return Err(PipelineError::config(format!(
                    "{} cannot sit at {stage:?} of a {n}-stage pipeline",
                    op.name()
                )));
            }
            validate_operator(stage, op)?;
        }
        Ok(Pipeline {
            stages: self.stages,
        })
    }
}

fn validate_operator(stage: StageId, op: &Operator) -> PipelineResult<()> {
    match op {
        Operator::FileSystem(fs) => {
            if fs.latency_ticks() == 0 && fs.latency_pattern().is_empty() {
                return Err(PipelineError::config(format!(
                    "FileSystem at {stage:?} has zero latency"
                )));
            }
            if fs.latency_pattern().contains(&0) {
                return Err(PipelineError::config(format!(
                    "FileSystem at {stage:?} has a zero entry in its latency pattern"
                )));
            }
        }
        Operator::Map(map) if map.ticks_of_work() == 0 => {
            return Err(PipelineError::config(format!(
                "Map({}) at {stage:?} has zero ticks of work",
                map.fn_name()
            )));
        }
        Operator::SerialReadahead(ra) if ra.window() == 0 => {
            return Err(PipelineError::config(format!(
                "SerialReadahead at {stage:?} has a zero window"
            )));
        }
        _ => {}
    }
    Ok(())
}

/// What a single `Simulation::step` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The consumer was started; `issued` is false past the horizon.
    Started { issued: bool },
    /// A continuation ran.
    Filled(Continuation),
    /// A deferred task came due.
    Deadline { stage: StageId, work: TokenId, run_at: u64 },
    /// Nothing left to do.
    Idle,
}

pub struct Simulation {
    pipeline: Pipeline,
    ctx: SimContext,
    started: bool,
    steps: u64,
    max_steps: u64,
}

impl Simulation {
    pub fn new(pipeline: Pipeline, tick_ms: u64, horizon_ms: u64) -> Self {
        let ctx = SimContext::new(pipeline.len(), tick_ms, horizon_ms);
        Self {
            pipeline,
            ctx,
            started: false,
            steps: 0,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn context(&self) -> &SimContext {
        &self.ctx
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn operator(&self, id: StageId) -> Option<&Operator> {
        self.pipeline.stage(id)
    }

    pub fn now(&self) -> u64 {
        self.ctx.now()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Send one request into `stage` from its upstream neighbour, outside of
    /// the consumer's loop. Nobody waits on the returned future.
    pub fn inject_request(&mut self, stage: StageId) -> PipelineResult<TokenId> {
        let top = self.pipeline.top();
        if stage.index() >= top.index() {
            return Err(PipelineError::config(format!(
                "requests can only be injected below the consumer ({top:?}), got {stage:?}"
            )));
        }
        let req = self.ctx.create_request(stage.upstream())?;
        self.ctx.tick();
        self.ctx.send_request(req)?;
        self.ctx.tick();
        let fut = deliver(
            &mut self.ctx,
            &mut self.pipeline.stages[..=stage.index()],
            req,
        )?;
        tracing::debug!(?stage, %req, %fut, "request injected");
        Ok(fut)
    }

    /// Dispatch one event.
    pub fn step(&mut self) -> PipelineResult<StepOutcome> {
        self.steps += 1;
        if self.steps > self.max_steps {
            tracing::warn!(max_steps = self.max_steps, now = self.ctx.now(), "step budget exhausted");
            return Err(PipelineError::invariant(
                StageId::INVALID,
                format!("simulation did not settle within {} steps", self.max_steps),
            ));
        }

        if !self.started {
            self.started = true;
            let top = self.pipeline.top();
            let (below, rest) = self.pipeline.stages.split_at_mut(top.index());
            let issued = match rest.first_mut() {
                Some(Operator::UserApp(app)) => app.start(&mut self.ctx, top, below)?,
                _ => {
                    return Err(PipelineError::invariant(top, "top stage is not a consumer"));
                }
            };
            return Ok(StepOutcome::Started { issued });
        }

        if let Some(cont) = self.ctx.pop_continuation() {
            let (below, rest) = self.pipeline.stages.split_at_mut(cont.stage.index());
            let op = rest.first_mut().ok_or_else(|| {
                PipelineError::invariant(cont.stage, "continuation for unknown stage")
            })?;
            op.on_fill(&mut self.ctx, cont.stage, cont.source, below)?;
            return Ok(StepOutcome::Filled(cont));
        }

        if let Some(task) = self.ctx.pop_task() {
            let op = self
                .pipeline
                .stages
                .get_mut(task.stage.index())
                .ok_or_else(|| PipelineError::invariant(task.stage, "task for unknown stage"))?;
            op.on_deadline(&mut self.ctx, task.stage, task.work)?;
            return Ok(StepOutcome::Deadline {
                stage: task.stage,
                work: task.work,
                run_at: task.run_at,
            });
        }

        Ok(StepOutcome::Idle)
    }

    /// Run until nothing is left to do.
    pub fn run(&mut self) -> PipelineResult<RunSummary> {
        tracing::info!(
            stages = self.pipeline.len(),
            tick_ms = self.ctx.tick_ms(),
            horizon = self.ctx.horizon(),
            "simulation started"
        );
        while self.step()? != StepOutcome::Idle {}
        let summary = self.summary();
        tracing::info!(
            total_duration = summary.total_duration,
            round_trips = summary.round_trips,
            tokens = summary.tokens,
            "simulation finished"
        );
        Ok(summary)
    }

    pub fn summary(&self) -> RunSummary {
        let consumer = self
            .pipeline
            .stage(self.pipeline.top())
            .and_then(Operator::as_user_app);
        RunSummary {
            total_duration: self.ctx.now() + self.ctx.tick_ms(),
            tick_ms: self.ctx.tick_ms(),
            requests_issued: consumer.map(|app| app.issued()).unwrap_or(0),
            round_trips: consumer.map(|app| app.completed()).unwrap_or(0),
            pending_tasks: self.ctx.pending_tasks(),
            tokens: self.ctx.tokens().len(),
            max_continuation_lag: self.ctx.max_continuation_lag(),
        }
    }

    /// Snapshot of the keyframe stream recorded so far.
    pub fn timeline(&self) -> Timeline {
        Timeline {
            tick_ms: self.ctx.tick_ms(),
            total_duration: self.ctx.now() + self.ctx.tick_ms(),
            stages: self.pipeline.stage_infos(),
            tracks: self.ctx.recorder().tracks().cloned().collect(),
        }
    }

    pub fn into_timeline(self) -> Timeline {
        let stages = self.pipeline.stage_infos();
        let tick_ms = self.ctx.tick_ms();
        let total_duration = self.ctx.now() + tick_ms;
        Timeline {
            tick_ms,
            total_duration,
            stages,
            tracks: self.ctx.into_tracks(),
        }
    }
}
