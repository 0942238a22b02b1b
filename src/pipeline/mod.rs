//! Pull-based pipeline simulation.
//!
//! Stages are chained from an innermost producer (stage 0) up to the
//! consumer. Requests travel downstream one stage per tick, futures travel
//! back upstream, and work items stay inside the stage that owns them.
//!
//! # Architecture
//!
//! ```text
//! [FileSystem] ◄── [SerialReadahead] ◄── [Map] ◄── [UserApp]
//!      │                  │               │
//!      └── future ──────► └── future ───► └── future ──► consumed
//! ```
//!
//! # Design
//!
//! - **Enum dispatch**: `Operator` enum over the built-in stages.
//! - **Token arena**: every request, future and work item lives in one
//!   `TokenArena` and is addressed by `TokenId`.
//! - **Continuation agenda**: fills never call back into another stage
//!   directly; the ready continuation is queued and dispatched by the
//!   simulation loop, so the call stack stays bounded by the stage count.
//! - **Virtual time**: a `SimClock` that only moves forward and a
//!   min-heap `Scheduler` for deferred completions.

pub mod clock;
pub mod context;
pub mod error;
pub mod executor;
pub mod id;
pub mod operator;
pub mod operators;
pub mod scheduler;
pub mod token;

pub use clock::{SimClock, DEFAULT_MS_PER_TICK};
pub use context::SimContext;
pub use error::{PipelineError, PipelineResult};
pub use executor::{Pipeline, PipelineBuilder, Simulation, StepOutcome, DEFAULT_MAX_STEPS};
pub use id::{StageId, TokenId};
pub use operator::{deliver, Operator, Stage};
pub use operators::{Count, FileSystem, MapOp, SerialReadahead, UserApp};
pub use scheduler::{ScheduledTask, Scheduler};
pub use token::{Continuation, Direction, Token, TokenArena, TokenKind, WorkItem, WorkProgress};
