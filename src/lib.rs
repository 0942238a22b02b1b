//! # FlowVis-RS: pull-based pipeline simulator
//!
//! A deterministic discrete-event simulator for pull-based asynchronous
//! pipelines. A consumer pulls values through a chain of operators; every
//! request, future and in-flight work item is a token whose movements are
//! recorded as keyframes for an animated renderer.
//!
//! ## Architecture
//!
//! - **Pipeline**: operators, token arena, virtual clock and scheduler
//! - **Timeline**: keyframe tracks and the serializable run output
//! - **Config**: TOML/JSON description of a pipeline and its timing
//!
//! ## Example
//!
//! ```
//! use flowvis_rs::pipeline::{FileSystem, PipelineBuilder, Simulation, UserApp};
//!
//! let pipeline = PipelineBuilder::chain([
//!     FileSystem::new(3).into(),
//!     UserApp::new().into(),
//! ])
//! .unwrap();
//! let mut sim = Simulation::new(pipeline, 1000, 5000);
//! let summary = sim.run().unwrap();
//! assert_eq!(summary.round_trips, 1);
//! let timeline = sim.into_timeline();
//! assert!(!timeline.is_empty());
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod timeline;

// Re-export commonly used types
pub use config::{ConfigFormat, SimConfig, StageSpec};
pub use error::{FlowVisError, Result, ResultExt};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineError, Simulation};
pub use timeline::{RunSummary, Timeline};
