//! Test data builders for creating simulations

use flowvis_rs::pipeline::{
    Count, FileSystem, MapOp, Operator, PipelineBuilder, SerialReadahead, Simulation, UserApp,
};

/// Builder for test simulations. Stages are listed innermost first; the
/// consumer is appended by `build`.
pub struct SimBuilder {
    stages: Vec<Operator>,
    tick_ms: u64,
    horizon_ticks: u64,
}

impl SimBuilder {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            tick_ms: 1000,
            horizon_ticks: 100,
        }
    }

    pub fn count(mut self) -> Self {
        self.stages.push(Count::new().into());
        self
    }

    pub fn file_system(mut self, latency_ticks: u64) -> Self {
        self.stages.push(FileSystem::new(latency_ticks).into());
        self
    }

    pub fn file_system_pattern(mut self, pattern: Vec<u64>) -> Self {
        self.stages
            .push(FileSystem::new(1).with_latency_pattern(pattern).into());
        self
    }

    pub fn map(mut self, name: &str, ticks_of_work: u64) -> Self {
        self.stages.push(MapOp::new(name, ticks_of_work).into());
        self
    }

    pub fn readahead(mut self, window: usize) -> Self {
        self.stages.push(SerialReadahead::new(window).into());
        self
    }

    pub fn tick_ms(mut self, tick_ms: u64) -> Self {
        self.tick_ms = tick_ms;
        self
    }

    pub fn horizon_ticks(mut self, ticks: u64) -> Self {
        self.horizon_ticks = ticks;
        self
    }

    pub fn build(self) -> Simulation {
        let mut stages = self.stages;
        stages.push(UserApp::new().into());
        let pipeline = PipelineBuilder::chain(stages).expect("test pipeline is valid");
        Simulation::new(pipeline, self.tick_ms, self.horizon_ticks * self.tick_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_builder() {
        let sim = SimBuilder::new().file_system(3).map("f", 1).build();
        assert_eq!(sim.pipeline().len(), 3);
        assert_eq!(sim.context().horizon(), 100_000);
    }
}
