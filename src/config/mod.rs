//! Configuration module for FlowVis-RS
//!
//! A simulation is described by the tick length, the horizon after which the
//! consumer stops issuing requests, and the list of stages from the innermost
//! producer up to the consumer.
//!
//! Files are TOML or JSON, picked by extension:
//!
//! ```toml
//! ms_per_tick = 1000
//! max_time_ms = 100000
//!
//! [[stages]]
//! kind = "file_system"
//! latency_ticks = 3
//!
//! [[stages]]
//! kind = "serial_readahead"
//! window = 1
//!
//! [[stages]]
//! kind = "map"
//! name = "decompress"
//! ticks_of_work = 4
//!
//! [[stages]]
//! kind = "user_app"
//! ```

use crate::error::{FlowVisError, Result, ResultExt};
use crate::pipeline::clock::DEFAULT_MS_PER_TICK;
use crate::pipeline::executor::{Pipeline, PipelineBuilder, Simulation, DEFAULT_MAX_STEPS};
use crate::pipeline::operator::Operator;
use crate::pipeline::operators::{Count, FileSystem, MapOp, SerialReadahead, UserApp};
use crate::pipeline::PipelineResult;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default horizon: one hundred ticks of the default length.
pub const DEFAULT_MAX_TIME_MS: u64 = 100 * DEFAULT_MS_PER_TICK;

/// On-disk format of a configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// `.json` files are JSON, everything else is TOML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}

/// One stage of the pipeline, innermost first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageSpec {
    Count,
    FileSystem {
        #[serde(default = "default_latency_ticks")]
        latency_ticks: u64,
        /// Per-request latencies, cycled.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        latency_pattern: Vec<u64>,
    },
    Map {
        #[serde(default = "default_map_name")]
        name: String,
        #[serde(default = "default_ticks_of_work")]
        ticks_of_work: u64,
    },
    SerialReadahead {
        #[serde(default = "default_window")]
        window: usize,
    },
    UserApp,
}

fn default_latency_ticks() -> u64 {
    3
}

fn default_map_name() -> String {
    "f".to_string()
}

fn default_ticks_of_work() -> u64 {
    4
}

fn default_window() -> usize {
    1
}

impl StageSpec {
    pub fn to_operator(&self) -> Operator {
        match self {
            StageSpec::Count => Count::new().into(),
            StageSpec::FileSystem {
                latency_ticks,
                latency_pattern,
            } => FileSystem::new(*latency_ticks)
                .with_latency_pattern(latency_pattern.clone())
                .into(),
            StageSpec::Map {
                name,
                ticks_of_work,
            } => MapOp::new(name.clone(), *ticks_of_work).into(),
            StageSpec::SerialReadahead { window } => SerialReadahead::new(*window).into(),
            StageSpec::UserApp => UserApp::new().into(),
        }
    }
}

/// Simulation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Length of one tick in milliseconds
    pub ms_per_tick: u64,
    /// Horizon: no new demand is created once simulated time reaches it
    pub max_time_ms: u64,
    /// Upper bound on dispatched events before a run is declared stuck
    pub max_steps: u64,
    pub stages: Vec<StageSpec>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            ms_per_tick: DEFAULT_MS_PER_TICK,
            max_time_ms: DEFAULT_MAX_TIME_MS,
            max_steps: DEFAULT_MAX_STEPS,
            stages: vec![
                StageSpec::FileSystem {
                    latency_ticks: 3,
                    latency_pattern: Vec::new(),
                },
                StageSpec::SerialReadahead { window: 1 },
                StageSpec::Map {
                    name: "decompress".to_string(),
                    ticks_of_work: 4,
                },
                StageSpec::UserApp,
            ],
        }
    }
}

impl SimConfig {
    /// Assemble the pipeline described by `stages`, wiring each stage to the
    /// one before it.
    pub fn build_pipeline(&self) -> PipelineResult<Pipeline> {
        let mut builder = PipelineBuilder::new();
        for spec in &self.stages {
            let id = builder.add_stage(spec.to_operator());
            if let Some(below) = id.downstream() {
                builder.wire(id, below)?;
            }
        }
        builder.build()
    }

    /// Check the settings without running anything.
    pub fn validate(&self) -> Result<()> {
        if self.ms_per_tick == 0 {
            return Err(FlowVisError::Config("ms_per_tick must be positive".to_string()));
        }
        if self.max_steps == 0 {
            return Err(FlowVisError::Config("max_steps must be positive".to_string()));
        }
        self.build_pipeline()?;
        Ok(())
    }

    pub fn build_simulation(&self) -> Result<Simulation> {
        self.validate()?;
        let pipeline = self.build_pipeline()?;
        Ok(Simulation::new(pipeline, self.ms_per_tick, self.max_time_ms)
            .with_max_steps(self.max_steps))
    }

    pub fn parse(text: &str, format: ConfigFormat) -> Result<Self> {
        match format {
            ConfigFormat::Toml => toml::from_str(text)
                .map_err(|e| FlowVisError::Config(format!("Failed to parse TOML config: {}", e))),
            ConfigFormat::Json => serde_json::from_str(text)
                .map_err(|e| FlowVisError::Config(format!("Failed to parse JSON config: {}", e))),
        }
    }

    pub fn render(&self, format: ConfigFormat) -> Result<String> {
        match format {
            ConfigFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| FlowVisError::Serialization(format!("Failed to serialize config: {}", e))),
            ConfigFormat::Json => Ok(serde_json::to_string_pretty(self)?),
        }
    }

    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config = Self::parse(&text, ConfigFormat::from_path(path))?;
        if let Err(e) = config.validate() {
            tracing::warn!("Rejected config {:?}: {}", path, e);
            return Err(e.with_context(format!("Invalid config file {:?}", path)));
        }
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Save the configuration, format picked by extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }
        let text = self.render(ConfigFormat::from_path(path))?;
        std::fs::write(path, text).with_context(|| format!("Failed to write config file {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SimConfig::default();
        config.validate().unwrap();
        let pipeline = config.build_pipeline().unwrap();
        let kinds: Vec<_> = pipeline.stages().iter().map(|op| op.name().to_string()).collect();
        assert_eq!(kinds, vec!["FileSystem", "SerialReadahead", "Map", "UserApp"]);
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.json")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("a.JSON")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("a.toml")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("a")), ConfigFormat::Toml);
    }

    #[test]
    fn test_toml_defaults_fill_missing_fields() {
        let text = r#"
            ms_per_tick = 500

            [[stages]]
            kind = "count"

            [[stages]]
            kind = "map"

            [[stages]]
            kind = "user_app"
        "#;
        let config = SimConfig::parse(text, ConfigFormat::Toml).unwrap();
        assert_eq!(config.ms_per_tick, 500);
        assert_eq!(config.max_time_ms, DEFAULT_MAX_TIME_MS);
        assert_eq!(
            config.stages[1],
            StageSpec::Map {
                name: "f".to_string(),
                ticks_of_work: 4
            }
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = SimConfig::default();
        let text = config.render(ConfigFormat::Toml).unwrap();
        assert!(text.contains("kind = \"serial_readahead\""));
        let back = SimConfig::parse(&text, ConfigFormat::Toml).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_zero_tick_rejected() {
        let config = SimConfig {
            ms_per_tick: 0,
            ..SimConfig::default()
        };
        assert!(matches!(config.validate(), Err(FlowVisError::Config(_))));
    }

    #[test]
    fn test_misplaced_stage_rejected() {
        let config = SimConfig {
            stages: vec![StageSpec::UserApp, StageSpec::Count],
            ..SimConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.pipeline_error().is_some());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let text = r#"{"stages": [{"kind": "cache"}]}"#;
        assert!(SimConfig::parse(text, ConfigFormat::Json).is_err());
    }
}
