//! Simulation configuration: TOML-serializable settings for the
//! numeric knobs (`qss_core::SimConfig`), default tolerances, and run
//! window, mirroring the teacher's `KernelConfig`/`ConfigBuilder`
//! pattern (`examples/LashSesh-qops/kernel/src/config.rs`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use qss_core::SimConfig;

use crate::error::{EngineError, Result};
use crate::model::ToleranceOverrides;

/// Top-level simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default)]
    pub numeric: NumericParameters,

    #[serde(default)]
    pub run: RunParameters,

    #[serde(default)]
    pub default_tolerances: ToleranceOverrides,

    #[serde(default)]
    pub output: OutputParameters,

    #[serde(default)]
    pub verbose: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            numeric: NumericParameters::default(),
            run: RunParameters::default(),
            default_tolerances: ToleranceOverrides::default(),
            output: OutputParameters::default(),
            verbose: false,
        }
    }
}

impl SimulationConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SimulationConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| EngineError::model(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.numeric.validate()?;
        self.run.validate()?;
        Ok(())
    }

    /// Translate into the numeric-only config the core actually consumes.
    pub fn to_sim_config(&self) -> SimConfig {
        SimConfig {
            dt_min: self.numeric.dt_min,
            dt_max: self.numeric.dt_max,
            dt_infinity: self.numeric.dt_infinity,
            dt_nd: self.numeric.dt_nd,
            max_pass_count_multiplier: self.numeric.max_pass_count_multiplier,
            dt_z_max: self.numeric.dt_z_max,
        }
    }
}

/// `qss_core::SimConfig` knobs, TOML-serializable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumericParameters {
    #[serde(default = "default_dt_min")]
    pub dt_min: f64,
    #[serde(default = "default_dt_max")]
    pub dt_max: f64,
    #[serde(default = "default_dt_infinity")]
    pub dt_infinity: f64,
    #[serde(default = "default_dt_nd")]
    pub dt_nd: f64,
    #[serde(default = "default_max_pass_count_multiplier")]
    pub max_pass_count_multiplier: usize,
    #[serde(default)]
    pub dt_z_max: Option<f64>,
}

fn default_dt_min() -> f64 {
    1.0e-10
}
fn default_dt_max() -> f64 {
    1.0e10
}
fn default_dt_infinity() -> f64 {
    1.0e10
}
fn default_dt_nd() -> f64 {
    1.0e-6
}
fn default_max_pass_count_multiplier() -> usize {
    100
}

impl Default for NumericParameters {
    fn default() -> Self {
        Self {
            dt_min: default_dt_min(),
            dt_max: default_dt_max(),
            dt_infinity: default_dt_infinity(),
            dt_nd: default_dt_nd(),
            max_pass_count_multiplier: default_max_pass_count_multiplier(),
            dt_z_max: None,
        }
    }
}

impl NumericParameters {
    fn validate(&self) -> Result<()> {
        if self.dt_min <= 0.0 || self.dt_max <= 0.0 {
            return Err(EngineError::model("dt_min and dt_max must be positive".to_string()));
        }
        if self.dt_min > self.dt_max {
            return Err(EngineError::model(format!("dt_min ({}) must be <= dt_max ({})", self.dt_min, self.dt_max)));
        }
        if self.max_pass_count_multiplier == 0 {
            return Err(EngineError::model("max_pass_count_multiplier must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Start/end time and event budget for one run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RunParameters {
    #[serde(default)]
    pub t_start: f64,
    #[serde(default = "default_t_end")]
    pub t_end: f64,
    #[serde(default)]
    pub max_events: Option<u64>,
}

fn default_t_end() -> f64 {
    10.0
}

impl Default for RunParameters {
    fn default() -> Self {
        Self { t_start: 0.0, t_end: default_t_end(), max_events: None }
    }
}

impl RunParameters {
    fn validate(&self) -> Result<()> {
        if self.t_end <= self.t_start {
            return Err(EngineError::model(format!("t_end ({}) must be greater than t_start ({})", self.t_end, self.t_start)));
        }
        Ok(())
    }
}

/// Where and how to write sampled output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputParameters {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

fn default_buffer_capacity() -> usize {
    crate::output::BufferedSampleStream::<crate::output::CsvOutputSink<std::io::Sink>>::DEFAULT_CAPACITY
}

impl Default for OutputParameters {
    fn default() -> Self {
        Self { path: None, buffer_capacity: default_buffer_capacity() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_t_end_before_t_start() {
        let mut config = SimulationConfig::default();
        config.run.t_end = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_dt_bounds() {
        let mut config = SimulationConfig::default();
        config.numeric.dt_min = 10.0;
        config.numeric.dt_max = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_toml_text() {
        let config = SimulationConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: SimulationConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.run.t_end, config.run.t_end);
    }
}
