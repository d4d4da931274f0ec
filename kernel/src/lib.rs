//! # qss-engine
//!
//! The model/IO layer around `qss-core`'s solver: model metadata import,
//! simulation configuration, output sinks, and persisted-state snapshots
//! (spec.md §6, SPEC_FULL.md §6). `qss-core` never touches a filesystem
//! or a serde format; this crate is where that ambient stack lives.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                         qss-cli                          │
//! │        (clap commands, tracing-subscriber wiring)         │
//! ├──────────────────────────────────────────────────────────┤
//! │                        qss-engine                         │
//! │  model  | config  | output | state | testutil (this crate)│
//! ├──────────────────────────────────────────────────────────┤
//! │                         qss-core                          │
//! │   Simulator<O: Oracle> over Variable/EventQueue/Oracle    │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod model;
pub mod output;
pub mod state;
pub mod testutil;

pub use config::{NumericParameters, OutputParameters, RunParameters, SimulationConfig};
pub use error::{EngineError, Result};
pub use model::{DependencyEdge, EventIndicatorDescriptor, ModelMetadata, ToleranceOverrides, VariableDescriptor};
pub use output::{BufferedSampleStream, CsvOutputSink, OutputSink, Sample, SampleKind};
pub use state::PersistedState;

/// Crate version, re-exported for `qss-cli --version` banners.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
