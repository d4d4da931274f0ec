//! `qss-core`: the Quantized State System numerical kernel.
//!
//! This crate owns the variable arena, the superdense-time event queue,
//! the requantization algorithms (explicit QSS and LIQSS), the
//! zero-crossing engine, the simultaneous-trigger-group protocol, the
//! bin-size performance optimizer, and the top-level `Simulator` driver.
//! It knows nothing about how a model's derivatives are actually
//! computed -- that lives behind the [`oracle::Oracle`] trait, which
//! `qss-engine` implements.
//!
//! ```text
//! qss-cli
//!    |
//! qss-engine  (model metadata, oracle impl, output sinks, persisted state)
//!    |
//! qss-core    (this crate: variable, queue, requant, liqss, zerocrossing,
//!              triggers, bin_optimizer, dependency, simulator)
//! ```

pub mod bin_optimizer;
pub mod dependency;
pub mod error;
pub mod liqss;
pub mod math;
pub mod oracle;
pub mod queue;
pub mod requant;
pub mod simulator;
pub mod superdense;
pub mod triggers;
pub mod variable;
pub mod zerocrossing;

pub use error::{OracleStatus, QssError, Result};
pub use oracle::{Oracle, Scope, VarRef};
pub use queue::{EventHandle, EventQueue, QueueItem};
pub use requant::SimConfig;
pub use simulator::{SimulationReport, Simulator};
pub use superdense::{EventKind, SuperdenseTime};
pub use variable::{ClusterId, CrossingType, DerivativeSource, StateAlgorithm, Variable, VariableId, VariableKind, ZeroCrossingState, MAX_ORDER};
