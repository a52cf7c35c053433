//! Runtime throughput instrumentation for particle-based fluid simulations.
//!
//! At a configurable stride the enclosing simulator hands the engine one
//! snapshot per sampled step; the engine counts particle-pair interactions
//! (candidate-checked vs within-kernel-support, split by fluid/boundary
//! probe), derives PIPS throughput metrics on demand, and appends records
//! incrementally to a CSV log for post-run analysis.

pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod neighbor;
pub mod sample;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{ExecutionMode, PipsConfig};
pub use diagnostics::{DiagnosticSink, LogDiagnostics, NullDiagnostics};
pub use engine::{PipsEngine, StepSnapshot, LOG_FILE_NAME};
pub use neighbor::{
    assign_codes, cell_code, pair_metric, CellGrid, GridDims, NeighborQuery, PairMetric,
    QueryState, ALMOST_ZERO,
};
pub use sample::{Sample, SampleStore};
pub use vecmath::DVec3;
