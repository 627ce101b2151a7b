//! Escape analysis / points-to engine for the kestrel backend.
//!
//! Decides, per allocation site, whether an object can live on the stack,
//! in a function-local heap region, or must be globally (GC) allocated.
//! The engine consumes the finished call graph and per-function dataflow
//! graphs from `kestrel-ir` and produces one [`Lifetime`] per allocation
//! plus a compact [`FunctionSummary`] per function.
//!
//! The pipeline, per function (driven interprocedurally in reverse
//! topological order of the call-graph condensation):
//!
//! ```text
//! dataflow graph ──> points-to graph ──> drains ──> closure ──> lifetimes
//!     (kestrel-ir)       (graph)        (compress)  (compress)      │
//!                                                        └──> summary ──> callers
//! ```
//!
//! Followed by a whole-program stack-budgeting pass (`budget`). The whole
//! analysis is single-threaded and owns all of its state for the duration
//! of one invocation; the only circuit breaker is the node-count ceiling,
//! which converts size blowup into a pessimistic-but-safe result.

pub mod budget;
pub mod compress;
pub mod condense;
pub mod config;
pub mod driver;
pub mod error;
pub mod graph;
pub mod lifetime;
pub mod stats;
pub mod summary;

pub use budget::{ArgLocality, FunctionRecord, LocalityMask, StackBudget};
pub use config::{EscapeAnalysisConfig, UnknownCallPolicy};
pub use driver::{analyze, EscapeAnalysisOutcome};
pub use error::EscapeError;
pub use graph::{BuildOutcome, BuiltGraph, GraphBuilder, PointsToGraph, PtId};
pub use lifetime::{depth, Lifetime};
pub use stats::{AnalysisSink, CountingSink, NullSink};
pub use summary::{CompressedEdge, CompressedNode, FieldPath, FunctionSummary, NodeKind};
