//! Selection operand analysis.
//!
//! Selection rules restrict a table to one part of a partition. Before the
//! parts can be turned into formulas, every used selection operand (a
//! dimension) is sampled and cut into partiles:
//!
//! ```text
//! rules ── use counts ──> used dimensions
//!                              │
//!                              v
//!             reduced schema (ClassBuilder) ──> SampleCollector ──> Samples
//!                                                                     │
//!                  ┌──────────────────────────────────────────────────┘
//!                  v
//!   continuous: IntervalBuilder ── G = 2, 4, ... ──> ]lower, upper] intervals
//!   symbol:     GroupBuilder    ── G = 2, 4, ... ──> frequent values + garbage group
//!                  │
//!                  v
//!             OperandStats on each Dimension
//! ```
//!
//! Granularities grow by powers of two while every partile keeps at least
//! [`MIN_PARTILE_FREQUENCY`] samples on average, and stop once they no longer
//! produce new parts.
//!
//! ## Responsibilities by module
//!
//! - `sampler.rs`: the sampling boundary and an in-memory sampler.
//! - `quantile.rs`: quantile intervals, frequency groups and human-readable
//!   bounds.
//! - `stats.rs`: granularities and parts of one operand.
//! - `analyser.rs`: the analysis state machine over a partition space.

#[path = "selection/analyser.rs"]
mod analyser;
#[path = "selection/quantile.rs"]
mod quantile;
#[path = "selection/sampler.rs"]
mod sampler;
#[path = "selection/stats.rs"]
mod stats;

#[allow(unused_imports)]
pub use analyser::{AnalyserState, SelectionAnalyser};
#[allow(unused_imports)]
pub use quantile::human_readable_lower_mean;
#[allow(unused_imports)]
pub use sampler::{MemorySampler, SampleCollector, SampleColumn, SampleRequest, Samples};
#[allow(unused_imports)]
pub use stats::{MIN_PARTILE_FREQUENCY, OperandStats, SelectionPart};
