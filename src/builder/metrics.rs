//! Build metrics.
//!
//! This module defines a small set of structs used to observe where a build
//! spends its time and what it produced.
//!
//! Every [`crate::build_schema`] call fills a [`BuildMetrics`]; nothing is
//! collected beyond timings and counters, so the cost is a few `Instant`
//! reads per phase.
//!
//! ## Design notes
//!
//! - `AnalysisMetrics` stays at its default when no selection operand is used.
//! - Durations are wall-clock and include logging.

use std::time::Duration;

// --- Metrics -----------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct BuildMetrics {
    /// Total elapsed time for [`crate::build_schema`].
    pub total: Duration,
    /// Time spent collecting the compliance registry of the input schema.
    pub compliance: Duration,
    /// Selection operand analysis.
    pub analysis: AnalysisMetrics,
    /// Field and block creation, reorder, costs and compile.
    pub construction: ConstructionMetrics,
    /// Candidate rules received.
    pub rules_requested: usize,
    /// Candidates dropped because a part did not resolve after analysis.
    pub rules_dropped: usize,
}

/// Timings for the selection operand analysis.
#[derive(Debug, Default, Clone)]
pub struct AnalysisMetrics {
    /// Total elapsed time for the analysis.
    pub total: Duration,
    /// Time spent in the sample collector.
    pub sampling: Duration,
    /// Time spent computing granularities and parts.
    pub stats: Duration,
    /// Number of used dimensions analysed.
    pub dimensions: usize,
    /// Main records read by the sampler.
    pub objects_read: usize,
}

/// Timing and counters of the build proper.
#[derive(Debug, Default, Clone)]
pub struct ConstructionMetrics {
    pub duration: Duration,
    pub fields_created: usize,
    /// Fields answered by the compliance registry instead of being created.
    /// A rule met again through the used-rule ledger is not counted.
    pub fields_reused: usize,
    pub blocks_created: usize,
    pub used_rules: usize,
    pub block_rules: usize,
}
