//! Class builder: turns candidate rules into fields of a working schema.
//!
//! A build clones the input schema, collects its compliance registry and then
//! realizes every candidate rule with one of three strategies:
//!
//! ```text
//!                    ┌─ Standard   one field per candidate, formula materialized whole
//! rules ── mode ─────┼─ Optimized  every sub-rule in a used-rule ledger, one field per
//!                    │             distinct sub-rule, candidates reference them
//!                    └─ Sparse     Optimized + selection statistics realized as members
//!                                  of field blocks keyed by VarKey
//!                                        │
//!                                        v
//!                       reorder ─> costs ─> compile ─> BuildOutput
//! ```
//!
//! Every lookup goes through the compliance registry first, so a rule whose
//! formula the schema already computes reuses the existing field.
//!
//! ## Responsibilities by module
//!
//! - `ledger.rs`: sorted rule ledgers (used rules, block rules) and their
//!   collection passes.
//! - `standard.rs`: direct field creation and the Standard strategy.
//! - `optimized.rs`: ledger-backed field creation and the Optimized strategy.
//! - `sparse.rs`: partition descriptors, table-partition blocks, partition and
//!   value blocks.
//! - `selection.rs`: selection fields of used dimensions, and the reduced
//!   schema sampled by the analyser.
//! - `reorder.rs`: moves created fields and blocks to the tail.
//! - `costs.rs`: cost annotation.
//! - `metrics.rs`: per-phase timings and counters.

#[path = "builder/costs.rs"]
mod costs;
#[path = "builder/ledger.rs"]
mod ledger;
#[path = "builder/metrics.rs"]
mod metrics;
#[path = "builder/optimized.rs"]
mod optimized;
#[path = "builder/reorder.rs"]
mod reorder;
#[path = "builder/selection.rs"]
mod selection;
#[path = "builder/sparse.rs"]
mod sparse;
#[path = "builder/standard.rs"]
mod standard;

#[cfg(test)]
#[path = "builder/tests.rs"]
mod tests;

#[allow(unused_imports)]
pub use metrics::{AnalysisMetrics, BuildMetrics, ConstructionMetrics};

use crate::Interrupt;
use crate::api::Options;
use crate::compliance::DomainCompliance;
use crate::error::BuildError;
use crate::model::{ConstructedRule, NameGenerator, PartitionSpace};
use crate::schema::{Field, Schema};
use crate::template::TemplateCatalogue;
use ledger::{BlockRule, Ledger, UsedRule};
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::time::Instant;

/// `(class, field or block name)`
pub type FieldPath = (String, String);

// --- Mode -------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuilderMode {
    Standard,
    Optimized,
    Sparse,
}

impl BuilderMode {
    /// Sparse blocks are only built on top of rule optimization.
    pub fn from_options(options: &Options) -> Self {
        match (options.rule_optimization, options.sparse_optimization) {
            (true, true) => BuilderMode::Sparse,
            (true, false) => BuilderMode::Optimized,
            (false, sparse) => {
                if sparse {
                    warn!("sparse optimization needs rule optimization, building standard fields");
                }
                BuilderMode::Standard
            }
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BuilderMode::Standard => "standard",
            BuilderMode::Optimized => "optimized",
            BuilderMode::Sparse => "sparse",
        }
    }
}

// --- Output -----------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub schema: Schema,
    /// Every field the build added, in creation order.
    pub created_fields: Vec<FieldPath>,
    pub created_blocks: Vec<FieldPath>,
    pub metrics: ConstructionMetrics,
}

// --- Context ----------------------------------------------------------------

/// Mutable state of one build: the working schema and everything indexed
/// against it. Dropped at the end of the build.
pub(crate) struct BuildContext<'a> {
    pub schema: Schema,
    pub compliance: DomainCompliance,
    pub space: &'a mut PartitionSpace,
    pub names: NameGenerator,
    pub options: &'a Options,
    pub interrupt: &'a Interrupt,
    pub used_rules: Ledger<UsedRule>,
    pub block_rules: Ledger<BlockRule>,
    pub created_fields: Vec<FieldPath>,
    pub created_blocks: Vec<FieldPath>,
    created: BTreeSet<FieldPath>,
    pub reused: usize,
}

impl<'a> BuildContext<'a> {
    pub fn new(
        schema: &Schema,
        catalogue: &dyn TemplateCatalogue,
        space: &'a mut PartitionSpace,
        options: &'a Options,
        interrupt: &'a Interrupt,
    ) -> Self {
        space.clear_schema_links();
        BuildContext {
            compliance: DomainCompliance::collect(schema, catalogue),
            schema: schema.clone(),
            space,
            names: NameGenerator::new(options.interpretable_names),
            options,
            interrupt,
            used_rules: Ledger::used_rules(),
            block_rules: Ledger::block_rules(),
            created_fields: Vec::new(),
            created_blocks: Vec::new(),
            created: BTreeSet::new(),
            reused: 0,
        }
    }

    pub fn check_interrupt(&self) -> Result<(), BuildError> {
        if self.interrupt.is_requested() { Err(BuildError::Interrupted) } else { Ok(()) }
    }

    pub fn is_created(&self, class: &str, name: &str) -> bool {
        self.created.contains(&(class.to_string(), name.to_string()))
    }

    /// Name for a generated field of `class`, unique in that class.
    pub fn unique_name(&self, class: &str, prefix: &str) -> Result<String, BuildError> {
        Ok(self.schema.entity_or_err(class)?.build_field_name(prefix))
    }

    /// Append a derived field to `class` and index it.
    pub fn insert_derived(&mut self, class: &str, field: Field) -> Result<String, BuildError> {
        let name = field.name.clone();
        self.compliance.class_mut_or_err(class)?.register_derived(&field)?;
        self.schema.entity_mut_or_err(class)?.insert_field(field);
        self.record_field(class, &name);
        debug!("created {class}.{name}");
        Ok(name)
    }

    pub fn record_field(&mut self, class: &str, name: &str) {
        let path = (class.to_string(), name.to_string());
        if self.created.insert(path.clone()) {
            self.created_fields.push(path);
        }
    }

    pub fn record_block(&mut self, class: &str, name: &str) {
        self.created_blocks.push((class.to_string(), name.to_string()));
    }

    /// Candidate field: used, loaded and carrying the rule cost.
    pub fn mark_candidate(&mut self, class: &str, name: &str, cost: f64) -> Result<(), BuildError> {
        let field = self
            .schema
            .entity_mut_or_err(class)?
            .field_mut(name)
            .ok_or_else(|| BuildError::Contract(format!("no field {name} in {class}")))?;
        field.set_used(true);
        field.set_loaded(true);
        field.cost = cost;
        Ok(())
    }

    fn finish(self, started: Instant) -> BuildOutput {
        let metrics = ConstructionMetrics {
            duration: started.elapsed(),
            fields_created: self.created_fields.len(),
            fields_reused: self.reused,
            blocks_created: self.created_blocks.len(),
            used_rules: self.used_rules.len(),
            block_rules: self.block_rules.len(),
        };
        BuildOutput {
            schema: self.schema,
            created_fields: self.created_fields,
            created_blocks: self.created_blocks,
            metrics,
        }
    }
}

// --- Builder ----------------------------------------------------------------

/// Builds the target schema of one request. Cheap to create; every build
/// owns its own [`BuildContext`].
pub struct ClassBuilder<'a> {
    catalogue: &'a dyn TemplateCatalogue,
    options: &'a Options,
    interrupt: Interrupt,
}

impl<'a> ClassBuilder<'a> {
    pub fn new(catalogue: &'a dyn TemplateCatalogue, options: &'a Options, interrupt: Interrupt) -> Self {
        ClassBuilder { catalogue, options, interrupt }
    }

    pub fn mode(&self) -> BuilderMode {
        BuilderMode::from_options(self.options)
    }

    /// Realize `rules` against a clone of `schema`. Use counts of `space` are
    /// recomputed from `rules`.
    pub fn build(
        &self,
        schema: &Schema,
        space: &mut PartitionSpace,
        rules: &[ConstructedRule],
    ) -> Result<BuildOutput, BuildError> {
        let started = Instant::now();
        let mode = self.mode();
        let mut ctx = BuildContext::new(schema, self.catalogue, space, self.options, &self.interrupt);

        let new_fields = match mode {
            BuilderMode::Standard => standard::build(&mut ctx, rules)?,
            BuilderMode::Optimized | BuilderMode::Sparse => optimized::build(&mut ctx, rules, mode)?,
        };

        reorder::reorder_fields(&mut ctx, &new_fields)?;
        if mode == BuilderMode::Sparse {
            reorder::reorder_blocks(&mut ctx)?;
        }
        costs::annotate(&mut ctx.schema, self.options);
        ctx.schema.compile()?;

        info!(
            "{} build: {} candidates, {} new candidate fields, {} fields and {} blocks created, {} reused",
            mode.label(),
            rules.len(),
            new_fields.len(),
            ctx.created_fields.len(),
            ctx.created_blocks.len(),
            ctx.reused
        );
        Ok(ctx.finish(started))
    }

    /// Reduced schema handed to the sampler: only the fields feeding a used
    /// selection operand are used, each used dimension's `selection_field`
    /// names its field.
    pub fn build_selection_schema(&self, schema: &Schema, space: &mut PartitionSpace) -> Result<Schema, BuildError> {
        let mut ctx = BuildContext::new(schema, self.catalogue, space, self.options, &self.interrupt);
        selection::build_selection_fields(&mut ctx)?;
        selection::reduce(&mut ctx)?;
        Ok(ctx.schema)
    }
}
