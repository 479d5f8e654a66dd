//! Constructed-rule and partition model.
//!
//! This module holds the symbolic side of the compiler: rule instances built
//! on templates, and the partitions that selection rules cut tables into.
//!
//! ```text
//! ConstructedRule ── operands ──┬─ Field(FieldRef)        field of the rule's class
//!                               ├─ Rule(Box<ConstructedRule>)  owned subtree
//!                               └─ Part(PartRef) ─────────┐
//!                                                         v
//! PartitionSpace (arena) ── PartitionId ──> Partition ── parts: BTreeMap<indexes, Part>
//!                        └─ DimensionId ──> Dimension (field or rule, stats, selection field)
//! ```
//!
//! Rules own their nested rules. Parts are referenced by `(PartitionId,
//! partile indexes)` and live in their partition; partitions and dimensions
//! live in a [`PartitionSpace`] arena that interns them structurally, so two
//! ids are equal exactly when the structures are.
//!
//! ## Responsibilities by module
//!
//! - `rule.rs`: rule instances, classification, checks, use counts and
//!   structural signatures used as ordered-map keys.
//! - `partition.rs`: the arena with partitions, dimensions and parts.
//! - `ordering.rs`: the structural and cost-based total orders.
//! - `naming.rs`: interpretable and indexed names for generated fields.
//! - `materialize.rs`: turns rules, parts and partitions into formulas, and
//!   computes block keys (VarKeys).

#[path = "model/materialize.rs"]
mod materialize;
#[path = "model/naming.rs"]
mod naming;
#[path = "model/ordering.rs"]
mod ordering;
#[path = "model/partition.rs"]
mod partition;
#[path = "model/rule.rs"]
mod rule;

#[allow(unused_imports)]
pub use materialize::{
    compute_var_key, decode_var_key, materialize_formula, part_selection_formula, partition_formula,
    table_partition_formula,
};
#[allow(unused_imports)]
pub use naming::{NameGenerator, interpretable_name, part_selection_name, selection_name};
#[allow(unused_imports)]
pub use ordering::{
    compare_block_cost_name, compare_cost, compare_cost_name, compare_cost_random_index, compare_dimensions,
    compare_partitions, compare_rules, rounded_cost,
};
#[allow(unused_imports)]
pub use partition::{Dimension, DimensionId, DimensionOrigin, Part, Partition, PartitionId, PartitionSpace};
#[allow(unused_imports)]
pub use rule::{ConstructedRule, FieldRef, Origin, PartRef, RuleClass, RuleOperand, RuleSignature};

#[cfg(test)]
#[path = "model/fixtures.rs"]
pub(crate) mod fixtures;
