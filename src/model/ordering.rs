//! Total orders over rules and partitions.
//!
//! Every comparator takes the [`PartitionSpace`] because part operands are
//! references into it. Costs are compared after rounding to seven decimals so
//! that orders stay stable across platforms.

use super::partition::{Dimension, DimensionOrigin, PartitionId, PartitionSpace};
use super::rule::{ConstructedRule, PartRef, RuleOperand};
use std::cmp::Ordering;

/// Cost rounded to seven decimals.
pub fn rounded_cost(cost: f64) -> i64 {
    (cost * 1e7 + 0.5).floor() as i64
}

/// Structural order: class, template, operand count, then operands (origin
/// first, then field name, nested rule or partition and part indexes).
pub fn compare_rules(a: &ConstructedRule, b: &ConstructedRule, space: &PartitionSpace) -> Ordering {
    a.class
        .cmp(&b.class)
        .then_with(|| a.name().cmp(b.name()))
        .then_with(|| a.operand_count().cmp(&b.operand_count()))
        .then_with(|| compare_operands(a, b, space, &mut None))
}

/// Structural order used to identify blocks: the first part met depth first
/// only contributes its partition, deeper parts contribute their indexes too.
pub fn compare_block_cost_name(a: &ConstructedRule, b: &ConstructedRule, space: &PartitionSpace) -> Ordering {
    rounded_cost(a.cost).cmp(&rounded_cost(b.cost)).then_with(|| compare_block(a, b, space, &mut Some(0)))
}

fn compare_block(
    a: &ConstructedRule,
    b: &ConstructedRule,
    space: &PartitionSpace,
    level: &mut Option<usize>,
) -> Ordering {
    a.class
        .cmp(&b.class)
        .then_with(|| a.name().cmp(b.name()))
        .then_with(|| a.operand_count().cmp(&b.operand_count()))
        .then_with(|| compare_operands(a, b, space, level))
}

/// Operand-wise structural comparison. `level` is `None` for the plain order
/// and counts the parts met so far for the block order.
fn compare_operands(
    a: &ConstructedRule,
    b: &ConstructedRule,
    space: &PartitionSpace,
    level: &mut Option<usize>,
) -> Ordering {
    for (x, y) in a.operands.iter().zip(&b.operands) {
        let ordering = match (x, y) {
            (RuleOperand::Field(x), RuleOperand::Field(y)) => x.name.cmp(&y.name),
            (RuleOperand::Rule(x), RuleOperand::Rule(y)) => match level {
                None => compare_rules(x, y, space),
                Some(_) => compare_block(x, y, space, level),
            },
            (RuleOperand::Part(x), RuleOperand::Part(y)) => {
                let ordering = compare_partitions(x.partition, y.partition, space);
                let ordering = match level {
                    None => ordering.then_with(|| x.indexes.cmp(&y.indexes)),
                    Some(0) => ordering,
                    Some(_) => ordering.then_with(|| x.indexes.cmp(&y.indexes)),
                };
                if let Some(seen) = level {
                    *seen += 1;
                }
                ordering
            }
            _ => x.origin().cmp(&y.origin()),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Partition class, parent class, table field, dimension count, then each
/// dimension's granularity and dimension.
pub fn compare_partitions(a: PartitionId, b: PartitionId, space: &PartitionSpace) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    let (pa, pb) = (space.partition(a), space.partition(b));
    pa.class
        .cmp(&pb.class)
        .then_with(|| pa.parent_class.cmp(&pb.parent_class))
        .then_with(|| pa.table.name.cmp(&pb.table.name))
        .then_with(|| pa.dimensions.len().cmp(&pb.dimensions.len()))
        .then_with(|| {
            pa.dimensions
                .iter()
                .zip(&pb.dimensions)
                .map(|(da, db)| {
                    da.granularity.cmp(&db.granularity).then_with(|| {
                        compare_dimensions(space.dimension(da.dimension), space.dimension(db.dimension), space)
                    })
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal)
        })
}

/// Field dimensions before rule dimensions, then field name or rule order.
pub fn compare_dimensions(a: &Dimension, b: &Dimension, space: &PartitionSpace) -> Ordering {
    match (&a.origin, &b.origin) {
        (DimensionOrigin::Field(x), DimensionOrigin::Field(y)) => x.name.cmp(&y.name),
        (DimensionOrigin::Rule(x), DimensionOrigin::Rule(y)) => compare_rules(x, y, space),
        (DimensionOrigin::Field(_), DimensionOrigin::Rule(_)) => Ordering::Less,
        (DimensionOrigin::Rule(_), DimensionOrigin::Field(_)) => Ordering::Greater,
    }
}

// --- Cost orders ------------------------------------------------------------

/// Rounded cost, then formula simplicity: operand count and origins, nested
/// rule costs and part costs. Names are not compared.
pub fn compare_cost(a: &ConstructedRule, b: &ConstructedRule, space: &PartitionSpace) -> Ordering {
    rounded_cost(a.cost)
        .cmp(&rounded_cost(b.cost))
        .then_with(|| a.operand_count().cmp(&b.operand_count()))
        .then_with(|| {
            for (x, y) in a.operands.iter().zip(&b.operands) {
                let ordering = x.origin().cmp(&y.origin()).then_with(|| match (x, y) {
                    (RuleOperand::Rule(x), RuleOperand::Rule(y)) => compare_cost(x, y, space),
                    (RuleOperand::Part(x), RuleOperand::Part(y)) => compare_part_cost(x, y, space),
                    _ => Ordering::Equal,
                });
                if ordering.is_ne() {
                    return ordering;
                }
            }
            Ordering::Equal
        })
}

fn compare_part_cost(a: &PartRef, b: &PartRef, space: &PartitionSpace) -> Ordering {
    let cost = |part: &PartRef| space.part(part).map_or(0, |p| rounded_cost(p.cost));
    cost(a).cmp(&cost(b)).then_with(|| a.indexes.len().cmp(&b.indexes.len())).then_with(|| {
        let (pa, pb) = (space.partition(a.partition), space.partition(b.partition));
        for (da, db) in pa.dimensions.iter().zip(&pb.dimensions) {
            let (da, db) = (space.dimension(da.dimension), space.dimension(db.dimension));
            let ordering = match (&da.origin, &db.origin) {
                (DimensionOrigin::Rule(x), DimensionOrigin::Rule(y)) => compare_cost(x, y, space),
                (DimensionOrigin::Field(_), DimensionOrigin::Rule(_)) => Ordering::Less,
                (DimensionOrigin::Rule(_), DimensionOrigin::Field(_)) => Ordering::Greater,
                (DimensionOrigin::Field(_), DimensionOrigin::Field(_)) => Ordering::Equal,
            };
            if ordering.is_ne() {
                return ordering;
            }
        }
        Ordering::Equal
    })
}

pub fn compare_cost_random_index(a: &ConstructedRule, b: &ConstructedRule, space: &PartitionSpace) -> Ordering {
    compare_cost(a, b, space).then_with(|| a.random_index.cmp(&b.random_index))
}

pub fn compare_cost_name(a: &ConstructedRule, b: &ConstructedRule, space: &PartitionSpace) -> Ordering {
    compare_cost(a, b, space).then_with(|| compare_rules(a, b, space))
}
