use super::BuildContext;
use crate::model::{
    ConstructedRule, DimensionOrigin, PartitionSpace, RuleOperand, compare_block_cost_name, compare_cost_name,
};
use std::cmp::Ordering;

type RuleOrder = fn(&ConstructedRule, &ConstructedRule, &PartitionSpace) -> Ordering;

/// A sub-rule seen while collecting, with the field realizing it once built.
#[derive(Debug, Clone, Default)]
pub(crate) struct UsedRule {
    pub field: Option<String>,
    /// Number of collected rules having this one as an operand.
    pub using_rules: usize,
}

/// A distinct block. Rules differing only by the part their selection uses
/// share one entry.
#[derive(Debug, Clone, Default)]
pub(crate) struct BlockRule {
    pub block: Option<String>,
}

/// Rules kept sorted by a total order over rules, each with an entry.
#[derive(Debug, Clone)]
pub(crate) struct Ledger<E> {
    order: RuleOrder,
    entries: Vec<(ConstructedRule, E)>,
}

impl Ledger<UsedRule> {
    pub fn used_rules() -> Self {
        Ledger { order: compare_cost_name, entries: Vec::new() }
    }
}

impl Ledger<BlockRule> {
    pub fn block_rules() -> Self {
        Ledger { order: compare_block_cost_name, entries: Vec::new() }
    }
}

impl<E: Default> Ledger<E> {
    fn search(&self, rule: &ConstructedRule, space: &PartitionSpace) -> Result<usize, usize> {
        self.entries.binary_search_by(|(entry, _)| (self.order)(entry, rule, space))
    }

    pub fn get(&self, rule: &ConstructedRule, space: &PartitionSpace) -> Option<&E> {
        self.search(rule, space).ok().map(|i| &self.entries[i].1)
    }

    pub fn get_mut(&mut self, rule: &ConstructedRule, space: &PartitionSpace) -> Option<&mut E> {
        self.search(rule, space).ok().map(|i| &mut self.entries[i].1)
    }

    /// The entry of `rule`, inserted at its sorted position when missing.
    pub fn entry(&mut self, rule: &ConstructedRule, space: &PartitionSpace) -> &mut E {
        let index = match self.search(rule, space) {
            Ok(index) => index,
            Err(index) => {
                self.entries.insert(index, (rule.clone(), E::default()));
                index
            }
        };
        &mut self.entries[index].1
    }

    pub fn contains(&self, rule: &ConstructedRule, space: &PartitionSpace) -> bool {
        self.search(rule, space).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ConstructedRule, &E)> {
        self.entries.iter().map(|(rule, entry)| (rule, entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

// --- Collection -------------------------------------------------------------

/// Add `rule` and all its sub-rules to the used-rule ledger, including the
/// rules of the dimensions its parts select on.
pub(crate) fn collect_used_rules(ctx: &mut BuildContext<'_>, rule: &ConstructedRule) {
    for operand in &rule.operands {
        match operand {
            RuleOperand::Rule(inner) => {
                collect_used_rules(ctx, inner);
                ctx.used_rules.entry(inner, ctx.space).using_rules += 1;
            }
            RuleOperand::Part(part) => {
                for dimension in dimension_rules(part.partition, ctx.space) {
                    collect_used_rules(ctx, &dimension);
                }
            }
            RuleOperand::Field(_) => {}
        }
    }
    ctx.used_rules.entry(rule, ctx.space);
}

/// Add every block rule of the tree to the block ledger. Returns whether
/// `rule` itself is a block rule.
pub(crate) fn collect_block_rules(ctx: &mut BuildContext<'_>, rule: &ConstructedRule) -> bool {
    let mut first_is_selection = false;
    let mut second_is_block = false;
    for (index, operand) in rule.operands.iter().enumerate() {
        match operand {
            RuleOperand::Rule(inner) => {
                let is_block = collect_block_rules(ctx, inner);
                match index {
                    0 => first_is_selection = inner.is_selection(),
                    1 => second_is_block = is_block,
                    _ => {}
                }
            }
            RuleOperand::Part(part) => {
                for dimension in dimension_rules(part.partition, ctx.space) {
                    collect_block_rules(ctx, &dimension);
                }
            }
            RuleOperand::Field(_) => {}
        }
    }

    let is_block = (rule.template.partition_stats.is_some() && first_is_selection)
        || (rule.template.value_block.is_some() && second_is_block);
    if is_block {
        ctx.block_rules.entry(rule, ctx.space);
    }
    is_block
}

fn dimension_rules(partition: crate::model::PartitionId, space: &PartitionSpace) -> Vec<ConstructedRule> {
    space
        .partition(partition)
        .dimensions
        .iter()
        .filter_map(|d| match &space.dimension(d.dimension).origin {
            DimensionOrigin::Rule(rule) => Some((**rule).clone()),
            DimensionOrigin::Field(_) => None,
        })
        .collect()
}
