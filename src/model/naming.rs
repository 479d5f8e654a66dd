use super::partition::{Dimension, DimensionOrigin, PartitionId, PartitionSpace};
use super::rule::{ConstructedRule, PartRef, RuleOperand};
use crate::error::BuildError;
use crate::formula::format_continuous;
use crate::selection::SelectionPart;
use crate::template::Family;
use crate::{Kind, MAX_VALUE, MISSING};

/// Names for generated fields and blocks.
///
/// With interpretable names off, every generated name (fields, blocks,
/// partition descriptors) draws from one `ConstructedFeature<N>` sequence
/// starting at 1. The generator lives as long as one build.
#[derive(Debug, Clone, Default)]
pub struct NameGenerator {
    interpretable: bool,
    index: usize,
}

impl NameGenerator {
    pub fn new(interpretable: bool) -> Self {
        NameGenerator { interpretable, index: 0 }
    }

    pub fn is_interpretable(&self) -> bool {
        self.interpretable
    }

    fn indexed(&mut self) -> String {
        self.index += 1;
        format!("ConstructedFeature{}", self.index)
    }

    pub fn rule_name(
        &mut self,
        rule: &ConstructedRule,
        as_block: bool,
        space: &PartitionSpace,
    ) -> Result<String, BuildError> {
        if self.interpretable { interpretable_name(rule, as_block, space) } else { Ok(self.indexed()) }
    }

    /// `Partition(<partition class>) per <selection>`
    pub fn partition_field_name(
        &mut self,
        partition: PartitionId,
        space: &PartitionSpace,
    ) -> Result<String, BuildError> {
        if !self.interpretable {
            return Ok(self.indexed());
        }
        let class = &space.partition(partition).class;
        Ok(format!("Partition({class}) per {}", selection_name(partition, space)?))
    }

    /// `TablePartition(<table>) per <selection>`
    pub fn table_partition_block_name(
        &mut self,
        partition: PartitionId,
        space: &PartitionSpace,
    ) -> Result<String, BuildError> {
        if !self.interpretable {
            return Ok(self.indexed());
        }
        let table = &space.partition(partition).table.name;
        Ok(format!("TablePartition({table}) per {}", selection_name(partition, space)?))
    }

    /// `<table> where <part selection>`
    pub fn part_field_name(&mut self, part: &PartRef, space: &PartitionSpace) -> Result<String, BuildError> {
        if !self.interpretable {
            return Ok(self.indexed());
        }
        let table = &space.partition(part.partition).table.name;
        Ok(format!("{table} where {}", part_selection_name(part, space)?))
    }
}

// --- Interpretable names ----------------------------------------------------

/// Readable name of a rule. Block names describe the whole partition
/// (`per ...`), plain names the selected part (`where ...`).
pub fn interpretable_name(
    rule: &ConstructedRule,
    as_block: bool,
    space: &PartitionSpace,
) -> Result<String, BuildError> {
    let name = rule.name();
    match rule.template.family {
        Family::Date | Family::Time => Ok(format!("{}.{name}", operand_name(rule, 0, as_block, space)?)),
        Family::Timestamp => {
            let suffix = match name {
                "GetDate" => "Date",
                "GetTime" => "Time",
                other => other,
            };
            Ok(format!("{}.{suffix}", operand_name(rule, 0, as_block, space)?))
        }
        Family::TimestampTZ => {
            let suffix = if name == "LocalTimestamp" { "LocalTZ" } else { name };
            Ok(format!("{}.{suffix}", operand_name(rule, 0, as_block, space)?))
        }
        Family::Entity => {
            if rule.operand_count() == 1 {
                Ok(format!("{name}({})", operand_name(rule, 0, as_block, space)?))
            } else {
                let path = operand_name(rule, 0, as_block, space)?;
                Ok(format!("{path}.{}", operand_name(rule, 1, as_block, space)?))
            }
        }
        Family::Table => table_name(rule, as_block, space),
    }
}

fn table_name(rule: &ConstructedRule, as_block: bool, space: &PartitionSpace) -> Result<String, BuildError> {
    let selection = rule.selection_rule();
    let table = match (selection, rule.operands.first()) {
        (Some(selection), _) => selection.field_operand(0).map(|f| f.name.clone()),
        (None, Some(RuleOperand::Field(field))) => Some(field.name.clone()),
        _ => None,
    }
    .ok_or_else(|| BuildError::Contract(format!("{} has no table operand", rule.name())))?;

    let mut name = if rule.is_selection() {
        table
    } else {
        // Inside a selection the value operand is not the block axis.
        let operand = if rule.operand_count() > 1 {
            format!(".{}", operand_name(rule, 1, as_block && selection.is_none(), space)?)
        } else {
            String::new()
        };
        format!("{}({table}{operand})", rule.template.operator_name())
    };

    if let Some(selection) = selection {
        let part = selection
            .part_operand(1)
            .ok_or_else(|| BuildError::Contract(format!("{} has no part", selection.name())))?;
        if as_block {
            name.push_str(" per ");
            name.push_str(&selection_name(part.partition, space)?);
        } else {
            name.push_str(" where ");
            name.push_str(&part_selection_name(part, space)?);
        }
    }
    Ok(name)
}

fn operand_name(
    rule: &ConstructedRule,
    index: usize,
    as_block: bool,
    space: &PartitionSpace,
) -> Result<String, BuildError> {
    match rule.operands.get(index) {
        Some(RuleOperand::Field(field)) => Ok(field.name.clone()),
        Some(RuleOperand::Rule(inner)) => interpretable_name(inner, as_block, space),
        _ => Err(BuildError::Contract(format!("operand {index} of {} cannot be named", rule.name()))),
    }
}

/// Field name, or the rule's plain interpretable name.
pub fn dimension_name(dimension: &Dimension, space: &PartitionSpace) -> Result<String, BuildError> {
    match &dimension.origin {
        DimensionOrigin::Field(field) => Ok(field.name.clone()),
        DimensionOrigin::Rule(rule) => interpretable_name(rule, false, space),
    }
}

/// `dim(G)` per dimension, joined by ` and `.
pub fn selection_name(partition: PartitionId, space: &PartitionSpace) -> Result<String, BuildError> {
    let names = space
        .partition(partition)
        .dimensions
        .iter()
        .map(|d| Ok(format!("{}({})", dimension_name(space.dimension(d.dimension), space)?, d.granularity)))
        .collect::<Result<Vec<_>, BuildError>>()?;
    Ok(names.join(" and "))
}

/// Readable criterion of one part, e.g. `amount in ]10, 25]` or
/// `channel not in {web, store}`.
pub fn part_selection_name(part: &PartRef, space: &PartitionSpace) -> Result<String, BuildError> {
    let mut names = Vec::with_capacity(part.indexes.len());
    for axis in 0..part.indexes.len() {
        let (dimension, selection) = resolve_selection_part(part, axis, space)?;
        let operand = dimension_name(dimension, space)?;
        names.push(selection_operand_name(&operand, dimension.kind(), selection));
    }
    Ok(names.join(" and "))
}

fn selection_operand_name(operand: &str, kind: Kind, selection: &SelectionPart) -> String {
    match selection {
        SelectionPart::Value { value, outside, .. } if kind == Kind::Symbol => {
            if outside.is_empty() {
                let value = clean_value(value);
                if value.is_empty() { format!("{operand} is empty") } else { format!("{operand} = {value}") }
            } else if outside.len() == 1 {
                let value = clean_value(&outside[0]);
                if value.is_empty() { format!("{operand} not empty") } else { format!("{operand} <> {value}") }
            } else {
                let values: Vec<String> = outside.iter().map(|v| clean_value(v)).collect();
                format!("{operand} not in {{{}}}", values.join(", "))
            }
        }
        SelectionPart::Interval { lower, upper, index } => {
            let (lower, upper) = (*lower, *upper);
            if upper == MISSING {
                format!("{operand} is missing")
            } else if lower == MISSING && upper == MAX_VALUE {
                format!("{operand} not missing")
            } else if upper == MAX_VALUE {
                format!("{operand} > {}", format_continuous(lower))
            } else if lower == MISSING && *index == 0 {
                format!("{operand} <= {}", format_continuous(upper))
            } else if lower != MISSING {
                format!("{operand} in ]{}, {}]", format_continuous(lower), format_continuous(upper))
            } else {
                format!("{operand} <= {} (and not missing)", format_continuous(upper))
            }
        }
        SelectionPart::Value { value, .. } => format!("{operand} = {}", clean_value(value)),
    }
}

/// Tabs become spaces, then the value is trimmed.
fn clean_value(value: &str) -> String {
    value.replace('\t', " ").trim().to_string()
}

/// Dimension of `axis` and the analysed part selected by the part's index.
pub(crate) fn resolve_selection_part<'a>(
    part: &PartRef,
    axis: usize,
    space: &'a PartitionSpace,
) -> Result<(&'a Dimension, &'a SelectionPart), BuildError> {
    let (dimension, granularity) = space.partition_dimension(part.partition, axis);
    let index = part.indexes[axis];
    let selection = dimension
        .stats
        .as_ref()
        .and_then(|stats| stats.part(granularity, index))
        .ok_or_else(|| BuildError::Contract(format!("no analysed part {index} at granularity {granularity}")))?;
    Ok((dimension, selection))
}
