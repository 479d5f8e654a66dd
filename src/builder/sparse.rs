//! Sparse realization of block rules.
//!
//! A statistic over a selection is not computed once per part: the table is
//! split once by a table-partition block (one member per part, keyed by
//! VarKey), and a partition-stats block computes the statistic for every
//! member at once. The field of one rule is then the member of that block
//! holding its part.
//!
//! ```text
//! Customer
//!   Partition(Orders) per amount(4)          Partition(IntervalBounds(10, 25))
//!   [TablePartition(Orders) per amount(4)]   TablePartition(Orders, <partition>, amount)
//!       Orders where amount <= 10            VarKey 1
//!       Orders where amount > 25             VarKey 3
//!   [Count(Orders) per amount(4)]            TablePartitionCount(<table partition block>)
//!       Count(Orders) where amount <= 10     VarKey 1
//! ```

use super::BuildContext;
use super::optimized::{create_formula_field, create_ledger_field, ledger_field};
use crate::FieldType;
use crate::error::BuildError;
use crate::formula::{Formula, Operand};
use crate::model::{
    ConstructedRule, PartRef, PartitionId, RuleClass, RuleOperand, compute_var_key, part_selection_formula,
    partition_formula, table_partition_formula,
};
use crate::schema::{Field, FieldBlock};
use log::debug;

/// Field realizing `rule`, as a block member when the rule is a collected
/// block rule. Other rules get a plain field whose rule operands are realized
/// sparsely first.
pub(crate) fn create_sparse_field(ctx: &mut BuildContext<'_>, rule: &ConstructedRule) -> Result<String, BuildError> {
    if let Some(field) = ledger_field(ctx, rule) {
        return Ok(field);
    }
    let is_block = ctx.block_rules.contains(rule, ctx.space);
    match rule.classify() {
        RuleClass::PartitionBlock if is_block => create_partition_block_member(ctx, rule),
        RuleClass::ValueBlock if is_block => match create_value_block_member(ctx, rule)? {
            Some(member) => Ok(member),
            None => create_plain_field(ctx, rule),
        },
        _ => create_plain_field(ctx, rule),
    }
}

fn create_plain_field(ctx: &mut BuildContext<'_>, rule: &ConstructedRule) -> Result<String, BuildError> {
    let mut operands = Vec::with_capacity(rule.operand_count());
    for operand in &rule.operands {
        operands.push(match operand {
            RuleOperand::Field(field) => Operand::field(&field.name),
            RuleOperand::Rule(inner) if inner.is_selection() => Operand::field(create_ledger_field(ctx, inner)?),
            RuleOperand::Rule(inner) => Operand::field(create_sparse_field(ctx, inner)?),
            RuleOperand::Part(part) => Operand::Formula(part_selection_formula(part, ctx.space)?),
        });
    }
    create_formula_field(ctx, rule, rule.template.formula(operands))
}

// --- Partition descriptors ----------------------------------------------------

/// Field holding the descriptor of a partition, in the partition's parent
/// class. Memoized on the partition.
fn create_partition_field(ctx: &mut BuildContext<'_>, partition: PartitionId) -> Result<String, BuildError> {
    if let Some(name) = ctx.space.partition(partition).partition_field.clone() {
        return Ok(name);
    }
    let formula = partition_formula(partition, ctx.space)?;
    let class = ctx.space.partition(partition).parent_class.clone();
    let existing = ctx.compliance.class_mut_or_err(&class)?.lookup_formula(&formula).map(str::to_string);
    let name = match existing {
        Some(name) => {
            ctx.reused += 1;
            name
        }
        None => {
            let prefix = ctx.names.partition_field_name(partition, ctx.space)?;
            let name = ctx.unique_name(&class, &prefix)?;
            let field_type = FieldType::Structure("Partition".to_string());
            ctx.insert_derived(&class, Field::derived(name, field_type, formula))?
        }
    };
    ctx.space.partition_mut(partition).partition_field = Some(name.clone());
    Ok(name)
}

/// Table-partition block of the part's partition, with a member for the
/// part. Returns the block name.
fn create_table_partition_block(ctx: &mut BuildContext<'_>, part: &PartRef) -> Result<String, BuildError> {
    let partition = part.partition;
    create_partition_field(ctx, partition)?;
    let formula = table_partition_formula(partition, ctx.space)?;
    let var_key = compute_var_key(part, ctx.space)?;
    let (class, table_class) = {
        let entry = ctx.space.partition(partition);
        (entry.parent_class.clone(), entry.class.clone())
    };

    let block = match ctx.space.partition(partition).table_partition_block.clone() {
        Some(block) => Some(block),
        None => ctx.compliance.class_mut_or_err(&class)?.lookup_block(&formula).map(str::to_string),
    };
    let found = ctx.compliance.class_mut_or_err(&class)?.lookup_block_member(&formula, var_key).is_some();
    let block = match (found, block) {
        (true, Some(block)) => block,
        (_, block) => {
            let prefix = ctx.names.part_field_name(part, ctx.space)?;
            let name = ctx.unique_name(&class, &prefix)?;
            let member = Field::block_member(name, FieldType::ObjectArray(table_class), String::new(), var_key);
            insert_member(ctx, &class, block, &formula, member, |ctx| {
                ctx.names.table_partition_block_name(partition, ctx.space)
            })?
        }
    };
    ctx.space.partition_mut(partition).table_partition_block = Some(block.clone());
    Ok(block)
}

// --- Block members ----------------------------------------------------------

/// `<partition stats>(<table partition block>, operands...)` evaluated for
/// the part of the rule's selection.
fn create_partition_block_member(ctx: &mut BuildContext<'_>, rule: &ConstructedRule) -> Result<String, BuildError> {
    let contract = |msg: &str| BuildError::Contract(format!("{} in {}: {msg}", rule.name(), rule.class));
    let operator = rule.template.partition_stats.ok_or_else(|| contract("no partition statistic"))?;
    let part = rule.used_part().ok_or_else(|| contract("not a partition block rule"))?.clone();

    let table_partition = create_table_partition_block(ctx, &part)?;
    let mut formula = Formula::new(operator).field(table_partition);
    for operand in rule.operands.iter().skip(1) {
        let name = match operand {
            RuleOperand::Field(field) => field.name.clone(),
            RuleOperand::Rule(inner) => create_ledger_field(ctx, inner)?,
            RuleOperand::Part(_) => return Err(contract("part operand outside a selection")),
        };
        formula = formula.field(name);
    }
    let var_key = compute_var_key(&part, ctx.space)?;
    create_block_member(ctx, rule, formula, var_key)
}

/// `<value block>(<operand 0>, <block of operand 1>)`: the statistic applied
/// to every member of the upstream block, keyed like it. `None` when the
/// upstream rule was already realized by a plain field.
fn create_value_block_member(
    ctx: &mut BuildContext<'_>,
    rule: &ConstructedRule,
) -> Result<Option<String>, BuildError> {
    let contract = |msg: &str| BuildError::Contract(format!("{} in {}: {msg}", rule.name(), rule.class));
    let operator = rule.template.value_block.ok_or_else(|| contract("no value block statistic"))?;
    let upstream = rule.rule_operand(1).ok_or_else(|| contract("not a value block rule"))?;

    let member = create_sparse_field(ctx, upstream)?;
    let upstream_class = rule.operand_class(1)?;
    let Some((block, var_key)) = ctx
        .schema
        .entity_or_err(&upstream_class)?
        .field(&member)
        .and_then(|f| Some((f.block.clone()?, f.var_key?)))
    else {
        debug!("{upstream_class}.{member} is not a block member, {} stays a plain field", rule.name());
        return Ok(None);
    };

    let first = match rule.operands.first() {
        Some(RuleOperand::Field(field)) => field.name.clone(),
        Some(RuleOperand::Rule(inner)) => create_ledger_field(ctx, inner)?,
        _ => return Err(contract("operand 0 is not a table")),
    };
    let formula = Formula::new(operator).field(first).field(block);
    create_block_member(ctx, rule, formula, var_key).map(Some)
}

/// Existing member of the block computing `formula` under `var_key`, or a
/// new unused one, in the existing block or a new one.
fn create_block_member(
    ctx: &mut BuildContext<'_>,
    rule: &ConstructedRule,
    formula: Formula,
    var_key: u64,
) -> Result<String, BuildError> {
    let class = rule.class.clone();
    let existing = ctx.compliance.class_mut_or_err(&class)?.lookup_block_member(&formula, var_key).map(str::to_string);
    let name = match existing {
        Some(name) => {
            ctx.reused += 1;
            name
        }
        None => {
            let block = ctx.compliance.class_mut_or_err(&class)?.lookup_block(&formula).map(str::to_string);
            let prefix = ctx.names.rule_name(rule, false, ctx.space)?;
            let name = ctx.unique_name(&class, &prefix)?;
            let member = Field::block_member(name.clone(), rule.result_type()?, String::new(), var_key);
            let block = insert_member(ctx, &class, block, &formula, member, |ctx| {
                ctx.names.rule_name(rule, true, ctx.space)
            })?;
            if let Some(entry) = ctx.block_rules.get_mut(rule, ctx.space) {
                entry.block = Some(block);
            }
            name
        }
    };
    ctx.used_rules.entry(rule, ctx.space).field = Some(name.clone());
    Ok(name)
}

/// Insert `member` into `block`, creating and registering the block (named
/// by `block_name`) when there is none yet. Returns the block name.
fn insert_member(
    ctx: &mut BuildContext<'_>,
    class: &str,
    block: Option<String>,
    formula: &Formula,
    member: Field,
    block_name: impl FnOnce(&mut BuildContext<'_>) -> Result<String, BuildError>,
) -> Result<String, BuildError> {
    let member_name = member.name.clone();
    let block = match block {
        Some(block) => {
            ctx.schema.entity_mut_or_err(class)?.insert_block_member(&block, member.clone())?;
            block
        }
        None => {
            let prefix = block_name(ctx)?;
            let name = ctx.unique_name(class, &prefix)?;
            let block = FieldBlock { name: name.clone(), formula: formula.clone() };
            ctx.compliance.class_mut_or_err(class)?.register_block(&block)?;
            ctx.schema.entity_mut_or_err(class)?.add_block(block, member.clone());
            ctx.record_block(class, &name);
            debug!("created block {class}.{name} = {formula}");
            name
        }
    };
    let mut registered = member;
    registered.block = Some(block.clone());
    ctx.compliance.class_mut_or_err(class)?.register_block_member(formula, &registered)?;
    ctx.record_field(class, &member_name);
    Ok(block)
}
