use super::{BuildContext, FieldPath};
use crate::error::BuildError;
use crate::model::{PartitionId, RuleClass, compare_partitions};
use std::collections::BTreeSet;

/// Move `new_fields` to the tail of their class in the given order, then the
/// other fields created for ledger entries, in ledger order. Block members
/// stay inside their blocks.
pub(crate) fn reorder_fields(ctx: &mut BuildContext<'_>, new_fields: &[FieldPath]) -> Result<(), BuildError> {
    let mut moved: BTreeSet<FieldPath> = BTreeSet::new();
    for (class, name) in new_fields {
        move_plain_field(ctx, class, name, &mut moved)?;
    }

    let intermediates: Vec<FieldPath> = ctx
        .used_rules
        .iter()
        .filter_map(|(rule, entry)| entry.field.as_ref().map(|field| (rule.class.clone(), field.clone())))
        .collect();
    for (class, name) in intermediates {
        if ctx.is_created(&class, &name) {
            move_plain_field(ctx, &class, &name, &mut moved)?;
        }
    }
    Ok(())
}

fn move_plain_field(
    ctx: &mut BuildContext<'_>,
    class: &str,
    name: &str,
    moved: &mut BTreeSet<FieldPath>,
) -> Result<(), BuildError> {
    let entity = ctx.schema.entity_mut_or_err(class)?;
    let in_block = entity.field(name).is_none_or(|f| f.block.is_some());
    if !in_block && moved.insert((class.to_string(), name.to_string())) {
        entity.move_field_to_tail(name);
    }
    Ok(())
}

/// Move every created block to the tail, members sorted by VarKey, then the
/// partition fields and table-partition blocks of the partitions used by
/// partition blocks, in partition order.
pub(crate) fn reorder_blocks(ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
    let mut blocks: Vec<FieldPath> = Vec::new();
    let mut partitions: Vec<PartitionId> = Vec::new();
    for (rule, entry) in ctx.block_rules.iter() {
        let Some(block) = &entry.block else {
            continue;
        };
        blocks.push((rule.class.clone(), block.clone()));
        if rule.classify() == RuleClass::PartitionBlock {
            if let Some(part) = rule.used_part() {
                if !partitions.contains(&part.partition) {
                    partitions.push(part.partition);
                }
            }
        }
    }

    for (class, block) in &blocks {
        let entity = ctx.schema.entity_mut_or_err(class)?;
        entity.move_block_to_tail(block);
        entity.sort_block_by_var_key(block);
    }

    partitions.sort_by(|a, b| compare_partitions(*a, *b, ctx.space));
    for id in partitions {
        let partition = ctx.space.partition(id);
        let class = partition.parent_class.clone();
        let (field, block) = (partition.partition_field.clone(), partition.table_partition_block.clone());
        let entity = ctx.schema.entity_mut_or_err(&class)?;
        if let Some(field) = field {
            entity.move_field_to_tail(&field);
        }
        if let Some(block) = block {
            entity.move_block_to_tail(&block);
            entity.sort_block_by_var_key(&block);
        }
    }
    Ok(())
}
