use super::ledger::collect_used_rules;
use super::optimized::create_ledger_field;
use super::standard::create_direct_field;
use super::{BuildContext, reorder};
use crate::error::BuildError;
use crate::model::{DimensionId, DimensionOrigin};
use log::debug;
use std::collections::BTreeSet;

/// Bind every used dimension to a field of the working schema: field
/// dimensions to their field, rule dimensions to a field created for the
/// rule (a ledger field under rule optimization).
pub(crate) fn build_selection_fields(ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
    let used: Vec<DimensionId> =
        ctx.space.dimensions().filter(|(_, d)| d.use_count > 0).map(|(id, _)| id).collect();
    let first_created = ctx.created_fields.len();

    for id in used {
        ctx.check_interrupt()?;
        let field = match ctx.space.dimension(id).origin.clone() {
            DimensionOrigin::Field(field) => field.name,
            DimensionOrigin::Rule(rule) => {
                if ctx.options.rule_optimization {
                    collect_used_rules(ctx, &rule);
                    create_ledger_field(ctx, &rule)?
                } else {
                    create_direct_field(ctx, &rule)?
                }
            }
        };
        ctx.space.dimension_mut(id).selection_field = Some(field);
    }

    let created = ctx.created_fields[first_created..].to_vec();
    if !created.is_empty() {
        debug!("{} selection fields created", created.len());
    }
    reorder::reorder_fields(ctx, &created)
}

/// Turn the working schema into the reduced schema to sample.
///
/// Classes holding a used dimension are analysed; a class is loaded when it
/// is analysed or reaches a loaded class through a used relation. Only the
/// relations between loaded classes and the selection fields stay used.
/// Derived fields nothing needs are removed.
pub(crate) fn reduce(ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
    let mut loaded: BTreeSet<String> = BTreeSet::new();
    let mut selection_fields: BTreeSet<(String, String)> = BTreeSet::new();
    for (_, dimension) in ctx.space.dimensions().filter(|(_, d)| d.use_count > 0) {
        if let Some(field) = &dimension.selection_field {
            loaded.insert(dimension.class.clone());
            selection_fields.insert((dimension.class.clone(), field.clone()));
        }
    }

    loop {
        let reaching: Vec<String> = ctx
            .schema
            .entities
            .iter()
            .filter(|entity| !loaded.contains(&entity.name))
            .filter(|entity| {
                entity.fields.iter().any(|f| {
                    f.is_used() && f.field_type.class_name().is_some_and(|class| loaded.contains(class))
                })
            })
            .map(|entity| entity.name.clone())
            .collect();
        if reaching.is_empty() {
            break;
        }
        loaded.extend(reaching);
    }

    let mut relations: BTreeSet<(String, String)> = BTreeSet::new();
    for entity in ctx.schema.entities.iter().filter(|e| loaded.contains(&e.name)) {
        for field in &entity.fields {
            if field.is_used() && field.field_type.class_name().is_some_and(|class| loaded.contains(class)) {
                relations.insert((entity.name.clone(), field.name.clone()));
            }
        }
    }

    for entity in &mut ctx.schema.entities {
        for field in &mut entity.fields {
            let key = (entity.name.clone(), field.name.clone());
            let keep = relations.contains(&key) || selection_fields.contains(&key);
            field.set_used(keep);
            if keep {
                field.set_loaded(true);
            }
        }
    }

    remove_unneeded_derived(ctx);
    debug!(
        "reduced schema: {} loaded classes, {} relations, {} selection fields",
        loaded.len(),
        relations.len(),
        selection_fields.len()
    );
    Ok(())
}

/// Drop unused derived fields and block members not referenced, directly or
/// through other kept formulas, by a used field.
fn remove_unneeded_derived(ctx: &mut BuildContext<'_>) {
    let mut needed: BTreeSet<String> = BTreeSet::new();
    let mut pending: Vec<String> = Vec::new();
    for entity in &ctx.schema.entities {
        for field in entity.fields.iter().filter(|f| f.is_used()) {
            pending.push(field.name.clone());
        }
    }
    // Field references are resolved by name across classes.
    while let Some(name) = pending.pop() {
        if !needed.insert(name.clone()) {
            continue;
        }
        for entity in &ctx.schema.entities {
            if let Some(formula) = entity.field(&name).and_then(|f| f.formula.as_ref()) {
                pending.extend(formula.field_refs().into_iter().map(str::to_string));
            }
            if let Some(block) = entity.block(&name) {
                pending.extend(block.formula.field_refs().into_iter().map(str::to_string));
            }
            if let Some(block) = entity.field(&name).and_then(|f| f.block.as_ref()) {
                pending.push(block.clone());
            }
        }
    }

    for entity in &mut ctx.schema.entities {
        entity.fields.retain(|f| f.is_used() || !(f.is_derived() || f.block.is_some()) || needed.contains(&f.name));
        let members: BTreeSet<String> = entity.fields.iter().filter_map(|f| f.block.clone()).collect();
        entity.blocks.retain(|b| members.contains(&b.name));
    }
}
