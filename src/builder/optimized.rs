use super::ledger::{collect_block_rules, collect_used_rules};
use super::{BuildContext, BuilderMode, FieldPath, selection, sparse};
use crate::error::BuildError;
use crate::formula::{Formula, Operand};
use crate::model::{ConstructedRule, RuleOperand, compare_cost_name, part_selection_formula};
use crate::schema::Field;
use log::debug;

/// Field realizing `rule` in ledger mode: every rule operand is realized
/// first by its own field, and the rule's formula references them.
pub(crate) fn create_ledger_field(ctx: &mut BuildContext<'_>, rule: &ConstructedRule) -> Result<String, BuildError> {
    if let Some(field) = ledger_field(ctx, rule) {
        return Ok(field);
    }
    let mut operands = Vec::with_capacity(rule.operand_count());
    for operand in &rule.operands {
        operands.push(match operand {
            RuleOperand::Field(field) => Operand::field(&field.name),
            RuleOperand::Rule(inner) => Operand::field(create_ledger_field(ctx, inner)?),
            RuleOperand::Part(part) => Operand::Formula(part_selection_formula(part, ctx.space)?),
        });
    }
    create_formula_field(ctx, rule, rule.template.formula(operands))
}

pub(crate) fn ledger_field(ctx: &BuildContext<'_>, rule: &ConstructedRule) -> Option<String> {
    ctx.used_rules.get(rule, ctx.space).and_then(|entry| entry.field.clone())
}

/// Existing field computing `formula` in the rule's class, or a new unused
/// one. Either way the ledger entry of `rule` records it.
pub(crate) fn create_formula_field(
    ctx: &mut BuildContext<'_>,
    rule: &ConstructedRule,
    formula: Formula,
) -> Result<String, BuildError> {
    let class = rule.class.as_str();
    let existing = ctx.compliance.class_mut_or_err(class)?.lookup_formula(&formula).map(str::to_string);
    let name = match existing {
        Some(name) => {
            ctx.reused += 1;
            name
        }
        None => {
            let prefix = ctx.names.rule_name(rule, false, ctx.space)?;
            let name = ctx.unique_name(class, &prefix)?;
            ctx.insert_derived(class, Field::derived(name, rule.result_type()?, formula))?
        }
    };
    ctx.used_rules.entry(rule, ctx.space).field = Some(name.clone());
    Ok(name)
}

/// Whether a candidate goes through the sparse path: a block rule whose
/// partition actually has at least `sparse_block_min_size` cells.
fn takes_sparse_path(ctx: &BuildContext<'_>, rule: &ConstructedRule) -> bool {
    if !ctx.block_rules.contains(rule, ctx.space) {
        return false;
    }
    let min = ctx.options.sparse_block_min_size;
    if min == 0 {
        return true;
    }
    rule.used_part()
        .and_then(|part| ctx.space.actual_partition_size(part.partition))
        .is_some_and(|size| size >= min)
}

/// Ledger-based build. Use counts are recomputed from `rules`, used
/// dimensions get their selection fields, then every candidate is realized.
pub(crate) fn build(
    ctx: &mut BuildContext<'_>,
    rules: &[ConstructedRule],
    mode: BuilderMode,
) -> Result<Vec<FieldPath>, BuildError> {
    ctx.space.reset_use_counts();
    for rule in rules {
        rule.increment_use_counts(ctx.space);
    }
    selection::build_selection_fields(ctx)?;

    for rule in rules {
        collect_used_rules(ctx, rule);
        if mode == BuilderMode::Sparse {
            collect_block_rules(ctx, rule);
        }
    }
    debug!("ledgers: {} used rules, {} block rules", ctx.used_rules.len(), ctx.block_rules.len());

    let mut created: Vec<(&ConstructedRule, String)> = Vec::new();
    for rule in rules {
        ctx.check_interrupt()?;
        if ctx.options.max_constructed_fields.is_some_and(|max| created.len() >= max) {
            debug!("field cap reached after {} candidates", created.len());
            break;
        }
        let known = ledger_field(ctx, rule);
        let name = if mode == BuilderMode::Sparse && takes_sparse_path(ctx, rule) {
            sparse::create_sparse_field(ctx, rule)?
        } else {
            create_ledger_field(ctx, rule)?
        };
        let is_new = known.is_none() && ctx.is_created(&rule.class, &name);
        if is_new && !created.iter().any(|(r, n)| *n == name && r.class == rule.class) {
            created.push((rule, name));
        } else {
            ctx.mark_candidate(&rule.class, &name, rule.cost)?;
        }
    }

    created.sort_by(|(a, _), (b, _)| compare_cost_name(a, b, ctx.space));
    let mut new_fields = Vec::with_capacity(created.len());
    for (rule, name) in created {
        ctx.mark_candidate(&rule.class, &name, rule.cost)?;
        new_fields.push((rule.class.clone(), name));
    }
    Ok(new_fields)
}
