use super::{BuildContext, FieldPath};
use crate::error::BuildError;
use crate::model::{ConstructedRule, compare_cost_name, materialize_formula};
use crate::schema::Field;
use log::debug;

/// Field computing the whole formula of `rule`, reusing an existing field
/// with the same formula.
pub(crate) fn create_direct_field(ctx: &mut BuildContext<'_>, rule: &ConstructedRule) -> Result<String, BuildError> {
    let class = rule.class.as_str();
    if let Some(existing) = ctx.compliance.class_mut_or_err(class)?.lookup_constructed(rule, ctx.space)? {
        ctx.reused += 1;
        return Ok(existing);
    }
    let formula = materialize_formula(rule, ctx.space)?;
    // Distinct rules can share a formula once every field is matched.
    if let Some(existing) = ctx.compliance.class_mut_or_err(class)?.lookup_formula(&formula) {
        ctx.reused += 1;
        return Ok(existing.to_string());
    }

    let prefix = ctx.names.rule_name(rule, false, ctx.space)?;
    let name = ctx.unique_name(class, &prefix)?;
    ctx.insert_derived(class, Field::derived(name, rule.result_type()?, formula))
}

/// One field per candidate, until `max_constructed_fields` new fields exist.
/// Returns the new candidate fields sorted by rule cost.
pub(crate) fn build(ctx: &mut BuildContext<'_>, rules: &[ConstructedRule]) -> Result<Vec<FieldPath>, BuildError> {
    let mut created: Vec<(&ConstructedRule, String)> = Vec::new();
    for rule in rules {
        ctx.check_interrupt()?;
        if ctx.options.max_constructed_fields.is_some_and(|max| created.len() >= max) {
            debug!("field cap reached after {} candidates", created.len());
            break;
        }
        let name = create_direct_field(ctx, rule)?;
        if ctx.is_created(&rule.class, &name) {
            if !created.iter().any(|(r, n)| *n == name && r.class == rule.class) {
                created.push((rule, name));
            }
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
