use super::naming::resolve_selection_part;
use super::partition::{BuiltDimension, DimensionOrigin, PartitionId, PartitionSpace};
use super::rule::{ConstructedRule, PartRef, RuleOperand};
use crate::error::BuildError;
use crate::formula::{Formula, Operand};
use crate::selection::SelectionPart;
use crate::{Kind, MAX_VALUE, MISSING};
use std::collections::BTreeMap;

/// Formula of a rule: fields become references, nested rules nested formulas
/// and parts their selection criterion.
pub fn materialize_formula(rule: &ConstructedRule, space: &PartitionSpace) -> Result<Formula, BuildError> {
    let operands = rule
        .operands
        .iter()
        .map(|operand| match operand {
            RuleOperand::Field(field) => Ok(Operand::field(&field.name)),
            RuleOperand::Rule(inner) => materialize_formula(inner, space).map(Operand::Formula),
            RuleOperand::Part(part) => part_selection_formula(part, space).map(Operand::Formula),
        })
        .collect::<Result<Vec<_>, BuildError>>()?;
    Ok(rule.template.formula(operands))
}

// --- Part selection -----------------------------------------------------------

/// Boolean criterion selecting the records of one part; `And(...)` when the
/// partition has several dimensions.
pub fn part_selection_formula(part: &PartRef, space: &PartitionSpace) -> Result<Formula, BuildError> {
    let mut criteria = Vec::with_capacity(part.indexes.len());
    for axis in 0..part.indexes.len() {
        let (dimension, selection) = resolve_selection_part(part, axis, space)?;
        let operand = match &dimension.origin {
            DimensionOrigin::Field(field) => Operand::field(&field.name),
            DimensionOrigin::Rule(rule) => match &dimension.selection_field {
                Some(name) => Operand::field(name),
                None => Operand::Formula(materialize_formula(rule, space)?),
            },
        };
        criteria.push(criterion(operand, dimension.kind(), selection)?);
    }

    if criteria.len() == 1 {
        Ok(criteria.remove(0))
    } else {
        Ok(Formula::with_operands("And", criteria.into_iter().map(Operand::Formula).collect()))
    }
}

fn criterion(operand: Operand, kind: Kind, selection: &SelectionPart) -> Result<Formula, BuildError> {
    match (kind, selection) {
        (Kind::Symbol, SelectionPart::Value { value, outside, .. }) => {
            if outside.is_empty() {
                Ok(Formula::new("EQc").operand(operand).symbol(value.as_str()))
            } else {
                let group = Formula::with_operands("ValueGroup", outside.iter().map(Operand::symbol).collect());
                Ok(Formula::new("Not").nested(Formula::new("InGroup").nested(group).operand(operand)))
            }
        }
        (Kind::Continuous, SelectionPart::Interval { lower, upper, index }) => {
            let (lower, upper) = (*lower, *upper);
            let formula = if upper == MISSING {
                Formula::new("EQ").operand(operand).continuous(MISSING)
            } else if lower == MISSING && upper == MAX_VALUE {
                Formula::new("NEQ").operand(operand).continuous(MISSING)
            } else if upper == MAX_VALUE {
                Formula::new("G").operand(operand).continuous(lower)
            } else if lower == MISSING && *index == 0 {
                Formula::new("LE").operand(operand).continuous(upper)
            } else {
                let bounds = Formula::new("IntervalBounds").continuous(lower).continuous(upper);
                Formula::new("InInterval").nested(bounds).operand(operand)
            };
            Ok(formula)
        }
        (kind, _) => Err(BuildError::Contract(format!("selection part does not match a {} dimension", kind.label()))),
    }
}

// --- Partition descriptor ---------------------------------------------------

/// Descriptor of a whole partition: one `IntervalBounds` or `ValueGroups`
/// operand per dimension. Records, per dimension, how analysed partile
/// indexes map to the cells of the descriptor, for [`compute_var_key`].
pub fn partition_formula(partition: PartitionId, space: &mut PartitionSpace) -> Result<Formula, BuildError> {
    let mut operands = Vec::new();
    let mut built = Vec::new();
    for axis in 0..space.partition(partition).dimension_count() {
        let (dimension, granularity) = space.partition_dimension(partition, axis);
        let stats = dimension
            .stats
            .as_ref()
            .ok_or_else(|| BuildError::Contract("partition dimension was not analysed".to_string()))?;
        let index = stats
            .search_granularity_index(granularity)
            .ok_or_else(|| BuildError::Contract(format!("granularity {granularity} was not analysed")))?;

        let (formula, dimension_built) = match dimension.kind() {
            Kind::Continuous => interval_bounds(stats.parts_at(index)),
            Kind::Symbol => {
                let previous: Vec<&[SelectionPart]> = (0..index).map(|i| stats.parts_at(i)).collect();
                value_groups(stats.parts_at(index), &previous)
            }
            other => return Err(BuildError::Contract(format!("{} dimension", other.label()))),
        };
        operands.push(Operand::Formula(formula));
        built.push(dimension_built);
    }
    space.partition_mut(partition).built = built;
    Ok(Formula::with_operands("Partition", operands))
}

/// Intervals of one granularity need not be adjacent, so every distinct
/// bound is collected.
fn interval_bounds(parts: &[SelectionPart]) -> (Formula, BuiltDimension) {
    let mut bounds: Vec<f64> = Vec::new();
    let mut indexes = BTreeMap::new();
    let mut last = MISSING;
    for part in parts {
        let SelectionPart::Interval { lower, upper, index } = *part else {
            continue;
        };
        if upper == MISSING && bounds.is_empty() {
            bounds.push(MISSING);
        }
        // Missing is excluded from a later interval starting at missing.
        if index > 0 && lower == MISSING && bounds.is_empty() {
            bounds.push(MISSING);
        }
        if lower != last {
            last = lower;
            bounds.push(last);
        }
        if upper != last && upper != MAX_VALUE {
            last = upper;
            bounds.push(last);
        }
        let cell = if upper > last { bounds.len() } else { bounds.len().saturating_sub(1) };
        indexes.insert(index, cell);
    }

    let built = BuiltDimension { part_count: bounds.len() + 1, indexes };
    let formula = Formula::with_operands("IntervalBounds", bounds.into_iter().map(Operand::continuous).collect());
    (formula, built)
}

/// One singleton group per value, the garbage group (last) also catching
/// `*`, plus a group gathering the singletons of coarser granularities.
fn value_groups(parts: &[SelectionPart], previous: &[&[SelectionPart]]) -> (Formula, BuiltDimension) {
    let mut groups = Vec::with_capacity(parts.len() + 1);
    let mut indexes = BTreeMap::new();
    for (cell, part) in parts.iter().enumerate() {
        let SelectionPart::Value { value, index, .. } = part else {
            continue;
        };
        let mut group = Formula::new("ValueGroup").symbol(value.as_str());
        if cell + 1 == parts.len() {
            group = group.symbol("*");
        }
        groups.push(Operand::Formula(group));
        indexes.insert(*index, cell);
    }

    if !previous.is_empty() {
        let values: Vec<Operand> = previous
            .iter()
            .flat_map(|parts| parts.iter())
            .filter(|part| !part.is_garbage())
            .filter_map(|part| match part {
                SelectionPart::Value { value, .. } => Some(Operand::symbol(value.as_str())),
                SelectionPart::Interval { .. } => None,
            })
            .collect();
        groups.push(Operand::Formula(Formula::with_operands("ValueGroup", values)));
    }

    let built = BuiltDimension { part_count: groups.len(), indexes };
    (Formula::with_operands("ValueGroups", groups), built)
}

/// `TablePartition(table, partition field, selection fields...)`
pub fn table_partition_formula(partition: PartitionId, space: &PartitionSpace) -> Result<Formula, BuildError> {
    let entry = space.partition(partition);
    let partition_field = entry
        .partition_field
        .as_ref()
        .ok_or_else(|| BuildError::Contract(format!("partition of {} has no descriptor field", entry.table.name)))?;
    let mut formula = Formula::new("TablePartition").field(&entry.table.name).field(partition_field);
    for d in &entry.dimensions {
        let dimension = space.dimension(d.dimension);
        let field = dimension
            .selection_field
            .as_ref()
            .ok_or_else(|| BuildError::Contract("partition dimension has no selection field".to_string()))?;
        formula = formula.field(field);
    }
    Ok(formula)
}

// --- VarKeys ----------------------------------------------------------------

/// Key of a part inside the table-partition block: one plus the row-major
/// cell number, first dimension varying fastest.
pub fn compute_var_key(part: &PartRef, space: &PartitionSpace) -> Result<u64, BuildError> {
    let entry = space.partition(part.partition);
    if entry.built.len() != part.indexes.len() || entry.built.iter().any(|b| b.part_count == 0) {
        return Err(BuildError::Contract(format!("partition of {} has no built descriptor", entry.table.name)));
    }
    let mut key = 0u64;
    let mut factor = 1u64;
    for (built, index) in entry.built.iter().zip(&part.indexes) {
        let cell = built
            .indexes
            .get(index)
            .ok_or_else(|| BuildError::Contract(format!("partile {index} has no built cell")))?;
        key += factor * *cell as u64;
        factor *= built.part_count as u64;
    }
    Ok(key + 1)
}

/// Partile indexes of the part stored under `var_key`.
pub fn decode_var_key(partition: PartitionId, var_key: u64, space: &PartitionSpace) -> Result<Vec<usize>, BuildError> {
    let entry = space.partition(partition);
    if var_key == 0 || entry.built.iter().any(|b| b.part_count == 0) {
        return Err(BuildError::Contract(format!("VarKey {var_key} cannot be decoded")));
    }
    let mut rest = var_key - 1;
    let mut indexes = Vec::with_capacity(entry.built.len());
    for built in &entry.built {
        let count = built.part_count as u64;
        let cell = (rest % count) as usize;
        rest /= count;
        let index = built
            .indexes
            .iter()
            .find(|(_, c)| **c == cell)
            .map(|(index, _)| *index)
            .ok_or_else(|| BuildError::Contract(format!("VarKey {var_key} names no analysed part")))?;
        indexes.push(index);
    }
    if rest != 0 {
        return Err(BuildError::Contract(format!("VarKey {var_key} is out of range")));
    }
    Ok(indexes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{self, catalogue_rule};
    use crate::selection::OperandStats;
    use crate::{FieldRef, FieldType};

    #[test]
    fn rule_formulas_embed_part_criteria() {
        let fx = fixtures::customer_orders();
        let count = catalogue_rule("TableCount", "Customer").rule(fx.selection(&[1]));
        assert_eq!(
            materialize_formula(&count, &fx.space).unwrap().to_string(),
            "TableCount(TableSelection(Orders, InInterval(IntervalBounds(10, 25), amount)))"
        );
        assert_eq!(materialize_formula(&fx.sum_amount(), &fx.space).unwrap().to_string(), "TableSum(Orders, amount)");
    }

    #[test]
    fn continuous_criteria_by_interval_shape() {
        let fx = fixtures::customer_orders();
        let text = |indexes: &[usize]| part_selection_formula(&fx.part(indexes), &fx.space).unwrap().to_string();
        assert_eq!(text(&[0]), "LE(amount, 10)");
        assert_eq!(text(&[3]), "G(amount, 25)");

        let missing = criterion(
            Operand::field("x"),
            Kind::Continuous,
            &SelectionPart::Interval { lower: MISSING, upper: MISSING, index: 0 },
        )
        .unwrap();
        assert_eq!(missing.to_string(), "EQ(x, #Missing)");
        let present = criterion(
            Operand::field("x"),
            Kind::Continuous,
            &SelectionPart::Interval { lower: MISSING, upper: MAX_VALUE, index: 1 },
        )
        .unwrap();
        assert_eq!(present.to_string(), "NEQ(x, #Missing)");
    }

    #[test]
    fn symbol_criteria() {
        let value = SelectionPart::Value { value: "web".into(), index: 0, outside: vec![] };
        assert_eq!(criterion(Operand::field("c"), Kind::Symbol, &value).unwrap().to_string(), r#"EQc(c, "web")"#);
        let garbage =
            SelectionPart::Value { value: "fax".into(), index: 1, outside: vec!["web".into(), "store".into()] };
        assert_eq!(
            criterion(Operand::field("c"), Kind::Symbol, &garbage).unwrap().to_string(),
            r#"Not(InGroup(ValueGroup("web", "store"), c))"#
        );
        assert!(criterion(Operand::field("c"), Kind::Continuous, &value).is_err());
    }

    #[test]
    fn two_dimensions_are_joined() {
        let mut fx = fixtures::customer_orders();
        let channel = fx.space.add_field_dimension("Orders", FieldRef::new("channel", FieldType::Symbol)).unwrap();
        fx.space.dimension_mut(channel).stats = Some(OperandStats::from_parts(
            vec![2],
            vec![vec![
                SelectionPart::Value { value: "web".into(), index: 0, outside: vec![] },
                SelectionPart::Value { value: "store".into(), index: 1, outside: vec!["web".into()] },
            ]],
        ));
        let table = FieldRef::new("Orders", FieldType::ObjectArray("Orders".into()));
        let id = fx.space.add_partition("Customer", table, &[(fx.amount_dimension, 2), (channel, 2)]).unwrap();
        let part = fx.space.add_part(id, vec![1, 0], 0.0).unwrap();
        assert_eq!(
            part_selection_formula(&part, &fx.space).unwrap().to_string(),
            r#"And(G(amount, 25), EQc(channel, "web"))"#
        );

        assert_eq!(
            partition_formula(id, &mut fx.space).unwrap().to_string(),
            r#"Partition(IntervalBounds(25), ValueGroups(ValueGroup("web"), ValueGroup("store", "*")))"#
        );
        // 2 intervals on the first axis: cell (1, 0) is 1 + 1.
        assert_eq!(compute_var_key(&part, &fx.space).unwrap(), 2);
        let other = fx.space.add_part(id, vec![0, 1], 0.0).unwrap();
        assert_eq!(compute_var_key(&other, &fx.space).unwrap(), 3);
        assert_eq!(decode_var_key(id, 3, &fx.space).unwrap(), vec![0, 1]);
    }

    #[test]
    fn partition_descriptor_maps_sparse_indexes() {
        let mut fx = fixtures::customer_orders();
        let formula = partition_formula(fx.partition, &mut fx.space).unwrap();
        assert_eq!(formula.to_string(), "Partition(IntervalBounds(10, 25))");

        let keys: Vec<u64> =
            [0, 1, 3].iter().map(|&i| compute_var_key(&fx.part(&[i]), &fx.space).unwrap()).collect();
        assert_eq!(keys, vec![1, 2, 3]);
        for (key, index) in keys.iter().zip([0, 1, 3]) {
            assert_eq!(decode_var_key(fx.partition, *key, &fx.space).unwrap(), vec![index]);
        }
        assert!(decode_var_key(fx.partition, 4, &fx.space).is_err());
    }

    #[test]
    fn var_keys_need_a_built_descriptor() {
        let fx = fixtures::customer_orders();
        assert!(matches!(compute_var_key(&fx.part(&[0]), &fx.space), Err(BuildError::Contract(_))));
    }

    #[test]
    fn symbol_descriptor_catches_coarser_singletons() {
        let parts_g2 = vec![
            SelectionPart::Value { value: "web".into(), index: 0, outside: vec![] },
            SelectionPart::Value { value: "store".into(), index: 1, outside: vec!["web".into()] },
        ];
        let parts_g4 = vec![
            SelectionPart::Value { value: "store".into(), index: 1, outside: vec![] },
            SelectionPart::Value { value: "fax".into(), index: 3, outside: vec!["web".into(), "store".into()] },
        ];
        let (formula, built) = value_groups(&parts_g4, &[&parts_g2]);
        assert_eq!(
            formula.to_string(),
            r#"ValueGroups(ValueGroup("store"), ValueGroup("fax", "*"), ValueGroup("web"))"#
        );
        assert_eq!(built.part_count, 3);
        assert_eq!(built.indexes.get(&3), Some(&1));
    }

    #[test]
    fn table_partition_formula_needs_fields() {
        let mut fx = fixtures::customer_orders();
        assert!(table_partition_formula(fx.partition, &fx.space).is_err());
        fx.space.partition_mut(fx.partition).partition_field = Some("P".into());
        fx.space.dimension_mut(fx.amount_dimension).selection_field = Some("amount".into());
        assert_eq!(
            table_partition_formula(fx.partition, &fx.space).unwrap().to_string(),
            "TablePartition(Orders, P, amount)"
        );
    }
}
