use crate::api::Options;
use crate::schema::{COST_META_KEY, Schema};

/// Final cost of every field, mirrored under the `Cost` meta key.
///
/// With construction regularization, fields carrying a cost keep it and the
/// used simple native fields other than the target get `selection_cost`.
/// Without it every cost is zero and no meta key is written.
pub(crate) fn annotate(schema: &mut Schema, options: &Options) {
    let main = schema.main().map(|e| e.name.clone());
    for entity in &mut schema.entities {
        let is_main = main.as_deref() == Some(entity.name.as_str());
        for field in &mut entity.fields {
            field.meta.remove(COST_META_KEY);
            if !options.construction_regularization {
                field.cost = 0.0;
                continue;
            }
            let is_target = is_main && options.target_field.as_deref() == Some(field.name.as_str());
            let is_native = !field.is_derived() && field.block.is_none();
            if field.cost <= 0.0 {
                if !(field.is_used() && field.field_type.is_simple() && is_native && !is_target) {
                    field.cost = 0.0;
                    continue;
                }
                field.cost = options.selection_cost;
            }
            field.meta.insert(COST_META_KEY.to_string(), field.cost);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldType;
    use crate::formula::Formula;
    use crate::schema::{EntityType, Field};

    fn schema() -> Schema {
        let mut sum = Field::derived("total", FieldType::Continuous, Formula::new("TableSum").field("Orders"));
        sum.set_used(true);
        sum.cost = 2.5;
        let mut unused = Field::native("note", FieldType::Symbol);
        unused.set_used(false);
        Schema::new(vec![EntityType::new("Customer")
            .with_field(Field::native("age", FieldType::Continuous))
            .with_field(Field::native("churn", FieldType::Symbol))
            .with_field(Field::native("Orders", FieldType::ObjectArray("Customer".into())))
            .with_field(unused)
            .with_field(sum)])
    }

    fn costs(schema: &Schema) -> Vec<(f64, Option<f64>)> {
        schema.entities[0].fields.iter().map(|f| (f.cost, f.meta.get(COST_META_KEY).copied())).collect()
    }

    #[test]
    fn regularization_costs_used_simple_natives() {
        let mut schema = schema();
        let options = Options { selection_cost: 0.5, target_field: Some("churn".into()), ..Options::default() };
        annotate(&mut schema, &options);
        assert_eq!(
            costs(&schema),
            vec![(0.5, Some(0.5)), (0.0, None), (0.0, None), (0.0, None), (2.5, Some(2.5))]
        );
    }

    #[test]
    fn no_regularization_zeroes_everything() {
        let mut schema = schema();
        annotate(&mut schema, &Options { construction_regularization: false, ..Options::default() });
        assert!(costs(&schema).iter().all(|(cost, meta)| *cost == 0.0 && meta.is_none()));
    }
}
