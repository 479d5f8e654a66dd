use super::*;
use crate::model::{FieldRef, PartRef, PartitionId, RuleClass, compute_var_key, decode_var_key};
use crate::model::fixtures::{self, Fixture, catalogue_rule};
use crate::schema::{COST_META_KEY, EntityType};
use crate::selection::MemorySampler;
use crate::template::DefaultCatalogue;
use crate::{BuildRequest, FieldType, Formula, build_schema_default};
use std::collections::BTreeSet;

fn build(fx: &mut Fixture, options: &Options, rules: &[ConstructedRule]) -> BuildOutput {
    let _ = env_logger::builder().is_test(true).try_init();
    ClassBuilder::new(&DefaultCatalogue, options, Interrupt::new()).build(&fx.schema, &mut fx.space, rules).unwrap()
}

fn standard() -> Options {
    Options { rule_optimization: false, ..Options::default() }
}

fn sparse() -> Options {
    Options { sparse_optimization: true, sparse_block_min_size: 0, ..Options::default() }
}

fn selected_counts(fx: &Fixture) -> Vec<ConstructedRule> {
    [0, 1, 3]
        .into_iter()
        .map(|index| catalogue_rule("TableCount", "Customer").rule(fx.selection(&[index])).with_cost(1.0))
        .collect()
}

fn names(entity: &EntityType) -> Vec<&str> {
    entity.fields.iter().map(|f| f.name.as_str()).collect()
}

fn used_derived(schema: &Schema, class: &str) -> BTreeSet<String> {
    schema
        .entity(class)
        .unwrap()
        .fields
        .iter()
        .filter(|f| f.is_used() && (f.is_derived() || f.block.is_some()))
        .map(|f| f.name.clone())
        .collect()
}

// --- Strategies -------------------------------------------------------------

#[test]
fn standard_build_appends_candidates_by_cost() {
    let table = FieldType::ObjectArray("Orders".into());
    let schema = Schema::new(vec![
        EntityType::new("Customer")
            .with_field(Field::native("id", FieldType::Symbol))
            .with_field(Field::native("birthdate", FieldType::Date))
            .with_field(Field::native("Orders", table.clone())),
        EntityType::new("Orders").with_field(Field::native("amount", FieldType::Continuous)),
    ]);
    let sum = catalogue_rule("TableSum", "Customer")
        .field("Orders", table.clone())
        .field("amount", FieldType::Continuous)
        .with_cost(2.0);
    let count = catalogue_rule("TableCount", "Customer").field("Orders", table).with_cost(1.0);
    let request = BuildRequest { schema, space: PartitionSpace::new(), rules: vec![sum, count] };

    let out = build_schema_default(request, &MemorySampler::new(0), &standard()).unwrap();
    let customer = out.schema.entity("Customer").unwrap();
    assert_eq!(names(customer), vec!["id", "birthdate", "Orders", "Count(Orders)", "Sum(Orders.amount)"]);

    let count = customer.field("Count(Orders)").unwrap();
    assert!(count.is_used());
    assert_eq!(count.cost, 1.0);
    assert_eq!(count.meta.get(COST_META_KEY), Some(&1.0));
    assert_eq!(count.formula, Some(Formula::new("TableCount").field("Orders")));
    let sum = customer.field("Sum(Orders.amount)").unwrap();
    assert!(sum.is_used());
    assert_eq!(sum.cost, 2.0);

    assert_eq!(customer.field("id").unwrap().cost, 1.0);
    assert_eq!(customer.field("Orders").unwrap().cost, 0.0);
    assert_eq!(out.created_fields.len(), 2);
}

#[test]
fn optimized_build_shares_selections() {
    let mut fx = fixtures::customer_orders();
    let count = catalogue_rule("TableCount", "Customer").rule(fx.selection(&[1])).with_cost(1.0);
    let sum = catalogue_rule("TableSum", "Customer")
        .rule(fx.selection(&[1]))
        .field("amount", FieldType::Continuous)
        .with_cost(2.0);
    let out = build(&mut fx, &Options::default(), &[count, sum]);

    let customer = out.schema.entity("Customer").unwrap();
    let selection = "Orders where amount in ]10, 25]";
    assert_eq!(
        names(customer)[4..],
        [
            "Count(Orders) where amount in ]10, 25]",
            "Sum(Orders.amount) where amount in ]10, 25]",
            selection
        ]
    );
    let selections = customer
        .fields
        .iter()
        .filter(|f| f.formula.as_ref().is_some_and(|formula| formula.name == "TableSelection"))
        .count();
    assert_eq!(selections, 1);
    assert!(!customer.field(selection).unwrap().is_used());

    let count = customer.field("Count(Orders) where amount in ]10, 25]").unwrap();
    assert_eq!(count.formula, Some(Formula::new("TableCount").field(selection)));
    assert_eq!(out.created_fields.len(), 3);
    // The second candidate finds the selection through the ledger, not the registry.
    assert_eq!(out.metrics.fields_reused, 0);
}

#[test]
fn sparse_build_groups_parts_into_blocks() {
    let mut fx = fixtures::customer_orders();
    let rules = selected_counts(&fx);
    let out = build(&mut fx, &sparse(), &rules);

    assert_eq!(out.created_blocks.len(), 2);
    let customer = out.schema.entity("Customer").unwrap();
    let partition = customer.field("Partition(Orders) per amount(4)").unwrap();
    assert_eq!(partition.field_type, FieldType::Structure("Partition".into()));
    assert!(customer.block("TablePartition(Orders) per amount(4)").is_some());

    let block = customer.block("Count(Orders) per amount(4)").unwrap();
    assert_eq!(block.formula, Formula::new("TablePartitionCount").field("TablePartition(Orders) per amount(4)"));
    let members: Vec<&Field> = customer.block_members(&block.name).collect();
    assert_eq!(
        members.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
        vec![
            "Count(Orders) where amount <= 10",
            "Count(Orders) where amount in ]10, 25]",
            "Count(Orders) where amount > 25"
        ]
    );
    for (member, indexes) in members.iter().zip([[0], [1], [3]]) {
        assert!(member.is_used());
        let var_key = member.var_key.unwrap();
        assert_eq!(decode_var_key(fx.partition, var_key, &fx.space).unwrap(), indexes);
    }
}

#[test]
fn nested_candidates_share_one_field() {
    for reversed in [false, true] {
        let mut fx = fixtures::customer_orders();
        let date = catalogue_rule("GetDate", "Customer").field("signup", FieldType::Timestamp).with_cost(2.0);
        let year_day = catalogue_rule("YearDay", "Customer").rule(date.clone()).with_cost(1.0);
        let mut rules = vec![year_day, date];
        if reversed {
            rules.reverse();
        }
        let out = build(&mut fx, &Options::default(), &rules);

        let customer = out.schema.entity("Customer").unwrap();
        let formula = Formula::new("GetDate").field("signup");
        let dates: Vec<&Field> = customer.fields.iter().filter(|f| f.formula.as_ref() == Some(&formula)).collect();
        assert_eq!(dates.len(), 1);
        let date = dates[0];
        assert!(date.is_used());
        assert_eq!(date.cost, 2.0);

        let year_day = customer.field("signup.Date.YearDay").unwrap();
        assert!(year_day.is_used());
        assert_eq!(year_day.cost, 1.0);
        assert_eq!(year_day.formula, Some(Formula::new("YearDay").field(date.name.as_str())));
    }
}

fn items_table() -> FieldType {
    FieldType::ObjectArray("Items".into())
}

/// Orders holding items, the item quantities analysed like the order
/// amounts of the shared fixture: partiles 0, 1 and 3 at granularity 4.
fn order_items() -> (Schema, PartitionSpace, PartitionId) {
    let schema = Schema::new(vec![
        EntityType::new("Customer")
            .with_field(Field::native("id", FieldType::Symbol))
            .with_field(Field::native("Orders", fixtures::orders_table())),
        EntityType::new("Orders").with_field(Field::native("Items", items_table())),
        EntityType::new("Items").with_field(Field::native("qty", FieldType::Continuous)),
    ]);
    let mut space = PartitionSpace::new();
    let qty = space.add_field_dimension("Items", FieldRef::new("qty", FieldType::Continuous)).unwrap();
    space.dimension_mut(qty).stats = Some(fixtures::amount_stats());
    let partition = space.add_partition("Orders", FieldRef::new("Items", items_table()), &[(qty, 4)]).unwrap();
    for index in [0, 1, 3] {
        space.add_part(partition, vec![index], 1.0).unwrap();
    }
    (schema, space, partition)
}

#[test]
fn value_blocks_are_keyed_like_their_upstream_block() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (schema, mut space, partition) = order_items();
    let costs = [1.0, 2.0, 3.0];
    let parts: Vec<PartRef> = [0, 1, 3].into_iter().map(|index| PartRef { partition, indexes: vec![index] }).collect();
    let rules: Vec<ConstructedRule> = parts
        .iter()
        .zip(costs)
        .map(|(part, cost)| {
            let selection = catalogue_rule("TableSelection", "Orders").field("Items", items_table()).part(part.clone());
            let count = catalogue_rule("TableCount", "Orders").rule(selection);
            catalogue_rule("TableSum", "Customer").field("Orders", fixtures::orders_table()).rule(count).with_cost(cost)
        })
        .collect();
    assert!(rules.iter().all(|rule| rule.classify() == RuleClass::ValueBlock));

    let options = sparse();
    let builder = ClassBuilder::new(&DefaultCatalogue, &options, Interrupt::new());
    let out = builder.build(&schema, &mut space, &rules).unwrap();
    let customer = out.schema.entity("Customer").unwrap();
    let orders = out.schema.entity("Orders").unwrap();

    let counts = orders.blocks.iter().find(|b| b.formula.name == "TablePartitionCount").unwrap();
    assert!(orders.blocks.iter().any(|b| b.formula.name == "TablePartition"));
    assert_eq!(customer.blocks.len(), 1);
    let sums = &customer.blocks[0];
    assert_eq!(sums.formula, Formula::new("TableBlockSum").field("Orders").field(counts.name.as_str()));
    assert_eq!(customer.block_members(&sums.name).count(), 3);

    for (part, cost) in parts.iter().zip(costs) {
        let var_key = compute_var_key(part, &space).unwrap();
        let member = customer.block_member_by_key(&sums.name, var_key).unwrap();
        assert!(member.is_used());
        assert_eq!(member.cost, cost);
        assert_eq!(decode_var_key(partition, var_key, &space).unwrap(), part.indexes);

        assert!(orders.block_member_by_key(&counts.name, var_key).is_some());
    }
}

#[test]
fn small_partitions_stay_dense() {
    let mut fx = fixtures::customer_orders();
    let rules = selected_counts(&fx);
    let options = Options { sparse_block_min_size: 10, ..sparse() };
    let out = build(&mut fx, &options, &rules);
    assert!(out.created_blocks.is_empty());
    assert_eq!(out.created_fields.len(), 6);
}

#[test]
fn dense_and_sparse_use_the_same_candidates() {
    let mut dense_fx = fixtures::customer_orders();
    let rules = selected_counts(&dense_fx);
    let dense = build(&mut dense_fx, &Options::default(), &rules);

    let mut sparse_fx = fixtures::customer_orders();
    let blocks = build(&mut sparse_fx, &sparse(), &rules);

    let used = used_derived(&dense.schema, "Customer");
    assert_eq!(used.len(), 3);
    assert_eq!(used, used_derived(&blocks.schema, "Customer"));
}

// --- Properties -------------------------------------------------------------

#[test]
fn builds_are_deterministic() {
    let run = || {
        let fx = fixtures::customer_orders();
        let mut rules = selected_counts(&fx);
        rules.push(fx.sum_amount().with_cost(1.0));
        rules.push(fx.count().with_cost(1.0));
        let sampler = MemorySampler::new(16).with_continuous("Orders", "amount", (0..16).map(f64::from).collect());
        let request = BuildRequest { schema: fx.schema, space: fx.space, rules };
        build_schema_default(request, &sampler, &sparse()).unwrap()
    };
    let (a, b) = (run(), run());
    assert_eq!(a.schema, b.schema);
    assert_eq!(a.created_fields, b.created_fields);
    assert_eq!(a.created_blocks, b.created_blocks);
}

#[test]
fn formulas_are_never_duplicated() {
    for options in [standard(), Options::default(), sparse()] {
        let mut fx = fixtures::customer_orders();
        let mut rules = selected_counts(&fx);
        rules.push(fx.count().with_cost(2.0));
        rules.push(fx.sum_amount().with_cost(2.0));
        let out = build(&mut fx, &options, &rules);

        for entity in &out.schema.entities {
            let formulas: Vec<String> =
                entity.fields.iter().filter_map(|f| f.formula.as_ref()).map(ToString::to_string).collect();
            let distinct: BTreeSet<&String> = formulas.iter().collect();
            let mode = BuilderMode::from_options(&options).label();
            assert_eq!(distinct.len(), formulas.len(), "{} in {mode} mode", entity.name);
            let blocks: BTreeSet<String> = entity.blocks.iter().map(|b| b.formula.to_string()).collect();
            assert_eq!(blocks.len(), entity.blocks.len());
        }
    }
}

#[test]
fn existing_formulas_are_reused() {
    let mut fx = fixtures::customer_orders();
    let customer = fx.schema.entity_mut("Customer").unwrap();
    let formula = Formula::new("TableCount").field("Orders");
    customer.insert_field(Field::derived("nb_orders", FieldType::Continuous, formula));
    let rules = vec![fx.count().with_cost(1.5)];

    let first = build(&mut fx, &standard(), &rules);
    assert!(first.created_fields.is_empty());
    assert_eq!(first.metrics.fields_reused, 1);
    let reused = first.schema.entity("Customer").unwrap().field("nb_orders").unwrap();
    assert!(reused.is_used());
    assert_eq!(reused.cost, 1.5);
    assert_eq!(reused.meta.get(COST_META_KEY), Some(&1.5));

    fx.schema = first.schema.clone();
    let again = build(&mut fx, &Options::default(), &rules);
    assert!(again.created_fields.is_empty());
    assert_eq!(again.metrics.fields_reused, 1);
    assert_eq!(again.schema, first.schema);
}

#[test]
fn indexed_names_count_from_one() {
    let mut fx = fixtures::customer_orders();
    let rules = selected_counts(&fx);
    let options = Options { interpretable_names: false, ..sparse() };
    let out = build(&mut fx, &options, &rules);

    let mut numbers: Vec<usize> = out
        .created_fields
        .iter()
        .chain(&out.created_blocks)
        .map(|(_, name)| name.strip_prefix("ConstructedFeature").unwrap().parse().unwrap())
        .collect();
    numbers.sort();
    let expected: Vec<usize> = (1..=numbers.len()).collect();
    assert_eq!(numbers, expected);
    assert_eq!(numbers.len(), 9);
}

#[test]
fn field_cap_keeps_the_first_candidates() {
    let mut fx = fixtures::customer_orders();
    let rules = vec![fx.count().with_cost(1.0), fx.sum_amount().with_cost(2.0)];
    let options = Options { max_constructed_fields: Some(1), ..standard() };
    let out = build(&mut fx, &options, &rules);
    assert_eq!(out.created_fields, vec![("Customer".to_string(), "Count(Orders)".to_string())]);
}

#[test]
fn interruption_stops_the_build() {
    let mut fx = fixtures::customer_orders();
    let interrupt = Interrupt::new();
    interrupt.request();
    let options = Options::default();
    let builder = ClassBuilder::new(&DefaultCatalogue, &options, interrupt);
    let rules = [fx.count()];
    let err = builder.build(&fx.schema, &mut fx.space, &rules).unwrap_err();
    assert!(matches!(err, BuildError::Interrupted));
}

#[test]
fn sparse_needs_rule_optimization() {
    let options = Options { rule_optimization: false, ..sparse() };
    assert_eq!(BuilderMode::from_options(&options), BuilderMode::Standard);
    assert_eq!(BuilderMode::from_options(&sparse()), BuilderMode::Sparse);
    assert_eq!(BuilderMode::from_options(&Options::default()), BuilderMode::Optimized);
}

// --- Reduced schema ---------------------------------------------------------

#[test]
fn selection_schema_keeps_the_sampled_paths() {
    let mut fx = fixtures::customer_orders();
    catalogue_rule("TableCount", "Customer").rule(fx.selection(&[1])).increment_use_counts(&mut fx.space);
    let options = Options::default();
    let builder = ClassBuilder::new(&DefaultCatalogue, &options, Interrupt::new());
    let reduced = builder.build_selection_schema(&fx.schema, &mut fx.space).unwrap();

    let used: Vec<(String, String)> = reduced
        .entities
        .iter()
        .flat_map(|e| e.fields.iter().filter(|f| f.is_used()).map(|f| (e.name.clone(), f.name.clone())))
        .collect();
    assert_eq!(
        used,
        vec![("Customer".to_string(), "Orders".to_string()), ("Orders".to_string(), "amount".to_string())]
    );
    assert_eq!(fx.space.dimension(fx.amount_dimension).selection_field.as_deref(), Some("amount"));
}
