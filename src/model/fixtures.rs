use super::{ConstructedRule, DimensionId, FieldRef, PartRef, PartitionId, PartitionSpace};
use crate::schema::{EntityType, Field, Schema};
use crate::selection::{OperandStats, SelectionPart};
use crate::template::{DefaultCatalogue, TemplateCatalogue};
use crate::{FieldType, MAX_VALUE, MISSING};

/// Customers with a table of orders, the order amounts analysed at
/// granularities 2 and 4. At granularity 4 only partiles 0, 1 and 3 exist:
/// `]-inf, 10]`, `]10, 25]` and `]25, +inf[`.
pub(crate) struct Fixture {
    pub schema: Schema,
    pub space: PartitionSpace,
    pub amount_dimension: DimensionId,
    pub partition: PartitionId,
    pub coarse_partition: PartitionId,
}

impl Fixture {
    pub fn part(&self, indexes: &[usize]) -> PartRef {
        PartRef { partition: self.partition, indexes: indexes.to_vec() }
    }

    pub fn selection(&self, indexes: &[usize]) -> ConstructedRule {
        catalogue_rule("TableSelection", "Customer")
            .field("Orders", orders_table())
            .part(self.part(indexes))
    }

    pub fn sum_amount(&self) -> ConstructedRule {
        catalogue_rule("TableSum", "Customer").field("Orders", orders_table()).field("amount", FieldType::Continuous)
    }

    pub fn count(&self) -> ConstructedRule {
        catalogue_rule("TableCount", "Customer").field("Orders", orders_table())
    }
}

pub(crate) fn catalogue_rule(name: &str, class: &str) -> ConstructedRule {
    let template = DefaultCatalogue.lookup(name).unwrap_or_else(|| panic!("no template {name}"));
    ConstructedRule::new(template, class)
}

pub(crate) fn orders_table() -> FieldType {
    FieldType::ObjectArray("Orders".into())
}

pub(crate) fn amount_stats() -> OperandStats {
    OperandStats::from_parts(
        vec![2, 4],
        vec![
            vec![
                SelectionPart::Interval { lower: MISSING, upper: 25.0, index: 0 },
                SelectionPart::Interval { lower: 25.0, upper: MAX_VALUE, index: 1 },
            ],
            vec![
                SelectionPart::Interval { lower: MISSING, upper: 10.0, index: 0 },
                SelectionPart::Interval { lower: 10.0, upper: 25.0, index: 1 },
                SelectionPart::Interval { lower: 25.0, upper: MAX_VALUE, index: 3 },
            ],
        ],
    )
}

pub(crate) fn customer_orders_schema() -> Schema {
    Schema::new(vec![
        EntityType::new("Customer")
            .with_field(Field::native("id", FieldType::Symbol))
            .with_field(Field::native("birthdate", FieldType::Date))
            .with_field(Field::native("signup", FieldType::Timestamp))
            .with_field(Field::native("Orders", orders_table())),
        EntityType::new("Orders")
            .with_field(Field::native("amount", FieldType::Continuous))
            .with_field(Field::native("channel", FieldType::Symbol))
            .with_field(Field::native("Product", FieldType::Object("Product".into()))),
        EntityType::new("Product").with_field(Field::native("price", FieldType::Continuous)),
    ])
}

pub(crate) fn customer_orders() -> Fixture {
    let mut space = PartitionSpace::new();
    let amount_dimension = space
        .add_field_dimension("Orders", FieldRef::new("amount", FieldType::Continuous))
        .expect("amount dimension");
    space.dimension_mut(amount_dimension).stats = Some(amount_stats());

    let table = FieldRef::new("Orders", orders_table());
    let partition = space.add_partition("Customer", table.clone(), &[(amount_dimension, 4)]).expect("partition");
    for (index, cost) in [(0, 1.0), (1, 1.5), (3, 2.0)] {
        space.add_part(partition, vec![index], cost).expect("part");
    }
    let coarse_partition = space.add_partition("Customer", table, &[(amount_dimension, 2)]).expect("coarse");
    for index in [0, 1] {
        space.add_part(coarse_partition, vec![index], 1.0).expect("part");
    }

    Fixture { schema: customer_orders_schema(), space, amount_dimension, partition, coarse_partition }
}
