//! Construction-rule templates and catalogues.
//!
//! Templates are immutable and shared (`Arc`) between every rule built on
//! them. A template names the formula operator it generates, its typed operand
//! slots and, for table statistics, the operator names of its sparse variants:
//! the partition-stats variant computes the statistic for every part of a
//! partitioned table at once; the value-block variant applies the statistic to
//! every member of an upstream block.

use crate::formula::{Formula, Operand};
use crate::schema::{EntityType, Schema};
use crate::Kind;
use once_cell::sync::Lazy;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Date,
    Time,
    Timestamp,
    TimestampTZ,
    Entity,
    Table,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub name: &'static str,
    pub family: Family,
    /// Result kind. Relation results take their class from operand 0.
    pub result: Kind,
    pub slots: &'static [Kind],
    /// The template restricts a table to one part of a partition.
    pub selection: bool,
    pub partition_stats: Option<&'static str>,
    pub value_block: Option<&'static str>,
}

impl Template {
    /// Name used in interpretable names: `TableSum` reads as `Sum`.
    pub fn operator_name(&self) -> &'static str {
        self.name.strip_prefix("Table").filter(|rest| !rest.is_empty()).unwrap_or(self.name)
    }

    pub fn operand_count(&self) -> usize {
        self.slots.len()
    }

    pub fn formula(&self, operands: Vec<Operand>) -> Formula {
        Formula::with_operands(self.name, operands)
    }
}

// --- Catalogue --------------------------------------------------------------

pub trait TemplateCatalogue {
    fn templates(&self) -> &[Arc<Template>];

    fn lookup(&self, name: &str) -> Option<Arc<Template>> {
        self.templates().iter().find(|t| t.name == name).cloned()
    }

    /// Templates whose first slot kind is carried by a field of `entity`.
    /// Relation fields only count when their class is part of `schema`.
    fn applicable_templates(&self, entity: &EntityType, schema: &Schema) -> Vec<Arc<Template>> {
        self.templates()
            .iter()
            .filter(|template| {
                let Some(first) = template.slots.first() else {
                    return false;
                };
                entity.fields.iter().any(|field| {
                    field.field_type.kind() == *first
                        && field.field_type.class_name().is_none_or(|class| schema.entity(class).is_some())
                })
            })
            .cloned()
            .collect()
    }
}

static DEFAULT_TEMPLATES: Lazy<Vec<Arc<Template>>> = Lazy::new(|| {
    use Family::*;
    vec![
        template! { name: "YearDay", family: Date, result: Kind::Continuous, slots: [Kind::Date] },
        template! { name: "WeekDay", family: Date, result: Kind::Continuous, slots: [Kind::Date] },
        template! { name: "DecimalTime", family: Time, result: Kind::Continuous, slots: [Kind::Time] },
        template! { name: "GetDate", family: Timestamp, result: Kind::Date, slots: [Kind::Timestamp] },
        template! { name: "GetTime", family: Timestamp, result: Kind::Time, slots: [Kind::Timestamp] },
        template! {
            name: "LocalTimestamp",
            family: TimestampTZ,
            result: Kind::Timestamp,
            slots: [Kind::TimestampTZ],
        },
        template! {
            name: "GetValue",
            family: Entity,
            result: Kind::Continuous,
            slots: [Kind::Object, Kind::Continuous],
        },
        template! { name: "GetValueC", family: Entity, result: Kind::Symbol, slots: [Kind::Object, Kind::Symbol] },
        template! {
            name: "TableSelection",
            family: Table,
            result: Kind::ObjectArray,
            slots: [Kind::ObjectArray, Kind::Part],
            selection: true,
        },
        template! {
            name: "TableCount",
            family: Table,
            result: Kind::Continuous,
            slots: [Kind::ObjectArray],
            partition_stats: "TablePartitionCount",
        },
        template! {
            name: "TableCountDistinct",
            family: Table,
            result: Kind::Continuous,
            slots: [Kind::ObjectArray, Kind::Symbol],
            partition_stats: "TablePartitionCountDistinct",
            value_block: "TableBlockCountDistinct",
        },
        template! {
            name: "TableMode",
            family: Table,
            result: Kind::Symbol,
            slots: [Kind::ObjectArray, Kind::Symbol],
            partition_stats: "TablePartitionMode",
            value_block: "TableBlockMode",
        },
        template! {
            name: "TableMean",
            family: Table,
            result: Kind::Continuous,
            slots: [Kind::ObjectArray, Kind::Continuous],
            partition_stats: "TablePartitionMean",
            value_block: "TableBlockMean",
        },
        template! {
            name: "TableMedian",
            family: Table,
            result: Kind::Continuous,
            slots: [Kind::ObjectArray, Kind::Continuous],
            partition_stats: "TablePartitionMedian",
            value_block: "TableBlockMedian",
        },
        template! {
            name: "TableMin",
            family: Table,
            result: Kind::Continuous,
            slots: [Kind::ObjectArray, Kind::Continuous],
            partition_stats: "TablePartitionMin",
            value_block: "TableBlockMin",
        },
        template! {
            name: "TableMax",
            family: Table,
            result: Kind::Continuous,
            slots: [Kind::ObjectArray, Kind::Continuous],
            partition_stats: "TablePartitionMax",
            value_block: "TableBlockMax",
        },
        template! {
            name: "TableStdDev",
            family: Table,
            result: Kind::Continuous,
            slots: [Kind::ObjectArray, Kind::Continuous],
            partition_stats: "TablePartitionStdDev",
            value_block: "TableBlockStdDev",
        },
        template! {
            name: "TableSum",
            family: Table,
            result: Kind::Continuous,
            slots: [Kind::ObjectArray, Kind::Continuous],
            partition_stats: "TablePartitionSum",
            value_block: "TableBlockSum",
        },
    ]
});

/// The built-in template list.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCatalogue;

impl TemplateCatalogue for DefaultCatalogue {
    fn templates(&self) -> &[Arc<Template>] {
        &DEFAULT_TEMPLATES
    }
}

/// A caller-assembled catalogue.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: Vec<Arc<Template>>,
}

impl TemplateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, template: Arc<Template>) -> Self {
        self.templates.push(template);
        self
    }
}

impl TemplateCatalogue for TemplateSet {
    fn templates(&self) -> &[Arc<Template>] {
        &self.templates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldType;
    use crate::schema::Field;

    #[test]
    fn operator_names_drop_the_table_prefix() {
        let catalogue = DefaultCatalogue;
        assert_eq!(catalogue.lookup("TableCountDistinct").unwrap().operator_name(), "CountDistinct");
        assert_eq!(catalogue.lookup("GetDate").unwrap().operator_name(), "GetDate");
        assert!(catalogue.lookup("TableSelection").unwrap().selection);
        assert_eq!(catalogue.lookup("TableCount").unwrap().value_block, None);
    }

    #[test]
    fn optional_variants_are_declared_per_template() {
        let catalogue = DefaultCatalogue;
        let sum = catalogue.lookup("TableSum").unwrap();
        assert_eq!(sum.partition_stats, Some("TablePartitionSum"));
        assert_eq!(sum.value_block, Some("TableBlockSum"));
        let count = catalogue.lookup("TableCount").unwrap();
        assert_eq!(count.partition_stats, Some("TablePartitionCount"));
        let year_day = catalogue.lookup("YearDay").unwrap();
        assert_eq!((year_day.partition_stats, year_day.value_block), (None, None));
    }

    #[test]
    fn applicability_follows_first_slot() {
        let customer = EntityType::new("Customer")
            .with_field(Field::native("birthdate", FieldType::Date))
            .with_field(Field::native("Orders", FieldType::ObjectArray("Orders".into())));
        let schema = Schema::new(vec![customer.clone(), EntityType::new("Orders")]);

        let names: Vec<&str> =
            DefaultCatalogue.applicable_templates(&customer, &schema).iter().map(|t| t.name).collect();
        assert!(names.contains(&"YearDay"));
        assert!(names.contains(&"TableSum"));
        assert!(!names.contains(&"GetTime"));
        assert!(!names.contains(&"GetValue"));

        let orphan = Schema::new(vec![customer.clone()]);
        assert!(!DefaultCatalogue.applicable_templates(&customer, &orphan).iter().any(|t| t.name == "TableSum"));
    }

    #[test]
    fn template_set_lookup() {
        let set = TemplateSet::new().with(template! {
            name: "Log",
            family: Family::Entity,
            result: Kind::Continuous,
            slots: [Kind::Continuous],
        });
        assert!(set.lookup("Log").is_some());
        assert!(set.lookup("TableSum").is_none());
    }
}
