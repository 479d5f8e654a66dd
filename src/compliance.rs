//! Compliance registry: what a schema already derives.
//!
//! Before a build, every entity type is scanned once. The registry keeps the
//! templates that apply to the entity type and a sorted index of its derived
//! fields, block members and blocks, keyed by formula. The builder probes the
//! index before creating anything, so a rule whose formula is already
//! computed by the schema reuses the existing field instead of duplicating it.
//!
//! ```text
//! EntityType ──collect──> ClassCompliance
//!                           ├─ templates        applicable templates
//!                           ├─ fields           (formula, var_key) -> field name
//!                           ├─ blocks           block formula -> block name
//!                           ├─ redundant        used fields repeating a formula
//!                           └─ memo             rule signature -> Option<field name>
//! ```
//!
//! Rule lookups are memoized by structural signature. Once every registered
//! field has been matched by some rule, no other rule can match one, and the
//! negative entries of the memo are dropped.

use crate::error::BuildError;
use crate::formula::Formula;
use crate::model::{ConstructedRule, PartitionSpace, RuleSignature, materialize_formula};
use crate::schema::{EntityType, Field, FieldBlock, Schema};
use crate::template::{Template, TemplateCatalogue};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Operators of the sparse descriptor formulas.
const PARTITION_OPERATOR: &str = "Partition";
const TABLE_PARTITION_OPERATOR: &str = "TablePartition";

// --- Class record -----------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ClassCompliance {
    class: String,
    templates: Vec<Arc<Template>>,
    usable_names: BTreeSet<String>,
    fields: BTreeMap<(Formula, Option<u64>), String>,
    blocks: BTreeMap<Formula, String>,
    redundant: Vec<String>,
    derived_count: usize,
    matched: BTreeSet<String>,
    memo: BTreeMap<RuleSignature, Option<String>>,
}

impl ClassCompliance {
    /// Scan `entity`: applicable templates, then every derived field, block
    /// member and block whose operator one of them (or its sparse variants)
    /// can produce. The first field computing a formula wins.
    pub fn collect(entity: &EntityType, schema: &Schema, catalogue: &dyn TemplateCatalogue) -> Self {
        let templates = catalogue.applicable_templates(entity, schema);
        let mut usable_names = BTreeSet::new();
        for template in &templates {
            usable_names.insert(template.name.to_string());
            if template.selection {
                usable_names.insert(PARTITION_OPERATOR.to_string());
                usable_names.insert(TABLE_PARTITION_OPERATOR.to_string());
            }
            usable_names.extend(template.partition_stats.map(str::to_string));
            usable_names.extend(template.value_block.map(str::to_string));
        }

        let mut record = ClassCompliance { class: entity.name.clone(), templates, usable_names, ..Default::default() };

        let mut seen: BTreeSet<&Formula> = BTreeSet::new();
        for field in &entity.fields {
            if let Some(formula) = &field.formula {
                if !seen.insert(formula) && field.is_used() {
                    record.redundant.push(field.name.clone());
                }
                if record.usable_names.contains(&formula.name) {
                    let key = (formula.clone(), None);
                    if !record.fields.contains_key(&key) {
                        record.fields.insert(key, field.name.clone());
                        record.derived_count += 1;
                    }
                }
            } else if let (Some(block), Some(var_key)) = (&field.block, field.var_key) {
                let Some(block) = entity.block(block) else {
                    continue;
                };
                if record.usable_names.contains(&block.formula.name) {
                    record.fields.entry((block.formula.clone(), Some(var_key))).or_insert_with(|| field.name.clone());
                }
            }
        }
        for block in &entity.blocks {
            if record.usable_names.contains(&block.formula.name) {
                record.blocks.entry(block.formula.clone()).or_insert_with(|| block.name.clone());
            }
        }

        debug!(
            "compliance {}: {} templates, {} derived fields, {} blocks, {} redundant",
            record.class,
            record.templates.len(),
            record.derived_count,
            record.blocks.len(),
            record.redundant.len()
        );
        record
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn templates(&self) -> &[Arc<Template>] {
        &self.templates
    }

    /// A selection template applies to the class.
    pub fn uses_selection(&self) -> bool {
        self.templates.iter().any(|t| t.selection)
    }

    pub fn is_usable(&self, operator: &str) -> bool {
        self.usable_names.contains(operator)
    }

    /// Used derived fields whose formula an earlier field already computes.
    pub fn redundant_fields(&self) -> &[String] {
        &self.redundant
    }

    pub fn derived_count(&self) -> usize {
        self.derived_count
    }

    // --- Lookups ----------------------------------------------------------------

    /// Existing field computing the rule's formula.
    pub fn lookup_constructed(
        &mut self,
        rule: &ConstructedRule,
        space: &PartitionSpace,
    ) -> Result<Option<String>, BuildError> {
        if self.derived_count == 0 {
            return Ok(None);
        }
        let signature = rule.signature();
        if let Some(cached) = self.memo.get(&signature) {
            return Ok(cached.clone());
        }
        if self.matched.len() == self.derived_count {
            return Ok(None);
        }

        let formula = materialize_formula(rule, space)?;
        let found = self.lookup_formula(&formula).map(str::to_string);
        if let Some(name) = &found {
            if self.matched.insert(name.clone()) && self.matched.len() == self.derived_count {
                self.purge_negative_memo();
            }
        }
        self.memo.insert(signature, found.clone());
        Ok(found)
    }

    pub fn lookup_formula(&self, formula: &Formula) -> Option<&str> {
        self.fields.get(&(formula.clone(), None)).map(String::as_str)
    }

    pub fn lookup_block_member(&self, block_formula: &Formula, var_key: u64) -> Option<&str> {
        self.fields.get(&(block_formula.clone(), Some(var_key))).map(String::as_str)
    }

    pub fn lookup_block(&self, block_formula: &Formula) -> Option<&str> {
        self.blocks.get(block_formula).map(String::as_str)
    }

    // --- Registration -------------------------------------------------------------

    /// Index a field created by the build. Its formula must be new.
    pub fn register_derived(&mut self, field: &Field) -> Result<(), BuildError> {
        let formula = field
            .formula
            .as_ref()
            .ok_or_else(|| BuildError::Contract(format!("{}.{} has no formula", self.class, field.name)))?;
        let key = (formula.clone(), None);
        if self.fields.contains_key(&key) {
            return Err(BuildError::Contract(format!("{}: formula {formula} is already registered", self.class)));
        }
        self.fields.insert(key, field.name.clone());
        self.derived_count += 1;
        // The new field may answer rules that previously matched nothing.
        self.purge_negative_memo();
        Ok(())
    }

    pub fn register_block_member(&mut self, block_formula: &Formula, member: &Field) -> Result<(), BuildError> {
        let var_key = member
            .var_key
            .ok_or_else(|| BuildError::Contract(format!("{}.{} has no VarKey", self.class, member.name)))?;
        let key = (block_formula.clone(), Some(var_key));
        if self.fields.contains_key(&key) {
            return Err(BuildError::Contract(format!(
                "{}: VarKey {var_key} of {block_formula} is already registered",
                self.class
            )));
        }
        self.fields.insert(key, member.name.clone());
        Ok(())
    }

    pub fn register_block(&mut self, block: &FieldBlock) -> Result<(), BuildError> {
        if self.blocks.contains_key(&block.formula) {
            return Err(BuildError::Contract(format!(
                "{}: block formula {} is already registered",
                self.class, block.formula
            )));
        }
        self.blocks.insert(block.formula.clone(), block.name.clone());
        Ok(())
    }

    fn purge_negative_memo(&mut self) {
        let before = self.memo.len();
        self.memo.retain(|_, found| found.is_some());
        if before != self.memo.len() {
            debug!("compliance {}: dropped {} negative lookups", self.class, before - self.memo.len());
        }
    }
}

// --- Domain record ----------------------------------------------------------

/// One [`ClassCompliance`] per entity type, main entity first.
#[derive(Debug, Clone, Default)]
pub struct DomainCompliance {
    classes: Vec<ClassCompliance>,
}

impl DomainCompliance {
    pub fn collect(schema: &Schema, catalogue: &dyn TemplateCatalogue) -> Self {
        DomainCompliance {
            classes: schema.entities.iter().map(|entity| ClassCompliance::collect(entity, schema, catalogue)).collect(),
        }
    }

    pub fn classes(&self) -> &[ClassCompliance] {
        &self.classes
    }

    pub fn main(&self) -> Option<&ClassCompliance> {
        self.classes.first()
    }

    pub fn class(&self, name: &str) -> Option<&ClassCompliance> {
        self.classes.iter().find(|c| c.class == name)
    }

    pub fn class_mut(&mut self, name: &str) -> Option<&mut ClassCompliance> {
        self.classes.iter_mut().find(|c| c.class == name)
    }

    pub(crate) fn class_mut_or_err(&mut self, name: &str) -> Result<&mut ClassCompliance, BuildError> {
        self.class_mut(name).ok_or_else(|| BuildError::Contract(format!("no compliance record for {name}")))
    }

    /// `(class, field)` pairs of every redundant field.
    pub fn redundant_fields(&self) -> Vec<(String, String)> {
        self.classes
            .iter()
            .flat_map(|c| c.redundant.iter().map(move |field| (c.class.clone(), field.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldType;
    use crate::model::fixtures::{self, catalogue_rule};
    use crate::template::DefaultCatalogue;

    fn sum_formula() -> Formula {
        Formula::new("TableSum").field("Orders").field("amount")
    }

    fn customer_with(fields: Vec<Field>) -> Schema {
        let mut schema = fixtures::customer_orders_schema();
        if let Some(customer) = schema.entity_mut("Customer") {
            customer.fields.extend(fields);
        }
        schema
    }

    #[test]
    fn collect_indexes_usable_formulas_once() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut again = Field::derived("total_again", FieldType::Continuous, sum_formula());
        again.set_used(true);
        let schema = customer_with(vec![
            Field::derived("total", FieldType::Continuous, sum_formula()),
            again,
            Field::derived("custom", FieldType::Continuous, Formula::new("Log").field("id")),
        ]);
        let record = ClassCompliance::collect(schema.entity("Customer").unwrap(), &schema, &DefaultCatalogue);

        assert_eq!(record.lookup_formula(&sum_formula()), Some("total"));
        assert_eq!(record.lookup_formula(&Formula::new("Log").field("id")), None);
        assert_eq!(record.derived_count(), 1);
        assert_eq!(record.redundant_fields(), &["total_again".to_string()]);
        assert!(record.uses_selection());
        assert!(record.is_usable("TablePartition"));
        assert!(record.is_usable("TableBlockSum"));
    }

    #[test]
    fn lookup_constructed_matches_materialized_formulas() {
        let fx = fixtures::customer_orders();
        let schema = customer_with(vec![Field::derived("total", FieldType::Continuous, sum_formula())]);
        let mut record = ClassCompliance::collect(schema.entity("Customer").unwrap(), &schema, &DefaultCatalogue);

        assert_eq!(record.lookup_constructed(&fx.sum_amount(), &fx.space).unwrap(), Some("total".to_string()));
        assert_eq!(record.lookup_constructed(&fx.count(), &fx.space).unwrap(), None);
        // Memoized hit.
        assert_eq!(record.lookup_constructed(&fx.sum_amount(), &fx.space).unwrap(), Some("total".to_string()));
    }

    #[test]
    fn negative_lookups_are_purged_once_everything_matched() {
        let fx = fixtures::customer_orders();
        let schema = customer_with(vec![Field::derived("total", FieldType::Continuous, sum_formula())]);
        let mut record = ClassCompliance::collect(schema.entity("Customer").unwrap(), &schema, &DefaultCatalogue);

        assert_eq!(record.lookup_constructed(&fx.count(), &fx.space).unwrap(), None);
        assert_eq!(record.memo.len(), 1);
        record.lookup_constructed(&fx.sum_amount(), &fx.space).unwrap();
        assert_eq!(record.memo.len(), 1);
        assert!(record.memo.values().all(Option::is_some));

        // Every field is matched: further rules short-circuit.
        let mean = catalogue_rule("TableMean", "Customer")
            .field("Orders", fixtures::orders_table())
            .field("amount", FieldType::Continuous);
        assert_eq!(record.lookup_constructed(&mean, &fx.space).unwrap(), None);
    }

    #[test]
    fn registration_rejects_duplicates_and_answers_later_lookups() {
        let fx = fixtures::customer_orders();
        let schema = fixtures::customer_orders_schema();
        let mut record = ClassCompliance::collect(schema.entity("Customer").unwrap(), &schema, &DefaultCatalogue);
        assert_eq!(record.lookup_constructed(&fx.sum_amount(), &fx.space).unwrap(), None);

        let field = Field::derived("ConstructedFeature1", FieldType::Continuous, sum_formula());
        record.register_derived(&field).unwrap();
        assert!(matches!(record.register_derived(&field), Err(BuildError::Contract(_))));
        assert_eq!(
            record.lookup_constructed(&fx.sum_amount(), &fx.space).unwrap(),
            Some("ConstructedFeature1".to_string())
        );

        let block = FieldBlock { name: "B".into(), formula: Formula::new("TablePartitionCount").field("P") };
        record.register_block(&block).unwrap();
        assert!(record.register_block(&block).is_err());
        assert_eq!(record.lookup_block(&block.formula), Some("B"));

        let member = Field::block_member("m", FieldType::Continuous, "B", 3);
        record.register_block_member(&block.formula, &member).unwrap();
        assert_eq!(record.lookup_block_member(&block.formula, 3), Some("m"));
        assert_eq!(record.lookup_block_member(&block.formula, 1), None);
        assert!(record.register_block_member(&block.formula, &member).is_err());
    }

    #[test]
    fn existing_blocks_are_indexed_by_key() {
        let mut schema = fixtures::customer_orders_schema();
        let formula = Formula::new("TablePartitionCount").field("TP");
        if let Some(customer) = schema.entity_mut("Customer") {
            customer.add_block(
                FieldBlock { name: "counts".into(), formula: formula.clone() },
                Field::block_member("low", FieldType::Continuous, "counts", 1),
            );
        }
        let domain = DomainCompliance::collect(&schema, &DefaultCatalogue);
        let customer = domain.class("Customer").unwrap();
        assert_eq!(customer.lookup_block(&formula), Some("counts"));
        assert_eq!(customer.lookup_block_member(&formula, 1), Some("low"));
        assert_eq!(domain.main().map(ClassCompliance::class), Some("Customer"));
        assert!(domain.class("Orders").is_some_and(|c| !c.uses_selection()));
        assert!(domain.redundant_fields().is_empty());
    }
}
