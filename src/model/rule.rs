use super::partition::{PartitionId, PartitionSpace};
use crate::error::BuildError;
use crate::template::{Family, Template};
use crate::{FieldType, Kind};
use std::sync::Arc;

/// A field operand: the name of a field of the rule's class, with its type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldRef {
    pub name: String,
    pub field_type: FieldType,
}

impl FieldRef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        FieldRef { name: name.into(), field_type }
    }
}

/// One cell of a partition, identified by its per-dimension partile indexes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartRef {
    pub partition: PartitionId,
    pub indexes: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleOperand {
    Field(FieldRef),
    Rule(Box<ConstructedRule>),
    Part(PartRef),
}

/// Operand origin. The declaration order is the comparison order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Origin {
    Field,
    Rule,
    Part,
}

impl RuleOperand {
    pub fn origin(&self) -> Origin {
        match self {
            RuleOperand::Field(_) => Origin::Field,
            RuleOperand::Rule(_) => Origin::Rule,
            RuleOperand::Part(_) => Origin::Part,
        }
    }
}

/// How the sparse builder realizes a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleClass {
    /// Restricts a table to one part of a partition.
    Selection,
    /// Statistic over a selection: one block member per part.
    PartitionBlock,
    /// Statistic applied to every member of an upstream block.
    ValueBlock,
    Standard,
}

// --- Constructed rule -------------------------------------------------------

/// A template applied to concrete operands in the context of one class.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstructedRule {
    pub template: Arc<Template>,
    /// Class the rule is evaluated in.
    pub class: String,
    pub operands: Vec<RuleOperand>,
    pub cost: f64,
    /// Tie-break index for cost orderings.
    pub random_index: usize,
}

impl ConstructedRule {
    pub fn new(template: Arc<Template>, class: impl Into<String>) -> Self {
        ConstructedRule { template, class: class.into(), operands: Vec::new(), cost: 0.0, random_index: 0 }
    }

    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.operands.push(RuleOperand::Field(FieldRef::new(name, field_type)));
        self
    }

    pub fn rule(mut self, rule: ConstructedRule) -> Self {
        self.operands.push(RuleOperand::Rule(Box::new(rule)));
        self
    }

    pub fn part(mut self, part: PartRef) -> Self {
        self.operands.push(RuleOperand::Part(part));
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    /// Template name, which is also the formula operator.
    pub fn name(&self) -> &'static str {
        self.template.name
    }

    pub fn operand_count(&self) -> usize {
        self.operands.len()
    }

    pub fn field_operand(&self, index: usize) -> Option<&FieldRef> {
        match self.operands.get(index) {
            Some(RuleOperand::Field(field)) => Some(field),
            _ => None,
        }
    }

    pub fn rule_operand(&self, index: usize) -> Option<&ConstructedRule> {
        match self.operands.get(index) {
            Some(RuleOperand::Rule(rule)) => Some(rule),
            _ => None,
        }
    }

    pub fn part_operand(&self, index: usize) -> Option<&PartRef> {
        match self.operands.get(index) {
            Some(RuleOperand::Part(part)) => Some(part),
            _ => None,
        }
    }

    pub fn operand_type(&self, index: usize) -> Result<FieldType, BuildError> {
        match self.operands.get(index) {
            Some(RuleOperand::Field(field)) => Ok(field.field_type.clone()),
            Some(RuleOperand::Rule(rule)) => rule.result_type(),
            Some(RuleOperand::Part(_)) => {
                Err(BuildError::Contract(format!("operand {index} of {} is a part", self.name())))
            }
            None => Err(BuildError::Contract(format!("{} has no operand {index}", self.name()))),
        }
    }

    /// Type of the value the rule computes. Relation results take their class
    /// from operand 0.
    pub fn result_type(&self) -> Result<FieldType, BuildError> {
        let result = self.template.result;
        if let Some(simple) = FieldType::simple(result) {
            return Ok(simple);
        }
        let class = self
            .operand_type(0)?
            .class_name()
            .map(str::to_string)
            .ok_or_else(|| BuildError::Contract(format!("{} needs a relation as operand 0", self.name())))?;
        match result {
            Kind::Object => Ok(FieldType::Object(class)),
            Kind::ObjectArray => Ok(FieldType::ObjectArray(class)),
            other => Err(BuildError::Contract(format!("{} cannot produce {}", self.name(), other.label()))),
        }
    }

    /// Class in which operand `index` is evaluated: for relation families the
    /// operands after the first live in the class reached by operand 0.
    pub fn operand_class(&self, index: usize) -> Result<String, BuildError> {
        if index > 0 && matches!(self.template.family, Family::Table | Family::Entity) {
            let first = self.operand_type(0)?;
            return first
                .class_name()
                .map(str::to_string)
                .ok_or_else(|| BuildError::Contract(format!("{} needs a relation as operand 0", self.name())));
        }
        Ok(self.class.clone())
    }

    // --- Classification ---------------------------------------------------------

    pub fn is_selection(&self) -> bool {
        self.template.selection
    }

    pub fn is_partition_block(&self) -> bool {
        self.template.partition_stats.is_some() && self.rule_operand(0).is_some_and(ConstructedRule::is_selection)
    }

    pub fn is_value_block(&self) -> bool {
        self.template.value_block.is_some() && self.rule_operand(1).is_some_and(ConstructedRule::is_block_rule)
    }

    pub fn is_block_rule(&self) -> bool {
        self.is_partition_block() || self.is_value_block()
    }

    pub fn classify(&self) -> RuleClass {
        if self.is_selection() {
            RuleClass::Selection
        } else if self.is_partition_block() {
            RuleClass::PartitionBlock
        } else if self.is_value_block() {
            RuleClass::ValueBlock
        } else {
            RuleClass::Standard
        }
    }

    /// The selection rule used by this rule as its table, if any.
    pub fn selection_rule(&self) -> Option<&ConstructedRule> {
        if self.is_selection() { Some(self) } else { self.rule_operand(0).filter(|rule| rule.is_selection()) }
    }

    /// The part that determines the block member realizing this rule.
    pub fn used_part(&self) -> Option<&PartRef> {
        match self.classify() {
            RuleClass::Selection => self.part_operand(1),
            RuleClass::PartitionBlock => self.rule_operand(0).and_then(|rule| rule.part_operand(1)),
            RuleClass::ValueBlock => self.rule_operand(1).and_then(ConstructedRule::used_part),
            RuleClass::Standard => None,
        }
    }

    pub fn uses_selection(&self) -> bool {
        self.is_selection()
            || self.operands.iter().any(|operand| match operand {
                RuleOperand::Rule(rule) => rule.uses_selection(),
                _ => false,
            })
    }

    // --- Integrity ----------------------------------------------------------------

    /// Check operands against the template slots and the partition space.
    pub fn check(&self, space: &PartitionSpace) -> Result<(), BuildError> {
        let contract = |msg: String| Err(BuildError::Contract(format!("{} in {}: {msg}", self.name(), self.class)));
        if self.selections_on_path() > 1 {
            return contract("more than one selection along an operand path".to_string());
        }
        let slots = self.template.slots;
        if slots.len() != self.operands.len() {
            return contract(format!("expected {} operands, found {}", slots.len(), self.operands.len()));
        }

        for (index, (operand, slot)) in self.operands.iter().zip(slots).enumerate() {
            match operand {
                RuleOperand::Field(field) => {
                    if field.field_type.kind() != *slot {
                        return contract(format!(
                            "operand {index} `{}` is {}, expected {}",
                            field.name,
                            field.field_type,
                            slot.label()
                        ));
                    }
                }
                RuleOperand::Rule(rule) => {
                    rule.check(space)?;
                    let result = rule.result_type()?;
                    if result.kind() != *slot {
                        return contract(format!("operand {index} computes {result}, expected {}", slot.label()));
                    }
                    let expected = self.operand_class(index)?;
                    if rule.class != expected {
                        return contract(format!(
                            "operand {index} is evaluated in {}, expected {expected}",
                            rule.class
                        ));
                    }
                }
                RuleOperand::Part(part) => {
                    if *slot != Kind::Part || !self.is_selection() || index + 1 != slots.len() {
                        return contract(format!("part operand {index} outside the selection slot"));
                    }
                    if space.part(part).is_none() {
                        return contract(format!("part {:?} is not in its partition", part.indexes));
                    }
                }
            }
        }

        if self.is_selection() {
            let (Some(table), Some(part)) = (self.field_operand(0), self.part_operand(1)) else {
                return contract("a selection needs a table field and a part".to_string());
            };
            let partition = space.partition(part.partition);
            if partition.table.name != table.name || partition.parent_class != self.class {
                return contract(format!(
                    "selection on {} uses a partition of {}.{}",
                    table.name, partition.parent_class, partition.table.name
                ));
            }
        }
        Ok(())
    }

    /// Largest number of selection rules met on one root-to-leaf path.
    fn selections_on_path(&self) -> usize {
        let below = self
            .operands
            .iter()
            .filter_map(|operand| match operand {
                RuleOperand::Rule(rule) => Some(rule.selections_on_path()),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        below + usize::from(self.is_selection())
    }

    /// Propagate one use to every part, partition and dimension reached.
    pub fn increment_use_counts(&self, space: &mut PartitionSpace) {
        for operand in &self.operands {
            match operand {
                RuleOperand::Rule(rule) => rule.increment_use_counts(space),
                RuleOperand::Part(part) => space.increment_part(part),
                RuleOperand::Field(_) => {}
            }
        }
    }

    pub fn signature(&self) -> RuleSignature {
        RuleSignature::of(self)
    }
}

// --- Signature --------------------------------------------------------------

/// Structural identity of a rule, usable as an ordered-map key. Costs and
/// tie-break indexes are not part of it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleSignature {
    class: String,
    name: &'static str,
    operands: Vec<OperandSignature>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum OperandSignature {
    Field(String),
    Rule(RuleSignature),
    Part(PartitionId, Vec<usize>),
}

impl RuleSignature {
    pub fn of(rule: &ConstructedRule) -> Self {
        RuleSignature {
            class: rule.class.clone(),
            name: rule.name(),
            operands: rule
                .operands
                .iter()
                .map(|operand| match operand {
                    RuleOperand::Field(field) => OperandSignature::Field(field.name.clone()),
                    RuleOperand::Rule(rule) => OperandSignature::Rule(RuleSignature::of(rule)),
                    RuleOperand::Part(part) => OperandSignature::Part(part.partition, part.indexes.clone()),
                })
                .collect(),
        }
    }
}
