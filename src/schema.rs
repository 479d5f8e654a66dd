//! Entity types, fields and field blocks.
//!
//! A [`Schema`] is an ordered list of [`EntityType`]s; the first one is the
//! main entity. Field blocks group fields sharing one block formula: members
//! are the fields whose `block` names the block, they are kept contiguous in
//! the owning entity and each carries a distinct `var_key`.

use crate::error::BuildError;
use crate::formula::Formula;
use crate::{FieldFlags, FieldType};
use std::collections::{BTreeMap, BTreeSet};

/// Metadata key under which a field's cost is persisted.
pub const COST_META_KEY: &str = "Cost";

// --- Field ------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub flags: FieldFlags,
    /// Derivation formula; `None` for native fields and block members.
    pub formula: Option<Formula>,
    pub cost: f64,
    pub meta: BTreeMap<String, f64>,
    /// Name of the block holding this field.
    pub block: Option<String>,
    /// Key of the field inside its block.
    pub var_key: Option<u64>,
}

impl Field {
    /// Stored field, used and loaded.
    pub fn native(name: impl Into<String>, field_type: FieldType) -> Self {
        Field {
            name: name.into(),
            field_type,
            flags: FieldFlags::USED | FieldFlags::LOADED,
            formula: None,
            cost: 0.0,
            meta: BTreeMap::new(),
            block: None,
            var_key: None,
        }
    }

    /// Formula-backed field, created unused.
    pub fn derived(name: impl Into<String>, field_type: FieldType, formula: Formula) -> Self {
        Field { formula: Some(formula), flags: FieldFlags::LOADED, ..Field::native(name, field_type) }
    }

    /// Block member keyed by `var_key`; its value comes from the block formula.
    pub fn block_member(
        name: impl Into<String>,
        field_type: FieldType,
        block: impl Into<String>,
        var_key: u64,
    ) -> Self {
        Field {
            flags: FieldFlags::LOADED,
            block: Some(block.into()),
            var_key: Some(var_key),
            ..Field::native(name, field_type)
        }
    }

    pub fn unused(mut self) -> Self {
        self.set_used(false);
        self
    }

    pub fn is_used(&self) -> bool {
        self.flags.contains(FieldFlags::USED)
    }

    pub fn is_loaded(&self) -> bool {
        self.flags.contains(FieldFlags::LOADED)
    }

    pub fn set_used(&mut self, used: bool) {
        self.flags.set(FieldFlags::USED, used);
    }

    pub fn set_loaded(&mut self, loaded: bool) {
        self.flags.set(FieldFlags::LOADED, loaded);
    }

    pub fn is_derived(&self) -> bool {
        self.formula.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldBlock {
    pub name: String,
    pub formula: Formula,
}

// --- Entity type ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityType {
    pub name: String,
    pub fields: Vec<Field>,
    pub blocks: Vec<FieldBlock>,
}

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        EntityType { name: name.into(), ..Default::default() }
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    pub fn block(&self, name: &str) -> Option<&FieldBlock> {
        self.blocks.iter().find(|b| b.name == name)
    }

    /// Fields and blocks share one namespace.
    pub fn contains_name(&self, name: &str) -> bool {
        self.field(name).is_some() || self.block(name).is_some()
    }

    pub fn block_members<'a>(&'a self, block: &'a str) -> impl Iterator<Item = &'a Field> + 'a {
        self.fields.iter().filter(move |f| f.block.as_deref() == Some(block))
    }

    pub fn block_member_by_key(&self, block: &str, var_key: u64) -> Option<&Field> {
        self.fields.iter().find(|f| f.block.as_deref() == Some(block) && f.var_key == Some(var_key))
    }

    /// `prefix` if free, otherwise the first free `prefix_<i>`.
    pub fn build_field_name(&self, prefix: &str) -> String {
        if !self.contains_name(prefix) {
            return prefix.to_string();
        }
        (1..)
            .map(|i| format!("{prefix}_{i}"))
            .find(|candidate| !self.contains_name(candidate))
            .unwrap_or_else(|| prefix.to_string())
    }

    /// Append a field at the tail.
    pub fn insert_field(&mut self, field: Field) {
        self.fields.push(field);
    }

    /// Create a block whose first member is `first_member`, appended at the tail.
    pub fn add_block(&mut self, block: FieldBlock, mut first_member: Field) {
        first_member.block = Some(block.name.clone());
        first_member.formula = None;
        self.fields.push(first_member);
        self.blocks.push(block);
    }

    /// Insert a member right after the current last member of its block.
    pub fn insert_block_member(&mut self, block: &str, mut member: Field) -> Result<(), BuildError> {
        let last = self
            .fields
            .iter()
            .rposition(|f| f.block.as_deref() == Some(block))
            .ok_or_else(|| BuildError::Contract(format!("block {block} has no member in {}", self.name)))?;
        member.block = Some(block.to_string());
        member.formula = None;
        self.fields.insert(last + 1, member);
        Ok(())
    }

    pub fn move_field_to_tail(&mut self, name: &str) {
        if let Some(pos) = self.fields.iter().position(|f| f.name == name) {
            let field = self.fields.remove(pos);
            self.fields.push(field);
        }
    }

    /// Move every member of `block` to the tail, keeping their relative order.
    pub fn move_block_to_tail(&mut self, block: &str) {
        let (members, rest): (Vec<Field>, Vec<Field>) =
            std::mem::take(&mut self.fields).into_iter().partition(|f| f.block.as_deref() == Some(block));
        self.fields = rest;
        self.fields.extend(members);
        if let Some(pos) = self.blocks.iter().position(|b| b.name == block) {
            let entry = self.blocks.remove(pos);
            self.blocks.push(entry);
        }
    }

    pub fn sort_block_by_var_key(&mut self, block: &str) {
        let positions: Vec<usize> = self
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.block.as_deref() == Some(block))
            .map(|(i, _)| i)
            .collect();
        let mut members: Vec<Field> = positions.iter().map(|&i| self.fields[i].clone()).collect();
        members.sort_by_key(|f| f.var_key);
        for (slot, member) in positions.into_iter().zip(members) {
            self.fields[slot] = member;
        }
    }

    pub fn set_all_used(&mut self, used: bool) {
        for field in &mut self.fields {
            field.set_used(used);
        }
    }

    fn validate(&self, classes: &BTreeSet<&str>) -> Result<(), BuildError> {
        let invalid = |msg: String| Err(BuildError::InvalidSchema(format!("{}: {msg}", self.name)));

        let mut names = BTreeSet::new();
        for name in self.fields.iter().map(|f| &f.name).chain(self.blocks.iter().map(|b| &b.name)) {
            if !names.insert(name.as_str()) {
                return invalid(format!("duplicate name {name}"));
            }
        }

        for field in &self.fields {
            if let Some(class) = field.field_type.class_name() {
                if !classes.contains(class) {
                    return invalid(format!("field {} references unknown class {class}", field.name));
                }
            }
            if field.block.is_some() && field.var_key.is_none() {
                return invalid(format!("block member {} has no key", field.name));
            }
        }

        for block in &self.blocks {
            let positions: Vec<usize> = self
                .fields
                .iter()
                .enumerate()
                .filter(|(_, f)| f.block.as_deref() == Some(block.name.as_str()))
                .map(|(i, _)| i)
                .collect();
            let (Some(first), Some(last)) = (positions.first(), positions.last()) else {
                return invalid(format!("block {} is empty", block.name));
            };
            if last - first + 1 != positions.len() {
                return invalid(format!("block {} is not contiguous", block.name));
            }
            let mut keys = BTreeSet::new();
            for member in self.block_members(&block.name) {
                if !keys.insert(member.var_key) {
                    return invalid(format!("block {} repeats key {:?}", block.name, member.var_key));
                }
            }
        }

        for field in &self.fields {
            if let Some(block) = &field.block {
                if self.block(block).is_none() {
                    return invalid(format!("field {} belongs to undeclared block {block}", field.name));
                }
            }
        }
        Ok(())
    }
}

// --- Schema -----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    pub entities: Vec<EntityType>,
}

impl Schema {
    pub fn new(entities: Vec<EntityType>) -> Self {
        Schema { entities }
    }

    /// The main entity type, if any.
    pub fn main(&self) -> Option<&EntityType> {
        self.entities.first()
    }

    pub fn entity(&self, name: &str) -> Option<&EntityType> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn entity_mut(&mut self, name: &str) -> Option<&mut EntityType> {
        self.entities.iter_mut().find(|e| e.name == name)
    }

    pub(crate) fn entity_or_err(&self, name: &str) -> Result<&EntityType, BuildError> {
        self.entity(name).ok_or_else(|| BuildError::Contract(format!("unknown entity type {name}")))
    }

    pub(crate) fn entity_mut_or_err(&mut self, name: &str) -> Result<&mut EntityType, BuildError> {
        self.entity_mut(name).ok_or_else(|| BuildError::Contract(format!("unknown entity type {name}")))
    }

    /// Validate the structural invariants of every entity type.
    pub fn compile(&self) -> Result<(), BuildError> {
        let mut classes = BTreeSet::new();
        for entity in &self.entities {
            if !classes.insert(entity.name.as_str()) {
                return Err(BuildError::InvalidSchema(format!("duplicate entity type {}", entity.name)));
            }
        }
        for entity in &self.entities {
            entity.validate(&classes)?;
        }
        Ok(())
    }
}
