use super::rule::{ConstructedRule, FieldRef, PartRef, RuleSignature};
use crate::error::BuildError;
use crate::selection::OperandStats;
use crate::{FieldType, Kind};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DimensionId(pub(crate) usize);

// --- Dimension --------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum DimensionOrigin {
    Field(FieldRef),
    Rule(Box<ConstructedRule>),
}

/// A selection operand: a field or a rule evaluated in the partition class.
#[derive(Debug, Clone)]
pub struct Dimension {
    pub class: String,
    pub origin: DimensionOrigin,
    pub use_count: usize,
    /// Analysed granularities and parts, once the analyser ran.
    pub stats: Option<OperandStats>,
    /// Field holding the operand value in the working schema.
    pub selection_field: Option<String>,
}

impl Dimension {
    pub fn field_type(&self) -> Result<FieldType, BuildError> {
        match &self.origin {
            DimensionOrigin::Field(field) => Ok(field.field_type.clone()),
            DimensionOrigin::Rule(rule) => rule.result_type(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.field_type().map(|t| t.kind()).unwrap_or(Kind::Structure)
    }

    pub fn rule(&self) -> Option<&ConstructedRule> {
        match &self.origin {
            DimensionOrigin::Rule(rule) => Some(rule),
            DimensionOrigin::Field(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum DimensionKey {
    Field(String),
    Rule(RuleSignature),
}

// --- Partition --------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionDimension {
    pub dimension: DimensionId,
    pub granularity: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub use_count: usize,
    pub cost: f64,
}

/// Mapping from analysed partile indexes to the cells of the partition
/// descriptor formula, filled when that formula is materialized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct BuiltDimension {
    pub part_count: usize,
    pub indexes: BTreeMap<usize, usize>,
}

#[derive(Debug, Clone)]
pub struct Partition {
    /// Class reached by the table field.
    pub class: String,
    /// Class owning the table field.
    pub parent_class: String,
    pub table: FieldRef,
    pub dimensions: Vec<PartitionDimension>,
    pub parts: BTreeMap<Vec<usize>, Part>,
    pub use_count: usize,
    /// Memoized partition descriptor field in the parent class.
    pub partition_field: Option<String>,
    /// Memoized sparse table-partition block in the parent class.
    pub table_partition_block: Option<String>,
    pub(crate) built: Vec<BuiltDimension>,
}

impl Partition {
    pub fn dimension_count(&self) -> usize {
        self.dimensions.len()
    }

    /// Number of cells the granularities allow.
    pub fn partition_size(&self) -> usize {
        self.dimensions.iter().map(|d| d.granularity).product()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct PartitionKey {
    parent_class: String,
    table: String,
    dimensions: Vec<PartitionDimension>,
}

// --- Arena ------------------------------------------------------------------

/// Owns every partition and dimension of a compilation. Registration is
/// interned: structurally equal dimensions (or partitions) share one id.
#[derive(Debug, Clone, Default)]
pub struct PartitionSpace {
    dimensions: Vec<Dimension>,
    dimension_keys: BTreeMap<(String, DimensionKey), DimensionId>,
    partitions: Vec<Partition>,
    partition_keys: BTreeMap<PartitionKey, PartitionId>,
}

impl PartitionSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_field_dimension(&mut self, class: &str, field: FieldRef) -> Result<DimensionId, BuildError> {
        check_dimension_type(&field.field_type, &field.name)?;
        let key = (class.to_string(), DimensionKey::Field(field.name.clone()));
        Ok(self.intern_dimension(key, class, DimensionOrigin::Field(field)))
    }

    pub fn add_rule_dimension(&mut self, rule: ConstructedRule) -> Result<DimensionId, BuildError> {
        check_dimension_type(&rule.result_type()?, rule.name())?;
        let key = (rule.class.clone(), DimensionKey::Rule(rule.signature()));
        let class = rule.class.clone();
        Ok(self.intern_dimension(key, &class, DimensionOrigin::Rule(Box::new(rule))))
    }

    fn intern_dimension(&mut self, key: (String, DimensionKey), class: &str, origin: DimensionOrigin) -> DimensionId {
        if let Some(id) = self.dimension_keys.get(&key) {
            return *id;
        }
        let id = DimensionId(self.dimensions.len());
        self.dimensions.push(Dimension {
            class: class.to_string(),
            origin,
            use_count: 0,
            stats: None,
            selection_field: None,
        });
        self.dimension_keys.insert(key, id);
        id
    }

    /// Register a partition of the table `table` of `parent_class`, with one
    /// `(dimension, granularity)` pair per axis.
    pub fn add_partition(
        &mut self,
        parent_class: &str,
        table: FieldRef,
        dimensions: &[(DimensionId, usize)],
    ) -> Result<PartitionId, BuildError> {
        let contract = |msg: String| Err(BuildError::Contract(format!("partition of {parent_class}: {msg}")));
        let FieldType::ObjectArray(class) = &table.field_type else {
            return contract(format!("{} is not a table", table.name));
        };
        if dimensions.is_empty() {
            return contract("no dimension".to_string());
        }
        for (dimension, granularity) in dimensions {
            let Some(entry) = self.dimensions.get(dimension.0) else {
                return contract(format!("unknown dimension {}", dimension.0));
            };
            if entry.class != *class {
                return contract(format!("dimension of {} used on a table of {class}", entry.class));
            }
            if *granularity < 2 || !granularity.is_power_of_two() {
                return contract(format!("granularity {granularity} is not a power of two"));
            }
        }

        let dimensions: Vec<PartitionDimension> =
            dimensions.iter().map(|&(dimension, granularity)| PartitionDimension { dimension, granularity }).collect();
        let key = PartitionKey {
            parent_class: parent_class.to_string(),
            table: table.name.clone(),
            dimensions: dimensions.clone(),
        };
        if let Some(id) = self.partition_keys.get(&key) {
            return Ok(*id);
        }
        let id = PartitionId(self.partitions.len());
        self.partitions.push(Partition {
            class: class.clone(),
            parent_class: parent_class.to_string(),
            built: vec![BuiltDimension::default(); dimensions.len()],
            table,
            dimensions,
            parts: BTreeMap::new(),
            use_count: 0,
            partition_field: None,
            table_partition_block: None,
        });
        self.partition_keys.insert(key, id);
        Ok(id)
    }

    /// Add (or find) the part with the given partile indexes.
    pub fn add_part(&mut self, partition: PartitionId, indexes: Vec<usize>, cost: f64) -> Result<PartRef, BuildError> {
        let entry = self
            .partitions
            .get_mut(partition.0)
            .ok_or_else(|| BuildError::Contract(format!("unknown partition {}", partition.0)))?;
        if indexes.len() != entry.dimensions.len()
            || indexes.iter().zip(&entry.dimensions).any(|(index, d)| *index >= d.granularity)
        {
            return Err(BuildError::Contract(format!(
                "part {indexes:?} does not fit partition of {}",
                entry.table.name
            )));
        }
        entry.parts.entry(indexes.clone()).or_insert(Part { use_count: 0, cost });
        Ok(PartRef { partition, indexes })
    }

    // --- Access ---------------------------------------------------------------

    pub fn partition(&self, id: PartitionId) -> &Partition {
        &self.partitions[id.0]
    }

    pub fn partition_mut(&mut self, id: PartitionId) -> &mut Partition {
        &mut self.partitions[id.0]
    }

    pub fn dimension(&self, id: DimensionId) -> &Dimension {
        &self.dimensions[id.0]
    }

    pub fn dimension_mut(&mut self, id: DimensionId) -> &mut Dimension {
        &mut self.dimensions[id.0]
    }

    pub fn partitions(&self) -> impl Iterator<Item = (PartitionId, &Partition)> {
        self.partitions.iter().enumerate().map(|(i, p)| (PartitionId(i), p))
    }

    pub fn dimensions(&self) -> impl Iterator<Item = (DimensionId, &Dimension)> {
        self.dimensions.iter().enumerate().map(|(i, d)| (DimensionId(i), d))
    }

    pub fn dimensions_mut(&mut self) -> impl Iterator<Item = &mut Dimension> {
        self.dimensions.iter_mut()
    }

    pub fn part(&self, part: &PartRef) -> Option<&Part> {
        self.partitions.get(part.partition.0)?.parts.get(&part.indexes)
    }

    /// Dimension of axis `axis` of a partition, with its granularity.
    pub fn partition_dimension(&self, partition: PartitionId, axis: usize) -> (&Dimension, usize) {
        let PartitionDimension { dimension, granularity } = self.partition(partition).dimensions[axis];
        (self.dimension(dimension), granularity)
    }

    // --- Use counts -------------------------------------------------------------

    pub fn reset_use_counts(&mut self) {
        for dimension in &mut self.dimensions {
            dimension.use_count = 0;
        }
        for partition in &mut self.partitions {
            partition.use_count = 0;
            for part in partition.parts.values_mut() {
                part.use_count = 0;
            }
        }
    }

    /// Forget every name bound to a working schema: selection fields,
    /// partition fields and table-partition blocks.
    pub fn clear_schema_links(&mut self) {
        for dimension in &mut self.dimensions {
            dimension.selection_field = None;
        }
        for partition in &mut self.partitions {
            partition.partition_field = None;
            partition.table_partition_block = None;
        }
    }

    pub fn clear_stats(&mut self) {
        for dimension in &mut self.dimensions {
            dimension.stats = None;
        }
    }

    /// One use of a part: the part, its partition and each of its dimensions.
    pub fn increment_part(&mut self, part: &PartRef) {
        let Some(partition) = self.partitions.get_mut(part.partition.0) else {
            return;
        };
        if let Some(entry) = partition.parts.get_mut(&part.indexes) {
            entry.use_count += 1;
        }
        partition.use_count += 1;
        let dimensions: Vec<DimensionId> = partition.dimensions.iter().map(|d| d.dimension).collect();
        for dimension in dimensions {
            self.increment_dimension(dimension);
        }
    }

    fn increment_dimension(&mut self, id: DimensionId) {
        self.dimensions[id.0].use_count += 1;
        let rule = self.dimensions[id.0].rule().cloned();
        if let Some(rule) = rule {
            rule.increment_use_counts(self);
        }
    }

    // --- Sizes ------------------------------------------------------------------

    pub fn partition_size(&self, id: PartitionId) -> usize {
        self.partition(id).partition_size()
    }

    /// Number of cells the analysed parts actually produce; `None` before the
    /// analyser filled the dimension statistics.
    pub fn actual_partition_size(&self, id: PartitionId) -> Option<usize> {
        self.partition(id).dimensions.iter().try_fold(1usize, |size, d| {
            let stats = self.dimension(d.dimension).stats.as_ref()?;
            let index = stats.search_granularity_index(d.granularity)?;
            Some(size * stats.parts_at(index).len())
        })
    }
}

fn check_dimension_type(field_type: &FieldType, name: &str) -> Result<(), BuildError> {
    match field_type.kind() {
        Kind::Continuous | Kind::Symbol => Ok(()),
        _ => Err(BuildError::Contract(format!("selection operand {name} is {field_type}, not a simple value"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures;

    #[test]
    fn registration_is_interned() {
        let mut space = PartitionSpace::new();
        let amount = FieldRef::new("amount", FieldType::Continuous);
        let first = space.add_field_dimension("Orders", amount.clone()).unwrap();
        assert_eq!(space.add_field_dimension("Orders", amount).unwrap(), first);

        let table = FieldRef::new("Orders", FieldType::ObjectArray("Orders".into()));
        let a = space.add_partition("Customer", table.clone(), &[(first, 4)]).unwrap();
        let b = space.add_partition("Customer", table.clone(), &[(first, 4)]).unwrap();
        let c = space.add_partition("Customer", table, &[(first, 8)]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(space.partition_size(c), 8);
    }

    #[test]
    fn invalid_partitions_are_contract_errors() {
        let mut space = PartitionSpace::new();
        let date = space.add_field_dimension("Orders", FieldRef::new("day", FieldType::Date));
        assert!(matches!(date, Err(BuildError::Contract(_))));

        let amount = space.add_field_dimension("Orders", FieldRef::new("amount", FieldType::Continuous)).unwrap();
        let table = FieldRef::new("Orders", FieldType::ObjectArray("Orders".into()));
        assert!(space.add_partition("Customer", table.clone(), &[(amount, 3)]).is_err());
        assert!(space.add_partition("Customer", FieldRef::new("x", FieldType::Continuous), &[(amount, 2)]).is_err());

        let id = space.add_partition("Customer", table, &[(amount, 2)]).unwrap();
        assert!(space.add_part(id, vec![2], 0.0).is_err());
        assert!(space.add_part(id, vec![0, 0], 0.0).is_err());
        assert!(space.add_part(id, vec![1], 0.0).is_ok());
    }

    #[test]
    fn actual_size_uses_analysed_parts() {
        let fx = fixtures::customer_orders();
        assert_eq!(fx.space.partition_size(fx.partition), 4);
        assert_eq!(fx.space.actual_partition_size(fx.partition), Some(3));

        let mut bare = PartitionSpace::new();
        let amount = bare.add_field_dimension("Orders", FieldRef::new("amount", FieldType::Continuous)).unwrap();
        let table = FieldRef::new("Orders", FieldType::ObjectArray("Orders".into()));
        let id = bare.add_partition("Customer", table, &[(amount, 2)]).unwrap();
        assert_eq!(bare.actual_partition_size(id), None);
    }
}
