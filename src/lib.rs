extern crate self as fieldsmith;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[macro_use]
mod macros;
mod api;
mod builder;
mod compliance;
mod error;
mod formula;
mod model;
mod schema;
mod selection;
mod template;

pub use api::{
    BuildRequest, BuildResult, Options, assign_random_indexes, build_schema, build_schema_default,
};
pub use builder::{
    AnalysisMetrics, BuildMetrics, BuildOutput, BuilderMode, ClassBuilder, ConstructionMetrics, FieldPath,
};
pub use compliance::{ClassCompliance, DomainCompliance};
pub use error::{BuildError, FormulaError, SamplingError};
pub use formula::{Constant, Formula, Operand};
pub use model::{
    ConstructedRule, Dimension, DimensionId, DimensionOrigin, FieldRef, NameGenerator, Origin, Part, PartRef,
    Partition, PartitionId, PartitionSpace, RuleClass, RuleOperand, RuleSignature, compare_block_cost_name,
    compare_cost, compare_cost_name, compare_cost_random_index, compare_partitions, compare_rules, compute_var_key,
    decode_var_key, materialize_formula, part_selection_formula, partition_formula, table_partition_formula,
};
pub use schema::{COST_META_KEY, EntityType, Field, FieldBlock, Schema};
pub use selection::{
    AnalyserState, MemorySampler, OperandStats, SampleCollector, SampleColumn, SampleRequest, Samples,
    SelectionAnalyser, SelectionPart, human_readable_lower_mean,
};
pub use template::{DefaultCatalogue, Family, Template, TemplateCatalogue, TemplateSet};

// --- Continuous sentinels ---------------------------------------------------

/// Missing continuous value. Sorts before every real number.
pub const MISSING: f64 = f64::NEG_INFINITY;

/// Open upper bound used by the last interval of a continuous partition.
pub const MAX_VALUE: f64 = 1e100;

// --- Types ------------------------------------------------------------------

/// Coarse type of a field, a template slot or a template result.
///
/// `Part` only ever appears in template slots: it marks the operand that
/// references one cell of a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Kind {
    Continuous,
    Symbol,
    Date,
    Time,
    Timestamp,
    TimestampTZ,
    Object,
    ObjectArray,
    Structure,
    Part,
}

impl Kind {
    pub fn is_simple(self) -> bool {
        matches!(
            self,
            Kind::Continuous | Kind::Symbol | Kind::Date | Kind::Time | Kind::Timestamp | Kind::TimestampTZ
        )
    }

    pub fn is_relation(self) -> bool {
        matches!(self, Kind::Object | Kind::ObjectArray)
    }

    pub fn label(self) -> &'static str {
        match self {
            Kind::Continuous => "Numerical",
            Kind::Symbol => "Categorical",
            Kind::Date => "Date",
            Kind::Time => "Time",
            Kind::Timestamp => "Timestamp",
            Kind::TimestampTZ => "TimestampTZ",
            Kind::Object => "Entity",
            Kind::ObjectArray => "Table",
            Kind::Structure => "Structure",
            Kind::Part => "Part",
        }
    }
}

/// Concrete type of a field. Relations and structures carry the name of the
/// class (or structure) they point to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldType {
    Continuous,
    Symbol,
    Date,
    Time,
    Timestamp,
    TimestampTZ,
    Object(String),
    ObjectArray(String),
    Structure(String),
}

impl FieldType {
    pub fn kind(&self) -> Kind {
        match self {
            FieldType::Continuous => Kind::Continuous,
            FieldType::Symbol => Kind::Symbol,
            FieldType::Date => Kind::Date,
            FieldType::Time => Kind::Time,
            FieldType::Timestamp => Kind::Timestamp,
            FieldType::TimestampTZ => Kind::TimestampTZ,
            FieldType::Object(_) => Kind::Object,
            FieldType::ObjectArray(_) => Kind::ObjectArray,
            FieldType::Structure(_) => Kind::Structure,
        }
    }

    /// Field type for a simple kind; `None` for kinds that need a class name.
    pub fn simple(kind: Kind) -> Option<FieldType> {
        match kind {
            Kind::Continuous => Some(FieldType::Continuous),
            Kind::Symbol => Some(FieldType::Symbol),
            Kind::Date => Some(FieldType::Date),
            Kind::Time => Some(FieldType::Time),
            Kind::Timestamp => Some(FieldType::Timestamp),
            Kind::TimestampTZ => Some(FieldType::TimestampTZ),
            _ => None,
        }
    }

    pub fn is_simple(&self) -> bool {
        self.kind().is_simple()
    }

    pub fn is_relation(&self) -> bool {
        self.kind().is_relation()
    }

    /// Class reached by a relation field.
    pub fn class_name(&self) -> Option<&str> {
        match self {
            FieldType::Object(class) | FieldType::ObjectArray(class) => Some(class),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::Object(class) => write!(f, "Entity({class})"),
            FieldType::ObjectArray(class) => write!(f, "Table({class})"),
            FieldType::Structure(name) => write!(f, "Structure({name})"),
            other => f.write_str(other.kind().label()),
        }
    }
}

bitflags::bitflags! {
    /// Per-field status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FieldFlags: u32 {
        /// The field is part of the model input.
        const USED = 1 << 0;
        /// The field is computed or read when a record is loaded.
        const LOADED = 1 << 1;
    }
}

// --- Cancellation -----------------------------------------------------------

/// Cooperative interruption flag shared between a build and its caller.
///
/// Cloning shares the underlying flag, so a caller can keep one clone and
/// request an interruption while the build polls another.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
