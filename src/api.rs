use crate::builder::{BuildMetrics, ClassBuilder, FieldPath};
use crate::compliance::DomainCompliance;
use crate::error::BuildError;
use crate::model::{ConstructedRule, PartitionSpace, compare_cost_random_index};
use crate::schema::Schema;
use crate::selection::{SampleCollector, SelectionAnalyser};
use crate::template::{DefaultCatalogue, TemplateCatalogue};
use crate::Interrupt;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::time::Instant;

/// Options that affect how candidate rules become fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// Share common sub-rules through one intermediate field each.
    pub rule_optimization: bool,
    /// Realize statistics over selections as field blocks. Needs
    /// `rule_optimization`.
    pub sparse_optimization: bool,
    /// Smallest actual partition size realized as a block; 0 always uses
    /// blocks.
    pub sparse_block_min_size: usize,
    /// `Sum(Orders.amount)` rather than `ConstructedFeature1`.
    pub interpretable_names: bool,
    /// Cap on new candidate fields; `None` keeps every candidate.
    pub max_constructed_fields: Option<usize>,
    pub construction_regularization: bool,
    /// Cost of a used native field under construction regularization.
    pub selection_cost: f64,
    /// Field of the main class excluded from cost annotation.
    pub target_field: Option<String>,
    /// Seed of the tie-break indexes.
    pub seed: u64,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            rule_optimization: true,
            sparse_optimization: false,
            sparse_block_min_size: 0,
            interpretable_names: true,
            max_constructed_fields: None,
            construction_regularization: true,
            selection_cost: 1.0,
            target_field: None,
            seed: 1,
        }
    }
}

impl Options {
    pub fn validate(&self) -> Result<(), BuildError> {
        if !self.selection_cost.is_finite() || self.selection_cost < 0.0 {
            let msg = format!("selection cost {} is not a non-negative number", self.selection_cost);
            return Err(BuildError::InvalidOptions(msg));
        }
        if self.target_field.as_deref().is_some_and(str::is_empty) {
            return Err(BuildError::InvalidOptions("empty target field".to_string()));
        }
        Ok(())
    }
}

/// Input of one build.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub schema: Schema,
    /// Partitions and dimensions referenced by the rules' parts.
    pub space: PartitionSpace,
    /// Candidate rules. Their order does not matter.
    pub rules: Vec<ConstructedRule>,
}

/// Result from [`build_schema`] and [`build_schema_default`].
#[derive(Debug, Clone)]
pub struct BuildResult {
    /// The compiled target schema.
    pub schema: Schema,
    /// Every field the build added, as `(class, name)`.
    pub created_fields: Vec<FieldPath>,
    pub created_blocks: Vec<FieldPath>,
    /// The request's partition space, with the analysed statistics.
    pub space: PartitionSpace,
    pub metrics: BuildMetrics,
}

/// Build the target schema of `request`.
///
/// Rules are ordered by cost with seeded tie-breaks, selection operands are
/// analysed through `sampler`, rules whose parts do not resolve are dropped,
/// and the rest are realized in a clone of the request schema.
///
/// # Example
/// ```
/// use fieldsmith::{BuildRequest, ConstructedRule, DefaultCatalogue, EntityType, Field, FieldType};
/// use fieldsmith::{MemorySampler, Options, PartitionSpace, Schema, TemplateCatalogue, build_schema_default};
///
/// let schema = Schema::new(vec![
///     EntityType::new("Customer").with_field(Field::native("Orders", FieldType::ObjectArray("Orders".into()))),
///     EntityType::new("Orders").with_field(Field::native("amount", FieldType::Continuous)),
/// ]);
/// let count = ConstructedRule::new(DefaultCatalogue.lookup("TableCount").unwrap(), "Customer")
///     .field("Orders", FieldType::ObjectArray("Orders".into()))
///     .with_cost(1.0);
/// let request = BuildRequest { schema, space: PartitionSpace::new(), rules: vec![count] };
///
/// let out = build_schema_default(request, &MemorySampler::new(0), &Options::default()).unwrap();
/// assert_eq!(out.created_fields, vec![("Customer".to_string(), "Count(Orders)".to_string())]);
/// ```
pub fn build_schema(
    request: BuildRequest,
    catalogue: &dyn TemplateCatalogue,
    sampler: &dyn SampleCollector,
    options: &Options,
    interrupt: &Interrupt,
) -> Result<BuildResult, BuildError> {
    let started = Instant::now();
    let mut metrics = BuildMetrics::default();
    options.validate()?;

    let BuildRequest { schema, mut space, mut rules } = request;
    check_request(&schema, &space, &rules, options)?;
    metrics.rules_requested = rules.len();

    assign_random_indexes(&mut rules, options.seed);
    rules.sort_by(|a, b| compare_cost_random_index(a, b, &space));

    let compliance_started = Instant::now();
    let compliance = DomainCompliance::collect(&schema, catalogue);
    metrics.compliance = compliance_started.elapsed();
    debug!("compliance registry: {} classes", compliance.classes().len());

    let builder = ClassBuilder::new(catalogue, options, interrupt.clone());
    let mut analyser = SelectionAnalyser::new().with_interrupt(interrupt.clone());
    for record in compliance.classes() {
        analyser.add_class_stats(record);
    }
    analyser.compute_stats(&schema, &mut space, &rules, sampler, &builder)?;
    metrics.analysis = analyser.metrics().clone();

    let rules = analyser.retain_resolvable(rules, &space);
    metrics.rules_dropped = metrics.rules_requested - rules.len();

    let output = builder.build(&schema, &mut space, &rules)?;
    metrics.construction = output.metrics;
    metrics.total = started.elapsed();
    info!(
        "built {} fields and {} blocks from {} candidates ({} dropped) in {:?}",
        output.created_fields.len(),
        output.created_blocks.len(),
        metrics.rules_requested,
        metrics.rules_dropped,
        metrics.total
    );

    Ok(BuildResult {
        schema: output.schema,
        created_fields: output.created_fields,
        created_blocks: output.created_blocks,
        space,
        metrics,
    })
}

/// [`build_schema`] with the default catalogue and no interruption.
pub fn build_schema_default(
    request: BuildRequest,
    sampler: &dyn SampleCollector,
    options: &Options,
) -> Result<BuildResult, BuildError> {
    build_schema(request, &DefaultCatalogue, sampler, options, &Interrupt::new())
}

/// Assign each rule a tie-break index, a permutation of `0..rules.len()`
/// drawn from `seed`.
pub fn assign_random_indexes(rules: &mut [ConstructedRule], seed: u64) {
    let mut indexes: Vec<usize> = (0..rules.len()).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indexes.shuffle(&mut rng);
    for (rule, index) in rules.iter_mut().zip(indexes) {
        rule.random_index = index;
    }
}

fn check_request(
    schema: &Schema,
    space: &PartitionSpace,
    rules: &[ConstructedRule],
    options: &Options,
) -> Result<(), BuildError> {
    schema.compile()?;
    let main = schema.main().ok_or_else(|| BuildError::InvalidSchema("no entity type".to_string()))?;
    if let Some(target) = &options.target_field {
        if main.field(target).is_none() {
            return Err(BuildError::InvalidOptions(format!("target {target} is not a field of {}", main.name)));
        }
    }
    for rule in rules {
        schema.entity_or_err(&rule.class)?;
        rule.check(space)?;
    }
    Ok(())
}
