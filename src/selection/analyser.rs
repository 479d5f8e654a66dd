use super::sampler::{SampleCollector, SampleColumn, SampleRequest};
use super::stats::OperandStats;
use crate::builder::{AnalysisMetrics, ClassBuilder};
use crate::compliance::ClassCompliance;
use crate::error::{BuildError, SamplingError};
use crate::model::{ConstructedRule, DimensionId, PartitionSpace, RuleOperand, part_selection_formula};
use crate::schema::Schema;
use crate::{Interrupt, Kind};
use log::{debug, info};
use std::collections::BTreeSet;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalyserState {
    Uninitialized,
    /// Used dimensions were found and the reduced schema was built.
    StatsRequested,
    SampleCollected,
    PartitionsComputed,
    Failed,
    Interrupted,
}

/// Computes the statistics of every used dimension of a partition space.
///
/// A failed or interrupted analysis leaves no statistics behind.
#[derive(Debug, Clone)]
pub struct SelectionAnalyser {
    state: AnalyserState,
    classes: BTreeSet<String>,
    interrupt: Interrupt,
    metrics: AnalysisMetrics,
}

impl Default for SelectionAnalyser {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionAnalyser {
    pub fn new() -> Self {
        SelectionAnalyser {
            state: AnalyserState::Uninitialized,
            classes: BTreeSet::new(),
            interrupt: Interrupt::new(),
            metrics: AnalysisMetrics::default(),
        }
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn state(&self) -> AnalyserState {
        self.state
    }

    pub fn metrics(&self) -> &AnalysisMetrics {
        &self.metrics
    }

    /// Register the class of a compliance record for analysis.
    pub fn add_class_stats(&mut self, record: &ClassCompliance) {
        self.add_class(record.class());
    }

    pub fn add_class(&mut self, class: &str) {
        self.classes.insert(class.to_string());
    }

    /// Recompute use counts from `rules` and analyse every used dimension.
    ///
    /// On failure every dimension loses its statistics and the state records
    /// whether the analysis failed or was interrupted.
    pub fn compute_stats(
        &mut self,
        schema: &Schema,
        space: &mut PartitionSpace,
        rules: &[ConstructedRule],
        sampler: &dyn SampleCollector,
        builder: &ClassBuilder<'_>,
    ) -> Result<(), BuildError> {
        let started = Instant::now();
        let result = self.analyse(schema, space, rules, sampler, builder);
        self.metrics.total = started.elapsed();
        match result {
            Ok(()) => {
                self.state = AnalyserState::PartitionsComputed;
                Ok(())
            }
            Err(err) => {
                space.clear_stats();
                space.clear_schema_links();
                self.state = match err {
                    BuildError::Interrupted => AnalyserState::Interrupted,
                    _ => AnalyserState::Failed,
                };
                info!("selection analysis stopped: {err}");
                Err(err)
            }
        }
    }

    fn check_interrupt(&self) -> Result<(), BuildError> {
        if self.interrupt.is_requested() { Err(BuildError::Interrupted) } else { Ok(()) }
    }

    fn analyse(
        &mut self,
        schema: &Schema,
        space: &mut PartitionSpace,
        rules: &[ConstructedRule],
        sampler: &dyn SampleCollector,
        builder: &ClassBuilder<'_>,
    ) -> Result<(), BuildError> {
        space.reset_use_counts();
        for rule in rules {
            rule.increment_use_counts(space);
        }
        let used: Vec<DimensionId> = space.dimensions().filter(|(_, d)| d.use_count > 0).map(|(id, _)| id).collect();
        if used.is_empty() {
            debug!("no selection operand used, nothing to sample");
            return Ok(());
        }
        for id in &used {
            let class = &space.dimension(*id).class;
            if !self.classes.contains(class) {
                return Err(BuildError::Contract(format!("class {class} was not registered for analysis")));
            }
        }
        self.check_interrupt()?;

        let reduced = builder.build_selection_schema(schema, space)?;
        self.state = AnalyserState::StatsRequested;
        let mut requests = Vec::with_capacity(used.len());
        for id in &used {
            let dimension = space.dimension(*id);
            let field = dimension
                .selection_field
                .clone()
                .ok_or_else(|| BuildError::Contract(format!("used dimension of {} has no field", dimension.class)))?;
            requests.push(SampleRequest { class: dimension.class.clone(), field, kind: dimension.kind() });
        }
        self.check_interrupt()?;

        let sampling = Instant::now();
        let samples = sampler.collect_samples(&reduced, &requests).map_err(|err| match err {
            SamplingError::Interrupted => BuildError::Interrupted,
            other => BuildError::Sampling(other),
        })?;
        self.metrics.sampling = sampling.elapsed();
        self.metrics.objects_read = samples.objects_read;
        self.state = AnalyserState::SampleCollected;

        let computing = Instant::now();
        for (id, request) in used.iter().zip(&requests) {
            self.check_interrupt()?;
            let missing =
                || SamplingError::MissingColumn { class: request.class.clone(), field: request.field.clone() };
            let column = samples.column(&request.class, &request.field).ok_or_else(missing)?;
            let stats = match (request.kind, column) {
                (Kind::Continuous, SampleColumn::Continuous(values)) => {
                    OperandStats::continuous(values.clone(), samples.objects_read)
                }
                (Kind::Symbol, SampleColumn::Symbol(values)) => {
                    OperandStats::symbol(values.clone(), samples.objects_read)
                }
                (kind, _) => {
                    return Err(BuildError::Sampling(SamplingError::KindMismatch {
                        class: request.class.clone(),
                        field: request.field.clone(),
                        expected: kind.label(),
                    }));
                }
            };
            debug!(
                "{}.{}: {} parts over granularities {:?}",
                request.class,
                request.field,
                stats.part_count(),
                stats.granularities()
            );
            space.dimension_mut(*id).stats = Some(stats);
        }
        self.metrics.stats = computing.elapsed();
        self.metrics.dimensions = used.len();

        // Selection fields named fields of the reduced schema only.
        space.clear_schema_links();
        Ok(())
    }

    /// Rules whose parts all resolve against the computed statistics. The
    /// others are dropped and logged.
    pub fn retain_resolvable(&self, rules: Vec<ConstructedRule>, space: &PartitionSpace) -> Vec<ConstructedRule> {
        rules
            .into_iter()
            .filter(|rule| {
                let keep = resolves(rule, space);
                if !keep {
                    debug!("dropping {} in {}: a part has no analysed counterpart", rule.name(), rule.class);
                }
                keep
            })
            .collect()
    }
}

fn resolves(rule: &ConstructedRule, space: &PartitionSpace) -> bool {
    rule.operands.iter().all(|operand| match operand {
        RuleOperand::Field(_) => true,
        RuleOperand::Rule(inner) => resolves(inner, space),
        RuleOperand::Part(part) => part_selection_formula(part, space).is_ok(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Options;
    use crate::compliance::DomainCompliance;
    use crate::model::fixtures::{self, catalogue_rule};
    use crate::selection::{MemorySampler, SelectionPart, Samples};
    use crate::template::DefaultCatalogue;
    use crate::{MAX_VALUE, MISSING};

    fn analyser(schema: &Schema) -> SelectionAnalyser {
        let mut analyser = SelectionAnalyser::new();
        for record in DomainCompliance::collect(schema, &DefaultCatalogue).classes() {
            analyser.add_class_stats(record);
        }
        analyser
    }

    fn amounts() -> MemorySampler {
        MemorySampler::new(16).with_continuous("Orders", "amount", (0..16).map(f64::from).collect())
    }

    #[test]
    fn used_dimensions_are_analysed() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut fx = fixtures::customer_orders();
        let options = Options::default();
        let builder = ClassBuilder::new(&DefaultCatalogue, &options, Interrupt::new());
        let rules = vec![catalogue_rule("TableCount", "Customer").rule(fx.selection(&[1]))];

        let mut analyser = analyser(&fx.schema);
        assert_eq!(analyser.state(), AnalyserState::Uninitialized);
        analyser.compute_stats(&fx.schema, &mut fx.space, &rules, &amounts(), &builder).unwrap();
        assert_eq!(analyser.state(), AnalyserState::PartitionsComputed);
        assert_eq!(analyser.metrics().objects_read, 16);

        let dimension = fx.space.dimension(fx.amount_dimension);
        let stats = dimension.stats.as_ref().unwrap();
        assert_eq!(stats.granularities(), &[2, 4]);
        assert_eq!(stats.part(2, 0), Some(&SelectionPart::Interval { lower: MISSING, upper: 7.5, index: 0 }));
        assert_eq!(stats.part(4, 1), Some(&SelectionPart::Interval { lower: 3.5, upper: 7.5, index: 1 }));
        assert_eq!(stats.part(4, 3), Some(&SelectionPart::Interval { lower: 11.5, upper: MAX_VALUE, index: 3 }));
        assert_eq!(dimension.selection_field, None);
        assert_eq!(fx.space.actual_partition_size(fx.partition), Some(4));
    }

    #[test]
    fn nothing_is_sampled_without_selection() {
        let mut fx = fixtures::customer_orders();
        let options = Options::default();
        let builder = ClassBuilder::new(&DefaultCatalogue, &options, Interrupt::new());
        let failing = |_: &Schema, _: &[SampleRequest]| -> Result<Samples, SamplingError> {
            Err(SamplingError::Failed("must not be called".into()))
        };
        let mut analyser = analyser(&fx.schema);
        let rules = [fx.sum_amount()];
        analyser.compute_stats(&fx.schema, &mut fx.space, &rules, &failing, &builder).unwrap();
        assert_eq!(analyser.state(), AnalyserState::PartitionsComputed);
    }

    #[test]
    fn failures_clear_every_statistic() {
        let mut fx = fixtures::customer_orders();
        let options = Options::default();
        let builder = ClassBuilder::new(&DefaultCatalogue, &options, Interrupt::new());
        let rules = vec![catalogue_rule("TableCount", "Customer").rule(fx.selection(&[0]))];
        let failing = |_: &Schema, _: &[SampleRequest]| -> Result<Samples, SamplingError> {
            Err(SamplingError::Failed("disk".into()))
        };

        let mut analyser = analyser(&fx.schema);
        let err = analyser.compute_stats(&fx.schema, &mut fx.space, &rules, &failing, &builder).unwrap_err();
        assert!(matches!(err, BuildError::Sampling(SamplingError::Failed(_))));
        assert_eq!(analyser.state(), AnalyserState::Failed);
        assert!(fx.space.dimension(fx.amount_dimension).stats.is_none());
    }

    #[test]
    fn interruption_is_reported() {
        let mut fx = fixtures::customer_orders();
        let options = Options::default();
        let builder = ClassBuilder::new(&DefaultCatalogue, &options, Interrupt::new());
        let rules = vec![catalogue_rule("TableCount", "Customer").rule(fx.selection(&[0]))];
        let interrupt = Interrupt::new();
        interrupt.request();

        let mut analyser = analyser(&fx.schema).with_interrupt(interrupt);
        let err = analyser.compute_stats(&fx.schema, &mut fx.space, &rules, &amounts(), &builder).unwrap_err();
        assert!(matches!(err, BuildError::Interrupted));
        assert_eq!(analyser.state(), AnalyserState::Interrupted);
        assert!(fx.space.dimension(fx.amount_dimension).stats.is_none());
    }

    #[test]
    fn unregistered_classes_are_contract_errors() {
        let mut fx = fixtures::customer_orders();
        let options = Options::default();
        let builder = ClassBuilder::new(&DefaultCatalogue, &options, Interrupt::new());
        let rules = vec![fx.selection(&[0])];
        let err = SelectionAnalyser::new().compute_stats(&fx.schema, &mut fx.space, &rules, &amounts(), &builder);
        assert!(matches!(err, Err(BuildError::Contract(_))));
    }

    #[test]
    fn unresolvable_rules_are_dropped() {
        let mut fx = fixtures::customer_orders();
        // Partile 2 has no analysed part at granularity 4.
        fx.space.add_part(fx.partition, vec![2], 1.0).unwrap();
        let rules = vec![
            catalogue_rule("TableCount", "Customer").rule(fx.selection(&[1])),
            catalogue_rule("TableCount", "Customer").rule(fx.selection(&[2])),
            fx.sum_amount(),
        ];
        let kept = SelectionAnalyser::new().retain_resolvable(rules, &fx.space);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].name(), "TableSum");
    }
}
