use super::quantile::{GroupBuilder, IntervalBuilder};
use log::debug;

/// Smallest average number of sampled values per partile.
pub const MIN_PARTILE_FREQUENCY: usize = 4;

/// One analysed part of a selection operand.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionPart {
    /// Values in `]lower, upper]`; `lower` is missing for the first interval,
    /// `upper` is [`crate::MAX_VALUE`] for the last one.
    Interval { lower: f64, upper: f64, index: usize },
    /// A frequent value. The garbage group of a granularity also lists the
    /// frequent values it excludes in `outside`.
    Value { value: String, index: usize, outside: Vec<String> },
}

impl SelectionPart {
    /// Partile index at the part's granularity.
    pub fn index(&self) -> usize {
        match self {
            SelectionPart::Interval { index, .. } | SelectionPart::Value { index, .. } => *index,
        }
    }

    pub fn is_garbage(&self) -> bool {
        matches!(self, SelectionPart::Value { outside, .. } if !outside.is_empty())
    }
}

/// Granularities (increasing powers of two) retained for one operand, each
/// with the parts it introduced, sorted by partile index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperandStats {
    granularities: Vec<usize>,
    parts: Vec<Vec<SelectionPart>>,
}

impl OperandStats {
    /// Stats from already analysed parts. Parts are sorted by index.
    pub fn from_parts(granularities: Vec<usize>, mut parts: Vec<Vec<SelectionPart>>) -> Self {
        for level in &mut parts {
            level.sort_by_key(SelectionPart::index);
        }
        OperandStats { granularities, parts }
    }

    /// Quantile intervals at G = 2, 4, ...: a granularity is kept when it
    /// yields intervals not seen at a coarser one.
    pub fn continuous(samples: Vec<f64>, max_partiles: usize) -> Self {
        let builder = IntervalBuilder::new(samples);
        let instances = builder.instance_count();
        let mut stats = OperandStats::default();
        let mut seen: Vec<(f64, f64, usize)> = Vec::new();

        let mut granularity = 2;
        while granularity <= instances / MIN_PARTILE_FREQUENCY && granularity <= max_partiles {
            let intervals = builder.intervals(granularity);
            if intervals.len() > 1 {
                let mut parts = Vec::new();
                for interval in &intervals {
                    let (lower, upper) = builder.bounds(interval);
                    let key = (lower, upper, interval.quantile);
                    if !seen.contains(&key) {
                        seen.push(key);
                        parts.push(SelectionPart::Interval { lower, upper, index: interval.quantile });
                    }
                }
                if !parts.is_empty() {
                    stats.granularities.push(granularity);
                    stats.parts.push(parts);
                }
            }
            if intervals.len() == builder.value_count() {
                break;
            }
            granularity *= 2;
        }
        debug!(
            "continuous operand: {instances} values, {} distinct, granularities {:?}",
            builder.value_count(),
            stats.granularities
        );
        stats
    }

    /// Frequent-value groups at G = 2, 4, ...: a granularity is kept when the
    /// group count grows. Its parts start at the previous garbage group, and
    /// its own garbage group lists the values kept apart.
    pub fn symbol(samples: Vec<String>, max_partiles: usize) -> Self {
        let builder = GroupBuilder::new(samples);
        let instances = builder.instance_count();
        let mut stats = OperandStats::default();

        let mut granularity = 2;
        let mut last_groups = 1;
        while granularity <= instances / MIN_PARTILE_FREQUENCY && granularity <= max_partiles {
            let groups = builder.group_count(granularity);
            if groups > last_groups {
                let parts = (last_groups - 1..groups)
                    .map(|group| {
                        let outside = if group + 1 == groups {
                            (0..group).map(|i| builder.value(i).to_string()).collect()
                        } else {
                            Vec::new()
                        };
                        SelectionPart::Value {
                            value: builder.value(group).to_string(),
                            index: GroupBuilder::group_quantile_index(group, groups, granularity),
                            outside,
                        }
                    })
                    .collect();
                stats.granularities.push(granularity);
                stats.parts.push(parts);
                last_groups = groups;
            }
            if groups == builder.value_count() {
                break;
            }
            granularity *= 2;
        }
        debug!(
            "symbol operand: {instances} values, {} distinct, granularities {:?}",
            builder.value_count(),
            stats.granularities
        );
        stats
    }

    pub fn granularities(&self) -> &[usize] {
        &self.granularities
    }

    pub fn is_empty(&self) -> bool {
        self.granularities.is_empty()
    }

    pub fn parts_at(&self, granularity_index: usize) -> &[SelectionPart] {
        &self.parts[granularity_index]
    }

    pub fn search_granularity_index(&self, granularity: usize) -> Option<usize> {
        self.granularities.binary_search(&granularity).ok()
    }

    pub fn search_part(parts: &[SelectionPart], index: usize) -> Option<&SelectionPart> {
        parts.binary_search_by_key(&index, SelectionPart::index).ok().map(|position| &parts[position])
    }

    /// The part with partile `index` at `granularity`.
    pub fn part(&self, granularity: usize, index: usize) -> Option<&SelectionPart> {
        let position = self.search_granularity_index(granularity)?;
        Self::search_part(self.parts_at(position), index)
    }

    pub fn part_count(&self) -> usize {
        self.parts.iter().map(Vec::len).sum()
    }
}
