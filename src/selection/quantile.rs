//! Quantile builders over sampled operand values, and human-readable bounds.

use crate::{MAX_VALUE, MISSING};

/// Significant digits kept when rounding a bound.
const DIGITS: i32 = 10;

// --- Continuous -------------------------------------------------------------

/// One quantile interval, as a range of distinct value indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QuantileInterval {
    /// Index of the quantile that closes the interval.
    pub quantile: usize,
    pub first: usize,
    pub last: usize,
}

/// Sorted distinct values of a continuous sample with their cumulative
/// frequencies. NaN samples count as missing.
#[derive(Debug, Clone, Default)]
pub(crate) struct IntervalBuilder {
    values: Vec<f64>,
    cumulative: Vec<usize>,
}

impl IntervalBuilder {
    pub fn new(mut samples: Vec<f64>) -> Self {
        for value in &mut samples {
            if value.is_nan() {
                *value = MISSING;
            }
        }
        samples.sort_by(f64::total_cmp);

        let mut builder = IntervalBuilder::default();
        for (seen, value) in samples.iter().enumerate() {
            if builder.values.last() == Some(value) {
                if let Some(last) = builder.cumulative.last_mut() {
                    *last = seen + 1;
                }
            } else {
                builder.values.push(*value);
                builder.cumulative.push(seen + 1);
            }
        }
        builder
    }

    pub fn instance_count(&self) -> usize {
        self.cumulative.last().copied().unwrap_or(0)
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Equal-frequency intervals for `quantiles` quantiles. Each quantile
    /// boundary moves to the nearest distinct value; empty quantiles are
    /// merged into the previous interval.
    pub fn intervals(&self, quantiles: usize) -> Vec<QuantileInterval> {
        const EPSILON: f64 = 1e-10;
        let mut intervals: Vec<QuantileInterval> = Vec::new();
        if self.values.is_empty() || quantiles == 0 {
            return intervals;
        }

        let total = self.instance_count() as f64;
        let mut last_upper = 0;
        for quantile in 0..quantiles {
            let mut searched = total * (quantile as f64 + 1.0) / quantiles as f64;
            if quantile >= quantiles / 2 {
                searched += EPSILON;
            } else {
                searched -= EPSILON;
            }
            let rounded = (searched + 0.5).floor().max(0.0) as usize;

            let mut upper = self.cumulative.partition_point(|&c| c < rounded).min(self.values.len() - 1);
            if upper > 0 {
                let below = (searched - self.cumulative[upper - 1] as f64).abs();
                let above = (self.cumulative[upper] as f64 - searched).abs();
                if below <= above {
                    upper -= 1;
                }
            }

            if quantile == 0 || upper > last_upper {
                let first = intervals.last().map_or(0, |previous| previous.last + 1);
                last_upper = upper;
                intervals.push(QuantileInterval { quantile, first, last: upper });
            }
        }
        intervals
    }

    /// `]lower, upper]` of an interval: missing below the first value, the
    /// open maximum above the last one, human-readable means in between.
    pub fn bounds(&self, interval: &QuantileInterval) -> (f64, f64) {
        let lower = if interval.first == 0 {
            MISSING
        } else {
            human_readable_lower_mean(self.values[interval.first], self.values[interval.first - 1])
        };
        let upper = if interval.last + 1 >= self.values.len() {
            MAX_VALUE
        } else {
            human_readable_lower_mean(self.values[interval.last], self.values[interval.last + 1])
        };
        (lower, upper)
    }
}

// --- Symbol -----------------------------------------------------------------

/// Distinct values of a symbol sample, by decreasing frequency then value.
#[derive(Debug, Clone, Default)]
pub(crate) struct GroupBuilder {
    values: Vec<String>,
    frequencies: Vec<usize>,
}

impl GroupBuilder {
    pub fn new(samples: Vec<String>) -> Self {
        let mut counts: std::collections::BTreeMap<String, usize> = std::collections::BTreeMap::new();
        for value in samples {
            *counts.entry(value).or_default() += 1;
        }
        let mut entries: Vec<(String, usize)> = counts.into_iter().collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let (values, frequencies) = entries.into_iter().unzip();
        GroupBuilder { values, frequencies }
    }

    pub fn instance_count(&self) -> usize {
        self.frequencies.iter().sum()
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub fn value(&self, index: usize) -> &str {
        &self.values[index]
    }

    /// Number of groups for `quantiles` quantiles: one singleton group per
    /// value reaching the minimum frequency, plus a garbage group for the
    /// remaining values.
    pub fn group_count(&self, quantiles: usize) -> usize {
        let count = self.values.len();
        if count == 0 || quantiles == 0 {
            return 0;
        }
        let min_frequency = self.instance_count().div_ceil(quantiles);
        let last = quantiles.min(count) - 1;
        let index = self.frequencies[..=last].partition_point(|&f| f >= min_frequency).saturating_sub(1);

        let mut groups = index + 1;
        if groups < count && (index > 0 || self.frequencies[0] >= min_frequency) {
            groups += 1;
        }
        groups
    }

    /// Quantile index of a group: singletons keep their rank, the garbage
    /// group takes the last quantile.
    pub fn group_quantile_index(group: usize, groups: usize, quantiles: usize) -> usize {
        if group + 1 < groups { group } else { quantiles - 1 }
    }
}

// --- Human-readable bounds --------------------------------------------------

/// A value between `a` and `b` with as few significant digits as possible,
/// within 10% of their mean. Falls back to the lower value when rounding
/// reaches a bound. Missing if either value is missing.
pub fn human_readable_lower_mean(a: f64, b: f64) -> f64 {
    if a == MISSING || b == MISSING {
        return MISSING;
    }
    let (lower, upper) = if a <= b { (a, b) } else { (b, a) };
    let low_mean = ((11.0 * lower + 9.0 * upper) / 20.0).max(lower);
    let high_mean = ((9.0 * lower + 11.0 * upper) / 20.0).min(upper);

    let mean = compute_human_readable(low_mean, high_mean);
    if mean <= lower || mean >= upper { lower } else { mean }
}

/// Shortest decimal value within `[lower, upper]` around their middle.
fn compute_human_readable(lower: f64, upper: f64) -> f64 {
    let value = (lower + upper) / 2.0;
    let delta = (upper - lower) / 2.0;
    if value.is_infinite() {
        return MISSING;
    }
    if value == 0.0 {
        return 0.0;
    }

    let positive = value.abs();
    let exponent = positive.log10().floor() as i32 + 1;
    if exponent >= 100 {
        return if value < 0.0 { -MAX_VALUE } else { MAX_VALUE };
    }
    if exponent < -100 {
        return 0.0;
    }

    let mut full_exponent = exponent - DIGITS + 1;
    let mut mantissa = (positive * 10f64.powi(-full_exponent) + 0.5).floor() as u64;
    let mut candidate = mantissa as f64 * 10f64.powi(full_exponent);
    let mut result = candidate;
    while (candidate - positive).abs() < delta && full_exponent < 200 {
        result = candidate;
        mantissa /= 10;
        full_exponent += 1;
        candidate = mantissa as f64 * 10f64.powi(full_exponent);
    }

    if value < 0.0 {
        result = -result;
    }
    result.clamp(lower, upper)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readable_means_drop_digits() {
        assert_eq!(human_readable_lower_mean(10.0, 25.0), 17.0);
        assert_eq!(human_readable_lower_mean(25.0, 10.0), 17.0);
        assert_eq!(human_readable_lower_mean(1.0, 2.0), 1.5);
        assert_eq!(human_readable_lower_mean(0.0, 100.0), 50.0);
        assert_eq!(human_readable_lower_mean(-100.0, 0.0), -50.0);
        assert_eq!(human_readable_lower_mean(MISSING, 3.0), MISSING);
    }

    #[test]
    fn readable_mean_of_close_values_is_strictly_between() {
        let mean = human_readable_lower_mean(1.0001, 1.0002);
        assert!(mean > 1.0001 && mean < 1.0002, "{mean}");
        assert_eq!(human_readable_lower_mean(3.0, 3.0), 3.0);
    }

    #[test]
    fn equal_frequency_intervals() {
        let builder = IntervalBuilder::new((1..=8).map(f64::from).collect());
        assert_eq!(builder.instance_count(), 8);
        let intervals = builder.intervals(2);
        assert_eq!(
            intervals,
            vec![
                QuantileInterval { quantile: 0, first: 0, last: 3 },
                QuantileInterval { quantile: 1, first: 4, last: 7 },
            ]
        );
        assert_eq!(builder.bounds(&intervals[0]), (MISSING, 4.5));
        assert_eq!(builder.bounds(&intervals[1]), (4.5, MAX_VALUE));
    }

    #[test]
    fn heavy_values_merge_quantiles() {
        // Six of eight samples share one value: quantiles 1 and 2 collapse.
        let builder = IntervalBuilder::new(vec![1.0, 5.0, 5.0, 5.0, 5.0, 5.0, 5.0, 9.0]);
        assert_eq!(builder.value_count(), 3);
        let intervals = builder.intervals(4);
        assert_eq!(intervals.len(), 3);
        assert_eq!(intervals[0], QuantileInterval { quantile: 0, first: 0, last: 0 });
        assert_eq!(intervals[1].last, 1);
        assert_eq!(intervals[2], QuantileInterval { quantile: 3, first: 2, last: 2 });
    }

    #[test]
    fn missing_values_sort_first() {
        let builder = IntervalBuilder::new(vec![f64::NAN, MISSING, 2.0, 2.0]);
        let intervals = builder.intervals(2);
        assert_eq!(builder.bounds(&intervals[0]), (MISSING, MISSING));
        assert_eq!(builder.bounds(&intervals[1]), (MISSING, MAX_VALUE));
    }

    #[test]
    fn groups_keep_frequent_values() {
        let samples = ["a", "a", "a", "a", "b", "b", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let builder = GroupBuilder::new(samples);
        assert_eq!(builder.value(0), "a");
        assert_eq!(builder.value(3), "d");
        // min frequency 5: nothing qualifies, a single group.
        assert_eq!(builder.group_count(2), 1);
        // min frequency 3: a and b, plus the garbage group.
        assert_eq!(builder.group_count(4), 3);
        // min frequency 2: still a and b.
        assert_eq!(builder.group_count(8), 3);
        assert_eq!(GroupBuilder::group_quantile_index(1, 3, 4), 1);
        assert_eq!(GroupBuilder::group_quantile_index(2, 3, 4), 3);
    }

    #[test]
    fn every_value_frequent_means_no_garbage() {
        let samples = ["x", "x", "y", "y"].iter().map(|s| s.to_string()).collect();
        let builder = GroupBuilder::new(samples);
        assert_eq!(builder.group_count(2), 2);
    }
}
