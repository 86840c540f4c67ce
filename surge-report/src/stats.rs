//! Descriptive statistics over raw sample vectors.
//!
//! These functions are the reference the expectation layer is defined
//! against: percentile verdicts in reports are exactly what [`percentile`]
//! computes on the pooled sample.

use serde::Serialize;

/// Point statistics of one sample, all in the sample's unit (nanoseconds
/// for the timing vectors).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DescriptiveStats {
    pub minimum: f64,
    pub maximum: f64,
    pub mean: f64,
    pub median: f64,
    pub standard_deviation: f64,
    pub first_quartile: f64,
    pub third_quartile: f64,
    pub inter_quartile_range: f64,
    pub midhinge: f64,
    pub trimean: f64,
}

/// The fixed percentile ladder reported per distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PercentileSummary {
    pub p80: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub p99_9: f64,
    pub p99_99: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistogramBucket {
    pub min: f64,
    pub max: f64,
    pub count: u64,
}

fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Percentile by fractional rank: rank `p/100 · n` over the sorted sample;
/// a whole rank selects that value, a fractional rank the mean of the two
/// straddling values. `None` when the sample cannot support the rank.
#[must_use]
pub fn percentile(values: &[f64], percent: f64) -> Option<f64> {
    if values.is_empty() || !(0.0..=100.0).contains(&percent) || percent == 0.0 {
        return None;
    }
    let sorted = sorted_copy(values);
    let rank = percent / 100.0 * sorted.len() as f64;
    if rank == rank.floor() {
        let index = rank as usize;
        if index == 0 {
            return None;
        }
        Some(sorted[index - 1])
    } else if rank > 1.0 {
        let index = rank as usize;
        Some((sorted[index - 1] + sorted[index]) / 2.0)
    } else {
        None
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn median_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

/// Q1/Q3 by the halves method: the medians of the lower and upper half of
/// the sorted sample, excluding the middle element for odd sizes. A
/// single-element sample degenerates to that value.
fn quartiles_sorted(sorted: &[f64]) -> (f64, f64) {
    let n = sorted.len();
    if n < 2 {
        return (sorted[0], sorted[0]);
    }
    let half = n / 2;
    let lower = &sorted[..half];
    let upper = if n % 2 == 0 {
        &sorted[half..]
    } else {
        &sorted[half + 1..]
    };
    (median_sorted(lower), median_sorted(upper))
}

fn population_std_deviation(values: &[f64], mean: f64) -> f64 {
    let variance = values
        .iter()
        .map(|v| {
            let d = v - mean;
            d * d
        })
        .sum::<f64>()
        / values.len() as f64;
    variance.sqrt()
}

/// Full point-statistics bundle; `None` for an empty sample.
#[must_use]
pub fn describe(values: &[f64]) -> Option<DescriptiveStats> {
    if values.is_empty() {
        return None;
    }
    let sorted = sorted_copy(values);
    let mean = mean(&sorted);
    let median = median_sorted(&sorted);
    let (q1, q3) = quartiles_sorted(&sorted);
    Some(DescriptiveStats {
        minimum: sorted[0],
        maximum: sorted[sorted.len() - 1],
        mean,
        median,
        standard_deviation: population_std_deviation(&sorted, mean),
        first_quartile: q1,
        third_quartile: q3,
        inter_quartile_range: q3 - q1,
        midhinge: (q1 + q3) / 2.0,
        trimean: (q1 + 2.0 * median + q3) / 4.0,
    })
}

/// The reported percentile ladder. Requires at least 10 samples, matching
/// the smallest population the high percentiles are meaningful for.
#[must_use]
pub fn percentile_summary(values: &[f64]) -> Option<PercentileSummary> {
    if values.len() < 10 {
        return None;
    }
    Some(PercentileSummary {
        p80: percentile(values, 80.0)?,
        p90: percentile(values, 90.0)?,
        p95: percentile(values, 95.0)?,
        p99: percentile(values, 99.0)?,
        p99_9: percentile(values, 99.9)?,
        p99_99: percentile(values, 99.99)?,
    })
}

/// Fixed-width linear histogram over `[min, max]`. Values on the upper edge
/// land in the last bucket. A constant sample collapses into one bucket.
#[must_use]
pub fn linear_histogram(values: &[f64], bucket_count: usize) -> Vec<HistogramBucket> {
    if values.is_empty() || bucket_count == 0 {
        return Vec::new();
    }
    let sorted = sorted_copy(values);
    let (min, max) = (sorted[0], sorted[sorted.len() - 1]);
    let width = (max - min) / bucket_count as f64;
    if width == 0.0 {
        return vec![HistogramBucket {
            min,
            max,
            count: values.len() as u64,
        }];
    }

    let mut buckets: Vec<HistogramBucket> = (0..bucket_count)
        .map(|i| HistogramBucket {
            min: min + width * i as f64,
            max: min + width * (i + 1) as f64,
            count: 0,
        })
        .collect();
    for value in &sorted {
        let mut index = ((value - min) / width) as usize;
        if index >= bucket_count {
            index = bucket_count - 1;
        }
        buckets[index].count += 1;
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "got {actual}, want {expected}"
        );
    }

    #[test]
    fn percentile_whole_rank_selects_the_value() {
        let values: Vec<f64> = (1..=10).map(f64::from).collect();
        // rank = 0.8 * 10 = 8 -> 8th sorted value
        assert_close(
            percentile(&values, 80.0).unwrap_or_else(|| panic!("p80")),
            8.0,
        );
        // rank = 10 -> maximum
        assert_close(
            percentile(&values, 100.0).unwrap_or_else(|| panic!("p100")),
            10.0,
        );
    }

    #[test]
    fn percentile_fractional_rank_averages_the_straddling_pair() {
        let values: Vec<f64> = (1..=10).map(f64::from).collect();
        // rank = 0.95 * 10 = 9.5 -> mean of 9th and 10th
        assert_close(
            percentile(&values, 95.0).unwrap_or_else(|| panic!("p95")),
            9.5,
        );
        // rank = 0.25 * 10 = 2.5 -> mean of 2nd and 3rd
        assert_close(
            percentile(&values, 25.0).unwrap_or_else(|| panic!("p25")),
            2.5,
        );
    }

    #[test]
    fn percentile_needs_enough_samples_for_the_rank() {
        assert_eq!(percentile(&[], 50.0), None);
        // rank = 0.5 < 1 with a single sample
        assert_eq!(percentile(&[42.0], 50.0), None);
        assert_eq!(percentile(&[1.0, 2.0], 150.0), None);
        assert_eq!(percentile(&[1.0, 2.0], 0.0), None);
    }

    #[test]
    fn percentile_is_order_insensitive() {
        let shuffled = [5.0, 1.0, 4.0, 2.0, 3.0, 9.0, 7.0, 6.0, 8.0, 10.0];
        assert_close(
            percentile(&shuffled, 90.0).unwrap_or_else(|| panic!("p90")),
            9.0,
        );
    }

    #[test]
    fn describe_matches_hand_computed_values() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let stats = describe(&values).unwrap_or_else(|| panic!("describe"));

        assert_close(stats.minimum, 2.0);
        assert_close(stats.maximum, 9.0);
        assert_close(stats.mean, 5.0);
        assert_close(stats.median, 4.5);
        // Classic population-stdev example set.
        assert_close(stats.standard_deviation, 2.0);
        assert_close(stats.first_quartile, 4.0);
        assert_close(stats.third_quartile, 6.0);
        assert_close(stats.inter_quartile_range, 2.0);
        assert_close(stats.midhinge, 5.0);
        assert_close(stats.trimean, 4.75);
    }

    #[test]
    fn describe_odd_sample_excludes_the_middle_from_the_halves() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let stats = describe(&values).unwrap_or_else(|| panic!("describe"));
        assert_close(stats.median, 3.0);
        assert_close(stats.first_quartile, 1.5);
        assert_close(stats.third_quartile, 4.5);
    }

    #[test]
    fn describe_handles_the_degenerate_single_sample() {
        let stats = describe(&[7.0]).unwrap_or_else(|| panic!("describe"));
        assert_close(stats.median, 7.0);
        assert_close(stats.first_quartile, 7.0);
        assert_close(stats.third_quartile, 7.0);
        assert_close(stats.standard_deviation, 0.0);
    }

    #[test]
    fn describe_empty_is_none() {
        assert_eq!(describe(&[]), None);
    }

    #[test]
    fn percentile_summary_requires_ten_samples() {
        let nine: Vec<f64> = (1..=9).map(f64::from).collect();
        assert_eq!(percentile_summary(&nine), None);

        let ten: Vec<f64> = (1..=10).map(f64::from).collect();
        let summary = percentile_summary(&ten).unwrap_or_else(|| panic!("summary"));
        assert_close(summary.p80, 8.0);
        // rank 9.999 straddles the 9th and 10th sorted values
        assert_close(summary.p99_99, 9.5);
    }

    #[test]
    fn histogram_buckets_are_linear_and_cover_the_edges() {
        let values: Vec<f64> = (0..=100).map(f64::from).collect();
        let buckets = linear_histogram(&values, 10);
        assert_eq!(buckets.len(), 10);
        assert_close(buckets[0].min, 0.0);
        assert_close(buckets[9].max, 100.0);
        // 0..=9 in the first bucket, the value 100 folded into the last.
        assert_eq!(buckets[0].count, 10);
        assert_eq!(buckets[9].count, 11);
        let total: u64 = buckets.iter().map(|b| b.count).sum();
        assert_eq!(total, 101);
    }

    #[test]
    fn histogram_of_a_constant_sample_collapses() {
        let buckets = linear_histogram(&[5.0, 5.0, 5.0], 10);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].count, 3);
        assert_close(buckets[0].min, 5.0);
        assert_close(buckets[0].max, 5.0);
    }

    #[test]
    fn histogram_of_nothing_is_empty() {
        assert!(linear_histogram(&[], 10).is_empty());
    }
}
