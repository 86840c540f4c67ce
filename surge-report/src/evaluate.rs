use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use regex::Regex;

use surge_trace::model::{
    CountThreshold, PercentageThreshold, PercentileThreshold, RangeThreshold,
    StatusCodeThreshold, TypeMatchesThreshold,
};

use crate::analyze::StepStats;
use crate::stats::percentile;

const RULE: &str = "-----------------------------------------------------------------------\n";

/// Evaluates every threshold of the step's expectation against the pooled
/// observations, recording `unmet`/`actual_value` per threshold, and
/// returns the human-readable verdict block.
pub(crate) fn evaluate(step: &mut StepStats) -> String {
    let mut expectation = std::mem::take(&mut step.expectation);
    let mut out = String::new();
    out.push_str("Expectations\n");
    out.push_str(RULE);

    let counts = step.counts;
    let mut unmet = false;

    unmet |= percentage_line(
        &mut out,
        expectation.success_percentage_at_least.as_mut(),
        counts.success_percentage(),
        "minimum success percentage expectation",
        false,
    );
    unmet |= percentage_line(
        &mut out,
        expectation.failure_percentage_at_most.as_mut(),
        counts.failure_percentage(),
        "maximum failure percentage expectation",
        true,
    );
    unmet |= percentage_line(
        &mut out,
        expectation.error_percentage_at_most.as_mut(),
        counts.error_percentage(),
        "maximum error percentage expectation",
        true,
    );
    unmet |= percentage_line(
        &mut out,
        expectation.timeout_percentage_at_most.as_mut(),
        counts.timeout_percentage(),
        "maximum timeout percentage expectation",
        true,
    );

    unmet |= count_line(
        &mut out,
        expectation.success_count_at_least.as_mut(),
        counts.successes(),
        "minimum success count expectation",
        false,
    );
    unmet |= count_line(
        &mut out,
        expectation.failure_count_at_most.as_mut(),
        counts.failures,
        "maximum failure count expectation",
        true,
    );
    unmet |= count_line(
        &mut out,
        expectation.error_count_at_most.as_mut(),
        counts.errors,
        "maximum error count expectation",
        true,
    );
    unmet |= count_line(
        &mut out,
        expectation.timeout_count_at_most.as_mut(),
        counts.timeouts,
        "maximum timeout count expectation",
        true,
    );

    unmet |= percentile_lines(
        &mut out,
        &mut expectation.total_request_response_time_percentile_limits,
        &step.trrt,
        "percentile duration expectation of Total-Request-Response-Time (TRRT)",
    );
    unmet |= percentile_lines(
        &mut out,
        &mut expectation.time_to_first_byte_percentile_limits,
        &step.ttfb,
        "percentile duration expectation of Time-To-First-Byte (TTFB)",
    );
    unmet |= percentile_lines(
        &mut out,
        &mut expectation.time_after_request_sent_percentile_limits,
        &step.tars,
        "percentile duration expectation of Time-After-Request-Sent (TARS)",
    );

    unmet |= bytes_line(
        &mut out,
        expectation.total_request_bytes_within.as_mut(),
        step.request_bytes,
        "total request bytes expectation",
    );
    unmet |= bytes_line(
        &mut out,
        expectation.total_response_bytes_within.as_mut(),
        step.response_bytes,
        "total response bytes expectation",
    );

    unmet |= status_code_lines(
        &mut out,
        &mut expectation.status_code_thresholds,
        &step.status_codes,
    );

    unmet |= type_matches_lines(
        &mut out,
        &mut expectation.failure_type_matches_thresholds,
        &step.failure_types,
        "failure",
    );
    unmet |= type_matches_lines(
        &mut out,
        &mut expectation.error_type_matches_thresholds,
        &step.error_types,
        "error",
    );
    unmet |= type_matches_lines(
        &mut out,
        &mut expectation.timeout_type_matches_thresholds,
        &step.timeout_types,
        "timeout",
    );

    step.expectation = expectation;
    if unmet {
        step.has_unmet_expectation = true;
    }
    out
}

fn percentage_line(
    out: &mut String,
    threshold: Option<&mut PercentageThreshold>,
    value: f64,
    label: &str,
    smaller_is_better: bool,
) -> bool {
    let Some(threshold) = threshold else {
        return false;
    };
    let missed = if smaller_is_better {
        value > threshold.percentage
    } else {
        value < threshold.percentage
    };
    if missed {
        threshold.unmet = true;
    }
    threshold.actual_value = value;

    let met = if missed { "Unmet" } else { "Met" };
    let wanted = if smaller_is_better {
        "wanted at most"
    } else {
        "wanted at least"
    };
    let _ = writeln!(
        out,
        "{met} {label}: {wanted} {:.2}% got {value:.2}%",
        threshold.percentage
    );
    missed
}

fn count_line(
    out: &mut String,
    threshold: Option<&mut CountThreshold>,
    value: u64,
    label: &str,
    smaller_is_better: bool,
) -> bool {
    let Some(threshold) = threshold else {
        return false;
    };
    let missed = if smaller_is_better {
        value > threshold.count
    } else {
        value < threshold.count
    };
    if missed {
        threshold.unmet = true;
    }
    threshold.actual_value = value;

    let met = if missed { "Unmet" } else { "Met" };
    let wanted = if smaller_is_better {
        "wanted at most"
    } else {
        "wanted at least"
    };
    let _ = writeln!(out, "{met} {label}: {wanted} {} got {value}", threshold.count);
    missed
}

fn percentile_lines(
    out: &mut String,
    thresholds: &mut [PercentileThreshold],
    values: &[f64],
    label: &str,
) -> bool {
    let mut any_missed = false;
    for threshold in thresholds {
        if threshold.percentile == 0.0 {
            continue;
        }
        // An Nth percentile needs at least ceil(100/N) samples to mean
        // anything; below that the threshold is inconclusive, not unmet.
        let needed = (100.0 / threshold.percentile).ceil() as usize;
        if values.len() < needed {
            let _ = writeln!(
                out,
                "Not enough values for percentile calculation ({:.2} {label})",
                threshold.percentile
            );
            continue;
        }
        let Some(value) = percentile(values, threshold.percentile) else {
            let _ = writeln!(
                out,
                "Not enough values for percentile calculation ({:.2} {label})",
                threshold.percentile
            );
            continue;
        };

        let actual = Duration::from_nanos(value.max(0.0) as u64);
        let missed = actual > threshold.limit;
        if missed {
            threshold.unmet = true;
            any_missed = true;
        }
        threshold.actual_value = Some(actual);

        let met = if missed { "Unmet" } else { "Met" };
        let _ = writeln!(
            out,
            "{met} {:.2} {label}: wanted within {:?} got {actual:?}",
            threshold.percentile, threshold.limit
        );
    }
    any_missed
}

fn bytes_line(
    out: &mut String,
    threshold: Option<&mut RangeThreshold>,
    bytes: u64,
    label: &str,
) -> bool {
    let Some(threshold) = threshold else {
        return false;
    };
    if threshold.max == 0 {
        return false;
    }
    let missed = bytes < threshold.min || bytes > threshold.max;
    if missed {
        threshold.unmet = true;
    }
    threshold.actual_value = bytes;

    let met = if missed { "Unmet" } else { "Met" };
    let _ = writeln!(
        out,
        "{met} {label}: wanted within ({} - {}): got {bytes}",
        threshold.min, threshold.max
    );
    missed
}

fn status_code_lines(
    out: &mut String,
    thresholds: &mut [StatusCodeThreshold],
    codes: &BTreeMap<u16, u64>,
) -> bool {
    let total: u64 = codes.values().sum();
    let mut any_missed = false;
    for threshold in thresholds {
        if total == 0 {
            continue;
        }
        let matching = codes.get(&threshold.status_code).copied().unwrap_or(0);
        let actual = matching as f64 / total as f64 * 100.0;

        let missed = if threshold.is_at_least {
            actual < threshold.percentage
        } else {
            actual > threshold.percentage
        };
        if missed {
            threshold.unmet = true;
            any_missed = true;
        }
        threshold.actual_value = actual;

        let met = if missed { "Unmet" } else { "Met" };
        let which = if threshold.is_at_least {
            "at least"
        } else {
            "at most"
        };
        let _ = writeln!(
            out,
            "{met} status code percentage expectation: wanted {which} {:.2}% of status code {}: got {actual:.2}%",
            threshold.percentage, threshold.status_code
        );
    }
    any_missed
}

fn type_matches_lines(
    out: &mut String,
    thresholds: &mut [TypeMatchesThreshold],
    types: &BTreeMap<String, u64>,
    label: &str,
) -> bool {
    let total: u64 = types.values().sum();
    let mut any_missed = false;
    for threshold in thresholds {
        if total == 0 {
            continue;
        }
        let pattern = match Regex::new(&threshold.pattern) {
            Ok(pattern) => pattern,
            Err(err) => {
                tracing::error!(pattern = %threshold.pattern, error = %err, "unevaluatable type-match pattern");
                continue;
            }
        };
        let matching: u64 = types
            .iter()
            .filter(|(cause, _)| pattern.is_match(cause))
            .map(|(_, count)| count)
            .sum();
        let actual = matching as f64 / total as f64 * 100.0;

        let missed = if threshold.is_at_least {
            actual < threshold.percentage
        } else {
            actual > threshold.percentage
        };
        if missed {
            threshold.unmet = true;
            any_missed = true;
        }
        threshold.actual_value = actual;

        let met = if missed { "Unmet" } else { "Met" };
        let which = if threshold.is_at_least {
            "at least"
        } else {
            "at most"
        };
        let _ = writeln!(
            out,
            "{met} {label} type matches percentage expectation: wanted {which} {:.2}% of {label} types matching {}: got {actual:.2}%",
            threshold.percentage, threshold.pattern
        );
    }
    any_missed
}

#[cfg(test)]
mod tests {
    use super::*;
    use surge_trace::Counts;
    use surge_trace::Expectation;

    fn stats_with_counts(requests: u64, failures: u64) -> StepStats {
        StepStats {
            counts: Counts {
                requests,
                failures,
                ..Counts::default()
            },
            ..StepStats::default()
        }
    }

    #[test]
    fn met_success_percentage_stays_met() {
        let mut step = stats_with_counts(100, 2);
        step.expectation = Expectation {
            success_percentage_at_least: Some(PercentageThreshold::new(95.0)),
            ..Expectation::default()
        };

        let text = evaluate(&mut step);
        assert!(!step.has_unmet_expectation);
        let threshold = step
            .expectation
            .success_percentage_at_least
            .unwrap_or_else(|| panic!("threshold lost"));
        assert!(!threshold.unmet);
        assert!((threshold.actual_value - 98.0).abs() < 1e-9);
        assert!(text.contains("Met minimum success percentage expectation: wanted at least 95.00% got 98.00%"));
    }

    #[test]
    fn failure_percentage_above_the_cap_is_unmet() {
        let mut step = stats_with_counts(100, 10);
        step.expectation = Expectation {
            failure_percentage_at_most: Some(PercentageThreshold::new(5.0)),
            ..Expectation::default()
        };

        let text = evaluate(&mut step);
        assert!(step.has_unmet_expectation);
        assert!(text.contains("Unmet maximum failure percentage expectation: wanted at most 5.00% got 10.00%"));
    }

    #[test]
    fn count_thresholds_compare_in_the_right_direction() {
        let mut step = stats_with_counts(10, 3);
        step.expectation = Expectation {
            success_count_at_least: Some(CountThreshold::new(8)),
            failure_count_at_most: Some(CountThreshold::new(5)),
            ..Expectation::default()
        };

        let text = evaluate(&mut step);
        // 7 successes < 8 wanted, 3 failures <= 5 allowed.
        assert!(text.contains("Unmet minimum success count expectation: wanted at least 8 got 7"));
        assert!(text.contains("Met maximum failure count expectation: wanted at most 5 got 3"));
        assert!(step.has_unmet_expectation);
    }

    #[test]
    fn percentile_threshold_with_too_few_samples_is_inconclusive() {
        let mut step = stats_with_counts(3, 0);
        step.trrt = vec![1e6, 2e6, 3e6];
        step.expectation = Expectation {
            total_request_response_time_percentile_limits: vec![PercentileThreshold::new(
                90.0,
                Duration::from_millis(1),
            )],
            ..Expectation::default()
        };

        let text = evaluate(&mut step);
        assert!(text.contains("Not enough values for percentile calculation"));
        assert!(!step.has_unmet_expectation);
        let threshold = step.expectation.total_request_response_time_percentile_limits[0];
        assert!(!threshold.unmet);
        assert_eq!(threshold.actual_value, None);
    }

    #[test]
    fn percentile_threshold_evaluates_against_the_reference_percentile() {
        let mut step = stats_with_counts(20, 0);
        // 1ms..20ms in nanoseconds.
        step.trrt = (1..=20).map(|ms| ms as f64 * 1e6).collect();
        step.expectation = Expectation {
            total_request_response_time_percentile_limits: vec![
                PercentileThreshold::new(90.0, Duration::from_millis(19)),
                PercentileThreshold::new(90.0, Duration::from_millis(10)),
            ],
            ..Expectation::default()
        };

        let text = evaluate(&mut step);
        // p90 over 20 samples: rank 18 -> 18ms. Within 19ms, not within 10ms.
        assert!(text.contains("Met 90.00 percentile duration expectation of Total-Request-Response-Time (TRRT): wanted within 19ms got 18ms"));
        assert!(text.contains("Unmet 90.00 percentile duration expectation of Total-Request-Response-Time (TRRT): wanted within 10ms got 18ms"));
        assert!(step.has_unmet_expectation);
    }

    #[test]
    fn byte_range_threshold_brackets_the_total() {
        let mut step = stats_with_counts(5, 0);
        step.request_bytes = 1_500;
        step.expectation = Expectation {
            total_request_bytes_within: Some(RangeThreshold::new(1_000, 2_000)),
            total_response_bytes_within: Some(RangeThreshold::new(10, 20)),
            ..Expectation::default()
        };
        step.response_bytes = 500;

        let text = evaluate(&mut step);
        assert!(text.contains("Met total request bytes expectation: wanted within (1000 - 2000): got 1500"));
        assert!(text.contains("Unmet total response bytes expectation: wanted within (10 - 20): got 500"));
        assert!(step.has_unmet_expectation);
    }

    #[test]
    fn status_code_thresholds_use_the_code_distribution() {
        let mut step = stats_with_counts(100, 0);
        step.status_codes.insert(200, 98);
        step.status_codes.insert(502, 2);
        step.expectation = Expectation {
            status_code_thresholds: vec![
                StatusCodeThreshold {
                    is_at_least: true,
                    status_code: 200,
                    percentage: 95.0,
                    unmet: false,
                    actual_value: 0.0,
                },
                StatusCodeThreshold {
                    is_at_least: false,
                    status_code: 502,
                    percentage: 1.0,
                    unmet: false,
                    actual_value: 0.0,
                },
            ],
            ..Expectation::default()
        };

        let text = evaluate(&mut step);
        assert!(text.contains("Met status code percentage expectation: wanted at least 95.00% of status code 200: got 98.00%"));
        assert!(text.contains("Unmet status code percentage expectation: wanted at most 1.00% of status code 502: got 2.00%"));
        assert!(step.has_unmet_expectation);
    }

    #[test]
    fn type_match_thresholds_bucket_by_root_cause_regex() {
        let mut step = stats_with_counts(10, 4);
        step.failure_types
            .insert("assertion of status code failed: got 502 want 200".to_string(), 3);
        step.failure_types
            .insert("assertion of body content failed (response body did not contain expected value): x".to_string(), 1);
        step.expectation = Expectation {
            failure_type_matches_thresholds: vec![TypeMatchesThreshold {
                is_at_least: true,
                pattern: "status code".to_string(),
                percentage: 50.0,
                unmet: false,
                actual_value: 0.0,
            }],
            ..Expectation::default()
        };

        let text = evaluate(&mut step);
        assert!(!step.has_unmet_expectation, "75% >= 50% must be met: {text}");
        let threshold = &step.expectation.failure_type_matches_thresholds[0];
        assert!((threshold.actual_value - 75.0).abs() < 1e-9);
    }

    #[test]
    fn empty_population_evaluates_without_verdict_noise() {
        let mut step = StepStats::default();
        step.expectation = Expectation::baseline();
        let text = evaluate(&mut step);
        // Percentage thresholds still render (0% everywhere), nothing is
        // unmet and no category/type lines appear.
        assert!(!step.has_unmet_expectation);
        assert!(text.contains("Met maximum failure percentage expectation"));
        assert!(!text.contains("status code percentage expectation"));
    }
}
