use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use surge_trace::ScenarioIndex;

use crate::analyze::{AnalyzedDistribution, StepStats};
use crate::stats;

const RULE: &str = "-----------------------------------------------------------------------\n";
const BANNER: &str = "=======================================================================\n";

pub(crate) fn step_banner(step_name: &str) -> String {
    format!("{BANNER}Step '{step_name}'\n{BANNER}")
}

pub(crate) fn overall_banner() -> &'static str {
    "=======================================================================\n\
     Total over all steps\n\
     =======================================================================\n"
}

/// Renders the counts, frequency tables, traffic block and the three
/// timing distributions, filling the step's analyzed-distribution fields
/// as a side effect (the JSON output reuses them).
pub(crate) fn distributions(step: &mut StepStats) -> String {
    let mut out = String::new();

    let counts = step.counts;
    let _ = writeln!(out, "\nRequests: {}", counts.requests);
    out.push_str(RULE);
    let _ = writeln!(
        out,
        "{:9} = {:6.2}%: Successes",
        counts.successes(),
        counts.success_percentage()
    );
    let _ = writeln!(
        out,
        "{:9} = {:6.2}%: Failures",
        counts.failures,
        counts.failure_percentage()
    );
    let _ = writeln!(
        out,
        "{:9} = {:6.2}%: Errors",
        counts.errors,
        counts.error_percentage()
    );
    let _ = writeln!(
        out,
        "{:9} = {:6.2}%: Timeouts",
        counts.timeouts,
        counts.timeout_percentage()
    );

    let status_total: u64 = step.status_codes.values().sum();
    let _ = writeln!(out, "\n\nStatus Codes: {status_total}");
    out.push_str(RULE);
    for (code, count) in by_descending_count(&step.status_codes) {
        let _ = writeln!(
            out,
            "{count:9} = {:6.2}%: Response Status {code}",
            share(count, counts.requests)
        );
    }

    frequency_block(&mut out, "Failures", counts.failures, &step.failure_types);
    frequency_block(&mut out, "Errors", counts.errors, &step.error_types);
    frequency_block(&mut out, "Timeouts", counts.timeouts, &step.timeout_types);

    let _ = writeln!(
        out,
        "\n\nTraffic Bytes:  {:15}",
        step.request_bytes + step.response_bytes
    );
    out.push_str(RULE);
    let _ = writeln!(out, "Request Bytes:  {:15}", step.request_bytes);
    let _ = writeln!(out, "Response Bytes: {:15}", step.response_bytes);

    let trrt = std::mem::take(&mut step.trrt);
    out.push_str(&timing_block(
        "Total-Request-Response-Time (TRRT)",
        &trrt,
        &mut step.total_request_response_time,
    ));
    step.trrt = trrt;

    let ttfb = std::mem::take(&mut step.ttfb);
    out.push_str(&timing_block(
        "Time-To-First-Byte (TTFB)",
        &ttfb,
        &mut step.time_to_first_byte,
    ));
    step.ttfb = ttfb;

    let tars = std::mem::take(&mut step.tars);
    out.push_str(&timing_block(
        "Time-After-Request-Sent (TARS)",
        &tars,
        &mut step.time_after_request_sent,
    ));
    step.tars = tars;

    out.push('\n');
    out
}

fn frequency_block(out: &mut String, title: &str, total: u64, types: &BTreeMap<String, u64>) {
    let _ = writeln!(out, "\n\n{title}: {total}");
    out.push_str(RULE);
    for (cause, count) in by_descending_count(types) {
        let _ = writeln!(out, "{count:9} = {:6.2}%: {cause}", share(count, total));
    }
}

fn timing_block(title: &str, values: &[f64], analyzed: &mut AnalyzedDistribution) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n\n{title}: {} Requests", values.len());
    out.push_str("-----------------------------------------------------------------------");

    out.push_str("\n>>> Stats <<<\n");
    analyzed.stats = stats::describe(values);
    if let Some(s) = &analyzed.stats {
        let _ = writeln!(out, "Minimum: {}", nanos(s.minimum));
        let _ = writeln!(out, "Maximum: {}", nanos(s.maximum));
        let _ = writeln!(out, "Mean: {}", nanos(s.mean));
        let _ = writeln!(out, "Median: {}", nanos(s.median));
        let _ = writeln!(out, "Standard Deviation: {}", nanos(s.standard_deviation));
        let _ = writeln!(out, "First Quartile: {}", nanos(s.first_quartile));
        let _ = writeln!(out, "Third Quartile: {}", nanos(s.third_quartile));
        let _ = writeln!(out, "Inter-Quartile Range: {}", nanos(s.inter_quartile_range));
        let _ = writeln!(out, "Midhinge: {}", nanos(s.midhinge));
        let _ = writeln!(out, "Trimean: {}", nanos(s.trimean));
    }

    out.push_str("\n>>> Percentiles <<<\n");
    analyzed.percentiles = stats::percentile_summary(values);
    if let Some(p) = &analyzed.percentiles {
        let _ = writeln!(out, "Percent 80.00%: {}", nanos(p.p80));
        let _ = writeln!(out, "Percent 90.00%: {}", nanos(p.p90));
        let _ = writeln!(out, "Percent 95.00%: {}", nanos(p.p95));
        let _ = writeln!(out, "Percent 99.00%: {}", nanos(p.p99));
        let _ = writeln!(out, "Percent 99.90%: {}", nanos(p.p99_9));
        let _ = writeln!(out, "Percent 99.99%: {}", nanos(p.p99_99));
    }

    out.push_str("\n>>> Histogram <<<\n");
    analyzed.histogram = stats::linear_histogram(values, 10);
    for bucket in &analyzed.histogram {
        let _ = writeln!(
            out,
            "{:>12} - {:>12}: {}",
            nanos(bucket.min),
            nanos(bucket.max),
            bucket.count
        );
    }

    out
}

pub(crate) fn environment_and_scenarios(indexes: &BTreeMap<String, ScenarioIndex>) -> String {
    let mut out = String::new();
    for (client, index) in indexes {
        let _ = writeln!(
            out,
            "Recording environment: {} (run started {})",
            index.environment.hostname,
            unix_seconds(index.environment.start)
        );
        let _ = writeln!(out, "\nScenarios runner: {client}");
        for record in index.scenarios.values() {
            let _ = writeln!(
                out,
                "  * {}: {} ({} looping users, ramp-up {:?}, plateau {:?}, ramp-down {:?}, executed {} loops{})",
                record.title,
                record.description,
                record.load.looping_users,
                record.load.ramp_up,
                record.load.plateau,
                record.load.ramp_down,
                record.execution_count,
                if record.ignored { ", ignored" } else { "" }
            );
        }
        out.push('\n');
    }
    out
}

fn by_descending_count<K: Clone + Ord>(frequencies: &BTreeMap<K, u64>) -> Vec<(K, u64)> {
    let mut pairs: Vec<(K, u64)> = frequencies
        .iter()
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    // Descending by count; the key breaks ties so output stays stable.
    pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    pairs
}

fn share(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    count as f64 / total as f64 * 100.0
}

fn nanos(value: f64) -> String {
    if !value.is_finite() || value < 0.0 {
        return "n/a".to_string();
    }
    format!("{:?}", Duration::from_nanos(value.round() as u64))
}

fn unix_seconds(time: SystemTime) -> String {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => format!("{}s unix", elapsed.as_secs()),
        Err(_) => "before unix epoch".to_string(),
    }
}
