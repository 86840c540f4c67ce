use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use surge_trace::{
    is_step_log_filename, read_scenario_index, read_step_name, Counts, Expectation, ScenarioIndex,
    StepEntry, StepLogReader, SCENARIO_INDEX_FILENAME,
};

use crate::evaluate;
use crate::render;
use crate::stats::{DescriptiveStats, HistogramBucket, PercentileSummary};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("report i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("report serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Distribution analysis of one timing vector.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalyzedDistribution {
    pub stats: Option<DescriptiveStats>,
    pub percentiles: Option<PercentileSummary>,
    pub histogram: Vec<HistogramBucket>,
}

/// Pooled observations and analysis results for one step (or for the
/// overall total). This is also the JSON output schema; the raw sample
/// vectors are kept out of it in favor of the analyzed distributions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StepStats {
    pub title: String,
    pub has_unmet_expectation: bool,
    pub counts: Counts,
    pub status_codes: BTreeMap<u16, u64>,
    pub failure_types: BTreeMap<String, u64>,
    pub error_types: BTreeMap<String, u64>,
    pub timeout_types: BTreeMap<String, u64>,
    pub request_bytes: u64,
    pub response_bytes: u64,
    #[serde(skip)]
    pub ttfb: Vec<f64>,
    #[serde(skip)]
    pub tars: Vec<f64>,
    #[serde(skip)]
    pub trrt: Vec<f64>,
    pub time_to_first_byte: AnalyzedDistribution,
    pub time_after_request_sent: AnalyzedDistribution,
    pub total_request_response_time: AnalyzedDistribution,
    pub expectation: Expectation,
}

impl StepStats {
    fn absorb_entry(&mut self, entry: &StepEntry) {
        self.counts.requests += 1;
        self.request_bytes = self.request_bytes.saturating_add(entry.request_size);
        self.response_bytes = self.response_bytes.saturating_add(entry.response_size);

        if let Some(d) = entry.timestamps.time_to_first_byte(false) {
            self.ttfb.push(d.as_nanos() as f64);
        }
        if let Some(d) = entry.timestamps.time_to_first_byte(true) {
            self.tars.push(d.as_nanos() as f64);
        }
        if let Some(d) = entry.timestamps.total_duration() {
            self.trrt.push(d.as_nanos() as f64);
        }

        if let Some(code) = entry.status_code {
            if code > 0 {
                *self.status_codes.entry(code).or_insert(0) += 1;
            }
        }

        if entry.assertion_failed {
            self.counts.failures += 1;
            *self
                .failure_types
                .entry(entry.assertion_failed_root_cause.clone())
                .or_insert(0) += 1;
        }
        if entry.error {
            self.counts.errors += 1;
            *self
                .error_types
                .entry(entry.error_root_cause.clone())
                .or_insert(0) += 1;
        }
        if entry.timeout {
            self.counts.timeouts += 1;
            *self
                .timeout_types
                .entry(entry.timeout_root_cause.clone())
                .or_insert(0) += 1;
        }
    }

    fn absorb_step(&mut self, other: &StepStats) {
        self.counts.add(other.counts);
        self.request_bytes = self.request_bytes.saturating_add(other.request_bytes);
        self.response_bytes = self.response_bytes.saturating_add(other.response_bytes);
        self.ttfb.extend_from_slice(&other.ttfb);
        self.tars.extend_from_slice(&other.tars);
        self.trrt.extend_from_slice(&other.trrt);
        for (code, count) in &other.status_codes {
            *self.status_codes.entry(*code).or_insert(0) += count;
        }
        for (cause, count) in &other.failure_types {
            *self.failure_types.entry(cause.clone()).or_insert(0) += count;
        }
        for (cause, count) in &other.error_types {
            *self.error_types.entry(cause.clone()).or_insert(0) += count;
        }
        for (cause, count) in &other.timeout_types {
            *self.timeout_types.entry(cause.clone()).or_insert(0) += count;
        }
    }
}

/// What `generate_report` leaves behind for the caller (the CLI turns an
/// unmet expectation into its own exit code).
#[derive(Debug, Clone)]
pub struct ReportSummary {
    pub has_unmet_expectation: bool,
    pub step_names: Vec<String>,
    pub total_counts: Counts,
}

struct Discovery {
    indexes: BTreeMap<String, ScenarioIndex>,
    step_order: Vec<String>,
    step_files: HashMap<String, Vec<PathBuf>>,
}

/// Walks the report directory, attributing each scenario index to its
/// containing subdirectory ("client") so independently produced run
/// directories merge by collocation. Step names are collected in
/// first-seen order; unreadable files are logged and skipped.
fn discover(root: &Path) -> Discovery {
    let mut discovery = Discovery {
        indexes: BTreeMap::new(),
        step_order: Vec::new(),
        step_files: HashMap::new(),
    };

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::error!(error = %err, "unable to walk report directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();

        if name == SCENARIO_INDEX_FILENAME {
            match read_scenario_index(entry.path()) {
                Ok(index) => {
                    let client = client_of(root, entry.path());
                    discovery.indexes.insert(client, index);
                }
                Err(err) => {
                    tracing::error!(path = %entry.path().display(), error = %err, "unable to parse scenario index");
                }
            }
        } else if is_step_log_filename(&name) {
            tracing::info!(path = %entry.path().display(), "parsing step log");
            match read_step_name(entry.path()) {
                Ok(step_name) => {
                    if !discovery.step_files.contains_key(&step_name) {
                        discovery.step_order.push(step_name.clone());
                    }
                    discovery
                        .step_files
                        .entry(step_name)
                        .or_default()
                        .push(entry.path().to_path_buf());
                }
                Err(err) => {
                    tracing::error!(path = %entry.path().display(), error = %err, "unable to read step log header");
                }
            }
        }
    }

    discovery
}

/// The subdirectory a result file belongs to, relative to the report root;
/// files at the root itself map to ".".
fn client_of(root: &Path, path: &Path) -> String {
    path.parent()
        .and_then(|dir| dir.strip_prefix(root).ok())
        .map(|rel| rel.to_string_lossy().into_owned())
        .filter(|rel| !rel.is_empty())
        .unwrap_or_else(|| ".".to_string())
}

/// Pools all logs recorded for one step name. When merged logs disagree on
/// the expectation, the latest parsed wins (logged, since a merge of
/// divergent runs is worth noticing).
fn pool_step(step_name: &str, files: &[PathBuf]) -> (StepStats, Expectation) {
    let mut stats = StepStats::default();
    let mut canonical: Option<Expectation> = None;

    for path in files {
        let mut reader = match StepLogReader::open(path) {
            Ok(reader) => reader,
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "unable to open step log");
                continue;
            }
        };
        if let Some(previous) = &canonical {
            if *previous != reader.expectation {
                tracing::warn!(
                    step = %step_name,
                    path = %path.display(),
                    "merged step logs disagree on the expectation; adopting the latest parsed"
                );
            }
        }
        canonical = Some(reader.expectation.clone());

        loop {
            match reader.next_entry() {
                Ok(Some(entry)) => stats.absorb_entry(&entry),
                Ok(None) => break,
                Err(err) => {
                    tracing::error!(path = %path.display(), error = %err, "step log entry unreadable, skipping rest of file");
                    break;
                }
            }
        }
    }

    (stats, canonical.unwrap_or_default())
}

/// Analyzes everything under `report_path` and writes the per-step and
/// overall text/JSON outputs next to the inputs.
pub fn generate_report(report_path: &Path) -> Result<ReportSummary> {
    let discovery = discover(report_path);

    let mut overall = StepStats {
        title: "Overall Results".to_string(),
        ..StepStats::default()
    };
    let mut any_unmet = false;

    for (position, step_name) in discovery.step_order.iter().enumerate() {
        let files = discovery
            .step_files
            .get(step_name)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let (mut step, expectation) = pool_step(step_name, files);
        step.title = format!("Step {}", position + 1);
        step.expectation = expectation;

        overall.absorb_step(&step);

        let mut text = String::new();
        text.push_str(&render::step_banner(step_name));
        text.push_str("\n\n");
        text.push_str(&evaluate::evaluate(&mut step));
        text.push('\n');
        text.push_str(&render::distributions(&mut step));

        let txt_path = report_path.join(format!("step-{}.txt", position + 1));
        std::fs::write(&txt_path, text)?;
        tracing::info!(path = %txt_path.display(), "step text file written");

        let json_path = report_path.join(format!("step-{}.json", position + 1));
        std::fs::write(&json_path, serde_json::to_vec(&step)?)?;
        tracing::info!(path = %json_path.display(), "step json file written");

        if step.has_unmet_expectation {
            any_unmet = true;
        }
    }

    overall.has_unmet_expectation = any_unmet;

    let mut text = String::new();
    text.push_str(render::overall_banner());
    text.push('\n');
    text.push_str(&render::distributions(&mut overall));
    text.push_str("\n\n\n\n");
    text.push_str(&render::environment_and_scenarios(&discovery.indexes));
    let txt_path = report_path.join("scenarios.txt");
    std::fs::write(&txt_path, text)?;
    tracing::info!(path = %txt_path.display(), "overall text file written");

    let json_path = report_path.join("scenarios.json");
    std::fs::write(&json_path, serde_json::to_vec(&overall)?)?;
    tracing::info!(path = %json_path.display(), "overall json file written");

    Ok(ReportSummary {
        has_unmet_expectation: any_unmet,
        step_names: discovery.step_order,
        total_counts: overall.counts,
    })
}
