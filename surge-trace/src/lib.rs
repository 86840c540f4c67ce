//! Persisted trace model and the on-disk trace store.
//!
//! A load run produces one *scenario index* and one *step log* per distinct
//! step name. Both are gzip-compressed streams of length-prefixed bincode
//! frames, so independently produced run directories can later be merged by
//! the offline analyzer.

pub mod model;
pub mod store;

pub use model::{
    Counts, Environment, Expectation, LoadConfig, RandomInterval, ScenarioRecord, StepEntry,
    Timestamps,
};
pub use store::{
    is_step_log_filename, read_scenario_index, read_step_name, ScenarioIndex, StepLogReader,
    TraceStore, SCENARIO_INDEX_FILENAME, STEP_LOG_EXTENSION, TRACE_FORMAT_VERSION,
};
