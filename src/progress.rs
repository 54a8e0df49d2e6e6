//! Topic-exploration progress reporting.
//!
//! Reports observable progress during `aether topic explore` so users see
//! which stage the exploration is in. Progress is emitted on **stderr**
//! so stdout remains parseable for scripts. The same stages are written
//! to the job row, which is what the HTTP API serves.

use std::io::Write;

/// Discrete stage of one topic exploration, in execution order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExploreStage {
    Ingest,
    FetchSources,
    AnalyzeVisibility,
    Score,
    Recommend,
    Done,
}

impl ExploreStage {
    pub fn label(self) -> &'static str {
        match self {
            ExploreStage::Ingest => "ingest",
            ExploreStage::FetchSources => "fetch sources",
            ExploreStage::AnalyzeVisibility => "analyze AI visibility",
            ExploreStage::Score => "score",
            ExploreStage::Recommend => "recommend",
            ExploreStage::Done => "done",
        }
    }

    /// Completion percentage reached when this stage begins.
    pub fn percent(self) -> i64 {
        match self {
            ExploreStage::Ingest => 10,
            ExploreStage::FetchSources => 30,
            ExploreStage::AnalyzeVisibility => 55,
            ExploreStage::Score => 75,
            ExploreStage::Recommend => 90,
            ExploreStage::Done => 100,
        }
    }
}

/// Reports exploration progress. Implementations write to stderr.
pub trait ExploreProgressReporter: Send + Sync {
    fn report(&self, query: &str, stage: ExploreStage);
}

/// Human-friendly progress on stderr: "explore used cars…  score  75%".
pub struct StderrProgress;

impl ExploreProgressReporter for StderrProgress {
    fn report(&self, query: &str, stage: ExploreStage) {
        let line = format!(
            "explore {}  {}  {}%\n",
            query,
            stage.label(),
            stage.percent()
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ExploreProgressReporter for JsonProgress {
    fn report(&self, query: &str, stage: ExploreStage) {
        let obj = serde_json::json!({
            "event": "progress",
            "query": query,
            "stage": stage.label(),
            "percent": stage.percent(),
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled (and for background jobs,
/// which report through the job row instead).
pub struct NoProgress;

impl ExploreProgressReporter for NoProgress {
    fn report(&self, _query: &str, _stage: ExploreStage) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ExploreProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
