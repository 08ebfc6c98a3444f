//! Domain types shared by all phases
//!
//! Defines:
//! - Findings and per-frame results
//! - Input files and the per-file/project context produced by PRE_ANALYSIS
//! - Phase outputs (triage lanes, quality metrics, suppressions, suggestions)
//! - Overall pipeline status

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Finding severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Must be fixed before release
    Critical,
    /// Serious issue
    High,
    /// Should be fixed
    Medium,
    /// Minor issue
    Low,
    /// Informational only
    Info,
}

impl Severity {
    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Info => "info",
        }
    }

    /// Critical or high
    #[inline]
    #[must_use]
    pub const fn is_severe(self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reported issue. Never edited after creation; post-processing only
/// includes or excludes whole findings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Unique id within the run
    pub id: String,
    /// Rule that produced the finding
    pub rule_id: String,
    /// Severity
    pub severity: Severity,
    /// Human-readable message
    pub message: String,
    /// Display location, e.g. `src/db.rs:42`
    pub location: String,
    /// File the finding refers to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// 1-based line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Longer explanation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Offending snippet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Finding {
    /// Create a finding
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        rule_id: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            rule_id: rule_id.into(),
            severity,
            message: message.into(),
            location: location.into(),
            file_path: None,
            line: None,
            detail: None,
            code: None,
        }
    }

    /// Attach file and line
    #[must_use]
    pub fn at(mut self, file_path: impl Into<String>, line: u32) -> Self {
        self.file_path = Some(file_path.into());
        self.line = Some(line);
        self
    }

    /// Attach explanation
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attach snippet
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// File path, falling back to the location prefix before `:`
    #[must_use]
    pub fn path(&self) -> &str {
        self.file_path
            .as_deref()
            .unwrap_or_else(|| self.location.split(':').next().unwrap_or(&self.location))
    }
}

/// Outcome of one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameStatus {
    /// No issues
    Passed,
    /// Issues found
    Failed,
    /// Issues found below the failure bar
    Warning,
    /// The frame itself broke
    Error,
    /// Not run
    Skipped,
}

impl FrameStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Skipped => 0,
            Self::Passed => 1,
            Self::Warning => 2,
            Self::Failed => 3,
            Self::Error => 4,
        }
    }

    /// The more severe of two statuses
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for FrameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Execution tier of a frame; tiers run from `Critical` to `Low`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FramePriority {
    /// First tier
    Critical,
    /// Second tier
    High,
    /// Third tier
    #[default]
    Medium,
    /// Last tier
    Low,
}

impl FramePriority {
    /// Tiers in execution order
    pub const ALL: [Self; 4] = [Self::Critical, Self::High, Self::Medium, Self::Low];

    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for FramePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FramePriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown frame priority: {other}")),
        }
    }
}

/// Metadata value marking an intentional (enforced) failure
pub const BLOCKER_FAILURE_REASONS: [&str; 2] =
    ["pre_rules_blocker_violation", "post_rules_blocker_violation"];

/// Result of running one frame over the selected files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    /// Frame id
    pub frame_id: String,
    /// Display name
    pub frame_name: String,
    /// Outcome
    pub status: FrameStatus,
    /// Wall-clock time
    #[serde(with = "duration_ms", rename = "duration_ms")]
    pub duration: Duration,
    /// Number of findings
    pub issues_found: usize,
    /// Whether a failure of this frame blocks the run
    pub is_blocker: bool,
    /// Ordered findings
    pub findings: Vec<Finding>,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl FrameResult {
    fn base(frame_id: impl Into<String>, frame_name: impl Into<String>, status: FrameStatus) -> Self {
        Self {
            frame_id: frame_id.into(),
            frame_name: frame_name.into(),
            status,
            duration: Duration::ZERO,
            issues_found: 0,
            is_blocker: false,
            findings: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// No findings
    #[must_use]
    pub fn passed(frame_id: impl Into<String>, frame_name: impl Into<String>) -> Self {
        Self::base(frame_id, frame_name, FrameStatus::Passed)
    }

    /// Failed with `findings`
    #[must_use]
    pub fn failed(
        frame_id: impl Into<String>,
        frame_name: impl Into<String>,
        findings: Vec<Finding>,
    ) -> Self {
        let mut result = Self::base(frame_id, frame_name, FrameStatus::Failed);
        result.issues_found = findings.len();
        result.findings = findings;
        result
    }

    /// `failed` when there are findings, else `passed`
    #[must_use]
    pub fn from_findings(
        frame_id: impl Into<String>,
        frame_name: impl Into<String>,
        findings: Vec<Finding>,
    ) -> Self {
        if findings.is_empty() {
            Self::passed(frame_id, frame_name)
        } else {
            Self::failed(frame_id, frame_name, findings)
        }
    }

    /// Not run
    #[must_use]
    pub fn skipped(
        frame_id: impl Into<String>,
        frame_name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::base(frame_id, frame_name, FrameStatus::Skipped)
            .with_metadata("skip_reason", reason.into())
    }

    /// The frame raised an error
    #[must_use]
    pub fn error(
        frame_id: impl Into<String>,
        frame_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::base(frame_id, frame_name, FrameStatus::Error).with_metadata("error", message.into())
    }

    /// The frame exceeded its time budget
    #[must_use]
    pub fn timeout(frame_id: impl Into<String>, frame_name: impl Into<String>, after: Duration) -> Self {
        Self::base(frame_id, frame_name, FrameStatus::Error)
            .with_metadata("timeout", true)
            .with_metadata("error", format!("frame timed out after {}s", after.as_secs_f64()))
            .with_duration(after)
    }

    /// Set duration
    #[inline]
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Set blocker flag
    #[inline]
    #[must_use]
    pub fn with_blocker(mut self, is_blocker: bool) -> Self {
        self.is_blocker = is_blocker;
        self
    }

    /// Add a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Replace the whole findings list and keep `issues_found` in sync
    pub fn replace_findings(&mut self, findings: Vec<Finding>) {
        self.issues_found = findings.len();
        self.findings = findings;
    }

    /// Enforced failure that post-processing must not relabel
    #[must_use]
    pub fn has_blocker_violation(&self) -> bool {
        let reason = self
            .metadata
            .get("failure_reason")
            .and_then(serde_json::Value::as_str);
        if reason.is_some_and(|r| BLOCKER_FAILURE_REASONS.contains(&r)) {
            return true;
        }
        self.is_blocker && self.status == FrameStatus::Failed
    }

    /// Fold another partial result of the same frame into this one
    pub fn merge(&mut self, other: Self) {
        self.status = self.status.worst(other.status);
        self.duration += other.duration;
        self.findings.extend(other.findings);
        self.issues_found = self.findings.len();
        self.is_blocker |= other.is_blocker;
        for (key, value) in other.metadata {
            self.metadata.entry(key).or_insert(value);
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// One input file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeFile {
    /// Path (relative to the project root or absolute)
    pub path: PathBuf,
    /// Full content
    pub content: String,
    /// Language id derived from the extension
    pub language: String,
}

impl CodeFile {
    /// Create file, inferring the language from the extension
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        let path = path.into();
        let language = language_for(&path).to_string();
        Self {
            path,
            content: content.into(),
            language,
        }
    }

    /// Read a file from disk
    pub async fn read(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(Self::new(path, content))
    }

    /// Line count
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.content.lines().count()
    }

    /// Path as a display string
    #[must_use]
    pub fn display_path(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

fn language_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or_default() {
        "rs" => "rust",
        "py" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "rb" => "ruby",
        "c" | "h" => "c",
        "cpp" | "cc" | "hpp" => "cpp",
        "md" | "rst" | "txt" => "text",
        "yaml" | "yml" | "toml" | "json" => "config",
        _ => "unknown",
    }
}

/// Per-file facts gathered in PRE_ANALYSIS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContext {
    /// File path
    pub path: PathBuf,
    /// blake3 hex digest of the content
    pub content_hash: String,
    /// Line count
    pub line_count: usize,
    /// Language id
    pub language: String,
    /// Test file by naming convention
    pub is_test: bool,
    /// Content identical to the previous run
    pub is_unchanged: bool,
}

/// Project-wide facts gathered in PRE_ANALYSIS
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectContext {
    /// Project root
    pub root: PathBuf,
    /// Number of input files
    pub file_count: usize,
    /// Distinct languages, sorted
    pub languages: Vec<String>,
    /// Distinct parent directories
    pub module_count: usize,
    /// Detected frameworks, sorted
    pub frameworks: Vec<String>,
}

/// Triage lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    /// Cheap checks only
    Fast,
    /// Default depth
    Middle,
    /// Full analysis
    Deep,
}

/// Triage outcome for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageDecision {
    /// File path
    pub path: PathBuf,
    /// Lane
    pub lane: Lane,
    /// Why
    pub reason: String,
}

/// Aggregated quality metrics from ANALYSIS
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Mean file score, 0-10
    pub overall_score: f64,
    /// Score per file
    pub file_scores: BTreeMap<String, f64>,
    /// Lines longer than the limit
    pub long_lines: usize,
    /// Deepest nesting seen
    pub max_nesting: usize,
    /// TODO/FIXME markers
    pub todo_count: usize,
    /// Total lines
    pub total_lines: usize,
}

/// Low-quality file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    /// File path
    pub path: String,
    /// Score, 0-10
    pub score: f64,
    /// Contributing signals
    pub reasons: Vec<String>,
}

/// Suppresses frames for files matching a glob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppressionRule {
    /// Glob pattern, e.g. `tests/**`
    pub pattern: String,
    /// Frames suppressed; empty means every frame
    #[serde(default)]
    pub frames: Vec<String>,
    /// Why
    #[serde(default)]
    pub reason: String,
}

impl SuppressionRule {
    /// Create rule
    #[must_use]
    pub fn new(pattern: impl Into<String>, frames: Vec<String>, reason: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            frames,
            reason: reason.into(),
        }
    }

    /// Whether `frame_id` must not run on `path`. Invalid patterns match nothing.
    #[must_use]
    pub fn suppresses(&self, frame_id: &str, path: &Path) -> bool {
        if !self.frames.is_empty() && !self.frames.iter().any(|f| f == frame_id) {
            return false;
        }
        glob::Pattern::new(&self.pattern).is_ok_and(|p| p.matches_path(path))
    }
}

/// Hardening suggestion from FORTIFICATION
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fortification {
    /// Finding addressed
    pub finding_id: String,
    /// Frame that reported it
    pub frame_id: String,
    /// File
    pub file_path: String,
    /// Short title
    pub title: String,
    /// Suggested change
    pub suggestion: String,
}

/// Kind of cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleaningKind {
    /// Leftover TODO/FIXME
    TodoMarker,
    /// Line over the length limit
    LongLine,
    /// Trailing whitespace
    TrailingWhitespace,
    /// Debug print left in code
    DebugOutput,
}

/// Cleanup suggestion from CLEANING
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleaningSuggestion {
    /// File
    pub file_path: String,
    /// 1-based line
    pub line: Option<u32>,
    /// Kind
    pub kind: CleaningKind,
    /// Message
    pub message: String,
}

/// Recurring pattern noticed during classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnedPattern {
    /// Rule or signal
    pub rule_id: String,
    /// Description
    pub description: String,
    /// Times seen
    pub occurrences: usize,
}

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStatus {
    /// Not started
    #[default]
    Pending,
    /// In progress
    Running,
    /// Finished cleanly
    Completed,
    /// Finished with non-blocker frame failures
    CompletedWithFailures,
    /// Finished with errors or blocker failures
    Failed,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::CompletedWithFailures => "COMPLETED_WITH_FAILURES",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_worst() {
        assert_eq!(FrameStatus::Passed.worst(FrameStatus::Failed), FrameStatus::Failed);
        assert_eq!(FrameStatus::Error.worst(FrameStatus::Failed), FrameStatus::Error);
        assert_eq!(FrameStatus::Skipped.worst(FrameStatus::Passed), FrameStatus::Passed);
    }

    #[test]
    fn test_merge_keeps_counts_in_sync() {
        let f = |id: &str| Finding::new(id, "R1", Severity::Low, "m", "a.py:1");
        let mut a = FrameResult::failed("naming", "Naming", vec![f("1")]);
        a.merge(FrameResult::passed("naming", "Naming"));
        a.merge(FrameResult::failed("naming", "Naming", vec![f("2"), f("3")]));
        assert_eq!(a.status, FrameStatus::Failed);
        assert_eq!(a.issues_found, 3);
    }

    #[test]
    fn test_blocker_violation() {
        let failed = FrameResult::failed("security", "Security", vec![]).with_blocker(true);
        assert!(failed.has_blocker_violation());
        let enforced = FrameResult::passed("rules", "Rules")
            .with_metadata("failure_reason", "post_rules_blocker_violation");
        assert!(enforced.has_blocker_violation());
        assert!(!FrameResult::passed("x", "X").with_blocker(true).has_blocker_violation());
    }

    #[test]
    fn test_suppression_rule() {
        let rule = SuppressionRule::new("tests/**", vec!["security".into()], "fixtures");
        assert!(rule.suppresses("security", Path::new("tests/data/keys.py")));
        assert!(!rule.suppresses("orphan", Path::new("tests/data/keys.py")));
        assert!(!rule.suppresses("security", Path::new("src/app.py")));

        let all = SuppressionRule::new("vendor/*", vec![], "third party");
        assert!(all.suppresses("anything", Path::new("vendor/lib.js")));
        assert!(!SuppressionRule::new("[", vec![], "bad").suppresses("x", Path::new("[")));
    }

    #[test]
    fn test_finding_path_fallback() {
        let f = Finding::new("1", "R", Severity::High, "m", "src/db.py:42");
        assert_eq!(f.path(), "src/db.py");
        assert_eq!(f.clone().at("src/other.py", 3).path(), "src/other.py");
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&PipelineStatus::CompletedWithFailures).unwrap();
        assert_eq!(json, "\"COMPLETED_WITH_FAILURES\"");
    }
}
