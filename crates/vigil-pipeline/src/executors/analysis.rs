//! ANALYSIS: per-file quality score and hotspots
//!
//! Each file starts at 10 and loses points for long lines, deep nesting,
//! TODO markers and sheer size. The overall score is the mean over files
//! (10 for an empty input).

use super::PhaseExecutor;
use crate::context::{Phase, PipelineContext};
use crate::error::Result;
use crate::types::{CodeFile, Hotspot, QualityMetrics};
use async_trait::async_trait;

/// Lines longer than this count against the score
pub const LONG_LINE_LIMIT: usize = 120;
/// Files below this score are hotspots
pub const HOTSPOT_THRESHOLD: f64 = 6.0;

const INDENT_WIDTH: usize = 4;
const NESTING_LIMIT: usize = 4;
const LARGE_FILE_LINES: usize = 500;

/// Raw signals for one file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileSignals {
    /// Total lines
    pub lines: usize,
    /// Lines over [`LONG_LINE_LIMIT`]
    pub long_lines: usize,
    /// Deepest indentation/brace nesting
    pub max_nesting: usize,
    /// TODO/FIXME/XXX markers
    pub todos: usize,
}

impl FileSignals {
    /// Measure `file`
    #[must_use]
    pub fn measure(file: &CodeFile) -> Self {
        let mut signals = Self::default();
        let mut braces: usize = 0;
        for line in file.content.lines() {
            signals.lines += 1;
            if line.chars().count() > LONG_LINE_LIMIT {
                signals.long_lines += 1;
            }
            if ["TODO", "FIXME", "XXX"].iter().any(|m| line.contains(m)) {
                signals.todos += 1;
            }
            let expanded = line.replace('\t', "    ");
            let indent = expanded.len() - expanded.trim_start().len();
            for c in line.chars() {
                match c {
                    '{' => braces += 1,
                    '}' => braces = braces.saturating_sub(1),
                    _ => {}
                }
            }
            signals.max_nesting = signals.max_nesting.max(indent / INDENT_WIDTH).max(braces);
        }
        signals
    }

    /// Score 0-10 and the reasons points were lost
    #[must_use]
    pub fn score(&self) -> (f64, Vec<String>) {
        let mut score = 10.0_f64;
        let mut reasons = Vec::new();
        if self.long_lines > 0 {
            score -= (self.long_lines as f64 * 0.25).min(2.5);
            reasons.push(format!("{} long lines", self.long_lines));
        }
        if self.max_nesting > NESTING_LIMIT {
            score -= ((self.max_nesting - NESTING_LIMIT) as f64).min(3.0);
            reasons.push(format!("nesting depth {}", self.max_nesting));
        }
        if self.todos > 0 {
            score -= (self.todos as f64 * 0.5).min(2.0);
            reasons.push(format!("{} TODO markers", self.todos));
        }
        if self.lines > LARGE_FILE_LINES {
            score -= ((self.lines - LARGE_FILE_LINES) as f64 / 250.0).min(2.5);
            reasons.push(format!("{} lines", self.lines));
        }
        (score.clamp(0.0, 10.0), reasons)
    }
}

/// Computes quality metrics
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalysisExecutor;

impl AnalysisExecutor {
    /// Metrics and hotspots for a set of files
    #[must_use]
    pub fn analyze(files: &[CodeFile]) -> (QualityMetrics, Vec<Hotspot>) {
        let mut metrics = QualityMetrics::default();
        let mut hotspots = Vec::new();

        for file in files {
            let signals = FileSignals::measure(file);
            let (score, reasons) = signals.score();
            let path = file.display_path();

            metrics.long_lines += signals.long_lines;
            metrics.todo_count += signals.todos;
            metrics.total_lines += signals.lines;
            metrics.max_nesting = metrics.max_nesting.max(signals.max_nesting);
            metrics.file_scores.insert(path.clone(), score);

            if score < HOTSPOT_THRESHOLD {
                hotspots.push(Hotspot { path, score, reasons });
            }
        }

        metrics.overall_score = if metrics.file_scores.is_empty() {
            10.0
        } else {
            metrics.file_scores.values().sum::<f64>() / metrics.file_scores.len() as f64
        };
        hotspots.sort_by(|a, b| a.score.total_cmp(&b.score));
        (metrics, hotspots)
    }
}

#[async_trait]
impl PhaseExecutor for AnalysisExecutor {
    fn phase(&self) -> Phase {
        Phase::Analysis
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<()> {
        let (metrics, hotspots) = Self::analyze(&ctx.code_files);
        tracing::info!(
            pipeline_id = %ctx.pipeline_id,
            score = metrics.overall_score,
            hotspots = hotspots.len(),
            "analysis_completed"
        );
        ctx.quality_metrics = Some(metrics);
        ctx.hotspots = Some(hotspots);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_file_scores_ten() {
        let file = CodeFile::new("a.py", "def f():\n    return 1\n");
        let (metrics, hotspots) = AnalysisExecutor::analyze(&[file]);
        assert_eq!(metrics.overall_score, 10.0);
        assert!(hotspots.is_empty());
    }

    #[test]
    fn test_messy_file_is_hotspot() {
        let mut content = String::new();
        content.push_str(&format!("x = '{}'\n", "a".repeat(150)).repeat(10));
        content.push_str("# TODO fix\n# FIXME later\n# TODO again\n# TODO more\n");
        content.push_str(&format!("{}deep()\n", " ".repeat(4 * 8)));
        let file = CodeFile::new("messy.py", content);

        let signals = FileSignals::measure(&file);
        assert_eq!(signals.long_lines, 10);
        assert_eq!(signals.todos, 4);
        assert_eq!(signals.max_nesting, 8);

        let (metrics, hotspots) = AnalysisExecutor::analyze(&[file]);
        assert!(metrics.overall_score < HOTSPOT_THRESHOLD);
        assert_eq!(hotspots.len(), 1);
        assert_eq!(hotspots[0].reasons.len(), 3);
    }

    #[test]
    fn test_empty_input() {
        let (metrics, hotspots) = AnalysisExecutor::analyze(&[]);
        assert_eq!(metrics.overall_score, 10.0);
        assert!(hotspots.is_empty());
    }
}
