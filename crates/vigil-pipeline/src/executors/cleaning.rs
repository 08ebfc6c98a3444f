//! CLEANING: line-level cleanup suggestions

use super::analysis::LONG_LINE_LIMIT;
use super::PhaseExecutor;
use crate::context::{Phase, PipelineContext};
use crate::error::Result;
use crate::types::{CleaningKind, CleaningSuggestion, CodeFile};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

static TODO_MARKER: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\b(TODO|FIXME|XXX)\b").ok());
static DEBUG_OUTPUT: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^\s*(print\(|console\.log\(|dbg!\(|println!\(|System\.out\.println\(|pdb\.set_trace\(|breakpoint\(\))").ok()
});

fn matches(re: &Lazy<Option<Regex>>, line: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(line))
}

/// Cleanup suggestion generator
#[derive(Debug, Clone, Copy, Default)]
pub struct CleaningExecutor;

impl CleaningExecutor {
    /// Suggestions for one file; test files are exempt from debug-output checks
    #[must_use]
    pub fn scan(file: &CodeFile, is_test: bool) -> Vec<CleaningSuggestion> {
        let path = file.display_path();
        let mut suggestions = Vec::new();
        let mut push = |line: usize, kind: CleaningKind, message: String| {
            suggestions.push(CleaningSuggestion {
                file_path: path.clone(),
                line: u32::try_from(line + 1).ok(),
                kind,
                message,
            });
        };

        for (index, line) in file.content.lines().enumerate() {
            if matches(&TODO_MARKER, line) {
                push(index, CleaningKind::TodoMarker, "Resolve or ticket this marker".into());
            }
            let width = line.chars().count();
            if width > LONG_LINE_LIMIT {
                push(index, CleaningKind::LongLine, format!("Line is {width} characters"));
            }
            if line.ends_with([' ', '\t']) {
                push(index, CleaningKind::TrailingWhitespace, "Trailing whitespace".into());
            }
            if !is_test && matches(&DEBUG_OUTPUT, line) {
                push(index, CleaningKind::DebugOutput, "Debug output left in code".into());
            }
        }
        suggestions
    }
}

#[async_trait]
impl PhaseExecutor for CleaningExecutor {
    fn phase(&self) -> Phase {
        Phase::Cleaning
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<()> {
        let suggestions: Vec<CleaningSuggestion> = ctx
            .code_files
            .iter()
            .flat_map(|file| {
                let is_test = ctx
                    .file_contexts
                    .as_ref()
                    .and_then(|m| m.get(&file.path))
                    .is_some_and(|c| c.is_test);
                Self::scan(file, is_test)
            })
            .collect();
        tracing::debug!(suggestions = suggestions.len(), "cleaning_completed");
        ctx.cleaning_suggestions = Some(suggestions);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan() {
        let file = CodeFile::new("a.py", "x = 1  \n# TODO: remove\nprint(x)\n");
        let kinds: Vec<_> = CleaningExecutor::scan(&file, false).into_iter().map(|s| (s.line, s.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                (Some(1), CleaningKind::TrailingWhitespace),
                (Some(2), CleaningKind::TodoMarker),
                (Some(3), CleaningKind::DebugOutput),
            ]
        );
        assert_eq!(CleaningExecutor::scan(&file, true).len(), 2);
    }
}
