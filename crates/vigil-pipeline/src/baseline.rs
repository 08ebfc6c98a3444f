//! Baseline of accepted findings
//!
//! The file is a previous run's JSON export: `frame_results[].findings[]`,
//! each finding carrying `rule_id` and a `file_path` (or `path`). Entries
//! are reduced to `rule_id:relative_path` keys, so two findings of the same
//! rule in the same file are considered the same issue regardless of line
//! or message.

use crate::error::Result;
use crate::types::Finding;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
struct BaselineDocument {
    #[serde(default)]
    frame_results: Vec<BaselineFrame>,
}

#[derive(Debug, Default, Deserialize)]
struct BaselineFrame {
    #[serde(default)]
    findings: Vec<BaselineFinding>,
}

#[derive(Debug, Default, Deserialize)]
struct BaselineFinding {
    #[serde(default)]
    rule_id: Option<String>,
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    path: Option<String>,
}

/// Known-issue keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Baseline {
    keys: HashSet<String>,
}

impl Baseline {
    /// Load `path`; `Ok(None)` when the file does not exist
    pub async fn load(path: &Path, project_root: &Path) -> Result<Option<Self>> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let document: BaselineDocument = serde_json::from_str(&raw)?;
        Ok(Some(Self::from_document(document, project_root)))
    }

    fn from_document(document: BaselineDocument, project_root: &Path) -> Self {
        let keys = document
            .frame_results
            .into_iter()
            .flat_map(|frame| frame.findings)
            .filter_map(|f| {
                let rule = f.rule_id?;
                let file = f.file_path.or(f.path)?;
                Some(key(&rule, &normalize_path(&file, project_root)))
            })
            .collect();
        Self { keys }
    }

    /// Build directly from findings (used when writing a new baseline)
    #[must_use]
    pub fn from_findings<'a>(findings: impl IntoIterator<Item = &'a Finding>, project_root: &Path) -> Self {
        let keys = findings
            .into_iter()
            .map(|f| Self::key_for(f, project_root))
            .collect();
        Self { keys }
    }

    /// Key of a current finding
    #[must_use]
    pub fn key_for(finding: &Finding, project_root: &Path) -> String {
        key(&finding.rule_id, &normalize_path(finding.path(), project_root))
    }

    /// Whether `finding` is a known issue
    #[must_use]
    pub fn contains(&self, finding: &Finding, project_root: &Path) -> bool {
        self.keys.contains(&Self::key_for(finding, project_root))
    }

    /// Number of keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

fn key(rule_id: &str, relative_path: &str) -> String {
    format!("{rule_id}:{relative_path}")
}

/// Path relative to `project_root`, `/`-separated, without `.`/`..`
/// segments. Paths outside the root are returned cleaned but absolute.
#[must_use]
pub fn normalize_path(path: &str, project_root: &Path) -> String {
    let root = clean(project_root);
    let candidate = Path::new(path);
    let absolute = if candidate.is_absolute() {
        clean(candidate)
    } else {
        clean(&root.join(candidate))
    };
    let relative = absolute.strip_prefix(&root).unwrap_or(&absolute);
    relative
        .components()
        .map(|c| match c {
            Component::RootDir => "".into(),
            other => other.as_os_str().to_string_lossy(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;

    #[test]
    fn test_normalize_path() {
        let root = Path::new("/repo");
        assert_eq!(normalize_path("src/db.py", root), "src/db.py");
        assert_eq!(normalize_path("./src/../src/db.py", root), "src/db.py");
        assert_eq!(normalize_path("/repo/src/db.py", root), "src/db.py");
    }

    #[test]
    fn test_document_keys() {
        let json = r#"{"frame_results": [
            {"findings": [
                {"rule_id": "SQLI", "file_path": "/repo/src/db.py", "line": 3},
                {"rule_id": "XSS", "path": "web/view.js"},
                {"file_path": "no_rule.py"}
            ]},
            {}
        ]}"#;
        let doc: BaselineDocument = serde_json::from_str(json).unwrap();
        let baseline = Baseline::from_document(doc, Path::new("/repo"));
        assert_eq!(baseline.len(), 2);

        let current = Finding::new("f1", "SQLI", Severity::High, "different message", "src/db.py:99");
        assert!(baseline.contains(&current, Path::new("/repo")));
        let other_file = Finding::new("f2", "SQLI", Severity::High, "m", "src/other.py:1");
        assert!(!baseline.contains(&other_file, Path::new("/repo")));
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Baseline::load(&dir.path().join("baseline.json"), dir.path()).await.unwrap();
        assert!(loaded.is_none());
    }
}
