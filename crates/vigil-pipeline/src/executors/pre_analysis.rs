//! PRE_ANALYSIS: file hashes, incremental index and project facts

use super::PhaseExecutor;
use crate::context::{Phase, PipelineContext};
use crate::error::Result;
use crate::types::{CodeFile, FileContext, ProjectContext};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Location of the content-hash index relative to the project root
pub const HASH_INDEX_RELATIVE_PATH: &str = ".vigil/cache/file_hashes.json";

const FRAMEWORK_MARKERS: &[(&str, &str)] = &[
    ("django", "django"),
    ("flask", "flask"),
    ("fastapi", "fastapi"),
    ("express", "express"),
    ("axum", "axum"),
    ("actix_web", "actix"),
    ("springframework", "spring"),
    ("react", "react"),
];

/// Content hashes from the previous run, keyed by path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileHashIndex {
    hashes: BTreeMap<String, String>,
}

impl FileHashIndex {
    /// Load `<root>/.vigil/cache/file_hashes.json`; empty when missing or corrupt
    pub async fn load(project_root: &Path) -> Self {
        let path = project_root.join(HASH_INDEX_RELATIVE_PATH);
        let hashes = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "hash_index_corrupt");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self { hashes }
    }

    /// Index of the hashes recorded in `ctx.file_contexts`
    #[must_use]
    pub fn from_context(ctx: &PipelineContext) -> Self {
        let hashes = ctx
            .file_contexts
            .iter()
            .flat_map(|m| m.values())
            .map(|c| (c.path.to_string_lossy().into_owned(), c.content_hash.clone()))
            .collect();
        Self { hashes }
    }

    /// Previous hash of `path`
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&str> {
        self.hashes.get(path.to_string_lossy().as_ref()).map(String::as_str)
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Write atomically under `project_root`
    pub async fn save(&self, project_root: &Path) -> Result<()> {
        let path = project_root.join(HASH_INDEX_RELATIVE_PATH);
        let bytes = serde_json::to_vec_pretty(&self.hashes)?;
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;
        Ok(())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// blake3 hex digest of a file's content
#[must_use]
pub fn content_hash(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

fn is_test_path(path: &Path) -> bool {
    let text = path.to_string_lossy().to_lowercase();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    text.contains("/tests/")
        || text.starts_with("tests/")
        || name.starts_with("test_")
        || name.contains("_test.")
        || name.contains(".test.")
        || name.contains(".spec.")
}

/// Hashes files and gathers project-level facts
#[derive(Debug, Clone, Default)]
pub struct PreAnalysisExecutor {
    incremental: bool,
}

impl PreAnalysisExecutor {
    /// `incremental` compares hashes with the previous run
    #[must_use]
    pub fn new(incremental: bool) -> Self {
        Self { incremental }
    }

    fn project_context(root: &Path, files: &[CodeFile]) -> ProjectContext {
        let languages: BTreeSet<String> = files.iter().map(|f| f.language.clone()).collect();
        let modules: BTreeSet<PathBuf> = files
            .iter()
            .map(|f| f.path.parent().map(Path::to_path_buf).unwrap_or_default())
            .collect();
        let frameworks: BTreeSet<String> = files
            .iter()
            .flat_map(|f| {
                let lower = f.content.to_lowercase();
                FRAMEWORK_MARKERS
                    .iter()
                    .filter(move |(marker, _)| lower.contains(marker))
                    .map(|(_, name)| (*name).to_string())
                    .collect::<Vec<_>>()
            })
            .collect();

        ProjectContext {
            root: root.to_path_buf(),
            file_count: files.len(),
            languages: languages.into_iter().collect(),
            module_count: modules.len(),
            frameworks: frameworks.into_iter().collect(),
        }
    }
}

#[async_trait]
impl PhaseExecutor for PreAnalysisExecutor {
    fn phase(&self) -> Phase {
        Phase::PreAnalysis
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<()> {
        let previous = if self.incremental {
            FileHashIndex::load(&ctx.project_root).await
        } else {
            FileHashIndex::default()
        };

        let mut contexts = BTreeMap::new();
        for file in &ctx.code_files {
            let hash = content_hash(&file.content);
            let is_unchanged = previous.get(&file.path) == Some(hash.as_str());
            contexts.insert(
                file.path.clone(),
                FileContext {
                    path: file.path.clone(),
                    content_hash: hash,
                    line_count: file.line_count(),
                    language: file.language.clone(),
                    is_test: is_test_path(&file.path),
                    is_unchanged,
                },
            );
        }

        let unchanged = contexts.values().filter(|c| c.is_unchanged).count();
        ctx.project_context = Some(Self::project_context(&ctx.project_root, &ctx.code_files));
        ctx.file_contexts = Some(contexts);
        tracing::info!(
            pipeline_id = %ctx.pipeline_id,
            files = ctx.code_files.len(),
            unchanged,
            "pre_analysis_completed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unchanged_detection_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![
            CodeFile::new("src/a.py", "print('a')"),
            CodeFile::new("tests/test_b.py", "assert True"),
        ];

        let mut first = PipelineContext::new(dir.path(), files.clone());
        let executor = PreAnalysisExecutor::new(true);
        executor.execute(&mut first).await.unwrap();
        assert!(first.file_contexts.as_ref().unwrap().values().all(|c| !c.is_unchanged));
        FileHashIndex::from_context(&first).save(dir.path()).await.unwrap();

        let mut changed = files;
        changed[1].content = "assert False".into();
        let mut second = PipelineContext::new(dir.path(), changed);
        executor.execute(&mut second).await.unwrap();
        let contexts = second.file_contexts.unwrap();
        assert!(contexts[Path::new("src/a.py")].is_unchanged);
        assert!(!contexts[Path::new("tests/test_b.py")].is_unchanged);
        assert!(contexts[Path::new("tests/test_b.py")].is_test);
    }

    #[tokio::test]
    async fn test_project_context() {
        let files = vec![
            CodeFile::new("api/app.py", "from fastapi import FastAPI"),
            CodeFile::new("core/lib.rs", "fn main() {}"),
        ];
        let mut ctx = PipelineContext::new(".", files);
        PreAnalysisExecutor::new(false).execute(&mut ctx).await.unwrap();
        let project = ctx.project_context.unwrap();
        assert_eq!(project.file_count, 2);
        assert_eq!(project.module_count, 2);
        assert_eq!(project.languages, vec!["python", "rust"]);
        assert_eq!(project.frameworks, vec!["fastapi"]);
    }
}
