//! Validation frame contract and registry

use crate::error::Result;
use crate::types::{CodeFile, FramePriority, FrameResult};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// One validation unit run during VALIDATION.
///
/// The orchestrator only relies on this contract; what a frame checks is
/// its own business.
#[async_trait]
pub trait ValidationFrame: Send + Sync {
    /// Stable id, e.g. `security`
    fn frame_id(&self) -> &str;

    /// Display name
    fn name(&self) -> &str {
        self.frame_id()
    }

    /// Default tier when classification assigns none
    fn priority(&self) -> FramePriority {
        FramePriority::Medium
    }

    /// Whether a failure blocks the run
    fn is_blocker(&self) -> bool {
        false
    }

    /// Check one file
    async fn execute(&self, file: &CodeFile) -> Result<FrameResult>;
}

/// Available frames, in registration order
#[derive(Clone, Default)]
pub struct FrameSet {
    frames: IndexMap<String, Arc<dyn ValidationFrame>>,
}

impl fmt::Debug for FrameSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSet")
            .field("frames", &self.frames.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FrameSet {
    /// Empty set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace by id)
    pub fn register(&mut self, frame: Arc<dyn ValidationFrame>) {
        self.frames.insert(frame.frame_id().to_string(), frame);
    }

    /// Builder form of [`register`](Self::register)
    #[must_use]
    pub fn with(mut self, frame: Arc<dyn ValidationFrame>) -> Self {
        self.register(frame);
        self
    }

    /// Lookup
    #[must_use]
    pub fn get(&self, frame_id: &str) -> Option<&Arc<dyn ValidationFrame>> {
        self.frames.get(frame_id)
    }

    /// Whether `frame_id` is registered
    #[must_use]
    pub fn contains(&self, frame_id: &str) -> bool {
        self.frames.contains_key(frame_id)
    }

    /// Every id, in registration order
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.frames.keys().cloned().collect()
    }

    /// Number of frames
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
