//! Testing utilities for the Vigil workspace
//!
//! Scripted frames, classifiers, verifiers and LLM clients, plus small
//! builders for findings and contexts.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use vigil_pipeline::classifier::{Classification, ClassificationInput, FrameClassifier};
use vigil_pipeline::{
    CodeFile, Finding, FindingVerifier, FramePriority, FrameResult, LlmClient, LlmRequest, LlmResponse,
    PipelineContext, PipelineError, Result, Severity, ValidationFrame,
};

pub fn finding(id: &str, rule_id: &str, severity: Severity, path: &str) -> Finding {
    Finding::new(id, rule_id, severity, format!("{rule_id} issue"), format!("{path}:1")).at(path, 1)
}

pub fn code_file(path: &str, content: &str) -> CodeFile {
    CodeFile::new(path, content)
}

pub fn context_with_results(results: Vec<FrameResult>) -> PipelineContext {
    let mut ctx = PipelineContext::new(".", vec![]);
    for result in results {
        ctx.insert_frame_result(result);
    }
    ctx.rebuild_findings();
    ctx
}

/// Frame that reports one finding per file whose content contains `marker`
#[derive(Debug)]
pub struct ScriptedFrame {
    id: String,
    rule_id: String,
    marker: String,
    severity: Severity,
    priority: FramePriority,
    blocker: bool,
    calls: AtomicUsize,
}

impl ScriptedFrame {
    pub fn new(id: &str, marker: &str) -> Self {
        Self {
            id: id.to_string(),
            rule_id: format!("{id}-rule"),
            marker: marker.to_string(),
            severity: Severity::High,
            priority: FramePriority::Medium,
            blocker: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_rule(mut self, rule_id: &str) -> Self {
        self.rule_id = rule_id.to_string();
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_priority(mut self, priority: FramePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn blocker(mut self) -> Self {
        self.blocker = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ValidationFrame for ScriptedFrame {
    fn frame_id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> FramePriority {
        self.priority
    }

    fn is_blocker(&self) -> bool {
        self.blocker
    }

    async fn execute(&self, file: &CodeFile) -> Result<FrameResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let path = file.display_path();
        let findings: Vec<Finding> = file
            .content
            .lines()
            .enumerate()
            .filter(|(_, line)| line.contains(&self.marker))
            .map(|(index, _)| {
                let line = u32::try_from(index + 1).unwrap_or(u32::MAX);
                Finding::new(
                    format!("{}:{path}:{line}", self.id),
                    self.rule_id.clone(),
                    self.severity,
                    format!("found {}", self.marker),
                    format!("{path}:{line}"),
                )
                .at(path.clone(), line)
            })
            .collect();
        Ok(FrameResult::from_findings(&self.id, &self.id, findings))
    }
}

/// Frame that sleeps before passing
#[derive(Debug)]
pub struct SlowFrame {
    id: String,
    delay: Duration,
}

impl SlowFrame {
    pub fn new(id: &str, delay: Duration) -> Self {
        Self {
            id: id.to_string(),
            delay,
        }
    }
}

#[async_trait]
impl ValidationFrame for SlowFrame {
    fn frame_id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, _file: &CodeFile) -> Result<FrameResult> {
        tokio::time::sleep(self.delay).await;
        Ok(FrameResult::passed(&self.id, &self.id))
    }
}

/// Frame whose execution always errors
#[derive(Debug)]
pub struct FailingFrame {
    id: String,
}

impl FailingFrame {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

#[async_trait]
impl ValidationFrame for FailingFrame {
    fn frame_id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, _file: &CodeFile) -> Result<FrameResult> {
        Err(PipelineError::Frame {
            frame_id: self.id.clone(),
            reason: "scripted failure".into(),
        })
    }
}

/// What a [`StaticClassifier`] answers
#[derive(Debug, Clone)]
pub enum ClassifierAnswer {
    Select(Vec<String>),
    Absent,
    Fail(String),
}

/// Classifier with a fixed answer that records the files it was shown
#[derive(Debug)]
pub struct StaticClassifier {
    answer: ClassifierAnswer,
    seen: Mutex<Vec<Vec<String>>>,
}

impl StaticClassifier {
    pub fn new(answer: ClassifierAnswer) -> Self {
        Self {
            answer,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn selecting(frames: &[&str]) -> Self {
        Self::new(ClassifierAnswer::Select(frames.iter().map(ToString::to_string).collect()))
    }

    /// File paths of each call, in call order
    pub fn seen(&self) -> Vec<Vec<String>> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl FrameClassifier for StaticClassifier {
    fn name(&self) -> &str {
        "static"
    }

    async fn classify(&self, input: &ClassificationInput<'_>) -> Result<Option<Classification>> {
        self.seen
            .lock()
            .push(input.files.iter().map(CodeFile::display_path).collect());
        match &self.answer {
            ClassifierAnswer::Select(frames) => Ok(Some(Classification {
                selected_frames: frames.clone(),
                reasoning: "static".into(),
                ..Classification::default()
            })),
            ClassifierAnswer::Absent => Ok(None),
            ClassifierAnswer::Fail(reason) => Err(PipelineError::Classification(reason.clone())),
        }
    }
}

/// Verifier that confirms a fixed set of ids, or fails
#[derive(Debug)]
pub struct ScriptedVerifier {
    valid: Option<HashSet<String>>,
    calls: AtomicUsize,
}

impl ScriptedVerifier {
    pub fn confirming(ids: &[&str]) -> Self {
        Self {
            valid: Some(ids.iter().map(ToString::to_string).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            valid: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FindingVerifier for ScriptedVerifier {
    async fn verify(&self, findings: &[Finding], _context: &PipelineContext) -> Result<HashSet<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.valid {
            Some(valid) => Ok(findings
                .iter()
                .filter(|f| valid.contains(&f.id))
                .map(|f| f.id.clone())
                .collect()),
            None => Err(PipelineError::Verification("verifier offline".into())),
        }
    }
}

/// LLM client replaying queued responses; answers with `fallback` once empty
#[derive(Debug)]
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<LlmResponse>>,
    fallback: LlmResponse,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<LlmResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: LlmResponse::failure("no scripted response"),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn always(response: LlmResponse) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: response,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn provider(&self) -> &str {
        "scripted"
    }

    async fn send(&self, request: &LlmRequest) -> LlmResponse {
        self.requests.lock().push(request.clone());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}
