//! `ExpertiseManager`: formats, learns, and prunes the per-domain
//! expertise document injected into agent prompts (§4.G).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;

use crate::agent::{AgentOutcome, AgentStatus};
use crate::config::LearningConfig;
use crate::model::{Domain, ExpertiseContent, FailureLearning, ProjectId, Task};
use crate::store::ExpertiseStore;
use crate::Result;

const MAX_CORE_FILES: usize = 30;
const MAX_PROMPT_CORE_FILES: usize = 10;
const MAX_PROMPT_PATTERNS: usize = 5;
const MAX_PROMPT_TECHNIQUES: usize = 5;
const MAX_PROMPT_FAILURES: usize = 3;
const MAX_PROMPT_EFFECTIVE_PATTERNS: usize = 3;
const SUMMARY_MAX_CHARS: usize = 200;

/// What changed as a result of `learn_from_session`, for audit logging.
#[derive(Debug, Clone, Default)]
pub struct LearningChanges {
    pub failure_recorded: bool,
    pub patterns_added: Vec<String>,
    pub core_files_added: Vec<String>,
    pub technique_recorded: bool,
}

pub struct ExpertiseManager {
    store: Arc<dyn ExpertiseStore>,
    config: LearningConfig,
    locks: AsyncMutex<HashMap<(ProjectId, String), Arc<AsyncMutex<()>>>>,
}

impl ExpertiseManager {
    pub fn new(store: Arc<dyn ExpertiseStore>, config: LearningConfig) -> Self {
        Self {
            store,
            config,
            locks: AsyncMutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, project: &ProjectId, domain: Domain) -> Arc<AsyncMutex<()>> {
        let key = (project.clone(), domain.to_string());
        let mut locks = self.locks.lock().await;
        locks.entry(key).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    pub fn classify(&self, task: &Task, previous_domain: Option<Domain>) -> Domain {
        super::domain::classify(task, previous_domain)
    }

    /// Bounded Markdown block injected into the agent prompt. The cap on
    /// serialized length is enforced after assembly, not per-section
    /// (§4.G).
    pub async fn format_for_prompt(&self, project: &ProjectId, domain: Domain, max_chars: usize) -> Result<String> {
        let Some(file) = self.store.get(project, domain).await? else {
            return Ok(String::new());
        };
        let content = &file.content;

        let mut out = format!("## Expertise: {domain}\n\n");

        if !content.core_files.is_empty() {
            out.push_str("### Core files\n");
            for f in content.core_files.iter().take(MAX_PROMPT_CORE_FILES) {
                out.push_str(&format!("- {f}\n"));
            }
            out.push('\n');
        }
        if !content.patterns.is_empty() {
            out.push_str("### Patterns\n");
            for p in content.patterns.iter().take(MAX_PROMPT_PATTERNS) {
                out.push_str(&format!("- {p}\n"));
            }
            out.push('\n');
        }
        if !content.techniques.is_empty() {
            out.push_str("### Best practices\n");
            for t in content.techniques.iter().take(MAX_PROMPT_TECHNIQUES) {
                out.push_str(&format!("- {t}\n"));
            }
            out.push('\n');
        }
        if !content.learned_from_failures.is_empty() {
            out.push_str("### Recent failures\n");
            for failure in content.learned_from_failures.iter().rev().take(MAX_PROMPT_FAILURES) {
                out.push_str(&format!("- {}: {}\n", failure.issue, failure.error));
            }
            out.push('\n');
        }
        if !content.effective_patterns.is_empty() {
            out.push_str("### Effective patterns\n");
            for p in content.effective_patterns.iter().rev().take(MAX_PROMPT_EFFECTIVE_PATTERNS) {
                out.push_str(&format!("- {p}\n"));
            }
        }

        if out.len() > max_chars {
            out.truncate(max_chars);
        }
        Ok(out)
    }

    /// Records what a completed task taught the expertise file for its
    /// domain, then enforces the 1000-line invariant.
    pub async fn learn_from_session(
        &self,
        project: &ProjectId,
        domain: Domain,
        outcome: &AgentOutcome,
        issue: &str,
        touched_files: &[String],
    ) -> Result<LearningChanges> {
        let _guard = self.lock_for(project, domain).await.lock_owned().await;

        let mut file = self
            .store
            .get(project, domain)
            .await?
            .map(|f| f.content)
            .unwrap_or_default();
        let mut changes = LearningChanges::default();

        match &outcome.status {
            AgentStatus::Failure(error) => {
                file.learned_from_failures.push(FailureLearning {
                    issue: issue.to_string(),
                    error: error.clone(),
                    solution: resolved_solution(&outcome.final_text),
                    at: Utc::now(),
                });
                changes.failure_recorded = true;
            }
            AgentStatus::Success => {
                let summary = first_sentence(&outcome.final_text, SUMMARY_MAX_CHARS);
                if !summary.is_empty() {
                    file.successful_techniques.push(summary);
                    changes.technique_recorded = true;
                }
            }
            AgentStatus::Cancelled => {}
        }

        for pattern in recognizable_patterns(&outcome.tool_sequence) {
            if !file.effective_patterns.contains(&pattern) {
                file.effective_patterns.push(pattern.clone());
                changes.patterns_added.push(pattern);
            }
        }

        for target in touched_files {
            let normalized = target.trim_start_matches("./").to_string();
            if !file.core_files.contains(&normalized) {
                file.core_files.push(normalized.clone());
                changes.core_files_added.push(normalized);
            }
        }

        self.prune(&mut file);

        self.store.upsert(project, domain, file).await?;
        Ok(changes)
    }

    /// Pruning order on overflow: oldest `learned_from_failures`, oldest
    /// `effective_patterns`, excess `core_files` beyond 30, oldest
    /// `successful_techniques`. Logs a warning if still over the line cap
    /// after every pruning step has run.
    fn prune(&self, content: &mut ExpertiseContent) {
        let max_lines = self.config.expertise_max_lines;

        let line_count = |c: &ExpertiseContent| {
            c.core_files.len()
                + c.patterns.len()
                + c.techniques.len()
                + c.effective_patterns.len()
                + c.learned_from_failures.len()
                + c.successful_techniques.len()
        };

        while line_count(content) > max_lines && !content.learned_from_failures.is_empty() {
            content.learned_from_failures.remove(0);
        }
        while line_count(content) > max_lines && !content.effective_patterns.is_empty() {
            content.effective_patterns.remove(0);
        }
        while line_count(content) > max_lines && content.core_files.len() > MAX_CORE_FILES {
            content.core_files.remove(0);
        }
        while line_count(content) > max_lines && !content.successful_techniques.is_empty() {
            content.successful_techniques.remove(0);
        }

        if line_count(content) > max_lines {
            tracing::warn!(
                "expertise content still exceeds {} lines after pruning",
                max_lines
            );
        }
    }

    /// Drops `core_files` that no longer exist on disk and
    /// `learned_from_failures` older than `validate_after_days`; updates
    /// `last_validated`.
    pub async fn validate(&self, project: &ProjectId, domain: Domain, repo_root: &Path) -> Result<()> {
        let _guard = self.lock_for(project, domain).await.lock_owned().await;

        let Some(file) = self.store.get(project, domain).await? else {
            return Ok(());
        };
        let mut content = file.content;

        content.core_files.retain(|f| repo_root.join(f).exists());

        let cutoff = Utc::now() - chrono::Duration::days(self.config.validate_after_days as i64);
        content.learned_from_failures.retain(|f| f.at >= cutoff);

        self.store.upsert(project, domain, content).await?;
        Ok(())
    }
}

fn first_sentence(text: &str, max_chars: usize) -> String {
    let end = text.find(['.', '\n']).map(|i| i + 1).unwrap_or(text.len());
    let sentence = text[..end].trim();
    if sentence.len() > max_chars {
        let mut truncated: String = sentence.chars().take(max_chars).collect();
        truncated.push('\u{2026}');
        truncated
    } else {
        sentence.to_string()
    }
}

/// Scans the final log event (the agent's closing message) for a marker
/// indicating the error it just failed on was nonetheless diagnosed and
/// resolved in some other respect (e.g. a flaky dependency fixed mid-run
/// before an unrelated final failure) and returns the text following the
/// marker. Returns `None` when no such marker is present, which is the
/// common case — most failures simply have no recorded resolution.
fn resolved_solution(final_text: &str) -> Option<String> {
    const MARKERS: &[&str] = &["resolved:", "resolution:", "fixed by", "fix applied:"];
    let lower = final_text.to_lowercase();
    for marker in MARKERS {
        if let Some(idx) = lower.find(marker) {
            let rest = final_text[idx + marker.len()..].trim();
            if !rest.is_empty() {
                return Some(first_sentence(rest, SUMMARY_MAX_CHARS));
            }
        }
    }
    None
}

/// Recognizes `Read->Edit`, `Glob->Read`, and `Read->Edit->*test*` tool-call
/// sequences in a flat tool-use log.
fn recognizable_patterns(tool_sequence: &[String]) -> Vec<String> {
    let mut patterns = Vec::new();
    for window in tool_sequence.windows(2) {
        if window[0] == "Read" && window[1] == "Edit" {
            patterns.push("read-then-edit".to_string());
        }
        if window[0] == "Glob" && window[1] == "Read" {
            patterns.push("glob-then-read".to_string());
        }
    }
    for window in tool_sequence.windows(3) {
        if window[0] == "Read" && window[1] == "Edit" && window[2].to_lowercase().contains("test") {
            patterns.push("read-edit-test".to_string());
        }
    }
    patterns.sort();
    patterns.dedup();
    patterns
}
