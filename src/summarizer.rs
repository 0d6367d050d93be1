//! Turns one merged pull request into one [`ChangeRecord`].
//!
//! The prompt is built deterministically from the PR's title, author,
//! description, and (when the caller asks for it) its diff truncated to a
//! character budget. The model must answer with a JSON object:
//!
//! ```json
//! { "summary": "required, non-empty", "details": "optional", "type": "feature" }
//! ```
//!
//! The reply is handled as an untyped [`serde_json::Value`] and coerced into
//! a record on the spot: `type` goes through [`ChangeType::coerce`], so the
//! result is always one of the five categories. An unusable reply triggers
//! a re-prompt; once the attempt budget is spent the PR falls back to a
//! record of type `other` summarized by its title. Every PR yields exactly
//! one record.
//!
//! Transport, auth, and rate-limit errors from the completion service are
//! not absorbed: they propagate and abort the run.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::completion::CompletionService;
use crate::config::AiConfig;
use crate::error::{Error, Result};
use crate::models::{ChangeRecord, ChangeType, PullRequest};

pub const SYSTEM_PROMPT: &str = "You write concise, user-facing changelog entries for merged pull requests. \
Reply with a single JSON object and nothing else. Fields: \
\"summary\" (string, one sentence, required), \
\"details\" (string, optional, at most three sentences), \
\"type\" (one of \"feature\", \"bugfix\", \"improvement\", \"docs\", \"other\").";

const DIFF_TRUNCATION_MARKER: &str = "\n[diff truncated]";

pub struct Summarizer {
    completion: Arc<dyn CompletionService>,
    max_attempts: u32,
    diff_budget: usize,
}

impl Summarizer {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        max_attempts: u32,
        diff_budget: usize,
    ) -> Self {
        Self {
            completion,
            max_attempts: max_attempts.max(1),
            diff_budget,
        }
    }

    pub fn from_config(completion: Arc<dyn CompletionService>, config: &AiConfig) -> Self {
        Self::new(completion, config.max_attempts, config.diff_budget)
    }

    /// Summarize one PR. `include_diff` is the caller's toggle; the diff is
    /// left out of the prompt entirely when it is false.
    pub async fn summarize(&self, pr: &PullRequest, include_diff: bool) -> Result<ChangeRecord> {
        let prompt = build_prompt(pr, include_diff, self.diff_budget);

        for attempt in 1..=self.max_attempts {
            let outcome = match self.completion.complete(SYSTEM_PROMPT, &prompt).await {
                Ok(raw) => parse_response(&raw, pr),
                Err(e @ Error::AiResponse(_)) => Err(e),
                Err(e) => return Err(e),
            };

            match outcome {
                Ok(record) => {
                    debug!(
                        pr = pr.number,
                        attempt,
                        change_type = %record.change_type,
                        "summarized"
                    );
                    return Ok(record);
                }
                Err(e) => {
                    warn!(
                        pr = pr.number,
                        attempt,
                        max_attempts = self.max_attempts,
                        "unusable completion: {}",
                        e
                    );
                }
            }
        }

        warn!(pr = pr.number, "falling back to title-derived entry");
        Ok(fallback_record(pr))
    }
}

/// The user prompt for `pr`. Identical inputs give identical prompts.
pub fn build_prompt(pr: &PullRequest, include_diff: bool, diff_budget: usize) -> String {
    let description = pr.body.trim();
    let mut prompt = format!(
        "Pull request #{}: {}\nAuthor: {}\n",
        pr.number,
        pr.title.trim(),
        pr.author
    );
    if !pr.labels.is_empty() {
        prompt.push_str(&format!("Labels: {}\n", pr.labels.join(", ")));
    }
    prompt.push_str("\nDescription:\n");
    prompt.push_str(if description.is_empty() {
        "(none)"
    } else {
        description
    });
    prompt.push('\n');

    if include_diff {
        if let Some(diff) = pr.diff_text.as_deref().filter(|d| !d.trim().is_empty()) {
            let (head, truncated) = truncate_chars(diff, diff_budget);
            prompt.push_str("\nDiff:\n");
            prompt.push_str(head);
            if truncated {
                prompt.push_str(DIFF_TRUNCATION_MARKER);
            }
            prompt.push('\n');
        }
    }

    prompt.push_str("\nRespond with the JSON object only.");
    prompt
}

/// At most `budget` characters of `text`, cut on a char boundary.
pub fn truncate_chars(text: &str, budget: usize) -> (&str, bool) {
    match text.char_indices().nth(budget) {
        Some((idx, _)) => (&text[..idx], true),
        None => (text, false),
    }
}

/// Locate the JSON object in a model reply, tolerating code fences and
/// surrounding prose.
fn extract_json(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Validate a model reply and coerce it into a record for `pr`.
pub fn parse_response(raw: &str, pr: &PullRequest) -> Result<ChangeRecord> {
    let json = extract_json(raw)
        .ok_or_else(|| Error::AiResponse("reply contains no JSON object".to_string()))?;
    let value: Value = serde_json::from_str(json)
        .map_err(|e| Error::AiResponse(format!("reply is not valid JSON: {}", e)))?;
    let object = value
        .as_object()
        .ok_or_else(|| Error::AiResponse("reply is not a JSON object".to_string()))?;

    let summary = object
        .get("summary")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::AiResponse("missing or empty 'summary'".to_string()))?;

    let details = object
        .get("details")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);

    let change_type = object
        .get("type")
        .and_then(Value::as_str)
        .map(ChangeType::coerce)
        .unwrap_or_default();

    Ok(pr_record(pr, summary.to_string(), details, change_type))
}

/// The record used when the model never produced a usable reply.
pub fn fallback_record(pr: &PullRequest) -> ChangeRecord {
    let title = pr.title.trim();
    let summary = if title.is_empty() {
        format!("Pull request #{}", pr.number)
    } else {
        title.to_string()
    };
    pr_record(pr, summary, None, ChangeType::Other)
}

fn pr_record(
    pr: &PullRequest,
    summary: String,
    details: Option<String>,
    change_type: ChangeType,
) -> ChangeRecord {
    ChangeRecord {
        pr_number: Some(pr.number),
        summary,
        details,
        change_type,
        author: Some(pr.author.clone()),
        date: pr.merge_date(),
        pr_url: Some(pr.url.clone()),
        files: pr.changed_files(),
        labels: pr.labels.clone(),
        manual_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted replies and records every prompt it receives.
    struct Scripted {
        replies: Mutex<VecDeque<Result<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CompletionService for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _system: &str, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("not json".to_string()))
        }
    }

    fn pr() -> PullRequest {
        PullRequest {
            number: 42,
            title: "Add dark mode".into(),
            body: "Adds a theme toggle.".into(),
            author: "alice".into(),
            url: "https://github.com/acme/widgets/pull/42".into(),
            diff_text: Some("diff --git a/src/theme.rs b/src/theme.rs\n+dark".into()),
            merged_at: Utc.with_ymd_and_hms(2024, 1, 2, 15, 30, 0).unwrap(),
            base_branch: "main".into(),
            head_branch: "dark-mode".into(),
            labels: vec!["ui".into()],
        }
    }

    #[tokio::test]
    async fn test_valid_reply_becomes_record() {
        let stub = Scripted::new(vec![Ok(
            "```json\n{\"summary\": \"Dark mode\", \"details\": \"Toggle in settings.\", \"type\": \"Feature\"}\n```"
                .to_string(),
        )]);
        let summarizer = Summarizer::new(stub.clone(), 3, 4000);

        let record = summarizer.summarize(&pr(), true).await.unwrap();
        assert_eq!(record.pr_number, Some(42));
        assert_eq!(record.summary, "Dark mode");
        assert_eq!(record.details.as_deref(), Some("Toggle in settings."));
        assert_eq!(record.change_type, ChangeType::Feature);
        assert_eq!(record.date.to_string(), "2024-01-02");
        assert_eq!(record.files, Some(vec!["src/theme.rs".to_string()]));
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_type_coerces_to_other() {
        let stub = Scripted::new(vec![Ok(r#"{"summary": "Tweak", "type": "chore"}"#.to_string())]);
        let record = Summarizer::new(stub, 3, 4000)
            .summarize(&pr(), false)
            .await
            .unwrap();
        assert_eq!(record.change_type, ChangeType::Other);
    }

    #[tokio::test]
    async fn test_reprompts_then_succeeds() {
        let stub = Scripted::new(vec![
            Ok("sure! here you go".to_string()),
            Ok(r#"{"summary": ""}"#.to_string()),
            Ok(r#"{"summary": "Fixed crash", "type": "bug"}"#.to_string()),
        ]);
        let record = Summarizer::new(stub.clone(), 3, 4000)
            .summarize(&pr(), false)
            .await
            .unwrap();
        assert_eq!(record.summary, "Fixed crash");
        assert_eq!(record.change_type, ChangeType::Bugfix);
        assert_eq!(stub.calls(), 3);
    }

    #[tokio::test]
    async fn test_falls_back_to_title_after_budget() {
        let stub = Scripted::new(vec![
            Ok("nope".to_string()),
            Err(Error::AiResponse("empty content".to_string())),
        ]);
        let record = Summarizer::new(stub.clone(), 2, 4000)
            .summarize(&pr(), false)
            .await
            .unwrap();
        assert_eq!(record.summary, "Add dark mode");
        assert_eq!(record.change_type, ChangeType::Other);
        assert_eq!(record.pr_number, Some(42));
        assert_eq!(stub.calls(), 2);
    }

    #[tokio::test]
    async fn test_auth_error_propagates() {
        let stub = Scripted::new(vec![Err(Error::Auth("bad key".to_string()))]);
        let err = Summarizer::new(stub.clone(), 3, 4000)
            .summarize(&pr(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn test_same_pr_twice_gives_identical_records() {
        let reply = r#"{"summary": "Dark mode", "type": "feature"}"#.to_string();
        let stub = Scripted::new(vec![Ok(reply.clone()), Ok(reply)]);
        let summarizer = Summarizer::new(stub.clone(), 3, 4000);
        let first = summarizer.summarize(&pr(), true).await.unwrap();
        let second = summarizer.summarize(&pr(), true).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(stub.calls(), 2);
    }

    #[test]
    fn test_prompt_omits_diff_when_not_requested() {
        let with = build_prompt(&pr(), true, 4000);
        let without = build_prompt(&pr(), false, 4000);
        assert!(with.contains("Diff:\ndiff --git"));
        assert!(!without.contains("Diff:"));
        assert!(without.contains("Author: alice"));
        assert!(without.contains("Adds a theme toggle."));
        assert_eq!(with, build_prompt(&pr(), true, 4000));
    }

    #[test]
    fn test_prompt_truncates_diff() {
        let mut long = pr();
        long.diff_text = Some("é".repeat(50));
        let prompt = build_prompt(&long, true, 10);
        assert!(prompt.contains(&format!("{}{}", "é".repeat(10), DIFF_TRUNCATION_MARKER)));
        assert!(!prompt.contains(&"é".repeat(11)));
    }

    #[test]
    fn test_truncate_chars_boundary() {
        assert_eq!(truncate_chars("abc", 3), ("abc", false));
        assert_eq!(truncate_chars("abcd", 3), ("abc", true));
        assert_eq!(truncate_chars("", 0), ("", false));
    }

    #[test]
    fn test_non_object_reply_rejected() {
        assert!(matches!(
            parse_response("[1, 2]", &pr()),
            Err(Error::AiResponse(_))
        ));
        assert!(matches!(
            parse_response("{ not json }", &pr()),
            Err(Error::AiResponse(_))
        ));
    }
}
