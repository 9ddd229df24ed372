//! Review learning: condense recent task summaries into a publishable pack.
//!
//! The model is asked for a JSON verdict:
//!
//! ```json
//! {"publish": true, "score": 82, "title": "...", "summary": "...",
//!  "tags": ["..."], "content_markdown": "...", "reason": "..."}
//! ```
//!
//! A gate drops verdicts that decline to publish, score too low, or carry too
//! little content. A dropped verdict still advances the review timestamp.

use crate::now_ts;
use evolvebot_types::config::KnowledgeConfig;
use evolvebot_types::knowledge::KnowledgePack;
use evolvebot_types::model::{CompletionDriver, CompletionRequest};
use std::collections::VecDeque;
use tracing::{info, warn};

/// Most summaries kept in memory; older ones are dropped.
pub const REVIEW_BUFFER_CAP: usize = 200;

const PROMPT_CHARS: usize = 120;
const ANSWER_CHARS: usize = 200;
const MAX_TOOL_ERRORS: usize = 2;

const TITLE_CHARS: usize = 120;
const SUMMARY_CHARS: usize = 500;
const TAG_CHARS: usize = 32;
const MAX_TAGS: usize = 20;
const DEFAULT_TITLE: &str = "Daily Review";

/// Keep the first `max` chars, appending `...` when something was cut.
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

fn take_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// One-line summary of a finished task. `None` when there was no answer.
pub fn summarize_task(prompt: &str, answer: Option<&str>, tool_errors: &[String]) -> Option<String> {
    let answer = answer.map(str::trim).filter(|a| !a.is_empty())?;
    let answer = truncate_chars(&answer.replace('\n', " "), ANSWER_CHARS);
    let prompt = truncate_chars(&prompt.trim().replace('\n', " "), PROMPT_CHARS);
    let mut line = format!("Q: {prompt} | A: {answer}");
    if !tool_errors.is_empty() {
        let errors: Vec<&str> = tool_errors
            .iter()
            .take(MAX_TOOL_ERRORS)
            .map(String::as_str)
            .collect();
        line.push_str(&format!(" (errors: {})", errors.join(", ")));
    }
    Some(line)
}

/// Rolling buffer of task summaries.
#[derive(Debug, Default)]
pub struct ReviewBuffer {
    lines: VecDeque<String>,
}

impl ReviewBuffer {
    pub fn push(&mut self, line: String) {
        if line.is_empty() {
            return;
        }
        self.lines.push_back(line);
        while self.lines.len() > REVIEW_BUFFER_CAP {
            self.lines.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The newest `n` lines, oldest first.
    pub fn recent(&self, n: usize) -> Vec<String> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

/// Model and gate settings for one review.
#[derive(Debug, Clone)]
pub struct ReviewSettings {
    pub llm_enabled: bool,
    pub temperature: f32,
    pub max_tokens: u32,
    pub gate_enabled: bool,
    pub gate_min_score: i64,
    pub min_content_chars: usize,
}

impl From<&KnowledgeConfig> for ReviewSettings {
    fn from(cfg: &KnowledgeConfig) -> Self {
        Self {
            llm_enabled: cfg.review_llm_enabled,
            temperature: cfg.review_llm_temperature,
            max_tokens: cfg.review_llm_max_tokens,
            gate_enabled: cfg.review_gate_enabled,
            gate_min_score: cfg.review_gate_min_score,
            min_content_chars: cfg.review_min_content_chars,
        }
    }
}

/// Result of a review attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewOutcome {
    /// The curated pack, when the verdict passed the gate.
    pub pack: Option<KnowledgePack>,
    /// Whether the caller should advance `last_review_ts` and clear the buffer.
    pub advance: bool,
}

impl ReviewOutcome {
    fn skipped() -> Self {
        Self {
            pack: None,
            advance: false,
        }
    }

    fn rejected() -> Self {
        Self {
            pack: None,
            advance: true,
        }
    }
}

fn review_prompt(summaries: &[String]) -> String {
    let mut prompt = String::from(
        "You curate knowledge for a network of agents. Read the task summaries below and decide \
         whether they hold reusable, high-value knowledge other agents should learn.\n\n\
         Reply with ONLY a JSON object with these keys:\n\
         - publish (boolean)\n\
         - score (0-100)\n\
         - title (string)\n\
         - summary (string)\n\
         - tags (array of strings)\n\
         - content_markdown (string)\n\
         - reason (string)\n\n\
         Set publish=false for trivial, repetitive, or one-off material. When publishing, \
         content_markdown is a compact pack with sections: Key Learnings, Reusable Patterns, \
         When To Use, Common Pitfalls, Open Questions.\n\nSummaries:\n",
    );
    for s in summaries {
        prompt.push_str("- ");
        prompt.push_str(s);
        prompt.push('\n');
    }
    prompt
}

/// Parse the model's reply as a JSON object, tolerating code fences and
/// surrounding prose.
pub(crate) fn parse_json_object(raw: &str) -> Option<serde_json::Map<String, serde_json::Value>> {
    let raw = raw.trim();
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(raw) {
        return Some(map);
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str(&raw[start..=end]) {
        Ok(serde_json::Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn value_str(v: Option<&serde_json::Value>) -> String {
    match v {
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        _ => String::new(),
    }
}

fn value_score(v: Option<&serde_json::Value>) -> i64 {
    match v {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0) as i64,
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0) as i64,
        _ => 0,
    }
}

fn value_bool(v: Option<&serde_json::Value>) -> bool {
    match v {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Apply the gate to a parsed verdict.
pub fn curate_verdict(
    verdict: &serde_json::Map<String, serde_json::Value>,
    settings: &ReviewSettings,
) -> ReviewOutcome {
    let publish = value_bool(verdict.get("publish"));
    let score = value_score(verdict.get("score"));
    if settings.gate_enabled && (!publish || score < settings.gate_min_score) {
        let reason = value_str(verdict.get("reason"));
        let reason = if reason.is_empty() {
            format!("score {score} < {}", settings.gate_min_score)
        } else {
            reason
        };
        info!("Review learning skipped: {reason}");
        return ReviewOutcome::rejected();
    }

    let mut content = value_str(verdict.get("content_markdown"));
    if content.is_empty() {
        content = value_str(verdict.get("content"));
    }
    if settings.min_content_chars > 0 && content.chars().count() < settings.min_content_chars {
        info!("Review learning skipped: content too short");
        return ReviewOutcome::rejected();
    }

    let title = value_str(verdict.get("title"));
    let title = if title.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        take_chars(&title, TITLE_CHARS)
    };
    let mut tags: Vec<String> = match verdict.get("tags") {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|t| t.as_str())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| take_chars(t, TAG_CHARS))
            .take(MAX_TAGS)
            .collect(),
        _ => Vec::new(),
    };
    if tags.is_empty() {
        tags.push("review".to_string());
    }

    let now = now_ts();
    ReviewOutcome {
        pack: Some(KnowledgePack {
            pack_id: String::new(),
            name: title,
            kind: "review".to_string(),
            summary: take_chars(&value_str(verdict.get("summary")), SUMMARY_CHARS),
            tags,
            score: score as f64,
            created_ts: now,
            updated_ts: now,
            content,
            version: "1.0".to_string(),
        }),
        advance: true,
    }
}

/// Ask the model to curate `summaries` and gate the answer.
///
/// Without a model, with review LLM disabled, or on any model failure the
/// outcome does not advance, so the buffer is kept for the next attempt.
pub async fn build_review_pack(
    driver: Option<&dyn CompletionDriver>,
    settings: &ReviewSettings,
    summaries: &[String],
) -> ReviewOutcome {
    if !settings.llm_enabled {
        info!("Review learning skipped: LLM disabled");
        return ReviewOutcome::skipped();
    }
    let Some(driver) = driver else {
        info!("Review learning skipped: no model configured");
        return ReviewOutcome::skipped();
    };

    let request = CompletionRequest {
        prompt: review_prompt(summaries),
        temperature: settings.temperature,
        max_tokens: settings.max_tokens,
    };
    let raw = match driver.complete(request).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Review model call failed: {e}");
            return ReviewOutcome::skipped();
        }
    };
    match parse_json_object(&raw) {
        Some(verdict) => curate_verdict(&verdict, settings),
        None => {
            warn!("Review model reply was not a JSON object");
            ReviewOutcome::skipped()
        }
    }
}
