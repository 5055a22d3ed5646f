//! Dataset format checks against the HF datasets-server.
//!
//! The datasets-server exposes column names and a handful of sample rows
//! without downloading the dataset. Column rules per training method live in
//! [`check_columns`], a pure function, so the rules are testable without any
//! network access.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use tuneforge_core::{Error, Result, TrainingMethod};
use tuneforge_engine::{DatasetValidator, ValidationReport};

const DATASETS_SERVER_BASE: &str = "https://datasets-server.huggingface.co";

// Hub repo ids are `name` or `namespace/name`; each segment starts with an
// alphanumeric and may continue with `.`, `_` or `-`.
static REPO_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*(/[A-Za-z0-9][A-Za-z0-9._-]*)?$").unwrap()
});

/// Verdict from the pure column rules, before dataset/method context is
/// attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnCheck {
    pub valid: bool,
    pub format: Option<String>,
    pub error: Option<String>,
    pub suggestion: Option<String>,
}

impl ColumnCheck {
    fn ok(format: &str) -> Self {
        Self {
            valid: true,
            format: Some(format.to_string()),
            error: None,
            suggestion: None,
        }
    }

    fn fail(error: &str, suggestion: Option<&str>) -> Self {
        Self {
            valid: false,
            format: None,
            error: Some(error.to_string()),
            suggestion: suggestion.map(str::to_string),
        }
    }
}

/// Sampled slice of a dataset: its columns and first row.
struct RowsSample {
    columns: Vec<String>,
    first: Option<Value>,
    count: usize,
}

pub struct HubDatasetValidator {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HubDatasetValidator {
    pub fn new(token: Option<String>) -> Self {
        Self::with_base_url(DATASETS_SERVER_BASE, token)
    }

    pub fn with_base_url(base_url: &str, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    async fn first_rows(&self, dataset: &str) -> Result<RowsSample> {
        let mut request = self
            .client
            .get(format!("{}/first-rows", self.base_url))
            .query(&[("dataset", dataset), ("config", "default"), ("split", "train")]);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Backend(format!(
                "dataset lookup failed ({status}): {body}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Backend(format!("unreadable dataset response: {e}")))?;
        parse_first_rows(dataset, &body)
    }
}

#[async_trait]
impl DatasetValidator for HubDatasetValidator {
    async fn validate(&self, dataset: &str, method: TrainingMethod) -> Result<ValidationReport> {
        debug!(dataset = %dataset, method = %method, "validating dataset");
        if !REPO_ID_RE.is_match(dataset) {
            return Ok(ValidationReport {
                valid: false,
                dataset: dataset.to_string(),
                method,
                format: None,
                columns: Vec::new(),
                sample_count: None,
                error: Some(format!("'{dataset}' is not a valid dataset id")),
                suggestion: Some("Use the Hub form 'namespace/name'".to_string()),
            });
        }
        match self.first_rows(dataset).await {
            Ok(sample) => {
                let check = check_columns(method, &sample.columns, sample.first.as_ref());
                Ok(ValidationReport {
                    valid: check.valid,
                    dataset: dataset.to_string(),
                    method,
                    format: check.format,
                    columns: sample.columns,
                    sample_count: Some(sample.count),
                    error: check.error,
                    suggestion: check.suggestion,
                })
            }
            // An unreadable dataset is a verdict, not a transport failure:
            // the caller gets told why their request cannot proceed.
            Err(e) => Ok(ValidationReport {
                valid: false,
                dataset: dataset.to_string(),
                method,
                format: None,
                columns: Vec::new(),
                sample_count: None,
                error: Some(e.to_string()),
                suggestion: Some(
                    "Check dataset name and ensure it's publicly accessible".to_string(),
                ),
            }),
        }
    }
}

fn parse_first_rows(dataset: &str, body: &Value) -> Result<RowsSample> {
    let columns: Vec<String> = body["features"]
        .as_array()
        .map(|features| {
            features
                .iter()
                .filter_map(|f| f["name"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    if columns.is_empty() {
        return Err(Error::Backend(format!(
            "dataset {dataset} has no readable columns"
        )));
    }
    let rows = body["rows"].as_array();
    Ok(RowsSample {
        columns,
        first: rows.and_then(|r| r.first()).map(|r| r["row"].clone()),
        count: rows.map(|r| r.len()).unwrap_or(0),
    })
}

/// Column rules per training method, against the sampled first row where a
/// shape check matters.
pub fn check_columns(
    method: TrainingMethod,
    columns: &[String],
    first_row: Option<&Value>,
) -> ColumnCheck {
    let has = |name: &str| columns.iter().any(|c| c == name);
    match method {
        TrainingMethod::Sft => {
            if has("messages") {
                if let Some(row) = first_row {
                    if !row["messages"].is_array() {
                        return ColumnCheck::fail(
                            "'messages' column must contain a list of message objects",
                            None,
                        );
                    }
                }
                ColumnCheck::ok("messages")
            } else if has("text") {
                ColumnCheck::ok("text")
            } else if has("prompt") && has("completion") {
                ColumnCheck::ok("prompt_completion")
            } else {
                ColumnCheck::fail(
                    "No SFT-compatible format found",
                    Some("Dataset should have 'messages', 'text', or 'prompt'+'completion' columns"),
                )
            }
        }
        TrainingMethod::Dpo => {
            if !(has("chosen") && has("rejected")) {
                return ColumnCheck::fail(
                    "Missing required columns for DPO: chosen, rejected",
                    Some("DPO requires 'chosen' and 'rejected' columns with preferred and rejected responses"),
                );
            }
            if let Some(row) = first_row {
                let chosen = &row["chosen"];
                if !(chosen.is_string() || chosen.is_array()) {
                    return ColumnCheck::fail("'chosen' column has incorrect format", None);
                }
            }
            ColumnCheck::ok("dpo")
        }
        TrainingMethod::Grpo => {
            let question_like = ["question", "problem", "input", "prompt"];
            let answer_like = ["answer", "solution", "output", "target"];
            let has_question = question_like.iter().any(|c| has(c));
            let has_answer = answer_like.iter().any(|c| has(c));
            if has_question && has_answer {
                ColumnCheck::ok("grpo")
            } else {
                ColumnCheck::fail(
                    "Missing required columns for GRPO",
                    Some("GRPO requires input and ground truth answer columns"),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_sft_messages_format() {
        let row = json!({ "messages": [{ "role": "user", "content": "hi" }] });
        let check = check_columns(TrainingMethod::Sft, &cols(&["messages"]), Some(&row));
        assert!(check.valid);
        assert_eq!(check.format.as_deref(), Some("messages"));
    }

    #[test]
    fn test_sft_messages_must_be_a_list() {
        let row = json!({ "messages": "just a string" });
        let check = check_columns(TrainingMethod::Sft, &cols(&["messages"]), Some(&row));
        assert!(!check.valid);
        assert!(check.error.unwrap().contains("list"));
    }

    #[test]
    fn test_sft_text_format() {
        let check = check_columns(TrainingMethod::Sft, &cols(&["text", "meta"]), None);
        assert!(check.valid);
        assert_eq!(check.format.as_deref(), Some("text"));
    }

    #[test]
    fn test_sft_prompt_completion_format() {
        let check = check_columns(
            TrainingMethod::Sft,
            &cols(&["prompt", "completion"]),
            None,
        );
        assert!(check.valid);
        assert_eq!(check.format.as_deref(), Some("prompt_completion"));

        // Prompt alone is not enough for SFT.
        let partial = check_columns(TrainingMethod::Sft, &cols(&["prompt"]), None);
        assert!(!partial.valid);
        assert!(partial.suggestion.is_some());
    }

    #[test]
    fn test_dpo_requires_preference_pair() {
        let row = json!({ "chosen": "good answer", "rejected": "bad answer" });
        let check = check_columns(
            TrainingMethod::Dpo,
            &cols(&["prompt", "chosen", "rejected"]),
            Some(&row),
        );
        assert!(check.valid);
        assert_eq!(check.format.as_deref(), Some("dpo"));

        let missing = check_columns(TrainingMethod::Dpo, &cols(&["prompt", "chosen"]), None);
        assert!(!missing.valid);
        assert!(missing.error.unwrap().contains("rejected"));
    }

    #[test]
    fn test_dpo_chosen_may_be_conversation_list() {
        let row = json!({ "chosen": [{ "role": "assistant", "content": "ok" }], "rejected": [] });
        let check = check_columns(
            TrainingMethod::Dpo,
            &cols(&["chosen", "rejected"]),
            Some(&row),
        );
        assert!(check.valid);
    }

    #[test]
    fn test_dpo_rejects_malformed_chosen() {
        let row = json!({ "chosen": 42, "rejected": "no" });
        let check = check_columns(
            TrainingMethod::Dpo,
            &cols(&["chosen", "rejected"]),
            Some(&row),
        );
        assert!(!check.valid);
        assert!(check.error.unwrap().contains("incorrect format"));
    }

    #[test]
    fn test_grpo_accepts_any_question_answer_pairing() {
        for (q, a) in [("question", "answer"), ("problem", "solution"), ("input", "target")] {
            let check = check_columns(TrainingMethod::Grpo, &cols(&[q, a]), None);
            assert!(check.valid, "{q}+{a} should validate");
            assert_eq!(check.format.as_deref(), Some("grpo"));
        }
    }

    #[test]
    fn test_grpo_needs_both_sides() {
        let check = check_columns(TrainingMethod::Grpo, &cols(&["prompt"]), None);
        assert!(!check.valid);
        assert!(check.suggestion.unwrap().contains("ground truth"));
    }

    #[test]
    fn test_parse_first_rows_payload() {
        let body = json!({
            "features": [
                { "feature_idx": 0, "name": "question", "type": { "dtype": "string" } },
                { "feature_idx": 1, "name": "answer", "type": { "dtype": "string" } },
            ],
            "rows": [
                { "row_idx": 0, "row": { "question": "2+2?", "answer": "4" }, "truncated_cells": [] },
                { "row_idx": 1, "row": { "question": "3+3?", "answer": "6" }, "truncated_cells": [] },
            ],
        });
        let sample = parse_first_rows("openai/gsm8k", &body).unwrap();
        assert_eq!(sample.columns, cols(&["question", "answer"]));
        assert_eq!(sample.count, 2);
        assert_eq!(sample.first.unwrap()["answer"], "4");
    }

    #[test]
    fn test_parse_first_rows_rejects_empty_features() {
        let body = json!({ "features": [], "rows": [] });
        assert!(parse_first_rows("some/dataset", &body).is_err());
    }

    #[test]
    fn test_repo_id_shapes() {
        for id in ["openai/gsm8k", "open-r1/codeforces-cots", "Anthropic/hh-rlhf", "squad"] {
            assert!(REPO_ID_RE.is_match(id), "{id} should be accepted");
        }
        for id in ["", "/leading", "trailing/", "a//b", "a/b/c", "spa ced/name", "../../etc"] {
            assert!(!REPO_ID_RE.is_match(id), "{id} should be rejected");
        }
    }

    #[tokio::test]
    async fn test_malformed_id_is_rejected_without_a_lookup() {
        // Unroutable base URL: any network attempt would error out, so a
        // clean invalid verdict proves the gate fired first.
        let validator = HubDatasetValidator::with_base_url("http://127.0.0.1:9", None);
        let report = validator
            .validate("not a dataset", TrainingMethod::Sft)
            .await
            .unwrap();
        assert!(!report.valid);
        assert!(report.error.unwrap().contains("not a valid dataset id"));
        assert_eq!(report.suggestion.as_deref(), Some("Use the Hub form 'namespace/name'"));
    }
}
