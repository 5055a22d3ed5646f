//! Job domain types shared across the workspace.

use serde::{Deserialize, Serialize};

/// Lifecycle status of an orchestrated fine-tuning job.
///
/// Legal transitions: `pending -> running -> {completed | failed}` plus
/// `pending|running -> cancelled`. Terminal states permit no exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Completed, failed and cancelled jobs never change status again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// The transition table. Anything not listed here is a protocol error.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fine-tuning method. Closed set; each method has its own dataset
/// column requirements enforced by the dataset validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingMethod {
    /// Supervised fine-tuning.
    Sft,
    /// Direct preference optimization.
    Dpo,
    /// Group-relative policy optimization.
    Grpo,
}

impl TrainingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingMethod::Sft => "sft",
            TrainingMethod::Dpo => "dpo",
            TrainingMethod::Grpo => "grpo",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sft" => Some(TrainingMethod::Sft),
            "dpo" => Some(TrainingMethod::Dpo),
            "grpo" => Some(TrainingMethod::Grpo),
            _ => None,
        }
    }
}

impl std::fmt::Display for TrainingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
