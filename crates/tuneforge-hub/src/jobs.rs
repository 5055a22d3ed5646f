//! Hugging Face Jobs client.
//!
//! Submits training runs as container jobs, reads their lifecycle stage and
//! streams their logs. Stage names come back in the platform's vocabulary
//! and are mapped into the local status set here, at the boundary.

use async_trait::async_trait;
use futures::stream::BoxStream;
use reqwest::Client;
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, info};

use tuneforge_core::{Error, JobStatus, Result, TuneForgeConfig};
use tuneforge_engine::{StatusObservation, Submission, TrainingBackend};
use tuneforge_store::JobRecord;

/// Container image the platform runs; the trainer inside reads its
/// arguments and drives TRL accordingly.
const TRAINER_IMAGE: &str = "huggingface/trl-cli:latest";

pub struct HfJobsBackend {
    client: Client,
    base_url: String,
    namespace: String,
    token: String,
}

impl HfJobsBackend {
    pub fn new(base_url: &str, namespace: &str, token: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            namespace: namespace.to_string(),
            token: token.to_string(),
        }
    }

    pub fn from_config(config: &TuneForgeConfig) -> Result<Self> {
        let token = config
            .hf_token
            .as_deref()
            .ok_or_else(|| Error::Config("HF_TOKEN is required for the Jobs backend".to_string()))?;
        let namespace = config.hf_namespace.as_deref().ok_or_else(|| {
            Error::Config("HF_NAMESPACE is required for the Jobs backend".to_string())
        })?;
        Ok(Self::new(&config.hf_jobs_base_url, namespace, token))
    }

    fn jobs_url(&self) -> String {
        format!("{}/jobs/{}", self.base_url, self.namespace)
    }

    fn job_url(&self, external_id: &str) -> String {
        format!("{}/{}", self.jobs_url(), external_id)
    }

    fn monitor_url(&self, external_id: &str) -> String {
        format!("https://huggingface.co/jobs/{}/{}", self.namespace, external_id)
    }
}

#[async_trait]
impl TrainingBackend for HfJobsBackend {
    async fn submit(&self, job: &JobRecord) -> Result<Submission> {
        let payload = submission_payload(job);
        debug!(job_id = %job.id, flavor = %job.hardware, "submitting job");

        let response = self
            .client
            .post(self.jobs_url())
            .header("Authorization", format!("Bearer {}", self.token))
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::SubmissionFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::SubmissionFailed(format!("{status}: {body}")));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::SubmissionFailed(format!("unreadable response: {e}")))?;
        let external_id = body["id"]
            .as_str()
            .ok_or_else(|| Error::SubmissionFailed("response missing job id".to_string()))?
            .to_string();

        info!(job_id = %job.id, external_id = %external_id, "job accepted by backend");
        Ok(Submission {
            monitor_url: Some(self.monitor_url(&external_id)),
            external_id,
        })
    }

    async fn status(&self, external_id: &str) -> Result<StatusObservation> {
        let response = self
            .client
            .get(self.job_url(external_id))
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Backend(format!(
                "status query failed ({status}): {body}"
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Backend(format!("unreadable status response: {e}")))?;
        let stage = body["status"]["stage"]
            .as_str()
            .ok_or_else(|| Error::Backend("status response missing stage".to_string()))?;

        Ok(StatusObservation {
            status: map_stage(stage)?,
            progress: body["status"]["progress"].as_f64(),
            // The jobs API reports no accrued-cost figure.
            cost_usd: None,
            message: body["status"]["message"].as_str().map(str::to_string),
        })
    }

    async fn cancel(&self, external_id: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/cancel", self.job_url(external_id)))
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Backend(format!("cancel failed ({status}): {body}")));
        }
        info!(external_id = %external_id, "backend confirmed cancellation");
        Ok(())
    }

    async fn logs(&self, external_id: &str) -> Result<BoxStream<'static, Result<String>>> {
        let response = self
            .client
            .get(format!("{}/logs", self.job_url(external_id)))
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Backend(format!(
                "log fetch failed ({status}): {body}"
            )));
        }

        let stream = async_stream::stream! {
            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(b) => b,
                    Err(e) => {
                        yield Err(Error::Backend(format!("log stream read error: {e}")));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end().to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }
                    match extract_log_line(&line) {
                        Some(text) => yield Ok(text),
                        None => continue,
                    }
                }
            }

            let tail = buffer.trim_end();
            if !tail.is_empty() {
                if let Some(text) = extract_log_line(tail) {
                    yield Ok(text);
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Lifts one raw line out of the log stream. The endpoint frames lines as
/// SSE `data:` events with a JSON payload; plain text passes through as-is.
fn extract_log_line(line: &str) -> Option<String> {
    match line.strip_prefix("data: ") {
        Some(data) => match serde_json::from_str::<serde_json::Value>(data) {
            Ok(event) => event["data"].as_str().map(str::to_string),
            Err(_) => Some(data.to_string()),
        },
        None => Some(line.to_string()),
    }
}

fn submission_payload(job: &JobRecord) -> serde_json::Value {
    json!({
        "dockerImage": TRAINER_IMAGE,
        "command": ["python", "-m", "trainer.run"],
        "arguments": [
            "--model", job.model,
            "--dataset", job.dataset,
            "--method", job.method.as_str(),
            "--config", job.config.to_string(),
        ],
        "environment": { "TUNEFORGE_JOB_ID": job.id },
        "flavor": job.hardware,
    })
}

/// Backend stage vocabulary mapped into the local status set. An unknown
/// stage is a backend error, not a guess.
fn map_stage(stage: &str) -> Result<JobStatus> {
    match stage.to_ascii_uppercase().as_str() {
        "PENDING" | "QUEUED" | "WAITING" => Ok(JobStatus::Pending),
        "RUNNING" | "UPDATING" => Ok(JobStatus::Running),
        "COMPLETED" => Ok(JobStatus::Completed),
        "ERROR" | "FAILED" => Ok(JobStatus::Failed),
        "CANCELLED" | "DELETED" => Ok(JobStatus::Cancelled),
        other => Err(Error::Backend(format!("unknown backend stage '{other}'"))),
    }
}
