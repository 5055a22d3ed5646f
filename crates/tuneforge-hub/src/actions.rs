//! GitHub Actions restart dispatcher.
//!
//! The orchestrator runs inside a workflow job with a hard time limit. The
//! keep-alive scheduler fires this hook near the limit; dispatching the
//! workflow again starts a successor run that reopens the same store.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::info;

use tuneforge_core::{Error, GithubConfig, Result};
use tuneforge_engine::RestartHook;

pub struct WorkflowDispatcher {
    client: Client,
    config: GithubConfig,
    run_ceiling_hours: f64,
}

impl WorkflowDispatcher {
    pub fn new(config: GithubConfig, run_ceiling_hours: f64) -> Self {
        Self {
            client: Client::new(),
            config,
            run_ceiling_hours,
        }
    }

    fn dispatch_url(&self) -> String {
        format!(
            "https://api.github.com/repos/{}/{}/actions/workflows/{}/dispatches",
            self.config.repo_owner, self.config.repo_name, self.config.workflow
        )
    }
}

#[async_trait]
impl RestartHook for WorkflowDispatcher {
    async fn dispatch_successor(&self) -> Result<()> {
        let payload = json!({
            "ref": "main",
            "inputs": {
                "duration_hours": self.run_ceiling_hours.to_string(),
                "auto_restart": "true",
            },
        });

        let response = self
            .client
            .post(self.dispatch_url())
            .header("Authorization", format!("Bearer {}", self.config.token))
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", "tuneforge")
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Backend(format!("workflow dispatch failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Backend(format!(
                "workflow dispatch rejected ({status}): {body}"
            )));
        }

        info!(
            workflow = %self.config.workflow,
            repo = %format!("{}/{}", self.config.repo_owner, self.config.repo_name),
            "successor workflow dispatched"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_url_shape() {
        let dispatcher = WorkflowDispatcher::new(
            GithubConfig {
                token: "gh_token".to_string(),
                repo_owner: "acme".to_string(),
                repo_name: "tuneforge".to_string(),
                workflow: "train.yml".to_string(),
            },
            6.0,
        );
        assert_eq!(
            dispatcher.dispatch_url(),
            "https://api.github.com/repos/acme/tuneforge/actions/workflows/train.yml/dispatches"
        );
    }
}
