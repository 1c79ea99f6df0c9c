//! HTTP client for the scheduler's runner-facing endpoints.

use async_trait::async_trait;
use bytes::Bytes;
use conveyor_core::client::SchedulerClient;
use conveyor_core::job::{Job, JobState};
use conveyor_core::runner::RunnerRegistration;
use conveyor_core::runtime::JobServer;
use conveyor_core::{Error, JobId, Result, RunnerId, StepId};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct RegisterResponse {
    runner_id: RunnerId,
}

#[derive(Serialize)]
struct CompleteRequest {
    status: JobState,
}

#[derive(Deserialize)]
struct CancellationResponse {
    requested: bool,
}

/// Talks to a remote scheduler over its `/api/v1` HTTP surface.
#[derive(Clone)]
pub struct HttpSchedulerClient {
    http: Client,
    base: Url,
}

impl HttpSchedulerClient {
    /// Create a client for the scheduler at `api_url` (e.g. `http://localhost:3000`).
    pub fn new(api_url: &str) -> Result<Self> {
        let mut base = Url::parse(api_url)
            .map_err(|e| Error::InvalidInput(format!("invalid api url {}: {}", api_url, e)))?;
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        let base = base
            .join("api/v1/")
            .map_err(|e| Error::InvalidInput(e.to_string()))?;
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self { http, base })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::InvalidInput(format!("invalid path {}: {}", path, e)))
    }
}

fn transport(e: reqwest::Error) -> Error {
    Error::Transport(e.to_string())
}

/// Map non-success responses onto the shared error type.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => Error::NotFound(body),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => Error::InvalidInput(body),
        StatusCode::CONFLICT => Error::Conflict(body),
        StatusCode::SERVICE_UNAVAILABLE => Error::Unavailable(body),
        _ => Error::Transport(format!("{}: {}", status, body)),
    })
}

#[async_trait]
impl SchedulerClient for HttpSchedulerClient {
    async fn register_runner(&self, registration: RunnerRegistration) -> Result<RunnerId> {
        let response = self
            .http
            .post(self.url("runners/register")?)
            .json(&registration)
            .send()
            .await
            .map_err(transport)?;
        let body: RegisterResponse = check(response).await?.json().await.map_err(transport)?;
        Ok(body.runner_id)
    }

    async fn heartbeat(&self, runner_id: RunnerId) -> Result<bool> {
        let response = self
            .http
            .post(self.url(&format!("runners/{}/heartbeat", runner_id))?)
            .send()
            .await
            .map_err(transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check(response).await?;
        Ok(true)
    }

    async fn request_job(&self, runner_id: RunnerId) -> Result<Option<Job>> {
        let response = self
            .http
            .post(self.url(&format!("runners/{}/jobs/request", runner_id))?)
            .send()
            .await
            .map_err(transport)?;
        let response = check(response).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        response.json().await.map(Some).map_err(transport)
    }

    async fn report_result(
        &self,
        runner_id: RunnerId,
        job_id: JobId,
        status: JobState,
    ) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("runners/{}/jobs/{}/complete", runner_id, job_id))?)
            .json(&CompleteRequest { status })
            .send()
            .await
            .map_err(transport)?;
        check(response).await?;
        Ok(())
    }

    async fn unregister_runner(&self, runner_id: RunnerId) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!("runners/{}", runner_id))?)
            .send()
            .await
            .map_err(transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl JobServer for HttpSchedulerClient {
    async fn append_log(
        &self,
        job_id: JobId,
        step_id: Option<StepId>,
        content: Bytes,
    ) -> Result<()> {
        let mut url = self.url(&format!("jobs/{}/logs", job_id))?;
        if let Some(step_id) = step_id {
            url.query_pairs_mut()
                .append_pair("step", &step_id.to_string());
        }
        let response = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(content)
            .send()
            .await
            .map_err(transport)?;
        check(response).await?;
        Ok(())
    }

    async fn is_cancellation_requested(&self, job_id: JobId) -> Result<bool> {
        let response = self
            .http
            .get(self.url(&format!("jobs/{}/cancellation", job_id))?)
            .send()
            .await
            .map_err(transport)?;
        let body: CancellationResponse =
            check(response).await?.json().await.map_err(transport)?;
        Ok(body.requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_gets_api_prefix() {
        let client = HttpSchedulerClient::new("http://localhost:3000").unwrap();
        assert_eq!(client.base.as_str(), "http://localhost:3000/api/v1/");

        let client = HttpSchedulerClient::new("http://scheduler:8080/conveyor").unwrap();
        assert_eq!(
            client.url("runners/register").unwrap().as_str(),
            "http://scheduler:8080/conveyor/api/v1/runners/register"
        );
    }

    #[test]
    fn test_rejects_invalid_url() {
        assert!(matches!(
            HttpSchedulerClient::new("not a url"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_complete_request_shape() {
        let body = serde_json::to_value(CompleteRequest {
            status: JobState::Failed,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "status": "failed" }));
    }
}
