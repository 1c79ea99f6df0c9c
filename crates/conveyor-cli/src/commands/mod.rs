//! CLI command implementations.

pub mod jobs;
pub mod runner;
pub mod runners;

use anyhow::{Context, Result, bail};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

#[derive(Debug, thiserror::Error)]
#[error("not found")]
struct NotFound;

/// Thin JSON client over the scheduler's `/api/v1` routes.
pub struct ApiClient {
    http: Client,
    base: String,
}

impl ApiClient {
    pub fn new(api_url: &str) -> Self {
        Self {
            http: Client::new(),
            base: format!("{}/api/v1", api_url.trim_end_matches('/')),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach scheduler at {}", self.base))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(NotFound.into());
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v["error"].as_str().map(str::to_string))
            .unwrap_or(body);
        bail!("{}: {}", status, message)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(self.http.get(self.url(path))).await?;
        Ok(response.json().await?)
    }

    /// GET a raw response, or `None` when the resource does not exist.
    pub async fn get_optional(&self, path: &str) -> Result<Option<Response>> {
        match self.send(self.http.get(self.url(path))).await {
            Ok(response) => Ok(Some(response)),
            Err(e) if e.downcast_ref::<NotFound>().is_some() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let response = self.send(self.http.post(self.url(path)).json(body)).await?;
        Ok(response.json().await?)
    }

    pub async fn put<B: Serialize>(&self, path: &str, body: &B) -> Result<()> {
        self.send(self.http.put(self.url(path)).json(body)).await?;
        Ok(())
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(self.http.delete(self.url(path))).await?;
        Ok(response.json().await?)
    }
}

pub fn validate(path: &str) -> Result<()> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    match conveyor_config::parse_job(&content) {
        Ok(spec) => {
            println!(
                "Job '{}' is valid ({} step{})",
                spec.name,
                spec.steps.len(),
                if spec.steps.len() == 1 { "" } else { "s" }
            );
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_client_urls() {
        let api = ApiClient::new("http://localhost:3000/");
        assert_eq!(api.url("jobs"), "http://localhost:3000/api/v1/jobs");
        assert_eq!(
            api.url("/runners/available"),
            "http://localhost:3000/api/v1/runners/available"
        );
    }
}
