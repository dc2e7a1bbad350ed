//! Device REST surface.
//!
//! | Action             | Path                           |
//! |--------------------|--------------------------------|
//! | Device summary     | `GET  /api/status`             |
//! | Project            | `GET  /api/projects/{id}`      |
//! | Job                | `GET  /api/jobs/{id}`          |
//! | Job plan           | `GET  /api/jobs/{id}/plan`     |
//! | Routing status     | `GET  /api/routing/status`     |
//! | Autocapture status | `GET  /api/autocapture/status` |
//! | Verify credentials | `GET  /api/auth/verify`        |

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use surveyor_types::{
    AutocaptureStatus, DeviceSummary, JobSummary, Plan, ProjectSummary, RoutingStatus,
};

use crate::config::ServerConfig;

#[async_trait]
pub trait DeviceBackend: Send + Sync {
    async fn authenticate(&self) -> anyhow::Result<()>;
    async fn fetch_summary(&self) -> anyhow::Result<DeviceSummary>;
    async fn fetch_project(&self, project_id: &str) -> anyhow::Result<ProjectSummary>;
    async fn fetch_job(&self, job_id: &str) -> anyhow::Result<JobSummary>;
    async fn fetch_plan(&self, job_id: &str) -> anyhow::Result<Plan>;
    async fn fetch_routing_status(&self) -> anyhow::Result<RoutingStatus>;
    async fn fetch_autocapture_status(&self) -> anyhow::Result<AutocaptureStatus>;
}

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(server: &ServerConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("building device http client")?;
        Ok(Self {
            client,
            base_url: server.base_url.trim_end_matches('/').to_string(),
            token: server.api_token.clone().filter(|t| !t.trim().is_empty()),
        })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let rb = self.client.get(format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let resp = self
            .request(path)
            .send()
            .await
            .with_context(|| format!("GET {path}"))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("GET {path} failed ({status}): {body}");
        }
        resp.json::<T>()
            .await
            .with_context(|| format!("decoding GET {path}"))
    }
}

#[async_trait]
impl DeviceBackend for HttpBackend {
    async fn authenticate(&self) -> anyhow::Result<()> {
        let resp = self.request("/api/auth/verify").send().await?;
        if !resp.status().is_success() {
            bail!("device rejected credentials ({})", resp.status());
        }
        Ok(())
    }

    async fn fetch_summary(&self) -> anyhow::Result<DeviceSummary> {
        self.get_json("/api/status").await
    }

    async fn fetch_project(&self, project_id: &str) -> anyhow::Result<ProjectSummary> {
        self.get_json(&format!("/api/projects/{project_id}")).await
    }

    async fn fetch_job(&self, job_id: &str) -> anyhow::Result<JobSummary> {
        self.get_json(&format!("/api/jobs/{job_id}")).await
    }

    async fn fetch_plan(&self, job_id: &str) -> anyhow::Result<Plan> {
        self.get_json(&format!("/api/jobs/{job_id}/plan")).await
    }

    async fn fetch_routing_status(&self) -> anyhow::Result<RoutingStatus> {
        self.get_json("/api/routing/status").await
    }

    async fn fetch_autocapture_status(&self) -> anyhow::Result<AutocaptureStatus> {
        self.get_json("/api/autocapture/status").await
    }
}
