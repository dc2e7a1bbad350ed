//! Remote path computation.
//!
//! | Action        | Path                  |
//! |---------------|-----------------------|
//! | Resolve arcs  | `POST /path/resolve`  |
//! | Nearest point | `POST /path/nearest`  |

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use surveyor_core::ServerConfig;
use surveyor_types::{Coordinate, PathArc, Waypoint};

#[async_trait]
pub trait PathComputation: Send + Sync {
    /// Routable arcs for the full waypoint sequence.
    async fn resolve_path(&self, waypoints: &[Waypoint]) -> anyhow::Result<Vec<PathArc>>;

    /// The reachable position closest to `waypoint`.
    async fn nearest_point(&self, waypoint: &Waypoint) -> anyhow::Result<Coordinate>;
}

#[derive(Debug, Deserialize)]
struct ResolveResponse {
    #[serde(default)]
    polygons: Vec<ResolvedPolygon>,
}

#[derive(Debug, Deserialize)]
struct ResolvedPolygon {
    #[serde(default)]
    arcs: Vec<PathArc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NearestResponse {
    latitude: f64,
    longitude: f64,
}

pub struct HttpPathService {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpPathService {
    pub fn new(server: &ServerConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("building path service client")?;
        Ok(Self {
            client,
            base_url: server.base_url.trim_end_matches('/').to_string(),
            token: server.api_token.clone().filter(|t| !t.trim().is_empty()),
        })
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> anyhow::Result<T> {
        let mut rb = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body);
        if let Some(token) = &self.token {
            rb = rb.bearer_auth(token);
        }
        let resp = rb.send().await.with_context(|| format!("POST {path}"))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("POST {path} failed ({status}): {text}");
        }
        resp.json::<T>()
            .await
            .with_context(|| format!("decoding POST {path}"))
    }
}

#[async_trait]
impl PathComputation for HttpPathService {
    async fn resolve_path(&self, waypoints: &[Waypoint]) -> anyhow::Result<Vec<PathArc>> {
        let resp: ResolveResponse = self
            .post("/path/resolve", json!({ "waypoints": waypoints }))
            .await?;
        match resp.polygons.into_iter().next() {
            Some(polygon) if !polygon.arcs.is_empty() => Ok(polygon.arcs),
            _ => bail!("path service returned no arcs"),
        }
    }

    async fn nearest_point(&self, waypoint: &Waypoint) -> anyhow::Result<Coordinate> {
        let resp: NearestResponse = self
            .post("/path/nearest", json!({ "waypoint": waypoint }))
            .await?;
        Ok(Coordinate::new(resp.longitude, resp.latitude))
    }
}
