//! Client for the engine's HTTP control API.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Control API address the engine binds when started without arguments.
pub const DEFAULT_API_URL: &str = "http://localhost:8474";

#[derive(Debug, thiserror::Error)]
pub enum ControlApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("control API returned {status}: {message}")]
    Api { status: u16, message: String },
}

impl ControlApiError {
    /// HTTP status of a rejected request, if the engine answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(err) => err.status().map(|s| s.as_u16()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControlApi {
    base_url: String,
    client: reqwest::Client,
}

/// A proxy route as understood by the engine: `listen` is forwarded to `upstream`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    pub name: String,
    pub listen: String,
    pub upstream: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upstream,
    #[default]
    Downstream,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Upstream => "upstream",
            Self::Downstream => "downstream",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToxicKind {
    Latency,
    Bandwidth,
    Timeout,
}

impl std::fmt::Display for ToxicKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Latency => "latency",
            Self::Bandwidth => "bandwidth",
            Self::Timeout => "timeout",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToxicAttributes {
    Latency {
        latency: u32,
        #[serde(default)]
        jitter: u32,
    },
    Bandwidth {
        rate: u32,
    },
    Timeout {
        timeout: u32,
    },
}

/// One fault-injection instruction, serialized as the body of
/// `POST /proxies/{name}/toxics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToxicDirective {
    #[serde(rename = "type")]
    pub kind: ToxicKind,
    #[serde(default)]
    pub stream: Direction,
    #[serde(default = "full_toxicity")]
    pub toxicity: f64,
    pub attributes: ToxicAttributes,
}

fn full_toxicity() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
struct ToxicResponse {
    name: String,
}

impl ToxicDirective {
    /// Delay downstream data by `latency_ms`, +/- `jitter_ms`.
    pub fn latency(latency_ms: u32, jitter_ms: u32) -> Self {
        Self {
            kind: ToxicKind::Latency,
            stream: Direction::Downstream,
            toxicity: full_toxicity(),
            attributes: ToxicAttributes::Latency {
                latency: latency_ms,
                jitter: jitter_ms,
            },
        }
    }

    /// Cap downstream throughput at `rate_kb` KB/s.
    pub fn bandwidth(rate_kb: u32) -> Self {
        Self {
            kind: ToxicKind::Bandwidth,
            stream: Direction::Downstream,
            toxicity: full_toxicity(),
            attributes: ToxicAttributes::Bandwidth { rate: rate_kb },
        }
    }

    /// Stop data flowing and close the connection after `timeout_ms`.
    /// `timeout_ms = 0` holds the connection open forever.
    pub fn timeout(timeout_ms: u32, toxicity: f64) -> Self {
        Self {
            kind: ToxicKind::Timeout,
            stream: Direction::Downstream,
            toxicity,
            attributes: ToxicAttributes::Timeout {
                timeout: timeout_ms,
            },
        }
    }
}

impl ControlApi {
    /// Create a new client for the control API at `base_url`.
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Port the engine serves its control API on, which is the port a
    /// conflicting instance would already hold.
    pub fn port(&self) -> Option<u16> {
        reqwest::Url::parse(&self.base_url)
            .ok()
            .and_then(|url| url.port_or_known_default())
    }

    /// Fetch the engine version. Used as the readiness probe, so the caller
    /// bounds how long a single attempt may take.
    pub async fn version(&self, timeout: Duration) -> Result<String, ControlApiError> {
        let resp = self
            .client
            .get(format!("{}/version", self.base_url))
            .timeout(timeout)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }

        Ok(resp.text().await?.trim().to_string())
    }

    /// List all routes keyed by name.
    pub async fn proxies(&self) -> Result<HashMap<String, RouteSpec>, ControlApiError> {
        let resp = self
            .client
            .get(format!("{}/proxies", self.base_url))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }

        Ok(resp.json().await?)
    }

    pub async fn create_proxy(&self, route: &RouteSpec) -> Result<(), ControlApiError> {
        let resp = self
            .client
            .post(format!("{}/proxies", self.base_url))
            .json(route)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }

        Ok(())
    }

    pub async fn delete_proxy(&self, name: &str) -> Result<(), ControlApiError> {
        let resp = self
            .client
            .delete(format!("{}/proxies/{}", self.base_url, name))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }

        Ok(())
    }

    /// Add a toxic to a route. Returns the name the engine assigned to it.
    pub async fn add_toxic(
        &self,
        route: &str,
        toxic: &ToxicDirective,
    ) -> Result<String, ControlApiError> {
        let resp = self
            .client
            .post(format!("{}/proxies/{}/toxics", self.base_url, route))
            .json(toxic)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }

        let toxic_resp: ToxicResponse = resp.json().await?;
        Ok(toxic_resp.name)
    }
}

async fn api_error(resp: reqwest::Response) -> ControlApiError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let message = match body.trim() {
        "" => status.canonical_reason().unwrap_or("unknown status").to_string(),
        text => text.to_string(),
    };

    ControlApiError::Api {
        status: status.as_u16(),
        message,
    }
}

impl RouteSpec {
    pub fn new(
        name: impl Into<String>,
        listen: impl Into<String>,
        upstream: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            listen: listen.into(),
            upstream: upstream.into(),
            enabled: true,
        }
    }
}
