//! Patch description source
//!
//! The engine publishes its parameter tree as a single JSON document. The
//! registry is rebuilt from it at startup and after every confirmed patch
//! (re)load.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

use crate::params::ParameterRegistry;

/// Where the patch description comes from
#[async_trait]
pub trait PatchSource: Send + Sync {
    async fn fetch(&self) -> Result<Value>;
}

/// Fetches the patch description from the engine's HTTP endpoint
pub struct HttpPatchSource {
    client: reqwest::Client,
    url: String,
}

impl HttpPatchSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl PatchSource for HttpPatchSource {
    async fn fetch(&self) -> Result<Value> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.url))?
            .error_for_status()
            .with_context(|| format!("Patch description request to {} failed", self.url))?;

        response
            .json::<Value>()
            .await
            .context("Patch description is not valid JSON")
    }
}

/// Fetch the patch description and build a registry from it
///
/// Any failure yields an empty registry: the bridge keeps running with no
/// controllers bound.
pub async fn load_registry(source: &dyn PatchSource) -> ParameterRegistry {
    let patch = match source.fetch().await {
        Ok(patch) => patch,
        Err(e) => {
            warn!("Patch description unavailable, no controllers bound: {:#}", e);
            return ParameterRegistry::empty();
        }
    };

    match ParameterRegistry::from_patch(&patch) {
        Ok(registry) => {
            info!(
                "Patch loaded: {} controller(s) bound, {} preset(s)",
                registry.len(),
                registry.presets().len()
            );
            registry
        }
        Err(e) => {
            warn!("Patch description unusable, no controllers bound: {}", e);
            ParameterRegistry::empty()
        }
    }
}
