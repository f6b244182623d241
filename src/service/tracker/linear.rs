//! Linear implementation of the tracker client.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use crate::base::{
    config::Config,
    types::{Res, Void},
};

use super::{GenericTrackerClient, TrackerClient};

const PING_TIMEOUT: Duration = Duration::from_secs(15);

// Extra methods on `TrackerClient` applied by the linear implementation.

impl TrackerClient {
    pub fn linear(config: &Config) -> Res<Self> {
        let client = LinearTrackerClient::new(config)?;
        Ok(Self { inner: Arc::new(client) })
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<serde_json::Value>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

/// Linear GraphQL client.
#[derive(Clone)]
pub struct LinearTrackerClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl LinearTrackerClient {
    #[instrument(name = "LinearTrackerClient::new", skip_all)]
    pub fn new(config: &Config) -> Res<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(PING_TIMEOUT).build()?,
            api_url: config.tracker_api_url.clone(),
            api_key: config.tracker_api_key.clone(),
        })
    }
}

#[async_trait]
impl GenericTrackerClient for LinearTrackerClient {
    #[instrument(name = "LinearTrackerClient::ping", skip_all)]
    async fn ping(&self) -> Void {
        let response = self
            .client
            .post(&self.api_url)
            .header(reqwest::header::AUTHORIZATION, &self.api_key)
            .json(&json!({ "query": "{ viewer { id } }" }))
            .send()
            .await
            .context("Tracker request failed")?
            .error_for_status()
            .context("Tracker rejected the request")?
            .json::<GraphQlResponse>()
            .await
            .context("Tracker returned an unreadable response")?;

        if let Some(error) = response.errors.first() {
            return Err(anyhow::anyhow!("Tracker query failed: {}", error.message));
        }

        if response.data.is_none() {
            return Err(anyhow::anyhow!("Tracker query returned no data."));
        }

        debug!("Tracker ping succeeded.");

        Ok(())
    }
}
