//! HTTP binding for the external triager.
//!
//! Each entry point is a `POST {endpoint}/{route}` carrying the JSON-encoded
//! `TriageInput`; the response body is the JSON-encoded verdict.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::base::{
    config::Config,
    types::{Res, TriageAction},
};

use super::{AckAction, FollowupAction, GenericTriager, OrphanAction, TriageInput, TriagerClient, Verdict};

// Extra methods on `TriagerClient` applied by the http implementation.

impl TriagerClient {
    /// Creates a triager client that talks to the configured endpoint.
    pub fn http(config: &Config) -> Res<Self> {
        let client = HttpTriager::new(config)?;
        Ok(Self { inner: Arc::new(client) })
    }
}

// Specific implementations.

/// Triager reached over HTTP.
#[derive(Clone)]
pub struct HttpTriager {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTriager {
    #[instrument(name = "HttpTriager::new", skip_all)]
    pub fn new(config: &Config) -> Res<Self> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(config.triager_timeout_secs)).build()?;

        Ok(Self {
            client,
            endpoint: config.triager_endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn call<A: DeserializeOwned>(&self, route: &str, input: &TriageInput) -> Res<Verdict<A>> {
        let url = format!("{}/{}", self.endpoint, route);
        debug!("Calling triager at {}", url);

        let response = self
            .client
            .post(&url)
            .json(input)
            .send()
            .await
            .with_context(|| format!("Triager call to `{route}` failed"))?
            .error_for_status()
            .with_context(|| format!("Triager call to `{route}` was rejected"))?;

        let verdict = response.json::<Verdict<A>>().await.with_context(|| format!("Triager returned an unreadable verdict for `{route}`"))?;

        Ok(verdict)
    }
}

#[async_trait]
impl GenericTriager for HttpTriager {
    #[instrument(name = "HttpTriager::triage_new_message", skip_all)]
    async fn triage_new_message(&self, input: &TriageInput) -> Res<Verdict<TriageAction>> {
        self.call("new-message", input).await
    }

    #[instrument(name = "HttpTriager::triage_thread_reply", skip_all)]
    async fn triage_thread_reply(&self, input: &TriageInput) -> Res<Verdict<AckAction>> {
        self.call("thread-reply", input).await
    }

    #[instrument(name = "HttpTriager::triage_orphan_thread", skip_all)]
    async fn triage_orphan_thread(&self, input: &TriageInput) -> Res<Verdict<OrphanAction>> {
        self.call("orphan-thread", input).await
    }

    #[instrument(name = "HttpTriager::triage_deferred_followup", skip_all)]
    async fn triage_deferred_followup(&self, input: &TriageInput) -> Res<Verdict<FollowupAction>> {
        self.call("deferred-followup", input).await
    }

    #[instrument(name = "HttpTriager::handle_direct_command", skip_all)]
    async fn handle_direct_command(&self, input: &TriageInput) -> Res<Verdict<AckAction>> {
        self.call("direct-command", input).await
    }

    #[instrument(name = "HttpTriager::handle_message_edit", skip_all)]
    async fn handle_message_edit(&self, input: &TriageInput) -> Res<Verdict<AckAction>> {
        self.call("message-edited", input).await
    }

    #[instrument(name = "HttpTriager::handle_message_delete", skip_all)]
    async fn handle_message_delete(&self, input: &TriageInput) -> Res<Verdict<AckAction>> {
        self.call("message-deleted", input).await
    }
}
