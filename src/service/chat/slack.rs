//! Chat service integration for intake-bot.
//!
//! This module provides the Slack implementation of `GenericChatClient`:
//! - Receiving realtime events over socket mode
//! - Paging channel and thread history
//! - Adding reactions
//!
//! Slack payloads are re-read into the platform-independent `ChatEvent` and
//! `ChatMessage` shapes before they leave this module.

use crate::{
    base::{
        config::Config,
        types::{ChatAttachment, ChatEvent, ChatFile, ChatMessage, Res, Void},
    },
    service::chat::{EventSender, HistoryPage},
};
use async_trait::async_trait;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use serde::Deserialize;
use serde_json::Value;
use slack_morphism::{errors::SlackClientError, prelude::*};
use tracing::{debug, info, instrument, warn};

use std::sync::Arc;

use super::{ChatClient, GenericChatClient};

// Type aliases.

type FullClient = slack_morphism::SlackClient<SlackClientHyperConnector<HttpsConnector<HttpConnector>>>;

// Extra methods on `ChatClient` applied by the slack implementation.

impl ChatClient {
    /// Creates a new Slack chat client.
    pub async fn slack(config: &Config) -> Res<Self> {
        let client = SlackChatClient::new(config).await?;
        Ok(Self { inner: Arc::new(client) })
    }
}

// Structs.

/// User state for the slack socket client.
struct SlackUserState {
    events: EventSender,
}

/// Slack client implementation.
#[derive(Clone)]
struct SlackChatClient {
    pub app_token: SlackApiToken,
    pub bot_token: SlackApiToken,
    pub bot_user_id: String,
    pub client: Arc<FullClient>,
}

impl SlackChatClient {
    /// Create a new Slack chat client.
    #[instrument(name = "SlackChatClient::new", skip_all)]
    pub async fn new(config: &Config) -> Res<Self> {
        // Initialize tokens.

        let app_token = SlackApiToken::new(SlackApiTokenValue(config.slack_app_token.clone()));
        let bot_token = SlackApiToken::new(SlackApiTokenValue(config.slack_bot_token.clone()));

        // Initialize the Slack client.

        let https_connector = HttpsConnector::<HttpConnector>::builder().with_native_roots()?.https_only().enable_all_versions().build();
        let connector = SlackClientHyperConnector::with_connector(https_connector);
        let client = Arc::new(slack_morphism::SlackClient::new(connector));

        // Get the bot's user ID.

        let session = client.open_session(&bot_token);
        let bot_user = session.auth_test().await?;
        let bot_user_id = bot_user.user_id.0;

        info!("Slack bot user ID: {}", bot_user_id);

        Ok(Self {
            app_token,
            bot_token,
            bot_user_id,
            client,
        })
    }
}

#[async_trait]
impl GenericChatClient for SlackChatClient {
    fn bot_user_id(&self) -> &str {
        &self.bot_user_id
    }

    async fn start(&self, events: EventSender) -> Void {
        // Initialize the socket mode listener.

        let socket_mode_callbacks = SlackSocketModeListenerCallbacks::new().with_push_events(handle_push_event);

        // Initialize the socket mode listener environment.

        let listener_environment = Arc::new(SlackClientEventsListenerEnvironment::new(self.client.clone()).with_user_state(SlackUserState { events: events.clone() }));

        let socket_mode_listener = Arc::new(SlackClientSocketModeListener::new(
            &SlackClientSocketModeConfig::new(),
            listener_environment.clone(),
            socket_mode_callbacks,
        ));

        // Register an app token to listen for events.
        socket_mode_listener.listen_for(&self.app_token).await?;
        events.mark_connected();

        info!("Socket mode listener connected.");

        // Serve until Ctrl-C.
        socket_mode_listener.serve().await;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn fetch_history(&self, channel_id: &str, oldest: &str, cursor: Option<&str>, limit: u16) -> Res<HistoryPage> {
        let mut request = SlackApiConversationsHistoryRequest::new()
            .with_channel(SlackChannelId(channel_id.to_string()))
            .with_oldest(SlackTs(oldest.to_string()))
            .with_limit(limit);

        if let Some(cursor) = cursor {
            request = request.with_cursor(SlackCursorId(cursor.to_string()));
        }

        let session = self.client.open_session(&self.bot_token);
        let response = session.conversations_history(&request).await.map_err(|e| anyhow::anyhow!("Failed to fetch history: {}", e))?;

        let messages = response
            .messages
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter_map(|value| normalize_message(value, channel_id))
            .collect();

        let next_cursor = response.response_metadata.and_then(|m| m.next_cursor).map(|c| c.0).filter(|c| !c.is_empty());

        Ok(HistoryPage { messages, next_cursor })
    }

    #[instrument(skip(self))]
    async fn fetch_thread(&self, channel_id: &str, thread_ts: &str) -> Res<Vec<ChatMessage>> {
        let session = self.client.open_session(&self.bot_token);

        let mut messages = Vec::new();
        let mut cursor: Option<SlackCursorId> = None;

        loop {
            let mut request = SlackApiConversationsRepliesRequest::new(SlackChannelId(channel_id.to_string()), SlackTs(thread_ts.to_string()));
            if let Some(cursor) = cursor.take() {
                request = request.with_cursor(cursor);
            }

            let response = session.conversations_replies(&request).await;

            let response = if let Err(e) = &response
                && let SlackClientError::ApiError(ae) = e
                && ae.code == "thread_not_found"
            {
                // A top-level message without replies has no thread yet.
                return Ok(messages);
            } else {
                response?
            };

            for message in response.messages.iter() {
                if let Some(message) = normalize_message(serde_json::to_value(message)?, channel_id) {
                    messages.push(message);
                }
            }

            match response.response_metadata.and_then(|m| m.next_cursor).filter(|c| !c.0.is_empty()) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(messages)
    }

    #[instrument(skip(self))]
    async fn add_reaction(&self, channel_id: &str, ts: &str, emoji: &str) -> Void {
        let request = SlackApiReactionsAddRequest {
            channel: SlackChannelId(channel_id.to_string()),
            name: SlackReactionName(emoji.to_string()),
            timestamp: SlackTs(ts.to_string()),
        };

        let session = self.client.open_session(&self.bot_token);

        match session.reactions_add(&request).await {
            Ok(_) => Ok(()),
            Err(SlackClientError::ApiError(ae)) if ae.code == "already_reacted" => {
                debug!("Marker already present on {}.", ts);
                Ok(())
            }
            Err(e) => Err(anyhow::anyhow!("Failed to react to message: {}", e)),
        }
    }
}

// Socket mode listener callbacks for Slack.

/// Handles push events from Slack.
///
/// Only `message` events are forwarded: @-mentions also arrive as messages,
/// so `app_mention` events would only duplicate them.
#[instrument(skip_all)]
async fn handle_push_event(event_callback: SlackPushEventCallback, _client: Arc<SlackHyperClient>, states: SlackClientEventsUserState) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let event = event_callback.event;
    let states = states.read().await;
    let user_state = states.get_user_state::<SlackUserState>().ok_or(anyhow::anyhow!("Failed to get user state"))?;

    match event {
        SlackEventCallbackBody::Message(slack_message_event) => {
            debug!("Received message event ...");

            let value = serde_json::to_value(&slack_message_event)?;
            let Some(event) = normalize_event(value) else {
                warn!("Skipping message event without a usable timestamp.");
                return Ok(());
            };

            user_state.events.send(event)?;
        }
        SlackEventCallbackBody::AppMention(_) => {
            debug!("Ignoring app mention event; the message event carries it.");
        }
        _ => {
            debug!("Received unhandled push event.")
        }
    }

    Ok(())
}

// Helpers.

#[derive(Debug, Default, Deserialize)]
struct RawReaction {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawAttachment {
    text: Option<String>,
    fallback: Option<String>,
    is_share: Option<bool>,
    from_url: Option<String>,
}

/// A Slack message payload, read leniently: every field may be absent or `null`.
#[derive(Debug, Default, Deserialize)]
struct RawMessage {
    text: Option<String>,
    user: Option<String>,
    ts: Option<String>,
    channel: Option<String>,
    thread_ts: Option<String>,
    subtype: Option<String>,
    files: Option<Vec<ChatFile>>,
    attachments: Option<Vec<RawAttachment>>,
    bot_id: Option<String>,
    reactions: Option<Vec<RawReaction>>,
    message: Option<Box<RawMessage>>,
    previous_message: Option<Box<RawMessage>>,
    deleted_ts: Option<String>,
}

impl RawMessage {
    fn into_chat_message(self, channel: String) -> Option<ChatMessage> {
        Some(ChatMessage {
            text: self.text,
            user: self.user,
            ts: self.ts?,
            channel,
            thread_ts: self.thread_ts,
            subtype: self.subtype,
            files: self.files.unwrap_or_default(),
            attachments: self
                .attachments
                .unwrap_or_default()
                .into_iter()
                .map(|a| ChatAttachment {
                    text: a.text,
                    fallback: a.fallback,
                    is_share: a.is_share.unwrap_or(false),
                    from_url: a.from_url,
                })
                .collect(),
            bot_id: self.bot_id,
            reactions: self.reactions.unwrap_or_default().into_iter().filter_map(|r| r.name).collect(),
        })
    }
}

/// Reads a history or thread message; the channel is not part of those payloads.
fn normalize_message(value: Value, channel_id: &str) -> Option<ChatMessage> {
    let raw: RawMessage = serde_json::from_value(value).ok()?;
    raw.into_chat_message(channel_id.to_string())
}

/// Reads a realtime `message` event, splitting out edits and deletions.
fn normalize_event(value: Value) -> Option<ChatEvent> {
    let raw: RawMessage = serde_json::from_value(value).ok()?;
    let channel = raw.channel.clone().unwrap_or_default();
    let subtype = raw.subtype.clone();

    match subtype.as_deref() {
        Some("message_changed") => {
            let current = raw.message?;
            let previous = raw.previous_message.unwrap_or_default();

            Some(ChatEvent::Edited {
                channel,
                ts: current.ts.or(previous.ts)?,
                thread_ts: current.thread_ts.or(previous.thread_ts),
                user: current.user.or(previous.user),
                previous_text: previous.text.unwrap_or_default(),
                text: current.text.unwrap_or_default(),
            })
        }
        Some("message_deleted") => {
            let previous = raw.previous_message.unwrap_or_default();

            Some(ChatEvent::Deleted {
                channel,
                ts: raw.deleted_ts.or(previous.ts)?,
                thread_ts: previous.thread_ts,
            })
        }
        _ => raw.into_chat_message(channel).map(ChatEvent::Message),
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn normalizes_plain_message() {
        let event = normalize_event(json!({
            "type": "message",
            "channel": "C1",
            "user": "U1",
            "text": "Checkout returns a 500",
            "ts": "1700000000.000100",
            "files": null,
            "attachments": [{ "text": "forwarded body", "is_share": true }]
        }))
        .unwrap();

        let ChatEvent::Message(message) = event else { panic!("expected a message") };
        assert_eq!(message.channel, "C1");
        assert_eq!(message.user_id(), "U1");
        assert!(message.files.is_empty());
        assert!(message.attachments[0].is_share);
    }

    #[test]
    fn normalizes_edit() {
        let event = normalize_event(json!({
            "type": "message",
            "subtype": "message_changed",
            "channel": "C1",
            "ts": "1700000050.000000",
            "message": { "user": "U1", "text": "Login fails", "ts": "1700000000.000100" },
            "previous_message": { "user": "U1", "text": "Login fails  ", "ts": "1700000000.000100", "thread_ts": "1700000000.000100" }
        }))
        .unwrap();

        assert_eq!(
            event,
            ChatEvent::Edited {
                channel: "C1".into(),
                ts: "1700000000.000100".into(),
                thread_ts: Some("1700000000.000100".into()),
                user: Some("U1".into()),
                previous_text: "Login fails  ".into(),
                text: "Login fails".into(),
            }
        );
    }

    #[test]
    fn normalizes_delete() {
        let event = normalize_event(json!({
            "type": "message",
            "subtype": "message_deleted",
            "channel": "C1",
            "ts": "1700000099.000000",
            "deleted_ts": "1700000000.000100",
            "previous_message": { "text": "gone", "ts": "1700000000.000100" }
        }))
        .unwrap();

        assert_eq!(
            event,
            ChatEvent::Deleted {
                channel: "C1".into(),
                ts: "1700000000.000100".into(),
                thread_ts: None,
            }
        );
    }

    #[test]
    fn history_message_keeps_reactions() {
        let message = normalize_message(
            json!({
                "type": "message",
                "user": "U1",
                "text": "done already",
                "ts": "1700000000.000100",
                "reactions": [{ "name": "white_check_mark", "count": 1, "users": ["UBOT"] }]
            }),
            "C1",
        )
        .unwrap();

        assert_eq!(message.channel, "C1");
        assert_eq!(message.reactions, vec!["white_check_mark".to_string()]);
    }

    #[test]
    fn message_without_ts_is_dropped() {
        assert!(normalize_event(json!({ "type": "message", "text": "?" })).is_none());
    }
}
