pub mod http;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::base::types::{ChatMessage, Res, TicketContext, TriageAction};

// Types.

/// Flat input record handed to every triager entry point.
///
/// Fields that do not apply to a category are left empty and are omitted
/// from the serialized form.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageInput {
    /// The acting user.
    pub user_id: String,
    pub channel_id: String,
    pub message_ts: String,
    pub thread_ts: Option<String>,
    pub text: String,
    /// Ticket already associated with the conversation.
    pub ticket: Option<TicketContext>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    /// Flattened thread transcript for thread-shaped categories.
    pub transcript: Option<String>,
    pub is_duplicate: Option<bool>,
    pub same_reporter: Option<bool>,
    /// Message text captured when triage was deferred.
    pub original_context: Option<String>,
    pub previous_text: Option<String>,
    pub previous_action: Option<TriageAction>,
}

impl TriageInput {
    /// Builds the common part of an input from a chat message.
    pub fn from_message(message: &ChatMessage, text: String, image_urls: Vec<String>) -> Self {
        Self {
            user_id: message.user_id().to_string(),
            channel_id: message.channel.clone(),
            message_ts: message.ts.clone(),
            thread_ts: message.thread_ts.clone(),
            text,
            image_urls,
            ..Default::default()
        }
    }
}

/// Verdict returned by the triager, generic over the category's action set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict<A> {
    pub action: A,
    #[serde(default)]
    pub ticket_id: Option<String>,
    #[serde(default)]
    pub ticket_identifier: Option<String>,
    #[serde(default)]
    pub ticket_url: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl<A> Verdict<A> {
    /// A verdict without a ticket reference.
    pub fn bare(action: A) -> Self {
        Self {
            action,
            ticket_id: None,
            ticket_identifier: None,
            ticket_url: None,
            message: String::new(),
        }
    }

    /// The ticket reference carried by the verdict, if complete enough to track.
    ///
    /// Either an id or an identifier suffices; a missing identifier falls back to the id.
    pub fn ticket(&self) -> Option<TicketContext> {
        let identifier = self.ticket_identifier.clone().or_else(|| self.ticket_id.clone())?;

        Some(TicketContext {
            id: self.ticket_id.clone(),
            identifier,
            url: self.ticket_url.clone(),
        })
    }
}

/// Outcome set for orphan threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanAction {
    Created,
    Updated,
    Skipped,
    Error,
}

/// Outcome set for deferred-thread follow-ups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowupAction {
    NoAction,
    Created,
    Error,
}

/// Outcome set for replies, commands, edits and deletions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckAction {
    Done,
    NoAction,
    Error,
}

// Traits.

/// Generic triager trait that clients must implement.
///
/// The triager owns the create / update / skip decision. It is called at most
/// once at a time by the intake queue, so implementations may assume their
/// own side effects (chat replies, tracker mutations) never interleave.
#[async_trait]
pub trait GenericTriager: Send + Sync + 'static {
    /// Triage a new top-level message.
    async fn triage_new_message(&self, input: &TriageInput) -> Res<Verdict<TriageAction>>;

    /// Handle a reply in a thread that already has a ticket.
    async fn triage_thread_reply(&self, input: &TriageInput) -> Res<Verdict<AckAction>>;

    /// Handle a reply in a thread with no known ticket.
    async fn triage_orphan_thread(&self, input: &TriageInput) -> Res<Verdict<OrphanAction>>;

    /// Handle a reply in a thread whose triage was deferred.
    async fn triage_deferred_followup(&self, input: &TriageInput) -> Res<Verdict<FollowupAction>>;

    /// Execute a command addressed to the bot.
    async fn handle_direct_command(&self, input: &TriageInput) -> Res<Verdict<AckAction>>;

    /// React to an edit of an already-triaged message.
    async fn handle_message_edit(&self, input: &TriageInput) -> Res<Verdict<AckAction>>;

    /// React to the deletion of an already-triaged message.
    async fn handle_message_delete(&self, input: &TriageInput) -> Res<Verdict<AckAction>>;
}

// Structs.

/// Triager client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct TriagerClient {
    inner: Arc<dyn GenericTriager>,
}

impl Deref for TriagerClient {
    type Target = dyn GenericTriager;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl TriagerClient {
    pub fn new(inner: Arc<dyn GenericTriager>) -> Self {
        Self { inner }
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_reads_category_actions() {
        let verdict: Verdict<TriageAction> = serde_json::from_str(r#"{"action":"created","ticket_id":"abc","ticket_identifier":"ENG-42","message":"ok"}"#).unwrap();
        assert_eq!(verdict.action, TriageAction::Created);
        assert_eq!(verdict.ticket().unwrap().identifier, "ENG-42");

        let followup: Verdict<FollowupAction> = serde_json::from_str(r#"{"action":"no_action"}"#).unwrap();
        assert_eq!(followup.action, FollowupAction::NoAction);
        assert!(followup.ticket().is_none());

        let orphan: Result<Verdict<OrphanAction>, _> = serde_json::from_str(r#"{"action":"deferred"}"#);
        assert!(orphan.is_err());
    }

    #[test]
    fn ticket_identifier_falls_back_to_id() {
        let verdict = Verdict {
            ticket_id: Some("abc".into()),
            ..Verdict::bare(OrphanAction::Created)
        };

        assert_eq!(verdict.ticket().unwrap().identifier, "abc");
    }

    #[test]
    fn input_omits_unused_fields() {
        let message = ChatMessage {
            user: Some("U1".into()),
            ts: "1.0".into(),
            channel: "C1".into(),
            ..Default::default()
        };

        let input = TriageInput::from_message(&message, "hello".into(), vec![]);
        let json = serde_json::to_value(&input).unwrap();

        assert_eq!(json["user_id"], "U1");
        assert!(json.get("transcript").is_none());
        assert!(json.get("ticket").is_none());
    }
}
