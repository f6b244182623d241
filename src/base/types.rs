use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Err = anyhow::Error;
pub type Res<T> = Result<T, Err>;
pub type Void = Res<()>;

// Inbound chat shapes.

/// A file attached to a chat message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatFile {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub url_private: Option<String>,
}

impl ChatFile {
    /// Whether the file is an image the triager can look at.
    pub fn is_image(&self) -> bool {
        self.mimetype.as_deref().is_some_and(|m| m.starts_with("image/"))
    }
}

/// A message attachment (unfurl or forwarded message).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatAttachment {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub fallback: Option<String>,
    #[serde(default)]
    pub is_share: bool,
    #[serde(default)]
    pub from_url: Option<String>,
}

impl ChatAttachment {
    /// Forwarded messages arrive as shared attachments carrying the original text.
    pub fn is_forwarded(&self) -> bool {
        self.is_share || self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

/// A chat message as seen by the intake pipeline, independent of the platform wire format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    pub ts: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub files: Vec<ChatFile>,
    #[serde(default)]
    pub attachments: Vec<ChatAttachment>,
    #[serde(default)]
    pub bot_id: Option<String>,
    /// Reaction names currently on the message (history only).
    #[serde(default)]
    pub reactions: Vec<String>,
}

impl ChatMessage {
    /// The thread key of this message: its `thread_ts` when present, otherwise its own `ts`.
    pub fn thread_key(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }

    /// Whether this message is a reply inside a thread rather than a thread root.
    pub fn is_thread_reply(&self) -> bool {
        self.thread_ts.as_deref().is_some_and(|t| t != self.ts)
    }

    pub fn user_id(&self) -> &str {
        self.user.as_deref().unwrap_or_default()
    }
}

/// A normalized inbound event from the monitored channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A new message, thread reply or @-mention.
    Message(ChatMessage),
    /// An existing message had its text changed.
    Edited {
        channel: String,
        ts: String,
        thread_ts: Option<String>,
        user: Option<String>,
        previous_text: String,
        text: String,
    },
    /// A message was deleted.
    Deleted { channel: String, ts: String, thread_ts: Option<String> },
}

impl ChatEvent {
    pub fn channel(&self) -> &str {
        match self {
            ChatEvent::Message(message) => &message.channel,
            ChatEvent::Edited { channel, .. } | ChatEvent::Deleted { channel, .. } => channel,
        }
    }
}

// Ticket outcomes.

/// A reference to a tracker ticket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketContext {
    /// Tracker-internal id, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Human identifier, e.g. `ENG-42`.
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// What the triager did with a new top-level message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageAction {
    Created,
    Duplicate,
    Skipped,
    Deferred,
    Error,
}

impl TriageAction {
    /// Only messages that produced or matched a ticket count as triaged.
    pub fn was_triaged(self) -> bool {
        matches!(self, TriageAction::Created | TriageAction::Duplicate)
    }
}

/// Cached ticket outcome for a conversation thread, keyed by thread-root timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadOutcome {
    pub ticket_id: Option<String>,
    pub ticket_identifier: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_duplicate: bool,
    pub is_deferred: bool,
    pub original_context: Option<String>,
    pub original_reporter_id: Option<String>,
}

impl ThreadOutcome {
    /// A thread that resolved to a ticket.
    pub fn ticketed(ticket: &TicketContext, is_duplicate: bool, reporter: Option<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            ticket_id: ticket.id.clone(),
            ticket_identifier: Some(ticket.identifier.clone()),
            created_at,
            is_duplicate,
            is_deferred: false,
            original_context: None,
            original_reporter_id: reporter,
        }
    }

    /// A thread where ticket creation was withheld pending more discussion.
    pub fn deferred(context: String, reporter: Option<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            ticket_id: None,
            ticket_identifier: None,
            created_at,
            is_duplicate: false,
            is_deferred: true,
            original_context: Some(context),
            original_reporter_id: reporter,
        }
    }

    /// The cached ticket, if the thread has one.
    pub fn ticket(&self) -> Option<TicketContext> {
        self.ticket_identifier.as_ref().map(|identifier| TicketContext {
            id: self.ticket_id.clone(),
            identifier: identifier.clone(),
            url: None,
        })
    }
}

/// Cached triage result for a single top-level message, keyed by message timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageOutcome {
    pub ticket_id: Option<String>,
    pub ticket_identifier: Option<String>,
    pub ticket_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub was_triaged: bool,
    pub action: TriageAction,
}

impl MessageOutcome {
    pub fn new(action: TriageAction, ticket: Option<&TicketContext>, created_at: DateTime<Utc>) -> Self {
        Self {
            ticket_id: ticket.and_then(|t| t.id.clone()),
            ticket_identifier: ticket.map(|t| t.identifier.clone()),
            ticket_url: ticket.and_then(|t| t.url.clone()),
            created_at,
            was_triaged: action.was_triaged(),
            action,
        }
    }

    pub fn ticket(&self) -> Option<TicketContext> {
        self.ticket_identifier.as_ref().map(|identifier| TicketContext {
            id: self.ticket_id.clone(),
            identifier: identifier.clone(),
            url: self.ticket_url.clone(),
        })
    }
}

// Tests.
