//! Ingest filtering and text normalization helpers.

use crate::base::types::{ChatMessage, TicketContext};

/// Subtypes that may carry user content; everything else is dropped.
const ALLOWED_SUBTYPES: &[&str] = &["file_share"];

/// Membership and channel-metadata subtypes.
const MEMBERSHIP_SUBTYPES: &[&str] = &["channel_join", "channel_leave", "channel_topic", "channel_purpose", "channel_name", "group_join", "group_leave"];

/// Decides whether a raw chat message is worth considering at all.
#[derive(Debug, Clone)]
pub struct IngestFilter {
    channel_id: String,
}

impl IngestFilter {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self { channel_id: channel_id.into() }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Whether a message may enter the pipeline on any path.
    ///
    /// Rejects bot-authored messages, other channels, unsupported subtypes
    /// and messages with no text, files or forwarded content.
    pub fn admits(&self, message: &ChatMessage) -> bool {
        if message.bot_id.is_some() || message.subtype.as_deref() == Some("bot_message") {
            return false;
        }

        if message.channel != self.channel_id {
            return false;
        }

        if let Some(subtype) = message.subtype.as_deref()
            && (MEMBERSHIP_SUBTYPES.contains(&subtype) || !ALLOWED_SUBTYPES.contains(&subtype))
        {
            return false;
        }

        has_content(message)
    }

    /// Whether a message can be handled as a new top-level message.
    pub fn is_processable(&self, message: &ChatMessage) -> bool {
        !message.is_thread_reply() && self.admits(message)
    }
}

/// A message has content when it carries text, files or a forwarded message.
pub fn has_content(message: &ChatMessage) -> bool {
    let has_text = message.text.as_deref().is_some_and(|t| !t.trim().is_empty());
    let has_files = !message.files.is_empty();
    let has_forward = message.attachments.iter().any(|a| a.is_forwarded());

    has_text || has_files || has_forward
}

/// The text handed to the triager: the message text followed by any forwarded message text.
pub fn message_text(message: &ChatMessage) -> String {
    let mut parts: Vec<&str> = Vec::new();

    if let Some(text) = message.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        parts.push(text);
    }

    for attachment in message.attachments.iter().filter(|a| a.is_forwarded()) {
        if let Some(text) = attachment.text.as_deref().or(attachment.fallback.as_deref()).map(str::trim).filter(|t| !t.is_empty()) {
            parts.push(text);
        }
    }

    parts.join("\n\n")
}

/// Trims and collapses internal whitespace runs to a single space.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Private URLs of the image files attached to a message.
pub fn image_urls(message: &ChatMessage) -> Vec<String> {
    message.files.iter().filter(|f| f.is_image()).filter_map(|f| f.url_private.clone()).collect()
}

/// Flattens a thread into `<@user>: text` lines, oldest first.
pub fn format_transcript(messages: &[ChatMessage], bot_user_id: &str) -> String {
    messages
        .iter()
        .filter_map(|m| {
            let text = message_text(m);
            if text.is_empty() {
                return None;
            }

            let speaker = match (m.user.as_deref(), m.bot_id.is_some()) {
                (Some(user), _) if user == bot_user_id => "bot".to_string(),
                (_, true) => "bot".to_string(),
                (Some(user), false) => format!("<@{user}>"),
                (None, false) => "unknown".to_string(),
            };

            Some(format!("{speaker}: {text}"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Finds the first tracker issue link (`.../issue/TEAM-123...`) in a piece of text.
pub fn find_ticket_reference(text: &str) -> Option<TicketContext> {
    const MARKER: &str = "/issue/";

    let mut rest = text;
    while let Some(start) = rest.find(MARKER) {
        let after = &rest[start + MARKER.len()..];
        let identifier: String = after.chars().take_while(|c| c.is_ascii_alphanumeric() || *c == '-').collect();

        if is_ticket_identifier(&identifier) {
            let url_start = rest[..start]
                .char_indices()
                .rev()
                .find(|(_, c)| c.is_whitespace() || *c == '<' || *c == '(')
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(0);
            let url_end = start + MARKER.len() + identifier.len();

            return Some(TicketContext {
                id: None,
                identifier,
                url: Some(rest[url_start..url_end].to_string()),
            });
        }

        rest = after;
    }

    None
}

/// The newest ticket reference mentioned anywhere in a thread.
pub fn latest_ticket_reference(messages: &[ChatMessage]) -> Option<TicketContext> {
    messages.iter().rev().find_map(|m| {
        let text = message_text(m);
        find_ticket_reference(&text)
    })
}

/// `TEAM-123`: an uppercase alphanumeric team key, a dash, and digits.
fn is_ticket_identifier(candidate: &str) -> bool {
    let Some((team, number)) = candidate.split_once('-') else {
        return false;
    };

    !team.is_empty()
        && team.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        && team.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && !number.is_empty()
        && number.chars().all(|c| c.is_ascii_digit())
}

// Tests.

#[cfg(test)]
mod tests {
    use crate::base::types::{ChatAttachment, ChatFile};

    use super::*;

    fn message(text: &str) -> ChatMessage {
        ChatMessage {
            text: Some(text.to_string()),
            user: Some("U1".into()),
            ts: "100.0".into(),
            channel: "C1".into(),
            ..Default::default()
        }
    }

    #[test]
    fn admits_plain_user_message() {
        let filter = IngestFilter::new("C1");
        assert!(filter.is_processable(&message("Checkout is broken")));
    }

    #[test]
    fn rejects_bots_and_other_channels() {
        let filter = IngestFilter::new("C1");

        let bot = ChatMessage { bot_id: Some("B1".into()), ..message("beep") };
        let bot_subtype = ChatMessage { subtype: Some("bot_message".into()), ..message("beep") };
        let elsewhere = ChatMessage { channel: "C2".into(), ..message("hi") };

        assert!(!filter.is_processable(&bot));
        assert!(!filter.is_processable(&bot_subtype));
        assert!(!filter.is_processable(&elsewhere));
    }

    #[test]
    fn subtypes_are_an_allowlist() {
        let filter = IngestFilter::new("C1");

        let join = ChatMessage { subtype: Some("channel_join".into()), ..message("joined") };
        let broadcast = ChatMessage { subtype: Some("thread_broadcast".into()), ..message("fyi") };
        let file_share = ChatMessage {
            subtype: Some("file_share".into()),
            text: None,
            files: vec![ChatFile { id: "F1".into(), ..Default::default() }],
            ..message("")
        };

        assert!(!filter.is_processable(&join));
        assert!(!filter.is_processable(&broadcast));
        assert!(filter.is_processable(&file_share));
    }

    #[test]
    fn rejects_empty_but_keeps_forwards() {
        let filter = IngestFilter::new("C1");

        let empty = message("   ");
        let forwarded = ChatMessage {
            attachments: vec![ChatAttachment {
                text: Some("original report".into()),
                is_share: true,
                ..Default::default()
            }],
            ..message("")
        };

        assert!(!filter.is_processable(&empty));
        assert!(filter.is_processable(&forwarded));
        assert_eq!(message_text(&forwarded), "original report");
    }

    #[test]
    fn thread_replies_are_not_top_level() {
        let filter = IngestFilter::new("C1");
        let reply = ChatMessage { thread_ts: Some("50.0".into()), ..message("+1") };

        assert!(filter.admits(&reply));
        assert!(!filter.is_processable(&reply));
    }

    #[test]
    fn normalization_ignores_whitespace_only_edits() {
        assert_eq!(normalize_text("Login fails  "), normalize_text("Login fails"));
        assert_eq!(normalize_text("  Login \n\t fails "), "Login fails");
        assert_ne!(normalize_text("Login fails"), normalize_text("Login failed"));
    }

    #[test]
    fn finds_ticket_links() {
        let found = find_ticket_reference("Tracked in <https://linear.app/acme/issue/ENG-42/login-fails|ENG-42>").unwrap();
        assert_eq!(found.identifier, "ENG-42");
        assert_eq!(found.url.as_deref(), Some("https://linear.app/acme/issue/ENG-42"));

        assert!(find_ticket_reference("see /issue/not-a-ticket").is_none());
        assert!(find_ticket_reference("no links here").is_none());
    }

    #[test]
    fn latest_reference_wins() {
        let thread = vec![
            message("Filed https://linear.app/acme/issue/ENG-1"),
            message("Moved to https://linear.app/acme/issue/OPS-7"),
            message("thanks"),
        ];

        assert_eq!(latest_ticket_reference(&thread).unwrap().identifier, "OPS-7");
    }

    #[test]
    fn transcript_labels_speakers() {
        let thread = vec![
            message("It crashes"),
            ChatMessage { user: Some("UBOT".into()), ..message("Filed ENG-1") },
            ChatMessage { text: Some(" ".into()), ..message("") },
        ];

        assert_eq!(format_transcript(&thread, "UBOT"), "<@U1>: It crashes\nbot: Filed ENG-1");
    }

    #[test]
    fn collects_image_urls_only() {
        let message = ChatMessage {
            files: vec![
                ChatFile {
                    id: "F1".into(),
                    mimetype: Some("image/png".into()),
                    url_private: Some("https://files/1.png".into()),
                    ..Default::default()
                },
                ChatFile {
                    id: "F2".into(),
                    mimetype: Some("application/pdf".into()),
                    url_private: Some("https://files/2.pdf".into()),
                    ..Default::default()
                },
            ],
            ..message("see attached")
        };

        assert_eq!(image_urls(&message), vec!["https://files/1.png".to_string()]);
    }
}
