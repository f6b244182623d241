//! Routes each work item to its triager entry point and folds verdicts back
//! into the correlation store.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::{
    base::{
        types::{ChatMessage, MessageOutcome, ThreadOutcome, TriageAction, Void},
        work::{DeferredFollowup, DirectCommand, MessageDeleted, MessageEdited, OrphanThread, ThreadReply, WorkItem},
    },
    service::{
        chat::ChatClient,
        triager::{FollowupAction, OrphanAction, TriageInput, TriagerClient},
    },
    state::CorrelationStore,
};

use super::{
    filter::{format_transcript, image_urls, latest_ticket_reference, message_text, normalize_text},
    queue::WorkHandler,
};

/// Dispatches work items to the triager.
#[derive(Clone)]
pub struct Dispatcher {
    chat: ChatClient,
    triager: TriagerClient,
    store: CorrelationStore,
    bot_user_id: String,
    marker_reaction: String,
}

impl Dispatcher {
    pub fn new(chat: ChatClient, triager: TriagerClient, store: CorrelationStore, bot_user_id: impl Into<String>, marker_reaction: impl Into<String>) -> Self {
        Self {
            chat,
            triager,
            store,
            bot_user_id: bot_user_id.into(),
            marker_reaction: marker_reaction.into(),
        }
    }

    /// Handles one work item.
    pub async fn dispatch(&self, item: WorkItem) -> Void {
        match item {
            WorkItem::New(message) => self.handle_new(message).await,
            WorkItem::ThreadReply(reply) => self.handle_thread_reply(reply).await,
            WorkItem::OrphanThread(orphan) => self.handle_orphan_thread(orphan).await,
            WorkItem::DeferredFollowup(followup) => self.handle_deferred_followup(followup).await,
            WorkItem::DirectCommand(command) => self.handle_direct_command(command).await,
            WorkItem::MessageEdited(edit) => self.handle_message_edited(edit).await,
            WorkItem::MessageDeleted(delete) => self.handle_message_deleted(delete).await,
        }
    }

    #[instrument(skip_all)]
    async fn handle_new(&self, message: ChatMessage) -> Void {
        let text = message_text(&message);
        let input = TriageInput::from_message(&message, text.clone(), image_urls(&message));

        let verdict = match self.triager.triage_new_message(&input).await {
            Ok(verdict) => verdict,
            Err(err) => {
                self.store.set_message(&message.ts, MessageOutcome::new(TriageAction::Error, None, Utc::now()));
                return Err(err);
            }
        };

        info!("Triaged message {} as {:?}.", message.ts, verdict.action);

        let now = Utc::now();
        let ticket = verdict.ticket();
        let reporter = message.user.clone();

        match (verdict.action, ticket.as_ref()) {
            (TriageAction::Created | TriageAction::Duplicate, Some(ticket)) => {
                let is_duplicate = verdict.action == TriageAction::Duplicate;
                self.store.set_thread(&message.ts, ThreadOutcome::ticketed(ticket, is_duplicate, reporter, now));
            }
            (TriageAction::Created | TriageAction::Duplicate, None) => {
                warn!("Triager reported {:?} for {} without a ticket reference.", verdict.action, message.ts);
            }
            (TriageAction::Deferred, _) => {
                self.store.set_thread(&message.ts, ThreadOutcome::deferred(text, reporter, now));
            }
            (TriageAction::Skipped | TriageAction::Error, _) => {}
        }

        self.store.set_message(&message.ts, MessageOutcome::new(verdict.action, ticket.as_ref(), now));

        // Leave the watermark for the next startup scan.
        if let Err(err) = self.chat.add_reaction(&message.channel, &message.ts, &self.marker_reaction).await {
            warn!("Failed to mark message {} as handled: {}", message.ts, err);
        }

        Ok(())
    }

    #[instrument(skip_all)]
    async fn handle_thread_reply(&self, reply: ThreadReply) -> Void {
        let thread = self.chat.fetch_thread(&reply.message.channel, &reply.thread_ts).await?;

        // A human may have relinked the thread since the outcome was cached.
        let ticket = match latest_ticket_reference(&thread) {
            Some(found) if found.identifier != reply.ticket.identifier => {
                info!("Thread {} now references {} instead of {}.", reply.thread_ts, found.identifier, reply.ticket.identifier);
                found
            }
            _ => reply.ticket,
        };

        let mut input = self.thread_input(&reply.message, &reply.thread_ts, &thread);
        input.ticket = Some(ticket);
        input.is_duplicate = Some(reply.is_duplicate);
        input.same_reporter = Some(reply.same_reporter);

        let verdict = self.triager.triage_thread_reply(&input).await?;
        debug!("Thread reply {} handled: {:?}.", reply.message.ts, verdict.action);

        Ok(())
    }

    #[instrument(skip_all)]
    async fn handle_orphan_thread(&self, orphan: OrphanThread) -> Void {
        let thread = self.chat.fetch_thread(&orphan.message.channel, &orphan.thread_ts).await?;
        let input = self.thread_input(&orphan.message, &orphan.thread_ts, &thread);

        let verdict = self.triager.triage_orphan_thread(&input).await?;
        info!("Orphan thread {} handled: {:?}.", orphan.thread_ts, verdict.action);

        if let (OrphanAction::Created | OrphanAction::Updated, Some(ticket)) = (verdict.action, verdict.ticket()) {
            let is_duplicate = verdict.action == OrphanAction::Updated;
            let reporter = thread.first().and_then(|root| root.user.clone()).or(orphan.message.user.clone());

            self.store.set_thread(&orphan.thread_ts, ThreadOutcome::ticketed(&ticket, is_duplicate, reporter, Utc::now()));
        }

        Ok(())
    }

    #[instrument(skip_all)]
    async fn handle_deferred_followup(&self, followup: DeferredFollowup) -> Void {
        let thread = self.chat.fetch_thread(&followup.message.channel, &followup.thread_ts).await?;

        let mut input = self.thread_input(&followup.message, &followup.thread_ts, &thread);
        input.original_context = Some(followup.original_context.clone());
        input.same_reporter = Some(followup.original_reporter_id.as_deref().is_some_and(|r| r == followup.message.user_id()));

        let verdict = self.triager.triage_deferred_followup(&input).await?;
        info!("Deferred thread {} follow-up: {:?}.", followup.thread_ts, verdict.action);

        if let (FollowupAction::Created, Some(ticket)) = (verdict.action, verdict.ticket())
            && !self.store.upgrade_deferred(&followup.thread_ts, &ticket)
        {
            warn!("Deferred entry for {} expired before {} was created.", followup.thread_ts, ticket.identifier);
        }

        Ok(())
    }

    #[instrument(skip_all)]
    async fn handle_direct_command(&self, command: DirectCommand) -> Void {
        let message = &command.message;

        let mut input = if message.is_thread_reply() {
            let thread = self.chat.fetch_thread(&message.channel, message.thread_key()).await?;
            self.thread_input(message, message.thread_key(), &thread)
        } else {
            TriageInput::from_message(message, message_text(message), image_urls(message))
        };
        input.ticket = command.ticket;

        let verdict = self.triager.handle_direct_command(&input).await?;
        debug!("Command {} handled: {:?}.", message.ts, verdict.action);

        Ok(())
    }

    #[instrument(skip_all)]
    async fn handle_message_edited(&self, edit: MessageEdited) -> Void {
        let Some(outcome) = self.store.message(&edit.ts).filter(|o| o.was_triaged) else {
            debug!("Ignoring edit of untracked message {}.", edit.ts);
            return Ok(());
        };

        if normalize_text(&edit.previous_text) == normalize_text(&edit.text) {
            debug!("Ignoring whitespace-only edit of {}.", edit.ts);
            return Ok(());
        }

        let input = TriageInput {
            user_id: edit.user.unwrap_or_default(),
            channel_id: edit.channel,
            message_ts: edit.ts,
            thread_ts: edit.thread_ts,
            text: edit.text,
            ticket: outcome.ticket(),
            previous_text: Some(edit.previous_text),
            previous_action: Some(outcome.action),
            ..Default::default()
        };

        let verdict = self.triager.handle_message_edit(&input).await?;
        info!("Edit of {} handled: {:?}.", input.message_ts, verdict.action);

        Ok(())
    }

    #[instrument(skip_all)]
    async fn handle_message_deleted(&self, delete: MessageDeleted) -> Void {
        let Some(outcome) = self.store.message(&delete.ts).filter(|o| o.was_triaged) else {
            debug!("Ignoring deletion of untracked message {}.", delete.ts);
            return Ok(());
        };

        let input = TriageInput {
            channel_id: delete.channel.clone(),
            message_ts: delete.ts.clone(),
            thread_ts: delete.thread_ts.clone(),
            ticket: outcome.ticket(),
            previous_action: Some(outcome.action),
            ..Default::default()
        };

        let verdict = self.triager.handle_message_delete(&input).await?;
        info!("Deletion of {} handled: {:?}.", delete.ts, verdict.action);

        // A top-level message is its own thread root.
        let thread_ts = delete.thread_ts.as_deref().unwrap_or(&delete.ts);

        self.store.delete_message(&delete.ts);
        self.store.delete_thread(thread_ts);

        Ok(())
    }

    /// Common input for thread-shaped categories.
    fn thread_input(&self, message: &ChatMessage, thread_ts: &str, thread: &[ChatMessage]) -> TriageInput {
        let mut input = TriageInput::from_message(message, message_text(message), image_urls(message));
        input.thread_ts = Some(thread_ts.to_string());
        input.transcript = Some(format_transcript(thread, &self.bot_user_id));
        input
    }
}

#[async_trait]
impl WorkHandler for Dispatcher {
    async fn handle(&self, item: WorkItem) -> Void {
        self.dispatch(item).await
    }
}

