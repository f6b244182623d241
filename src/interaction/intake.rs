//! The live intake loop: filter, classify, enqueue.

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, instrument};

use crate::{base::types::ChatEvent, state::CorrelationStore};

use super::{classifier::EventClassifier, filter::IngestFilter, queue::SequentialQueue};

/// Everything the intake loop needs to turn events into queued work.
#[derive(Clone)]
pub struct Intake {
    pub filter: IngestFilter,
    pub classifier: EventClassifier,
    pub store: CorrelationStore,
    pub queue: SequentialQueue,
}

impl Intake {
    /// Filters, classifies and enqueues a single event.
    ///
    /// Returns whether a work item was queued.
    pub fn accept(&self, event: ChatEvent) -> bool {
        if event.channel() != self.filter.channel_id() {
            debug!("Ignoring event from channel {}.", event.channel());
            return false;
        }

        if let ChatEvent::Message(message) = &event
            && !self.filter.admits(message)
        {
            debug!("Ignoring message {}.", message.ts);
            return false;
        }

        let Some(item) = self.classifier.classify(event, &self.store) else {
            return false;
        };

        match self.queue.enqueue(item) {
            Ok(()) => true,
            Err(err) => {
                error!("{}", err);
                false
            }
        }
    }

    /// Runs until the event source closes.
    #[instrument(name = "Intake::run", skip_all)]
    pub async fn run(self, mut events: UnboundedReceiver<ChatEvent>) {
        while let Some(event) = events.recv().await {
            self.accept(event);
        }

        debug!("Event source closed.");
    }
}
