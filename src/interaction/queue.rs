//! Single-flight FIFO queue in front of the dispatcher.
//!
//! One worker task owns the receiving end of an unbounded channel and handles
//! items strictly one at a time, in enqueue order, until every sender has been
//! dropped. A failing (or panicking) item is logged with its category and the
//! worker moves on to the next one.

use std::{panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::{
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    task::JoinHandle,
};
use tracing::{Instrument, debug, error, info, info_span};

use crate::base::{types::Void, work::WorkItem};

// Traits.

/// Handles one work item at a time.
#[async_trait]
pub trait WorkHandler: Send + Sync + 'static {
    async fn handle(&self, item: WorkItem) -> Void;
}

// Structs.

/// Sending side of the intake queue.
///
/// It is designed to be trivially cloneable; the worker exits once every clone is dropped.
#[derive(Clone)]
pub struct SequentialQueue {
    sender: UnboundedSender<WorkItem>,
}

impl SequentialQueue {
    /// Spawns the worker and returns the queue together with the worker's handle.
    pub fn spawn(handler: Arc<dyn WorkHandler>) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = unbounded_channel();
        let worker = tokio::spawn(drain(receiver, handler));

        (Self { sender }, worker)
    }

    /// Appends an item; never waits for it to be handled.
    pub fn enqueue(&self, item: WorkItem) -> Void {
        let category = item.category();

        self.sender.send(item).map_err(|_| anyhow::anyhow!("Intake queue is closed; dropped {} item", category))?;

        debug!("Queued {} item.", category);

        Ok(())
    }
}

/// The worker loop.
async fn drain(mut receiver: UnboundedReceiver<WorkItem>, handler: Arc<dyn WorkHandler>) {
    while let Some(item) = receiver.recv().await {
        let category = item.category();
        let ts = item.ts().to_string();
        let span = info_span!("work_item", %category, %ts);

        let result = AssertUnwindSafe(handler.handle(item)).catch_unwind().instrument(span).await;

        match result {
            Ok(Ok(())) => debug!("Handled {} item {}.", category, ts),
            Ok(Err(err)) => error!(%category, "Error while handling {} item {}: {:#}", category, ts, err),
            Err(_) => error!(%category, "Panic while handling {} item {}.", category, ts),
        }
    }

    info!("Intake queue closed.");
}

// Tests.

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use std::time::Duration;

    use crate::base::types::ChatMessage;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl WorkHandler for Recorder {
        async fn handle(&self, item: WorkItem) -> Void {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_millis(2)).await;
            self.seen.lock().unwrap().push(item.ts().to_string());

            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match item.ts() {
                "fail" => Err(anyhow::anyhow!("triager exploded")),
                "panic" => panic!("poison item"),
                _ => Ok(()),
            }
        }
    }

    fn item(ts: &str) -> WorkItem {
        WorkItem::New(ChatMessage {
            ts: ts.to_string(),
            channel: "C1".into(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn dispatches_in_order_one_at_a_time() {
        let recorder = Arc::new(Recorder::default());
        let (queue, worker) = SequentialQueue::spawn(recorder.clone());

        let expected: Vec<String> = (0..20).map(|i| format!("{i}.0")).collect();
        for ts in &expected {
            queue.enqueue(item(ts)).unwrap();
        }

        drop(queue);
        worker.await.unwrap();

        assert_eq!(*recorder.seen.lock().unwrap(), expected);
        assert_eq!(recorder.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_do_not_stall_the_queue() {
        let recorder = Arc::new(Recorder::default());
        let (queue, worker) = SequentialQueue::spawn(recorder.clone());

        for ts in ["1.0", "fail", "2.0", "panic", "3.0"] {
            queue.enqueue(item(ts)).unwrap();
        }

        drop(queue);
        worker.await.unwrap();

        assert_eq!(*recorder.seen.lock().unwrap(), vec!["1.0", "fail", "2.0", "panic", "3.0"]);
    }

    #[tokio::test]
    async fn enqueue_after_idle_restarts_processing() {
        let recorder = Arc::new(Recorder::default());
        let (queue, worker) = SequentialQueue::spawn(recorder.clone());

        queue.enqueue(item("1.0")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);

        queue.enqueue(item("2.0")).unwrap();
        drop(queue);
        worker.await.unwrap();

        assert_eq!(*recorder.seen.lock().unwrap(), vec!["1.0", "2.0"]);
    }
}
