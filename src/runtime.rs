//! Runtime services and shared state for the intake-bot.

use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc::unbounded_channel;
use tracing::{error, info, instrument, warn};

use crate::{
    base::{
        config::Config,
        types::{Res, Void},
    },
    interaction::{
        classifier::EventClassifier, dispatcher::Dispatcher, filter::IngestFilter, intake::Intake, queue::SequentialQueue, recovery::RecoveryScanner,
    },
    service::{
        chat::{ChatClient, EventSender},
        tracker::TrackerClient,
        triager::TriagerClient,
    },
    state::CorrelationStore,
};

/// Delay before restarting the listener after a transient disconnect.
const LISTENER_RESTART_DELAY: Duration = Duration::from_secs(5);

/// Error signatures of realtime disconnects that are worth reconnecting after.
const TRANSIENT_DISCONNECT_SIGNATURES: &[&str] = &["connection reset", "connection closed", "broken pipe", "unexpected eof", "socket disconnected"];

/// Runtime service context that can be shared across the application.
///
/// This struct holds the chat, triager and tracker clients, the correlation
/// store, and configuration. It is designed to be trivially cloneable.
#[derive(Clone)]
pub struct Runtime {
    /// The configuration for the application.
    pub config: Config,
    /// The chat client instance.
    pub chat: ChatClient,
    /// The triager client instance.
    pub triager: TriagerClient,
    /// The tracker client instance.
    pub tracker: TrackerClient,
    /// The in-memory correlation state.
    pub store: CorrelationStore,
}

impl Runtime {
    /// Create a new runtime instance.
    #[instrument(skip_all)]
    pub async fn new(config: Config) -> Res<Self> {
        // Initialize the tracker client.
        let tracker = TrackerClient::linear(&config)?;

        // Initialize the triager client.
        let triager = TriagerClient::http(&config)?;

        // Initialize the slack client.
        let chat = ChatClient::slack(&config).await?;

        let store = CorrelationStore::from_config(&config)?;

        Ok(Self {
            config,
            chat,
            triager,
            tracker,
            store,
        })
    }

    /// Run until a shutdown signal arrives or the listener fails.
    ///
    /// Items still queued at shutdown are dropped; the next startup scan picks
    /// them up again from channel history.
    pub async fn start(&self) -> Void {
        // The triager cannot do anything useful without the tracker.

        self.tracker
            .connect(self.config.tracker_connect_attempts, Duration::from_millis(self.config.tracker_connect_base_delay_ms))
            .await?;

        // Spin up the single-flight queue.

        let filter = IngestFilter::new(self.config.channel_id.clone());
        let dispatcher = Dispatcher::new(
            self.chat.clone(),
            self.triager.clone(),
            self.store.clone(),
            self.chat.bot_user_id(),
            self.config.marker_reaction.clone(),
        );
        let (queue, worker) = SequentialQueue::spawn(Arc::new(dispatcher));

        // Subscribe before scanning history; live events buffer in the channel meanwhile.

        let (sender, receiver) = unbounded_channel();
        let sender = EventSender::new(sender);

        let runtime = self.clone();
        let listener_sender = sender.clone();
        let mut listener = tokio::spawn(async move { runtime.listen(listener_sender).await });

        let connected = tokio::select! {
            _ = sender.connected() => true,
            joined = &mut listener => {
                worker.abort();
                return flatten_listener(joined);
            }
            _ = shutdown_signal() => false,
        };

        if !connected {
            info!("Shutdown signal received before the listener connected.");
            listener.abort();
            worker.abort();
            return Ok(());
        }

        // Queue whatever was missed while we were down.

        if let Err(err) = self.recover_into(&filter, &queue).await {
            listener.abort();
            worker.abort();
            return Err(err);
        }

        // Start the live intake; anything the scan already queued is deduplicated.

        let intake = Intake {
            filter,
            classifier: EventClassifier::new(self.chat.bot_user_id()),
            store: self.store.clone(),
            queue,
        };
        let intake_task = tokio::spawn(intake.run(receiver));

        let result = tokio::select! {
            joined = &mut listener => flatten_listener(joined),
            _ = shutdown_signal() => {
                info!("Shutdown signal received.");
                Ok(())
            }
        };

        listener.abort();
        intake_task.abort();
        worker.abort();

        if let Err(err) = &result {
            error!("Chat listener failed: {:#}", err);
        }

        result
    }

    /// Runs the startup scan and queues what it finds; a failed scan is logged.
    async fn recover_into(&self, filter: &IngestFilter, queue: &SequentialQueue) -> Void {
        let items = match RecoveryScanner::from_config(&self.config, self.chat.clone(), filter.clone(), self.store.clone()) {
            Ok(scanner) => scanner.recover().await,
            Err(err) => Err(err),
        };

        match items {
            Ok(items) => {
                for item in items {
                    queue.enqueue(item)?;
                }
            }
            Err(err) => warn!("Recovery scan failed; continuing with live events only: {:#}", err),
        }

        Ok(())
    }

    /// Runs the chat listener, restarting it after transient disconnects.
    async fn listen(&self, events: EventSender) -> Void {
        loop {
            match self.chat.start(events.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) if is_transient_disconnect(&err) => {
                    warn!("Chat listener disconnected, restarting in {:?}: {:#}", LISTENER_RESTART_DELAY, err);
                    tokio::time::sleep(LISTENER_RESTART_DELAY).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Collapses a finished listener task into its result.
fn flatten_listener(joined: Result<Void, tokio::task::JoinError>) -> Void {
    joined.map_err(|err| anyhow::anyhow!("Chat listener task failed: {err}"))?
}

/// Whether an error matches a known transient realtime disconnect.
pub fn is_transient_disconnect(err: &anyhow::Error) -> bool {
    let text = format!("{err:#}").to_lowercase();
    TRANSIENT_DISCONNECT_SIGNATURES.iter().any(|signature| text.contains(signature))
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_transient_disconnects() {
        let err = anyhow::anyhow!("IO error: Connection reset by peer (os error 104)");
        assert!(is_transient_disconnect(&err));

        let wrapped = anyhow::anyhow!("Broken pipe").context("socket mode session ended");
        assert!(is_transient_disconnect(&wrapped));
    }

    #[test]
    fn other_errors_are_fatal() {
        let err = anyhow::anyhow!("invalid_auth");
        assert!(!is_transient_disconnect(&err));
    }
}
