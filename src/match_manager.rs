//! Event-bus worker that runs match requests in the background.
//!
//! Single-track runs and batches are executed on worker threads so the bus
//! loop stays responsive to `CancelBatch` and `RequestProgress`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use log::{debug, error, info, warn};
use tokio::sync::broadcast::{Receiver, Sender};

use crate::match_orchestrator::MatchOrchestrator;
use crate::protocol::{BatchSelection, MatchMessage, Message};

/// Clears the batch slot when the batch thread ends, including by panic.
struct BatchSlot(Arc<AtomicBool>);

impl Drop for BatchSlot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct MatchManager {
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    orchestrator: Arc<MatchOrchestrator>,
    batch_active: Arc<AtomicBool>,
}

impl MatchManager {
    pub fn new(
        bus_consumer: Receiver<Message>,
        bus_producer: Sender<Message>,
        orchestrator: Arc<MatchOrchestrator>,
    ) -> Self {
        Self {
            bus_consumer,
            bus_producer,
            orchestrator,
            batch_active: Arc::new(AtomicBool::new(false)),
        }
    }

    fn spawn_match(&self, track_id: i64) {
        let orchestrator = Arc::clone(&self.orchestrator);
        let bus_producer = self.bus_producer.clone();
        thread::spawn(move || {
            let run_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                orchestrator.run_match(track_id)
            }));
            let message = match run_result {
                Ok(Ok(outcome)) => MatchMessage::MatchFinished(outcome),
                Ok(Err(error)) => {
                    warn!("MatchManager: track {} failed: {}", track_id, error);
                    MatchMessage::MatchFailed {
                        track_id,
                        error: error.to_string(),
                    }
                }
                Err(_) => {
                    error!("MatchManager: match worker for track {} panicked", track_id);
                    MatchMessage::MatchFailed {
                        track_id,
                        error: "match worker panicked".to_string(),
                    }
                }
            };
            let _ = bus_producer.send(Message::Match(message));
        });
    }

    fn spawn_batch(&self, selection: BatchSelection) {
        // Claimed here, before the worker starts, so a second request cannot slip in.
        if self
            .batch_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("MatchManager: batch already running, request ignored");
            let _ = self.bus_producer.send(Message::Match(MatchMessage::Progress(
                self.orchestrator.status_snapshot(),
            )));
            return;
        }
        let slot = BatchSlot(Arc::clone(&self.batch_active));
        let orchestrator = Arc::clone(&self.orchestrator);
        let bus_producer = self.bus_producer.clone();
        thread::spawn(move || {
            let _slot = slot;
            let progress_producer = bus_producer.clone();
            let result = orchestrator.run_batch_with(selection, |progress| {
                let _ = progress_producer.send(Message::Match(MatchMessage::Progress(
                    progress.clone(),
                )));
            });
            match result {
                Ok(progress) => {
                    let _ = bus_producer.send(Message::Match(MatchMessage::BatchFinished(progress)));
                }
                Err(error) => {
                    warn!("MatchManager: batch could not start: {}", error);
                    let _ = bus_producer.send(Message::Match(MatchMessage::BatchFinished(
                        orchestrator.status_snapshot(),
                    )));
                }
            }
        });
    }

    fn handle_message(&mut self, message: MatchMessage) {
        match message {
            MatchMessage::RequestMatch { track_id } => {
                debug!("MatchManager: match requested for track {}", track_id);
                self.spawn_match(track_id);
            }
            MatchMessage::RequestBatch(selection) => {
                info!("MatchManager: batch requested ({:?})", selection);
                self.spawn_batch(selection);
            }
            MatchMessage::CancelBatch => {
                info!("MatchManager: cancelling batch");
                self.orchestrator.cancel_batch();
            }
            MatchMessage::RequestProgress => {
                let _ = self.bus_producer.send(Message::Match(MatchMessage::Progress(
                    self.orchestrator.status_snapshot(),
                )));
            }
            MatchMessage::MatchFinished(_)
            | MatchMessage::MatchFailed { .. }
            | MatchMessage::Progress(_)
            | MatchMessage::BatchFinished(_) => {}
        }
    }

    pub fn run(&mut self) {
        info!("MatchManager: started");
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(Message::Match(message)) => self.handle_message(message),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("MatchManager: bus lagged by {} messages", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
