//! Interaction session: a background task that runs turns in order.
//!
//! Front ends (a text prompt, a voice loop) push utterances into the
//! session and read replies back. Turns from one session never overlap.
//! Shutdown is signalled through a `watch` channel and takes effect
//! between turns.

use crate::orchestrator::{Orchestrator, TurnOptions};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const CHANNEL_CAPACITY: usize = 32;

/// Outcome of one session turn.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionReply {
    Response { input: String, reply: String },
    Failed { input: String, error: String },
}

#[derive(Debug, thiserror::Error)]
#[error("session is closed")]
pub struct SessionClosed;

pub struct Session {
    utterances: mpsc::Sender<String>,
    replies: mpsc::Receiver<SessionReply>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Session {
    /// Start the loop on the current runtime.
    pub fn spawn(orchestrator: Arc<Orchestrator>, options: TurnOptions) -> Self {
        let (utterance_tx, utterance_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (reply_tx, reply_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run_loop(
            orchestrator,
            options,
            utterance_rx,
            reply_tx,
            shutdown_rx,
        ));

        Self {
            utterances: utterance_tx,
            replies: reply_rx,
            shutdown: shutdown_tx,
            handle,
        }
    }

    /// Queue an utterance for the next turn.
    pub async fn say(&self, utterance: impl Into<String>) -> Result<(), SessionClosed> {
        self.utterances
            .send(utterance.into())
            .await
            .map_err(|_| SessionClosed)
    }

    /// Wait for the next reply. `None` once the loop has stopped.
    pub async fn next_reply(&mut self) -> Option<SessionReply> {
        self.replies.recv().await
    }

    /// Stop the loop and wait for it to exit. A turn in progress finishes first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Session task ended abnormally");
        }
    }
}

async fn run_loop(
    orchestrator: Arc<Orchestrator>,
    options: TurnOptions,
    mut utterances: mpsc::Receiver<String>,
    replies: mpsc::Sender<SessionReply>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Session started");
    loop {
        let input = tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            next = utterances.recv() => match next {
                Some(input) => input,
                None => break,
            },
        };

        let input = input.trim().to_string();
        if input.is_empty() {
            debug!("Skipping empty utterance");
            continue;
        }

        let reply = match orchestrator.think(&input, &options).await {
            Ok(reply) => SessionReply::Response { input, reply },
            Err(e) => SessionReply::Failed {
                input,
                error: e.to_string(),
            },
        };

        if replies.send(reply).await.is_err() {
            debug!("Reply receiver dropped");
            break;
        }
    }
    info!("Session stopped");
}
