// SPDX-License-Identifier: MPL-2.0

//! Long-lived firehose consumer.
//!
//! One [`Subscription`] follows one upstream service: it resumes from the
//! stored cursor, applies each commit to the post store in stream order, and
//! writes the cursor back every [`CHECKPOINT_INTERVAL`] commits. Transport
//! failures lead to a delay and a fresh connection, forever, until shutdown
//! is signalled.

use crate::atproto::{Connector, FirehoseError, MessageStream, StreamMessage, decode_commit};
use crate::community::CommunityMembers;
use crate::config::CHECKPOINT_INTERVAL;
use crate::db::{Database, DbError, now_indexed_at};
use crate::indexer::apply::apply_ops;
use crate::indexer::classify::classify;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug)]
pub enum SubscriptionError {
    #[error(transparent)]
    Firehose(#[from] FirehoseError),
    #[error("failed to load cursor: {0}")]
    Cursor(#[from] DbError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Disconnected,
    Connecting,
    Streaming,
    Reconnecting,
}

enum StreamEnd {
    /// Upstream closed the stream without an error
    Closed,
    Shutdown,
}

pub struct Subscription<C: Connector> {
    /// Identifies the upstream in `sub_state`
    service: String,
    connector: C,
    db: Database,
    members: Arc<CommunityMembers>,
    reconnect_delay: Duration,
    state: RunnerState,
    /// Commit events handled since start
    processed: u64,
    last_seq: Option<i64>,
    checkpointed: Option<i64>,
}

impl<C: Connector> Subscription<C> {
    pub fn new(
        service: &str,
        connector: C,
        db: Database,
        members: Arc<CommunityMembers>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            service: service.to_string(),
            connector,
            db,
            members,
            reconnect_delay,
            state: RunnerState::Disconnected,
            processed: 0,
            last_seq: None,
            checkpointed: None,
        }
    }

    /// Consume the stream until `shutdown` flips to true (or its sender is dropped).
    ///
    /// The event in flight when shutdown arrives is finished and a final
    /// checkpoint is written before returning.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_connection(&mut shutdown).await {
                Ok(StreamEnd::Shutdown) => break,
                Ok(StreamEnd::Closed) => {
                    tracing::warn!(service = %self.service, "firehose stream closed");
                }
                Err(e) => {
                    tracing::warn!(service = %self.service, error = %e, "firehose stream failed");
                }
            }

            // Resume exactly where processing stopped on the next connect
            self.flush_checkpoint().await;
            self.transition(RunnerState::Reconnecting);

            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.flush_checkpoint().await;
        self.transition(RunnerState::Disconnected);
        tracing::info!(service = %self.service, last_seq = ?self.last_seq, "subscription stopped");
    }

    async fn run_connection(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<StreamEnd, SubscriptionError> {
        self.transition(RunnerState::Connecting);

        let cursor = self.db.get_cursor(&self.service).await?;
        let mut stream = self.connector.connect(cursor).await?;
        tracing::info!(service = %self.service, ?cursor, "subscribed");
        self.transition(RunnerState::Streaming);

        loop {
            let next = tokio::select! {
                next = stream.next_message() => next?,
                _ = shutdown.changed() => return Ok(StreamEnd::Shutdown),
            };
            let Some(message) = next else {
                return Ok(StreamEnd::Closed);
            };
            self.handle_message(message).await;
        }
    }

    /// Process one message to completion. Failures are logged, never returned.
    pub async fn handle_message(&mut self, message: StreamMessage) {
        match message {
            StreamMessage::Commit(commit) => {
                let seq = commit.seq;
                let ops = classify(decode_commit(&commit));

                if !ops.posts.is_empty() {
                    match apply_ops(&self.db, &self.members, &ops, &now_indexed_at()).await {
                        Ok(stats) if stats.inserted > 0 || stats.deleted > 0 => {
                            tracing::debug!(
                                seq,
                                repo = %commit.repo,
                                inserted = stats.inserted,
                                deleted = stats.deleted,
                                "applied commit"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(seq, repo = %commit.repo, error = %e, "failed to apply commit");
                        }
                    }
                }

                self.advance(seq).await;
            }
            StreamMessage::Malformed { t, seq, error } => {
                tracing::warn!(message_type = %t, ?seq, %error, "skipping undecodable event");
                if t == "#commit"
                    && let Some(seq) = seq
                {
                    self.advance(seq).await;
                }
            }
            StreamMessage::Info { name, message } => {
                tracing::warn!(service = %self.service, %name, ?message, "firehose info");
            }
            StreamMessage::Unknown(t) => {
                tracing::debug!(message_type = %t, "ignoring unknown message type");
            }
            other => {
                tracing::trace!(seq = ?other.seq(), "ignoring non-commit event");
            }
        }
    }

    /// Count a finished commit event and checkpoint on the interval.
    async fn advance(&mut self, seq: i64) {
        self.last_seq = Some(seq);
        self.processed += 1;
        if self.processed % CHECKPOINT_INTERVAL == 0 {
            self.checkpoint(seq).await;
        }
    }

    /// Persist `seq` as the resume point. Best-effort.
    async fn checkpoint(&mut self, seq: i64) {
        match self.db.upsert_cursor(&self.service, seq).await {
            Ok(()) => {
                self.checkpointed = Some(seq);
                tracing::debug!(service = %self.service, seq, "checkpointed cursor");
            }
            Err(e) => {
                tracing::warn!(service = %self.service, seq, error = %e, "failed to checkpoint cursor");
            }
        }
    }

    async fn flush_checkpoint(&mut self) {
        if let Some(seq) = self.last_seq
            && self.checkpointed != Some(seq)
        {
            self.checkpoint(seq).await;
        }
    }

    fn transition(&mut self, next: RunnerState) {
        if self.state != next {
            tracing::info!(service = %self.service, from = ?self.state, to = ?next, "subscription state");
            self.state = next;
        }
    }
}
