//! Request/reply over mailboxes.
//!
//! `ask` creates a deferred, sends a message whose `reply_to` is that
//! deferred's url, and waits for it. The responder calls `respond` (or
//! `respond_error`) with the envelope it received, which settles the
//! deferred. Each ask mints its own url, so concurrent asks with identical
//! payloads never see each other's answers.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use swarm_core::ThreadId;
use swarm_store::EventStore;
use tracing::{debug, instrument};

use crate::deferred::{DeferredStore, Settlement};
use crate::errors::{DurableError, Result};
use crate::mailbox::{Envelope, Mailbox, SendOptions};

/// A question for another agent.
#[derive(Clone, Debug, PartialEq)]
pub struct AskRequest {
    /// Agent expected to answer.
    pub to: String,
    /// Question body.
    pub payload: Value,
    /// How long to wait for the answer.
    pub ttl_seconds: u64,
    /// Conversation id.
    pub thread_id: Option<ThreadId>,
}

impl AskRequest {
    /// Build a request without a thread.
    pub fn new(to: impl Into<String>, payload: Value, ttl_seconds: u64) -> Self {
        Self {
            to: to.into(),
            payload,
            ttl_seconds,
            thread_id: None,
        }
    }

    /// Attach a thread.
    #[must_use]
    pub fn thread(mut self, thread_id: ThreadId) -> Self {
        self.thread_id = Some(thread_id);
        self
    }
}

/// Issues asks and answers them.
#[derive(Clone, Debug)]
pub struct AskClient {
    deferreds: DeferredStore,
}

impl AskClient {
    /// Build on an existing deferred store.
    pub fn new(deferreds: DeferredStore) -> Self {
        Self { deferreds }
    }

    /// Deferred store used for replies.
    pub fn deferreds(&self) -> &DeferredStore {
        &self.deferreds
    }

    /// Ask `request.to` a question from `mailbox`'s agent and wait for the
    /// answer.
    ///
    /// Fails with [`DurableError::Timeout`] if nobody answers within
    /// `request.ttl_seconds`, or [`DurableError::Rejected`] if the responder
    /// declines.
    #[instrument(skip(self, mailbox, request), fields(from = %mailbox.agent(), to = %request.to))]
    pub async fn ask<T: DeserializeOwned>(&self, mailbox: &Mailbox, request: AskRequest) -> Result<T> {
        let pending = self.deferreds.create(request.ttl_seconds)?;
        let mut message = SendOptions::new(request.payload).reply_to(pending.url.clone());
        message.thread_id = request.thread_id;

        let sequence = mailbox.send(&request.to, message)?;
        debug!(sequence, url = %pending.url, "ask sent");
        pending.wait(&self.deferreds).await
    }

    /// Ask through a one-off mailbox for `agent` in `project_key`.
    pub async fn ask_with_mailbox<T: DeserializeOwned>(
        &self,
        events: &EventStore,
        agent: &str,
        project_key: &str,
        request: AskRequest,
    ) -> Result<T> {
        let mailbox = Mailbox::open(events.clone(), agent, project_key)?;
        self.ask(&mailbox, request).await
    }

    /// Answer the ask carried by `envelope`.
    ///
    /// The envelope must have come from [`AskClient::ask`]; one without a
    /// `reply_to` is a caller bug and yields [`DurableError::MissingReplyTo`].
    pub fn respond<P, V>(&self, envelope: &Envelope<P>, value: &V) -> Result<Settlement>
    where
        V: Serialize + ?Sized,
    {
        let url = envelope
            .reply_to
            .as_ref()
            .ok_or(DurableError::MissingReplyTo {
                sequence: envelope.sequence,
            })?;
        self.deferreds.resolve(url, value)
    }

    /// Decline the ask carried by `envelope`; the asker sees
    /// [`DurableError::Rejected`] with `reason`.
    pub fn respond_error<P>(&self, envelope: &Envelope<P>, reason: &str) -> Result<Settlement> {
        let url = envelope
            .reply_to
            .as_ref()
            .ok_or(DurableError::MissingReplyTo {
                sequence: envelope.sequence,
            })?;
        self.deferreds.reject(url, reason)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
