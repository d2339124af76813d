//! Per-agent mailboxes.
//!
//! A message is an event of type [`MESSAGE_EVENT_TYPE`] in the project's log
//! whose `to` field names the recipient. An agent's mailbox is a
//! [`DurableCursor`] over that log with checkpoint `mailbox:<agent>`,
//! filtered to messages addressed to it. Because the underlying log is
//! strictly ordered, each recipient sees its messages in send order.
//!
//! Delivery is at-least-once: a message comes back on the next `receive`
//! until its envelope is committed, so handlers should be idempotent.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use swarm_core::{DeferredUrl, ThreadId};
use swarm_settings::MailboxSettings;
use swarm_store::errors::require_non_empty;
use swarm_store::{EventStore, MESSAGE_EVENT_TYPE, NewEvent};
use tracing::{debug, instrument};

use crate::cursor::{Ack, Consume, CursorFilter, Delivery, DurableCursor};
use crate::errors::{DurableError, Result};

/// Checkpoint name for `agent`'s mailbox cursor.
pub fn checkpoint_name(agent: &str) -> String {
    format!("mailbox:{agent}")
}

/// Stored body of a message event.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageBody {
    from: String,
    to: String,
    payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reply_to: Option<DeferredUrl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thread_id: Option<ThreadId>,
}

/// What to send.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SendOptions {
    /// Message body.
    pub payload: Value,
    /// Deferred the recipient should settle with its answer.
    pub reply_to: Option<DeferredUrl>,
    /// Conversation this message belongs to.
    pub thread_id: Option<ThreadId>,
}

impl SendOptions {
    /// A plain message.
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            ..Self::default()
        }
    }

    /// Attach a reply address.
    #[must_use]
    pub fn reply_to(mut self, url: DeferredUrl) -> Self {
        self.reply_to = Some(url);
        self
    }

    /// Attach a thread.
    #[must_use]
    pub fn thread(mut self, thread_id: ThreadId) -> Self {
        self.thread_id = Some(thread_id);
        self
    }
}

/// A received message.
#[derive(Clone, Debug)]
pub struct Envelope<T> {
    /// Sequence of the message event.
    pub sequence: i64,
    /// Sending agent.
    pub sender: String,
    /// Receiving agent.
    pub recipient: String,
    /// Decoded body.
    pub payload: T,
    /// Deferred to settle with the answer, if the sender is asking.
    pub reply_to: Option<DeferredUrl>,
    /// Conversation id.
    pub thread_id: Option<ThreadId>,
    /// When the message was appended (RFC 3339).
    pub sent_at: String,
    ack: Ack,
}

impl<T> Envelope<T> {
    /// Mark this message (and everything before it) as handled.
    pub fn commit(&self) -> Result<i64> {
        self.ack.commit()
    }

    /// Acknowledgment handle, detachable from the envelope.
    pub fn ack(&self) -> &Ack {
        &self.ack
    }
}

impl<T: DeserializeOwned> TryFrom<Delivery> for Envelope<T> {
    type Error = DurableError;

    fn try_from(delivery: Delivery) -> Result<Self> {
        let Delivery { event, ack } = delivery;
        let sequence = event.sequence;
        let bad = |e: serde_json::Error| DurableError::BadEnvelope {
            sequence,
            detail: e.to_string(),
        };
        let body: MessageBody = serde_json::from_value(event.payload).map_err(bad)?;
        let payload = serde_json::from_value(body.payload).map_err(bad)?;
        Ok(Self {
            sequence,
            sender: body.from,
            recipient: body.to,
            payload,
            reply_to: body.reply_to,
            thread_id: body.thread_id,
            sent_at: event.timestamp,
            ack,
        })
    }
}

/// One agent's view of a project's messages.
#[derive(Clone, Debug)]
pub struct Mailbox {
    agent: String,
    project_key: String,
    events: EventStore,
    cursor: DurableCursor,
    batch_size: usize,
}

impl Mailbox {
    /// Open `agent`'s mailbox in `project_key`.
    #[instrument(skip(events))]
    pub fn open(events: EventStore, agent: &str, project_key: &str) -> Result<Self> {
        require_non_empty("agent", agent)?;
        require_non_empty("project_key", project_key)?;

        let filter = CursorFilter {
            types: Some(vec![MESSAGE_EVENT_TYPE.to_string()]),
            recipient: Some(agent.to_string()),
        };
        let cursor =
            DurableCursor::open_filtered(events.clone(), project_key, &checkpoint_name(agent), filter)?;

        Ok(Self {
            agent: agent.to_string(),
            project_key: project_key.to_string(),
            events,
            cursor,
            batch_size: MailboxSettings::default().batch_size as usize,
        })
    }

    /// Fetch size used by [`Mailbox::receive`].
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Owning agent.
    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Project scope.
    pub fn project_key(&self) -> &str {
        &self.project_key
    }

    /// Send a message from this mailbox's agent to `to`.
    ///
    /// Returns the message's sequence.
    #[instrument(skip(self, message), fields(from = %self.agent))]
    pub fn send(&self, to: &str, message: SendOptions) -> Result<i64> {
        require_non_empty("recipient", to)?;
        let body = MessageBody {
            from: self.agent.clone(),
            to: to.to_string(),
            payload: message.payload,
            reply_to: message.reply_to,
            thread_id: message.thread_id,
        };
        let event = NewEvent::new(MESSAGE_EVENT_TYPE, serde_json::to_value(&body)?);
        let sequence = self.events.append(&self.project_key, &event)?;
        debug!(sequence, "message sent");
        Ok(sequence)
    }

    /// Messages addressed to this agent that have not been committed.
    pub fn receive<T: DeserializeOwned>(&self) -> Result<Receive<T>> {
        self.receive_batch(self.batch_size)
    }

    /// Like [`Mailbox::receive`] with an explicit fetch size.
    pub fn receive_batch<T: DeserializeOwned>(&self, batch_size: usize) -> Result<Receive<T>> {
        Ok(Receive {
            inner: self.cursor.consume(batch_size, None)?,
            _payload: PhantomData,
        })
    }

    /// Next uncommitted message, without advancing.
    pub fn peek<T: DeserializeOwned>(&self) -> Result<Option<Envelope<T>>> {
        self.receive_batch(1)?.next().transpose()
    }

    /// Last committed sequence.
    pub fn position(&self) -> Result<i64> {
        self.cursor.position()
    }

    /// Commit up to `sequence` directly, e.g. to step over a
    /// [`DurableError::BadEnvelope`].
    pub fn commit(&self, sequence: i64) -> Result<i64> {
        self.cursor.commit(sequence)
    }
}

/// Lazy, finite iterator of envelopes.
#[derive(Debug)]
pub struct Receive<T> {
    inner: Consume,
    _payload: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Iterator for Receive<T> {
    type Item = Result<Envelope<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let delivery = self.inner.next()?;
        Some(delivery.and_then(Envelope::try_from))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use swarm_store::{ConnectionConfig, Database, ReadOptions};

    fn events() -> EventStore {
        EventStore::new(Database::in_memory(&ConnectionConfig::default()).unwrap())
    }

    fn payloads(mailbox: &Mailbox) -> Vec<Value> {
        mailbox
            .receive::<Value>()
            .unwrap()
            .map(|e| e.unwrap().payload)
            .collect()
    }

    #[test]
    fn recipients_are_isolated_and_ordered() {
        let events = events();
        let sender = Mailbox::open(events.clone(), "lead", "proj").unwrap();
        let a = Mailbox::open(events.clone(), "a", "proj").unwrap();
        let b = Mailbox::open(events, "b", "proj").unwrap();

        for (to, n) in [("a", 1), ("b", 2), ("a", 3), ("b", 4), ("a", 5)] {
            let _ = sender.send(to, SendOptions::new(json!(n))).unwrap();
        }
        assert_eq!(payloads(&a), vec![json!(1), json!(3), json!(5)]);
        assert_eq!(payloads(&b), vec![json!(2), json!(4)]);
    }

    #[test]
    fn uncommitted_messages_are_redelivered() {
        let events = events();
        let a = Mailbox::open(events.clone(), "a", "proj").unwrap();
        let _ = a.send("a", SendOptions::new(json!("self"))).unwrap();

        assert_eq!(payloads(&a).len(), 1);
        let envelope = a.receive::<String>().unwrap().next().unwrap().unwrap();
        assert_eq!(envelope.payload, "self");
        let _ = envelope.commit().unwrap();
        assert!(payloads(&a).is_empty());
        assert_eq!(a.position().unwrap(), envelope.sequence);
    }

    #[test]
    fn peek_does_not_advance() {
        let events = events();
        let sender = Mailbox::open(events.clone(), "s", "proj").unwrap();
        let r = Mailbox::open(events, "r", "proj").unwrap();
        assert!(r.peek::<Value>().unwrap().is_none());

        let _ = sender.send("r", SendOptions::new(json!({"k": 1}))).unwrap();
        let first = r.peek::<Value>().unwrap().unwrap();
        let again = r.peek::<Value>().unwrap().unwrap();
        assert_eq!(first.sequence, again.sequence);
        assert_eq!(first.sender, "s");
        assert_eq!(first.recipient, "r");
        assert_eq!(r.position().unwrap(), 0);
    }

    #[test]
    fn envelope_carries_reply_and_thread() {
        let events = events();
        let sender = Mailbox::open(events.clone(), "s", "proj").unwrap();
        let r = Mailbox::open(events.clone(), "r", "proj").unwrap();
        let url = DeferredUrl::new();
        let thread = ThreadId::new();
        let _ = sender
            .send(
                "r",
                SendOptions::new(json!(null)).reply_to(url.clone()).thread(thread.clone()),
            )
            .unwrap();

        let envelope = r.peek::<Value>().unwrap().unwrap();
        assert_eq!(envelope.reply_to, Some(url));
        assert_eq!(envelope.thread_id, Some(thread));
        assert!(envelope.sent_at.ends_with('Z'));

        let raw = events.read("proj", &ReadOptions::default()).unwrap();
        assert!(raw[0].payload.get("replyTo").is_some());
        assert_eq!(raw[0].recipient.as_deref(), Some("r"));
    }

    #[test]
    fn mailboxes_are_scoped_by_project() {
        let events = events();
        let p1 = Mailbox::open(events.clone(), "a", "p1").unwrap();
        let p2 = Mailbox::open(events, "a", "p2").unwrap();
        let _ = p1.send("a", SendOptions::new(json!(1))).unwrap();
        assert!(payloads(&p2).is_empty());
        assert_eq!(payloads(&p1).len(), 1);
    }

    #[test]
    fn wrong_payload_type_is_bad_envelope() {
        let events = events();
        let r = Mailbox::open(events, "r", "proj").unwrap();
        let seq = r.send("r", SendOptions::new(json!("text"))).unwrap();
        let result = r.receive::<u32>().unwrap().next().unwrap();
        assert_matches!(result, Err(DurableError::BadEnvelope { sequence, .. }) if sequence == seq);

        let _ = r.commit(seq).unwrap();
        assert!(r.receive::<u32>().unwrap().next().is_none());
    }

    #[test]
    fn small_batches_still_drain_everything() {
        let events = events();
        let r = Mailbox::open(events, "r", "proj").unwrap().with_batch_size(2);
        for n in 0..5 {
            let _ = r.send("r", SendOptions::new(json!(n))).unwrap();
        }
        assert_eq!(payloads(&r).len(), 5);
        let limited: Vec<_> = r.receive_batch::<i64>(1).unwrap().collect();
        assert_eq!(limited.len(), 5);
    }

    #[test]
    fn blank_agent_rejected() {
        assert_matches!(Mailbox::open(events(), "", "proj"), Err(DurableError::Store(_)));
        let mailbox = Mailbox::open(events(), "a", "proj").unwrap();
        assert_matches!(mailbox.send(" ", SendOptions::default()), Err(DurableError::Store(_)));
    }

    #[test]
    fn checkpoint_name_format() {
        assert_eq!(checkpoint_name("worker-1"), "mailbox:worker-1");
    }
}
