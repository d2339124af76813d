//! Wiring for the durable primitives.
//!
//! [`Coordination`] takes one [`Database`] and the loaded settings and
//! builds every primitive by constructor injection. It owns no state beyond
//! those handles; two instances over the same file coordinate through the
//! file alone.

use swarm_settings::SwarmSettings;
use swarm_store::{ConnectionConfig, Database, EventStore};

use crate::ask::AskClient;
use crate::cursor::DurableCursor;
use crate::deferred::{DeferredConfig, DeferredStore};
use crate::errors::Result;
use crate::mailbox::Mailbox;

/// Entry point handing out cursors, mailboxes and the ask client.
#[derive(Clone, Debug)]
pub struct Coordination {
    events: EventStore,
    deferreds: DeferredStore,
    asks: AskClient,
    mailbox_batch: usize,
}

impl Coordination {
    /// Build every primitive over `db`.
    pub fn new(db: Database, settings: &SwarmSettings) -> Self {
        let events = EventStore::new(db.clone());
        let deferreds = DeferredStore::new(db, DeferredConfig::from(&settings.deferred));
        let asks = AskClient::new(deferreds.clone());
        Self {
            events,
            deferreds,
            asks,
            mailbox_batch: settings.mailbox.batch_size as usize,
        }
    }

    /// Open the database at `storage.databasePath` and build over it.
    ///
    /// Also installs the stderr subscriber at `logging.level` unless the
    /// host already installed one.
    pub fn open(settings: &SwarmSettings) -> Result<Self> {
        swarm_core::logging::init_subscriber(&settings.logging.level);
        let db = Database::open(
            &settings.storage.database_path,
            &ConnectionConfig::from(&settings.storage),
        )?;
        Ok(Self::new(db, settings))
    }

    /// The event log.
    pub fn events(&self) -> &EventStore {
        &self.events
    }

    /// Deferred store.
    pub fn deferreds(&self) -> &DeferredStore {
        &self.deferreds
    }

    /// Ask client.
    pub fn asks(&self) -> &AskClient {
        &self.asks
    }

    /// Open a cursor over `stream`.
    pub fn cursor(&self, stream: &str, checkpoint: &str) -> Result<DurableCursor> {
        DurableCursor::open(self.events.clone(), stream, checkpoint)
    }

    /// Open `agent`'s mailbox in `project_key`, using the configured batch size.
    pub fn mailbox(&self, agent: &str, project_key: &str) -> Result<Mailbox> {
        Ok(Mailbox::open(self.events.clone(), agent, project_key)?.with_batch_size(self.mailbox_batch))
    }
}
