//! In-memory document store: one exclusively locked record per document.
//!
//! A record holds the document's current state, its transition history and
//! the result of the last committed transition (used to answer repeated
//! posting requests).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use wareflow_core::{Actor, AggregateRoot, DocumentRef, Workflow};
use wareflow_events::{Event, EventEnvelope};
use wareflow_inventory::{StockBalance, StockDocument, StockLedgerEntry, StockReservation};

use crate::config::LockPolicy;
use crate::error::PostingError;
use crate::locking::acquire;

/// Result of one committed transition, as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome<S> {
    pub document: DocumentRef,
    pub status: S,
    /// Document version after the transition.
    pub version: u64,
    pub ledger_entries: Vec<StockLedgerEntry>,
    /// Post-transition snapshot of every balance the transition touched.
    pub balances: Vec<StockBalance>,
    /// Reservations created or changed by the transition.
    pub reservations: Vec<StockReservation>,
}

/// One entry of a document's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub event_type: &'static str,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub envelope: EventEnvelope<JsonValue>,
}

impl HistoryEntry {
    /// Build a history entry for `event`, recorded at document version
    /// `sequence_number`.
    pub fn from_typed<E>(
        document: DocumentRef,
        sequence_number: u64,
        actor: &Actor,
        event: &E,
    ) -> Result<Self, PostingError>
    where
        E: Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            PostingError::Persistence(format!("history payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_type: event.event_type(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            envelope: EventEnvelope::new(
                Uuid::now_v7(),
                document,
                sequence_number,
                actor.user_id,
                payload,
            ),
        })
    }
}

#[derive(Debug)]
pub struct DocumentRecord<D: StockDocument> {
    pub document: D,
    pub history: Vec<HistoryEntry>,
    pub last_outcome: Option<TransitionOutcome<<D as Workflow>::Status>>,
}

type RecordCell<D> = Arc<Mutex<DocumentRecord<D>>>;

/// All documents of one type.
#[derive(Debug)]
pub struct DocumentStore<D: StockDocument> {
    records: RwLock<HashMap<<D as AggregateRoot>::Id, RecordCell<D>>>,
}

impl<D: StockDocument> Default for DocumentStore<D> {
    fn default() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl<D: StockDocument> DocumentStore<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a newly created document. Fails if the id is already taken.
    pub fn insert(&self, record: DocumentRecord<D>) -> Result<(), PostingError> {
        let id = record.document.id().clone();
        let mut records = self
            .records
            .write()
            .map_err(|_| PostingError::Persistence("document index poisoned".to_string()))?;
        if records.contains_key(&id) {
            return Err(PostingError::ConcurrentModification(format!(
                "{} {id:?} already exists",
                D::KIND
            )));
        }
        records.insert(id, Arc::new(Mutex::new(record)));
        Ok(())
    }

    /// Shared handle to a document's record.
    pub fn slot(&self, id: &<D as AggregateRoot>::Id) -> Result<RecordCell<D>, PostingError> {
        self.records
            .read()
            .map_err(|_| PostingError::Persistence("document index poisoned".to_string()))?
            .get(id)
            .cloned()
            .ok_or_else(|| PostingError::not_found(format!("{} {id:?}", D::KIND)))
    }

    /// Current state of a document.
    pub fn get(
        &self,
        id: &<D as AggregateRoot>::Id,
        policy: &LockPolicy,
    ) -> Result<D, PostingError> {
        let slot = self.slot(id)?;
        let record = acquire(&*slot, policy, &D::KIND)?;
        Ok(record.document.clone())
    }

    pub fn history(
        &self,
        id: &<D as AggregateRoot>::Id,
        policy: &LockPolicy,
    ) -> Result<Vec<HistoryEntry>, PostingError> {
        let slot = self.slot(id)?;
        let record = acquire(&*slot, policy, &D::KIND)?;
        Ok(record.history.clone())
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
