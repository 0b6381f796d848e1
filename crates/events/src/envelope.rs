use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wareflow_core::{DocumentRef, UserId};

/// Envelope for a document event, carrying the document and stream metadata.
///
/// This is the unit kept in a document's history.
///
/// Notes:
/// - `sequence_number` equals the document version right after the event was
///   applied, so it is monotonically increasing per document.
/// - `actor` is the authenticated user that requested the transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    document: DocumentRef,

    /// Monotonically increasing position in the document's history.
    sequence_number: u64,

    actor: UserId,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        document: DocumentRef,
        sequence_number: u64,
        actor: UserId,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            document,
            sequence_number,
            actor,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn document(&self) -> DocumentRef {
        self.document
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn actor(&self) -> UserId {
        self.actor
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }
}
