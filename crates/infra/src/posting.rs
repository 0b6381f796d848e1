//! Posting coordinator: the single path through which documents change stock.
//!
//! ```text
//! Transition request
//!   ↓
//! 1. Lock the document record (bounded retries)
//!   ↓
//! 2. Repeated post? → return the recorded outcome unchanged
//!   ↓
//! 3. Expected version + caller precondition
//!   ↓
//! 4. handle(command) → events; stock effect computed per event
//!   ↓
//! 5. Lock touched balance keys in sorted order; stage reservation ops and
//!    movements; validate reserved <= quantity on every staged balance
//!   ↓
//! 6. Acquire reservation write access, append ledger entries
//!   ↓
//! 7. Commit balances, reservations, document state + history
//! ```
//!
//! Steps 1-6 are the only fallible ones; a failure there leaves no trace.
//! Step 7 cannot fail, so a transition is committed entirely or not at all.

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use wareflow_core::{Actor, AggregateRoot, DocumentRef, ExpectedVersion, Workflow};
use wareflow_events::Event;
use wareflow_inventory::{
    NewLedgerEntry, ReservationOp, StockBalance, StockDocument, StockEffect, StockLedgerEntry,
    StockReservation,
};

use crate::balance::BalanceAggregator;
use crate::config::LockPolicy;
use crate::document_store::{DocumentRecord, DocumentStore, HistoryEntry, TransitionOutcome};
use crate::error::PostingError;
use crate::ledger_store::LedgerStore;
use crate::locking::acquire;
use crate::reservation::ReservationManager;

/// Committed stock side of one transition.
struct AppliedEffect {
    ledger_entries: Vec<StockLedgerEntry>,
    balances: Vec<StockBalance>,
    reservations: Vec<StockReservation>,
}

impl AppliedEffect {
    fn none() -> Self {
        Self {
            ledger_entries: vec![],
            balances: vec![],
            reservations: vec![],
        }
    }
}

#[derive(Debug)]
pub struct PostingCoordinator<L> {
    ledger: L,
    balances: BalanceAggregator,
    reservations: ReservationManager,
    policy: LockPolicy,
}

impl<L: LedgerStore> PostingCoordinator<L> {
    pub fn new(ledger: L, policy: LockPolicy) -> Self {
        Self {
            ledger,
            balances: BalanceAggregator::new(),
            reservations: ReservationManager::new(),
            policy,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn balances(&self) -> &BalanceAggregator {
        &self.balances
    }

    pub fn reservations(&self) -> &ReservationManager {
        &self.reservations
    }

    pub fn policy(&self) -> &LockPolicy {
        &self.policy
    }

    /// Create a document from its create command. Creation never touches stock.
    #[instrument(skip_all, fields(kind = %D::KIND, actor = %actor.user_id))]
    pub fn create<D: StockDocument>(
        &self,
        store: &DocumentStore<D>,
        id: <D as AggregateRoot>::Id,
        actor: &Actor,
        command: D::Command,
    ) -> Result<TransitionOutcome<<D as Workflow>::Status>, PostingError> {
        let mut document = D::empty(id);
        let events = document.handle(&command)?;

        let doc_ref = document.document_ref();
        let mut history = Vec::with_capacity(events.len());
        for event in &events {
            let effect = document.stock_effect(event);
            if !effect.is_empty() {
                return Err(PostingError::Validation(format!(
                    "{} creation cannot move stock",
                    D::KIND
                )));
            }
            document.apply(event);
            history.push(HistoryEntry::from_typed(
                doc_ref,
                document.version(),
                actor,
                event,
            )?);
        }

        let outcome = TransitionOutcome {
            document: doc_ref,
            status: document.status(),
            version: document.version(),
            ledger_entries: vec![],
            balances: vec![],
            reservations: vec![],
        };
        store.insert(DocumentRecord {
            document,
            history,
            last_outcome: Some(outcome.clone()),
        })?;

        info!(document = %doc_ref, "document created");
        Ok(outcome)
    }

    /// Execute a transition command against an existing document.
    pub fn execute<D: StockDocument>(
        &self,
        store: &DocumentStore<D>,
        id: &<D as AggregateRoot>::Id,
        expected: ExpectedVersion,
        actor: &Actor,
        command: D::Command,
    ) -> Result<TransitionOutcome<<D as Workflow>::Status>, PostingError> {
        self.execute_guarded(store, id, expected, actor, command, |_| Ok(()))
    }

    /// Execute a transition command, first checking `precondition` against
    /// the locked document.
    ///
    /// The precondition runs after the repeated-post check, so a retried post
    /// still gets its recorded answer even if the precondition would now fail.
    #[instrument(skip_all, fields(kind = %D::KIND, id = ?id, actor = %actor.user_id))]
    pub fn execute_guarded<D, F>(
        &self,
        store: &DocumentStore<D>,
        id: &<D as AggregateRoot>::Id,
        expected: ExpectedVersion,
        actor: &Actor,
        command: D::Command,
        precondition: F,
    ) -> Result<TransitionOutcome<<D as Workflow>::Status>, PostingError>
    where
        D: StockDocument,
        F: FnOnce(&D) -> Result<(), PostingError>,
    {
        let slot = store.slot(id)?;
        let mut record = acquire(&*slot, &self.policy, &D::KIND)?;

        if record.document.is_repeat_posting(&command) {
            if let Some(previous) = &record.last_outcome {
                info!(
                    document = %previous.document,
                    "repeated post; returning recorded outcome"
                );
                return Ok(previous.clone());
            }
        }

        expected.check(record.document.version())?;
        precondition(&record.document)?;

        let events = record.document.handle(&command)?;
        let doc_ref = record.document.document_ref();

        // Effects are evaluated against the state each event starts from.
        let mut next = record.document.clone();
        let mut effect = StockEffect::none();
        let mut history = Vec::with_capacity(events.len());
        for event in &events {
            effect.extend(next.stock_effect(event));
            next.apply(event);
            history.push(HistoryEntry::from_typed(doc_ref, next.version(), actor, event)?);
            debug!(document = %doc_ref, event_type = event.event_type(), "event decided");
        }

        let applied = if effect.is_empty() {
            AppliedEffect::none()
        } else {
            self.apply_effect(doc_ref, &effect, actor).inspect_err(|err| {
                warn!(document = %doc_ref, error = %err, "transition rejected");
            })?
        };

        let outcome = TransitionOutcome {
            document: doc_ref,
            status: next.status(),
            version: next.version(),
            ledger_entries: applied.ledger_entries,
            balances: applied.balances,
            reservations: applied.reservations,
        };

        record.document = next;
        record.history.extend(history);
        record.last_outcome = Some(outcome.clone());

        info!(
            document = %doc_ref,
            status = ?outcome.status,
            version = outcome.version,
            entries = outcome.ledger_entries.len(),
            "transition committed"
        );
        Ok(outcome)
    }

    fn apply_effect(
        &self,
        doc_ref: DocumentRef,
        effect: &StockEffect,
        actor: &Actor,
    ) -> Result<AppliedEffect, PostingError> {
        let now = Utc::now();
        let cells = self.balances.cells(effect.keys())?;
        let mut txn = cells.lock(&self.policy)?;
        let mut stage = self.reservations.stage();

        let mut movements = effect.movements.clone();
        for op in &effect.reservations {
            match *op {
                ReservationOp::Reserve {
                    owner,
                    item,
                    warehouse,
                    quantity,
                } => {
                    stage.reserve(&mut txn, owner, item, warehouse, quantity, now)?;
                }
                ReservationOp::Release { owner, .. } => {
                    stage.release_owner(&mut txn, owner)?;
                }
                ReservationOp::Consume {
                    owner,
                    item,
                    warehouse,
                    quantity,
                    issue_line_no,
                } => {
                    let movement = stage.consume_owner(
                        &mut txn,
                        owner,
                        item,
                        warehouse,
                        quantity,
                        issue_line_no,
                    )?;
                    movements.push(movement);
                }
            }
        }

        let mut entries = Vec::with_capacity(movements.len());
        for movement in movements {
            let entry = NewLedgerEntry {
                item: movement.item,
                warehouse: movement.warehouse,
                delta: movement.delta,
                reason: movement.reason,
                reference: doc_ref,
                line_no: movement.line_no,
                posted_by: actor.user_id,
            };
            entry.validate()?;
            txn.apply_delta(&movement.key(), movement.delta)?;
            debug!(
                document = %doc_ref,
                item = %movement.item,
                warehouse = %movement.warehouse,
                delta = movement.delta,
                reason = movement.reason.as_str(),
                "movement staged"
            );
            entries.push(entry);
        }

        txn.validate()?;
        let prepared = stage.prepare()?;
        let ledger_entries = self.ledger.append(entries)?;

        // Nothing below can fail.
        let balances = txn.commit();
        let reservations = prepared.apply();

        Ok(AppliedEffect {
            ledger_entries,
            balances,
            reservations,
        })
    }
}
