use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use uuid::Uuid;

use wareflow_core::DocumentRef;
use wareflow_inventory::{BalanceKey, NewLedgerEntry, StockLedgerEntry};

use super::r#trait::{DateRange, LedgerStore, LedgerStoreError, validate_batch};

#[derive(Debug, Default)]
struct LedgerState {
    entries: Vec<StockLedgerEntry>,
    by_key: HashMap<BalanceKey, Vec<usize>>,
    by_document: HashMap<DocumentRef, Vec<usize>>,
}

impl LedgerState {
    fn collect(&self, positions: Option<&Vec<usize>>) -> Vec<StockLedgerEntry> {
        positions
            .map(|p| p.iter().map(|&i| self.entries[i].clone()).collect())
            .unwrap_or_default()
    }
}

/// In-memory append-only ledger.
///
/// Intended for tests/dev and for single-process deployments that rebuild
/// from an external snapshot. Entries are indexed by key and by document.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<LedgerState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of entries ever appended.
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn append(
        &self,
        entries: Vec<NewLedgerEntry>,
    ) -> Result<Vec<StockLedgerEntry>, LedgerStoreError> {
        if entries.is_empty() {
            return Ok(vec![]);
        }
        validate_batch(&entries)?;

        let mut state = self
            .state
            .write()
            .map_err(|_| LedgerStoreError::Storage("lock poisoned".to_string()))?;

        let posted_at = Utc::now();
        let mut committed = Vec::with_capacity(entries.len());
        for e in entries {
            let position = state.entries.len();
            let stored = StockLedgerEntry {
                entry_id: Uuid::now_v7(),
                sequence: position as u64 + 1,
                item: e.item,
                warehouse: e.warehouse,
                delta: e.delta,
                reason: e.reason,
                reference: e.reference,
                line_no: e.line_no,
                posted_at,
                posted_by: e.posted_by,
            };
            state.by_key.entry(stored.key()).or_default().push(position);
            state
                .by_document
                .entry(stored.reference)
                .or_default()
                .push(position);
            state.entries.push(stored.clone());
            committed.push(stored);
        }

        Ok(committed)
    }

    fn entries_for(
        &self,
        key: &BalanceKey,
        range: Option<DateRange>,
    ) -> Result<Vec<StockLedgerEntry>, LedgerStoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| LedgerStoreError::Storage("lock poisoned".to_string()))?;

        let mut entries = state.collect(state.by_key.get(key));
        if let Some(range) = range {
            entries.retain(|e| range.contains(e.posted_at));
        }
        Ok(entries)
    }

    fn entries_for_document(
        &self,
        reference: DocumentRef,
    ) -> Result<Vec<StockLedgerEntry>, LedgerStoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| LedgerStoreError::Storage("lock poisoned".to_string()))?;

        Ok(state.collect(state.by_document.get(&reference)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use wareflow_core::{AggregateId, DocumentKind, MaterialId, UserId, WarehouseId};
    use wareflow_inventory::{ItemRef, MovementReason, reconstruct_quantity};

    fn entry(reference: DocumentRef, key: BalanceKey, delta: i64) -> NewLedgerEntry {
        NewLedgerEntry {
            item: key.item,
            warehouse: key.warehouse,
            delta,
            reason: MovementReason::Adjustment,
            reference,
            line_no: 1,
            posted_by: UserId::new(),
        }
    }

    fn test_key() -> BalanceKey {
        BalanceKey::new(ItemRef::material(MaterialId::new()), WarehouseId::new())
    }

    fn test_doc() -> DocumentRef {
        DocumentRef::new(DocumentKind::StockAdjustment, AggregateId::new())
    }

    #[test]
    fn append_assigns_monotonic_sequences() {
        let store = InMemoryLedgerStore::new();
        let key = test_key();
        let mixed = store
            .append(vec![entry(test_doc(), key, 5), entry(test_doc(), key, 1)])
            .unwrap_err();
        assert!(matches!(mixed, LedgerStoreError::InvalidAppend(_)));
        assert!(store.is_empty());

        let doc = test_doc();
        let committed = store
            .append(vec![entry(doc, key, 5), entry(doc, key, -2)])
            .unwrap();
        assert_eq!(committed[0].sequence, 1);
        assert_eq!(committed[1].sequence, 2);

        let more = store.append(vec![entry(test_doc(), key, 7)]).unwrap();
        assert_eq!(more[0].sequence, 3);

        let entries = store.entries_for(&key, None).unwrap();
        assert_eq!(reconstruct_quantity(&entries), 10);
        assert_eq!(store.entries_for_document(doc).unwrap().len(), 2);
    }

    #[test]
    fn invalid_entry_rejects_whole_batch() {
        let store = InMemoryLedgerStore::new();
        let doc = test_doc();
        let key = test_key();
        let mut bad = entry(doc, key, 3);
        bad.reason = MovementReason::Issue;

        let err = store.append(vec![entry(doc, key, 3), bad]).unwrap_err();
        assert!(matches!(err, LedgerStoreError::InvalidAppend(msg) if msg.contains("index 1")));
        assert!(store.entries_for(&key, None).unwrap().is_empty());
    }

    #[test]
    fn date_range_filters_by_posting_time() {
        let store = InMemoryLedgerStore::new();
        let key = test_key();
        store.append(vec![entry(test_doc(), key, 4)]).unwrap();
        let now = Utc::now();

        let past = DateRange::between(now - Duration::days(2), now - Duration::days(1));
        assert!(store.entries_for(&key, Some(past)).unwrap().is_empty());

        let window = DateRange::since(now - Duration::hours(1));
        assert_eq!(store.entries_for(&key, Some(window)).unwrap().len(), 1);
    }
}
