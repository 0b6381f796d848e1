//! Balance aggregator: materialized per-key quantity / reserved summaries.
//!
//! Every key has its own cell behind an exclusive lock, so transitions on
//! different keys proceed independently and transitions on the same key
//! serialize. Mutations are staged in a [`BalanceTxn`] while the keys are held
//! and written back only by [`BalanceTxn::commit`], which cannot fail.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use wareflow_inventory::{BalanceKey, StockBalance};

use crate::config::LockPolicy;
use crate::error::PostingError;
use crate::locking::acquire;

type BalanceCell = Arc<Mutex<StockBalance>>;

#[derive(Debug, Default)]
pub struct BalanceAggregator {
    cells: RwLock<HashMap<BalanceKey, BalanceCell>>,
}

impl BalanceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cells for `keys`, creating missing balances lazily. Returned in lock
    /// order (sorted, deduplicated).
    pub fn cells(
        &self,
        keys: impl IntoIterator<Item = BalanceKey>,
    ) -> Result<KeyCells, PostingError> {
        let keys: std::collections::BTreeSet<BalanceKey> = keys.into_iter().collect();
        let mut cells = Vec::with_capacity(keys.len());

        let mut missing = Vec::new();
        {
            let map = self
                .cells
                .read()
                .map_err(|_| PostingError::Persistence("balance index poisoned".to_string()))?;
            for key in keys {
                match map.get(&key) {
                    Some(cell) => cells.push((key, cell.clone())),
                    None => missing.push(key),
                }
            }
        }

        if !missing.is_empty() {
            let mut map = self
                .cells
                .write()
                .map_err(|_| PostingError::Persistence("balance index poisoned".to_string()))?;
            for key in missing {
                let cell = map
                    .entry(key)
                    .or_insert_with(|| Arc::new(Mutex::new(StockBalance::empty(key))))
                    .clone();
                cells.push((key, cell));
            }
            cells.sort_by_key(|(key, _)| *key);
        }

        Ok(KeyCells { cells })
    }

    /// Cells for the keys that already have a balance, in lock order.
    pub(crate) fn existing_cells(&self, keys: &[BalanceKey]) -> Result<KeyCells, PostingError> {
        let map = self
            .cells
            .read()
            .map_err(|_| PostingError::Persistence("balance index poisoned".to_string()))?;
        let mut cells: Vec<(BalanceKey, BalanceCell)> = keys
            .iter()
            .filter_map(|key| map.get(key).map(|cell| (*key, cell.clone())))
            .collect();
        cells.sort_by_key(|(key, _)| *key);
        cells.dedup_by_key(|(key, _)| *key);
        Ok(KeyCells { cells })
    }

    /// Current balance for one key. A key never touched reads as zero.
    pub fn get_balance(
        &self,
        key: BalanceKey,
        policy: &LockPolicy,
    ) -> Result<StockBalance, PostingError> {
        let mut snapshot = self.get_balances(&[key], policy)?;
        Ok(snapshot.pop().unwrap_or_else(|| StockBalance::empty(key)))
    }

    /// Consistent snapshot of several keys: all are read while all are held,
    /// so a transfer is seen on both sides or on neither.
    pub fn get_balances(
        &self,
        keys: &[BalanceKey],
        policy: &LockPolicy,
    ) -> Result<Vec<StockBalance>, PostingError> {
        let cells = self.existing_cells(keys)?;
        let txn = cells.lock(policy)?;
        Ok(keys
            .iter()
            .map(|key| {
                txn.balance(key)
                    .cloned()
                    .unwrap_or_else(|| StockBalance::empty(*key))
            })
            .collect())
    }
}

/// Shared handles to a set of balance cells, sorted by key.
///
/// Held by the caller for as long as the [`BalanceTxn`] borrowing it lives.
#[derive(Debug)]
pub struct KeyCells {
    cells: Vec<(BalanceKey, BalanceCell)>,
}

impl KeyCells {
    /// Lock every cell in key order.
    pub fn lock(&self, policy: &LockPolicy) -> Result<BalanceTxn<'_>, PostingError> {
        let mut guards = BTreeMap::new();
        for (key, cell) in &self.cells {
            let guard = acquire(&**cell, policy, key)?;
            guards.insert(*key, guard);
        }
        let staged = guards
            .iter()
            .map(|(key, guard)| (*key, (**guard).clone()))
            .collect();
        Ok(BalanceTxn { guards, staged })
    }
}

/// Exclusive hold on a set of balances with staged, uncommitted changes.
///
/// Dropping the transaction without committing discards every change.
#[derive(Debug)]
pub struct BalanceTxn<'a> {
    guards: BTreeMap<BalanceKey, MutexGuard<'a, StockBalance>>,
    staged: BTreeMap<BalanceKey, StockBalance>,
}

impl<'a> BalanceTxn<'a> {
    /// Staged balance for `key`, if the key is held.
    pub fn balance(&self, key: &BalanceKey) -> Option<&StockBalance> {
        self.staged.get(key)
    }

    fn staged_mut(&mut self, key: &BalanceKey) -> Result<&mut StockBalance, PostingError> {
        self.staged.get_mut(key).ok_or_else(|| {
            PostingError::Persistence(format!("balance {key} is not held by this transition"))
        })
    }

    /// Record a physical movement. Never blocked by reservations; only a
    /// quantity leaving the `i64` range is refused.
    pub fn apply_delta(
        &mut self,
        key: &BalanceKey,
        delta: i64,
    ) -> Result<&StockBalance, PostingError> {
        let balance = self.staged_mut(key)?;
        balance.apply_delta(delta)?;
        Ok(balance)
    }

    /// Change the reserved quantity; increases are capacity-checked.
    pub fn apply_reservation_delta(
        &mut self,
        key: &BalanceKey,
        delta: i64,
    ) -> Result<&StockBalance, PostingError> {
        let balance = self.staged_mut(key)?;
        balance.apply_reservation_delta(delta)?;
        Ok(balance)
    }

    /// Check `reserved <= quantity` on every staged balance.
    ///
    /// A violation reports how much more than the pre-transition available
    /// quantity the transition tried to take.
    pub fn validate(&self) -> Result<(), PostingError> {
        for (key, staged) in &self.staged {
            if staged.check_invariant().is_err() {
                let available = self
                    .guards
                    .get(key)
                    .map(|original| original.available_quantity())
                    .unwrap_or(0);
                return Err(PostingError::InsufficientAvailable {
                    requested: available.saturating_sub(staged.available_quantity()),
                    available,
                });
            }
        }
        Ok(())
    }

    /// Write every staged balance back and release the keys.
    pub fn commit(mut self) -> Vec<StockBalance> {
        let snapshot: Vec<StockBalance> = self.staged.values().cloned().collect();
        for (key, staged) in std::mem::take(&mut self.staged) {
            if let Some(guard) = self.guards.get_mut(&key) {
                **guard = staged;
            }
        }
        snapshot
    }
}
