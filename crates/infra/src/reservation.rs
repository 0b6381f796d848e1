//! Reservation manager: holds quantity for document lines against balances.
//!
//! Reservations are only ever changed inside a posting transition, through a
//! [`ReservationStage`] that works against a [`BalanceTxn`] holding the
//! affected keys. Nothing is visible to readers until the stage is prepared
//! and applied by the posting coordinator.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tracing::debug;

use wareflow_core::{DocumentLineRef, DocumentRef, WarehouseId};
use wareflow_inventory::{
    BalanceKey, ItemRef, MovementReason, ReservationId, StockMovement, StockReservation,
};

use crate::balance::BalanceTxn;
use crate::error::PostingError;

#[derive(Debug, Default)]
struct ReservationBook {
    by_id: HashMap<ReservationId, StockReservation>,
    by_owner: HashMap<DocumentLineRef, Vec<ReservationId>>,
}

impl ReservationBook {
    fn upsert(&mut self, reservation: StockReservation) {
        if !self.by_id.contains_key(&reservation.id) {
            self.by_owner
                .entry(reservation.owner)
                .or_default()
                .push(reservation.id);
        }
        self.by_id.insert(reservation.id, reservation);
    }

    fn owned_by(&self, owner: &DocumentLineRef) -> Vec<StockReservation> {
        self.by_owner
            .get(owner)
            .map(|ids| ids.iter().filter_map(|id| self.by_id.get(id)).cloned().collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub struct ReservationManager {
    book: RwLock<ReservationBook>,
}

impl ReservationManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, ReservationBook>, PostingError> {
        self.book
            .read()
            .map_err(|_| PostingError::Persistence("reservation book poisoned".to_string()))
    }

    /// Start staging reservation changes for one transition.
    pub fn stage(&self) -> ReservationStage<'_> {
        ReservationStage {
            manager: self,
            changes: BTreeMap::new(),
        }
    }

    pub fn get(&self, id: ReservationId) -> Result<StockReservation, PostingError> {
        self.read()?
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| PostingError::not_found(format!("reservation {id}")))
    }

    /// Every reservation ever held by one document line, oldest first.
    pub fn for_owner(&self, owner: DocumentLineRef) -> Result<Vec<StockReservation>, PostingError> {
        Ok(self.read()?.owned_by(&owner))
    }

    /// Every reservation held by any line of `document`, by line then age.
    pub fn for_document(
        &self,
        document: DocumentRef,
    ) -> Result<Vec<StockReservation>, PostingError> {
        let book = self.read()?;
        let mut owners: Vec<&DocumentLineRef> = book
            .by_owner
            .keys()
            .filter(|owner| owner.document == document)
            .collect();
        owners.sort();
        Ok(owners.into_iter().flat_map(|o| book.owned_by(o)).collect())
    }

    /// Active reservations against one balance key.
    pub fn active_for_key(&self, key: &BalanceKey) -> Result<Vec<StockReservation>, PostingError> {
        let book = self.read()?;
        let mut active: Vec<StockReservation> = book
            .by_id
            .values()
            .filter(|r| r.is_active() && r.key() == *key)
            .cloned()
            .collect();
        active.sort_by_key(|r| r.id);
        Ok(active)
    }
}

/// Reservation changes staged against a held [`BalanceTxn`].
///
/// Every operation adjusts the staged balance's reserved quantity in step
/// with the reservation it touches.
#[derive(Debug)]
pub struct ReservationStage<'m> {
    manager: &'m ReservationManager,
    changes: BTreeMap<ReservationId, StockReservation>,
}

impl<'m> ReservationStage<'m> {
    fn current(&self, id: ReservationId) -> Result<StockReservation, PostingError> {
        match self.changes.get(&id) {
            Some(staged) => Ok(staged.clone()),
            None => self.manager.get(id),
        }
    }

    fn owned_by(&self, owner: &DocumentLineRef) -> Result<Vec<ReservationId>, PostingError> {
        let mut ids: Vec<ReservationId> = self
            .manager
            .read()?
            .owned_by(owner)
            .into_iter()
            .map(|r| r.id)
            .collect();
        let staged: Vec<ReservationId> = self
            .changes
            .values()
            .filter(|r| r.owner == *owner && !ids.contains(&r.id))
            .map(|r| r.id)
            .collect();
        ids.extend(staged);
        Ok(ids)
    }

    /// Hold `quantity` of `item` at `warehouse` for `owner`.
    ///
    /// Fails with `InsufficientAvailable` when the staged available quantity
    /// cannot cover it.
    pub fn reserve(
        &mut self,
        txn: &mut BalanceTxn<'_>,
        owner: DocumentLineRef,
        item: ItemRef,
        warehouse: WarehouseId,
        quantity: i64,
        at: DateTime<Utc>,
    ) -> Result<StockReservation, PostingError> {
        if quantity <= 0 {
            return Err(PostingError::Validation(format!(
                "{owner}: reserved quantity must be positive"
            )));
        }
        let key = BalanceKey::new(item, warehouse);
        txn.apply_reservation_delta(&key, quantity)?;

        let reservation =
            StockReservation::open(ReservationId::new(), owner, item, warehouse, quantity, at);
        debug!(%owner, %key, quantity, reservation = %reservation.id, "reservation staged");
        self.changes.insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    /// Release whatever `id` still holds. Releasing a reservation that is no
    /// longer active is a no-op returning 0.
    pub fn release(
        &mut self,
        txn: &mut BalanceTxn<'_>,
        id: ReservationId,
    ) -> Result<i64, PostingError> {
        let mut reservation = self.current(id)?;
        let released = reservation.release();
        if released > 0 {
            txn.apply_reservation_delta(&reservation.key(), -released)?;
            self.changes.insert(id, reservation);
        }
        Ok(released)
    }

    /// Release every active reservation held by `owner`.
    pub fn release_owner(
        &mut self,
        txn: &mut BalanceTxn<'_>,
        owner: DocumentLineRef,
    ) -> Result<i64, PostingError> {
        let mut released = 0;
        for id in self.owned_by(&owner)? {
            released += self.release(txn, id)?;
        }
        Ok(released)
    }

    /// Issue `actual` against reservation `id` and return the outbound
    /// movement to book.
    ///
    /// Up to the outstanding quantity is drawn from the reservation; a
    /// smaller issue leaves the rest reserved and a larger one takes the
    /// excess from unreserved stock.
    pub fn consume(
        &mut self,
        txn: &mut BalanceTxn<'_>,
        id: ReservationId,
        actual: i64,
        issue_line_no: u32,
    ) -> Result<StockMovement, PostingError> {
        if actual <= 0 {
            return Err(PostingError::Validation(
                "issued quantity must be positive".to_string(),
            ));
        }
        let mut reservation = self.current(id)?;
        if !reservation.is_active() {
            return Err(PostingError::Validation(format!(
                "reservation {id} is no longer active"
            )));
        }

        let drawn = reservation.consume(actual);
        txn.apply_reservation_delta(&reservation.key(), -drawn)?;
        debug!(reservation = %id, actual, drawn, "reservation consumed");

        let movement = StockMovement {
            line_no: issue_line_no,
            item: reservation.item,
            warehouse: reservation.warehouse,
            delta: -actual,
            reason: MovementReason::Issue,
        };
        self.changes.insert(id, reservation);
        Ok(movement)
    }

    /// Consume against the oldest active reservation held by `owner`, which
    /// must be for `item` at `warehouse`.
    pub fn consume_owner(
        &mut self,
        txn: &mut BalanceTxn<'_>,
        owner: DocumentLineRef,
        item: ItemRef,
        warehouse: WarehouseId,
        actual: i64,
        issue_line_no: u32,
    ) -> Result<StockMovement, PostingError> {
        let mut active = None;
        for id in self.owned_by(&owner)? {
            let reservation = self.current(id)?;
            if reservation.is_active() {
                active = Some(reservation);
                break;
            }
        }
        let reservation = active.ok_or_else(|| {
            PostingError::Validation(format!("no active reservation for {owner}"))
        })?;
        if reservation.item != item || reservation.warehouse != warehouse {
            return Err(PostingError::Validation(format!(
                "{owner} reserves {} at {}, not {item} at {warehouse}",
                reservation.item, reservation.warehouse
            )));
        }

        self.consume(txn, reservation.id, actual, issue_line_no)
    }

    /// Acquire write access to the book. The last fallible step before the
    /// staged changes become visible.
    pub fn prepare(self) -> Result<PreparedReservations<'m>, PostingError> {
        let guard = self
            .manager
            .book
            .write()
            .map_err(|_| PostingError::Persistence("reservation book poisoned".to_string()))?;
        Ok(PreparedReservations {
            guard,
            changes: self.changes.into_values().collect(),
        })
    }
}

/// Staged reservation changes holding write access to the book.
pub struct PreparedReservations<'m> {
    guard: RwLockWriteGuard<'m, ReservationBook>,
    changes: Vec<StockReservation>,
}

impl PreparedReservations<'_> {
    /// Make the changes visible and return them.
    pub fn apply(mut self) -> Vec<StockReservation> {
        for reservation in &self.changes {
            self.guard.upsert(reservation.clone());
        }
        self.changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::BalanceAggregator;
    use crate::config::LockPolicy;
    use wareflow_core::{AggregateId, DocumentKind, MaterialId};
    use wareflow_inventory::ReservationStatus;

    struct Fixture {
        balances: BalanceAggregator,
        reservations: ReservationManager,
        key: BalanceKey,
        owner: DocumentLineRef,
    }

    fn fixture(on_hand: i64) -> Fixture {
        let balances = BalanceAggregator::new();
        let key = BalanceKey::new(ItemRef::material(MaterialId::new()), WarehouseId::new());
        let cells = balances.cells([key]).unwrap();
        let mut txn = cells.lock(&LockPolicy::default()).unwrap();
        txn.apply_delta(&key, on_hand).unwrap();
        txn.commit();

        Fixture {
            balances,
            reservations: ReservationManager::new(),
            key,
            owner: DocumentRef::new(DocumentKind::MaterialRequest, AggregateId::new()).line(1),
        }
    }

    fn reserve(f: &Fixture, quantity: i64) -> Result<StockReservation, PostingError> {
        let cells = f.balances.cells([f.key]).unwrap();
        let mut txn = cells.lock(&LockPolicy::default())?;
        let mut stage = f.reservations.stage();
        let reservation =
            stage.reserve(&mut txn, f.owner, f.key.item, f.key.warehouse, quantity, Utc::now())?;
        txn.validate()?;
        let prepared = stage.prepare()?;
        txn.commit();
        prepared.apply();
        Ok(reservation)
    }

    fn balance(f: &Fixture) -> wareflow_inventory::StockBalance {
        f.balances.get_balance(f.key, &LockPolicy::default()).unwrap()
    }

    #[test]
    fn reserve_holds_quantity_and_is_queryable() {
        let f = fixture(100);
        let reservation = reserve(&f, 30).unwrap();

        assert_eq!(balance(&f).reserved_quantity(), 30);
        assert_eq!(f.reservations.get(reservation.id).unwrap(), reservation);
        assert_eq!(f.reservations.for_owner(f.owner).unwrap().len(), 1);
        assert_eq!(f.reservations.for_document(f.owner.document).unwrap().len(), 1);
        assert_eq!(f.reservations.active_for_key(&f.key).unwrap().len(), 1);
    }

    #[test]
    fn reserve_beyond_available_fails_and_changes_nothing() {
        let f = fixture(10);
        reserve(&f, 8).unwrap();
        let err = reserve(&f, 3).unwrap_err();
        assert_eq!(
            err,
            PostingError::InsufficientAvailable {
                requested: 3,
                available: 2
            }
        );
        assert_eq!(balance(&f).reserved_quantity(), 8);
        assert_eq!(f.reservations.for_owner(f.owner).unwrap().len(), 1);
    }

    #[test]
    fn release_twice_is_a_no_op() {
        let f = fixture(10);
        let reservation = reserve(&f, 6).unwrap();

        for expected in [6, 0] {
            let cells = f.balances.cells([f.key]).unwrap();
            let mut txn = cells.lock(&LockPolicy::default()).unwrap();
            let mut stage = f.reservations.stage();
            assert_eq!(stage.release(&mut txn, reservation.id).unwrap(), expected);
            let prepared = stage.prepare().unwrap();
            txn.commit();
            prepared.apply();
        }

        assert_eq!(balance(&f).reserved_quantity(), 0);
        assert_eq!(
            f.reservations.get(reservation.id).unwrap().status,
            ReservationStatus::Released
        );
    }

    #[test]
    fn partial_consume_leaves_residual_reserved() {
        let f = fixture(50);
        let reservation = reserve(&f, 50).unwrap();

        let cells = f.balances.cells([f.key]).unwrap();
        let mut txn = cells.lock(&LockPolicy::default()).unwrap();
        let mut stage = f.reservations.stage();
        let movement = stage
            .consume_owner(&mut txn, f.owner, f.key.item, f.key.warehouse, 20, 1)
            .unwrap();
        assert_eq!(movement.delta, -20);
        txn.apply_delta(&movement.key(), movement.delta).unwrap();
        txn.validate().unwrap();
        let prepared = stage.prepare().unwrap();
        txn.commit();
        prepared.apply();

        let after = balance(&f);
        assert_eq!(after.quantity(), 30);
        assert_eq!(after.reserved_quantity(), 30);
        let stored = f.reservations.get(reservation.id).unwrap();
        assert!(stored.is_active());
        assert_eq!(stored.outstanding(), 30);
    }

    #[test]
    fn consume_without_active_reservation_is_a_validation_error() {
        let f = fixture(50);
        let cells = f.balances.cells([f.key]).unwrap();
        let mut txn = cells.lock(&LockPolicy::default()).unwrap();
        let mut stage = f.reservations.stage();
        let err = stage
            .consume_owner(&mut txn, f.owner, f.key.item, f.key.warehouse, 5, 1)
            .unwrap_err();
        assert!(matches!(err, PostingError::Validation(_)));
    }
}
