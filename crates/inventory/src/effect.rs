//! Stock effects: what a document transition asks the ledger and the
//! reservation book to do.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use wareflow_core::{DocumentLineRef, WarehouseId};

use crate::item::{BalanceKey, ItemRef};
use crate::ledger::MovementReason;

/// A physical movement to record in the ledger for one document line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub line_no: u32,
    pub item: ItemRef,
    pub warehouse: WarehouseId,
    pub delta: i64,
    pub reason: MovementReason,
}

impl StockMovement {
    pub fn key(&self) -> BalanceKey {
        BalanceKey::new(self.item, self.warehouse)
    }
}

/// A change to the reservation book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationOp {
    /// Hold `quantity` for `owner`.
    Reserve {
        owner: DocumentLineRef,
        item: ItemRef,
        warehouse: WarehouseId,
        quantity: i64,
    },
    /// Release every active reservation held by `owner`.
    Release {
        owner: DocumentLineRef,
        item: ItemRef,
        warehouse: WarehouseId,
    },
    /// Issue `quantity` against `owner`'s reservation; the ledger entry is
    /// booked on line `issue_line_no` of the issuing document.
    Consume {
        owner: DocumentLineRef,
        item: ItemRef,
        warehouse: WarehouseId,
        quantity: i64,
        issue_line_no: u32,
    },
}

impl ReservationOp {
    pub fn key(&self) -> BalanceKey {
        match self {
            ReservationOp::Reserve {
                item, warehouse, ..
            }
            | ReservationOp::Release {
                item, warehouse, ..
            }
            | ReservationOp::Consume {
                item, warehouse, ..
            } => BalanceKey::new(*item, *warehouse),
        }
    }
}

/// Everything one transition does to stock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockEffect {
    pub movements: Vec<StockMovement>,
    pub reservations: Vec<ReservationOp>,
}

impl StockEffect {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.movements.is_empty() && self.reservations.is_empty()
    }

    pub fn movement(mut self, movement: StockMovement) -> Self {
        self.movements.push(movement);
        self
    }

    pub fn reservation(mut self, op: ReservationOp) -> Self {
        self.reservations.push(op);
        self
    }

    pub fn extend(&mut self, other: StockEffect) {
        self.movements.extend(other.movements);
        self.reservations.extend(other.reservations);
    }

    /// Every balance key touched, in lock order.
    pub fn keys(&self) -> BTreeSet<BalanceKey> {
        self.movements
            .iter()
            .map(StockMovement::key)
            .chain(self.reservations.iter().map(ReservationOp::key))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wareflow_core::{AggregateId, DocumentKind, DocumentRef, MaterialId};

    #[test]
    fn keys_are_deduplicated_and_ordered() {
        let item = ItemRef::material(MaterialId::new());
        let a = WarehouseId::new();
        let b = WarehouseId::new();
        let owner = DocumentRef::new(DocumentKind::MaterialRequest, AggregateId::new()).line(1);

        let effect = StockEffect::none()
            .movement(StockMovement {
                line_no: 1,
                item,
                warehouse: b,
                delta: -3,
                reason: MovementReason::TransferOut,
            })
            .movement(StockMovement {
                line_no: 1,
                item,
                warehouse: a,
                delta: 3,
                reason: MovementReason::TransferIn,
            })
            .reservation(ReservationOp::Release {
                owner,
                item,
                warehouse: a,
            });

        let keys: Vec<_> = effect.keys().into_iter().collect();
        assert_eq!(keys.len(), 2);
        assert!(keys[0] < keys[1]);
    }
}
