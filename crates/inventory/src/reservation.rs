use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wareflow_core::{DocumentLineRef, WarehouseId};

use crate::item::{BalanceKey, ItemRef};

/// Reservation identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(pub Uuid);

impl ReservationId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ReservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for ReservationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Active,
    Released,
    Consumed,
}

/// Committed-but-not-yet-issued quantity held for one document line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReservation {
    pub id: ReservationId,
    pub owner: DocumentLineRef,
    pub item: ItemRef,
    pub warehouse: WarehouseId,
    /// Quantity originally reserved.
    pub quantity: i64,
    pub consumed_quantity: i64,
    pub released_quantity: i64,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
}

impl StockReservation {
    pub fn open(
        id: ReservationId,
        owner: DocumentLineRef,
        item: ItemRef,
        warehouse: WarehouseId,
        quantity: i64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner,
            item,
            warehouse,
            quantity,
            consumed_quantity: 0,
            released_quantity: 0,
            status: ReservationStatus::Active,
            created_at,
        }
    }

    pub fn key(&self) -> BalanceKey {
        BalanceKey::new(self.item, self.warehouse)
    }

    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    /// Quantity still held against the balance.
    pub fn outstanding(&self) -> i64 {
        match self.status {
            ReservationStatus::Active => {
                self.quantity - self.consumed_quantity - self.released_quantity
            }
            _ => 0,
        }
    }

    /// Draw up to `actual` from the reservation and return how much was drawn.
    ///
    /// The remainder (if any) stays reserved; a reservation drawn down to zero
    /// becomes `Consumed`.
    pub fn consume(&mut self, actual: i64) -> i64 {
        if !self.is_active() || actual <= 0 {
            return 0;
        }
        let drawn = actual.min(self.outstanding());
        self.consumed_quantity += drawn;
        if self.outstanding() == 0 {
            self.status = ReservationStatus::Consumed;
        }
        drawn
    }

    /// Release whatever is still outstanding and return it.
    ///
    /// Releasing a reservation that is no longer active is a no-op returning 0.
    pub fn release(&mut self) -> i64 {
        if !self.is_active() {
            return 0;
        }
        let released = self.outstanding();
        self.released_quantity += released;
        self.status = ReservationStatus::Released;
        released
    }
}
