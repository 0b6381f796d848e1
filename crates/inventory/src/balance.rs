use serde::{Deserialize, Serialize};

use wareflow_core::{DomainError, DomainResult, WarehouseId};

use crate::item::{BalanceKey, ItemRef};

/// Materialized stock summary for one (item, warehouse) key.
///
/// `quantity` is the sum of all ledger deltas for the key and `reserved_quantity`
/// the sum of active reservations. The balance is a cache over the ledger: it
/// must always be re-derivable from it. A zero balance is a valid terminal
/// state; balances are never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBalance {
    pub item: ItemRef,
    pub warehouse: WarehouseId,
    quantity: i64,
    reserved_quantity: i64,
}

impl StockBalance {
    /// Fresh balance for a key that has never seen a movement.
    pub fn empty(key: BalanceKey) -> Self {
        Self {
            item: key.item,
            warehouse: key.warehouse,
            quantity: 0,
            reserved_quantity: 0,
        }
    }

    pub fn key(&self) -> BalanceKey {
        BalanceKey::new(self.item, self.warehouse)
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn reserved_quantity(&self) -> i64 {
        self.reserved_quantity
    }

    /// `quantity - reserved_quantity`, never stored.
    pub fn available_quantity(&self) -> i64 {
        self.quantity.saturating_sub(self.reserved_quantity)
    }

    /// Apply a physical stock movement.
    ///
    /// A ledger delta is a fact that already happened, so this never consults
    /// reservations. Callers posting outbound documents validate the resulting
    /// state with [`StockBalance::check_invariant`]. A delta that would take the
    /// quantity outside the `i64` range is rejected and leaves the balance as is.
    pub fn apply_delta(&mut self, delta: i64) -> DomainResult<()> {
        self.quantity = self.quantity.checked_add(delta).ok_or_else(|| {
            DomainError::validation(format!(
                "quantity out of range (quantity: {}, delta: {delta})",
                self.quantity
            ))
        })?;
        Ok(())
    }

    /// Increase or decrease the reserved quantity.
    ///
    /// Increases are capacity-checked against the available quantity; the
    /// balance is left untouched when the change is rejected.
    pub fn apply_reservation_delta(&mut self, delta: i64) -> DomainResult<()> {
        let reserved = self.reserved_quantity.checked_add(delta).ok_or_else(|| {
            DomainError::validation(format!(
                "reserved quantity out of range (reserved: {}, delta: {delta})",
                self.reserved_quantity
            ))
        })?;
        if reserved < 0 {
            return Err(DomainError::validation(format!(
                "reserved quantity cannot go negative (reserved: {}, delta: {delta})",
                self.reserved_quantity
            )));
        }
        if delta > 0 && reserved > self.quantity {
            return Err(DomainError::insufficient(delta, self.available_quantity()));
        }
        self.reserved_quantity = reserved;
        Ok(())
    }

    /// `0 <= reserved_quantity <= quantity`.
    pub fn check_invariant(&self) -> DomainResult<()> {
        if self.reserved_quantity < 0 || self.reserved_quantity > self.quantity {
            return Err(DomainError::insufficient(
                self.reserved_quantity,
                self.quantity.max(0),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use wareflow_core::MaterialId;

    fn test_key() -> BalanceKey {
        BalanceKey::new(ItemRef::material(MaterialId::new()), WarehouseId::new())
    }

    #[test]
    fn available_is_quantity_minus_reserved() {
        let mut balance = StockBalance::empty(test_key());
        balance.apply_delta(100).unwrap();
        balance.apply_reservation_delta(30).unwrap();
        assert_eq!(balance.quantity(), 100);
        assert_eq!(balance.reserved_quantity(), 30);
        assert_eq!(balance.available_quantity(), 70);
    }

    #[test]
    fn reservation_beyond_available_is_rejected_without_change() {
        let mut balance = StockBalance::empty(test_key());
        balance.apply_delta(10).unwrap();
        balance.apply_reservation_delta(8).unwrap();
        let before = balance.clone();

        let err = balance.apply_reservation_delta(3).unwrap_err();
        assert_eq!(err, DomainError::insufficient(3, 2));
        assert_eq!(balance, before);
    }

    #[test]
    fn outbound_delta_is_never_blocked_but_invariant_reports_it() {
        let mut balance = StockBalance::empty(test_key());
        balance.apply_delta(10).unwrap();
        balance.apply_reservation_delta(10).unwrap();
        balance.apply_delta(-5).unwrap();
        assert_eq!(balance.quantity(), 5);
        assert!(matches!(
            balance.check_invariant(),
            Err(DomainError::InsufficientAvailable { .. })
        ));
    }

    #[test]
    fn releasing_more_than_reserved_is_a_validation_error() {
        let mut balance = StockBalance::empty(test_key());
        balance.apply_delta(5).unwrap();
        balance.apply_reservation_delta(2).unwrap();
        assert!(matches!(
            balance.apply_reservation_delta(-3),
            Err(DomainError::Validation(_))
        ));
        assert_eq!(balance.reserved_quantity(), 2);
    }

    #[test]
    fn quantity_overflow_is_rejected_without_change() {
        let mut balance = StockBalance::empty(test_key());
        balance.apply_delta(i64::MAX).unwrap();
        let before = balance.clone();

        assert!(matches!(
            balance.apply_delta(1),
            Err(DomainError::Validation(msg)) if msg.contains("out of range")
        ));
        assert_eq!(balance, before);

        balance.apply_delta(-i64::MAX).unwrap();
        balance.apply_delta(-i64::MAX).unwrap();
        assert!(balance.apply_delta(-2).is_err());
        assert_eq!(balance.quantity(), -i64::MAX);
        assert_eq!(balance.available_quantity(), -i64::MAX);
    }

    #[test]
    fn reservation_overflow_is_rejected_without_change() {
        let mut balance = StockBalance::empty(test_key());
        balance.apply_delta(i64::MAX).unwrap();
        balance.apply_reservation_delta(i64::MAX).unwrap();
        let before = balance.clone();

        assert!(matches!(
            balance.apply_reservation_delta(1),
            Err(DomainError::Validation(_))
        ));
        assert_eq!(balance, before);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: whatever sequence of receipts and reservation requests is
        /// attempted, accepted reservations never exceed on-hand quantity.
        #[test]
        fn reserved_never_exceeds_quantity(
            ops in prop::collection::vec((any::<bool>(), 1i64..500i64), 1..60)
        ) {
            let mut balance = StockBalance::empty(test_key());
            for (is_receipt, amount) in ops {
                if is_receipt {
                    balance.apply_delta(amount).unwrap();
                } else {
                    let before = balance.clone();
                    if balance.apply_reservation_delta(amount).is_err() {
                        prop_assert_eq!(&balance, &before);
                    }
                }
                prop_assert!(balance.check_invariant().is_ok());
                prop_assert!(balance.available_quantity() >= 0);
            }
        }
    }
}
