use serde::{Deserialize, Serialize};

use wareflow_core::{FinishedProductId, MaterialId, ValueObject, WarehouseId};

/// Reference to a stockable item.
///
/// Materials and finished products share warehouse space but live in distinct
/// catalogs, so an item is always addressed by catalog + id, never by a bare id.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ItemRef {
    Material(MaterialId),
    FinishedProduct(FinishedProductId),
}

impl ItemRef {
    pub fn material(id: MaterialId) -> Self {
        Self::Material(id)
    }

    pub fn finished_product(id: FinishedProductId) -> Self {
        Self::FinishedProduct(id)
    }

    pub fn item_type(&self) -> &'static str {
        match self {
            ItemRef::Material(_) => "material",
            ItemRef::FinishedProduct(_) => "finished_product",
        }
    }
}

impl core::fmt::Display for ItemRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ItemRef::Material(id) => write!(f, "{}:{id}", self.item_type()),
            ItemRef::FinishedProduct(id) => write!(f, "{}:{id}", self.item_type()),
        }
    }
}

impl ValueObject for ItemRef {}

/// Unique key of a stock balance: one row per (item, warehouse).
///
/// Ordered so that multi-key lock acquisition can happen in a single global order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BalanceKey {
    pub item: ItemRef,
    pub warehouse: WarehouseId,
}

impl BalanceKey {
    pub fn new(item: ItemRef, warehouse: WarehouseId) -> Self {
        Self { item, warehouse }
    }
}

impl core::fmt::Display for BalanceKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}", self.item, self.warehouse)
    }
}

impl ValueObject for BalanceKey {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_ref_serializes_as_tagged_union() {
        let id = MaterialId::new();
        let json = serde_json::to_value(ItemRef::material(id)).unwrap();
        assert_eq!(json["type"], "material");
        assert_eq!(json["id"], id.to_string());

        let back: ItemRef = serde_json::from_value(json).unwrap();
        assert_eq!(back, ItemRef::Material(id));
    }

    #[test]
    fn display_prefix_matches_serialized_tag() {
        let product = ItemRef::finished_product(FinishedProductId::new());
        let json = serde_json::to_value(product).unwrap();
        assert_eq!(json["type"], product.item_type());
        assert!(product.to_string().starts_with("finished_product:"));
    }

    #[test]
    fn material_and_product_with_same_uuid_are_distinct_keys() {
        let uuid = uuid::Uuid::now_v7();
        let warehouse = WarehouseId::new();
        let material = BalanceKey::new(ItemRef::material(MaterialId::from_uuid(uuid)), warehouse);
        let product = BalanceKey::new(
            ItemRef::finished_product(FinishedProductId::from_uuid(uuid)),
            warehouse,
        );
        assert_ne!(material, product);
    }
}
