//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values: an item
/// reference or a document line reference has no identity of its own beyond
/// the values it carries.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
