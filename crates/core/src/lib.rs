//! `wareflow-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod document;
pub mod error;
pub mod id;
pub mod value_object;
pub mod workflow;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use document::{Actor, DocumentKind, DocumentLineRef, DocumentRef};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, FinishedProductId, MaterialId, SupplierId, UserId, WarehouseId};
pub use value_object::ValueObject;
pub use workflow::{Transition, Workflow};
