//! Infrastructure layer: ledger storage, balances, reservations, document
//! storage and the posting coordinator that ties them into atomic units of
//! work.

pub mod balance;
pub mod config;
pub mod document_store;
pub mod error;
pub mod ledger_store;
pub mod locking;
pub mod posting;
pub mod reservation;
pub mod service;

pub use balance::BalanceAggregator;
pub use config::{LockPolicy, WarehouseConfig};
pub use document_store::{DocumentRecord, DocumentStore, HistoryEntry, TransitionOutcome};
pub use error::PostingError;
pub use ledger_store::{DateRange, InMemoryLedgerStore, LedgerStore, LedgerStoreError};
pub use posting::PostingCoordinator;
pub use reservation::ReservationManager;
pub use service::{Created, Reconciliation, StoreFor, WarehouseService};
