//! Warehouse service: the surface the API layer calls.
//!
//! Builds document commands from per-call input (actor, business time), routes
//! them through the [`PostingCoordinator`] and exposes the read side: documents,
//! balances, ledger entries and reservations.
//!
//! Cross-document rules live here because they need two stores:
//! - a goods receipt linked to a purchase order must match the order's lines
//!   and warehouse, and posts only while the order still accepts receipts
//! - a material issue linked to a request posts only while the request is
//!   approved, and fulfils the request once nothing stays reserved for it
//!
//! A post holds the parent document's lock until it commits, so the parent
//! cannot be closed or cancelled halfway through. Parents are always locked
//! before children.

use chrono::Utc;
use tracing::{info, warn};

use wareflow_core::{
    Actor, AggregateRoot, DocumentLineRef, DocumentRef, ExpectedVersion, SupplierId, WarehouseId,
    Workflow,
};
use wareflow_inventory::{
    AdjustmentLineDraft, BalanceKey, CreateStockAdjustment, CreateStockTransfer, ItemRef,
    PostStockAdjustment, PostStockTransfer, ReservationId, StockAdjustment,
    StockAdjustmentCommand, StockAdjustmentId, StockAdjustmentStatus, StockBalance,
    StockDocument, StockLedgerEntry, StockReservation, StockTransfer, StockTransferCommand,
    StockTransferId, StockTransferStatus, TransferLineDraft, reconstruct_quantity,
};
use wareflow_purchasing::{
    AddLine, Approve, Cancel, Close, CreateGoodsReceiptNote, CreatePurchaseOrder,
    GoodsReceiptCommand, GoodsReceiptNote, GoodsReceiptNoteId, GoodsReceiptStatus,
    LineItemDraft, PostGoodsReceipt, PurchaseOrder, PurchaseOrderCommand, PurchaseOrderId,
    PurchaseOrderStatus, QcResult, ReceiptLineDraft, RecordQc,
};
use wareflow_requisition::{
    ApproveMaterialRequest, CancelMaterialRequest, CancelRequestLine, CreateMaterialIssueNote,
    CreateMaterialRequest, FulfillMaterialRequest, IssueLineDraft, MaterialIssueCommand,
    MaterialIssueNote, MaterialIssueNoteId, MaterialIssueStatus, MaterialRequest,
    MaterialRequestCommand, MaterialRequestId, MaterialRequestStatus, PostMaterialIssue,
    RequestLineDraft,
};

use crate::config::{LockPolicy, WarehouseConfig};
use crate::document_store::{DocumentStore, HistoryEntry, TransitionOutcome};
use crate::error::PostingError;
use crate::ledger_store::{DateRange, InMemoryLedgerStore, LedgerStore};
use crate::locking::acquire;
use crate::posting::PostingCoordinator;

/// A newly created draft and the result of creating it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created<I, S> {
    pub id: I,
    pub outcome: TransitionOutcome<S>,
}

/// Materialized balance checked against what the ledger and the reservation
/// book say it should be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub balance: StockBalance,
    /// Sum of every ledger delta for the key.
    pub ledger_quantity: i64,
    /// Sum of what active reservations for the key still hold.
    pub active_reserved: i64,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.balance.quantity() == self.ledger_quantity
            && self.balance.reserved_quantity() == self.active_reserved
    }
}

/// Access to the store holding documents of type `D`.
pub trait StoreFor<D: StockDocument> {
    fn store(&self) -> &DocumentStore<D>;
}

#[derive(Debug)]
pub struct WarehouseService<L = InMemoryLedgerStore> {
    coordinator: PostingCoordinator<L>,
    purchase_orders: DocumentStore<PurchaseOrder>,
    goods_receipts: DocumentStore<GoodsReceiptNote>,
    material_requests: DocumentStore<MaterialRequest>,
    material_issues: DocumentStore<MaterialIssueNote>,
    adjustments: DocumentStore<StockAdjustment>,
    transfers: DocumentStore<StockTransfer>,
}

macro_rules! store_for {
    ($doc:ty, $field:ident) => {
        impl<L: LedgerStore> StoreFor<$doc> for WarehouseService<L> {
            fn store(&self) -> &DocumentStore<$doc> {
                &self.$field
            }
        }
    };
}

store_for!(PurchaseOrder, purchase_orders);
store_for!(GoodsReceiptNote, goods_receipts);
store_for!(MaterialRequest, material_requests);
store_for!(MaterialIssueNote, material_issues);
store_for!(StockAdjustment, adjustments);
store_for!(StockTransfer, transfers);

impl WarehouseService<InMemoryLedgerStore> {
    /// Service over an in-memory ledger, with locking taken from `config`.
    pub fn in_memory(config: &WarehouseConfig) -> Self {
        Self::with_ledger(InMemoryLedgerStore::new(), config.lock_policy())
    }
}

impl Default for WarehouseService<InMemoryLedgerStore> {
    fn default() -> Self {
        Self::in_memory(&WarehouseConfig::default())
    }
}

impl<L: LedgerStore> WarehouseService<L> {
    pub fn with_ledger(ledger: L, policy: LockPolicy) -> Self {
        Self {
            coordinator: PostingCoordinator::new(ledger, policy),
            purchase_orders: DocumentStore::new(),
            goods_receipts: DocumentStore::new(),
            material_requests: DocumentStore::new(),
            material_issues: DocumentStore::new(),
            adjustments: DocumentStore::new(),
            transfers: DocumentStore::new(),
        }
    }

    pub fn coordinator(&self) -> &PostingCoordinator<L> {
        &self.coordinator
    }

    fn policy(&self) -> &LockPolicy {
        self.coordinator.policy()
    }

    // ---------------------------------------------------------------------
    // Documents (generic read side)
    // ---------------------------------------------------------------------

    pub fn get<D>(&self, id: &<D as AggregateRoot>::Id) -> Result<D, PostingError>
    where
        D: StockDocument,
        Self: StoreFor<D>,
    {
        <Self as StoreFor<D>>::store(self).get(id, self.policy())
    }

    /// Accepted transitions of one document, oldest first.
    pub fn history<D>(
        &self,
        id: &<D as AggregateRoot>::Id,
    ) -> Result<Vec<HistoryEntry>, PostingError>
    where
        D: StockDocument,
        Self: StoreFor<D>,
    {
        <Self as StoreFor<D>>::store(self).history(id, self.policy())
    }

    /// Actions the document's transition table allows from its current status.
    pub fn allowed_actions<D>(
        &self,
        id: &<D as AggregateRoot>::Id,
    ) -> Result<Vec<<D as Workflow>::Action>, PostingError>
    where
        D: StockDocument,
        Self: StoreFor<D>,
    {
        let document = self.get::<D>(id)?;
        Ok(D::allowed_actions(document.status()))
    }

    // ---------------------------------------------------------------------
    // Purchase orders
    // ---------------------------------------------------------------------

    pub fn create_purchase_order(
        &self,
        actor: &Actor,
        supplier_id: SupplierId,
        warehouse_id: WarehouseId,
        lines: Vec<LineItemDraft>,
    ) -> Result<Created<PurchaseOrderId, PurchaseOrderStatus>, PostingError> {
        let order_id = PurchaseOrderId::generate();
        let command = PurchaseOrderCommand::CreatePurchaseOrder(CreatePurchaseOrder {
            order_id,
            supplier_id,
            warehouse_id,
            lines,
            created_by: actor.user_id,
            occurred_at: Utc::now(),
        });
        let outcome = self
            .coordinator
            .create(&self.purchase_orders, order_id, actor, command)?;
        Ok(Created {
            id: order_id,
            outcome,
        })
    }

    pub fn add_purchase_order_line(
        &self,
        actor: &Actor,
        order_id: PurchaseOrderId,
        expected: ExpectedVersion,
        line: LineItemDraft,
    ) -> Result<TransitionOutcome<PurchaseOrderStatus>, PostingError> {
        let command = PurchaseOrderCommand::AddLine(AddLine {
            order_id,
            line,
            occurred_at: Utc::now(),
        });
        self.coordinator
            .execute(&self.purchase_orders, &order_id, expected, actor, command)
    }

    pub fn approve_purchase_order(
        &self,
        actor: &Actor,
        order_id: PurchaseOrderId,
        expected: ExpectedVersion,
    ) -> Result<TransitionOutcome<PurchaseOrderStatus>, PostingError> {
        let command = PurchaseOrderCommand::Approve(Approve {
            order_id,
            approved_by: actor.user_id,
            occurred_at: Utc::now(),
        });
        self.coordinator
            .execute(&self.purchase_orders, &order_id, expected, actor, command)
    }

    pub fn close_purchase_order(
        &self,
        actor: &Actor,
        order_id: PurchaseOrderId,
        expected: ExpectedVersion,
    ) -> Result<TransitionOutcome<PurchaseOrderStatus>, PostingError> {
        let command = PurchaseOrderCommand::Close(Close {
            order_id,
            closed_by: actor.user_id,
            occurred_at: Utc::now(),
        });
        self.coordinator
            .execute(&self.purchase_orders, &order_id, expected, actor, command)
    }

    pub fn cancel_purchase_order(
        &self,
        actor: &Actor,
        order_id: PurchaseOrderId,
        expected: ExpectedVersion,
        reason: Option<String>,
    ) -> Result<TransitionOutcome<PurchaseOrderStatus>, PostingError> {
        let command = PurchaseOrderCommand::Cancel(Cancel {
            order_id,
            cancelled_by: actor.user_id,
            reason,
            occurred_at: Utc::now(),
        });
        self.coordinator
            .execute(&self.purchase_orders, &order_id, expected, actor, command)
    }

    // ---------------------------------------------------------------------
    // Goods receipt notes
    // ---------------------------------------------------------------------

    /// Draft a receipt covering every line of an approved purchase order.
    pub fn receive_against_order(
        &self,
        actor: &Actor,
        order_id: PurchaseOrderId,
    ) -> Result<Created<GoodsReceiptNoteId, GoodsReceiptStatus>, PostingError> {
        let order = self.get::<PurchaseOrder>(&order_id)?;
        let receipt_id = GoodsReceiptNoteId::generate();
        let create = CreateGoodsReceiptNote::against_order(
            &order,
            receipt_id,
            actor.user_id,
            Utc::now(),
        )?;
        self.create_receipt(actor, create)
    }

    /// Draft a receipt with explicit lines, optionally linked to an order.
    pub fn create_goods_receipt(
        &self,
        actor: &Actor,
        purchase_order_id: Option<PurchaseOrderId>,
        supplier_id: SupplierId,
        warehouse_id: WarehouseId,
        lines: Vec<ReceiptLineDraft>,
    ) -> Result<Created<GoodsReceiptNoteId, GoodsReceiptStatus>, PostingError> {
        let create = CreateGoodsReceiptNote {
            receipt_id: GoodsReceiptNoteId::generate(),
            purchase_order_id,
            supplier_id,
            warehouse_id,
            lines,
            received_by: actor.user_id,
            occurred_at: Utc::now(),
        };
        self.create_receipt(actor, create)
    }

    fn create_receipt(
        &self,
        actor: &Actor,
        create: CreateGoodsReceiptNote,
    ) -> Result<Created<GoodsReceiptNoteId, GoodsReceiptStatus>, PostingError> {
        if let Some(order_id) = create.purchase_order_id {
            let order = self.get::<PurchaseOrder>(&order_id)?;
            create.check_against_order(&order)?;
        }
        let receipt_id = create.receipt_id;
        let outcome = self.coordinator.create(
            &self.goods_receipts,
            receipt_id,
            actor,
            GoodsReceiptCommand::Create(create),
        )?;
        Ok(Created {
            id: receipt_id,
            outcome,
        })
    }

    pub fn record_qc(
        &self,
        actor: &Actor,
        receipt_id: GoodsReceiptNoteId,
        expected: ExpectedVersion,
        results: Vec<QcResult>,
    ) -> Result<TransitionOutcome<GoodsReceiptStatus>, PostingError> {
        let command = GoodsReceiptCommand::RecordQc(RecordQc {
            receipt_id,
            results,
            inspected_by: actor.user_id,
            occurred_at: Utc::now(),
        });
        self.coordinator
            .execute(&self.goods_receipts, &receipt_id, expected, actor, command)
    }

    /// Post accepted quantities into stock. Repeating the call returns the
    /// first post's result.
    pub fn post_goods_receipt(
        &self,
        actor: &Actor,
        receipt_id: GoodsReceiptNoteId,
        expected: ExpectedVersion,
    ) -> Result<TransitionOutcome<GoodsReceiptStatus>, PostingError> {
        let command = GoodsReceiptCommand::Post(PostGoodsReceipt {
            receipt_id,
            posted_by: actor.user_id,
            occurred_at: Utc::now(),
        });

        // The order link never changes after creation.
        let order_slot = self
            .get::<GoodsReceiptNote>(&receipt_id)?
            .purchase_order_id()
            .map(|order_id| self.purchase_orders.slot(&order_id))
            .transpose()?;
        let order = order_slot
            .as_deref()
            .map(|slot| acquire(slot, self.policy(), &PurchaseOrder::KIND))
            .transpose()?;

        let outcome = self.coordinator.execute_guarded(
            &self.goods_receipts,
            &receipt_id,
            expected,
            actor,
            command,
            |_| match &order {
                Some(record) => ensure_order_accepts_receipts(&record.document),
                None => Ok(()),
            },
        )?;
        Ok(outcome)
    }

    // ---------------------------------------------------------------------
    // Material requests
    // ---------------------------------------------------------------------

    pub fn create_material_request(
        &self,
        actor: &Actor,
        warehouse_id: WarehouseId,
        purpose: Option<String>,
        lines: Vec<RequestLineDraft>,
    ) -> Result<Created<MaterialRequestId, MaterialRequestStatus>, PostingError> {
        let request_id = MaterialRequestId::generate();
        let command = MaterialRequestCommand::Create(CreateMaterialRequest {
            request_id,
            warehouse_id,
            purpose,
            lines,
            requested_by: actor.user_id,
            occurred_at: Utc::now(),
        });
        let outcome = self
            .coordinator
            .create(&self.material_requests, request_id, actor, command)?;
        Ok(Created {
            id: request_id,
            outcome,
        })
    }

    /// Approve and reserve every line. Fails with `InsufficientAvailable`
    /// (reserving nothing) when any line cannot be covered.
    pub fn approve_material_request(
        &self,
        actor: &Actor,
        request_id: MaterialRequestId,
        expected: ExpectedVersion,
    ) -> Result<TransitionOutcome<MaterialRequestStatus>, PostingError> {
        let command = MaterialRequestCommand::Approve(ApproveMaterialRequest {
            request_id,
            approved_by: actor.user_id,
            occurred_at: Utc::now(),
        });
        self.coordinator
            .execute(&self.material_requests, &request_id, expected, actor, command)
    }

    pub fn cancel_material_request_line(
        &self,
        actor: &Actor,
        request_id: MaterialRequestId,
        expected: ExpectedVersion,
        line_no: u32,
    ) -> Result<TransitionOutcome<MaterialRequestStatus>, PostingError> {
        let command = MaterialRequestCommand::CancelLine(CancelRequestLine {
            request_id,
            line_no,
            cancelled_by: actor.user_id,
            occurred_at: Utc::now(),
        });
        self.coordinator
            .execute(&self.material_requests, &request_id, expected, actor, command)
    }

    pub fn fulfill_material_request(
        &self,
        actor: &Actor,
        request_id: MaterialRequestId,
        expected: ExpectedVersion,
    ) -> Result<TransitionOutcome<MaterialRequestStatus>, PostingError> {
        let command = MaterialRequestCommand::Fulfill(FulfillMaterialRequest {
            request_id,
            fulfilled_by: actor.user_id,
            occurred_at: Utc::now(),
        });
        self.coordinator
            .execute(&self.material_requests, &request_id, expected, actor, command)
    }

    pub fn cancel_material_request(
        &self,
        actor: &Actor,
        request_id: MaterialRequestId,
        expected: ExpectedVersion,
        reason: Option<String>,
    ) -> Result<TransitionOutcome<MaterialRequestStatus>, PostingError> {
        let command = MaterialRequestCommand::Cancel(CancelMaterialRequest {
            request_id,
            cancelled_by: actor.user_id,
            reason,
            occurred_at: Utc::now(),
        });
        self.coordinator
            .execute(&self.material_requests, &request_id, expected, actor, command)
    }

    // ---------------------------------------------------------------------
    // Material issue notes
    // ---------------------------------------------------------------------

    /// Draft an issue for the full open quantity of an approved request.
    pub fn issue_against_request(
        &self,
        actor: &Actor,
        request_id: MaterialRequestId,
    ) -> Result<Created<MaterialIssueNoteId, MaterialIssueStatus>, PostingError> {
        let request = self.get::<MaterialRequest>(&request_id)?;
        let create = CreateMaterialIssueNote::against_request(
            &request,
            MaterialIssueNoteId::generate(),
            actor.user_id,
            Utc::now(),
        )?;
        self.create_issue(actor, create)
    }

    /// Draft an issue with explicit lines, optionally linked to a request.
    pub fn create_material_issue(
        &self,
        actor: &Actor,
        material_request_id: Option<MaterialRequestId>,
        warehouse_id: WarehouseId,
        lines: Vec<IssueLineDraft>,
    ) -> Result<Created<MaterialIssueNoteId, MaterialIssueStatus>, PostingError> {
        let create = CreateMaterialIssueNote {
            issue_id: MaterialIssueNoteId::generate(),
            material_request_id,
            warehouse_id,
            lines,
            issued_by: actor.user_id,
            occurred_at: Utc::now(),
        };
        self.create_issue(actor, create)
    }

    fn create_issue(
        &self,
        actor: &Actor,
        create: CreateMaterialIssueNote,
    ) -> Result<Created<MaterialIssueNoteId, MaterialIssueStatus>, PostingError> {
        let issue_id = create.issue_id;
        let outcome = self.coordinator.create(
            &self.material_issues,
            issue_id,
            actor,
            MaterialIssueCommand::Create(create),
        )?;
        Ok(Created {
            id: issue_id,
            outcome,
        })
    }

    /// Post the issue: consume linked reservations and book outbound entries.
    ///
    /// When the linked request has nothing left reserved afterwards it is
    /// fulfilled in a follow-up transition; a failure there is logged and does
    /// not affect the committed issue.
    pub fn post_material_issue(
        &self,
        actor: &Actor,
        issue_id: MaterialIssueNoteId,
        expected: ExpectedVersion,
    ) -> Result<TransitionOutcome<MaterialIssueStatus>, PostingError> {
        let command = MaterialIssueCommand::Post(PostMaterialIssue {
            issue_id,
            posted_by: actor.user_id,
            occurred_at: Utc::now(),
        });

        // The request link never changes after creation.
        let linked_request = self
            .get::<MaterialIssueNote>(&issue_id)?
            .material_request_id();
        let request_slot = linked_request
            .map(|request_id| self.material_requests.slot(&request_id))
            .transpose()?;
        let request = request_slot
            .as_deref()
            .map(|slot| acquire(slot, self.policy(), &MaterialRequest::KIND))
            .transpose()?;

        let outcome = self.coordinator.execute_guarded(
            &self.material_issues,
            &issue_id,
            expected,
            actor,
            command,
            |_| match &request {
                Some(record) => ensure_request_accepts_issues(&record.document),
                None => Ok(()),
            },
        )?;
        drop(request);

        if let Some(request_id) = linked_request {
            if let Err(err) = self.fulfill_if_settled(actor, request_id) {
                warn!(request = %request_id, error = %err, "automatic fulfilment skipped");
            }
        }
        Ok(outcome)
    }

    /// Fulfil an approved request once none of its reservations is active.
    fn fulfill_if_settled(
        &self,
        actor: &Actor,
        request_id: MaterialRequestId,
    ) -> Result<(), PostingError> {
        let request = self.get::<MaterialRequest>(&request_id)?;
        if !request.accepts_issues() {
            return Ok(());
        }
        let still_reserved = self
            .reservations_for_document(request.document_ref())?
            .iter()
            .any(StockReservation::is_active);
        if still_reserved {
            return Ok(());
        }

        self.fulfill_material_request(
            actor,
            request_id,
            ExpectedVersion::Exact(request.version()),
        )?;
        info!(request = %request_id, "material request fulfilled by issue");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Adjustments and transfers
    // ---------------------------------------------------------------------

    pub fn create_stock_adjustment(
        &self,
        actor: &Actor,
        warehouse_id: WarehouseId,
        reason: impl Into<String>,
        lines: Vec<AdjustmentLineDraft>,
    ) -> Result<Created<StockAdjustmentId, StockAdjustmentStatus>, PostingError> {
        let adjustment_id = StockAdjustmentId::generate();
        let command = StockAdjustmentCommand::Create(CreateStockAdjustment {
            adjustment_id,
            warehouse_id,
            reason: reason.into(),
            lines,
            created_by: actor.user_id,
            occurred_at: Utc::now(),
        });
        let outcome = self
            .coordinator
            .create(&self.adjustments, adjustment_id, actor, command)?;
        Ok(Created {
            id: adjustment_id,
            outcome,
        })
    }

    pub fn post_stock_adjustment(
        &self,
        actor: &Actor,
        adjustment_id: StockAdjustmentId,
        expected: ExpectedVersion,
    ) -> Result<TransitionOutcome<StockAdjustmentStatus>, PostingError> {
        let command = StockAdjustmentCommand::Post(PostStockAdjustment {
            adjustment_id,
            posted_by: actor.user_id,
            occurred_at: Utc::now(),
        });
        self.coordinator
            .execute(&self.adjustments, &adjustment_id, expected, actor, command)
    }

    pub fn create_stock_transfer(
        &self,
        actor: &Actor,
        from_warehouse: WarehouseId,
        to_warehouse: WarehouseId,
        lines: Vec<TransferLineDraft>,
    ) -> Result<Created<StockTransferId, StockTransferStatus>, PostingError> {
        let transfer_id = StockTransferId::generate();
        let command = StockTransferCommand::Create(CreateStockTransfer {
            transfer_id,
            from_warehouse,
            to_warehouse,
            lines,
            created_by: actor.user_id,
            occurred_at: Utc::now(),
        });
        let outcome = self
            .coordinator
            .create(&self.transfers, transfer_id, actor, command)?;
        Ok(Created {
            id: transfer_id,
            outcome,
        })
    }

    pub fn post_stock_transfer(
        &self,
        actor: &Actor,
        transfer_id: StockTransferId,
        expected: ExpectedVersion,
    ) -> Result<TransitionOutcome<StockTransferStatus>, PostingError> {
        let command = StockTransferCommand::Post(PostStockTransfer {
            transfer_id,
            posted_by: actor.user_id,
            occurred_at: Utc::now(),
        });
        self.coordinator
            .execute(&self.transfers, &transfer_id, expected, actor, command)
    }

    // ---------------------------------------------------------------------
    // Stock read side
    // ---------------------------------------------------------------------

    pub fn get_balance(
        &self,
        item: ItemRef,
        warehouse: WarehouseId,
    ) -> Result<StockBalance, PostingError> {
        self.coordinator
            .balances()
            .get_balance(BalanceKey::new(item, warehouse), self.policy())
    }

    /// Balances for several keys, read together.
    pub fn get_balances(&self, keys: &[BalanceKey]) -> Result<Vec<StockBalance>, PostingError> {
        self.coordinator.balances().get_balances(keys, self.policy())
    }

    pub fn ledger_entries(
        &self,
        item: ItemRef,
        warehouse: WarehouseId,
        range: Option<DateRange>,
    ) -> Result<Vec<StockLedgerEntry>, PostingError> {
        Ok(self
            .coordinator
            .ledger()
            .entries_for(&BalanceKey::new(item, warehouse), range)?)
    }

    pub fn ledger_entries_for_document(
        &self,
        document: DocumentRef,
    ) -> Result<Vec<StockLedgerEntry>, PostingError> {
        Ok(self.coordinator.ledger().entries_for_document(document)?)
    }

    pub fn reservation(&self, id: ReservationId) -> Result<StockReservation, PostingError> {
        self.coordinator.reservations().get(id)
    }

    pub fn reservations_for_line(
        &self,
        owner: DocumentLineRef,
    ) -> Result<Vec<StockReservation>, PostingError> {
        self.coordinator.reservations().for_owner(owner)
    }

    pub fn reservations_for_document(
        &self,
        document: DocumentRef,
    ) -> Result<Vec<StockReservation>, PostingError> {
        self.coordinator.reservations().for_document(document)
    }

    /// Recompute one key from the ledger and the reservation book while the
    /// key is held, and compare with the materialized balance.
    pub fn reconcile(
        &self,
        item: ItemRef,
        warehouse: WarehouseId,
    ) -> Result<Reconciliation, PostingError> {
        let key = BalanceKey::new(item, warehouse);
        let cells = self.coordinator.balances().existing_cells(&[key])?;
        let held = cells.lock(self.policy())?;

        let balance = held
            .balance(&key)
            .cloned()
            .unwrap_or_else(|| StockBalance::empty(key));
        let entries = self.coordinator.ledger().entries_for(&key, None)?;
        let active_reserved: i64 = self
            .coordinator
            .reservations()
            .active_for_key(&key)?
            .iter()
            .map(StockReservation::outstanding)
            .sum();
        drop(held);

        let reconciliation = Reconciliation {
            balance,
            ledger_quantity: reconstruct_quantity(&entries),
            active_reserved,
        };
        if !reconciliation.is_consistent() {
            warn!(
                %key,
                quantity = reconciliation.balance.quantity(),
                ledger_quantity = reconciliation.ledger_quantity,
                reserved = reconciliation.balance.reserved_quantity(),
                active_reserved,
                "balance diverges from ledger"
            );
        }
        Ok(reconciliation)
    }
}

fn ensure_order_accepts_receipts(order: &PurchaseOrder) -> Result<(), PostingError> {
    if order.accepts_receipts() {
        Ok(())
    } else {
        Err(PostingError::InvalidTransition(format!(
            "purchase order {} no longer accepts receipts",
            order.id_typed()
        )))
    }
}

fn ensure_request_accepts_issues(request: &MaterialRequest) -> Result<(), PostingError> {
    if request.accepts_issues() {
        Ok(())
    } else {
        Err(PostingError::InvalidTransition(format!(
            "material request {} is not approved",
            request.id_typed()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wareflow_core::{MaterialId, UserId};

    #[test]
    fn receipt_post_holds_the_order_until_it_commits() {
        let service = WarehouseService::with_ledger(
            InMemoryLedgerStore::new(),
            LockPolicy {
                max_attempts: 2,
                backoff: Duration::from_millis(1),
            },
        );
        let actor = Actor::new(UserId::new(), "storekeeper");
        let item = ItemRef::material(MaterialId::new());
        let warehouse = WarehouseId::new();

        let order = service
            .create_purchase_order(
                &actor,
                SupplierId::new(),
                warehouse,
                vec![LineItemDraft {
                    item,
                    quantity: 5,
                    unit_price: 100,
                }],
            )
            .unwrap();
        service
            .approve_purchase_order(&actor, order.id, ExpectedVersion::Any)
            .unwrap();
        let receipt = service.receive_against_order(&actor, order.id).unwrap();
        service
            .record_qc(
                &actor,
                receipt.id,
                ExpectedVersion::Any,
                vec![QcResult {
                    line_no: 1,
                    accepted_quantity: 5,
                    rejected_quantity: 0,
                }],
            )
            .unwrap();

        // While the order is held elsewhere the post cannot start.
        let slot = service.purchase_orders.slot(&order.id).unwrap();
        let held = slot.lock().unwrap();
        let err = service
            .post_goods_receipt(&actor, receipt.id, ExpectedVersion::Any)
            .unwrap_err();
        assert!(err.is_retryable());
        drop(held);

        service
            .close_purchase_order(&actor, order.id, ExpectedVersion::Any)
            .unwrap();
        let err = service
            .post_goods_receipt(&actor, receipt.id, ExpectedVersion::Any)
            .unwrap_err();
        assert!(matches!(err, PostingError::InvalidTransition(_)));
        assert_eq!(service.get_balance(item, warehouse).unwrap().quantity(), 0);
    }

    #[test]
    fn issue_post_holds_the_request_until_it_commits() {
        let service = WarehouseService::with_ledger(
            InMemoryLedgerStore::new(),
            LockPolicy {
                max_attempts: 2,
                backoff: Duration::from_millis(1),
            },
        );
        let actor = Actor::new(UserId::new(), "storekeeper");
        let item = ItemRef::material(MaterialId::new());
        let warehouse = WarehouseId::new();

        let stock = service
            .create_stock_adjustment(
                &actor,
                warehouse,
                "opening stock",
                vec![AdjustmentLineDraft {
                    item,
                    delta: 20,
                    note: None,
                }],
            )
            .unwrap();
        service
            .post_stock_adjustment(&actor, stock.id, ExpectedVersion::Any)
            .unwrap();
        let request = service
            .create_material_request(
                &actor,
                warehouse,
                None,
                vec![RequestLineDraft { item, quantity: 8 }],
            )
            .unwrap();
        service
            .approve_material_request(&actor, request.id, ExpectedVersion::Any)
            .unwrap();
        let issue = service.issue_against_request(&actor, request.id).unwrap();

        let slot = service.material_requests.slot(&request.id).unwrap();
        let held = slot.lock().unwrap();
        let err = service
            .post_material_issue(&actor, issue.id, ExpectedVersion::Any)
            .unwrap_err();
        assert!(err.is_retryable());
        drop(held);

        let posted = service
            .post_material_issue(&actor, issue.id, ExpectedVersion::Any)
            .unwrap();
        assert_eq!(posted.status, MaterialIssueStatus::Posted);
        assert_eq!(
            service.get::<MaterialRequest>(&request.id).unwrap().status(),
            MaterialRequestStatus::Fulfilled
        );
        assert_eq!(service.get_balance(item, warehouse).unwrap().quantity(), 12);
    }
}
