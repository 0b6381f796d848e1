use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wareflow_core::{
    Aggregate, AggregateId, AggregateRoot, DocumentKind, DomainError, SupplierId, Transition,
    UserId, WarehouseId, Workflow, document_id,
};
use wareflow_events::Event;
use wareflow_inventory::{ItemRef, StockDocument, StockEffect};

document_id!(
    /// Purchase order identifier.
    PurchaseOrderId
);

/// Purchase order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseOrderStatus {
    Draft,
    Approved,
    Closed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseOrderAction {
    AddLine,
    Approve,
    Close,
    Cancel,
}

/// Purchase order line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub line_no: u32,
    pub item: ItemRef,
    pub quantity: i64,
    /// Price per unit in the smallest currency unit (e.g. cents).
    pub unit_price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemDraft {
    pub item: ItemRef,
    pub quantity: i64,
    pub unit_price: i64,
}

/// Aggregate root: PurchaseOrder.
///
/// Approving an order has no stock effect; stock arrives through goods receipt
/// notes posted against it, as often as needed until the order is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    supplier_id: Option<SupplierId>,
    warehouse_id: Option<WarehouseId>,
    status: PurchaseOrderStatus,
    lines: Vec<LineItem>,
    created_by: Option<UserId>,
    approved_by: Option<UserId>,
    approved_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl PurchaseOrder {
    pub fn id_typed(&self) -> PurchaseOrderId {
        self.id
    }

    pub fn supplier_id(&self) -> Option<SupplierId> {
        self.supplier_id
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn lines(&self) -> &[LineItem] {
        &self.lines
    }

    pub fn line(&self, line_no: u32) -> Option<&LineItem> {
        self.lines.iter().find(|l| l.line_no == line_no)
    }

    pub fn approved_by(&self) -> Option<UserId> {
        self.approved_by
    }

    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        self.approved_at
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    /// Whether goods may still be received against this order.
    pub fn accepts_receipts(&self) -> bool {
        self.status == PurchaseOrderStatus::Approved
    }
}

impl AggregateRoot for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Workflow for PurchaseOrder {
    type Status = PurchaseOrderStatus;
    type Action = PurchaseOrderAction;

    const TRANSITIONS: &'static [Transition<PurchaseOrderStatus, PurchaseOrderAction>] = &[
        Transition {
            action: PurchaseOrderAction::AddLine,
            from: &[PurchaseOrderStatus::Draft],
            to: PurchaseOrderStatus::Draft,
        },
        Transition {
            action: PurchaseOrderAction::Approve,
            from: &[PurchaseOrderStatus::Draft],
            to: PurchaseOrderStatus::Approved,
        },
        Transition {
            action: PurchaseOrderAction::Close,
            from: &[PurchaseOrderStatus::Approved],
            to: PurchaseOrderStatus::Closed,
        },
        Transition {
            action: PurchaseOrderAction::Cancel,
            from: &[PurchaseOrderStatus::Draft, PurchaseOrderStatus::Approved],
            to: PurchaseOrderStatus::Cancelled,
        },
    ];
}

/// Command: CreatePurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePurchaseOrder {
    pub order_id: PurchaseOrderId,
    pub supplier_id: SupplierId,
    pub warehouse_id: WarehouseId,
    pub lines: Vec<LineItemDraft>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddLine (only allowed in Draft).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLine {
    pub order_id: PurchaseOrderId,
    pub line: LineItemDraft,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Approve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approve {
    pub order_id: PurchaseOrderId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Close {
    pub order_id: PurchaseOrderId,
    pub closed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancel {
    pub order_id: PurchaseOrderId,
    pub cancelled_by: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderCommand {
    CreatePurchaseOrder(CreatePurchaseOrder),
    AddLine(AddLine),
    Approve(Approve),
    Close(Close),
    Cancel(Cancel),
}

/// Event: PurchaseOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCreated {
    pub order_id: PurchaseOrderId,
    pub supplier_id: SupplierId,
    pub warehouse_id: WarehouseId,
    pub lines: Vec<LineItem>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderLineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderLineAdded {
    pub order_id: PurchaseOrderId,
    pub line: LineItem,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderApproved {
    pub order_id: PurchaseOrderId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderClosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderClosed {
    pub order_id: PurchaseOrderId,
    pub closed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PurchaseOrderCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCancelled {
    pub order_id: PurchaseOrderId,
    pub cancelled_by: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderEvent {
    PurchaseOrderCreated(PurchaseOrderCreated),
    PurchaseOrderLineAdded(PurchaseOrderLineAdded),
    PurchaseOrderApproved(PurchaseOrderApproved),
    PurchaseOrderClosed(PurchaseOrderClosed),
    PurchaseOrderCancelled(PurchaseOrderCancelled),
}

impl Event for PurchaseOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(_) => "purchasing.order.created",
            PurchaseOrderEvent::PurchaseOrderLineAdded(_) => "purchasing.order.line_added",
            PurchaseOrderEvent::PurchaseOrderApproved(_) => "purchasing.order.approved",
            PurchaseOrderEvent::PurchaseOrderClosed(_) => "purchasing.order.closed",
            PurchaseOrderEvent::PurchaseOrderCancelled(_) => "purchasing.order.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderLineAdded(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderApproved(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderClosed(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PurchaseOrder {
    type Command = PurchaseOrderCommand;
    type Event = PurchaseOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => {
                self.id = e.order_id;
                self.supplier_id = Some(e.supplier_id);
                self.warehouse_id = Some(e.warehouse_id);
                self.status = PurchaseOrderStatus::Draft;
                self.lines = e.lines.clone();
                self.created_by = Some(e.created_by);
                self.created = true;
            }
            PurchaseOrderEvent::PurchaseOrderLineAdded(e) => {
                self.lines.push(e.line.clone());
            }
            PurchaseOrderEvent::PurchaseOrderApproved(e) => {
                self.status = PurchaseOrderStatus::Approved;
                self.approved_by = Some(e.approved_by);
                self.approved_at = Some(e.occurred_at);
            }
            PurchaseOrderEvent::PurchaseOrderClosed(e) => {
                self.status = PurchaseOrderStatus::Closed;
                self.closed_at = Some(e.occurred_at);
            }
            PurchaseOrderEvent::PurchaseOrderCancelled(e) => {
                self.status = PurchaseOrderStatus::Cancelled;
                self.closed_at = Some(e.occurred_at);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PurchaseOrderCommand::CreatePurchaseOrder(cmd) => self.handle_create(cmd),
            PurchaseOrderCommand::AddLine(cmd) => self.handle_add_line(cmd),
            PurchaseOrderCommand::Approve(cmd) => self.handle_approve(cmd),
            PurchaseOrderCommand::Close(cmd) => self.handle_close(cmd),
            PurchaseOrderCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl StockDocument for PurchaseOrder {
    const KIND: DocumentKind = DocumentKind::PurchaseOrder;

    fn empty(id: PurchaseOrderId) -> Self {
        Self {
            id,
            supplier_id: None,
            warehouse_id: None,
            status: PurchaseOrderStatus::Draft,
            lines: Vec::new(),
            created_by: None,
            approved_by: None,
            approved_at: None,
            closed_at: None,
            version: 0,
            created: false,
        }
    }

    fn aggregate_id(&self) -> AggregateId {
        self.id.0
    }

    fn status(&self) -> PurchaseOrderStatus {
        self.status
    }

    fn stock_effect(&self, _event: &PurchaseOrderEvent) -> StockEffect {
        StockEffect::none()
    }
}

fn validate_line(line: &LineItemDraft) -> Result<(), DomainError> {
    if line.quantity <= 0 {
        return Err(DomainError::validation("quantity must be positive"));
    }
    if line.unit_price < 0 {
        return Err(DomainError::validation("unit price cannot be negative"));
    }
    Ok(())
}

impl PurchaseOrder {
    fn ensure_order_id(&self, order_id: PurchaseOrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::validation("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(&self, order_id: PurchaseOrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_order_id(order_id)
    }

    fn handle_create(
        &self,
        cmd: &CreatePurchaseOrder,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("purchase order already exists"));
        }
        for line in &cmd.lines {
            validate_line(line)?;
        }

        let lines = cmd
            .lines
            .iter()
            .zip(1u32..)
            .map(|(draft, line_no)| LineItem {
                line_no,
                item: draft.item,
                quantity: draft.quantity,
                unit_price: draft.unit_price,
            })
            .collect();

        Ok(vec![PurchaseOrderEvent::PurchaseOrderCreated(
            PurchaseOrderCreated {
                order_id: cmd.order_id,
                supplier_id: cmd.supplier_id,
                warehouse_id: cmd.warehouse_id,
                lines,
                created_by: cmd.created_by,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        Self::transition(self.status, PurchaseOrderAction::AddLine)?;
        validate_line(&cmd.line)?;

        let next_line_no = (self.lines.len() as u32) + 1;
        Ok(vec![PurchaseOrderEvent::PurchaseOrderLineAdded(
            PurchaseOrderLineAdded {
                order_id: cmd.order_id,
                line: LineItem {
                    line_no: next_line_no,
                    item: cmd.line.item,
                    quantity: cmd.line.quantity,
                    unit_price: cmd.line.unit_price,
                },
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_approve(&self, cmd: &Approve) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        Self::transition(self.status, PurchaseOrderAction::Approve)?;

        if self.lines.is_empty() {
            return Err(DomainError::validation(
                "cannot approve purchase order without lines",
            ));
        }

        Ok(vec![PurchaseOrderEvent::PurchaseOrderApproved(
            PurchaseOrderApproved {
                order_id: cmd.order_id,
                approved_by: cmd.approved_by,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_close(&self, cmd: &Close) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        Self::transition(self.status, PurchaseOrderAction::Close)?;

        Ok(vec![PurchaseOrderEvent::PurchaseOrderClosed(
            PurchaseOrderClosed {
                order_id: cmd.order_id,
                closed_by: cmd.closed_by,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_cancel(&self, cmd: &Cancel) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_exists(cmd.order_id)?;
        Self::transition(self.status, PurchaseOrderAction::Cancel)?;

        Ok(vec![PurchaseOrderEvent::PurchaseOrderCancelled(
            PurchaseOrderCancelled {
                order_id: cmd.order_id,
                cancelled_by: cmd.cancelled_by,
                reason: cmd.reason.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use wareflow_core::MaterialId;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn test_line(quantity: i64) -> LineItemDraft {
        LineItemDraft {
            item: ItemRef::material(MaterialId::new()),
            quantity,
            unit_price: 250,
        }
    }

    fn create_cmd(order_id: PurchaseOrderId, lines: Vec<LineItemDraft>) -> CreatePurchaseOrder {
        CreatePurchaseOrder {
            order_id,
            supplier_id: SupplierId::new(),
            warehouse_id: WarehouseId::new(),
            lines,
            created_by: UserId::new(),
            occurred_at: test_time(),
        }
    }

    pub(crate) fn approved_order(quantities: &[i64]) -> PurchaseOrder {
        let order_id = PurchaseOrderId::generate();
        let mut order = PurchaseOrder::empty(order_id);
        let lines = quantities.iter().map(|q| test_line(*q)).collect();
        let events = order
            .handle(&PurchaseOrderCommand::CreatePurchaseOrder(create_cmd(
                order_id, lines,
            )))
            .unwrap();
        order.apply(&events[0]);
        let events = order
            .handle(&PurchaseOrderCommand::Approve(Approve {
                order_id,
                approved_by: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap();
        order.apply(&events[0]);
        order
    }

    #[test]
    fn create_purchase_order_emits_purchase_order_created_event() {
        let order_id = PurchaseOrderId::generate();
        let order = PurchaseOrder::empty(order_id);
        let cmd = create_cmd(order_id, vec![test_line(10)]);

        let events = order
            .handle(&PurchaseOrderCommand::CreatePurchaseOrder(cmd.clone()))
            .unwrap();
        assert_eq!(events.len(), 1);

        match &events[0] {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => {
                assert_eq!(e.order_id, order_id);
                assert_eq!(e.supplier_id, cmd.supplier_id);
                assert_eq!(e.lines.len(), 1);
                assert_eq!(e.lines[0].line_no, 1);
            }
            _ => panic!("Expected PurchaseOrderCreated event"),
        }
    }

    #[test]
    fn approve_moves_status_to_approved_and_stamps_approver() {
        let order = approved_order(&[10, 4]);
        assert_eq!(order.status(), PurchaseOrderStatus::Approved);
        assert!(order.approved_by().is_some());
        assert!(order.accepts_receipts());
    }

    #[test]
    fn cannot_approve_without_lines() {
        let order_id = PurchaseOrderId::generate();
        let mut order = PurchaseOrder::empty(order_id);
        let events = order
            .handle(&PurchaseOrderCommand::CreatePurchaseOrder(create_cmd(
                order_id,
                vec![],
            )))
            .unwrap();
        order.apply(&events[0]);

        let err = order
            .handle(&PurchaseOrderCommand::Approve(Approve {
                order_id,
                approved_by: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn lines_cannot_be_added_after_approval() {
        let order = approved_order(&[10]);
        let err = order
            .handle(&PurchaseOrderCommand::AddLine(AddLine {
                order_id: order.id_typed(),
                line: test_line(1),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvalidTransition(msg) => assert!(msg.contains("AddLine")),
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    #[test]
    fn close_only_from_approved() {
        let mut order = approved_order(&[10]);
        let close = PurchaseOrderCommand::Close(Close {
            order_id: order.id_typed(),
            closed_by: UserId::new(),
            occurred_at: test_time(),
        });
        let events = order.handle(&close).unwrap();
        order.apply(&events[0]);
        assert_eq!(order.status(), PurchaseOrderStatus::Closed);
        assert!(!order.accepts_receipts());

        assert!(matches!(
            order.handle(&close),
            Err(DomainError::InvalidTransition(_))
        ));
        assert!(PurchaseOrder::allowed_actions(order.status()).is_empty());
    }

    #[test]
    fn approval_has_no_stock_effect() {
        let order = approved_order(&[10]);
        let created = PurchaseOrderEvent::PurchaseOrderApproved(PurchaseOrderApproved {
            order_id: order.id_typed(),
            approved_by: UserId::new(),
            occurred_at: test_time(),
        });
        assert!(order.stock_effect(&created).is_empty());
    }
}
