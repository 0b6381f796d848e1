use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wareflow_core::{
    Aggregate, AggregateId, AggregateRoot, DocumentKind, DomainError, DomainResult, SupplierId,
    Transition, UserId, WarehouseId, Workflow, document_id,
};
use wareflow_events::Event;
use wareflow_inventory::{ItemRef, MovementReason, StockDocument, StockEffect, StockMovement};

use crate::order::{PurchaseOrder, PurchaseOrderId};

document_id!(
    /// Goods receipt note identifier.
    GoodsReceiptNoteId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoodsReceiptStatus {
    Draft,
    QcReviewed,
    Posted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoodsReceiptAction {
    RecordQc,
    Post,
}

/// Per-line quality control outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QcStatus {
    Pending,
    Passed,
    Failed,
    Partial,
}

impl QcStatus {
    /// Classify an inspection of `ordered` units.
    pub fn from_inspection(ordered: i64, accepted: i64) -> Self {
        if accepted == ordered {
            QcStatus::Passed
        } else if accepted == 0 {
            QcStatus::Failed
        } else {
            QcStatus::Partial
        }
    }
}

/// Goods receipt line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub line_no: u32,
    pub item: ItemRef,
    pub ordered_quantity: i64,
    pub accepted_quantity: i64,
    pub rejected_quantity: i64,
    pub qc_status: QcStatus,
    /// Parent purchase order line, for quantity traceability.
    pub purchase_order_line: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLineDraft {
    pub item: ItemRef,
    pub ordered_quantity: i64,
    pub purchase_order_line: Option<u32>,
}

/// Inspection result for one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QcResult {
    pub line_no: u32,
    pub accepted_quantity: i64,
    pub rejected_quantity: i64,
}

/// Aggregate root: GoodsReceiptNote (draft → qc_reviewed → posted).
///
/// Only accepted quantities reach stock; rejected quantities are recorded on
/// the note for supplier follow-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoodsReceiptNote {
    id: GoodsReceiptNoteId,
    purchase_order_id: Option<PurchaseOrderId>,
    supplier_id: Option<SupplierId>,
    warehouse_id: Option<WarehouseId>,
    status: GoodsReceiptStatus,
    lines: Vec<ReceiptLine>,
    received_by: Option<UserId>,
    inspected_by: Option<UserId>,
    posted_by: Option<UserId>,
    posted_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl GoodsReceiptNote {
    pub fn id_typed(&self) -> GoodsReceiptNoteId {
        self.id
    }

    pub fn purchase_order_id(&self) -> Option<PurchaseOrderId> {
        self.purchase_order_id
    }

    pub fn supplier_id(&self) -> Option<SupplierId> {
        self.supplier_id
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn lines(&self) -> &[ReceiptLine] {
        &self.lines
    }

    pub fn inspected_by(&self) -> Option<UserId> {
        self.inspected_by
    }

    pub fn posted_by(&self) -> Option<UserId> {
        self.posted_by
    }

    pub fn posted_at(&self) -> Option<DateTime<Utc>> {
        self.posted_at
    }
}

impl AggregateRoot for GoodsReceiptNote {
    type Id = GoodsReceiptNoteId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Workflow for GoodsReceiptNote {
    type Status = GoodsReceiptStatus;
    type Action = GoodsReceiptAction;

    const TRANSITIONS: &'static [Transition<GoodsReceiptStatus, GoodsReceiptAction>] = &[
        Transition {
            action: GoodsReceiptAction::RecordQc,
            from: &[GoodsReceiptStatus::Draft, GoodsReceiptStatus::QcReviewed],
            to: GoodsReceiptStatus::QcReviewed,
        },
        Transition {
            action: GoodsReceiptAction::Post,
            from: &[GoodsReceiptStatus::QcReviewed],
            to: GoodsReceiptStatus::Posted,
        },
    ];
}

/// Command: CreateGoodsReceiptNote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateGoodsReceiptNote {
    pub receipt_id: GoodsReceiptNoteId,
    pub purchase_order_id: Option<PurchaseOrderId>,
    pub supplier_id: SupplierId,
    pub warehouse_id: WarehouseId,
    pub lines: Vec<ReceiptLineDraft>,
    pub received_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

impl CreateGoodsReceiptNote {
    /// Draft a receipt for every line of an approved purchase order.
    pub fn against_order(
        order: &PurchaseOrder,
        receipt_id: GoodsReceiptNoteId,
        received_by: UserId,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if !order.accepts_receipts() {
            return Err(DomainError::invalid_transition(format!(
                "purchase order {} does not accept receipts",
                order.id_typed()
            )));
        }
        let (Some(supplier_id), Some(warehouse_id)) = (order.supplier_id(), order.warehouse_id())
        else {
            return Err(DomainError::validation(
                "purchase order has no supplier or warehouse",
            ));
        };

        Ok(Self {
            receipt_id,
            purchase_order_id: Some(order.id_typed()),
            supplier_id,
            warehouse_id,
            lines: order
                .lines()
                .iter()
                .map(|l| ReceiptLineDraft {
                    item: l.item,
                    ordered_quantity: l.quantity,
                    purchase_order_line: Some(l.line_no),
                })
                .collect(),
            received_by,
            occurred_at,
        })
    }
}

impl CreateGoodsReceiptNote {
    /// Check a receipt linked to `order` against it: the order must accept
    /// receipts, the warehouse must match and every linked line must name an
    /// existing order line for the same item.
    pub fn check_against_order(&self, order: &PurchaseOrder) -> DomainResult<()> {
        if self.purchase_order_id != Some(order.id_typed()) {
            return Err(DomainError::validation(format!(
                "receipt is not linked to purchase order {}",
                order.id_typed()
            )));
        }
        if !order.accepts_receipts() {
            return Err(DomainError::invalid_transition(format!(
                "purchase order {} does not accept receipts",
                order.id_typed()
            )));
        }
        if order.warehouse_id() != Some(self.warehouse_id) {
            return Err(DomainError::validation(format!(
                "purchase order {} delivers to another warehouse",
                order.id_typed()
            )));
        }

        for draft in &self.lines {
            let Some(order_line_no) = draft.purchase_order_line else {
                continue;
            };
            let order_line = order.line(order_line_no).ok_or_else(|| {
                DomainError::validation(format!(
                    "purchase order {} has no line {order_line_no}",
                    order.id_typed()
                ))
            })?;
            if order_line.item != draft.item {
                return Err(DomainError::validation(format!(
                    "purchase order line {order_line_no} orders {}, not {}",
                    order_line.item, draft.item
                )));
            }
        }
        Ok(())
    }
}

/// Command: RecordQc.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordQc {
    pub receipt_id: GoodsReceiptNoteId,
    pub results: Vec<QcResult>,
    pub inspected_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PostGoodsReceipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostGoodsReceipt {
    pub receipt_id: GoodsReceiptNoteId,
    pub posted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GoodsReceiptCommand {
    Create(CreateGoodsReceiptNote),
    RecordQc(RecordQc),
    Post(PostGoodsReceipt),
}

/// Event: GoodsReceiptCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsReceiptCreated {
    pub receipt_id: GoodsReceiptNoteId,
    pub purchase_order_id: Option<PurchaseOrderId>,
    pub supplier_id: SupplierId,
    pub warehouse_id: WarehouseId,
    pub lines: Vec<ReceiptLine>,
    pub received_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QcRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QcRecorded {
    pub receipt_id: GoodsReceiptNoteId,
    pub results: Vec<QcResult>,
    pub inspected_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: GoodsReceiptPosted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsReceiptPosted {
    pub receipt_id: GoodsReceiptNoteId,
    pub posted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GoodsReceiptEvent {
    Created(GoodsReceiptCreated),
    QcRecorded(QcRecorded),
    Posted(GoodsReceiptPosted),
}

impl Event for GoodsReceiptEvent {
    fn event_type(&self) -> &'static str {
        match self {
            GoodsReceiptEvent::Created(_) => "purchasing.goods_receipt.created",
            GoodsReceiptEvent::QcRecorded(_) => "purchasing.goods_receipt.qc_recorded",
            GoodsReceiptEvent::Posted(_) => "purchasing.goods_receipt.posted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            GoodsReceiptEvent::Created(e) => e.occurred_at,
            GoodsReceiptEvent::QcRecorded(e) => e.occurred_at,
            GoodsReceiptEvent::Posted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for GoodsReceiptNote {
    type Command = GoodsReceiptCommand;
    type Event = GoodsReceiptEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            GoodsReceiptEvent::Created(e) => {
                self.id = e.receipt_id;
                self.purchase_order_id = e.purchase_order_id;
                self.supplier_id = Some(e.supplier_id);
                self.warehouse_id = Some(e.warehouse_id);
                self.lines = e.lines.clone();
                self.received_by = Some(e.received_by);
                self.status = GoodsReceiptStatus::Draft;
                self.created = true;
            }
            GoodsReceiptEvent::QcRecorded(e) => {
                for result in &e.results {
                    if let Some(line) = self.lines.iter_mut().find(|l| l.line_no == result.line_no)
                    {
                        line.accepted_quantity = result.accepted_quantity;
                        line.rejected_quantity = result.rejected_quantity;
                        line.qc_status =
                            QcStatus::from_inspection(line.ordered_quantity, result.accepted_quantity);
                    }
                }
                self.inspected_by = Some(e.inspected_by);
                self.status = GoodsReceiptStatus::QcReviewed;
            }
            GoodsReceiptEvent::Posted(e) => {
                self.status = GoodsReceiptStatus::Posted;
                self.posted_by = Some(e.posted_by);
                self.posted_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            GoodsReceiptCommand::Create(cmd) => self.handle_create(cmd),
            GoodsReceiptCommand::RecordQc(cmd) => self.handle_record_qc(cmd),
            GoodsReceiptCommand::Post(cmd) => self.handle_post(cmd),
        }
    }
}

impl StockDocument for GoodsReceiptNote {
    const KIND: DocumentKind = DocumentKind::GoodsReceiptNote;

    fn empty(id: GoodsReceiptNoteId) -> Self {
        Self {
            id,
            purchase_order_id: None,
            supplier_id: None,
            warehouse_id: None,
            status: GoodsReceiptStatus::Draft,
            lines: Vec::new(),
            received_by: None,
            inspected_by: None,
            posted_by: None,
            posted_at: None,
            version: 0,
            created: false,
        }
    }

    fn aggregate_id(&self) -> AggregateId {
        self.id.0
    }

    fn status(&self) -> GoodsReceiptStatus {
        self.status
    }

    fn stock_effect(&self, event: &GoodsReceiptEvent) -> StockEffect {
        let GoodsReceiptEvent::Posted(_) = event else {
            return StockEffect::none();
        };
        let Some(warehouse) = self.warehouse_id else {
            return StockEffect::none();
        };

        self.lines
            .iter()
            .filter(|l| l.accepted_quantity > 0)
            .fold(StockEffect::none(), |effect, line| {
                effect.movement(StockMovement {
                    line_no: line.line_no,
                    item: line.item,
                    warehouse,
                    delta: line.accepted_quantity,
                    reason: MovementReason::Receipt,
                })
            })
    }

    fn is_repeat_posting(&self, command: &GoodsReceiptCommand) -> bool {
        matches!(command, GoodsReceiptCommand::Post(_)) && self.status == GoodsReceiptStatus::Posted
    }
}

impl GoodsReceiptNote {
    fn ensure_receipt_id(&self, receipt_id: GoodsReceiptNoteId) -> Result<(), DomainError> {
        if self.id != receipt_id {
            return Err(DomainError::validation("receipt_id mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(&self, receipt_id: GoodsReceiptNoteId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_receipt_id(receipt_id)
    }

    fn handle_create(
        &self,
        cmd: &CreateGoodsReceiptNote,
    ) -> Result<Vec<GoodsReceiptEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("goods receipt note already exists"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation(
                "goods receipt note needs at least one line",
            ));
        }
        if cmd.lines.iter().any(|l| l.ordered_quantity <= 0) {
            return Err(DomainError::validation("ordered quantity must be positive"));
        }
        if cmd.purchase_order_id.is_none()
            && cmd.lines.iter().any(|l| l.purchase_order_line.is_some())
        {
            return Err(DomainError::validation(
                "purchase order lines referenced without a purchase order",
            ));
        }

        let lines = cmd
            .lines
            .iter()
            .zip(1u32..)
            .map(|(draft, line_no)| ReceiptLine {
                line_no,
                item: draft.item,
                ordered_quantity: draft.ordered_quantity,
                accepted_quantity: 0,
                rejected_quantity: 0,
                qc_status: QcStatus::Pending,
                purchase_order_line: draft.purchase_order_line,
            })
            .collect();

        Ok(vec![GoodsReceiptEvent::Created(GoodsReceiptCreated {
            receipt_id: cmd.receipt_id,
            purchase_order_id: cmd.purchase_order_id,
            supplier_id: cmd.supplier_id,
            warehouse_id: cmd.warehouse_id,
            lines,
            received_by: cmd.received_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_qc(&self, cmd: &RecordQc) -> Result<Vec<GoodsReceiptEvent>, DomainError> {
        self.ensure_exists(cmd.receipt_id)?;
        Self::transition(self.status, GoodsReceiptAction::RecordQc)?;

        if cmd.results.is_empty() {
            return Err(DomainError::validation("no QC results supplied"));
        }

        let mut seen = HashSet::new();
        for result in &cmd.results {
            if !seen.insert(result.line_no) {
                return Err(DomainError::validation(format!(
                    "duplicate QC result for line {}",
                    result.line_no
                )));
            }
            let line = self
                .lines
                .iter()
                .find(|l| l.line_no == result.line_no)
                .ok_or_else(|| {
                    DomainError::validation(format!("unknown receipt line {}", result.line_no))
                })?;
            if result.accepted_quantity < 0 || result.rejected_quantity < 0 {
                return Err(DomainError::validation(format!(
                    "line {}: QC quantities cannot be negative",
                    line.line_no
                )));
            }
            let inspected = result
                .accepted_quantity
                .checked_add(result.rejected_quantity)
                .ok_or_else(|| {
                    DomainError::validation(format!(
                        "line {}: QC quantities out of range",
                        line.line_no
                    ))
                })?;
            if inspected > line.ordered_quantity {
                return Err(DomainError::validation(format!(
                    "line {}: accepted + rejected ({} + {}) exceeds ordered quantity {}",
                    line.line_no,
                    result.accepted_quantity,
                    result.rejected_quantity,
                    line.ordered_quantity
                )));
            }
        }

        Ok(vec![GoodsReceiptEvent::QcRecorded(QcRecorded {
            receipt_id: cmd.receipt_id,
            results: cmd.results.clone(),
            inspected_by: cmd.inspected_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_post(&self, cmd: &PostGoodsReceipt) -> Result<Vec<GoodsReceiptEvent>, DomainError> {
        self.ensure_exists(cmd.receipt_id)?;
        Self::transition(self.status, GoodsReceiptAction::Post)?;

        if let Some(line) = self.lines.iter().find(|l| l.qc_status == QcStatus::Pending) {
            return Err(DomainError::validation(format!(
                "line {} is still pending QC",
                line.line_no
            )));
        }

        Ok(vec![GoodsReceiptEvent::Posted(GoodsReceiptPosted {
            receipt_id: cmd.receipt_id,
            posted_by: cmd.posted_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::tests::approved_order;
    use proptest::prelude::*;
    use wareflow_core::MaterialId;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn draft_receipt(ordered: &[i64]) -> GoodsReceiptNote {
        let order = approved_order(ordered);
        let receipt_id = GoodsReceiptNoteId::generate();
        let cmd =
            CreateGoodsReceiptNote::against_order(&order, receipt_id, UserId::new(), test_time())
                .unwrap();
        let mut receipt = GoodsReceiptNote::empty(receipt_id);
        let events = receipt.handle(&GoodsReceiptCommand::Create(cmd)).unwrap();
        receipt.apply(&events[0]);
        receipt
    }

    fn qc(receipt: &GoodsReceiptNote, results: Vec<QcResult>) -> GoodsReceiptCommand {
        GoodsReceiptCommand::RecordQc(RecordQc {
            receipt_id: receipt.id_typed(),
            results,
            inspected_by: UserId::new(),
            occurred_at: test_time(),
        })
    }

    fn post(receipt: &GoodsReceiptNote) -> GoodsReceiptCommand {
        GoodsReceiptCommand::Post(PostGoodsReceipt {
            receipt_id: receipt.id_typed(),
            posted_by: UserId::new(),
            occurred_at: test_time(),
        })
    }

    fn result(line_no: u32, accepted: i64, rejected: i64) -> QcResult {
        QcResult {
            line_no,
            accepted_quantity: accepted,
            rejected_quantity: rejected,
        }
    }

    #[test]
    fn receipt_against_order_copies_lines_with_parent_refs() {
        let receipt = draft_receipt(&[100, 20]);
        assert_eq!(receipt.status(), GoodsReceiptStatus::Draft);
        assert_eq!(receipt.lines().len(), 2);
        assert_eq!(receipt.lines()[1].purchase_order_line, Some(2));
        assert!(
            receipt
                .lines()
                .iter()
                .all(|l| l.qc_status == QcStatus::Pending)
        );
    }

    #[test]
    fn draft_cannot_be_posted() {
        let receipt = draft_receipt(&[10]);
        assert!(matches!(
            receipt.handle(&post(&receipt)),
            Err(DomainError::InvalidTransition(_))
        ));
    }

    #[test]
    fn partial_accept_posts_only_accepted_quantity() {
        let mut receipt = draft_receipt(&[100]);
        let events = receipt
            .handle(&qc(&receipt, vec![result(1, 90, 10)]))
            .unwrap();
        receipt.apply(&events[0]);
        assert_eq!(receipt.lines()[0].qc_status, QcStatus::Partial);

        let events = receipt.handle(&post(&receipt)).unwrap();
        let effect = receipt.stock_effect(&events[0]);
        assert_eq!(effect.movements.len(), 1);
        assert_eq!(effect.movements[0].delta, 90);
        assert_eq!(effect.movements[0].reason, MovementReason::Receipt);
    }

    #[test]
    fn accepted_plus_rejected_cannot_exceed_ordered() {
        let receipt = draft_receipt(&[100]);
        let err = receipt
            .handle(&qc(&receipt, vec![result(1, 95, 10)]))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("exceeds")));
    }

    #[test]
    fn post_is_blocked_while_any_line_is_pending() {
        let mut receipt = draft_receipt(&[10, 5]);
        let events = receipt
            .handle(&qc(&receipt, vec![result(1, 10, 0)]))
            .unwrap();
        receipt.apply(&events[0]);
        assert_eq!(receipt.status(), GoodsReceiptStatus::QcReviewed);

        let err = receipt.handle(&post(&receipt)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("line 2")));

        // QC can be recorded again before posting.
        let events = receipt
            .handle(&qc(&receipt, vec![result(2, 0, 5)]))
            .unwrap();
        receipt.apply(&events[0]);
        assert_eq!(receipt.lines()[1].qc_status, QcStatus::Failed);
        assert!(receipt.handle(&post(&receipt)).is_ok());
    }

    #[test]
    fn failed_lines_produce_no_movement() {
        let mut receipt = draft_receipt(&[10, 5]);
        let events = receipt
            .handle(&qc(&receipt, vec![result(1, 10, 0), result(2, 0, 5)]))
            .unwrap();
        receipt.apply(&events[0]);
        assert_eq!(receipt.lines()[0].qc_status, QcStatus::Passed);

        let events = receipt.handle(&post(&receipt)).unwrap();
        let effect = receipt.stock_effect(&events[0]);
        assert_eq!(effect.movements.len(), 1);
        assert_eq!(effect.movements[0].line_no, 1);
    }

    #[test]
    fn qc_quantities_out_of_range_are_rejected() {
        let receipt = draft_receipt(&[10]);
        let err = receipt
            .handle(&qc(&receipt, vec![result(1, i64::MAX, 1)]))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("out of range")));
    }

    #[test]
    fn order_line_reference_needs_an_order() {
        let receipt_id = GoodsReceiptNoteId::generate();
        let cmd = CreateGoodsReceiptNote {
            receipt_id,
            purchase_order_id: None,
            supplier_id: SupplierId::new(),
            warehouse_id: WarehouseId::new(),
            lines: vec![ReceiptLineDraft {
                item: ItemRef::material(MaterialId::new()),
                ordered_quantity: 5,
                purchase_order_line: Some(1),
            }],
            received_by: UserId::new(),
            occurred_at: test_time(),
        };
        let err = GoodsReceiptNote::empty(receipt_id)
            .handle(&GoodsReceiptCommand::Create(cmd))
            .unwrap_err();
        assert!(
            matches!(err, DomainError::Validation(msg) if msg.contains("without a purchase order"))
        );
    }

    #[test]
    fn linked_lines_must_match_the_order() {
        let order = approved_order(&[10]);
        let valid = CreateGoodsReceiptNote::against_order(
            &order,
            GoodsReceiptNoteId::generate(),
            UserId::new(),
            test_time(),
        )
        .unwrap();
        assert!(valid.check_against_order(&order).is_ok());

        let mut unknown_line = valid.clone();
        unknown_line.lines[0].purchase_order_line = Some(99);
        assert!(matches!(
            unknown_line.check_against_order(&order),
            Err(DomainError::Validation(msg)) if msg.contains("no line 99")
        ));

        let mut other_item = valid.clone();
        other_item.lines[0].item = ItemRef::material(MaterialId::new());
        assert!(matches!(
            other_item.check_against_order(&order),
            Err(DomainError::Validation(msg)) if msg.contains("orders")
        ));

        let mut other_warehouse = valid.clone();
        other_warehouse.warehouse_id = WarehouseId::new();
        assert!(matches!(
            other_warehouse.check_against_order(&order),
            Err(DomainError::Validation(msg)) if msg.contains("another warehouse")
        ));

        let mut other_order = valid;
        other_order.purchase_order_id = Some(PurchaseOrderId::generate());
        assert!(other_order.check_against_order(&order).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: the inbound delta of a posted receipt equals the sum of
        /// accepted quantities, never the ordered quantity.
        #[test]
        fn inbound_equals_accepted(
            lines in prop::collection::vec((1i64..500i64, 0u8..=100u8, 0u8..=100u8), 1..6)
        ) {
            let ordered: Vec<i64> = lines.iter().map(|(o, _, _)| *o).collect();
            let mut receipt = draft_receipt(&ordered);
            let results: Vec<QcResult> = lines
                .iter()
                .zip(1u32..)
                .map(|((o, a, r), line_no)| {
                    let accepted = o * i64::from(*a) / 100;
                    let rejected = (o - accepted) * i64::from(*r) / 100;
                    result(line_no, accepted, rejected)
                })
                .collect();
            let expected: i64 = results.iter().map(|r| r.accepted_quantity).sum();

            let events = receipt.handle(&qc(&receipt, results)).unwrap();
            receipt.apply(&events[0]);
            let events = receipt.handle(&post(&receipt)).unwrap();
            let effect = receipt.stock_effect(&events[0]);

            prop_assert_eq!(effect.movements.iter().map(|m| m.delta).sum::<i64>(), expected);
            prop_assert!(effect.movements.iter().all(|m| m.delta > 0));
        }
    }
}
