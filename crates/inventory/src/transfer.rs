use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wareflow_core::{
    Aggregate, AggregateId, AggregateRoot, DocumentKind, DomainError, Transition, UserId,
    WarehouseId, Workflow, document_id,
};
use wareflow_events::Event;

use crate::document::StockDocument;
use crate::effect::{StockEffect, StockMovement};
use crate::item::ItemRef;
use crate::ledger::MovementReason;

document_id!(
    /// Stock transfer identifier.
    StockTransferId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockTransferStatus {
    Draft,
    Posted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockTransferAction {
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLine {
    pub line_no: u32,
    pub item: ItemRef,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLineDraft {
    pub item: ItemRef,
    pub quantity: i64,
}

/// Aggregate root: StockTransfer (single-step, draft → posted).
///
/// Posting moves every line out of `from_warehouse` and into `to_warehouse`
/// as one paired effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockTransfer {
    id: StockTransferId,
    from_warehouse: Option<WarehouseId>,
    to_warehouse: Option<WarehouseId>,
    status: StockTransferStatus,
    lines: Vec<TransferLine>,
    created_by: Option<UserId>,
    posted_by: Option<UserId>,
    posted_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl StockTransfer {
    pub fn id_typed(&self) -> StockTransferId {
        self.id
    }

    pub fn from_warehouse(&self) -> Option<WarehouseId> {
        self.from_warehouse
    }

    pub fn to_warehouse(&self) -> Option<WarehouseId> {
        self.to_warehouse
    }

    pub fn lines(&self) -> &[TransferLine] {
        &self.lines
    }

    pub fn posted_by(&self) -> Option<UserId> {
        self.posted_by
    }

    pub fn posted_at(&self) -> Option<DateTime<Utc>> {
        self.posted_at
    }
}

impl AggregateRoot for StockTransfer {
    type Id = StockTransferId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Workflow for StockTransfer {
    type Status = StockTransferStatus;
    type Action = StockTransferAction;

    const TRANSITIONS: &'static [Transition<StockTransferStatus, StockTransferAction>] =
        &[Transition {
            action: StockTransferAction::Post,
            from: &[StockTransferStatus::Draft],
            to: StockTransferStatus::Posted,
        }];
}

/// Command: CreateStockTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateStockTransfer {
    pub transfer_id: StockTransferId,
    pub from_warehouse: WarehouseId,
    pub to_warehouse: WarehouseId,
    pub lines: Vec<TransferLineDraft>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PostStockTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostStockTransfer {
    pub transfer_id: StockTransferId,
    pub posted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockTransferCommand {
    Create(CreateStockTransfer),
    Post(PostStockTransfer),
}

/// Event: StockTransferCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransferCreated {
    pub transfer_id: StockTransferId,
    pub from_warehouse: WarehouseId,
    pub to_warehouse: WarehouseId,
    pub lines: Vec<TransferLine>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockTransferPosted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransferPosted {
    pub transfer_id: StockTransferId,
    pub posted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockTransferEvent {
    Created(StockTransferCreated),
    Posted(StockTransferPosted),
}

impl Event for StockTransferEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockTransferEvent::Created(_) => "inventory.transfer.created",
            StockTransferEvent::Posted(_) => "inventory.transfer.posted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockTransferEvent::Created(e) => e.occurred_at,
            StockTransferEvent::Posted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockTransfer {
    type Command = StockTransferCommand;
    type Event = StockTransferEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockTransferEvent::Created(e) => {
                self.id = e.transfer_id;
                self.from_warehouse = Some(e.from_warehouse);
                self.to_warehouse = Some(e.to_warehouse);
                self.lines = e.lines.clone();
                self.created_by = Some(e.created_by);
                self.status = StockTransferStatus::Draft;
                self.created = true;
            }
            StockTransferEvent::Posted(e) => {
                self.status = StockTransferStatus::Posted;
                self.posted_by = Some(e.posted_by);
                self.posted_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockTransferCommand::Create(cmd) => self.handle_create(cmd),
            StockTransferCommand::Post(cmd) => self.handle_post(cmd),
        }
    }
}

impl StockDocument for StockTransfer {
    const KIND: DocumentKind = DocumentKind::StockTransfer;

    fn empty(id: StockTransferId) -> Self {
        Self {
            id,
            from_warehouse: None,
            to_warehouse: None,
            status: StockTransferStatus::Draft,
            lines: Vec::new(),
            created_by: None,
            posted_by: None,
            posted_at: None,
            version: 0,
            created: false,
        }
    }

    fn aggregate_id(&self) -> AggregateId {
        self.id.0
    }

    fn status(&self) -> StockTransferStatus {
        self.status
    }

    fn stock_effect(&self, event: &StockTransferEvent) -> StockEffect {
        let StockTransferEvent::Posted(_) = event else {
            return StockEffect::none();
        };
        let (Some(from), Some(to)) = (self.from_warehouse, self.to_warehouse) else {
            return StockEffect::none();
        };

        // Out and in for the same line always travel together.
        self.lines.iter().fold(StockEffect::none(), |effect, line| {
            effect
                .movement(StockMovement {
                    line_no: line.line_no,
                    item: line.item,
                    warehouse: from,
                    delta: -line.quantity,
                    reason: MovementReason::TransferOut,
                })
                .movement(StockMovement {
                    line_no: line.line_no,
                    item: line.item,
                    warehouse: to,
                    delta: line.quantity,
                    reason: MovementReason::TransferIn,
                })
        })
    }

    fn is_repeat_posting(&self, command: &StockTransferCommand) -> bool {
        matches!(command, StockTransferCommand::Post(_))
            && self.status == StockTransferStatus::Posted
    }
}

impl StockTransfer {
    fn ensure_transfer_id(&self, transfer_id: StockTransferId) -> Result<(), DomainError> {
        if self.id != transfer_id {
            return Err(DomainError::validation("transfer_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(
        &self,
        cmd: &CreateStockTransfer,
    ) -> Result<Vec<StockTransferEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("stock transfer already exists"));
        }
        if cmd.from_warehouse == cmd.to_warehouse {
            return Err(DomainError::validation(
                "source and destination warehouse must differ",
            ));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("stock transfer needs at least one line"));
        }
        if cmd.lines.iter().any(|l| l.quantity <= 0) {
            return Err(DomainError::validation("quantity must be positive"));
        }

        let lines = cmd
            .lines
            .iter()
            .zip(1u32..)
            .map(|(draft, line_no)| TransferLine {
                line_no,
                item: draft.item,
                quantity: draft.quantity,
            })
            .collect();

        Ok(vec![StockTransferEvent::Created(StockTransferCreated {
            transfer_id: cmd.transfer_id,
            from_warehouse: cmd.from_warehouse,
            to_warehouse: cmd.to_warehouse,
            lines,
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_post(&self, cmd: &PostStockTransfer) -> Result<Vec<StockTransferEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_transfer_id(cmd.transfer_id)?;
        Self::transition(self.status, StockTransferAction::Post)?;

        Ok(vec![StockTransferEvent::Posted(StockTransferPosted {
            transfer_id: cmd.transfer_id,
            posted_by: cmd.posted_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wareflow_core::FinishedProductId;

    fn create_cmd(from: WarehouseId, to: WarehouseId, quantity: i64) -> CreateStockTransfer {
        CreateStockTransfer {
            transfer_id: StockTransferId::generate(),
            from_warehouse: from,
            to_warehouse: to,
            lines: vec![TransferLineDraft {
                item: ItemRef::finished_product(FinishedProductId::new()),
                quantity,
            }],
            created_by: UserId::new(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn same_warehouse_transfer_is_rejected() {
        let wh = WarehouseId::new();
        let cmd = create_cmd(wh, wh, 5);
        let err = StockTransfer::empty(cmd.transfer_id)
            .handle(&StockTransferCommand::Create(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("must differ")));
    }

    #[test]
    fn post_pairs_outbound_and_inbound_movements() {
        let from = WarehouseId::new();
        let to = WarehouseId::new();
        let cmd = create_cmd(from, to, 7);
        let id = cmd.transfer_id;
        let mut transfer = StockTransfer::empty(id);
        let events = transfer.handle(&StockTransferCommand::Create(cmd)).unwrap();
        transfer.apply(&events[0]);

        let post = StockTransferCommand::Post(PostStockTransfer {
            transfer_id: id,
            posted_by: UserId::new(),
            occurred_at: Utc::now(),
        });
        let events = transfer.handle(&post).unwrap();
        let effect = transfer.stock_effect(&events[0]);

        assert_eq!(effect.movements.len(), 2);
        assert_eq!(effect.movements[0].warehouse, from);
        assert_eq!(effect.movements[0].delta, -7);
        assert_eq!(effect.movements[0].reason, MovementReason::TransferOut);
        assert_eq!(effect.movements[1].warehouse, to);
        assert_eq!(effect.movements[1].delta, 7);
        assert_eq!(effect.movements[1].reason, MovementReason::TransferIn);
        assert_eq!(effect.movements.iter().map(|m| m.delta).sum::<i64>(), 0);

        transfer.apply(&events[0]);
        assert_eq!(transfer.status(), StockTransferStatus::Posted);
    }
}
