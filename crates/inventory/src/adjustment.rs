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
    /// Stock adjustment identifier.
    StockAdjustmentId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockAdjustmentStatus {
    Draft,
    Posted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockAdjustmentAction {
    Post,
}

/// Adjustment line: a signed correction for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentLine {
    pub line_no: u32,
    pub item: ItemRef,
    pub delta: i64,
    pub note: Option<String>,
}

/// Line as submitted when the draft is created (numbered on creation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentLineDraft {
    pub item: ItemRef,
    pub delta: i64,
    pub note: Option<String>,
}

/// Aggregate root: StockAdjustment (single-step, draft → posted).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockAdjustment {
    id: StockAdjustmentId,
    warehouse_id: Option<WarehouseId>,
    reason: String,
    status: StockAdjustmentStatus,
    lines: Vec<AdjustmentLine>,
    created_by: Option<UserId>,
    posted_by: Option<UserId>,
    posted_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl StockAdjustment {
    pub fn id_typed(&self) -> StockAdjustmentId {
        self.id
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn lines(&self) -> &[AdjustmentLine] {
        &self.lines
    }

    pub fn posted_by(&self) -> Option<UserId> {
        self.posted_by
    }

    pub fn posted_at(&self) -> Option<DateTime<Utc>> {
        self.posted_at
    }
}

impl AggregateRoot for StockAdjustment {
    type Id = StockAdjustmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Workflow for StockAdjustment {
    type Status = StockAdjustmentStatus;
    type Action = StockAdjustmentAction;

    const TRANSITIONS: &'static [Transition<StockAdjustmentStatus, StockAdjustmentAction>] =
        &[Transition {
            action: StockAdjustmentAction::Post,
            from: &[StockAdjustmentStatus::Draft],
            to: StockAdjustmentStatus::Posted,
        }];
}

/// Command: CreateStockAdjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateStockAdjustment {
    pub adjustment_id: StockAdjustmentId,
    pub warehouse_id: WarehouseId,
    pub reason: String,
    pub lines: Vec<AdjustmentLineDraft>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PostStockAdjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostStockAdjustment {
    pub adjustment_id: StockAdjustmentId,
    pub posted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockAdjustmentCommand {
    Create(CreateStockAdjustment),
    Post(PostStockAdjustment),
}

/// Event: StockAdjustmentCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustmentCreated {
    pub adjustment_id: StockAdjustmentId,
    pub warehouse_id: WarehouseId,
    pub reason: String,
    pub lines: Vec<AdjustmentLine>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockAdjustmentPosted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustmentPosted {
    pub adjustment_id: StockAdjustmentId,
    pub posted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockAdjustmentEvent {
    Created(StockAdjustmentCreated),
    Posted(StockAdjustmentPosted),
}

impl Event for StockAdjustmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockAdjustmentEvent::Created(_) => "inventory.adjustment.created",
            StockAdjustmentEvent::Posted(_) => "inventory.adjustment.posted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockAdjustmentEvent::Created(e) => e.occurred_at,
            StockAdjustmentEvent::Posted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockAdjustment {
    type Command = StockAdjustmentCommand;
    type Event = StockAdjustmentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockAdjustmentEvent::Created(e) => {
                self.id = e.adjustment_id;
                self.warehouse_id = Some(e.warehouse_id);
                self.reason = e.reason.clone();
                self.lines = e.lines.clone();
                self.created_by = Some(e.created_by);
                self.status = StockAdjustmentStatus::Draft;
                self.created = true;
            }
            StockAdjustmentEvent::Posted(e) => {
                self.status = StockAdjustmentStatus::Posted;
                self.posted_by = Some(e.posted_by);
                self.posted_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockAdjustmentCommand::Create(cmd) => self.handle_create(cmd),
            StockAdjustmentCommand::Post(cmd) => self.handle_post(cmd),
        }
    }
}

impl StockDocument for StockAdjustment {
    const KIND: DocumentKind = DocumentKind::StockAdjustment;

    fn empty(id: StockAdjustmentId) -> Self {
        Self {
            id,
            warehouse_id: None,
            reason: String::new(),
            status: StockAdjustmentStatus::Draft,
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

    fn status(&self) -> StockAdjustmentStatus {
        self.status
    }

    fn stock_effect(&self, event: &StockAdjustmentEvent) -> StockEffect {
        let StockAdjustmentEvent::Posted(_) = event else {
            return StockEffect::none();
        };
        let Some(warehouse) = self.warehouse_id else {
            return StockEffect::none();
        };
        self.lines.iter().fold(StockEffect::none(), |effect, line| {
            effect.movement(StockMovement {
                line_no: line.line_no,
                item: line.item,
                warehouse,
                delta: line.delta,
                reason: MovementReason::Adjustment,
            })
        })
    }

    fn is_repeat_posting(&self, command: &StockAdjustmentCommand) -> bool {
        matches!(command, StockAdjustmentCommand::Post(_))
            && self.status == StockAdjustmentStatus::Posted
    }
}

impl StockAdjustment {
    fn ensure_adjustment_id(&self, adjustment_id: StockAdjustmentId) -> Result<(), DomainError> {
        if self.id != adjustment_id {
            return Err(DomainError::validation("adjustment_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(
        &self,
        cmd: &CreateStockAdjustment,
    ) -> Result<Vec<StockAdjustmentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("stock adjustment already exists"));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("adjustment reason cannot be empty"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation(
                "stock adjustment needs at least one line",
            ));
        }
        if cmd.lines.iter().any(|l| l.delta == 0) {
            return Err(DomainError::validation("adjustment delta cannot be zero"));
        }

        let lines = cmd
            .lines
            .iter()
            .zip(1u32..)
            .map(|(draft, line_no)| AdjustmentLine {
                line_no,
                item: draft.item,
                delta: draft.delta,
                note: draft.note.clone(),
            })
            .collect();

        Ok(vec![StockAdjustmentEvent::Created(StockAdjustmentCreated {
            adjustment_id: cmd.adjustment_id,
            warehouse_id: cmd.warehouse_id,
            reason: cmd.reason.clone(),
            lines,
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_post(
        &self,
        cmd: &PostStockAdjustment,
    ) -> Result<Vec<StockAdjustmentEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_adjustment_id(cmd.adjustment_id)?;
        Self::transition(self.status, StockAdjustmentAction::Post)?;

        Ok(vec![StockAdjustmentEvent::Posted(StockAdjustmentPosted {
            adjustment_id: cmd.adjustment_id,
            posted_by: cmd.posted_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}
