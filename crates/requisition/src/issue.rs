use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wareflow_core::{
    Aggregate, AggregateId, AggregateRoot, DocumentKind, DocumentRef, DomainError, DomainResult,
    Transition, UserId, WarehouseId, Workflow, document_id,
};
use wareflow_events::Event;
use wareflow_inventory::{
    ItemRef, MovementReason, ReservationOp, StockDocument, StockEffect, StockMovement,
};

use crate::request::{MaterialRequest, MaterialRequestId};

document_id!(
    /// Material issue note identifier.
    MaterialIssueNoteId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaterialIssueStatus {
    Draft,
    Posted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaterialIssueAction {
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueLine {
    pub line_no: u32,
    pub item: ItemRef,
    pub quantity: i64,
    /// Line of the linked material request whose reservation this issue draws on.
    pub request_line: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueLineDraft {
    pub item: ItemRef,
    pub quantity: i64,
    pub request_line: Option<u32>,
}

/// Aggregate root: MaterialIssueNote (draft → posted).
///
/// Posting books an outbound ledger movement per line. Lines linked to a
/// material request line consume that line's reservation; unlinked lines
/// draw on unreserved stock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterialIssueNote {
    id: MaterialIssueNoteId,
    material_request_id: Option<MaterialRequestId>,
    warehouse_id: Option<WarehouseId>,
    status: MaterialIssueStatus,
    lines: Vec<IssueLine>,
    issued_by: Option<UserId>,
    posted_by: Option<UserId>,
    posted_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl MaterialIssueNote {
    pub fn id_typed(&self) -> MaterialIssueNoteId {
        self.id
    }

    pub fn material_request_id(&self) -> Option<MaterialRequestId> {
        self.material_request_id
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn lines(&self) -> &[IssueLine] {
        &self.lines
    }

    pub fn issued_by(&self) -> Option<UserId> {
        self.issued_by
    }

    pub fn posted_by(&self) -> Option<UserId> {
        self.posted_by
    }

    pub fn posted_at(&self) -> Option<DateTime<Utc>> {
        self.posted_at
    }

    fn request_ref(&self) -> Option<DocumentRef> {
        self.material_request_id
            .map(|id| DocumentRef::new(DocumentKind::MaterialRequest, id.0))
    }
}

impl AggregateRoot for MaterialIssueNote {
    type Id = MaterialIssueNoteId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Workflow for MaterialIssueNote {
    type Status = MaterialIssueStatus;
    type Action = MaterialIssueAction;

    const TRANSITIONS: &'static [Transition<MaterialIssueStatus, MaterialIssueAction>] =
        &[Transition {
            action: MaterialIssueAction::Post,
            from: &[MaterialIssueStatus::Draft],
            to: MaterialIssueStatus::Posted,
        }];
}

/// Command: CreateMaterialIssueNote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateMaterialIssueNote {
    pub issue_id: MaterialIssueNoteId,
    pub material_request_id: Option<MaterialRequestId>,
    pub warehouse_id: WarehouseId,
    pub lines: Vec<IssueLineDraft>,
    pub issued_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

impl CreateMaterialIssueNote {
    /// Draft an issue for the full quantity of every open line of an approved
    /// material request.
    pub fn against_request(
        request: &MaterialRequest,
        issue_id: MaterialIssueNoteId,
        issued_by: UserId,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if !request.accepts_issues() {
            return Err(DomainError::invalid_transition(format!(
                "material request {} is not approved",
                request.id_typed()
            )));
        }
        let warehouse_id = request
            .warehouse_id()
            .ok_or_else(|| DomainError::validation("material request has no warehouse"))?;

        Ok(Self {
            issue_id,
            material_request_id: Some(request.id_typed()),
            warehouse_id,
            lines: request
                .lines()
                .iter()
                .filter(|l| l.is_open())
                .map(|l| IssueLineDraft {
                    item: l.item,
                    quantity: l.quantity,
                    request_line: Some(l.line_no),
                })
                .collect(),
            issued_by,
            occurred_at,
        })
    }
}

/// Command: PostMaterialIssue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMaterialIssue {
    pub issue_id: MaterialIssueNoteId,
    pub posted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaterialIssueCommand {
    Create(CreateMaterialIssueNote),
    Post(PostMaterialIssue),
}

/// Event: MaterialIssueCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialIssueCreated {
    pub issue_id: MaterialIssueNoteId,
    pub material_request_id: Option<MaterialRequestId>,
    pub warehouse_id: WarehouseId,
    pub lines: Vec<IssueLine>,
    pub issued_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MaterialIssuePosted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialIssuePosted {
    pub issue_id: MaterialIssueNoteId,
    pub posted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaterialIssueEvent {
    Created(MaterialIssueCreated),
    Posted(MaterialIssuePosted),
}

impl Event for MaterialIssueEvent {
    fn event_type(&self) -> &'static str {
        match self {
            MaterialIssueEvent::Created(_) => "requisition.issue.created",
            MaterialIssueEvent::Posted(_) => "requisition.issue.posted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            MaterialIssueEvent::Created(e) => e.occurred_at,
            MaterialIssueEvent::Posted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for MaterialIssueNote {
    type Command = MaterialIssueCommand;
    type Event = MaterialIssueEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            MaterialIssueEvent::Created(e) => {
                self.id = e.issue_id;
                self.material_request_id = e.material_request_id;
                self.warehouse_id = Some(e.warehouse_id);
                self.lines = e.lines.clone();
                self.issued_by = Some(e.issued_by);
                self.status = MaterialIssueStatus::Draft;
                self.created = true;
            }
            MaterialIssueEvent::Posted(e) => {
                self.status = MaterialIssueStatus::Posted;
                self.posted_by = Some(e.posted_by);
                self.posted_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            MaterialIssueCommand::Create(cmd) => self.handle_create(cmd),
            MaterialIssueCommand::Post(cmd) => self.handle_post(cmd),
        }
    }
}

impl StockDocument for MaterialIssueNote {
    const KIND: DocumentKind = DocumentKind::MaterialIssueNote;

    fn empty(id: MaterialIssueNoteId) -> Self {
        Self {
            id,
            material_request_id: None,
            warehouse_id: None,
            status: MaterialIssueStatus::Draft,
            lines: Vec::new(),
            issued_by: None,
            posted_by: None,
            posted_at: None,
            version: 0,
            created: false,
        }
    }

    fn aggregate_id(&self) -> AggregateId {
        self.id.0
    }

    fn status(&self) -> MaterialIssueStatus {
        self.status
    }

    fn stock_effect(&self, event: &MaterialIssueEvent) -> StockEffect {
        let MaterialIssueEvent::Posted(_) = event else {
            return StockEffect::none();
        };
        let Some(warehouse) = self.warehouse_id else {
            return StockEffect::none();
        };
        let request = self.request_ref();

        self.lines
            .iter()
            .fold(StockEffect::none(), |effect, line| {
                match (request, line.request_line) {
                    (Some(request), Some(request_line)) => {
                        effect.reservation(ReservationOp::Consume {
                            owner: request.line(request_line),
                            item: line.item,
                            warehouse,
                            quantity: line.quantity,
                            issue_line_no: line.line_no,
                        })
                    }
                    _ => effect.movement(StockMovement {
                        line_no: line.line_no,
                        item: line.item,
                        warehouse,
                        delta: -line.quantity,
                        reason: MovementReason::Issue,
                    }),
                }
            })
    }

    fn is_repeat_posting(&self, command: &MaterialIssueCommand) -> bool {
        matches!(command, MaterialIssueCommand::Post(_))
            && self.status == MaterialIssueStatus::Posted
    }
}

impl MaterialIssueNote {
    fn ensure_issue_id(&self, issue_id: MaterialIssueNoteId) -> Result<(), DomainError> {
        if self.id != issue_id {
            return Err(DomainError::validation("issue_id mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(&self, issue_id: MaterialIssueNoteId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_issue_id(issue_id)
    }

    fn handle_create(
        &self,
        cmd: &CreateMaterialIssueNote,
    ) -> Result<Vec<MaterialIssueEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("material issue note already exists"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation(
                "material issue note needs at least one line",
            ));
        }
        if cmd.lines.iter().any(|l| l.quantity <= 0) {
            return Err(DomainError::validation("issued quantity must be positive"));
        }
        if cmd.material_request_id.is_none() && cmd.lines.iter().any(|l| l.request_line.is_some())
        {
            return Err(DomainError::validation(
                "request lines referenced without a material request",
            ));
        }

        let lines = cmd
            .lines
            .iter()
            .zip(1u32..)
            .map(|(draft, line_no)| IssueLine {
                line_no,
                item: draft.item,
                quantity: draft.quantity,
                request_line: draft.request_line,
            })
            .collect();

        Ok(vec![MaterialIssueEvent::Created(MaterialIssueCreated {
            issue_id: cmd.issue_id,
            material_request_id: cmd.material_request_id,
            warehouse_id: cmd.warehouse_id,
            lines,
            issued_by: cmd.issued_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_post(&self, cmd: &PostMaterialIssue) -> Result<Vec<MaterialIssueEvent>, DomainError> {
        self.ensure_exists(cmd.issue_id)?;
        Self::transition(self.status, MaterialIssueAction::Post)?;

        Ok(vec![MaterialIssueEvent::Posted(MaterialIssuePosted {
            issue_id: cmd.issue_id,
            posted_by: cmd.posted_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::tests::{approved_request, draft_request};
    use proptest::prelude::*;
    use wareflow_core::MaterialId;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn create(issue: &MaterialIssueNote, cmd: CreateMaterialIssueNote) -> MaterialIssueNote {
        let mut issue = issue.clone();
        let events = issue.handle(&MaterialIssueCommand::Create(cmd)).unwrap();
        issue.apply(&events[0]);
        issue
    }

    fn post(issue: &MaterialIssueNote) -> MaterialIssueCommand {
        MaterialIssueCommand::Post(PostMaterialIssue {
            issue_id: issue.id_typed(),
            posted_by: UserId::new(),
            occurred_at: test_time(),
        })
    }

    fn unlinked_issue(quantities: &[i64]) -> MaterialIssueNote {
        let issue_id = MaterialIssueNoteId::generate();
        create(
            &MaterialIssueNote::empty(issue_id),
            CreateMaterialIssueNote {
                issue_id,
                material_request_id: None,
                warehouse_id: WarehouseId::new(),
                lines: quantities
                    .iter()
                    .map(|q| IssueLineDraft {
                        item: ItemRef::material(MaterialId::new()),
                        quantity: *q,
                        request_line: None,
                    })
                    .collect(),
                issued_by: UserId::new(),
                occurred_at: test_time(),
            },
        )
    }

    #[test]
    fn issue_against_request_consumes_each_reservation() {
        let request = approved_request(&[50, 8]);
        let issue_id = MaterialIssueNoteId::generate();
        let cmd = CreateMaterialIssueNote::against_request(
            &request,
            issue_id,
            UserId::new(),
            test_time(),
        )
        .unwrap();
        let issue = create(&MaterialIssueNote::empty(issue_id), cmd);

        let events = issue.handle(&post(&issue)).unwrap();
        let effect = issue.stock_effect(&events[0]);
        assert!(effect.movements.is_empty());
        assert_eq!(effect.reservations.len(), 2);
        match &effect.reservations[0] {
            ReservationOp::Consume {
                owner,
                quantity,
                issue_line_no,
                ..
            } => {
                assert_eq!(owner.document, request.document_ref());
                assert_eq!(owner.line_no, 1);
                assert_eq!(*quantity, 50);
                assert_eq!(*issue_line_no, 1);
            }
            other => panic!("expected Consume, got {other:?}"),
        }
    }

    #[test]
    fn issue_requires_an_approved_request() {
        let request = draft_request(&[50]);
        let err = CreateMaterialIssueNote::against_request(
            &request,
            MaterialIssueNoteId::generate(),
            UserId::new(),
            test_time(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn request_line_without_request_is_rejected() {
        let issue_id = MaterialIssueNoteId::generate();
        let issue = MaterialIssueNote::empty(issue_id);
        let err = issue
            .handle(&MaterialIssueCommand::Create(CreateMaterialIssueNote {
                issue_id,
                material_request_id: None,
                warehouse_id: WarehouseId::new(),
                lines: vec![IssueLineDraft {
                    item: ItemRef::material(MaterialId::new()),
                    quantity: 1,
                    request_line: Some(1),
                }],
                issued_by: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn posted_issue_reports_repeat_posting() {
        let mut issue = unlinked_issue(&[3]);
        let cmd = post(&issue);
        assert!(!issue.is_repeat_posting(&cmd));

        let events = issue.handle(&cmd).unwrap();
        issue.apply(&events[0]);
        assert!(issue.is_repeat_posting(&cmd));
        assert!(matches!(
            issue.handle(&cmd),
            Err(DomainError::InvalidTransition(_))
        ));
    }

    proptest! {
        /// Property: unlinked lines always book one negative Issue movement
        /// of exactly the issued quantity.
        #[test]
        fn unlinked_lines_issue_outbound(quantities in prop::collection::vec(1i64..1_000i64, 1..8)) {
            let issue = unlinked_issue(&quantities);
            let events = issue.handle(&post(&issue)).unwrap();
            let effect = issue.stock_effect(&events[0]);

            prop_assert!(effect.reservations.is_empty());
            prop_assert_eq!(effect.movements.len(), quantities.len());
            for (movement, quantity) in effect.movements.iter().zip(&quantities) {
                prop_assert_eq!(movement.delta, -quantity);
                prop_assert_eq!(movement.reason, MovementReason::Issue);
            }
        }
    }
}
