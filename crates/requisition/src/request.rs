use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wareflow_core::{
    Aggregate, AggregateId, AggregateRoot, DocumentKind, DomainError, Transition, UserId,
    WarehouseId, Workflow, document_id,
};
use wareflow_events::Event;
use wareflow_inventory::{ItemRef, ReservationOp, StockDocument, StockEffect};

document_id!(
    /// Material request identifier.
    MaterialRequestId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaterialRequestStatus {
    Draft,
    Approved,
    Fulfilled,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialRequestAction {
    Approve,
    CancelLine,
    Fulfill,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestLineStatus {
    Open,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLine {
    pub line_no: u32,
    pub item: ItemRef,
    pub quantity: i64,
    pub status: RequestLineStatus,
}

impl RequestLine {
    pub fn is_open(&self) -> bool {
        self.status == RequestLineStatus::Open
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLineDraft {
    pub item: ItemRef,
    pub quantity: i64,
}

/// Aggregate root: MaterialRequest.
///
/// Approval reserves every open line at the request's warehouse; cancelling
/// (the whole request or one line) and fulfilling release whatever is still
/// reserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterialRequest {
    id: MaterialRequestId,
    warehouse_id: Option<WarehouseId>,
    purpose: Option<String>,
    status: MaterialRequestStatus,
    lines: Vec<RequestLine>,
    requested_by: Option<UserId>,
    approved_by: Option<UserId>,
    approved_at: Option<DateTime<Utc>>,
    closed_by: Option<UserId>,
    closed_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl MaterialRequest {
    pub fn id_typed(&self) -> MaterialRequestId {
        self.id
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn purpose(&self) -> Option<&str> {
        self.purpose.as_deref()
    }

    pub fn lines(&self) -> &[RequestLine] {
        &self.lines
    }

    pub fn line(&self, line_no: u32) -> Option<&RequestLine> {
        self.lines.iter().find(|l| l.line_no == line_no)
    }

    pub fn requested_by(&self) -> Option<UserId> {
        self.requested_by
    }

    pub fn approved_by(&self) -> Option<UserId> {
        self.approved_by
    }

    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        self.approved_at
    }

    /// Who fulfilled or cancelled the request.
    pub fn closed_by(&self) -> Option<UserId> {
        self.closed_by
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    /// Whether material may currently be issued against this request.
    pub fn accepts_issues(&self) -> bool {
        self.status == MaterialRequestStatus::Approved
    }

    fn release_open_lines(&self) -> StockEffect {
        let Some(warehouse) = self.warehouse_id else {
            return StockEffect::none();
        };
        let doc = self.document_ref();
        self.lines
            .iter()
            .filter(|l| l.is_open())
            .fold(StockEffect::none(), |effect, line| {
                effect.reservation(ReservationOp::Release {
                    owner: doc.line(line.line_no),
                    item: line.item,
                    warehouse,
                })
            })
    }
}

impl AggregateRoot for MaterialRequest {
    type Id = MaterialRequestId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Workflow for MaterialRequest {
    type Status = MaterialRequestStatus;
    type Action = MaterialRequestAction;

    const TRANSITIONS: &'static [Transition<MaterialRequestStatus, MaterialRequestAction>] = &[
        Transition {
            action: MaterialRequestAction::Approve,
            from: &[MaterialRequestStatus::Draft],
            to: MaterialRequestStatus::Approved,
        },
        Transition {
            action: MaterialRequestAction::CancelLine,
            from: &[MaterialRequestStatus::Approved],
            to: MaterialRequestStatus::Approved,
        },
        Transition {
            action: MaterialRequestAction::Fulfill,
            from: &[MaterialRequestStatus::Approved],
            to: MaterialRequestStatus::Fulfilled,
        },
        Transition {
            action: MaterialRequestAction::Cancel,
            from: &[MaterialRequestStatus::Draft, MaterialRequestStatus::Approved],
            to: MaterialRequestStatus::Cancelled,
        },
    ];
}

/// Command: CreateMaterialRequest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateMaterialRequest {
    pub request_id: MaterialRequestId,
    pub warehouse_id: WarehouseId,
    pub purpose: Option<String>,
    pub lines: Vec<RequestLineDraft>,
    pub requested_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveMaterialRequest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveMaterialRequest {
    pub request_id: MaterialRequestId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelRequestLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequestLine {
    pub request_id: MaterialRequestId,
    pub line_no: u32,
    pub cancelled_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: FulfillMaterialRequest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillMaterialRequest {
    pub request_id: MaterialRequestId,
    pub fulfilled_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelMaterialRequest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelMaterialRequest {
    pub request_id: MaterialRequestId,
    pub cancelled_by: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaterialRequestCommand {
    Create(CreateMaterialRequest),
    Approve(ApproveMaterialRequest),
    CancelLine(CancelRequestLine),
    Fulfill(FulfillMaterialRequest),
    Cancel(CancelMaterialRequest),
}

/// Event: MaterialRequestCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialRequestCreated {
    pub request_id: MaterialRequestId,
    pub warehouse_id: WarehouseId,
    pub purpose: Option<String>,
    pub lines: Vec<RequestLine>,
    pub requested_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MaterialRequestApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialRequestApproved {
    pub request_id: MaterialRequestId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RequestLineCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLineCancelled {
    pub request_id: MaterialRequestId,
    pub line_no: u32,
    pub cancelled_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MaterialRequestFulfilled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialRequestFulfilled {
    pub request_id: MaterialRequestId,
    pub fulfilled_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MaterialRequestCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialRequestCancelled {
    pub request_id: MaterialRequestId,
    pub cancelled_by: UserId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaterialRequestEvent {
    Created(MaterialRequestCreated),
    Approved(MaterialRequestApproved),
    LineCancelled(RequestLineCancelled),
    Fulfilled(MaterialRequestFulfilled),
    Cancelled(MaterialRequestCancelled),
}

impl Event for MaterialRequestEvent {
    fn event_type(&self) -> &'static str {
        match self {
            MaterialRequestEvent::Created(_) => "requisition.request.created",
            MaterialRequestEvent::Approved(_) => "requisition.request.approved",
            MaterialRequestEvent::LineCancelled(_) => "requisition.request.line_cancelled",
            MaterialRequestEvent::Fulfilled(_) => "requisition.request.fulfilled",
            MaterialRequestEvent::Cancelled(_) => "requisition.request.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            MaterialRequestEvent::Created(e) => e.occurred_at,
            MaterialRequestEvent::Approved(e) => e.occurred_at,
            MaterialRequestEvent::LineCancelled(e) => e.occurred_at,
            MaterialRequestEvent::Fulfilled(e) => e.occurred_at,
            MaterialRequestEvent::Cancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for MaterialRequest {
    type Command = MaterialRequestCommand;
    type Event = MaterialRequestEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            MaterialRequestEvent::Created(e) => {
                self.id = e.request_id;
                self.warehouse_id = Some(e.warehouse_id);
                self.purpose = e.purpose.clone();
                self.lines = e.lines.clone();
                self.requested_by = Some(e.requested_by);
                self.status = MaterialRequestStatus::Draft;
                self.created = true;
            }
            MaterialRequestEvent::Approved(e) => {
                self.status = MaterialRequestStatus::Approved;
                self.approved_by = Some(e.approved_by);
                self.approved_at = Some(e.occurred_at);
            }
            MaterialRequestEvent::LineCancelled(e) => {
                if let Some(line) = self.lines.iter_mut().find(|l| l.line_no == e.line_no) {
                    line.status = RequestLineStatus::Cancelled;
                }
            }
            MaterialRequestEvent::Fulfilled(e) => {
                self.status = MaterialRequestStatus::Fulfilled;
                self.closed_by = Some(e.fulfilled_by);
                self.closed_at = Some(e.occurred_at);
            }
            MaterialRequestEvent::Cancelled(e) => {
                self.status = MaterialRequestStatus::Cancelled;
                self.closed_by = Some(e.cancelled_by);
                self.closed_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            MaterialRequestCommand::Create(cmd) => self.handle_create(cmd),
            MaterialRequestCommand::Approve(cmd) => self.handle_approve(cmd),
            MaterialRequestCommand::CancelLine(cmd) => self.handle_cancel_line(cmd),
            MaterialRequestCommand::Fulfill(cmd) => self.handle_fulfill(cmd),
            MaterialRequestCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl StockDocument for MaterialRequest {
    const KIND: DocumentKind = DocumentKind::MaterialRequest;

    fn empty(id: MaterialRequestId) -> Self {
        Self {
            id,
            warehouse_id: None,
            purpose: None,
            status: MaterialRequestStatus::Draft,
            lines: Vec::new(),
            requested_by: None,
            approved_by: None,
            approved_at: None,
            closed_by: None,
            closed_at: None,
            version: 0,
            created: false,
        }
    }

    fn aggregate_id(&self) -> AggregateId {
        self.id.0
    }

    fn status(&self) -> MaterialRequestStatus {
        self.status
    }

    fn stock_effect(&self, event: &MaterialRequestEvent) -> StockEffect {
        match event {
            MaterialRequestEvent::Approved(_) => {
                let Some(warehouse) = self.warehouse_id else {
                    return StockEffect::none();
                };
                let doc = self.document_ref();
                self.lines
                    .iter()
                    .filter(|l| l.is_open())
                    .fold(StockEffect::none(), |effect, line| {
                        effect.reservation(ReservationOp::Reserve {
                            owner: doc.line(line.line_no),
                            item: line.item,
                            warehouse,
                            quantity: line.quantity,
                        })
                    })
            }
            MaterialRequestEvent::LineCancelled(e) => {
                match (self.warehouse_id, self.line(e.line_no)) {
                    (Some(warehouse), Some(line)) => {
                        StockEffect::none().reservation(ReservationOp::Release {
                            owner: self.document_ref().line(line.line_no),
                            item: line.item,
                            warehouse,
                        })
                    }
                    _ => StockEffect::none(),
                }
            }
            // A draft request holds nothing yet.
            MaterialRequestEvent::Cancelled(_) if self.status == MaterialRequestStatus::Draft => {
                StockEffect::none()
            }
            MaterialRequestEvent::Fulfilled(_) | MaterialRequestEvent::Cancelled(_) => {
                self.release_open_lines()
            }
            MaterialRequestEvent::Created(_) => StockEffect::none(),
        }
    }
}

impl MaterialRequest {
    fn ensure_request_id(&self, request_id: MaterialRequestId) -> Result<(), DomainError> {
        if self.id != request_id {
            return Err(DomainError::validation("request_id mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(&self, request_id: MaterialRequestId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_request_id(request_id)
    }

    fn handle_create(
        &self,
        cmd: &CreateMaterialRequest,
    ) -> Result<Vec<MaterialRequestEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("material request already exists"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation(
                "material request needs at least one line",
            ));
        }
        if cmd.lines.iter().any(|l| l.quantity <= 0) {
            return Err(DomainError::validation("requested quantity must be positive"));
        }

        let lines = cmd
            .lines
            .iter()
            .zip(1u32..)
            .map(|(draft, line_no)| RequestLine {
                line_no,
                item: draft.item,
                quantity: draft.quantity,
                status: RequestLineStatus::Open,
            })
            .collect();

        Ok(vec![MaterialRequestEvent::Created(MaterialRequestCreated {
            request_id: cmd.request_id,
            warehouse_id: cmd.warehouse_id,
            purpose: cmd.purpose.clone(),
            lines,
            requested_by: cmd.requested_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(
        &self,
        cmd: &ApproveMaterialRequest,
    ) -> Result<Vec<MaterialRequestEvent>, DomainError> {
        self.ensure_exists(cmd.request_id)?;
        Self::transition(self.status, MaterialRequestAction::Approve)?;

        Ok(vec![MaterialRequestEvent::Approved(MaterialRequestApproved {
            request_id: cmd.request_id,
            approved_by: cmd.approved_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel_line(
        &self,
        cmd: &CancelRequestLine,
    ) -> Result<Vec<MaterialRequestEvent>, DomainError> {
        self.ensure_exists(cmd.request_id)?;
        Self::transition(self.status, MaterialRequestAction::CancelLine)?;

        let line = self.line(cmd.line_no).ok_or_else(|| {
            DomainError::validation(format!("unknown request line {}", cmd.line_no))
        })?;
        if !line.is_open() {
            return Err(DomainError::validation(format!(
                "request line {} is already cancelled",
                cmd.line_no
            )));
        }

        Ok(vec![MaterialRequestEvent::LineCancelled(RequestLineCancelled {
            request_id: cmd.request_id,
            line_no: cmd.line_no,
            cancelled_by: cmd.cancelled_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_fulfill(
        &self,
        cmd: &FulfillMaterialRequest,
    ) -> Result<Vec<MaterialRequestEvent>, DomainError> {
        self.ensure_exists(cmd.request_id)?;
        Self::transition(self.status, MaterialRequestAction::Fulfill)?;

        Ok(vec![MaterialRequestEvent::Fulfilled(MaterialRequestFulfilled {
            request_id: cmd.request_id,
            fulfilled_by: cmd.fulfilled_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(
        &self,
        cmd: &CancelMaterialRequest,
    ) -> Result<Vec<MaterialRequestEvent>, DomainError> {
        self.ensure_exists(cmd.request_id)?;
        Self::transition(self.status, MaterialRequestAction::Cancel)?;

        Ok(vec![MaterialRequestEvent::Cancelled(MaterialRequestCancelled {
            request_id: cmd.request_id,
            cancelled_by: cmd.cancelled_by,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use wareflow_core::MaterialId;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    pub(crate) fn draft_request(quantities: &[i64]) -> MaterialRequest {
        let request_id = MaterialRequestId::generate();
        let mut request = MaterialRequest::empty(request_id);
        let events = request
            .handle(&MaterialRequestCommand::Create(CreateMaterialRequest {
                request_id,
                warehouse_id: WarehouseId::new(),
                purpose: Some("line 3 maintenance".to_string()),
                lines: quantities
                    .iter()
                    .map(|q| RequestLineDraft {
                        item: ItemRef::material(MaterialId::new()),
                        quantity: *q,
                    })
                    .collect(),
                requested_by: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap();
        request.apply(&events[0]);
        request
    }

    pub(crate) fn approved_request(quantities: &[i64]) -> MaterialRequest {
        let mut request = draft_request(quantities);
        let events = request.handle(&approve(&request)).unwrap();
        request.apply(&events[0]);
        request
    }

    fn approve(request: &MaterialRequest) -> MaterialRequestCommand {
        MaterialRequestCommand::Approve(ApproveMaterialRequest {
            request_id: request.id_typed(),
            approved_by: UserId::new(),
            occurred_at: test_time(),
        })
    }

    fn cancel(request: &MaterialRequest) -> MaterialRequestCommand {
        MaterialRequestCommand::Cancel(CancelMaterialRequest {
            request_id: request.id_typed(),
            cancelled_by: UserId::new(),
            reason: None,
            occurred_at: test_time(),
        })
    }

    fn cancel_line(request: &MaterialRequest, line_no: u32) -> MaterialRequestCommand {
        MaterialRequestCommand::CancelLine(CancelRequestLine {
            request_id: request.id_typed(),
            line_no,
            cancelled_by: UserId::new(),
            occurred_at: test_time(),
        })
    }

    #[test]
    fn approval_reserves_each_line_for_its_owner() {
        let request = draft_request(&[50, 5]);
        let events = request.handle(&approve(&request)).unwrap();
        let effect = request.stock_effect(&events[0]);

        assert!(effect.movements.is_empty());
        assert_eq!(effect.reservations.len(), 2);
        match &effect.reservations[0] {
            ReservationOp::Reserve {
                owner, quantity, ..
            } => {
                assert_eq!(owner.document, request.document_ref());
                assert_eq!(owner.line_no, 1);
                assert_eq!(*quantity, 50);
            }
            other => panic!("expected Reserve, got {other:?}"),
        }
    }

    #[test]
    fn cancelling_a_draft_has_no_stock_effect() {
        let request = draft_request(&[50]);
        let events = request.handle(&cancel(&request)).unwrap();
        assert!(request.stock_effect(&events[0]).is_empty());
    }

    #[test]
    fn cancelling_an_approved_request_releases_open_lines() {
        let mut request = approved_request(&[50, 5]);
        let events = request.handle(&cancel_line(&request, 2)).unwrap();
        request.apply(&events[0]);

        let events = request.handle(&cancel(&request)).unwrap();
        let effect = request.stock_effect(&events[0]);
        assert_eq!(effect.reservations.len(), 1);
        assert!(matches!(
            effect.reservations[0],
            ReservationOp::Release { owner, .. } if owner.line_no == 1
        ));

        request.apply(&events[0]);
        assert_eq!(request.status(), MaterialRequestStatus::Cancelled);
        assert!(MaterialRequest::allowed_actions(request.status()).is_empty());
    }

    #[test]
    fn cancel_line_releases_only_that_line() {
        let mut request = approved_request(&[50, 5]);
        let events = request.handle(&cancel_line(&request, 2)).unwrap();
        let effect = request.stock_effect(&events[0]);
        assert_eq!(effect.reservations.len(), 1);
        assert!(matches!(
            effect.reservations[0],
            ReservationOp::Release { owner, .. } if owner.line_no == 2
        ));

        request.apply(&events[0]);
        assert_eq!(request.status(), MaterialRequestStatus::Approved);
        assert_eq!(
            request.line(2).map(|l| l.status),
            Some(RequestLineStatus::Cancelled)
        );

        let err = request.handle(&cancel_line(&request, 2)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn cancel_line_requires_approved_request() {
        let request = draft_request(&[50]);
        let err = request.handle(&cancel_line(&request, 1)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn fulfilled_request_cannot_be_cancelled() {
        let mut request = approved_request(&[50]);
        let events = request
            .handle(&MaterialRequestCommand::Fulfill(FulfillMaterialRequest {
                request_id: request.id_typed(),
                fulfilled_by: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap();
        request.apply(&events[0]);
        assert_eq!(request.status(), MaterialRequestStatus::Fulfilled);
        assert!(!request.accepts_issues());

        let err = request.handle(&cancel(&request)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn approve_twice_is_an_invalid_transition() {
        let request = approved_request(&[1]);
        let err = request.handle(&approve(&request)).unwrap_err();
        match err {
            DomainError::InvalidTransition(msg) => assert!(msg.contains("Approve")),
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }
}
