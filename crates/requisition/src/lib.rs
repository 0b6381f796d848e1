//! Requisition domain module (material requests and material issue notes).
//!
//! Deterministic domain logic only: the documents decide what their
//! transitions mean for reservations and the ledger, the infrastructure layer
//! applies it.

pub mod issue;
pub mod request;

pub use issue::{
    CreateMaterialIssueNote, IssueLine, IssueLineDraft, MaterialIssueAction, MaterialIssueCommand,
    MaterialIssueEvent, MaterialIssueNote, MaterialIssueNoteId, MaterialIssueStatus,
    PostMaterialIssue,
};
pub use request::{
    ApproveMaterialRequest, CancelMaterialRequest, CancelRequestLine, CreateMaterialRequest,
    FulfillMaterialRequest, MaterialRequest, MaterialRequestAction, MaterialRequestCommand,
    MaterialRequestEvent, MaterialRequestId, MaterialRequestStatus, RequestLine,
    RequestLineDraft, RequestLineStatus,
};
