//! References to business documents and the actor driving them.

use serde::{Deserialize, Serialize};

use crate::id::{AggregateId, UserId};
use crate::value_object::ValueObject;

/// The six business document types that can drive stock.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    PurchaseOrder,
    GoodsReceiptNote,
    MaterialRequest,
    MaterialIssueNote,
    StockAdjustment,
    StockTransfer,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::PurchaseOrder => "purchase_order",
            DocumentKind::GoodsReceiptNote => "goods_receipt_note",
            DocumentKind::MaterialRequest => "material_request",
            DocumentKind::MaterialIssueNote => "material_issue_note",
            DocumentKind::StockAdjustment => "stock_adjustment",
            DocumentKind::StockTransfer => "stock_transfer",
        }
    }
}

impl core::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a business document (type + id).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentRef {
    pub kind: DocumentKind,
    pub id: AggregateId,
}

impl DocumentRef {
    pub fn new(kind: DocumentKind, id: AggregateId) -> Self {
        Self { kind, id }
    }

    pub fn line(self, line_no: u32) -> DocumentLineRef {
        DocumentLineRef {
            document: self,
            line_no,
        }
    }
}

impl core::fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl ValueObject for DocumentRef {}

/// Reference to one line of a business document.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentLineRef {
    pub document: DocumentRef,
    pub line_no: u32,
}

impl core::fmt::Display for DocumentLineRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}#{}", self.document, self.line_no)
    }
}

impl ValueObject for DocumentLineRef {}

/// Authenticated caller, supplied per call by the API layer.
///
/// Authorization decisions happen upstream; the role is carried for audit only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: String,
}

impl Actor {
    pub fn new(user_id: UserId, role: impl Into<String>) -> Self {
        Self {
            user_id,
            role: role.into(),
        }
    }
}
