//! Purchasing domain module (purchase orders and goods receipt notes).
//!
//! This crate contains business rules for purchasing, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod order;
pub mod receipt;

pub use order::{
    AddLine, Approve, Cancel, Close, CreatePurchaseOrder, LineItem, LineItemDraft, PurchaseOrder,
    PurchaseOrderAction, PurchaseOrderApproved, PurchaseOrderCommand, PurchaseOrderCreated,
    PurchaseOrderEvent, PurchaseOrderId, PurchaseOrderStatus,
};
pub use receipt::{
    CreateGoodsReceiptNote, GoodsReceiptAction, GoodsReceiptCommand, GoodsReceiptEvent,
    GoodsReceiptNote, GoodsReceiptNoteId, GoodsReceiptStatus, PostGoodsReceipt, QcResult,
    QcStatus, ReceiptLine, ReceiptLineDraft, RecordQc,
};
