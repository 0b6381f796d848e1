use serde::Serialize;

use wareflow_core::{Aggregate, AggregateId, DocumentKind, DocumentRef, DomainError, Workflow};
use wareflow_events::Event as DocumentEvent;

use crate::effect::StockEffect;

/// A business document whose transitions may drive stock.
///
/// The document decides *whether* a transition is legal (through its
/// [`Workflow`] table and `handle`) and *what* it means for stock
/// (`stock_effect`). Applying that effect is the posting layer's job.
pub trait StockDocument:
    Aggregate<Error = DomainError, Event: DocumentEvent + Serialize> + Workflow + Clone + Send + 'static
{
    const KIND: DocumentKind;

    /// Create an empty, not-yet-created document instance.
    fn empty(id: Self::Id) -> Self;

    fn aggregate_id(&self) -> AggregateId;

    fn document_ref(&self) -> DocumentRef {
        DocumentRef::new(Self::KIND, self.aggregate_id())
    }

    /// Header status (the authoritative workflow state).
    fn status(&self) -> <Self as Workflow>::Status;

    /// Stock effect of `event`, evaluated against the state *before* the event
    /// is applied.
    fn stock_effect(&self, event: &Self::Event) -> StockEffect;

    /// True when `command` repeats a posting this document has already
    /// completed; the posting layer then answers with the recorded result
    /// instead of applying anything.
    fn is_repeat_posting(&self, _command: &Self::Command) -> bool {
        false
    }
}
