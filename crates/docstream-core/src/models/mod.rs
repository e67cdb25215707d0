pub mod content;
pub mod conversation;
pub mod stream_event;
pub mod stream_reconciler;
pub mod stream_session;

pub use content::{
    ContentBlock, EMPTY_RESPONSE_FALLBACK, ImageSource, Message, PLACEHOLDER_TEXT, RawContent, Role,
};
pub use conversation::Conversation;
pub use stream_event::{DeltaPayload, ErrorPayload, StreamEvent};
pub use stream_reconciler::{ApplyOutcome, ReconcileError, SessionHandle, StreamReconciler};
pub use stream_session::{SessionError, SessionState, StreamSession};
