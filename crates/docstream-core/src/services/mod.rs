pub mod content_normalizer;
pub mod history;
pub mod provider_routes;
pub mod relay_service;
pub mod session_registry;
pub mod sse;
pub mod subscription;
pub mod token_estimator;
pub mod upload_service;

pub use content_normalizer::{
    Attachment, AttachmentKind, NormalizeError, NormalizedAttachment, build_user_message,
    classify, normalize,
};
pub use history::prepare_history;
pub use provider_routes::{ModelRoute, RouteTable, VersionPlacement};
pub use relay_service::{EventStream, RelayError, SendStreamRequest, StreamRelay};
pub use session_registry::{SessionGuard, SessionRegistry};
pub use subscription::{SessionEnvelope, Subscription, subscribe};
pub use token_estimator::estimate_tokens;
pub use upload_service::{FileUploadRequest, FileUploadResponse, UploadError, UploadService};
