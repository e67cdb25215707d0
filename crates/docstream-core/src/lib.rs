//! Streaming chat pipeline with token-budgeted document ingestion.
//!
//! Attachments pass through the document converters and the content-block normalizer,
//! the combined message goes to the stream relay, and the stream reconciler folds the
//! relay's events into the local conversation.

pub mod converters;
pub mod models;
pub mod repositories;
pub mod services;
pub mod settings;
