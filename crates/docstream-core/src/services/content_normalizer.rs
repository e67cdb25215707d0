//! Attachment payloads to provider content blocks.
//!
//! Images travel as base64 image blocks. Documents only ever travel as text.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;
use tracing::warn;

use crate::converters::{DocumentConversion, DocumentFormat, convert_document, mime_essence};
use crate::models::{ContentBlock, Message};
use crate::settings::DocumentLimits;

/// Supported image extensions and the media type sent for each.
pub const IMAGE_TYPES: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
];

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error(
        "Unsupported file type for '{file_name}' ({mime_type}). Supported types: {}",
        supported_types()
    )]
    UnsupportedType { file_name: String, mime_type: String },

    #[error("'{file_name}' is {size_bytes} bytes, above the {max_bytes} byte attachment limit")]
    TooLarge {
        file_name: String,
        size_bytes: u64,
        max_bytes: u64,
    },

    #[error("Failed to read attachment {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Human-readable list of accepted attachment types.
pub fn supported_types() -> String {
    let images: Vec<&str> = IMAGE_TYPES.iter().map(|(ext, _)| *ext).collect();
    let documents = DocumentFormat::ALL
        .iter()
        .map(|f| format!("{} ({})", f.label(), f.extensions().join(", ")))
        .collect::<Vec<_>>()
        .join(", ");
    format!("images ({}), {documents}", images.join(", "))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachmentKind {
    Image { media_type: &'static str },
    Document(DocumentFormat),
}

/// Classify by file extension first, declared MIME type second.
pub fn classify(file_name: &str, mime_type: &str) -> Result<AttachmentKind, NormalizeError> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    if let Some(ext) = extension.as_deref() {
        if let Some((_, media_type)) = IMAGE_TYPES.iter().find(|(e, _)| *e == ext) {
            return Ok(AttachmentKind::Image { media_type });
        }
        if let Some(format) = DocumentFormat::from_extension(ext) {
            return Ok(AttachmentKind::Document(format));
        }
    }

    let essence = mime_essence(mime_type);
    if let Some((_, media_type)) = IMAGE_TYPES.iter().find(|(_, m)| *m == essence) {
        return Ok(AttachmentKind::Image { media_type });
    }
    if let Some(format) = DocumentFormat::from_mime(&essence) {
        return Ok(AttachmentKind::Document(format));
    }

    Err(NormalizeError::UnsupportedType {
        file_name: file_name.to_string(),
        mime_type: mime_type.to_string(),
    })
}

/// A file on disk waiting to become a content block.
#[derive(Clone, Debug)]
pub struct Attachment {
    pub path: PathBuf,
    pub mime_type: String,
}

impl Attachment {
    pub fn new(path: impl Into<PathBuf>, mime_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Attachment whose type is known only from its extension.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::new(path, "application/octet-stream")
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug)]
pub struct NormalizedAttachment {
    pub kind: AttachmentKind,
    pub content_block: ContentBlock,
    /// Present for documents.
    pub conversion: Option<DocumentConversion>,
    pub size_bytes: u64,
}

/// Blocking: documents are converted inline.
///
/// Files above `limits.max_upload_bytes` are rejected before any content is read.
pub fn normalize(
    attachment: &Attachment,
    limits: &DocumentLimits,
) -> Result<NormalizedAttachment, NormalizeError> {
    let file_name = attachment.file_name();
    let kind = classify(&file_name, &attachment.mime_type)?;
    let io_error = |source| NormalizeError::Io {
        path: attachment.path.clone(),
        source,
    };

    let size_bytes = std::fs::metadata(&attachment.path).map_err(io_error)?.len();
    let max_bytes = limits.max_upload_bytes as u64;
    if size_bytes > max_bytes {
        return Err(NormalizeError::TooLarge {
            file_name,
            size_bytes,
            max_bytes,
        });
    }

    match kind {
        AttachmentKind::Image { media_type } => {
            let data = std::fs::read(&attachment.path).map_err(io_error)?;
            Ok(NormalizedAttachment {
                kind,
                content_block: ContentBlock::image(media_type, STANDARD.encode(&data)),
                conversion: None,
                size_bytes: data.len() as u64,
            })
        }
        AttachmentKind::Document(format) => {
            let conversion = convert_document(format, &attachment.path, limits);
            Ok(NormalizedAttachment {
                kind,
                content_block: ContentBlock::text(conversion.extracted_text()),
                conversion: Some(conversion),
                size_bytes,
            })
        }
    }
}

/// Build the user message for a send. Rejected attachments are returned beside the
/// message; the remaining ones still go out.
pub fn build_user_message(
    prompt: &str,
    attachments: &[Attachment],
    limits: &DocumentLimits,
) -> (Message, Vec<NormalizeError>) {
    let mut content = Vec::with_capacity(attachments.len() + 1);
    let mut rejected = Vec::new();

    for attachment in attachments {
        match normalize(attachment, limits) {
            Ok(normalized) => content.push(normalized.content_block),
            Err(e) => {
                warn!(path = %attachment.path.display(), error = %e, "Skipping attachment");
                rejected.push(e);
            }
        }
    }
    if !prompt.trim().is_empty() {
        content.push(ContentBlock::text(prompt));
    }

    (Message::user(content), rejected)
}
