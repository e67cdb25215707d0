use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::content_normalizer::{
    Attachment, AttachmentKind, NormalizeError, NormalizedAttachment, classify, normalize,
};
use crate::converters::{DocumentFormat, DocumentStats};
use crate::models::ContentBlock;
use crate::settings::DocumentLimits;

const MAX_STORED_NAME_CHARS: usize = 100;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUploadRequest {
    /// Plain base64 or a `data:<mime>;base64,` URL.
    pub base64data: String,
    pub file_name: String,
    pub mime_type: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUploadResponse {
    pub success: bool,
    /// Full block for the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_block: Option<ContentBlock>,
    /// Short summary for display; the full text is never rendered inline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_content_block: Option<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileUploadResponse {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content_block: None,
            ui_content_block: None,
            file_path: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("File data is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("File is too large ({size} bytes); the limit is {max} bytes")]
    TooLarge { size: usize, max: usize },

    #[error("File is empty")]
    Empty,

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error("Failed to store upload: {0}")]
    Io(#[from] std::io::Error),

    #[error("Upload processing failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Backend half of the file-upload contract.
pub struct UploadService {
    upload_dir: PathBuf,
    limits: DocumentLimits,
}

impl UploadService {
    pub fn new(upload_dir: PathBuf, limits: DocumentLimits) -> Self {
        Self { upload_dir, limits }
    }

    /// Uploads under the platform data directory.
    pub fn with_default_dir(limits: DocumentLimits) -> anyhow::Result<Self> {
        let dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?
            .join("docstream")
            .join("uploads");
        Ok(Self::new(dir, limits))
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Never fails: every problem becomes `success: false` with an error message.
    pub async fn handle(&self, request: FileUploadRequest) -> FileUploadResponse {
        let file_name = request.file_name.clone();
        match self.process(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(file_name = %file_name, error = %e, "Upload rejected");
                FileUploadResponse::failure(e.to_string())
            }
        }
    }

    async fn process(&self, request: FileUploadRequest) -> Result<FileUploadResponse, UploadError> {
        let payload: String = strip_data_url(&request.base64data)
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();

        // Reject oversized payloads before decoding them.
        let max = self.limits.max_upload_bytes;
        let approx_size = payload.len() / 4 * 3;
        if approx_size > max + 3 {
            return Err(UploadError::TooLarge { size: approx_size, max });
        }
        let bytes = STANDARD.decode(payload.as_bytes())?;
        if bytes.len() > max {
            return Err(UploadError::TooLarge { size: bytes.len(), max });
        }
        if bytes.is_empty() {
            return Err(UploadError::Empty);
        }

        // Unsupported types are refused before anything is written.
        classify(&request.file_name, &request.mime_type)?;

        tokio::fs::create_dir_all(&self.upload_dir).await?;
        let path = self.upload_dir.join(stored_file_name(&request.file_name));
        tokio::fs::write(&path, &bytes).await?;

        let attachment = Attachment::new(path.clone(), request.mime_type.clone());
        let limits = self.limits;
        let normalized =
            tokio::task::spawn_blocking(move || normalize(&attachment, &limits)).await??;

        let summary = summarize(&request.file_name, &normalized);
        info!(
            file_name = %request.file_name,
            path = %path.display(),
            size = bytes.len(),
            "Upload processed"
        );

        Ok(FileUploadResponse {
            success: true,
            content_block: Some(normalized.content_block),
            ui_content_block: Some(ContentBlock::text(summary)),
            file_path: Some(path.to_string_lossy().into_owned()),
            error: None,
        })
    }
}

fn strip_data_url(data: &str) -> &str {
    match data.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map_or(rest, |(_, payload)| payload),
        None => data,
    }
}

/// `<uuid>_<sanitized name>`, so concurrent uploads of the same name never collide.
pub fn stored_file_name(original: &str) -> String {
    let base = Path::new(original)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut sanitized: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .take(MAX_STORED_NAME_CHARS)
        .collect();
    if sanitized.trim_matches(|c| c == '.' || c == '_').is_empty() {
        sanitized = "upload".to_string();
    }
    format!("{}_{}", Uuid::new_v4(), sanitized)
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("1 {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

/// One-line description shown instead of the extracted text.
pub fn summarize(file_name: &str, normalized: &NormalizedAttachment) -> String {
    let format = match normalized.kind {
        AttachmentKind::Image { .. } => {
            let kb = normalized.size_bytes.div_ceil(1024);
            return format!("🖼️ {file_name} · {kb} KB");
        }
        AttachmentKind::Document(format) => format,
    };
    let Some(conversion) = normalized.conversion.as_ref() else {
        return format!("{} {file_name}", format.icon());
    };

    let details = match conversion.stats {
        DocumentStats::Spreadsheet { sheets, rows } => {
            format!("{} · {}", plural(sheets, "sheet"), plural(rows, "row"))
        }
        DocumentStats::Csv { rows, columns } => {
            format!("{} · {}", plural(rows, "row"), plural(columns, "column"))
        }
        DocumentStats::Pdf { pages, lines } => {
            format!("{} · {}", plural(pages, "page"), plural(lines, "line"))
        }
        DocumentStats::Email { lines, attachments } => {
            format!("{} · {}", plural(lines, "line"), plural(attachments, "attachment"))
        }
        DocumentStats::Unavailable => {
            return format!("⚠️ {file_name} · could not be read as {} file", article(format));
        }
    };

    let mut summary = format!("{} {file_name} · {details}", format.icon());
    if conversion.truncated {
        summary.push_str(" · truncated to fit");
    }
    summary
}

fn article(format: DocumentFormat) -> String {
    match format {
        DocumentFormat::Spreadsheet | DocumentFormat::Email => format!("an {}", format.label()),
        DocumentFormat::Csv | DocumentFormat::Pdf => format!("a {}", format.label()),
    }
}
