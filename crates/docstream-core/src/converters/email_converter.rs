use std::path::Path;

use lazy_static::lazy_static;
use mailparse::{DispositionType, MailHeaderMap, ParsedMail, parse_mail};
use regex::Regex;

use super::budget::{TextBudget, clip};
use super::{ConversionError, DocumentConversion, DocumentConverter, DocumentFormat, DocumentStats};
use crate::settings::DocumentLimits;

lazy_static! {
    static ref SCRIPT_OR_STYLE: Regex =
        Regex::new(r"(?is)<(?:script|style)\b.*?</(?:script|style)\s*>")
            .expect("SCRIPT_OR_STYLE pattern is valid");
    static ref BLOCK_BREAK: Regex =
        Regex::new(r"(?i)<br\s*/?>|</(?:p|div|tr|li|h[1-6])\s*>")
            .expect("BLOCK_BREAK pattern is valid");
    static ref TAG: Regex = Regex::new(r"(?s)<[^>]*>").expect("TAG pattern is valid");
}

const HEADER_FIELDS: [&str; 5] = ["From", "To", "Cc", "Subject", "Date"];

pub struct EmailConverter;

impl DocumentConverter for EmailConverter {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Email
    }

    fn convert(
        &self,
        path: &Path,
        limits: &DocumentLimits,
    ) -> Result<DocumentConversion, ConversionError> {
        let bytes = std::fs::read(path)?;
        convert_email_bytes(&bytes, limits)
    }
}

#[derive(Debug, Default)]
struct MailParts {
    plain: Option<String>,
    html: Option<String>,
    attachments: usize,
}

pub fn convert_email_bytes(
    bytes: &[u8],
    limits: &DocumentLimits,
) -> Result<DocumentConversion, ConversionError> {
    let mail = parse_mail(bytes).map_err(|e| ConversionError::Parse(e.to_string()))?;

    let mut parts = MailParts::default();
    collect_parts(&mail, &mut parts)?;

    let headers: Vec<(&str, String)> = HEADER_FIELDS
        .iter()
        .filter_map(|&field| {
            mail.headers
                .get_first_value(field)
                .filter(|v| !v.trim().is_empty())
                .map(|v| (field, v))
        })
        .collect();

    let body = match (parts.plain, parts.html) {
        (Some(plain), _) if !plain.trim().is_empty() => plain,
        (_, Some(html)) => strip_html(&html),
        (plain, None) => plain.unwrap_or_default(),
    };

    Ok(render_email(&headers, &body, parts.attachments, limits))
}

fn collect_parts(part: &ParsedMail<'_>, out: &mut MailParts) -> Result<(), ConversionError> {
    let disposition = part.get_content_disposition();
    if disposition.disposition == DispositionType::Attachment
        || disposition.params.contains_key("filename")
    {
        out.attachments += 1;
        return Ok(());
    }

    if part.subparts.is_empty() {
        let body = || part.get_body().map_err(|e| ConversionError::Parse(e.to_string()));
        match part.ctype.mimetype.to_ascii_lowercase().as_str() {
            "text/plain" if out.plain.is_none() => out.plain = Some(body()?),
            "text/html" if out.html.is_none() => out.html = Some(body()?),
            _ => {}
        }
    }

    for sub in &part.subparts {
        collect_parts(sub, out)?;
    }
    Ok(())
}

/// Reduce an HTML body to its visible text, one block element per line.
pub fn strip_html(html: &str) -> String {
    let text = SCRIPT_OR_STYLE.replace_all(html, "");
    let text = BLOCK_BREAK.replace_all(&text, "\n");
    let text = TAG.replace_all(&text, "");
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

pub fn render_email(
    headers: &[(&str, String)],
    body: &str,
    attachments: usize,
    limits: &DocumentLimits,
) -> DocumentConversion {
    let mut header = String::from("Document type: Email message");
    for (field, value) in headers {
        header.push_str(&format!("\n{field}: {}", clip(value, limits.line_chars)));
    }
    header.push_str(&format!("\nAttachments: {attachments}"));

    let lines: Vec<&str> = body.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let stats = DocumentStats::Email {
        lines: lines.len(),
        attachments,
    };

    if lines.is_empty() {
        return DocumentConversion::empty(DocumentFormat::Email, header, stats);
    }

    let mut budget = TextBudget::new(limits.token_budget, &header);
    let mut shown = 0;
    for line in lines.iter().take(limits.max_lines) {
        if !budget.push(clip(line, limits.line_chars)) {
            break;
        }
        shown += 1;
    }
    let (body, truncated) = budget.finish(lines.len() - shown, "lines");

    DocumentConversion::new(DocumentFormat::Email, header, body, truncated, stats)
}
