//! Fetching documents over HTTP and extracting their plain text.
//!
//! [`HttpDocumentLoader`] downloads a URL with a size cap, [`detect_format`]
//! maps the bytes to PDF, DOCX or email, and [`extract_text`] pulls the text
//! out. The result is passed through [`normalize_text`] before chunking.

use std::io::{Cursor, Read};
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use mail_parser::MessageParser;
use quick_xml::Reader;
use quick_xml::events::Event;
use regex::Regex;
use tracing::{debug, error, info, warn};
use zip::ZipArchive;

use crate::document::{Document, DocumentFormat};
use crate::error::{RagError, Result};

const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const DOCX_BODY_PART: &str = "word/document.xml";

/// Separator placed between the cells of one DOCX table row.
pub const CELL_SEPARATOR: &str = " | ";

/// Lines that open a quoted reply or forwarded message.
static REPLY_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(on\s.+\swrote:|-{2,}\s*original message\s*-{2,}|_{10,}|from:\s.+|begin forwarded message:)$",
    )
    .expect("reply header pattern is valid")
});

static EMAIL_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(from|to|subject|date|cc|reply-to|message-id|mime-version):\s")
        .expect("email header pattern is valid")
});

/// A source of documents addressed by URL.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Fetch `url` and extract its normalized text.
    async fn load(&self, url: &str) -> Result<Document>;
}

/// Loads documents over HTTP(S) with a maximum body size.
pub struct HttpDocumentLoader {
    client: reqwest::Client,
    max_bytes: u64,
}

impl HttpDocumentLoader {
    /// Create a loader that rejects bodies larger than `max_bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the HTTP client cannot be built.
    pub fn new(max_bytes: u64, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::ConfigError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, max_bytes })
    }

    /// Download `url`, returning the body and its `Content-Type` header.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::FetchError`] for invalid URLs, transport failures,
    /// non-success statuses, and bodies over the size limit.
    pub async fn fetch(&self, url: &str) -> Result<(Vec<u8>, Option<String>)> {
        let fetch_error = |message: String| RagError::FetchError { url: url.to_string(), message };

        let parsed = reqwest::Url::parse(url).map_err(|e| fetch_error(format!("invalid URL: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(fetch_error(format!("unsupported URL scheme '{}'", parsed.scheme())));
        }

        info!(url, "downloading document");
        let mut response = self.client.get(parsed).send().await.map_err(|e| {
            error!(url, error = %e, "document request failed");
            fetch_error(format!("request failed: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("server returned {status}")));
        }
        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(fetch_error(format!(
                    "document too large: {length} bytes exceeds limit of {} bytes",
                    self.max_bytes
                )));
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut body = Vec::new();
        while let Some(piece) =
            response.chunk().await.map_err(|e| fetch_error(format!("failed to read body: {e}")))?
        {
            if (body.len() + piece.len()) as u64 > self.max_bytes {
                return Err(fetch_error(format!(
                    "document too large: body exceeds limit of {} bytes",
                    self.max_bytes
                )));
            }
            body.extend_from_slice(&piece);
        }

        debug!(url, bytes = body.len(), content_type = ?content_type, "downloaded document");
        Ok((body, content_type))
    }
}

#[async_trait]
impl DocumentSource for HttpDocumentLoader {
    async fn load(&self, url: &str) -> Result<Document> {
        let (raw, content_type) = self.fetch(url).await?;
        parse_document(url, content_type.as_deref(), raw)
    }
}

/// Detect the format of `raw`, extract its text and normalize it.
///
/// # Errors
///
/// Returns [`RagError::UnsupportedFormatError`] or [`RagError::ExtractionError`].
pub fn parse_document(url: &str, content_type: Option<&str>, raw: Vec<u8>) -> Result<Document> {
    let format = detect_format(url, content_type, &raw)?;
    let text = normalize_text(&extract_text(format, &raw)?);
    info!(url, %format, chars = text.chars().count(), "extracted document text");
    Ok(Document { url: url.to_string(), format, raw, text })
}

/// Map a fetched body to a supported format.
///
/// Checks, in order: magic bytes, `Content-Type`, URL path extension, and
/// RFC 822 headers at the start of the body.
///
/// # Errors
///
/// Returns [`RagError::UnsupportedFormatError`] if nothing matches.
pub fn detect_format(url: &str, content_type: Option<&str>, bytes: &[u8]) -> Result<DocumentFormat> {
    if bytes.starts_with(b"%PDF-") {
        return Ok(DocumentFormat::Pdf);
    }
    if bytes.starts_with(b"PK\x03\x04") && is_docx_archive(bytes) {
        return Ok(DocumentFormat::Docx);
    }

    let mime = content_type
        .and_then(|c| c.split(';').next())
        .map(|m| m.trim().to_ascii_lowercase())
        .unwrap_or_default();
    match mime.as_str() {
        "application/pdf" => return Ok(DocumentFormat::Pdf),
        DOCX_MIME => return Ok(DocumentFormat::Docx),
        "message/rfc822" => return Ok(DocumentFormat::Email),
        _ => {}
    }

    let path = reqwest::Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_else(|_| url.to_ascii_lowercase());
    if path.ends_with(".pdf") {
        return Ok(DocumentFormat::Pdf);
    }
    if path.ends_with(".docx") {
        return Ok(DocumentFormat::Docx);
    }
    if path.ends_with(".eml") {
        return Ok(DocumentFormat::Email);
    }

    if looks_like_email(bytes) {
        return Ok(DocumentFormat::Email);
    }

    let described = if mime.is_empty() { "unknown content type".to_string() } else { mime };
    Err(RagError::UnsupportedFormatError(format!("{described} at {url}")))
}

fn is_docx_archive(bytes: &[u8]) -> bool {
    let Ok(mut archive) = ZipArchive::new(Cursor::new(bytes)) else {
        return false;
    };
    archive.by_name(DOCX_BODY_PART).is_ok()
}

/// Whether the header block at the top of `bytes` looks like an RFC 822 message.
fn looks_like_email(bytes: &[u8]) -> bool {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(8 * 1024)]);
    let headers: Vec<String> = head
        .lines()
        .take_while(|line| !line.trim().is_empty())
        .filter(|line| EMAIL_HEADER.is_match(line))
        .map(|line| line.split(':').next().unwrap_or_default().to_ascii_lowercase())
        .collect();
    let has = |name: &str| headers.iter().any(|h| h == name);
    has("from") && (has("to") || has("subject"))
}

/// Extract raw (not yet normalized) text from a document of a known format.
///
/// # Errors
///
/// Returns [`RagError::ExtractionError`] if the content is corrupt.
pub fn extract_text(format: DocumentFormat, bytes: &[u8]) -> Result<String> {
    match format {
        DocumentFormat::Pdf => extract_pdf(bytes),
        DocumentFormat::Docx => extract_docx(bytes),
        DocumentFormat::Email => Ok(extract_email(bytes)),
    }
}

fn extraction_error(format: DocumentFormat, message: impl Into<String>) -> RagError {
    RagError::ExtractionError { format: format.to_string(), message: message.into() }
}

fn extract_pdf(bytes: &[u8]) -> Result<String> {
    let document = lopdf::Document::load_mem(bytes)
        .map_err(|e| extraction_error(DocumentFormat::Pdf, format!("failed to parse PDF: {e}")))?;

    let pages: Vec<u32> = document.get_pages().keys().copied().collect();
    let mut text = String::new();
    for page in &pages {
        match document.extract_text(&[*page]) {
            Ok(page_text) => {
                text.push_str(&page_text);
                text.push('\n');
            }
            Err(e) => warn!(page, error = %e, "skipping unreadable PDF page"),
        }
    }
    debug!(page_count = pages.len(), "extracted PDF pages");
    Ok(text)
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| extraction_error(DocumentFormat::Docx, format!("not a ZIP archive: {e}")))?;
    let mut part = archive.by_name(DOCX_BODY_PART).map_err(|e| {
        extraction_error(DocumentFormat::Docx, format!("missing {DOCX_BODY_PART}: {e}"))
    })?;
    let mut xml = String::new();
    part.read_to_string(&mut xml).map_err(|e| {
        extraction_error(DocumentFormat::Docx, format!("failed to read {DOCX_BODY_PART}: {e}"))
    })?;
    docx_text(&xml)
}

/// Append to the innermost open table cell, or to the body when outside tables.
fn push_text(cells: &mut [String], out: &mut String, text: &str) {
    match cells.last_mut() {
        Some(cell) => cell.push_str(text),
        None => out.push_str(text),
    }
}

/// Text of a WordprocessingML body in document order.
///
/// Paragraphs end with a newline; the cells of a table row are joined by
/// [`CELL_SEPARATOR`] and the row ends with a newline.
pub fn docx_text(xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut cells: Vec<String> = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"tr" => rows.push(Vec::new()),
                b"tc" => cells.push(String::new()),
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if matches!(e.local_name().as_ref(), b"tab" | b"br" | b"cr") {
                    push_text(&mut cells, &mut out, " ");
                }
            }
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| {
                    extraction_error(DocumentFormat::Docx, format!("bad text node: {e}"))
                })?;
                push_text(&mut cells, &mut out, &text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let sep = if cells.is_empty() { "\n" } else { " " };
                    push_text(&mut cells, &mut out, sep);
                }
                b"tc" => {
                    if let (Some(cell), Some(row)) = (cells.pop(), rows.last_mut()) {
                        row.push(cell.trim().to_string());
                    }
                }
                b"tr" => {
                    if let Some(row) = rows.pop() {
                        let line = row.join(CELL_SEPARATOR);
                        let end = if cells.is_empty() { "\n" } else { " " };
                        push_text(&mut cells, &mut out, &line);
                        push_text(&mut cells, &mut out, end);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(extraction_error(
                    DocumentFormat::Docx,
                    format!("malformed XML at byte {}: {e}", reader.buffer_position()),
                ));
            }
            _ => {}
        }
    }

    Ok(out)
}

fn extract_email(bytes: &[u8]) -> String {
    let body = MessageParser::default()
        .parse(bytes)
        .and_then(|message| message.body_text(0).map(|b| b.into_owned()))
        .unwrap_or_else(|| String::from_utf8_lossy(bytes).into_owned());

    let top = strip_reply_chain(&body);
    if top.is_empty() { body } else { top }
}

/// Keep only the top-level message of an email body.
///
/// Drops `>` quoted lines and cuts at the first reply attribution, original
/// message banner, forwarded header block, or `-- ` signature delimiter that
/// follows some content.
pub fn strip_reply_chain(body: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut seen_content = false;

    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('>') {
            continue;
        }
        if line.trim_end_matches('\r') == "-- " {
            break;
        }
        if seen_content && REPLY_HEADER.is_match(trimmed) {
            break;
        }
        if !trimmed.is_empty() {
            seen_content = true;
        }
        kept.push(line);
    }

    kept.join("\n").trim().to_string()
}

/// Collapse whitespace runs to a single space, drop other control and
/// zero-width characters, and trim.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if c.is_control() || matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}') {
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
    }
    out
}
