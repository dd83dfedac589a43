//! Text extraction from uploaded document bytes.
//!
//! Extraction is a pure function of (bytes, declared format) to normalized
//! UTF-8 text plus provenance spans and warnings. Format dispatch is a closed
//! enum over the supported types; an unrecognized declaration fails with
//! [`RetrievalError::UnsupportedFormat`] before any parsing happens, and a
//! corrupt file fails with [`RetrievalError::Extraction`] without affecting
//! any other document in a batch.

mod docx;
mod pdf;
mod plain;

use crate::error::{RetrievalError, Result};

/// Supported document formats, selected by declared MIME type or extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    PlainText,
}

impl DocumentKind {
    /// Resolve a declared type hint (MIME type or file extension) to a
    /// supported format.
    pub fn from_hint(hint: &str) -> Result<Self> {
        let normalized = hint.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "application/pdf" | "pdf" => Ok(Self::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            | "docx" => Ok(Self::Docx),
            "text/plain" | "text/markdown" | "txt" | "md" | "text" => Ok(Self::PlainText),
            _ => Err(RetrievalError::UnsupportedFormat(hint.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::PlainText => "text",
        }
    }
}

/// A page's span within the extracted text, for provenance reporting.
#[derive(Debug, Clone)]
pub struct PageSpan {
    /// 1-based page number.
    pub page: u32,
    /// Byte offset of the page's first char in the extracted text.
    pub start: usize,
    /// Byte offset one past the page's last char.
    pub end: usize,
}

/// Normalized extraction output.
#[derive(Debug, Clone, Default)]
pub struct ExtractedText {
    /// The full normalized UTF-8 text.
    pub text: String,
    /// Page spans, in order. Empty for formats without page structure.
    pub pages: Vec<PageSpan>,
    /// Non-fatal extraction notes, e.g. a scanned page with no text layer.
    pub warnings: Vec<String>,
}

impl ExtractedText {
    /// The page containing the given byte offset, where page structure is
    /// known.
    pub fn page_for_offset(&self, offset: usize) -> Option<u32> {
        self.pages
            .iter()
            .find(|span| offset >= span.start && offset < span.end)
            .or_else(|| self.pages.last().filter(|span| offset >= span.end))
            .map(|span| span.page)
    }
}

/// Extract normalized text from raw bytes in the declared format.
pub fn extract(bytes: &[u8], kind: DocumentKind) -> Result<ExtractedText> {
    match kind {
        DocumentKind::Pdf => pdf::extract(bytes),
        DocumentKind::Docx => docx::extract(bytes),
        DocumentKind::PlainText => plain::extract(bytes),
    }
}
