//! DOCX text extraction.
//!
//! A .docx file is a ZIP archive; the document body lives in
//! `word/document.xml`. Paragraph text is pulled from `w:t` runs in document
//! order, with paragraph boundaries preserved as blank lines so the chunker
//! can split on them.

use super::ExtractedText;
use crate::error::{RetrievalError, Result};
use quick_xml::Reader;
use quick_xml::events::Event;
use std::io::{Cursor, Read};

pub fn extract(bytes: &[u8]) -> Result<ExtractedText> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| RetrievalError::Extraction(format!("not a DOCX archive: {e}")))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| RetrievalError::Extraction(format!("DOCX missing document body: {e}")))?
        .read_to_string(&mut xml)
        .map_err(|e| RetrievalError::Extraction(format!("failed to read document body: {e}")))?;

    let paragraphs = parse_paragraphs(&xml)?;

    let mut extracted = ExtractedText::default();
    if paragraphs.is_empty() {
        extracted
            .warnings
            .push("document body contains no paragraph text".to_string());
    }
    extracted.text = paragraphs.join("\n\n");
    Ok(extracted)
}

fn parse_paragraphs(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text_run = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => {
                    let paragraph = current.trim().to_string();
                    if !paragraph.is_empty() {
                        paragraphs.push(paragraph);
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text_run => {
                let text = t
                    .unescape()
                    .map_err(|e| RetrievalError::Extraction(format!("bad XML escape: {e}")))?;
                current.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(RetrievalError::Extraction(format!(
                    "malformed document XML: {e}"
                )));
            }
        }
    }

    Ok(paragraphs)
}
