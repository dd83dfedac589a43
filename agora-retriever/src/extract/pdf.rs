//! PDF text extraction with per-page provenance.

use super::{ExtractedText, PageSpan};
use crate::error::{RetrievalError, Result};

/// Extract text from a PDF, one page at a time so every span of the output
/// can be traced back to a page number. Pages without an extractable text
/// layer (scanned images) produce a warning and an empty span, not an error.
pub fn extract(bytes: &[u8]) -> Result<ExtractedText> {
    let document = lopdf::Document::load_mem(bytes)
        .map_err(|e| RetrievalError::Extraction(format!("failed to parse PDF: {e}")))?;

    if document.is_encrypted() {
        return Err(RetrievalError::Extraction(
            "PDF is encrypted and cannot be extracted".to_string(),
        ));
    }

    let mut extracted = ExtractedText::default();
    let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    if page_numbers.is_empty() {
        return Err(RetrievalError::Extraction("PDF contains no pages".to_string()));
    }

    for page_number in page_numbers {
        let page_text = match document.extract_text(&[page_number]) {
            Ok(text) => normalize_page_text(&text),
            Err(e) => {
                extracted
                    .warnings
                    .push(format!("page {page_number}: text extraction failed ({e})"));
                String::new()
            }
        };

        if page_text.trim().is_empty() {
            extracted.warnings.push(format!(
                "page {page_number}: no text layer (scanned image?)"
            ));
        }

        let start = extracted.text.len();
        extracted.text.push_str(&page_text);
        let end = extracted.text.len();
        extracted.pages.push(PageSpan {
            page: page_number,
            start,
            end,
        });

        if !page_text.is_empty() {
            extracted.text.push_str("\n\n");
        }
    }

    Ok(extracted)
}

// Collapse the extractor's artifacts: stray carriage returns and runs of
// blank lines inside a single page.
fn normalize_page_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.replace('\r', "\n").lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{Document, Object, Stream, dictionary};

    /// Build a minimal PDF with one page of Courier text per input string.
    pub(crate) fn build_pdf(pages: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for text in pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![50.into(), 700.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(
                dictionary! {},
                content.encode().expect("content stream encodes"),
            ));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).expect("PDF serializes");
        buffer
    }

    #[test]
    fn extracts_text_per_page() {
        let bytes = build_pdf(&[
            "Meeting called to order at noon.",
            "Budget allocation: 2.3M for streets",
            "Meeting adjourned.",
        ]);
        let extracted = extract(&bytes).unwrap();

        assert_eq!(extracted.pages.len(), 3);
        assert!(extracted.text.contains("Budget allocation"));

        let offset = extracted.text.find("Budget allocation").unwrap();
        assert_eq!(extracted.page_for_offset(offset), Some(2));
    }

    #[test]
    fn corrupt_bytes_fail_with_extraction_error() {
        let err = extract(b"MZ\x90\x00 definitely not a pdf").unwrap_err();
        assert!(matches!(err, RetrievalError::Extraction(_)));
    }

    #[test]
    fn page_spans_tile_the_text() {
        let bytes = build_pdf(&["First page.", "Second page."]);
        let extracted = extract(&bytes).unwrap();
        assert_eq!(extracted.pages[0].start, 0);
        for pair in extracted.pages.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
    }
}
