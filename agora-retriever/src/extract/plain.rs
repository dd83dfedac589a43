//! Plain-text passthrough with charset normalization.

use super::ExtractedText;
use crate::error::Result;

pub fn extract(bytes: &[u8]) -> Result<ExtractedText> {
    let mut extracted = ExtractedText::default();

    // Strip a UTF-8 BOM if present.
    let bytes = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(bytes);

    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            extracted
                .warnings
                .push("input was not valid UTF-8; invalid sequences were replaced".to_string());
            String::from_utf8_lossy(bytes).into_owned()
        }
    };

    extracted.text = text.replace("\r\n", "\n").replace('\r', "\n");
    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_passes_through() {
        let extracted = extract("Public comment période".as_bytes()).unwrap();
        assert_eq!(extracted.text, "Public comment période");
        assert!(extracted.warnings.is_empty());
    }

    #[test]
    fn bom_is_stripped() {
        let extracted = extract(b"\xef\xbb\xbfagenda item one").unwrap();
        assert_eq!(extracted.text, "agenda item one");
    }

    #[test]
    fn crlf_is_normalized() {
        let extracted = extract(b"line one\r\nline two\rline three").unwrap();
        assert_eq!(extracted.text, "line one\nline two\nline three");
    }

    #[test]
    fn invalid_utf8_is_recovered_with_warning() {
        let extracted = extract(b"caf\xff latin-1 junk").unwrap();
        assert!(extracted.text.contains("caf"));
        assert_eq!(extracted.warnings.len(), 1);
    }
}
