//! DOCX text extraction.
//!
//! A `.docx` file is a ZIP archive; the body lives in
//! `word/document.xml`. Text runs (`w:t`) are concatenated within each
//! paragraph (`w:p`), and paragraphs are emitted in document order.

use dockside_core::ExtractError;
use quick_xml::events::Event;
use std::io::Read;

/// Ceiling on the decompressed size of the document XML entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extract paragraph text from DOCX bytes, one string per paragraph.
pub fn paragraphs(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Parse(format!("docx archive: {e}")))?;

    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|_| ExtractError::Parse("word/document.xml not found".to_string()))?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|e| ExtractError::Parse(format!("docx entry read: {e}")))?;
        if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err(ExtractError::Parse(
                "word/document.xml exceeds size limit".to_string(),
            ));
        }
    }

    parse_paragraphs(&doc_xml)
}

/// Full document text: paragraphs separated by blank lines so paragraph
/// boundaries survive cleaning.
pub fn document_text(bytes: &[u8]) -> Result<String, ExtractError> {
    Ok(paragraphs(bytes)?.join("\n\n"))
}

fn parse_paragraphs(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => current.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" => current.push(' '),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                current.push_str(t.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let text = current.trim();
                    if !text.is_empty() {
                        paragraphs.push(text.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Parse(format!("docx xml: {e}"))),
            _ => {}
        }
        buf.clear();
    }

    Ok(paragraphs)
}
