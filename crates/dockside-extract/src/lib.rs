//! # dockside-extract
//!
//! Content extraction for the dockside ingestion pipeline: raw object
//! bytes in, cleaned UTF-8 text plus per-format metadata out.
//!
//! ## Supported Formats
//!
//! | Suffix | Path | Method |
//! |--------|------|--------|
//! | `.pdf` | page images → OCR, pages joined with form feed | `pdf_ocr` |
//! | `.png .jpg .jpeg .tiff` | raw bytes → OCR | `image_ocr` |
//! | `.docx` | paragraph extraction from the OOXML body | `docx_text` |
//! | `.xlsx .xls` | per-sheet `Sheet: <name>` headers + TSV rows | `spreadsheet_text` |
//! | `.csv` | rows as TSV | `csv_text` |
//! | `.txt` | UTF-8 with lossy fallback | `plain_text` |
//!
//! The format is decided up front from the key suffix
//! ([`DocumentKind::from_key`]); each variant is one function with the
//! same shape. OCR goes through the [`OcrEngine`] trait so the fast
//! service and the vision-LM endpoint are interchangeable.
//!
//! All extracted text passes through the [`TextCleaner`] before leaving
//! this crate; OCR output gets the full repair sequence, structured
//! formats the structural rules only. The fingerprint downstream is
//! computed over cleaned text.

pub mod clean;
pub mod docx;
pub mod ocr;
pub mod pdf;
pub mod tabular;

pub use clean::{ElisionTable, TextCleaner};
pub use ocr::{FastOcrClient, VisionOcrClient};

use dockside_core::{
    ExtractError, ExtractedDocument, ExtractionMethod, OcrEngine, RawDocument,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Closed set of supported document formats, decided from the key suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Image,
    Docx,
    Spreadsheet,
    Csv,
    PlainText,
}

impl DocumentKind {
    /// Classify a storage key by suffix, case-insensitive.
    #[must_use]
    pub fn from_key(storage_key: &str) -> Option<Self> {
        let suffix = dockside_core::file_type_of(storage_key);
        match suffix.as_str() {
            "pdf" => Some(Self::Pdf),
            "png" | "jpg" | "jpeg" | "tiff" => Some(Self::Image),
            "docx" => Some(Self::Docx),
            "xlsx" | "xls" => Some(Self::Spreadsheet),
            "csv" => Some(Self::Csv),
            "txt" => Some(Self::PlainText),
            _ => None,
        }
    }
}

/// The content extractor: format dispatch, OCR, cleaning.
pub struct Extractor {
    ocr: Arc<dyn OcrEngine>,
    cleaner: TextCleaner,
}

impl Extractor {
    /// Build an extractor over the configured OCR engine.
    #[must_use]
    pub fn new(ocr: Arc<dyn OcrEngine>, elisions: &ElisionTable) -> Self {
        Self {
            ocr,
            cleaner: TextCleaner::new(elisions),
        }
    }

    /// Transform a raw document into cleaned text.
    ///
    /// Per-page and per-sheet failures are soft: they accumulate in
    /// `extraction_errors` and the surviving text is kept. Transient OCR
    /// failures hard-fail the document after the engine's retries.
    pub async fn extract(&self, raw: &RawDocument) -> Result<ExtractedDocument, ExtractError> {
        let kind = DocumentKind::from_key(&raw.storage_key).ok_or_else(|| {
            ExtractError::UnsupportedType(dockside_core::file_type_of(&raw.storage_key))
        })?;

        let result = match kind {
            DocumentKind::Pdf => self.extract_pdf(raw).await,
            DocumentKind::Image => self.extract_image(raw).await,
            DocumentKind::Docx => self.extract_docx(raw),
            DocumentKind::Spreadsheet => self.extract_spreadsheet(raw),
            DocumentKind::Csv => self.extract_csv(raw),
            DocumentKind::PlainText => self.extract_plain(raw),
        }?;

        debug!(
            key = %raw.storage_key,
            method = ?result.extraction_method,
            chars = result.cleaned_text.len(),
            soft_errors = result.extraction_errors.len(),
            "extraction complete"
        );
        Ok(result)
    }

    async fn extract_pdf(&self, raw: &RawDocument) -> Result<ExtractedDocument, ExtractError> {
        let bytes = raw.bytes.clone();
        let (images, page_count) = tokio::task::spawn_blocking(move || pdf::page_images(&bytes))
            .await
            .map_err(|e| ExtractError::Failed(format!("pdf task join: {e}")))??;

        let mut errors = Vec::new();
        if images.len() < page_count as usize {
            errors.push(format!(
                "{} of {page_count} pages have no raster image",
                page_count as usize - images.len()
            ));
        }

        let mut page_texts = Vec::new();
        for image in &images {
            let name = format!("{} - page {}", raw.file_name(), image.page);
            match self.ocr.recognize(&image.data, &name).await {
                Ok(text) => page_texts.push(text),
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    warn!(key = %raw.storage_key, page = image.page, error = %e, "page ocr failed");
                    errors.push(format!("page {}: {e}", image.page));
                }
            }
        }

        Ok(ExtractedDocument {
            storage_key: raw.storage_key.clone(),
            cleaned_text: self.cleaner.clean(&page_texts.join("\u{000C}")),
            extraction_method: ExtractionMethod::PdfOcr,
            page_count: Some(page_count),
            extraction_errors: errors,
        })
    }

    async fn extract_image(&self, raw: &RawDocument) -> Result<ExtractedDocument, ExtractError> {
        let text = self.ocr.recognize(&raw.bytes, raw.file_name()).await?;
        Ok(ExtractedDocument {
            storage_key: raw.storage_key.clone(),
            cleaned_text: self.cleaner.clean(&text),
            extraction_method: ExtractionMethod::ImageOcr,
            page_count: None,
            extraction_errors: Vec::new(),
        })
    }

    fn extract_docx(&self, raw: &RawDocument) -> Result<ExtractedDocument, ExtractError> {
        let text = docx::document_text(&raw.bytes)?;
        Ok(ExtractedDocument {
            storage_key: raw.storage_key.clone(),
            cleaned_text: self.cleaner.normalize(&text),
            extraction_method: ExtractionMethod::DocxText,
            page_count: None,
            extraction_errors: Vec::new(),
        })
    }

    fn extract_spreadsheet(&self, raw: &RawDocument) -> Result<ExtractedDocument, ExtractError> {
        let sheets = tabular::spreadsheet_text(&raw.bytes)?;
        Ok(ExtractedDocument {
            storage_key: raw.storage_key.clone(),
            cleaned_text: self.cleaner.normalize(&sheets.text),
            extraction_method: ExtractionMethod::SpreadsheetText,
            page_count: Some(sheets.sheet_count),
            extraction_errors: sheets.errors,
        })
    }

    fn extract_csv(&self, raw: &RawDocument) -> Result<ExtractedDocument, ExtractError> {
        let text = tabular::csv_text(&raw.bytes)?;
        Ok(ExtractedDocument {
            storage_key: raw.storage_key.clone(),
            cleaned_text: self.cleaner.normalize(&text),
            extraction_method: ExtractionMethod::CsvText,
            page_count: None,
            extraction_errors: Vec::new(),
        })
    }

    fn extract_plain(&self, raw: &RawDocument) -> Result<ExtractedDocument, ExtractError> {
        let text = String::from_utf8_lossy(&raw.bytes);
        Ok(ExtractedDocument {
            storage_key: raw.storage_key.clone(),
            cleaned_text: self.cleaner.normalize(&text),
            extraction_method: ExtractionMethod::PlainText,
            page_count: None,
            extraction_errors: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    // ==================== Mock OCR ====================

    struct MockOcr {
        reply: String,
    }

    #[async_trait]
    impl OcrEngine for MockOcr {
        fn name(&self) -> &str {
            "mock"
        }

        async fn recognize(&self, _image: &[u8], _file_name: &str) -> Result<String, ExtractError> {
            Ok(self.reply.clone())
        }
    }

    fn extractor(reply: &str) -> Extractor {
        Extractor::new(
            Arc::new(MockOcr {
                reply: reply.to_string(),
            }),
            &ElisionTable::default(),
        )
    }

    fn raw(key: &str, bytes: &[u8]) -> RawDocument {
        RawDocument {
            storage_key: key.to_string(),
            bytes: bytes.to_vec(),
            content_type: String::new(),
            size: bytes.len() as u64,
        }
    }

    // ==================== Dispatch ====================

    #[test]
    fn test_kind_from_key() {
        assert_eq!(DocumentKind::from_key("a/b.pdf"), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_key("scan.JPEG"), Some(DocumentKind::Image));
        assert_eq!(DocumentKind::from_key("x.tiff"), Some(DocumentKind::Image));
        assert_eq!(DocumentKind::from_key("doc.docx"), Some(DocumentKind::Docx));
        assert_eq!(
            DocumentKind::from_key("book.XLS"),
            Some(DocumentKind::Spreadsheet)
        );
        assert_eq!(DocumentKind::from_key("rows.csv"), Some(DocumentKind::Csv));
        assert_eq!(
            DocumentKind::from_key("notes.txt"),
            Some(DocumentKind::PlainText)
        );
        assert_eq!(DocumentKind::from_key("archive.tar.gz"), None);
        assert_eq!(DocumentKind::from_key("no-suffix"), None);
    }

    #[tokio::test]
    async fn test_unsupported_suffix_fails() {
        let e = extractor("");
        let err = e.extract(&raw("a/b.exe", b"MZ")).await.unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedType(s) if s == "exe"));
    }

    // ==================== Plain text ====================

    #[tokio::test]
    async fn test_plain_text_lossy_decode() {
        let e = extractor("");
        let doc = e
            .extract(&raw("notes.txt", b"hello \xffworld."))
            .await
            .unwrap();
        assert_eq!(doc.extraction_method, ExtractionMethod::PlainText);
        assert!(doc.cleaned_text.starts_with("hello "));
        assert!(doc.cleaned_text.ends_with("world."));
    }

    #[tokio::test]
    async fn test_empty_file_yields_empty_text() {
        let e = extractor("");
        let doc = e.extract(&raw("empty.txt", b"")).await.unwrap();
        assert_eq!(doc.cleaned_text, "");
        assert!(doc.extraction_errors.is_empty());
    }

    // ==================== Image ====================

    #[tokio::test]
    async fn test_image_goes_through_ocr_and_cleaning() {
        let e = extractor("The lion isa large\ncatof the genus Panthera");
        let doc = e.extract(&raw("scan.png", b"png")).await.unwrap();
        assert_eq!(doc.extraction_method, ExtractionMethod::ImageOcr);
        assert_eq!(
            doc.cleaned_text,
            "The lion is a large cat of the genus Panthera"
        );
    }

    // ==================== CSV ====================

    #[tokio::test]
    async fn test_csv_extraction() {
        let e = extractor("");
        let doc = e
            .extract(&raw("data/rows.csv", b"h1,h2\nv1,v2\n"))
            .await
            .unwrap();
        assert_eq!(doc.extraction_method, ExtractionMethod::CsvText);
        assert_eq!(doc.cleaned_text, "h1\th2\nv1\tv2");
    }
}
