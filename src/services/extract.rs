use std::sync::Arc;

use async_trait::async_trait;

use crate::jobs::error::{PermanentReason, ProcessingError};
use crate::models::classification::{Content, DocumentFormat};
use crate::services::ocr::OcrClient;

const PDF_MAGIC: &[u8] = b"%PDF-";
const UTF8_BOM: &str = "\u{feff}";

/// Turns raw document bytes into text for classification.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, document: &[u8]) -> Result<Content, ProcessingError>;
}

/// Work out what kind of document `bytes` holds, if any we can handle.
pub fn sniff_format(bytes: &[u8]) -> Option<DocumentFormat> {
    if bytes.starts_with(PDF_MAGIC) {
        return Some(DocumentFormat::Pdf);
    }
    if let Ok(format) = image::guess_format(bytes) {
        return Some(DocumentFormat::Image(format));
    }
    match std::str::from_utf8(bytes) {
        Ok(text) if !text.contains('\0') => Some(DocumentFormat::Text),
        _ => None,
    }
}

/// Extracts plain text directly and hands PDFs and images to OCR when available.
pub struct DocumentExtractor {
    ocr: Option<Arc<OcrClient>>,
}

impl DocumentExtractor {
    pub fn new(ocr: Option<Arc<OcrClient>>) -> Self {
        Self { ocr }
    }

    /// Extractor that only understands text documents.
    pub fn text_only() -> Self {
        Self { ocr: None }
    }
}

#[async_trait]
impl Extractor for DocumentExtractor {
    async fn extract(&self, document: &[u8]) -> Result<Content, ProcessingError> {
        if document.is_empty() {
            return Err(ProcessingError::permanent(
                PermanentReason::MalformedDocument,
                "document is empty",
            ));
        }

        let format = sniff_format(document).ok_or_else(|| {
            ProcessingError::permanent(
                PermanentReason::UnsupportedDocument,
                "unrecognized binary format",
            )
        })?;

        let text = match format {
            DocumentFormat::Text => {
                // sniff_format already validated the encoding.
                let text = String::from_utf8_lossy(document);
                text.trim_start_matches(UTF8_BOM).to_string()
            }
            DocumentFormat::Pdf | DocumentFormat::Image(_) => {
                let Some(ocr) = &self.ocr else {
                    return Err(ProcessingError::permanent(
                        PermanentReason::UnsupportedDocument,
                        format!("{format} documents require OCR, which is not configured"),
                    ));
                };
                ocr.extract_text(document, format).await.map_err(|e| {
                    if e.is_transient() {
                        ProcessingError::transient(format!("OCR: {e}"))
                    } else {
                        ProcessingError::permanent(
                            PermanentReason::UnsupportedDocument,
                            format!("OCR rejected document: {e}"),
                        )
                    }
                })?
            }
        };

        Ok(Content { format, text })
    }
}
