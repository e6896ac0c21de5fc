//! Text Extractor: normalizes uploaded bytes into one UTF-8 text blob.
//!
//! PDFs are read through their text layer first; when that yields nothing
//! usable the pages are rasterized and sent through OCR. Images go straight
//! to OCR. An extraction that ends with no readable text is an explicit
//! `EmptyDocument`, never an empty string.

pub mod native;
pub mod ocr;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::OcrConfig;
use crate::errors::ErrorKind;
pub use native::{PdfExtractReader, PdfTextReader};
pub use ocr::{OcrEngine, TesseractOcr};

/// A text layer with fewer alphanumeric characters than this is treated as
/// absent (scanned PDFs often carry only page numbers).
const MIN_NATIVE_ALNUM_CHARS: usize = 16;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("document contains no readable text")]
    EmptyDocument,

    #[error("unsupported document type")]
    UnsupportedFormat,

    #[error("PDF text layer could not be read: {0}")]
    Pdf(String),

    #[error("OCR tool '{0}' is not installed")]
    ToolMissing(String),

    #[error("OCR processing failed: {0}")]
    Ocr(String),

    #[error("OCR timed out after {0} seconds")]
    Timeout(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractionError {
    /// Every extraction failure reaches the user as "no readable text"; the
    /// cause is logged, not shown.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::EmptyDocument
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Pdf,
    Png,
    Jpeg,
    PlainText,
}

impl MediaType {
    /// Magic bytes win over the declared type; text is accepted when the
    /// bytes are valid UTF-8.
    pub fn detect(bytes: &[u8], declared: Option<&str>) -> Result<Self, ExtractionError> {
        if bytes.starts_with(b"%PDF-") {
            return Ok(MediaType::Pdf);
        }
        if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            return Ok(MediaType::Png);
        }
        if bytes.starts_with(b"\xff\xd8\xff") {
            return Ok(MediaType::Jpeg);
        }
        if std::str::from_utf8(bytes).is_ok() && !bytes.contains(&0) {
            if let Some(declared) = declared {
                if !declared.starts_with("text/") && declared != "application/octet-stream" {
                    debug!("Declared type {declared} overridden by content sniffing: text");
                }
            }
            return Ok(MediaType::PlainText);
        }
        warn!("Rejecting upload with unrecognised content (declared {:?})", declared);
        Err(ExtractionError::UnsupportedFormat)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            MediaType::Pdf => "pdf",
            MediaType::Png => "png",
            MediaType::Jpeg => "jpg",
            MediaType::PlainText => "txt",
        }
    }
}

/// Raw upload. Owned by the request that produced it and dropped after extraction.
#[derive(Debug, Clone)]
pub struct Document {
    pub bytes: Bytes,
    pub media_type: MediaType,
}

impl Document {
    pub fn from_upload(bytes: Bytes, declared: Option<&str>) -> Result<Self, ExtractionError> {
        let media_type = MediaType::detect(&bytes, declared)?;
        Ok(Self { bytes, media_type })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Native,
    Ocr,
}

/// Non-empty extracted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    pub provenance: Provenance,
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, document: &Document) -> Result<ExtractedText, ExtractionError>;
}

/// Text-layer reader with OCR fallback.
#[derive(Clone)]
pub struct DocumentExtractor {
    pdf: Arc<dyn PdfTextReader>,
    ocr: Arc<dyn OcrEngine>,
}

impl DocumentExtractor {
    pub fn new(pdf: Arc<dyn PdfTextReader>, ocr: Arc<dyn OcrEngine>) -> Self {
        Self { pdf, ocr }
    }

    pub fn from_config(config: &OcrConfig) -> Self {
        Self::new(
            Arc::new(PdfExtractReader),
            Arc::new(TesseractOcr::new(config.clone())),
        )
    }

    async fn extract_pdf(&self, bytes: Bytes) -> Result<ExtractedText, ExtractionError> {
        let native = match self.pdf.read_text(bytes.clone()).await {
            Ok(text) => text,
            Err(e) => {
                warn!("PDF text layer unreadable, falling back to OCR: {e}");
                String::new()
            }
        };
        if alnum_count(&native) >= MIN_NATIVE_ALNUM_CHARS {
            return finish(native, Provenance::Native);
        }

        info!("PDF has no usable text layer; running OCR");
        match self.ocr.recognize_pdf(bytes).await {
            Ok(text) => finish(text, Provenance::Ocr),
            // A thin text layer still beats nothing.
            Err(e) if alnum_count(&native) > 0 => {
                warn!("OCR failed, keeping sparse text layer: {e}");
                finish(native, Provenance::Native)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl TextExtractor for DocumentExtractor {
    async fn extract(&self, document: &Document) -> Result<ExtractedText, ExtractionError> {
        let result = match document.media_type {
            MediaType::PlainText => {
                let text = String::from_utf8_lossy(&document.bytes);
                finish(text.trim_start_matches('\u{FEFF}').to_string(), Provenance::Native)
            }
            MediaType::Pdf => self.extract_pdf(document.bytes.clone()).await,
            media_type => {
                let text = self
                    .ocr
                    .recognize_image(document.bytes.clone(), media_type)
                    .await?;
                finish(text, Provenance::Ocr)
            }
        };

        match &result {
            Ok(extracted) => debug!(
                "Extracted {} chars from {:?} ({:?})",
                extracted.text.chars().count(),
                document.media_type,
                extracted.provenance
            ),
            Err(e) => warn!("Extraction failed for {:?}: {e}", document.media_type),
        }
        result
    }
}

fn alnum_count(text: &str) -> usize {
    text.chars().filter(|c| c.is_alphanumeric()).count()
}

fn finish(text: String, provenance: Provenance) -> Result<ExtractedText, ExtractionError> {
    let text = text.trim();
    if alnum_count(text) == 0 {
        return Err(ExtractionError::EmptyDocument);
    }
    Ok(ExtractedText {
        text: text.to_string(),
        provenance,
    })
}
