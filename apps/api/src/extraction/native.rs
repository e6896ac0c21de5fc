use async_trait::async_trait;
use bytes::Bytes;

use super::ExtractionError;

/// Reads a PDF's embedded text layer.
#[async_trait]
pub trait PdfTextReader: Send + Sync {
    async fn read_text(&self, bytes: Bytes) -> Result<String, ExtractionError>;
}

/// `pdf-extract` on the blocking pool. A panic inside the parser surfaces as
/// an error rather than taking the worker down.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfExtractReader;

#[async_trait]
impl PdfTextReader for PdfExtractReader {
    async fn read_text(&self, bytes: Bytes) -> Result<String, ExtractionError> {
        tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| ExtractionError::Pdf(format!("parser task failed: {e}")))?
            .map_err(|e| ExtractionError::Pdf(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_garbage_pdf_is_an_error_not_a_panic() {
        let result = PdfExtractReader
            .read_text(Bytes::from_static(b"%PDF-1.4\nthis is not a real pdf"))
            .await;
        assert!(matches!(result, Err(ExtractionError::Pdf(_))));
    }
}
