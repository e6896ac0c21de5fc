use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::process::Command;
use tracing::debug;

use super::{ExtractionError, MediaType};
use crate::config::OcrConfig;

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize_image(
        &self,
        bytes: Bytes,
        media_type: MediaType,
    ) -> Result<String, ExtractionError>;

    /// Rasterizes the first pages of a PDF and recognizes each one.
    async fn recognize_pdf(&self, bytes: Bytes) -> Result<String, ExtractionError>;
}

/// Shells out to `tesseract` (and `pdftoppm` for PDFs). Inputs are written to
/// a private temp dir that is removed when the call returns.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    config: OcrConfig,
}

impl TesseractOcr {
    pub fn new(config: OcrConfig) -> Self {
        Self { config }
    }

    async fn run(&self, bin: &str, args: &[&str]) -> Result<Vec<u8>, ExtractionError> {
        let output = Command::new(bin)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.config.timeout, output)
            .await
            .map_err(|_| ExtractionError::Timeout(self.config.timeout.as_secs()))?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ExtractionError::ToolMissing(bin.to_string()),
                _ => ExtractionError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::Ocr(format!(
                "{bin} exited with {}: {}",
                output.status,
                stderr.lines().next().unwrap_or_default()
            )));
        }
        Ok(output.stdout)
    }

    async fn tesseract(&self, image: &Path) -> Result<String, ExtractionError> {
        let image = image.to_string_lossy().into_owned();
        let stdout = self
            .run(
                &self.config.tesseract_bin,
                &[&image, "stdout", "-l", &self.config.language],
            )
            .await?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize_image(
        &self,
        bytes: Bytes,
        media_type: MediaType,
    ) -> Result<String, ExtractionError> {
        let dir = tempfile::Builder::new().prefix("weaver-ocr-").tempdir()?;
        let path = dir.path().join(format!("upload.{}", media_type.extension()));
        tokio::fs::write(&path, &bytes).await?;
        self.tesseract(&path).await
    }

    async fn recognize_pdf(&self, bytes: Bytes) -> Result<String, ExtractionError> {
        let dir = tempfile::Builder::new().prefix("weaver-ocr-").tempdir()?;
        let pdf_path = dir.path().join("upload.pdf");
        tokio::fs::write(&pdf_path, &bytes).await?;

        let pdf_path = pdf_path.to_string_lossy().into_owned();
        let prefix = dir.path().join("page").to_string_lossy().into_owned();
        let dpi = self.config.dpi.to_string();
        let last_page = self.config.max_pages.max(1).to_string();
        self.run(
            &self.config.pdftoppm_bin,
            &[
                "-r",
                &dpi,
                "-f",
                "1",
                "-l",
                &last_page,
                "-png",
                &pdf_path,
                &prefix,
            ],
        )
        .await?;

        // pdftoppm zero-pads page numbers to the page count's width, so a
        // lexical sort is page order.
        let mut pages = Vec::new();
        let mut entries = tokio::fs::read_dir(dir.path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("page") && name.ends_with(".png") {
                pages.push(entry.path());
            }
        }
        pages.sort();
        debug!("Rasterized {} page(s) for OCR", pages.len());

        let mut text = Vec::with_capacity(pages.len());
        for page in &pages {
            text.push(self.tesseract(page).await?);
        }
        Ok(text.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let ocr = TesseractOcr::new(OcrConfig {
            tesseract_bin: "weaver-no-such-tesseract".into(),
            ..OcrConfig::default()
        });
        let err = ocr
            .recognize_image(Bytes::from_static(b"\x89PNG\r\n\x1a\n"), MediaType::Png)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::ToolMissing(bin) if bin == "weaver-no-such-tesseract"));
    }

    #[tokio::test]
    async fn test_missing_rasterizer_is_reported() {
        let ocr = TesseractOcr::new(OcrConfig {
            pdftoppm_bin: "weaver-no-such-pdftoppm".into(),
            ..OcrConfig::default()
        });
        let err = ocr
            .recognize_pdf(Bytes::from_static(b"%PDF-1.4\n%%EOF"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::ToolMissing(_)));
    }
}
