//! Payment QR rendering
//!
//! Renders an order-specific payment QR image by posting the static
//! merchant template plus the order total to an external renderer.
//! The image lands in {work_dir}/qr/{ref_id}.jpg via tmp + rename so
//! a crash mid-download never leaves a corrupt file behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum QrError {
    #[error("QR template not readable: {0}")]
    Template(#[source] std::io::Error),

    #[error("QR renderer returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("QR renderer request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to write QR image: {0}")]
    Io(#[from] std::io::Error),
}

/// Seam for order creation; production uses [`HttpQrRenderer`],
/// tests inject a stub that writes a placeholder file.
#[async_trait]
pub trait QrRenderer: Send + Sync {
    async fn render(&self, amount: i64, ref_id: &str) -> Result<PathBuf, QrError>;
}

/// HTTP implementation posting to the external render endpoint.
pub struct HttpQrRenderer {
    client: reqwest::Client,
    render_url: String,
    template_path: PathBuf,
    output_dir: PathBuf,
}

impl HttpQrRenderer {
    pub fn new(
        render_url: impl Into<String>,
        template_path: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            render_url: render_url.into(),
            template_path: template_path.into(),
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl QrRenderer for HttpQrRenderer {
    async fn render(&self, amount: i64, ref_id: &str) -> Result<PathBuf, QrError> {
        let template = tokio::fs::read(&self.template_path)
            .await
            .map_err(QrError::Template)?;

        debug!(ref_id = %ref_id, amount, "Requesting QR render");
        let part = reqwest::multipart::Part::bytes(template)
            .file_name("template.jpg")
            .mime_str("image/jpeg")?;
        let form = reqwest::multipart::Form::new()
            .part("template", part)
            .text("amount", amount.to_string());

        let resp = self
            .client
            .post(&self.render_url)
            .multipart(form)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(QrError::Status(resp.status()));
        }
        let bytes = resp.bytes().await?;

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let file_path = self.output_dir.join(format!("{ref_id}.jpg"));

        // Atomic write: tmp file + rename
        let tmp_path = self.output_dir.join(format!("{ref_id}.jpg.tmp"));
        tokio::fs::write(&tmp_path, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &file_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        info!(ref_id = %ref_id, size = bytes.len(), path = %file_path.display(), "QR image rendered");
        Ok(file_path)
    }
}

/// Remove an order's QR image once the order leaves the active set.
pub async fn remove_qr_file(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::debug!(path = %path.display(), error = %e, "QR file already gone");
    }
}
