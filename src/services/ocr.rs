use std::time::Duration;

use reqwest::{multipart, Client, StatusCode};
use serde::Deserialize;

use crate::models::classification::DocumentFormat;

const API_BASE_URL: &str = "https://api.cloudflare.com";

/// Client for Cloudflare Workers AI document-to-markdown conversion, used to
/// pull text out of PDFs and scanned images.
pub struct OcrClient {
    http: Client,
    base_url: String,
    account_id: String,
    api_token: String,
}

#[derive(Deserialize)]
struct ToMarkdownResponse {
    result: Vec<ToMarkdownResult>,
}

#[derive(Deserialize)]
struct ToMarkdownResult {
    #[serde(default)]
    data: String,
}

impl OcrClient {
    pub fn new(account_id: &str, api_token: &str) -> Result<Self, OcrError> {
        Self::with_base_url(API_BASE_URL, account_id, api_token)
    }

    /// Client talking to a conversion service at `base_url` instead of Cloudflare.
    pub fn with_base_url(
        base_url: &str,
        account_id: &str,
        api_token: &str,
    ) -> Result<Self, OcrError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(OcrError::Http)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            account_id: account_id.to_string(),
            api_token: api_token.to_string(),
        })
    }

    /// Send a document and return the text recognized in it.
    pub async fn extract_text(
        &self,
        document: &[u8],
        format: DocumentFormat,
    ) -> Result<String, OcrError> {
        let url = format!(
            "{}/client/v4/accounts/{}/ai/tomarkdown",
            self.base_url, self.account_id
        );

        let (file_name, mime) = upload_name(format);
        let part = multipart::Part::bytes(document.to_vec())
            .file_name(file_name)
            .mime_str(mime)
            .map_err(OcrError::Http)?;
        let form = multipart::Form::new().part("files", part);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_token)
            .multipart(form)
            .send()
            .await
            .map_err(OcrError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::Status { status, body });
        }

        let parsed: ToMarkdownResponse = response.json().await.map_err(OcrError::Http)?;
        let text = parsed
            .result
            .into_iter()
            .map(|r| r.data)
            .collect::<Vec<_>>()
            .join("\n");
        Ok(text)
    }
}

/// File name and MIME type the conversion service routes `format` by.
fn upload_name(format: DocumentFormat) -> (String, &'static str) {
    match format {
        DocumentFormat::Pdf => ("document.pdf".to_string(), "application/pdf"),
        DocumentFormat::Text => ("document.txt".to_string(), "text/plain"),
        DocumentFormat::Image(image) => {
            let extension = image.extensions_str().first().copied().unwrap_or("bin");
            (format!("document.{extension}"), image.to_mime_type())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OCR service returned {status}: {body}")]
    Status { status: StatusCode, body: String },
}

impl OcrError {
    /// Timeouts, connection failures, throttling and server errors may clear up.
    /// A response body of the wrong shape will not.
    pub fn is_transient(&self) -> bool {
        match self {
            OcrError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            OcrError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || status.is_server_error()
            }
        }
    }
}
