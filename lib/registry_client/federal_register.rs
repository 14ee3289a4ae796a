use log::debug;
use serde::{Deserialize, Serialize};

use super::{RegistryClientError, RegistryRateLimiter};

/// Client for the Federal Register v1 API. No API key required.
pub struct FederalRegisterClient {
    client: reqwest::Client,
    base_url: String,
    limiter: RegistryRateLimiter,
}

/// One document as returned by the `/documents` search endpoint.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct FederalRegisterDocument {
    pub document_number: String,
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub doc_type: Option<String>,
    pub publication_date: Option<String>,
    pub html_url: Option<String>,
    #[serde(default)]
    pub agency_names: Vec<String>,
}

#[derive(Deserialize, Debug)]
struct DocumentsEnvelope {
    #[serde(default)]
    count: i64,
    total_pages: Option<i64>,
    #[serde(default)]
    results: Vec<FederalRegisterDocument>,
}

/// One page of document results.
#[derive(Debug, Clone)]
pub struct DocumentPage {
    pub documents: Vec<FederalRegisterDocument>,
    pub total: i64,
    pub total_pages: i64,
}

impl FederalRegisterClient {
    pub fn new(base_url: String, limiter: RegistryRateLimiter) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            limiter,
        }
    }

    /// Searches documents by term, page-paginated (1-indexed upstream).
    pub async fn fetch_documents(
        &self,
        term: &str,
        page: u32,
        per_page: u32,
    ) -> Result<DocumentPage, RegistryClientError> {
        self.limiter.until_ready().await;

        let url = format!(
            "{}/documents.json?conditions%5Bterm%5D={}&page={}&per_page={}",
            self.base_url,
            urlencode(term),
            page.max(1),
            per_page.clamp(1, 100)
        );
        debug!("fetching Federal Register documents page {page}");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(RegistryClientError::UnexpectedStatus {
                resource: format!("document search page {page}"),
                status: response.status().as_u16(),
            });
        }

        let envelope = response.json::<DocumentsEnvelope>().await?;
        Ok(DocumentPage {
            total: envelope.count,
            total_pages: envelope.total_pages.unwrap_or(1),
            documents: envelope.results,
        })
    }

    /// Fetches one document by its document number. 404 means not published.
    pub async fn fetch_document(
        &self,
        document_number: &str,
    ) -> Result<Option<FederalRegisterDocument>, RegistryClientError> {
        self.limiter.until_ready().await;

        let url = format!(
            "{}/documents/{}.json",
            self.base_url,
            urlencode(document_number)
        );

        let response = self.client.get(&url).send().await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(RegistryClientError::UnexpectedStatus {
                resource: format!("document {document_number}"),
                status: response.status().as_u16(),
            });
        }

        let document = response.json::<FederalRegisterDocument>().await?;
        Ok(Some(document))
    }
}

/// Percent-encodes the characters that actually occur in search terms and
/// document numbers. Enough for this API's query strings.
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' => out.push(ch),
            ' ' => out.push('+'),
            other => {
                let mut buf = [0u8; 4];
                for byte in other.encode_utf8(&mut buf).as_bytes() {
                    out.push_str(&format!("%{byte:02X}"));
                }
            }
        }
    }
    out
}
