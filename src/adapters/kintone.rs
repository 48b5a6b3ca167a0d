use crate::domain::model::{DatasetQuery, RemoteRecord};
use crate::domain::ports::RecordSource;
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

pub const DEFAULT_PAGE_SIZE: usize = 500;
const TOKEN_HEADER: &str = "X-Cybozu-API-Token";

#[derive(Debug, Deserialize)]
struct RecordsPage {
    #[serde(default)]
    records: Vec<RemoteRecord>,
}

/// `$id` 遞增的游標查詢；不使用 offset，避開 10000 筆上限
pub fn cursor_query(base_query: &str, last_id: u64, page_size: usize) -> String {
    let base = base_query.trim();
    if base.is_empty() {
        format!("$id > {} order by $id asc limit {}", last_id, page_size)
    } else {
        format!(
            "({}) and $id > {} order by $id asc limit {}",
            base, last_id, page_size
        )
    }
}

pub struct KintoneClient {
    client: Client,
    base_url: String,
    page_size: usize,
}

impl KintoneClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_page_size(base_url, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(base_url: impl Into<String>, page_size: usize) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            page_size: page_size.max(1),
        }
    }

    fn records_url(&self) -> String {
        format!("{}/k/v1/records.json", self.base_url)
    }

    async fn fetch_page(&self, query: &DatasetQuery, last_id: u64) -> Result<Vec<RemoteRecord>> {
        let q = cursor_query(&query.base_query, last_id, self.page_size);
        tracing::debug!("GET records app={} query={}", query.app_id, q);

        let response = self
            .client
            .get(self.records_url())
            .header(TOKEN_HEADER, &query.api_token)
            .query(&[("app", query.app_id.to_string()), ("query", q)])
            .send()
            .await?;

        let status = response.status();
        tracing::debug!("Record API response status: {}", status);
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EtlError::FetchError {
                status: status.as_u16(),
                body,
            });
        }

        let page: RecordsPage = response.json().await?;
        Ok(page.records)
    }
}

#[async_trait]
impl RecordSource for KintoneClient {
    async fn fetch_all(&self, query: &DatasetQuery) -> Result<Vec<RemoteRecord>> {
        let mut records = Vec::new();
        let mut last_id = 0u64;

        loop {
            let page = self.fetch_page(query, last_id).await?;
            if page.is_empty() {
                break;
            }

            let mut page_max = 0u64;
            for record in &page {
                let id = record.identity().ok_or_else(|| EtlError::FetchError {
                    status: 200,
                    body: format!("record in app {} has no usable $id", query.app_id),
                })?;
                page_max = page_max.max(id);
            }
            // 游標沒有前進就停止，避免無限迴圈
            if page_max <= last_id {
                return Err(EtlError::FetchError {
                    status: 200,
                    body: format!(
                        "cursor did not advance past $id {} in app {}",
                        last_id, query.app_id
                    ),
                });
            }

            let page_len = page.len();
            records.extend(page);
            last_id = page_max;

            if page_len < self.page_size {
                break;
            }
        }

        tracing::info!("📥 Fetched {} records from app {}", records.len(), query.app_id);
        Ok(records)
    }
}
