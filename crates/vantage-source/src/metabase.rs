//! Metabase question export client.
//!
//! A question is exported page by page through its `limit`/`offset` template
//! tags. Pages are requested `workers` at a time; the export ends at the
//! first page shorter than the page size.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use vantage_core::SourceConfig;

use crate::{DataSource, Dataset, RawRecord};

const SESSION_HEADER: &str = "X-Metabase-Session";

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
}

#[derive(Clone, Debug)]
pub struct MetabaseSource {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    orders_question_id: u32,
    vendors_question_id: u32,
    orders_page_size: usize,
    vendors_page_size: usize,
    workers: usize,
}

/// Request body selecting one page of a question export.
fn page_request(limit: usize, offset: usize) -> serde_json::Value {
    json!({
        "parameters": [
            {
                "type": "number",
                "target": ["variable", ["template-tag", "limit"]],
                "value": limit,
            },
            {
                "type": "number",
                "target": ["variable", ["template-tag", "offset"]],
                "value": offset,
            }
        ]
    })
}

impl MetabaseSource {
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            orders_question_id: config.orders_question_id,
            vendors_question_id: config.vendors_question_id,
            orders_page_size: config.orders_page_size.max(1),
            vendors_page_size: config.vendors_page_size.max(1),
            workers: config.workers.max(1),
        })
    }

    fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn login(&self) -> Result<String> {
        let response = self
            .client
            .post(self.build_url("/api/session"))
            .json(&json!({ "username": self.username, "password": self.password }))
            .send()
            .await
            .context("Failed to send session request")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow::anyhow!(
                "Source login failed with status {}: {}",
                status,
                error_text
            ));
        }

        let session: SessionResponse = response
            .json()
            .await
            .context("Failed to parse session response")?;

        Ok(session.id)
    }

    async fn fetch_page(
        &self,
        token: &str,
        question_id: u32,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<RawRecord>> {
        let url = self.build_url(&format!("/api/card/{}/query/json", question_id));
        let response = self
            .client
            .post(&url)
            .header(SESSION_HEADER, token)
            .json(&page_request(page_size, page * page_size))
            .send()
            .await
            .with_context(|| format!("Failed to request page {} of question {}", page, question_id))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(anyhow::anyhow!("Source session rejected for question {}", question_id));
        }
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow::anyhow!(
                "Export of question {} page {} failed with status {}: {}",
                question_id,
                page,
                status,
                error_text
            ));
        }

        let rows: Vec<RawRecord> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse page {} of question {}", page, question_id))?;

        Ok(rows)
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_question(&self, question_id: u32, page_size: usize) -> Result<Vec<RawRecord>> {
        let token = self.login().await?;
        let mut rows = Vec::new();
        let mut next_page = 0usize;

        loop {
            let wave = next_page..next_page + self.workers;
            let pages = futures::future::try_join_all(
                wave.map(|page| self.fetch_page(&token, question_id, page, page_size)),
            )
            .await?;
            next_page += self.workers;

            let mut exhausted = false;
            for page in pages {
                let short = page.len() < page_size;
                rows.extend(page);
                if short {
                    exhausted = true;
                    break;
                }
            }

            tracing::debug!(question_id, rows = rows.len(), "Fetched export pages");

            if exhausted {
                break;
            }
        }

        tracing::info!(question_id, rows = rows.len(), "Question export fetched");
        Ok(rows)
    }
}

#[async_trait]
impl DataSource for MetabaseSource {
    fn name(&self) -> &'static str {
        "metabase"
    }

    async fn fetch(&self, dataset: Dataset) -> Result<Vec<RawRecord>> {
        match dataset {
            Dataset::Orders => {
                self.fetch_question(self.orders_question_id, self.orders_page_size)
                    .await
            }
            Dataset::Vendors => {
                self.fetch_question(self.vendors_question_id, self.vendors_page_size)
                    .await
            }
        }
    }
}
