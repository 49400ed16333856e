//! Page-numbered listing.
//!
//! List endpoints take `page` (1-based) and `pageSize` query parameters.
//! A page shorter than the page size is the last one.

use serde::de::DeserializeOwned;
use tracing::debug;

use super::client::ApiClient;
use super::error::ApiError;
use super::request::with_query;

/// Records requested per page.
pub const PAGE_SIZE: usize = 1000;

impl ApiClient {
    /// Fetch one page of `endpoint`. Existing query parameters are kept.
    pub async fn read_page<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        page: u32,
    ) -> Result<Vec<T>, ApiError> {
        let paged = with_query(
            endpoint,
            &[("pageSize", PAGE_SIZE.to_string()), ("page", page.to_string())],
        );
        self.read(&paged).await
    }

    /// Fetch every page of `endpoint`, in order.
    pub async fn read_all_pages<T: DeserializeOwned>(&self, endpoint: &str) -> Result<Vec<T>, ApiError> {
        let mut records = Vec::new();
        let mut page = 1;
        loop {
            let batch: Vec<T> = self.read_page(endpoint, page).await?;
            let count = batch.len();
            records.extend(batch);
            debug!(endpoint, page, count, total = records.len(), "Fetched page");
            if count < PAGE_SIZE {
                return Ok(records);
            }
            page += 1;
        }
    }

    /// Like [`read_all_pages`](Self::read_all_pages), appending to `records`.
    /// Nothing is appended if any page fails.
    pub async fn read_all_pages_into<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        records: &mut Vec<T>,
    ) -> Result<(), ApiError> {
        let mut fetched = self.read_all_pages(endpoint).await?;
        records.append(&mut fetched);
        Ok(())
    }
}
