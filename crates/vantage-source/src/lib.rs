//! External analytics source
//!
//! Fetches the raw order and vendor exports the refresh pipeline cleans and
//! loads. Rows arrive loosely typed; normalization happens in the pipeline.

pub mod memory;
pub mod metabase;

use std::fmt;

use async_trait::async_trait;

pub use memory::InMemorySource;
pub use metabase::MetabaseSource;

/// One exported row, keyed by column name.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// The two exports a refresh pulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dataset {
    Orders,
    Vendors,
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dataset::Orders => write!(f, "orders"),
            Dataset::Vendors => write!(f, "vendors"),
        }
    }
}

#[async_trait]
pub trait DataSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fetch every row of `dataset`.
    async fn fetch(&self, dataset: Dataset) -> anyhow::Result<Vec<RawRecord>>;
}
