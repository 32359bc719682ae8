use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{DataSource, Dataset, RawRecord};

/// Source serving fixed exports. Used for local runs and tests.
#[derive(Default)]
pub struct InMemorySource {
    orders: RwLock<Vec<RawRecord>>,
    vendors: RwLock<Vec<RawRecord>>,
    failing: RwLock<Option<Dataset>>,
    fetches: AtomicUsize,
}

impl InMemorySource {
    pub fn new(orders: Vec<RawRecord>, vendors: Vec<RawRecord>) -> Self {
        Self {
            orders: RwLock::new(orders),
            vendors: RwLock::new(vendors),
            ..Default::default()
        }
    }

    pub async fn set_rows(&self, dataset: Dataset, rows: Vec<RawRecord>) {
        match dataset {
            Dataset::Orders => *self.orders.write().await = rows,
            Dataset::Vendors => *self.vendors.write().await = rows,
        }
    }

    /// Make fetches of `dataset` fail, or clear the failure with `None`.
    pub async fn fail_on(&self, dataset: Option<Dataset>) {
        *self.failing.write().await = dataset;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for InMemorySource {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn fetch(&self, dataset: Dataset) -> Result<Vec<RawRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if *self.failing.read().await == Some(dataset) {
            return Err(anyhow::anyhow!("{} export unavailable", dataset));
        }
        let rows = match dataset {
            Dataset::Orders => self.orders.read().await.clone(),
            Dataset::Vendors => self.vendors.read().await.clone(),
        };
        Ok(rows)
    }
}
