use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};

use vantage_core::models::{FilterSpec, Order, RowCounts, Vendor, ORDER_COLUMNS, VENDOR_COLUMNS};

/// Storage for the order and vendor tables behind the refresh pipeline and
/// the filtered read path.
#[async_trait]
pub trait DatasetRepositoryTrait: Send + Sync {
    /// Replace the full contents of both tables. Either both tables switch to
    /// the new rows or neither changes.
    async fn replace_all(&self, orders: &[Order], vendors: &[Vendor]) -> Result<RowCounts>;

    /// Orders matching every predicate of `spec`.
    async fn query_orders(&self, spec: &FilterSpec) -> Result<Vec<Order>>;

    /// Vendors matching the city, business-line and vendor-code predicates.
    async fn query_vendors(&self, spec: &FilterSpec) -> Result<Vec<Vendor>>;

    async fn counts(&self) -> Result<RowCounts>;

    async fn ping(&self) -> Result<()>;
}

/// Rows per INSERT statement. Postgres caps a statement at 65535 bind
/// parameters, so chunk size times column count must stay below that.
#[derive(Debug, Clone, Copy)]
pub struct LoadChunking {
    pub orders: usize,
    pub vendors: usize,
}

impl Default for LoadChunking {
    fn default() -> Self {
        Self {
            orders: 5000,
            vendors: 4000,
        }
    }
}

#[derive(Clone)]
pub struct DatasetRepository {
    pool: PgPool,
    chunking: LoadChunking,
}

impl DatasetRepository {
    pub fn new(pool: PgPool, chunking: LoadChunking) -> Self {
        Self { pool, chunking }
    }

    async fn execute_all(tx: &mut Transaction<'_, Postgres>, statements: &[&str]) -> Result<()> {
        for statement in statements {
            sqlx::query(statement)
                .execute(&mut **tx)
                .await
                .with_context(|| format!("Failed to execute: {}", statement))?;
        }
        Ok(())
    }

    async fn insert_orders(
        tx: &mut Transaction<'_, Postgres>,
        orders: &[Order],
        chunk_size: usize,
    ) -> Result<i64> {
        let mut inserted = 0i64;
        for chunk in orders.chunks(chunk_size.max(1)) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO orders_next ({}) ",
                ORDER_COLUMNS.join(", ")
            ));
            builder.push_values(chunk, |mut row, order| {
                row.push_bind(&order.order_id)
                    .push_bind(&order.vendor_code)
                    .push_bind(order.customer_latitude)
                    .push_bind(order.customer_longitude)
                    .push_bind(&order.business_line)
                    .push_bind(&order.marketing_area)
                    .push_bind(order.city_id)
                    .push_bind(&order.city_name)
                    .push_bind(order.organic)
                    .push_bind(order.created_at)
                    .push_bind(&order.user_id);
            });
            let result = builder
                .build()
                .execute(&mut **tx)
                .await
                .context("Failed to insert orders chunk")?;
            inserted += result.rows_affected() as i64;
        }
        Ok(inserted)
    }

    async fn insert_vendors(
        tx: &mut Transaction<'_, Postgres>,
        vendors: &[Vendor],
        chunk_size: usize,
    ) -> Result<i64> {
        let mut inserted = 0i64;
        for chunk in vendors.chunks(chunk_size.max(1)) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO vendors_next ({}) ",
                VENDOR_COLUMNS.join(", ")
            ));
            builder.push_values(chunk, |mut row, vendor| {
                row.push_bind(&vendor.vendor_code)
                    .push_bind(&vendor.vendor_name)
                    .push_bind(vendor.latitude)
                    .push_bind(vendor.longitude)
                    .push_bind(vendor.radius)
                    .push_bind(vendor.original_radius)
                    .push_bind(vendor.status_id)
                    .push_bind(vendor.visible)
                    .push_bind(vendor.open)
                    .push_bind(&vendor.grade)
                    .push_bind(&vendor.business_line)
                    .push_bind(vendor.city_id)
                    .push_bind(&vendor.city_name);
            });
            let result = builder
                .build()
                .execute(&mut **tx)
                .await
                .context("Failed to insert vendors chunk")?;
            inserted += result.rows_affected() as i64;
        }
        Ok(inserted)
    }
}

/// Append the predicates shared by the order and vendor queries.
fn push_common_filters(builder: &mut QueryBuilder<'_, Postgres>, spec: &FilterSpec) {
    if let Some(city) = &spec.city {
        builder.push(" AND city_name = ").push_bind(city.clone());
    }
    if let Some(lines) = &spec.business_lines {
        builder
            .push(" AND business_line = ANY(")
            .push_bind(lines.clone())
            .push(")");
    }
    if let Some(codes) = &spec.vendor_codes {
        builder
            .push(" AND vendor_code = ANY(")
            .push_bind(codes.clone())
            .push(")");
    }
}

#[async_trait]
impl DatasetRepositoryTrait for DatasetRepository {
    #[tracing::instrument(skip(self, orders, vendors), fields(orders = orders.len(), vendors = vendors.len()))]
    async fn replace_all(&self, orders: &[Order], vendors: &[Vendor]) -> Result<RowCounts> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction for dataset reload")?;

        Self::execute_all(
            &mut tx,
            &[
                "DROP TABLE IF EXISTS orders_next",
                "DROP TABLE IF EXISTS vendors_next",
                "CREATE TABLE orders_next (LIKE orders INCLUDING ALL)",
                "CREATE TABLE vendors_next (LIKE vendors INCLUDING ALL)",
            ],
        )
        .await?;

        let order_rows = Self::insert_orders(&mut tx, orders, self.chunking.orders).await?;
        tracing::debug!(rows = order_rows, "Orders staged");

        let vendor_rows = Self::insert_vendors(&mut tx, vendors, self.chunking.vendors).await?;
        tracing::debug!(rows = vendor_rows, "Vendors staged");

        Self::execute_all(
            &mut tx,
            &[
                "UPDATE vendors_next SET location = ST_SetSRID(ST_MakePoint(longitude, latitude), 4326)",
                "ALTER TABLE orders RENAME TO orders_old",
                "ALTER TABLE orders_next RENAME TO orders",
                "DROP TABLE orders_old",
                "ALTER TABLE vendors RENAME TO vendors_old",
                "ALTER TABLE vendors_next RENAME TO vendors",
                "DROP TABLE vendors_old",
            ],
        )
        .await?;

        tx.commit()
            .await
            .context("Failed to commit dataset reload")?;

        tracing::info!(
            orders = order_rows,
            vendors = vendor_rows,
            "Dataset tables swapped in"
        );

        Ok(RowCounts {
            orders: order_rows,
            vendors: vendor_rows,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn query_orders(&self, spec: &FilterSpec) -> Result<Vec<Order>> {
        let spec = spec.normalized();
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {} FROM orders WHERE TRUE",
            ORDER_COLUMNS.join(", ")
        ));
        push_common_filters(&mut builder, &spec);
        if let Some(from) = spec.created_from() {
            builder.push(" AND created_at >= ").push_bind(from);
        }
        if let Some(before) = spec.created_before() {
            builder.push(" AND created_at < ").push_bind(before);
        }
        builder.push(" ORDER BY created_at, order_id");

        let orders = builder
            .build_query_as::<Order>()
            .fetch_all(&self.pool)
            .await
            .context("Failed to query filtered orders")?;

        Ok(orders)
    }

    #[tracing::instrument(skip(self))]
    async fn query_vendors(&self, spec: &FilterSpec) -> Result<Vec<Vendor>> {
        let spec = spec.normalized();
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {} FROM vendors WHERE TRUE",
            VENDOR_COLUMNS.join(", ")
        ));
        push_common_filters(&mut builder, &spec);
        builder.push(" ORDER BY vendor_code");

        let vendors = builder
            .build_query_as::<Vendor>()
            .fetch_all(&self.pool)
            .await
            .context("Failed to query filtered vendors")?;

        Ok(vendors)
    }

    #[tracing::instrument(skip(self))]
    async fn counts(&self) -> Result<RowCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM orders)::bigint AS orders,
                (SELECT COUNT(*) FROM vendors)::bigint AS vendors
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to count dataset rows")?;

        Ok(RowCounts {
            orders: row.get("orders"),
            vendors: row.get("vendors"),
        })
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database ping failed")?;
        Ok(())
    }
}
