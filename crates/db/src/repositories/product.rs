use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use cotizador_core::domain::product::Product;
use cotizador_core::domain::OwnerId;

use super::{CatalogSyncRecord, ProductRepository, RepositoryError};
use crate::DbPool;

pub struct SqlProductRepository {
    pool: DbPool,
}

impl SqlProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProductRepository for SqlProductRepository {
    async fn find_by_sku(
        &self,
        owner_id: &OwnerId,
        sku: &str,
    ) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                sku,
                name,
                description,
                price,
                base_price,
                image_url,
                inventory,
                category,
                iva_exempt
             FROM product
             WHERE owner_id = ? AND sku = ?",
        )
        .bind(&owner_id.0)
        .bind(sku)
        .fetch_optional(&self.pool)
        .await?;

        row.map(product_from_row).transpose()
    }

    async fn list_for_owner(&self, owner_id: &OwnerId) -> Result<Vec<Product>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                sku,
                name,
                description,
                price,
                base_price,
                image_url,
                inventory,
                category,
                iva_exempt
             FROM product
             WHERE owner_id = ?
             ORDER BY name ASC",
        )
        .bind(&owner_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(product_from_row).collect()
    }

    async fn upsert_catalog(
        &self,
        owner_id: &OwnerId,
        products: &[Product],
        synced_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        for product in products {
            sqlx::query(
                "INSERT INTO product (
                    owner_id,
                    sku,
                    name,
                    description,
                    price,
                    base_price,
                    image_url,
                    inventory,
                    category,
                    iva_exempt,
                    synced_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(owner_id, sku) DO UPDATE SET
                    name = excluded.name,
                    description = excluded.description,
                    price = excluded.price,
                    base_price = excluded.base_price,
                    image_url = excluded.image_url,
                    inventory = excluded.inventory,
                    category = excluded.category,
                    iva_exempt = excluded.iva_exempt,
                    synced_at = excluded.synced_at",
            )
            .bind(&owner_id.0)
            .bind(&product.sku)
            .bind(&product.name)
            .bind(&product.description)
            .bind(product.price.to_string())
            .bind(product.base_price.to_string())
            .bind(&product.image_url)
            .bind(product.inventory)
            .bind(&product.category)
            .bind(i64::from(product.iva_exempt))
            .bind(synced_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT INTO catalog_sync (owner_id, last_sync_at, product_count)
             VALUES (?, ?, ?)
             ON CONFLICT(owner_id) DO UPDATE SET
                last_sync_at = excluded.last_sync_at,
                product_count = excluded.product_count",
        )
        .bind(&owner_id.0)
        .bind(synced_at.to_rfc3339())
        .bind(products.len() as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn last_sync(
        &self,
        owner_id: &OwnerId,
    ) -> Result<Option<CatalogSyncRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT owner_id, last_sync_at, product_count FROM catalog_sync WHERE owner_id = ?",
        )
        .bind(&owner_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let raw = row.try_get::<String, _>("last_sync_at")?;
            let last_sync_at = DateTime::parse_from_rfc3339(&raw)
                .map(|timestamp| timestamp.with_timezone(&Utc))
                .map_err(|error| {
                    RepositoryError::Decode(format!(
                        "invalid timestamp in `last_sync_at`: `{raw}` ({error})"
                    ))
                })?;

            Ok(CatalogSyncRecord {
                owner_id: OwnerId(row.try_get("owner_id")?),
                last_sync_at,
                product_count: row.try_get("product_count")?,
            })
        })
        .transpose()
    }
}

fn product_from_row(row: SqliteRow) -> Result<Product, RepositoryError> {
    Ok(Product {
        sku: row.try_get("sku")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        price: parse_decimal("price", &row.try_get::<String, _>("price")?)?,
        base_price: parse_decimal("base_price", &row.try_get::<String, _>("base_price")?)?,
        image_url: row.try_get("image_url")?,
        inventory: row.try_get("inventory")?,
        category: row.try_get("category")?,
        iva_exempt: row.try_get::<i64, _>("iva_exempt")? != 0,
    })
}

fn parse_decimal(column: &str, value: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(value).map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;

    use cotizador_core::domain::product::Product;
    use cotizador_core::domain::OwnerId;

    use super::SqlProductRepository;
    use crate::migrations;
    use crate::repositories::ProductRepository;
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn sample_product(sku: &str, price_cents: i64) -> Product {
        Product {
            sku: sku.to_string(),
            name: format!("Producto {sku}"),
            description: "Importado del catálogo".to_string(),
            price: Decimal::new(price_cents, 2),
            base_price: Decimal::new(price_cents, 2),
            image_url: "https://static.example/img.jpg".to_string(),
            inventory: 12,
            category: "General".to_string(),
            iva_exempt: false,
        }
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    #[tokio::test]
    async fn upsert_catalog_round_trips_and_records_the_sync() {
        let pool = setup_pool().await;
        let repo = SqlProductRepository::new(pool.clone());
        let owner = OwnerId("u-cat".to_string());
        let products = vec![sample_product("SKU-1", 10_000), sample_product("SKU-2", 25_000)];
        let synced_at = parse_ts("2026-08-05T08:30:00Z");

        repo.upsert_catalog(&owner, &products, synced_at).await.expect("upsert catalog");

        let listed = repo.list_for_owner(&owner).await.expect("list products");
        assert_eq!(listed.len(), 2);

        let found = repo.find_by_sku(&owner, "SKU-1").await.expect("find product");
        assert_eq!(found, Some(products[0].clone()));

        let sync = repo.last_sync(&owner).await.expect("last sync").expect("sync recorded");
        assert_eq!(sync.last_sync_at, synced_at);
        assert_eq!(sync.product_count, 2);

        pool.close().await;
    }

    #[tokio::test]
    async fn resync_updates_existing_skus_in_place() {
        let pool = setup_pool().await;
        let repo = SqlProductRepository::new(pool.clone());
        let owner = OwnerId("u-resync".to_string());

        repo.upsert_catalog(&owner, &[sample_product("SKU-1", 10_000)], parse_ts("2026-08-05T08:30:00Z"))
            .await
            .expect("first sync");

        let mut updated = sample_product("SKU-1", 12_500);
        updated.inventory = 3;
        repo.upsert_catalog(&owner, &[updated.clone()], parse_ts("2026-08-06T08:30:00Z"))
            .await
            .expect("second sync");

        let listed = repo.list_for_owner(&owner).await.expect("list products");
        assert_eq!(listed, vec![updated]);

        let sync = repo.last_sync(&owner).await.expect("last sync").expect("sync recorded");
        assert_eq!(sync.last_sync_at, parse_ts("2026-08-06T08:30:00Z"));

        pool.close().await;
    }

    #[tokio::test]
    async fn owners_see_only_their_own_catalog() {
        let pool = setup_pool().await;
        let repo = SqlProductRepository::new(pool.clone());
        let owner_a = OwnerId("u-a".to_string());
        let owner_b = OwnerId("u-b".to_string());

        repo.upsert_catalog(&owner_a, &[sample_product("SKU-1", 10_000)], Utc::now())
            .await
            .expect("sync owner a");

        assert!(repo.list_for_owner(&owner_b).await.expect("list").is_empty());
        assert_eq!(repo.find_by_sku(&owner_b, "SKU-1").await.expect("find"), None);
        assert!(repo.last_sync(&owner_b).await.expect("last sync").is_none());

        pool.close().await;
    }
}
