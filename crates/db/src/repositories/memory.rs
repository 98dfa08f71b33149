use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use cotizador_core::domain::product::Product;
use cotizador_core::domain::quote::{Quote, QuoteId, QuoteState};
use cotizador_core::domain::OwnerId;
use cotizador_core::numbering::SeriesKey;

use super::{
    CatalogSyncRecord, ProductRepository, QuoteRepository, RepositoryError, SequenceRepository,
};

#[derive(Default)]
pub struct InMemoryQuoteRepository {
    quotes: RwLock<HashMap<String, Quote>>,
}

#[async_trait::async_trait]
impl QuoteRepository for InMemoryQuoteRepository {
    async fn find_by_id(&self, id: &QuoteId) -> Result<Option<Quote>, RepositoryError> {
        let quotes = self.quotes.read().await;
        Ok(quotes.get(&id.0).cloned())
    }

    async fn list_for_owner(
        &self,
        owner_id: &OwnerId,
        state: Option<QuoteState>,
    ) -> Result<Vec<Quote>, RepositoryError> {
        let quotes = self.quotes.read().await;
        let mut matching: Vec<Quote> = quotes
            .values()
            .filter(|quote| quote.owner_id == *owner_id)
            .filter(|quote| state.map(|wanted| quote.state == wanted).unwrap_or(true))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn save(&self, quote: Quote) -> Result<(), RepositoryError> {
        let mut quotes = self.quotes.write().await;
        quotes.insert(quote.id.0.clone(), quote);
        Ok(())
    }

    async fn states_for_owner(
        &self,
        owner_id: &OwnerId,
    ) -> Result<Vec<Option<QuoteState>>, RepositoryError> {
        let quotes = self.quotes.read().await;
        Ok(quotes
            .values()
            .filter(|quote| quote.owner_id == *owner_id)
            .map(|quote| Some(quote.state))
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryProductRepository {
    products: RwLock<HashMap<(String, String), Product>>,
    syncs: RwLock<HashMap<String, CatalogSyncRecord>>,
}

#[async_trait::async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn find_by_sku(
        &self,
        owner_id: &OwnerId,
        sku: &str,
    ) -> Result<Option<Product>, RepositoryError> {
        let products = self.products.read().await;
        Ok(products.get(&(owner_id.0.clone(), sku.to_string())).cloned())
    }

    async fn list_for_owner(&self, owner_id: &OwnerId) -> Result<Vec<Product>, RepositoryError> {
        let products = self.products.read().await;
        let mut matching: Vec<Product> = products
            .iter()
            .filter(|((owner, _), _)| *owner == owner_id.0)
            .map(|(_, product)| product.clone())
            .collect();
        matching.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(matching)
    }

    async fn upsert_catalog(
        &self,
        owner_id: &OwnerId,
        products: &[Product],
        synced_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut stored = self.products.write().await;
        for product in products {
            stored.insert((owner_id.0.clone(), product.sku.clone()), product.clone());
        }

        let mut syncs = self.syncs.write().await;
        syncs.insert(
            owner_id.0.clone(),
            CatalogSyncRecord {
                owner_id: owner_id.clone(),
                last_sync_at: synced_at,
                product_count: products.len() as i64,
            },
        );

        Ok(())
    }

    async fn last_sync(
        &self,
        owner_id: &OwnerId,
    ) -> Result<Option<CatalogSyncRecord>, RepositoryError> {
        let syncs = self.syncs.read().await;
        Ok(syncs.get(&owner_id.0).cloned())
    }
}

/// Counter store for tests and seams. The single mutex serializes every
/// allocation, which trivially satisfies the dense-count contract.
#[derive(Default)]
pub struct InMemorySequenceRepository {
    counters: Mutex<HashMap<(String, String), u64>>,
}

impl InMemorySequenceRepository {
    /// Number of distinct counters that have been touched.
    pub async fn key_count(&self) -> usize {
        self.counters.lock().await.len()
    }
}

#[async_trait::async_trait]
impl SequenceRepository for InMemorySequenceRepository {
    async fn allocate_next(
        &self,
        owner_id: &OwnerId,
        series: &SeriesKey,
    ) -> Result<u64, RepositoryError> {
        let mut counters = self.counters.lock().await;
        let count = counters.entry((owner_id.0.clone(), series.as_str().to_string())).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn current(
        &self,
        owner_id: &OwnerId,
        series: &SeriesKey,
    ) -> Result<u64, RepositoryError> {
        let counters = self.counters.lock().await;
        Ok(counters
            .get(&(owner_id.0.clone(), series.as_str().to_string()))
            .copied()
            .unwrap_or(0))
    }
}
