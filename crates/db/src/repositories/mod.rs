use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use cotizador_core::domain::product::Product;
use cotizador_core::domain::quote::{Quote, QuoteId, QuoteState};
use cotizador_core::domain::OwnerId;
use cotizador_core::numbering::SeriesKey;

pub mod memory;
pub mod product;
pub mod quote;
pub mod sequence;

pub use memory::{InMemoryProductRepository, InMemoryQuoteRepository, InMemorySequenceRepository};
pub use product::SqlProductRepository;
pub use quote::SqlQuoteRepository;
pub use sequence::SqlSequenceRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("write conflict: {0}")]
    Conflict(String),
}

#[async_trait]
pub trait QuoteRepository: Send + Sync {
    async fn find_by_id(&self, id: &QuoteId) -> Result<Option<Quote>, RepositoryError>;

    async fn list_for_owner(
        &self,
        owner_id: &OwnerId,
        state: Option<QuoteState>,
    ) -> Result<Vec<Quote>, RepositoryError>;

    async fn save(&self, quote: Quote) -> Result<(), RepositoryError>;

    /// Stored states for an owner as the metrics pipeline sees them: a row
    /// whose raw value does not parse comes back as `None` so it can be
    /// counted in `total` without entering any per-state bucket.
    async fn states_for_owner(
        &self,
        owner_id: &OwnerId,
    ) -> Result<Vec<Option<QuoteState>>, RepositoryError>;
}

/// Outcome of the most recent catalog sync for an owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogSyncRecord {
    pub owner_id: OwnerId,
    pub last_sync_at: DateTime<Utc>,
    pub product_count: i64,
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn find_by_sku(
        &self,
        owner_id: &OwnerId,
        sku: &str,
    ) -> Result<Option<Product>, RepositoryError>;

    async fn list_for_owner(&self, owner_id: &OwnerId) -> Result<Vec<Product>, RepositoryError>;

    /// Upserts the synced products and records the sync outcome in one
    /// transaction. Products absent from `products` are left in place; the
    /// platform is the source of truth only for what it still lists.
    async fn upsert_catalog(
        &self,
        owner_id: &OwnerId,
        products: &[Product],
        synced_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn last_sync(
        &self,
        owner_id: &OwnerId,
    ) -> Result<Option<CatalogSyncRecord>, RepositoryError>;
}

#[async_trait]
pub trait SequenceRepository: Send + Sync {
    /// Atomically increments the counter for `(owner, series)` and returns
    /// the new count. Counts are dense: the k-th successful call for a key
    /// observes exactly `k`, regardless of interleaving. A call that cannot
    /// commit within the retry budget fails with
    /// [`RepositoryError::Conflict`] and leaves the counter untouched.
    async fn allocate_next(
        &self,
        owner_id: &OwnerId,
        series: &SeriesKey,
    ) -> Result<u64, RepositoryError>;

    /// Current count without allocating; 0 for a series never used.
    async fn current(
        &self,
        owner_id: &OwnerId,
        series: &SeriesKey,
    ) -> Result<u64, RepositoryError>;
}
