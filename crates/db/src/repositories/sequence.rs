use std::time::Duration;

use cotizador_core::domain::OwnerId;
use cotizador_core::numbering::SeriesKey;

use super::{RepositoryError, SequenceRepository};
use crate::DbPool;

// SQLite admits a single writer; a transaction that read a counter value
// which another writer has since bumped fails its own write with a
// busy/snapshot error. Re-running the whole transaction re-reads the
// committed value, so the loser never writes a stale count.
const MAX_ATTEMPTS: u32 = 16;
const RETRY_BASE_DELAY_MS: u64 = 2;

pub struct SqlSequenceRepository {
    pool: DbPool,
}

impl SqlSequenceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn try_allocate(
        &self,
        owner_id: &OwnerId,
        series: &SeriesKey,
    ) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let current: Option<i64> = sqlx::query_scalar(
            "SELECT count FROM sequence_counter WHERE owner_id = ? AND series_key = ?",
        )
        .bind(&owner_id.0)
        .bind(series.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let next = current.unwrap_or(0) + 1;

        sqlx::query(
            "INSERT INTO sequence_counter (owner_id, series_key, count)
             VALUES (?, ?, ?)
             ON CONFLICT(owner_id, series_key) DO UPDATE SET count = excluded.count",
        )
        .bind(&owner_id.0)
        .bind(series.as_str())
        .bind(next)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(next as u64)
    }
}

#[async_trait::async_trait]
impl SequenceRepository for SqlSequenceRepository {
    async fn allocate_next(
        &self,
        owner_id: &OwnerId,
        series: &SeriesKey,
    ) -> Result<u64, RepositoryError> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            match self.try_allocate(owner_id, series).await {
                Ok(count) => return Ok(count),
                Err(error) if is_write_conflict(&error) => {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(RepositoryError::Conflict(format!(
                            "sequence_counter write for `{}`/`{}` did not commit after {attempt} attempts",
                            owner_id.0, series
                        )));
                    }
                    tokio::time::sleep(Duration::from_millis(
                        RETRY_BASE_DELAY_MS * u64::from(attempt),
                    ))
                    .await;
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    async fn current(
        &self,
        owner_id: &OwnerId,
        series: &SeriesKey,
    ) -> Result<u64, RepositoryError> {
        let count: Option<i64> = sqlx::query_scalar(
            "SELECT count FROM sequence_counter WHERE owner_id = ? AND series_key = ?",
        )
        .bind(&owner_id.0)
        .bind(series.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(count.unwrap_or(0) as u64)
    }
}

fn is_write_conflict(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_error) => {
            let message = db_error.message();
            message.contains("database is locked")
                || message.contains("database table is locked")
                || matches!(
                    db_error.code().as_deref(),
                    Some("5") | Some("6") | Some("262") | Some("517")
                )
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cotizador_core::domain::OwnerId;
    use cotizador_core::numbering::SeriesKey;

    use super::SqlSequenceRepository;
    use crate::migrations;
    use crate::repositories::SequenceRepository;
    use crate::{connect_with_settings, DbPool};

    async fn setup_memory_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    async fn setup_file_pool(dir: &tempfile::TempDir, max_connections: u32) -> DbPool {
        let path = dir.path().join("sequence-test.db");
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let pool =
            connect_with_settings(&url, max_connections, 30).await.expect("connect file pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn series(label: &str) -> SeriesKey {
        SeriesKey::parse(label).expect("valid series label")
    }

    #[tokio::test]
    async fn sequential_allocations_count_up_from_one() {
        let pool = setup_memory_pool().await;
        let repo = SqlSequenceRepository::new(pool.clone());
        let owner = OwnerId("u-seq".to_string());
        let barranquilla = series("Barranquilla");

        for expected in 1..=5u64 {
            let count = repo.allocate_next(&owner, &barranquilla).await.expect("allocate");
            assert_eq!(count, expected);
        }

        assert_eq!(repo.current(&owner, &barranquilla).await.expect("current"), 5);

        pool.close().await;
    }

    #[tokio::test]
    async fn series_and_owners_do_not_share_counters() {
        let pool = setup_memory_pool().await;
        let repo = SqlSequenceRepository::new(pool.clone());
        let owner = OwnerId("u-ind".to_string());
        let other_owner = OwnerId("u-ind-2".to_string());
        let barranquilla = series("Barranquilla");
        let medellin = series("Medellin");

        for _ in 0..3 {
            repo.allocate_next(&owner, &barranquilla).await.expect("allocate bq");
        }
        let medellin_count = repo.allocate_next(&owner, &medellin).await.expect("allocate med");
        let other_count =
            repo.allocate_next(&other_owner, &barranquilla).await.expect("allocate other owner");

        assert_eq!(medellin_count, 1, "a fresh series starts at 1");
        assert_eq!(other_count, 1, "a fresh owner starts at 1");
        assert_eq!(repo.current(&owner, &barranquilla).await.expect("current"), 3);

        pool.close().await;
    }

    #[tokio::test]
    async fn current_is_zero_for_untouched_series() {
        let pool = setup_memory_pool().await;
        let repo = SqlSequenceRepository::new(pool.clone());

        let count = repo
            .current(&OwnerId("u-none".to_string()), &series("Cartagena"))
            .await
            .expect("current");

        assert_eq!(count, 0);

        pool.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_allocations_yield_dense_unique_counts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = setup_file_pool(&dir, 5).await;
        let repo = Arc::new(SqlSequenceRepository::new(pool.clone()));
        let owner = OwnerId("u-conc".to_string());
        let barranquilla = series("Barranquilla");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let repo = Arc::clone(&repo);
            let owner = owner.clone();
            let barranquilla = barranquilla.clone();
            handles.push(tokio::spawn(async move {
                repo.allocate_next(&owner, &barranquilla).await
            }));
        }

        let mut counts = Vec::new();
        for handle in handles {
            counts.push(handle.await.expect("join").expect("allocate"));
        }

        counts.sort_unstable();
        assert_eq!(
            counts,
            (1..=16).collect::<Vec<u64>>(),
            "concurrent allocations must cover 1..=16 with no duplicates or gaps",
        );

        pool.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_series_do_not_interfere() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = setup_file_pool(&dir, 5).await;
        let repo = Arc::new(SqlSequenceRepository::new(pool.clone()));
        let owner = OwnerId("u-conc-series".to_string());

        let mut handles = Vec::new();
        for label in ["Barranquilla", "Medellin"] {
            for _ in 0..8 {
                let repo = Arc::clone(&repo);
                let owner = owner.clone();
                let key = series(label);
                handles.push(tokio::spawn(async move {
                    (label, repo.allocate_next(&owner, &key).await)
                }));
            }
        }

        let mut barranquilla_counts = Vec::new();
        let mut medellin_counts = Vec::new();
        for handle in handles {
            let (label, result) = handle.await.expect("join");
            let count = result.expect("allocate");
            if label == "Barranquilla" {
                barranquilla_counts.push(count);
            } else {
                medellin_counts.push(count);
            }
        }

        barranquilla_counts.sort_unstable();
        medellin_counts.sort_unstable();
        assert_eq!(barranquilla_counts, (1..=8).collect::<Vec<u64>>());
        assert_eq!(medellin_counts, (1..=8).collect::<Vec<u64>>());

        pool.close().await;
    }
}
