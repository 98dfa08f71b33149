use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use cotizador_core::domain::quote::{Quote, QuoteId, QuoteLine, QuoteState};
use cotizador_core::domain::OwnerId;
use cotizador_core::numbering::QuoteNumber;

use super::{QuoteRepository, RepositoryError};
use crate::DbPool;

pub struct SqlQuoteRepository {
    pool: DbPool,
}

impl SqlQuoteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn lines_for_quote(&self, quote_id: &QuoteId) -> Result<Vec<QuoteLine>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT sku, name, quantity, unit_price, iva_exempt
             FROM quote_line
             WHERE quote_id = ?
             ORDER BY line_index ASC",
        )
        .bind(&quote_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(line_from_row).collect()
    }
}

#[async_trait::async_trait]
impl QuoteRepository for SqlQuoteRepository {
    async fn find_by_id(&self, id: &QuoteId) -> Result<Option<Quote>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                owner_id,
                store,
                number,
                client_name,
                client_email,
                state,
                total,
                valid_until,
                sent_by_email,
                email_sent_to,
                email_message_id,
                created_at,
                updated_at
             FROM quote
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let lines = self.lines_for_quote(id).await?;
        quote_from_row(row, lines).map(Some)
    }

    async fn list_for_owner(
        &self,
        owner_id: &OwnerId,
        state: Option<QuoteState>,
    ) -> Result<Vec<Quote>, RepositoryError> {
        let rows = if let Some(state) = state {
            sqlx::query(
                "SELECT
                    id,
                    owner_id,
                    store,
                    number,
                    client_name,
                    client_email,
                    state,
                    total,
                    valid_until,
                    sent_by_email,
                    email_sent_to,
                    email_message_id,
                    created_at,
                    updated_at
                 FROM quote
                 WHERE owner_id = ? AND state = ?
                 ORDER BY created_at DESC",
            )
            .bind(&owner_id.0)
            .bind(state.as_str())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT
                    id,
                    owner_id,
                    store,
                    number,
                    client_name,
                    client_email,
                    state,
                    total,
                    valid_until,
                    sent_by_email,
                    email_sent_to,
                    email_message_id,
                    created_at,
                    updated_at
                 FROM quote
                 WHERE owner_id = ?
                 ORDER BY created_at DESC",
            )
            .bind(&owner_id.0)
            .fetch_all(&self.pool)
            .await?
        };

        let mut quotes = Vec::with_capacity(rows.len());
        for row in rows {
            let quote_id = QuoteId(row.try_get::<String, _>("id")?);
            let lines = self.lines_for_quote(&quote_id).await?;
            quotes.push(quote_from_row(row, lines)?);
        }

        Ok(quotes)
    }

    async fn save(&self, quote: Quote) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO quote (
                id,
                owner_id,
                store,
                number,
                client_name,
                client_email,
                state,
                total,
                valid_until,
                sent_by_email,
                email_sent_to,
                email_message_id,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                owner_id = excluded.owner_id,
                store = excluded.store,
                number = excluded.number,
                client_name = excluded.client_name,
                client_email = excluded.client_email,
                state = excluded.state,
                total = excluded.total,
                valid_until = excluded.valid_until,
                sent_by_email = excluded.sent_by_email,
                email_sent_to = excluded.email_sent_to,
                email_message_id = excluded.email_message_id,
                updated_at = excluded.updated_at",
        )
        .bind(&quote.id.0)
        .bind(&quote.owner_id.0)
        .bind(&quote.store)
        .bind(quote.number.as_str())
        .bind(&quote.client_name)
        .bind(quote.client_email.as_deref())
        .bind(quote.state.as_str())
        .bind(quote.total.to_string())
        .bind(quote.valid_until.map(|value| value.to_rfc3339()))
        .bind(i64::from(quote.sent_by_email))
        .bind(quote.email_sent_to.as_deref())
        .bind(quote.email_message_id.as_deref())
        .bind(quote.created_at.to_rfc3339())
        .bind(quote.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM quote_line WHERE quote_id = ?")
            .bind(&quote.id.0)
            .execute(&mut *tx)
            .await?;

        for (index, line) in quote.lines.iter().enumerate() {
            sqlx::query(
                "INSERT INTO quote_line (
                    quote_id,
                    line_index,
                    sku,
                    name,
                    quantity,
                    unit_price,
                    iva_exempt
                 ) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&quote.id.0)
            .bind(index as i64)
            .bind(&line.sku)
            .bind(&line.name)
            .bind(i64::from(line.quantity))
            .bind(line.unit_price.to_string())
            .bind(i64::from(line.iva_exempt))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(())
    }

    async fn states_for_owner(
        &self,
        owner_id: &OwnerId,
    ) -> Result<Vec<Option<QuoteState>>, RepositoryError> {
        let rows = sqlx::query("SELECT state FROM quote WHERE owner_id = ?")
            .bind(&owner_id.0)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                row.try_get::<String, _>("state")
                    .map(|raw| QuoteState::parse(&raw))
                    .map_err(RepositoryError::from)
            })
            .collect::<Result<Vec<_>, _>>()?)
    }
}

fn quote_from_row(row: SqliteRow, lines: Vec<QuoteLine>) -> Result<Quote, RepositoryError> {
    let state_raw = row.try_get::<String, _>("state")?;

    Ok(Quote {
        id: QuoteId(row.try_get("id")?),
        owner_id: OwnerId(row.try_get("owner_id")?),
        store: row.try_get("store")?,
        number: QuoteNumber(row.try_get("number")?),
        client_name: row.try_get("client_name")?,
        client_email: row.try_get("client_email")?,
        // Unknown stored values read as the default state; the metrics
        // path goes through `states_for_owner` and keeps them distinct.
        state: QuoteState::parse(&state_raw).unwrap_or_default(),
        lines,
        total: parse_decimal("total", &row.try_get::<String, _>("total")?)?,
        valid_until: parse_optional_timestamp("valid_until", row.try_get("valid_until")?)?,
        sent_by_email: row.try_get::<i64, _>("sent_by_email")? != 0,
        email_sent_to: row.try_get("email_sent_to")?,
        email_message_id: row.try_get("email_message_id")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn line_from_row(row: SqliteRow) -> Result<QuoteLine, RepositoryError> {
    Ok(QuoteLine {
        sku: row.try_get("sku")?,
        name: row.try_get("name")?,
        quantity: parse_u32("quantity", row.try_get("quantity")?)?,
        unit_price: parse_decimal("unit_price", &row.try_get::<String, _>("unit_price")?)?,
        iva_exempt: row.try_get::<i64, _>("iva_exempt")? != 0,
    })
}

fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

fn parse_decimal(column: &str, value: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(value).map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;

    use cotizador_core::domain::quote::{Quote, QuoteId, QuoteLine, QuoteState};
    use cotizador_core::domain::OwnerId;
    use cotizador_core::numbering::{QuoteNumber, SeriesKey};

    use super::SqlQuoteRepository;
    use crate::migrations;
    use crate::repositories::QuoteRepository;
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn sample_quote(id: &str, owner: &str, state: QuoteState) -> Quote {
        let series = SeriesKey::parse("Barranquilla").expect("valid series");
        Quote {
            id: QuoteId(id.to_string()),
            owner_id: OwnerId(owner.to_string()),
            store: "Barranquilla".to_string(),
            number: QuoteNumber::format(&series, 1),
            client_name: "Ferretería El Puerto".to_string(),
            client_email: Some("compras@elpuerto.example".to_string()),
            state,
            lines: vec![
                QuoteLine {
                    sku: "SKU-001".to_string(),
                    name: "Libro de contabilidad".to_string(),
                    quantity: 3,
                    unit_price: Decimal::new(45_000, 2),
                    iva_exempt: true,
                },
                QuoteLine {
                    sku: "SKU-002".to_string(),
                    name: "Calculadora financiera".to_string(),
                    quantity: 1,
                    unit_price: Decimal::new(220_000, 2),
                    iva_exempt: false,
                },
            ],
            total: Decimal::new(355_000, 2),
            valid_until: Some(parse_ts("2026-09-30T00:00:00Z")),
            sent_by_email: false,
            email_sent_to: None,
            email_message_id: None,
            created_at: parse_ts("2026-08-01T10:00:00Z"),
            updated_at: parse_ts("2026-08-01T10:00:00Z"),
        }
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    #[tokio::test]
    async fn sql_quote_repo_round_trip_with_lines() {
        let pool = setup_pool().await;
        let repo = SqlQuoteRepository::new(pool.clone());
        let quote = sample_quote("q-rt-1", "u-rt", QuoteState::Borrador);

        repo.save(quote.clone()).await.expect("save quote");

        let found = repo.find_by_id(&quote.id).await.expect("find quote");
        assert_eq!(found, Some(quote));

        pool.close().await;
    }

    #[tokio::test]
    async fn save_replaces_lines_on_update() {
        let pool = setup_pool().await;
        let repo = SqlQuoteRepository::new(pool.clone());
        let mut quote = sample_quote("q-up-1", "u-up", QuoteState::Borrador);

        repo.save(quote.clone()).await.expect("save quote");

        quote.lines.truncate(1);
        quote.total = Decimal::new(135_000, 2);
        quote.updated_at = parse_ts("2026-08-02T09:00:00Z");
        repo.save(quote.clone()).await.expect("update quote");

        let found = repo.find_by_id(&quote.id).await.expect("find quote").expect("quote exists");
        assert_eq!(found.lines.len(), 1);
        assert_eq!(found, quote);

        pool.close().await;
    }

    #[tokio::test]
    async fn list_for_owner_filters_by_state() {
        let pool = setup_pool().await;
        let repo = SqlQuoteRepository::new(pool.clone());
        let owner = OwnerId("u-list".to_string());

        for (id, state) in [
            ("q-l-1", QuoteState::Borrador),
            ("q-l-2", QuoteState::Enviada),
            ("q-l-3", QuoteState::Enviada),
        ] {
            let mut quote = sample_quote(id, "u-list", state);
            quote.number = QuoteNumber(format!("COT-BQ-{id}"));
            repo.save(quote).await.expect("save quote");
        }

        let all = repo.list_for_owner(&owner, None).await.expect("list all");
        assert_eq!(all.len(), 3);

        let sent = repo.list_for_owner(&owner, Some(QuoteState::Enviada)).await.expect("list sent");
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|quote| quote.state == QuoteState::Enviada));

        pool.close().await;
    }

    #[tokio::test]
    async fn unknown_stored_state_reads_as_default_but_stays_raw_for_metrics() {
        let pool = setup_pool().await;
        let repo = SqlQuoteRepository::new(pool.clone());
        let owner = OwnerId("u-raw".to_string());
        let quote = sample_quote("q-raw-1", "u-raw", QuoteState::Ganada);

        repo.save(quote.clone()).await.expect("save quote");

        // Simulate a legacy row written before state validation existed.
        sqlx::query("UPDATE quote SET state = 'Negociacion' WHERE id = ?")
            .bind(&quote.id.0)
            .execute(&pool)
            .await
            .expect("write legacy state");

        let found = repo.find_by_id(&quote.id).await.expect("find").expect("exists");
        assert_eq!(found.state, QuoteState::Borrador, "unknown state decodes as default");

        let states = repo.states_for_owner(&owner).await.expect("states");
        assert_eq!(states, vec![None], "metrics path must see the unknown value as None");

        pool.close().await;
    }
}
