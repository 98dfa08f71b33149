//! JSON API for quote management and dashboard metrics.
//!
//! Endpoints:
//! - `POST /api/v1/quotes`            — create a quote (allocates its number)
//! - `GET  /api/v1/quotes`            — list quotes for an owner, optional state filter
//! - `GET  /api/v1/quotes/{id}`       — fetch one quote
//! - `POST /api/v1/quotes/{id}/state` — validated state transition
//! - `GET  /api/v1/metrics`           — per-state counts and conversion rate

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use cotizador_core::domain::quote::{Quote, QuoteId, QuoteLine, QuoteState};
use cotizador_core::domain::OwnerId;
use cotizador_core::metrics::QuoteMetrics;
use cotizador_db::repositories::{QuoteRepository, RepositoryError};
use cotizador_db::{AllocationError, QuoteNumberAllocator};

#[derive(Clone)]
pub struct ApiState {
    quotes: Arc<dyn QuoteRepository>,
    allocator: Arc<QuoteNumberAllocator>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateQuoteRequest {
    pub owner_id: String,
    pub store: String,
    pub client_name: String,
    pub client_email: Option<String>,
    #[serde(default)]
    pub lines: Vec<QuoteLineRequest>,
    pub valid_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct QuoteLineRequest {
    pub sku: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    #[serde(default)]
    pub iva_exempt: bool,
}

#[derive(Debug, Deserialize)]
pub struct StateChangeRequest {
    pub estado: String,
}

#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    pub owner_id: String,
    pub estado: Option<String>,
}

type ApiResult<T> = Result<(StatusCode, Json<T>), (StatusCode, Json<ApiError>)>;

pub fn router(quotes: Arc<dyn QuoteRepository>, allocator: Arc<QuoteNumberAllocator>) -> Router {
    Router::new()
        .route("/api/v1/quotes", post(create_quote).get(list_quotes))
        .route("/api/v1/quotes/{id}", get(get_quote))
        .route("/api/v1/quotes/{id}/state", post(change_state))
        .route("/api/v1/metrics", get(metrics))
        .with_state(ApiState { quotes, allocator })
}

pub async fn create_quote(
    State(state): State<ApiState>,
    Json(request): Json<CreateQuoteRequest>,
) -> ApiResult<Quote> {
    let correlation_id = Uuid::new_v4().to_string();

    if request.owner_id.trim().is_empty() {
        return Err(bad_request("owner_id must not be empty"));
    }
    if request.client_name.trim().is_empty() {
        return Err(bad_request("client_name must not be empty"));
    }

    let owner_id = OwnerId(request.owner_id.clone());

    let number = match state.allocator.allocate(&owner_id, &request.store).await {
        Ok(number) => number,
        Err(AllocationError::InvalidSeries(error)) => {
            return Err(bad_request(&error.to_string()));
        }
        Err(AllocationError::Conflict { .. }) => {
            warn!(
                event_name = "quote.number_allocation_conflict",
                correlation_id = %correlation_id,
                owner_id = %request.owner_id,
                store = %request.store,
                "quote number allocation exhausted its retry budget"
            );
            return Err((
                StatusCode::CONFLICT,
                Json(ApiError {
                    error: "quote numbering is under contention; retry the request".to_string(),
                }),
            ));
        }
        Err(AllocationError::Repository(error)) => {
            return Err(repository_error(&correlation_id, error));
        }
    };

    let now = Utc::now();
    let lines: Vec<QuoteLine> = request
        .lines
        .into_iter()
        .map(|line| QuoteLine {
            sku: line.sku,
            name: line.name,
            quantity: line.quantity,
            unit_price: line.unit_price,
            iva_exempt: line.iva_exempt,
        })
        .collect();
    let total: Decimal =
        lines.iter().map(|line| Decimal::from(line.quantity) * line.unit_price).sum();

    let quote = Quote {
        id: QuoteId(Uuid::new_v4().to_string()),
        owner_id,
        store: request.store,
        number,
        client_name: request.client_name,
        client_email: request.client_email,
        state: QuoteState::default(),
        lines,
        total,
        valid_until: request.valid_until,
        sent_by_email: false,
        email_sent_to: None,
        email_message_id: None,
        created_at: now,
        updated_at: now,
    };

    if let Err(db_error) = state.quotes.save(quote.clone()).await {
        return Err(repository_error(&correlation_id, db_error));
    }

    info!(
        event_name = "quote.created",
        correlation_id = %correlation_id,
        quote_id = %quote.id.0,
        quote_number = %quote.number,
        store = %quote.store,
        "quote created"
    );

    Ok((StatusCode::CREATED, Json(quote)))
}

pub async fn list_quotes(
    State(state): State<ApiState>,
    Query(query): Query<OwnerQuery>,
) -> ApiResult<Vec<Quote>> {
    let correlation_id = Uuid::new_v4().to_string();
    let owner_id = OwnerId(query.owner_id);

    let state_filter = match query.estado.as_deref() {
        None => None,
        Some(raw) => match QuoteState::parse(raw) {
            Some(parsed) => Some(parsed),
            None => return Err(bad_request(&format!("unknown estado `{raw}`"))),
        },
    };

    match state.quotes.list_for_owner(&owner_id, state_filter).await {
        Ok(quotes) => Ok((StatusCode::OK, Json(quotes))),
        Err(db_error) => Err(repository_error(&correlation_id, db_error)),
    }
}

pub async fn get_quote(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Quote> {
    let correlation_id = Uuid::new_v4().to_string();

    match state.quotes.find_by_id(&QuoteId(id)).await {
        Ok(Some(quote)) => Ok((StatusCode::OK, Json(quote))),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ApiError { error: "quote not found".to_string() }),
        )),
        Err(db_error) => Err(repository_error(&correlation_id, db_error)),
    }
}

pub async fn change_state(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(request): Json<StateChangeRequest>,
) -> ApiResult<Quote> {
    let correlation_id = Uuid::new_v4().to_string();

    let Some(target) = QuoteState::parse(&request.estado) else {
        return Err(bad_request(&format!("unknown estado `{}`", request.estado)));
    };

    let mut quote = match state.quotes.find_by_id(&QuoteId(id)).await {
        Ok(Some(quote)) => quote,
        Ok(None) => {
            return Err((
                StatusCode::NOT_FOUND,
                Json(ApiError { error: "quote not found".to_string() }),
            ));
        }
        Err(db_error) => return Err(repository_error(&correlation_id, db_error)),
    };

    let previous = quote.state;
    if let Err(domain_error) = quote.transition_to(target) {
        return Err((StatusCode::CONFLICT, Json(ApiError { error: domain_error.to_string() })));
    }
    quote.updated_at = Utc::now();

    if let Err(db_error) = state.quotes.save(quote.clone()).await {
        return Err(repository_error(&correlation_id, db_error));
    }

    info!(
        event_name = "quote.state_changed",
        correlation_id = %correlation_id,
        quote_id = %quote.id.0,
        from = previous.as_str(),
        to = quote.state.as_str(),
        "quote state changed"
    );

    Ok((StatusCode::OK, Json(quote)))
}

pub async fn metrics(
    State(state): State<ApiState>,
    Query(query): Query<OwnerQuery>,
) -> ApiResult<QuoteMetrics> {
    let correlation_id = Uuid::new_v4().to_string();
    let owner_id = OwnerId(query.owner_id);

    match state.quotes.states_for_owner(&owner_id).await {
        Ok(states) => Ok((StatusCode::OK, Json(QuoteMetrics::from_states(states)))),
        Err(db_error) => Err(repository_error(&correlation_id, db_error)),
    }
}

fn bad_request(message: &str) -> (StatusCode, Json<ApiError>) {
    (StatusCode::BAD_REQUEST, Json(ApiError { error: message.to_string() }))
}

fn repository_error(
    correlation_id: &str,
    db_error: RepositoryError,
) -> (StatusCode, Json<ApiError>) {
    error!(
        event_name = "quote.repository_error",
        correlation_id = %correlation_id,
        error = %db_error,
        "quote repository operation failed"
    );
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ApiError { error: "persistence is temporarily unavailable".to_string() }),
    )
}
