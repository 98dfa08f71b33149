//! One-way catalog sync from the Wix stores API into the local product
//! table.
//!
//! Endpoints:
//! - `POST /api/v1/catalog/sync`   — pull every product page and upsert
//! - `GET  /api/v1/catalog/status` — last sync timestamp and product count
//!
//! The platform is only the source of truth for what it still lists:
//! products that disappear remotely stay in the local table until an
//! operator removes them.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use cotizador_core::config::WixConfig;
use cotizador_core::domain::product::Product;
use cotizador_core::domain::OwnerId;
use cotizador_db::repositories::ProductRepository;

const PLACEHOLDER_IMAGE: &str = "https://placehold.co/100x100/EEE/333?text=S/I";

#[derive(Clone)]
struct SyncRuntimeConfig {
    enabled: bool,
    api_key: Option<SecretString>,
    site_id: Option<String>,
    base_url: String,
    page_size: u32,
}

impl From<&WixConfig> for SyncRuntimeConfig {
    fn from(config: &WixConfig) -> Self {
        Self {
            enabled: config.enabled,
            api_key: config.api_key.clone(),
            site_id: config.site_id.clone(),
            base_url: config.base_url.clone(),
            page_size: config.page_size,
        }
    }
}

#[derive(Clone)]
pub struct SyncState {
    products: Arc<dyn ProductRepository>,
    config: SyncRuntimeConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub owner_id: String,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub success: bool,
    pub count: usize,
    pub excluded: usize,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub owner_id: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub last_sync_at: String,
    pub product_count: i64,
}

#[derive(Debug, thiserror::Error)]
enum PlatformError {
    #[error("platform request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("platform returned status {status}")]
    Status { status: u16 },
}

pub fn router(products: Arc<dyn ProductRepository>, config: &WixConfig) -> Router {
    Router::new()
        .route("/api/v1/catalog/sync", post(sync_catalog))
        .route("/api/v1/catalog/status", get(sync_status))
        .with_state(SyncState {
            products,
            config: SyncRuntimeConfig::from(config),
            client: Client::new(),
        })
}

pub async fn sync_catalog(
    State(state): State<SyncState>,
    Json(request): Json<SyncRequest>,
) -> Result<(StatusCode, Json<SyncResponse>), (StatusCode, Json<Value>)> {
    if request.owner_id.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, Json(json!({ "error": "owner_id is required" }))));
    }

    let (api_key, site_id) = match (&state.config.api_key, &state.config.site_id) {
        (Some(api_key), Some(site_id)) if state.config.enabled => {
            (api_key.expose_secret().to_string(), site_id.clone())
        }
        _ => {
            return Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "catalog sync is not configured" })),
            ));
        }
    };

    info!(
        event_name = "catalog.sync.start",
        owner_id = %request.owner_id,
        "starting catalog sync"
    );

    let fetched =
        match fetch_all_products(&state.client, &state.config, &api_key, &site_id).await {
            Ok(products) => products,
            Err(platform_error) => {
                error!(
                    event_name = "catalog.sync.platform_error",
                    owner_id = %request.owner_id,
                    error = %platform_error,
                    "catalog sync aborted by platform error"
                );
                return Err((
                    StatusCode::BAD_GATEWAY,
                    Json(json!({ "error": platform_error.to_string() })),
                ));
            }
        };

    let (valid, excluded) = split_valid_products(fetched);
    if excluded > 0 {
        warn!(
            event_name = "catalog.sync.skus_excluded",
            owner_id = %request.owner_id,
            excluded,
            "products without a usable sku were excluded from the sync"
        );
    }

    let owner_id = OwnerId(request.owner_id.clone());
    if let Err(db_error) = state.products.upsert_catalog(&owner_id, &valid, Utc::now()).await {
        error!(
            event_name = "catalog.sync.persistence_error",
            owner_id = %request.owner_id,
            error = %db_error,
            "catalog sync failed to persist products"
        );
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "persistence is temporarily unavailable" })),
        ));
    }

    info!(
        event_name = "catalog.sync.completed",
        owner_id = %request.owner_id,
        count = valid.len(),
        excluded,
        "catalog sync completed"
    );

    Ok((StatusCode::OK, Json(SyncResponse { success: true, count: valid.len(), excluded })))
}

pub async fn sync_status(
    State(state): State<SyncState>,
    Query(query): Query<StatusQuery>,
) -> Result<(StatusCode, Json<StatusResponse>), (StatusCode, Json<Value>)> {
    let owner_id = OwnerId(query.owner_id);

    match state.products.last_sync(&owner_id).await {
        Ok(Some(record)) => Ok((
            StatusCode::OK,
            Json(StatusResponse {
                last_sync_at: record.last_sync_at.to_rfc3339(),
                product_count: record.product_count,
            }),
        )),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no sync has been recorded for this owner" })),
        )),
        Err(db_error) => {
            error!(
                event_name = "catalog.status.persistence_error",
                error = %db_error,
                "catalog status lookup failed"
            );
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "persistence is temporarily unavailable" })),
            ))
        }
    }
}

async fn fetch_all_products(
    client: &Client,
    config: &SyncRuntimeConfig,
    api_key: &str,
    site_id: &str,
) -> Result<Vec<Product>, PlatformError> {
    let limit = config.page_size as usize;
    let mut all_products = Vec::new();
    let mut offset = 0usize;

    loop {
        let body = json!({
            "includeHiddenProducts": true,
            "query": { "paging": { "limit": limit, "offset": offset } }
        });

        let response = client
            .post(format!("{}/stores/v1/products/query", config.base_url))
            .header("Authorization", api_key)
            .header("wix-site-id", site_id)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PlatformError::Status { status: response.status().as_u16() });
        }

        let payload: Value = response.json().await?;
        let (page, total_results) = parse_products_page(&payload);

        if page.is_empty() {
            break;
        }

        let short_page = page.len() < limit;
        all_products.extend(page);

        if short_page {
            break;
        }

        offset += limit;
        if total_results != 0 && offset >= total_results {
            break;
        }
    }

    Ok(all_products)
}

/// Decodes one platform response page into products plus the reported
/// catalog size.
fn parse_products_page(payload: &Value) -> (Vec<Product>, usize) {
    let products = payload
        .get("products")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(product_from_platform).collect())
        .unwrap_or_default();
    let total_results =
        payload.get("totalResults").and_then(Value::as_u64).unwrap_or(0) as usize;

    (products, total_results)
}

/// Maps one raw platform product onto the local shape. The platform has
/// shipped several payload layouts; each field walks its known locations
/// in order and falls back to a safe default.
fn product_from_platform(raw: &Value) -> Product {
    let price = raw
        .pointer("/price/price")
        .or_else(|| raw.pointer("/priceData/price"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let price = Decimal::from_f64_retain(price).unwrap_or_default().round_dp(2);

    let stock = raw.get("stock");
    let quantity = stock.and_then(|value| value.get("quantity")).and_then(Value::as_i64);
    let in_stock =
        stock.and_then(|value| value.get("inStock")).and_then(Value::as_bool).unwrap_or(false);
    let inventory = match quantity {
        Some(quantity) => quantity,
        // Untracked but listed as in stock: treat as effectively unlimited.
        None if in_stock => 999,
        None => 0,
    };

    let image_url = [
        "/media/mainMedia/image/url",
        "/media/items/0/image/url",
        "/mediaItems/0/url",
        "/mainMedia/url",
        "/media/mainMedia/thumbnail/url",
    ]
    .iter()
    .find_map(|path| raw.pointer(path).and_then(Value::as_str))
    .unwrap_or(PLACEHOLDER_IMAGE)
    .to_string();

    let sku = match raw.get("sku") {
        Some(Value::String(sku)) => sku.trim().to_string(),
        Some(Value::Number(sku)) => sku.to_string(),
        _ => String::new(),
    };
    let name =
        raw.get("name").and_then(Value::as_str).unwrap_or("Sin Nombre").to_string();
    let description =
        strip_html_tags(raw.get("description").and_then(Value::as_str).unwrap_or(""));
    let category =
        raw.get("productType").and_then(Value::as_str).unwrap_or("General").to_string();
    let iva_exempt = is_iva_exempt(&name);

    Product {
        sku,
        name,
        description,
        price,
        base_price: price,
        image_url,
        inventory,
        category,
        iva_exempt,
    }
}

/// Splits out products with a usable sku; the rest cannot be keyed and are
/// dropped with a count for the caller to report.
fn split_valid_products(products: Vec<Product>) -> (Vec<Product>, usize) {
    let before = products.len();
    let valid: Vec<Product> =
        products.into_iter().filter(|product| !product.sku.trim().is_empty()).collect();
    let excluded = before - valid.len();
    (valid, excluded)
}

/// Books and skateboards are IVA-exempt categories for this business.
fn is_iva_exempt(product_name: &str) -> bool {
    let name = product_name.to_lowercase();
    name.contains("libro") || name.contains("patineta")
}

fn strip_html_tags(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;

    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => text.push(ch),
            _ => {}
        }
    }

    for (entity, replacement) in [
        ("&nbsp;", " "),
        ("&amp;", "&"),
        ("&lt;", "<"),
        ("&gt;", ">"),
        ("&quot;", "\""),
        ("&#39;", "'"),
    ] {
        text = text.replace(entity, replacement);
    }

    text.trim().to_string()
}
