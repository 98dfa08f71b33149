//! AI-generated business insights over the owner's catalog and quote
//! history.
//!
//! Endpoint:
//! - `POST /api/v1/insights` — build the analysis dataset, call the
//!   configured OpenAI-compatible model, and return the structured
//!   insight list.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

use cotizador_core::config::InsightsConfig;
use cotizador_core::domain::OwnerId;
use cotizador_core::metrics::QuoteMetrics;
use cotizador_db::repositories::{ProductRepository, QuoteRepository};

const SYSTEM_PROMPT: &str = "Eres un analista de negocios experto en CPQ, ventas B2B y \
optimización de catálogos de productos. Analiza profundamente los datos y genera insights \
que el usuario no vería en un dashboard simple: productos que se cotizan pero no se ganan, \
productos ganadores, clientes fríos, oportunidades de bundle y de upselling. Usa nombres \
específicos y números concretos; cada insight debe ser accionable. Si no hay datos \
suficientes para un análisis, dilo explícitamente. Responde SIEMPRE en español y en \
formato JSON válido con la forma {\"resumen\": string, \"insights\": [{\"categoria\", \
\"titulo\", \"detalle\", \"accion\", \"prioridad\"}]}.";

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, InsightsError>;
}

#[derive(Debug, thiserror::Error)]
pub enum InsightsError {
    #[error("insight dataset is too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("llm request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("llm returned status {status}")]
    Provider { status: u16 },
    #[error("llm response was not in the expected shape: {0}")]
    ResponseShape(String),
}

pub struct OpenAiCompatibleClient {
    client: Client,
    api_key: SecretString,
    base_url: String,
    model: String,
}

impl OpenAiCompatibleClient {
    pub fn new(config: &InsightsConfig, api_key: SecretString) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .unwrap_or_default(),
            api_key,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, InsightsError> {
        let body = json!({
            "model": self.model,
            "temperature": 0.4,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt },
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(InsightsError::Provider { status: response.status().as_u16() });
        }

        let payload: Value = response.json().await?;
        payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                InsightsError::ResponseShape("missing choices[0].message.content".to_string())
            })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insight {
    pub categoria: String,
    pub titulo: String,
    pub detalle: String,
    pub accion: String,
    #[serde(default)]
    pub prioridad: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessInsights {
    #[serde(default)]
    pub resumen: Option<String>,
    #[serde(default)]
    pub insights: Vec<Insight>,
}

pub struct InsightsEngine {
    llm: Arc<dyn LlmClient>,
    max_payload_bytes: usize,
}

impl InsightsEngine {
    pub fn new(llm: Arc<dyn LlmClient>, max_payload_bytes: usize) -> Self {
        Self { llm, max_payload_bytes }
    }

    pub async fn generate(&self, dataset: &Value) -> Result<BusinessInsights, InsightsError> {
        let serialized = dataset.to_string();
        if serialized.len() > self.max_payload_bytes {
            return Err(InsightsError::PayloadTooLarge {
                size: serialized.len(),
                max: self.max_payload_bytes,
            });
        }

        let user_prompt = build_user_prompt(&serialized);
        let content = self.llm.complete_json(SYSTEM_PROMPT, &user_prompt).await?;
        parse_insights(&content)
    }
}

fn build_user_prompt(dataset_json: &str) -> String {
    format!(
        "Analiza profundamente estos datos de mi negocio CPQ y genera insights valiosos.\n\
         Prioriza: los productos más cotizados y su tasa de aprobación, productos con baja \
         conversión, clientes que cotizan mucho pero no compran, y oportunidades de \
         cross-selling.\n\nDatos:\n{dataset_json}"
    )
}

/// Models sometimes wrap the JSON answer in a markdown code fence even when
/// asked not to; unwrap it before parsing.
fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn parse_insights(content: &str) -> Result<BusinessInsights, InsightsError> {
    serde_json::from_str::<BusinessInsights>(strip_code_fences(content))
        .map_err(|parse_error| InsightsError::ResponseShape(parse_error.to_string()))
}

#[derive(Clone)]
pub struct InsightsState {
    quotes: Arc<dyn QuoteRepository>,
    products: Arc<dyn ProductRepository>,
    engine: Option<Arc<InsightsEngine>>,
}

#[derive(Debug, Deserialize)]
pub struct InsightsRequest {
    pub owner_id: String,
}

pub fn router(
    quotes: Arc<dyn QuoteRepository>,
    products: Arc<dyn ProductRepository>,
    config: &InsightsConfig,
) -> Router {
    let engine = match (config.enabled, &config.api_key) {
        (true, Some(api_key)) => {
            let llm = Arc::new(OpenAiCompatibleClient::new(config, api_key.clone()));
            Some(Arc::new(InsightsEngine::new(llm, config.max_payload_bytes)))
        }
        _ => None,
    };

    Router::new()
        .route("/api/v1/insights", post(generate_insights))
        .with_state(InsightsState { quotes, products, engine })
}

pub async fn generate_insights(
    State(state): State<InsightsState>,
    Json(request): Json<InsightsRequest>,
) -> Result<(StatusCode, Json<BusinessInsights>), (StatusCode, Json<Value>)> {
    let Some(engine) = state.engine.clone() else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "insight generation is not configured" })),
        ));
    };

    if request.owner_id.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, Json(json!({ "error": "owner_id is required" }))));
    }

    let owner_id = OwnerId(request.owner_id.clone());
    let dataset = match build_dataset(&state, &owner_id).await {
        Ok(dataset) => dataset,
        Err(db_message) => {
            error!(
                event_name = "insights.dataset_error",
                owner_id = %request.owner_id,
                error = %db_message,
                "insight dataset assembly failed"
            );
            return Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "persistence is temporarily unavailable" })),
            ));
        }
    };

    match engine.generate(&dataset).await {
        Ok(insights) => {
            info!(
                event_name = "insights.generated",
                owner_id = %request.owner_id,
                insight_count = insights.insights.len(),
                "business insights generated"
            );
            Ok((StatusCode::OK, Json(insights)))
        }
        Err(InsightsError::PayloadTooLarge { size, max }) => Err((
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(json!({ "error": "dataset too large", "size": size, "max": max })),
        )),
        Err(llm_error) => {
            error!(
                event_name = "insights.llm_error",
                owner_id = %request.owner_id,
                error = %llm_error,
                "insight generation failed"
            );
            Err((StatusCode::BAD_GATEWAY, Json(json!({ "error": llm_error.to_string() }))))
        }
    }
}

async fn build_dataset(state: &InsightsState, owner_id: &OwnerId) -> Result<Value, String> {
    let products =
        state.products.list_for_owner(owner_id).await.map_err(|error| error.to_string())?;
    let quotes =
        state.quotes.list_for_owner(owner_id, None).await.map_err(|error| error.to_string())?;
    let states =
        state.quotes.states_for_owner(owner_id).await.map_err(|error| error.to_string())?;
    let metrics = QuoteMetrics::from_states(states);

    Ok(json!({
        "metricas": metrics,
        "productos": products.iter().map(|product| json!({
            "sku": product.sku,
            "nombre": product.name,
            "precio": product.price,
            "categoria": product.category,
            "inventario": product.inventory,
        })).collect::<Vec<_>>(),
        "cotizaciones": quotes.iter().map(|quote| json!({
            "numero": quote.number,
            "cliente": quote.client_name,
            "estado": quote.state.as_str(),
            "total": quote.total,
            "tienda": quote.store,
            "items": quote.lines.iter().map(|line| json!({
                "sku": line.sku,
                "cantidad": line.quantity,
            })).collect::<Vec<_>>(),
        })).collect::<Vec<_>>(),
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::Json;
    use serde_json::json;

    use cotizador_db::repositories::{InMemoryProductRepository, InMemoryQuoteRepository};

    use super::{
        generate_insights, parse_insights, strip_code_fences, InsightsEngine, InsightsError,
        InsightsRequest, InsightsState, LlmClient,
    };

    struct StubLlm {
        response: String,
        prompts: Mutex<Vec<(String, String)>>,
    }

    impl StubLlm {
        fn new(response: &str) -> Self {
            Self { response: response.to_string(), prompts: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait::async_trait]
    impl LlmClient for StubLlm {
        async fn complete_json(
            &self,
            system_prompt: &str,
            user_prompt: &str,
        ) -> Result<String, InsightsError> {
            self.prompts
                .lock()
                .expect("prompt lock")
                .push((system_prompt.to_string(), user_prompt.to_string()));
            Ok(self.response.clone())
        }
    }

    const SAMPLE_RESPONSE: &str = r#"{
        "resumen": "Dos productos concentran las ventas.",
        "insights": [{
            "categoria": "productos",
            "titulo": "La patineta convierte mejor",
            "detalle": "La patineta eléctrica se gana en el 75% de las cotizaciones.",
            "accion": "Destacarla en el catálogo.",
            "prioridad": "alta"
        }]
    }"#;

    #[test]
    fn parses_plain_json_responses() {
        let insights = parse_insights(SAMPLE_RESPONSE).expect("parse");
        assert_eq!(insights.insights.len(), 1);
        assert_eq!(insights.insights[0].categoria, "productos");
        assert_eq!(insights.resumen.as_deref(), Some("Dos productos concentran las ventas."));
    }

    #[test]
    fn unwraps_markdown_code_fences() {
        let fenced = format!("```json\n{SAMPLE_RESPONSE}\n```");
        assert_eq!(strip_code_fences(&fenced), SAMPLE_RESPONSE.trim());

        let insights = parse_insights(&fenced).expect("parse fenced");
        assert_eq!(insights.insights.len(), 1);
    }

    #[test]
    fn malformed_responses_are_shape_errors() {
        let error = parse_insights("the model refused").expect_err("must fail");
        assert!(matches!(error, InsightsError::ResponseShape(_)));
    }

    #[tokio::test]
    async fn engine_guards_the_dataset_size() {
        let llm = Arc::new(StubLlm::new(SAMPLE_RESPONSE));
        let engine = InsightsEngine::new(llm.clone(), 16);

        let error = engine
            .generate(&json!({ "datos": "x".repeat(64) }))
            .await
            .expect_err("oversized dataset must fail");

        assert!(matches!(error, InsightsError::PayloadTooLarge { .. }));
        assert!(llm.prompts.lock().expect("prompt lock").is_empty(), "llm must not be called");
    }

    #[tokio::test]
    async fn engine_sends_the_dataset_inside_the_user_prompt() {
        let llm = Arc::new(StubLlm::new(SAMPLE_RESPONSE));
        let engine = InsightsEngine::new(llm.clone(), 500_000);

        let insights = engine
            .generate(&json!({ "productos": [{ "sku": "SKU-7" }] }))
            .await
            .expect("generate");
        assert_eq!(insights.insights.len(), 1);

        let prompts = llm.prompts.lock().expect("prompt lock");
        let (system_prompt, user_prompt) = &prompts[0];
        assert!(system_prompt.contains("analista de negocios"));
        assert!(user_prompt.contains("SKU-7"), "dataset must be embedded in the prompt");
    }

    #[tokio::test]
    async fn endpoint_refuses_when_not_configured() {
        let state = InsightsState {
            quotes: Arc::new(InMemoryQuoteRepository::default()),
            products: Arc::new(InMemoryProductRepository::default()),
            engine: None,
        };

        let (status, _) = generate_insights(
            State(state),
            Json(InsightsRequest { owner_id: "u-1".to_string() }),
        )
        .await
        .expect_err("unconfigured insights must fail");

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
