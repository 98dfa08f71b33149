//! Transactional email delivery of quotes with the rendered PDF attached.
//!
//! Endpoint:
//! - `POST /api/v1/quotes/{id}/email` — render, send, and mark the quote
//!   as sent through the validated state transition.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Datelike, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tera::{Context, Tera};
use tracing::{error, info, warn};

use cotizador_core::config::EmailConfig;
use cotizador_core::domain::quote::{Quote, QuoteId, QuoteState};
use cotizador_db::repositories::QuoteRepository;

use crate::pdf::{PdfGenerator, QuoteTemplate};

#[derive(Clone)]
struct EmailRuntimeConfig {
    api_key: Option<SecretString>,
    from_email: String,
    from_name: String,
    base_url: String,
}

impl From<&EmailConfig> for EmailRuntimeConfig {
    fn from(config: &EmailConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            from_email: config.from_email.clone(),
            from_name: config.from_name.clone(),
            base_url: config.base_url.clone(),
        }
    }
}

#[derive(Clone)]
pub struct EmailState {
    quotes: Arc<dyn QuoteRepository>,
    config: EmailRuntimeConfig,
    client: Client,
    pdf_generator: Option<Arc<PdfGenerator>>,
    templates: Arc<Tera>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SendEmailRequest {
    pub reply_to: Option<String>,
    pub template: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendEmailResponse {
    pub success: bool,
    pub message: String,
    pub email_id: String,
}

#[derive(Debug, thiserror::Error)]
enum SendError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Provider(String),
}

fn init_email_templates() -> Arc<Tera> {
    let mut tera = Tera::default();
    if let Err(template_error) = tera.add_raw_template(
        "quote_email.html.tera",
        include_str!("../../../templates/email/quote_email.html.tera"),
    ) {
        warn!(
            event_name = "email.template_load_failed",
            error = %template_error,
            "email body template failed to load; sends will fail until fixed"
        );
    }
    Arc::new(tera)
}

pub fn router(quotes: Arc<dyn QuoteRepository>, config: &EmailConfig) -> Router {
    let pdf_generator = match PdfGenerator::with_default_templates() {
        Ok(generator) => Some(Arc::new(generator)),
        Err(pdf_error) => {
            warn!(
                event_name = "email.pdf_generator_unavailable",
                error = %pdf_error,
                "quote templates failed to load; email sends will be rejected"
            );
            None
        }
    };

    Router::new().route("/api/v1/quotes/{id}/email", post(send_quote_email)).with_state(
        EmailState {
            quotes,
            config: EmailRuntimeConfig::from(config),
            client: Client::new(),
            pdf_generator,
            templates: init_email_templates(),
        },
    )
}

pub async fn send_quote_email(
    State(state): State<EmailState>,
    Path(id): Path<String>,
    request: Option<Json<SendEmailRequest>>,
) -> Result<(StatusCode, Json<SendEmailResponse>), (StatusCode, Json<Value>)> {
    let request = request.map(|Json(inner)| inner).unwrap_or_default();

    let Some(api_key) = state.config.api_key.clone() else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "email delivery is not configured" })),
        ));
    };
    let Some(pdf_generator) = state.pdf_generator.clone() else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "quote templates are unavailable" })),
        ));
    };

    let mut quote = match state.quotes.find_by_id(&QuoteId(id)).await {
        Ok(Some(quote)) => quote,
        Ok(None) => {
            return Err((
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "quote not found" })),
            ));
        }
        Err(db_error) => {
            error!(
                event_name = "email.repository_error",
                error = %db_error,
                "quote lookup failed before email send"
            );
            return Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "persistence is temporarily unavailable" })),
            ));
        }
    };

    let Some(recipient) = quote.client_email.clone().filter(|value| value.contains('@')) else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "the quote has no valid client email address" })),
        ));
    };

    let template = request
        .template
        .as_deref()
        .map(|raw| {
            QuoteTemplate::parse(raw).ok_or_else(|| {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("unknown template `{raw}`") })),
                )
            })
        })
        .transpose()?
        .unwrap_or(QuoteTemplate::Detailed);

    let pdf = match pdf_generator.generate(&quote, template).await {
        Ok(output) => output.into_bytes(),
        Err(pdf_error) => {
            error!(
                event_name = "email.pdf_render_failed",
                quote_number = %quote.number,
                error = %pdf_error,
                "quote rendering failed before email send"
            );
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "quote rendering failed" })),
            ));
        }
    };

    let body = match render_email_body(&state.templates, &state.config, &quote) {
        Ok(body) => body,
        Err(template_error) => {
            error!(
                event_name = "email.body_render_failed",
                error = %template_error,
                "email body rendering failed"
            );
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "email body rendering failed" })),
            ));
        }
    };

    let payload = build_send_payload(
        &state.config,
        &quote,
        &recipient,
        request.reply_to.as_deref(),
        &body,
        &pdf,
    );

    let email_id = match deliver(&state.client, &state.config, &api_key, &payload).await {
        Ok(email_id) => email_id,
        Err(send_error) => {
            error!(
                event_name = "email.send_failed",
                quote_number = %quote.number,
                error = %send_error,
                "provider rejected the email send"
            );
            return Err((
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": send_error.to_string() })),
            ));
        }
    };

    // The transition table governs the state change; a quote already
    // decided keeps its state but still records the delivery.
    if quote.state != QuoteState::Enviada && quote.can_transition_to(QuoteState::Enviada) {
        let _ = quote.transition_to(QuoteState::Enviada);
    }
    quote.sent_by_email = true;
    quote.email_sent_to = Some(recipient.clone());
    quote.email_message_id = Some(email_id.clone());
    quote.updated_at = Utc::now();

    if let Err(db_error) = state.quotes.save(quote.clone()).await {
        error!(
            event_name = "email.delivery_record_failed",
            quote_number = %quote.number,
            error = %db_error,
            "email was sent but the delivery record could not be persisted"
        );
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "email sent but persistence failed; retry the status update" })),
        ));
    }

    info!(
        event_name = "email.sent",
        quote_number = %quote.number,
        recipient = %recipient,
        email_id = %email_id,
        "quote email delivered"
    );

    Ok((
        StatusCode::OK,
        Json(SendEmailResponse {
            success: true,
            message: format!("Email enviado exitosamente a {recipient}"),
            email_id,
        }),
    ))
}

fn render_email_body(
    templates: &Tera,
    config: &EmailRuntimeConfig,
    quote: &Quote,
) -> Result<String, tera::Error> {
    let mut context = Context::new();
    context.insert("client_name", &quote.client_name);
    context.insert("quote_number", quote.number.as_str());
    context.insert("total_formateado", &format_cop(quote.total));
    context.insert("fecha_actual", &format_date_es(Utc::now()));
    context.insert(
        "fecha_vencimiento",
        &quote.valid_until.map(format_date_es).unwrap_or_else(|| "No especificado".to_string()),
    );
    context.insert("from_name", &config.from_name);

    templates.render("quote_email.html.tera", &context)
}

fn build_send_payload(
    config: &EmailRuntimeConfig,
    quote: &Quote,
    recipient: &str,
    reply_to: Option<&str>,
    html_body: &str,
    pdf: &[u8],
) -> Value {
    json!({
        "from": format!("{} <{}>", config.from_name, config.from_email),
        "to": [recipient],
        "reply_to": reply_to.unwrap_or(&config.from_email),
        "subject": format!("Cotización {} - {}", quote.number, quote.client_name),
        "html": html_body,
        "attachments": [{
            "filename": format!("{}.pdf", quote.number),
            "content": BASE64.encode(pdf),
        }],
    })
}

async fn deliver(
    client: &Client,
    config: &EmailRuntimeConfig,
    api_key: &SecretString,
    payload: &Value,
) -> Result<String, SendError> {
    let response = client
        .post(format!("{}/emails", config.base_url))
        .bearer_auth(api_key.expose_secret())
        .json(payload)
        .send()
        .await?;

    let status = response.status().as_u16();
    if !response.status().is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SendError::Provider(classify_provider_error(status, &body)));
    }

    let body: Value = response.json().await?;
    Ok(body.get("id").and_then(Value::as_str).unwrap_or("unknown").to_string())
}

/// Maps provider failures to messages an operator can act on.
fn classify_provider_error(status: u16, body: &str) -> String {
    let lowered = body.to_lowercase();
    if lowered.contains("invalid email") || lowered.contains("invalid `to`") {
        return "Email inválido. Verifica la dirección de correo.".to_string();
    }
    if status == 401 || status == 403 || lowered.contains("api key") {
        return "Error de configuración del servicio de email.".to_string();
    }
    format!("Error al enviar email (status {status})")
}

/// es-CO money rendering: dot thousands separators, comma decimals.
fn format_cop(amount: Decimal) -> String {
    let raw = format!("{:.2}", amount.round_dp(2));
    let (int_part, dec_part) = match raw.split_once('.') {
        Some((int_part, dec_part)) => (int_part, dec_part),
        None => (raw.as_str(), "00"),
    };

    let negative = int_part.starts_with('-');
    let digits = int_part.trim_start_matches('-');

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index != 0 && (digits.len() - index) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    format!("{}{grouped},{dec_part}", if negative { "-" } else { "" })
}

/// es-CO long date, e.g. `7 de agosto de 2026`.
fn format_date_es(date: DateTime<Utc>) -> String {
    const MONTHS: [&str; 12] = [
        "enero",
        "febrero",
        "marzo",
        "abril",
        "mayo",
        "junio",
        "julio",
        "agosto",
        "septiembre",
        "octubre",
        "noviembre",
        "diciembre",
    ];

    let month = MONTHS[(date.month0()) as usize];
    format!("{} de {} de {}", date.day(), month, date.year())
}
