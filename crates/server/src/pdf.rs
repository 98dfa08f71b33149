//! Quote rendering: tera HTML templates converted to PDF through
//! wkhtmltopdf when it is on PATH, with an HTML fallback otherwise.
//!
//! Endpoint:
//! - `GET /api/v1/quotes/{id}/pdf` — download the rendered quote

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tera::{Context, Tera};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{error, warn};

use cotizador_core::domain::quote::{Quote, QuoteId};
use cotizador_db::repositories::QuoteRepository;

/// Register custom Tera filters used by quote templates.
///
/// - `format`: printf-style formatting, e.g. `"%.2f" | format(value=price)`
/// - `money`:  2-decimal rendering that also accepts stringified decimals
pub fn register_template_filters(tera: &mut Tera) {
    tera.register_filter("format", tera_format_filter);
    tera.register_filter("money", tera_money_filter);
}

fn numeric_value(value: &tera::Value) -> f64 {
    match value {
        tera::Value::Number(number) => number.as_f64().unwrap_or(0.0),
        // Decimal totals serialize as strings; accept them here.
        tera::Value::String(raw) => raw.parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn tera_format_filter(
    value: &tera::Value,
    args: &HashMap<String, tera::Value>,
) -> tera::Result<tera::Value> {
    let format_str = value
        .as_str()
        .ok_or_else(|| tera::Error::msg("format filter expects a string input"))?;

    let num = args
        .get("value")
        .map(numeric_value)
        .ok_or_else(|| tera::Error::msg("format filter requires a 'value' argument"))?;

    let result = if let Some(rest) = format_str.strip_prefix("%.") {
        if let Some(precision_str) = rest.strip_suffix('f') {
            let precision: usize = precision_str.parse().unwrap_or(2);
            format!("{:.*}", precision, num)
        } else {
            format!("{}", num)
        }
    } else {
        format!("{}", num)
    };

    Ok(tera::Value::String(result))
}

fn tera_money_filter(
    value: &tera::Value,
    _args: &HashMap<String, tera::Value>,
) -> tera::Result<tera::Value> {
    Ok(tera::Value::String(format!("{:.2}", numeric_value(value))))
}

#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("template error: {0}")]
    Template(String),
    #[error("conversion error: {0}")]
    Conversion(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuoteTemplate {
    Detailed,
    Compact,
}

impl QuoteTemplate {
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Detailed => "detailed.html.tera",
            Self::Compact => "compact.html.tera",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "detailed" => Some(Self::Detailed),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

/// Rendered quote artifact. Callers pick the content type off the variant
/// when serving or attaching it.
pub enum PdfOutput {
    Pdf(Vec<u8>),
    Html(Vec<u8>),
}

impl PdfOutput {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Pdf(_) => "application/pdf",
            Self::Html(_) => "text/html; charset=utf-8",
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Pdf(bytes) | Self::Html(bytes) => bytes,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PdfGenerator {
    tera: Tera,
    wkhtmltopdf_path: Option<String>,
}

impl PdfGenerator {
    pub fn new(template_dir: &str) -> Result<Self, PdfError> {
        let mut tera = Tera::new(&format!("{}/**/*", template_dir))
            .map_err(|e| PdfError::Template(e.to_string()))?;

        register_template_filters(&mut tera);

        Ok(Self { tera, wkhtmltopdf_path: find_wkhtmltopdf() })
    }

    /// Generator backed by the templates compiled into the binary. Used by
    /// tests and as the fallback when no template directory is deployed.
    pub fn with_embedded_templates() -> Result<Self, PdfError> {
        let mut tera = Tera::default();
        register_template_filters(&mut tera);

        tera.add_raw_template(
            "detailed.html.tera",
            include_str!("../../../templates/quotes/detailed.html.tera"),
        )
        .map_err(|e| PdfError::Template(e.to_string()))?;

        tera.add_raw_template(
            "compact.html.tera",
            include_str!("../../../templates/quotes/compact.html.tera"),
        )
        .map_err(|e| PdfError::Template(e.to_string()))?;

        Ok(Self { tera, wkhtmltopdf_path: find_wkhtmltopdf() })
    }

    /// Filesystem templates when a `templates/quotes` directory is
    /// deployed next to the binary, embedded templates otherwise.
    pub fn with_default_templates() -> Result<Self, PdfError> {
        if let Ok(generator) = Self::new("templates/quotes") {
            if generator.tera.get_template_names().next().is_some() {
                return Ok(generator);
            }
        }
        Self::with_embedded_templates()
    }

    pub fn render_html(
        &self,
        quote: &Quote,
        template: QuoteTemplate,
    ) -> Result<String, PdfError> {
        let mut context = Context::new();
        context.insert("quote", quote);
        context.insert("estado_label", quote.state.style().label);
        context.insert("generated_at", &Utc::now().to_rfc3339());

        self.tera
            .render(template.file_name(), &context)
            .map_err(|e| PdfError::Template(e.to_string()))
    }

    /// Renders the quote and converts it to PDF when wkhtmltopdf is
    /// available; otherwise returns the HTML for browser-side printing.
    pub async fn generate(
        &self,
        quote: &Quote,
        template: QuoteTemplate,
    ) -> Result<PdfOutput, PdfError> {
        let html = self.render_html(quote, template)?;

        match &self.wkhtmltopdf_path {
            Some(path) => {
                let pdf = convert_html(path, &html).await?;
                Ok(PdfOutput::Pdf(pdf))
            }
            None => {
                warn!(
                    event_name = "pdf.html_fallback",
                    quote_number = %quote.number,
                    "wkhtmltopdf not found in PATH; returning HTML for browser rendering"
                );
                Ok(PdfOutput::Html(html.into_bytes()))
            }
        }
    }
}

#[derive(Clone)]
pub struct PdfState {
    quotes: Arc<dyn QuoteRepository>,
    generator: Option<Arc<PdfGenerator>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DownloadQuery {
    pub template: Option<String>,
}

pub fn router(quotes: Arc<dyn QuoteRepository>) -> Router {
    let generator = match PdfGenerator::with_default_templates() {
        Ok(generator) => Some(Arc::new(generator)),
        Err(pdf_error) => {
            warn!(
                event_name = "pdf.generator_unavailable",
                error = %pdf_error,
                "quote templates failed to load; downloads will be rejected"
            );
            None
        }
    };

    Router::new()
        .route("/api/v1/quotes/{id}/pdf", get(download_quote))
        .with_state(PdfState { quotes, generator })
}

pub async fn download_quote(
    State(state): State<PdfState>,
    Path(id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Response {
    let Some(generator) = state.generator.clone() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "quote templates are unavailable" })),
        )
            .into_response();
    };

    let template = match query.template.as_deref() {
        None => QuoteTemplate::Detailed,
        Some(raw) => match QuoteTemplate::parse(raw) {
            Some(template) => template,
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("unknown template `{raw}`") })),
                )
                    .into_response();
            }
        },
    };

    let quote = match state.quotes.find_by_id(&QuoteId(id)).await {
        Ok(Some(quote)) => quote,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, Json(json!({ "error": "quote not found" })))
                .into_response();
        }
        Err(db_error) => {
            error!(
                event_name = "pdf.repository_error",
                error = %db_error,
                "quote lookup failed before rendering"
            );
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "persistence is temporarily unavailable" })),
            )
                .into_response();
        }
    };

    match generator.generate(&quote, template).await {
        Ok(output) => {
            let disposition = format!("inline; filename=\"{}.pdf\"", quote.number);
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, output.content_type())
                .header(header::CONTENT_DISPOSITION, disposition)
                .body(Body::from(output.into_bytes()))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(pdf_error) => {
            error!(
                event_name = "pdf.render_failed",
                quote_number = %quote.number,
                error = %pdf_error,
                "quote rendering failed"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "quote rendering failed" })))
                .into_response()
        }
    }
}

fn find_wkhtmltopdf() -> Option<String> {
    which::which("wkhtmltopdf").ok().map(|path| path.to_string_lossy().to_string())
}

async fn convert_html(wkhtmltopdf_path: &str, html: &str) -> Result<Vec<u8>, PdfError> {
    let mut child = Command::new(wkhtmltopdf_path)
        .arg("--quiet")
        .arg("--encoding")
        .arg("utf-8")
        .arg("-")
        .arg("-")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(html.as_bytes()).await?;
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(PdfError::Conversion(String::from_utf8_lossy(&output.stderr).to_string()));
    }

    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use cotizador_core::domain::quote::{Quote, QuoteId, QuoteLine, QuoteState};
    use cotizador_core::domain::OwnerId;
    use cotizador_core::numbering::{QuoteNumber, SeriesKey};

    use super::{
        tera_format_filter, tera_money_filter, PdfGenerator, QuoteTemplate,
    };

    fn sample_quote() -> Quote {
        let series = SeriesKey::parse("Barranquilla").expect("valid series");
        Quote {
            id: QuoteId("q-pdf".to_string()),
            owner_id: OwnerId("u-pdf".to_string()),
            store: "Barranquilla".to_string(),
            number: QuoteNumber::format(&series, 7),
            client_name: "Almacenes La Costa".to_string(),
            client_email: Some("gerencia@lacosta.example".to_string()),
            state: QuoteState::Borrador,
            lines: vec![QuoteLine {
                sku: "SKU-PDF".to_string(),
                name: "Escritorio en L".to_string(),
                quantity: 2,
                unit_price: Decimal::new(48_990, 2),
                iva_exempt: false,
            }],
            total: Decimal::new(97_980, 2),
            valid_until: None,
            sent_by_email: false,
            email_sent_to: None,
            email_message_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn money_filter_accepts_numbers_and_decimal_strings() {
        let args = HashMap::new();

        let from_number =
            tera_money_filter(&tera::Value::from(489.9), &args).expect("number input");
        assert_eq!(from_number, tera::Value::String("489.90".to_string()));

        let from_string =
            tera_money_filter(&tera::Value::String("489.90".to_string()), &args)
                .expect("string input");
        assert_eq!(from_string, tera::Value::String("489.90".to_string()));

        let from_null = tera_money_filter(&tera::Value::Null, &args).expect("null input");
        assert_eq!(from_null, tera::Value::String("0.00".to_string()));
    }

    #[test]
    fn format_filter_honors_precision() {
        let mut args = HashMap::new();
        args.insert("value".to_string(), tera::Value::from(12.3456));

        let formatted =
            tera_format_filter(&tera::Value::String("%.1f".to_string()), &args).expect("format");
        assert_eq!(formatted, tera::Value::String("12.3".to_string()));
    }

    #[test]
    fn embedded_templates_render_the_quote() {
        let generator = PdfGenerator::with_embedded_templates().expect("embedded templates");
        let quote = sample_quote();

        for template in [QuoteTemplate::Detailed, QuoteTemplate::Compact] {
            let html = generator.render_html(&quote, template).expect("render");
            assert!(html.contains("COT-BQ-0007"), "rendered html must show the quote number");
            assert!(html.contains("Almacenes La Costa"), "rendered html must show the client");
        }
    }

    #[test]
    fn template_names_parse_from_query_values() {
        assert_eq!(QuoteTemplate::parse("detailed"), Some(QuoteTemplate::Detailed));
        assert_eq!(QuoteTemplate::parse("compact"), Some(QuoteTemplate::Compact));
        assert_eq!(QuoteTemplate::parse("striped"), None);
    }

    #[tokio::test]
    async fn download_returns_not_found_for_missing_quotes() {
        use std::sync::Arc;

        use axum::extract::{Path, Query, State};
        use axum::http::StatusCode;
        use cotizador_db::repositories::InMemoryQuoteRepository;

        use super::{download_quote, DownloadQuery, PdfGenerator, PdfState};

        let state = PdfState {
            quotes: Arc::new(InMemoryQuoteRepository::default()),
            generator: Some(Arc::new(
                PdfGenerator::with_embedded_templates().expect("templates"),
            )),
        };

        let response = download_quote(
            State(state),
            Path("q-missing".to_string()),
            Query(DownloadQuery::default()),
        )
        .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn download_serves_the_rendered_quote() {
        use std::sync::Arc;

        use axum::extract::{Path, Query, State};
        use axum::http::{header, StatusCode};
        use cotizador_db::repositories::{InMemoryQuoteRepository, QuoteRepository};

        use super::{download_quote, DownloadQuery, PdfGenerator, PdfState};

        let quotes = Arc::new(InMemoryQuoteRepository::default());
        quotes.save(sample_quote()).await.expect("save quote");

        let state = PdfState {
            quotes,
            generator: Some(Arc::new(
                PdfGenerator::with_embedded_templates().expect("templates"),
            )),
        };

        let response = download_quote(
            State(state),
            Path("q-pdf".to_string()),
            Query(DownloadQuery { template: Some("compact".to_string()) }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(
            content_type.starts_with("application/pdf") || content_type.starts_with("text/html"),
            "unexpected content type `{content_type}`",
        );
    }
}
