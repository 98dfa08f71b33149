use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;

use cotizador_core::config::{AppConfig, LoadOptions};
use cotizador_core::domain::product::Product;
use cotizador_core::domain::quote::{Quote, QuoteId, QuoteLine, QuoteState};
use cotizador_core::domain::OwnerId;
use cotizador_db::repositories::{
    ProductRepository, QuoteRepository, SqlProductRepository, SqlQuoteRepository,
    SqlSequenceRepository,
};
use cotizador_db::{connect_with_settings, migrations, DbPool, QuoteNumberAllocator};

use crate::commands::CommandResult;

const SEED_OWNER: &str = "demo";

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let summary = seed_dataset(&pool).await;
        pool.close().await;
        summary
    });

    match result {
        Ok(summary) => CommandResult::success(
            "seed",
            format!(
                "seeded {} products and {} new quotes for owner `{SEED_OWNER}`",
                summary.products, summary.quotes_created
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

pub struct SeedSummary {
    pub products: usize,
    pub quotes_created: usize,
}

/// Loads the demo dataset. Quote ids are fixed, so re-running the command
/// never duplicates quotes or burns extra sequence numbers.
pub async fn seed_dataset(
    pool: &DbPool,
) -> Result<SeedSummary, (&'static str, String, u8)> {
    let owner = OwnerId(SEED_OWNER.to_string());

    let products = demo_products();
    let product_repo = SqlProductRepository::new(pool.clone());
    product_repo
        .upsert_catalog(&owner, &products, Utc::now())
        .await
        .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

    let quote_repo = SqlQuoteRepository::new(pool.clone());
    let allocator =
        QuoteNumberAllocator::new(Arc::new(SqlSequenceRepository::new(pool.clone())));

    let mut quotes_created = 0usize;
    for spec in demo_quotes() {
        let id = QuoteId(spec.id.to_string());
        let existing = quote_repo
            .find_by_id(&id)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        if existing.is_some() {
            continue;
        }

        let number = allocator
            .allocate(&owner, spec.store)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let now = Utc::now();
        let total: Decimal =
            spec.lines.iter().map(|line| Decimal::from(line.quantity) * line.unit_price).sum();
        let mut quote = Quote {
            id,
            owner_id: owner.clone(),
            store: spec.store.to_string(),
            number,
            client_name: spec.client_name.to_string(),
            client_email: Some(spec.client_email.to_string()),
            state: QuoteState::default(),
            lines: spec.lines,
            total,
            valid_until: None,
            sent_by_email: false,
            email_sent_to: None,
            email_message_id: None,
            created_at: now,
            updated_at: now,
        };

        for target in spec.transitions {
            quote
                .transition_to(target)
                .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        }

        quote_repo
            .save(quote)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        quotes_created += 1;
    }

    Ok(SeedSummary { products: products.len(), quotes_created })
}

struct QuoteSpec {
    id: &'static str,
    store: &'static str,
    client_name: &'static str,
    client_email: &'static str,
    lines: Vec<QuoteLine>,
    transitions: Vec<QuoteState>,
}

fn demo_products() -> Vec<Product> {
    vec![
        Product {
            sku: "DEMO-LIBRO-01".to_string(),
            name: "Libro mayor empastado".to_string(),
            description: "Libro contable de 200 folios".to_string(),
            price: Decimal::new(68_000_00, 2),
            base_price: Decimal::new(68_000_00, 2),
            image_url: String::new(),
            inventory: 40,
            category: "Papelería".to_string(),
            iva_exempt: true,
        },
        Product {
            sku: "DEMO-PATINETA-01".to_string(),
            name: "Patineta eléctrica urbana".to_string(),
            description: "Autonomía de 25 km".to_string(),
            price: Decimal::new(1_450_000_00, 2),
            base_price: Decimal::new(1_450_000_00, 2),
            image_url: String::new(),
            inventory: 6,
            category: "Movilidad".to_string(),
            iva_exempt: true,
        },
        Product {
            sku: "DEMO-SILLA-01".to_string(),
            name: "Silla ergonómica de oficina".to_string(),
            description: "Soporte lumbar ajustable".to_string(),
            price: Decimal::new(520_000_00, 2),
            base_price: Decimal::new(520_000_00, 2),
            image_url: String::new(),
            inventory: 18,
            category: "Mobiliario".to_string(),
            iva_exempt: false,
        },
    ]
}

fn demo_quotes() -> Vec<QuoteSpec> {
    vec![
        QuoteSpec {
            id: "seed-q-borrador",
            store: "Barranquilla",
            client_name: "Distribuciones Caribe",
            client_email: "compras@caribe.example",
            lines: vec![QuoteLine {
                sku: "DEMO-SILLA-01".to_string(),
                name: "Silla ergonómica de oficina".to_string(),
                quantity: 4,
                unit_price: Decimal::new(520_000_00, 2),
                iva_exempt: false,
            }],
            transitions: vec![],
        },
        QuoteSpec {
            id: "seed-q-enviada",
            store: "Barranquilla",
            client_name: "Ferretería El Puerto",
            client_email: "gerencia@elpuerto.example",
            lines: vec![QuoteLine {
                sku: "DEMO-LIBRO-01".to_string(),
                name: "Libro mayor empastado".to_string(),
                quantity: 10,
                unit_price: Decimal::new(68_000_00, 2),
                iva_exempt: true,
            }],
            transitions: vec![QuoteState::Enviada],
        },
        QuoteSpec {
            id: "seed-q-ganada",
            store: "Medellin",
            client_name: "Comercial Andina",
            client_email: "compras@andina.example",
            lines: vec![QuoteLine {
                sku: "DEMO-PATINETA-01".to_string(),
                name: "Patineta eléctrica urbana".to_string(),
                quantity: 2,
                unit_price: Decimal::new(1_450_000_00, 2),
                iva_exempt: true,
            }],
            transitions: vec![QuoteState::Enviada, QuoteState::Ganada],
        },
    ]
}
