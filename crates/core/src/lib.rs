pub mod config;
pub mod domain;
pub mod errors;
pub mod metrics;
pub mod numbering;

pub use domain::product::Product;
pub use domain::quote::{Quote, QuoteId, QuoteLine, QuoteState, StateStyle};
pub use domain::OwnerId;
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use metrics::QuoteMetrics;
pub use numbering::{QuoteNumber, SeriesKey, FALLBACK_PREFIX};
