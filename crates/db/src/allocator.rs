use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use cotizador_core::domain::OwnerId;
use cotizador_core::errors::DomainError;
use cotizador_core::numbering::{QuoteNumber, SeriesKey};

use crate::repositories::{RepositoryError, SequenceRepository};

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error(transparent)]
    InvalidSeries(#[from] DomainError),
    #[error("allocation conflict for owner `{owner}` series `{series}`: {detail}")]
    Conflict { owner: String, series: String, detail: String },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Mints human-readable quote numbers on top of the shared counter store.
/// Formatting and prefix choice are pure; the only await is the store's
/// transactional increment.
pub struct QuoteNumberAllocator {
    sequences: Arc<dyn SequenceRepository>,
}

impl QuoteNumberAllocator {
    pub fn new(sequences: Arc<dyn SequenceRepository>) -> Self {
        Self { sequences }
    }

    /// Returns the next number for the owner's series, e.g. `COT-BQ-0007`.
    ///
    /// The label is validated before any store access. A conflict after the
    /// store's retry budget surfaces as [`AllocationError::Conflict`]; the
    /// counter is untouched in that case, so the caller may retry the whole
    /// operation without risking a duplicate or a skipped number.
    pub async fn allocate(
        &self,
        owner_id: &OwnerId,
        series_label: &str,
    ) -> Result<QuoteNumber, AllocationError> {
        let series = SeriesKey::parse(series_label)?;

        if series.uses_fallback_prefix() {
            debug!(
                event_name = "numbering.fallback_prefix",
                series = %series,
                "series label has no dedicated prefix; numbering in the shared fallback lane"
            );
        }

        let count = match self.sequences.allocate_next(owner_id, &series).await {
            Ok(count) => count,
            Err(RepositoryError::Conflict(detail)) => {
                return Err(AllocationError::Conflict {
                    owner: owner_id.0.clone(),
                    series: series.to_string(),
                    detail,
                });
            }
            Err(error) => return Err(error.into()),
        };

        Ok(QuoteNumber::format(&series, count))
    }
}
