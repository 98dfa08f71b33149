use serde::Serialize;

use crate::domain::quote::{Quote, QuoteState};

/// Dashboard aggregate over a collection of quotes. `total` counts every
/// input row; the per-state counters only count rows whose stored state
/// parsed into a known [`QuoteState`].
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct QuoteMetrics {
    pub borradores: u64,
    pub enviadas: u64,
    pub ganadas: u64,
    pub perdidas: u64,
    pub total: u64,
    #[serde(rename = "conversionRate")]
    pub conversion_rate: f64,
}

impl QuoteMetrics {
    /// Computes metrics from decoded states. `None` marks a row whose raw
    /// state was missing or unrecognized; it still counts toward `total`.
    pub fn from_states<I>(states: I) -> Self
    where
        I: IntoIterator<Item = Option<QuoteState>>,
    {
        let mut metrics = Self::default();

        for state in states {
            metrics.total += 1;
            match state {
                Some(QuoteState::Borrador) => metrics.borradores += 1,
                Some(QuoteState::Enviada) => metrics.enviadas += 1,
                Some(QuoteState::Ganada) => metrics.ganadas += 1,
                Some(QuoteState::Perdida) => metrics.perdidas += 1,
                None => {}
            }
        }

        let decided = metrics.ganadas + metrics.perdidas;
        metrics.conversion_rate = if decided == 0 {
            0.0
        } else {
            // One decimal place, matching the dashboard's display contract.
            (metrics.ganadas as f64 / decided as f64 * 1000.0).round() / 10.0
        };

        metrics
    }

    pub fn from_quotes<'a, I>(quotes: I) -> Self
    where
        I: IntoIterator<Item = &'a Quote>,
    {
        Self::from_states(quotes.into_iter().map(|quote| Some(quote.state)))
    }
}
