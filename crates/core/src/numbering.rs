use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Prefix used for any series label without an explicit table entry.
pub const FALLBACK_PREFIX: &str = "MED";

/// Exact-match prefix table over normalized series keys. Extend here when a
/// store gets its own numbering lane.
const PREFIX_TABLE: &[(&str, &str)] = &[("barranquilla", "BQ")];

/// Normalized storage key for a numbering series. Construction is the only
/// place labels are validated, so a `SeriesKey` in hand is always non-empty
/// and lower-cased.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesKey(String);

impl SeriesKey {
    pub fn parse(label: &str) -> Result<Self, DomainError> {
        let normalized = label.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(DomainError::InvalidSeriesLabel(label.to_string()));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn prefix(&self) -> &'static str {
        PREFIX_TABLE
            .iter()
            .find(|(label, _)| *label == self.0)
            .map(|(_, prefix)| *prefix)
            .unwrap_or(FALLBACK_PREFIX)
    }

    /// True when the series has no dedicated table entry and shares the
    /// fallback numbering lane.
    pub fn uses_fallback_prefix(&self) -> bool {
        PREFIX_TABLE.iter().all(|(label, _)| *label != self.0)
    }
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Human-readable quote identifier, e.g. `COT-BQ-0001`. The numeric part is
/// zero-padded to four digits and widens past 9999.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteNumber(pub String);

impl QuoteNumber {
    pub fn format(series: &SeriesKey, count: u64) -> Self {
        Self(format!("COT-{}-{:04}", series.prefix(), count))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QuoteNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
