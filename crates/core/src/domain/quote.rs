use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::OwnerId;
use crate::errors::DomainError;
use crate::numbering::QuoteNumber;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteId(pub String);

/// Lifecycle state of a quote. Stored and serialized under its Spanish
/// display name, which is also the value the dashboard and PDF surfaces
/// render.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuoteState {
    Borrador,
    Enviada,
    Ganada,
    Perdida,
}

/// Presentation metadata for a state. Not load-bearing; the badge kinds
/// match the web client's component library.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateStyle {
    pub badge: &'static str,
    pub icon: &'static str,
    pub label: &'static str,
}

impl Default for QuoteState {
    fn default() -> Self {
        Self::Borrador
    }
}

impl QuoteState {
    pub const ALL: [QuoteState; 4] =
        [Self::Borrador, Self::Enviada, Self::Ganada, Self::Perdida];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Borrador => "Borrador",
            Self::Enviada => "Enviada",
            Self::Ganada => "Ganada",
            Self::Perdida => "Perdida",
        }
    }

    /// Parses a stored state value. Unknown or empty values yield `None`;
    /// consumers decide whether that means "default" (quote decoding) or
    /// "excluded" (metrics).
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == raw)
    }

    /// States this state may legally move to. Reopening a decided quote
    /// goes back through `Enviada`; a draft may be decided directly
    /// without ever being sent.
    pub fn allowed_transitions(&self) -> &'static [QuoteState] {
        match self {
            Self::Borrador => &[Self::Enviada, Self::Ganada, Self::Perdida],
            Self::Enviada => &[Self::Ganada, Self::Perdida, Self::Borrador],
            Self::Ganada => &[Self::Enviada],
            Self::Perdida => &[Self::Enviada],
        }
    }

    pub fn can_transition_to(&self, next: QuoteState) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// String-level transition check over raw stored values. Total: an
    /// unknown value is never a legal source or target.
    pub fn transition_allowed(from: &str, to: &str) -> bool {
        match (Self::parse(from), Self::parse(to)) {
            (Some(from), Some(to)) => from.can_transition_to(to),
            _ => false,
        }
    }

    pub fn style(&self) -> StateStyle {
        match self {
            Self::Borrador => {
                StateStyle { badge: "secondary", icon: "📝", label: "Borrador" }
            }
            Self::Enviada => StateStyle { badge: "default", icon: "📨", label: "Enviada" },
            Self::Ganada => StateStyle { badge: "outline", icon: "✅", label: "Ganada" },
            Self::Perdida => {
                StateStyle { badge: "destructive", icon: "❌", label: "Perdida" }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuoteLine {
    pub sku: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub iva_exempt: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    pub owner_id: OwnerId,
    /// Store/branch label the quote number series was minted from.
    pub store: String,
    pub number: QuoteNumber,
    pub client_name: String,
    pub client_email: Option<String>,
    pub state: QuoteState,
    pub lines: Vec<QuoteLine>,
    pub total: Decimal,
    pub valid_until: Option<DateTime<Utc>>,
    pub sent_by_email: bool,
    pub email_sent_to: Option<String>,
    pub email_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quote {
    pub fn can_transition_to(&self, next: QuoteState) -> bool {
        self.state.can_transition_to(next)
    }

    pub fn transition_to(&mut self, next: QuoteState) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.state = next;
            return Ok(());
        }

        Err(DomainError::InvalidQuoteTransition { from: self.state, to: next })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::domain::OwnerId;
    use crate::numbering::{QuoteNumber, SeriesKey};

    use super::{Quote, QuoteId, QuoteLine, QuoteState};

    fn quote(state: QuoteState) -> Quote {
        let series = SeriesKey::parse("Barranquilla").expect("valid series");
        Quote {
            id: QuoteId("q-1".to_string()),
            owner_id: OwnerId("u-1".to_string()),
            store: "Barranquilla".to_string(),
            number: QuoteNumber::format(&series, 1),
            client_name: "Distribuciones Caribe".to_string(),
            client_email: Some("compras@caribe.example".to_string()),
            state,
            lines: vec![QuoteLine {
                sku: "SKU-100".to_string(),
                name: "Patineta eléctrica".to_string(),
                quantity: 2,
                unit_price: Decimal::new(185_000, 2),
                iva_exempt: true,
            }],
            total: Decimal::new(370_000, 2),
            valid_until: None,
            sent_by_email: false,
            email_sent_to: None,
            email_message_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn draft_may_be_sent_or_decided_directly() {
        assert!(QuoteState::Borrador.can_transition_to(QuoteState::Enviada));
        assert!(QuoteState::Borrador.can_transition_to(QuoteState::Ganada));
        assert!(QuoteState::Borrador.can_transition_to(QuoteState::Perdida));
    }

    #[test]
    fn sent_quotes_may_be_decided_or_withdrawn() {
        assert!(QuoteState::Enviada.can_transition_to(QuoteState::Ganada));
        assert!(QuoteState::Enviada.can_transition_to(QuoteState::Perdida));
        assert!(QuoteState::Enviada.can_transition_to(QuoteState::Borrador));
    }

    #[test]
    fn decided_quotes_reopen_only_through_enviada() {
        assert!(QuoteState::Ganada.can_transition_to(QuoteState::Enviada));
        assert!(QuoteState::Perdida.can_transition_to(QuoteState::Enviada));
        assert!(!QuoteState::Ganada.can_transition_to(QuoteState::Perdida));
        assert!(!QuoteState::Perdida.can_transition_to(QuoteState::Ganada));
        assert!(!QuoteState::Ganada.can_transition_to(QuoteState::Borrador));
    }

    #[test]
    fn self_transitions_are_rejected() {
        for state in QuoteState::ALL {
            assert!(!state.can_transition_to(state), "{state:?} -> {state:?} must be illegal");
        }
    }

    #[test]
    fn unknown_raw_states_do_not_parse() {
        assert_eq!(QuoteState::parse("Desconocido"), None);
        assert_eq!(QuoteState::parse(""), None);
        assert_eq!(QuoteState::parse("borrador"), None);
        assert_eq!(QuoteState::parse("Enviada"), Some(QuoteState::Enviada));
    }

    #[test]
    fn raw_transition_check_is_total_over_arbitrary_strings() {
        assert!(QuoteState::transition_allowed("Borrador", "Ganada"));
        assert!(QuoteState::transition_allowed("Perdida", "Enviada"));
        assert!(!QuoteState::transition_allowed("Ganada", "Perdida"));
        assert!(!QuoteState::transition_allowed("Desconocido", "Enviada"));
        assert!(!QuoteState::transition_allowed("Borrador", "Archivada"));
        assert!(!QuoteState::transition_allowed("", ""));
    }

    #[test]
    fn transition_to_updates_state_or_errors() {
        let mut quote = quote(QuoteState::Borrador);
        quote.transition_to(QuoteState::Ganada).expect("borrador -> ganada");
        assert_eq!(quote.state, QuoteState::Ganada);

        let error =
            quote.transition_to(QuoteState::Perdida).expect_err("ganada -> perdida must fail");
        assert!(matches!(
            error,
            crate::errors::DomainError::InvalidQuoteTransition { .. }
        ));
        assert_eq!(quote.state, QuoteState::Ganada, "failed transition must not mutate state");
    }

    #[test]
    fn default_state_is_borrador() {
        assert_eq!(QuoteState::default(), QuoteState::Borrador);
    }

    #[test]
    fn styles_cover_every_state() {
        for state in QuoteState::ALL {
            assert_eq!(state.style().label, state.as_str());
        }
    }
}
