//! Price source port

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::domain::{Absence, AbsenceKind, Exchange, PriceQuote, QuoteCurrency, TokenRef};

/// Per-source failure while fetching a spot price
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Rate limited by source")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Not listed: {0}")]
    NotListed(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out")]
    TimedOut,
}

impl ExchangeError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExchangeError::RateLimited { .. } | ExchangeError::Transport(_))
    }

    /// Server-provided wait hint
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ExchangeError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    pub fn to_absence(&self) -> Absence {
        let kind = match self {
            ExchangeError::SourceUnavailable(_) => AbsenceKind::SourceUnavailable,
            ExchangeError::RateLimited { .. } => AbsenceKind::RateLimited,
            ExchangeError::NotListed(_) => AbsenceKind::NotListed,
            ExchangeError::SchemaMismatch(_) => AbsenceKind::SchemaMismatch,
            ExchangeError::Transport(_) => AbsenceKind::Transport,
            ExchangeError::TimedOut => AbsenceKind::TimedOut,
        };
        Absence::new(kind, self.to_string())
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ExchangeError::SchemaMismatch(e.to_string())
        } else {
            ExchangeError::Transport(e.to_string())
        }
    }
}

/// Uniform spot-price interface over heterogeneous sources
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Which exchange this client talks to
    fn exchange(&self) -> Exchange;

    /// Fetch the current price of `token` in `quote`
    async fn fetch_price(
        &self,
        token: &TokenRef,
        quote: QuoteCurrency,
    ) -> Result<PriceQuote, ExchangeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ExchangeError::RateLimited { retry_after: None }.is_retryable());
        assert!(ExchangeError::Transport("reset".into()).is_retryable());
        assert!(!ExchangeError::NotListed("SAND".into()).is_retryable());
        assert!(!ExchangeError::SchemaMismatch("price".into()).is_retryable());
        assert!(!ExchangeError::SourceUnavailable("no pair".into()).is_retryable());
    }

    #[test]
    fn test_to_absence_keeps_kind() {
        let absence = ExchangeError::NotListed("PRIMEUSDT".into()).to_absence();
        assert_eq!(absence.kind, AbsenceKind::NotListed);
        assert!(absence.detail.contains("PRIMEUSDT"));
    }

    #[test]
    fn test_retry_after_hint() {
        let err = ExchangeError::RateLimited { retry_after: Some(Duration::from_secs(3)) };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(ExchangeError::TimedOut.retry_after(), None);
    }
}
