//! Price Aggregator
//!
//! Fans a price request out to every requested exchange concurrently,
//! retries each source independently and merges the outcomes into one
//! [`AggregatedPrice`]. Failed sources are recorded as absent with a reason;
//! only a request where nothing answered is an error.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};

use super::pacer::RequestPacer;
use super::retry::RetryPolicy;
use crate::domain::{
    Absence, AbsenceKind, AggregatedPrice, Exchange, PortfolioValuation, PriceQuote, QuoteCurrency,
    SeriesPoint, TokenRef,
};
use crate::ports::exchange::{ExchangeClient, ExchangeError};

#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("No exchange returned a price for {token}")]
    AllSourcesUnavailable {
        token: String,
        absent: BTreeMap<Exchange, Absence>,
    },

    #[error("No client configured for {0}")]
    ExchangeNotConfigured(Exchange),

    #[error("Invalid series range: {0}")]
    InvalidRange(String),
}

/// Points reserved up front; longer series grow as they are sampled
const PREALLOCATED_POINTS: u32 = 366;

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub retry: RetryPolicy,
    /// Deadline for a whole `aggregate` call; `None` waits for every source
    pub call_timeout: Option<Duration>,
    /// Spacing between historical samples
    pub sample_delay: Duration,
    /// Quote currency requested from each exchange
    pub quote_currencies: BTreeMap<Exchange, QuoteCurrency>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        let quote_currencies = BTreeMap::from([
            (Exchange::Uniswap, QuoteCurrency::Eth),
            (Exchange::Binance, QuoteCurrency::Usdt),
            (Exchange::Bybit, QuoteCurrency::Usdt),
        ]);
        Self {
            retry: RetryPolicy::default(),
            call_timeout: Some(Duration::from_secs(30)),
            sample_delay: Duration::from_secs(1),
            quote_currencies,
        }
    }
}

pub struct PriceAggregator {
    clients: BTreeMap<Exchange, Arc<dyn ExchangeClient>>,
    config: AggregatorConfig,
}

impl PriceAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            clients: BTreeMap::new(),
            config,
        }
    }

    /// Register a client under the exchange it reports
    pub fn with_client(mut self, client: Arc<dyn ExchangeClient>) -> Self {
        self.clients.insert(client.exchange(), client);
        self
    }

    pub fn quote_currency(&self, exchange: Exchange) -> QuoteCurrency {
        self.config
            .quote_currencies
            .get(&exchange)
            .copied()
            .unwrap_or(QuoteCurrency::Usdt)
    }

    /// Current price of `token` on each of `exchanges`
    pub async fn aggregate(
        &self,
        token: &TokenRef,
        exchanges: &[Exchange],
    ) -> Result<AggregatedPrice, AggregationError> {
        let requested: BTreeSet<Exchange> = exchanges.iter().copied().collect();
        let mut quotes = BTreeMap::new();
        let mut absent = BTreeMap::new();
        let mut pending = BTreeSet::new();
        let mut tasks = JoinSet::new();

        for exchange in requested {
            let Some(client) = self.clients.get(&exchange) else {
                absent.insert(
                    exchange,
                    Absence::new(AbsenceKind::SourceUnavailable, "no client configured"),
                );
                continue;
            };
            let client = Arc::clone(client);
            let token = token.clone();
            let quote = self.quote_currency(exchange);
            let policy = self.config.retry;
            pending.insert(exchange);
            tasks.spawn(async move {
                let result = policy
                    .run(exchange.as_str(), || client.fetch_price(&token, quote))
                    .await;
                (exchange, result)
            });
        }

        let deadline = self.config.call_timeout.map(|t| Instant::now() + t);
        let mut timed_out = false;
        loop {
            let next = match deadline {
                Some(deadline) => match timeout_at(deadline, tasks.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        timed_out = true;
                        break;
                    }
                },
                None => tasks.join_next().await,
            };
            match next {
                None => break,
                Some(Ok((exchange, result))) => {
                    pending.remove(&exchange);
                    record(exchange, result, &mut quotes, &mut absent);
                }
                Some(Err(e)) => tracing::warn!(error = %e, "Price fetch task failed"),
            }
        }
        tasks.abort_all();

        for exchange in pending {
            let absence = if timed_out {
                ExchangeError::TimedOut.to_absence()
            } else {
                Absence::new(AbsenceKind::SourceUnavailable, "fetch task failed")
            };
            tracing::warn!(%exchange, reason = %absence, "Exchange absent from aggregation");
            absent.insert(exchange, absence);
        }

        if quotes.is_empty() {
            return Err(AggregationError::AllSourcesUnavailable {
                token: token.label(),
                absent,
            });
        }

        Ok(AggregatedPrice {
            token: token.clone(),
            quotes,
            absent,
            as_of: Utc::now(),
        })
    }

    /// Sample one spot price per day for the last `num_days` days, oldest
    /// first. A failed sample is kept as a gap.
    pub async fn historical_series(
        &self,
        token: &TokenRef,
        num_days: u32,
        exchange: Exchange,
    ) -> Result<Vec<SeriesPoint>, AggregationError> {
        let client = self
            .clients
            .get(&exchange)
            .ok_or(AggregationError::ExchangeNotConfigured(exchange))?;
        let quote = self.quote_currency(exchange);
        let today = Utc::now().date_naive();
        let first = today
            .checked_sub_days(Days::new(u64::from(num_days.saturating_sub(1))))
            .ok_or_else(|| AggregationError::InvalidRange(format!("{} days back from {}", num_days, today)))?;
        let mut pacer = RequestPacer::new(self.config.sample_delay);
        let mut points = Vec::with_capacity(num_days.min(PREALLOCATED_POINTS) as usize);

        for date in first.iter_days().take(num_days as usize) {
            pacer.wait().await;

            let result = self
                .config
                .retry
                .run(exchange.as_str(), || client.fetch_price(token, quote))
                .await;
            let point = match result {
                Ok(q) => SeriesPoint { date, quote: Some(q), gap: None },
                Err(e) => {
                    tracing::warn!(%exchange, %date, error = %e, "Sample missing from series");
                    SeriesPoint { date, quote: None, gap: Some(e.to_absence()) }
                }
            };
            points.push(point);
        }

        Ok(points)
    }

    /// Value `quantity` tokens across `exchanges`
    pub async fn portfolio_value(
        &self,
        token: &TokenRef,
        quantity: Decimal,
        exchanges: &[Exchange],
    ) -> Result<PortfolioValuation, AggregationError> {
        let aggregated = self.aggregate(token, exchanges).await?;
        Ok(aggregated.valuation(quantity))
    }
}

fn record(
    exchange: Exchange,
    result: Result<PriceQuote, ExchangeError>,
    quotes: &mut BTreeMap<Exchange, PriceQuote>,
    absent: &mut BTreeMap<Exchange, Absence>,
) {
    match result {
        Ok(quote) => {
            tracing::debug!(%exchange, price = %quote.price(), "Quote received");
            quotes.insert(exchange, quote);
        }
        Err(e) => {
            tracing::warn!(%exchange, error = %e, "Exchange absent from aggregation");
            absent.insert(exchange, e.to_absence());
        }
    }
}
