//! Price records produced by the aggregation engine.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::token::TokenRef;

/// Supported price sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Uniswap,
    Binance,
    Bybit,
}

impl Exchange {
    pub const ALL: [Exchange; 3] = [Exchange::Uniswap, Exchange::Binance, Exchange::Bybit];

    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Uniswap => "uniswap",
            Exchange::Binance => "binance",
            Exchange::Bybit => "bybit",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uniswap" => Ok(Exchange::Uniswap),
            "binance" => Ok(Exchange::Binance),
            "bybit" => Ok(Exchange::Bybit),
            other => Err(format!("unknown exchange '{}'", other)),
        }
    }
}

/// Currency a quote is denominated in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QuoteCurrency {
    Usdt,
    Eth,
}

impl QuoteCurrency {
    /// Ticker suffix used by centralized exchanges
    pub fn ticker(&self) -> &'static str {
        match self {
            QuoteCurrency::Usdt => "USDT",
            QuoteCurrency::Eth => "ETH",
        }
    }
}

impl fmt::Display for QuoteCurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ticker())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("price must be positive, got {0}")]
pub struct NonPositivePrice(pub Decimal);

/// A single successful spot price read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub token: TokenRef,
    pub exchange: Exchange,
    price: Decimal,
    pub quote_currency: QuoteCurrency,
    /// Time the response was received
    pub timestamp: DateTime<Utc>,
    /// Number of fractional digits the source reported
    pub source_scale: u32,
}

impl PriceQuote {
    pub fn new(
        token: TokenRef,
        exchange: Exchange,
        price: Decimal,
        quote_currency: QuoteCurrency,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, NonPositivePrice> {
        if price <= Decimal::ZERO {
            return Err(NonPositivePrice(price));
        }
        Ok(Self {
            token,
            exchange,
            source_scale: price.scale(),
            price,
            quote_currency,
            timestamp,
        })
    }

    pub fn price(&self) -> Decimal {
        self.price
    }
}

/// Why an exchange has no entry in an aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsenceKind {
    NotListed,
    RateLimited,
    SourceUnavailable,
    SchemaMismatch,
    Transport,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Absence {
    pub kind: AbsenceKind,
    pub detail: String,
}

impl Absence {
    pub fn new(kind: AbsenceKind, detail: impl Into<String>) -> Self {
        Self { kind, detail: detail.into() }
    }
}

impl fmt::Display for Absence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.detail)
    }
}

/// Per-exchange view of one token's price at one moment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedPrice {
    pub token: TokenRef,
    pub quotes: BTreeMap<Exchange, PriceQuote>,
    pub absent: BTreeMap<Exchange, Absence>,
    pub as_of: DateTime<Utc>,
}

impl AggregatedPrice {
    pub fn quote(&self, exchange: Exchange) -> Option<&PriceQuote> {
        self.quotes.get(&exchange)
    }

    pub fn is_partial(&self) -> bool {
        !self.absent.is_empty()
    }

    /// Value `quantity` tokens on every exchange that reported a price.
    pub fn valuation(&self, quantity: Decimal) -> PortfolioValuation {
        let mut per_exchange = BTreeMap::new();
        let mut totals: BTreeMap<QuoteCurrency, Decimal> = BTreeMap::new();

        for (exchange, quote) in &self.quotes {
            let value = quote.price() * quantity;
            per_exchange.insert(*exchange, ExchangeValue {
                value,
                quote_currency: quote.quote_currency,
            });
            *totals.entry(quote.quote_currency).or_insert(Decimal::ZERO) += value;
        }

        PortfolioValuation {
            token: self.token.clone(),
            quantity,
            per_exchange,
            totals,
            absent: self.absent.keys().copied().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeValue {
    pub value: Decimal,
    pub quote_currency: QuoteCurrency,
}

/// Holding value derived from an [`AggregatedPrice`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioValuation {
    pub token: TokenRef,
    pub quantity: Decimal,
    pub per_exchange: BTreeMap<Exchange, ExchangeValue>,
    /// Sum of exchange values, kept apart per quote currency
    pub totals: BTreeMap<QuoteCurrency, Decimal>,
    /// Exchanges that contributed nothing because they had no data
    pub absent: Vec<Exchange>,
}

impl PortfolioValuation {
    pub fn total(&self, currency: QuoteCurrency) -> Decimal {
        self.totals.get(&currency).copied().unwrap_or(Decimal::ZERO)
    }
}

/// One sampled day of a historical series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub quote: Option<PriceQuote>,
    pub gap: Option<Absence>,
}

impl SeriesPoint {
    pub fn price(&self) -> Option<Decimal> {
        self.quote.as_ref().map(PriceQuote::price)
    }

    pub fn is_gap(&self) -> bool {
        self.quote.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;
    use rust_decimal_macros::dec;

    fn token() -> TokenRef {
        TokenRef::new(Address::repeat_byte(0x11)).with_symbol("SAND")
    }

    fn quote(exchange: Exchange, price: Decimal, currency: QuoteCurrency) -> PriceQuote {
        PriceQuote::new(token(), exchange, price, currency, Utc::now()).unwrap()
    }

    #[test]
    fn test_quote_rejects_non_positive() {
        assert!(PriceQuote::new(token(), Exchange::Binance, dec!(0), QuoteCurrency::Usdt, Utc::now()).is_err());
        assert!(PriceQuote::new(token(), Exchange::Binance, dec!(-1.2), QuoteCurrency::Usdt, Utc::now()).is_err());
    }

    #[test]
    fn test_quote_keeps_source_scale() {
        let q = quote(Exchange::Bybit, dec!(0.45210000), QuoteCurrency::Usdt);
        assert_eq!(q.source_scale, 8);
        assert_eq!(q.price(), dec!(0.4521));
    }

    #[test]
    fn test_exchange_from_str() {
        assert_eq!("Binance".parse::<Exchange>().unwrap(), Exchange::Binance);
        assert_eq!("uniswap".parse::<Exchange>().unwrap(), Exchange::Uniswap);
        assert!("kraken".parse::<Exchange>().is_err());
    }

    #[test]
    fn test_valuation_separates_absent_and_currencies() {
        let mut quotes = BTreeMap::new();
        quotes.insert(Exchange::Binance, quote(Exchange::Binance, dec!(0.5), QuoteCurrency::Usdt));
        quotes.insert(Exchange::Uniswap, quote(Exchange::Uniswap, dec!(0.0002), QuoteCurrency::Eth));
        let mut absent = BTreeMap::new();
        absent.insert(Exchange::Bybit, Absence::new(AbsenceKind::NotListed, "no symbol"));

        let aggregated = AggregatedPrice { token: token(), quotes, absent, as_of: Utc::now() };
        let valuation = aggregated.valuation(dec!(1000));

        assert_eq!(valuation.total(QuoteCurrency::Usdt), dec!(500));
        assert_eq!(valuation.total(QuoteCurrency::Eth), dec!(0.2));
        assert_eq!(valuation.absent, vec![Exchange::Bybit]);
        assert!(!valuation.per_exchange.contains_key(&Exchange::Bybit));
    }
}
