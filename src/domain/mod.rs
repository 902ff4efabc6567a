//! Domain Layer - Records produced by the aggregation engine
//!
//! Pure types and functions with no I/O. Everything here is created by
//! the application layer and handed to callers by value.
//!
//! - `token`: token references and raw-unit normalization
//! - `price`: quotes, aggregated prices, series points, valuations
//! - `transfer`: transfer events and wallet-relative records
//! - `holder`: holder balances and top-N ranking

pub mod token;
pub mod price;
pub mod transfer;
pub mod holder;

pub use token::{TokenRef, AmountError, raw_to_decimal, DEFAULT_DECIMALS};
pub use price::{
    Exchange, QuoteCurrency, PriceQuote, AggregatedPrice, Absence, AbsenceKind,
    PortfolioValuation, ExchangeValue, SeriesPoint, NonPositivePrice,
};
pub use transfer::{TransferEvent, TransactionRecord, Direction, net_change};
pub use holder::{HolderBalance, HolderRanking, rank_holders};
