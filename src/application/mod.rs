pub mod retry;
pub mod pacer;
pub mod price_aggregator;
pub mod chain_scanner;
pub mod holder_ranker;

pub use retry::{RetryPolicy, Retryable};
pub use pacer::RequestPacer;
pub use price_aggregator::{AggregationError, AggregatorConfig, PriceAggregator};
pub use chain_scanner::{
    BlockSpan, ChainEventScanner, ScanError, ScanRange, ScannerConfig, TokenTransfers, WalletTransfers,
};
pub use holder_ranker::{HolderRanker, RankerConfig, RankingError};
