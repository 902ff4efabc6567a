//! Holder balances and deterministic top-N ranking.

use alloy_primitives::{Address, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::token::{AmountError, TokenRef};

/// Raw balance held by one address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderBalance {
    pub address: Address,
    pub balance: U256,
}

impl HolderBalance {
    pub fn amount(&self, token: &TokenRef) -> Result<Decimal, AmountError> {
        token.to_units(self.balance)
    }
}

/// Result of a holder enumeration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HolderRanking {
    pub token: TokenRef,
    pub total_supply: U256,
    /// Descending by balance, ties by address ascending
    pub holders: Vec<HolderBalance>,
    /// Enumeration offsets whose chunk could not be read
    pub failed_chunks: Vec<u64>,
}

impl HolderRanking {
    pub fn empty(token: TokenRef, total_supply: U256) -> Self {
        Self {
            token,
            total_supply,
            holders: Vec::new(),
            failed_chunks: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed_chunks.is_empty()
    }
}

/// Sums balances per address, drops the zero address and empty
/// balances, then keeps the `n` largest.
pub fn rank_holders<I>(entries: I, n: usize) -> Vec<HolderBalance>
where
    I: IntoIterator<Item = (Address, U256)>,
{
    let mut totals: BTreeMap<Address, U256> = BTreeMap::new();
    for (address, balance) in entries {
        if address == Address::ZERO {
            continue;
        }
        let slot = totals.entry(address).or_insert(U256::ZERO);
        *slot = slot.saturating_add(balance);
    }

    let mut ranked: Vec<HolderBalance> = totals
        .into_iter()
        .filter(|(_, balance)| !balance.is_zero())
        .map(|(address, balance)| HolderBalance { address, balance })
        .collect();

    ranked.sort_by(|a, b| b.balance.cmp(&a.balance).then_with(|| a.address.cmp(&b.address)));
    ranked.truncate(n);
    ranked
}
