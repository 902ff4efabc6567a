//! Transfer events and wallet-relative transaction records.

use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::token::{AmountError, TokenRef};

/// An ERC-20 `Transfer` log as read from the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub token: TokenRef,
    pub tx_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    pub from: Address,
    pub to: Address,
    /// Raw integer value, still scaled by the token decimals
    pub value: U256,
}

impl TransferEvent {
    pub fn amount(&self) -> Result<Decimal, AmountError> {
        self.token.to_units(self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// A transfer seen from one wallet's point of view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub event: TransferEvent,
    pub direction: Direction,
}

impl TransactionRecord {
    /// Records for `wallet` in this event. A self-transfer yields one
    /// outgoing and one incoming record, netting to zero.
    pub fn for_wallet(event: &TransferEvent, wallet: Address) -> Vec<TransactionRecord> {
        let mut records = Vec::with_capacity(2);
        if event.from == wallet {
            records.push(TransactionRecord {
                event: event.clone(),
                direction: Direction::Outgoing,
            });
        }
        if event.to == wallet {
            records.push(TransactionRecord {
                event: event.clone(),
                direction: Direction::Incoming,
            });
        }
        records
    }

    /// Amount in token units, negative for outgoing transfers
    pub fn signed_amount(&self) -> Result<Decimal, AmountError> {
        let amount = self.event.amount()?;
        Ok(match self.direction {
            Direction::Outgoing => -amount,
            Direction::Incoming => amount,
        })
    }

    /// Counterparty of the wallet in this record
    pub fn counterparty(&self) -> Address {
        match self.direction {
            Direction::Outgoing => self.event.to,
            Direction::Incoming => self.event.from,
        }
    }

    pub fn sort_key(&self) -> (u64, u64, Direction) {
        (self.event.block_number, self.event.log_index, self.direction)
    }
}

/// Net change implied by a set of records
pub fn net_change(records: &[TransactionRecord]) -> Result<Decimal, AmountError> {
    records
        .iter()
        .try_fold(Decimal::ZERO, |acc, r| Ok(acc + r.signed_amount()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn event(from: Address, to: Address, raw: u128) -> TransferEvent {
        TransferEvent {
            token: TokenRef::new(Address::repeat_byte(0xaa)),
            tx_hash: B256::repeat_byte(0x01),
            log_index: 0,
            block_number: 100,
            timestamp: Utc::now(),
            from,
            to,
            value: U256::from(raw),
        }
    }

    #[test]
    fn test_outgoing_is_negative() {
        let wallet = Address::repeat_byte(0x01);
        let other = Address::repeat_byte(0x02);
        let records = TransactionRecord::for_wallet(&event(wallet, other, 2_000_000_000_000_000_000), wallet);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].direction, Direction::Outgoing);
        assert_eq!(records[0].signed_amount().unwrap(), dec!(-2));
        assert_eq!(records[0].counterparty(), other);
    }

    #[test]
    fn test_incoming_is_positive() {
        let wallet = Address::repeat_byte(0x01);
        let other = Address::repeat_byte(0x02);
        let records = TransactionRecord::for_wallet(&event(other, wallet, 500_000_000_000_000_000), wallet);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].direction, Direction::Incoming);
        assert_eq!(records[0].signed_amount().unwrap(), dec!(0.5));
    }

    #[test]
    fn test_self_transfer_yields_two_records() {
        let wallet = Address::repeat_byte(0x01);
        let records = TransactionRecord::for_wallet(&event(wallet, wallet, 1_000_000_000_000_000_000), wallet);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].direction, Direction::Outgoing);
        assert_eq!(records[1].direction, Direction::Incoming);
        assert_eq!(net_change(&records).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_unrelated_wallet_yields_nothing() {
        let records = TransactionRecord::for_wallet(
            &event(Address::repeat_byte(0x02), Address::repeat_byte(0x03), 1),
            Address::repeat_byte(0x01),
        );
        assert!(records.is_empty());
    }
}
