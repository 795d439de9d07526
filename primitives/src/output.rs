//! The VM output: accounts, transfers, logs, and return data.

use std::collections::BTreeMap;

use num_bigint::BigInt;

use crate::error::ReturnCode;
use crate::input::CallType;
use crate::types::Address;

/// One storage cell touched during execution.
///
/// Reads populate the map as a cache (`written == false`); writes flip
/// `written` to true. Merges on nested-frame commit union the two maps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageUpdate {
    pub key: Vec<u8>,
    pub data: Vec<u8>,
    pub written: bool,
}

/// An outgoing transfer, recorded on the receiving account in emission order
/// and never mutated after append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTransfer {
    pub sender_address: Address,
    pub value: BigInt,
    pub gas_limit: u64,
    pub gas_locked: u64,
    pub data: Vec<u8>,
    pub call_type: CallType,
}

/// The output-side view of an account, created lazily on first reference.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutputAccount {
    pub address: Address,
    pub nonce: u64,
    /// Balance read from the hook, cached on first access. `None` until read.
    pub balance: Option<BigInt>,
    /// Signed balance change produced by this execution; applied on commit.
    pub balance_delta: BigInt,
    pub storage_updates: BTreeMap<Vec<u8>, StorageUpdate>,
    pub code: Vec<u8>,
    pub code_metadata: Vec<u8>,
    pub code_deployer_address: Address,
    pub gas_used: u64,
    pub output_transfers: Vec<OutputTransfer>,
    pub bytes_added_to_storage: u64,
    pub bytes_deleted_from_storage: u64,
}

impl OutputAccount {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            ..Default::default()
        }
    }

    /// Sum of gas carried away by this account's outgoing transfers.
    pub fn transfers_gas(&self) -> u64 {
        self.output_transfers
            .iter()
            .fold(0u64, |acc, t| {
                acc.saturating_add(t.gas_limit).saturating_add(t.gas_locked)
            })
    }
}

/// One emitted log entry; ordering across the whole output is emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub identifier: Vec<u8>,
    pub address: Address,
    pub topics: Vec<Vec<u8>>,
    pub data: Vec<u8>,
}

/// The observable result of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VMOutput {
    pub return_data: Vec<Vec<u8>>,
    pub return_code: ReturnCode,
    pub return_message: String,
    pub gas_remaining: u64,
    pub gas_refund: u64,
    pub output_accounts: BTreeMap<Address, OutputAccount>,
    pub deleted_accounts: Vec<Address>,
    pub logs: Vec<LogEntry>,
}

impl Default for VMOutput {
    fn default() -> Self {
        Self {
            return_data: Vec::new(),
            return_code: ReturnCode::Ok,
            return_message: String::new(),
            gas_remaining: 0,
            gas_refund: 0,
            output_accounts: BTreeMap::new(),
            deleted_accounts: Vec::new(),
            logs: Vec::new(),
        }
    }
}

impl VMOutput {
    /// The canonical failed output: no state changes, no gas left.
    pub fn from_error(return_code: ReturnCode, message: &str) -> Self {
        Self {
            return_code,
            return_message: message.to_string(),
            ..Default::default()
        }
    }

    /// Sum over all accounts of `gas_used`, plus the gas carried by every
    /// outgoing transfer. Together with `gas_remaining` this must equal the
    /// gas provided to the frame that produced the output.
    pub fn total_gas_accounted(&self) -> u64 {
        self.output_accounts.values().fold(0u64, |acc, account| {
            acc.saturating_add(account.gas_used)
                .saturating_add(account.transfers_gas())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_from_error() {
        let output = VMOutput::from_error(ReturnCode::ExecutionFailed, "boom");
        assert_eq!(output.return_code, ReturnCode::ExecutionFailed);
        assert_eq!(output.return_message, "boom");
        assert_eq!(output.gas_remaining, 0);
        assert!(output.output_accounts.is_empty());
    }

    #[test]
    fn test_account_transfers_gas() {
        let mut account = OutputAccount::new(b"dest".to_vec());
        account.output_transfers.push(OutputTransfer {
            sender_address: b"src".to_vec(),
            value: BigInt::from(1),
            gas_limit: 300,
            gas_locked: 50,
            data: Vec::new(),
            call_type: CallType::AsynchronousCall,
        });
        account.output_transfers.push(OutputTransfer {
            sender_address: b"src".to_vec(),
            value: BigInt::from(2),
            gas_limit: 100,
            gas_locked: 0,
            data: Vec::new(),
            call_type: CallType::Direct,
        });
        assert_eq!(account.transfers_gas(), 450);
    }

    #[test]
    fn test_total_gas_accounted() {
        let mut output = VMOutput::default();
        let mut account = OutputAccount::new(b"a".to_vec());
        account.gas_used = 400;
        output.output_accounts.insert(b"a".to_vec(), account);
        let mut other = OutputAccount::new(b"b".to_vec());
        other.gas_used = 200;
        other.output_transfers.push(OutputTransfer {
            sender_address: b"a".to_vec(),
            value: BigInt::from(0),
            gas_limit: 150,
            gas_locked: 150,
            data: Vec::new(),
            call_type: CallType::AsynchronousCall,
        });
        output.output_accounts.insert(b"b".to_vec(), other);
        assert_eq!(output.total_gas_accounted(), 900);
    }
}
