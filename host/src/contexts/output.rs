//! Accumulated VM output of the current execution.
//!
//! The context evolves in place; `push_state` saves a deep copy for
//! rollback. A nested destination-context frame additionally censors the
//! transient fields (return data, return code, refund) so they collect only
//! the nested call's results, and `pop_merge_active` stitches the saved
//! outer values back in front.

use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use tracing::trace;

use vulcan_primitives::{
    Address, CallType, LogEntry, OutputAccount, OutputTransfer, ReturnCode, StorageUpdate,
    VMError, VMOutput, VMResult,
};

use super::blockchain::BlockchainContext;

/// Identifier of log entries written by contracts.
pub const WRITE_LOG_IDENTIFIER: &[u8] = b"writeLog";

/// Fields a contract deploy or upgrade writes onto the target account.
#[derive(Debug, Clone)]
pub struct CodeDeployInput {
    pub contract_code: Vec<u8>,
    pub contract_code_metadata: Vec<u8>,
    pub contract_address: Address,
    pub code_deployer_address: Address,
}

#[derive(Debug, Default)]
pub struct OutputContext {
    state: VMOutput,
    state_stack: Vec<VMOutput>,
}

impl OutputContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init_state(&mut self) {
        self.state = VMOutput::default();
    }

    pub fn push_state(&mut self) {
        self.state_stack.push(self.state.clone());
    }

    /// Restore the saved state, discarding everything the nested frame did.
    pub fn pop_set_active(&mut self) {
        if let Some(state) = self.state_stack.pop() {
            self.state = state;
        }
    }

    /// Drop the saved state, keeping the evolved one. Same-context commits.
    pub fn pop_discard(&mut self) {
        self.state_stack.pop();
    }

    /// Merge the nested frame's results onto the saved outer state.
    ///
    /// The current state evolved from a copy of the saved one, so accounts,
    /// logs and deletions are already unioned; what needs stitching are the
    /// fields `censor_vm_output` cleared at the frame boundary.
    pub fn pop_merge_active(&mut self) {
        let Some(outer) = self.state_stack.pop() else {
            return;
        };
        let mut return_data = outer.return_data;
        return_data.append(&mut self.state.return_data);
        self.state.return_data = return_data;
        self.state.gas_refund = self.state.gas_refund.saturating_add(outer.gas_refund);
        if self.state.return_code.is_ok() {
            self.state.return_message = outer.return_message;
        }
    }

    pub fn clear_state_stack(&mut self) {
        self.state_stack.clear();
    }

    pub fn state_stack_depth(&self) -> usize {
        self.state_stack.len()
    }

    /// Clear the transient result fields at a destination-context boundary.
    /// Accounts, logs and deleted-account markers stay.
    pub fn censor_vm_output(&mut self) {
        self.state.return_data.clear();
        self.state.return_code = ReturnCode::Ok;
        self.state.return_message.clear();
        self.state.gas_remaining = 0;
        self.state.gas_refund = 0;
    }

    // ── Accounts ──

    /// The output account for an address, created empty on first reference.
    /// The boolean is true when this call created it.
    pub fn get_output_account(&mut self, address: &[u8]) -> (&mut OutputAccount, bool) {
        let is_new = !self.state.output_accounts.contains_key(address);
        let account = self
            .state
            .output_accounts
            .entry(address.to_vec())
            .or_insert_with(|| OutputAccount::new(address.to_vec()));
        (account, is_new)
    }

    pub fn accounts(&self) -> &std::collections::BTreeMap<Address, OutputAccount> {
        &self.state.output_accounts
    }

    pub fn delete_output_account(&mut self, address: &[u8]) {
        self.state.output_accounts.remove(address);
    }

    pub fn add_tx_value_to_account(&mut self, address: &[u8], value: &BigInt) {
        let (account, _) = self.get_output_account(address);
        account.balance_delta += value;
    }

    pub fn deploy_code(&mut self, input: CodeDeployInput) {
        let (account, _) = self.get_output_account(&input.contract_address.clone());
        account.code = input.contract_code;
        account.code_metadata = input.contract_code_metadata;
        account.code_deployer_address = input.code_deployer_address;
        trace!(
            target: "vulcan::output",
            address = %hex::encode(&input.contract_address),
            "code deployed"
        );
    }

    /// Record a storage read or write on the account's update map.
    pub fn set_storage_update(&mut self, address: &[u8], update: StorageUpdate) {
        let (account, _) = self.get_output_account(address);
        account.storage_updates.insert(update.key.clone(), update);
    }

    // ── Return data and codes ──

    pub fn finish(&mut self, data: Vec<u8>) {
        self.state.return_data.push(data);
    }

    pub fn prepend_finish(&mut self, data: Vec<u8>) {
        self.state.return_data.insert(0, data);
    }

    pub fn clear_return_data(&mut self) {
        self.state.return_data.clear();
    }

    pub fn return_data(&self) -> &[Vec<u8>] {
        &self.state.return_data
    }

    pub fn return_code(&self) -> ReturnCode {
        self.state.return_code
    }

    pub fn set_return_code(&mut self, code: ReturnCode) {
        self.state.return_code = code;
    }

    pub fn return_message(&self) -> &str {
        &self.state.return_message
    }

    pub fn set_return_message(&mut self, message: String) {
        self.state.return_message = message;
    }

    pub fn get_refund(&self) -> u64 {
        self.state.gas_refund
    }

    pub fn add_refund(&mut self, gas: u64) {
        self.state.gas_refund = self.state.gas_refund.saturating_add(gas);
    }

    // ── Logs ──

    pub fn write_log(&mut self, address: &[u8], topics: Vec<Vec<u8>>, data: Vec<u8>) {
        self.write_log_with_identifier(address, WRITE_LOG_IDENTIFIER.to_vec(), topics, data);
    }

    pub fn write_log_with_identifier(
        &mut self,
        address: &[u8],
        identifier: Vec<u8>,
        topics: Vec<Vec<u8>>,
        data: Vec<u8>,
    ) {
        self.state.logs.push(LogEntry {
            identifier,
            address: address.to_vec(),
            topics,
            data,
        });
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.state.logs
    }

    // ── Transfers ──

    /// Move value between accounts without recording a transfer entry.
    pub fn transfer_value_only(
        &mut self,
        blockchain: &BlockchainContext,
        destination: &[u8],
        sender: &[u8],
        value: &BigInt,
        check_payable: bool,
    ) -> VMResult<()> {
        if value.is_negative() {
            return Err(VMError::TransferNegativeValue);
        }

        let sender_balance = blockchain.get_balance_big_int(sender, self);
        if &sender_balance < value {
            trace!(
                target: "vulcan::output",
                sender = %hex::encode(sender),
                "transfer with insufficient funds"
            );
            return Err(VMError::TransferInsufficientFunds);
        }

        let payable_check_needed =
            check_payable && !value.is_zero() && blockchain.is_smart_contract(destination);
        if payable_check_needed && !blockchain.is_payable(destination)? {
            return Err(VMError::AccountNotPayable);
        }

        let (sender_account, _) = self.get_output_account(sender);
        sender_account.balance_delta -= value;
        let (destination_account, _) = self.get_output_account(destination);
        destination_account.balance_delta += value;

        Ok(())
    }

    /// Move value and record the outgoing transfer on the destination.
    #[allow(clippy::too_many_arguments)]
    pub fn transfer(
        &mut self,
        blockchain: &BlockchainContext,
        destination: &[u8],
        sender: &[u8],
        gas_limit: u64,
        gas_locked: u64,
        value: &BigInt,
        data: Vec<u8>,
        call_type: CallType,
    ) -> VMResult<()> {
        let check_payable = call_type != CallType::AsynchronousCallback;
        self.transfer_value_only(blockchain, destination, sender, value, check_payable)?;

        let (destination_account, _) = self.get_output_account(destination);
        destination_account.output_transfers.push(OutputTransfer {
            sender_address: sender.to_vec(),
            value: value.clone(),
            gas_limit,
            gas_locked,
            data,
            call_type,
        });
        trace!(
            target: "vulcan::output",
            to = %hex::encode(destination),
            %value,
            gas_limit,
            "transfer recorded"
        );
        Ok(())
    }

    /// Mark the account deleted; its residual balance goes to `beneficiary`.
    pub fn self_destruct(&mut self, address: &[u8], beneficiary: &[u8]) {
        self.state.deleted_accounts.push(address.to_vec());
        self.state.logs.push(LogEntry {
            identifier: b"selfDestruct".to_vec(),
            address: address.to_vec(),
            topics: vec![beneficiary.to_vec()],
            data: Vec::new(),
        });
    }

    // ── Final outputs ──

    /// Snapshot the accumulated state as a `VMOutput`.
    pub fn get_vm_output(&self, gas_remaining: u64) -> VMOutput {
        let mut output = self.state.clone();
        output.gas_remaining = gas_remaining;
        output
    }

    /// The canonical failed output for an error.
    pub fn create_vm_output_in_case_of_error(&self, err: &VMError) -> VMOutput {
        let return_code = ReturnCode::from_error(err);
        let message = match err {
            VMError::SignalError(message) => message.clone(),
            other => other.to_string(),
        };
        VMOutput::from_error(return_code, &message)
    }
}
