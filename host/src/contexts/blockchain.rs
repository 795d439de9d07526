//! Proxy over the blockchain hook, with output-account caching.
//!
//! Balance, nonce and code read through here are cached into the output
//! account on first access so later reads stay consistent within the frame.
//! The state stack holds hook snapshots; popping the active state reverts
//! the hook, which is how a failed sub-execution is rolled back.

use std::sync::Arc;

use num_bigint::BigInt;
use num_traits::Zero;
use tracing::trace;

use vulcan_hostapi::{BlockInfo, BlockchainHook};
use vulcan_primitives::{Address, VMError, VMResult};

use super::output::OutputContext;

pub struct BlockchainContext {
    hook: Arc<dyn BlockchainHook>,
    state_stack: Vec<i32>,
}

impl BlockchainContext {
    pub fn new(hook: Arc<dyn BlockchainHook>) -> Self {
        Self {
            hook,
            state_stack: Vec::new(),
        }
    }

    pub fn init_state(&mut self) {}

    pub fn push_state(&mut self) {
        let snapshot = self.hook.get_snapshot();
        self.state_stack.push(snapshot);
    }

    /// Pop and revert the hook to the saved snapshot.
    pub fn pop_set_active(&mut self) {
        let Some(snapshot) = self.state_stack.pop() else {
            return;
        };
        if let Err(err) = self.hook.revert_to_snapshot(snapshot) {
            tracing::error!(target: "vulcan::blockchain", %err, snapshot, "revert to snapshot failed");
        }
    }

    pub fn pop_discard(&mut self) {
        self.state_stack.pop();
    }

    pub fn clear_state_stack(&mut self) {
        self.state_stack.clear();
    }

    pub fn state_stack_depth(&self) -> usize {
        self.state_stack.len()
    }

    // ── Accounts ──

    /// Address for a contract the given creator is about to deploy.
    ///
    /// The creator's nonce was already incremented for the pending
    /// transaction, so plain accounts deploy from `nonce - 1`.
    pub fn new_address(
        &self,
        creator: &[u8],
        vm_type: &[u8],
        output: &mut OutputContext,
    ) -> VMResult<Address> {
        let mut nonce = self.get_nonce(creator, output)?;
        if !self.is_smart_contract(creator) && nonce > 0 {
            nonce -= 1;
        }
        self.hook.new_address(creator, nonce, vm_type)
    }

    pub fn account_exists(&self, address: &[u8]) -> bool {
        matches!(self.hook.get_user_account(address), Ok(Some(_)))
    }

    /// Balance including the delta accumulated by this execution.
    pub fn get_balance_big_int(&self, address: &[u8], output: &mut OutputContext) -> BigInt {
        let (account, is_new) = output.get_output_account(address);
        if !is_new {
            if account.balance.is_none() {
                let hook_balance = match self.hook.get_user_account(address) {
                    Ok(Some(user)) => user.balance,
                    _ => return BigInt::zero(),
                };
                account.balance = Some(hook_balance);
            }
            let balance = account.balance.clone().unwrap_or_else(BigInt::zero);
            return balance + &account.balance_delta;
        }

        let balance = match self.hook.get_user_account(address) {
            Ok(Some(user)) => user.balance,
            _ => return BigInt::zero(),
        };
        account.balance = Some(balance.clone());
        balance
    }

    pub fn get_balance(&self, address: &[u8], output: &mut OutputContext) -> Vec<u8> {
        let balance = self.get_balance_big_int(address, output);
        let (_, bytes) = balance.to_bytes_be();
        bytes
    }

    pub fn get_nonce(&self, address: &[u8], output: &mut OutputContext) -> VMResult<u64> {
        let (account, is_new) = output.get_output_account(address);
        if !is_new && account.nonce > 0 {
            return Ok(account.nonce);
        }

        let nonce = match self.hook.get_user_account(address)? {
            Some(user) => user.nonce,
            None => 0,
        };
        account.nonce = nonce;
        Ok(nonce)
    }

    pub fn increase_nonce(&self, address: &[u8], output: &mut OutputContext) {
        let nonce = self.get_nonce(address, output).unwrap_or(0);
        let (account, _) = output.get_output_account(address);
        account.nonce = nonce + 1;
    }

    /// Contract code, cached on the output account after the first read.
    pub fn get_code(&self, address: &[u8], output: &mut OutputContext) -> VMResult<Vec<u8>> {
        let (account, is_new) = output.get_output_account(address);
        if !is_new && !account.code.is_empty() {
            return Ok(account.code.clone());
        }

        if self.hook.get_user_account(address)?.is_none() {
            return Err(VMError::InvalidAccount);
        }
        let code = self.hook.get_code(address)?;
        if code.is_empty() {
            return Err(VMError::ContractNotFound);
        }

        let (account, _) = output.get_output_account(address);
        account.code = code.clone();
        trace!(target: "vulcan::blockchain", address = %hex::encode(address), size = code.len(), "code loaded");
        Ok(code)
    }

    pub fn get_code_hash(&self, address: &[u8]) -> Vec<u8> {
        match self.hook.get_user_account(address) {
            Ok(Some(user)) => user.code_hash,
            _ => Vec::new(),
        }
    }

    pub fn get_owner_address(&self, sc_address: &[u8]) -> VMResult<Address> {
        match self.hook.get_user_account(sc_address)? {
            Some(user) => Ok(user.owner_address),
            None => Err(VMError::InvalidAccount),
        }
    }

    pub fn get_code_metadata(&self, address: &[u8]) -> Vec<u8> {
        match self.hook.get_user_account(address) {
            Ok(Some(user)) => user.code_metadata,
            _ => Vec::new(),
        }
    }

    // ── Shards and payability ──

    pub fn get_shard_of_address(&self, address: &[u8]) -> u32 {
        self.hook.get_shard_of_address(address)
    }

    pub fn is_smart_contract(&self, address: &[u8]) -> bool {
        self.hook.is_smart_contract(address)
    }

    pub fn is_payable(&self, address: &[u8]) -> VMResult<bool> {
        self.hook.is_payable(address)
    }

    // ── Compiled code and tokens ──

    pub fn save_compiled_code(&self, code_hash: &[u8], code: &[u8]) {
        self.hook.save_compiled_code(code_hash, code);
    }

    pub fn get_compiled_code(&self, code_hash: &[u8]) -> Option<Vec<u8>> {
        self.hook.get_compiled_code(code_hash)
    }

    pub fn get_esdt_token(
        &self,
        address: &[u8],
        token_id: &[u8],
        nonce: u64,
    ) -> VMResult<vulcan_hostapi::EsdtTokenData> {
        self.hook.get_esdt_token(address, token_id, nonce)
    }

    // ── Block metadata ──

    pub fn block_hash(&self, nonce: u64) -> Vec<u8> {
        self.hook.get_blockhash(nonce).unwrap_or_default()
    }

    pub fn current_block(&self) -> BlockInfo {
        self.hook.current_block()
    }

    pub fn last_block(&self) -> BlockInfo {
        self.hook.last_block()
    }

    pub fn get_state_root_hash(&self) -> Vec<u8> {
        self.hook.get_state_root_hash()
    }

    // ── Hook passthrough used by nested execution ──

    pub fn get_snapshot(&self) -> i32 {
        self.hook.get_snapshot()
    }

    pub fn revert_to_snapshot(&self, snapshot: i32) {
        let _ = self.hook.revert_to_snapshot(snapshot);
    }

    pub fn process_built_in_function(
        &self,
        input: &vulcan_primitives::ContractCallInput,
    ) -> VMResult<vulcan_primitives::VMOutput> {
        self.hook.process_built_in_function(input)
    }

    pub fn get_user_account(
        &self,
        address: &[u8],
    ) -> VMResult<Option<vulcan_hostapi::UserAccount>> {
        self.hook.get_user_account(address)
    }
}
