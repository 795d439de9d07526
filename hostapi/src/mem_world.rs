//! In-memory chain state for tests and local tooling.
//!
//! `MemWorld` implements the full `BlockchainHook` surface over a mutex-held
//! account map with snapshot/revert support. Built-in function processing is
//! pluggable: tests register handlers by name.

use std::collections::BTreeMap;
use std::sync::Arc;

use num_bigint::BigInt;
use num_traits::Zero;
use parking_lot::Mutex;

use vulcan_primitives::{
    Address, CodeMetadata, ContractCallInput, VMError, VMOutput, VMResult,
};

use crate::traits::{
    BlockInfo, BlockchainHook, BuiltinFunctionContainer, EsdtTokenData, UserAccount,
};

/// One account of the mock world.
#[derive(Debug, Clone, Default)]
pub struct WorldAccount {
    pub address: Address,
    pub nonce: u64,
    pub balance: BigInt,
    pub code: Vec<u8>,
    pub code_metadata: Vec<u8>,
    pub owner_address: Address,
    pub shard: u32,
    pub storage: BTreeMap<Vec<u8>, Vec<u8>>,
    pub esdt_balances: BTreeMap<Vec<u8>, BigInt>,
}

impl WorldAccount {
    pub fn new(address: &[u8]) -> Self {
        Self {
            address: address.to_vec(),
            ..Default::default()
        }
    }

    pub fn with_balance(mut self, balance: i64) -> Self {
        self.balance = BigInt::from(balance);
        self
    }

    pub fn with_code(mut self, code: &[u8]) -> Self {
        self.code = code.to_vec();
        self
    }

    pub fn with_code_metadata(mut self, metadata: CodeMetadata) -> Self {
        self.code_metadata = metadata.to_bytes();
        self
    }

    pub fn with_shard(mut self, shard: u32) -> Self {
        self.shard = shard;
        self
    }

    pub fn with_owner(mut self, owner: &[u8]) -> Self {
        self.owner_address = owner.to_vec();
        self
    }

    pub fn with_storage_entry(mut self, key: &[u8], value: &[u8]) -> Self {
        self.storage.insert(key.to_vec(), value.to_vec());
        self
    }

    pub fn with_esdt_balance(mut self, token: &[u8], value: i64) -> Self {
        self.esdt_balances.insert(token.to_vec(), BigInt::from(value));
        self
    }
}

type BuiltinHandler =
    Box<dyn Fn(&ContractCallInput, &MemWorld) -> VMResult<VMOutput> + Send + Sync>;

#[derive(Default)]
struct WorldState {
    accounts: BTreeMap<Address, WorldAccount>,
    compiled_code: BTreeMap<Vec<u8>, Vec<u8>>,
    snapshots: Vec<BTreeMap<Address, WorldAccount>>,
    current_block: BlockInfo,
    last_block: BlockInfo,
    state_root: Vec<u8>,
}

/// In-memory `BlockchainHook` implementation.
pub struct MemWorld {
    state: Mutex<WorldState>,
    builtin_handlers: Mutex<BTreeMap<String, BuiltinHandler>>,
}

impl Default for MemWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl MemWorld {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WorldState::default()),
            builtin_handlers: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn put_account(&self, account: WorldAccount) {
        let mut state = self.state.lock();
        state.accounts.insert(account.address.clone(), account);
    }

    pub fn account(&self, address: &[u8]) -> Option<WorldAccount> {
        self.state.lock().accounts.get(address).cloned()
    }

    pub fn set_current_block(&self, block: BlockInfo) {
        self.state.lock().current_block = block;
    }

    pub fn set_last_block(&self, block: BlockInfo) {
        self.state.lock().last_block = block;
    }

    /// Register a handler invoked by `process_built_in_function` for `name`.
    pub fn register_builtin<F>(&self, name: &str, handler: F)
    where
        F: Fn(&ContractCallInput, &MemWorld) -> VMResult<VMOutput> + Send + Sync + 'static,
    {
        self.builtin_handlers
            .lock()
            .insert(name.to_string(), Box::new(handler));
    }

    /// Apply the accounts of a committed output back onto the world. Used by
    /// tests that chain multiple transactions.
    pub fn commit_output(&self, output: &VMOutput) {
        let mut state = self.state.lock();
        for (address, out_account) in &output.output_accounts {
            let account = state
                .accounts
                .entry(address.clone())
                .or_insert_with(|| WorldAccount::new(address));
            account.nonce = account.nonce.max(out_account.nonce);
            account.balance += &out_account.balance_delta;
            if !out_account.code.is_empty() {
                account.code = out_account.code.clone();
                account.code_metadata = out_account.code_metadata.clone();
            }
            for (key, update) in &out_account.storage_updates {
                if !update.written {
                    continue;
                }
                if update.data.is_empty() {
                    account.storage.remove(key);
                } else {
                    account.storage.insert(key.clone(), update.data.clone());
                }
            }
        }
        for deleted in &output.deleted_accounts {
            state.accounts.remove(deleted);
        }
    }
}

impl BlockchainHook for MemWorld {
    fn new_address(&self, creator: &[u8], nonce: u64, vm_type: &[u8]) -> VMResult<Address> {
        // Deterministic synthetic address: creator, nonce and vm-type folded
        // into a 32-byte identifier.
        let mut address = vec![0u8; vulcan_primitives::ADDRESS_LEN];
        let tag = [creator, &nonce.to_be_bytes(), vm_type].concat();
        for (i, byte) in tag.iter().enumerate() {
            address[i % vulcan_primitives::ADDRESS_LEN] ^= *byte;
        }
        address[0] = 0; // contract address marker
        Ok(address)
    }

    fn get_user_account(&self, address: &[u8]) -> VMResult<Option<UserAccount>> {
        let state = self.state.lock();
        Ok(state.accounts.get(address).map(|account| UserAccount {
            address: account.address.clone(),
            nonce: account.nonce,
            balance: account.balance.clone(),
            code_hash: if account.code.is_empty() {
                Vec::new()
            } else {
                account.code.clone() // mock world: the code doubles as its hash
            },
            code_metadata: account.code_metadata.clone(),
            owner_address: account.owner_address.clone(),
        }))
    }

    fn get_code(&self, address: &[u8]) -> VMResult<Vec<u8>> {
        let state = self.state.lock();
        Ok(state
            .accounts
            .get(address)
            .map(|account| account.code.clone())
            .unwrap_or_default())
    }

    fn get_storage_data(&self, address: &[u8], key: &[u8]) -> VMResult<Vec<u8>> {
        let state = self.state.lock();
        Ok(state
            .accounts
            .get(address)
            .and_then(|account| account.storage.get(key))
            .cloned()
            .unwrap_or_default())
    }

    fn get_shard_of_address(&self, address: &[u8]) -> u32 {
        self.state
            .lock()
            .accounts
            .get(address)
            .map(|account| account.shard)
            .unwrap_or(0)
    }

    fn is_smart_contract(&self, address: &[u8]) -> bool {
        self.state
            .lock()
            .accounts
            .get(address)
            .map(|account| !account.code.is_empty())
            .unwrap_or(false)
    }

    fn is_payable(&self, address: &[u8]) -> VMResult<bool> {
        let state = self.state.lock();
        let Some(account) = state.accounts.get(address) else {
            return Ok(true); // plain user accounts accept payments
        };
        if account.code.is_empty() {
            return Ok(true);
        }
        Ok(CodeMetadata::from_bytes(&account.code_metadata).payable)
    }

    fn save_compiled_code(&self, code_hash: &[u8], compiled_code: &[u8]) {
        self.state
            .lock()
            .compiled_code
            .insert(code_hash.to_vec(), compiled_code.to_vec());
    }

    fn get_compiled_code(&self, code_hash: &[u8]) -> Option<Vec<u8>> {
        self.state.lock().compiled_code.get(code_hash).cloned()
    }

    fn get_esdt_token(
        &self,
        address: &[u8],
        token_id: &[u8],
        _nonce: u64,
    ) -> VMResult<EsdtTokenData> {
        let state = self.state.lock();
        let value = state
            .accounts
            .get(address)
            .and_then(|account| account.esdt_balances.get(token_id))
            .cloned()
            .unwrap_or_else(BigInt::zero);
        Ok(EsdtTokenData {
            value,
            name: token_id.to_vec(),
            ..Default::default()
        })
    }

    fn get_blockhash(&self, nonce: u64) -> VMResult<Vec<u8>> {
        let mut hash = vec![0u8; 32];
        hash[24..].copy_from_slice(&nonce.to_be_bytes());
        Ok(hash)
    }

    fn current_block(&self) -> BlockInfo {
        self.state.lock().current_block.clone()
    }

    fn last_block(&self) -> BlockInfo {
        self.state.lock().last_block.clone()
    }

    fn get_state_root_hash(&self) -> Vec<u8> {
        self.state.lock().state_root.clone()
    }

    fn get_snapshot(&self) -> i32 {
        let mut state = self.state.lock();
        let snapshot = state.accounts.clone();
        state.snapshots.push(snapshot);
        state.snapshots.len() as i32
    }

    fn revert_to_snapshot(&self, snapshot: i32) -> VMResult<()> {
        let mut state = self.state.lock();
        if snapshot < 1 || snapshot as usize > state.snapshots.len() {
            return Err(VMError::HookError(format!(
                "unknown snapshot {snapshot}"
            )));
        }
        state.snapshots.truncate(snapshot as usize);
        let accounts = state.snapshots.pop().expect("bounds checked above");
        state.accounts = accounts;
        Ok(())
    }

    fn process_built_in_function(&self, input: &ContractCallInput) -> VMResult<VMOutput> {
        let handlers = self.builtin_handlers.lock();
        let handler = handlers
            .get(&input.function)
            .ok_or(VMError::InvalidBuiltinFunctionCall)?;
        handler(input, self)
    }
}

/// Built-in name registry backed by the handlers tests registered.
pub struct MemBuiltinContainer {
    names: Vec<String>,
}

impl MemBuiltinContainer {
    pub fn new(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn empty() -> Self {
        Self { names: Vec::new() }
    }
}

impl BuiltinFunctionContainer for MemBuiltinContainer {
    fn is_builtin_function(&self, function_name: &str) -> bool {
        self.names.iter().any(|n| n == function_name)
    }
}
