//! Trait surface consumed by the execution core.
//!
//! Implementations must be deterministic: the same query against the same
//! chain state must return the same answer on every node.

use num_bigint::BigInt;

use vulcan_primitives::{Address, ContractCallInput, VMOutput, VMResult};

/// A user account as read from persisted chain state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserAccount {
    pub address: Address,
    pub nonce: u64,
    pub balance: BigInt,
    pub code_hash: Vec<u8>,
    pub code_metadata: Vec<u8>,
    pub owner_address: Address,
}

/// Metadata of one block, current or last committed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockInfo {
    pub nonce: u64,
    pub round: u64,
    pub epoch: u32,
    pub timestamp: u64,
    pub random_seed: Vec<u8>,
}

/// Token data for a fungible or non-fungible position of an account.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EsdtTokenData {
    pub value: BigInt,
    pub token_type: u32,
    pub name: Vec<u8>,
    pub attributes: Vec<u8>,
    pub uris: Vec<Vec<u8>>,
}

/// The blockchain hook: the node-side owner of accounts, code, storage and
/// block metadata. The VM holds it for the lifetime of the host.
pub trait BlockchainHook: Send + Sync {
    /// Deterministic address for a contract deployed by `creator` at `nonce`.
    fn new_address(&self, creator: &[u8], nonce: u64, vm_type: &[u8]) -> VMResult<Address>;

    /// Read an account; `Ok(None)` when the address has never been used.
    fn get_user_account(&self, address: &[u8]) -> VMResult<Option<UserAccount>>;

    /// Contract bytecode stored under the address; empty when none.
    fn get_code(&self, address: &[u8]) -> VMResult<Vec<u8>>;

    /// Read one storage cell of an account; empty value when unset.
    fn get_storage_data(&self, address: &[u8], key: &[u8]) -> VMResult<Vec<u8>>;

    fn get_shard_of_address(&self, address: &[u8]) -> u32;
    fn is_smart_contract(&self, address: &[u8]) -> bool;
    fn is_payable(&self, address: &[u8]) -> VMResult<bool>;

    /// Persist a compiled artifact for a code hash. Best-effort cache.
    fn save_compiled_code(&self, code_hash: &[u8], compiled_code: &[u8]);
    fn get_compiled_code(&self, code_hash: &[u8]) -> Option<Vec<u8>>;

    fn get_esdt_token(
        &self,
        address: &[u8],
        token_id: &[u8],
        nonce: u64,
    ) -> VMResult<EsdtTokenData>;

    fn get_blockhash(&self, nonce: u64) -> VMResult<Vec<u8>>;
    fn current_block(&self) -> BlockInfo;
    fn last_block(&self) -> BlockInfo;
    fn get_state_root_hash(&self) -> Vec<u8>;

    /// Mark the current state for a later `revert_to_snapshot`.
    fn get_snapshot(&self) -> i32;
    fn revert_to_snapshot(&self, snapshot: i32) -> VMResult<()>;

    /// Run a node-resolved built-in function and return its output.
    fn process_built_in_function(&self, input: &ContractCallInput) -> VMResult<VMOutput>;
}

/// Registry of built-in function names the node resolves itself.
pub trait BuiltinFunctionContainer: Send + Sync {
    fn is_builtin_function(&self, function_name: &str) -> bool;
}

/// Result of parsing an ESDT transfer call's data field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedEsdtTransfers {
    pub transfers: Vec<vulcan_primitives::EsdtTransfer>,
    pub real_destination: Address,
    pub call_function: String,
    pub call_args: Vec<Vec<u8>>,
}

/// Parser for the chain's native token-transfer call format.
pub trait EsdtTransferParser: Send + Sync {
    fn parse_esdt_transfers(
        &self,
        sender: &[u8],
        receiver: &[u8],
        function: &str,
        args: &[Vec<u8>],
    ) -> VMResult<ParsedEsdtTransfers>;
}
