//! Consumed interfaces of the Vulcan VM.
//!
//! The VM core never touches persisted chain state directly: accounts, code,
//! storage, block metadata and built-in functions are all reached through
//! the traits defined here. `MemWorld` is the in-memory implementation used
//! by tests and local tooling.

pub mod mem_world;
pub mod traits;

pub use mem_world::{MemBuiltinContainer, MemWorld, WorldAccount};
pub use traits::{
    BlockInfo, BlockchainHook, BuiltinFunctionContainer, EsdtTokenData, EsdtTransferParser,
    ParsedEsdtTransfers, UserAccount,
};
