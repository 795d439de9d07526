//! Wire-level types for the Vulcan VM.
//!
//! This crate defines everything that crosses the VM boundary: contract call
//! and create inputs, the VM output with its accounts, transfers and logs,
//! the gas schedule, the error and return-code vocabulary, and the
//! `function@hex@hex` call-data codec used by cross-shard transfers.
//!
//! Nothing in here performs I/O; the execution core lives in `vulcan-host`.

pub mod calldata;
pub mod error;
pub mod gas;
pub mod input;
pub mod output;
pub mod types;

pub use error::{ReturnCode, VMError, VMResult};
pub use gas::{BaseOperationCost, BigIntApiCost, GasSchedule, ManagedBufferApiCost, VMApiCost};
pub use input::{CallType, ContractCallInput, ContractCreateInput, EsdtTransfer, VMInput};
pub use output::{LogEntry, OutputAccount, OutputTransfer, StorageUpdate, VMOutput};
pub use types::{Address, CodeMetadata, Hash, ADDRESS_LEN};
