//! Error vocabulary of the VM and the user-visible return codes.
//!
//! `VMError` is the single error type used across the workspace. Variants
//! that refine a broader failure keep the parent text in their message, so
//! operators can still grep for the family (`"failed transfer"`,
//! `"invalid function"`, and so on).

use thiserror::Error;

/// Convenience result type used across the VM.
pub type VMResult<T> = Result<T, VMError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VMError {
    // ── Bounds and validation ──
    #[error("bad bounds")]
    BadBounds,
    #[error("bad bounds (lower)")]
    BadLowerBounds,
    #[error("bad bounds (upper)")]
    BadUpperBounds,
    #[error("negative length")]
    NegativeLength,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("argument index out of range")]
    ArgIndexOutOfRange,
    #[error("argument out of range")]
    ArgOutOfRange,
    #[error("invalid public key size")]
    InvalidPublicKeySize,

    // ── Gas ──
    #[error("not enough gas")]
    NotEnoughGas,

    // ── Function and contract ──
    #[error("invalid function (not found)")]
    FuncNotFound,
    #[error("invalid function (invalid name)")]
    InvalidFunctionName,
    #[error("invalid function (nonvoid signature)")]
    FunctionNonvoidSignature,
    #[error("invalid function (calling init() directly is forbidden)")]
    InitFuncCalledInRun,
    #[error("invalid function (calling callBack() directly is forbidden)")]
    CallBackFuncCalledInRun,
    #[error("invalid function (unexpected callback was received)")]
    CallBackFuncNotExpected,
    #[error("invalid contract code")]
    ContractInvalid,
    #[error("invalid contract code (not found)")]
    ContractNotFound,
    #[error("invalid contract code (missing memory declaration)")]
    MemoryDeclarationMissing,
    #[error("invalid upgrade arguments")]
    InvalidUpgradeArguments,
    #[error("cannot use built-in function as callback")]
    CannotUseBuiltinAsCallback,

    // ── Storage ──
    #[error("cannot write to storage under reserved key")]
    StoreReservedKey,
    #[error("cannot write to protected key")]
    CannotWriteProtectedKey,
    #[error("storage value out of range")]
    StorageValueOutOfRange,

    // ── Transfers and payability ──
    #[error("failed transfer")]
    FailedTransfer,
    #[error("failed transfer (insufficient funds)")]
    TransferInsufficientFunds,
    #[error("failed transfer (negative value)")]
    TransferNegativeValue,
    #[error("sending value to non payable contract")]
    AccountNotPayable,
    #[error("transfer value on esdt call")]
    TransferValueOnEsdtCall,
    #[error("account does not exist")]
    InvalidAccount,
    #[error("cannot deploy over existing account")]
    DeploymentOverExistingAccount,

    // ── Async ──
    #[error("async call group exists already")]
    AsyncCallGroupExistsAlready,
    #[error("async call group does not exist")]
    AsyncCallGroupDoesNotExist,
    #[error("async call group already complete")]
    AsyncCallGroupAlreadyComplete,
    #[error("only one async call allowed to an address")]
    OnlyOneAsyncCallToAddress,
    #[error("only one legacy async call allowed")]
    OnlyOneLegacyAsyncCall,
    #[error("async call not found")]
    AsyncCallNotFound,
    #[error("no async context found in storage")]
    NoStoredAsyncContext,
    #[error("cannot interpret callback args")]
    CannotInterpretCallbackArgs,
    #[error("async context can only be modified by the first contract instance or first callback")]
    AsyncContextUnmodifiable,

    // ── Arithmetic ──
    #[error("division by 0")]
    DivZero,
    #[error("bitwise operations only allowed on positive integers")]
    BitwiseNegative,
    #[error("bitwise shift operations only allowed on positive integers and by a positive amount")]
    ShiftNegative,
    #[error("no bigInt under the given handle")]
    NoBigIntUnderHandle,
    #[error("no managed buffer under the given handle")]
    NoManagedBufferUnderHandle,

    // ── Runtime and host ──
    #[error("VM is closing")]
    VMIsClosing,
    #[error("sync execution request is not in the same shard")]
    SyncExecutionNotInSameShard,
    #[error("execution failed (max instances reached)")]
    MaxInstancesReached,
    #[error("execution failed")]
    ExecutionFailed,
    #[error("execution failed with timeout")]
    ExecutionFailedWithTimeout,
    #[error("VM execution panicked: {0}")]
    ExecutionPanicked(String),
    #[error("error signalled by smartcontract: {0}")]
    SignalError(String),
    #[error("calling built-in function on the same context is disallowed")]
    BuiltinCallOnSameContextDisallowed,
    #[error("invalid built-in function call")]
    InvalidBuiltinFunctionCall,
    #[error("operation not permitted in read only mode")]
    InvalidCallOnReadOnlyMode,
    #[error("input and output gas does not match")]
    InputAndOutputGasDoesNotMatch,
    #[error("unhandled runtime breakpoint")]
    UnhandledRuntimeBreakpoint,
    #[error("upgrade not allowed")]
    UpgradeNotAllowed,

    // ── Configuration and hook ──
    #[error("missing gas cost: {0}.{1}")]
    MissingGasCost(String, String),
    #[error("blockchain hook error: {0}")]
    HookError(String),
    #[error("cannot decode call data: {0}")]
    CallDataDecode(String),
    #[error("cannot decode stored async context: {0}")]
    AsyncContextDecode(String),
    #[error("executor error: {0}")]
    ExecutorError(String),
}

impl VMError {
    /// True for `NotEnoughGas` and for errors that wrap it (the executor
    /// reports metering exhaustion through its own variant).
    pub fn is_not_enough_gas(&self) -> bool {
        matches!(self, VMError::NotEnoughGas)
    }
}

/// User-visible outcome class of an execution, carried on the `VMOutput`.
///
/// The numeric values are part of the wire format and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum ReturnCode {
    Ok = 0,
    FunctionNotFound = 1,
    ContractNotFound = 3,
    UserError = 4,
    OutOfGas = 7,
    ContractInvalid = 9,
    ExecutionFailed = 10,
}

impl ReturnCode {
    pub fn is_ok(self) -> bool {
        matches!(self, ReturnCode::Ok)
    }

    pub fn as_u64(self) -> u64 {
        self as u64
    }

    /// Classify an error into the return code reported to the user.
    pub fn from_error(err: &VMError) -> Self {
        match err {
            VMError::SignalError(_) => ReturnCode::UserError,
            VMError::FuncNotFound
            | VMError::InvalidFunctionName
            | VMError::InitFuncCalledInRun
            | VMError::CallBackFuncCalledInRun => ReturnCode::FunctionNotFound,
            VMError::ContractNotFound | VMError::InvalidAccount => ReturnCode::ContractNotFound,
            VMError::ContractInvalid
            | VMError::MemoryDeclarationMissing
            | VMError::FunctionNonvoidSignature => ReturnCode::ContractInvalid,
            VMError::NotEnoughGas => ReturnCode::OutOfGas,
            _ => ReturnCode::ExecutionFailed,
        }
    }
}

impl std::fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ReturnCode::Ok => "ok",
            ReturnCode::FunctionNotFound => "function not found",
            ReturnCode::ContractNotFound => "contract not found",
            ReturnCode::UserError => "user error",
            ReturnCode::OutOfGas => "out of gas",
            ReturnCode::ContractInvalid => "contract invalid",
            ReturnCode::ExecutionFailed => "execution failed",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_messages_keep_family_text() {
        assert!(VMError::TransferInsufficientFunds
            .to_string()
            .contains("failed transfer"));
        assert!(VMError::FuncNotFound.to_string().contains("invalid function"));
        assert!(VMError::MemoryDeclarationMissing
            .to_string()
            .contains("invalid contract code"));
        assert!(VMError::MaxInstancesReached
            .to_string()
            .contains("execution failed"));
    }

    #[test]
    fn test_return_code_values() {
        assert_eq!(ReturnCode::Ok.as_u64(), 0);
        assert_eq!(ReturnCode::FunctionNotFound.as_u64(), 1);
        assert_eq!(ReturnCode::ContractNotFound.as_u64(), 3);
        assert_eq!(ReturnCode::UserError.as_u64(), 4);
        assert_eq!(ReturnCode::OutOfGas.as_u64(), 7);
        assert_eq!(ReturnCode::ContractInvalid.as_u64(), 9);
        assert_eq!(ReturnCode::ExecutionFailed.as_u64(), 10);
    }

    #[test]
    fn test_return_code_from_error() {
        assert_eq!(
            ReturnCode::from_error(&VMError::SignalError("boom".into())),
            ReturnCode::UserError
        );
        assert_eq!(
            ReturnCode::from_error(&VMError::NotEnoughGas),
            ReturnCode::OutOfGas
        );
        assert_eq!(
            ReturnCode::from_error(&VMError::ContractNotFound),
            ReturnCode::ContractNotFound
        );
        assert_eq!(
            ReturnCode::from_error(&VMError::ExecutionFailedWithTimeout),
            ReturnCode::ExecutionFailed
        );
    }

    #[test]
    fn test_is_not_enough_gas() {
        assert!(VMError::NotEnoughGas.is_not_enough_gas());
        assert!(!VMError::ExecutionFailed.is_not_enough_gas());
    }
}
