//! The core EEI: frame introspection, storage, transfers, logs, async.

use num_bigint::BigInt;
use num_traits::{Signed, Zero};

use vulcan_primitives::calldata::CallDataBuilder;
use vulcan_primitives::gas::{add_u64, mul_u64};
use vulcan_primitives::types::{custom_storage_key, DELETE_FUNCTION_NAME, TIMELOCK_PREFIX, UPGRADE_FUNCTION_NAME};
use vulcan_primitives::{CallType, ContractCallInput, EsdtTransfer, VMError, VMResult};

use crate::contexts::async_ctx::{AsyncCall, AsyncCallExecutionMode, AsyncCallStatus};
use crate::contexts::StorageStatus;
use crate::executor::BreakpointValue;
use crate::host::VmHost;

use super::use_gas;

// ── Frame introspection ──

pub fn get_gas_left(host: &mut VmHost) -> VMResult<i64> {
    let cost = host.metering.gas_schedule().api.get_gas_left;
    use_gas(host, cost)?;
    Ok(host.metering.gas_left(&host.runtime) as i64)
}

pub fn get_sc_address(host: &mut VmHost) -> VMResult<Vec<u8>> {
    let cost = host.metering.gas_schedule().api.get_sc_address;
    use_gas(host, cost)?;
    Ok(host.runtime.sc_address().to_vec())
}

pub fn get_caller(host: &mut VmHost) -> VMResult<Vec<u8>> {
    let cost = host.metering.gas_schedule().api.get_caller;
    use_gas(host, cost)?;
    Ok(host.runtime.vm_input().caller_addr.clone())
}

pub fn get_owner_address(host: &mut VmHost) -> VMResult<Vec<u8>> {
    let cost = host.metering.gas_schedule().api.get_owner_address;
    use_gas(host, cost)?;
    host.blockchain.get_owner_address(host.runtime.sc_address())
}

pub fn get_shard_of_address(host: &mut VmHost, address: &[u8]) -> VMResult<u32> {
    let cost = host.metering.gas_schedule().api.get_shard_of_address;
    use_gas(host, cost)?;
    Ok(host.blockchain.get_shard_of_address(address))
}

pub fn is_smart_contract(host: &mut VmHost, address: &[u8]) -> VMResult<bool> {
    let cost = host.metering.gas_schedule().api.is_smart_contract;
    use_gas(host, cost)?;
    Ok(host.blockchain.is_smart_contract(address))
}

pub fn get_num_arguments(host: &mut VmHost) -> VMResult<i32> {
    let cost = host.metering.gas_schedule().api.get_num_arguments;
    use_gas(host, cost)?;
    Ok(host.runtime.arguments().len() as i32)
}

pub fn get_argument(host: &mut VmHost, index: i32) -> VMResult<Vec<u8>> {
    let cost = host.metering.gas_schedule().api.get_argument;
    use_gas(host, cost)?;
    if index < 0 {
        return Err(VMError::ArgIndexOutOfRange);
    }
    host.runtime
        .arguments()
        .get(index as usize)
        .cloned()
        .ok_or(VMError::ArgIndexOutOfRange)
}

pub fn get_function(host: &mut VmHost) -> VMResult<String> {
    let cost = host.metering.gas_schedule().api.get_function;
    use_gas(host, cost)?;
    Ok(host.runtime.function().to_string())
}

pub fn signal_error(host: &mut VmHost, message: &str) -> VMResult<()> {
    let cost = host.metering.gas_schedule().api.signal_error;
    use_gas(host, cost)?;
    host.runtime.signal_user_error(message, &mut host.output);
    Ok(())
}

// ── Balances and payments ──

pub fn get_external_balance(host: &mut VmHost, address: &[u8]) -> VMResult<Vec<u8>> {
    let cost = host.metering.gas_schedule().api.get_external_balance;
    use_gas(host, cost)?;
    Ok(host.blockchain.get_balance(address, &mut host.output))
}

pub fn get_call_value(host: &mut VmHost) -> VMResult<Vec<u8>> {
    let cost = host.metering.gas_schedule().api.get_call_value;
    use_gas(host, cost)?;
    let (_, bytes) = host.runtime.vm_input().call_value.to_bytes_be();
    Ok(bytes)
}

pub fn get_num_esdt_transfers(host: &mut VmHost) -> VMResult<i32> {
    let cost = host.metering.gas_schedule().api.get_call_value;
    use_gas(host, cost)?;
    Ok(host.runtime.vm_input().esdt_transfers.len() as i32)
}

pub fn get_esdt_value_by_index(host: &mut VmHost, index: i32) -> VMResult<Vec<u8>> {
    let cost = host.metering.gas_schedule().api.get_call_value;
    use_gas(host, cost)?;
    let transfer = esdt_transfer_at(host, index)?;
    let (_, bytes) = transfer.value.to_bytes_be();
    Ok(bytes)
}

pub fn get_esdt_token_name_by_index(host: &mut VmHost, index: i32) -> VMResult<Vec<u8>> {
    let cost = host.metering.gas_schedule().api.get_call_value;
    use_gas(host, cost)?;
    Ok(esdt_transfer_at(host, index)?.token_name)
}

fn esdt_transfer_at(host: &VmHost, index: i32) -> VMResult<EsdtTransfer> {
    if index < 0 {
        return Err(VMError::ArgIndexOutOfRange);
    }
    host.runtime
        .vm_input()
        .esdt_transfers
        .get(index as usize)
        .cloned()
        .ok_or(VMError::ArgIndexOutOfRange)
}

/// Fail the execution if the call carries any payment.
pub fn check_no_payment(host: &mut VmHost) -> VMResult<()> {
    let cost = host.metering.gas_schedule().api.get_call_value;
    use_gas(host, cost)?;
    if host.runtime.vm_input().call_value.is_positive() {
        let err = VMError::SignalError("function does not accept payment".to_string());
        host.runtime
            .signal_user_error("function does not accept payment", &mut host.output);
        return Err(err);
    }
    if !host.runtime.vm_input().esdt_transfers.is_empty() {
        let err = VMError::SignalError("function does not accept token payment".to_string());
        host.runtime
            .signal_user_error("function does not accept token payment", &mut host.output);
        return Err(err);
    }
    Ok(())
}

// ── Storage ──

pub fn storage_store(host: &mut VmHost, key: &[u8], value: &[u8]) -> VMResult<StorageStatus> {
    let cost = host.metering.gas_schedule().api.storage_store;
    use_gas(host, cost)?;
    host.storage.set_storage(
        key,
        value,
        &mut host.metering,
        &host.runtime,
        &mut host.output,
    )
}

pub fn storage_load(host: &mut VmHost, key: &[u8]) -> VMResult<Vec<u8>> {
    let (value, used_cache) =
        host.storage
            .get_storage(key, &mut host.metering, &host.runtime, &mut host.output);
    let schedule = host.metering.gas_schedule();
    let load_cost = if used_cache {
        schedule.api.cached_storage_load
    } else {
        schedule.api.storage_load
    };
    use_gas(host, load_cost)?;
    Ok(value)
}

pub fn storage_load_from_address(
    host: &mut VmHost,
    address: &[u8],
    key: &[u8],
) -> VMResult<Vec<u8>> {
    let (value, used_cache) = host.storage.get_storage_from_address(
        address,
        key,
        &mut host.metering,
        &host.runtime,
        &mut host.output,
    );
    let schedule = host.metering.gas_schedule();
    let load_cost = if used_cache {
        schedule.api.cached_storage_load
    } else {
        schedule.api.storage_load
    };
    use_gas(host, load_cost)?;
    Ok(value)
}

// ── Storage locks ──

fn timelock_key(key: &[u8]) -> Vec<u8> {
    custom_storage_key(TIMELOCK_PREFIX, key)
}

pub fn set_storage_lock(host: &mut VmHost, key: &[u8], lock_timestamp: i64) -> VMResult<()> {
    let cost = host.metering.gas_schedule().api.int64_storage_store;
    use_gas(host, cost)?;
    let lock_key = timelock_key(key);
    let value = BigInt::from(lock_timestamp).to_signed_bytes_be();
    host.storage
        .set_protected_storage(
            &lock_key,
            &value,
            &mut host.metering,
            &host.runtime,
            &mut host.output,
        )
        .map(|_| ())
}

pub fn get_storage_lock(host: &mut VmHost, key: &[u8]) -> VMResult<i64> {
    let cost = host.metering.gas_schedule().api.int64_storage_load;
    use_gas(host, cost)?;
    let lock_key = timelock_key(key);
    let (value, _) = host
        .storage
        .get_storage_unmetered(&lock_key, &mut host.output);
    if value.is_empty() {
        return Ok(0);
    }
    let timestamp = BigInt::from_signed_bytes_be(&value);
    i64::try_from(timestamp).map_err(|_| VMError::StorageValueOutOfRange)
}

pub fn is_storage_locked(host: &mut VmHost, key: &[u8]) -> VMResult<bool> {
    let lock_timestamp = get_storage_lock(host, key)?;
    if lock_timestamp <= 0 {
        return Ok(false);
    }
    let current = host.blockchain.current_block().timestamp;
    Ok(lock_timestamp as u64 > current)
}

pub fn clear_storage_lock(host: &mut VmHost, key: &[u8]) -> VMResult<()> {
    set_storage_lock(host, key, 0)
}

// ── Transfers ──

/// Plain value transfer. Data naming a built-in function must not carry
/// value: token semantics would be bypassed.
pub fn transfer_value(
    host: &mut VmHost,
    destination: &[u8],
    value: &BigInt,
    data: &[u8],
) -> VMResult<()> {
    let cost = host.metering.gas_schedule().api.transfer_value;
    use_gas(host, cost)?;
    if host.runtime.read_only() {
        return Err(VMError::InvalidCallOnReadOnlyMode);
    }

    if !value.is_zero() {
        let (function, _) = vulcan_primitives::calldata::parse_call_data(data).unwrap_or_default();
        if host.is_builtin_function(&function) {
            return Err(VMError::TransferValueOnEsdtCall);
        }
    }

    let sender = host.runtime.sc_address().to_vec();
    host.output.transfer(
        &host.blockchain,
        destination,
        &sender,
        0,
        0,
        value,
        data.to_vec(),
        CallType::Direct,
    )
}

/// Transfer that becomes a synchronous call when a function is named and
/// the destination is an in-shard contract.
pub fn transfer_value_execute(
    host: &mut VmHost,
    destination: &[u8],
    value: &BigInt,
    gas_limit: u64,
    function: &str,
    arguments: &[Vec<u8>],
) -> VMResult<()> {
    let cost = host.metering.gas_schedule().api.transfer_value;
    use_gas(host, cost)?;
    if host.runtime.read_only() {
        return Err(VMError::InvalidCallOnReadOnlyMode);
    }

    let sender = host.runtime.sc_address().to_vec();

    let executable = !function.is_empty()
        && host.are_in_same_shard(&sender, destination)
        && host.blockchain.is_smart_contract(destination);
    if executable {
        let input = ContractCallInput {
            vm_input: vulcan_primitives::VMInput {
                caller_addr: sender,
                arguments: arguments.to_vec(),
                call_value: value.clone(),
                call_type: CallType::Direct,
                gas_price: host.runtime.vm_input().gas_price,
                gas_provided: host.metering.bound_gas_limit(&host.runtime, gas_limit as i64),
                original_tx_hash: host.runtime.original_tx_hash().to_vec(),
                current_tx_hash: host.runtime.current_tx_hash().to_vec(),
                prev_tx_hash: host.runtime.prev_tx_hash().to_vec(),
                ..Default::default()
            },
            recipient_addr: destination.to_vec(),
            function: function.to_string(),
        };
        host.execute_on_dest_context(&input)?;
        return Ok(());
    }

    let data = if function.is_empty() {
        Vec::new()
    } else {
        let mut builder = CallDataBuilder::new(function);
        for argument in arguments {
            builder = builder.arg_bytes(argument);
        }
        builder.build()
    };
    host.output.transfer(
        &host.blockchain,
        destination,
        &sender,
        gas_limit,
        0,
        value,
        data,
        CallType::Direct,
    )
}

pub fn transfer_esdt_execute(
    host: &mut VmHost,
    destination: &[u8],
    token_name: &[u8],
    token_nonce: u64,
    value: &BigInt,
    _gas_limit: u64,
    _function: &str,
    _arguments: &[Vec<u8>],
) -> VMResult<()> {
    let cost = host.metering.gas_schedule().api.transfer_value;
    use_gas(host, cost)?;
    if host.runtime.read_only() {
        return Err(VMError::InvalidCallOnReadOnlyMode);
    }

    let sender = host.runtime.sc_address().to_vec();
    let transfers = vec![EsdtTransfer {
        token_name: token_name.to_vec(),
        token_nonce,
        value: value.clone(),
        token_type: 0,
    }];
    host.execute_esdt_transfer(destination, &sender, &transfers, CallType::Direct)?;
    Ok(())
}

// ── Async calls ──

/// The legacy single async call: registration plus immediate end of the
/// contract body via the async-call breakpoint.
pub fn async_call(
    host: &mut VmHost,
    destination: &[u8],
    value: &[u8],
    data: &[u8],
) -> VMResult<()> {
    let step_cost = host.metering.gas_schedule().api.async_call_step;
    use_gas(host, step_cost)?;

    let gas_locked = if host.runtime.has_function(vulcan_primitives::types::CALLBACK_FUNCTION_NAME)
    {
        host.metering.compute_gas_locked_for_async()
    } else {
        0
    };

    let call = AsyncCall {
        call_id: Vec::new(),
        status: AsyncCallStatus::Pending,
        execution_mode: AsyncCallExecutionMode::Unknown,
        destination: destination.to_vec(),
        data: data.to_vec(),
        value_bytes: value.to_vec(),
        provided_gas: 0,
        gas_limit: 0,
        gas_locked,
        success_callback: String::new(),
        error_callback: String::new(),
        callback_closure: None,
    };
    host.async_ctx.register_legacy_async_call(call)?;
    host.runtime
        .set_runtime_breakpoint(BreakpointValue::AsyncCall);
    Ok(())
}

/// Register a call in a named group with explicit callbacks and gas.
#[allow(clippy::too_many_arguments)]
pub fn create_async_call(
    host: &mut VmHost,
    group_id: &str,
    destination: &[u8],
    value: &[u8],
    data: &[u8],
    success_callback: &str,
    error_callback: &str,
    gas: u64,
    gas_locked: u64,
    callback_closure: Option<Vec<u8>>,
) -> VMResult<()> {
    let cost = host.metering.gas_schedule().api.create_async_call;
    use_gas(host, cost)?;

    for callback in [success_callback, error_callback] {
        if !callback.is_empty() {
            host.runtime
                .validate_callback_name(callback, host.builtins.as_ref())?;
        }
    }

    let call = AsyncCall {
        call_id: Vec::new(),
        status: AsyncCallStatus::Pending,
        execution_mode: AsyncCallExecutionMode::Unknown,
        destination: destination.to_vec(),
        data: data.to_vec(),
        value_bytes: value.to_vec(),
        provided_gas: gas,
        gas_limit: 0,
        gas_locked,
        success_callback: success_callback.to_string(),
        error_callback: error_callback.to_string(),
        callback_closure,
    };
    host.async_ctx.register_async_call(group_id, call)
}

pub fn set_async_group_callback(
    host: &mut VmHost,
    group_id: &str,
    callback: &str,
    data: &[u8],
    gas: u64,
) -> VMResult<()> {
    let cost = host.metering.gas_schedule().api.set_async_callback;
    use_gas(host, cost)?;
    host.runtime
        .validate_callback_name(callback, host.builtins.as_ref())?;
    host.async_ctx
        .set_group_callback(group_id, callback, data, gas)
}

/// Contract upgrade rides the async machinery under the reserved name, so
/// its commit happens through the callback protocol.
#[allow(clippy::too_many_arguments)]
pub fn upgrade_contract(
    host: &mut VmHost,
    destination: &[u8],
    value: &[u8],
    code: &[u8],
    code_metadata: &[u8],
    arguments: &[Vec<u8>],
) -> VMResult<()> {
    let mut builder = CallDataBuilder::new(UPGRADE_FUNCTION_NAME)
        .arg_bytes(code)
        .arg_bytes(code_metadata);
    for argument in arguments {
        builder = builder.arg_bytes(argument);
    }
    async_call(host, destination, value, &builder.build())
}

/// Contract deletion, same commit path as upgrade.
pub fn delete_contract(
    host: &mut VmHost,
    destination: &[u8],
    arguments: &[Vec<u8>],
) -> VMResult<()> {
    let mut builder = CallDataBuilder::new(DELETE_FUNCTION_NAME);
    for argument in arguments {
        builder = builder.arg_bytes(argument);
    }
    async_call(host, destination, &[], &builder.build())
}

// ── Nested execution ──

fn build_nested_call_input(
    host: &VmHost,
    destination: &[u8],
    value: &BigInt,
    gas_limit: u64,
    function: &str,
    arguments: &[Vec<u8>],
) -> ContractCallInput {
    ContractCallInput {
        vm_input: vulcan_primitives::VMInput {
            caller_addr: host.runtime.sc_address().to_vec(),
            arguments: arguments.to_vec(),
            call_value: value.clone(),
            call_type: CallType::Direct,
            gas_price: host.runtime.vm_input().gas_price,
            gas_provided: gas_limit,
            original_tx_hash: host.runtime.original_tx_hash().to_vec(),
            current_tx_hash: host.runtime.current_tx_hash().to_vec(),
            prev_tx_hash: host.runtime.prev_tx_hash().to_vec(),
            ..Default::default()
        },
        recipient_addr: destination.to_vec(),
        function: function.to_string(),
    }
}

pub fn execute_on_dest_context(
    host: &mut VmHost,
    gas_limit: u64,
    destination: &[u8],
    value: &BigInt,
    function: &str,
    arguments: &[Vec<u8>],
) -> VMResult<()> {
    let cost = host.metering.gas_schedule().api.execute_on_dest_context;
    use_gas(host, cost)?;
    let bounded = host.metering.bound_gas_limit(&host.runtime, gas_limit as i64);
    let input = build_nested_call_input(host, destination, value, bounded, function, arguments);
    host.execute_on_dest_context(&input)?;
    Ok(())
}

pub fn execute_on_same_context(
    host: &mut VmHost,
    gas_limit: u64,
    destination: &[u8],
    value: &BigInt,
    function: &str,
    arguments: &[Vec<u8>],
) -> VMResult<()> {
    let cost = host.metering.gas_schedule().api.execute_on_same_context;
    use_gas(host, cost)?;
    let bounded = host.metering.bound_gas_limit(&host.runtime, gas_limit as i64);
    let input = build_nested_call_input(host, destination, value, bounded, function, arguments);
    host.execute_on_same_context(&input)
}

pub fn execute_read_only(
    host: &mut VmHost,
    gas_limit: u64,
    destination: &[u8],
    function: &str,
    arguments: &[Vec<u8>],
) -> VMResult<()> {
    let cost = host.metering.gas_schedule().api.execute_read_only;
    use_gas(host, cost)?;
    let bounded = host.metering.bound_gas_limit(&host.runtime, gas_limit as i64);
    let input = build_nested_call_input(
        host,
        destination,
        &BigInt::zero(),
        bounded,
        function,
        arguments,
    );
    host.execute_on_dest_context_read_only(&input)?;
    Ok(())
}

pub fn create_contract(
    host: &mut VmHost,
    gas_limit: u64,
    value: &BigInt,
    code: &[u8],
    code_metadata: &[u8],
    arguments: &[Vec<u8>],
) -> VMResult<Vec<u8>> {
    let cost = host.metering.gas_schedule().api.create_contract;
    use_gas(host, cost)?;
    let bounded = host.metering.bound_gas_limit(&host.runtime, gas_limit as i64);
    let input = vulcan_primitives::ContractCreateInput {
        vm_input: vulcan_primitives::VMInput {
            caller_addr: host.runtime.sc_address().to_vec(),
            arguments: arguments.to_vec(),
            call_value: value.clone(),
            gas_provided: bounded,
            gas_price: host.runtime.vm_input().gas_price,
            original_tx_hash: host.runtime.original_tx_hash().to_vec(),
            current_tx_hash: host.runtime.current_tx_hash().to_vec(),
            prev_tx_hash: host.runtime.prev_tx_hash().to_vec(),
            ..Default::default()
        },
        contract_code: code.to_vec(),
        contract_code_metadata: code_metadata.to_vec(),
    };
    host.create_contract(&input)
}

// ── Output ──

pub fn finish(host: &mut VmHost, data: &[u8]) -> VMResult<()> {
    let schedule = host.metering.gas_schedule();
    let cost = add_u64(
        schedule.api.finish,
        mul_u64(schedule.base_ops.data_copy_per_byte, data.len() as u64),
    );
    use_gas(host, cost)?;
    host.output.finish(data.to_vec());
    Ok(())
}

pub fn write_log(host: &mut VmHost, topics: &[Vec<u8>], data: &[u8]) -> VMResult<()> {
    let schedule = host.metering.gas_schedule();
    let mut byte_count = data.len();
    for topic in topics {
        byte_count += topic.len();
    }
    let cost = add_u64(
        schedule.api.log,
        mul_u64(schedule.base_ops.data_copy_per_byte, byte_count as u64),
    );
    use_gas(host, cost)?;
    let address = host.runtime.sc_address().to_vec();
    host.output.write_log(&address, topics.to_vec(), data.to_vec());
    Ok(())
}

pub fn get_num_return_data(host: &mut VmHost) -> VMResult<i32> {
    let cost = host.metering.gas_schedule().api.get_return_data_size;
    use_gas(host, cost)?;
    Ok(host.output.return_data().len() as i32)
}

pub fn get_return_data(host: &mut VmHost, index: i32) -> VMResult<Vec<u8>> {
    let cost = host.metering.gas_schedule().api.get_return_data;
    use_gas(host, cost)?;
    if index < 0 {
        return Err(VMError::ArgIndexOutOfRange);
    }
    host.output
        .return_data()
        .get(index as usize)
        .cloned()
        .ok_or(VMError::ArgIndexOutOfRange)
}

pub fn clean_return_data(host: &mut VmHost) -> VMResult<()> {
    let cost = host.metering.gas_schedule().api.clean_return_data;
    use_gas(host, cost)?;
    host.output.clear_return_data();
    Ok(())
}

// ── Block metadata ──

pub fn get_block_timestamp(host: &mut VmHost) -> VMResult<i64> {
    let cost = host.metering.gas_schedule().api.get_block_timestamp;
    use_gas(host, cost)?;
    Ok(host.blockchain.current_block().timestamp as i64)
}

pub fn get_block_nonce(host: &mut VmHost) -> VMResult<i64> {
    let cost = host.metering.gas_schedule().api.get_block_nonce;
    use_gas(host, cost)?;
    Ok(host.blockchain.current_block().nonce as i64)
}

pub fn get_block_round(host: &mut VmHost) -> VMResult<i64> {
    let cost = host.metering.gas_schedule().api.get_block_round;
    use_gas(host, cost)?;
    Ok(host.blockchain.current_block().round as i64)
}

pub fn get_block_epoch(host: &mut VmHost) -> VMResult<i64> {
    let cost = host.metering.gas_schedule().api.get_block_epoch;
    use_gas(host, cost)?;
    Ok(host.blockchain.current_block().epoch as i64)
}

pub fn get_block_random_seed(host: &mut VmHost) -> VMResult<Vec<u8>> {
    let cost = host.metering.gas_schedule().api.get_block_random_seed;
    use_gas(host, cost)?;
    Ok(host.blockchain.current_block().random_seed)
}

pub fn get_prev_block_timestamp(host: &mut VmHost) -> VMResult<i64> {
    let cost = host.metering.gas_schedule().api.get_block_timestamp;
    use_gas(host, cost)?;
    Ok(host.blockchain.last_block().timestamp as i64)
}

pub fn get_prev_block_nonce(host: &mut VmHost) -> VMResult<i64> {
    let cost = host.metering.gas_schedule().api.get_block_nonce;
    use_gas(host, cost)?;
    Ok(host.blockchain.last_block().nonce as i64)
}

pub fn get_prev_block_random_seed(host: &mut VmHost) -> VMResult<Vec<u8>> {
    let cost = host.metering.gas_schedule().api.get_block_random_seed;
    use_gas(host, cost)?;
    Ok(host.blockchain.last_block().random_seed)
}

pub fn get_state_root_hash(host: &mut VmHost) -> VMResult<Vec<u8>> {
    let cost = host.metering.gas_schedule().api.get_state_root_hash;
    use_gas(host, cost)?;
    Ok(host.blockchain.get_state_root_hash())
}

pub fn get_block_hash(host: &mut VmHost, nonce: i64) -> VMResult<Vec<u8>> {
    let cost = host.metering.gas_schedule().api.get_block_hash;
    use_gas(host, cost)?;
    if nonce < 0 {
        return Err(VMError::ArgOutOfRange);
    }
    Ok(host.blockchain.block_hash(nonce as u64))
}
