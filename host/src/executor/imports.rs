//! EEI registration with the wasmtime linker.
//!
//! Each trampoline reads its raw arguments out of the instance's linear
//! memory through the runtime context, delegates to the typed EEI layer,
//! and traps out of WASM when a breakpoint was raised. Marshalling only;
//! semantics live in [`crate::eei`].

use num_bigint::BigInt;
use wasmtime::Linker;

use vulcan_primitives::{VMError, VMResult};

use crate::eei::{baseops, bigint_ops, buffer_ops, small_int_ops, fail_if_policy, fail_if_policy_unit};
use crate::host::VmHost;

use super::executor_error;
use super::wasmtime_impl::eei_call;

/// Import module contracts link against.
pub const EEI_MODULE_NAME: &str = "env";

/// Every function name a contract may import.
pub const EEI_FUNCTION_NAMES: &[&str] = &[
    "getGasLeft",
    "getSCAddress",
    "getCaller",
    "getOwnerAddress",
    "getShardOfAddress",
    "isSmartContract",
    "signalError",
    "getExternalBalance",
    "blockHash",
    "transferValue",
    "transferValueExecute",
    "transferESDTExecute",
    "asyncCall",
    "createAsyncCall",
    "upgradeContract",
    "deleteContract",
    "getArgumentLength",
    "getArgument",
    "getNumArguments",
    "getFunction",
    "storageStore",
    "storageLoadLength",
    "storageLoad",
    "storageLoadFromAddress",
    "setStorageLock",
    "getStorageLock",
    "isStorageLocked",
    "clearStorageLock",
    "checkNoPayment",
    "callValue",
    "getNumESDTTransfers",
    "getESDTValueByIndex",
    "getESDTTokenNameByIndex",
    "writeEventLog",
    "finish",
    "getNumReturnData",
    "getReturnDataSize",
    "getReturnData",
    "cleanReturnData",
    "executeOnDestContext",
    "executeOnSameContext",
    "executeReadOnly",
    "createContract",
    "getBlockTimestamp",
    "getBlockNonce",
    "getBlockRound",
    "getBlockEpoch",
    "getBlockRandomSeed",
    "getPrevBlockTimestamp",
    "getPrevBlockNonce",
    "getPrevBlockRandomSeed",
    "getStateRootHash",
    "int64getArgument",
    "int64finish",
    "int64storageStore",
    "int64storageLoad",
    "bigIntNew",
    "bigIntUnsignedByteLength",
    "bigIntGetUnsignedBytes",
    "bigIntSetUnsignedBytes",
    "bigIntGetSignedBytes",
    "bigIntSetSignedBytes",
    "bigIntIsInt64",
    "bigIntGetInt64",
    "bigIntSetInt64",
    "bigIntAdd",
    "bigIntSub",
    "bigIntMul",
    "bigIntTDiv",
    "bigIntTMod",
    "bigIntPow",
    "bigIntAbs",
    "bigIntNeg",
    "bigIntSign",
    "bigIntCmp",
    "bigIntShl",
    "bigIntShr",
    "bigIntAnd",
    "bigIntOr",
    "bigIntXor",
    "bigIntGetArgument",
    "bigIntGetCallValue",
    "bigIntGetExternalBalance",
    "bigIntFinishUnsigned",
    "bigIntFinishSigned",
    "bigIntStorageStoreUnsigned",
    "bigIntStorageLoadUnsigned",
    "mBufferNew",
    "mBufferNewFromBytes",
    "mBufferGetLength",
    "mBufferGetBytes",
    "mBufferSetBytes",
    "mBufferAppend",
    "mBufferAppendBytes",
    "mBufferGetByteSlice",
    "mBufferInsertByteSlice",
    "mBufferDeleteByteSlice",
    "mBufferToBigIntUnsigned",
    "mBufferFromBigIntUnsigned",
    "mBufferStorageStore",
    "mBufferStorageLoad",
    "mBufferGetArgument",
    "mBufferFinish",
];

// ── Marshalling helpers ──

fn load_bytes(host: &VmHost, offset: i32, length: i32) -> VMResult<Vec<u8>> {
    host.runtime().mem_load(offset, length)
}

/// Call values are passed as 32-byte big-endian strings.
fn load_value(host: &VmHost, offset: i32) -> VMResult<BigInt> {
    let bytes = host.runtime().mem_load(offset, 32)?;
    Ok(BigInt::from_bytes_be(num_bigint::Sign::Plus, &bytes))
}

fn load_string(host: &VmHost, offset: i32, length: i32) -> VMResult<String> {
    let bytes = host.runtime().mem_load(offset, length)?;
    String::from_utf8(bytes).map_err(|_| VMError::InvalidFunctionName)
}

/// Argument lists arrive as a vector of i32 lengths plus packed data.
fn load_arguments(
    host: &VmHost,
    num_arguments: i32,
    lengths_offset: i32,
    data_offset: i32,
) -> VMResult<Vec<Vec<u8>>> {
    if num_arguments < 0 {
        return Err(VMError::NegativeLength);
    }
    if num_arguments == 0 {
        return Ok(Vec::new());
    }
    let raw_lengths = host.runtime().mem_load(lengths_offset, num_arguments * 4)?;
    let lengths: Vec<i32> = raw_lengths
        .chunks_exact(4)
        .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    host.runtime().mem_load_multiple(data_offset, &lengths)
}

fn store_bytes(host: &VmHost, offset: i32, data: &[u8]) -> VMResult<()> {
    host.runtime().mem_store(offset, data)
}

/// Register the whole EEI on a linker.
pub fn register_eei(linker: &mut Linker<()>) -> VMResult<()> {
    let m = EEI_MODULE_NAME;

    // ── Frame introspection ──

    linker
        .func_wrap(m, "getGasLeft", || -> anyhow::Result<i64> {
            eei_call(|host| {
                let result = baseops::get_gas_left(host);
                fail_if_policy(host, result, -1)
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "getSCAddress", |result_offset: i32| -> anyhow::Result<()> {
            eei_call(|host| {
                let result = baseops::get_sc_address(host)
                    .and_then(|address| store_bytes(host, result_offset, &address));
                fail_if_policy_unit(host, result);
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "getCaller", |result_offset: i32| -> anyhow::Result<()> {
            eei_call(|host| {
                let result = baseops::get_caller(host)
                    .and_then(|caller| store_bytes(host, result_offset, &caller));
                fail_if_policy_unit(host, result);
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "getOwnerAddress", |result_offset: i32| -> anyhow::Result<()> {
            eei_call(|host| {
                let result = baseops::get_owner_address(host)
                    .and_then(|owner| store_bytes(host, result_offset, &owner));
                fail_if_policy_unit(host, result);
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "getShardOfAddress",
            |address_offset: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = load_bytes(host, address_offset, 32)
                        .and_then(|address| baseops::get_shard_of_address(host, &address))
                        .map(|shard| shard as i32);
                    fail_if_policy(host, result, -1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "isSmartContract",
            |address_offset: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = load_bytes(host, address_offset, 32)
                        .and_then(|address| baseops::is_smart_contract(host, &address))
                        .map(i32::from);
                    fail_if_policy(host, result, -1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "signalError",
            |message_offset: i32, message_length: i32| -> anyhow::Result<()> {
                eei_call(|host| {
                    let result = load_bytes(host, message_offset, message_length)
                        .and_then(|message| {
                            baseops::signal_error(host, &String::from_utf8_lossy(&message))
                        });
                    fail_if_policy_unit(host, result);
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "getExternalBalance",
            |address_offset: i32, result_offset: i32| -> anyhow::Result<()> {
                eei_call(|host| {
                    let result = load_bytes(host, address_offset, 32)
                        .and_then(|address| baseops::get_external_balance(host, &address))
                        .and_then(|balance| store_bytes(host, result_offset, &balance));
                    fail_if_policy_unit(host, result);
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "blockHash",
            |nonce: i64, result_offset: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = baseops::get_block_hash(host, nonce)
                        .and_then(|hash| store_bytes(host, result_offset, &hash))
                        .map(|_| 0);
                    fail_if_policy(host, result, 1)
                })
            },
        )
        .map_err(executor_error)?;

    // ── Transfers and calls ──

    linker
        .func_wrap(
            m,
            "transferValue",
            |dest_offset: i32, value_offset: i32, data_offset: i32, length: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = (|| {
                        let destination = load_bytes(host, dest_offset, 32)?;
                        let value = load_value(host, value_offset)?;
                        let data = load_bytes(host, data_offset, length)?;
                        baseops::transfer_value(host, &destination, &value, &data)
                    })()
                    .map(|_| 0);
                    fail_if_policy(host, result, 1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "transferValueExecute",
            |dest_offset: i32,
             value_offset: i32,
             gas_limit: i64,
             function_offset: i32,
             function_length: i32,
             num_arguments: i32,
             lengths_offset: i32,
             data_offset: i32|
             -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = (|| {
                        let destination = load_bytes(host, dest_offset, 32)?;
                        let value = load_value(host, value_offset)?;
                        let function = load_string(host, function_offset, function_length)?;
                        let arguments =
                            load_arguments(host, num_arguments, lengths_offset, data_offset)?;
                        baseops::transfer_value_execute(
                            host,
                            &destination,
                            &value,
                            gas_limit.max(0) as u64,
                            &function,
                            &arguments,
                        )
                    })()
                    .map(|_| 0);
                    fail_if_policy(host, result, 1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "transferESDTExecute",
            |dest_offset: i32,
             token_offset: i32,
             token_length: i32,
             value_offset: i32,
             gas_limit: i64,
             function_offset: i32,
             function_length: i32,
             num_arguments: i32,
             lengths_offset: i32,
             data_offset: i32|
             -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = (|| {
                        let destination = load_bytes(host, dest_offset, 32)?;
                        let token = load_bytes(host, token_offset, token_length)?;
                        let value = load_value(host, value_offset)?;
                        let function = load_string(host, function_offset, function_length)?;
                        let arguments =
                            load_arguments(host, num_arguments, lengths_offset, data_offset)?;
                        baseops::transfer_esdt_execute(
                            host,
                            &destination,
                            &token,
                            0,
                            &value,
                            gas_limit.max(0) as u64,
                            &function,
                            &arguments,
                        )
                    })()
                    .map(|_| 0);
                    fail_if_policy(host, result, 1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "asyncCall",
            |dest_offset: i32, value_offset: i32, data_offset: i32, length: i32| -> anyhow::Result<()> {
                eei_call(|host| {
                    let result = (|| {
                        let destination = load_bytes(host, dest_offset, 32)?;
                        let value = load_bytes(host, value_offset, 32)?;
                        let data = load_bytes(host, data_offset, length)?;
                        baseops::async_call(host, &destination, &value, &data)
                    })();
                    fail_if_policy_unit(host, result);
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "createAsyncCall",
            |dest_offset: i32,
             value_offset: i32,
             data_offset: i32,
             data_length: i32,
             success_offset: i32,
             success_length: i32,
             error_offset: i32,
             error_length: i32,
             gas: i64,
             extra_gas_for_callback: i64|
             -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = (|| {
                        let destination = load_bytes(host, dest_offset, 32)?;
                        let value = load_bytes(host, value_offset, 32)?;
                        let data = load_bytes(host, data_offset, data_length)?;
                        let success = load_string(host, success_offset, success_length)?;
                        let error = load_string(host, error_offset, error_length)?;
                        baseops::create_async_call(
                            host,
                            "",
                            &destination,
                            &value,
                            &data,
                            &success,
                            &error,
                            gas.max(0) as u64,
                            extra_gas_for_callback.max(0) as u64,
                            None,
                        )
                    })()
                    .map(|_| 0);
                    fail_if_policy(host, result, 1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "upgradeContract",
            |dest_offset: i32,
             value_offset: i32,
             code_offset: i32,
             code_length: i32,
             metadata_offset: i32,
             num_arguments: i32,
             lengths_offset: i32,
             data_offset: i32|
             -> anyhow::Result<()> {
                eei_call(|host| {
                    let result = (|| {
                        let destination = load_bytes(host, dest_offset, 32)?;
                        let value = load_bytes(host, value_offset, 32)?;
                        let code = load_bytes(host, code_offset, code_length)?;
                        let metadata = load_bytes(host, metadata_offset, 2)?;
                        let arguments =
                            load_arguments(host, num_arguments, lengths_offset, data_offset)?;
                        baseops::upgrade_contract(
                            host,
                            &destination,
                            &value,
                            &code,
                            &metadata,
                            &arguments,
                        )
                    })();
                    fail_if_policy_unit(host, result);
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "deleteContract",
            |dest_offset: i32,
             num_arguments: i32,
             lengths_offset: i32,
             data_offset: i32|
             -> anyhow::Result<()> {
                eei_call(|host| {
                    let result = (|| {
                        let destination = load_bytes(host, dest_offset, 32)?;
                        let arguments =
                            load_arguments(host, num_arguments, lengths_offset, data_offset)?;
                        baseops::delete_contract(host, &destination, &arguments)
                    })();
                    fail_if_policy_unit(host, result);
                })
            },
        )
        .map_err(executor_error)?;

    // ── Arguments and function ──

    linker
        .func_wrap(m, "getArgumentLength", |index: i32| -> anyhow::Result<i32> {
            eei_call(|host| {
                let result = baseops::get_argument(host, index).map(|arg| arg.len() as i32);
                fail_if_policy(host, result, -1)
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "getArgument",
            |index: i32, result_offset: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = baseops::get_argument(host, index).and_then(|argument| {
                        store_bytes(host, result_offset, &argument)?;
                        Ok(argument.len() as i32)
                    });
                    fail_if_policy(host, result, -1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "getNumArguments", || -> anyhow::Result<i32> {
            eei_call(|host| {
                let result = baseops::get_num_arguments(host);
                fail_if_policy(host, result, -1)
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "getFunction", |result_offset: i32| -> anyhow::Result<i32> {
            eei_call(|host| {
                let result = baseops::get_function(host).and_then(|function| {
                    store_bytes(host, result_offset, function.as_bytes())?;
                    Ok(function.len() as i32)
                });
                fail_if_policy(host, result, -1)
            })
        })
        .map_err(executor_error)?;

    // ── Storage ──

    linker
        .func_wrap(
            m,
            "storageStore",
            |key_offset: i32, key_length: i32, data_offset: i32, data_length: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = (|| {
                        let key = load_bytes(host, key_offset, key_length)?;
                        let value = load_bytes(host, data_offset, data_length)?;
                        baseops::storage_store(host, &key, &value)
                    })()
                    .map(|status| status as i32);
                    fail_if_policy(host, result, -1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "storageLoadLength",
            |key_offset: i32, key_length: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = load_bytes(host, key_offset, key_length)
                        .and_then(|key| baseops::storage_load(host, &key))
                        .map(|value| value.len() as i32);
                    fail_if_policy(host, result, -1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "storageLoad",
            |key_offset: i32, key_length: i32, data_offset: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = (|| {
                        let key = load_bytes(host, key_offset, key_length)?;
                        let value = baseops::storage_load(host, &key)?;
                        store_bytes(host, data_offset, &value)?;
                        Ok(value.len() as i32)
                    })();
                    fail_if_policy(host, result, -1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "storageLoadFromAddress",
            |address_offset: i32, key_offset: i32, key_length: i32, data_offset: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = (|| {
                        let address = load_bytes(host, address_offset, 32)?;
                        let key = load_bytes(host, key_offset, key_length)?;
                        let value = baseops::storage_load_from_address(host, &address, &key)?;
                        store_bytes(host, data_offset, &value)?;
                        Ok(value.len() as i32)
                    })();
                    fail_if_policy(host, result, -1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "setStorageLock",
            |key_offset: i32, key_length: i32, lock_timestamp: i64| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = load_bytes(host, key_offset, key_length)
                        .and_then(|key| baseops::set_storage_lock(host, &key, lock_timestamp))
                        .map(|_| 0);
                    fail_if_policy(host, result, 1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "getStorageLock",
            |key_offset: i32, key_length: i32| -> anyhow::Result<i64> {
                eei_call(|host| {
                    let result = load_bytes(host, key_offset, key_length)
                        .and_then(|key| baseops::get_storage_lock(host, &key));
                    fail_if_policy(host, result, -1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "isStorageLocked",
            |key_offset: i32, key_length: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = load_bytes(host, key_offset, key_length)
                        .and_then(|key| baseops::is_storage_locked(host, &key))
                        .map(i32::from);
                    fail_if_policy(host, result, -1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "clearStorageLock",
            |key_offset: i32, key_length: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = load_bytes(host, key_offset, key_length)
                        .and_then(|key| baseops::clear_storage_lock(host, &key))
                        .map(|_| 0);
                    fail_if_policy(host, result, 1)
                })
            },
        )
        .map_err(executor_error)?;

    // ── Payment introspection ──

    linker
        .func_wrap(m, "checkNoPayment", || -> anyhow::Result<()> {
            eei_call(|host| {
                let result = baseops::check_no_payment(host);
                fail_if_policy_unit(host, result);
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "callValue", |result_offset: i32| -> anyhow::Result<i32> {
            eei_call(|host| {
                let result = baseops::get_call_value(host).and_then(|value| {
                    store_bytes(host, result_offset, &value)?;
                    Ok(value.len() as i32)
                });
                fail_if_policy(host, result, -1)
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "getNumESDTTransfers", || -> anyhow::Result<i32> {
            eei_call(|host| {
                let result = baseops::get_num_esdt_transfers(host);
                fail_if_policy(host, result, -1)
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "getESDTValueByIndex",
            |result_offset: i32, index: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = baseops::get_esdt_value_by_index(host, index).and_then(|value| {
                        store_bytes(host, result_offset, &value)?;
                        Ok(value.len() as i32)
                    });
                    fail_if_policy(host, result, -1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "getESDTTokenNameByIndex",
            |result_offset: i32, index: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result =
                        baseops::get_esdt_token_name_by_index(host, index).and_then(|name| {
                            store_bytes(host, result_offset, &name)?;
                            Ok(name.len() as i32)
                        });
                    fail_if_policy(host, result, -1)
                })
            },
        )
        .map_err(executor_error)?;

    // ── Output ──

    linker
        .func_wrap(
            m,
            "writeEventLog",
            |num_topics: i32, topic_lengths_offset: i32, topic_offset: i32, data_offset: i32, data_length: i32| -> anyhow::Result<()> {
                eei_call(|host| {
                    let result = (|| {
                        let topics =
                            load_arguments(host, num_topics, topic_lengths_offset, topic_offset)?;
                        let data = load_bytes(host, data_offset, data_length)?;
                        baseops::write_log(host, &topics, &data)
                    })();
                    fail_if_policy_unit(host, result);
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "finish", |pointer: i32, length: i32| -> anyhow::Result<()> {
            eei_call(|host| {
                let result = load_bytes(host, pointer, length)
                    .and_then(|data| baseops::finish(host, &data));
                fail_if_policy_unit(host, result);
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "getNumReturnData", || -> anyhow::Result<i32> {
            eei_call(|host| {
                let result = baseops::get_num_return_data(host);
                fail_if_policy(host, result, -1)
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "getReturnDataSize", |index: i32| -> anyhow::Result<i32> {
            eei_call(|host| {
                let result = baseops::get_return_data(host, index).map(|data| data.len() as i32);
                fail_if_policy(host, result, -1)
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "getReturnData",
            |index: i32, result_offset: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = baseops::get_return_data(host, index).and_then(|data| {
                        store_bytes(host, result_offset, &data)?;
                        Ok(data.len() as i32)
                    });
                    fail_if_policy(host, result, -1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "cleanReturnData", || -> anyhow::Result<()> {
            eei_call(|host| {
                let result = baseops::clean_return_data(host);
                fail_if_policy_unit(host, result);
            })
        })
        .map_err(executor_error)?;

    // ── Nested execution ──

    linker
        .func_wrap(
            m,
            "executeOnDestContext",
            |gas_limit: i64,
             address_offset: i32,
             value_offset: i32,
             function_offset: i32,
             function_length: i32,
             num_arguments: i32,
             lengths_offset: i32,
             data_offset: i32|
             -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = (|| {
                        let destination = load_bytes(host, address_offset, 32)?;
                        let value = load_value(host, value_offset)?;
                        let function = load_string(host, function_offset, function_length)?;
                        let arguments =
                            load_arguments(host, num_arguments, lengths_offset, data_offset)?;
                        baseops::execute_on_dest_context(
                            host,
                            gas_limit.max(0) as u64,
                            &destination,
                            &value,
                            &function,
                            &arguments,
                        )
                    })()
                    .map(|_| 0);
                    fail_if_policy(host, result, 1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "executeOnSameContext",
            |gas_limit: i64,
             address_offset: i32,
             value_offset: i32,
             function_offset: i32,
             function_length: i32,
             num_arguments: i32,
             lengths_offset: i32,
             data_offset: i32|
             -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = (|| {
                        let destination = load_bytes(host, address_offset, 32)?;
                        let value = load_value(host, value_offset)?;
                        let function = load_string(host, function_offset, function_length)?;
                        let arguments =
                            load_arguments(host, num_arguments, lengths_offset, data_offset)?;
                        baseops::execute_on_same_context(
                            host,
                            gas_limit.max(0) as u64,
                            &destination,
                            &value,
                            &function,
                            &arguments,
                        )
                    })()
                    .map(|_| 0);
                    fail_if_policy(host, result, 1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "executeReadOnly",
            |gas_limit: i64,
             address_offset: i32,
             function_offset: i32,
             function_length: i32,
             num_arguments: i32,
             lengths_offset: i32,
             data_offset: i32|
             -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = (|| {
                        let destination = load_bytes(host, address_offset, 32)?;
                        let function = load_string(host, function_offset, function_length)?;
                        let arguments =
                            load_arguments(host, num_arguments, lengths_offset, data_offset)?;
                        baseops::execute_read_only(
                            host,
                            gas_limit.max(0) as u64,
                            &destination,
                            &function,
                            &arguments,
                        )
                    })()
                    .map(|_| 0);
                    fail_if_policy(host, result, 1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "createContract",
            |gas_limit: i64,
             value_offset: i32,
             code_offset: i32,
             metadata_offset: i32,
             code_length: i32,
             result_address_offset: i32,
             num_arguments: i32,
             lengths_offset: i32,
             data_offset: i32|
             -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = (|| {
                        let value = load_value(host, value_offset)?;
                        let code = load_bytes(host, code_offset, code_length)?;
                        let metadata = load_bytes(host, metadata_offset, 2)?;
                        let arguments =
                            load_arguments(host, num_arguments, lengths_offset, data_offset)?;
                        let address = baseops::create_contract(
                            host,
                            gas_limit.max(0) as u64,
                            &value,
                            &code,
                            &metadata,
                            &arguments,
                        )?;
                        store_bytes(host, result_address_offset, &address)?;
                        Ok(0)
                    })();
                    fail_if_policy(host, result, 1)
                })
            },
        )
        .map_err(executor_error)?;

    // ── Block metadata ──

    linker
        .func_wrap(m, "getBlockTimestamp", || -> anyhow::Result<i64> {
            eei_call(|host| {
                let result = baseops::get_block_timestamp(host);
                fail_if_policy(host, result, -1)
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "getBlockNonce", || -> anyhow::Result<i64> {
            eei_call(|host| {
                let result = baseops::get_block_nonce(host);
                fail_if_policy(host, result, -1)
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "getBlockRound", || -> anyhow::Result<i64> {
            eei_call(|host| {
                let result = baseops::get_block_round(host);
                fail_if_policy(host, result, -1)
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "getBlockEpoch", || -> anyhow::Result<i64> {
            eei_call(|host| {
                let result = baseops::get_block_epoch(host);
                fail_if_policy(host, result, -1)
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "getBlockRandomSeed", |result_offset: i32| -> anyhow::Result<()> {
            eei_call(|host| {
                let result = baseops::get_block_random_seed(host)
                    .and_then(|seed| store_bytes(host, result_offset, &seed));
                fail_if_policy_unit(host, result);
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "getPrevBlockTimestamp", || -> anyhow::Result<i64> {
            eei_call(|host| {
                let result = baseops::get_prev_block_timestamp(host);
                fail_if_policy(host, result, -1)
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "getPrevBlockNonce", || -> anyhow::Result<i64> {
            eei_call(|host| {
                let result = baseops::get_prev_block_nonce(host);
                fail_if_policy(host, result, -1)
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "getPrevBlockRandomSeed",
            |result_offset: i32| -> anyhow::Result<()> {
                eei_call(|host| {
                    let result = baseops::get_prev_block_random_seed(host)
                        .and_then(|seed| store_bytes(host, result_offset, &seed));
                    fail_if_policy_unit(host, result);
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "getStateRootHash", |result_offset: i32| -> anyhow::Result<()> {
            eei_call(|host| {
                let result = baseops::get_state_root_hash(host)
                    .and_then(|hash| store_bytes(host, result_offset, &hash));
                fail_if_policy_unit(host, result);
            })
        })
        .map_err(executor_error)?;

    register_small_int_ops(linker)?;
    register_big_int_ops(linker)?;
    register_buffer_ops(linker)?;

    Ok(())
}

fn register_small_int_ops(linker: &mut Linker<()>) -> VMResult<()> {
    let m = EEI_MODULE_NAME;

    linker
        .func_wrap(m, "int64getArgument", |index: i32| -> anyhow::Result<i64> {
            eei_call(|host| {
                let result = small_int_ops::small_int_get_unsigned_argument(host, index);
                fail_if_policy(host, result, -1)
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "int64finish", |value: i64| -> anyhow::Result<()> {
            eei_call(|host| {
                let result = small_int_ops::small_int_finish_unsigned(host, value);
                fail_if_policy_unit(host, result);
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "int64storageStore",
            |key_offset: i32, key_length: i32, value: i64| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = load_bytes(host, key_offset, key_length).and_then(|key| {
                        small_int_ops::small_int_storage_store_unsigned(host, &key, value)
                    });
                    fail_if_policy(host, result, -1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "int64storageLoad",
            |key_offset: i32, key_length: i32| -> anyhow::Result<i64> {
                eei_call(|host| {
                    let result = load_bytes(host, key_offset, key_length).and_then(|key| {
                        small_int_ops::small_int_storage_load_unsigned(host, &key)
                    });
                    fail_if_policy(host, result, -1)
                })
            },
        )
        .map_err(executor_error)?;

    Ok(())
}

fn register_big_int_ops(linker: &mut Linker<()>) -> VMResult<()> {
    let m = EEI_MODULE_NAME;

    linker
        .func_wrap(m, "bigIntNew", |initial: i64| -> anyhow::Result<i32> {
            eei_call(|host| {
                let result = bigint_ops::big_int_new(host, initial);
                fail_if_policy(host, result, -1)
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "bigIntUnsignedByteLength", |handle: i32| -> anyhow::Result<i32> {
            eei_call(|host| {
                let result = bigint_ops::big_int_unsigned_byte_length(host, handle);
                fail_if_policy(host, result, -1)
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "bigIntGetUnsignedBytes",
            |handle: i32, result_offset: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result =
                        bigint_ops::big_int_get_unsigned_bytes(host, handle).and_then(|bytes| {
                            store_bytes(host, result_offset, &bytes)?;
                            Ok(bytes.len() as i32)
                        });
                    fail_if_policy(host, result, -1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "bigIntSetUnsignedBytes",
            |destination: i32, byte_offset: i32, byte_length: i32| -> anyhow::Result<()> {
                eei_call(|host| {
                    let result = load_bytes(host, byte_offset, byte_length).and_then(|bytes| {
                        bigint_ops::big_int_set_unsigned_bytes(host, destination, &bytes)
                    });
                    fail_if_policy_unit(host, result);
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "bigIntGetSignedBytes",
            |handle: i32, result_offset: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result =
                        bigint_ops::big_int_get_signed_bytes(host, handle).and_then(|bytes| {
                            store_bytes(host, result_offset, &bytes)?;
                            Ok(bytes.len() as i32)
                        });
                    fail_if_policy(host, result, -1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "bigIntSetSignedBytes",
            |destination: i32, byte_offset: i32, byte_length: i32| -> anyhow::Result<()> {
                eei_call(|host| {
                    let result = load_bytes(host, byte_offset, byte_length).and_then(|bytes| {
                        bigint_ops::big_int_set_signed_bytes(host, destination, &bytes)
                    });
                    fail_if_policy_unit(host, result);
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "bigIntIsInt64", |handle: i32| -> anyhow::Result<i32> {
            eei_call(|host| {
                let result = bigint_ops::big_int_is_int64(host, handle).map(i32::from);
                fail_if_policy(host, result, -1)
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "bigIntGetInt64", |handle: i32| -> anyhow::Result<i64> {
            eei_call(|host| {
                let result = bigint_ops::big_int_get_int64(host, handle);
                fail_if_policy(host, result, -1)
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "bigIntSetInt64", |handle: i32, value: i64| -> anyhow::Result<()> {
            eei_call(|host| {
                let result = bigint_ops::big_int_set_int64(host, handle, value);
                fail_if_policy_unit(host, result);
            })
        })
        .map_err(executor_error)?;

    macro_rules! binary {
        ($name:literal, $fn:path) => {
            linker
                .func_wrap(
                    m,
                    $name,
                    |destination: i32, first: i32, second: i32| -> anyhow::Result<()> {
                        eei_call(|host| {
                            let result = $fn(host, destination, first, second);
                            fail_if_policy_unit(host, result);
                        })
                    },
                )
                .map_err(executor_error)?;
        };
    }

    binary!("bigIntAdd", bigint_ops::big_int_add);
    binary!("bigIntSub", bigint_ops::big_int_sub);
    binary!("bigIntMul", bigint_ops::big_int_mul);
    binary!("bigIntTDiv", bigint_ops::big_int_t_div);
    binary!("bigIntTMod", bigint_ops::big_int_t_mod);
    binary!("bigIntPow", bigint_ops::big_int_pow);
    binary!("bigIntAnd", bigint_ops::big_int_and);
    binary!("bigIntOr", bigint_ops::big_int_or);
    binary!("bigIntXor", bigint_ops::big_int_xor);

    linker
        .func_wrap(
            m,
            "bigIntAbs",
            |destination: i32, handle: i32| -> anyhow::Result<()> {
                eei_call(|host| {
                    let result = bigint_ops::big_int_abs(host, destination, handle);
                    fail_if_policy_unit(host, result);
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "bigIntNeg",
            |destination: i32, handle: i32| -> anyhow::Result<()> {
                eei_call(|host| {
                    let result = bigint_ops::big_int_neg(host, destination, handle);
                    fail_if_policy_unit(host, result);
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "bigIntSign", |handle: i32| -> anyhow::Result<i32> {
            eei_call(|host| {
                let result = bigint_ops::big_int_sign(host, handle);
                fail_if_policy(host, result, -2)
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "bigIntCmp", |first: i32, second: i32| -> anyhow::Result<i32> {
            eei_call(|host| {
                let result = bigint_ops::big_int_cmp(host, first, second);
                fail_if_policy(host, result, -2)
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "bigIntShl",
            |destination: i32, handle: i32, bits: i32| -> anyhow::Result<()> {
                eei_call(|host| {
                    let result = bigint_ops::big_int_shl(host, destination, handle, bits);
                    fail_if_policy_unit(host, result);
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "bigIntShr",
            |destination: i32, handle: i32, bits: i32| -> anyhow::Result<()> {
                eei_call(|host| {
                    let result = bigint_ops::big_int_shr(host, destination, handle, bits);
                    fail_if_policy_unit(host, result);
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "bigIntGetArgument",
            |index: i32, destination: i32| -> anyhow::Result<()> {
                eei_call(|host| {
                    let result = bigint_ops::big_int_get_argument(host, index, destination);
                    fail_if_policy_unit(host, result);
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "bigIntGetCallValue", |destination: i32| -> anyhow::Result<()> {
            eei_call(|host| {
                let result = bigint_ops::big_int_get_call_value(host, destination);
                fail_if_policy_unit(host, result);
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "bigIntGetExternalBalance",
            |address_offset: i32, destination: i32| -> anyhow::Result<()> {
                eei_call(|host| {
                    let result = load_bytes(host, address_offset, 32).and_then(|address| {
                        bigint_ops::big_int_get_external_balance(host, &address, destination)
                    });
                    fail_if_policy_unit(host, result);
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "bigIntFinishUnsigned", |handle: i32| -> anyhow::Result<()> {
            eei_call(|host| {
                let result = bigint_ops::big_int_finish_unsigned(host, handle);
                fail_if_policy_unit(host, result);
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "bigIntFinishSigned", |handle: i32| -> anyhow::Result<()> {
            eei_call(|host| {
                let result = bigint_ops::big_int_finish_signed(host, handle);
                fail_if_policy_unit(host, result);
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "bigIntStorageStoreUnsigned",
            |key_offset: i32, key_length: i32, handle: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = load_bytes(host, key_offset, key_length).and_then(|key| {
                        bigint_ops::big_int_storage_store_unsigned(host, &key, handle)
                    });
                    fail_if_policy(host, result, -1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "bigIntStorageLoadUnsigned",
            |key_offset: i32, key_length: i32, handle: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = load_bytes(host, key_offset, key_length).and_then(|key| {
                        bigint_ops::big_int_storage_load_unsigned(host, &key, handle)
                    });
                    fail_if_policy(host, result, -1)
                })
            },
        )
        .map_err(executor_error)?;

    Ok(())
}

fn register_buffer_ops(linker: &mut Linker<()>) -> VMResult<()> {
    let m = EEI_MODULE_NAME;

    linker
        .func_wrap(m, "mBufferNew", || -> anyhow::Result<i32> {
            eei_call(|host| {
                let result = buffer_ops::m_buffer_new(host);
                fail_if_policy(host, result, -1)
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "mBufferNewFromBytes",
            |data_offset: i32, data_length: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = load_bytes(host, data_offset, data_length)
                        .and_then(|bytes| buffer_ops::m_buffer_new_from_bytes(host, &bytes));
                    fail_if_policy(host, result, -1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "mBufferGetLength", |handle: i32| -> anyhow::Result<i32> {
            eei_call(|host| {
                let result = buffer_ops::m_buffer_get_length(host, handle);
                fail_if_policy(host, result, -1)
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "mBufferGetBytes",
            |handle: i32, result_offset: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = buffer_ops::m_buffer_get_bytes(host, handle).and_then(|bytes| {
                        store_bytes(host, result_offset, &bytes)?;
                        Ok(bytes.len() as i32)
                    });
                    fail_if_policy(host, result, -1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "mBufferSetBytes",
            |handle: i32, data_offset: i32, data_length: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = load_bytes(host, data_offset, data_length)
                        .and_then(|bytes| buffer_ops::m_buffer_set_bytes(host, handle, &bytes))
                        .map(|_| 0);
                    fail_if_policy(host, result, 1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "mBufferAppend",
            |handle: i32, other_handle: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = buffer_ops::m_buffer_append(host, handle, other_handle).map(|_| 0);
                    fail_if_policy(host, result, 1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "mBufferAppendBytes",
            |handle: i32, data_offset: i32, data_length: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = load_bytes(host, data_offset, data_length)
                        .and_then(|bytes| buffer_ops::m_buffer_append_bytes(host, handle, &bytes))
                        .map(|_| 0);
                    fail_if_policy(host, result, 1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "mBufferGetByteSlice",
            |handle: i32, start: i32, length: i32, result_offset: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = buffer_ops::m_buffer_get_slice(host, handle, start, length)
                        .and_then(|bytes| {
                            store_bytes(host, result_offset, &bytes)?;
                            Ok(0)
                        });
                    fail_if_policy(host, result, 1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "mBufferInsertByteSlice",
            |handle: i32, start: i32, data_offset: i32, data_length: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = load_bytes(host, data_offset, data_length)
                        .and_then(|bytes| {
                            buffer_ops::m_buffer_insert_slice(host, handle, start, &bytes)
                        })
                        .map(|_| 0);
                    fail_if_policy(host, result, 1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "mBufferDeleteByteSlice",
            |handle: i32, start: i32, length: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result =
                        buffer_ops::m_buffer_delete_slice(host, handle, start, length).map(|_| 0);
                    fail_if_policy(host, result, 1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "mBufferToBigIntUnsigned",
            |handle: i32, big_int_handle: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = buffer_ops::m_buffer_to_big_int_unsigned(host, handle, big_int_handle)
                        .map(|_| 0);
                    fail_if_policy(host, result, 1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "mBufferFromBigIntUnsigned",
            |handle: i32, big_int_handle: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result =
                        buffer_ops::m_buffer_from_big_int_unsigned(host, handle, big_int_handle)
                            .map(|_| 0);
                    fail_if_policy(host, result, 1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "mBufferStorageStore",
            |key_offset: i32, key_length: i32, handle: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = load_bytes(host, key_offset, key_length)
                        .and_then(|key| buffer_ops::m_buffer_storage_store(host, &key, handle));
                    fail_if_policy(host, result, -1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(
            m,
            "mBufferStorageLoad",
            |key_offset: i32, key_length: i32, handle: i32| -> anyhow::Result<i32> {
                eei_call(|host| {
                    let result = load_bytes(host, key_offset, key_length)
                        .and_then(|key| buffer_ops::m_buffer_storage_load(host, &key, handle))
                        .map(|_| 0);
                    fail_if_policy(host, result, 1)
                })
            },
        )
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "mBufferGetArgument", |index: i32| -> anyhow::Result<i32> {
            eei_call(|host| {
                let result = buffer_ops::m_buffer_get_argument(host, index);
                fail_if_policy(host, result, -1)
            })
        })
        .map_err(executor_error)?;

    linker
        .func_wrap(m, "mBufferFinish", |handle: i32| -> anyhow::Result<i32> {
            eei_call(|host| {
                let result = buffer_ops::m_buffer_finish(host, handle).map(|_| 0);
                fail_if_policy(host, result, 1)
            })
        })
        .map_err(executor_error)?;

    Ok(())
}
