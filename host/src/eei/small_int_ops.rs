//! Small-integer convenience EEI: i64 arguments, storage, and results.

use num_bigint::BigInt;
use num_traits::ToPrimitive;

use vulcan_primitives::{VMError, VMResult};

use crate::host::VmHost;

use super::use_gas;

fn i64_from_bytes(bytes: &[u8]) -> VMResult<i64> {
    if bytes.is_empty() {
        return Ok(0);
    }
    let value = BigInt::from_bytes_be(num_bigint::Sign::Plus, bytes);
    value.to_i64().ok_or(VMError::ArgOutOfRange)
}

fn i64_to_bytes(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(7);
    bytes[first..].to_vec()
}

pub fn small_int_get_unsigned_argument(host: &mut VmHost, index: i32) -> VMResult<i64> {
    let cost = host.metering.gas_schedule().api.int64_get_argument;
    use_gas(host, cost)?;
    if index < 0 {
        return Err(VMError::ArgIndexOutOfRange);
    }
    let argument = host
        .runtime
        .arguments()
        .get(index as usize)
        .cloned()
        .ok_or(VMError::ArgIndexOutOfRange)?;
    i64_from_bytes(&argument)
}

pub fn small_int_finish_unsigned(host: &mut VmHost, value: i64) -> VMResult<()> {
    let cost = host.metering.gas_schedule().api.int64_finish;
    use_gas(host, cost)?;
    host.output.finish(i64_to_bytes(value));
    Ok(())
}

pub fn small_int_storage_store_unsigned(
    host: &mut VmHost,
    key: &[u8],
    value: i64,
) -> VMResult<i32> {
    let cost = host.metering.gas_schedule().api.int64_storage_store;
    use_gas(host, cost)?;
    let bytes = i64_to_bytes(value);
    let status = host.storage.set_storage(
        key,
        &bytes,
        &mut host.metering,
        &host.runtime,
        &mut host.output,
    )?;
    Ok(status as i32)
}

pub fn small_int_storage_load_unsigned(host: &mut VmHost, key: &[u8]) -> VMResult<i64> {
    let cost = host.metering.gas_schedule().api.int64_storage_load;
    use_gas(host, cost)?;
    let (value, _) = host.storage.get_storage_unmetered(key, &mut host.output);
    i64_from_bytes(&value).map_err(|_| VMError::StorageValueOutOfRange)
}
