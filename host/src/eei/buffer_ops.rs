//! Managed-buffer EEI over the handle table.

use num_bigint::BigInt;
use num_traits::Signed;

use vulcan_primitives::gas::{add_u64, mul_u64};
use vulcan_primitives::{VMError, VMResult};

use crate::host::VmHost;

use super::use_gas;

fn buffer_cost(host: &VmHost, base: u64, byte_count: usize) -> u64 {
    let per_byte = host.metering.gas_schedule().managed_buffer.copy_per_byte;
    add_u64(base, mul_u64(per_byte, byte_count as u64))
}

pub fn m_buffer_new(host: &mut VmHost) -> VMResult<i32> {
    let cost = host.metering.gas_schedule().managed_buffer.new_buffer;
    use_gas(host, cost)?;
    Ok(host.managed_types.new_buffer())
}

pub fn m_buffer_new_from_bytes(host: &mut VmHost, bytes: &[u8]) -> VMResult<i32> {
    let base = host.metering.gas_schedule().managed_buffer.new_buffer;
    let cost = buffer_cost(host, base, bytes.len());
    use_gas(host, cost)?;
    Ok(host.managed_types.new_buffer_from_bytes(bytes))
}

pub fn m_buffer_get_length(host: &mut VmHost, handle: i32) -> VMResult<i32> {
    let cost = host.metering.gas_schedule().managed_buffer.get_length;
    use_gas(host, cost)?;
    let length = host.managed_types.buffer_length(handle);
    if length < 0 {
        return Err(VMError::NoManagedBufferUnderHandle);
    }
    Ok(length)
}

pub fn m_buffer_get_bytes(host: &mut VmHost, handle: i32) -> VMResult<Vec<u8>> {
    let bytes = host.managed_types.bytes(handle)?;
    let base = host.metering.gas_schedule().managed_buffer.get_bytes;
    let cost = buffer_cost(host, base, bytes.len());
    use_gas(host, cost)?;
    Ok(bytes)
}

pub fn m_buffer_set_bytes(host: &mut VmHost, handle: i32, bytes: &[u8]) -> VMResult<()> {
    let base = host.metering.gas_schedule().managed_buffer.set_bytes;
    let cost = buffer_cost(host, base, bytes.len());
    use_gas(host, cost)?;
    host.managed_types.set_bytes(handle, bytes);
    Ok(())
}

pub fn m_buffer_append(host: &mut VmHost, handle: i32, other_handle: i32) -> VMResult<()> {
    let other = host.managed_types.bytes(other_handle)?;
    let base = host.metering.gas_schedule().managed_buffer.append;
    let cost = buffer_cost(host, base, other.len());
    use_gas(host, cost)?;
    if !host.managed_types.append_bytes(handle, &other) {
        return Err(VMError::NoManagedBufferUnderHandle);
    }
    Ok(())
}

pub fn m_buffer_append_bytes(host: &mut VmHost, handle: i32, bytes: &[u8]) -> VMResult<()> {
    let base = host.metering.gas_schedule().managed_buffer.append;
    let cost = buffer_cost(host, base, bytes.len());
    use_gas(host, cost)?;
    if !host.managed_types.append_bytes(handle, bytes) {
        return Err(VMError::NoManagedBufferUnderHandle);
    }
    Ok(())
}

pub fn m_buffer_get_slice(
    host: &mut VmHost,
    handle: i32,
    start: i32,
    length: i32,
) -> VMResult<Vec<u8>> {
    let base = host.metering.gas_schedule().managed_buffer.get_slice;
    let cost = buffer_cost(host, base, length.max(0) as usize);
    use_gas(host, cost)?;
    host.managed_types.get_slice(handle, start, length)
}

pub fn m_buffer_insert_slice(
    host: &mut VmHost,
    handle: i32,
    start: i32,
    slice: &[u8],
) -> VMResult<()> {
    let base = host.metering.gas_schedule().managed_buffer.insert_slice;
    let cost = buffer_cost(host, base, slice.len());
    use_gas(host, cost)?;
    host.managed_types.insert_slice(handle, start, slice)?;
    Ok(())
}

pub fn m_buffer_delete_slice(
    host: &mut VmHost,
    handle: i32,
    start: i32,
    length: i32,
) -> VMResult<()> {
    let base = host.metering.gas_schedule().managed_buffer.delete_slice;
    let cost = buffer_cost(host, base, length.max(0) as usize);
    use_gas(host, cost)?;
    host.managed_types.delete_slice(handle, start, length)?;
    Ok(())
}

/// Interpret the buffer as an unsigned big int under a new handle.
pub fn m_buffer_to_big_int_unsigned(
    host: &mut VmHost,
    handle: i32,
    big_int_handle: i32,
) -> VMResult<()> {
    let bytes = host.managed_types.bytes(handle)?;
    let base = host.metering.gas_schedule().managed_buffer.get_bytes;
    let cost = buffer_cost(host, base, bytes.len());
    use_gas(host, cost)?;
    let value = BigInt::from_bytes_be(num_bigint::Sign::Plus, &bytes);
    host.managed_types.set_big_int(big_int_handle, value);
    Ok(())
}

/// Write a non-negative big int's bytes into the buffer.
pub fn m_buffer_from_big_int_unsigned(
    host: &mut VmHost,
    handle: i32,
    big_int_handle: i32,
) -> VMResult<()> {
    let value = host.managed_types.big_int(big_int_handle)?;
    if value.is_negative() {
        return Err(VMError::BitwiseNegative);
    }
    let (_, bytes) = value.to_bytes_be();
    let base = host.metering.gas_schedule().managed_buffer.set_bytes;
    let cost = buffer_cost(host, base, bytes.len());
    use_gas(host, cost)?;
    host.managed_types.set_bytes(handle, &bytes);
    Ok(())
}

pub fn m_buffer_get_argument(host: &mut VmHost, index: i32) -> VMResult<i32> {
    let cost = host.metering.gas_schedule().api.get_argument;
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
    Ok(host.managed_types.new_buffer_from_bytes(&argument))
}

pub fn m_buffer_finish(host: &mut VmHost, handle: i32) -> VMResult<()> {
    let bytes = host.managed_types.bytes(handle)?;
    let base = host.metering.gas_schedule().api.finish;
    let cost = buffer_cost(host, base, bytes.len());
    use_gas(host, cost)?;
    host.output.finish(bytes);
    Ok(())
}

pub fn m_buffer_storage_store(host: &mut VmHost, key: &[u8], handle: i32) -> VMResult<i32> {
    let bytes = host.managed_types.bytes(handle)?;
    let cost = host.metering.gas_schedule().api.storage_store;
    use_gas(host, cost)?;
    let status = host.storage.set_storage(
        key,
        &bytes,
        &mut host.metering,
        &host.runtime,
        &mut host.output,
    )?;
    Ok(status as i32)
}

pub fn m_buffer_storage_load(host: &mut VmHost, key: &[u8], handle: i32) -> VMResult<()> {
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
    host.managed_types.set_bytes(handle, &value);
    Ok(())
}
