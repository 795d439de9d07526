//! Big-integer EEI over the managed-types handle table.
//!
//! Gas follows the byte length of the values touched; pow and shifts also
//! charge an upper bound on the size of the result they may produce.

use num_bigint::BigInt;
use num_traits::{Pow, Signed, ToPrimitive, Zero};

use vulcan_primitives::gas::{add_u64, mul_u64};
use vulcan_primitives::{VMError, VMResult};

use crate::host::VmHost;

use super::use_gas;

fn big_int_byte_len(value: &BigInt) -> u64 {
    (value.bits() as u64).div_ceil(8)
}

/// Charge the per-byte copy cost for the aggregate length of the values.
fn consume_gas_for_big_int_copy(host: &mut VmHost, values: &[&BigInt]) -> VMResult<()> {
    let per_byte = host.metering.gas_schedule().big_int.copy_per_byte;
    let mut total_bytes = 0u64;
    for value in values {
        total_bytes = add_u64(total_bytes, big_int_byte_len(value));
    }
    use_gas(host, mul_u64(per_byte, total_bytes))
}

pub fn big_int_new(host: &mut VmHost, initial: i64) -> VMResult<i32> {
    let cost = host.metering.gas_schedule().big_int.new_big_int;
    use_gas(host, cost)?;
    Ok(host.managed_types.put_big_int(initial))
}

pub fn big_int_unsigned_byte_length(host: &mut VmHost, handle: i32) -> VMResult<i32> {
    let cost = host.metering.gas_schedule().big_int.byte_length;
    use_gas(host, cost)?;
    let value = host.managed_types.big_int(handle)?;
    Ok(big_int_byte_len(&value) as i32)
}

pub fn big_int_get_unsigned_bytes(host: &mut VmHost, handle: i32) -> VMResult<Vec<u8>> {
    let cost = host.metering.gas_schedule().big_int.get_bytes;
    use_gas(host, cost)?;
    let value = host.managed_types.big_int(handle)?;
    if value.is_negative() {
        return Err(VMError::BitwiseNegative);
    }
    consume_gas_for_big_int_copy(host, &[&value])?;
    let (_, bytes) = value.to_bytes_be();
    Ok(bytes)
}

pub fn big_int_get_signed_bytes(host: &mut VmHost, handle: i32) -> VMResult<Vec<u8>> {
    let cost = host.metering.gas_schedule().big_int.get_bytes;
    use_gas(host, cost)?;
    let value = host.managed_types.big_int(handle)?;
    consume_gas_for_big_int_copy(host, &[&value])?;
    Ok(value.to_signed_bytes_be())
}

pub fn big_int_set_unsigned_bytes(host: &mut VmHost, handle: i32, bytes: &[u8]) -> VMResult<()> {
    let schedule = host.metering.gas_schedule();
    let cost = add_u64(
        schedule.big_int.set_bytes,
        mul_u64(schedule.big_int.copy_per_byte, bytes.len() as u64),
    );
    use_gas(host, cost)?;
    let value = BigInt::from_bytes_be(num_bigint::Sign::Plus, bytes);
    host.managed_types.set_big_int(handle, value);
    Ok(())
}

pub fn big_int_set_signed_bytes(host: &mut VmHost, handle: i32, bytes: &[u8]) -> VMResult<()> {
    let schedule = host.metering.gas_schedule();
    let cost = add_u64(
        schedule.big_int.set_bytes,
        mul_u64(schedule.big_int.copy_per_byte, bytes.len() as u64),
    );
    use_gas(host, cost)?;
    let value = BigInt::from_signed_bytes_be(bytes);
    host.managed_types.set_big_int(handle, value);
    Ok(())
}

pub fn big_int_is_int64(host: &mut VmHost, handle: i32) -> VMResult<bool> {
    let cost = host.metering.gas_schedule().big_int.is_int64;
    use_gas(host, cost)?;
    let value = host.managed_types.big_int(handle)?;
    Ok(value.to_i64().is_some())
}

pub fn big_int_get_int64(host: &mut VmHost, handle: i32) -> VMResult<i64> {
    let cost = host.metering.gas_schedule().big_int.get_int64;
    use_gas(host, cost)?;
    let value = host.managed_types.big_int_or_create(handle);
    value.to_i64().ok_or(VMError::ArgOutOfRange)
}

pub fn big_int_set_int64(host: &mut VmHost, handle: i32, value: i64) -> VMResult<()> {
    let cost = host.metering.gas_schedule().big_int.set_int64;
    use_gas(host, cost)?;
    host.managed_types.set_big_int(handle, BigInt::from(value));
    Ok(())
}

// ── Arithmetic ──

fn binary_op<F>(
    host: &mut VmHost,
    cost: u64,
    destination: i32,
    first: i32,
    second: i32,
    op: F,
) -> VMResult<()>
where
    F: FnOnce(&BigInt, &BigInt) -> VMResult<BigInt>,
{
    use_gas(host, cost)?;
    let (a, b) = host.managed_types.two_big_ints(first, second)?;
    consume_gas_for_big_int_copy(host, &[&a, &b])?;
    let result = op(&a, &b)?;
    host.managed_types.set_big_int(destination, result);
    Ok(())
}

pub fn big_int_add(host: &mut VmHost, destination: i32, first: i32, second: i32) -> VMResult<()> {
    let cost = host.metering.gas_schedule().big_int.add;
    binary_op(host, cost, destination, first, second, |a, b| Ok(a + b))
}

pub fn big_int_sub(host: &mut VmHost, destination: i32, first: i32, second: i32) -> VMResult<()> {
    let cost = host.metering.gas_schedule().big_int.sub;
    binary_op(host, cost, destination, first, second, |a, b| Ok(a - b))
}

pub fn big_int_mul(host: &mut VmHost, destination: i32, first: i32, second: i32) -> VMResult<()> {
    let cost = host.metering.gas_schedule().big_int.mul;
    binary_op(host, cost, destination, first, second, |a, b| Ok(a * b))
}

pub fn big_int_t_div(host: &mut VmHost, destination: i32, first: i32, second: i32) -> VMResult<()> {
    let cost = host.metering.gas_schedule().big_int.t_div;
    binary_op(host, cost, destination, first, second, |a, b| {
        if b.is_zero() {
            return Err(VMError::DivZero);
        }
        Ok(a / b)
    })
}

pub fn big_int_t_mod(host: &mut VmHost, destination: i32, first: i32, second: i32) -> VMResult<()> {
    let cost = host.metering.gas_schedule().big_int.t_mod;
    binary_op(host, cost, destination, first, second, |a, b| {
        if b.is_zero() {
            return Err(VMError::DivZero);
        }
        Ok(a % b)
    })
}

pub fn big_int_pow(host: &mut VmHost, destination: i32, base: i32, exponent: i32) -> VMResult<()> {
    let cost = host.metering.gas_schedule().big_int.pow;
    use_gas(host, cost)?;
    let (base_value, exponent_value) = host.managed_types.two_big_ints(base, exponent)?;
    if exponent_value.is_negative() {
        return Err(VMError::ArgOutOfRange);
    }

    // Bound the gas by the size the result can reach before computing it.
    let exponent_u64 = exponent_value.to_u64().ok_or(VMError::ArgOutOfRange)?;
    let result_byte_len_estimate =
        mul_u64(base_value.bits(), exponent_u64).div_ceil(8);
    let per_byte = host.metering.gas_schedule().big_int.copy_per_byte;
    use_gas(host, mul_u64(per_byte, result_byte_len_estimate))?;

    let exponent_u32 = exponent_value.to_u32().ok_or(VMError::ArgOutOfRange)?;
    let result = Pow::pow(&base_value, exponent_u32);
    host.managed_types.set_big_int(destination, result);
    Ok(())
}

pub fn big_int_abs(host: &mut VmHost, destination: i32, handle: i32) -> VMResult<()> {
    let cost = host.metering.gas_schedule().big_int.abs;
    use_gas(host, cost)?;
    let value = host.managed_types.big_int(handle)?;
    consume_gas_for_big_int_copy(host, &[&value])?;
    host.managed_types.set_big_int(destination, value.abs());
    Ok(())
}

pub fn big_int_neg(host: &mut VmHost, destination: i32, handle: i32) -> VMResult<()> {
    let cost = host.metering.gas_schedule().big_int.neg;
    use_gas(host, cost)?;
    let value = host.managed_types.big_int(handle)?;
    consume_gas_for_big_int_copy(host, &[&value])?;
    host.managed_types.set_big_int(destination, -value);
    Ok(())
}

pub fn big_int_sign(host: &mut VmHost, handle: i32) -> VMResult<i32> {
    let cost = host.metering.gas_schedule().big_int.sign;
    use_gas(host, cost)?;
    let value = host.managed_types.big_int(handle)?;
    Ok(match value.sign() {
        num_bigint::Sign::Minus => -1,
        num_bigint::Sign::NoSign => 0,
        num_bigint::Sign::Plus => 1,
    })
}

pub fn big_int_cmp(host: &mut VmHost, first: i32, second: i32) -> VMResult<i32> {
    let cost = host.metering.gas_schedule().big_int.cmp;
    use_gas(host, cost)?;
    let (a, b) = host.managed_types.two_big_ints(first, second)?;
    consume_gas_for_big_int_copy(host, &[&a, &b])?;
    Ok(match a.cmp(&b) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    })
}

// ── Bitwise ──

fn shift_op<F>(host: &mut VmHost, cost: u64, destination: i32, handle: i32, bits: i32, op: F) -> VMResult<()>
where
    F: FnOnce(&BigInt, usize) -> BigInt,
{
    use_gas(host, cost)?;
    if bits < 0 {
        return Err(VMError::ShiftNegative);
    }
    let value = host.managed_types.big_int(handle)?;
    if value.is_negative() {
        return Err(VMError::ShiftNegative);
    }

    // Shifts can inflate the value; bound gas by the possible result size.
    let result_byte_len_estimate = add_u64(big_int_byte_len(&value), (bits as u64).div_ceil(8));
    let per_byte = host.metering.gas_schedule().big_int.copy_per_byte;
    use_gas(host, mul_u64(per_byte, result_byte_len_estimate))?;

    let result = op(&value, bits as usize);
    host.managed_types.set_big_int(destination, result);
    Ok(())
}

pub fn big_int_shl(host: &mut VmHost, destination: i32, handle: i32, bits: i32) -> VMResult<()> {
    let cost = host.metering.gas_schedule().big_int.shl;
    shift_op(host, cost, destination, handle, bits, |v, b| v << b)
}

pub fn big_int_shr(host: &mut VmHost, destination: i32, handle: i32, bits: i32) -> VMResult<()> {
    let cost = host.metering.gas_schedule().big_int.shr;
    shift_op(host, cost, destination, handle, bits, |v, b| v >> b)
}

fn bitwise_op<F>(host: &mut VmHost, destination: i32, first: i32, second: i32, op: F) -> VMResult<()>
where
    F: FnOnce(&BigInt, &BigInt) -> BigInt,
{
    let cost = host.metering.gas_schedule().big_int.and_or_xor;
    use_gas(host, cost)?;
    let (a, b) = host.managed_types.two_big_ints(first, second)?;
    if a.is_negative() || b.is_negative() {
        return Err(VMError::BitwiseNegative);
    }
    consume_gas_for_big_int_copy(host, &[&a, &b])?;
    host.managed_types.set_big_int(destination, op(&a, &b));
    Ok(())
}

pub fn big_int_and(host: &mut VmHost, destination: i32, first: i32, second: i32) -> VMResult<()> {
    bitwise_op(host, destination, first, second, |a, b| a & b)
}

pub fn big_int_or(host: &mut VmHost, destination: i32, first: i32, second: i32) -> VMResult<()> {
    bitwise_op(host, destination, first, second, |a, b| a | b)
}

pub fn big_int_xor(host: &mut VmHost, destination: i32, first: i32, second: i32) -> VMResult<()> {
    bitwise_op(host, destination, first, second, |a, b| a ^ b)
}

// ── Frame interaction ──

pub fn big_int_get_argument(host: &mut VmHost, index: i32, destination: i32) -> VMResult<()> {
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
    let value = BigInt::from_bytes_be(num_bigint::Sign::Plus, &argument);
    host.managed_types.set_big_int(destination, value);
    Ok(())
}

pub fn big_int_get_call_value(host: &mut VmHost, destination: i32) -> VMResult<()> {
    let cost = host.metering.gas_schedule().api.get_call_value;
    use_gas(host, cost)?;
    let value = host.runtime.vm_input().call_value.clone();
    host.managed_types.set_big_int(destination, value);
    Ok(())
}

pub fn big_int_get_external_balance(
    host: &mut VmHost,
    address: &[u8],
    destination: i32,
) -> VMResult<()> {
    let cost = host.metering.gas_schedule().api.get_external_balance;
    use_gas(host, cost)?;
    let balance = host.blockchain.get_balance_big_int(address, &mut host.output);
    host.managed_types.set_big_int(destination, balance);
    Ok(())
}

pub fn big_int_finish_unsigned(host: &mut VmHost, handle: i32) -> VMResult<()> {
    let cost = host.metering.gas_schedule().big_int.finish_big_int;
    use_gas(host, cost)?;
    let value = host.managed_types.big_int(handle)?;
    if value.is_negative() {
        return Err(VMError::BitwiseNegative);
    }
    consume_gas_for_big_int_copy(host, &[&value])?;
    let (_, bytes) = value.to_bytes_be();
    host.output.finish(bytes);
    Ok(())
}

pub fn big_int_finish_signed(host: &mut VmHost, handle: i32) -> VMResult<()> {
    let cost = host.metering.gas_schedule().big_int.finish_big_int;
    use_gas(host, cost)?;
    let value = host.managed_types.big_int(handle)?;
    consume_gas_for_big_int_copy(host, &[&value])?;
    host.output.finish(value.to_signed_bytes_be());
    Ok(())
}

pub fn big_int_storage_store_unsigned(
    host: &mut VmHost,
    key: &[u8],
    handle: i32,
) -> VMResult<i32> {
    let cost = host.metering.gas_schedule().big_int.storage_store;
    use_gas(host, cost)?;
    let value = host.managed_types.big_int(handle)?;
    if value.is_negative() {
        return Err(VMError::BitwiseNegative);
    }
    let (_, bytes) = value.to_bytes_be();
    let status = host.storage.set_storage(
        key,
        &bytes,
        &mut host.metering,
        &host.runtime,
        &mut host.output,
    )?;
    Ok(status as i32)
}

pub fn big_int_storage_load_unsigned(
    host: &mut VmHost,
    key: &[u8],
    destination: i32,
) -> VMResult<i32> {
    let cost = host.metering.gas_schedule().big_int.storage_load;
    use_gas(host, cost)?;
    let (bytes, _) = host.storage.get_storage_unmetered(key, &mut host.output);
    let value = BigInt::from_bytes_be(num_bigint::Sign::Plus, &bytes);
    let byte_len = big_int_byte_len(&value) as i32;
    host.managed_types.set_big_int(destination, value);
    Ok(byte_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_len() {
        assert_eq!(big_int_byte_len(&BigInt::zero()), 0);
        assert_eq!(big_int_byte_len(&BigInt::from(255)), 1);
        assert_eq!(big_int_byte_len(&BigInt::from(256)), 2);
    }
}
