//! The EEI: functions WASM contracts import from the host.
//!
//! Each function exists in two layers. The typed layer in these modules
//! takes decoded Rust values and a `&mut VmHost`; it charges gas, enforces
//! the per-API failure policy, and mutates the contexts. The wire layer in
//! [`crate::executor::wasmtime_impl`] reads raw offsets out of instance
//! memory and delegates here. Tests and mock contracts call the typed layer
//! directly.

pub mod baseops;
pub mod bigint_ops;
pub mod buffer_ops;
pub mod small_int_ops;

use vulcan_primitives::{VMError, VMResult};

use crate::host::VmHost;

/// Apply the per-API failure policy: record the error, mark the runtime
/// failed when the class demands it, and hand back the sentinel the WASM
/// caller expects.
pub fn fail_if_policy<T>(host: &mut VmHost, result: VMResult<T>, sentinel: T) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            if host.runtime().vm_api_error_should_fail_execution() {
                host.runtime.fail_execution(Some(err), &mut host.output);
            } else {
                host.runtime.add_error(err, &[]);
            }
            sentinel
        }
    }
}

/// Same policy, for APIs returning nothing.
pub fn fail_if_policy_unit(host: &mut VmHost, result: VMResult<()>) {
    fail_if_policy(host, result, ());
}

/// Charge a flat API cost, failing the execution on exhaustion.
pub(crate) fn use_gas(host: &mut VmHost, gas: u64) -> VMResult<()> {
    host.metering
        .use_gas_bounded(&host.runtime, gas)
        .map_err(|err| {
            host.runtime
                .fail_execution(Some(VMError::NotEnoughGas), &mut host.output);
            err
        })
}
