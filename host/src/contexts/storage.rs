//! Scoped storage access with protection rules and byte-accurate gas.
//!
//! Reads always populate the current output account's storage-update map, so
//! a later commit observes reads and writes uniformly. Keys under the
//! chain-reserved prefix bypass that cache: built-in functions may have
//! changed them outside the VM's view. Keys under the VM-protected prefix
//! are writable only through the privileged internal variants.

use std::sync::Arc;

use tracing::trace;

use vulcan_hostapi::BlockchainHook;
use vulcan_primitives::gas::mul_u64;
use vulcan_primitives::types::VM_PROTECTED_PREFIX;
use vulcan_primitives::{Address, StorageUpdate, VMError, VMResult, ADDRESS_LEN};

use super::metering::MeteringContext;
use super::output::OutputContext;
use super::runtime::RuntimeContext;

/// Classification of a storage write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageStatus {
    Unchanged,
    Modified,
    Added,
    Deleted,
}

pub struct StorageContext {
    hook: Arc<dyn BlockchainHook>,
    address: Address,
    state_stack: Vec<Address>,
    reserved_key_prefix: Vec<u8>,
    protection_enabled: bool,
}

impl StorageContext {
    pub fn new(hook: Arc<dyn BlockchainHook>, reserved_key_prefix: Vec<u8>) -> Self {
        Self {
            hook,
            address: Vec::new(),
            state_stack: Vec::new(),
            reserved_key_prefix,
            protection_enabled: true,
        }
    }

    pub fn init_state(&mut self) {
        self.address.clear();
        self.protection_enabled = true;
    }

    pub fn push_state(&mut self) {
        self.state_stack.push(self.address.clone());
    }

    pub fn pop_set_active(&mut self) {
        if let Some(address) = self.state_stack.pop() {
            self.address = address;
        }
    }

    pub fn pop_discard(&mut self) {
        self.state_stack.pop();
    }

    pub fn clear_state_stack(&mut self) {
        self.state_stack.clear();
    }

    pub fn state_stack_depth(&self) -> usize {
        self.state_stack.len()
    }

    pub fn set_address(&mut self, address: &[u8]) {
        self.address = address.to_vec();
        trace!(target: "vulcan::storage", address = %hex::encode(address), "storage address set");
    }

    pub fn address(&self) -> &[u8] {
        &self.address
    }

    fn is_vm_protected_key(&self, key: &[u8]) -> bool {
        key.starts_with(VM_PROTECTED_PREFIX)
    }

    fn is_reserved_key(&self, key: &[u8]) -> bool {
        key.starts_with(&self.reserved_key_prefix)
    }

    // ── Reads ──

    /// Unmetered read; the boolean reports whether the cache served it.
    pub fn get_storage_unmetered(
        &self,
        key: &[u8],
        output: &mut OutputContext,
    ) -> (Vec<u8>, bool) {
        self.get_storage_from_address_unmetered(&self.address.clone(), key, output)
    }

    /// Unmetered read from any account's storage; also used by the VM's own
    /// async bookkeeping.
    pub fn get_storage_from_address_unmetered(
        &self,
        address: &[u8],
        key: &[u8],
        output: &mut OutputContext,
    ) -> (Vec<u8>, bool) {
        // Reserved keys may be mutated by built-in functions outside the
        // VM's view; always go to the hook for them.
        if !self.is_vm_protected_key(key) && self.is_reserved_key(key) {
            let value = self.hook.get_storage_data(address, key).unwrap_or_default();
            return (value, false);
        }

        let (account, _) = output.get_output_account(address);
        if let Some(update) = account.storage_updates.get(key) {
            return (update.data.clone(), true);
        }

        let value = self.hook.get_storage_data(address, key).unwrap_or_default();
        account.storage_updates.insert(
            key.to_vec(),
            StorageUpdate {
                key: key.to_vec(),
                data: value.clone(),
                written: false,
            },
        );
        (value, false)
    }

    /// Metered read from the current contract's storage.
    pub fn get_storage(
        &self,
        key: &[u8],
        metering: &mut MeteringContext,
        runtime: &RuntimeContext,
        output: &mut OutputContext,
    ) -> (Vec<u8>, bool) {
        let (value, used_cache) = self.get_storage_unmetered(key, output);
        self.use_extra_gas_for_key(key, used_cache, metering, runtime);
        self.use_gas_for_value(&value, used_cache, metering, runtime);
        trace!(target: "vulcan::storage", key = %hex::encode(key), cached = used_cache, "get");
        (value, used_cache)
    }

    /// Metered read from another account's storage; requires the target to
    /// be readable, unless it is the current address.
    pub fn get_storage_from_address(
        &self,
        address: &[u8],
        key: &[u8],
        metering: &mut MeteringContext,
        runtime: &RuntimeContext,
        output: &mut OutputContext,
    ) -> (Vec<u8>, bool) {
        if address != self.address {
            let readable = match self.hook.get_user_account(address) {
                Ok(Some(account)) => {
                    vulcan_primitives::CodeMetadata::from_bytes(&account.code_metadata).readable
                }
                _ => false,
            };
            if !readable {
                self.use_extra_gas_for_key(key, false, metering, runtime);
                return (Vec::new(), false);
            }
        }

        let (value, used_cache) = self.get_storage_from_address_unmetered(address, key, output);
        self.use_extra_gas_for_key(key, used_cache, metering, runtime);
        self.use_gas_for_value(&value, used_cache, metering, runtime);
        (value, used_cache)
    }

    fn use_gas_for_value(
        &self,
        value: &[u8],
        used_cache: bool,
        metering: &mut MeteringContext,
        runtime: &RuntimeContext,
    ) {
        if used_cache {
            // Cached reads charge the flat cached-load cost at the call
            // sites instead of per-byte copy costs.
            return;
        }
        let cost_per_byte = metering.gas_schedule().base_ops.data_copy_per_byte;
        metering.use_gas(runtime, mul_u64(cost_per_byte, value.len() as u64));
    }

    fn use_extra_gas_for_key(
        &self,
        key: &[u8],
        used_cache: bool,
        metering: &mut MeteringContext,
        runtime: &RuntimeContext,
    ) {
        let extra_bytes = key.len() as i64 - ADDRESS_LEN as i64;
        if extra_bytes <= 0 || used_cache {
            return;
        }
        let cost_per_byte = metering.gas_schedule().base_ops.data_copy_per_byte;
        metering.use_gas(runtime, mul_u64(cost_per_byte, extra_bytes as u64));
    }

    fn compute_gas_for_key(&self, key: &[u8], used_cache: bool, metering: &MeteringContext) -> u64 {
        let extra_bytes = key.len() as i64 - ADDRESS_LEN as i64;
        if extra_bytes <= 0 || used_cache {
            return 0;
        }
        mul_u64(
            metering.gas_schedule().base_ops.data_copy_per_byte,
            extra_bytes as u64,
        )
    }

    // ── Writes ──

    pub fn set_storage(
        &mut self,
        key: &[u8],
        value: &[u8],
        metering: &mut MeteringContext,
        runtime: &RuntimeContext,
        output: &mut OutputContext,
    ) -> VMResult<StorageStatus> {
        self.set_storage_to_address(&self.address.clone(), key, value, metering, runtime, output)
    }

    /// Privileged write used by the VM itself (locks, async bookkeeping).
    pub fn set_protected_storage(
        &mut self,
        key: &[u8],
        value: &[u8],
        metering: &mut MeteringContext,
        runtime: &RuntimeContext,
        output: &mut OutputContext,
    ) -> VMResult<StorageStatus> {
        self.set_protected_storage_to_address(
            &self.address.clone(),
            key,
            value,
            metering,
            runtime,
            output,
        )
    }

    /// Privileged write targeting another account.
    pub fn set_protected_storage_to_address(
        &mut self,
        address: &[u8],
        key: &[u8],
        value: &[u8],
        metering: &mut MeteringContext,
        runtime: &RuntimeContext,
        output: &mut OutputContext,
    ) -> VMResult<StorageStatus> {
        self.protection_enabled = false;
        let result = self.set_storage_to_address(address, key, value, metering, runtime, output);
        self.protection_enabled = true;
        result
    }

    fn set_storage_to_address(
        &mut self,
        address: &[u8],
        key: &[u8],
        value: &[u8],
        metering: &mut MeteringContext,
        runtime: &RuntimeContext,
        output: &mut OutputContext,
    ) -> VMResult<StorageStatus> {
        if runtime.read_only() {
            trace!(target: "vulcan::storage", "set ignored in readonly mode");
            return Ok(StorageStatus::Unchanged);
        }
        if !self.is_vm_protected_key(key) && self.is_reserved_key(key) {
            return Err(VMError::StoreReservedKey);
        }
        if self.is_vm_protected_key(key) && self.protection_enabled {
            return Err(VMError::CannotWriteProtectedKey);
        }

        let (old_value, used_cache) = self.get_old_value(address, key, output);

        let gas_for_key = self.compute_gas_for_key(key, used_cache, metering);
        metering.use_gas_bounded(runtime, gas_for_key)?;

        let schedule = metering.gas_schedule().base_ops.clone();
        let length = value.len() as u64;
        let old_length = old_value.len() as u64;

        if old_value == value {
            let gas = if used_cache {
                0
            } else {
                mul_u64(schedule.data_copy_per_byte, length)
            };
            metering.use_gas_bounded(runtime, gas)?;
            trace!(target: "vulcan::storage", key = %hex::encode(key), "set to identical value");
            return Ok(StorageStatus::Unchanged);
        }

        self.record_written_update(address, key, value, output);

        if old_value.is_empty() {
            let gas = mul_u64(schedule.store_per_byte, length);
            metering.use_gas_bounded(runtime, gas)?;
            let (account, _) = output.get_output_account(address);
            account.bytes_added_to_storage =
                account.bytes_added_to_storage.saturating_add(length);
            trace!(target: "vulcan::storage", key = %hex::encode(key), "added");
            return Ok(StorageStatus::Added);
        }

        if value.is_empty() {
            metering.free_gas(output, mul_u64(schedule.release_per_byte, old_length));
            let (account, _) = output.get_output_account(address);
            account.bytes_deleted_from_storage = account
                .bytes_deleted_from_storage
                .saturating_add(old_length);
            trace!(target: "vulcan::storage", key = %hex::encode(key), "deleted");
            return Ok(StorageStatus::Deleted);
        }

        let (gas_to_use, gas_to_free) = if length > old_length {
            let grown = length - old_length;
            let persist = mul_u64(schedule.persist_per_byte, old_length);
            (
                vulcan_primitives::gas::add_u64(persist, mul_u64(schedule.store_per_byte, grown)),
                0,
            )
        } else {
            let shrunk = old_length - length;
            (
                mul_u64(schedule.persist_per_byte, length),
                mul_u64(schedule.release_per_byte, shrunk),
            )
        };
        metering.use_gas_bounded(runtime, gas_to_use)?;
        metering.free_gas(output, gas_to_free);

        trace!(target: "vulcan::storage", key = %hex::encode(key), "modified");
        Ok(StorageStatus::Modified)
    }

    fn record_written_update(
        &self,
        address: &[u8],
        key: &[u8],
        value: &[u8],
        output: &mut OutputContext,
    ) {
        output.set_storage_update(
            address,
            StorageUpdate {
                key: key.to_vec(),
                data: value.to_vec(),
                written: true,
            },
        );
    }

    fn get_old_value(
        &self,
        address: &[u8],
        key: &[u8],
        output: &mut OutputContext,
    ) -> (Vec<u8>, bool) {
        let (account, _) = output.get_output_account(address);
        if let Some(update) = account.storage_updates.get(key) {
            return (update.data.clone(), true);
        }
        self.get_storage_from_address_unmetered(address, key, output)
    }
}
