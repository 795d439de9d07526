//! The asynchronous call protocol.
//!
//! After a contract body returns, its registered async calls are processed
//! in two phases. Calls whose destination lives in this shard and has code
//! run synchronously, callback included. Whatever stays pending is
//! serialised under a reserved storage key and leaves the shard as an
//! asynchronous-call transfer; the incoming callback transaction later
//! reloads the persisted context, removes the answered call, and walks the
//! completion chain upward when everything has drained.

use num_bigint::BigInt;
use num_traits::Zero;
use tracing::trace;

use vulcan_primitives::calldata::{encoded_data_length, parse_call_data, CallDataBuilder};
use vulcan_primitives::gas::{add_u64, mul_u64};
use vulcan_primitives::types::{custom_storage_key, ASYNC_DATA_PREFIX};
use vulcan_primitives::{CallType, ContractCallInput, ReturnCode, VMError, VMOutput, VMResult};

use crate::contexts::async_ctx::{
    AsyncCall, AsyncCallExecutionMode, AsyncCallStatus, AsyncContextState,
};

use super::VmHost;

impl VmHost {
    fn async_storage_key(&self) -> Vec<u8> {
        custom_storage_key(ASYNC_DATA_PREFIX, self.runtime.original_tx_hash())
    }

    // ── Two-phase processing ──

    /// Process every async call registered during the frame's body.
    pub(crate) fn process_async_context(&mut self) -> VMResult<()> {
        if !self.async_ctx.has_pending_call_groups() {
            return Ok(());
        }
        if self.runtime.read_only() {
            return Ok(());
        }

        self.setup_async_calls_gas()?;
        self.determine_execution_modes();

        // Local phase: run every same-shard call synchronously.
        let local_calls = self.collect_calls(|call| call.is_local());
        for call in local_calls {
            let processed = self.process_local_async_call(call)?;
            self.store_processed_call(processed);
        }

        self.async_ctx.retain_pending_calls();
        if !self.async_ctx.has_pending_call_groups() {
            return Ok(());
        }

        // Remote phase: persist the pending context, then re-split the
        // remaining gas and emit one transfer per pending call.
        self.save_async_context_to_storage()?;
        self.setup_async_calls_gas()?;

        let remote_calls = self.collect_calls(|call| call.status == AsyncCallStatus::Pending);
        for call in remote_calls {
            self.send_async_call_to_destination(&call)?;
        }
        Ok(())
    }

    /// Split the available gas over the registered calls: explicit requests
    /// are honoured, zero-gas calls share what is left after the locks.
    fn setup_async_calls_gas(&mut self) -> VMResult<()> {
        let gas_left = self.metering.gas_left(&self.runtime);

        let mut gas_needed = 0u64;
        let mut total_locked = 0u64;
        let mut calls_with_zero_gas = 0u64;
        for group in self.async_ctx.call_groups() {
            for call in &group.calls {
                if call.status != AsyncCallStatus::Pending {
                    continue;
                }
                total_locked = add_u64(total_locked, call.gas_locked);
                if call.provided_gas == 0 {
                    calls_with_zero_gas += 1;
                } else {
                    gas_needed = add_u64(gas_needed, call.provided_gas);
                }
            }
        }

        let available = gas_left
            .checked_sub(total_locked)
            .ok_or(VMError::NotEnoughGas)?;
        if gas_needed > available {
            return Err(VMError::NotEnoughGas);
        }

        let gas_share = if calls_with_zero_gas > 0 {
            (available - gas_needed) / calls_with_zero_gas
        } else {
            0
        };

        for group in self.async_ctx.call_groups_mut() {
            for call in &mut group.calls {
                if call.status != AsyncCallStatus::Pending {
                    continue;
                }
                call.gas_limit = if call.provided_gas == 0 {
                    gas_share
                } else {
                    call.provided_gas
                };
            }
        }
        Ok(())
    }

    /// A call is local when its destination is in this shard and resolves
    /// to a contract with code.
    fn determine_execution_modes(&mut self) {
        let sc_address = self.runtime.sc_address().to_vec();
        let mut modes = Vec::new();
        for group in self.async_ctx.call_groups() {
            for call in &group.calls {
                let same_shard = self.are_in_same_shard(&sc_address, &call.destination);
                let has_code = self.blockchain.is_smart_contract(&call.destination);
                let (function, _) = parse_call_data(&call.data).unwrap_or_default();
                let mode = if same_shard && has_code {
                    AsyncCallExecutionMode::Local
                } else if self.is_builtin_function(&function) {
                    AsyncCallExecutionMode::BuiltinCrossShard
                } else if same_shard {
                    AsyncCallExecutionMode::Remote
                } else {
                    AsyncCallExecutionMode::Unknown
                };
                modes.push((call.destination.clone(), mode));
            }
        }
        for (destination, mode) in modes {
            for group in self.async_ctx.call_groups_mut() {
                if let Some(index) = group.find_call_by_destination(&destination) {
                    group.calls[index].execution_mode = mode;
                }
            }
        }
    }

    fn collect_calls<F>(&self, predicate: F) -> Vec<AsyncCall>
    where
        F: Fn(&AsyncCall) -> bool,
    {
        let mut calls = Vec::new();
        for group in self.async_ctx.call_groups() {
            for call in &group.calls {
                if call.status == AsyncCallStatus::Pending && predicate(call) {
                    calls.push(call.clone());
                }
            }
        }
        calls
    }

    fn store_processed_call(&mut self, processed: AsyncCall) {
        for group in self.async_ctx.call_groups_mut() {
            if let Some(index) = group.find_call_by_destination(&processed.destination) {
                group.calls[index] = processed;
                return;
            }
        }
    }

    // ── Local execution ──

    /// Execute one async call in this shard, then its callback. Execution
    /// failures reject the call but never abort the siblings; a callback
    /// failure is recorded on the output and execution continues.
    fn process_local_async_call(&mut self, mut call: AsyncCall) -> VMResult<AsyncCall> {
        let destination_input = match self.create_async_destination_input(&call) {
            Ok(input) => input,
            Err(err) => {
                self.runtime.add_error(err, &["async destination input"]);
                call.status = AsyncCallStatus::Rejected;
                return Ok(call);
            }
        };

        let (destination_output, destination_err) =
            match self.execute_on_dest_context(&destination_input) {
                Ok(output) => (output, None),
                Err(err) => {
                    let failed = self.output.create_vm_output_in_case_of_error(&err);
                    (failed, Some(err))
                }
            };
        call.update_status(destination_output.return_code);

        if !call.has_callback() {
            return Ok(call);
        }

        let callback_input = self.create_callback_input(
            &call,
            &destination_output,
            destination_err.as_ref(),
        )?;
        if let Err(callback_err) = self.execute_on_dest_context(&callback_input) {
            self.process_callback_error(callback_err)?;
        }

        trace!(target: "vulcan::async", status = ?call.status, "local async call processed");
        Ok(call)
    }

    /// Build the input that runs the async call on its destination.
    fn create_async_destination_input(&self, call: &AsyncCall) -> VMResult<ContractCallInput> {
        let (function, arguments) = parse_call_data(&call.data)?;
        if function.is_empty() {
            return Err(VMError::InvalidFunctionName);
        }

        let step = self.metering.gas_schedule().api.async_call_step;
        if call.gas_limit <= step {
            return Err(VMError::NotEnoughGas);
        }
        let gas_provided = call.gas_limit - step;

        Ok(ContractCallInput {
            vm_input: vulcan_primitives::VMInput {
                caller_addr: self.runtime.sc_address().to_vec(),
                arguments,
                call_value: BigInt::from_bytes_be(num_bigint::Sign::Plus, &call.value_bytes),
                call_type: CallType::AsynchronousCall,
                gas_price: self.runtime.vm_input().gas_price,
                gas_provided,
                gas_locked: 0,
                original_tx_hash: self.runtime.original_tx_hash().to_vec(),
                current_tx_hash: call.call_id.clone(),
                prev_tx_hash: self.async_ctx.call_id().to_vec(),
                esdt_transfers: Vec::new(),
                return_call_after_error: false,
            },
            recipient_addr: call.destination.clone(),
            function,
        })
    }

    /// Build the callback input from the destination's results. The first
    /// argument is always the return code; on success the return data
    /// follow, on failure the return message does.
    fn create_callback_input(
        &self,
        call: &AsyncCall,
        destination_output: &VMOutput,
        destination_err: Option<&VMError>,
    ) -> VMResult<ContractCallInput> {
        let mut arguments = vec![return_code_bytes(destination_output.return_code)];
        if destination_err.is_none() && destination_output.return_code.is_ok() {
            arguments.extend(destination_output.return_data.iter().cloned());
        } else {
            arguments.push(destination_output.return_message.clone().into_bytes());
        }
        if let Some(closure) = &call.callback_closure {
            arguments.push(closure.clone());
        }

        let callback_name = call.callback_name().to_string();
        let schedule = self.metering.gas_schedule();
        let data_length = encoded_data_length(&callback_name, &arguments) as u64;
        let gas_to_deduct = add_u64(
            schedule.api.async_call_step,
            mul_u64(schedule.base_ops.data_copy_per_byte, data_length),
        );

        // A rejected destination leaves no remaining gas; the callback then
        // runs on the gas locked at registration.
        let gas_limit = destination_output.gas_remaining;
        if add_u64(gas_limit, call.gas_locked) <= gas_to_deduct {
            return Err(VMError::NotEnoughGas);
        }
        let gas_limit = gas_limit.saturating_sub(gas_to_deduct);

        Ok(ContractCallInput {
            vm_input: vulcan_primitives::VMInput {
                caller_addr: call.destination.clone(),
                arguments,
                call_value: BigInt::zero(),
                call_type: CallType::AsynchronousCallback,
                gas_price: self.runtime.vm_input().gas_price,
                gas_provided: gas_limit,
                gas_locked: call.gas_locked,
                original_tx_hash: self.runtime.original_tx_hash().to_vec(),
                current_tx_hash: self.runtime.current_tx_hash().to_vec(),
                prev_tx_hash: call.call_id.clone(),
                esdt_transfers: Vec::new(),
                return_call_after_error: false,
            },
            recipient_addr: self.runtime.sc_address().to_vec(),
            function: callback_name,
        })
    }

    /// A failed callback does not revert the async call; the failure is
    /// surfaced on the output for the caller to inspect.
    fn process_callback_error(&mut self, callback_err: VMError) -> VMResult<()> {
        if callback_err.is_not_enough_gas() {
            self.runtime
                .fail_execution(Some(callback_err.clone()), &mut self.output);
            return Err(callback_err);
        }
        self.runtime
            .add_error(callback_err, &["async callback failed"]);
        let return_code = self.output.return_code();
        self.output.finish(return_code.to_string().into_bytes());
        self.output
            .finish(self.runtime.current_tx_hash().to_vec());
        Ok(())
    }

    // ── Remote phase ──

    /// Persist the pending groups so the incoming callback can find them.
    fn save_async_context_to_storage(&mut self) -> VMResult<()> {
        let data = self.async_ctx.state().serialize()?;
        let key = self.async_storage_key();
        self.storage.set_protected_storage(
            &key,
            &data,
            &mut self.metering,
            &self.runtime,
            &mut self.output,
        )?;
        trace!(target: "vulcan::async", "pending async context persisted");
        Ok(())
    }

    fn clear_stored_async_context(&mut self) -> VMResult<()> {
        let key = self.async_storage_key();
        self.storage.set_protected_storage(
            &key,
            &[],
            &mut self.metering,
            &self.runtime,
            &mut self.output,
        )?;
        Ok(())
    }

    /// Emit the asynchronous-call transfer carrying a pending call to its
    /// shard, consuming its whole budget from this frame.
    fn send_async_call_to_destination(&mut self, call: &AsyncCall) -> VMResult<()> {
        let step = self.metering.gas_schedule().api.async_call_step;
        let gas_limit = call
            .gas_limit
            .checked_sub(step)
            .ok_or(VMError::NotEnoughGas)?;
        let gas_locked = add_u64(call.gas_locked, step);

        let value = BigInt::from_bytes_be(num_bigint::Sign::Plus, &call.value_bytes);
        let sender = self.runtime.sc_address().to_vec();
        let transfer_result = self.output.transfer(
            &self.blockchain,
            &call.destination,
            &sender,
            gas_limit,
            gas_locked,
            &value,
            call.data.clone(),
            CallType::AsynchronousCall,
        );
        if let Err(err) = transfer_result {
            let gas_left = self.metering.gas_left(&self.runtime);
            self.metering.use_gas(&self.runtime, gas_left);
            self.runtime.fail_execution(Some(err.clone()), &mut self.output);
            return Err(err);
        }

        self.metering
            .use_gas(&self.runtime, add_u64(gas_limit, gas_locked));
        trace!(
            target: "vulcan::async",
            destination = %hex::encode(&call.destination),
            gas_limit,
            gas_locked,
            "async call sent cross-shard"
        );
        Ok(())
    }

    // ── Incoming cross-shard callbacks ──

    /// An asynchronous-callback transaction arrived: reload the persisted
    /// context, pick the call it answers, and point the runtime at the
    /// right callback function. The updated context is re-persisted here;
    /// chain completion runs after the callback body.
    pub(crate) fn process_incoming_async_callback(&mut self) -> VMResult<()> {
        let key = self.async_storage_key();
        let (stored, _) = self.storage.get_storage_unmetered(&key, &mut self.output);
        if stored.is_empty() {
            return Err(VMError::NoStoredAsyncContext);
        }
        let mut state = AsyncContextState::deserialize(&stored)?;

        let caller = self.runtime.vm_input().caller_addr.clone();
        let mut found = None;
        for (group_index, group) in state.call_groups.iter().enumerate() {
            if let Some(call_index) = group.find_call_by_destination(&caller) {
                found = Some((group_index, call_index));
                break;
            }
        }
        let Some((group_index, call_index)) = found else {
            return Err(VMError::CallBackFuncNotExpected);
        };

        let call = state.call_groups[group_index].calls.remove(call_index);
        if state.call_groups[group_index].calls.is_empty() {
            state.call_groups.remove(group_index);
        }

        // The first incoming argument is the destination's return code.
        let callback_name = match self.runtime.arguments().first() {
            Some(code) if code.iter().all(|b| *b == 0) => call.success_callback.clone(),
            Some(_) => call.error_callback.clone(),
            None => return Err(VMError::CannotInterpretCallbackArgs),
        };
        self.runtime.set_custom_call_function(&callback_name);

        if state.call_groups.is_empty() {
            self.clear_stored_async_context()?;
        } else {
            let data = state.serialize()?;
            let key = self.async_storage_key();
            self.storage.set_protected_storage(
                &key,
                &data,
                &mut self.metering,
                &self.runtime,
                &mut self.output,
            )?;
        }

        self.incoming_async_state = Some(state);
        Ok(())
    }

    /// After the callback body ran: if the stored context has drained,
    /// notify the caller chain, forwarding cross-shard when needed.
    pub(crate) fn complete_incoming_callback(&mut self) -> VMResult<()> {
        let Some(state) = self.incoming_async_state.take() else {
            return Ok(());
        };
        if !state.call_groups.is_empty() {
            // Siblings are still pending; the re-persisted context waits.
            return Ok(());
        }

        let owner = self.runtime.sc_address().to_vec();
        if self.are_in_same_shard(&owner, &state.caller_addr) {
            let gas_accumulated = state.gas_accumulated;
            self.notify_child_is_complete(
                &state.caller_addr.clone(),
                &state.call_id.clone(),
                gas_accumulated,
            )
        } else {
            self.send_callback_to_original_caller(&state)
        }
    }

    /// Walk the completion chain: the parent context (same storage key,
    /// parent's address) loses the completed call; when that drains the
    /// parent in turn, recurse towards the first caller.
    pub(crate) fn notify_child_is_complete(
        &mut self,
        parent_address: &[u8],
        child_call_id: &[u8],
        gas_to_accumulate: u64,
    ) -> VMResult<()> {
        let key = self.async_storage_key();
        let (stored, _) = self
            .storage
            .get_storage_from_address_unmetered(parent_address, &key, &mut self.output);
        if stored.is_empty() {
            // The chain ends at a context that never persisted: the
            // original synchronous caller.
            return Ok(());
        }

        let mut state = AsyncContextState::deserialize(&stored)?;
        state.gas_accumulated = state.gas_accumulated.saturating_add(gas_to_accumulate);

        let mut removed = false;
        for group_index in 0..state.call_groups.len() {
            if let Some(call_index) = state.call_groups[group_index]
                .calls
                .iter()
                .position(|c| c.call_id == child_call_id)
            {
                state.call_groups[group_index].calls.remove(call_index);
                if state.call_groups[group_index].calls.is_empty() {
                    state.call_groups.remove(group_index);
                }
                removed = true;
                break;
            }
        }
        if !removed {
            return Err(VMError::AsyncCallNotFound);
        }

        if state.call_groups.is_empty() {
            // This level drained too: delete and keep walking.
            self.storage.set_protected_storage_to_address(
                parent_address,
                &key,
                &[],
                &mut self.metering,
                &self.runtime,
                &mut self.output,
            )?;
            let caller = state.caller_addr.clone();
            let call_id = state.call_id.clone();
            let gas = state.gas_accumulated;
            if self.are_in_same_shard(parent_address, &caller) {
                return self.notify_child_is_complete(&caller, &call_id, gas);
            }
            return Ok(());
        }

        let data = state.serialize()?;
        self.storage.set_protected_storage_to_address(
            parent_address,
            &key,
            &data,
            &mut self.metering,
            &self.runtime,
            &mut self.output,
        )?;
        Ok(())
    }

    /// The context owner lives in another shard; forward the accumulated
    /// results as an asynchronous-callback transfer.
    fn send_callback_to_original_caller(&mut self, state: &AsyncContextState) -> VMResult<()> {
        let return_code = self.output.return_code();
        let mut builder = CallDataBuilder::new("").arg_bytes(&return_code_bytes(return_code));
        for data in self.output.return_data().to_vec() {
            builder = builder.arg_bytes(&data);
        }
        let data = builder.build();

        let gas_limit = self.metering.gas_left(&self.runtime);
        let sender = self.runtime.sc_address().to_vec();
        let transfer_result = self.output.transfer(
            &self.blockchain,
            &state.caller_addr,
            &sender,
            gas_limit,
            0,
            &BigInt::zero(),
            data,
            CallType::AsynchronousCallback,
        );
        if let Err(err) = transfer_result {
            let gas_left = self.metering.gas_left(&self.runtime);
            self.metering.use_gas(&self.runtime, gas_left);
            self.runtime.fail_execution(Some(err.clone()), &mut self.output);
            return Err(err);
        }
        self.metering.use_gas(&self.runtime, gas_limit);
        Ok(())
    }
}

/// The return code as big-endian bytes, empty for zero. The callback wire
/// format relies on this shape.
pub(crate) fn return_code_bytes(return_code: ReturnCode) -> Vec<u8> {
    let value = return_code.as_u64();
    if value == 0 {
        return vec![0];
    }
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(7);
    bytes[first..].to_vec()
}
