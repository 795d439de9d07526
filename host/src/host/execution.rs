//! Inner execution flows: top-level runs, nested calls, deployment.

use num_bigint::BigInt;
use num_traits::Zero;
use tracing::trace;

use vulcan_primitives::types::{CALLBACK_FUNCTION_NAME, INIT_FUNCTION_NAME};
use vulcan_primitives::{
    Address, CallType, CodeMetadata, ContractCallInput, ContractCreateInput, EsdtTransfer,
    VMError, VMOutput, VMResult,
};

use crate::contexts::output::CodeDeployInput;
use crate::executor::BreakpointValue;

use super::VmHost;

impl VmHost {
    // ── Top-level flows ──

    pub(super) fn do_run_contract_create(&mut self, input: &ContractCreateInput) -> VMOutput {
        match self.run_contract_create_inner(input) {
            Ok(vm_output) => vm_output,
            Err(err) => {
                self.runtime.add_error(err.clone(), &["_init"]);
                self.output.create_vm_output_in_case_of_error(&err)
            }
        }
    }

    fn run_contract_create_inner(&mut self, input: &ContractCreateInput) -> VMResult<VMOutput> {
        let address = self
            .blockchain
            .new_address(&input.vm_input.caller_addr, &self.config.vm_type, &mut self.output)?;
        if self.blockchain.account_exists(&address) {
            return Err(VMError::DeploymentOverExistingAccount);
        }

        let call_input = input.as_call_input(address.clone());
        self.runtime.init_state_from_call_input(&call_input);
        self.async_ctx.init_state_from_input(&address, &call_input.vm_input);
        self.storage.set_address(&address);
        self.metering.init_state_from_input(&call_input.vm_input);

        self.output.deploy_code(CodeDeployInput {
            contract_code: input.contract_code.clone(),
            contract_code_metadata: input.contract_code_metadata.clone(),
            contract_address: address.clone(),
            code_deployer_address: input.vm_input.caller_addr.clone(),
        });
        self.output
            .add_tx_value_to_account(&address, &input.vm_input.call_value);

        self.metering
            .deduct_initial_gas_for_direct_deployment(&input.contract_code)?;

        let gas_for_instance = self.metering.gas_left(&self.runtime);
        self.runtime
            .start_instance(
                &self.blockchain,
                self.metering.gas_schedule(),
                &input.contract_code,
                gas_for_instance,
                true,
            )
            .map_err(|_| VMError::ContractInvalid)?;

        self.call_init_function()?;
        self.process_async_context()?;

        self.metering
            .update_gas_state_on_success(&self.runtime, &mut self.output)?;
        let gas_remaining = self.metering.gas_left(&self.runtime);
        Ok(self.output.get_vm_output(gas_remaining))
    }

    pub(super) fn do_run_contract_call(&mut self, input: &ContractCallInput) -> VMOutput {
        match self.run_contract_call_inner(input) {
            Ok(vm_output) => vm_output,
            Err(err) => {
                self.runtime.add_error(err.clone(), &[input.function.as_str()]);
                self.output.create_vm_output_in_case_of_error(&err)
            }
        }
    }

    fn run_contract_call_inner(&mut self, input: &ContractCallInput) -> VMResult<VMOutput> {
        self.runtime.init_state_from_call_input(input);
        self.async_ctx
            .init_state_from_input(&input.recipient_addr, &input.vm_input);
        self.storage.set_address(&input.recipient_addr);
        self.metering.init_state_from_input(&input.vm_input);
        self.metering.unlock_gas_if_async_callback(&input.vm_input);

        let contract = self
            .blockchain
            .get_code(&input.recipient_addr, &mut self.output)?;
        self.runtime.set_code_size(contract.len() as u64);
        self.output
            .add_tx_value_to_account(&input.recipient_addr, &input.vm_input.call_value);

        self.metering.deduct_initial_gas_for_execution(&contract)?;

        let gas_for_instance = self.metering.gas_left(&self.runtime);
        self.runtime
            .start_instance(
                &self.blockchain,
                self.metering.gas_schedule(),
                &contract,
                gas_for_instance,
                false,
            )
            .map_err(|err| match err {
                VMError::MaxInstancesReached => err,
                _ => VMError::ContractInvalid,
            })?;

        self.call_sc_method()?;

        self.metering
            .update_gas_state_on_success(&self.runtime, &mut self.output)?;
        let gas_remaining = self.metering.gas_left(&self.runtime);
        Ok(self.output.get_vm_output(gas_remaining))
    }

    pub(super) fn do_run_contract_upgrade(&mut self, input: &ContractCallInput) -> VMOutput {
        match self.run_contract_upgrade_inner(input) {
            Ok(vm_output) => vm_output,
            Err(err) => {
                self.runtime.add_error(err.clone(), &["upgrade"]);
                self.output.create_vm_output_in_case_of_error(&err)
            }
        }
    }

    fn run_contract_upgrade_inner(&mut self, input: &ContractCallInput) -> VMResult<VMOutput> {
        self.runtime.init_state_from_call_input(input);
        self.async_ctx
            .init_state_from_input(&input.recipient_addr, &input.vm_input);
        self.storage.set_address(&input.recipient_addr);
        self.metering.init_state_from_input(&input.vm_input);

        let owner = self.blockchain.get_owner_address(&input.recipient_addr)?;
        if owner != input.vm_input.caller_addr {
            return Err(VMError::UpgradeNotAllowed);
        }
        let metadata =
            CodeMetadata::from_bytes(&self.blockchain.get_code_metadata(&input.recipient_addr));
        if !metadata.upgradeable {
            return Err(VMError::UpgradeNotAllowed);
        }

        let (code, code_metadata) = self.runtime.extract_code_upgrade_from_args()?;
        self.metering.deduct_initial_gas_for_direct_deployment(&code)?;

        self.output.deploy_code(CodeDeployInput {
            contract_code: code.clone(),
            contract_code_metadata: code_metadata,
            contract_address: input.recipient_addr.clone(),
            code_deployer_address: input.vm_input.caller_addr.clone(),
        });

        let gas_for_instance = self.metering.gas_left(&self.runtime);
        self.runtime
            .start_instance(
                &self.blockchain,
                self.metering.gas_schedule(),
                &code,
                gas_for_instance,
                true,
            )
            .map_err(|_| VMError::ContractInvalid)?;

        self.call_init_function()?;
        self.process_async_context()?;

        self.metering
            .update_gas_state_on_success(&self.runtime, &mut self.output)?;
        let gas_remaining = self.metering.gas_left(&self.runtime);
        Ok(self.output.get_vm_output(gas_remaining))
    }

    pub(super) fn do_run_contract_delete(&mut self, input: &ContractCallInput) -> VMOutput {
        match self.run_contract_delete_inner(input) {
            Ok(vm_output) => vm_output,
            Err(err) => {
                self.runtime.add_error(err.clone(), &["delete"]);
                self.output.create_vm_output_in_case_of_error(&err)
            }
        }
    }

    fn run_contract_delete_inner(&mut self, input: &ContractCallInput) -> VMResult<VMOutput> {
        self.runtime.init_state_from_call_input(input);
        self.storage.set_address(&input.recipient_addr);
        self.metering.init_state_from_input(&input.vm_input);

        let owner = self.blockchain.get_owner_address(&input.recipient_addr)?;
        if owner != input.vm_input.caller_addr {
            return Err(VMError::UpgradeNotAllowed);
        }

        self.output
            .self_destruct(&input.recipient_addr, &input.vm_input.caller_addr);
        self.metering
            .update_gas_state_on_success(&self.runtime, &mut self.output)?;
        let gas_remaining = self.metering.gas_left(&self.runtime);
        Ok(self.output.get_vm_output(gas_remaining))
    }

    // ── Method invocation ──

    /// Run the init export, if the contract declares one.
    pub(crate) fn call_init_function(&mut self) -> VMResult<()> {
        if !self.runtime.has_function(INIT_FUNCTION_NAME) {
            return Ok(());
        }
        self.runtime.set_custom_call_function(INIT_FUNCTION_NAME);
        let function = self.runtime.get_function_to_call()?;
        function.as_ref()(self)?;
        self.handle_breakpoint()
    }

    /// Resolve and invoke the frame's function, then interpret the
    /// breakpoint it may have left and run the registered async calls.
    pub(crate) fn call_sc_method(&mut self) -> VMResult<()> {
        let call_type = self.runtime.vm_input().call_type;
        // A callback arriving as its own transaction resolves the persisted
        // context; callbacks run as nested frames skip this.
        let incoming_callback = call_type == CallType::AsynchronousCallback
            && self.runtime.state_stack_depth() == 0;

        if incoming_callback {
            self.process_incoming_async_callback()?;
        } else if call_type == CallType::Direct {
            self.verify_allowed_function_name()?;
        }

        let function = self.runtime.get_function_to_call()?;
        function.as_ref()(self)?;
        self.handle_breakpoint()?;

        if self.timed_out() {
            return Err(self.fail_execution_with_timeout());
        }

        if incoming_callback {
            self.complete_incoming_callback()?;
        } else if call_type != CallType::AsynchronousCallback {
            self.process_async_context()?;
        }

        Ok(())
    }

    fn verify_allowed_function_name(&self) -> VMResult<()> {
        match self.runtime.function() {
            INIT_FUNCTION_NAME => Err(VMError::InitFuncCalledInRun),
            CALLBACK_FUNCTION_NAME => Err(VMError::CallBackFuncCalledInRun),
            _ => Ok(()),
        }
    }

    /// Translate the breakpoint left by the instance into the frame result.
    fn handle_breakpoint(&mut self) -> VMResult<()> {
        let breakpoint = self.runtime.runtime_breakpoint();
        match breakpoint {
            BreakpointValue::None | BreakpointValue::End => Ok(()),
            BreakpointValue::AsyncCall => {
                // A legacy async call ended the contract body; registration
                // already happened, processing follows the normal path.
                self.runtime.set_runtime_breakpoint(BreakpointValue::None);
                Ok(())
            }
            BreakpointValue::SignalError => {
                self.runtime.set_runtime_breakpoint(BreakpointValue::None);
                Err(VMError::SignalError(self.output.return_message().to_string()))
            }
            BreakpointValue::OutOfGas => {
                self.runtime.set_runtime_breakpoint(BreakpointValue::None);
                Err(VMError::NotEnoughGas)
            }
            BreakpointValue::ExecutionFailed => {
                self.runtime.set_runtime_breakpoint(BreakpointValue::None);
                if self.timed_out() {
                    return Err(VMError::ExecutionFailedWithTimeout);
                }
                // Surface the error that failed the execution, so the final
                // output's message carries the cause.
                Err(self.runtime.last_error().unwrap_or(VMError::ExecutionFailed))
            }
        }
    }

    // ── Nested execution ──

    fn assert_same_shard(&self, destination: &[u8]) -> VMResult<()> {
        if !self.are_in_same_shard(self.runtime.sc_address(), destination) {
            return Err(VMError::SyncExecutionNotInSameShard);
        }
        Ok(())
    }

    /// Run a call in a fresh nested frame; on success the nested results
    /// merge upward, on failure every context rolls back.
    pub fn execute_on_dest_context(
        &mut self,
        input: &ContractCallInput,
    ) -> VMResult<VMOutput> {
        self.assert_same_shard(&input.recipient_addr)?;
        if self.timed_out() {
            return Err(self.fail_execution_with_timeout());
        }

        // The callee's whole budget is charged on this frame up front; what
        // it does not consume comes back through restore_gas below.
        let callee_budget = vulcan_primitives::gas::add_u64(
            input.vm_input.gas_provided,
            input.vm_input.gas_locked,
        );
        self.metering.use_gas_bounded(&self.runtime, callee_budget)?;

        self.push_contexts();
        self.output.censor_vm_output();
        self.runtime.init_state_from_call_input(input);
        self.async_ctx
            .init_state_from_input(&input.recipient_addr, &input.vm_input);
        self.storage.set_address(&input.recipient_addr);
        self.metering.init_state_from_input(&input.vm_input);
        self.metering.unlock_gas_if_async_callback(&input.vm_input);

        let result = self.execute_nested_frame(input);
        match result {
            Ok(()) => {
                self.metering
                    .update_gas_state_on_success(&self.runtime, &mut self.output)?;
                let child_gas_remaining = self.metering.gas_left(&self.runtime);
                let child_output = self.output.get_vm_output(child_gas_remaining);

                self.output.pop_merge_active();
                self.managed_types.pop_set_active();
                self.storage.pop_set_active();
                self.async_ctx.pop_set_active();
                self.runtime.pop_set_active();
                self.metering.pop_merge_active();
                self.blockchain.pop_discard();

                self.metering.restore_gas(&self.runtime, child_gas_remaining);
                trace!(target: "vulcan::host", "destination-context call merged");
                Ok(child_output)
            }
            Err(err) => {
                self.metering
                    .update_gas_state_on_failure(&self.runtime, &mut self.output);

                self.output.pop_set_active();
                self.managed_types.pop_set_active();
                self.storage.pop_set_active();
                self.async_ctx.pop_set_active();
                self.runtime.pop_set_active();
                self.metering.pop_set_active();
                self.blockchain.pop_set_active();

                trace!(target: "vulcan::host", %err, "destination-context call reverted");
                Err(err)
            }
        }
    }

    /// Destination-context execution with storage writes suppressed.
    pub fn execute_on_dest_context_read_only(
        &mut self,
        input: &ContractCallInput,
    ) -> VMResult<VMOutput> {
        self.assert_same_shard(&input.recipient_addr)?;
        let callee_budget = input.vm_input.gas_provided;
        self.metering.use_gas_bounded(&self.runtime, callee_budget)?;

        self.push_contexts();
        self.output.censor_vm_output();
        self.runtime.init_state_from_call_input(input);
        self.runtime.set_read_only(true);
        self.async_ctx
            .init_state_from_input(&input.recipient_addr, &input.vm_input);
        self.storage.set_address(&input.recipient_addr);
        self.metering.init_state_from_input(&input.vm_input);

        let result = self.execute_nested_frame(input);
        match result {
            Ok(()) => {
                self.metering
                    .update_gas_state_on_success(&self.runtime, &mut self.output)?;
                let child_gas_remaining = self.metering.gas_left(&self.runtime);
                let child_output = self.output.get_vm_output(child_gas_remaining);

                self.output.pop_merge_active();
                self.managed_types.pop_set_active();
                self.storage.pop_set_active();
                self.async_ctx.pop_set_active();
                self.runtime.pop_set_active();
                self.metering.pop_merge_active();
                self.blockchain.pop_discard();

                self.metering.restore_gas(&self.runtime, child_gas_remaining);
                Ok(child_output)
            }
            Err(err) => {
                self.output.pop_set_active();
                self.managed_types.pop_set_active();
                self.storage.pop_set_active();
                self.async_ctx.pop_set_active();
                self.runtime.pop_set_active();
                self.metering.pop_set_active();
                self.blockchain.pop_set_active();
                Err(err)
            }
        }
    }

    /// Run a call on the caller's own storage and output: a library call.
    /// On success the callee's effects stay on the shared state.
    pub fn execute_on_same_context(&mut self, input: &ContractCallInput) -> VMResult<()> {
        self.assert_same_shard(&input.recipient_addr)?;
        if self.is_builtin_function(&input.function) {
            return Err(VMError::BuiltinCallOnSameContextDisallowed);
        }

        let callee_budget = input.vm_input.gas_provided;
        self.metering.use_gas_bounded(&self.runtime, callee_budget)?;

        self.push_contexts();
        // No censoring: the callee accumulates onto the caller's output.
        self.runtime.init_state_from_call_input(input);
        self.metering.init_state_from_input(&input.vm_input);
        // Storage address intentionally stays the caller's.

        let result = self.execute_nested_frame(input);
        match result {
            Ok(()) => {
                self.metering
                    .update_gas_state_on_success(&self.runtime, &mut self.output)?;
                let child_gas_remaining = self.metering.gas_left(&self.runtime);

                self.output.pop_discard();
                self.managed_types.pop_set_active();
                self.storage.pop_discard();
                self.async_ctx.pop_set_active();
                self.runtime.pop_set_active();
                self.metering.pop_merge_active();
                self.blockchain.pop_discard();

                self.metering.restore_gas(&self.runtime, child_gas_remaining);
                trace!(target: "vulcan::host", "same-context call committed");
                Ok(())
            }
            Err(err) => {
                self.output.pop_set_active();
                self.managed_types.pop_set_active();
                self.storage.pop_set_active();
                self.async_ctx.pop_set_active();
                self.runtime.pop_set_active();
                self.metering.pop_set_active();
                self.blockchain.pop_set_active();
                trace!(target: "vulcan::host", %err, "same-context call reverted");
                Err(err)
            }
        }
    }

    /// The shared inner body of the nested executors: move the value, load
    /// the code, start the instance, invoke.
    fn execute_nested_frame(&mut self, input: &ContractCallInput) -> VMResult<()> {
        if self.is_builtin_function(&input.function) {
            return self.execute_builtin_function(input);
        }

        self.output.transfer_value_only(
            &self.blockchain,
            &input.recipient_addr,
            &input.vm_input.caller_addr,
            &input.vm_input.call_value,
            input.vm_input.call_type != CallType::AsynchronousCallback,
        )?;

        let contract = self
            .blockchain
            .get_code(&input.recipient_addr, &mut self.output)?;
        self.runtime.set_code_size(contract.len() as u64);
        self.metering.deduct_initial_gas_for_execution(&contract)?;

        let gas_for_instance = self.metering.gas_left(&self.runtime);
        self.runtime.start_instance(
            &self.blockchain,
            self.metering.gas_schedule(),
            &contract,
            gas_for_instance,
            false,
        )?;

        self.call_sc_method()
    }

    // ── Contract creation from contracts ──

    /// Deploy a new contract from a running one. Returns the new address.
    pub fn create_contract(&mut self, input: &ContractCreateInput) -> VMResult<Address> {
        if self.runtime.read_only() {
            return Err(VMError::InvalidCallOnReadOnlyMode);
        }

        let creator = self.runtime.sc_address().to_vec();
        let address = self
            .blockchain
            .new_address(&creator, &self.config.vm_type, &mut self.output)?;
        if self.blockchain.account_exists(&address) {
            return Err(VMError::DeploymentOverExistingAccount);
        }
        self.blockchain.increase_nonce(&creator, &mut self.output);

        let callee_budget = input.vm_input.gas_provided;
        self.metering.use_gas_bounded(&self.runtime, callee_budget)?;

        let mut call_input = input.as_call_input(address.clone());
        call_input.vm_input.caller_addr = creator.clone();

        self.push_contexts();
        self.output.censor_vm_output();
        self.runtime.init_state_from_call_input(&call_input);
        self.async_ctx
            .init_state_from_input(&address, &call_input.vm_input);
        self.storage.set_address(&address);
        self.metering.init_state_from_input(&call_input.vm_input);

        let result = self.deploy_nested_frame(input, &address, &creator);
        match result {
            Ok(()) => {
                self.metering
                    .update_gas_state_on_success(&self.runtime, &mut self.output)?;
                let child_gas_remaining = self.metering.gas_left(&self.runtime);

                self.output.pop_merge_active();
                self.managed_types.pop_set_active();
                self.storage.pop_set_active();
                self.async_ctx.pop_set_active();
                self.runtime.pop_set_active();
                self.metering.pop_merge_active();
                self.blockchain.pop_discard();

                self.metering.restore_gas(&self.runtime, child_gas_remaining);
                Ok(address)
            }
            Err(err) => {
                self.output.pop_set_active();
                self.managed_types.pop_set_active();
                self.storage.pop_set_active();
                self.async_ctx.pop_set_active();
                self.runtime.pop_set_active();
                self.metering.pop_set_active();
                self.blockchain.pop_set_active();
                Err(err)
            }
        }
    }

    fn deploy_nested_frame(
        &mut self,
        input: &ContractCreateInput,
        address: &[u8],
        creator: &[u8],
    ) -> VMResult<()> {
        self.output.deploy_code(CodeDeployInput {
            contract_code: input.contract_code.clone(),
            contract_code_metadata: input.contract_code_metadata.clone(),
            contract_address: address.to_vec(),
            code_deployer_address: creator.to_vec(),
        });
        self.output.transfer_value_only(
            &self.blockchain,
            address,
            creator,
            &input.vm_input.call_value,
            false,
        )?;

        self.metering
            .deduct_initial_gas_for_indirect_deployment(&input.contract_code)?;

        let gas_for_instance = self.metering.gas_left(&self.runtime);
        self.runtime.start_instance(
            &self.blockchain,
            self.metering.gas_schedule(),
            &input.contract_code,
            gas_for_instance,
            true,
        )?;

        self.call_init_function()?;
        self.process_async_context()
    }

    // ── Built-in functions and token transfers ──

    /// Dispatch a call to a node-resolved built-in function and absorb its
    /// output into the accumulated state.
    pub(crate) fn execute_builtin_function(
        &mut self,
        input: &ContractCallInput,
    ) -> VMResult<()> {
        let builtin_output = self.blockchain.process_built_in_function(input)?;

        let post_builtin_input = ContractCallInput {
            vm_input: vulcan_primitives::VMInput {
                gas_provided: 0,
                ..input.vm_input.clone()
            },
            ..input.clone()
        };
        self.metering.track_gas_used_by_builtin_function(
            &self.runtime,
            &builtin_output,
            &post_builtin_input,
        );
        self.absorb_vm_output(&builtin_output);
        Ok(())
    }

    /// Fold a hook-produced output into the accumulated output state.
    fn absorb_vm_output(&mut self, produced: &VMOutput) {
        for data in &produced.return_data {
            self.output.finish(data.clone());
        }
        for log in &produced.logs {
            self.output.write_log_with_identifier(
                &log.address,
                log.identifier.clone(),
                log.topics.clone(),
                log.data.clone(),
            );
        }
        for (address, account) in &produced.output_accounts {
            let (target, _) = self.output.get_output_account(address);
            target.balance_delta += &account.balance_delta;
            target
                .output_transfers
                .extend(account.output_transfers.iter().cloned());
            for (key, update) in &account.storage_updates {
                if update.written {
                    target.storage_updates.insert(key.clone(), update.clone());
                }
            }
        }
    }

    /// Transfer tokens and, when the parsed data names a function, run it on
    /// the destination. A plain value transfer must not ride along with
    /// token-transfer data.
    pub fn execute_esdt_transfer(
        &mut self,
        destination: &[u8],
        sender: &[u8],
        transfers: &[EsdtTransfer],
        call_type: CallType,
    ) -> VMResult<VMOutput> {
        if transfers.is_empty() {
            return Err(VMError::InvalidArgument("no token transfers".to_string()));
        }

        let mut builtin_input = ContractCallInput {
            vm_input: vulcan_primitives::VMInput {
                caller_addr: sender.to_vec(),
                call_value: BigInt::zero(),
                call_type,
                gas_provided: self.metering.gas_left(&self.runtime),
                current_tx_hash: self.runtime.current_tx_hash().to_vec(),
                original_tx_hash: self.runtime.original_tx_hash().to_vec(),
                prev_tx_hash: self.runtime.prev_tx_hash().to_vec(),
                esdt_transfers: transfers.to_vec(),
                ..Default::default()
            },
            recipient_addr: destination.to_vec(),
            function: "ESDTTransfer".to_string(),
        };
        for transfer in transfers {
            builtin_input
                .vm_input
                .arguments
                .push(transfer.token_name.clone());
            let (_, value_bytes) = transfer.value.to_bytes_be();
            builtin_input.vm_input.arguments.push(value_bytes);
        }

        let builtin_output = self.blockchain.process_built_in_function(&builtin_input)?;
        self.metering.track_gas_used_by_builtin_function(
            &self.runtime,
            &builtin_output,
            &ContractCallInput::default(),
        );
        self.absorb_vm_output(&builtin_output);
        Ok(builtin_output)
    }
}
