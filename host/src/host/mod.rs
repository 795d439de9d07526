//! The VM host: owner of the execution contexts and the public entry points.
//!
//! A host executes one call at a time on its own thread. The watchdog is a
//! helper thread that, when the deadline passes, flips an atomic flag and
//! fires the executor's interrupter, stopping the running instance at its
//! next basic-block boundary; the execution thread then observes the flag,
//! raises the execution-failed breakpoint, and unwinds cooperatively.
//! Panics from the engine or the contexts never escape: they are translated
//! into an execution-panicked output after the instance is cleaned.

use std::panic::AssertUnwindSafe;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use tracing::{error, trace};

use vulcan_hostapi::{BlockchainHook, BuiltinFunctionContainer, EsdtTransferParser};
use vulcan_primitives::gas::GasSchedule;
use vulcan_primitives::types::{DELETE_FUNCTION_NAME, UPGRADE_FUNCTION_NAME};
use vulcan_primitives::{
    ContractCallInput, ContractCreateInput, LogEntry, VMError, VMOutput, VMResult,
};

use crate::config::HostConfig;
use crate::contexts::{
    async_ctx::AsyncContextState, AsyncContext, BlockchainContext, ManagedTypesContext,
    MeteringContext, OutputContext, RuntimeContext, StorageContext,
};
use crate::executor::{ExecutionInterrupter, InstanceBuilder, WasmtimeExecutor};

mod async_flow;
mod execution;

/// Identifier of the synthetic log entry carrying the collected error chain.
pub const INTERNAL_VM_ERRORS_LOG: &[u8] = b"internalVMErrors";

pub struct VmHost {
    pub(crate) config: HostConfig,
    pub(crate) builtins: Arc<dyn BuiltinFunctionContainer>,
    pub(crate) esdt_parser: Arc<dyn EsdtTransferParser>,

    pub(crate) managed_types: ManagedTypesContext,
    pub(crate) blockchain: BlockchainContext,
    pub(crate) metering: MeteringContext,
    pub(crate) output: OutputContext,
    pub(crate) runtime: RuntimeContext,
    pub(crate) async_ctx: AsyncContext,
    pub(crate) storage: StorageContext,

    /// Stored context of an incoming cross-shard callback, held between the
    /// dispatch phase and the completion phase of one execution.
    pub(crate) incoming_async_state: Option<AsyncContextState>,

    timed_out: Arc<AtomicBool>,
    /// Stops the running instance at its next basic-block boundary; the
    /// watchdog fires it together with the timeout flag.
    interrupter: Arc<dyn ExecutionInterrupter>,
    closing: bool,
}

impl VmHost {
    pub fn new(
        hook: Arc<dyn BlockchainHook>,
        builtins: Arc<dyn BuiltinFunctionContainer>,
        esdt_parser: Arc<dyn EsdtTransferParser>,
        config: HostConfig,
    ) -> VMResult<Self> {
        config.validate()?;

        let mut runtime = RuntimeContext::new(config.vm_type.clone(), config.max_instances);
        let executor = WasmtimeExecutor::new(config.sigsegv_passthrough, &config.gas_schedule)?;
        let interrupter = executor.interrupter();
        runtime.set_instance_builder(Rc::new(executor));

        let mut host = Self {
            managed_types: ManagedTypesContext::new(),
            blockchain: BlockchainContext::new(hook.clone()),
            metering: MeteringContext::new(config.gas_schedule.clone(), config.block_gas_limit),
            output: OutputContext::new(),
            runtime,
            async_ctx: AsyncContext::new(),
            storage: StorageContext::new(hook, config.reserved_key_prefix.clone()),
            incoming_async_state: None,
            timed_out: Arc::new(AtomicBool::new(false)),
            interrupter,
            closing: false,
            builtins,
            esdt_parser,
            config,
        };
        host.init_contexts();
        Ok(host)
    }

    /// Swap the instance builder; tests install the mock executor here.
    /// The watchdog's interrupter must match the engine behind the builder.
    pub fn replace_instance_builder(&mut self, builder: Rc<dyn InstanceBuilder>) {
        self.interrupter = builder.interrupter();
        self.runtime.set_instance_builder(builder);
    }

    // ── Context accessors ──

    pub fn runtime(&self) -> &RuntimeContext {
        &self.runtime
    }

    pub fn metering(&self) -> &MeteringContext {
        &self.metering
    }

    pub fn output(&self) -> &OutputContext {
        &self.output
    }

    pub fn storage(&self) -> &StorageContext {
        &self.storage
    }

    pub fn blockchain(&self) -> &BlockchainContext {
        &self.blockchain
    }

    pub fn managed_types(&self) -> &ManagedTypesContext {
        &self.managed_types
    }

    pub fn managed_types_mut(&mut self) -> &mut ManagedTypesContext {
        &mut self.managed_types
    }

    pub fn async_context(&self) -> &AsyncContext {
        &self.async_ctx
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    // ── Lifecycle ──

    fn init_contexts(&mut self) {
        self.clear_context_state_stacks();
        self.managed_types.init_state();
        self.output.init_state();
        self.metering.init_state();
        self.runtime.init_state();
        self.async_ctx.init_state();
        self.storage.init_state();
        self.blockchain.init_state();
        self.incoming_async_state = None;
    }

    fn clear_context_state_stacks(&mut self) {
        self.managed_types.clear_state_stack();
        self.output.clear_state_stack();
        self.metering.clear_state_stack();
        self.runtime.clear_state_stack();
        self.async_ctx.clear_state_stack();
        self.storage.clear_state_stack();
        self.blockchain.clear_state_stack();
    }

    /// Push the state of every context; the stacks move together.
    pub(crate) fn push_contexts(&mut self) {
        self.managed_types.push_state();
        self.blockchain.push_state();
        self.metering.push_state();
        self.output.push_state();
        self.runtime.push_state();
        self.storage.push_state();
        self.async_ctx.push_state();
    }

    /// Close the warm cache and refuse further executions.
    pub fn close(&mut self) {
        self.runtime.clear_warm_instance_cache();
        self.closing = true;
    }

    /// Drop cached instances but keep accepting executions.
    pub fn reset(&mut self) {
        self.runtime.clear_warm_instance_cache();
    }

    /// Apply a new gas schedule. Cached instances were compiled against the
    /// old opcode costs, so the warm cache is dropped with it.
    pub fn gas_schedule_change(&mut self, gas_schedule: GasSchedule) {
        self.config.gas_schedule = gas_schedule.clone();
        self.metering.set_gas_schedule(gas_schedule);
        self.runtime.clear_warm_instance_cache();
    }

    pub(crate) fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    /// Consume gas on the current frame, failing on exhaustion.
    pub fn use_gas_bounded(&mut self, gas: u64) -> VMResult<()> {
        self.metering.use_gas_bounded(&self.runtime, gas)
    }

    /// Gas still available to the current frame.
    pub fn gas_left(&self) -> u64 {
        self.metering.gas_left(&self.runtime)
    }

    /// Signal a user error from contract code.
    pub fn signal_user_error(&mut self, message: &str) {
        self.runtime.signal_user_error(message, &mut self.output);
    }

    pub fn are_in_same_shard(&self, left: &[u8], right: &[u8]) -> bool {
        self.blockchain.get_shard_of_address(left) == self.blockchain.get_shard_of_address(right)
    }

    pub fn is_builtin_function(&self, name: &str) -> bool {
        self.builtins.is_builtin_function(name)
    }

    // ── Entry points ──

    /// Deploy a new contract and run its init function.
    pub fn run_contract_create(&mut self, input: ContractCreateInput) -> VMResult<VMOutput> {
        if self.closing {
            return Err(VMError::VMIsClosing);
        }
        trace!(
            target: "vulcan::host",
            code_len = input.contract_code.len(),
            gas = input.vm_input.gas_provided,
            "run contract create"
        );

        self.init_contexts();
        let mut vm_output = self.execute_guarded(|host| host.do_run_contract_create(&input));
        self.append_error_log(
            &mut vm_output,
            &input.vm_input.caller_addr,
            &input.vm_input.caller_addr,
            "_init",
        );

        trace!(
            target: "vulcan::host",
            code = %vm_output.return_code,
            gas_remaining = vm_output.gas_remaining,
            "run contract create end"
        );
        Ok(vm_output)
    }

    /// Call a function of a deployed contract. The reserved upgrade and
    /// delete names dispatch to their dedicated flows.
    pub fn run_contract_call(&mut self, input: ContractCallInput) -> VMResult<VMOutput> {
        if self.closing {
            return Err(VMError::VMIsClosing);
        }
        trace!(
            target: "vulcan::host",
            function = %input.function,
            gas = input.vm_input.gas_provided,
            "run contract call"
        );

        self.init_contexts();
        let mut vm_output = self.execute_guarded(|host| match input.function.as_str() {
            UPGRADE_FUNCTION_NAME => host.do_run_contract_upgrade(&input),
            DELETE_FUNCTION_NAME => host.do_run_contract_delete(&input),
            _ => host.do_run_contract_call(&input),
        });
        self.append_error_log(
            &mut vm_output,
            &input.vm_input.caller_addr,
            &input.recipient_addr,
            &input.function,
        );

        trace!(
            target: "vulcan::host",
            function = %input.function,
            code = %vm_output.return_code,
            gas_remaining = vm_output.gas_remaining,
            "run contract call end"
        );
        Ok(vm_output)
    }

    /// Run the inner execution under the watchdog, translating panics into
    /// an execution-panicked output.
    fn execute_guarded<F>(&mut self, execute: F) -> VMOutput
    where
        F: FnOnce(&mut Self) -> VMOutput,
    {
        self.timed_out.store(false, Ordering::SeqCst);
        let timed_out = self.timed_out.clone();
        let interrupter = self.interrupter.clone();
        let deadline = self.config.effective_timeout();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let watchdog = std::thread::spawn(move || {
            if done_rx.recv_timeout(deadline).is_err() {
                // Flag first, then stop the instance at its next basic
                // block; the execution thread reads the flag behind the
                // resulting breakpoint.
                timed_out.store(true, Ordering::SeqCst);
                interrupter.interrupt();
            }
        });

        let result = std::panic::catch_unwind(AssertUnwindSafe(|| execute(self)));

        let _ = done_tx.send(());
        let _ = watchdog.join();

        match result {
            Ok(vm_output) => {
                if self.timed_out() && vm_output.return_code.is_ok() {
                    // The deadline fired while execution was wrapping up;
                    // the timeout verdict wins, like any watchdog race.
                    let err = VMError::ExecutionFailedWithTimeout;
                    self.runtime.add_error(err.clone(), &[]);
                    self.runtime.clean_instance();
                    return self.output.create_vm_output_in_case_of_error(&err);
                }
                vm_output
            }
            Err(panic) => {
                let message = panic_message(panic);
                error!(target: "vulcan::host", message, "VM execution panicked");
                let err = VMError::ExecutionPanicked(message);
                self.runtime.add_error(err.clone(), &[]);
                self.runtime.clean_instance();
                self.output.create_vm_output_in_case_of_error(&err)
            }
        }
    }

    /// Raise the timeout failure on the running frame. Called from the
    /// execution thread once it observes the watchdog flag.
    pub(crate) fn fail_execution_with_timeout(&mut self) -> VMError {
        let err = VMError::ExecutionFailedWithTimeout;
        self.runtime
            .fail_execution(Some(err.clone()), &mut self.output);
        err
    }

    fn append_error_log(
        &self,
        vm_output: &mut VMOutput,
        sender: &[u8],
        receiver: &[u8],
        function: &str,
    ) {
        let Some(errors) = self.runtime.all_errors_formatted() else {
            return;
        };
        vm_output.logs.push(LogEntry {
            identifier: INTERNAL_VM_ERRORS_LOG.to_vec(),
            address: sender.to_vec(),
            topics: vec![receiver.to_vec(), function.as_bytes().to_vec()],
            data: errors.into_bytes(),
        });
    }

    /// Depth of the context state stacks; identical across contexts at
    /// every suspension point.
    pub fn context_stack_depth(&self) -> usize {
        debug_assert_eq!(
            self.output.state_stack_depth(),
            self.runtime.state_stack_depth()
        );
        debug_assert_eq!(
            self.storage.state_stack_depth(),
            self.runtime.state_stack_depth()
        );
        debug_assert_eq!(
            self.async_ctx.state_stack_depth(),
            self.runtime.state_stack_depth()
        );
        self.runtime.state_stack_depth()
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
