//! Gas accounting for the current frame.
//!
//! The gas points consumed by metered WASM execution live on the instance;
//! this context holds the frame-level quantities derived from the input
//! (initial gas, initial deduction, gas unlocked for callbacks) and the
//! discipline that makes the output's gas fields balance: at the end of a
//! frame, `gas_used` across accounts plus the gas carried by transfers plus
//! the remaining gas must equal the gas the frame was given.

use std::collections::BTreeMap;

use tracing::trace;

use vulcan_primitives::gas::{add_u64, mul_u64, GasSchedule};
use vulcan_primitives::{CallType, ContractCallInput, VMError, VMInput, VMOutput, VMResult};

use super::output::OutputContext;
use super::runtime::RuntimeContext;

/// Per-address, per-API ordered gas deductions, collected when tracing.
pub type GasTrace = BTreeMap<String, BTreeMap<String, Vec<u64>>>;

#[derive(Debug, Clone, Default)]
struct MeteringSnapshot {
    initial_gas_provided: u64,
    initial_cost: u64,
    gas_for_execution: u64,
    unlocked_gas: u64,
    traced_function: Option<String>,
}

pub struct MeteringContext {
    gas_schedule: GasSchedule,
    block_gas_limit: u64,
    initial_gas_provided: u64,
    initial_cost: u64,
    gas_for_execution: u64,
    /// Locked gas released into this frame because it runs a callback.
    unlocked_gas: u64,
    state_stack: Vec<MeteringSnapshot>,
    gas_trace: GasTrace,
    gas_tracing_enabled: bool,
    traced_function: Option<String>,
}

impl MeteringContext {
    pub fn new(gas_schedule: GasSchedule, block_gas_limit: u64) -> Self {
        Self {
            gas_schedule,
            block_gas_limit,
            initial_gas_provided: 0,
            initial_cost: 0,
            gas_for_execution: 0,
            unlocked_gas: 0,
            state_stack: Vec::new(),
            gas_trace: GasTrace::new(),
            gas_tracing_enabled: false,
            traced_function: None,
        }
    }

    pub fn init_state(&mut self) {
        self.initial_gas_provided = 0;
        self.initial_cost = 0;
        self.gas_for_execution = 0;
        self.unlocked_gas = 0;
        self.traced_function = None;
        self.gas_trace.clear();
    }

    pub fn init_state_from_input(&mut self, input: &VMInput) {
        self.initial_gas_provided = input.gas_provided;
        self.initial_cost = 0;
        self.unlocked_gas = 0;
        self.gas_for_execution = input.gas_provided;
    }

    /// Callbacks run on the gas locked when the async call was made; add it
    /// to the executable budget of this frame.
    pub fn unlock_gas_if_async_callback(&mut self, input: &VMInput) {
        if input.call_type != CallType::AsynchronousCallback {
            return;
        }
        self.gas_for_execution = add_u64(self.gas_for_execution, input.gas_locked);
        self.unlocked_gas = input.gas_locked;
        trace!(target: "vulcan::metering", unlocked = input.gas_locked, "callback gas unlocked");
    }

    pub fn gas_schedule(&self) -> &GasSchedule {
        &self.gas_schedule
    }

    pub fn set_gas_schedule(&mut self, gas_schedule: GasSchedule) {
        self.gas_schedule = gas_schedule;
    }

    pub fn block_gas_limit(&self) -> u64 {
        self.block_gas_limit
    }

    pub fn gas_provided(&self) -> u64 {
        self.initial_gas_provided
    }

    // ── State stack ──

    pub fn push_state(&mut self) {
        self.state_stack.push(MeteringSnapshot {
            initial_gas_provided: self.initial_gas_provided,
            initial_cost: self.initial_cost,
            gas_for_execution: self.gas_for_execution,
            unlocked_gas: self.unlocked_gas,
            traced_function: self.traced_function.clone(),
        });
    }

    fn restore(&mut self, snapshot: MeteringSnapshot) {
        self.initial_gas_provided = snapshot.initial_gas_provided;
        self.initial_cost = snapshot.initial_cost;
        self.gas_for_execution = snapshot.gas_for_execution;
        self.unlocked_gas = snapshot.unlocked_gas;
        self.traced_function = snapshot.traced_function;
    }

    pub fn pop_set_active(&mut self) {
        if let Some(snapshot) = self.state_stack.pop() {
            self.restore(snapshot);
        }
    }

    /// Restore the outer frame after a successful nested call. The caller
    /// pre-charged the nested frame's gas and gives back what remained via
    /// `restore_gas`, so the inner usage stays accounted on the points.
    pub fn pop_merge_active(&mut self) {
        self.pop_set_active();
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

    // ── Gas flow ──

    /// Consume gas unconditionally; saturates at the i64 ceiling.
    pub fn use_gas(&mut self, runtime: &RuntimeContext, gas: u64) {
        let points = add_u64(runtime.points_used(), gas);
        runtime.set_points_used(points);
    }

    /// Consume gas, failing when more than the remaining amount is asked.
    pub fn use_gas_bounded(&mut self, runtime: &RuntimeContext, gas: u64) -> VMResult<()> {
        if gas > self.gas_left(runtime) {
            return Err(VMError::NotEnoughGas);
        }
        self.use_gas(runtime, gas);
        Ok(())
    }

    /// Record a refund on the output.
    pub fn free_gas(&mut self, output: &mut OutputContext, gas: u64) {
        output.add_refund(gas);
    }

    /// Undo a prior `use_gas`, e.g. when a nested call returns unused gas.
    pub fn restore_gas(&mut self, runtime: &RuntimeContext, gas: u64) {
        let points = runtime.points_used().saturating_sub(gas);
        runtime.set_points_used(points);
    }

    pub fn gas_left(&self, runtime: &RuntimeContext) -> u64 {
        self.gas_for_execution.saturating_sub(runtime.points_used())
    }

    /// Clamp a requested gas amount into `[0, gas_left]`.
    pub fn bound_gas_limit(&self, runtime: &RuntimeContext, value: i64) -> u64 {
        let requested = value.max(0) as u64;
        requested.min(self.gas_left(runtime))
    }

    /// Gas this frame has spent so far: the initial deduction plus points.
    pub fn gas_spent_by_contract(&self, runtime: &RuntimeContext) -> u64 {
        add_u64(self.initial_cost, runtime.points_used())
    }

    // ── Initial deductions ──

    fn deduct_initial_gas(&mut self, base: u64, cost_per_byte: u64, code_len: u64) -> VMResult<()> {
        let cost = add_u64(base, mul_u64(cost_per_byte, code_len));
        if cost > self.gas_for_execution {
            return Err(VMError::NotEnoughGas);
        }
        self.initial_cost = cost;
        self.gas_for_execution -= cost;
        Ok(())
    }

    /// Deducted before running existing contract code.
    pub fn deduct_initial_gas_for_execution(&mut self, code: &[u8]) -> VMResult<()> {
        let base = self.gas_schedule.base_ops.get_code;
        let per_byte = self.gas_schedule.base_ops.aot_prepare_per_byte;
        self.deduct_initial_gas(base, per_byte, code.len() as u64)
    }

    /// Deducted for a deployment requested directly by a transaction.
    pub fn deduct_initial_gas_for_direct_deployment(&mut self, code: &[u8]) -> VMResult<()> {
        let base = self.gas_schedule.base_ops.get_code;
        let per_byte = self.gas_schedule.base_ops.compile_per_byte;
        self.deduct_initial_gas(base, per_byte, code.len() as u64)
    }

    /// Deducted for a deployment performed by another contract.
    pub fn deduct_initial_gas_for_indirect_deployment(&mut self, code: &[u8]) -> VMResult<()> {
        let per_byte = self.gas_schedule.base_ops.compile_per_byte;
        self.deduct_initial_gas(0, per_byte, code.len() as u64)
    }

    // ── Async gas ──

    /// Gas reserved for a future callback: two async steps plus the lock.
    pub fn compute_gas_locked_for_async(&self) -> u64 {
        add_u64(
            mul_u64(2, self.gas_schedule.api.async_call_step),
            self.gas_schedule.api.async_callback_gas_lock,
        )
    }

    pub fn use_gas_for_async_step(&mut self, runtime: &RuntimeContext) -> VMResult<()> {
        let step = self.gas_schedule.api.async_call_step;
        self.use_gas_bounded(runtime, step)
    }

    // ── Output gas state ──

    /// Attribute the frame's spent gas to the current contract's account.
    ///
    /// Gas already attributed to other accounts by nested frames, and gas
    /// carried away by outgoing transfers, is subtracted so nothing is
    /// counted twice. On the outermost frame the full balance equation is
    /// verified.
    pub fn update_gas_state_on_success(
        &mut self,
        runtime: &RuntimeContext,
        output: &mut OutputContext,
    ) -> VMResult<()> {
        let address = runtime.sc_address().to_vec();
        let spent = self.gas_spent_by_contract(runtime);

        let mut accounted_elsewhere = 0u64;
        for (addr, account) in output.accounts() {
            accounted_elsewhere = add_u64(accounted_elsewhere, account.transfers_gas());
            if addr != &address {
                accounted_elsewhere = add_u64(accounted_elsewhere, account.gas_used);
            }
        }

        let (account, _) = output.get_output_account(&address);
        account.gas_used = spent.saturating_sub(accounted_elsewhere);

        if self.state_stack.is_empty() {
            self.check_gas(runtime, output)?;
        }
        Ok(())
    }

    /// On frame failure the entire gas given to the frame is burned and
    /// ascribed to the callee; the failed output reports zero remaining.
    pub fn update_gas_state_on_failure(
        &mut self,
        runtime: &RuntimeContext,
        output: &mut OutputContext,
    ) {
        let (account, _) = output.get_output_account(runtime.sc_address());
        account.gas_used = add_u64(self.initial_gas_provided, self.unlocked_gas);
    }

    fn check_gas(&self, runtime: &RuntimeContext, output: &OutputContext) -> VMResult<()> {
        let mut total = self.gas_left(runtime);
        for account in output.accounts().values() {
            total = add_u64(total, account.gas_used);
            total = add_u64(total, account.transfers_gas());
        }
        let expected = add_u64(self.initial_gas_provided, self.unlocked_gas);
        if total != expected {
            trace!(
                target: "vulcan::metering",
                total,
                expected,
                "gas accounting mismatch"
            );
            return Err(VMError::InputAndOutputGasDoesNotMatch);
        }
        Ok(())
    }

    /// Reconcile the frame's gas after a built-in function consumed part of
    /// it: what remains is the built-in's leftover plus whatever the
    /// post-built-in call input still provides.
    pub fn track_gas_used_by_builtin_function(
        &mut self,
        runtime: &RuntimeContext,
        builtin_output: &VMOutput,
        post_builtin_input: &ContractCallInput,
    ) {
        let remaining = add_u64(
            builtin_output.gas_remaining,
            post_builtin_input.vm_input.gas_provided,
        );
        let used = self.initial_gas_provided.saturating_sub(remaining);
        self.use_gas(runtime, used);
    }

    // ── Gas tracing ──

    pub fn set_gas_tracing(&mut self, enabled: bool) {
        self.gas_tracing_enabled = enabled;
    }

    pub fn is_gas_tracing_enabled(&self) -> bool {
        self.gas_tracing_enabled
    }

    pub fn gas_trace(&self) -> &GasTrace {
        &self.gas_trace
    }

    /// Open a traced entry for an API function; subsequent
    /// `use_and_trace_gas` calls accumulate into it.
    pub fn start_gas_tracing(&mut self, runtime: &RuntimeContext, function_name: &str) {
        if !self.gas_tracing_enabled {
            return;
        }
        self.traced_function = Some(function_name.to_string());
        self.trace_entry(runtime, function_name).push(0);
    }

    pub fn use_and_trace_gas(&mut self, runtime: &RuntimeContext, gas: u64) {
        self.use_gas(runtime, gas);
        if !self.gas_tracing_enabled {
            return;
        }
        let Some(function_name) = self.traced_function.clone() else {
            return;
        };
        if let Some(last) = self.trace_entry(runtime, &function_name).last_mut() {
            *last = add_u64(*last, gas);
        }
    }

    /// Consume gas and record it as a standalone traced entry.
    pub fn use_gas_and_add_traced_gas(
        &mut self,
        runtime: &RuntimeContext,
        function_name: &str,
        gas: u64,
    ) {
        self.use_gas(runtime, gas);
        if !self.gas_tracing_enabled {
            return;
        }
        self.trace_entry(runtime, function_name).push(gas);
    }

    fn trace_entry(&mut self, runtime: &RuntimeContext, function_name: &str) -> &mut Vec<u64> {
        let address = hex::encode(runtime.sc_address());
        self.gas_trace
            .entry(address)
            .or_default()
            .entry(function_name.to_string())
            .or_default()
    }
}
