//! The current call frame and the WASM instance lifecycle.
//!
//! Owns the VM input of the running frame, the contract address and function
//! being called, the read-only flag, and the active instance. Instances are
//! shared references: the same instance sits in the active slot and on the
//! instance stack while nested calls run, and in the warm cache across
//! top-level calls to the same code.

use std::num::NonZeroUsize;
use std::rc::Rc;

use lru::LruCache;
use tracing::trace;

use vulcan_primitives::types::{CALLBACK_FUNCTION_NAME, INIT_FUNCTION_NAME};
use vulcan_primitives::gas::GasSchedule;
use vulcan_primitives::{
    Address, ContractCallInput, ReturnCode, VMError, VMInput, VMResult,
};

use vulcan_hostapi::BuiltinFunctionContainer;

use crate::config::WARM_INSTANCE_CACHE_SIZE;
use crate::executor::{
    BreakpointValue, CompilationOptions, InstanceBuilder, InstanceRef,
};

use super::blockchain::BlockchainContext;
use super::output::OutputContext;

/// Memory pages an instance may grow beyond its declared size.
const DEFAULT_MAX_MEMORY_GROW: u64 = 10;

/// Longest accepted exported function name.
const MAX_FUNCTION_NAME_LENGTH: usize = 256;

#[derive(Debug, Clone)]
struct RuntimeSnapshot {
    vm_input: VMInput,
    sc_address: Address,
    call_function: String,
    read_only: bool,
}

/// One recorded failure with optional free-form context.
#[derive(Debug, Clone)]
pub struct CollectedError {
    pub error: VMError,
    pub context: Vec<String>,
}

pub struct RuntimeContext {
    vm_input: VMInput,
    sc_address: Address,
    code_size: u64,
    call_function: String,
    vm_type: Vec<u8>,
    read_only: bool,
    verify_code: bool,
    max_instances: u64,
    instance: Option<InstanceRef>,
    state_stack: Vec<RuntimeSnapshot>,
    instance_stack: Vec<Option<InstanceRef>>,
    warm_cache: LruCache<Vec<u8>, InstanceRef>,
    builder: Option<Rc<dyn InstanceBuilder>>,
    errors: Vec<CollectedError>,
}

impl RuntimeContext {
    pub fn new(vm_type: Vec<u8>, max_instances: u64) -> Self {
        Self {
            vm_input: VMInput::default(),
            sc_address: Vec::new(),
            code_size: 0,
            call_function: String::new(),
            vm_type,
            read_only: false,
            verify_code: false,
            max_instances,
            instance: None,
            state_stack: Vec::new(),
            instance_stack: Vec::new(),
            warm_cache: LruCache::new(
                NonZeroUsize::new(WARM_INSTANCE_CACHE_SIZE).expect("nonzero cache size"),
            ),
            builder: None,
            errors: Vec::new(),
        }
    }

    pub fn init_state(&mut self) {
        self.vm_input = VMInput::default();
        self.sc_address.clear();
        self.call_function.clear();
        self.verify_code = false;
        self.read_only = false;
        self.errors.clear();
        trace!(target: "vulcan::runtime", "init state");
    }

    /// Swap the instance builder; tests install the mock one here.
    pub fn set_instance_builder(&mut self, builder: Rc<dyn InstanceBuilder>) {
        self.builder = Some(builder);
    }

    pub fn init_state_from_call_input(&mut self, input: &ContractCallInput) {
        self.vm_input = input.vm_input.clone();
        self.sc_address = input.recipient_addr.clone();
        self.call_function = input.function.clone();
        trace!(
            target: "vulcan::runtime",
            contract = %hex::encode(&input.recipient_addr),
            function = %input.function,
            gas = input.vm_input.gas_provided,
            "init state from call input"
        );
    }

    // ── Frame accessors ──

    pub fn vm_input(&self) -> &VMInput {
        &self.vm_input
    }

    pub fn vm_input_mut(&mut self) -> &mut VMInput {
        &mut self.vm_input
    }

    pub fn set_vm_input(&mut self, vm_input: VMInput) {
        self.vm_input = vm_input;
    }

    pub fn sc_address(&self) -> &[u8] {
        &self.sc_address
    }

    pub fn set_sc_address(&mut self, sc_address: &[u8]) {
        self.sc_address = sc_address.to_vec();
    }

    pub fn function(&self) -> &str {
        &self.call_function
    }

    /// Override the function to call next, e.g. an async callback.
    pub fn set_custom_call_function(&mut self, function: &str) {
        self.call_function = function.to_string();
        trace!(target: "vulcan::runtime", function, "custom call function set");
    }

    pub fn arguments(&self) -> &[Vec<u8>] {
        &self.vm_input.arguments
    }

    pub fn vm_type(&self) -> &[u8] {
        &self.vm_type
    }

    pub fn current_tx_hash(&self) -> &[u8] {
        &self.vm_input.current_tx_hash
    }

    pub fn original_tx_hash(&self) -> &[u8] {
        &self.vm_input.original_tx_hash
    }

    pub fn prev_tx_hash(&self) -> &[u8] {
        &self.vm_input.prev_tx_hash
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn code_size(&self) -> u64 {
        self.code_size
    }

    pub fn set_code_size(&mut self, code_size: u64) {
        self.code_size = code_size;
    }

    /// Pop the first argument off the input, for callback dispatch.
    pub fn get_and_eliminate_first_argument(&mut self) -> Option<Vec<u8>> {
        if self.vm_input.arguments.is_empty() {
            return None;
        }
        Some(self.vm_input.arguments.remove(0))
    }

    /// Interpret the input arguments as a code upgrade request.
    pub fn extract_code_upgrade_from_args(&mut self) -> VMResult<(Vec<u8>, Vec<u8>)> {
        if self.vm_input.arguments.len() < 2 {
            return Err(VMError::InvalidUpgradeArguments);
        }
        let code = self.vm_input.arguments.remove(0);
        let code_metadata = self.vm_input.arguments.remove(0);
        Ok((code, code_metadata))
    }

    // ── State stacking ──

    pub fn push_state(&mut self) {
        self.state_stack.push(RuntimeSnapshot {
            vm_input: self.vm_input.clone(),
            sc_address: self.sc_address.clone(),
            call_function: self.call_function.clone(),
            read_only: self.read_only,
        });
        // The active instance is preserved alongside; popping decides
        // whether it can be cleaned or execution resumes on it.
        self.instance_stack.push(self.instance.clone());
    }

    pub fn pop_set_active(&mut self) {
        let Some(snapshot) = self.state_stack.pop() else {
            return;
        };
        self.vm_input = snapshot.vm_input;
        self.sc_address = snapshot.sc_address;
        self.call_function = snapshot.call_function;
        self.read_only = snapshot.read_only;
        self.pop_instance();
    }

    pub fn pop_discard(&mut self) {
        if self.state_stack.pop().is_none() {
            return;
        }
        self.pop_instance();
    }

    pub fn clear_state_stack(&mut self) {
        self.state_stack.clear();
        self.instance_stack.clear();
    }

    pub fn state_stack_depth(&self) -> usize {
        self.state_stack.len()
    }

    fn pop_instance(&mut self) {
        let Some(previous) = self.instance_stack.pop() else {
            return;
        };
        if let (Some(prev), Some(current)) = (&previous, &self.instance) {
            if Rc::ptr_eq(prev, current) {
                // Execution resumes on the same instance; nothing to clean.
                return;
            }
        }
        self.clean_instance();
        self.instance = previous;
    }

    pub fn running_instances_count(&self) -> u64 {
        self.instance_stack.len() as u64
    }

    pub fn count_same_contract_instances_on_stack(&self, address: &[u8]) -> u64 {
        self.state_stack
            .iter()
            .filter(|snapshot| snapshot.sc_address == address)
            .count() as u64
    }

    // ── Instance lifecycle ──

    pub fn instance(&self) -> VMResult<&InstanceRef> {
        self.instance.as_ref().ok_or(VMError::ExecutionFailed)
    }

    pub fn instance_opt(&self) -> Option<&InstanceRef> {
        self.instance.as_ref()
    }

    #[doc(hidden)]
    pub fn set_instance_for_tests(&mut self, instance: InstanceRef) {
        self.instance = Some(instance);
    }

    fn compilation_options(&self, schedule: &GasSchedule, gas_limit: u64) -> CompilationOptions {
        CompilationOptions {
            gas_limit,
            unmetered_locals: schedule.locals_unmetered,
            max_memory_grow: DEFAULT_MAX_MEMORY_GROW,
            opcode_trace: false,
            metering: true,
            runtime_breakpoints: true,
        }
    }

    /// Create or reuse an instance for the current contract.
    pub fn start_instance(
        &mut self,
        blockchain: &BlockchainContext,
        schedule: &GasSchedule,
        code: &[u8],
        gas_limit: u64,
        new_code: bool,
    ) -> VMResult<()> {
        if self.running_instances_count() >= self.max_instances {
            self.instance = None;
            trace!(target: "vulcan::runtime", "instance creation refused, stack full");
            return Err(VMError::MaxInstancesReached);
        }

        let code_hash = blockchain.get_code_hash(&self.sc_address);
        if !new_code && !code_hash.is_empty() {
            if self.start_warm_instance(&code_hash) {
                return Ok(());
            }
            if self.make_instance_from_compiled_code(blockchain, schedule, &code_hash, gas_limit) {
                return Ok(());
            }
        }

        self.make_instance_from_bytecode(blockchain, schedule, code, code_hash, gas_limit, new_code)
    }

    fn start_warm_instance(&mut self, code_hash: &[u8]) -> bool {
        let Some(warm) = self.warm_cache.get(code_hash) else {
            return false;
        };
        // An instance that is still live in this execution cannot be
        // reused: its gas points belong to a suspended frame.
        let in_use = self
            .instance
            .as_ref()
            .map(|current| Rc::ptr_eq(current, warm))
            .unwrap_or(false)
            || self
                .instance_stack
                .iter()
                .flatten()
                .any(|stacked| Rc::ptr_eq(stacked, warm));
        if in_use {
            return false;
        }
        if !warm.reset() {
            self.warm_cache.pop(code_hash);
            return false;
        }
        self.instance = Some(warm.clone());
        self.verify_code = false;
        trace!(target: "vulcan::runtime", "warm instance reused");
        true
    }

    fn make_instance_from_compiled_code(
        &mut self,
        blockchain: &BlockchainContext,
        schedule: &GasSchedule,
        code_hash: &[u8],
        gas_limit: u64,
    ) -> bool {
        let Some(builder) = self.builder.clone() else {
            return false;
        };
        let Some(compiled) = blockchain.get_compiled_code(code_hash) else {
            trace!(target: "vulcan::runtime", "compiled code not found");
            return false;
        };
        if compiled.is_empty() {
            return false;
        }

        let options = self.compilation_options(schedule, gas_limit);
        match builder.new_instance_from_compiled(&compiled, &options) {
            Ok(instance) => {
                instance.set_points_used(0);
                self.warm_cache.put(code_hash.to_vec(), instance.clone());
                self.instance = Some(instance);
                self.verify_code = false;
                trace!(target: "vulcan::runtime", "instance created from compiled code");
                true
            }
            Err(err) => {
                tracing::error!(target: "vulcan::runtime", %err, "cached compilation failed");
                false
            }
        }
    }

    fn make_instance_from_bytecode(
        &mut self,
        blockchain: &BlockchainContext,
        schedule: &GasSchedule,
        code: &[u8],
        code_hash: Vec<u8>,
        gas_limit: u64,
        new_code: bool,
    ) -> VMResult<()> {
        let builder = self
            .builder
            .clone()
            .ok_or_else(|| VMError::ExecutorError("no instance builder".to_string()))?;

        let options = self.compilation_options(schedule, gas_limit);
        let instance = match builder.new_instance(code, &options) {
            Ok(instance) => instance,
            Err(err) => {
                self.instance = None;
                trace!(target: "vulcan::runtime", %err, "instance creation failed");
                return Err(err);
            }
        };
        instance.set_points_used(0);
        self.instance = Some(instance);

        self.verify_code = true;
        if let Err(err) = self.verify_contract_code() {
            self.clean_instance();
            return Err(err);
        }

        let code_hash = if new_code || code_hash.is_empty() {
            blake3::hash(code).as_bytes().to_vec()
        } else {
            code_hash
        };
        self.save_compiled_code(blockchain, &code_hash);
        let instance = self.instance.clone().expect("instance set above");
        self.warm_cache.put(code_hash, instance);

        trace!(target: "vulcan::runtime", "instance created from bytecode");
        Ok(())
    }

    fn save_compiled_code(&self, blockchain: &BlockchainContext, code_hash: &[u8]) {
        let Some(instance) = &self.instance else {
            return;
        };
        match instance.cache() {
            Ok(compiled) if !compiled.is_empty() => {
                blockchain.save_compiled_code(code_hash, &compiled);
            }
            Ok(_) => {}
            Err(err) => {
                tracing::error!(target: "vulcan::runtime", %err, "caching compiled code failed");
            }
        }
    }

    fn is_warm(&self, instance: &InstanceRef) -> bool {
        self.warm_cache
            .iter()
            .any(|(_, cached)| Rc::ptr_eq(cached, instance))
    }

    /// Drop the active instance, releasing engine resources unless the warm
    /// cache still holds it.
    pub fn clean_instance(&mut self) {
        let Some(instance) = self.instance.take() else {
            return;
        };
        if !self.is_warm(&instance) {
            instance.clean();
            trace!(target: "vulcan::runtime", "instance cleaned");
        }
    }

    /// Evict everything from the warm cache, cleaning each instance.
    pub fn clear_warm_instance_cache(&mut self) {
        while let Some((_, instance)) = self.warm_cache.pop_lru() {
            instance.clean();
        }
    }

    // ── Gas points and breakpoints ──

    pub fn points_used(&self) -> u64 {
        self.instance
            .as_ref()
            .map(|instance| instance.points_used())
            .unwrap_or(0)
    }

    pub fn set_points_used(&self, points: u64) {
        let capped = points.min(i64::MAX as u64);
        if let Some(instance) = &self.instance {
            instance.set_points_used(capped);
        }
    }

    pub fn set_runtime_breakpoint(&self, value: BreakpointValue) {
        if let Some(instance) = &self.instance {
            instance.set_breakpoint_value(value);
            trace!(target: "vulcan::runtime", ?value, "breakpoint set");
        }
    }

    pub fn runtime_breakpoint(&self) -> BreakpointValue {
        self.instance
            .as_ref()
            .map(|instance| instance.breakpoint_value())
            .unwrap_or(BreakpointValue::None)
    }

    // ── Memory access ──

    /// Load from instance memory; reads past the end are zero-padded.
    pub fn mem_load(&self, offset: i32, length: i32) -> VMResult<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        if length < 0 {
            return Err(VMError::NegativeLength);
        }
        let instance = self.instance()?;
        let memory_length = instance.mem_length();
        if offset < 0 || offset as u64 > memory_length {
            return Err(VMError::BadBounds);
        }

        let offset = offset as u64;
        let length = length as u64;
        if offset + length > memory_length {
            let mut result = instance.mem_read(offset, memory_length - offset)?;
            result.resize(length as usize, 0);
            return Ok(result);
        }
        instance.mem_read(offset, length)
    }

    /// Load consecutive slices with the given lengths.
    pub fn mem_load_multiple(&self, offset: i32, lengths: &[i32]) -> VMResult<Vec<Vec<u8>>> {
        let mut results = Vec::with_capacity(lengths.len());
        let mut cursor = offset;
        for &length in lengths {
            results.push(self.mem_load(cursor, length)?);
            cursor += length;
        }
        Ok(results)
    }

    /// Store into instance memory, growing by one page if the write lands
    /// just past the end.
    pub fn mem_store(&self, offset: i32, data: &[u8]) -> VMResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        if offset < 0 {
            return Err(VMError::BadLowerBounds);
        }
        let instance = self.instance()?;
        let requested_end = offset as u64 + data.len() as u64;
        if requested_end > instance.mem_length() {
            instance.mem_grow(1)?;
        }
        if requested_end > instance.mem_length() {
            return Err(VMError::BadUpperBounds);
        }
        instance.mem_write(offset as u64, data)
    }

    // ── Code verification and function lookup ──

    pub fn must_verify_next_contract_code(&mut self) {
        self.verify_code = true;
    }

    pub fn verify_contract_code(&mut self) -> VMResult<()> {
        if !self.verify_code {
            return Ok(());
        }
        self.verify_code = false;

        let instance = self.instance()?;
        if !instance.has_memory() {
            return Err(VMError::MemoryDeclarationMissing);
        }
        for name in instance.exported_names() {
            verify_valid_function_name(&name)?;
        }
        trace!(target: "vulcan::runtime", "contract code verified");
        Ok(())
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.instance
            .as_ref()
            .map(|instance| instance.has_function(name))
            .unwrap_or(false)
    }

    pub fn is_function_imported(&self, name: &str) -> bool {
        self.instance
            .as_ref()
            .map(|instance| instance.is_function_imported(name))
            .unwrap_or(false)
    }

    /// Check that a name may serve as an async-call callback.
    pub fn validate_callback_name(
        &self,
        callback_name: &str,
        builtins: &dyn BuiltinFunctionContainer,
    ) -> VMResult<()> {
        verify_valid_function_name(callback_name).map_err(|_| VMError::InvalidFunctionName)?;
        if callback_name == INIT_FUNCTION_NAME {
            return Err(VMError::InvalidFunctionName);
        }
        if builtins.is_builtin_function(callback_name) {
            return Err(VMError::CannotUseBuiltinAsCallback);
        }
        if !self.has_function(callback_name) {
            return Err(VMError::FuncNotFound);
        }
        Ok(())
    }

    /// Resolve the export to invoke for the current frame.
    pub fn get_function_to_call(&self) -> VMResult<crate::executor::ExportedFn> {
        let instance = self.instance()?;
        if let Some(function) = instance.get_export(&self.call_function) {
            return Ok(function);
        }
        if self.call_function == CALLBACK_FUNCTION_NAME {
            return Err(VMError::CallBackFuncNotExpected);
        }
        Err(VMError::FuncNotFound)
    }

    // ── Failure signalling ──

    /// Stop execution with a user error: sets the output's return code and
    /// message, records the error, and raises the signal-error breakpoint.
    pub fn signal_user_error(&mut self, message: &str, output: &mut OutputContext) {
        output.set_return_code(ReturnCode::UserError);
        output.set_return_message(message.to_string());
        self.add_error(VMError::SignalError(message.to_string()), &[]);
        self.set_runtime_breakpoint(BreakpointValue::SignalError);
        trace!(target: "vulcan::runtime", message, "user error signalled");
    }

    /// Stop execution as failed; out-of-gas errors raise the dedicated
    /// breakpoint so the engine reports the right class.
    pub fn fail_execution(&mut self, err: Option<VMError>, output: &mut OutputContext) {
        output.set_return_code(ReturnCode::ExecutionFailed);

        let (message, breakpoint) = match err {
            Some(err) => {
                let breakpoint = if err.is_not_enough_gas() {
                    BreakpointValue::OutOfGas
                } else {
                    BreakpointValue::ExecutionFailed
                };
                let message = err.to_string();
                self.add_error(err, &[]);
                (message, breakpoint)
            }
            None => {
                self.add_error(VMError::ExecutionFailed, &[]);
                ("execution failed".to_string(), BreakpointValue::ExecutionFailed)
            }
        };

        output.set_return_message(message.clone());
        self.set_runtime_breakpoint(breakpoint);
        trace!(target: "vulcan::runtime", message, "execution failed");
    }

    // ── Error chain ──

    pub fn add_error(&mut self, error: VMError, context: &[&str]) {
        self.errors.push(CollectedError {
            error,
            context: context.iter().map(|s| s.to_string()).collect(),
        });
    }

    pub fn collected_errors(&self) -> &[CollectedError] {
        &self.errors
    }

    /// The most recently recorded error, if any.
    pub fn last_error(&self) -> Option<VMError> {
        self.errors.last().map(|collected| collected.error.clone())
    }

    /// All collected errors joined for the trailing diagnostic log entry.
    pub fn all_errors_formatted(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        let formatted: Vec<String> = self
            .errors
            .iter()
            .map(|collected| {
                if collected.context.is_empty() {
                    collected.error.to_string()
                } else {
                    format!("{} [{}]", collected.error, collected.context.join(", "))
                }
            })
            .collect();
        Some(formatted.join("\n\t"))
    }

    // ── Per-API failure policy ──

    pub fn vm_api_error_should_fail_execution(&self) -> bool {
        true
    }

    pub fn sync_exec_api_error_should_fail_execution(&self) -> bool {
        true
    }

    pub fn big_int_api_error_should_fail_execution(&self) -> bool {
        true
    }

    pub fn managed_buffer_api_error_should_fail_execution(&self) -> bool {
        true
    }
}

/// Accept only plain identifiers as exported function names.
fn verify_valid_function_name(name: &str) -> VMResult<()> {
    if name.is_empty() || name.len() > MAX_FUNCTION_NAME_LENGTH {
        return Err(VMError::InvalidFunctionName);
    }
    let mut chars = name.chars();
    let first = chars.next().expect("nonempty checked above");
    if first.is_ascii_digit() {
        return Err(VMError::InvalidFunctionName);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(VMError::InvalidFunctionName);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::mock::MockInstance;
    use crate::executor::Instance;

    fn runtime() -> RuntimeContext {
        RuntimeContext::new(b"\x05\x00".to_vec(), 10)
    }

    #[test]
    fn test_valid_function_names() {
        assert!(verify_valid_function_name("doSomething").is_ok());
        assert!(verify_valid_function_name("call_back_2").is_ok());
        assert!(verify_valid_function_name("").is_err());
        assert!(verify_valid_function_name("2fast").is_err());
        assert!(verify_valid_function_name("has space").is_err());
        assert!(verify_valid_function_name(&"x".repeat(300)).is_err());
    }

    #[test]
    fn test_push_pop_is_identity() {
        let mut runtime = runtime();
        let mut input = ContractCallInput::default();
        input.recipient_addr = b"contract".to_vec();
        input.function = "doIt".to_string();
        input.vm_input.gas_provided = 500;
        runtime.init_state_from_call_input(&input);
        runtime.set_read_only(true);

        runtime.push_state();
        runtime.set_sc_address(b"other");
        runtime.set_custom_call_function("nested");
        runtime.set_read_only(false);
        runtime.pop_set_active();

        assert_eq!(runtime.sc_address(), b"contract");
        assert_eq!(runtime.function(), "doIt");
        assert!(runtime.read_only());
        assert_eq!(runtime.vm_input().gas_provided, 500);
    }

    #[test]
    fn test_mem_load_zero_padded() {
        let mut runtime = runtime();
        let instance = MockInstance::new();
        instance.mem_write(0, b"abc").unwrap();
        let length = instance.mem_length();
        runtime.set_instance_for_tests(Rc::new(instance));

        // Zero length loads nothing, regardless of memory contents.
        assert_eq!(runtime.mem_load(0, 0).unwrap(), Vec::<u8>::new());

        // Reads past the end are padded with zeroes.
        let loaded = runtime.mem_load(length as i32 - 2, 4).unwrap();
        assert_eq!(loaded.len(), 4);
        assert_eq!(&loaded[2..], &[0, 0]);

        assert_eq!(runtime.mem_load(-1, 4).unwrap_err(), VMError::BadBounds);
        assert_eq!(runtime.mem_load(0, -1).unwrap_err(), VMError::NegativeLength);
    }

    #[test]
    fn test_mem_store_grows_one_page() {
        let mut runtime = runtime();
        let instance = MockInstance::new();
        let length = instance.mem_length();
        runtime.set_instance_for_tests(Rc::new(instance));

        // A write straddling the end grows the memory by one page.
        runtime.mem_store(length as i32 - 1, b"xy").unwrap();
        let reloaded = runtime.mem_load(length as i32 - 1, 2).unwrap();
        assert_eq!(reloaded, b"xy");

        assert_eq!(
            runtime.mem_store(-5, b"z").unwrap_err(),
            VMError::BadLowerBounds
        );
    }

    #[test]
    fn test_get_function_to_call() {
        let mut runtime = runtime();
        let mut instance = MockInstance::new();
        instance.add_method("present", |_| Ok(()));
        runtime.set_instance_for_tests(Rc::new(instance));

        runtime.set_custom_call_function("present");
        assert!(runtime.get_function_to_call().is_ok());

        runtime.set_custom_call_function("absent");
        match runtime.get_function_to_call() {
            Err(e) => assert_eq!(e, VMError::FuncNotFound),
            Ok(_) => panic!("expected error"),
        }

        runtime.set_custom_call_function(CALLBACK_FUNCTION_NAME);
        match runtime.get_function_to_call() {
            Err(e) => assert_eq!(e, VMError::CallBackFuncNotExpected),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn test_error_chain_formatting() {
        let mut runtime = runtime();
        assert!(runtime.all_errors_formatted().is_none());

        runtime.add_error(VMError::NotEnoughGas, &[]);
        runtime.add_error(VMError::FuncNotFound, &["myFunction"]);
        let formatted = runtime.all_errors_formatted().unwrap();
        assert!(formatted.contains("not enough gas"));
        assert!(formatted.contains("myFunction"));
    }

    #[test]
    fn test_first_argument_elimination() {
        let mut runtime = runtime();
        runtime.vm_input_mut().arguments = vec![b"first".to_vec(), b"second".to_vec()];
        assert_eq!(
            runtime.get_and_eliminate_first_argument(),
            Some(b"first".to_vec())
        );
        assert_eq!(runtime.arguments(), &[b"second".to_vec()]);
    }

    #[test]
    fn test_extract_code_upgrade_from_args() {
        let mut runtime = runtime();
        runtime.vm_input_mut().arguments = vec![b"newcode".to_vec()];
        assert_eq!(
            runtime.extract_code_upgrade_from_args().unwrap_err(),
            VMError::InvalidUpgradeArguments
        );

        runtime.vm_input_mut().arguments =
            vec![b"newcode".to_vec(), vec![1, 0], b"arg".to_vec()];
        let (code, metadata) = runtime.extract_code_upgrade_from_args().unwrap();
        assert_eq!(code, b"newcode");
        assert_eq!(metadata, vec![1, 0]);
        assert_eq!(runtime.arguments(), &[b"arg".to_vec()]);
    }
}
