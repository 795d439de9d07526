//! Wasmtime-backed executor.
//!
//! The engine is configured for determinism: no threads, no SIMD, NaN
//! canonicalisation, and fuel metering as the gas-point counter. Epoch
//! interruption backs the watchdog: every store carries a one-tick epoch
//! deadline, so a single epoch increment stops any running instance at its
//! next basic-block boundary even when the contract makes no host calls.
//! Import trampolines reach the host through a thread-local slot installed
//! for the duration of each export call; no host pointer is ever stored
//! inside an instance.

use std::cell::{Cell, UnsafeCell};
use std::rc::Rc;

use anyhow::anyhow;
use wasmtime::{Config, Engine, Linker, Module, Store, TypedFunc};

use vulcan_primitives::gas::GasSchedule;
use vulcan_primitives::{VMError, VMResult};

use crate::host::VmHost;

use std::sync::Arc;

use super::{
    executor_error, load_breakpoint, new_breakpoint_cell, store_breakpoint, BreakpointCell,
    BreakpointValue, CompilationOptions, ExecutionInterrupter, ExportedFn, Instance,
    InstanceBuilder, InstanceRef,
};
use super::{imports, validation};

thread_local! {
    static CURRENT_HOST: Cell<*mut VmHost> = const { Cell::new(std::ptr::null_mut()) };
}

/// Installs a host into the thread-local slot for the duration of one
/// export invocation; nested invocations stack naturally.
struct HostGuard {
    previous: *mut VmHost,
}

impl HostGuard {
    fn install(host: &mut VmHost) -> Self {
        let previous = CURRENT_HOST.replace(host as *mut VmHost);
        Self { previous }
    }
}

impl Drop for HostGuard {
    fn drop(&mut self) {
        CURRENT_HOST.set(self.previous);
    }
}

/// Resolve the host for an import trampoline.
///
/// SAFETY: the pointer is installed by `HostGuard` on this same thread just
/// before entering WASM and cleared on exit; wasmtime holds no Rust
/// references into the host across opaque calls, so the exclusive borrow
/// handed to the trampoline is the only live one.
pub(crate) fn with_current_host<R>(f: impl FnOnce(&mut VmHost) -> R) -> anyhow::Result<R> {
    let ptr = CURRENT_HOST.get();
    if ptr.is_null() {
        return Err(anyhow!("no host installed for import call"));
    }
    let host = unsafe { &mut *ptr };
    Ok(f(host))
}

/// Run an EEI function from a trampoline and trap out of WASM when it left
/// a breakpoint behind, so the instance stops at this call boundary.
pub(crate) fn eei_call<R>(f: impl FnOnce(&mut VmHost) -> R) -> anyhow::Result<R> {
    let (value, stop) = with_current_host(|host| {
        let value = f(host);
        let stop = host.runtime().runtime_breakpoint() != BreakpointValue::None
            || host.timed_out();
        (value, stop)
    })?;
    if stop {
        return Err(anyhow!(BREAKPOINT_TRAP));
    }
    Ok(value)
}

const BREAKPOINT_TRAP: &str = "vm breakpoint reached";

pub struct WasmtimeExecutor {
    engine: Engine,
}

impl WasmtimeExecutor {
    pub fn new(sigsegv_passthrough: bool, _schedule: &GasSchedule) -> VMResult<Self> {
        let mut config = Config::new();

        // Fuel is the gas-point counter.
        config.consume_fuel(true);

        // The watchdog stops runaway pure compute by bumping the epoch; the
        // engine checks it between basic blocks.
        config.epoch_interruption(true);

        // Determinism enforcement.
        config.wasm_threads(false);
        config.wasm_simd(false);
        config.wasm_relaxed_simd(false);
        config.wasm_multi_memory(false);
        config.cranelift_nan_canonicalization(true);

        if sigsegv_passthrough {
            config.native_unwind_info(false);
        }

        let engine = Engine::new(&config).map_err(executor_error)?;
        Ok(Self { engine })
    }

    fn instantiate(&self, module: Module, options: &CompilationOptions) -> VMResult<InstanceRef> {
        let mut store = Store::new(&self.engine, ());
        store.set_fuel(options.gas_limit).map_err(executor_error)?;
        // One tick past the current epoch: the first watchdog increment
        // traps every live store of this engine.
        store.set_epoch_deadline(1);

        let mut linker: Linker<()> = Linker::new(&self.engine);
        imports::register_eei(&mut linker)?;

        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(executor_error)?;
        let memory = instance.get_memory(&mut store, "memory");

        Ok(Rc::new(WasmtimeInstance {
            store: Rc::new(UnsafeCell::new(store)),
            instance,
            memory,
            module,
            gas_limit: Cell::new(options.gas_limit),
            max_memory_grow: options.max_memory_grow,
            breakpoint: new_breakpoint_cell(),
            cleaned: Cell::new(false),
        }))
    }
}

impl InstanceBuilder for WasmtimeExecutor {
    fn new_instance(&self, code: &[u8], options: &CompilationOptions) -> VMResult<InstanceRef> {
        let module = Module::new(&self.engine, code).map_err(|_| VMError::ContractInvalid)?;
        validation::validate_module(&module)?;
        self.instantiate(module, options)
    }

    fn new_instance_from_compiled(
        &self,
        compiled_code: &[u8],
        options: &CompilationOptions,
    ) -> VMResult<InstanceRef> {
        // SAFETY: compiled artifacts come exclusively from this VM's own
        // `Instance::cache` via the trusted compiled-code store.
        let module = unsafe { Module::deserialize(&self.engine, compiled_code) }
            .map_err(executor_error)?;
        self.instantiate(module, options)
    }

    fn interrupter(&self) -> Arc<dyn ExecutionInterrupter> {
        Arc::new(EpochInterrupter {
            engine: self.engine.clone(),
        })
    }
}

/// Bumps the engine epoch, tripping the one-tick deadline every store of
/// this executor runs under.
struct EpochInterrupter {
    engine: Engine,
}

impl ExecutionInterrupter for EpochInterrupter {
    fn interrupt(&self) {
        self.engine.increment_epoch();
    }
}

pub struct WasmtimeInstance {
    store: Rc<UnsafeCell<Store<()>>>,
    instance: wasmtime::Instance,
    memory: Option<wasmtime::Memory>,
    module: Module,
    /// Fuel granted at instantiation; points used = granted - remaining.
    gas_limit: Cell<u64>,
    max_memory_grow: u64,
    breakpoint: BreakpointCell,
    cleaned: Cell<bool>,
}

impl WasmtimeInstance {
    /// Exclusive access to the store.
    ///
    /// SAFETY: the host is single-threaded per execution and wasmtime does
    /// not retain Rust references into the store across the opaque host
    /// calls from which this is reached; the returned borrow is therefore
    /// unique for its lifetime.
    #[allow(clippy::mut_from_ref)]
    fn store_mut(&self) -> &mut Store<()> {
        unsafe { &mut *self.store.get() }
    }

    fn remaining_fuel(&self) -> u64 {
        self.store_mut().get_fuel().unwrap_or(0)
    }
}

fn map_trap(trap: anyhow::Error, breakpoint: &BreakpointCell) -> VMResult<()> {
    let message = format!("{trap:#}");
    if message.contains("fuel") {
        store_breakpoint(breakpoint, BreakpointValue::OutOfGas);
        return Ok(());
    }
    if message.contains("epoch") || message.contains("interrupt") {
        // The watchdog bumped the epoch; the host reads the timeout flag
        // behind this breakpoint.
        store_breakpoint(breakpoint, BreakpointValue::ExecutionFailed);
        return Ok(());
    }
    if message.contains(BREAKPOINT_TRAP) {
        // The breakpoint was set by the EEI before trapping out.
        return Ok(());
    }
    Err(VMError::ExecutorError(message))
}

impl Instance for WasmtimeInstance {
    fn get_export(&self, name: &str) -> Option<ExportedFn> {
        let func = self.instance.get_func(self.store_mut(), name)?;
        let typed: TypedFunc<(), ()> = func.typed(self.store_mut()).ok()?;
        let store = self.store.clone();
        let breakpoint = self.breakpoint.clone();

        Some(Rc::new(move |host: &mut VmHost| {
            let _guard = HostGuard::install(host);
            // SAFETY: see `store_mut`; the guard scope is the only entry
            // point into this store while WASM runs.
            let store_ref = unsafe { &mut *store.get() };
            match typed.call(store_ref, ()) {
                Ok(()) => Ok(()),
                Err(trap) => map_trap(trap, &breakpoint),
            }
        }))
    }

    fn has_function(&self, name: &str) -> bool {
        self.module
            .exports()
            .any(|export| export.name() == name && export.ty().func().is_some())
    }

    fn exported_names(&self) -> Vec<String> {
        self.module
            .exports()
            .filter(|export| export.ty().func().is_some())
            .map(|export| export.name().to_string())
            .collect()
    }

    fn is_function_imported(&self, name: &str) -> bool {
        self.module.imports().any(|import| import.name() == name)
    }

    fn has_memory(&self) -> bool {
        self.memory.is_some()
    }

    fn points_used(&self) -> u64 {
        self.gas_limit.get().saturating_sub(self.remaining_fuel())
    }

    fn set_points_used(&self, points: u64) {
        let fuel = self.gas_limit.get().saturating_sub(points);
        let _ = self.store_mut().set_fuel(fuel);
    }

    fn breakpoint_value(&self) -> BreakpointValue {
        load_breakpoint(&self.breakpoint)
    }

    fn set_breakpoint_value(&self, value: BreakpointValue) {
        store_breakpoint(&self.breakpoint, value);
    }

    fn mem_length(&self) -> u64 {
        match &self.memory {
            Some(memory) => memory.data_size(self.store_mut()) as u64,
            None => 0,
        }
    }

    fn mem_read(&self, offset: u64, length: u64) -> VMResult<Vec<u8>> {
        let memory = self.memory.as_ref().ok_or(VMError::MemoryDeclarationMissing)?;
        let data = memory.data(self.store_mut());
        let end = offset
            .checked_add(length)
            .ok_or(VMError::BadUpperBounds)?;
        if end > data.len() as u64 {
            return Err(VMError::BadUpperBounds);
        }
        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn mem_write(&self, offset: u64, data: &[u8]) -> VMResult<()> {
        let memory = self.memory.as_ref().ok_or(VMError::MemoryDeclarationMissing)?;
        let memory_data = memory.data_mut(self.store_mut());
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(VMError::BadUpperBounds)?;
        if end > memory_data.len() as u64 {
            return Err(VMError::BadUpperBounds);
        }
        memory_data[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn mem_grow(&self, pages: u64) -> VMResult<()> {
        let memory = self.memory.as_ref().ok_or(VMError::MemoryDeclarationMissing)?;
        if pages > self.max_memory_grow {
            return Err(VMError::BadUpperBounds);
        }
        memory
            .grow(self.store_mut(), pages)
            .map(|_| ())
            .map_err(executor_error)
    }

    fn cache(&self) -> VMResult<Vec<u8>> {
        self.module.serialize().map_err(executor_error)
    }

    fn clean(&self) {
        // Engine resources are freed when the last reference drops; this
        // only marks the instance as retired.
        self.cleaned.set(true);
    }

    fn reset(&self) -> bool {
        // A used instance carries dirty memory and globals; reuse would be
        // observable. Warm starts go through the compiled-module cache.
        false
    }
}
