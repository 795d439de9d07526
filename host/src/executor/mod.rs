//! Executor abstraction: what the host requires from the WASM engine.
//!
//! The engine is a library concern: it compiles bytecode, runs exported
//! functions, counts gas points, and exposes linear memory. Termination is
//! two-sided: breakpoints raised by host functions end the run at the next
//! import-call boundary, and the watchdog's [`ExecutionInterrupter`] stops
//! pure compute at the next basic-block boundary. [`WasmtimeExecutor`] is
//! the production implementation; tests drive the host through
//! [`mock::MockInstance`].

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use vulcan_primitives::{VMError, VMResult};

use crate::host::VmHost;

pub mod imports;
pub mod mock;
pub mod validation;
pub mod wasmtime_impl;

pub use wasmtime_impl::WasmtimeExecutor;

/// Signal that stops the running instance and tells the host why.
///
/// Host functions observe the value at the import-call boundary and trap
/// out; stopping mid-compute additionally needs the builder's
/// [`ExecutionInterrupter`]. Stored as an atomic so the watchdog can set it
/// from its own thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum BreakpointValue {
    None = 0,
    ExecutionFailed = 1,
    AsyncCall = 2,
    SignalError = 3,
    OutOfGas = 4,
    End = 5,
}

impl BreakpointValue {
    pub fn from_u64(value: u64) -> Self {
        match value {
            1 => BreakpointValue::ExecutionFailed,
            2 => BreakpointValue::AsyncCall,
            3 => BreakpointValue::SignalError,
            4 => BreakpointValue::OutOfGas,
            5 => BreakpointValue::End,
            _ => BreakpointValue::None,
        }
    }
}

/// Shared breakpoint cell; one per instance, CAS-able across threads.
pub type BreakpointCell = Arc<AtomicU64>;

pub fn new_breakpoint_cell() -> BreakpointCell {
    Arc::new(AtomicU64::new(BreakpointValue::None as u64))
}

pub fn load_breakpoint(cell: &BreakpointCell) -> BreakpointValue {
    BreakpointValue::from_u64(cell.load(Ordering::SeqCst))
}

pub fn store_breakpoint(cell: &BreakpointCell, value: BreakpointValue) {
    cell.store(value as u64, Ordering::SeqCst);
}

/// Options applied when compiling or re-instantiating contract code.
#[derive(Debug, Clone)]
pub struct CompilationOptions {
    pub gas_limit: u64,
    pub unmetered_locals: u64,
    pub max_memory_grow: u64,
    pub opcode_trace: bool,
    pub metering: bool,
    pub runtime_breakpoints: bool,
}

/// A callable export of a running instance.
///
/// The host passes itself in so EEI functions invoked by the contract can
/// reach the execution contexts; see the import trampolines in
/// [`wasmtime_impl`] for how the production engine routes this.
pub type ExportedFn = Rc<dyn Fn(&mut VmHost) -> VMResult<()>>;

/// A live WASM instance. All methods take `&self`: implementations use
/// interior mutability so the runtime context can hold instances in both
/// its active slot and its instance stack as cheap shared references.
pub trait Instance {
    /// Look up an exported function by name.
    fn get_export(&self, name: &str) -> Option<ExportedFn>;
    fn has_function(&self, name: &str) -> bool;
    fn exported_names(&self) -> Vec<String>;
    fn is_function_imported(&self, name: &str) -> bool;
    fn has_memory(&self) -> bool;

    /// Gas points consumed so far by metered execution.
    fn points_used(&self) -> u64;
    fn set_points_used(&self, points: u64);

    fn breakpoint_value(&self) -> BreakpointValue;
    fn set_breakpoint_value(&self, value: BreakpointValue);

    /// Linear memory size in bytes.
    fn mem_length(&self) -> u64;
    /// Strict bounds-checked read; policy (zero padding) lives in the runtime.
    fn mem_read(&self, offset: u64, length: u64) -> VMResult<Vec<u8>>;
    fn mem_write(&self, offset: u64, data: &[u8]) -> VMResult<()>;
    fn mem_grow(&self, pages: u64) -> VMResult<()>;

    /// Serialised compiled artifact for the compiled-code cache.
    fn cache(&self) -> VMResult<Vec<u8>>;

    /// Release engine resources. Idempotent.
    fn clean(&self);

    /// Prepare the instance for reuse from the warm cache. Returns false if
    /// this instance cannot be reset, in which case it must be recompiled.
    fn reset(&self) -> bool;
}

pub type InstanceRef = Rc<dyn Instance>;

/// Stops instances of one engine at their next basic-block boundary.
///
/// The watchdog thread holds this across the execution; implementations
/// must make the running instance return control without any cooperation
/// from the contract.
pub trait ExecutionInterrupter: Send + Sync {
    fn interrupt(&self);
}

/// Interrupter for engines without instruction-level execution; the mock
/// instances run host-side Rust that only the breakpoint flag can stop.
pub struct NoopInterrupter;

impl ExecutionInterrupter for NoopInterrupter {
    fn interrupt(&self) {}
}

/// Compiles bytecode into instances. One per host.
pub trait InstanceBuilder {
    fn new_instance(&self, code: &[u8], options: &CompilationOptions) -> VMResult<InstanceRef>;
    fn new_instance_from_compiled(
        &self,
        compiled_code: &[u8],
        options: &CompilationOptions,
    ) -> VMResult<InstanceRef>;

    /// The handle the watchdog uses to stop this builder's instances.
    fn interrupter(&self) -> Arc<dyn ExecutionInterrupter> {
        Arc::new(NoopInterrupter)
    }
}

/// Map an engine-level failure into the VM error vocabulary.
pub fn executor_error(message: impl std::fmt::Display) -> VMError {
    VMError::ExecutorError(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breakpoint_value_roundtrip() {
        for value in [
            BreakpointValue::None,
            BreakpointValue::ExecutionFailed,
            BreakpointValue::AsyncCall,
            BreakpointValue::SignalError,
            BreakpointValue::OutOfGas,
            BreakpointValue::End,
        ] {
            assert_eq!(BreakpointValue::from_u64(value as u64), value);
        }
        assert_eq!(BreakpointValue::from_u64(77), BreakpointValue::None);
    }

    #[test]
    fn test_breakpoint_cell() {
        let cell = new_breakpoint_cell();
        assert_eq!(load_breakpoint(&cell), BreakpointValue::None);
        store_breakpoint(&cell, BreakpointValue::OutOfGas);
        assert_eq!(load_breakpoint(&cell), BreakpointValue::OutOfGas);
    }
}
