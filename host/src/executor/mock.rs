//! Closure-backed instances for tests.
//!
//! A mock contract is a set of named methods, each a Rust closure receiving
//! the host. Tests register contracts with the builder keyed by their fake
//! bytecode, mirroring how real code is fetched from the hook by address.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use vulcan_primitives::{VMError, VMResult};

use super::{
    load_breakpoint, new_breakpoint_cell, store_breakpoint, BreakpointCell, BreakpointValue,
    CompilationOptions, ExportedFn, Instance, InstanceBuilder, InstanceRef,
};
use crate::host::VmHost;

const PAGE_SIZE: u64 = 65_536;

/// A test instance with programmable exported methods.
pub struct MockInstance {
    methods: BTreeMap<String, ExportedFn>,
    imported_functions: Vec<String>,
    points: Cell<u64>,
    breakpoint: BreakpointCell,
    memory: RefCell<Vec<u8>>,
    cleaned: Cell<bool>,
}

impl MockInstance {
    pub fn new() -> Self {
        Self {
            methods: BTreeMap::new(),
            imported_functions: Vec::new(),
            points: Cell::new(0),
            breakpoint: new_breakpoint_cell(),
            memory: RefCell::new(vec![0u8; PAGE_SIZE as usize]),
            cleaned: Cell::new(false),
        }
    }

    /// Register an exported method.
    pub fn add_method<F>(&mut self, name: &str, method: F)
    where
        F: Fn(&mut VmHost) -> VMResult<()> + 'static,
    {
        self.methods.insert(name.to_string(), Rc::new(method));
    }

    /// Declare an imported function name, for import-validation tests.
    pub fn add_import(&mut self, name: &str) {
        self.imported_functions.push(name.to_string());
    }

    pub fn was_cleaned(&self) -> bool {
        self.cleaned.get()
    }
}

impl Default for MockInstance {
    fn default() -> Self {
        Self::new()
    }
}

impl Instance for MockInstance {
    fn get_export(&self, name: &str) -> Option<ExportedFn> {
        self.methods.get(name).cloned()
    }

    fn has_function(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    fn exported_names(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }

    fn is_function_imported(&self, name: &str) -> bool {
        self.imported_functions.iter().any(|f| f == name)
    }

    fn has_memory(&self) -> bool {
        true
    }

    fn points_used(&self) -> u64 {
        self.points.get()
    }

    fn set_points_used(&self, points: u64) {
        self.points.set(points);
    }

    fn breakpoint_value(&self) -> BreakpointValue {
        load_breakpoint(&self.breakpoint)
    }

    fn set_breakpoint_value(&self, value: BreakpointValue) {
        store_breakpoint(&self.breakpoint, value);
    }

    fn mem_length(&self) -> u64 {
        self.memory.borrow().len() as u64
    }

    fn mem_read(&self, offset: u64, length: u64) -> VMResult<Vec<u8>> {
        let memory = self.memory.borrow();
        let end = offset
            .checked_add(length)
            .ok_or(VMError::BadUpperBounds)?;
        if end > memory.len() as u64 {
            return Err(VMError::BadUpperBounds);
        }
        Ok(memory[offset as usize..end as usize].to_vec())
    }

    fn mem_write(&self, offset: u64, data: &[u8]) -> VMResult<()> {
        let mut memory = self.memory.borrow_mut();
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(VMError::BadUpperBounds)?;
        if end > memory.len() as u64 {
            return Err(VMError::BadUpperBounds);
        }
        memory[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn mem_grow(&self, pages: u64) -> VMResult<()> {
        let mut memory = self.memory.borrow_mut();
        let new_len = memory.len() as u64 + pages * PAGE_SIZE;
        memory.resize(new_len as usize, 0);
        Ok(())
    }

    fn cache(&self) -> VMResult<Vec<u8>> {
        // Mock instances have no compiled form worth caching.
        Ok(Vec::new())
    }

    fn clean(&self) {
        self.cleaned.set(true);
    }

    fn reset(&self) -> bool {
        self.points.set(0);
        store_breakpoint(&self.breakpoint, BreakpointValue::None);
        true
    }
}

type MockFactory = Box<dyn Fn() -> MockInstance>;

/// Builder returning registered mock instances by fake bytecode.
pub struct MockInstanceBuilder {
    contracts: RefCell<BTreeMap<Vec<u8>, MockFactory>>,
}

impl MockInstanceBuilder {
    pub fn new() -> Self {
        Self {
            contracts: RefCell::new(BTreeMap::new()),
        }
    }

    /// Register a factory producing the instance for the given fake code.
    pub fn register_contract<F>(&self, code: &[u8], factory: F)
    where
        F: Fn() -> MockInstance + 'static,
    {
        self.contracts
            .borrow_mut()
            .insert(code.to_vec(), Box::new(factory));
    }
}

impl Default for MockInstanceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceBuilder for MockInstanceBuilder {
    fn new_instance(&self, code: &[u8], _options: &CompilationOptions) -> VMResult<InstanceRef> {
        let contracts = self.contracts.borrow();
        let factory = contracts.get(code).ok_or(VMError::ContractInvalid)?;
        Ok(Rc::new(factory()))
    }

    fn new_instance_from_compiled(
        &self,
        compiled_code: &[u8],
        options: &CompilationOptions,
    ) -> VMResult<InstanceRef> {
        self.new_instance(compiled_code, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_instance_methods() {
        let mut instance = MockInstance::new();
        instance.add_method("wasteGas", |_host| Ok(()));
        assert!(instance.has_function("wasteGas"));
        assert!(!instance.has_function("other"));
        assert_eq!(instance.exported_names(), vec!["wasteGas".to_string()]);
    }

    #[test]
    fn test_mock_points_and_breakpoints() {
        let instance = MockInstance::new();
        instance.set_points_used(123);
        assert_eq!(instance.points_used(), 123);
        instance.set_breakpoint_value(BreakpointValue::SignalError);
        assert_eq!(instance.breakpoint_value(), BreakpointValue::SignalError);
        assert!(instance.reset());
        assert_eq!(instance.points_used(), 0);
        assert_eq!(instance.breakpoint_value(), BreakpointValue::None);
    }

    #[test]
    fn test_mock_memory_bounds() {
        let instance = MockInstance::new();
        instance.mem_write(0, b"hello").unwrap();
        assert_eq!(instance.mem_read(0, 5).unwrap(), b"hello");
        assert!(instance.mem_read(PAGE_SIZE, 1).is_err());

        instance.mem_grow(1).unwrap();
        assert_eq!(instance.mem_length(), 2 * PAGE_SIZE);
        assert!(instance.mem_read(PAGE_SIZE, 1).is_ok());
    }

    #[test]
    fn test_builder_unknown_code() {
        let builder = MockInstanceBuilder::new();
        let options = CompilationOptions {
            gas_limit: 1000,
            unmetered_locals: 0,
            max_memory_grow: 10,
            opcode_trace: false,
            metering: true,
            runtime_breakpoints: true,
        };
        assert!(builder.new_instance(b"unknown", &options).is_err());

        builder.register_contract(b"known", MockInstance::new);
        assert!(builder.new_instance(b"known", &options).is_ok());
    }
}
