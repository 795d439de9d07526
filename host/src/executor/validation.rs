//! Contract module verification before instantiation.
//!
//! A contract must export a linear memory, every exported function must
//! have the void signature, and every import must come from the host's
//! `env` module and name a known EEI function.

use wasmtime::{ExternType, Module};

use vulcan_primitives::{VMError, VMResult};

use super::imports::{EEI_FUNCTION_NAMES, EEI_MODULE_NAME};

pub fn validate_module(module: &Module) -> VMResult<()> {
    verify_memory_declaration(module)?;
    verify_exported_functions(module)?;
    verify_imports(module)?;
    Ok(())
}

fn verify_memory_declaration(module: &Module) -> VMResult<()> {
    let has_memory = module
        .exports()
        .any(|export| matches!(export.ty(), ExternType::Memory(_)));
    if !has_memory {
        return Err(VMError::MemoryDeclarationMissing);
    }
    Ok(())
}

fn verify_exported_functions(module: &Module) -> VMResult<()> {
    for export in module.exports() {
        let ExternType::Func(func_type) = export.ty() else {
            continue;
        };
        if func_type.params().len() != 0 || func_type.results().len() != 0 {
            return Err(VMError::FunctionNonvoidSignature);
        }
    }
    Ok(())
}

fn verify_imports(module: &Module) -> VMResult<()> {
    for import in module.imports() {
        if import.module() != EEI_MODULE_NAME {
            return Err(VMError::ContractInvalid);
        }
        if !EEI_FUNCTION_NAMES.contains(&import.name()) {
            return Err(VMError::ContractInvalid);
        }
    }
    Ok(())
}
