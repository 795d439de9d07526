//! Contract call and create inputs — the wire-level request types.

use num_bigint::BigInt;

use crate::types::{Address, Hash};

/// How a frame was entered. Carried on inputs and on outgoing transfers.
///
/// The numeric values are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum CallType {
    #[default]
    Direct = 0,
    AsynchronousCall = 1,
    AsynchronousCallback = 2,
    Builtin = 3,
}

/// A single token transfer attached to a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EsdtTransfer {
    pub token_name: Vec<u8>,
    pub token_nonce: u64,
    pub value: BigInt,
    pub token_type: u32,
}

/// The common part of call and create inputs: who calls, with what value,
/// how much gas, and under which transaction hashes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VMInput {
    pub caller_addr: Address,
    pub arguments: Vec<Vec<u8>>,
    pub call_value: BigInt,
    pub call_type: CallType,
    pub gas_price: u64,
    pub gas_provided: u64,
    pub gas_locked: u64,
    pub original_tx_hash: Hash,
    pub current_tx_hash: Hash,
    pub prev_tx_hash: Hash,
    pub esdt_transfers: Vec<EsdtTransfer>,
    pub return_call_after_error: bool,
}

/// A request to call a function of a deployed contract.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContractCallInput {
    pub vm_input: VMInput,
    pub recipient_addr: Address,
    pub function: String,
}

/// A request to deploy a new contract.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContractCreateInput {
    pub vm_input: VMInput,
    pub contract_code: Vec<u8>,
    pub contract_code_metadata: Vec<u8>,
}

impl ContractCreateInput {
    /// View the create request as a call to the init function; the runtime
    /// context is initialised from this form.
    pub fn as_call_input(&self, deployed_address: Address) -> ContractCallInput {
        ContractCallInput {
            vm_input: self.vm_input.clone(),
            recipient_addr: deployed_address,
            function: crate::types::INIT_FUNCTION_NAME.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;

    #[test]
    fn test_call_type_wire_values() {
        assert_eq!(CallType::Direct as u8, 0);
        assert_eq!(CallType::AsynchronousCall as u8, 1);
        assert_eq!(CallType::AsynchronousCallback as u8, 2);
        assert_eq!(CallType::Builtin as u8, 3);
    }

    #[test]
    fn test_create_input_as_call_input() {
        let create = ContractCreateInput {
            vm_input: VMInput {
                caller_addr: b"creator".to_vec(),
                call_value: BigInt::from(42),
                gas_provided: 1000,
                ..Default::default()
            },
            contract_code: b"code".to_vec(),
            contract_code_metadata: vec![0, 0],
        };

        let call = create.as_call_input(b"deployed".to_vec());
        assert_eq!(call.function, "init");
        assert_eq!(call.recipient_addr, b"deployed".to_vec());
        assert_eq!(call.vm_input.call_value, BigInt::from(42));
        assert_eq!(call.vm_input.gas_provided, 1000);
    }
}
