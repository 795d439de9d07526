//! Shared harness for the end-to-end tests: a mock world, a mock instance
//! builder, parameterised mock contracts, and an output verifier.

#![allow(dead_code)]

use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use num_bigint::BigInt;

use vulcan_hostapi::{MemBuiltinContainer, MemWorld, WorldAccount};
use vulcan_hostapi::traits::{EsdtTransferParser, ParsedEsdtTransfers};
use vulcan_primitives::gas::GasSchedule;
use vulcan_primitives::{
    CallType, CodeMetadata, ContractCallInput, ContractCreateInput, ReturnCode, VMOutput,
    VMResult,
};

use vulcan_host::config::DEFAULT_MAX_INSTANCES;
use vulcan_host::executor::mock::{MockInstance, MockInstanceBuilder};
use vulcan_host::executor::BreakpointValue;
use vulcan_host::{HostConfig, VmHost};

pub fn test_address(name: &str) -> Vec<u8> {
    let mut address = vec![b'_'; 32];
    let bytes = name.as_bytes();
    address[..bytes.len().min(32)].copy_from_slice(&bytes[..bytes.len().min(32)]);
    address
}

pub fn parent_address() -> Vec<u8> {
    test_address("parentSC")
}

pub fn child_address() -> Vec<u8> {
    test_address("childSC")
}

pub fn third_party_address() -> Vec<u8> {
    test_address("thirdParty")
}

pub fn vault_address() -> Vec<u8> {
    test_address("vault")
}

pub fn user_address() -> Vec<u8> {
    test_address("userAccount")
}

pub const PARENT_CODE: &[u8] = b"contract_code_parent";
pub const CHILD_CODE: &[u8] = b"contract_code_child";

pub const PARENT_KEY_A: &[u8] = b"parentKeyA......................";
pub const PARENT_DATA_A: &[u8] = b"parentDataA";
pub const PARENT_KEY_B: &[u8] = b"parentKeyB......................";
pub const PARENT_DATA_B: &[u8] = b"parentDataB";
pub const CHILD_KEY: &[u8] = b"childKey........................";
pub const CHILD_DATA: &[u8] = b"childData";
pub const CALLBACK_KEY: &[u8] = b"callbackKey.....................";
pub const CALLBACK_DATA: &[u8] = b"callbackData";

/// Knobs of the mock contracts, mirroring the shape of the scenarios.
#[derive(Debug, Clone)]
pub struct TestConfig {
    pub gas_provided: u64,
    pub gas_used_by_parent: u64,
    pub gas_used_by_child: u64,
    pub gas_used_by_callback: u64,
    pub gas_lock_cost: u64,
    pub transfer_to_third_party: i64,
    pub transfer_to_vault: i64,
    pub transfer_from_parent_to_child: i64,
    pub parent_balance: i64,
    pub child_balance: i64,
    pub child_shard: u32,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            gas_provided: 1000,
            gas_used_by_parent: 400,
            gas_used_by_child: 200,
            gas_used_by_callback: 100,
            gas_lock_cost: 150,
            transfer_to_third_party: 3,
            transfer_to_vault: 4,
            transfer_from_parent_to_child: 7,
            parent_balance: 1000,
            child_balance: 1000,
            child_shard: 0,
        }
    }
}

/// All costs zero except the async callback lock: the scenarios reason
/// about contract-declared gas only.
pub fn test_gas_schedule(config: &TestConfig) -> GasSchedule {
    let mut schedule = GasSchedule::uniform(0);
    schedule.api.async_callback_gas_lock = config.gas_lock_cost;
    schedule
}

struct NoopEsdtParser;

impl EsdtTransferParser for NoopEsdtParser {
    fn parse_esdt_transfers(
        &self,
        _sender: &[u8],
        receiver: &[u8],
        function: &str,
        _args: &[Vec<u8>],
    ) -> VMResult<ParsedEsdtTransfers> {
        Ok(ParsedEsdtTransfers {
            transfers: Vec::new(),
            real_destination: receiver.to_vec(),
            call_function: function.to_string(),
            call_args: Vec::new(),
        })
    }
}

/// A host left on the real wasmtime executor, for engine-level tests that
/// need actual instruction execution rather than mock methods.
pub fn wasmtime_host(world: Arc<MemWorld>, timeout: Duration) -> VmHost {
    let config = HostConfig {
        vm_type: vec![5, 0],
        block_gas_limit: 10_000_000,
        gas_schedule: GasSchedule::uniform(0),
        reserved_key_prefix: b"N@".to_vec(),
        execution_timeout: timeout,
        sigsegv_passthrough: false,
        max_instances: DEFAULT_MAX_INSTANCES,
    };
    VmHost::new(
        world,
        Arc::new(MemBuiltinContainer::empty()),
        Arc::new(NoopEsdtParser),
        config,
    )
    .expect("host construction")
}

pub struct TestSetup {
    pub world: Arc<MemWorld>,
    pub builder: Rc<MockInstanceBuilder>,
    pub host: VmHost,
    pub config: TestConfig,
}

impl TestSetup {
    pub fn new(config: TestConfig) -> Self {
        let world = MemWorld::new_shared();
        let builder = Rc::new(MockInstanceBuilder::new());
        let host_config = HostConfig {
            vm_type: vec![5, 0],
            block_gas_limit: 10_000_000,
            gas_schedule: test_gas_schedule(&config),
            reserved_key_prefix: b"N@".to_vec(),
            execution_timeout: Duration::from_secs(1),
            sigsegv_passthrough: false,
            max_instances: DEFAULT_MAX_INSTANCES,
        };
        let mut host = VmHost::new(
            world.clone(),
            Arc::new(MemBuiltinContainer::new(&["ESDTTransfer"])),
            Arc::new(NoopEsdtParser),
            host_config,
        )
        .expect("host construction");
        host.replace_instance_builder(builder.clone());

        let setup = Self {
            world,
            builder,
            host,
            config,
        };
        setup.world.put_account(WorldAccount::new(&user_address()).with_balance(10_000));
        setup.world.put_account(WorldAccount::new(&third_party_address()));
        setup.world.put_account(WorldAccount::new(&vault_address()));
        setup
    }

    pub fn with_parent<F>(self, factory: F) -> Self
    where
        F: Fn() -> MockInstance + 'static,
    {
        self.world.put_account(
            WorldAccount::new(&parent_address())
                .with_balance(self.config.parent_balance)
                .with_code(PARENT_CODE)
                .with_code_metadata(CodeMetadata {
                    payable: true,
                    readable: true,
                    upgradeable: true,
                    payable_by_sc: true,
                })
                .with_owner(&user_address()),
        );
        self.builder.register_contract(PARENT_CODE, factory);
        self
    }

    pub fn with_child<F>(self, factory: F) -> Self
    where
        F: Fn() -> MockInstance + 'static,
    {
        self.world.put_account(
            WorldAccount::new(&child_address())
                .with_balance(self.config.child_balance)
                .with_code(CHILD_CODE)
                .with_code_metadata(CodeMetadata {
                    payable: true,
                    readable: true,
                    upgradeable: true,
                    payable_by_sc: true,
                })
                .with_owner(&user_address())
                .with_shard(self.config.child_shard),
        );
        self.builder.register_contract(CHILD_CODE, factory);
        self
    }

    pub fn call_parent(&mut self, function: &str, arguments: Vec<Vec<u8>>) -> OutputVerifier {
        let input = build_call_input(
            &user_address(),
            &parent_address(),
            function,
            arguments,
            self.config.gas_provided,
        );
        let output = self.host.run_contract_call(input).expect("vm accepted the call");
        OutputVerifier { output }
    }
}

pub fn build_call_input(
    caller: &[u8],
    recipient: &[u8],
    function: &str,
    arguments: Vec<Vec<u8>>,
    gas_provided: u64,
) -> ContractCallInput {
    ContractCallInput {
        vm_input: vulcan_primitives::VMInput {
            caller_addr: caller.to_vec(),
            arguments,
            call_value: BigInt::from(0),
            call_type: CallType::Direct,
            gas_price: 1,
            gas_provided,
            gas_locked: 0,
            original_tx_hash: b"originalTxHash".to_vec(),
            current_tx_hash: b"currentTxHash".to_vec(),
            prev_tx_hash: b"prevTxHash".to_vec(),
            esdt_transfers: Vec::new(),
            return_call_after_error: false,
        },
        recipient_addr: recipient.to_vec(),
        function: function.to_string(),
    }
}

pub fn build_create_input(caller: &[u8], code: &[u8], gas_provided: u64) -> ContractCreateInput {
    ContractCreateInput {
        vm_input: vulcan_primitives::VMInput {
            caller_addr: caller.to_vec(),
            call_value: BigInt::from(0),
            gas_provided,
            gas_price: 1,
            original_tx_hash: b"originalTxHash".to_vec(),
            current_tx_hash: b"currentTxHash".to_vec(),
            ..Default::default()
        },
        contract_code: code.to_vec(),
        contract_code_metadata: vec![1, 2],
    }
}

// ── Mock contract methods ──

/// Consume a fixed amount of gas, raising the out-of-gas breakpoint when
/// the frame cannot afford it.
pub fn add_waste_gas_method(instance: &mut MockInstance, name: &str, gas: u64) {
    instance.add_method(name, move |host: &mut VmHost| {
        if host.use_gas_bounded(gas).is_err() {
            host.runtime().set_runtime_breakpoint(BreakpointValue::OutOfGas);
        }
        Ok(())
    });
}

// ── Output verification, in the style of a fluent checker ──

pub struct OutputVerifier {
    pub output: VMOutput,
}

impl OutputVerifier {
    pub fn ok(&self) -> &Self {
        self.return_code(ReturnCode::Ok)
    }

    pub fn execution_failed(&self) -> &Self {
        self.return_code(ReturnCode::ExecutionFailed)
    }

    pub fn user_error(&self) -> &Self {
        self.return_code(ReturnCode::UserError)
    }

    pub fn out_of_gas(&self) -> &Self {
        self.return_code(ReturnCode::OutOfGas)
    }

    pub fn return_code(&self, expected: ReturnCode) -> &Self {
        assert_eq!(
            self.output.return_code, expected,
            "return code mismatch, message: {:?}",
            self.output.return_message
        );
        self
    }

    pub fn message_contains(&self, fragment: &str) -> &Self {
        assert!(
            self.output.return_message.contains(fragment),
            "return message {:?} does not contain {:?}",
            self.output.return_message,
            fragment
        );
        self
    }

    pub fn gas_remaining(&self, expected: u64) -> &Self {
        assert_eq!(self.output.gas_remaining, expected, "gas remaining");
        self
    }

    pub fn gas_used(&self, address: &[u8], expected: u64) -> &Self {
        let account = self
            .output
            .output_accounts
            .get(address)
            .unwrap_or_else(|| panic!("no output account for {}", String::from_utf8_lossy(address)));
        assert_eq!(
            account.gas_used,
            expected,
            "gas used by {}",
            String::from_utf8_lossy(address)
        );
        self
    }

    pub fn balance_delta(&self, address: &[u8], expected: i64) -> &Self {
        let account = self
            .output
            .output_accounts
            .get(address)
            .unwrap_or_else(|| panic!("no output account for {}", String::from_utf8_lossy(address)));
        assert_eq!(
            account.balance_delta,
            BigInt::from(expected),
            "balance delta of {}",
            String::from_utf8_lossy(address)
        );
        self
    }

    pub fn transfers_to(&self, address: &[u8], expected: &[(i64, &[u8])]) -> &Self {
        let transfers: Vec<(BigInt, Vec<u8>)> = self
            .output
            .output_accounts
            .get(address)
            .map(|account| {
                account
                    .output_transfers
                    .iter()
                    .map(|t| (t.value.clone(), t.data.clone()))
                    .collect()
            })
            .unwrap_or_default();
        let expected: Vec<(BigInt, Vec<u8>)> = expected
            .iter()
            .map(|(value, data)| (BigInt::from(*value), data.to_vec()))
            .collect();
        assert_eq!(
            transfers,
            expected,
            "transfers to {}",
            String::from_utf8_lossy(address)
        );
        self
    }

    /// Assert a recorded async-call transfer with its gas split.
    pub fn async_transfer_to(
        &self,
        address: &[u8],
        value: i64,
        gas_limit: u64,
        gas_locked: u64,
    ) -> &Self {
        let account = self
            .output
            .output_accounts
            .get(address)
            .expect("no output account for async transfer destination");
        let transfer = account
            .output_transfers
            .iter()
            .find(|t| t.call_type == CallType::AsynchronousCall)
            .expect("no asynchronous-call transfer recorded");
        assert_eq!(transfer.value, BigInt::from(value), "async transfer value");
        assert_eq!(transfer.gas_limit, gas_limit, "async transfer gas limit");
        assert_eq!(transfer.gas_locked, gas_locked, "async transfer gas locked");
        self
    }

    pub fn storage(&self, address: &[u8], key: &[u8], expected: &[u8]) -> &Self {
        let account = self
            .output
            .output_accounts
            .get(address)
            .unwrap_or_else(|| panic!("no output account for {}", String::from_utf8_lossy(address)));
        let update = account
            .storage_updates
            .get(key)
            .unwrap_or_else(|| panic!("no storage update under {:?}", String::from_utf8_lossy(key)));
        assert!(update.written, "storage update is a read cache, not a write");
        assert_eq!(update.data, expected, "storage value");
        self
    }

    pub fn return_data(&self, expected: &[&[u8]]) -> &Self {
        let expected: Vec<Vec<u8>> = expected.iter().map(|d| d.to_vec()).collect();
        assert_eq!(self.output.return_data, expected, "return data");
        self
    }

    /// Check the frame-level gas balance equation against the input gas.
    pub fn gas_accounting_holds(&self, gas_provided: u64) -> &Self {
        let total = self.output.total_gas_accounted() + self.output.gas_remaining;
        assert_eq!(total, gas_provided, "gas accounting equation");
        self
    }
}

/// The data payload the parent sends to the child in the async scenarios.
pub fn child_call_data(config: &TestConfig) -> Vec<u8> {
    vulcan_primitives::calldata::CallDataBuilder::new("transferToThirdParty")
        .arg_u64(config.transfer_to_third_party as u64)
        .arg_str(" there")
        .build()
}
