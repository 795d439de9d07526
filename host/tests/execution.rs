//! End-to-end execution tests: single calls and synchronous nested calls.

mod common;

use common::*;

use num_bigint::BigInt;
use num_traits::Zero;

use vulcan_host::eei;
use vulcan_host::executor::mock::MockInstance;
use vulcan_host::executor::BreakpointValue;
use vulcan_primitives::ReturnCode;

fn waste_gas_parent(gas: u64) -> MockInstance {
    let mut instance = MockInstance::new();
    add_waste_gas_method(&mut instance, "wasteGas", gas);
    instance
}

#[test]
fn test_single_contract_consumes_gas() {
    let config = TestConfig {
        gas_provided: 2000,
        gas_used_by_parent: 400,
        ..Default::default()
    };
    let gas = config.gas_used_by_parent;
    let mut setup = TestSetup::new(config).with_parent(move || waste_gas_parent(gas));

    let verifier = setup.call_parent("wasteGas", vec![]);
    verifier
        .ok()
        .gas_used(&parent_address(), 400)
        .gas_remaining(1600)
        .gas_accounting_holds(2000);
}

#[test]
fn test_nested_call_on_destination_context() {
    let config = TestConfig {
        gas_provided: 2000,
        gas_used_by_parent: 400,
        gas_used_by_child: 200,
        ..Default::default()
    };
    let parent_gas = config.gas_used_by_parent;
    let child_gas = config.gas_used_by_child;

    let mut setup = TestSetup::new(config)
        .with_parent(move || {
            let mut instance = MockInstance::new();
            instance.add_method("callChild", move |host| {
                host.use_gas_bounded(parent_gas)?;
                let gas_for_child = host.gas_left();
                let result = eei::baseops::execute_on_dest_context(
                    host,
                    gas_for_child,
                    &child_address(),
                    &BigInt::zero(),
                    "wasteGas",
                    &[],
                );
                eei::fail_if_policy_unit(host, result);
                Ok(())
            });
            instance
        })
        .with_child(move || waste_gas_parent(child_gas));

    let verifier = setup.call_parent("callChild", vec![]);
    verifier
        .ok()
        .gas_used(&parent_address(), 400)
        .gas_used(&child_address(), 200)
        .gas_remaining(1400)
        .gas_accounting_holds(2000);
}

#[test]
fn test_nested_call_failure_reverts_child_effects() {
    let config = TestConfig {
        gas_provided: 2000,
        ..Default::default()
    };
    let mut setup = TestSetup::new(config)
        .with_parent(|| {
            let mut instance = MockInstance::new();
            instance.add_method("callFailingChild", |host| {
                host.use_gas_bounded(100)?;
                let result = eei::baseops::execute_on_dest_context(
                    host,
                    500,
                    &child_address(),
                    &BigInt::zero(),
                    "failingMethod",
                    &[],
                );
                // The child failed; the parent survives and reports it.
                if result.is_err() {
                    let _ = eei::baseops::finish(host, b"child failed");
                }
                Ok(())
            });
            instance
        })
        .with_child(|| {
            let mut instance = MockInstance::new();
            instance.add_method("failingMethod", |host| {
                let _ = eei::baseops::storage_store(host, b"childKey", b"lost");
                host.signal_user_error("deliberate failure");
                Ok(())
            });
            instance
        });

    let verifier = setup.call_parent("callFailingChild", vec![]);
    verifier.ok().return_data(&[b"child failed"]);

    // The child's storage write was rolled back with its frame.
    let child_account = verifier.output.output_accounts.get(&child_address());
    if let Some(account) = child_account {
        assert!(account.storage_updates.get(b"childKey".as_slice()).is_none());
    }
}

#[test]
fn test_same_context_call_shares_storage() {
    let config = TestConfig {
        gas_provided: 2000,
        ..Default::default()
    };
    let mut setup = TestSetup::new(config)
        .with_parent(|| {
            let mut instance = MockInstance::new();
            instance.add_method("callLibrary", |host| {
                let result = eei::baseops::execute_on_same_context(
                    host,
                    500,
                    &child_address(),
                    &BigInt::zero(),
                    "writeShared",
                    &[],
                );
                eei::fail_if_policy_unit(host, result);
                Ok(())
            });
            instance
        })
        .with_child(|| {
            let mut instance = MockInstance::new();
            instance.add_method("writeShared", |host| {
                let _ = eei::baseops::storage_store(host, b"sharedKey", b"sharedValue");
                Ok(())
            });
            instance
        });

    let verifier = setup.call_parent("callLibrary", vec![]);
    // Library semantics: the write landed on the parent's storage.
    verifier
        .ok()
        .storage(&parent_address(), b"sharedKey", b"sharedValue");
}

#[test]
fn test_read_only_execution_suppresses_writes() {
    let config = TestConfig {
        gas_provided: 2000,
        ..Default::default()
    };
    let mut setup = TestSetup::new(config)
        .with_parent(|| {
            let mut instance = MockInstance::new();
            instance.add_method("queryChild", |host| {
                let result = eei::baseops::execute_read_only(
                    host,
                    500,
                    &child_address(),
                    "tryToWrite",
                    &[],
                );
                eei::fail_if_policy_unit(host, result);
                Ok(())
            });
            instance
        })
        .with_child(|| {
            let mut instance = MockInstance::new();
            instance.add_method("tryToWrite", |host| {
                let status = eei::baseops::storage_store(host, b"illegal", b"write")?;
                let _ = eei::baseops::finish(host, format!("{status:?}").as_bytes());
                Ok(())
            });
            instance
        });

    let verifier = setup.call_parent("queryChild", vec![]);
    verifier.ok();

    // No written storage update may exist anywhere in the output.
    for account in verifier.output.output_accounts.values() {
        for update in account.storage_updates.values() {
            assert!(!update.written, "read-only execution produced a write");
        }
        for transfer in &account.output_transfers {
            assert!(transfer.value.is_zero() || transfer.value < BigInt::zero());
        }
    }
}

#[test]
fn test_function_not_found() {
    let config = TestConfig {
        gas_provided: 2000,
        ..Default::default()
    };
    let mut setup = TestSetup::new(config).with_parent(|| waste_gas_parent(0));

    let verifier = setup.call_parent("noSuchFunction", vec![]);
    verifier.return_code(ReturnCode::FunctionNotFound);
}

#[test]
fn test_contract_not_found() {
    let mut setup = TestSetup::new(TestConfig::default());
    // An account without code is not a contract.
    setup
        .world
        .put_account(vulcan_hostapi::WorldAccount::new(&parent_address()));

    let verifier = setup.call_parent("anyFunction", vec![]);
    verifier.return_code(ReturnCode::ContractNotFound);
}

#[test]
fn test_init_cannot_be_called_directly() {
    let config = TestConfig::default();
    let mut setup = TestSetup::new(config).with_parent(|| {
        let mut instance = MockInstance::new();
        instance.add_method("init", |_host| Ok(()));
        instance
    });

    let verifier = setup.call_parent("init", vec![]);
    verifier.return_code(ReturnCode::FunctionNotFound);
}

#[test]
fn test_signal_error_produces_user_error() {
    let config = TestConfig::default();
    let mut setup = TestSetup::new(config).with_parent(|| {
        let mut instance = MockInstance::new();
        instance.add_method("failOnPurpose", |host| {
            let _ = eei::baseops::signal_error(host, "user said no");
            Ok(())
        });
        instance
    });

    let verifier = setup.call_parent("failOnPurpose", vec![]);
    verifier.user_error().message_contains("user said no");
    assert_eq!(verifier.output.gas_remaining, 0);
}

#[test]
fn test_out_of_gas_reported() {
    let config = TestConfig {
        gas_provided: 100,
        ..Default::default()
    };
    let mut setup = TestSetup::new(config).with_parent(|| waste_gas_parent(500));

    let verifier = setup.call_parent("wasteGas", vec![]);
    verifier.out_of_gas();
    assert_eq!(verifier.output.gas_remaining, 0);
}

#[test]
fn test_error_log_entry_appended() {
    let config = TestConfig::default();
    let mut setup = TestSetup::new(config).with_parent(|| {
        let mut instance = MockInstance::new();
        instance.add_method("failOnPurpose", |host| {
            let _ = eei::baseops::signal_error(host, "diagnostics please");
            Ok(())
        });
        instance
    });

    let verifier = setup.call_parent("failOnPurpose", vec![]);
    let log = verifier
        .output
        .logs
        .iter()
        .find(|entry| entry.identifier == b"internalVMErrors")
        .expect("internalVMErrors log entry");
    assert!(String::from_utf8_lossy(&log.data).contains("diagnostics please"));
}

#[test]
fn test_breakpoint_cleared_after_handling() {
    let config = TestConfig::default();
    let mut setup = TestSetup::new(config).with_parent(|| {
        let mut instance = MockInstance::new();
        instance.add_method("setAndReturn", |host| {
            host.runtime()
                .set_runtime_breakpoint(BreakpointValue::SignalError);
            Ok(())
        });
        instance
    });

    let verifier = setup.call_parent("setAndReturn", vec![]);
    verifier.user_error();
}
