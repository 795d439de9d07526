//! Host lifecycle: deployment, upgrade, timeout, panic isolation, closing.

mod common;

use common::*;

use std::time::{Duration, Instant};

use vulcan_host::eei;
use vulcan_host::executor::mock::MockInstance;
use vulcan_hostapi::{MemWorld, WorldAccount};
use vulcan_primitives::{CodeMetadata, ReturnCode, VMError};

#[test]
fn test_deploy_contract_runs_init() {
    let config = TestConfig {
        gas_provided: 5000,
        ..Default::default()
    };
    let setup = TestSetup::new(config);
    setup.builder.register_contract(b"fresh_contract_code", || {
        let mut instance = MockInstance::new();
        instance.add_method("init", |host| {
            eei::baseops::storage_store(host, b"initialized", b"yes")?;
            Ok(())
        });
        instance
    });

    let mut host = setup.host;
    let input = build_create_input(&user_address(), b"fresh_contract_code", 5000);
    let output = host.run_contract_create(input).unwrap();
    let verifier = OutputVerifier { output };
    verifier.ok();

    // Exactly one account carries the deployed code and the init write.
    let deployed: Vec<_> = verifier
        .output
        .output_accounts
        .values()
        .filter(|account| !account.code.is_empty())
        .collect();
    assert_eq!(deployed.len(), 1);
    assert_eq!(deployed[0].code, b"fresh_contract_code");
    assert_eq!(deployed[0].code_deployer_address, user_address());
    let update = deployed[0]
        .storage_updates
        .get(b"initialized".as_slice())
        .expect("init ran");
    assert_eq!(update.data, b"yes");
}

#[test]
fn test_upgrade_by_owner() {
    let config = TestConfig::default();
    let setup = TestSetup::new(config).with_parent(MockInstance::new);
    setup.builder.register_contract(b"upgraded_code", || {
        let mut instance = MockInstance::new();
        instance.add_method("init", |host| {
            eei::baseops::storage_store(host, b"upgraded", b"yes")?;
            Ok(())
        });
        instance
    });

    let mut host = setup.host;
    let input = build_call_input(
        &user_address(),
        &parent_address(),
        "upgradeContract",
        vec![b"upgraded_code".to_vec(), vec![1, 0]],
        1000,
    );
    let output = host.run_contract_call(input).unwrap();
    let verifier = OutputVerifier { output };
    verifier.ok().storage(&parent_address(), b"upgraded", b"yes");

    let parent = verifier
        .output
        .output_accounts
        .get(&parent_address())
        .unwrap();
    assert_eq!(parent.code, b"upgraded_code");
}

#[test]
fn test_upgrade_by_stranger_is_refused() {
    let config = TestConfig::default();
    let setup = TestSetup::new(config).with_parent(MockInstance::new);

    let mut host = setup.host;
    let input = build_call_input(
        &third_party_address(),
        &parent_address(),
        "upgradeContract",
        vec![b"upgraded_code".to_vec(), vec![1, 0]],
        1000,
    );
    let output = host.run_contract_call(input).unwrap();
    assert_eq!(output.return_code, ReturnCode::ExecutionFailed);
    assert!(output.return_message.contains("upgrade not allowed"));
}

#[test]
fn test_delete_by_owner_marks_account() {
    let config = TestConfig::default();
    let setup = TestSetup::new(config).with_parent(MockInstance::new);

    let mut host = setup.host;
    let input = build_call_input(
        &user_address(),
        &parent_address(),
        "deleteContract",
        vec![],
        1000,
    );
    let output = host.run_contract_call(input).unwrap();
    assert_eq!(output.return_code, ReturnCode::Ok);
    assert_eq!(output.deleted_accounts, vec![parent_address()]);
}

#[test]
fn test_timeout_produces_failed_output() {
    let config = TestConfig {
        gas_provided: 1000,
        ..Default::default()
    };
    let mut setup = TestSetup::new(config).with_parent(|| {
        let mut instance = MockInstance::new();
        instance.add_method("slowpoke", |_host| {
            // Longer than the host's watchdog deadline.
            std::thread::sleep(Duration::from_millis(1400));
            Ok(())
        });
        instance
    });

    let verifier = setup.call_parent("slowpoke", vec![]);
    verifier
        .execution_failed()
        .message_contains("execution failed with timeout")
        .gas_remaining(0);
    assert!(verifier.output.output_accounts.is_empty());
}

#[test]
fn test_wasm_busy_loop_stops_at_deadline() {
    let world = MemWorld::new_shared();
    world.put_account(WorldAccount::new(&user_address()));

    // A contract that spins in pure compute, never calling into the host:
    // only the watchdog's epoch interrupt can stop it before its fuel ends.
    let spin_wat = br#"
        (module
            (memory (export "memory") 1)
            (func (export "spin")
                (loop $again
                    (br $again)))
        )
    "#;
    world.put_account(
        WorldAccount::new(&parent_address())
            .with_code(spin_wat)
            .with_code_metadata(CodeMetadata {
                payable: true,
                readable: true,
                upgradeable: true,
                payable_by_sc: true,
            }),
    );

    let mut host = wasmtime_host(world, Duration::from_secs(1));
    // Fuel that would keep the loop alive far beyond the wall-clock
    // deadline; the gas budget must not be what ends the call.
    let input = build_call_input(
        &user_address(),
        &parent_address(),
        "spin",
        vec![],
        50_000_000_000,
    );

    let started = Instant::now();
    let output = host.run_contract_call(input).unwrap();
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "watchdog failed to stop the running instance"
    );

    let verifier = OutputVerifier { output };
    verifier
        .execution_failed()
        .message_contains("execution failed with timeout")
        .gas_remaining(0);
    assert!(verifier.output.output_accounts.is_empty());
}

#[test]
fn test_panic_is_isolated() {
    let config = TestConfig::default();
    let mut setup = TestSetup::new(config).with_parent(|| {
        let mut instance = MockInstance::new();
        instance.add_method("explode", |_host| {
            panic!("contract went sideways");
        });
        instance
    });

    let verifier = setup.call_parent("explode", vec![]);
    verifier
        .execution_failed()
        .message_contains("contract went sideways");

    // The host survives and keeps serving calls.
    let input = build_call_input(&user_address(), &parent_address(), "missing", vec![], 1000);
    let output = setup.host.run_contract_call(input).unwrap();
    assert_eq!(output.return_code, ReturnCode::FunctionNotFound);
}

#[test]
fn test_closing_host_refuses_calls() {
    let config = TestConfig::default();
    let mut setup = TestSetup::new(config).with_parent(MockInstance::new);

    setup.host.close();
    let input = build_call_input(&user_address(), &parent_address(), "any", vec![], 1000);
    assert_eq!(
        setup.host.run_contract_call(input).unwrap_err(),
        VMError::VMIsClosing
    );
}

#[test]
fn test_context_stacks_return_to_zero_depth() {
    let config = TestConfig::default();
    let mut setup = TestSetup::new(config)
        .with_parent(|| {
            let mut instance = MockInstance::new();
            instance.add_method("nestTwice", |host| {
                let result = eei::baseops::execute_on_dest_context(
                    host,
                    200,
                    &child_address(),
                    &num_bigint::BigInt::from(0),
                    "inner",
                    &[],
                );
                eei::fail_if_policy_unit(host, result);
                Ok(())
            });
            instance
        })
        .with_child(|| {
            let mut instance = MockInstance::new();
            instance.add_method("inner", |host| {
                host.use_gas_bounded(10)?;
                Ok(())
            });
            instance
        });

    let verifier = setup.call_parent("nestTwice", vec![]);
    verifier.ok();
    assert_eq!(setup.host.context_stack_depth(), 0);
}

#[test]
fn test_gas_schedule_change_applies() {
    let config = TestConfig {
        gas_provided: 1000,
        ..Default::default()
    };
    let mut setup = TestSetup::new(config).with_parent(|| {
        let mut instance = MockInstance::new();
        instance.add_method("doNothing", |_host| Ok(()));
        instance
    });

    let mut schedule = vulcan_primitives::gas::GasSchedule::uniform(0);
    schedule.base_ops.get_code = 100;
    setup.host.gas_schedule_change(schedule);

    let verifier = setup.call_parent("doNothing", vec![]);
    // The new schedule's initial deduction is visible in the remaining gas.
    verifier.ok().gas_remaining(900);
}
