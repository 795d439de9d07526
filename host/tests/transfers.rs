//! Value and token transfer semantics through whole executions.

mod common;

use common::*;

use num_bigint::BigInt;

use vulcan_host::eei;
use vulcan_host::executor::mock::MockInstance;
use vulcan_hostapi::WorldAccount;
use vulcan_primitives::{CodeMetadata, VMError};

#[test]
fn test_esdt_transfer_with_failing_builtin() {
    let config = TestConfig::default();
    let mut setup = TestSetup::new(config)
        .with_parent(|| {
            let mut instance = MockInstance::new();
            instance.add_method("transferTokensToChild", |host| {
                let result = eei::baseops::transfer_esdt_execute(
                    host,
                    &child_address(),
                    b"TKN-123456",
                    0,
                    &BigInt::from(5),
                    100,
                    "fail",
                    &[],
                );
                let _ = eei::fail_if_policy(host, result.map(|_| 0), 1);
                Ok(())
            });
            instance
        })
        .with_child(MockInstance::new);

    // The node-side built-in refuses the transfer before any dispatch.
    setup.world.register_builtin("ESDTTransfer", |_input, _world| {
        Err(VMError::HookError("forced fail".to_string()))
    });

    let mut parent_account = setup.world.account(&parent_address()).unwrap();
    parent_account
        .esdt_balances
        .insert(b"TKN-123456".to_vec(), BigInt::from(50));
    setup.world.put_account(parent_account);

    let verifier = setup.call_parent("transferTokensToChild", vec![]);
    verifier
        .execution_failed()
        .message_contains("forced fail")
        .gas_remaining(0);

    // Neither side's token balance moved.
    let parent_tokens = setup
        .world
        .account(&parent_address())
        .unwrap()
        .esdt_balances
        .get(b"TKN-123456".as_slice())
        .cloned()
        .unwrap();
    assert_eq!(parent_tokens, BigInt::from(50));
    let child_tokens = setup
        .world
        .account(&child_address())
        .unwrap()
        .esdt_balances
        .get(b"TKN-123456".as_slice())
        .cloned();
    assert_eq!(child_tokens, None);
}

#[test]
fn test_transfer_to_non_payable_contract_fails() {
    let config = TestConfig::default();
    let mut setup = TestSetup::new(config).with_parent(|| {
        let mut instance = MockInstance::new();
        instance.add_method("payTheUnpayable", |host| {
            let result = eei::baseops::transfer_value(
                host,
                &test_address("unpayableSC"),
                &BigInt::from(10),
                b"",
            );
            if let Err(err) = result {
                host.signal_user_error(&err.to_string());
            }
            Ok(())
        });
        instance
    });
    setup.world.put_account(
        WorldAccount::new(&test_address("unpayableSC"))
            .with_code(b"some_code")
            .with_code_metadata(CodeMetadata::default()),
    );

    let verifier = setup.call_parent("payTheUnpayable", vec![]);
    verifier
        .user_error()
        .message_contains("non payable contract");
}

#[test]
fn test_transfer_with_insufficient_funds_fails() {
    let config = TestConfig {
        parent_balance: 5,
        ..Default::default()
    };
    let mut setup = TestSetup::new(config).with_parent(|| {
        let mut instance = MockInstance::new();
        instance.add_method("overspend", |host| {
            let result = eei::baseops::transfer_value(
                host,
                &third_party_address(),
                &BigInt::from(100),
                b"",
            );
            if let Err(err) = result {
                host.signal_user_error(&err.to_string());
            }
            Ok(())
        });
        instance
    });

    let verifier = setup.call_parent("overspend", vec![]);
    verifier
        .user_error()
        .message_contains("insufficient funds");
}

#[test]
fn test_value_transfer_with_builtin_data_is_refused() {
    let config = TestConfig::default();
    let mut setup = TestSetup::new(config).with_parent(|| {
        let mut instance = MockInstance::new();
        instance.add_method("sneakyTransfer", |host| {
            let result = eei::baseops::transfer_value(
                host,
                &third_party_address(),
                &BigInt::from(1),
                b"ESDTTransfer@544b4e@05",
            );
            if let Err(err) = result {
                host.signal_user_error(&err.to_string());
            }
            Ok(())
        });
        instance
    });

    let verifier = setup.call_parent("sneakyTransfer", vec![]);
    verifier
        .user_error()
        .message_contains("transfer value on esdt call");
}

#[test]
fn test_transfer_balances_stay_non_negative_on_success() {
    let config = TestConfig {
        parent_balance: 10,
        ..Default::default()
    };
    let mut setup = TestSetup::new(config).with_parent(|| {
        let mut instance = MockInstance::new();
        instance.add_method("spendAll", |host| {
            eei::baseops::transfer_value(host, &third_party_address(), &BigInt::from(6), b"")?;
            eei::baseops::transfer_value(host, &third_party_address(), &BigInt::from(4), b"")?;
            Ok(())
        });
        instance
    });

    let verifier = setup.call_parent("spendAll", vec![]);
    verifier.ok().balance_delta(&parent_address(), -10);

    // With the hook balance applied, nothing goes below zero.
    let parent = verifier
        .output
        .output_accounts
        .get(&parent_address())
        .unwrap();
    let final_balance = BigInt::from(10) + &parent.balance_delta;
    assert!(final_balance >= BigInt::from(0));
}
