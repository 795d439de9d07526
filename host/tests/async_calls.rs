//! The asynchronous call protocol, end to end: in-shard drains with
//! callbacks, cross-shard departures, and incoming callback transactions.

mod common;

use common::*;

use num_bigint::BigInt;

use vulcan_host::contexts::async_ctx::{
    AsyncCall, AsyncCallExecutionMode, AsyncCallStatus, AsyncCallGroup, AsyncContextState,
};
use vulcan_host::eei;
use vulcan_host::executor::mock::MockInstance;
use vulcan_primitives::types::custom_storage_key;
use vulcan_primitives::types::ASYNC_DATA_PREFIX;
use vulcan_primitives::{CallType, ReturnCode};

fn async_parent(config: &TestConfig) -> MockInstance {
    let gas_used_by_parent = config.gas_used_by_parent;
    let gas_used_by_callback = config.gas_used_by_callback;
    let transfer_to_third_party = config.transfer_to_third_party;
    let transfer_to_vault = config.transfer_to_vault;
    let transfer_to_child = config.transfer_from_parent_to_child;
    let call_data = child_call_data(config);

    let mut instance = MockInstance::new();

    instance.add_method("performAsyncCall", move |host| {
        host.use_gas_bounded(gas_used_by_parent)?;
        eei::baseops::storage_store(host, PARENT_KEY_A, PARENT_DATA_A)?;
        eei::baseops::storage_store(host, PARENT_KEY_B, PARENT_DATA_B)?;
        eei::baseops::transfer_value(
            host,
            &third_party_address(),
            &BigInt::from(transfer_to_third_party),
            b"hello",
        )?;

        let value_bytes = BigInt::from(transfer_to_child).to_bytes_be().1;
        let result = eei::baseops::async_call(host, &child_address(), &value_bytes, &call_data);
        eei::fail_if_policy_unit(host, result);
        Ok(())
    });

    instance.add_method("callBack", move |host| {
        host.use_gas_bounded(gas_used_by_callback)?;
        eei::baseops::transfer_value(
            host,
            &vault_address(),
            &BigInt::from(transfer_to_vault),
            b"",
        )?;
        eei::baseops::storage_store(host, CALLBACK_KEY, CALLBACK_DATA)?;
        Ok(())
    });

    instance
}

fn async_child(config: &TestConfig) -> MockInstance {
    let gas_used_by_child = config.gas_used_by_child;
    let transfer_to_third_party = config.transfer_to_third_party;

    let mut instance = MockInstance::new();
    instance.add_method("transferToThirdParty", move |host| {
        host.use_gas_bounded(gas_used_by_child)?;
        let data = eei::baseops::get_argument(host, 1)?;
        eei::baseops::transfer_value(
            host,
            &third_party_address(),
            &BigInt::from(transfer_to_third_party),
            &data,
        )?;
        eei::baseops::storage_store(host, CHILD_KEY, CHILD_DATA)?;
        Ok(())
    });
    instance
}

#[test]
fn test_in_shard_legacy_async_call_success() {
    let config = TestConfig::default();
    let parent_config = config.clone();
    let child_config = config.clone();
    let mut setup = TestSetup::new(config)
        .with_parent(move || async_parent(&parent_config))
        .with_child(move || async_child(&child_config));

    let verifier = setup.call_parent("performAsyncCall", vec![]);
    verifier
        .ok()
        .transfers_to(
            &third_party_address(),
            &[(3, b"hello"), (3, b" there")],
        )
        .transfers_to(&vault_address(), &[(4, b"")])
        .storage(&parent_address(), PARENT_KEY_A, PARENT_DATA_A)
        .storage(&parent_address(), PARENT_KEY_B, PARENT_DATA_B)
        .storage(&parent_address(), CALLBACK_KEY, CALLBACK_DATA)
        .storage(&child_address(), CHILD_KEY, CHILD_DATA)
        // 1000 - (400 parent + 100 callback) - 200 child
        .gas_remaining(300)
        .gas_accounting_holds(1000);

    // Fully drained in-shard: nothing was persisted for later callbacks.
    let async_key = custom_storage_key(ASYNC_DATA_PREFIX, b"originalTxHash");
    let parent = verifier
        .output
        .output_accounts
        .get(&parent_address())
        .unwrap();
    assert!(
        !parent
            .storage_updates
            .get(&async_key)
            .map(|update| update.written && !update.data.is_empty())
            .unwrap_or(false),
        "no pending async context may stay persisted"
    );
}

#[test]
fn test_cross_shard_async_call_departure() {
    let config = TestConfig {
        child_shard: 1,
        ..Default::default()
    };
    let parent_config = config.clone();
    let child_config = config.clone();
    let mut setup = TestSetup::new(config)
        .with_parent(move || async_parent(&parent_config))
        .with_child(move || async_child(&child_config));

    let verifier = setup.call_parent("performAsyncCall", vec![]);
    verifier
        .ok()
        .transfers_to(&third_party_address(), &[(3, b"hello")])
        // gas-limit = 1000 - 400 - 150 - step; gas-locked = 150 + step;
        // the test schedule has a zero async step.
        .async_transfer_to(&child_address(), 7, 450, 150)
        .gas_remaining(0)
        .gas_accounting_holds(1000);

    // The pending context went to storage under the reserved prefix.
    let async_key = custom_storage_key(ASYNC_DATA_PREFIX, b"originalTxHash");
    let parent = verifier
        .output
        .output_accounts
        .get(&parent_address())
        .unwrap();
    let update = parent
        .storage_updates
        .get(&async_key)
        .expect("async context persisted");
    assert!(update.written);
    let stored = AsyncContextState::deserialize(&update.data).unwrap();
    assert_eq!(stored.call_groups.len(), 1);
    assert_eq!(stored.call_groups[0].calls[0].destination, child_address());

    // The outgoing transfer's data is the call data verbatim.
    let child_account = verifier
        .output
        .output_accounts
        .get(&child_address())
        .unwrap();
    let data = &child_account.output_transfers[0].data;
    assert!(data.starts_with(b"transferToThirdParty@"));
}

#[test]
fn test_rejected_async_call_runs_error_callback() {
    let config = TestConfig::default();
    let mut setup = TestSetup::new(config)
        .with_parent(|| {
            let mut instance = MockInstance::new();
            instance.add_method("registerFailingCall", |host| {
                host.use_gas_bounded(400)?;
                let result = eei::baseops::create_async_call(
                    host,
                    "testGroup",
                    &child_address(),
                    &[],
                    b"fail",
                    "onSuccess",
                    "onError",
                    300,
                    150,
                    None,
                );
                eei::fail_if_policy_unit(host, result);
                Ok(())
            });
            instance.add_method("onSuccess", |host| {
                eei::baseops::storage_store(host, b"successKey", b"ranSuccess")?;
                Ok(())
            });
            instance.add_method("onError", |host| {
                host.use_gas_bounded(100)?;
                let status = eei::baseops::get_argument(host, 0)?;
                assert_ne!(status, vec![0u8], "error callback got an ok status");
                eei::baseops::storage_store(host, b"errorKey", b"ranError")?;
                Ok(())
            });
            instance
        })
        .with_child(|| {
            let mut instance = MockInstance::new();
            instance.add_method("fail", |host| {
                host.signal_user_error("child refuses");
                Ok(())
            });
            instance
        });

    let verifier = setup.call_parent("registerFailingCall", vec![]);
    verifier
        .ok()
        .storage(&parent_address(), b"errorKey", b"ranError")
        .gas_accounting_holds(1000);
    let parent = verifier
        .output
        .output_accounts
        .get(&parent_address())
        .unwrap();
    assert!(parent.storage_updates.get(b"successKey".as_slice()).is_none());
}

#[test]
fn test_second_legacy_async_call_is_refused() {
    let config = TestConfig::default();
    let mut setup = TestSetup::new(config)
        .with_parent(|| {
            let mut instance = MockInstance::new();
            instance.add_method("asyncTwice", |host| {
                eei::baseops::async_call(host, &child_address(), &[], b"first@")?;
                let second =
                    eei::baseops::async_call(host, &third_party_address(), &[], b"second@");
                if let Err(err) = second {
                    host.signal_user_error(&err.to_string());
                }
                Ok(())
            });
            instance.add_method("callBack", |_host| Ok(()));
            instance
        })
        .with_child(MockInstance::new);

    let verifier = setup.call_parent("asyncTwice", vec![]);
    verifier
        .user_error()
        .message_contains("only one legacy async call allowed");
}

#[test]
fn test_only_one_async_call_per_destination() {
    let config = TestConfig::default();
    let mut setup = TestSetup::new(config)
        .with_parent(|| {
            let mut instance = MockInstance::new();
            instance.add_method("doubleRegister", |host| {
                eei::baseops::create_async_call(
                    host,
                    "groupA",
                    &child_address(),
                    &[],
                    b"first@",
                    "",
                    "",
                    100,
                    0,
                    None,
                )?;
                let second = eei::baseops::create_async_call(
                    host,
                    "groupB",
                    &child_address(),
                    &[],
                    b"second@",
                    "",
                    "",
                    100,
                    0,
                    None,
                );
                if let Err(err) = second {
                    host.signal_user_error(&err.to_string());
                }
                Ok(())
            });
            instance
        })
        .with_child(MockInstance::new);

    let verifier = setup.call_parent("doubleRegister", vec![]);
    verifier
        .user_error()
        .message_contains("only one async call allowed to an address");
}

#[test]
fn test_incoming_cross_shard_callback_completes_context() {
    let config = TestConfig::default();
    let parent_config = config.clone();
    let mut setup = TestSetup::new(config).with_parent(move || async_parent(&parent_config));

    // A context persisted by an earlier cross-shard departure.
    let state = AsyncContextState {
        address: parent_address(),
        call_id: b"currentTxHash".to_vec(),
        caller_addr: user_address(),
        caller_call_id: b"prevTxHash".to_vec(),
        callback_async_initiator_call_id: Vec::new(),
        call_type: CallType::Direct,
        call_groups: vec![AsyncCallGroup {
            identifier: "LegacyAsync".to_string(),
            callback: String::new(),
            callback_data: Vec::new(),
            callback_gas: 0,
            calls: vec![AsyncCall {
                call_id: b"pendingCallId".to_vec(),
                status: AsyncCallStatus::Pending,
                execution_mode: AsyncCallExecutionMode::Unknown,
                destination: child_address(),
                data: b"transferToThirdParty@03".to_vec(),
                value_bytes: vec![7],
                provided_gas: 0,
                gas_limit: 450,
                gas_locked: 150,
                success_callback: "callBack".to_string(),
                error_callback: "callBack".to_string(),
                callback_closure: None,
            }],
        }],
        return_data: Vec::new(),
        gas_accumulated: 0,
        generated_call_count: 1,
    };
    let async_key = custom_storage_key(ASYNC_DATA_PREFIX, b"originalTxHash");
    let mut parent_account = setup.world.account(&parent_address()).unwrap();
    parent_account
        .storage
        .insert(async_key.clone(), state.serialize().unwrap());
    setup.world.put_account(parent_account);

    // The callback transaction arrives from the child's shard.
    let mut input = build_call_input(
        &child_address(),
        &parent_address(),
        "callBack",
        vec![vec![0], b"childResult".to_vec()],
        600,
    );
    input.vm_input.call_type = CallType::AsynchronousCallback;
    input.vm_input.gas_locked = 150;

    let output = setup.host.run_contract_call(input).unwrap();
    let verifier = OutputVerifier { output };
    verifier
        .ok()
        .storage(&parent_address(), CALLBACK_KEY, CALLBACK_DATA)
        .transfers_to(&vault_address(), &[(4, b"")]);

    // The answered call was removed and the entry cleared.
    let parent = verifier
        .output
        .output_accounts
        .get(&parent_address())
        .unwrap();
    let update = parent.storage_updates.get(&async_key).expect("cleared entry");
    assert!(update.written);
    assert!(update.data.is_empty());
}

#[test]
fn test_unexpected_callback_is_refused() {
    let config = TestConfig::default();
    let parent_config = config.clone();
    let mut setup = TestSetup::new(config).with_parent(move || async_parent(&parent_config));

    let mut input = build_call_input(
        &child_address(),
        &parent_address(),
        "callBack",
        vec![vec![0]],
        600,
    );
    input.vm_input.call_type = CallType::AsynchronousCallback;

    let output = setup.host.run_contract_call(input).unwrap();
    assert_eq!(output.return_code, ReturnCode::ExecutionFailed);
    assert!(output
        .return_message
        .contains("no async context found in storage"));
}

#[test]
fn test_async_gas_setup_fails_without_gas() {
    let config = TestConfig {
        gas_provided: 500,
        ..Default::default()
    };
    let mut setup = TestSetup::new(config)
        .with_parent(|| {
            let mut instance = MockInstance::new();
            instance.add_method("greedyAsync", |host| {
                host.use_gas_bounded(400)?;
                // Asks for more gas than the frame still has.
                let result = eei::baseops::create_async_call(
                    host,
                    "group",
                    &child_address(),
                    &[],
                    b"anything@",
                    "",
                    "",
                    5_000,
                    0,
                    None,
                );
                eei::fail_if_policy_unit(host, result);
                Ok(())
            });
            instance
        })
        .with_child(MockInstance::new);

    let verifier = setup.call_parent("greedyAsync", vec![]);
    verifier.out_of_gas();
}
