//! Storage semantics through whole executions: write classification,
//! refunds, and read-your-writes.

mod common;

use common::*;

use vulcan_host::contexts::StorageStatus;
use vulcan_host::eei;
use vulcan_host::executor::mock::MockInstance;
use vulcan_primitives::gas::GasSchedule;

fn schedule_with_storage_costs(config: &TestConfig) -> GasSchedule {
    let mut schedule = test_gas_schedule(config);
    schedule.base_ops.store_per_byte = 20;
    schedule.base_ops.release_per_byte = 10;
    schedule.base_ops.persist_per_byte = 2;
    schedule
}

#[test]
fn test_write_then_delete_records_refund() {
    let config = TestConfig {
        gas_provided: 10_000,
        ..Default::default()
    };
    let schedule = schedule_with_storage_costs(&config);
    let mut setup = TestSetup::new(config).with_parent(|| {
        let mut instance = MockInstance::new();
        instance.add_method("addThenDelete", |host| {
            let status = eei::baseops::storage_store(host, b"freshKey", b"0123456789")?;
            assert_eq!(status, StorageStatus::Added);

            let status = eei::baseops::storage_store(host, b"freshKey", b"")?;
            assert_eq!(status, StorageStatus::Deleted);
            Ok(())
        });
        instance
    });
    setup.host.gas_schedule_change(schedule);

    let verifier = setup.call_parent("addThenDelete", vec![]);
    verifier.ok();

    // Added charged 10 × store_per_byte; the delete refunded
    // 10 × release_per_byte.
    assert_eq!(verifier.output.gas_remaining, 10_000 - 10 * 20);
    assert_eq!(verifier.output.gas_refund, 10 * 10);

    // The final written state of the key is the deletion.
    let parent = verifier
        .output
        .output_accounts
        .get(&parent_address())
        .unwrap();
    let update = parent.storage_updates.get(b"freshKey".as_slice()).unwrap();
    assert!(update.written);
    assert!(update.data.is_empty());
}

#[test]
fn test_set_then_get_within_frame() {
    let config = TestConfig {
        gas_provided: 10_000,
        ..Default::default()
    };
    let mut setup = TestSetup::new(config).with_parent(|| {
        let mut instance = MockInstance::new();
        instance.add_method("writeRead", |host| {
            eei::baseops::storage_store(host, b"myKey", b"myValue")?;
            let loaded = eei::baseops::storage_load(host, b"myKey")?;
            assert_eq!(loaded, b"myValue", "read-your-writes within a frame");
            eei::baseops::finish(host, &loaded)?;
            Ok(())
        });
        instance
    });

    let verifier = setup.call_parent("writeRead", vec![]);
    verifier.ok().return_data(&[b"myValue"]);
}

#[test]
fn test_reserved_key_write_is_refused() {
    let config = TestConfig::default();
    let mut setup = TestSetup::new(config).with_parent(|| {
        let mut instance = MockInstance::new();
        instance.add_method("writeReserved", |host| {
            let result = eei::baseops::storage_store(host, b"N@chainOwned", b"v");
            if let Err(err) = result {
                host.signal_user_error(&err.to_string());
            }
            Ok(())
        });
        instance
    });

    let verifier = setup.call_parent("writeReserved", vec![]);
    verifier
        .user_error()
        .message_contains("reserved key");
}

#[test]
fn test_storage_lock_roundtrip() {
    let config = TestConfig::default();
    let mut setup = TestSetup::new(config).with_parent(|| {
        let mut instance = MockInstance::new();
        instance.add_method("lockAndInspect", |host| {
            eei::baseops::set_storage_lock(host, b"guarded", 9_000_000)?;
            let timestamp = eei::baseops::get_storage_lock(host, b"guarded")?;
            assert_eq!(timestamp, 9_000_000);
            // Block time in the mock world is zero, so the lock holds.
            assert!(eei::baseops::is_storage_locked(host, b"guarded")?);

            eei::baseops::clear_storage_lock(host, b"guarded")?;
            assert!(!eei::baseops::is_storage_locked(host, b"guarded")?);
            Ok(())
        });
        instance
    });

    let verifier = setup.call_parent("lockAndInspect", vec![]);
    verifier.ok();
}

#[test]
fn test_unchanged_write_is_cheap() {
    let config = TestConfig {
        gas_provided: 10_000,
        ..Default::default()
    };
    let schedule = schedule_with_storage_costs(&config);
    let mut setup = TestSetup::new(config).with_parent(|| {
        let mut instance = MockInstance::new();
        instance.add_method("writeTwice", |host| {
            let first = eei::baseops::storage_store(host, b"key", b"same")?;
            assert_eq!(first, StorageStatus::Added);
            let second = eei::baseops::storage_store(host, b"key", b"same")?;
            assert_eq!(second, StorageStatus::Unchanged);
            Ok(())
        });
        instance
    });
    setup.host.gas_schedule_change(schedule);

    let verifier = setup.call_parent("writeTwice", vec![]);
    verifier.ok();
    // Only the first write was charged: 4 bytes × store_per_byte.
    assert_eq!(verifier.output.gas_remaining, 10_000 - 4 * 20);
}
