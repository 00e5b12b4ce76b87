mod test_extensions;

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use relata_persistence::DataAccessError;
use relata_persistence::configuration::DataAccessConfiguration;
use relata_persistence::database::DataContext;
use relata_persistence::mapper::{FieldValues, value};
use relata_persistence::test_tools::{TestLogger, temp_dir};
use relata_storefront::StorefrontStore;
use relata_storefront::database::record::{User, Wallet};
use relata_storefront::database::storefront_registry;

use test_extensions::{ids, store, users, wallets};

#[test]
fn transaction_success_commits_every_user() {
    let store = store();

    store
        .with_transaction(|unit_of_work| {
            let executor = unit_of_work.executor();
            executor.create(&User::new("1", "rahasia", "User 1"))?;
            executor.create(&User::new("2", "rahasia", "User 2"))?;
            executor.create(&User::new("3", "rahasia", "User 3"))?;
            Ok(())
        })
        .unwrap();

    let found = store.run(|executor| executor.find::<User>(&users())).unwrap();
    assert_eq!(vec!["1", "2", "3"], ids(&found));
}

#[test]
fn transaction_failure_persists_nothing() {
    let store = store();
    store
        .run(|executor| executor.create(&User::new("1", "rahasia", "Existing")))
        .unwrap();

    let error = store
        .with_transaction(|unit_of_work| {
            let executor = unit_of_work.executor();
            executor.create(&User::new("4", "rahasia", "User 4"))?;
            executor.create(&User::new("1", "rahasia", "Duplicate"))?;
            executor.create(&User::new("5", "rahasia", "User 5"))?;
            Ok(())
        })
        .expect_err("the duplicate id should abort the transaction");

    assert!(matches!(
        error.downcast_ref::<DataAccessError>(),
        Some(DataAccessError::ConstraintViolation(_))
    ));
    let found = store.run(|executor| executor.find::<User>(&users())).unwrap();
    assert_eq!(vec!["1"], ids(&found));
    assert_eq!("Existing", found[0].name.first_name);
}

#[test]
fn manual_transaction_commit_and_rollback() {
    let store = store();

    {
        let session = store.session().unwrap();
        let unit_of_work = session.begin().unwrap();
        unit_of_work
            .executor()
            .create(&User::new("1", "rahasia", "Committed"))
            .unwrap();
        unit_of_work.commit().unwrap();

        let unit_of_work = session.begin().unwrap();
        unit_of_work
            .executor()
            .create(&User::new("2", "rahasia", "Rolled back"))
            .unwrap();
        unit_of_work.rollback().unwrap();
    }

    let found = store.run(|executor| executor.find::<User>(&users())).unwrap();
    assert_eq!(vec!["1"], ids(&found));
}

#[test]
fn nested_transaction_failure_keeps_the_outer_changes() {
    let store = store();

    store
        .with_transaction(|unit_of_work| {
            unit_of_work.executor().create(&User::new("1", "rahasia", "Outer"))?;
            let nested = unit_of_work.with_transaction(|nested| {
                nested.executor().create(&User::new("2", "rahasia", "Inner"))?;
                Err::<(), _>(anyhow!("inner failure"))
            });
            assert!(nested.is_err());
            Ok(())
        })
        .unwrap();

    let found = store.run(|executor| executor.find::<User>(&users())).unwrap();
    assert_eq!(vec!["1"], ids(&found));
}

#[test]
fn locked_read_then_update_in_an_immediate_transaction() {
    let store = store();
    store
        .run(|executor| {
            let mut user = User::new("1", "rahasia", "Eko");
            user.wallet = Some(Wallet::new("W1", "", 1_000_000));
            executor.create(&user)
        })
        .unwrap();

    let session = store.session().unwrap();
    session
        .with_immediate_transaction(|unit_of_work| {
            let executor = unit_of_work.executor();
            let wallet = executor
                .first::<Wallet>(&wallets().filter("wallets.user_id = ?*", vec![value::text("1")]).for_update())?
                .ok_or_else(|| anyhow!("wallet not found"))?;
            executor.update_fields(
                &wallet,
                &FieldValues::new().with("balance", value::integer(wallet.balance - 250_000)),
            )?;
            Ok(())
        })
        .unwrap();

    let wallet = session
        .executor()
        .first::<Wallet>(&wallets())
        .unwrap()
        .unwrap();
    assert_eq!(750_000, wallet.balance);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_units_of_work_on_a_file_database() {
    let dir = temp_dir("storefront", "concurrent_units_of_work_on_a_file_database");
    let database_url = format!(
        "sqlite://{}?journal_mode=wal&busy_timeout=5000",
        dir.join("storefront.sqlite3").display()
    );
    let configuration = DataAccessConfiguration {
        max_open_connections: 4,
        ..DataAccessConfiguration::new_sample(&database_url)
    };
    let store = StorefrontStore::open(&configuration, TestLogger::stdout()).unwrap();

    let mut handles = Vec::new();
    for index in 0..8 {
        let store = store.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            store.session()?.with_immediate_transaction(|unit_of_work| {
                unit_of_work
                    .executor()
                    .create(&User::new(&index.to_string(), "rahasia", "Concurrent"))
            })
        }));
    }
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    assert_eq!(8, store.run(|executor| executor.count(&users())).unwrap());
    store.close().unwrap();
}

#[test]
fn store_can_wrap_an_existing_context() {
    let configuration = DataAccessConfiguration::new_sample(":memory:");
    let context = DataContext::from_configuration(
        Arc::new(storefront_registry().unwrap()),
        &configuration,
        TestLogger::stdout(),
    )
    .unwrap();

    let store = StorefrontStore::from_context(context, TestLogger::stdout()).unwrap();

    assert_eq!(0, store.run(|executor| executor.count(&users())).unwrap());
    assert_eq!("sqlite", store.context().dialect().name());
}
