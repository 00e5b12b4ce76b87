#![allow(dead_code)]

use relata_persistence::StdResult;
use relata_persistence::configuration::DataAccessConfiguration;
use relata_persistence::database::Executor;
use relata_persistence::query::QueryBuilder;
use relata_persistence::test_tools::{MemoryLogs, TestLogger};
use relata_storefront::StorefrontStore;
use relata_storefront::database::record::{Product, User, Wallet};

/// Store on a private in-memory database with foreign keys enforced.
pub fn store() -> StorefrontStore {
    StorefrontStore::open(
        &DataAccessConfiguration::new_sample(":memory:"),
        TestLogger::stdout(),
    )
    .unwrap()
}

/// Same as [store], keeping the log messages for inspection.
pub fn store_with_logs() -> (StorefrontStore, MemoryLogs) {
    let (logger, logs) = TestLogger::memory();
    let store =
        StorefrontStore::open(&DataAccessConfiguration::new_sample(":memory:"), logger).unwrap();

    (store, logs)
}

pub fn users() -> QueryBuilder {
    QueryBuilder::for_entity::<User>()
}

pub fn wallets() -> QueryBuilder {
    QueryBuilder::for_entity::<Wallet>()
}

pub fn products() -> QueryBuilder {
    QueryBuilder::for_entity::<Product>()
}

/// Users `1` to `count`, named `User 1` to `User <count>`.
pub fn sample_users(count: usize) -> Vec<User> {
    (1..=count)
        .map(|index| User::new(&index.to_string(), "rahasia", &format!("User {index}")))
        .collect()
}

/// Store the sample users.
pub fn seed_users(executor: &Executor, count: usize) -> StdResult<Vec<User>> {
    Ok(executor.create_many(&sample_users(count))?.entities)
}

/// Ids of the users in the order they were read.
pub fn ids(users: &[User]) -> Vec<String> {
    users.iter().map(|user| user.id.clone()).collect()
}
