use anyhow::Context;
use relata_persistence::StdResult;
use relata_persistence::database::Executor;
use relata_persistence::sqlite::classify_error;
use slog::debug;

/// Tables of the storefront, created when missing.
pub const STOREFRONT_DDL: &str = r#"
create table if not exists users (
    id          text    not null primary key,
    password    text    not null,
    first_name  text    not null,
    middle_name text    not null default '',
    last_name   text    not null default '',
    created_at  text    not null,
    updated_at  text    not null
);
create table if not exists user_logs (
    id          integer primary key autoincrement,
    user_id     text    not null,
    action      text    not null,
    created_at  integer not null,
    updated_at  integer not null
);
create table if not exists todos (
    id          integer primary key autoincrement,
    user_id     text    not null,
    title       text    not null,
    description text,
    created_at  text    not null,
    updated_at  text    not null,
    deleted_at  text
);
create index if not exists todos_deleted_at_index on todos(deleted_at);
create table if not exists wallets (
    id          text    not null primary key,
    user_id     text    references users(id),
    balance     integer not null,
    created_at  text    not null,
    updated_at  text    not null
);
create table if not exists addresses (
    id          integer primary key autoincrement,
    user_id     text    references users(id),
    address     text    not null,
    created_at  text    not null,
    updated_at  text    not null
);
create table if not exists products (
    id          text    not null primary key,
    name        text    not null,
    price       integer not null,
    created_at  text    not null,
    updated_at  text    not null
);
create table if not exists user_like_product (
    user_id     text    not null references users(id),
    product_id  text    not null references products(id),
    primary key (user_id, product_id)
);
create table if not exists guest_books (
    id          integer primary key autoincrement,
    name        text    not null,
    email       text    not null,
    message     text    not null,
    created_at  text    not null,
    updated_at  text    not null
);
"#;

/// Create the storefront tables that do not exist yet.
pub fn create_tables(executor: &Executor) -> StdResult<()> {
    executor
        .connection()
        .execute(STOREFRONT_DDL)
        .map_err(classify_error)
        .with_context(|| "Storefront tables creation error")?;
    debug!(executor.logger(), "Storefront tables ready");

    Ok(())
}
