//! Reusable wallet queries

use relata_persistence::mapper::value;
use relata_persistence::query::QueryBuilder;

/// Balance above which a wallet is considered wealthy
pub const SULTAN_BALANCE_THRESHOLD: i64 = 2_000_000;

/// Keep the wallets with nothing left on them.
pub fn broke_wallet_balance(query: QueryBuilder) -> QueryBuilder {
    query.filter("wallets.balance = ?*", vec![value::integer(0)])
}

/// Keep the wallets above [SULTAN_BALANCE_THRESHOLD].
pub fn sultan_wallet_balance(query: QueryBuilder) -> QueryBuilder {
    query.filter(
        "wallets.balance > ?*",
        vec![value::integer(SULTAN_BALANCE_THRESHOLD)],
    )
}
