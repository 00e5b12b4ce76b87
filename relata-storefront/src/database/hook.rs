//! Lifecycle hooks of the storefront records

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use relata_persistence::StdResult;
use relata_persistence::mapper::{FieldValues, ValueReader, value};

static GENERATED_USER_IDS: AtomicU64 = AtomicU64::new(0);

/// Give a generated id to a user created without one.
///
/// Generated ids look like `user-<unix millis>-<sequence>`.
pub fn assign_user_id(values: &mut FieldValues) -> StdResult<()> {
    if !values.string_or_default("id")?.is_empty() {
        return Ok(());
    }

    let sequence = GENERATED_USER_IDS.fetch_add(1, Ordering::Relaxed);
    values.set(
        "id",
        value::text(format!("user-{}-{sequence}", Utc::now().timestamp_millis())),
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_an_explicit_id() {
        let mut values = FieldValues::new().with("id", value::text("42"));

        assign_user_id(&mut values).unwrap();

        assert_eq!("42", values.string("id").unwrap());
    }

    #[test]
    fn generates_distinct_ids_when_missing() {
        let mut first = FieldValues::new().with("id", value::text(""));
        let mut second = FieldValues::new();

        assign_user_id(&mut first).unwrap();
        assign_user_id(&mut second).unwrap();

        let first = first.string("id").unwrap();
        assert!(first.starts_with("user-"));
        assert_ne!(first, second.string("id").unwrap());
    }
}
