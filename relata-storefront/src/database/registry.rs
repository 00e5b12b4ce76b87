use relata_persistence::StdResult;
use relata_persistence::schema::SchemaRegistry;

use crate::database::record::{Address, GuestBook, Product, Todo, User, UserLog, Wallet};

/// Registry of every storefront record, checked for consistency.
pub fn storefront_registry() -> StdResult<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    for descriptor in [
        User::descriptor()?,
        Wallet::descriptor()?,
        Address::descriptor()?,
        Product::descriptor()?,
        GuestBook::descriptor()?,
        UserLog::descriptor()?,
        Todo::descriptor()?,
    ] {
        registry.register(descriptor)?;
    }
    registry.validate()?;

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use relata_persistence::schema::RelationshipKind;

    use super::*;

    #[test]
    fn registers_every_record() {
        let registry = storefront_registry().unwrap();

        let mut kinds = registry.kinds();
        kinds.sort();
        assert_eq!(
            vec!["Address", "GuestBook", "Product", "Todo", "User", "UserLog", "Wallet"],
            kinds
        );
    }

    #[test]
    fn like_products_goes_through_the_join_table() {
        let registry = storefront_registry().unwrap();

        let (relationship, target) = registry.relationship("User", "LikeProducts").unwrap();

        assert_eq!(RelationshipKind::ManyToMany, relationship.kind());
        assert_eq!("products", target.table());
        assert_eq!(
            Some("user_like_product"),
            relationship.join_table().map(|join_table| join_table.table())
        );
    }
}
