mod test_extensions;

use relata_persistence::DataAccessError;
use relata_persistence::mapper::{ValueReader, value};
use relata_persistence::query::QueryBuilder;
use relata_persistence::sqlite::WhereCondition;
use relata_storefront::database::record::{Address, Product, User, Wallet};

use test_extensions::{ids, products, seed_users, store, store_with_logs, users, wallets};

fn user_with_wallet(id: &str, balance: i64) -> User {
    let mut user = User::new(id, "rahasia", &format!("User {id}"));
    user.wallet = Some(Wallet::new(&format!("W{id}"), "", balance));
    user
}

#[test]
fn has_one_wallet_is_created_with_its_user() {
    let store = store();

    store
        .run(|executor| {
            let created = executor.create(&user_with_wallet("1", 1_000_000))?;

            let wallet = created.wallet.expect("the wallet should be returned");
            assert_eq!("1", wallet.user_id);
            assert!(wallet.created_at.is_some());
            assert_eq!(1, executor.count(&wallets())?);
            Ok(())
        })
        .unwrap();
}

#[test]
fn omitted_associations_are_not_written() {
    let store = store();

    store
        .run(|executor| {
            executor.omit_associations().create(&user_with_wallet("1", 1_000_000))?;

            assert_eq!(1, executor.count(&users())?);
            assert_eq!(0, executor.count(&wallets())?);
            Ok(())
        })
        .unwrap();
}

#[test]
fn preload_and_join_the_wallet() {
    let (store, logs) = store_with_logs();

    store
        .run(|executor| {
            executor.create(&user_with_wallet("1", 1_000_000))?;
            executor.create(&user_with_wallet("2", 2_500_000))?;
            executor.create(&User::new("3", "rahasia", "Walletless"))?;

            logs.clear();
            let preloaded = executor.find::<User>(&users().preload("Wallet"))?;
            assert_eq!(2, logs.count_matching(&["Executing statement"]));
            assert_eq!(
                vec![Some(1_000_000), Some(2_500_000), None],
                preloaded
                    .iter()
                    .map(|user| user.wallet.as_ref().map(|wallet| wallet.balance))
                    .collect::<Vec<_>>()
            );

            logs.clear();
            let joined = executor.find::<User>(
                &users()
                    .join("Wallet")
                    .filter("Wallet.balance > ?*", vec![value::integer(2_000_000)]),
            )?;
            assert_eq!(1, logs.count_matching(&["Executing statement"]));
            assert_eq!(vec!["2"], ids(&joined));
            assert_eq!(Some("W2".to_string()), joined[0].wallet.as_ref().map(|w| w.id.clone()));
            Ok(())
        })
        .unwrap();
}

#[test]
fn has_many_addresses_are_created_then_upserted_on_save() {
    let store = store();

    store
        .run(|executor| {
            let mut user = User::new("1", "rahasia", "Eko");
            user.addresses = vec![Address::new("", "Jalan A"), Address::new("", "Jalan B")];
            let mut created = executor.create(&user)?;
            assert_eq!(2, created.addresses.len());
            assert!(created.addresses.iter().all(|address| address.id > 0 && address.user_id == "1"));

            created.addresses[0].address = "Jalan A baru".to_string();
            executor.save(&created)?;

            let addresses = executor.find::<Address>(&QueryBuilder::for_entity::<Address>())?;
            assert_eq!(
                vec!["Jalan A baru", "Jalan B"],
                addresses.iter().map(|address| address.address.as_str()).collect::<Vec<_>>()
            );
            Ok(())
        })
        .unwrap();
}

#[test]
fn preloading_addresses_of_many_users_is_batched() {
    let (store, logs) = store_with_logs();

    store
        .run(|executor| {
            for id in ["1", "2", "3"] {
                let mut user = User::new(id, "rahasia", &format!("User {id}"));
                user.addresses = vec![
                    Address::new("", &format!("Jalan {id}A")),
                    Address::new("", &format!("Jalan {id}B")),
                ];
                executor.create(&user)?;
            }

            logs.clear();
            let found = executor.find::<User>(&users().preload("Addresses"))?;

            assert_eq!(2, logs.count_matching(&["Executing statement"]));
            assert_eq!(
                vec![2, 2, 2],
                found.iter().map(|user| user.addresses.len()).collect::<Vec<_>>()
            );
            assert!(
                found
                    .iter()
                    .all(|user| user.addresses.iter().all(|address| address.user_id == user.id))
            );
            Ok(())
        })
        .unwrap();
}

#[test]
fn belongs_to_user_is_saved_first_and_preloaded() {
    let store = store();

    store
        .run(|executor| {
            let mut address = Address::new("", "Jalan Belum Ada");
            address.user = Some(Box::new(User::new("99", "rahasia", "Owner")));
            let created = executor.create(&address)?;
            assert_eq!("99", created.user_id);

            let addresses = QueryBuilder::for_entity::<Address>();
            let preloaded = executor.find::<Address>(&addresses.clone().preload("User"))?;
            let joined = executor.find::<Address>(&addresses.join("User"))?;

            assert_eq!(
                Some("Owner".to_string()),
                preloaded[0].user.as_ref().map(|user| user.name.first_name.clone())
            );
            assert_eq!(
                Some("99".to_string()),
                joined[0].user.as_ref().map(|user| user.id.clone())
            );
            Ok(())
        })
        .unwrap();
}

#[test]
fn many_to_many_like_products_in_both_directions() {
    let store = store();

    store
        .run(|executor| {
            let mut user = User::new("1", "rahasia", "Eko");
            user.like_products = vec![Product::new("P1", "Contoh 1", 1000), Product::new("P2", "Contoh 2", 2000)];
            executor.create(&user)?;
            let mut other = User::new("2", "rahasia", "Budi");
            other.like_products = vec![Product::new("P1", "Contoh 1", 1000)];
            executor.create(&other)?;

            let liked = executor.find::<User>(&users().preload("LikeProducts"))?;
            assert_eq!(
                vec![2, 1],
                liked.iter().map(|user| user.like_products.len()).collect::<Vec<_>>()
            );

            let product = executor
                .first::<Product>(&products().preload("LikeByUsers").filter("products.id = ?*", vec![value::text("P1")]))?
                .expect("the product should exist");
            assert_eq!(vec!["1", "2"], ids(&product.like_by_users));
            assert_eq!(2, executor.count(&products())?);
            Ok(())
        })
        .unwrap();
}

#[test]
fn association_find_append_replace_delete_and_clear() {
    let store = store();

    store
        .run(|executor| {
            let user = executor.create(&User::new("1", "rahasia", "Eko"))?;
            let first = Product::new("P1", "Contoh 1", 1000);
            let second = Product::new("P2", "Contoh 2", 2000);
            let third = Product::new("P3", "Contoh 3", 3000);

            let mut like_products = executor.association(&user, "LikeProducts")?;
            like_products.append_entities(&[first.clone(), second.clone()])?;
            assert_eq!(2, like_products.count()?);
            assert_eq!(
                vec!["P1", "P2"],
                like_products
                    .find::<Product>()?
                    .iter()
                    .map(|product| product.id.as_str())
                    .collect::<Vec<_>>()
            );
            let cheap = like_products.find_with(|query| {
                query.filter("products.price < ?*", vec![value::integer(1500)])
            })?;
            assert_eq!(1, cheap.len());

            like_products.replace_entities(&[third.clone()])?;
            assert_eq!(vec!["P3"], like_products.find::<Product>()?.into_iter().map(|p| p.id).collect::<Vec<_>>());

            like_products.append_entities(&[first.clone()])?;
            assert_eq!(1, like_products.delete_entities(&[third])?);
            assert_eq!(1, like_products.count()?);

            assert_eq!(1, like_products.clear()?);
            assert_eq!(0, like_products.count()?);
            let links = executor.raw_query(
                "select count(*) as links from user_like_product where user_id = ?",
                &[value::text("1")],
            )?;
            assert_eq!(0, links[0].integer("links")?);
            assert_eq!(3, executor.count(&products())?);
            Ok(())
        })
        .unwrap();
}

#[test]
fn duplicate_links_are_constraint_violations() {
    let store = store();

    store
        .run(|executor| {
            let user = executor.create(&User::new("1", "rahasia", "Eko"))?;
            let product = Product::new("P1", "Contoh 1", 1000);
            let mut like_products = executor.association(&user, "LikeProducts")?;
            like_products.append_entities(&[product.clone()])?;

            let error = like_products
                .append_entities(&[product])
                .expect_err("linking twice should fail");

            assert!(matches!(
                error.downcast_ref::<DataAccessError>(),
                Some(DataAccessError::ConstraintViolation(_))
            ));
            assert_eq!(1, like_products.count()?);
            Ok(())
        })
        .unwrap();
}

#[test]
fn has_many_and_has_one_association_mutations() {
    let store = store();

    store
        .run(|executor| {
            let user = executor.create(&user_with_wallet("1", 100))?;

            let mut addresses = executor.association(&user, "Addresses")?;
            let appended = addresses.append_entities(&[Address::new("", "Jalan A"), Address::new("", "Jalan B")])?;
            assert!(appended.iter().all(|address: &Address| address.user_id == "1"));
            assert_eq!(2, addresses.count()?);
            assert_eq!(2, addresses.clear()?);
            assert_eq!(0, addresses.count()?);
            assert_eq!(2, executor.count(&QueryBuilder::for_entity::<Address>())?);

            let mut wallet = executor.association(&user, "Wallet")?;
            wallet.replace_entities(&[Wallet::new("W-new", "", 500)])?;
            let owned = wallet.find::<Wallet>()?;
            assert_eq!(vec!["W-new"], owned.iter().map(|w| w.id.as_str()).collect::<Vec<_>>());
            let previous = executor
                .first::<Wallet>(&wallets().filter("wallets.id = ?*", vec![value::text("W1")]))?
                .expect("the previous wallet should be kept");
            assert_eq!("", previous.user_id);
            Ok(())
        })
        .unwrap();
}

#[test]
fn belongs_to_association_sets_the_owner_key() {
    let store = store();

    store
        .run(|executor| {
            seed_users(executor, 2)?;
            let mut address = executor.create(&Address::new("1", "Jalan A"))?;

            let mut owner = executor.association(&address, "User")?;
            owner.append_entities(&[User::new("2", "rahasia", "User 2")])?;

            address = executor
                .first::<Address>(&QueryBuilder::for_entity::<Address>())?
                .expect("the address should exist");
            assert_eq!("2", address.user_id);
            Ok(())
        })
        .unwrap();
}

#[test]
fn association_of_an_unsaved_owner_is_stale() {
    let store = store();

    store
        .run(|executor| {
            let error = executor
                .association(&User::new("", "rahasia", "Unsaved"), "Addresses")?
                .count()
                .expect_err("an owner without key can not be resolved");

            assert!(matches!(
                error.downcast_ref::<DataAccessError>(),
                Some(DataAccessError::StaleAssociation { .. })
            ));
            Ok(())
        })
        .unwrap();
}

#[test]
fn conditional_nested_and_full_preloads() {
    let store = store();

    store
        .run(|executor| {
            let mut user = user_with_wallet("1", 750);
            user.addresses = vec![Address::new("", "Jalan A"), Address::new("", "Jalan B")];
            user.like_products = vec![Product::new("P1", "Contoh 1", 1000)];
            executor.create(&user)?;

            let filtered = executor
                .first::<User>(&users().preload_where(
                    "Addresses",
                    WhereCondition::new("addresses.address = ?*", vec![value::text("Jalan B")]),
                ))?
                .expect("the user should exist");
            assert_eq!(
                vec!["Jalan B"],
                filtered.addresses.iter().map(|a| a.address.as_str()).collect::<Vec<_>>()
            );

            let nested = executor
                .first::<Wallet>(&wallets().preload("User.Addresses"))?
                .expect("the wallet should exist");
            let owner = nested.user.expect("the owner should be preloaded");
            assert_eq!(2, owner.addresses.len());

            let everything = executor
                .first::<User>(&users().preload_all())?
                .expect("the user should exist");
            assert_eq!(Some(750), everything.wallet.map(|wallet| wallet.balance));
            assert_eq!(2, everything.addresses.len());
            assert_eq!(1, everything.like_products.len());
            Ok(())
        })
        .unwrap();
}
