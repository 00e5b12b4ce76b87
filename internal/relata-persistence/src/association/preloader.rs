use std::collections::{BTreeMap, BTreeSet};

use slog::debug;

use crate::database::Executor;
use crate::mapper::{Record, Related, RowMapper, key_of};
use crate::query::{PreloadDirective, QueryBuilder};
use crate::schema::{EntityDescriptor, RelationshipDescriptor};
use crate::sqlite::WhereCondition;
use crate::{DataAccessError, StdResult};

/// Column carrying the owner key of the join table rows when preloading many-to-many targets
const OWNER_KEY_COLUMN: &str = "__owner_key";

/// Alias of the join table when preloading many-to-many targets
const LINK_ALIAS: &str = "preload_link";

/// Relationships to load for one level of the records tree
struct PreloadLevel {
    name: String,
    condition: Option<WhereCondition>,
    children: Vec<PreloadDirective>,
}

/// Eager load the relationships requested by the query on the found records.
///
/// Each level of each requested path costs one query whatever the number of
/// records. Relations already hydrated by a join are kept as they are.
pub(crate) fn preload(
    executor: &Executor<'_>,
    descriptor: &EntityDescriptor,
    records: &mut [Record],
    query: &QueryBuilder,
) -> StdResult<()> {
    let mut directives = query.preloads().to_vec();
    if query.is_preloading_all() {
        for relationship in descriptor.relationships() {
            if !directives
                .iter()
                .any(|directive| directive.path() == relationship.name())
            {
                directives.push(PreloadDirective::new(relationship.name(), None));
            }
        }
    }
    if directives.is_empty() || records.is_empty() {
        return Ok(());
    }

    let unscoped = query.is_unscoped() || !executor.is_scoped();
    preload_level(
        executor,
        descriptor,
        records.iter_mut().collect(),
        &directives,
        unscoped,
    )
}

fn preload_level(
    executor: &Executor<'_>,
    descriptor: &EntityDescriptor,
    mut owners: Vec<&mut Record>,
    directives: &[PreloadDirective],
    unscoped: bool,
) -> StdResult<()> {
    let mut levels: Vec<PreloadLevel> = Vec::new();
    for directive in directives {
        let (name, rest) = directive.split_first();
        let position = match levels.iter().position(|level| level.name == name) {
            Some(position) => position,
            None => {
                levels.push(PreloadLevel {
                    name: name.to_string(),
                    condition: None,
                    children: Vec::new(),
                });
                levels.len() - 1
            }
        };
        match rest {
            Some(rest) => levels[position].children.push(rest),
            None => levels[position].condition = directive.condition().cloned(),
        }
    }

    for level in levels {
        let (relationship, target) = executor
            .registry()
            .relationship(descriptor.kind(), &level.name)?;
        load_relation(
            executor,
            descriptor,
            &relationship,
            &target,
            &mut owners,
            level.condition,
            unscoped,
        )?;
        if level.children.is_empty() {
            continue;
        }

        let children: Vec<&mut Record> = owners
            .iter_mut()
            .filter_map(|owner| owner.relation_mut(&level.name))
            .flat_map(|related| related.records_mut())
            .collect();
        if !children.is_empty() {
            preload_level(executor, &target, children, &level.children, unscoped)?;
        }
    }

    Ok(())
}

fn load_relation(
    executor: &Executor<'_>,
    owner_descriptor: &EntityDescriptor,
    relationship: &RelationshipDescriptor,
    target: &EntityDescriptor,
    owners: &mut [&mut Record],
    condition: Option<WhereCondition>,
    unscoped: bool,
) -> StdResult<()> {
    let name = relationship.name();
    let owner_key = owner_descriptor
        .field_by_column(relationship.owner_key())
        .ok_or_else(|| DataAccessError::InvalidDescriptor {
            kind: owner_descriptor.kind().to_string(),
            reason: format!("key column '{}' is not mapped", relationship.owner_key()),
        })?
        .path()
        .to_string();

    let mut seen = BTreeSet::new();
    let mut keys = Vec::new();
    for owner in owners.iter().filter(|owner| !owner.has_relation(name)) {
        if let Some(value) = owner.values().get(&owner_key) {
            if key_of(value).is_some_and(|key| seen.insert(key)) {
                keys.push(value.clone());
            }
        }
    }

    let mut targets: BTreeMap<String, Vec<Record>> = BTreeMap::new();
    if !keys.is_empty() {
        debug!(
            executor.logger(), "Preloading relationship";
            "kind" => owner_descriptor.kind(), "relationship" => name, "keys" => keys.len()
        );
        for (key, record) in fetch_targets(executor, relationship, target, keys, condition, unscoped)? {
            targets.entry(key).or_default().push(record);
        }
    }

    for owner in owners.iter_mut().filter(|owner| !owner.has_relation(name)) {
        let records = owner
            .values()
            .get(&owner_key)
            .and_then(key_of)
            .and_then(|key| targets.get(&key))
            .cloned()
            .unwrap_or_default();
        let related = if relationship.kind().is_collection() {
            Related::Many(records)
        } else {
            Related::One(records.into_iter().next().map(Box::new))
        };
        owner.set_relation(name, related);
    }

    Ok(())
}

/// Targets of the owner keys, each with the owner key it belongs to.
fn fetch_targets(
    executor: &Executor<'_>,
    relationship: &RelationshipDescriptor,
    target: &EntityDescriptor,
    keys: Vec<sqlite::Value>,
    condition: Option<WhereCondition>,
    unscoped: bool,
) -> StdResult<Vec<(String, Record)>> {
    let target_table = target.table();
    let target_key = relationship.target_key();
    let mut query = QueryBuilder::new(target.kind());
    if unscoped {
        query = query.unscoped();
    }
    query = match relationship.join_table() {
        Some(join_table) => query
            .join_raw(
                &format!(
                    "inner join {} as {LINK_ALIAS} on {LINK_ALIAS}.{} = {target_table}.{target_key}",
                    join_table.table(),
                    join_table.target_column()
                ),
                Vec::new(),
            )
            .where_in(
                &format!("{LINK_ALIAS}.{}", join_table.owner_column()),
                keys,
            )
            .project_also(&format!(
                "{LINK_ALIAS}.{} as {OWNER_KEY_COLUMN}",
                join_table.owner_column()
            )),
        None => query.where_in(&format!("{target_table}.{target_key}"), keys),
    };
    if let Some(condition) = condition {
        query = query.where_condition(condition);
    }
    let compiled = query.compile(executor.registry(), executor.dialect())?;

    let mut targets = Vec::new();
    for mut row in executor.fetch(&compiled.statement)? {
        let key = match relationship.join_table() {
            Some(_) => row.take(OWNER_KEY_COLUMN),
            None => row.get(target_key).cloned(),
        };
        let record = RowMapper::to_entity(&row, target).map_err(DataAccessError::from)?;
        if let Some(key) = key.as_ref().and_then(key_of) {
            targets.push((key, record));
        }
    }

    Ok(targets)
}

#[cfg(test)]
mod tests {
    use crate::mapper::{Entity, FieldValues, Record, Related, ValueReader, value};
    use crate::query::QueryBuilder;
    use crate::sqlite::WhereCondition;
    use crate::test_helper::{self, Author, Book};

    fn tag(label: &str) -> Record {
        Record::new(
            FieldValues::new()
                .with("label", value::text(label))
                .with("colour", value::text("blue")),
        )
    }

    fn author_with_tags(name: &str, labels: &[&str]) -> Record {
        Author::new(name)
            .to_record()
            .with_relation("Tags", Related::Many(labels.iter().map(|label| tag(label)).collect()))
    }

    #[test]
    fn preloading_a_collection_costs_one_query_per_level() {
        let (context, logs) = test_helper::context_with_logs();
        context
            .run(|executor| {
                for name in ["Ann", "Bob", "Cid"] {
                    executor.create(
                        &Author::new(name)
                            .with_books(vec![Book::new("First", 100), Book::new("Second", 200)]),
                    )?;
                }
                logs.clear();

                let authors: Vec<Author> =
                    executor.find(&QueryBuilder::for_entity::<Author>().preload("Books"))?;

                assert_eq!(2, logs.count_matching(&["Executing statement"]));
                assert_eq!(
                    vec![2, 2, 2],
                    authors.iter().map(|author| author.books.len()).collect::<Vec<_>>()
                );
                assert!(authors.iter().all(|author| {
                    author
                        .books
                        .iter()
                        .all(|book| book.author_id == Some(author.id))
                }));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn owners_without_targets_get_an_empty_relation() {
        let context = test_helper::context();
        context
            .run(|executor| {
                executor.create(&Author::new("Lonely"))?;

                let records = executor
                    .find_records(&QueryBuilder::for_entity::<Author>().preload("Books").preload("Profile"))?;

                assert_eq!(Some(&Related::Many(Vec::new())), records[0].relation("Books"));
                assert_eq!(Some(&Related::One(None)), records[0].relation("Profile"));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn nested_paths_are_loaded_level_by_level() {
        let (context, logs) = test_helper::context_with_logs();
        context
            .run(|executor| {
                executor.create(&Author::new("Ann").with_books(vec![Book::new("First", 100)]))?;
                logs.clear();

                let books = executor.find_records(
                    &QueryBuilder::for_entity::<Book>().preload("Author.Books"),
                )?;

                assert_eq!(3, logs.count_matching(&["Executing statement"]));
                let author = books[0].one("Author").expect("author should be preloaded");
                assert_eq!("Ann", author.values().string("name")?);
                assert_eq!(1, author.many("Books").len());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn many_to_many_targets_are_loaded_through_the_join_table() {
        let context = test_helper::context();
        context
            .run(|executor| {
                executor.create_record("Author", author_with_tags("Ann", &["go", "rust"]))?;
                executor.create_record("Author", author_with_tags("Bob", &["rust"]))?;

                let authors = executor.find_records(
                    &QueryBuilder::for_entity::<Author>().preload("Tags"),
                )?;

                let labels = |record: &Record| {
                    record
                        .many("Tags")
                        .iter()
                        .map(|tag| tag.values().string("label"))
                        .collect::<Result<Vec<_>, _>>()
                };
                assert_eq!(vec!["go", "rust"], labels(&authors[0])?);
                assert_eq!(vec!["rust"], labels(&authors[1])?);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn conditional_preload_filters_the_targets_only() {
        let context = test_helper::context();
        context
            .run(|executor| {
                executor.create(
                    &Author::new("Ann")
                        .with_books(vec![Book::new("Short", 80), Book::new("Long", 900)]),
                )?;

                let authors: Vec<Author> = executor.find(
                    &QueryBuilder::for_entity::<Author>().preload_where(
                        "Books",
                        WhereCondition::new("books.pages > ?*", vec![value::integer(500)]),
                    ),
                )?;

                assert_eq!(1, authors.len());
                assert_eq!(
                    vec!["Long".to_string()],
                    authors[0].books.iter().map(|book| book.title.clone()).collect::<Vec<_>>()
                );
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn joined_relation_is_not_loaded_twice() {
        let (context, logs) = test_helper::context_with_logs();
        context
            .run(|executor| {
                executor.create(&Author::new("Ann").with_books(vec![Book::new("First", 100)]))?;
                logs.clear();

                let books = executor.find_records(
                    &QueryBuilder::for_entity::<Book>()
                        .join("Author")
                        .preload("Author"),
                )?;

                assert_eq!(1, logs.count_matching(&["Executing statement"]));
                let author = books[0].one("Author").expect("author should be joined");
                assert_eq!("Ann", author.values().string("name")?);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn preload_all_loads_every_direct_relationship() {
        let context = test_helper::context();
        context
            .run(|executor| {
                executor.create_record(
                    "Author",
                    author_with_tags("Ann", &["rust"])
                        .with_relation("Books", Related::Many(vec![Book::new("First", 100).to_record()])),
                )?;

                let authors =
                    executor.find_records(&QueryBuilder::for_entity::<Author>().preload_all())?;

                assert_eq!(
                    vec!["Books", "Profile", "Tags"],
                    authors[0].relation_names()
                );
                assert_eq!(1, authors[0].many("Books").len());
                assert_eq!(1, authors[0].many("Tags").len());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn soft_deleted_targets_are_not_preloaded_unless_unscoped() {
        let context = test_helper::context();
        context
            .run(|executor| {
                let author =
                    executor.create(&Author::new("Gone").with_books(vec![Book::new("First", 100)]))?;
                executor.delete(&author)?;

                let books = executor.find_records(&QueryBuilder::for_entity::<Book>().preload("Author"))?;
                assert_eq!(Some(&Related::One(None)), books[0].relation("Author"));

                let books = executor.find_records(
                    &QueryBuilder::for_entity::<Book>().preload("Author").unscoped(),
                )?;
                assert!(books[0].one("Author").is_some());
                Ok(())
            })
            .unwrap();
    }
}
