use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use slog::{Logger, debug};
use sqlite::Value;

use crate::association::{Association, preloader};
use crate::logging::LoggerExtensions;
use crate::mapper::{
    ColumnValues, Entity, FieldValues, FromColumns, Record, Related, RowMapper, RowOperation,
    is_unset_key, value,
};
use crate::query::QueryBuilder;
use crate::schema::{
    EntityDescriptor, HookStage, RelationshipDescriptor, RelationshipKind, SchemaRegistry,
};
use crate::sqlite::{
    ConnectionExtensions, Savepoint, SqlDialect, SqlStatement, SqliteConnection, WhereCondition,
};
use crate::{DataAccessError, StdResult};

/// How a record reaches its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteMode {
    /// Plain insert
    Insert,
    /// Insert, or update every column when the primary key exists
    Upsert,
    /// Update by primary key, insert when no row matched
    Save,
}

/// Outcome of a batch insert.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedBatch<E> {
    /// Number of inserted rows
    pub affected_rows: usize,
    /// Inserted entities, as stored
    pub entities: Vec<E>,
}

type RelationToSave = (RelationshipDescriptor, Arc<EntityDescriptor>, Related);

/// Runs the CRUD operations of the data-access layer on a connection.
///
/// Operations made of several statements run inside a savepoint, they are
/// atomic whether a unit of work is open or not.
#[derive(Clone)]
pub struct Executor<'a> {
    connection: &'a SqliteConnection,
    registry: &'a SchemaRegistry,
    dialect: &'a dyn SqlDialect,
    logger: Logger,
    scoped: bool,
    save_associations: bool,
}

impl<'a> Executor<'a> {
    /// Executor working on the given connection
    pub fn new(
        connection: &'a SqliteConnection,
        registry: &'a SchemaRegistry,
        dialect: &'a dyn SqlDialect,
        logger: &Logger,
    ) -> Self {
        Self {
            connection,
            registry,
            dialect,
            logger: logger.new_with_component_name::<Self>(),
            scoped: true,
            save_associations: true,
        }
    }

    /// Executor that includes soft-deleted rows and deletes physically.
    pub fn unscoped(&self) -> Self {
        Self {
            scoped: false,
            ..self.clone()
        }
    }

    /// Executor that ignores the related records of the written entities.
    pub fn omit_associations(&self) -> Self {
        Self {
            save_associations: false,
            ..self.clone()
        }
    }

    /// Return true if soft-deleted rows are excluded.
    pub fn is_scoped(&self) -> bool {
        self.scoped
    }

    /// Schema registry
    pub fn registry(&self) -> &'a SchemaRegistry {
        self.registry
    }

    /// Dialect statements are rendered for
    pub fn dialect(&self) -> &'a dyn SqlDialect {
        self.dialect
    }

    /// Underlying connection
    pub fn connection(&self) -> &'a SqliteConnection {
        self.connection
    }

    /// Logger of the executor
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Run a raw statement, returns the number of changed rows.
    pub fn raw_execute(&self, sql: &str, parameters: &[Value]) -> StdResult<usize> {
        self.apply(&SqlStatement::new(sql, parameters.to_vec()))
    }

    /// Run a raw query.
    pub fn raw_query(&self, sql: &str, parameters: &[Value]) -> StdResult<Vec<ColumnValues>> {
        self.fetch(&SqlStatement::new(sql, parameters.to_vec()))
    }

    /// Insert an entity and its related records, returns it as stored.
    pub fn create<E: Entity>(&self, entity: &E) -> StdResult<E> {
        let created = self.create_record(E::KIND, entity.to_record())?;

        Ok(E::from_record(&created).map_err(DataAccessError::from)?)
    }

    /// Insert a record of the given kind.
    pub fn create_record(&self, kind: &str, record: Record) -> StdResult<Record> {
        let descriptor = self.registry.lookup(kind)?;

        self.atomically(|| self.write_record(&descriptor, record, WriteMode::Insert))
    }

    /// Insert entities with a single statement.
    pub fn create_many<E: Entity>(&self, entities: &[E]) -> StdResult<CreatedBatch<E>> {
        let descriptor = self.registry.lookup(E::KIND)?;
        let records = entities.iter().map(Entity::to_record).collect();
        let created = self.atomically(|| self.write_batch(&descriptor, records))?;

        Ok(CreatedBatch {
            affected_rows: created.len(),
            entities: created
                .iter()
                .map(E::from_record)
                .collect::<Result<_, _>>()
                .map_err(DataAccessError::from)?,
        })
    }

    /// Insert the entity when its key is unset or matches no row, update it otherwise.
    pub fn save<E: Entity>(&self, entity: &E) -> StdResult<E> {
        let saved = self.save_record(E::KIND, entity.to_record())?;

        Ok(E::from_record(&saved).map_err(DataAccessError::from)?)
    }

    /// Save a record of the given kind, see [save][Self::save].
    pub fn save_record(&self, kind: &str, record: Record) -> StdResult<Record> {
        let descriptor = self.registry.lookup(kind)?;
        let mode = if Self::has_unset_key(&descriptor, record.values()) {
            WriteMode::Insert
        } else {
            WriteMode::Save
        };

        self.atomically(|| self.write_record(&descriptor, record, mode))
    }

    /// Insert the entity, or update all its columns when its primary key exists.
    pub fn upsert<E: Entity>(&self, entity: &E) -> StdResult<E> {
        let descriptor = self.registry.lookup(E::KIND)?;
        let upserted = self
            .atomically(|| self.write_record(&descriptor, entity.to_record(), WriteMode::Upsert))?;

        Ok(E::from_record(&upserted).map_err(DataAccessError::from)?)
    }

    /// Update the given fields of the rows selected by the query, returns the
    /// number of updated rows.
    pub fn update_columns(&self, query: &QueryBuilder, changes: &FieldValues) -> StdResult<usize> {
        let descriptor = self.registry.lookup(query.kind())?;
        let filter = self.scope_query(query).mutation_filter(self.registry)?;
        if !filter.has_predicates {
            return Err(DataAccessError::InvalidQuery(format!(
                "update of '{}' without conditions",
                descriptor.kind()
            ))
            .into());
        }

        let mut changes = changes.clone();
        descriptor
            .hooks()
            .run(HookStage::BeforeUpdate, &mut changes)?;
        let row = RowMapper::to_changes(&changes, &descriptor, Utc::now())
            .map_err(DataAccessError::from)?;
        if row.is_empty() {
            return Err(DataAccessError::InvalidQuery(format!(
                "update of '{}' without columns",
                descriptor.kind()
            ))
            .into());
        }

        let assignments = row
            .columns()
            .iter()
            .map(|column| format!("{column} = ?*"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut parameters = row.values();
        parameters.extend(filter.parameters);
        let sql = format!(
            "update {} set {assignments}{}",
            descriptor.table(),
            where_sql(filter.clause)
        );
        let updated = self.apply(&SqlStatement::from_raw(&sql, parameters, self.dialect))?;
        descriptor
            .hooks()
            .run(HookStage::AfterUpdate, &mut changes)?;

        Ok(updated)
    }

    /// Update the given fields of an entity.
    pub fn update_fields<E: Entity>(&self, entity: &E, changes: &FieldValues) -> StdResult<usize> {
        let descriptor = self.registry.lookup(E::KIND)?;
        let query = Self::primary_key_query(&descriptor, entity.to_record().values())?;

        self.update_columns(&query, changes)
    }

    /// Delete an entity: soft delete when its descriptor has a marker and this
    /// executor is scoped, physical delete otherwise.
    pub fn delete<E: Entity>(&self, entity: &E) -> StdResult<usize> {
        self.delete_record(E::KIND, &entity.to_record())
    }

    /// Delete a record of the given kind, see [delete][Self::delete].
    pub fn delete_record(&self, kind: &str, record: &Record) -> StdResult<usize> {
        let descriptor = self.registry.lookup(kind)?;
        let query = Self::primary_key_query(&descriptor, record.values())?;
        let mut values = record.values().clone();

        self.atomically(|| {
            descriptor.hooks().run(HookStage::BeforeDelete, &mut values)?;
            let deleted = self.delete_matching(&descriptor, &query)?;
            descriptor.hooks().run(HookStage::AfterDelete, &mut values)?;

            Ok(deleted)
        })
    }

    /// Delete the rows selected by the query, see [delete][Self::delete].
    pub fn delete_where(&self, query: &QueryBuilder) -> StdResult<usize> {
        let descriptor = self.registry.lookup(query.kind())?;

        self.delete_matching(&descriptor, query)
    }

    /// Entities selected by the query, with their joined and preloaded relations.
    pub fn find<E: Entity>(&self, query: &QueryBuilder) -> StdResult<Vec<E>> {
        self.find_records(query)?
            .iter()
            .map(|record| E::from_record(record).map_err(|e| DataAccessError::from(e).into()))
            .collect()
    }

    /// Records selected by the query, with their joined and preloaded relations.
    pub fn find_records(&self, query: &QueryBuilder) -> StdResult<Vec<Record>> {
        let descriptor = self.registry.lookup(query.kind())?;
        let query = self.scope_query(query);
        let compiled = query.compile(self.registry, self.dialect)?;

        let mut records = Vec::new();
        for mut row in self.fetch(&compiled.statement)? {
            let mut joined = Vec::with_capacity(compiled.single_joins.len());
            for name in &compiled.single_joins {
                let (_, target) = self.registry.relationship(descriptor.kind(), name)?;
                let columns = row.take_prefixed(&format!("{name}__"));
                let related =
                    RowMapper::to_joined_entity(&columns, &target).map_err(DataAccessError::from)?;
                joined.push((name, Related::One(related.map(Box::new))));
            }
            let mut record = RowMapper::to_entity(&row, &descriptor).map_err(DataAccessError::from)?;
            for (name, related) in joined {
                record.set_relation(name, related);
            }
            records.push(record);
        }
        preloader::preload(self, &descriptor, &mut records, &query)?;

        Ok(records)
    }

    /// First entity by ascending primary key.
    pub fn first<E: Entity>(&self, query: &QueryBuilder) -> StdResult<Option<E>> {
        let descriptor = self.registry.lookup(query.kind())?;
        let query = Self::order_by_primary_key(query.clone(), &descriptor, "asc").limit(1);

        Ok(self.find(&query)?.into_iter().next())
    }

    /// Last entity by ascending primary key.
    pub fn last<E: Entity>(&self, query: &QueryBuilder) -> StdResult<Option<E>> {
        let descriptor = self.registry.lookup(query.kind())?;
        let query = Self::order_by_primary_key(query.clone(), &descriptor, "desc").limit(1);

        Ok(self.find(&query)?.into_iter().next())
    }

    /// Any entity selected by the query.
    pub fn take<E: Entity>(&self, query: &QueryBuilder) -> StdResult<Option<E>> {
        Ok(self.find(&query.clone().limit(1))?.into_iter().next())
    }

    /// Number of rows the query selects.
    pub fn count(&self, query: &QueryBuilder) -> StdResult<i64> {
        let statement = self
            .scope_query(query)
            .build_count(self.registry, self.dialect)?;
        self.log_statement(&statement);

        self.connection
            .query_single_cell(statement.sql(), statement.parameters())
    }

    /// Raw rows selected by the query.
    pub fn fetch_rows(&self, query: &QueryBuilder) -> StdResult<Vec<ColumnValues>> {
        let compiled = self
            .scope_query(query)
            .compile(self.registry, self.dialect)?;

        self.fetch(&compiled.statement)
    }

    /// Rows selected by the query, read as `T`.
    pub fn fetch_as<T: FromColumns>(&self, query: &QueryBuilder) -> StdResult<Vec<T>> {
        self.fetch_rows(query)?
            .iter()
            .map(|row| T::from_columns(row).map_err(|e| DataAccessError::from(e).into()))
            .collect()
    }

    /// First row selected by the query, read as `T`.
    pub fn fetch_one_as<T: FromColumns>(&self, query: &QueryBuilder) -> StdResult<Option<T>> {
        Ok(self
            .fetch_as(&query.clone().limit(1))?
            .into_iter()
            .next())
    }

    /// Association `name` of the owner entity.
    pub fn association<E: Entity>(&self, owner: &E, name: &str) -> StdResult<Association<'a>> {
        self.association_of(E::KIND, owner.to_record(), name)
    }

    /// Association `name` of an owner record of the given kind.
    pub fn association_of(
        &self,
        kind: &str,
        owner: Record,
        name: &str,
    ) -> StdResult<Association<'a>> {
        Association::new(self.clone(), kind, owner, name)
    }

    /// Run the operation inside a savepoint, released on success and rolled back on failure.
    pub(crate) fn atomically<T>(&self, operation: impl FnOnce() -> StdResult<T>) -> StdResult<T> {
        if !self.dialect.supports_savepoints() {
            return operation();
        }

        let savepoint = Savepoint::open(self.connection, &self.logger)?;
        match operation() {
            Ok(value) => {
                savepoint.release()?;
                Ok(value)
            }
            Err(error) => match savepoint.rollback() {
                Ok(()) => Err(error),
                Err(rollback_error) => {
                    Err(error.context(format!("Savepoint rollback failed: {rollback_error:?}")))
                }
            },
        }
    }

    pub(crate) fn apply(&self, statement: &SqlStatement) -> StdResult<usize> {
        self.log_statement(statement);
        self.connection.apply(statement)
    }

    pub(crate) fn fetch(&self, statement: &SqlStatement) -> StdResult<Vec<ColumnValues>> {
        self.log_statement(statement);
        self.connection.fetch_rows(statement)
    }

    fn log_statement(&self, statement: &SqlStatement) {
        debug!(self.logger, "Executing statement"; "sql" => %statement, "parameters" => statement.parameters().len());
    }

    /// Write a record with its related records: belongs-to targets before it,
    /// the others after it.
    pub(crate) fn write_record(
        &self,
        descriptor: &EntityDescriptor,
        mut record: Record,
        mode: WriteMode,
    ) -> StdResult<Record> {
        let (parents, dependents) = self.split_relations(descriptor, record.take_relations())?;
        let saved_parents = self.save_parents(descriptor, &mut record, parents)?;

        let mut written = match mode {
            WriteMode::Insert => self.insert_one(descriptor, record, false)?,
            WriteMode::Upsert => self.insert_one(descriptor, record, true)?,
            WriteMode::Save => self.update_or_insert(descriptor, record)?,
        };
        for (name, related) in saved_parents {
            written.set_relation(&name, related);
        }
        self.save_dependents(descriptor, &mut written, dependents)?;

        Ok(written)
    }

    fn write_batch(
        &self,
        descriptor: &EntityDescriptor,
        records: Vec<Record>,
    ) -> StdResult<Vec<Record>> {
        let mut prepared = Vec::with_capacity(records.len());
        let mut pending = Vec::with_capacity(records.len());
        for mut record in records {
            let (parents, dependents) = self.split_relations(descriptor, record.take_relations())?;
            let saved_parents = self.save_parents(descriptor, &mut record, parents)?;
            prepared.push(record);
            pending.push((saved_parents, dependents));
        }

        // Returned rows follow the order of the inserted values
        let mut created = self.insert_rows(descriptor, prepared, false)?;
        for (record, (saved_parents, dependents)) in created.iter_mut().zip(pending) {
            for (name, related) in saved_parents {
                record.set_relation(&name, related);
            }
            self.save_dependents(descriptor, record, dependents)?;
        }

        Ok(created)
    }

    fn split_relations(
        &self,
        descriptor: &EntityDescriptor,
        relations: BTreeMap<String, Related>,
    ) -> StdResult<(Vec<RelationToSave>, Vec<RelationToSave>)> {
        let mut parents = Vec::new();
        let mut dependents = Vec::new();
        if !self.save_associations {
            return Ok((parents, dependents));
        }

        for (name, related) in relations {
            let (relationship, target) = self.registry.relationship(descriptor.kind(), &name)?;
            if relationship.kind() == RelationshipKind::BelongsTo {
                parents.push((relationship, target, related));
            } else {
                dependents.push((relationship, target, related));
            }
        }

        Ok((parents, dependents))
    }

    fn save_parents(
        &self,
        descriptor: &EntityDescriptor,
        owner: &mut Record,
        parents: Vec<RelationToSave>,
    ) -> StdResult<Vec<(String, Related)>> {
        let mut saved = Vec::with_capacity(parents.len());
        for (relationship, target, related) in parents {
            let parent = match related {
                Related::One(Some(parent)) => *parent,
                Related::One(None) => {
                    saved.push((relationship.name().to_string(), Related::One(None)));
                    continue;
                }
                Related::Many(_) => {
                    return Err(DataAccessError::InvalidQuery(format!(
                        "belongs-to relationship '{}' holds a collection",
                        relationship.name()
                    ))
                    .into());
                }
            };
            let parent = self.write_record(&target, parent, WriteMode::Upsert)?;
            let key = Self::column_value(&target, parent.values(), relationship.target_key())?;
            let foreign_key = descriptor
                .field_by_column(relationship.owner_key())
                .ok_or_else(|| missing_key_column(descriptor, relationship.owner_key()))?;
            owner.values_mut().set(foreign_key.path(), key);
            saved.push((
                relationship.name().to_string(),
                Related::One(Some(Box::new(parent))),
            ));
        }

        Ok(saved)
    }

    fn save_dependents(
        &self,
        descriptor: &EntityDescriptor,
        owner: &mut Record,
        dependents: Vec<RelationToSave>,
    ) -> StdResult<()> {
        for (relationship, target, related) in dependents {
            let owner_key = Self::column_value(descriptor, owner.values(), relationship.owner_key())?;
            if matches!(owner_key, Value::Null) {
                return Err(DataAccessError::StaleAssociation {
                    kind: descriptor.kind().to_string(),
                    relationship: relationship.name().to_string(),
                }
                .into());
            }

            let saved = match relationship.kind() {
                RelationshipKind::ManyToMany => map_related(related, |record| {
                    let saved = self.write_record(&target, record, WriteMode::Upsert)?;
                    let target_key =
                        Self::column_value(&target, saved.values(), relationship.target_key())?;
                    self.link(&relationship, owner_key.clone(), target_key, true)?;
                    Ok(saved)
                })?,
                _ => {
                    let foreign_key = target
                        .field_by_column(relationship.target_key())
                        .map(|field| field.path().to_string())
                        .ok_or_else(|| missing_key_column(&target, relationship.target_key()))?;
                    map_related(related, |mut record| {
                        record.values_mut().set(&foreign_key, owner_key.clone());
                        self.write_record(&target, record, WriteMode::Upsert)
                    })?
                }
            };
            owner.set_relation(relationship.name(), saved);
        }

        Ok(())
    }

    /// Insert a join table row.
    pub(crate) fn link(
        &self,
        relationship: &RelationshipDescriptor,
        owner_key: Value,
        target_key: Value,
        ignore_existing: bool,
    ) -> StdResult<usize> {
        let join_table = relationship.join_table().ok_or_else(|| {
            DataAccessError::InvalidQuery(format!(
                "relationship '{}' has no join table",
                relationship.name()
            ))
        })?;
        let columns = [
            join_table.owner_column().to_string(),
            join_table.target_column().to_string(),
        ];
        let mut sql = format!(
            "insert into {} ({}) values (?*, ?*)",
            join_table.table(),
            columns.join(", ")
        );
        if ignore_existing {
            sql.push(' ');
            sql.push_str(&self.dialect.upsert_clause(&columns, &[]));
        }

        self.apply(&SqlStatement::from_raw(
            &sql,
            vec![owner_key, target_key],
            self.dialect,
        ))
    }

    fn insert_one(
        &self,
        descriptor: &EntityDescriptor,
        record: Record,
        upsert: bool,
    ) -> StdResult<Record> {
        self.insert_rows(descriptor, vec![record], upsert)?
            .pop()
            .ok_or_else(|| {
                DataAccessError::Statement(format!(
                    "insert into '{}' returned no row",
                    descriptor.table()
                ))
                .into()
            })
    }

    fn insert_rows(
        &self,
        descriptor: &EntityDescriptor,
        records: Vec<Record>,
        upsert: bool,
    ) -> StdResult<Vec<Record>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let mut rows = Vec::with_capacity(records.len());
        for mut record in records {
            descriptor
                .hooks()
                .run(HookStage::BeforeCreate, record.values_mut())?;
            rows.push(
                RowMapper::to_row(record.values(), descriptor, RowOperation::Insert, now)
                    .map_err(DataAccessError::from)?,
            );
        }

        let stored = if self.dialect.supports_returning() {
            let mut sql = self.insert_statement(descriptor, &rows, upsert);
            sql.push_str(&format!(" returning {}", Self::all_columns(descriptor)));
            let parameters = rows.iter().flat_map(ColumnValues::values).collect();

            self.fetch(&SqlStatement::from_raw(&sql, parameters, self.dialect))?
        } else {
            let mut stored = Vec::with_capacity(rows.len());
            for row in rows {
                let sql = self.insert_statement(descriptor, std::slice::from_ref(&row), upsert);
                self.apply(&SqlStatement::from_raw(&sql, row.values(), self.dialect))?;
                stored.push(self.select_inserted(descriptor, &row)?);
            }
            stored
        };

        stored
            .iter()
            .map(|row| {
                let mut record = RowMapper::to_entity(row, descriptor).map_err(DataAccessError::from)?;
                descriptor
                    .hooks()
                    .run(HookStage::AfterCreate, record.values_mut())?;
                Ok(record)
            })
            .collect()
    }

    fn insert_statement(&self, descriptor: &EntityDescriptor, rows: &[ColumnValues], upsert: bool) -> String {
        let columns = rows[0].columns().join(", ");
        let placeholders = format!("({})", vec!["?*"; rows[0].len()].join(", "));
        let mut sql = format!(
            "insert into {} ({columns}) values {}",
            descriptor.table(),
            vec![placeholders; rows.len()].join(", ")
        );
        if upsert {
            sql.push(' ');
            sql.push_str(&self.upsert_clause(descriptor));
        }

        sql
    }

    /// Read back a row inserted without `returning`, a generated key is read
    /// from the connection.
    fn select_inserted(&self, descriptor: &EntityDescriptor, row: &ColumnValues) -> StdResult<ColumnValues> {
        let mut pairs = Vec::new();
        for column in descriptor.primary_key_columns() {
            let key = match row.get(&column) {
                Some(key) if !is_unset_key(Some(key)) => key.clone(),
                _ if descriptor.is_auto_increment() => self.last_insert_id()?,
                _ => {
                    return Err(DataAccessError::InvalidQuery(format!(
                        "inserted '{}' row has no value for its key column '{column}'",
                        descriptor.kind()
                    ))
                    .into());
                }
            };
            pairs.push((format!("{}.{column}", descriptor.table()), key));
        }

        self.select_one(descriptor, WhereCondition::where_equals(&pairs))
    }

    fn last_insert_id(&self) -> StdResult<Value> {
        let sql = format!("select {} as id", self.dialect.last_insert_id_expression());

        self.fetch(&SqlStatement::from_raw(&sql, Vec::new(), self.dialect))?
            .first_mut()
            .and_then(|row| row.take("id"))
            .ok_or_else(|| DataAccessError::Statement("no generated key to read".to_string()).into())
    }

    fn select_one(&self, descriptor: &EntityDescriptor, condition: WhereCondition) -> StdResult<ColumnValues> {
        let (filter, parameters) = condition.into_raw();
        let sql = format!(
            "select {} from {} where {filter}",
            Self::all_columns(descriptor),
            descriptor.table()
        );

        self.fetch(&SqlStatement::from_raw(&sql, parameters, self.dialect))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                DataAccessError::Statement(format!("written '{}' row not found", descriptor.kind())).into()
            })
    }

    fn upsert_clause(&self, descriptor: &EntityDescriptor) -> String {
        let key_columns = descriptor.primary_key_columns();
        let mut update_columns: Vec<String> = descriptor
            .fields()
            .iter()
            .filter(|field| !descriptor.is_primary_key(field.path()) && !field.is_create_only())
            .map(|field| field.column().to_string())
            .collect();
        if update_columns.is_empty() {
            // The row is still returned when it already exists
            update_columns = key_columns.clone();
        }

        self.dialect.upsert_clause(&key_columns, &update_columns)
    }

    fn update_or_insert(&self, descriptor: &EntityDescriptor, mut record: Record) -> StdResult<Record> {
        descriptor
            .hooks()
            .run(HookStage::BeforeUpdate, record.values_mut())?;
        let row = RowMapper::to_row(record.values(), descriptor, RowOperation::Update, Utc::now())
            .map_err(DataAccessError::from)?;
        let key = Self::key_condition(descriptor, record.values())?;
        let filter = match descriptor.soft_delete_field() {
            Some(field) if self.scoped => key.clone().and_where(WhereCondition::new(
                &format!("{}.{} is null", descriptor.table(), field.column()),
                Vec::new(),
            )),
            _ => key.clone(),
        };

        let assignments = row
            .columns()
            .iter()
            .map(|column| format!("{column} = ?*"))
            .collect::<Vec<_>>()
            .join(", ");
        let (filter, filter_parameters) = filter.into_raw();
        let mut parameters = row.values();
        parameters.extend(filter_parameters);
        let sql = format!("update {} set {assignments} where {filter}", descriptor.table());
        let updated_rows = if self.dialect.supports_returning() {
            let sql = format!("{sql} returning {}", Self::all_columns(descriptor));
            self.fetch(&SqlStatement::from_raw(&sql, parameters, self.dialect))?
        } else {
            match self.apply(&SqlStatement::from_raw(&sql, parameters, self.dialect))? {
                0 => Vec::new(),
                _ => vec![self.select_one(descriptor, key)?],
            }
        };

        match updated_rows.first() {
            Some(row) => {
                let mut updated = RowMapper::to_entity(row, descriptor).map_err(DataAccessError::from)?;
                descriptor
                    .hooks()
                    .run(HookStage::AfterUpdate, updated.values_mut())?;
                Ok(updated)
            }
            None => {
                debug!(self.logger, "No row to update, upserting"; "kind" => descriptor.kind());
                self.insert_one(descriptor, record, true)
            }
        }
    }

    fn delete_matching(&self, descriptor: &EntityDescriptor, query: &QueryBuilder) -> StdResult<usize> {
        let filter = self.scope_query(query).mutation_filter(self.registry)?;
        if !filter.has_predicates {
            return Err(DataAccessError::InvalidQuery(format!(
                "delete of '{}' without conditions",
                descriptor.kind()
            ))
            .into());
        }

        let (sql, parameters) = match descriptor.soft_delete_field() {
            Some(field) if self.scoped => {
                let mut parameters = vec![value::timestamp(Utc::now())];
                parameters.extend(filter.parameters);
                (
                    format!(
                        "update {} set {} = ?*{}",
                        descriptor.table(),
                        field.column(),
                        where_sql(filter.clause)
                    ),
                    parameters,
                )
            }
            _ => (
                format!(
                    "delete from {}{}",
                    descriptor.table(),
                    where_sql(filter.clause)
                ),
                filter.parameters,
            ),
        };

        self.apply(&SqlStatement::from_raw(&sql, parameters, self.dialect))
    }

    fn scope_query(&self, query: &QueryBuilder) -> QueryBuilder {
        if self.scoped {
            query.clone()
        } else {
            query.clone().unscoped()
        }
    }

    fn order_by_primary_key(
        query: QueryBuilder,
        descriptor: &EntityDescriptor,
        direction: &str,
    ) -> QueryBuilder {
        descriptor
            .primary_key_columns()
            .iter()
            .fold(query, |query, column| {
                query.order_by(&format!("{}.{column} {direction}", descriptor.table()))
            })
    }

    fn all_columns(descriptor: &EntityDescriptor) -> String {
        descriptor
            .fields()
            .iter()
            .map(|field| field.column())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn has_unset_key(descriptor: &EntityDescriptor, values: &FieldValues) -> bool {
        descriptor
            .primary_key_fields()
            .iter()
            .any(|field| is_unset_key(values.get(field.path())))
    }

    /// Equality condition on the primary key of the values, with `?*` placeholders.
    pub(crate) fn key_condition(
        descriptor: &EntityDescriptor,
        values: &FieldValues,
    ) -> StdResult<WhereCondition> {
        let mut pairs = Vec::new();
        for field in descriptor.primary_key_fields() {
            match values.get(field.path()) {
                Some(value) if !is_unset_key(Some(value)) => pairs.push((
                    format!("{}.{}", descriptor.table(), field.column()),
                    value.clone(),
                )),
                _ => {
                    return Err(DataAccessError::InvalidQuery(format!(
                        "entity '{}' has no value for its primary key '{}'",
                        descriptor.kind(),
                        field.path()
                    ))
                    .into());
                }
            }
        }

        Ok(WhereCondition::where_equals(&pairs))
    }

    pub(crate) fn primary_key_query(descriptor: &EntityDescriptor, values: &FieldValues) -> StdResult<QueryBuilder> {
        Ok(QueryBuilder::new(descriptor.kind()).where_condition(Self::key_condition(descriptor, values)?))
    }

    /// Value of the field mapped to `column`, `NULL` when unset.
    pub(crate) fn column_value(
        descriptor: &EntityDescriptor,
        values: &FieldValues,
        column: &str,
    ) -> StdResult<Value> {
        let field = descriptor
            .field_by_column(column)
            .ok_or_else(|| missing_key_column(descriptor, column))?;

        Ok(values
            .get(field.path())
            .filter(|value| !is_unset_key(Some(value)))
            .cloned()
            .unwrap_or(Value::Null))
    }
}

fn where_sql(clause: Option<String>) -> String {
    clause
        .map(|clause| format!(" where {clause}"))
        .unwrap_or_default()
}

fn missing_key_column(descriptor: &EntityDescriptor, column: &str) -> DataAccessError {
    DataAccessError::InvalidDescriptor {
        kind: descriptor.kind().to_string(),
        reason: format!("key column '{column}' is not mapped"),
    }
}

fn map_related(
    related: Related,
    mut save: impl FnMut(Record) -> StdResult<Record>,
) -> StdResult<Related> {
    Ok(match related {
        Related::One(None) => Related::One(None),
        Related::One(Some(record)) => Related::One(Some(Box::new(save(*record)?))),
        Related::Many(records) => {
            Related::Many(records.into_iter().map(save).collect::<StdResult<_>>()?)
        }
    })
}
