use sqlite::Value;

use crate::mapper::{Entity, FieldValues, RowMapper};
use crate::schema::{EntityDescriptor, RelationshipKind, SchemaRegistry};
use crate::sqlite::{
    LockStrength, Projection, SOURCE_PLACEHOLDER, SourceAlias, SqlDialect, SqlStatement,
    WhereCondition,
};
use crate::{DataAccessError, MappingError, StdResult};

/// Reusable query transformer.
pub type Scope = fn(QueryBuilder) -> QueryBuilder;

#[derive(Debug, Clone)]
enum Predicate {
    And(WhereCondition),
    AndFields(FieldValues),
    Or(WhereCondition),
    Not(WhereCondition),
}

#[derive(Debug, Clone)]
enum JoinClause {
    Relationship(String),
    Raw {
        clause: String,
        parameters: Vec<Value>,
    },
}

/// Request to eager load a relationship, nested relationships are separated by dots
/// (`Books.Tags`).
#[derive(Debug, Clone)]
pub struct PreloadDirective {
    path: String,
    condition: Option<WhereCondition>,
}

impl PreloadDirective {
    /// Directive for the relationship path, `condition` filters the last relationship of the path.
    pub fn new(path: &str, condition: Option<WhereCondition>) -> Self {
        Self {
            path: path.to_string(),
            condition,
        }
    }

    /// Relationship path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Filter of the loaded targets
    pub fn condition(&self) -> Option<&WhereCondition> {
        self.condition.as_ref()
    }

    /// First relationship of the path, and the directive for the rest of the path.
    pub(crate) fn split_first(&self) -> (&str, Option<PreloadDirective>) {
        match self.path.split_once('.') {
            Some((first, rest)) => (first, Some(Self::new(rest, self.condition.clone()))),
            None => (&self.path, None),
        }
    }
}

/// Statement of a select with the single-valued relationships it joins.
pub(crate) struct CompiledQuery {
    pub(crate) statement: SqlStatement,
    /// Relationships whose columns are projected as `<name>__<column>`
    pub(crate) single_joins: Vec<String>,
}

/// Filter of an update or delete statement.
pub(crate) struct MutationFilter {
    /// `where` clause with `?*` placeholders, soft-delete scope included
    pub(crate) clause: Option<String>,
    pub(crate) parameters: Vec<Value>,
    /// Return true if the caller restricted the rows.
    pub(crate) has_predicates: bool,
}

#[derive(Default)]
struct Sources {
    clauses: Vec<String>,
    parameters: Vec<Value>,
    projection: Projection,
    single_joins: Vec<String>,
    collection_join: bool,
}

/// Query description of an entity kind.
///
/// Expressions use `?*` parameter markers, they are numbered with the dialect
/// placeholders when the query is built. Soft-deleted rows are excluded unless
/// the query is [unscoped][Self::unscoped].
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    kind: String,
    selection: Vec<String>,
    extra_projection: Vec<String>,
    distinct: bool,
    predicates: Vec<Predicate>,
    joins: Vec<JoinClause>,
    group_by: Vec<String>,
    having: WhereCondition,
    order_by: Vec<String>,
    limit: Option<usize>,
    offset: Option<usize>,
    preloads: Vec<PreloadDirective>,
    preload_all: bool,
    unscoped: bool,
    lock: Option<LockStrength>,
}

impl QueryBuilder {
    /// Query of the given entity kind
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            selection: Vec::new(),
            extra_projection: Vec::new(),
            distinct: false,
            predicates: Vec::new(),
            joins: Vec::new(),
            group_by: Vec::new(),
            having: WhereCondition::default(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            preloads: Vec::new(),
            preload_all: false,
            unscoped: false,
            lock: None,
        }
    }

    /// Query of the typed entity kind
    pub fn for_entity<E: Entity>() -> Self {
        Self::new(E::KIND)
    }

    /// Entity kind
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Select these columns or expressions instead of every mapped column.
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.selection
            .extend(columns.iter().map(|column| column.to_string()));
        self
    }

    /// Remove duplicate rows.
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Add an expression with a AND operator.
    pub fn filter(self, expression: &str, parameters: Vec<Value>) -> Self {
        self.where_condition(WhereCondition::new(&grouped(expression), parameters))
    }

    /// Add a condition with a AND operator.
    pub fn where_condition(mut self, condition: WhereCondition) -> Self {
        self.predicates.push(Predicate::And(condition));
        self
    }

    /// Add an equality condition per field, `NULL` values match with `is null`.
    pub fn where_fields(mut self, values: FieldValues) -> Self {
        self.predicates.push(Predicate::AndFields(values));
        self
    }

    /// Add a `column in (...)` condition, an empty list matches nothing.
    pub fn where_in(self, column: &str, values: Vec<Value>) -> Self {
        self.where_condition(WhereCondition::where_in(column, values))
    }

    /// Disjoin an expression with everything filtered so far.
    pub fn or(self, expression: &str, parameters: Vec<Value>) -> Self {
        self.or_condition(WhereCondition::new(&grouped(expression), parameters))
    }

    /// Disjoin a condition with everything filtered so far.
    pub fn or_condition(mut self, condition: WhereCondition) -> Self {
        self.predicates.push(Predicate::Or(condition));
        self
    }

    /// Add the negation of an expression with a AND operator.
    pub fn not(mut self, expression: &str, parameters: Vec<Value>) -> Self {
        self.predicates
            .push(Predicate::Not(WhereCondition::new(expression, parameters)));
        self
    }

    /// Join a declared relationship, its table is aliased with the relationship name.
    ///
    /// Has-one and belongs-to targets are hydrated in the results, collections
    /// only filter the owners.
    pub fn join(mut self, relationship: &str) -> Self {
        self.joins
            .push(JoinClause::Relationship(relationship.to_string()));
        self
    }

    /// Add a raw join clause.
    pub fn join_raw(mut self, clause: &str, parameters: Vec<Value>) -> Self {
        self.joins.push(JoinClause::Raw {
            clause: clause.to_string(),
            parameters,
        });
        self
    }

    /// Group rows by a column or expression.
    pub fn group_by(mut self, column: &str) -> Self {
        self.group_by.push(column.to_string());
        self
    }

    /// Filter groups, combined with previous `having` expressions with a AND operator.
    pub fn having(mut self, expression: &str, parameters: Vec<Value>) -> Self {
        self.having = self
            .having
            .and_where(WhereCondition::new(&grouped(expression), parameters));
        self
    }

    /// Add an ordering, replacing the default primary key order.
    pub fn order_by(mut self, ordering: &str) -> Self {
        self.order_by.push(ordering.to_string());
        self
    }

    /// Maximum number of rows
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Number of rows to skip
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Eager load a relationship path.
    pub fn preload(mut self, path: &str) -> Self {
        self.preloads.push(PreloadDirective::new(path, None));
        self
    }

    /// Eager load a relationship path, keeping the targets matching the condition.
    pub fn preload_where(mut self, path: &str, condition: WhereCondition) -> Self {
        self.preloads
            .push(PreloadDirective::new(path, Some(condition)));
        self
    }

    /// Eager load every declared relationship, one level deep.
    pub fn preload_all(mut self) -> Self {
        self.preload_all = true;
        self
    }

    /// Include soft-deleted rows.
    pub fn unscoped(mut self) -> Self {
        self.unscoped = true;
        self
    }

    /// Lock the selected rows for update.
    pub fn for_update(mut self) -> Self {
        self.lock = Some(LockStrength::Update);
        self
    }

    /// Lock the selected rows in shared mode.
    pub fn for_share(mut self) -> Self {
        self.lock = Some(LockStrength::Share);
        self
    }

    /// Apply a query transformer.
    pub fn scope(self, scope: impl FnOnce(Self) -> Self) -> Self {
        scope(self)
    }

    /// Apply query transformers in order.
    pub fn scopes(self, scopes: &[Scope]) -> Self {
        scopes.iter().fold(self, |query, scope| scope(query))
    }

    /// Preload directives
    pub fn preloads(&self) -> &[PreloadDirective] {
        &self.preloads
    }

    /// Return true if every declared relationship is preloaded.
    pub fn is_preloading_all(&self) -> bool {
        self.preload_all
    }

    /// Return true if soft-deleted rows are included.
    pub fn is_unscoped(&self) -> bool {
        self.unscoped
    }

    /// Requested lock strength
    pub fn lock(&self) -> Option<LockStrength> {
        self.lock
    }

    /// Project an expression in addition to the selection.
    pub(crate) fn project_also(mut self, expression: &str) -> Self {
        self.extra_projection.push(expression.to_string());
        self
    }

    /// Build the select statement.
    pub fn build(&self, registry: &SchemaRegistry, dialect: &dyn SqlDialect) -> StdResult<SqlStatement> {
        Ok(self.compile(registry, dialect)?.statement)
    }

    /// Build a statement counting the rows the select would return, ignoring
    /// ordering and pagination.
    pub fn build_count(
        &self,
        registry: &SchemaRegistry,
        dialect: &dyn SqlDialect,
    ) -> StdResult<SqlStatement> {
        let descriptor = registry.lookup(&self.kind)?;
        let sources = self.render_sources(registry, &descriptor)?;
        let distinct = self.distinct || sources.collection_join;
        let mut parameters = Vec::new();
        let body = self.render_body(&descriptor, sources, &mut parameters)?;

        let sql = if self.group_by.is_empty() && !distinct {
            format!("select count(*) {body}")
        } else {
            let columns = if !self.selection.is_empty() {
                self.selection.join(", ")
            } else if !self.group_by.is_empty() {
                self.group_by.join(", ")
            } else {
                qualified_primary_key(&descriptor).join(", ")
            };
            let distinct = if distinct { "distinct " } else { "" };
            format!("select count(*) from (select {distinct}{columns} {body}) as counted")
        };

        Ok(SqlStatement::from_raw(&sql, parameters, dialect))
    }

    pub(crate) fn compile(
        &self,
        registry: &SchemaRegistry,
        dialect: &dyn SqlDialect,
    ) -> StdResult<CompiledQuery> {
        let descriptor = registry.lookup(&self.kind)?;
        let table = descriptor.table();
        let sources = self.render_sources(registry, &descriptor)?;

        let mut columns = Vec::new();
        if self.selection.is_empty() {
            let mut projection = Projection::for_entity(&descriptor);
            projection.extend(sources.projection.clone());
            columns.push(projection.expand(&SourceAlias::new(&[(SOURCE_PLACEHOLDER, table)])));
        } else {
            columns.extend(self.selection.iter().cloned());
        }
        columns.extend(self.extra_projection.iter().cloned());
        let distinct = if self.distinct || sources.collection_join {
            "distinct "
        } else {
            ""
        };
        let single_joins = sources.single_joins.clone();

        let mut parameters = Vec::new();
        let mut clauses = vec![format!(
            "select {distinct}{} {}",
            columns.join(", "),
            self.render_body(&descriptor, sources, &mut parameters)?
        )];
        if !self.order_by.is_empty() {
            clauses.push(format!("order by {}", self.order_by.join(", ")));
        } else if self.group_by.is_empty() {
            let ordering = qualified_primary_key(&descriptor)
                .iter()
                .map(|column| format!("{column} asc"))
                .collect::<Vec<_>>();
            clauses.push(format!("order by {}", ordering.join(", ")));
        }
        if let Some(limit) = dialect.limit_clause(self.limit, self.offset) {
            clauses.push(limit);
        }
        if let Some(lock) = self.lock.and_then(|lock| dialect.locking_clause(lock)) {
            clauses.push(lock.to_string());
        }

        Ok(CompiledQuery {
            statement: SqlStatement::from_raw(&clauses.join(" "), parameters, dialect),
            single_joins,
        })
    }

    /// Filter restricting an update or a delete to the rows this query selects.
    pub(crate) fn mutation_filter(&self, registry: &SchemaRegistry) -> StdResult<MutationFilter> {
        if !self.joins.is_empty() || !self.group_by.is_empty() {
            return Err(DataAccessError::InvalidQuery(
                "joins and groups can not restrict an update or a delete".to_string(),
            )
            .into());
        }
        let descriptor = registry.lookup(&self.kind)?;
        let has_predicates = !self.predicates.is_empty();
        let (clause, parameters) = match self.where_clause(&descriptor)? {
            Some((clause, parameters)) => (Some(clause), parameters),
            None => (None, Vec::new()),
        };

        Ok(MutationFilter {
            clause,
            parameters,
            has_predicates,
        })
    }

    fn render_sources(
        &self,
        registry: &SchemaRegistry,
        descriptor: &EntityDescriptor,
    ) -> StdResult<Sources> {
        let table = descriptor.table();
        let mut sources = Sources::default();

        for join in &self.joins {
            let name = match join {
                JoinClause::Raw { clause, parameters } => {
                    sources.clauses.push(clause.clone());
                    sources.parameters.extend(parameters.iter().cloned());
                    continue;
                }
                JoinClause::Relationship(name) => name,
            };
            let (relationship, target) = registry.relationship(descriptor.kind(), name)?;
            let target_scope = self
                .soft_delete_column(&target)
                .map(|column| format!(" and {name}.{column} is null"))
                .unwrap_or_default();
            let target_table = target.table();
            let target_key = relationship.target_key();
            let owner_key = relationship.owner_key();

            match relationship.kind() {
                RelationshipKind::HasOne | RelationshipKind::BelongsTo => {
                    sources.clauses.push(format!(
                        "left join {target_table} as {name} on {name}.{target_key} = {table}.{owner_key}{target_scope}"
                    ));
                    sources
                        .projection
                        .extend(Projection::for_joined_entity(&target, name));
                    sources.single_joins.push(name.clone());
                }
                RelationshipKind::HasMany => {
                    sources.clauses.push(format!(
                        "inner join {target_table} as {name} on {name}.{target_key} = {table}.{owner_key}{target_scope}"
                    ));
                    sources.collection_join = true;
                }
                RelationshipKind::ManyToMany => {
                    let join_table = relationship.join_table().ok_or_else(|| {
                        DataAccessError::InvalidDescriptor {
                            kind: descriptor.kind().to_string(),
                            reason: format!("relationship '{name}': many-to-many without join table"),
                        }
                    })?;
                    let link = format!("{name}__link");
                    sources.clauses.push(format!(
                        "inner join {} as {link} on {link}.{} = {table}.{owner_key}",
                        join_table.table(),
                        join_table.owner_column()
                    ));
                    sources.clauses.push(format!(
                        "inner join {target_table} as {name} on {name}.{target_key} = {link}.{}{target_scope}",
                        join_table.target_column()
                    ));
                    sources.collection_join = true;
                }
            }
        }

        Ok(sources)
    }

    /// `from` to `having` clauses, parameters are appended in textual order.
    fn render_body(
        &self,
        descriptor: &EntityDescriptor,
        sources: Sources,
        parameters: &mut Vec<Value>,
    ) -> StdResult<String> {
        let mut clauses = vec![format!("from {}", descriptor.table())];
        clauses.extend(sources.clauses);
        parameters.extend(sources.parameters);

        if let Some((where_clause, where_parameters)) = self.where_clause(descriptor)? {
            clauses.push(format!("where {where_clause}"));
            parameters.extend(where_parameters);
        }
        if !self.group_by.is_empty() {
            clauses.push(format!("group by {}", self.group_by.join(", ")));
        }
        if !self.having.is_empty() {
            let (having, having_parameters) = self.having.clone().into_raw();
            clauses.push(format!("having {having}"));
            parameters.extend(having_parameters);
        }

        Ok(clauses.join(" "))
    }

    /// User predicates with the soft-delete scope around them.
    fn where_clause(
        &self,
        descriptor: &EntityDescriptor,
    ) -> StdResult<Option<(String, Vec<Value>)>> {
        let condition = self.user_condition(descriptor)?;
        let scope = self
            .soft_delete_column(descriptor)
            .map(|column| format!("{}.{column} is null", descriptor.table()));

        Ok(match (condition.is_empty(), scope) {
            (true, None) => None,
            (true, Some(scope)) => Some((scope, Vec::new())),
            (false, None) => Some(condition.into_raw()),
            (false, Some(scope)) => {
                let (expression, parameters) = condition.into_raw();
                Some((format!("({expression}) and {scope}"), parameters))
            }
        })
    }

    fn user_condition(&self, descriptor: &EntityDescriptor) -> StdResult<WhereCondition> {
        let mut condition = WhereCondition::default();
        for predicate in &self.predicates {
            condition = match predicate {
                Predicate::And(other) => condition.and_where(other.clone()),
                Predicate::AndFields(values) => {
                    condition.and_where(Self::fields_condition(values, descriptor)?)
                }
                Predicate::Or(other) => condition.or_where(other.clone()),
                Predicate::Not(other) => condition.and_not(other.clone()),
            };
        }

        Ok(condition)
    }

    fn fields_condition(
        values: &FieldValues,
        descriptor: &EntityDescriptor,
    ) -> StdResult<WhereCondition> {
        let mut pairs = Vec::with_capacity(values.len());
        for (path, value) in values.iter() {
            let field = descriptor.field(path).ok_or_else(|| {
                DataAccessError::from(MappingError::UnknownField {
                    kind: descriptor.kind().to_string(),
                    field: path.to_string(),
                })
            })?;
            let value = match value {
                Value::Null => Value::Null,
                value => RowMapper::check_value(field, value.clone()).map_err(DataAccessError::from)?,
            };
            pairs.push((format!("{}.{}", descriptor.table(), field.column()), value));
        }

        Ok(WhereCondition::where_equals(&pairs))
    }

    fn soft_delete_column<'a>(&self, descriptor: &'a EntityDescriptor) -> Option<&'a str> {
        if self.unscoped {
            return None;
        }
        descriptor.soft_delete_field().map(|field| field.column())
    }
}

fn qualified_primary_key(descriptor: &EntityDescriptor) -> Vec<String> {
    descriptor
        .primary_key_columns()
        .iter()
        .map(|column| format!("{}.{column}", descriptor.table()))
        .collect()
}

/// Wrap expressions holding an `or` keyword so they combine safely with other conditions.
fn grouped(expression: &str) -> String {
    if has_or_keyword(expression) {
        format!("({expression})")
    } else {
        expression.to_string()
    }
}

fn has_or_keyword(expression: &str) -> bool {
    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let chars: Vec<char> = expression.chars().collect();

    chars.windows(2).enumerate().any(|(index, pair)| {
        pair[0].eq_ignore_ascii_case(&'o')
            && pair[1].eq_ignore_ascii_case(&'r')
            && (index == 0 || !is_word(chars[index - 1]))
            && chars.get(index + 2).is_none_or(|next| !is_word(*next))
    })
}
