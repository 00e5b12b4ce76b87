/// Kind of link between two entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKind {
    /// The target holds a foreign key to the owner, at most one target.
    HasOne,

    /// The target holds a foreign key to the owner, any number of targets.
    HasMany,

    /// The owner holds a foreign key to the target.
    BelongsTo,

    /// Owner and target are linked through a join table.
    ManyToMany,
}

impl RelationshipKind {
    /// Return true if the relationship resolves to a list of targets.
    pub fn is_collection(&self) -> bool {
        matches!(self, Self::HasMany | Self::ManyToMany)
    }
}

/// Join table of a many-to-many relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTable {
    table: String,
    owner_column: String,
    target_column: String,
}

impl JoinTable {
    /// [JoinTable] factory
    pub fn new(table: &str, owner_column: &str, target_column: &str) -> Self {
        Self {
            table: table.to_string(),
            owner_column: owner_column.to_string(),
            target_column: target_column.to_string(),
        }
    }

    /// Table name
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Column referencing the owner key
    pub fn owner_column(&self) -> &str {
        &self.owner_column
    }

    /// Column referencing the target key
    pub fn target_column(&self) -> &str {
        &self.target_column
    }
}

/// Relationship declared on an owner entity.
///
/// Except for many-to-many relationships, owner and target rows are linked by
/// `target.target_key = owner.owner_key`:
/// * has-one and has-many: `owner_key` is the owner primary key and
///   `target_key` the foreign key on the target table,
/// * belongs-to: `owner_key` is the foreign key on the owner table and
///   `target_key` the target primary key.
///
/// Many-to-many relationships go through their [JoinTable]:
/// `join.owner_column = owner.owner_key` and `join.target_column = target.target_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDescriptor {
    name: String,
    kind: RelationshipKind,
    target_kind: String,
    owner_key: String,
    target_key: String,
    join_table: Option<JoinTable>,
}

impl RelationshipDescriptor {
    const DEFAULT_KEY: &'static str = "id";

    fn new(
        name: &str,
        kind: RelationshipKind,
        target_kind: &str,
        owner_key: &str,
        target_key: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind,
            target_kind: target_kind.to_string(),
            owner_key: owner_key.to_string(),
            target_key: target_key.to_string(),
            join_table: None,
        }
    }

    /// Target rows reference the owner with `foreign_key`, at most one target.
    pub fn has_one(name: &str, target_kind: &str, foreign_key: &str) -> Self {
        Self::new(
            name,
            RelationshipKind::HasOne,
            target_kind,
            Self::DEFAULT_KEY,
            foreign_key,
        )
    }

    /// Target rows reference the owner with `foreign_key`.
    pub fn has_many(name: &str, target_kind: &str, foreign_key: &str) -> Self {
        Self::new(
            name,
            RelationshipKind::HasMany,
            target_kind,
            Self::DEFAULT_KEY,
            foreign_key,
        )
    }

    /// The owner row references its target with `foreign_key`.
    pub fn belongs_to(name: &str, target_kind: &str, foreign_key: &str) -> Self {
        Self::new(
            name,
            RelationshipKind::BelongsTo,
            target_kind,
            foreign_key,
            Self::DEFAULT_KEY,
        )
    }

    /// Owner and target rows are linked by the rows of `join_table`.
    pub fn many_to_many(name: &str, target_kind: &str, join_table: JoinTable) -> Self {
        Self {
            join_table: Some(join_table),
            ..Self::new(
                name,
                RelationshipKind::ManyToMany,
                target_kind,
                Self::DEFAULT_KEY,
                Self::DEFAULT_KEY,
            )
        }
    }

    /// Override the owner side key column (defaults to `id` unless it is the foreign key).
    pub fn with_owner_key(mut self, column: &str) -> Self {
        self.owner_key = column.to_string();
        self
    }

    /// Override the target side key column (defaults to `id` unless it is the foreign key).
    pub fn with_target_key(mut self, column: &str) -> Self {
        self.target_key = column.to_string();
        self
    }

    /// Relationship name, also used as SQL alias when joined
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Relationship kind
    pub fn kind(&self) -> RelationshipKind {
        self.kind
    }

    /// Entity kind of the targets
    pub fn target_kind(&self) -> &str {
        &self.target_kind
    }

    /// Key column on the owner table
    pub fn owner_key(&self) -> &str {
        &self.owner_key
    }

    /// Key column on the target table
    pub fn target_key(&self) -> &str {
        &self.target_key
    }

    /// Join table, many-to-many relationships only
    pub fn join_table(&self) -> Option<&JoinTable> {
        self.join_table.as_ref()
    }
}
