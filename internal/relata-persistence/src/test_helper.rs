use std::sync::Arc;

use sqlite::Value;

use crate::MappingError;
use crate::database::DataContext;
use crate::mapper::{Entity, FieldValues, Record, Related, ValueReader, value};
use crate::schema::{
    ColumnType, EntityDescriptor, FieldDescriptor, JoinTable, RelationshipDescriptor,
    SchemaRegistry, TimestampFormat,
};
use crate::sqlite::{ConnectionBuilder, ConnectionOptions, SqliteConnection, SqliteConnectionPool};
use crate::test_tools::{MemoryLogs, TestLogger};

pub(crate) const LIBRARY_DDL: &str = r#"
create table authors (
    id integer primary key autoincrement,
    name text not null,
    email text,
    phone text,
    rating real,
    created_at text not null,
    updated_at text not null,
    deleted_at text
);
create table profiles (
    id integer primary key autoincrement,
    author_id integer references authors(id),
    bio text not null
);
create table books (
    id integer primary key autoincrement,
    title text not null,
    pages integer not null,
    author_id integer references authors(id),
    created_at integer not null,
    updated_at integer not null
);
create table tags (
    label text primary key,
    colour text
);
create table author_tags (
    author_id integer not null references authors(id),
    tag_label text not null references tags(label),
    primary key (author_id, tag_label)
);
"#;

pub(crate) fn author_descriptor() -> EntityDescriptor {
    EntityDescriptor::builder("Author", "authors")
        .auto_increment_key("id", "id")
        .field(FieldDescriptor::new("name", "name", ColumnType::Text))
        .embedded(
            "contact",
            vec![
                FieldDescriptor::new("email", "email", ColumnType::Text).nullable(),
                FieldDescriptor::new("phone", "phone", ColumnType::Text).nullable(),
            ],
        )
        .field(FieldDescriptor::new("rating", "rating", ColumnType::Real).nullable())
        .created_at("created_at", "created_at", TimestampFormat::Rfc3339)
        .updated_at("updated_at", "updated_at", TimestampFormat::Rfc3339)
        .soft_delete("deleted_at", "deleted_at")
        .relationship(RelationshipDescriptor::has_one("Profile", "Profile", "author_id"))
        .relationship(RelationshipDescriptor::has_many("Books", "Book", "author_id"))
        .relationship(
            RelationshipDescriptor::many_to_many(
                "Tags",
                "Tag",
                JoinTable::new("author_tags", "author_id", "tag_label"),
            )
            .with_target_key("label"),
        )
        .build()
        .unwrap()
}

pub(crate) fn book_descriptor() -> EntityDescriptor {
    EntityDescriptor::builder("Book", "books")
        .auto_increment_key("id", "id")
        .field(FieldDescriptor::new("title", "title", ColumnType::Text))
        .field(FieldDescriptor::new("pages", "pages", ColumnType::Integer))
        .field(FieldDescriptor::new("author_id", "author_id", ColumnType::Integer).nullable())
        .created_at("created_at", "created_at", TimestampFormat::UnixMillis)
        .updated_at("updated_at", "updated_at", TimestampFormat::UnixMillis)
        .relationship(RelationshipDescriptor::belongs_to("Author", "Author", "author_id"))
        .build()
        .unwrap()
}

pub(crate) fn profile_descriptor() -> EntityDescriptor {
    EntityDescriptor::builder("Profile", "profiles")
        .auto_increment_key("id", "id")
        .field(FieldDescriptor::new("author_id", "author_id", ColumnType::Integer).nullable())
        .field(FieldDescriptor::new("bio", "bio", ColumnType::Text))
        .build()
        .unwrap()
}

pub(crate) fn tag_descriptor() -> EntityDescriptor {
    EntityDescriptor::builder("Tag", "tags")
        .primary_key(FieldDescriptor::new("label", "label", ColumnType::Text))
        .field(FieldDescriptor::new("colour", "colour", ColumnType::Text).nullable())
        .build()
        .unwrap()
}

pub(crate) fn registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry.register(author_descriptor()).unwrap();
    registry.register(book_descriptor()).unwrap();
    registry.register(profile_descriptor()).unwrap();
    registry.register(tag_descriptor()).unwrap();

    registry
}

pub(crate) fn connection() -> SqliteConnection {
    let connection = ConnectionBuilder::open_memory()
        .with_options(&[ConnectionOptions::EnableForeignKeys])
        .build()
        .unwrap();
    connection.execute(LIBRARY_DDL).unwrap();

    connection
}

pub(crate) fn context_with_registry(registry: SchemaRegistry) -> DataContext {
    DataContext::new(
        Arc::new(registry),
        SqliteConnectionPool::build_from_connection(connection()),
        TestLogger::stdout(),
    )
    .unwrap()
}

pub(crate) fn context() -> DataContext {
    context_with_registry(registry())
}

pub(crate) fn context_with_logs() -> (DataContext, MemoryLogs) {
    let (logger, logs) = TestLogger::memory();
    let context = DataContext::new(
        Arc::new(registry()),
        SqliteConnectionPool::build_from_connection(connection()),
        logger,
    )
    .unwrap();

    (context, logs)
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Author {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub rating: Option<f64>,
    pub books: Vec<Book>,
}

impl Author {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            email: None,
            rating: None,
            books: Vec::new(),
        }
    }

    pub(crate) fn with_books(mut self, books: Vec<Book>) -> Self {
        self.books = books;
        self
    }
}

impl Entity for Author {
    const KIND: &'static str = "Author";

    fn to_record(&self) -> Record {
        let record = Record::new(
            FieldValues::new()
                .with("id", value::integer(self.id))
                .with("name", value::text(&self.name))
                .with("contact.email", value::optional_text(self.email.clone()))
                .with("rating", self.rating.map(value::real).unwrap_or(Value::Null)),
        );
        if self.books.is_empty() {
            return record;
        }

        record.with_relation(
            "Books",
            Related::Many(self.books.iter().map(Book::to_record).collect()),
        )
    }

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let values = record.values();

        Ok(Self {
            id: values.integer("id")?,
            name: values.string("name")?,
            email: values.optional_string("contact.email")?,
            rating: values.optional_real("rating")?,
            books: record
                .many("Books")
                .iter()
                .map(Book::from_record)
                .collect::<Result<_, _>>()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Book {
    pub id: i64,
    pub title: String,
    pub pages: i64,
    pub author_id: Option<i64>,
}

impl Book {
    pub(crate) fn new(title: &str, pages: i64) -> Self {
        Self {
            id: 0,
            title: title.to_string(),
            pages,
            author_id: None,
        }
    }
}

impl Entity for Book {
    const KIND: &'static str = "Book";

    fn to_record(&self) -> Record {
        Record::new(
            FieldValues::new()
                .with("id", value::integer(self.id))
                .with("title", value::text(&self.title))
                .with("pages", value::integer(self.pages))
                .with("author_id", value::optional_integer(self.author_id)),
        )
    }

    fn from_record(record: &Record) -> Result<Self, MappingError> {
        let values = record.values();

        Ok(Self {
            id: values.integer("id")?,
            title: values.string("title")?,
            pages: values.integer("pages")?,
            author_id: values.optional_integer("author_id")?,
        })
    }
}
