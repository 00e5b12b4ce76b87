use std::collections::BTreeMap;

use crate::MappingError;
use crate::mapper::{ColumnValues, FieldValues};

/// Related records attached to a record under a relationship name.
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    /// Single valued relationship (has-one, belongs-to), `None` when there is no target
    One(Option<Box<Record>>),

    /// Collection relationship (has-many, many-to-many)
    Many(Vec<Record>),
}

/// Field values of an entity with its loaded relationships.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    values: FieldValues,
    relations: BTreeMap<String, Related>,
}

impl Record {
    /// Record without relations
    pub fn new(values: FieldValues) -> Self {
        Self {
            values,
            relations: BTreeMap::new(),
        }
    }

    /// Field values
    pub fn values(&self) -> &FieldValues {
        &self.values
    }

    /// Mutable field values
    pub fn values_mut(&mut self) -> &mut FieldValues {
        &mut self.values
    }

    /// Attach related records, builder style
    pub fn with_relation(mut self, name: &str, related: Related) -> Self {
        self.set_relation(name, related);
        self
    }

    /// Attach related records
    pub fn set_relation(&mut self, name: &str, related: Related) {
        self.relations.insert(name.to_string(), related);
    }

    /// Related records, `None` when the relation is not loaded
    pub fn relation(&self, name: &str) -> Option<&Related> {
        self.relations.get(name)
    }

    /// Mutable related records
    pub fn relation_mut(&mut self, name: &str) -> Option<&mut Related> {
        self.relations.get_mut(name)
    }

    /// Return true if the relation is loaded.
    pub fn has_relation(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    /// Single related record, `None` when not loaded or without target
    pub fn one(&self, name: &str) -> Option<&Record> {
        match self.relations.get(name) {
            Some(Related::One(Some(record))) => Some(&**record),
            _ => None,
        }
    }

    /// Related records of a collection, empty when not loaded
    pub fn many(&self, name: &str) -> &[Record] {
        match self.relations.get(name) {
            Some(Related::Many(records)) => records,
            _ => &[],
        }
    }

    /// Detach every relation
    pub fn take_relations(&mut self) -> BTreeMap<String, Related> {
        std::mem::take(&mut self.relations)
    }

    /// Names of the loaded relations
    pub fn relation_names(&self) -> Vec<&str> {
        self.relations.keys().map(|name| name.as_str()).collect()
    }
}

impl Related {
    /// Related records, whatever the cardinality
    pub fn records(&self) -> Vec<&Record> {
        match self {
            Self::One(record) => record.iter().map(|record| &**record).collect(),
            Self::Many(records) => records.iter().collect(),
        }
    }

    /// Mutable related records, whatever the cardinality
    pub fn records_mut(&mut self) -> Vec<&mut Record> {
        match self {
            Self::One(record) => record.iter_mut().map(|record| &mut **record).collect(),
            Self::Many(records) => records.iter_mut().collect(),
        }
    }

    /// Convert the related records to typed entities
    pub fn entities<E: Entity>(&self) -> Result<Vec<E>, MappingError> {
        self.records().into_iter().map(E::from_record).collect()
    }
}

/// A typed entity mapped by the descriptor registered under [Entity::KIND].
pub trait Entity: Sized {
    /// Kind of the descriptor mapping this entity
    const KIND: &'static str;

    /// Field values and loaded relations of the entity
    fn to_record(&self) -> Record;

    /// Rebuild the entity from a record
    fn from_record(record: &Record) -> Result<Self, MappingError>;
}

/// A result row that is not an entity (aggregations, partial selections).
pub trait FromColumns: Sized {
    /// Read the row
    fn from_columns(row: &ColumnValues) -> Result<Self, MappingError>;
}

#[cfg(test)]
mod tests {
    use crate::mapper::value;

    use super::*;

    #[test]
    fn one_and_many_accessors_ignore_other_cardinalities() {
        let wallet = Record::new(FieldValues::new().with("id", value::text("wallet-1")));
        let record = Record::default()
            .with_relation("Wallet", Related::One(Some(Box::new(wallet.clone()))))
            .with_relation("Addresses", Related::Many(vec![Record::default()]));

        assert_eq!(Some(&wallet), record.one("Wallet"));
        assert!(record.one("Addresses").is_none());
        assert_eq!(1, record.many("Addresses").len());
        assert!(record.many("Wallet").is_empty());
        assert!(record.many("Products").is_empty());
        assert_eq!(vec!["Addresses", "Wallet"], record.relation_names());
    }

    #[test]
    fn take_relations_detaches_all_relations() {
        let mut record = Record::default().with_relation("Wallet", Related::One(None));

        let relations = record.take_relations();

        assert_eq!(1, relations.len());
        assert!(!record.has_relation("Wallet"));
    }
}
