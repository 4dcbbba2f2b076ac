//! Entities and attribute descriptors
//!
//! An [`Entity`] is a persisted domain record with a caller-supplied
//! identity. Each entity declares a static [`AttributeTable`] listing one
//! [`Attribute`] per persisted field. Attributes are typed: an
//! `Attribute<Anime, f64>` can only read an `f64` out of an `Anime`, and
//! predicates built from it only apply to `Anime` queries.

use std::collections::HashSet;
use std::fmt;

use crate::codec::Codec;
use crate::error::{ConfigurationError, DecodeError};
use crate::value::{ColumnKind, Primitive};

/// A persisted domain record type
pub trait Entity: Default + Clone + Send + Sync + 'static {
    /// Identity value type, supplied by the caller and never derived from content
    type Id: Codec + Clone + fmt::Debug + Send + Sync + 'static;

    /// Stable entity name, also the table name
    const NAME: &'static str;

    /// Schema version in which this entity first appeared
    const INTRODUCED_IN: u32 = 1;

    fn identity() -> Attribute<Self, Self::Id>;

    fn attributes() -> &'static AttributeTable<Self>;

    /// Identity of this instance
    fn id(&self) -> Self::Id {
        Self::identity().get(self)
    }
}

/// Typed mapping from an entity field to a stored column
pub struct Attribute<E, V> {
    name: &'static str,
    get: fn(&E) -> V,
    set: fn(&mut E, V),
}

impl<E, V> Clone for Attribute<E, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E, V> Copy for Attribute<E, V> {}

impl<E, V> fmt::Debug for Attribute<E, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute").field("name", &self.name).finish()
    }
}

impl<E, V> Attribute<E, V> {
    pub const fn new(name: &'static str, get: fn(&E) -> V, set: fn(&mut E, V)) -> Self {
        Self { name, get, set }
    }

    /// Stored column name
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get(&self, entity: &E) -> V {
        (self.get)(entity)
    }

    pub fn set(&self, entity: &mut E, value: V) {
        (self.set)(entity, value)
    }
}

/// Type-erased view of an attribute, as stored in an [`AttributeTable`]
pub trait Column<E>: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> ColumnKind;

    fn nullable(&self) -> bool;

    fn read(&self, entity: &E) -> Primitive;

    fn write(&self, entity: &mut E, value: Primitive) -> Result<(), DecodeError>;
}

impl<E, V> Column<E> for Attribute<E, V>
where
    E: 'static,
    V: Codec + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn kind(&self) -> ColumnKind {
        V::KIND
    }

    fn nullable(&self) -> bool {
        V::NULLABLE
    }

    fn read(&self, entity: &E) -> Primitive {
        self.get(entity).encode()
    }

    fn write(&self, entity: &mut E, value: Primitive) -> Result<(), DecodeError> {
        let value = V::decode(value).map_err(|e| e.in_column(self.name))?;
        self.set(entity, value);
        Ok(())
    }
}

/// Column metadata without the accessors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub nullable: bool,
}

/// The static attribute table of one entity
pub struct AttributeTable<E> {
    entity: &'static str,
    identity: &'static str,
    columns: Vec<Box<dyn Column<E>>>,
}

impl<E: Entity> AttributeTable<E> {
    pub fn builder() -> AttributeTableBuilder<E> {
        AttributeTableBuilder {
            columns: Vec::new(),
        }
    }

    pub fn entity(&self) -> &'static str {
        self.entity
    }

    /// Name of the identity column
    pub fn identity(&self) -> &'static str {
        self.identity
    }

    pub fn columns(&self) -> impl Iterator<Item = &dyn Column<E>> + '_ {
        self.columns.iter().map(|c| c.as_ref())
    }

    pub fn column(&self, name: &str) -> Option<&dyn Column<E>> {
        self.columns().find(|c| c.name() == name)
    }

    pub fn definitions(&self) -> Vec<ColumnDef> {
        self.columns()
            .map(|c| ColumnDef {
                name: c.name(),
                kind: c.kind(),
                nullable: c.nullable(),
            })
            .collect()
    }

    /// Check the table is usable as a storage layout
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let entity = self.entity.to_string();
        let mut seen = HashSet::new();

        for column in self.columns() {
            let name = column.name();
            if name.is_empty() {
                return Err(ConfigurationError::EmptyName { entity });
            }
            if name.starts_with('_') || name.eq_ignore_ascii_case("rowid") {
                return Err(ConfigurationError::ReservedName {
                    entity,
                    name: name.to_string(),
                });
            }
            if !seen.insert(name) {
                return Err(ConfigurationError::DuplicateAttribute {
                    entity,
                    name: name.to_string(),
                });
            }
        }

        match self.column(self.identity) {
            None => Err(ConfigurationError::MissingIdentity {
                entity,
                identity: self.identity.to_string(),
            }),
            Some(column) if column.nullable() => Err(ConfigurationError::NullableIdentity {
                entity,
                identity: self.identity.to_string(),
            }),
            Some(_) => Ok(()),
        }
    }

    pub fn to_record(&self, entity: &E) -> Record {
        let mut record = Record::new();
        for column in self.columns() {
            record.set(column.name(), column.read(entity));
        }
        record
    }

    /// Hydrate an entity from a record holding exactly this table's columns
    pub fn from_record(&self, record: &Record) -> Result<E, DecodeError> {
        if let Some(extra) = record.names().find(|name| self.column(name).is_none()) {
            return Err(DecodeError::UnexpectedColumn(extra.to_string()));
        }

        let mut entity = E::default();
        for column in self.columns() {
            let value = record
                .get(column.name())
                .ok_or_else(|| DecodeError::MissingColumn(column.name().to_string()))?;
            column.write(&mut entity, value.clone())?;
        }
        Ok(entity)
    }
}

pub struct AttributeTableBuilder<E> {
    columns: Vec<Box<dyn Column<E>>>,
}

impl<E: Entity> AttributeTableBuilder<E> {
    pub fn column<V: Codec + 'static>(mut self, attribute: Attribute<E, V>) -> Self {
        self.columns.push(Box::new(attribute));
        self
    }

    pub fn build(self) -> AttributeTable<E> {
        AttributeTable {
            entity: E::NAME,
            identity: E::identity().name(),
            columns: self.columns,
        }
    }
}

/// An untyped row: ordered column names with their primitives
///
/// Rows of older schema versions are handed to migration policies in this
/// form; the helpers here keep policies short.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Primitive)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Primitive> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Primitive)> + '_ {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Set a column, replacing any existing value in place
    pub fn set(&mut self, name: impl Into<String>, value: Primitive) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Builder form of [`Record::set`]
    pub fn with(mut self, name: impl Into<String>, value: Primitive) -> Self {
        self.set(name, value);
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<Primitive> {
        let index = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(index).1)
    }

    /// Remove a column that must be present
    pub fn take(&mut self, name: &str) -> Result<Primitive, DecodeError> {
        self.remove(name)
            .ok_or_else(|| DecodeError::MissingColumn(name.to_string()))
    }

    /// Remove a column and decode it
    pub fn take_as<V: Codec>(&mut self, name: &str) -> Result<V, DecodeError> {
        let value = self.take(name)?;
        V::decode(value).map_err(|e| e.in_column(name))
    }

    /// Rename a column that must be present, keeping its position
    pub fn rename(&mut self, from: &str, to: impl Into<String>) -> Result<(), DecodeError> {
        let slot = self
            .fields
            .iter_mut()
            .find(|(n, _)| n == from)
            .ok_or_else(|| DecodeError::MissingColumn(from.to_string()))?;
        slot.0 = to.into();
        Ok(())
    }
}
