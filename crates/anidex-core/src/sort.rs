//! Sort descriptors
//!
//! Keys apply left to right. Rows that tie on every key keep insertion
//! order, so repeated queries against an unchanged store return the same
//! order.

use std::fmt;
use std::marker::PhantomData;

use crate::entity::Attribute;
use crate::schema::quote_ident;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    fn sql(self) -> &'static str {
        match self {
            Direction::Ascending => "ASC",
            Direction::Descending => "DESC",
        }
    }
}

/// One (attribute, direction) pair
pub struct SortKey<E> {
    column: &'static str,
    direction: Direction,
    _entity: PhantomData<fn(&E)>,
}

impl<E, V> Attribute<E, V> {
    pub fn ascending(&self) -> SortKey<E> {
        SortKey {
            column: self.name(),
            direction: Direction::Ascending,
            _entity: PhantomData,
        }
    }

    pub fn descending(&self) -> SortKey<E> {
        SortKey {
            column: self.name(),
            direction: Direction::Descending,
            _entity: PhantomData,
        }
    }
}

/// Ordered list of sort keys for entity `E`
pub struct SortDescriptor<E> {
    keys: Vec<(&'static str, Direction)>,
    _entity: PhantomData<fn(&E)>,
}

impl<E> Clone for SortDescriptor<E> {
    fn clone(&self) -> Self {
        Self {
            keys: self.keys.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E> fmt::Debug for SortDescriptor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SortDescriptor").field(&self.keys).finish()
    }
}

impl<E> SortDescriptor<E> {
    /// Insertion order only
    pub fn natural() -> Self {
        Self {
            keys: Vec::new(),
            _entity: PhantomData,
        }
    }

    pub fn by(key: SortKey<E>) -> Self {
        Self::natural().then(key)
    }

    pub fn then(mut self, key: SortKey<E>) -> Self {
        self.keys.push((key.column, key.direction));
        self
    }

    pub fn keys(&self) -> &[(&'static str, Direction)] {
        &self.keys
    }

    /// Compile to an `ORDER BY` clause ending in the insertion-order tie-break
    pub fn compile(&self) -> String {
        let mut terms: Vec<String> = self
            .keys
            .iter()
            .map(|(column, direction)| format!("{} {}", quote_ident(column), direction.sql()))
            .collect();
        terms.push("rowid ASC".to_string());
        format!("ORDER BY {}", terms.join(", "))
    }
}

impl<E> From<SortKey<E>> for SortDescriptor<E> {
    fn from(key: SortKey<E>) -> Self {
        Self::by(key)
    }
}
