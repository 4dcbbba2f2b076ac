//! Store schema and layout
//!
//! One SQLite table per entity, named after the entity. Each table has one
//! column per attribute; the identity column is `UNIQUE NOT NULL`. The
//! implicit rowid records insertion order.
//!
//! A reserved metadata table holds the schema version.

use std::collections::HashSet;
use std::fmt;

use rusqlite::{params, Connection, OptionalExtension};

use crate::entity::{ColumnDef, Entity, Record};
use crate::error::{ConfigurationError, DecodeError, MigrationError};
use crate::migration::MigrationRegistry;

/// Reserved metadata table
pub const META_TABLE: &str = "_anidex_meta";

const VERSION_KEY: &str = "schema_version";

/// Quote an identifier for SQLite
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Storage layout of one registered entity
#[derive(Clone)]
pub struct EntitySchema {
    pub name: &'static str,
    pub identity: &'static str,
    pub introduced_in: u32,
    pub columns: Vec<ColumnDef>,
    verify: fn(&Record) -> Result<(), DecodeError>,
}

impl fmt::Debug for EntitySchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntitySchema")
            .field("name", &self.name)
            .field("identity", &self.identity)
            .field("introduced_in", &self.introduced_in)
            .field("columns", &self.columns)
            .finish()
    }
}

fn verify_record<E: Entity>(record: &Record) -> Result<(), DecodeError> {
    E::attributes().from_record(record).map(|_| ())
}

impl EntitySchema {
    /// Validate the entity's attribute table and capture its layout
    pub fn of<E: Entity>() -> Result<Self, ConfigurationError> {
        let table = E::attributes();
        table.validate()?;

        Ok(Self {
            name: E::NAME,
            identity: table.identity(),
            introduced_in: E::INTRODUCED_IN,
            columns: table.definitions(),
            verify: verify_record::<E>,
        })
    }

    /// Check a record decodes into the entity
    pub fn verify(&self, record: &Record) -> Result<(), DecodeError> {
        (self.verify)(record)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub(crate) fn create_table_sql(&self, table: &str) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let mut def = format!("{} {}", quote_ident(c.name), c.kind.sql_type());
                if c.name == self.identity {
                    def.push_str(" NOT NULL UNIQUE");
                } else if !c.nullable {
                    def.push_str(" NOT NULL");
                }
                def
            })
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(table),
            columns.join(", ")
        )
    }

    pub(crate) fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| quote_ident(c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Compiled schema: version, registered entities and migration history
#[derive(Debug)]
pub struct Schema {
    version: u32,
    entities: Vec<EntitySchema>,
    migrations: MigrationRegistry,
}

impl Schema {
    pub fn builder(version: u32) -> SchemaBuilder {
        SchemaBuilder {
            version,
            entities: Vec::new(),
            migrations: MigrationRegistry::new(1),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn entities(&self) -> &[EntitySchema] {
        &self.entities
    }

    pub fn entity(&self, name: &str) -> Option<&EntitySchema> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn migrations(&self) -> &MigrationRegistry {
        &self.migrations
    }

    /// Create every entity table that does not exist yet
    pub(crate) fn create_tables(&self, conn: &Connection) -> rusqlite::Result<()> {
        for entity in &self.entities {
            conn.execute(&entity.create_table_sql(entity.name), [])?;
        }
        Ok(())
    }
}

pub struct SchemaBuilder {
    version: u32,
    entities: Vec<Result<EntitySchema, ConfigurationError>>,
    migrations: MigrationRegistry,
}

impl SchemaBuilder {
    pub fn entity<E: Entity>(mut self) -> Self {
        self.entities.push(EntitySchema::of::<E>());
        self
    }

    pub fn migrations(mut self, migrations: MigrationRegistry) -> Self {
        self.migrations = migrations;
        self
    }

    /// Validate everything; any error here is a startup failure
    pub fn build(self) -> Result<Schema, ConfigurationError> {
        if self.version == 0 {
            return Err(ConfigurationError::InvalidVersion);
        }

        let entities = self.entities.into_iter().collect::<Result<Vec<_>, _>>()?;

        let mut seen = HashSet::new();
        for entity in &entities {
            if !seen.insert(entity.name) {
                return Err(ConfigurationError::DuplicateEntity {
                    entity: entity.name.to_string(),
                });
            }
            if entity.introduced_in > self.version {
                return Err(ConfigurationError::EntityFromFuture {
                    entity: entity.name.to_string(),
                    introduced_in: entity.introduced_in,
                    version: self.version,
                });
            }
        }

        self.migrations.check_complete(self.version, &entities)?;

        Ok(Schema {
            version: self.version,
            entities,
            migrations: self.migrations,
        })
    }
}

/// Check whether a table exists
pub fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    conn.prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?")?
        .exists([name])
}

/// Tables other than SQLite internals and the metadata table
pub fn user_tables(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name <> ? ORDER BY name",
    )?;
    let names = stmt
        .query_map([META_TABLE], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
}

/// Read the persisted schema version
///
/// Returns `None` when the store has no metadata record yet.
pub fn read_version(conn: &Connection) -> Result<Option<u32>, MigrationError> {
    if !table_exists(conn, META_TABLE)? {
        return Ok(None);
    }

    let value: Option<String> = conn
        .query_row(
            &format!("SELECT value FROM {} WHERE key = ?", quote_ident(META_TABLE)),
            [VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match value {
        None => Ok(None),
        Some(text) => text
            .parse::<u32>()
            .map(Some)
            .map_err(|_| MigrationError::CorruptVersion(text)),
    }
}

/// Persist the schema version
pub fn write_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            quote_ident(META_TABLE)
        ),
        [],
    )?;
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {} (key, value) VALUES (?, ?)",
            quote_ident(META_TABLE)
        ),
        params![VERSION_KEY, version.to_string()],
    )?;
    Ok(())
}
