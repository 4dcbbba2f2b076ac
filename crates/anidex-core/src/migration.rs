//! Schema migration
//!
//! Policies are plain functions registered per `(entity, from, to)`. When a
//! store written by an older build is opened, the engine resolves a chain of
//! policies for every entity before touching the file, then rewrites each
//! entity table inside one transaction:
//!
//! 1. read every row of the old table as a [`Record`]
//! 2. apply the policy chain in memory
//! 3. write the results into `<entity>__staging` with the current layout
//! 4. read the staging rows back through the typed decoder
//! 5. swap the staging table into place
//!
//! The version record is written last. Any failure rolls the transaction
//! back and leaves the previous version's data as it was.

use std::collections::HashSet;
use std::fmt;

use rusqlite::{params_from_iter, Connection};
use tracing::{debug, info};

use crate::config::VerifyMode;
use crate::entity::Record;
use crate::error::{ConfigurationError, DecodeError, MigrationError, PolicyError};
use crate::schema::{
    quote_ident, read_version, table_exists, user_tables, write_version, EntitySchema, Schema,
};
use crate::value::Primitive;

/// Transformation of one row from version `from` to version `to`
pub type MigrationPolicy = fn(Record) -> Result<Record, PolicyError>;

fn keep(record: Record) -> Result<Record, PolicyError> {
    Ok(record)
}

#[derive(Debug, Clone, Copy)]
struct PolicyEntry {
    entity: &'static str,
    from: u32,
    to: u32,
    policy: MigrationPolicy,
}

/// One resolved step of a migration chain
#[derive(Debug, Clone, Copy)]
pub struct MigrationStep {
    pub from: u32,
    pub to: u32,
    policy: MigrationPolicy,
}

impl MigrationStep {
    pub fn apply(&self, record: Record) -> Result<Record, PolicyError> {
        (self.policy)(record)
    }
}

/// Registered migration history of a schema
#[derive(Debug, Clone)]
pub struct MigrationRegistry {
    oldest_supported: u32,
    entries: Vec<PolicyEntry>,
}

impl MigrationRegistry {
    /// Stores older than `oldest_supported` cannot be opened
    pub fn new(oldest_supported: u32) -> Self {
        Self {
            oldest_supported: oldest_supported.max(1),
            entries: Vec::new(),
        }
    }

    pub fn oldest_supported(&self) -> u32 {
        self.oldest_supported
    }

    pub fn register(
        mut self,
        entity: &'static str,
        from: u32,
        to: u32,
        policy: MigrationPolicy,
    ) -> Self {
        self.entries.push(PolicyEntry {
            entity,
            from,
            to,
            policy,
        });
        self
    }

    /// Register a step that carries rows over as they are
    pub fn unchanged(self, entity: &'static str, from: u32, to: u32) -> Self {
        self.register(entity, from, to, keep)
    }

    /// Check every entity can be migrated to `version` from any supported version
    ///
    /// Runs once at schema build.
    pub fn check_complete(
        &self,
        version: u32,
        entities: &[EntitySchema],
    ) -> Result<(), ConfigurationError> {
        let mut seen = HashSet::new();
        for entry in &self.entries {
            if !seen.insert((entry.entity, entry.from, entry.to)) {
                return Err(ConfigurationError::DuplicatePolicy {
                    entity: entry.entity.to_string(),
                    from: entry.from,
                    to: entry.to,
                });
            }
            if entry.from == 0 || entry.from >= entry.to || entry.to > version {
                return Err(ConfigurationError::InvalidPolicy {
                    entity: entry.entity.to_string(),
                    from: entry.from,
                    to: entry.to,
                });
            }
            if !entities.iter().any(|e| e.name == entry.entity) {
                return Err(ConfigurationError::UnknownEntity {
                    entity: entry.entity.to_string(),
                });
            }
        }

        for entity in entities {
            let start = self.oldest_supported.max(entity.introduced_in);
            for from in start..version {
                if self.plan(entity.name, from, version).is_err() {
                    return Err(ConfigurationError::MigrationGap {
                        entity: entity.name.to_string(),
                        from,
                    });
                }
            }
        }
        Ok(())
    }

    /// Resolve the policy chain for `entity` from `from` to `target`
    ///
    /// At each version the step reaching furthest without passing the
    /// target wins, so a registered direct policy skips the single steps.
    pub fn plan(
        &self,
        entity: &str,
        from: u32,
        target: u32,
    ) -> Result<Vec<MigrationStep>, MigrationError> {
        let missing = || MigrationError::MissingPolicy {
            entity: entity.to_string(),
            from,
            target,
        };

        if from < self.oldest_supported {
            return Err(missing());
        }

        let mut steps = Vec::new();
        let mut current = from;
        while current < target {
            let entry = self
                .entries
                .iter()
                .filter(|e| e.entity == entity && e.from == current && e.to <= target)
                .max_by_key(|e| e.to)
                .ok_or_else(missing)?;
            steps.push(MigrationStep {
                from: entry.from,
                to: entry.to,
                policy: entry.policy,
            });
            current = entry.to;
        }
        Ok(steps)
    }
}

/// Lifecycle of a store being opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    Closed,
    VersionChecked,
    NoOpIfCurrent,
    Migrating,
    Migrated,
    Open,
}

impl MigrationPhase {
    fn advance(self, next: MigrationPhase) -> MigrationPhase {
        debug!("Migration phase {:?} -> {:?}", self, next);
        next
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationPhase::Closed => "closed",
            MigrationPhase::VersionChecked => "version checked",
            MigrationPhase::NoOpIfCurrent => "current",
            MigrationPhase::Migrating => "migrating",
            MigrationPhase::Migrated => "migrated",
            MigrationPhase::Open => "open",
        };
        f.write_str(name)
    }
}

/// What opening the store did to the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// Version found on disk; `None` for a fresh store
    pub from: Option<u32>,
    pub to: u32,
    /// Rows carried over, per migrated entity
    pub migrated: Vec<(String, usize)>,
    /// Tables created empty
    pub created: Vec<String>,
    pub phase: MigrationPhase,
}

/// Bring the store behind `conn` to the schema's version
pub fn run(
    conn: &mut Connection,
    schema: &Schema,
    verify: VerifyMode,
) -> Result<MigrationReport, MigrationError> {
    let target = schema.version();
    let phase = MigrationPhase::Closed;

    let stored = read_version(conn)?;
    let phase = phase.advance(MigrationPhase::VersionChecked);

    let mut report = MigrationReport {
        from: stored,
        to: target,
        migrated: Vec::new(),
        created: Vec::new(),
        phase,
    };

    match stored {
        None => {
            if !user_tables(conn)?.is_empty() {
                return Err(MigrationError::Unversioned);
            }

            let tx = conn.transaction()?;
            report.created = missing_tables(&tx, schema)?;
            schema.create_tables(&tx)?;
            write_version(&tx, target)?;
            tx.commit()?;
            info!("Initialized new store at schema version {}", target);
        }
        Some(found) if found > target => {
            return Err(MigrationError::FutureVersion {
                found,
                supported: target,
            });
        }
        Some(found) if found == target => {
            report.phase = report.phase.advance(MigrationPhase::NoOpIfCurrent);
            let missing = missing_tables(conn, schema)?;
            if !missing.is_empty() {
                schema.create_tables(conn)?;
                report.created = missing;
            }
            debug!("Store already at schema version {}", target);
        }
        Some(found) => {
            let mut plans = Vec::new();
            for entity in schema.entities() {
                if table_exists(conn, entity.name)? {
                    let steps = schema.migrations().plan(entity.name, found, target)?;
                    plans.push((entity, steps));
                }
            }

            report.phase = report.phase.advance(MigrationPhase::Migrating);
            info!("Migrating store from schema version {} to {}", found, target);

            let tx = conn.transaction()?;
            for (entity, steps) in &plans {
                let rows = migrate_entity(&tx, entity, steps, verify)?;
                info!("Migrated {} rows of '{}'", rows, entity.name);
                report.migrated.push((entity.name.to_string(), rows));
            }
            report.created = missing_tables(&tx, schema)?;
            schema.create_tables(&tx)?;
            write_version(&tx, target)?;
            tx.commit()?;

            report.phase = report.phase.advance(MigrationPhase::Migrated);
        }
    }

    report.phase = report.phase.advance(MigrationPhase::Open);
    Ok(report)
}

fn missing_tables(conn: &Connection, schema: &Schema) -> rusqlite::Result<Vec<String>> {
    let mut missing = Vec::new();
    for entity in schema.entities() {
        if !table_exists(conn, entity.name)? {
            missing.push(entity.name.to_string());
        }
    }
    Ok(missing)
}

fn migrate_entity(
    conn: &Connection,
    entity: &EntitySchema,
    steps: &[MigrationStep],
    verify: VerifyMode,
) -> Result<usize, MigrationError> {
    let mut staged = Vec::new();
    for mut record in read_records(conn, entity.name)? {
        for step in steps {
            record = step
                .apply(record)
                .map_err(|source| MigrationError::Policy {
                    entity: entity.name.to_string(),
                    from: step.from,
                    to: step.to,
                    source,
                })?;
        }
        staged.push(record);
    }

    let staging = format!("{}__staging", entity.name);
    conn.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(&staging)), [])?;
    conn.execute(&entity.create_table_sql(&staging), [])?;

    let insert = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(&staging),
        entity.column_list(),
        vec!["?"; entity.columns.len()].join(", ")
    );
    let mut stmt = conn.prepare(&insert)?;
    for (row, record) in staged.iter().enumerate() {
        let values = layout_values(entity, record).map_err(|source| MigrationError::Validation {
            entity: entity.name.to_string(),
            row,
            source,
        })?;
        stmt.execute(params_from_iter(values))?;
    }
    drop(stmt);

    verify_staging(conn, entity, &staging, verify)?;

    conn.execute(&format!("DROP TABLE {}", quote_ident(entity.name)), [])?;
    conn.execute(
        &format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(&staging),
            quote_ident(entity.name)
        ),
        [],
    )?;

    Ok(staged.len())
}

/// Rows of a table in insertion order, read without a declared layout
fn read_records(conn: &Connection, table: &str) -> rusqlite::Result<Vec<Record>> {
    let mut stmt = conn.prepare(&format!("SELECT * FROM {} ORDER BY rowid", quote_ident(table)))?;
    let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();

    let mut records = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut record = Record::new();
        for (i, name) in names.iter().enumerate() {
            record.set(name.as_str(), Primitive::from_raw(row.get_ref(i)?));
        }
        records.push(record);
    }
    Ok(records)
}

/// Values of a migrated record in table column order
fn layout_values<'r>(
    entity: &EntitySchema,
    record: &'r Record,
) -> Result<Vec<&'r Primitive>, DecodeError> {
    if let Some(extra) = record.names().find(|name| entity.column(name).is_none()) {
        return Err(DecodeError::UnexpectedColumn(extra.to_string()));
    }

    entity
        .columns
        .iter()
        .map(|column| {
            let value = record
                .get(column.name)
                .ok_or_else(|| DecodeError::MissingColumn(column.name.to_string()))?;
            if value.is_null() && !column.nullable {
                return Err(value.mismatch(column.kind).in_column(column.name));
            }
            Ok(value)
        })
        .collect()
}

/// Decode staged rows through the typed read path
fn verify_staging(
    conn: &Connection,
    entity: &EntitySchema,
    staging: &str,
    verify: VerifyMode,
) -> Result<(), MigrationError> {
    let limit = match verify {
        VerifyMode::All => -1,
        VerifyMode::Sample(n) => i64::try_from(n).unwrap_or(i64::MAX),
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {} ORDER BY rowid LIMIT ?",
        entity.column_list(),
        quote_ident(staging)
    ))?;

    let mut rows = stmt.query([limit])?;
    let mut index = 0;
    while let Some(row) = rows.next()? {
        let validation = |source| MigrationError::Validation {
            entity: entity.name.to_string(),
            row: index,
            source,
        };

        let mut record = Record::new();
        for (i, column) in entity.columns.iter().enumerate() {
            let value = Primitive::from_sql(row.get_ref(i)?, column.kind)
                .map_err(|e| validation(e.in_column(column.name)))?;
            record.set(column.name, value);
        }
        entity.verify(&record).map_err(validation)?;
        index += 1;
    }
    debug!("Verified {} staged rows of '{}'", index, entity.name);
    Ok(())
}
