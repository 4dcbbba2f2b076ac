//! Synchronous store engine
//!
//! [`Engine`] owns the SQLite connection, runs the migration on open and
//! executes every read and write. It is not shared: the async
//! [`Store`](crate::Store) keeps one on its writer thread, tests and tools
//! may use one directly.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, Connection, Transaction};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::blob::MAX_FRAME_LEN;
use crate::codec::Codec;
use crate::config::{StoreConfig, VerifyMode};
use crate::entity::{Attribute, Entity, Record};
use crate::error::{DecodeError, StoreError, StoreResult};
use crate::migration::{self, MigrationReport};
use crate::observe::{Broadcaster, ChangeSet, LiveQuery, ObserverId, Refresh, Sink};
use crate::predicate::{NativeFilter, Predicate};
use crate::schema::{quote_ident, EntitySchema, Schema};
use crate::sort::SortDescriptor;
use crate::value::Primitive;

const CHANGE_CAPACITY: usize = 64;

/// Result of an update or delete addressed by identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// No record with that identity; nothing was written
    NotFound,
}

impl WriteOutcome {
    pub fn is_applied(self) -> bool {
        self == WriteOutcome::Applied
    }
}

/// Single-connection store engine
pub struct Engine {
    conn: Connection,
    schema: Arc<Schema>,
    report: MigrationReport,
    broadcaster: Broadcaster,
    sequence: u64,
    changes: broadcast::Sender<ChangeSet>,
}

impl Engine {
    /// Open or create the store file and bring it to the schema's version
    pub fn open(config: &StoreConfig, schema: Schema) -> StoreResult<Self> {
        config.ensure_data_dir()?;

        let path = config.store_path();
        info!("Opening store at {:?}", path);
        let conn = Connection::open(&path)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;

        Self::with_connection(conn, schema, config.verify)
    }

    /// Open an in-memory store
    pub fn open_in_memory(schema: Schema) -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, schema, VerifyMode::All)
    }

    fn with_connection(mut conn: Connection, schema: Schema, verify: VerifyMode) -> StoreResult<Self> {
        let report = migration::run(&mut conn, &schema, verify)?;
        info!(
            "Store open at schema version {} ({} entities)",
            report.to,
            schema.entities().len()
        );

        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Ok(Self {
            conn,
            schema: Arc::new(schema),
            report,
            broadcaster: Broadcaster::default(),
            sequence: 0,
            changes,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn schema_version(&self) -> u32 {
        self.schema.version()
    }

    /// What the migration did while opening
    pub fn migration_report(&self) -> &MigrationReport {
        &self.report
    }

    /// Receive a [`ChangeSet`] after every committed write
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChangeSet> {
        self.changes.subscribe()
    }

    pub(crate) fn change_sender(&self) -> broadcast::Sender<ChangeSet> {
        self.changes.clone()
    }

    /// Run several writes in one transaction
    ///
    /// Observers are refreshed once per touched entity after the commit.
    /// If `f` fails, nothing is written and nobody is notified.
    pub fn write<T, F>(&mut self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut WriteTxn<'_>) -> StoreResult<T>,
    {
        let (value, touched, writes) = {
            let tx = self.conn.transaction()?;
            let mut txn = WriteTxn {
                tx,
                schema: &self.schema,
                touched: BTreeSet::new(),
                writes: 0,
            };

            let value = f(&mut txn)?;

            let WriteTxn {
                tx,
                touched,
                writes,
                ..
            } = txn;
            tx.commit()?;
            (value, touched, writes)
        };

        self.publish(touched, writes);
        Ok(value)
    }

    /// Insert a record, or replace the one with the same identity
    pub fn insert<E: Entity>(&mut self, entity: &E) -> StoreResult<()> {
        self.write(|txn| txn.insert(entity))
    }

    pub fn update<E: Entity, V: Codec>(
        &mut self,
        id: &E::Id,
        attribute: Attribute<E, V>,
        value: V,
    ) -> StoreResult<WriteOutcome> {
        self.write(|txn| txn.update(id, attribute, value))
    }

    pub fn delete<E: Entity>(&mut self, entity: &E) -> StoreResult<WriteOutcome> {
        self.write(|txn| txn.delete(entity))
    }

    pub fn delete_by_id<E: Entity>(&mut self, id: &E::Id) -> StoreResult<WriteOutcome> {
        self.write(|txn| txn.delete_by_id::<E>(id))
    }

    pub fn fetch<E: Entity>(
        &self,
        predicate: Option<&Predicate<E>>,
        sort: Option<&SortDescriptor<E>>,
    ) -> StoreResult<Vec<E>> {
        fetch(&self.conn, &self.schema, predicate, sort)
    }

    pub fn get<E: Entity>(&self, id: &E::Id) -> StoreResult<Option<E>> {
        get(&self.conn, &self.schema, id)
    }

    pub fn count<E: Entity>(&self, predicate: Option<&Predicate<E>>) -> StoreResult<usize> {
        let entity = registered::<E>(&self.schema)?;
        check_query(entity, predicate, None)?;
        let filter = predicate.map(|p| p.compile());

        let mut sql = format!("SELECT COUNT(*) FROM {}", quote_ident(entity.name));
        push_filter(&mut sql, filter.as_ref());
        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(filter_params(filter.as_ref())), |row| {
                row.get(0)
            })?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Register a live query and send its current result
    pub(crate) fn observe<E: Entity>(
        &mut self,
        predicate: Option<Predicate<E>>,
        sort: Option<SortDescriptor<E>>,
        sink: Sink<E>,
    ) -> StoreResult<ObserverId> {
        let layout = registered::<E>(&self.schema)?;
        check_query(layout, predicate.as_ref(), sort.as_ref())?;

        let query = LiveQuery::new(predicate, sort, sink);
        query.refresh(self);

        let id = self.broadcaster.register(Box::new(query));
        debug!("Registered observer {:?} on '{}'", id, E::NAME);
        Ok(id)
    }

    pub(crate) fn unobserve(&mut self, id: ObserverId) -> bool {
        let removed = self.broadcaster.unregister(id);
        if removed {
            debug!("Unregistered observer {:?}", id);
        }
        removed
    }

    #[cfg(test)]
    pub(crate) fn observer_count(&self) -> usize {
        self.broadcaster.len()
    }

    fn publish(&mut self, touched: BTreeSet<&'static str>, writes: usize) {
        if touched.is_empty() {
            return;
        }
        self.sequence += 1;
        let entities: Vec<&'static str> = touched.into_iter().collect();

        let engine: &Engine = self;
        let mut refreshed = 0;
        for observer in engine.broadcaster.interested(&entities) {
            observer.refresh(engine);
            refreshed += 1;
        }
        self.broadcaster.prune();

        debug!(
            "Commit {} wrote {} rows to {:?}, refreshed {} observers",
            self.sequence, writes, entities, refreshed
        );

        // no subscribers is fine
        let _ = self.changes.send(ChangeSet {
            sequence: self.sequence,
            entities,
            writes,
        });
    }
}

/// Writes inside one transaction, see [`Engine::write`]
pub struct WriteTxn<'a> {
    tx: Transaction<'a>,
    schema: &'a Schema,
    touched: BTreeSet<&'static str>,
    writes: usize,
}

impl WriteTxn<'_> {
    /// Insert a record, or replace the one with the same identity
    ///
    /// A replaced record keeps its insertion position.
    pub fn insert<E: Entity>(&mut self, entity: &E) -> StoreResult<()> {
        let layout = registered::<E>(self.schema)?;
        let record = E::attributes().to_record(entity);
        for (column, value) in record.iter() {
            check_storable(layout, column, value)?;
        }

        self.tx.execute(
            &upsert_sql(layout),
            params_from_iter(record.iter().map(|(_, value)| value)),
        )?;
        self.record_write(E::NAME);
        Ok(())
    }

    /// Set one attribute of the record with identity `id`
    pub fn update<E: Entity, V: Codec>(
        &mut self,
        id: &E::Id,
        attribute: Attribute<E, V>,
        value: V,
    ) -> StoreResult<WriteOutcome> {
        let layout = registered::<E>(self.schema)?;
        if attribute.name() == layout.identity {
            return Err(StoreError::ImmutableIdentity {
                entity: E::NAME.to_string(),
            });
        }

        check_columns(layout, [attribute.name()])?;
        let value = value.encode();
        check_storable(layout, attribute.name(), &value)?;

        let sql = format!(
            "UPDATE {} SET {} = ? WHERE {} = ?",
            quote_ident(layout.name),
            quote_ident(attribute.name()),
            quote_ident(layout.identity)
        );
        let changed = self.tx.execute(&sql, params![value, id.encode()])?;
        Ok(self.outcome(E::NAME, changed))
    }

    pub fn delete<E: Entity>(&mut self, entity: &E) -> StoreResult<WriteOutcome> {
        self.delete_by_id::<E>(&entity.id())
    }

    pub fn delete_by_id<E: Entity>(&mut self, id: &E::Id) -> StoreResult<WriteOutcome> {
        let layout = registered::<E>(self.schema)?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_ident(layout.name),
            quote_ident(layout.identity)
        );
        let changed = self.tx.execute(&sql, [id.encode()])?;
        Ok(self.outcome(E::NAME, changed))
    }

    /// Read inside the transaction, including its own uncommitted writes
    pub fn fetch<E: Entity>(
        &self,
        predicate: Option<&Predicate<E>>,
        sort: Option<&SortDescriptor<E>>,
    ) -> StoreResult<Vec<E>> {
        fetch(&self.tx, self.schema, predicate, sort)
    }

    pub fn get<E: Entity>(&self, id: &E::Id) -> StoreResult<Option<E>> {
        get(&self.tx, self.schema, id)
    }

    fn outcome(&mut self, entity: &'static str, changed: usize) -> WriteOutcome {
        if changed == 0 {
            return WriteOutcome::NotFound;
        }
        self.touched.insert(entity);
        self.writes += changed;
        WriteOutcome::Applied
    }

    fn record_write(&mut self, entity: &'static str) {
        self.outcome(entity, 1);
    }
}

fn registered<E: Entity>(schema: &Schema) -> StoreResult<&EntitySchema> {
    schema
        .entity(E::NAME)
        .ok_or_else(|| StoreError::UnknownEntity(E::NAME.to_string()))
}

/// Every column a query reads must belong to the entity's table
fn check_query<E>(
    entity: &EntitySchema,
    predicate: Option<&Predicate<E>>,
    sort: Option<&SortDescriptor<E>>,
) -> StoreResult<()> {
    if let Some(predicate) = predicate {
        check_columns(entity, predicate.columns())?;
    }
    if let Some(sort) = sort {
        check_columns(entity, sort.keys().iter().map(|(column, _)| *column))?;
    }
    Ok(())
}

fn check_columns<'c>(
    entity: &EntitySchema,
    columns: impl IntoIterator<Item = &'c str>,
) -> StoreResult<()> {
    for column in columns {
        if entity.column(column).is_none() {
            return Err(StoreError::UnknownAttribute {
                entity: entity.name.to_string(),
                attribute: column.to_string(),
            });
        }
    }
    Ok(())
}

/// Refuse blobs the read path would reject
fn check_storable(entity: &EntitySchema, column: &str, value: &Primitive) -> StoreResult<()> {
    match value {
        Primitive::Blob(bytes) if bytes.len() > MAX_FRAME_LEN => Err(StoreError::ValueTooLarge {
            entity: entity.name.to_string(),
            column: column.to_string(),
            len: bytes.len(),
            max: MAX_FRAME_LEN,
        }),
        _ => Ok(()),
    }
}

fn upsert_sql(entity: &EntitySchema) -> String {
    let updates: Vec<String> = entity
        .columns
        .iter()
        .filter(|c| c.name != entity.identity)
        .map(|c| format!("{0} = excluded.{0}", quote_ident(c.name)))
        .collect();
    let action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };

    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({}) {}",
        quote_ident(entity.name),
        entity.column_list(),
        vec!["?"; entity.columns.len()].join(", "),
        quote_ident(entity.identity),
        action
    )
}

fn push_filter(sql: &mut String, filter: Option<&NativeFilter>) {
    if let Some(filter) = filter {
        sql.push_str(" WHERE ");
        sql.push_str(&filter.sql);
    }
}

fn filter_params(filter: Option<&NativeFilter>) -> &[Primitive] {
    filter.map(|f| f.params.as_slice()).unwrap_or(&[])
}

fn fetch<E: Entity>(
    conn: &Connection,
    schema: &Schema,
    predicate: Option<&Predicate<E>>,
    sort: Option<&SortDescriptor<E>>,
) -> StoreResult<Vec<E>> {
    let layout = registered::<E>(schema)?;
    check_query(layout, predicate, sort)?;

    let filter = predicate.map(|p| p.compile());
    let order = match sort {
        Some(sort) => sort.compile(),
        None => SortDescriptor::<E>::natural().compile(),
    };
    select(conn, layout, filter.as_ref(), &order)
}

fn get<E: Entity>(conn: &Connection, schema: &Schema, id: &E::Id) -> StoreResult<Option<E>> {
    let layout = registered::<E>(schema)?;
    let filter = NativeFilter {
        sql: format!("{} = ?", quote_ident(layout.identity)),
        params: vec![id.encode()],
    };
    let mut rows = select(conn, layout, Some(&filter), "LIMIT 1")?;
    Ok(rows.pop())
}

/// Run a query and decode its rows
///
/// Undecodable rows are skipped with a warning. The query fails only when
/// it returned rows and none of them decoded.
fn select<E: Entity>(
    conn: &Connection,
    layout: &EntitySchema,
    filter: Option<&NativeFilter>,
    tail: &str,
) -> StoreResult<Vec<E>> {
    let mut sql = format!(
        "SELECT {} FROM {}",
        layout.column_list(),
        quote_ident(layout.name)
    );
    push_filter(&mut sql, filter);
    sql.push(' ');
    sql.push_str(tail);

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(filter_params(filter)))?;

    let mut entities = Vec::new();
    let mut first_error = None;
    let mut skipped = 0;
    while let Some(row) = rows.next()? {
        let values = (0..layout.columns.len())
            .map(|i| row.get_ref(i))
            .collect::<rusqlite::Result<Vec<_>>>()?;

        match decode_row::<E>(layout, &values) {
            Ok(entity) => entities.push(entity),
            Err(err) => {
                warn!("Skipping undecodable '{}' row: {}", layout.name, err);
                skipped += 1;
                first_error.get_or_insert(err);
            }
        }
    }

    match first_error {
        Some(err) if entities.is_empty() => Err(err.into()),
        _ => {
            if skipped > 0 {
                debug!("Query on '{}' skipped {} rows", layout.name, skipped);
            }
            Ok(entities)
        }
    }
}

fn decode_row<E: Entity>(layout: &EntitySchema, values: &[ValueRef<'_>]) -> Result<E, DecodeError> {
    let mut record = Record::new();
    for (column, value) in layout.columns.iter().zip(values) {
        let primitive =
            Primitive::from_sql(*value, column.kind).map_err(|e| e.in_column(column.name))?;
        record.set(column.name, primitive);
    }
    E::attributes().from_record(&record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{self, Anime, Collection, CollectionTitle, EpisodeProgress, WatchStatus};
    use tempfile::TempDir;

    fn engine() -> Engine {
        Engine::open_in_memory(catalog::schema().unwrap()).unwrap()
    }

    fn anime(id: i64, title: &str) -> Anime {
        Anime::new(id, title)
    }

    #[test]
    fn test_insert_and_get() {
        let mut engine = engine();
        assert!(engine.get::<Anime>(&7).unwrap().is_none());

        let record = anime(7, "Mushishi");
        engine.insert(&record).unwrap();
        assert_eq!(engine.get::<Anime>(&7).unwrap(), Some(record));
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut engine = engine();
        engine.insert(&anime(1, "Planetes")).unwrap();
        engine.insert(&anime(2, "Texhnolyze")).unwrap();

        let mut renamed = anime(1, "Planetes (2003)");
        renamed.status = WatchStatus::Completed;
        engine.insert(&renamed).unwrap();

        let all: Vec<Anime> = engine.fetch(None, None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], renamed);
        assert_eq!(all[1].id, 2);
    }

    #[test]
    fn test_update_and_not_found() {
        let mut engine = engine();
        engine.insert(&anime(3, "Kaiba")).unwrap();

        let outcome = engine.update(&3, Anime::PROGRESS, 0.5).unwrap();
        assert_eq!(outcome, WriteOutcome::Applied);
        assert_eq!(engine.get::<Anime>(&3).unwrap().unwrap().progress, 0.5);

        let outcome = engine.update(&4, Anime::PROGRESS, 0.5).unwrap();
        assert_eq!(outcome, WriteOutcome::NotFound);
        assert_eq!(engine.count::<Anime>(None).unwrap(), 1);
    }

    #[test]
    fn test_identity_cannot_be_updated() {
        let mut engine = engine();
        engine.insert(&anime(3, "Kaiba")).unwrap();
        let err = engine.update(&3, Anime::ID, 4).unwrap_err();
        assert!(matches!(err, StoreError::ImmutableIdentity { .. }));
    }

    #[test]
    fn test_delete() {
        let mut engine = engine();
        let record = anime(5, "Dennou Coil");
        engine.insert(&record).unwrap();

        assert_eq!(engine.delete(&record).unwrap(), WriteOutcome::Applied);
        assert_eq!(engine.delete(&record).unwrap(), WriteOutcome::NotFound);
        assert_eq!(
            engine.delete_by_id::<Anime>(&5).unwrap(),
            WriteOutcome::NotFound
        );
    }

    #[test]
    fn test_unregistered_entity() {
        let schema = Schema::builder(1)
            .entity::<EpisodeProgress>()
            .build()
            .unwrap();
        let mut engine = Engine::open_in_memory(schema).unwrap();

        let err = engine.insert(&anime(1, "Paranoia Agent")).unwrap_err();
        assert!(matches!(err, StoreError::UnknownEntity(name) if name == "anime"));
    }

    #[test]
    fn test_failed_batch_writes_nothing() {
        let mut engine = engine();
        let mut changes = engine.subscribe_changes();

        let result: StoreResult<()> = engine.write(|txn| {
            txn.insert(&anime(1, "Ergo Proxy"))?;
            assert_eq!(txn.get::<Anime>(&1)?.map(|a| a.id), Some(1));
            txn.update(&1, Anime::ID, 2).map(|_| ())
        });

        assert!(result.is_err());
        assert_eq!(engine.count::<Anime>(None).unwrap(), 0);
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn test_change_sets() {
        let mut engine = engine();
        let mut changes = engine.subscribe_changes();

        engine
            .write(|txn| {
                txn.insert(&anime(1, "Serial Experiments Lain"))?;
                txn.insert(&anime(2, "Boogiepop Phantom"))?;
                txn.insert(&EpisodeProgress::new("lain-01", 1, 1))
            })
            .unwrap();
        // no-op writes publish nothing
        engine.delete_by_id::<Anime>(&99).unwrap();

        let change = changes.try_recv().unwrap();
        assert_eq!(change.sequence, 1);
        assert_eq!(change.entities, vec!["anime", "episode_progress"]);
        assert_eq!(change.writes, 3);
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn test_undecodable_rows_are_skipped() {
        let mut engine = engine();
        engine.insert(&anime(1, "Haibane Renmei")).unwrap();
        engine.insert(&anime(2, "Gunslinger Girl")).unwrap();
        engine
            .conn
            .execute("UPDATE anime SET status = 'rewatching' WHERE id = 2", [])
            .unwrap();

        let all: Vec<Anime> = engine.fetch(None, None).unwrap();
        assert_eq!(all.iter().map(|a| a.id).collect::<Vec<_>>(), vec![1]);

        // every returned row failing is an error
        let err = engine.get::<Anime>(&2).unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }

    #[test]
    fn test_reopen_file_store() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::in_dir(dir.path());

        {
            let mut engine = Engine::open(&config, catalog::schema().unwrap()).unwrap();
            assert_eq!(engine.migration_report().from, None);
            engine.insert(&anime(9, "Monster")).unwrap();
        }

        let engine = Engine::open(&config, catalog::schema().unwrap()).unwrap();
        assert_eq!(
            engine.migration_report().from,
            Some(catalog::CATALOG_VERSION)
        );
        assert_eq!(engine.get::<Anime>(&9).unwrap().unwrap().title, "Monster");
    }

    /// Blobs past the frame limit are refused before they reach the table
    #[test]
    fn test_oversized_blob_is_refused() {
        let mut engine = engine();
        let mut collection = Collection::new(CollectionTitle::Favorites);
        collection.anime_ids = (0..4_000_000).collect();

        let err = engine.insert(&collection).unwrap_err();
        assert!(
            matches!(
                &err,
                StoreError::ValueTooLarge { column, len, max, .. }
                    if column == "anime_ids" && *len > *max && *max == MAX_FRAME_LEN
            ),
            "unexpected error: {err}"
        );
        assert_eq!(engine.count::<Collection>(None).unwrap(), 0);

        collection.anime_ids = vec![1, 2, 3];
        engine.insert(&collection).unwrap();
        let err = engine
            .update(&collection.id, Collection::ANIME_IDS, (0..4_000_000).collect())
            .unwrap_err();
        assert!(matches!(err, StoreError::ValueTooLarge { .. }));

        let stored = engine.get::<Collection>(&collection.id).unwrap().unwrap();
        assert_eq!(stored.anime_ids, vec![1, 2, 3]);
    }

    // declared on the type but never added to its table
    const NICKNAME: Attribute<Anime, String> = Attribute::new(
        "nickname",
        |a: &Anime| a.title.clone(),
        |_: &mut Anime, _: String| {},
    );

    #[test]
    fn test_attribute_outside_table_is_typed_error() {
        let mut engine = engine();
        engine.insert(&anime(1, "Mononoke")).unwrap();

        let unknown = |err: StoreError| {
            matches!(
                err,
                StoreError::UnknownAttribute { ref entity, ref attribute }
                    if entity == "anime" && attribute == "nickname"
            )
        };

        let predicate = Anime::ID.eq(1) & NICKNAME.eq("Mono".to_string());
        assert!(unknown(engine.fetch(Some(&predicate), None).unwrap_err()));
        assert!(unknown(engine.count(Some(&predicate)).unwrap_err()));

        let sort = SortDescriptor::by(NICKNAME.ascending());
        assert!(unknown(engine.fetch::<Anime>(None, Some(&sort)).unwrap_err()));

        assert!(unknown(engine.update(&1, NICKNAME, "Mono".to_string()).unwrap_err()));
        assert_eq!(engine.get::<Anime>(&1).unwrap().unwrap().title, "Mononoke");
    }

    #[test]
    fn test_upsert_sql() {
        let layout = EntitySchema::of::<EpisodeProgress>().unwrap();
        let sql = upsert_sql(&layout);
        assert!(sql.starts_with("INSERT INTO \"episode_progress\""));
        assert!(sql.contains("ON CONFLICT(\"id\") DO UPDATE SET"));
        assert!(!sql.contains("\"id\" = excluded"));
    }
}
