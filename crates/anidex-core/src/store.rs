//! Async store facade
//!
//! [`Store`] is a cheap cloneable handle. A dedicated writer thread owns the
//! [`Engine`]; every call is a job sent over a command channel and answered
//! on a oneshot channel, so concurrent callers queue and each read sees a
//! fully committed state.

use std::path::Path;
use std::sync::Arc;
use std::thread;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error};

use crate::codec::Codec;
use crate::config::StoreConfig;
use crate::engine::{Engine, WriteOutcome, WriteTxn};
use crate::entity::{Attribute, Entity};
use crate::error::{StoreError, StoreResult};
use crate::migration::MigrationReport;
use crate::observe::{ChangeSet, Observation, ObserverId};
use crate::predicate::Predicate;
use crate::schema::Schema;
use crate::sort::SortDescriptor;

const WRITER_THREAD: &str = "anidex-writer";

type Job = Box<dyn FnOnce(&mut Engine) + Send>;

/// Commands handled by the writer thread
pub(crate) enum Command {
    Run(Job),
    Unobserve(ObserverId),
}

struct Ready {
    changes: broadcast::Sender<ChangeSet>,
    report: MigrationReport,
}

/// Handle to an open store
///
/// The writer thread exits once every handle is dropped.
#[derive(Clone)]
pub struct Store {
    commands: mpsc::UnboundedSender<Command>,
    changes: broadcast::Sender<ChangeSet>,
    report: Arc<MigrationReport>,
}

impl Store {
    /// Open the store described by `config`
    ///
    /// Returns once the file is open and migrated; a migration failure is
    /// returned here and no handle is created.
    pub async fn open(config: StoreConfig, schema: Schema) -> StoreResult<Self> {
        Self::spawn(move || Engine::open(&config, schema)).await
    }

    /// Open the store configured by the TOML file at `path`
    ///
    /// A missing file means the default configuration.
    pub async fn open_from_config_file(path: &Path, schema: Schema) -> StoreResult<Self> {
        let config = StoreConfig::load_from_path(path).map_err(StoreError::ConfigFile)?;
        Self::open(config, schema).await
    }

    /// Open a store that lives only as long as its handles
    pub async fn open_in_memory(schema: Schema) -> StoreResult<Self> {
        Self::spawn(move || Engine::open_in_memory(schema)).await
    }

    async fn spawn<F>(open: F) -> StoreResult<Self>
    where
        F: FnOnce() -> StoreResult<Engine> + Send + 'static,
    {
        let (commands, inbox) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        thread::Builder::new()
            .name(WRITER_THREAD.to_string())
            .spawn(move || {
                let engine = match open() {
                    Ok(engine) => engine,
                    Err(e) => {
                        error!("Failed to open store: {}", e);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let ready = Ready {
                    changes: engine.change_sender(),
                    report: engine.migration_report().clone(),
                };
                if ready_tx.send(Ok(ready)).is_ok() {
                    run_writer(engine, inbox);
                }
            })
            .map_err(StoreError::Spawn)?;

        let ready = ready_rx.await.map_err(|_| StoreError::Closed)??;
        Ok(Self {
            commands,
            changes: ready.changes,
            report: Arc::new(ready.report),
        })
    }

    /// Run `job` on the writer thread and wait for its result
    async fn call<T, F>(&self, job: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Engine) -> StoreResult<T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |engine| {
            let _ = reply_tx.send(job(engine));
        });
        self.commands
            .send(Command::Run(job))
            .map_err(|_| StoreError::Closed)?;
        reply_rx.await.map_err(|_| StoreError::Closed)?
    }

    /// Schema version the store was opened at
    pub fn schema_version(&self) -> u32 {
        self.report.to
    }

    pub fn migration_report(&self) -> &MigrationReport {
        &self.report
    }

    /// Invalidation signals, one [`ChangeSet`] per committed write
    pub fn changes(&self) -> broadcast::Receiver<ChangeSet> {
        self.changes.subscribe()
    }

    /// Insert a record, or replace the one with the same identity
    pub async fn insert<E: Entity>(&self, entity: E) -> StoreResult<()> {
        self.call(move |engine| engine.insert(&entity)).await
    }

    /// Set one attribute of the record with identity `id`
    ///
    /// Never creates a record: a missing identity is [`WriteOutcome::NotFound`].
    pub async fn update<E, V>(
        &self,
        id: E::Id,
        attribute: Attribute<E, V>,
        value: V,
    ) -> StoreResult<WriteOutcome>
    where
        E: Entity,
        V: Codec + Send + 'static,
    {
        self.call(move |engine| engine.update(&id, attribute, value))
            .await
    }

    pub async fn delete<E: Entity>(&self, entity: &E) -> StoreResult<WriteOutcome> {
        self.delete_by_id::<E>(entity.id()).await
    }

    pub async fn delete_by_id<E: Entity>(&self, id: E::Id) -> StoreResult<WriteOutcome> {
        self.call(move |engine| engine.delete_by_id::<E>(&id)).await
    }

    /// Records matching `predicate`, ordered by `sort` then insertion order
    pub async fn fetch<E: Entity>(
        &self,
        predicate: Option<Predicate<E>>,
        sort: Option<SortDescriptor<E>>,
    ) -> StoreResult<Vec<E>> {
        self.call(move |engine| engine.fetch(predicate.as_ref(), sort.as_ref()))
            .await
    }

    pub async fn get<E: Entity>(&self, id: E::Id) -> StoreResult<Option<E>> {
        self.call(move |engine| engine.get::<E>(&id)).await
    }

    pub async fn count<E: Entity>(&self, predicate: Option<Predicate<E>>) -> StoreResult<usize> {
        self.call(move |engine| engine.count(predicate.as_ref()))
            .await
    }

    /// Observe a query; the stream yields the current result first
    pub async fn observe<E: Entity>(
        &self,
        predicate: Option<Predicate<E>>,
        sort: Option<SortDescriptor<E>>,
    ) -> StoreResult<Observation<E>> {
        let (sink, receiver) = mpsc::unbounded_channel();
        let id = self
            .call(move |engine| engine.observe(predicate, sort, sink))
            .await?;
        Ok(Observation::new(id, receiver, self.commands.downgrade()))
    }

    /// Run several writes on the writer thread inside one transaction
    ///
    /// Observers see one refresh per touched entity, after the commit.
    pub async fn write<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut WriteTxn<'_>) -> StoreResult<T> + Send + 'static,
    {
        self.call(move |engine| engine.write(f)).await
    }

    #[cfg(test)]
    async fn observer_count(&self) -> StoreResult<usize> {
        self.call(|engine| Ok(engine.observer_count())).await
    }
}

fn run_writer(mut engine: Engine, mut inbox: mpsc::UnboundedReceiver<Command>) {
    debug!("Store writer started");
    while let Some(command) = inbox.blocking_recv() {
        match command {
            Command::Run(job) => job(&mut engine),
            Command::Unobserve(id) => {
                engine.unobserve(id);
            }
        }
    }
    debug!("Store writer stopped");
}
