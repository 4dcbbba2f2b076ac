//! Live query results
//!
//! The writer thread owns a [`Broadcaster`] with one registered query per
//! observation. After every committed write it re-runs the queries of the
//! entities the write touched and pushes the fresh result down an unbounded
//! channel, so a slow consumer never holds up the writer.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::engine::Engine;
use crate::entity::Entity;
use crate::error::StoreResult;
use crate::predicate::Predicate;
use crate::sort::SortDescriptor;
use crate::store::Command;

/// Handle of one registered observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(u64);

/// Summary of one committed write, for listeners that only invalidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    /// Commit sequence number, increasing from 1
    pub sequence: u64,
    /// Entities the write touched, sorted by name
    pub entities: Vec<&'static str>,
    /// Rows written
    pub writes: usize,
}

impl ChangeSet {
    pub fn touches(&self, entity: &str) -> bool {
        self.entities.iter().any(|e| *e == entity)
    }
}

/// A registered query the writer re-runs after relevant writes
pub(crate) trait Refresh: Send {
    fn entity(&self) -> &'static str;

    fn is_closed(&self) -> bool;

    fn refresh(&self, engine: &Engine);
}

pub(crate) type Sink<E> = mpsc::UnboundedSender<StoreResult<Vec<E>>>;

pub(crate) struct LiveQuery<E: Entity> {
    predicate: Option<Predicate<E>>,
    sort: Option<SortDescriptor<E>>,
    sink: Sink<E>,
}

impl<E: Entity> LiveQuery<E> {
    pub(crate) fn new(
        predicate: Option<Predicate<E>>,
        sort: Option<SortDescriptor<E>>,
        sink: Sink<E>,
    ) -> Self {
        Self {
            predicate,
            sort,
            sink,
        }
    }
}

impl<E: Entity> Refresh for LiveQuery<E> {
    fn entity(&self) -> &'static str {
        E::NAME
    }

    fn is_closed(&self) -> bool {
        self.sink.is_closed()
    }

    fn refresh(&self, engine: &Engine) {
        if self.is_closed() {
            return;
        }
        let result = engine.fetch(self.predicate.as_ref(), self.sort.as_ref());
        // receiver may close between the check and the send
        let _ = self.sink.send(result);
    }
}

/// Observers registered with the writer
#[derive(Default)]
pub(crate) struct Broadcaster {
    next_id: u64,
    observers: BTreeMap<ObserverId, Box<dyn Refresh>>,
}

impl Broadcaster {
    pub(crate) fn register(&mut self, observer: Box<dyn Refresh>) -> ObserverId {
        self.next_id += 1;
        let id = ObserverId(self.next_id);
        self.observers.insert(id, observer);
        id
    }

    pub(crate) fn unregister(&mut self, id: ObserverId) -> bool {
        self.observers.remove(&id).is_some()
    }

    /// Observers of `entities` that still have a receiver
    pub(crate) fn interested<'a>(
        &'a self,
        entities: &'a [&'static str],
    ) -> impl Iterator<Item = &'a dyn Refresh> + 'a {
        self.observers
            .values()
            .map(|o| &**o)
            .filter(move |o| !o.is_closed() && entities.contains(&o.entity()))
    }

    /// Drop observers whose receiver is gone
    pub(crate) fn prune(&mut self) {
        let before = self.observers.len();
        self.observers.retain(|_, o| !o.is_closed());
        let pruned = before - self.observers.len();
        if pruned > 0 {
            debug!("Pruned {} closed observers", pruned);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.observers.len()
    }
}

/// Stream of query results, re-emitted after every relevant write
///
/// The current result is available immediately after
/// [`Store::observe`](crate::Store::observe) returns. Dropping the
/// observation, or calling [`Observation::cancel`], unregisters it.
pub struct Observation<E> {
    id: ObserverId,
    receiver: mpsc::UnboundedReceiver<StoreResult<Vec<E>>>,
    commands: mpsc::WeakUnboundedSender<Command>,
    cancelled: bool,
}

impl<E> Observation<E> {
    pub(crate) fn new(
        id: ObserverId,
        receiver: mpsc::UnboundedReceiver<StoreResult<Vec<E>>>,
        commands: mpsc::WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            id,
            receiver,
            commands,
            cancelled: false,
        }
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Stop receiving updates
    ///
    /// The stream ends at once, including results that were queued but not
    /// yet polled.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.receiver.close();
        if let Some(commands) = self.commands.upgrade() {
            let _ = commands.send(Command::Unobserve(self.id));
        }
    }
}

impl<E> Stream for Observation<E> {
    type Item = StoreResult<Vec<E>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancelled {
            return Poll::Ready(None);
        }
        self.receiver.poll_recv(cx)
    }
}

impl<E> Drop for Observation<E> {
    fn drop(&mut self) {
        self.cancel();
    }
}
