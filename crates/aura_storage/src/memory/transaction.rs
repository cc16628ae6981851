//! In-memory transactions and the handles issued from them.

use super::collection::Collection;
use super::EngineState;
use crate::engine::{Cursor, Index, NativeTransaction, ObjectStore, TransactionMode};
use crate::error::{EngineError, EngineResult};
use crate::key::Key;
use crate::request::{completion, request, Completion, CompletionSignal, Request};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Created, waiting for an overlapping transaction to finish.
    Waiting,
    Active,
    Committed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

/// A request issued while the transaction was waiting to start.
type Queued = Box<dyn FnOnce(&TxInner, &mut TxState) + Send>;

struct TxState {
    phase: Phase,
    /// Collection contents as of the first write, restored on abort.
    undo: BTreeMap<String, Collection>,
    queued: Vec<Queued>,
    /// Settled before it started with nothing queued; commits on start.
    settled: bool,
}

impl fmt::Debug for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxState")
            .field("phase", &self.phase)
            .field("undo", &self.undo.keys().collect::<Vec<_>>())
            .field("queued", &self.queued.len())
            .field("settled", &self.settled)
            .finish()
    }
}

/// An unfinished transaction as seen by its database's scheduler.
#[derive(Debug)]
pub(super) struct LiveTransaction {
    id: u64,
    scope: Vec<String>,
    mode: TransactionMode,
    started: bool,
    txn: Weak<TxInner>,
}

impl LiveTransaction {
    fn conflicts_with(&self, other: &Self) -> bool {
        (self.mode.is_read_write() || other.mode.is_read_write())
            && self.scope.iter().any(|name| other.scope.contains(name))
    }
}

/// Marks every waiting transaction that no earlier overlapping transaction
/// holds back as started, and returns the ones still alive.
fn startable(live: &mut [LiveTransaction]) -> Vec<Arc<TxInner>> {
    let mut ready = Vec::new();
    for i in 0..live.len() {
        if live[i].started {
            continue;
        }
        let (earlier, rest) = live.split_at_mut(i);
        let candidate = &mut rest[0];
        if earlier.iter().any(|txn| txn.conflicts_with(candidate)) {
            continue;
        }
        candidate.started = true;
        if let Some(txn) = candidate.txn.upgrade() {
            ready.push(txn);
        }
    }
    ready
}

#[derive(Debug)]
struct TxInner {
    id: u64,
    database: String,
    scope: Vec<String>,
    mode: TransactionMode,
    engine: Arc<Mutex<EngineState>>,
    // Lock order: `state`, then `engine`.
    state: Mutex<TxState>,
    signal: CompletionSignal,
    completion: Completion,
}

/// A transaction of the [`MemoryEngine`](super::MemoryEngine).
///
/// Transactions are scheduled like the browser schedules them: a
/// transaction starts only once every earlier unfinished transaction whose
/// scope overlaps its own has finished, unless both are read-only. Requests
/// issued while it waits are queued and run, in order, when it starts.
/// Overlapping writers therefore never see each other's uncommitted writes,
/// and an abort only ever restores what its own transaction changed.
///
/// Once started, requests run as soon as they are issued, so a transaction
/// never has outstanding requests at the end of a turn and [`settle`]
/// commits it. Failed requests do not abort the transaction; the caller
/// decides.
///
/// A transaction whose last handle is dropped while active commits.
///
/// [`settle`]: NativeTransaction::settle
#[derive(Debug, Clone)]
pub struct MemoryTransaction {
    inner: Arc<TxInner>,
}

impl MemoryTransaction {
    pub(super) fn begin(
        id: u64,
        database: &str,
        scope: &[String],
        mode: TransactionMode,
        engine: Arc<Mutex<EngineState>>,
    ) -> Self {
        let (signal, completion) = completion();
        let inner = Arc::new(TxInner {
            id,
            database: database.to_string(),
            scope: scope.to_vec(),
            mode,
            engine,
            state: Mutex::new(TxState {
                phase: Phase::Waiting,
                undo: BTreeMap::new(),
                queued: Vec::new(),
                settled: false,
            }),
            signal,
            completion,
        });

        let ready = {
            let mut engine = inner.engine.lock();
            match engine.databases.get_mut(database) {
                Some(db) => {
                    db.live.push(LiveTransaction {
                        id,
                        scope: scope.to_vec(),
                        mode,
                        started: false,
                        txn: Arc::downgrade(&inner),
                    });
                    startable(&mut db.live)
                }
                None => vec![Arc::clone(&inner)],
            }
        };
        if ready.iter().any(|txn| txn.id == id) {
            debug!(txn = id, database, ?scope, %mode, "memory transaction started");
        } else {
            debug!(txn = id, database, ?scope, %mode, "memory transaction waiting");
        }
        for txn in ready {
            txn.start();
        }
        Self { inner }
    }

    /// Returns true while requests are accepted.
    #[must_use]
    pub fn is_active(&self) -> bool {
        let tx = self.inner.state.lock();
        match tx.phase {
            Phase::Active => true,
            Phase::Waiting => !tx.settled,
            Phase::Committed | Phase::Aborted => false,
        }
    }

    /// Returns true while an overlapping transaction holds this one back.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.inner.state.lock().phase == Phase::Waiting
    }

    fn run<T, F>(&self, collection: &str, access: Access, op: F) -> Request<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Collection) -> EngineResult<T> + Send + 'static,
    {
        let mut tx = self.inner.state.lock();
        if tx.phase != Phase::Waiting {
            return Request::ready(self.inner.apply(&mut tx, collection, access, op));
        }
        if let Err(err) = self.inner.check(&tx, collection, access) {
            return Request::ready(Err(err));
        }
        let (responder, request) = request();
        let collection = collection.to_string();
        let queued: Queued = Box::new(move |inner: &TxInner, state: &mut TxState| {
            responder.resolve(inner.apply(state, &collection, access, op));
        });
        tx.queued.push(queued);
        request
    }
}

impl TxInner {
    fn check(&self, tx: &TxState, collection: &str, access: Access) -> EngineResult<()> {
        let finished = match tx.phase {
            Phase::Waiting => tx.settled,
            Phase::Active => false,
            Phase::Committed | Phase::Aborted => true,
        };
        if finished {
            return Err(EngineError::transaction_inactive(format!(
                "transaction {} has already finished",
                self.id
            )));
        }
        if access == Access::Write && !self.mode.is_read_write() {
            return Err(EngineError::read_only(format!(
                "cannot write to {collection} in a readonly transaction"
            )));
        }
        Ok(())
    }

    fn apply<T>(
        &self,
        tx: &mut TxState,
        collection: &str,
        access: Access,
        op: impl FnOnce(&mut Collection) -> EngineResult<T>,
    ) -> EngineResult<T> {
        self.check(tx, collection, access)?;

        let mut guard = self.engine.lock();
        let engine = &mut *guard;
        if access == Access::Write {
            if let Some(err) = engine.faults.writes.get(collection) {
                return Err(err.clone());
            }
        }
        let target = engine
            .databases
            .get_mut(&self.database)
            .and_then(|db| db.collections.get_mut(collection))
            .ok_or_else(|| {
                EngineError::not_found(format!("collection {collection} does not exist"))
            })?;
        if access == Access::Write && !tx.undo.contains_key(collection) {
            tx.undo.insert(collection.to_string(), target.clone());
        }
        op(target)
    }

    fn has_index(&self, collection: &str, index: &str) -> EngineResult<bool> {
        let tx = self.state.lock();
        self.check(&tx, collection, Access::Read)?;
        let engine = self.engine.lock();
        engine
            .databases
            .get(&self.database)
            .and_then(|db| db.collections.get(collection))
            .map(|c| c.has_index(index))
            .ok_or_else(|| {
                EngineError::not_found(format!("collection {collection} does not exist"))
            })
    }

    /// Runs the requests queued while waiting.
    fn start(&self) {
        let mut tx = self.state.lock();
        if tx.phase != Phase::Waiting {
            return;
        }
        tx.phase = Phase::Active;
        let queued = std::mem::take(&mut tx.queued);
        if !queued.is_empty() {
            debug!(txn = self.id, requests = queued.len(), "memory transaction started");
        }
        for request in queued {
            request(self, &mut *tx);
        }
        let settled = tx.settled;
        drop(tx);
        if settled {
            self.commit();
        }
    }

    fn settle(&self) {
        let mut tx = self.state.lock();
        match tx.phase {
            // Queued requests keep a waiting transaction alive.
            Phase::Waiting => {
                if tx.queued.is_empty() {
                    tx.settled = true;
                }
            }
            Phase::Active => {
                drop(tx);
                self.commit();
            }
            Phase::Committed | Phase::Aborted => {}
        }
    }

    fn commit(&self) {
        let mut tx = self.state.lock();
        if tx.phase == Phase::Committed || tx.phase == Phase::Aborted {
            return;
        }
        let fault = if self.mode.is_read_write() && tx.phase == Phase::Active {
            self.engine.lock().faults.next_commit.take()
        } else {
            None
        };
        if let Some(err) = fault {
            self.rollback(&mut tx);
            debug!(txn = self.id, error = %err, "memory transaction failed to commit");
            drop(tx);
            self.signal.fail(err);
        } else {
            tx.undo.clear();
            tx.queued.clear();
            tx.phase = Phase::Committed;
            debug!(txn = self.id, "memory transaction committed");
            drop(tx);
            self.signal.complete();
        }
        self.release();
    }

    fn abort(&self) {
        let mut tx = self.state.lock();
        if tx.phase == Phase::Committed || tx.phase == Phase::Aborted {
            return;
        }
        self.rollback(&mut tx);
        debug!(txn = self.id, "memory transaction aborted");
        drop(tx);
        self.signal.fail(EngineError::aborted(format!(
            "transaction {} was aborted",
            self.id
        )));
        self.release();
    }

    fn rollback(&self, tx: &mut TxState) {
        let undo = std::mem::take(&mut tx.undo);
        if !undo.is_empty() {
            let mut engine = self.engine.lock();
            if let Some(db) = engine.databases.get_mut(&self.database) {
                for (name, collection) in undo {
                    db.collections.insert(name, collection);
                }
            }
        }
        // Dropping the queue fails the requests that never ran.
        tx.queued.clear();
        tx.phase = Phase::Aborted;
    }

    /// Leaves the scheduler and starts the transactions it was holding back.
    fn release(&self) {
        let ready = {
            let mut engine = self.engine.lock();
            match engine.databases.get_mut(&self.database) {
                Some(db) => {
                    db.live.retain(|txn| txn.id != self.id);
                    startable(&mut db.live)
                }
                None => Vec::new(),
            }
        };
        for txn in ready {
            txn.start();
        }
    }
}

impl Drop for TxInner {
    fn drop(&mut self) {
        self.commit();
    }
}

impl NativeTransaction for MemoryTransaction {
    type Store = MemoryStore;

    fn id(&self) -> u64 {
        self.inner.id
    }

    fn mode(&self) -> TransactionMode {
        self.inner.mode
    }

    fn object_store(&self, name: &str) -> EngineResult<MemoryStore> {
        if !self.is_active() {
            return Err(EngineError::invalid_state(format!(
                "transaction {} has already finished",
                self.inner.id
            )));
        }
        if !self.inner.scope.iter().any(|scoped| scoped == name) {
            return Err(EngineError::not_found(format!(
                "collection {name} is not in the transaction's scope"
            )));
        }
        Ok(MemoryStore {
            txn: self.clone(),
            name: name.to_string(),
        })
    }

    fn abort(&self) {
        self.inner.abort();
    }

    fn settle(&self) {
        self.inner.settle();
    }

    fn finished(&self) -> Completion {
        self.inner.completion.clone()
    }
}

/// A collection handle of a [`MemoryTransaction`].
#[derive(Debug, Clone)]
pub struct MemoryStore {
    txn: MemoryTransaction,
    name: String,
}

impl ObjectStore for MemoryStore {
    type Index = MemoryIndex;

    fn add(&self, record: Value) -> Request<Key> {
        self.txn
            .run(&self.name, Access::Write, |c| c.write(record, false))
    }

    fn put(&self, record: Value) -> Request<Key> {
        self.txn
            .run(&self.name, Access::Write, |c| c.write(record, true))
    }

    fn get(&self, key: &Key) -> Request<Option<Value>> {
        let key = key.clone();
        self.txn.run(&self.name, Access::Read, move |c| Ok(c.get(&key)))
    }

    fn get_all(&self) -> Request<Vec<Value>> {
        self.txn.run(&self.name, Access::Read, |c| Ok(c.all()))
    }

    fn delete(&self, key: &Key) -> Request<()> {
        let key = key.clone();
        self.txn.run(&self.name, Access::Write, move |c| {
            c.delete(&key);
            Ok(())
        })
    }

    fn clear(&self) -> Request<()> {
        self.txn.run(&self.name, Access::Write, |c| {
            c.clear();
            Ok(())
        })
    }

    fn count(&self) -> Request<u64> {
        self.txn.run(&self.name, Access::Read, |c| Ok(c.count()))
    }

    fn index(&self, name: &str) -> EngineResult<MemoryIndex> {
        if !self.txn.inner.has_index(&self.name, name)? {
            return Err(EngineError::not_found(format!(
                "index {name} does not exist on {}",
                self.name
            )));
        }
        Ok(MemoryIndex {
            txn: self.txn.clone(),
            collection: self.name.clone(),
            name: name.to_string(),
        })
    }
}

/// An index handle of a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryIndex {
    txn: MemoryTransaction,
    collection: String,
    name: String,
}

impl Index for MemoryIndex {
    type Cursor = MemoryCursor;

    fn get(&self, key: &Key) -> Request<Option<Value>> {
        let (name, key) = (self.name.clone(), key.clone());
        self.txn
            .run(&self.collection, Access::Read, move |c| c.index_get(&name, &key))
    }

    fn get_all(&self, key: &Key) -> Request<Vec<Value>> {
        let (name, key) = (self.name.clone(), key.clone());
        self.txn
            .run(&self.collection, Access::Read, move |c| c.index_get_all(&name, &key))
    }

    fn open_cursor(&self, only: &Key) -> Request<Option<MemoryCursor>> {
        self.step(only.clone(), None)
    }
}

impl MemoryIndex {
    fn step(&self, only: Key, after: Option<Key>) -> Request<Option<MemoryCursor>> {
        let index = self.clone();
        self.txn.run(&self.collection, Access::Read, move |c| {
            let found = c.index_next(&index.name, &only, after.as_ref())?;
            Ok(found.map(|(primary_key, value)| MemoryCursor {
                index,
                only,
                primary_key,
                value,
            }))
        })
    }
}

/// A forward cursor over one key of a [`MemoryIndex`].
///
/// Advancing looks up the next entry after the current position, so records
/// deleted behind the cursor do not disturb the walk.
#[derive(Debug, Clone)]
pub struct MemoryCursor {
    index: MemoryIndex,
    only: Key,
    primary_key: Key,
    value: Value,
}

impl Cursor for MemoryCursor {
    fn primary_key(&self) -> &Key {
        &self.primary_key
    }

    fn value(&self) -> &Value {
        &self.value
    }

    fn delete(&self) -> Request<()> {
        let primary = self.primary_key.clone();
        self.index
            .txn
            .run(&self.index.collection, Access::Write, move |c| {
                c.delete(&primary);
                Ok(())
            })
    }

    fn advance(self) -> Request<Option<Self>> {
        let Self {
            index,
            only,
            primary_key,
            ..
        } = self;
        index.step(only, Some(primary_key))
    }
}
