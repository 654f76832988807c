//! Row-level pessimistic locking: a bounded pool of per-record lock cells, plus a background
//! watchdog that force-releases locks held past the configured expiry.

use std::collections::HashMap;
use std::io;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::txn::TransactionContext;

/// Opaque identity of a lock holder. The engine never interprets this beyond equality — sessions,
/// threads, or connections are all valid callers as far as locking is concerned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallerId(u64);

impl CallerId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

struct LockState {
    owner: Option<CallerId>,
    started_at: Option<Instant>,
    context: Option<TransactionContext>,
}

struct LockCell {
    state: Mutex<LockState>,
    available: Condvar,
}

impl LockCell {
    fn new() -> Self {
        Self {
            state: Mutex::new(LockState { owner: None, started_at: None, context: None }),
            available: Condvar::new(),
        }
    }

    fn is_occupied(&self) -> bool {
        self.state.lock().owner.is_some()
    }

    fn owner(&self) -> Option<CallerId> {
        self.state.lock().owner
    }

    fn age_if_occupied(&self) -> Option<Duration> {
        let st = self.state.lock();
        st.started_at.map(|t| t.elapsed())
    }

    /// Blocks until the cell becomes unoccupied and this caller claims it, retrying every
    /// `retry` interval.
    fn acquire(&self, owner: CallerId, record: u32, retry: Duration) {
        let mut st = self.state.lock();
        loop {
            if st.owner.is_none() {
                st.owner = Some(owner);
                st.started_at = Some(Instant::now());
                st.context = Some(TransactionContext::new(record));
                return;
            }
            self.available.wait_for(&mut st, retry);
        }
    }

    fn check_owner(&self, owner: CallerId) -> Result<()> {
        let st = self.state.lock();
        match st.owner {
            None => Err(EngineError::transaction_error(0, "no lock is held on this record")),
            Some(o) if o != owner => Err(EngineError::transaction_error(0, "this lock is held by another caller")),
            _ => Ok(()),
        }
    }

    fn stage_update(&self, row: crate::Row) {
        let mut st = self.state.lock();
        if let Some(ctx) = st.context.as_mut() {
            ctx.stage_update(row);
        }
    }

    fn stage_delete(&self) {
        let mut st = self.state.lock();
        if let Some(ctx) = st.context.as_mut() {
            ctx.stage_delete();
        }
    }

    fn snapshot_context(&self) -> Option<TransactionContext> {
        self.state.lock().context.clone()
    }

    /// Resets the cell to unoccupied and wakes everyone waiting on it.
    fn release(&self) {
        let mut st = self.state.lock();
        st.owner = None;
        st.started_at = None;
        st.context = None;
        self.available.notify_all();
    }
}

/// Owns the pool of lock cells. Bounded at `config.max_lock_cells`: once full, a new record can
/// only acquire a cell by evicting an unoccupied one.
pub struct LockManager {
    cells: Mutex<HashMap<u32, Arc<LockCell>>>,
    config: EngineConfig,
}

impl LockManager {
    pub fn new(config: EngineConfig) -> Self {
        Self { cells: Mutex::new(HashMap::new()), config }
    }

    fn get_or_create(&self, n: u32) -> Result<Arc<LockCell>> {
        let mut cells = self.cells.lock();
        if let Some(cell) = cells.get(&n) {
            return Ok(cell.clone());
        }
        if cells.len() >= self.config.max_lock_cells {
            let victim = cells.iter().find(|(_, c)| !c.is_occupied()).map(|(&k, _)| k);
            match victim {
                Some(k) => {
                    cells.remove(&k);
                }
                None => {
                    warn!("lock table exhausted at {} cells, all occupied", self.config.max_lock_cells);
                    return Err(EngineError::from(io::Error::new(
                        io::ErrorKind::Other,
                        "lock table is full and every cell is occupied",
                    )));
                }
            }
        }
        let cell = Arc::new(LockCell::new());
        cells.insert(n, cell.clone());
        Ok(cell)
    }

    pub fn has(&self, n: u32) -> bool {
        self.cells.lock().contains_key(&n)
    }

    pub fn is_locked(&self, n: u32) -> bool {
        self.cells.lock().get(&n).map(|c| c.is_occupied()).unwrap_or(false)
    }

    pub fn lock(&self, n: u32, owner: CallerId) -> Result<()> {
        let cell = self.get_or_create(n)?;
        cell.acquire(owner, n, self.config.lock_retry_interval);
        Ok(())
    }

    fn get_checked(&self, n: u32, owner: CallerId) -> Result<Arc<LockCell>> {
        let cell = {
            let cells = self.cells.lock();
            cells
                .get(&n)
                .cloned()
                .ok_or_else(|| EngineError::transaction_error(n, "no lock is held on this record"))?
        };
        cell.check_owner(owner).map_err(|_| EngineError::transaction_error(n, "this lock is held by another caller"))?;
        Ok(cell)
    }

    pub fn stage_update(&self, n: u32, owner: CallerId, row: crate::Row) -> Result<()> {
        let cell = self.get_checked(n, owner)?;
        cell.stage_update(row);
        Ok(())
    }

    pub fn stage_delete(&self, n: u32, owner: CallerId) -> Result<()> {
        let cell = self.get_checked(n, owner)?;
        cell.stage_delete();
        Ok(())
    }

    /// Validates ownership, hands the staged context to `apply`, then releases the lock
    /// regardless of whether `apply` succeeded.
    pub fn commit_and_release(
        &self,
        n: u32,
        owner: CallerId,
        apply: impl FnOnce(Option<TransactionContext>) -> Result<()>,
    ) -> Result<()> {
        let cell = self.get_checked(n, owner)?;
        let ctx = cell.snapshot_context();
        let result = apply(ctx);
        cell.release();
        debug!("lock on record {n} released by its owner");
        result
    }

    /// Force-releases the lock on `n`, discarding any staged mutation. Used by the watchdog and
    /// by record creation reusing a slot whose prior occupant still has a stray lock entry.
    pub fn force_release(&self, n: u32) {
        if let Some(cell) = self.cells.lock().get(&n) {
            cell.release();
        }
    }

    /// Releases every lock owned by `owner`, e.g. at session teardown.
    pub fn release_all_owned_by(&self, owner: CallerId) {
        let cells = self.cells.lock();
        for (&n, cell) in cells.iter() {
            if cell.owner() == Some(owner) {
                cell.release();
                debug!("lock on record {n} released by owner-sweep");
            }
        }
    }

    /// Force-releases every lock held for at least `expiry`. Returns the record numbers evicted.
    fn sweep_expired(&self, expiry: Duration) -> Vec<u32> {
        let cells = self.cells.lock();
        let mut expired = Vec::new();
        for (&n, cell) in cells.iter() {
            if let Some(age) = cell.age_if_occupied() {
                if age >= expiry {
                    cell.release();
                    expired.push(n);
                }
            }
        }
        expired
    }
}

/// Background thread that periodically sweeps the lock table for locks held past their expiry,
/// breaking deadlocks a caller never got around to resolving itself.
pub struct Watchdog {
    shutdown: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub fn spawn(locks: Arc<LockManager>, expiry: Duration, tick: Duration) -> Self {
        let (tx, rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("recordstore-watchdog".into())
            .spawn(move || loop {
                match rx.recv_timeout(tick) {
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        for n in locks.sweep_expired(expiry) {
                            warn!("watchdog force-released the lock on record {n} after it exceeded {expiry:?}");
                        }
                    }
                }
            })
            .expect("failed to spawn the deadlock watchdog thread");
        Self { shutdown: Some(tx), handle: Some(handle) }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        drop(self.shutdown.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
