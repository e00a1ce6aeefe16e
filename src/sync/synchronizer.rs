//! Reentrant reader/writer coordination above the SQLite connection.
//!
//! [`std::sync::RwLock`] cannot express what the catalogue needs: a thread
//! that already holds shared access must be able to take the exclusive side
//! without releasing first, and the writer must be able to re-enter both
//! sides while it writes. This module implements that discipline with a
//! mutex-and-condvar wait loop and per-thread hold accounting.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::{self, ThreadId};

use tracing::{debug, trace, warn};

use crate::error::LockError;

/// Lock flavor held by a [`SyncLock`] token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Shared,
    Exclusive,
}

/// Marker pinned in each thread's local storage. Holder entries keep a
/// [`Weak`] to it, so entries left behind by an exited thread can be told
/// apart from live ones.
struct Liveness;

thread_local! {
    static LIVENESS: Arc<Liveness> = Arc::new(Liveness);
}

struct HolderEntry {
    count: usize,
    alive: Weak<Liveness>,
}

#[derive(Default)]
struct LockState {
    shared: HashMap<ThreadId, HolderEntry>,
    writer: Option<ThreadId>,
    writer_depth: usize,
}

/// Reader/writer lock with per-thread reentrancy and same-thread upgrade.
///
/// Any number of threads hold shared at once; exclusive requires that no
/// *other* thread holds anything. A thread whose shared holds are the only
/// ones outstanding may upgrade to exclusive while keeping them. Waiting
/// writers do not fence off new readers, so writer starvation is possible
/// and accepted.
pub struct Synchronizer {
    state: Mutex<LockState>,
    released: Condvar,
    next_token: AtomicU64,
}

impl Default for Synchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Synchronizer {
    pub fn new() -> Self {
        Synchronizer {
            state: Mutex::new(LockState::default()),
            released: Condvar::new(),
            next_token: AtomicU64::new(1),
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, LockState>, LockError> {
        self.state.lock().map_err(|_| LockError::Poisoned)
    }

    fn token(&self, kind: LockKind) -> SyncLock<'_> {
        SyncLock {
            sync: self,
            kind,
            id: self.next_token.fetch_add(1, Ordering::Relaxed),
            released: false,
            _not_send: PhantomData,
        }
    }

    /// Acquire a shared lock, blocking while another thread holds exclusive.
    ///
    /// Reentrant: a thread may stack any number of shared holds, and the
    /// current writer may take shared locks without deadlocking itself.
    pub fn acquire_shared(&self) -> Result<SyncLock<'_>, LockError> {
        let me = thread::current().id();
        let mut state = self.lock_state()?;
        while state.writer.is_some() && state.writer != Some(me) {
            state = self.released.wait(state).map_err(|_| LockError::Poisoned)?;
        }
        let alive = LIVENESS.with(Arc::downgrade);
        let entry = state
            .shared
            .entry(me)
            .or_insert(HolderEntry { count: 0, alive });
        entry.count += 1;
        trace!(thread = ?me, count = entry.count, "shared lock acquired");
        Ok(self.token(LockKind::Shared))
    }

    /// Acquire the exclusive lock, blocking until no other thread holds
    /// anything. A thread whose shared holds are the only outstanding ones
    /// upgrades in place; the writer itself re-enters with a depth count.
    pub fn acquire_exclusive(&self) -> Result<SyncLock<'_>, LockError> {
        let me = thread::current().id();
        let mut state = self.lock_state()?;
        loop {
            purge_dead_holders(&mut state);
            if state.writer == Some(me) {
                state.writer_depth += 1;
                trace!(thread = ?me, depth = state.writer_depth, "exclusive lock re-entered");
                return Ok(self.token(LockKind::Exclusive));
            }
            if state.writer.is_none() {
                let sole = state.shared.is_empty()
                    || (state.shared.len() == 1 && state.shared.contains_key(&me));
                if sole {
                    state.writer = Some(me);
                    state.writer_depth = 1;
                    trace!(thread = ?me, "exclusive lock acquired");
                    return Ok(self.token(LockKind::Exclusive));
                }
            }
            state = self.released.wait(state).map_err(|_| LockError::Poisoned)?;
        }
    }

    fn release(&self, kind: LockKind) -> Result<(), LockError> {
        match kind {
            LockKind::Shared => self.release_shared(),
            LockKind::Exclusive => self.release_exclusive(),
        }
    }

    fn release_shared(&self) -> Result<(), LockError> {
        let me = thread::current().id();
        let mut state = self.lock_state()?;
        let entry = state
            .shared
            .get_mut(&me)
            .ok_or(LockError::NotASharedHolder(me))?;
        entry.count -= 1;
        if entry.count == 0 {
            state.shared.remove(&me);
        }
        self.released.notify_all();
        Ok(())
    }

    fn release_exclusive(&self) -> Result<(), LockError> {
        let me = thread::current().id();
        let mut state = self.lock_state()?;
        if state.writer != Some(me) {
            return Err(LockError::NotTheWriter(me));
        }
        state.writer_depth -= 1;
        if state.writer_depth == 0 {
            state.writer = None;
        }
        self.released.notify_all();
        Ok(())
    }

    /// Number of distinct threads currently holding shared locks.
    /// Diagnostic only; the answer can be stale by the time it returns.
    pub fn shared_holders(&self) -> usize {
        self.lock_state().map(|s| s.shared.len()).unwrap_or(0)
    }

    /// Whether some thread currently holds the exclusive lock.
    pub fn write_locked(&self) -> bool {
        self.lock_state().map(|s| s.writer.is_some()).unwrap_or(false)
    }
}

/// Drop holder entries whose thread has exited. Runs inside the exclusive
/// wait loop so a crashed reader cannot block writers forever.
fn purge_dead_holders(state: &mut LockState) {
    state.shared.retain(|thread, entry| {
        let alive = entry.alive.strong_count() > 0;
        if !alive {
            warn!(?thread, holds = entry.count, "dropping shared locks held by an exited thread");
        }
        alive
    });
}

/// Token for one acquired lock.
///
/// Releases on drop; [`SyncLock::release`] consumes the token when the
/// caller wants the accounting error surfaced instead of logged. Tokens are
/// not `Send`: a lock must be released by the thread that acquired it.
pub struct SyncLock<'a> {
    sync: &'a Synchronizer,
    kind: LockKind,
    id: u64,
    released: bool,
    _not_send: PhantomData<*const ()>,
}

impl SyncLock<'_> {
    pub fn kind(&self) -> LockKind {
        self.kind
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Release now, surfacing any accounting error that a drop would only
    /// log.
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        self.sync.release(self.kind)
    }
}

impl Drop for SyncLock<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.sync.release(self.kind) {
                debug!(kind = ?self.kind, "lock release during drop failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn shared_locks_stack_per_thread() {
        let sync = Synchronizer::new();
        let a = sync.acquire_shared().unwrap();
        let b = sync.acquire_shared().unwrap();
        assert_eq!(sync.shared_holders(), 1);
        a.release().unwrap();
        assert_eq!(sync.shared_holders(), 1);
        b.release().unwrap();
        assert_eq!(sync.shared_holders(), 0);
    }

    #[test]
    fn multiple_threads_hold_shared_concurrently() {
        let sync = Arc::new(Synchronizer::new());
        let (ready_tx, ready_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let sync = Arc::clone(&sync);
                let ready_tx = ready_tx.clone();
                let release_rx = Arc::clone(&release_rx);
                thread::spawn(move || {
                    let lock = sync.acquire_shared().unwrap();
                    ready_tx.send(()).unwrap();
                    release_rx.lock().unwrap().recv().unwrap();
                    lock.release().unwrap();
                })
            })
            .collect();
        for _ in 0..3 {
            ready_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert_eq!(sync.shared_holders(), 3);
        for _ in 0..3 {
            release_tx.send(()).unwrap();
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(sync.shared_holders(), 0);
    }

    #[test]
    fn exclusive_blocks_until_other_reader_releases() {
        let sync = Arc::new(Synchronizer::new());
        let (held_tx, held_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let reader = {
            let sync = Arc::clone(&sync);
            thread::spawn(move || {
                let lock = sync.acquire_shared().unwrap();
                held_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                lock.release().unwrap();
            })
        };
        held_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let (got_tx, got_rx) = mpsc::channel();
        let writer = {
            let sync = Arc::clone(&sync);
            thread::spawn(move || {
                let lock = sync.acquire_exclusive().unwrap();
                got_tx.send(()).unwrap();
                lock.release().unwrap();
            })
        };
        // The writer must still be waiting while the reader holds on.
        assert!(got_rx.recv_timeout(Duration::from_millis(200)).is_err());
        release_tx.send(()).unwrap();
        got_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        reader.join().unwrap();
        writer.join().unwrap();
    }

    #[test]
    fn sole_shared_holder_upgrades_in_place() {
        let sync = Synchronizer::new();
        let shared = sync.acquire_shared().unwrap();
        let exclusive = sync.acquire_exclusive().unwrap();
        assert!(sync.write_locked());
        assert_eq!(sync.shared_holders(), 1);
        exclusive.release().unwrap();
        assert!(!sync.write_locked());
        shared.release().unwrap();
    }

    #[test]
    fn upgrade_waits_until_sole_holder() {
        let sync = Arc::new(Synchronizer::new());
        let main_shared = sync.acquire_shared().unwrap();
        let (stage_tx, stage_rx) = mpsc::channel();
        let upgrader = {
            let sync = Arc::clone(&sync);
            thread::spawn(move || {
                let shared = sync.acquire_shared().unwrap();
                stage_tx.send("shared").unwrap();
                let exclusive = sync.acquire_exclusive().unwrap();
                stage_tx.send("exclusive").unwrap();
                exclusive.release().unwrap();
                shared.release().unwrap();
            })
        };
        assert_eq!(stage_rx.recv_timeout(Duration::from_secs(5)).unwrap(), "shared");
        assert!(stage_rx.recv_timeout(Duration::from_millis(200)).is_err());
        main_shared.release().unwrap();
        assert_eq!(
            stage_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            "exclusive"
        );
        upgrader.join().unwrap();
    }

    #[test]
    fn writer_reenters_both_kinds() {
        let sync = Synchronizer::new();
        let outer = sync.acquire_exclusive().unwrap();
        let inner = sync.acquire_exclusive().unwrap();
        let shared = sync.acquire_shared().unwrap();
        assert!(sync.write_locked());
        shared.release().unwrap();
        inner.release().unwrap();
        assert!(sync.write_locked());
        outer.release().unwrap();
        assert!(!sync.write_locked());
    }

    #[test]
    fn drop_releases_the_lock() {
        let sync = Synchronizer::new();
        {
            let _lock = sync.acquire_exclusive().unwrap();
            assert!(sync.write_locked());
        }
        assert!(!sync.write_locked());
    }

    #[test]
    fn exited_holder_does_not_block_the_writer() {
        let sync = Arc::new(Synchronizer::new());
        {
            let sync = Arc::clone(&sync);
            thread::spawn(move || {
                let lock = sync.acquire_shared().unwrap();
                // Exit without releasing; the liveness sentinel dies with
                // the thread.
                std::mem::forget(lock);
            })
            .join()
            .unwrap();
        }
        assert_eq!(sync.shared_holders(), 1);
        let lock = sync.acquire_exclusive().unwrap();
        assert_eq!(sync.shared_holders(), 0);
        lock.release().unwrap();
    }
}
