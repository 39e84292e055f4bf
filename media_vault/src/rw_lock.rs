//! Media Vault - Two-Phase Read/Write Lock
//!
//! Writers first reserve the write intent ([`ReadWriteLock::request_write`]),
//! do their expensive preparation while readers keep running, and only then
//! block readers with [`WriteIntent::start_write`]. Readers that arrive while
//! a writer is draining or inside its exclusive section are queued and
//! admitted together when it ends.
//!
//! ```text
//! Idle ──start_read──▶ Reading(n) ──end_read──▶ Idle
//! Idle ──request_write──▶ Intent ──start_write──▶ Pending ──▶ Writing ──end_write──▶ Idle
//! ```

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct LockState {
    /// Readers currently admitted
    readers: u32,
    /// Readers waiting for the current writer to finish
    queued_readers: u32,
    /// A writer is waiting for readers to drain
    write_pending: bool,
    /// A writer is inside its exclusive section
    writing: bool,
    /// A writer holds the write intent
    intent_held: bool,
    /// Bumped on every end of write, releases queued readers
    generation: u64,
}

/// Snapshot of the lock counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStats {
    pub readers: u32,
    pub queued_readers: u32,
    pub write_pending: bool,
    pub writing: bool,
    pub intent_held: bool,
}

/// Write-preferring read/write lock with a split write acquisition
#[derive(Debug, Default)]
pub struct ReadWriteLock {
    state: Mutex<LockState>,
    /// Queued readers wait here for the generation to change
    read_cv: Condvar,
    /// Pending writer waits here for readers to drain
    drain_cv: Condvar,
    /// Writers wait here for the intent
    intent_cv: Condvar,
}

impl ReadWriteLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle, the form the guards need
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Enter a read section. Blocks only while a writer is pending or writing.
    pub fn start_read(self: &Arc<Self>) -> ReadGuard {
        let mut state = self.state.lock();

        if state.writing || state.write_pending {
            state.queued_readers += 1;
            let generation = state.generation;
            while state.generation == generation {
                self.read_cv.wait(&mut state);
            }
            // Counted as an active reader by end_write
        } else {
            state.readers += 1;
        }

        ReadGuard {
            lock: Arc::clone(self),
        }
    }

    fn end_read(&self) {
        let mut state = self.state.lock();

        debug_assert!(state.readers > 0, "end_read without start_read");
        state.readers = state.readers.saturating_sub(1);

        if state.write_pending && state.readers == 0 {
            self.drain_cv.notify_one();
        }
    }

    /// Reserve the write intent. Serializes writers; does not wait for readers.
    pub fn request_write(self: &Arc<Self>) -> WriteIntent {
        let mut state = self.state.lock();

        while state.intent_held {
            self.intent_cv.wait(&mut state);
        }
        state.intent_held = true;

        WriteIntent {
            lock: Some(Arc::clone(self)),
        }
    }

    fn enter_exclusive(&self) {
        let mut state = self.state.lock();

        debug_assert!(state.intent_held, "start_write without request_write");

        if state.readers > 0 {
            state.write_pending = true;
            while state.readers > 0 {
                self.drain_cv.wait(&mut state);
            }
            state.write_pending = false;
        }

        state.writing = true;
    }

    fn leave_exclusive(&self) {
        let mut state = self.state.lock();

        debug_assert!(state.writing, "end_write outside the exclusive section");
        state.writing = false;

        // Admit every reader queued during this write as one batch
        state.readers += state.queued_readers;
        state.queued_readers = 0;
        state.generation = state.generation.wrapping_add(1);
        self.read_cv.notify_all();

        Self::release_intent(&mut state, &self.intent_cv);
    }

    fn cancel_intent(&self) {
        let mut state = self.state.lock();
        Self::release_intent(&mut state, &self.intent_cv);
    }

    fn release_intent(state: &mut LockState, intent_cv: &Condvar) {
        debug_assert!(state.intent_held, "write intent released twice");
        state.intent_held = false;
        intent_cv.notify_one();
    }

    /// Current counters
    pub fn stats(&self) -> LockStats {
        let state = self.state.lock();
        LockStats {
            readers: state.readers,
            queued_readers: state.queued_readers,
            write_pending: state.write_pending,
            writing: state.writing,
            intent_held: state.intent_held,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// GUARDS
// ═══════════════════════════════════════════════════════════════════════════

/// Active read section, ended on drop
#[derive(Debug)]
#[must_use = "the read section ends when the guard is dropped"]
pub struct ReadGuard {
    lock: Arc<ReadWriteLock>,
}

impl ReadGuard {
    /// End the read section explicitly
    pub fn end_read(self) {}
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        self.lock.end_read();
    }
}

/// Reserved write intent. Dropping it without [`start_write`](Self::start_write)
/// cancels the write and leaves the lock as it was.
#[derive(Debug)]
#[must_use = "the write intent is released when dropped"]
pub struct WriteIntent {
    lock: Option<Arc<ReadWriteLock>>,
}

impl WriteIntent {
    /// Wait for active readers to finish and enter the exclusive section
    pub fn start_write(mut self) -> WriteGuard {
        let lock = match self.lock.take() {
            Some(lock) => lock,
            None => unreachable!("write intent already consumed"),
        };

        lock.enter_exclusive();

        WriteGuard { lock }
    }

    /// Release the intent without writing
    pub fn cancel(self) {}
}

impl Drop for WriteIntent {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            lock.cancel_intent();
        }
    }
}

/// Exclusive write section, ended on drop
#[derive(Debug)]
#[must_use = "the exclusive section ends when the guard is dropped"]
pub struct WriteGuard {
    lock: Arc<ReadWriteLock>,
}

impl WriteGuard {
    /// Leave the exclusive section and release queued readers
    pub fn end_write(self) {}
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.lock.leave_exclusive();
    }
}
