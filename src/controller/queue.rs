//! Keyed, deduplicating, bounded work queue.
//!
//! Guarantees:
//!
//! - A key is queued at most once. Adding a queued key is a no-op.
//! - A key is handed to at most one worker at a time. Adding a key while it
//!   is being processed marks it dirty; [`WorkQueue::done`] queues it again.
//! - [`WorkQueue::add`] blocks while `capacity` keys are waiting. Requeues
//!   from workers ([`WorkQueue::requeue`], [`WorkQueue::add_after`]) never
//!   block, so a full queue cannot stall the workers that drain it.
//! - Delayed keys are held until due, then queued like any other add.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct State<K> {
    ready: VecDeque<K>,
    queued: BTreeSet<K>,
    processing: BTreeSet<K>,
    dirty: BTreeSet<K>,
    delayed: BTreeMap<K, Instant>,
    shutdown: bool,
}

impl<K: Clone + Ord> State<K> {
    const fn new() -> Self {
        Self {
            ready: VecDeque::new(),
            queued: BTreeSet::new(),
            processing: BTreeSet::new(),
            dirty: BTreeSet::new(),
            delayed: BTreeMap::new(),
            shutdown: false,
        }
    }

    /// Queue `key` now, ignoring capacity. Returns `true` if it became ready.
    fn enqueue(&mut self, key: K) -> bool {
        self.delayed.remove(&key);
        if self.queued.contains(&key) {
            return false;
        }
        if self.processing.contains(&key) {
            self.dirty.insert(key);
            return false;
        }
        self.queued.insert(key.clone());
        self.ready.push_back(key);
        true
    }

    /// Move due delayed keys into the ready queue.
    fn promote(&mut self, now: Instant) -> bool {
        let due: Vec<K> = self
            .delayed
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        let mut any = false;
        for key in due {
            any |= self.enqueue(key);
        }
        any
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed.values().min().copied()
    }

    fn is_idle(&self) -> bool {
        self.ready.is_empty()
            && self.processing.is_empty()
            && self.dirty.is_empty()
            && self.delayed.is_empty()
    }
}

/// Work queue shared by producers and a pool of workers.
#[derive(Debug)]
pub struct WorkQueue<K> {
    state: Mutex<State<K>>,
    capacity: usize,
    /// Signalled when a key becomes ready, a delay is added, or on shutdown.
    ready: Condvar,
    /// Signalled when a ready slot frees up.
    space: Condvar,
    /// Signalled when the queue may have become idle.
    idle: Condvar,
}

impl<K: Clone + Ord> WorkQueue<K> {
    /// A queue holding at most `capacity` ready keys (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State::new()),
            capacity: capacity.max(1),
            ready: Condvar::new(),
            space: Condvar::new(),
            idle: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `key`, blocking while the queue is full.
    ///
    /// Returns `false` if the queue was shut down.
    pub fn add(&self, key: K) -> bool {
        let mut state = self.lock();
        loop {
            if state.shutdown {
                return false;
            }
            let absorbed = state.queued.contains(&key) || state.processing.contains(&key);
            if absorbed || state.ready.len() < self.capacity {
                break;
            }
            state = self
                .space
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.enqueue(key) {
            self.ready.notify_one();
        }
        true
    }

    /// Queue `key` without waiting for space.
    pub fn requeue(&self, key: K) {
        let mut state = self.lock();
        if state.shutdown {
            return;
        }
        if state.enqueue(key) {
            self.ready.notify_one();
        }
    }

    /// Queue `key` once `delay` has passed. An earlier pending deadline for
    /// the same key wins; a key already ready stays ready.
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.requeue(key);
            return;
        }
        let mut state = self.lock();
        if state.shutdown || state.queued.contains(&key) {
            return;
        }
        let at = Instant::now() + delay;
        state
            .delayed
            .entry(key)
            .and_modify(|existing| *existing = (*existing).min(at))
            .or_insert(at);
        // A sleeping worker may need a shorter timeout now.
        self.ready.notify_one();
    }

    /// Next key to process, blocking until one is ready.
    ///
    /// Returns `None` after shutdown. The caller must call [`Self::done`]
    /// with the key when finished.
    pub fn pop(&self) -> Option<K> {
        let mut state = self.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if state.promote(Instant::now()) {
                self.ready.notify_all();
            }
            if let Some(key) = state.ready.pop_front() {
                state.queued.remove(&key);
                state.processing.insert(key.clone());
                self.space.notify_one();
                return Some(key);
            }
            state = match state.next_due() {
                Some(at) => {
                    let wait = at.saturating_duration_since(Instant::now());
                    self.ready
                        .wait_timeout(state, wait)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Mark `key` finished. A key added while it was processing is queued
    /// again.
    pub fn done(&self, key: &K) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.remove(key) && !state.shutdown && state.enqueue(key.clone()) {
            self.ready.notify_one();
        }
        if state.is_idle() {
            self.idle.notify_all();
        }
    }

    /// Block until nothing is ready, processing, dirty or delayed, or the
    /// timeout passes. Returns `true` if the queue went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while !state.is_idle() {
            let now = Instant::now();
            if now >= deadline || state.shutdown {
                return state.is_idle();
            }
            state = self
                .idle
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Stop handing out keys and wake every waiter.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.shutdown = true;
        state.delayed.clear();
        drop(state);
        self.ready.notify_all();
        self.space.notify_all();
        self.idle.notify_all();
    }

    /// `true` after [`Self::shutdown`].
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.lock().shutdown
    }

    /// Number of keys ready to be handed out.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().ready.len()
    }

    /// `true` if no key is ready.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys waiting on a delay.
    #[must_use]
    pub fn delayed_len(&self) -> usize {
        self.lock().delayed.len()
    }
}
