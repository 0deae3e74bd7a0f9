use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::cancel::{CancelCause, CancellationToken};

/// Key name that addresses the global lock in declarations.
pub const GLOBAL_KEY: &str = "arbor.global";

/// How a resource is used. `Exclusive` is the stricter mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    #[serde(alias = "read", alias = "shared_read")]
    Shared,
    #[serde(alias = "read_write")]
    Exclusive,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared => write!(f, "shared"),
            Self::Exclusive => write!(f, "exclusive"),
        }
    }
}

/// Name of a lockable resource. `Global` sorts before every named key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockKey {
    Global,
    Named(String),
}

impl LockKey {
    pub fn named(key: impl Into<String>) -> Self {
        let key = key.into();
        if key == GLOBAL_KEY {
            Self::Global
        } else {
            Self::Named(key)
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "{GLOBAL_KEY}"),
            Self::Named(key) => write!(f, "{key}"),
        }
    }
}

/// A declared lock as it appears in catalogs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockDecl {
    pub key: String,
    #[serde(default = "default_mode")]
    pub mode: LockMode,
}

fn default_mode() -> LockMode {
    LockMode::Exclusive
}

/// The set of locks a node needs, one mode per key, iterated in the
/// global acquisition order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockRequirement {
    locks: BTreeMap<LockKey, LockMode>,
}

impl LockRequirement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exclusive(key: impl Into<String>) -> Self {
        Self::new().with(LockKey::named(key), LockMode::Exclusive)
    }

    pub fn shared(key: impl Into<String>) -> Self {
        Self::new().with(LockKey::named(key), LockMode::Shared)
    }

    pub fn global_exclusive() -> Self {
        Self::new().with(LockKey::Global, LockMode::Exclusive)
    }

    pub fn from_decls(decls: &[LockDecl]) -> Self {
        let mut req = Self::new();
        for decl in decls {
            req.insert(LockKey::named(decl.key.as_str()), decl.mode);
        }
        req
    }

    #[must_use]
    pub fn with(mut self, key: LockKey, mode: LockMode) -> Self {
        self.insert(key, mode);
        self
    }

    /// Add `key`; when it is already present the stricter mode is kept.
    pub fn insert(&mut self, key: LockKey, mode: LockMode) {
        let entry = self.locks.entry(key).or_insert(mode);
        *entry = (*entry).max(mode);
    }

    /// Union of both requirements, stricter mode winning per key.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        for (key, mode) in &other.locks {
            merged.insert(key.clone(), *mode);
        }
        merged
    }

    /// The requirement actually acquired for a node: every node holds the
    /// global lock shared unless it asked for it exclusively.
    #[must_use]
    pub fn effective(&self) -> Self {
        let mut effective = self.clone();
        effective.insert(LockKey::Global, LockMode::Shared);
        effective
    }

    pub fn mode_of(&self, key: &LockKey) -> Option<LockMode> {
        self.locks.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LockKey, LockMode)> {
        self.locks.iter().map(|(k, m)| (k, *m))
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Whether both requirements may be held at the same time: every key they
    /// share must be held in shared mode by both.
    pub fn is_compatible_with(&self, other: &Self) -> bool {
        self.locks.iter().all(|(key, mode)| match other.locks.get(key) {
            None => true,
            Some(theirs) => *mode == LockMode::Shared && *theirs == LockMode::Shared,
        })
    }
}

impl fmt::Display for LockRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .locks
            .iter()
            .map(|(key, mode)| format!("{key}({mode})"))
            .collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Failure to obtain a lock.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("acquiring {locks} was interrupted: {cause}")]
    Interrupted { locks: String, cause: CancelCause },
}

/// One named lock in one mode.
#[derive(Debug, Clone)]
pub struct SingleLock {
    key: LockKey,
    mode: LockMode,
    lock: Arc<RwLock<()>>,
}

impl SingleLock {
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    fn try_hold(&self) -> Option<HeldLock> {
        match self.mode {
            LockMode::Shared => self.lock.try_read_arc().map(HeldLock::Read),
            LockMode::Exclusive => self.lock.try_write_arc().map(HeldLock::Write),
        }
    }

    /// Park for at most `wait`. A parked writer keeps new readers out.
    fn hold_within(&self, wait: Duration) -> Option<HeldLock> {
        match self.mode {
            LockMode::Shared => self.lock.try_read_arc_for(wait).map(HeldLock::Read),
            LockMode::Exclusive => self.lock.try_write_arc_for(wait).map(HeldLock::Write),
        }
    }
}

/// Several single locks, always acquired in ascending key order.
#[derive(Debug, Clone)]
pub struct CompositeLock {
    locks: Vec<SingleLock>,
}

impl CompositeLock {
    pub fn locks(&self) -> &[SingleLock] {
        &self.locks
    }
}

/// A lock ready to be acquired for one node.
#[derive(Debug, Clone)]
pub enum ResourceLock {
    Single(SingleLock),
    Composite(CompositeLock),
}

impl ResourceLock {
    fn constituents(&self) -> &[SingleLock] {
        match self {
            Self::Single(lock) => std::slice::from_ref(lock),
            Self::Composite(composite) => &composite.locks,
        }
    }

    /// The requirement this lock was built from.
    pub fn requirement(&self) -> LockRequirement {
        let mut req = LockRequirement::new();
        for lock in self.constituents() {
            req.insert(lock.key.clone(), lock.mode);
        }
        req
    }

    pub fn is_compatible_with(&self, other: &Self) -> bool {
        self.requirement()
            .is_compatible_with(&other.requirement())
    }

    /// Try to take every constituent in order without waiting. Nothing
    /// stays held when this returns `None`.
    pub fn try_acquire(&self) -> Option<LockGuard> {
        self.attempt(None).ok()
    }

    /// Take every constituent without blocking, reusing `parked` for the
    /// constituent at its index. On failure everything is released and the
    /// index of the constituent that was unavailable is returned.
    fn attempt(&self, mut parked: Option<(usize, HeldLock)>) -> Result<LockGuard, usize> {
        let mut guard = LockGuard {
            held: Vec::with_capacity(self.constituents().len()),
        };
        for (index, lock) in self.constituents().iter().enumerate() {
            let held = match parked.take_if(|(at, _)| *at == index) {
                Some((_, held)) => held,
                // On failure `guard` drops and releases in reverse order.
                None => lock.try_hold().ok_or(index)?,
            };
            guard.held.push(held);
        }
        Ok(guard)
    }

    /// Block until every constituent is held or `cancel` fires.
    ///
    /// While waiting, a thread of the rayon pool first runs other ready
    /// jobs. With nothing to run it parks on the constituent that blocked
    /// the last attempt, for at most `WAIT_SLICE` so cancellation is
    /// noticed. No lock is held while running other jobs or parking, so a
    /// job stolen by this thread can never wait on a lock this thread holds.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Interrupted`] when `cancel` fires first.
    pub fn acquire(&self, cancel: &CancellationToken) -> Result<LockGuard, LockError> {
        let mut parked = None;
        loop {
            if let Some(cause) = cancel.cause() {
                tracing::debug!(locks = %self.requirement(), %cause, "lock acquisition interrupted");
                return Err(LockError::Interrupted {
                    locks: self.requirement().to_string(),
                    cause,
                });
            }
            let blocked = match self.attempt(parked.take()) {
                Ok(guard) => {
                    tracing::trace!(locks = %self.requirement(), "locks acquired");
                    return Ok(guard);
                }
                Err(index) => index,
            };
            if let Some(rayon::Yield::Executed) = rayon::yield_now() {
                continue;
            }
            let lock = &self.constituents()[blocked];
            parked = lock.hold_within(WAIT_SLICE).map(|held| (blocked, held));
        }
    }
}

/// Longest single park while waiting for a lock.
const WAIT_SLICE: Duration = Duration::from_millis(2);

enum HeldLock {
    Read(ArcRwLockReadGuard<RawRwLock, ()>),
    Write(ArcRwLockWriteGuard<RawRwLock, ()>),
}

/// Scoped ownership of acquired locks; dropping it releases them in reverse
/// acquisition order.
pub struct LockGuard {
    held: Vec<HeldLock>,
}

impl LockGuard {
    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    pub fn exclusive_count(&self) -> usize {
        self.held
            .iter()
            .filter(|h| matches!(h, HeldLock::Write(_)))
            .count()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        while let Some(lock) = self.held.pop() {
            drop(lock);
        }
    }
}

/// Hands out the shared lock object behind each key.
#[derive(Default)]
pub struct LockManager {
    locks: Mutex<HashMap<LockKey, Arc<RwLock<()>>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for_key(&self, key: &LockKey) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(RwLock::new(()))),
        )
    }

    /// Build the lock for `requirement`, ordered by key.
    pub fn resource_lock(&self, requirement: &LockRequirement) -> ResourceLock {
        let mut singles: Vec<SingleLock> = requirement
            .iter()
            .map(|(key, mode)| SingleLock {
                key: key.clone(),
                mode,
                lock: self.lock_for_key(key),
            })
            .collect();
        if singles.len() == 1 {
            ResourceLock::Single(singles.remove(0))
        } else {
            ResourceLock::Composite(CompositeLock { locks: singles })
        }
    }
}
