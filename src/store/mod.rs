//! Backing store pool.
//!
//! Sessions borrow a [`PooledHandle`] for the duration of one request that
//! needs persistence (login and registration) and give it back when the
//! guard is dropped, on every exit path. The handles are kept in a
//! [`WorkQueue`], so a request waits for a free one up to a timeout instead
//! of failing as soon as the pool is busy.
//!
//! The store itself is an in-memory user table shared by every handle.

use crate::runtime::WorkQueue;

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the store pool.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store pool needs at least one connection")]
    NoConnections,

    /// No handle was released within the timeout.
    #[error("no store connection available after {0:?}")]
    Exhausted(Duration),
}

type Users = Arc<Mutex<HashMap<String, String>>>;

/// One connection to the store.
#[derive(Debug)]
pub struct StoreHandle {
    id: usize,
    users: Users,
}

impl StoreHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Returns the password registered for `user`.
    pub fn password_of(&self, user: &str) -> Option<String> {
        self.users.lock().unwrap().get(user).cloned()
    }

    /// Registers `user` unless the name is taken.
    ///
    /// Returns `true` when the user was inserted.
    pub fn insert_user(&self, user: &str, password: &str) -> bool {
        let mut users = self.users.lock().unwrap();
        if users.contains_key(user) {
            return false;
        }
        users.insert(user.to_string(), password.to_string());
        true
    }
}

/// A fixed set of store handles shared across sessions.
pub struct StorePool {
    idle: Arc<WorkQueue<StoreHandle>>,
    users: Users,
    size: usize,
    in_use: Arc<AtomicUsize>,
}

impl StorePool {
    /// Opens `connections` handles onto an empty user table.
    pub fn new(connections: usize) -> Result<Self, StoreError> {
        if connections == 0 {
            return Err(StoreError::NoConnections);
        }

        let users: Users = Arc::new(Mutex::new(HashMap::new()));
        let idle = Arc::new(WorkQueue::new());

        for id in 0..connections {
            idle.push(StoreHandle {
                id,
                users: users.clone(),
            });
        }

        Ok(Self {
            idle,
            users,
            size: connections,
            in_use: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Adds users before the server starts.
    pub fn seed<I, U, P>(&self, users: I)
    where
        I: IntoIterator<Item = (U, P)>,
        U: Into<String>,
        P: Into<String>,
    {
        let mut table = self.users.lock().unwrap();
        for (user, password) in users {
            table.insert(user.into(), password.into());
        }
    }

    /// Borrows a handle, waiting up to `timeout` for one to be released.
    pub fn acquire(&self, timeout: Duration) -> Result<PooledHandle, StoreError> {
        let handle = self
            .idle
            .wait_and_pop_timeout(timeout)
            .ok_or(StoreError::Exhausted(timeout))?;

        self.in_use.fetch_add(1, Ordering::AcqRel);

        Ok(PooledHandle {
            handle: Some(handle),
            idle: self.idle.clone(),
            in_use: self.in_use.clone(),
        })
    }

    /// Number of handles not currently borrowed.
    pub fn free(&self) -> usize {
        self.idle.len()
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of registered users.
    pub fn user_count(&self) -> usize {
        self.users.lock().unwrap().len()
    }
}

/// A borrowed store handle, returned to the pool when dropped.
pub struct PooledHandle {
    handle: Option<StoreHandle>,
    idle: Arc<WorkQueue<StoreHandle>>,
    in_use: Arc<AtomicUsize>,
}

impl PooledHandle {
    /// Returns the handle to the pool now. Dropping the guard is equivalent.
    pub fn release(mut self) {
        self.give_back();
    }

    fn give_back(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.idle.push(handle);
            self.in_use.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Deref for PooledHandle {
    type Target = StoreHandle;

    fn deref(&self) -> &StoreHandle {
        // Only `give_back` empties the slot, and it consumes or drops `self`.
        match &self.handle {
            Some(handle) => handle,
            None => unreachable!("pooled handle used after release"),
        }
    }
}

impl Drop for PooledHandle {
    fn drop(&mut self) {
        self.give_back();
    }
}
