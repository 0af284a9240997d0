//! Use counts for shared function directories.
//!
//! Instances of identical code share one `function-<hash>/` directory. Each
//! instance holds a [`DirLease`] from the moment it starts materializing
//! until it is closed or dropped, and only the holder of the last lease
//! deletes the directory.

use crate::hash::FunctionHash;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct Entry {
    users: usize,
    boot: Arc<tokio::sync::Mutex<()>>,
}

/// Tracks which function directories are in use.
///
/// Shared by every instance a [`FunctionRunner`](crate::FunctionRunner)
/// creates; clones of a runner share one registry. Runners that do not
/// share a registry must not share a work dir.
#[derive(Debug, Default)]
pub struct DirRegistry {
    entries: Mutex<HashMap<FunctionHash, Entry>>,
}

impl DirRegistry {
    /// Register one more user of the directory for `hash`.
    pub(crate) fn acquire(self: &Arc<Self>, hash: &FunctionHash) -> DirLease {
        let boot = {
            let mut entries = self.lock();
            let entry = entries.entry(hash.clone()).or_insert_with(|| Entry {
                users: 0,
                boot: Arc::new(tokio::sync::Mutex::new(())),
            });
            entry.users += 1;
            Arc::clone(&entry.boot)
        };
        DirLease {
            registry: Arc::clone(self),
            hash: hash.clone(),
            boot,
            released: false,
        }
    }

    /// Number of live leases on the directory for `hash`.
    pub fn users(&self, hash: &FunctionHash) -> usize {
        self.lock().get(hash).map_or(0, |entry| entry.users)
    }

    fn release(&self, hash: &FunctionHash) -> bool {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(hash) else {
            return true;
        };
        entry.users = entry.users.saturating_sub(1);
        if entry.users == 0 {
            entries.remove(hash);
            return true;
        }
        false
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<FunctionHash, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One instance's claim on a function directory.
///
/// Dropping a lease releases it without touching the directory.
#[derive(Debug)]
pub(crate) struct DirLease {
    registry: Arc<DirRegistry>,
    hash: FunctionHash,
    boot: Arc<tokio::sync::Mutex<()>>,
    released: bool,
}

impl DirLease {
    /// Lock serializing materialize-and-boot for this hash, so one boot
    /// never rewrites the wrapper another is still loading.
    pub(crate) fn boot_lock(&self) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(&self.boot)
    }

    /// Give up the claim. True when no other instance still uses the
    /// directory, meaning the caller should delete it.
    pub(crate) fn release(mut self) -> bool {
        self.released = true;
        self.registry.release(&self.hash)
    }
}

impl Drop for DirLease {
    fn drop(&mut self) {
        if !self.released {
            self.registry.release(&self.hash);
        }
    }
}
