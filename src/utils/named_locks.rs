use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, RwLock},
};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{trace, Level};

/// Process-wide named critical sections.
///
/// Every index-affecting registry mutation enters the same well-known name,
/// which totally orders those mutations on this replica. Cross-replica races
/// are left to version hashes. Entries are created lazily and live for the
/// life of the process; the name set is small and fixed, so there is nothing
/// to clean up.
pub(crate) struct NamedLocks {
    entries: RwLock<HashMap<&'static str, Arc<Mutex<()>>>>,
}

impl NamedLocks {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Enters the named critical section, waiting for the current holder if
    /// there is one. The returned token releases the section when dropped,
    /// on every exit path.
    #[tracing::instrument(level = Level::TRACE, skip(self))]
    pub(crate) async fn lock(&self, name: &'static str) -> LockToken {
        let mutex = {
            let entries =
                self.entries.read().expect("lock should not be poisoned");
            entries.get(name).cloned()
        };

        let mutex = match mutex {
            Some(mutex) => mutex,
            None => {
                trace!("Creating lock entry");
                Arc::clone(
                    self.entries
                        .write()
                        .expect("lock should not be poisoned")
                        .entry(name)
                        .or_insert_with(|| Arc::new(Mutex::new(()))),
                )
            }
        };

        LockToken {
            name,
            _guard: mutex.lock_owned().await,
        }
    }
}

impl Default for NamedLocks {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof that the holder is inside a named critical section.
///
/// Ownership of this token means no other holder of the same name exists in
/// this process.
pub(crate) struct LockToken {
    name: &'static str,
    _guard: OwnedMutexGuard<()>,
}

impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::NamedLocks;

    #[tokio::test]
    async fn same_name_is_mutually_exclusive() {
        let locks = NamedLocks::new();

        let held = locks.lock("a").await;
        assert_eq!(format!("{held:?}"), "a");

        tokio::time::timeout(Duration::from_millis(50), locks.lock("a"))
            .await
            .expect_err("a held section should not be re-enterable");

        drop(held);

        tokio::time::timeout(Duration::from_millis(50), locks.lock("a"))
            .await
            .expect("a released section should be re-enterable");
    }

    #[tokio::test]
    async fn different_names_do_not_contend() {
        let locks = NamedLocks::new();

        let _held = locks.lock("a").await;

        tokio::time::timeout(Duration::from_millis(50), locks.lock("b"))
            .await
            .expect("distinct names should not block each other");
    }
}
