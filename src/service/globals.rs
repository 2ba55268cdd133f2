use std::sync::atomic::{AtomicBool, Ordering};

use crate::{
    utils::named_locks::{LockToken, NamedLocks},
    Config,
};

/// Name of the critical section serializing every index-affecting registry
/// mutation on this replica.
pub(crate) const TOKEN_LOCK: &str = "TOKEN_LOCK";

pub(crate) struct Service {
    pub(crate) config: Config,

    /// Named locks; all writers go through [`TOKEN_LOCK`]. Reads never take
    /// it, cross-replica races are handled by version hashes instead.
    registry_locks: NamedLocks,

    pub(crate) shutdown: AtomicBool,
}

impl Service {
    pub(crate) fn load(config: Config) -> Self {
        Self {
            config,
            registry_locks: NamedLocks::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Enters the registry critical section, waiting for the current holder
    /// if there is one. The returned token releases it on drop.
    pub(crate) async fn lock_registry(&self) -> LockToken {
        self.registry_locks.lock(TOKEN_LOCK).await
    }

    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}
