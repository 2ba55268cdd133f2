pub(crate) mod abstraction;
pub(crate) mod key_value;

use std::sync::{Arc, Mutex};

use abstraction::{KeyValueDatabaseEngine, KvTree};
use lru_cache::LruCache;
use tracing::info;

use crate::{
    service::tokens::JsonObject, services, Config, Error, Result, Services,
    SERVICES,
};

pub(crate) struct KeyValueDatabase {
    /// Keeps the engine alive for as long as the trees borrowed from it.
    _db: Arc<dyn KeyValueDatabaseEngine>,

    /// Token records, the owner directory, and the owner shards, all keyed
    /// by their registry key.
    pub(super) registry: Arc<dyn KvTree>,

    /// Read-through cache over registry values. Reads with `refresh` bypass
    /// it and repopulate it from the engine.
    pub(super) registry_cache: Mutex<LruCache<String, JsonObject>>,
}

impl KeyValueDatabase {
    /// Load an existing database or create a new one, then initialize the
    /// global [`Services`] with it.
    pub(crate) async fn load_or_create(config: Config) -> Result<()> {
        let engine: Arc<dyn KeyValueDatabaseEngine> =
            match config.database.backend.as_str() {
                "memory" => abstraction::memory::Engine::open(&config)?,
                #[cfg(feature = "sqlite")]
                "sqlite" => abstraction::sqlite::Engine::open(&config)?,
                _ => {
                    return Err(Error::bad_config(
                        "Database backend was not found.",
                    ));
                }
            };

        let registry = engine.open_tree("registry")?;

        let db: &'static KeyValueDatabase =
            Box::leak(Box::new(KeyValueDatabase {
                _db: engine,
                registry,
                registry_cache: Mutex::new(LruCache::new(
                    config.kv_cache_capacity,
                )),
            }));

        let services_raw = Box::new(Services::build(db, config)?);

        // This is the first and only time we initialize the SERVICES static
        *SERVICES.write().expect("lock should not be poisoned") =
            Some(Box::leak(services_raw));

        info!(
            backend = %services().globals.config.database.backend,
            "Database is ready"
        );

        Ok(())
    }
}
