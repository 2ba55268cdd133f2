//! Volatile in-memory engine, used for development and tests

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, RwLock},
};

use super::{KeyValueDatabaseEngine, KvTree};
use crate::{Config, Result};

pub(crate) struct Engine {
    trees: Mutex<HashMap<&'static str, Arc<MemoryTree>>>,
}

impl Engine {
    #[allow(clippy::unnecessary_wraps)]
    pub(crate) fn open(_config: &Config) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            trees: Mutex::new(HashMap::new()),
        }))
    }
}

impl KeyValueDatabaseEngine for Engine {
    fn open_tree(&self, name: &'static str) -> Result<Arc<dyn KvTree>> {
        let mut trees =
            self.trees.lock().expect("lock should not be poisoned");

        let tree = Arc::clone(trees.entry(name).or_insert_with(|| {
            Arc::new(MemoryTree {
                storage: RwLock::new(BTreeMap::new()),
            })
        }));

        Ok(tree)
    }
}

pub(crate) struct MemoryTree {
    storage: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl KvTree for MemoryTree {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .storage
            .read()
            .expect("lock should not be poisoned")
            .get(key)
            .cloned())
    }

    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.storage
            .write()
            .expect("lock should not be poisoned")
            .insert(key.to_vec(), value.to_vec());

        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        self.storage
            .write()
            .expect("lock should not be poisoned")
            .remove(key);

        Ok(())
    }

    fn iter<'a>(&'a self) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a> {
        let snapshot: Vec<_> = self
            .storage
            .read()
            .expect("lock should not be poisoned")
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Box::new(snapshot.into_iter())
    }
}
