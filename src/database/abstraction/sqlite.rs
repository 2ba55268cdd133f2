//! Durable engine backed by SQLite

use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};

use super::{KeyValueDatabaseEngine, KvTree};
use crate::{Config, Error, Result};

pub(crate) struct Engine {
    connection: Arc<Mutex<Connection>>,
}

impl Engine {
    pub(crate) fn open(config: &Config) -> Result<Arc<Self>> {
        if config.database.path.is_empty() {
            return Err(Error::bad_config(
                "The sqlite backend requires database.path to be set.",
            ));
        }

        let connection = Connection::open(&config.database.path)?;
        connection.pragma_update(None, "journal_mode", "WAL")?;
        connection.pragma_update(None, "synchronous", "NORMAL")?;

        Ok(Arc::new(Self {
            connection: Arc::new(Mutex::new(connection)),
        }))
    }
}

impl KeyValueDatabaseEngine for Engine {
    fn open_tree(&self, name: &'static str) -> Result<Arc<dyn KvTree>> {
        self.connection.lock().execute(
            format!(
                "CREATE TABLE IF NOT EXISTS {name} (key BLOB PRIMARY KEY, \
                 value BLOB NOT NULL)"
            )
            .as_str(),
            (),
        )?;

        Ok(Arc::new(SqliteTree {
            connection: Arc::clone(&self.connection),
            name,
        }))
    }
}

pub(crate) struct SqliteTree {
    connection: Arc<Mutex<Connection>>,
    name: &'static str,
}

impl KvTree for SqliteTree {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let connection = self.connection.lock();

        let value = connection
            .prepare_cached(
                format!("SELECT value FROM {} WHERE key = ?", self.name)
                    .as_str(),
            )?
            .query_row([key], |row| row.get(0))
            .optional()?;

        Ok(value)
    }

    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.connection.lock().execute(
            format!(
                "INSERT OR REPLACE INTO {} (key, value) VALUES (?, ?)",
                self.name
            )
            .as_str(),
            [key, value],
        )?;

        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        self.connection.lock().execute(
            format!("DELETE FROM {} WHERE key = ?", self.name).as_str(),
            [key],
        )?;

        Ok(())
    }

    fn iter<'a>(&'a self) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a> {
        let connection = self.connection.lock();

        let snapshot = connection
            .prepare_cached(
                format!(
                    "SELECT key, value FROM {} ORDER BY key ASC",
                    self.name
                )
                .as_str(),
            )
            .and_then(|mut statement| {
                statement
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<Vec<(Vec<u8>, Vec<u8>)>, _>>()
            })
            .unwrap_or_default();

        Box::new(snapshot.into_iter())
    }
}
