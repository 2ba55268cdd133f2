use crate::{
    database::KeyValueDatabase,
    service::{self, tokens::JsonObject},
    utils, Error, Result,
};

impl service::tokens::Data for KeyValueDatabase {
    #[tracing::instrument(skip(self))]
    fn fetch(&self, key: &str, refresh: bool) -> Result<Option<JsonObject>> {
        if !refresh {
            if let Some(value) = self
                .registry_cache
                .lock()
                .expect("lock should not be poisoned")
                .get_mut(key)
            {
                return Ok(Some(value.clone()));
            }
        }

        let Some(bytes) = self.registry.get(key.as_bytes())? else {
            // A refresh of a now-absent key must also drop the cached copy
            self.registry_cache
                .lock()
                .expect("lock should not be poisoned")
                .remove(key);

            return Ok(None);
        };

        let value: JsonObject = serde_json::from_slice(&bytes)
            .map_err(|_| {
                Error::bad_database(
                    "Stored registry value is not a JSON object.",
                )
            })?;

        self.registry_cache
            .lock()
            .expect("lock should not be poisoned")
            .insert(key.to_owned(), value.clone());

        Ok(Some(value))
    }

    #[tracing::instrument(skip(self, value))]
    fn store(&self, key: &str, value: &JsonObject) -> Result<()> {
        self.registry.insert(key.as_bytes(), &serde_json::to_vec(value)?)?;

        self.registry_cache
            .lock()
            .expect("lock should not be poisoned")
            .insert(key.to_owned(), value.clone());

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn remove(&self, key: &str) -> Result<()> {
        self.registry.remove(key.as_bytes())?;

        self.registry_cache
            .lock()
            .expect("lock should not be poisoned")
            .remove(key);

        Ok(())
    }

    fn keys<'a>(&'a self) -> Box<dyn Iterator<Item = Result<String>> + 'a> {
        Box::new(self.registry.iter().map(|(key, _)| {
            utils::string_from_bytes(&key).map_err(|_| {
                Error::bad_database("Registry key is invalid unicode.")
            })
        }))
    }
}
